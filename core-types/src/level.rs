// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Aggregation levels and slot boundary math.
//!
//! Boundaries are computed on local wall time under the stream's fixed UTC
//! offset, then shifted back to epoch nanoseconds.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::types::UtcOffset;

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

const MINUTE_NS: i64 = 60 * NANOS_PER_SECOND;
const HOUR_NS: i64 = 60 * MINUTE_NS;
const DAY_NS: i64 = 24 * HOUR_NS;

// 1970-01-01 was a Thursday.
const EPOCH_DAYS_FROM_MONDAY: i64 = 3;

/// Rollup granularity, ordered finest to coarsest so stale keys drain
/// bottom-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Min5,
    Min10,
    Min15,
    Hour,
    Day,
    Month,
    Year,
    RunningTotal,
    HourOfDay,
    DayOfWeek,
}

impl Level {
    /// Slot length for fixed-duration levels; `None` for calendar and folded
    /// levels.
    pub fn fixed_duration_ns(&self) -> Option<i64> {
        match self {
            Level::Min5 => Some(5 * MINUTE_NS),
            Level::Min10 => Some(10 * MINUTE_NS),
            Level::Min15 => Some(15 * MINUTE_NS),
            Level::Hour => Some(HOUR_NS),
            Level::Day => Some(DAY_NS),
            _ => None,
        }
    }

    /// Start of the slot containing `ts_ns`, or `None` for levels without
    /// window addressing.
    pub fn align(&self, ts_ns: i64, offset: UtcOffset) -> Option<i64> {
        let local = ts_ns + offset.nanos();
        match self {
            Level::Min5 | Level::Min10 | Level::Min15 | Level::Hour | Level::Day => {
                let duration = self.fixed_duration_ns()?;
                Some(local.div_euclid(duration) * duration - offset.nanos())
            }
            Level::Month => {
                let dt = local_datetime(local)?;
                let first = NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1)?;
                Some(date_start_ns(first)? - offset.nanos())
            }
            Level::Year => {
                let dt = local_datetime(local)?;
                let first = NaiveDate::from_ymd_opt(dt.year(), 1, 1)?;
                Some(date_start_ns(first)? - offset.nanos())
            }
            Level::RunningTotal | Level::HourOfDay | Level::DayOfWeek => None,
        }
    }

    /// End of the slot starting at `slot_start_ns`.
    pub fn slot_end(&self, slot_start_ns: i64, offset: UtcOffset) -> Option<i64> {
        match self {
            Level::Min5 | Level::Min10 | Level::Min15 | Level::Hour | Level::Day => {
                Some(slot_start_ns + self.fixed_duration_ns()?)
            }
            Level::Month => {
                let dt = local_datetime(slot_start_ns + offset.nanos())?;
                let (year, month) = if dt.month() == 12 {
                    (dt.year() + 1, 1)
                } else {
                    (dt.year(), dt.month() + 1)
                };
                let next = NaiveDate::from_ymd_opt(year, month, 1)?;
                Some(date_start_ns(next)? - offset.nanos())
            }
            Level::Year => {
                let dt = local_datetime(slot_start_ns + offset.nanos())?;
                let next = NaiveDate::from_ymd_opt(dt.year() + 1, 1, 1)?;
                Some(date_start_ns(next)? - offset.nanos())
            }
            Level::RunningTotal | Level::HourOfDay | Level::DayOfWeek => None,
        }
    }

    /// Next coarser cascaded level. Only Hour -> Day -> Month cascade; coarser
    /// and folded levels are recomputed lazily at query time.
    pub fn coarser(&self) -> Option<Level> {
        match self {
            Level::Hour => Some(Level::Day),
            Level::Day => Some(Level::Month),
            _ => None,
        }
    }
}

/// Slot addressing within a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SlotKey {
    /// Slot starting at this instant.
    At(i64),
    /// The single all-time slot of RunningTotal.
    All,
    /// Calendar fold by local hour, 0..=23.
    HourOfDay(u8),
    /// Calendar fold by local weekday, Monday = 0.
    DayOfWeek(u8),
}

/// Local hour of day (0..=23) of the instant under `offset`.
pub fn hour_of_day(ts_ns: i64, offset: UtcOffset) -> u8 {
    let local = ts_ns + offset.nanos();
    local.div_euclid(HOUR_NS).rem_euclid(24) as u8
}

/// Local weekday (Monday = 0) of the instant under `offset`.
pub fn day_of_week(ts_ns: i64, offset: UtcOffset) -> u8 {
    let local = ts_ns + offset.nanos();
    (local.div_euclid(DAY_NS) + EPOCH_DAYS_FROM_MONDAY).rem_euclid(7) as u8
}

fn local_datetime(local_ns: i64) -> Option<NaiveDateTime> {
    let secs = local_ns.div_euclid(NANOS_PER_SECOND);
    let subsec = local_ns.rem_euclid(NANOS_PER_SECOND) as u32;
    DateTime::from_timestamp(secs, subsec).map(|dt| dt.naive_utc())
}

fn date_start_ns(date: NaiveDate) -> Option<i64> {
    let start = date.and_hms_opt(0, 0, 0)?;
    Some(start.and_utc().timestamp() * NANOS_PER_SECOND)
}
