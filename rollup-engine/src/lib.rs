// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Windowed statistical rollups over sensor streams.
//!
//! Hour and sub-hour slots reduce raw points; Day/Month/Year reduce the next
//! finer aggregates and never re-read raw points. Everything here is a pure
//! read: records are written only by the cascade.

mod reading;
mod segment;

use std::collections::BTreeMap;
use std::sync::Arc;

use core_types::level::{self, Level, SlotKey};
use core_types::types::{
    AccumStats, AggregateRecord, InstantStats, Point, ResetRecord, StreamId, StreamSchema,
    UtcOffset,
};
use log::warn;
use store_api::{AggregateStore, Catalog, PointStore, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RollupError {
    #[error("invalid window for {level:?}: [{start_ns}, {end_ns})")]
    InvalidWindow {
        level: Level,
        start_ns: i64,
        end_ns: i64,
    },
    #[error("invalid reading range [{from_ns}, {to_ns}]")]
    InvalidRange { from_ns: i64, to_ns: i64 },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct RollupEngine {
    catalog: Arc<dyn Catalog>,
    points: Arc<dyn PointStore>,
    aggregates: Arc<dyn AggregateStore>,
}

impl RollupEngine {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        points: Arc<dyn PointStore>,
        aggregates: Arc<dyn AggregateStore>,
    ) -> Self {
        Self {
            catalog,
            points,
            aggregates,
        }
    }

    /// Compute the aggregate of one slot. `Ok(None)` means no point or finer
    /// record contributes to the window.
    pub fn compute_window(
        &self,
        stream: StreamId,
        level: Level,
        start_ns: i64,
        end_ns: i64,
    ) -> Result<Option<AggregateRecord>, RollupError> {
        let schema = self.catalog.schema_for(stream)?;
        validate_window(level, start_ns, end_ns, schema.offset)?;
        match level {
            Level::Min5 | Level::Min10 | Level::Min15 | Level::Hour => {
                self.reduce_points(stream, &schema, level, start_ns, end_ns)
            }
            Level::Day => self.reduce_finer(stream, &schema, level, Level::Hour, start_ns, end_ns),
            Level::Month => self.reduce_finer(stream, &schema, level, Level::Day, start_ns, end_ns),
            Level::Year => self.reduce_finer(stream, &schema, level, Level::Month, start_ns, end_ns),
            // Unreachable: validate_window already rejected unbounded levels.
            _ => Err(RollupError::InvalidWindow {
                level,
                start_ns,
                end_ns,
            }),
        }
    }

    /// All-time aggregate, merged from Month records.
    pub fn compute_running_total(
        &self,
        stream: StreamId,
    ) -> Result<Option<AggregateRecord>, RollupError> {
        let schema = self.catalog.schema_for(stream)?;
        let months =
            self.aggregates
                .aggregates_in_range(stream, Level::Month, i64::MIN, i64::MAX)?;
        Ok(merge_aggregates(
            stream,
            Level::RunningTotal,
            SlotKey::All,
            &schema,
            &months,
        ))
    }

    /// Hour records folded by local hour of day. Only populated folds are
    /// returned, ascending by hour.
    pub fn compute_hour_of_day(
        &self,
        stream: StreamId,
    ) -> Result<Vec<AggregateRecord>, RollupError> {
        let schema = self.catalog.schema_for(stream)?;
        let hours = self
            .aggregates
            .aggregates_in_range(stream, Level::Hour, i64::MIN, i64::MAX)?;
        Ok(fold_records(stream, Level::HourOfDay, &schema, hours, |start| {
            level::hour_of_day(start, schema.offset)
        }))
    }

    /// Day records folded by local weekday (Monday = 0). Only populated folds
    /// are returned, ascending by weekday.
    pub fn compute_day_of_week(
        &self,
        stream: StreamId,
    ) -> Result<Vec<AggregateRecord>, RollupError> {
        let schema = self.catalog.schema_for(stream)?;
        let days = self
            .aggregates
            .aggregates_in_range(stream, Level::Day, i64::MIN, i64::MAX)?;
        Ok(fold_records(stream, Level::DayOfWeek, &schema, days, |start| {
            level::day_of_week(start, schema.offset)
        }))
    }

    fn reduce_points(
        &self,
        stream: StreamId,
        schema: &StreamSchema,
        level: Level,
        start_ns: i64,
        end_ns: i64,
    ) -> Result<Option<AggregateRecord>, RollupError> {
        let points = self.points.points_in_range(stream, start_ns, end_ns)?;
        // Resets exactly on either boundary still shape the window.
        let resets = self.points.resets_through(stream, start_ns, end_ns)?;
        Ok(
            reduce_parts(stream, schema, &points, &resets).map(|parts| AggregateRecord {
                stream,
                level,
                slot: SlotKey::At(start_ns),
                instantaneous: parts.instantaneous,
                accumulating: parts.accumulating,
                status: parts.status,
                tags: parts.tags,
            }),
        )
    }

    fn reduce_finer(
        &self,
        stream: StreamId,
        schema: &StreamSchema,
        level: Level,
        finer: Level,
        start_ns: i64,
        end_ns: i64,
    ) -> Result<Option<AggregateRecord>, RollupError> {
        let records = self
            .aggregates
            .aggregates_in_range(stream, finer, start_ns, end_ns)?;
        Ok(merge_aggregates(
            stream,
            level,
            SlotKey::At(start_ns),
            schema,
            &records,
        ))
    }
}

fn validate_window(
    level: Level,
    start_ns: i64,
    end_ns: i64,
    offset: UtcOffset,
) -> Result<(), RollupError> {
    let valid = end_ns > start_ns
        && level.align(start_ns, offset) == Some(start_ns)
        && level.slot_end(start_ns, offset) == Some(end_ns);
    if valid {
        Ok(())
    } else {
        Err(RollupError::InvalidWindow {
            level,
            start_ns,
            end_ns,
        })
    }
}

pub(crate) struct ReducedParts {
    pub instantaneous: Vec<Option<InstantStats>>,
    pub accumulating: Vec<Option<AccumStats>>,
    pub status: Vec<Option<String>>,
    pub tags: Vec<String>,
}

/// Reduce raw points (plus resets) against a schema. `None` when no point
/// contributes.
pub(crate) fn reduce_parts(
    stream: StreamId,
    schema: &StreamSchema,
    points: &[Point],
    resets: &[ResetRecord],
) -> Option<ReducedParts> {
    if points.is_empty() {
        return None;
    }

    let accum_arity = schema.accumulating.len();
    for reset in resets {
        if reset.before.len() > accum_arity || reset.after.len() > accum_arity {
            warn!(
                "stream {}: reset at {} references accumulating ordinals beyond schema arity {}; extras skipped",
                stream, reset.ts_ns, accum_arity
            );
        }
    }

    let instantaneous = (0..schema.instantaneous.len())
        .map(|ordinal| {
            let values: Vec<f64> = points
                .iter()
                .filter_map(|p| p.instantaneous.get(ordinal).copied().flatten())
                .collect();
            instant_stats(&values)
        })
        .collect();

    let accumulating = (0..accum_arity)
        .map(|ordinal| {
            let samples: Vec<(i64, f64)> = points
                .iter()
                .filter_map(|p| {
                    p.accumulating
                        .get(ordinal)
                        .copied()
                        .flatten()
                        .map(|value| (p.ts_ns, value))
                })
                .collect();
            // Segmentation is independent per ordinal: a reset only splits
            // ordinals it carries a sample for.
            let ordinal_resets: Vec<segment::ResetPoint> = resets
                .iter()
                .filter_map(|reset| {
                    let before = reset.before.get(ordinal).copied().flatten();
                    let after = reset.after.get(ordinal).copied().flatten();
                    if before.is_none() && after.is_none() {
                        None
                    } else {
                        Some(segment::ResetPoint {
                            ts_ns: reset.ts_ns,
                            before,
                            after,
                        })
                    }
                })
                .collect();
            segment::accumulate(&samples, &ordinal_resets)
        })
        .collect();

    let status = (0..schema.status.len())
        .map(|ordinal| {
            status_mode(
                points
                    .iter()
                    .filter_map(|p| p.status.get(ordinal).and_then(|s| s.as_deref())),
            )
        })
        .collect();

    let tags = merge_tags(points.iter().map(|p| p.tags.as_slice()));

    Some(ReducedParts {
        instantaneous,
        accumulating,
        status,
        tags,
    })
}

/// Merge already-computed finer records into one coarser record. Records must
/// be ascending by slot. `None` when `finer` is empty.
pub(crate) fn merge_aggregates(
    stream: StreamId,
    level: Level,
    slot: SlotKey,
    schema: &StreamSchema,
    finer: &[AggregateRecord],
) -> Option<AggregateRecord> {
    if finer.is_empty() {
        return None;
    }

    let instantaneous = (0..schema.instantaneous.len())
        .map(|ordinal| {
            let parts: Vec<InstantStats> = finer
                .iter()
                .filter_map(|r| r.instantaneous.get(ordinal).copied().flatten())
                .collect();
            let count: u64 = parts.iter().map(|s| s.count).sum();
            if count == 0 {
                return None;
            }
            let weighted: f64 = parts.iter().map(|s| s.mean * s.count as f64).sum();
            Some(InstantStats {
                count,
                min: parts.iter().map(|s| s.min).fold(f64::INFINITY, f64::min),
                max: parts
                    .iter()
                    .map(|s| s.max)
                    .fold(f64::NEG_INFINITY, f64::max),
                mean: weighted / count as f64,
            })
        })
        .collect();

    let accumulating = (0..schema.accumulating.len())
        .map(|ordinal| {
            let parts: Vec<AccumStats> = finer
                .iter()
                .filter_map(|r| r.accumulating.get(ordinal).copied().flatten())
                .collect();
            let last = parts.last()?;
            let total: f64 = parts.iter().map(|s| s.diff()).sum();
            Some(AccumStats {
                count: parts.iter().map(|s| s.count).sum(),
                start: last.end - total,
                end: last.end,
            })
        })
        .collect();

    let status = (0..schema.status.len())
        .map(|ordinal| {
            status_mode(
                finer
                    .iter()
                    .filter_map(|r| r.status.get(ordinal).and_then(|s| s.as_deref())),
            )
        })
        .collect();

    let tags = merge_tags(finer.iter().map(|r| r.tags.as_slice()));

    Some(AggregateRecord {
        stream,
        level,
        slot,
        instantaneous,
        accumulating,
        status,
        tags,
    })
}

fn fold_records(
    stream: StreamId,
    level: Level,
    schema: &StreamSchema,
    records: Vec<AggregateRecord>,
    fold: impl Fn(i64) -> u8,
) -> Vec<AggregateRecord> {
    let mut groups: BTreeMap<u8, Vec<AggregateRecord>> = BTreeMap::new();
    for record in records {
        if let Some(start) = record.slot_start_ns() {
            groups.entry(fold(start)).or_default().push(record);
        }
    }
    groups
        .into_iter()
        .filter_map(|(index, group)| {
            let slot = match level {
                Level::HourOfDay => SlotKey::HourOfDay(index),
                _ => SlotKey::DayOfWeek(index),
            };
            merge_aggregates(stream, level, slot, schema, &group)
        })
        .collect()
}

fn instant_stats(values: &[f64]) -> Option<InstantStats> {
    if values.is_empty() {
        return None;
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for &value in values {
        min = min.min(value);
        max = max.max(value);
        sum += value;
    }
    Some(InstantStats {
        count: values.len() as u64,
        min,
        max,
        mean: sum / values.len() as f64,
    })
}

/// Most frequent value; ties broken by earliest first occurrence.
pub fn status_mode<'a, I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(seen, _)| *seen == value) {
            Some(entry) => entry.1 += 1,
            None => counts.push((value, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for &(value, count) in &counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value.to_string())
}

/// First-seen-ordered union with duplicates removed.
pub fn merge_tags<'a, I>(groups: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a [String]>,
{
    let mut merged: Vec<String> = Vec::new();
    for group in groups {
        for tag in group {
            if !merged.iter().any(|seen| seen == tag) {
                merged.push(tag.clone());
            }
        }
    }
    merged
}
