// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Count rollups mirroring the aggregation hierarchy.
//!
//! Audits count events instead of aggregating values: datums and present
//! property samples at Hour level, summed upward with presence counts at Day
//! and Month. Query counts are owned by [`AuditEngine::record_query`] and are
//! preserved through hourly recomputation, then rolled up like the rest.

use std::sync::Arc;

use core_types::level::{Level, SlotKey};
use core_types::types::{AuditRecord, Point, StreamId, UtcOffset};
use store_api::{AuditStore, PointStore, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("level {level:?} has no audit window at {slot_start_ns}")]
    UnsupportedLevel { level: Level, slot_start_ns: i64 },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct AuditEngine {
    points: Arc<dyn PointStore>,
    audits: Arc<dyn AuditStore>,
}

impl AuditEngine {
    pub fn new(points: Arc<dyn PointStore>, audits: Arc<dyn AuditStore>) -> Self {
        Self { points, audits }
    }

    /// Recompute the audit record of one cascaded slot and persist it.
    /// Returns whether the stored record changed.
    pub fn recompute(
        &self,
        stream: StreamId,
        level: Level,
        slot_start_ns: i64,
        offset: UtcOffset,
    ) -> Result<bool, AuditError> {
        let end_ns = level
            .slot_end(slot_start_ns, offset)
            .ok_or(AuditError::UnsupportedLevel {
                level,
                slot_start_ns,
            })?;
        let slot = SlotKey::At(slot_start_ns);
        let previous = self.audits.get(stream, level, slot)?;
        let next = match level {
            Level::Hour => self.count_hour(stream, slot_start_ns, end_ns, previous.as_ref())?,
            Level::Day => self.sum_finer(stream, level, Level::Hour, slot_start_ns, end_ns)?,
            Level::Month => self.sum_finer(stream, level, Level::Day, slot_start_ns, end_ns)?,
            _ => {
                return Err(AuditError::UnsupportedLevel {
                    level,
                    slot_start_ns,
                })
            }
        };
        let changed = previous != next;
        match next {
            Some(record) => self.audits.write(record)?,
            None => self.audits.delete(stream, level, slot)?,
        }
        Ok(changed)
    }

    /// Re-sum the all-time audit from Month records. Returns whether the
    /// stored record changed.
    pub fn recompute_running_total(&self, stream: StreamId) -> Result<bool, AuditError> {
        let months = self
            .audits
            .audits_in_range(stream, Level::Month, i64::MIN, i64::MAX)?;
        let previous = self
            .audits
            .get(stream, Level::RunningTotal, SlotKey::All)?;
        let next = if months.is_empty() {
            None
        } else {
            Some(AuditRecord {
                stream,
                level: Level::RunningTotal,
                slot: SlotKey::All,
                datum_count: months.iter().map(|m| m.datum_count).sum(),
                property_count: months.iter().map(|m| m.property_count).sum(),
                query_count: months.iter().map(|m| m.query_count).sum(),
                finer_presence: None,
            })
        };
        let changed = previous != next;
        match next {
            Some(record) => self.audits.write(record)?,
            None => self
                .audits
                .delete(stream, Level::RunningTotal, SlotKey::All)?,
        }
        Ok(changed)
    }

    /// Count one query against a slot, creating a zero-count record if none
    /// exists yet.
    pub fn record_query(
        &self,
        stream: StreamId,
        level: Level,
        slot: SlotKey,
    ) -> Result<(), AuditError> {
        let mut record = self.audits.get(stream, level, slot)?.unwrap_or(AuditRecord {
            stream,
            level,
            slot,
            datum_count: 0,
            property_count: 0,
            query_count: 0,
            finer_presence: None,
        });
        record.query_count += 1;
        self.audits.write(record)?;
        Ok(())
    }

    fn count_hour(
        &self,
        stream: StreamId,
        start_ns: i64,
        end_ns: i64,
        previous: Option<&AuditRecord>,
    ) -> Result<Option<AuditRecord>, AuditError> {
        let points = self.points.points_in_range(stream, start_ns, end_ns)?;
        let query_count = previous.map_or(0, |r| r.query_count);
        if points.is_empty() && query_count == 0 {
            return Ok(None);
        }
        Ok(Some(AuditRecord {
            stream,
            level: Level::Hour,
            slot: SlotKey::At(start_ns),
            datum_count: points.len() as u64,
            property_count: points.iter().map(point_property_count).sum(),
            query_count,
            finer_presence: None,
        }))
    }

    fn sum_finer(
        &self,
        stream: StreamId,
        level: Level,
        finer: Level,
        start_ns: i64,
        end_ns: i64,
    ) -> Result<Option<AuditRecord>, AuditError> {
        let records = self.audits.audits_in_range(stream, finer, start_ns, end_ns)?;
        if records.is_empty() {
            return Ok(None);
        }
        let presence = records.iter().filter(|r| r.datum_count > 0).count() as u32;
        Ok(Some(AuditRecord {
            stream,
            level,
            slot: SlotKey::At(start_ns),
            datum_count: records.iter().map(|r| r.datum_count).sum(),
            property_count: records.iter().map(|r| r.property_count).sum(),
            query_count: records.iter().map(|r| r.query_count).sum(),
            finer_presence: Some(presence),
        }))
    }
}

/// Present samples across all property kinds, with tags weighted double.
pub fn point_property_count(point: &Point) -> u64 {
    let present = |values: &[Option<f64>]| values.iter().flatten().count() as u64;
    present(&point.instantaneous)
        + present(&point.accumulating)
        + point.status.iter().flatten().count() as u64
        + 2 * point.tags.len() as u64
}
