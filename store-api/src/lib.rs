// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Storage seams between the rollup engines and their collaborators.
//!
//! The engines never touch a concrete store; they read points and finer
//! aggregates and write derived records through these traits. Any persistence
//! technology can sit behind them. [`MemoryStore`] is the in-process
//! reference implementation used throughout the test suites.

pub mod memory;

pub use memory::MemoryStore;

use core_types::level::{Level, SlotKey};
use core_types::types::{
    AggregateRecord, AuditRecord, Point, ResetRecord, StreamId, StreamSchema,
};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown stream {stream}")]
    UnknownStream { stream: StreamId },
    #[error("slot {slot:?} is not persistable")]
    UnsupportedSlot { slot: SlotKey },
    #[error("transient store failure: {detail}")]
    Transient { detail: String },
}

/// Stream metadata resolution.
pub trait Catalog: Send + Sync {
    fn schema_for(&self, stream: StreamId) -> StoreResult<StreamSchema>;
}

/// Ordered access to raw points and reset records.
pub trait PointStore: Send + Sync {
    /// Points with `from_ns <= ts < to_ns`, ascending by timestamp.
    fn points_in_range(&self, stream: StreamId, from_ns: i64, to_ns: i64)
        -> StoreResult<Vec<Point>>;

    /// Points with `from_ns <= ts <= to_ns`, ascending by timestamp.
    fn points_through(&self, stream: StreamId, from_ns: i64, to_ns: i64)
        -> StoreResult<Vec<Point>>;

    /// Reset records with `from_ns <= ts <= to_ns`, ascending by timestamp.
    fn resets_through(
        &self,
        stream: StreamId,
        from_ns: i64,
        to_ns: i64,
    ) -> StoreResult<Vec<ResetRecord>>;
}

/// Derived aggregate records, owned by the cascade.
pub trait AggregateStore: Send + Sync {
    /// Records of `level` with `from_ns <= slot start < to_ns`, ascending.
    fn aggregates_in_range(
        &self,
        stream: StreamId,
        level: Level,
        from_ns: i64,
        to_ns: i64,
    ) -> StoreResult<Vec<AggregateRecord>>;

    fn get(
        &self,
        stream: StreamId,
        level: Level,
        slot_start_ns: i64,
    ) -> StoreResult<Option<AggregateRecord>>;

    fn write(&self, record: AggregateRecord) -> StoreResult<()>;

    fn delete(&self, stream: StreamId, level: Level, slot_start_ns: i64) -> StoreResult<()>;
}

/// Derived audit records, owned by the cascade.
pub trait AuditStore: Send + Sync {
    /// `SlotKey::At` records of `level` with `from_ns <= slot start < to_ns`.
    fn audits_in_range(
        &self,
        stream: StreamId,
        level: Level,
        from_ns: i64,
        to_ns: i64,
    ) -> StoreResult<Vec<AuditRecord>>;

    fn get(&self, stream: StreamId, level: Level, slot: SlotKey)
        -> StoreResult<Option<AuditRecord>>;

    fn write(&self, record: AuditRecord) -> StoreResult<()>;

    fn delete(&self, stream: StreamId, level: Level, slot: SlotKey) -> StoreResult<()>;
}

/// Best-effort sink for live-slot update notifications.
pub trait LiveSink: Send + Sync {
    fn notify_live(&self, stream: StreamId, level: Level, slot_start_ns: i64, record: &AggregateRecord);
}

/// Sink that drops every notification.
pub struct NullSink;

impl LiveSink for NullSink {
    fn notify_live(&self, _: StreamId, _: Level, _: i64, _: &AggregateRecord) {}
}
