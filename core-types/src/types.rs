// Copyright (c) James Kassemi, SC, US. All rights reserved.

use serde::{Deserialize, Serialize};

use crate::level::{Level, SlotKey};
use crate::uid;

/// Opaque 128-bit stream identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(pub [u8; 16]);

impl StreamId {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Deterministic id for the stream owned by `object`.
    pub fn for_object(object: &ObjectKind) -> Self {
        Self(uid::stream_uid(object))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamId({self})")
    }
}

/// Object a stream is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Node(u64),
    Location(u64),
}

/// Fixed UTC offset of a stream's local clock, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UtcOffset {
    secs: i32,
}

impl UtcOffset {
    pub const UTC: Self = Self { secs: 0 };

    pub fn from_secs(secs: i32) -> Self {
        Self { secs }
    }

    pub fn secs(&self) -> i32 {
        self.secs
    }

    pub fn nanos(&self) -> i64 {
        self.secs as i64 * crate::level::NANOS_PER_SECOND
    }
}

/// Property-name schema and time zone of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSchema {
    pub object: ObjectKind,
    pub instantaneous: Vec<String>,
    pub accumulating: Vec<String>,
    pub status: Vec<String>,
    pub offset: UtcOffset,
}

/// One timestamped reading. Value arrays are positionally aligned to the
/// stream schema; `None` marks a gap at that ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub stream: StreamId,
    pub ts_ns: i64,
    pub instantaneous: Vec<Option<f64>>,
    pub accumulating: Vec<Option<f64>>,
    pub status: Vec<Option<String>>,
    pub tags: Vec<String>,
}

/// Out-of-band counter discontinuity. Splits accumulation into the segment
/// ending at `before` and the segment starting at `after`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetRecord {
    pub stream: StreamId,
    pub ts_ns: i64,
    pub before: Vec<Option<f64>>,
    pub after: Vec<Option<f64>>,
}

/// Statistics of one instantaneous property over a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstantStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Statistics of one accumulating property over a window. `count` counts raw
/// contributing points, never segments, and `diff() == end - start` holds
/// regardless of resets inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccumStats {
    pub count: u64,
    pub start: f64,
    pub end: f64,
}

impl AccumStats {
    pub fn diff(&self) -> f64 {
        self.end - self.start
    }
}

/// One rollup over one slot of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub stream: StreamId,
    pub level: Level,
    pub slot: SlotKey,
    pub instantaneous: Vec<Option<InstantStats>>,
    pub accumulating: Vec<Option<AccumStats>>,
    pub status: Vec<Option<String>>,
    pub tags: Vec<String>,
}

impl AggregateRecord {
    pub fn slot_start_ns(&self) -> Option<i64> {
        match self.slot {
            SlotKey::At(ts_ns) => Some(ts_ns),
            _ => None,
        }
    }
}

/// Point-to-point reading between two instants, reporting the actual boundary
/// timestamps used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingRecord {
    pub stream: StreamId,
    pub ts_ns: i64,
    pub end_ts_ns: i64,
    pub instantaneous: Vec<Option<InstantStats>>,
    pub accumulating: Vec<Option<AccumStats>>,
    pub status: Vec<Option<String>>,
    pub tags: Vec<String>,
}

/// Count rollup mirroring the aggregate hierarchy. `finer_presence` counts
/// populated finer slots (hours with data at Day level, days at Month level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub stream: StreamId,
    pub level: Level,
    pub slot: SlotKey,
    pub datum_count: u64,
    pub property_count: u64,
    pub query_count: u64,
    pub finer_presence: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_display_is_hex() {
        let id = StreamId::from_bytes([0xab; 16]);
        assert_eq!(id.to_string(), "ab".repeat(16));
    }

    #[test]
    fn object_derived_ids_are_stable_and_distinct() {
        let node = StreamId::for_object(&ObjectKind::Node(7));
        let node_again = StreamId::for_object(&ObjectKind::Node(7));
        let location = StreamId::for_object(&ObjectKind::Location(7));
        assert_eq!(node, node_again);
        assert_ne!(node, location);
    }

    #[test]
    fn accum_diff_is_end_minus_start() {
        let stats = AccumStats {
            count: 3,
            start: 10.0,
            end: 45.5,
        };
        assert_eq!(stats.diff(), 35.5);
    }
}
