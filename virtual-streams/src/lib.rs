// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Arithmetic combination of physical streams into virtual streams.
//!
//! Members' aggregate records are aligned by slot and their primary values
//! (instantaneous mean, accumulating diff) combined elementwise. A member
//! without data at a slot drops out of that slot only; a slot where no member
//! has data is omitted. Statistics are deliberately absent on combined
//! output.

use std::collections::BTreeMap;
use std::sync::Arc;

use core_types::level::{Level, SlotKey};
use core_types::types::{AggregateRecord, ObjectKind, StreamId};
use core_types::uid;
use rollup_engine::{merge_tags, status_mode};
use serde::{Deserialize, Serialize};
use store_api::{AggregateStore, StoreError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combinator {
    Sum,
    /// Members after the first are subtracted from it, in list order. Over a
    /// single member this returns the member unchanged.
    Difference,
    Average,
}

impl Combinator {
    fn tag(&self) -> u8 {
        match self {
            Combinator::Sum => 0,
            Combinator::Difference => 1,
            Combinator::Average => 2,
        }
    }

    fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            Combinator::Sum => values.iter().sum(),
            Combinator::Difference => {
                values[0] - values[1..].iter().sum::<f64>()
            }
            Combinator::Average => values.iter().sum::<f64>() / values.len() as f64,
        })
    }
}

#[derive(Debug, Error)]
pub enum CombineError {
    #[error("virtual stream has no members")]
    EmptyMembers,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// An ordered member list with a deterministic identity derived from the
/// caller's remapping object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualStream {
    pub id: StreamId,
    pub members: Vec<StreamId>,
    pub combinator: Combinator,
}

impl VirtualStream {
    pub fn derive(
        object: &ObjectKind,
        combinator: Combinator,
        members: Vec<StreamId>,
    ) -> Result<Self, CombineError> {
        if members.is_empty() {
            return Err(CombineError::EmptyMembers);
        }
        let id = StreamId::from_bytes(uid::virtual_stream_uid(
            object,
            combinator.tag(),
            &members,
        ));
        Ok(Self {
            id,
            members,
            combinator,
        })
    }
}

/// Synthetic slot produced by combining member aggregates. Carries primary
/// value arrays only; per-member statistics do not survive combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRecord {
    pub stream: StreamId,
    pub level: Level,
    pub slot: SlotKey,
    pub instantaneous: Vec<Option<f64>>,
    pub accumulating: Vec<Option<f64>>,
    pub status: Vec<Option<String>>,
    pub tags: Vec<String>,
}

pub struct StreamCombiner {
    aggregates: Arc<dyn AggregateStore>,
}

impl StreamCombiner {
    pub fn new(aggregates: Arc<dyn AggregateStore>) -> Self {
        Self { aggregates }
    }

    /// Combine member records of `level` whose slots start inside
    /// `[from_ns, to_ns)`, ascending by slot.
    pub fn combine_window(
        &self,
        virtual_stream: &VirtualStream,
        level: Level,
        from_ns: i64,
        to_ns: i64,
    ) -> Result<Vec<CombinedRecord>, CombineError> {
        if virtual_stream.members.is_empty() {
            return Err(CombineError::EmptyMembers);
        }
        let mut slots: BTreeMap<i64, Vec<AggregateRecord>> = BTreeMap::new();
        for member in &virtual_stream.members {
            let records = self
                .aggregates
                .aggregates_in_range(*member, level, from_ns, to_ns)?;
            for record in records {
                if let Some(start) = record.slot_start_ns() {
                    slots.entry(start).or_default().push(record);
                }
            }
        }
        Ok(slots
            .into_iter()
            .map(|(start, members)| {
                combine_slot(virtual_stream, level, SlotKey::At(start), &members)
            })
            .collect())
    }
}

fn combine_slot(
    virtual_stream: &VirtualStream,
    level: Level,
    slot: SlotKey,
    members: &[AggregateRecord],
) -> CombinedRecord {
    let combinator = virtual_stream.combinator;
    let inst_arity = members.iter().map(|r| r.instantaneous.len()).max().unwrap_or(0);
    let accum_arity = members.iter().map(|r| r.accumulating.len()).max().unwrap_or(0);
    let status_arity = members.iter().map(|r| r.status.len()).max().unwrap_or(0);

    let instantaneous = (0..inst_arity)
        .map(|ordinal| {
            let values: Vec<f64> = members
                .iter()
                .filter_map(|r| r.instantaneous.get(ordinal).copied().flatten())
                .map(|stats| stats.mean)
                .collect();
            combinator.apply(&values)
        })
        .collect();

    let accumulating = (0..accum_arity)
        .map(|ordinal| {
            let values: Vec<f64> = members
                .iter()
                .filter_map(|r| r.accumulating.get(ordinal).copied().flatten())
                .map(|stats| stats.diff())
                .collect();
            combinator.apply(&values)
        })
        .collect();

    let status = (0..status_arity)
        .map(|ordinal| {
            status_mode(
                members
                    .iter()
                    .filter_map(|r| r.status.get(ordinal).and_then(|s| s.as_deref())),
            )
        })
        .collect();

    CombinedRecord {
        stream: virtual_stream.id,
        level,
        slot,
        instantaneous,
        accumulating,
        status,
        tags: merge_tags(members.iter().map(|r| r.tags.as_slice())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::types::{AccumStats, InstantStats};
    use store_api::MemoryStore;

    const HOUR: i64 = 3_600_000_000_000;

    fn record(stream: StreamId, slot: i64, mean: f64, diff: f64) -> AggregateRecord {
        AggregateRecord {
            stream,
            level: Level::Hour,
            slot: SlotKey::At(slot),
            instantaneous: vec![Some(InstantStats {
                count: 4,
                min: mean - 1.0,
                max: mean + 1.0,
                mean,
            })],
            accumulating: vec![Some(AccumStats {
                count: 4,
                start: 0.0,
                end: diff,
            })],
            status: vec![Some("on".into())],
            tags: vec!["x".into()],
        }
    }

    fn setup(records: &[AggregateRecord]) -> (Arc<MemoryStore>, StreamCombiner) {
        let store = Arc::new(MemoryStore::new());
        for record in records {
            AggregateStore::write(store.as_ref(), record.clone()).unwrap();
        }
        let combiner = StreamCombiner::new(store.clone());
        (store, combiner)
    }

    fn members() -> (StreamId, StreamId) {
        (
            StreamId::from_bytes([1; 16]),
            StreamId::from_bytes([2; 16]),
        )
    }

    #[test]
    fn sum_combines_matching_slots() {
        let (a, b) = members();
        let (_store, combiner) = setup(&[record(a, 0, 1.0, 10.0), record(b, 0, 2.0, 20.0)]);
        let vs = VirtualStream::derive(&ObjectKind::Node(0), Combinator::Sum, vec![a, b]).unwrap();
        let combined = combiner.combine_window(&vs, Level::Hour, 0, HOUR).unwrap();
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].accumulating[0], Some(30.0));
        assert_eq!(combined[0].instantaneous[0], Some(3.0));
        assert_eq!(combined[0].stream, vs.id);
    }

    #[test]
    fn difference_subtracts_in_member_order() {
        let (a, b) = members();
        let (_store, combiner) = setup(&[record(a, 0, 5.0, 50.0), record(b, 0, 2.0, 20.0)]);
        let vs =
            VirtualStream::derive(&ObjectKind::Node(0), Combinator::Difference, vec![a, b]).unwrap();
        let combined = combiner.combine_window(&vs, Level::Hour, 0, HOUR).unwrap();
        assert_eq!(combined[0].accumulating[0], Some(30.0));
        assert_eq!(combined[0].instantaneous[0], Some(3.0));
    }

    #[test]
    fn average_divides_by_present_members() {
        let (a, b) = members();
        let (_store, combiner) = setup(&[record(a, 0, 1.0, 10.0), record(b, 0, 3.0, 30.0)]);
        let vs =
            VirtualStream::derive(&ObjectKind::Node(0), Combinator::Average, vec![a, b]).unwrap();
        let combined = combiner.combine_window(&vs, Level::Hour, 0, HOUR).unwrap();
        assert_eq!(combined[0].accumulating[0], Some(20.0));
    }

    #[test]
    fn single_member_identity() {
        let (a, _) = members();
        let (_store, sum_combiner) = setup(&[record(a, 0, 1.5, 12.0)]);
        for combinator in [Combinator::Sum, Combinator::Difference, Combinator::Average] {
            let vs = VirtualStream::derive(&ObjectKind::Node(0), combinator, vec![a]).unwrap();
            let combined = sum_combiner
                .combine_window(&vs, Level::Hour, 0, HOUR)
                .unwrap();
            assert_eq!(combined[0].accumulating[0], Some(12.0));
            assert_eq!(combined[0].instantaneous[0], Some(1.5));
        }
    }

    #[test]
    fn missing_member_drops_out_of_that_slot_only() {
        let (a, b) = members();
        let (_store, combiner) = setup(&[
            record(a, 0, 1.0, 10.0),
            record(b, 0, 2.0, 20.0),
            record(a, HOUR, 4.0, 40.0),
        ]);
        let vs = VirtualStream::derive(&ObjectKind::Node(0), Combinator::Sum, vec![a, b]).unwrap();
        let combined = combiner
            .combine_window(&vs, Level::Hour, 0, 3 * HOUR)
            .unwrap();
        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0].accumulating[0], Some(30.0));
        // Slot with only one member present combines that member alone.
        assert_eq!(combined[1].accumulating[0], Some(40.0));
        // Slots where no member has data are omitted entirely.
        assert_eq!(combined[1].slot, SlotKey::At(HOUR));
    }

    #[test]
    fn statistics_are_absent_on_combined_output() {
        let (a, _) = members();
        let (_store, combiner) = setup(&[record(a, 0, 1.0, 10.0)]);
        let vs = VirtualStream::derive(&ObjectKind::Node(0), Combinator::Sum, vec![a]).unwrap();
        let combined = combiner.combine_window(&vs, Level::Hour, 0, HOUR).unwrap();
        // CombinedRecord carries plain values; there is no count/min/max to
        // mis-read downstream.
        assert_eq!(combined[0].instantaneous, vec![Some(1.0)]);
        assert_eq!(combined[0].status[0].as_deref(), Some("on"));
        assert_eq!(combined[0].tags, vec!["x"]);
    }

    #[test]
    fn derived_ids_are_deterministic_and_member_sensitive() {
        let (a, b) = members();
        let one =
            VirtualStream::derive(&ObjectKind::Node(0), Combinator::Sum, vec![a, b]).unwrap();
        let two =
            VirtualStream::derive(&ObjectKind::Node(0), Combinator::Sum, vec![a, b]).unwrap();
        let flipped =
            VirtualStream::derive(&ObjectKind::Node(0), Combinator::Sum, vec![b, a]).unwrap();
        assert_eq!(one.id, two.id);
        assert_ne!(one.id, flipped.id);
        assert!(matches!(
            VirtualStream::derive(&ObjectKind::Node(0), Combinator::Sum, vec![]),
            Err(CombineError::EmptyMembers)
        ));
    }
}
