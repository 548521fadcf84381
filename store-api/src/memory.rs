//! In-memory reference store.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use core_types::level::{Level, SlotKey};
use core_types::types::{
    AggregateRecord, AuditRecord, Point, ResetRecord, StreamId, StreamSchema,
};

use crate::{
    AggregateStore, AuditStore, Catalog, PointStore, StoreError, StoreResult,
};

/// Lock-guarded maps backing every collaborator trait. Points and resets are
/// only mutated through the explicit maintenance operations below.
#[derive(Default)]
pub struct MemoryStore {
    schemas: RwLock<HashMap<StreamId, StreamSchema>>,
    points: RwLock<HashMap<StreamId, BTreeMap<i64, Point>>>,
    resets: RwLock<HashMap<StreamId, BTreeMap<i64, ResetRecord>>>,
    aggregates: RwLock<HashMap<(StreamId, Level), BTreeMap<i64, AggregateRecord>>>,
    audits: RwLock<HashMap<(StreamId, Level), BTreeMap<SlotKey, AuditRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream under the id derived from its object.
    pub fn register(&self, schema: StreamSchema) -> StreamId {
        let stream = StreamId::for_object(&schema.object);
        self.schemas.write().insert(stream, schema);
        stream
    }

    pub fn insert_point(&self, point: Point) {
        self.points
            .write()
            .entry(point.stream)
            .or_default()
            .insert(point.ts_ns, point);
    }

    pub fn insert_reset(&self, reset: ResetRecord) {
        self.resets
            .write()
            .entry(reset.stream)
            .or_default()
            .insert(reset.ts_ns, reset);
    }

    /// Remove one point. Returns whether it existed.
    pub fn delete_point(&self, stream: StreamId, ts_ns: i64) -> bool {
        self.points
            .write()
            .get_mut(&stream)
            .map_or(false, |map| map.remove(&ts_ns).is_some())
    }

    /// Re-key one point to a new timestamp. Returns whether it existed.
    pub fn move_point(&self, stream: StreamId, from_ns: i64, to_ns: i64) -> bool {
        let mut guard = self.points.write();
        let Some(map) = guard.get_mut(&stream) else {
            return false;
        };
        match map.remove(&from_ns) {
            Some(mut point) => {
                point.ts_ns = to_ns;
                map.insert(to_ns, point);
                true
            }
            None => false,
        }
    }
}

impl Catalog for MemoryStore {
    fn schema_for(&self, stream: StreamId) -> StoreResult<StreamSchema> {
        self.schemas
            .read()
            .get(&stream)
            .cloned()
            .ok_or(StoreError::UnknownStream { stream })
    }
}

impl PointStore for MemoryStore {
    fn points_in_range(
        &self,
        stream: StreamId,
        from_ns: i64,
        to_ns: i64,
    ) -> StoreResult<Vec<Point>> {
        Ok(self
            .points
            .read()
            .get(&stream)
            .map(|map| map.range(from_ns..to_ns).map(|(_, p)| p.clone()).collect())
            .unwrap_or_default())
    }

    fn points_through(
        &self,
        stream: StreamId,
        from_ns: i64,
        to_ns: i64,
    ) -> StoreResult<Vec<Point>> {
        Ok(self
            .points
            .read()
            .get(&stream)
            .map(|map| map.range(from_ns..=to_ns).map(|(_, p)| p.clone()).collect())
            .unwrap_or_default())
    }

    fn resets_through(
        &self,
        stream: StreamId,
        from_ns: i64,
        to_ns: i64,
    ) -> StoreResult<Vec<ResetRecord>> {
        Ok(self
            .resets
            .read()
            .get(&stream)
            .map(|map| map.range(from_ns..=to_ns).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }
}

impl AggregateStore for MemoryStore {
    fn aggregates_in_range(
        &self,
        stream: StreamId,
        level: Level,
        from_ns: i64,
        to_ns: i64,
    ) -> StoreResult<Vec<AggregateRecord>> {
        Ok(self
            .aggregates
            .read()
            .get(&(stream, level))
            .map(|map| map.range(from_ns..to_ns).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }

    fn get(
        &self,
        stream: StreamId,
        level: Level,
        slot_start_ns: i64,
    ) -> StoreResult<Option<AggregateRecord>> {
        Ok(self
            .aggregates
            .read()
            .get(&(stream, level))
            .and_then(|map| map.get(&slot_start_ns).cloned()))
    }

    fn write(&self, record: AggregateRecord) -> StoreResult<()> {
        let slot_start = match record.slot {
            SlotKey::At(ts_ns) => ts_ns,
            slot => return Err(StoreError::UnsupportedSlot { slot }),
        };
        self.aggregates
            .write()
            .entry((record.stream, record.level))
            .or_default()
            .insert(slot_start, record);
        Ok(())
    }

    fn delete(&self, stream: StreamId, level: Level, slot_start_ns: i64) -> StoreResult<()> {
        if let Some(map) = self.aggregates.write().get_mut(&(stream, level)) {
            map.remove(&slot_start_ns);
        }
        Ok(())
    }
}

impl AuditStore for MemoryStore {
    fn audits_in_range(
        &self,
        stream: StreamId,
        level: Level,
        from_ns: i64,
        to_ns: i64,
    ) -> StoreResult<Vec<AuditRecord>> {
        Ok(self
            .audits
            .read()
            .get(&(stream, level))
            .map(|map| {
                map.range(SlotKey::At(from_ns)..SlotKey::At(to_ns))
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get(
        &self,
        stream: StreamId,
        level: Level,
        slot: SlotKey,
    ) -> StoreResult<Option<AuditRecord>> {
        Ok(self
            .audits
            .read()
            .get(&(stream, level))
            .and_then(|map| map.get(&slot).cloned()))
    }

    fn write(&self, record: AuditRecord) -> StoreResult<()> {
        self.audits
            .write()
            .entry((record.stream, record.level))
            .or_default()
            .insert(record.slot, record);
        Ok(())
    }

    fn delete(&self, stream: StreamId, level: Level, slot: SlotKey) -> StoreResult<()> {
        if let Some(map) = self.audits.write().get_mut(&(stream, level)) {
            map.remove(&slot);
        }
        Ok(())
    }
}
