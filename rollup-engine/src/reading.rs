//! Point-to-point readings between two arbitrary instants.

use core_types::types::{ReadingRecord, StreamId};

use crate::{reduce_parts, RollupEngine, RollupError};

impl RollupEngine {
    /// Accumulating difference between the earliest and latest data at or
    /// inside `[from_ns, to_ns]`, reset-aware. The reported boundary
    /// timestamps are the ones actually used, which may differ from the
    /// requested range. `Ok(None)` when no point exists in range.
    pub fn diff_reading(
        &self,
        stream: StreamId,
        from_ns: i64,
        to_ns: i64,
    ) -> Result<Option<ReadingRecord>, RollupError> {
        if to_ns < from_ns {
            return Err(RollupError::InvalidRange { from_ns, to_ns });
        }
        let schema = self.catalog.schema_for(stream)?;
        let points = self.points.points_through(stream, from_ns, to_ns)?;
        let resets = self.points.resets_through(stream, from_ns, to_ns)?;
        let Some(parts) = reduce_parts(stream, &schema, &points, &resets) else {
            return Ok(None);
        };

        let mut ts_ns = points[0].ts_ns;
        let mut end_ts_ns = points[points.len() - 1].ts_ns;
        if let Some(first) = resets.first() {
            ts_ns = ts_ns.min(first.ts_ns);
        }
        if let Some(last) = resets.last() {
            end_ts_ns = end_ts_ns.max(last.ts_ns);
        }

        Ok(Some(ReadingRecord {
            stream,
            ts_ns,
            end_ts_ns,
            instantaneous: parts.instantaneous,
            accumulating: parts.accumulating,
            status: parts.status,
            tags: parts.tags,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use core_types::types::{ObjectKind, Point, ResetRecord, StreamSchema, UtcOffset};
    use store_api::MemoryStore;

    use super::*;

    const SECOND: i64 = core_types::level::NANOS_PER_SECOND;

    fn schema() -> StreamSchema {
        StreamSchema {
            object: ObjectKind::Location(4),
            instantaneous: vec!["power".into()],
            accumulating: vec!["energy".into()],
            status: vec![],
            offset: UtcOffset::UTC,
        }
    }

    fn engine(store: &Arc<MemoryStore>) -> RollupEngine {
        RollupEngine::new(store.clone(), store.clone(), store.clone())
    }

    fn point(stream: StreamId, ts_ns: i64, energy: f64) -> Point {
        Point {
            stream,
            ts_ns,
            instantaneous: vec![Some(1.0)],
            accumulating: vec![Some(energy)],
            status: vec![],
            tags: vec![],
        }
    }

    #[test]
    fn reading_reports_actual_point_boundaries() {
        let store = Arc::new(MemoryStore::new());
        let stream = store.register(schema());
        store.insert_point(point(stream, 100 * SECOND, 10.0));
        store.insert_point(point(stream, 900 * SECOND, 45.0));

        let reading = engine(&store)
            .diff_reading(stream, 0, 1_000 * SECOND)
            .unwrap()
            .unwrap();
        assert_eq!(reading.ts_ns, 100 * SECOND);
        assert_eq!(reading.end_ts_ns, 900 * SECOND);
        assert_eq!(reading.accumulating[0].unwrap().diff(), 35.0);
    }

    #[test]
    fn reading_range_is_inclusive() {
        let store = Arc::new(MemoryStore::new());
        let stream = store.register(schema());
        store.insert_point(point(stream, 100 * SECOND, 10.0));
        store.insert_point(point(stream, 900 * SECOND, 45.0));

        let reading = engine(&store)
            .diff_reading(stream, 100 * SECOND, 900 * SECOND)
            .unwrap()
            .unwrap();
        assert_eq!(reading.accumulating[0].unwrap().diff(), 35.0);
        assert_eq!(reading.accumulating[0].unwrap().count, 2);
    }

    #[test]
    fn reset_on_boundary_shifts_reported_timestamp() {
        let store = Arc::new(MemoryStore::new());
        let stream = store.register(schema());
        store.insert_reset(ResetRecord {
            stream,
            ts_ns: 50 * SECOND,
            before: vec![Some(100.0)],
            after: vec![Some(0.0)],
        });
        store.insert_point(point(stream, 200 * SECOND, 25.0));

        let reading = engine(&store)
            .diff_reading(stream, 50 * SECOND, 400 * SECOND)
            .unwrap()
            .unwrap();
        assert_eq!(reading.ts_ns, 50 * SECOND);
        assert_eq!(reading.end_ts_ns, 200 * SECOND);
        assert_eq!(reading.accumulating[0].unwrap().diff(), 25.0);
    }

    #[test]
    fn reading_applies_segmentation() {
        let store = Arc::new(MemoryStore::new());
        let stream = store.register(schema());
        store.insert_point(point(stream, 100 * SECOND, 10.0));
        store.insert_point(point(stream, 300 * SECOND, 22.0));
        store.insert_reset(ResetRecord {
            stream,
            ts_ns: 400 * SECOND,
            before: vec![Some(23.0)],
            after: vec![Some(2.0)],
        });
        store.insert_point(point(stream, 500 * SECOND, 8.0));

        let reading = engine(&store)
            .diff_reading(stream, 0, 600 * SECOND)
            .unwrap()
            .unwrap();
        // 10 -> 23 across the old meter, 2 -> 8 on the new one.
        assert_eq!(reading.accumulating[0].unwrap().diff(), 13.0 + 6.0);
        assert_eq!(reading.end_ts_ns, 500 * SECOND);
    }

    #[test]
    fn empty_range_is_none_and_backwards_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let stream = store.register(schema());
        assert!(engine(&store)
            .diff_reading(stream, 0, 1_000 * SECOND)
            .unwrap()
            .is_none());
        assert!(matches!(
            engine(&store).diff_reading(stream, 10, 5),
            Err(RollupError::InvalidRange { .. })
        ));
    }
}
