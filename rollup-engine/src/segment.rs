//! Reset-aware accumulating diffs.
//!
//! A reset splits the window into segments at its timestamp. Points with
//! `ts < reset.ts` belong to the segment before the reset. A segment opened
//! by a reset starts at the reset's `after` value; a segment closed by a
//! reset ends at its `before` value; otherwise the first/last point sample
//! inside the segment is used. A segment missing either side contributes 0.

use core_types::types::AccumStats;

/// One reset projected onto a single accumulating ordinal.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResetPoint {
    pub ts_ns: i64,
    pub before: Option<f64>,
    pub after: Option<f64>,
}

/// Segmented diff over ascending `samples`, split at ascending `resets`.
///
/// `end` is the last observed boundary value and `start` is derived so that
/// `diff() == end - start` holds regardless of resets. Returns `None` when no
/// point carries a sample for this ordinal.
pub(crate) fn accumulate(samples: &[(i64, f64)], resets: &[ResetPoint]) -> Option<AccumStats> {
    if samples.is_empty() {
        return None;
    }
    let count = samples.len() as u64;

    let mut total = 0.0;
    let mut last_boundary = None;
    let mut lo = 0usize;
    for index in 0..=resets.len() {
        let open_reset = index.checked_sub(1).map(|i| &resets[i]);
        let close_reset = resets.get(index);
        let hi = match close_reset {
            Some(reset) => lo + samples[lo..].partition_point(|(ts_ns, _)| *ts_ns < reset.ts_ns),
            None => samples.len(),
        };
        let segment = &samples[lo..hi];
        lo = hi;

        let start = open_reset
            .and_then(|reset| reset.after)
            .or_else(|| segment.first().map(|(_, value)| *value));
        let end = close_reset
            .and_then(|reset| reset.before)
            .or_else(|| segment.last().map(|(_, value)| *value));

        if let (Some(start), Some(end)) = (start, end) {
            total += end - start;
        }
        if end.is_some() {
            last_boundary = end;
        } else if start.is_some() {
            last_boundary = start;
        }
    }

    let end = last_boundary.unwrap_or(samples[samples.len() - 1].1);
    Some(AccumStats {
        count,
        start: end - total,
        end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset(ts_ns: i64, before: Option<f64>, after: Option<f64>) -> ResetPoint {
        ResetPoint {
            ts_ns,
            before,
            after,
        }
    }

    #[test]
    fn no_resets_diffs_last_minus_first() {
        let stats = accumulate(&[(1, 100.0), (2, 110.0), (3, 125.0)], &[]).unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.start, 100.0);
        assert_eq!(stats.end, 125.0);
        assert_eq!(stats.diff(), 25.0);
    }

    #[test]
    fn single_sample_diffs_zero() {
        let stats = accumulate(&[(1, 42.0)], &[]).unwrap();
        assert_eq!(stats.diff(), 0.0);
        assert_eq!(stats.count, 1);
    }

    #[test]
    fn no_samples_is_none() {
        assert!(accumulate(&[], &[reset(1, Some(5.0), Some(0.0))]).is_none());
    }

    #[test]
    fn reset_splits_into_two_segments() {
        // 100 -> 112 before the swap, then the new meter runs 3 -> 9.
        let samples = [(1, 100.0), (2, 112.0), (5, 3.0), (6, 9.0)];
        let stats = accumulate(&samples, &[reset(4, Some(112.0), Some(1.0))]).unwrap();
        assert_eq!(stats.diff(), 12.0 + 8.0);
        assert_eq!(stats.end, 9.0);
        assert_eq!(stats.count, 4);
    }

    #[test]
    fn reset_boundary_values_override_points() {
        // Consumption recorded by the meter between the last sample and the
        // swap is captured by the reset's own before value.
        let samples = [(1, 10.0), (5, 2.0)];
        let stats = accumulate(&samples, &[reset(3, Some(14.0), Some(0.0))]).unwrap();
        assert_eq!(stats.diff(), 4.0 + 2.0);
    }

    #[test]
    fn adjacent_resets_each_contribute() {
        let samples = [(1, 5.0), (9, 4.0)];
        let resets = [reset(3, Some(7.0), Some(0.0)), reset(3 + 1, Some(2.0), Some(1.0))];
        // Segments: 5 -> 7, 0 -> 2, 1 -> 4.
        let stats = accumulate(&samples, &resets).unwrap();
        assert_eq!(stats.diff(), 2.0 + 2.0 + 3.0);
    }

    #[test]
    fn one_sided_reset_contributes_zero_for_missing_side() {
        // No samples before the reset; the before value alone contributes 0.
        let stats = accumulate(&[(5, 40.0)], &[reset(2, Some(100.0), Some(10.0))]).unwrap();
        assert_eq!(stats.diff(), 30.0);
        assert_eq!(stats.start, 10.0);
        assert_eq!(stats.end, 40.0);

        // Reset with a gap on the after side: post-reset segment has a point
        // but no start value, so it contributes 0.
        let stats = accumulate(&[(1, 8.0), (5, 40.0)], &[reset(2, Some(9.0), None)]).unwrap();
        assert_eq!(stats.diff(), 1.0);
    }

    #[test]
    fn trailing_reset_closes_the_final_segment() {
        let stats = accumulate(&[(1, 10.0)], &[reset(9, Some(16.0), None)]).unwrap();
        assert_eq!(stats.diff(), 6.0);
        assert_eq!(stats.end, 16.0);
    }
}
