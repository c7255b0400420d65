//! Trailing rollup window and child-series summation

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

pub const HOUR_SECS: i64 = 3600;

/// A trailing window of hourly bucket-end timestamps
///
/// The window always ends on a whole hour; partial trailing hours are cut off
/// so re-running a pass over the same hour is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupWindow {
    stamps: Vec<i64>,
}

impl RollupWindow {
    /// Build a window of `hours` hourly stamps ending at `end` floored to the
    /// hour
    pub fn trailing(end: DateTime<Utc>, hours: usize) -> Self {
        let floored = end
            .duration_trunc(TimeDelta::hours(1))
            .unwrap_or(end)
            .timestamp();
        let stamps = (0..hours as i64)
            .map(|i| floored - (hours as i64 - 1 - i) * HOUR_SECS)
            .collect();
        Self { stamps }
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Bucket-end timestamps, ascending
    pub fn stamps(&self) -> &[i64] {
        &self.stamps
    }

    /// Query range covering every bucket: each stamp's bucket spans the hour
    /// `(stamp - 3600, stamp]`
    pub fn range(&self) -> (i64, i64) {
        match (self.stamps.first(), self.stamps.last()) {
            (Some(first), Some(last)) => (first - HOUR_SECS, *last),
            _ => (0, 0),
        }
    }

    /// Sum child series index-by-index into one rollup series
    ///
    /// A child series whose length differs from the window is skipped with a
    /// warning; its buckets are unknown, not zero. A bucket where no child
    /// has a value stays `None`.
    pub fn sum_child_series(
        &self,
        children: &[(String, Vec<(i64, Option<f64>)>)],
    ) -> Vec<(i64, Option<f64>)> {
        let mut totals: Vec<Option<f64>> = vec![None; self.stamps.len()];

        for (name, series) in children {
            if series.len() != self.stamps.len() {
                log::warn!(
                    "child {} returned {} summary buckets, expected {}; excluding it from the rollup",
                    name,
                    series.len(),
                    self.stamps.len()
                );
                continue;
            }
            for (i, (_, value)) in series.iter().enumerate() {
                if let Some(v) = value {
                    totals[i] = Some(totals[i].unwrap_or(0.0) + v);
                }
            }
        }

        self.stamps
            .iter()
            .zip(totals)
            .map(|(stamp, total)| (*stamp, total))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window_of(hours: usize) -> RollupWindow {
        let end = Utc.with_ymd_and_hms(2024, 3, 5, 14, 37, 12).unwrap();
        RollupWindow::trailing(end, hours)
    }

    #[test]
    fn test_trailing_window_floors_to_the_hour() {
        let window = window_of(3);
        let expected_end = Utc
            .with_ymd_and_hms(2024, 3, 5, 14, 0, 0)
            .unwrap()
            .timestamp();
        assert_eq!(window.len(), 3);
        assert_eq!(
            window.stamps(),
            &[
                expected_end - 2 * HOUR_SECS,
                expected_end - HOUR_SECS,
                expected_end
            ]
        );
        assert_eq!(
            window.range(),
            (expected_end - 3 * HOUR_SECS, expected_end)
        );
    }

    #[test]
    fn test_sum_skips_mismatched_series_and_keeps_gaps() {
        let window = window_of(3);
        let stamps = window.stamps().to_vec();

        let children = vec![
            (
                "Leaf0001".to_string(),
                vec![
                    (stamps[0], Some(1.0)),
                    (stamps[1], None),
                    (stamps[2], Some(2.0)),
                ],
            ),
            (
                "Leaf0002".to_string(),
                vec![
                    (stamps[0], Some(3.0)),
                    (stamps[1], None),
                    (stamps[2], None),
                ],
            ),
            // Wrong length: must not contribute anywhere
            ("Leaf0003".to_string(), vec![(stamps[0], Some(100.0))]),
        ];

        let rollup = window.sum_child_series(&children);
        assert_eq!(
            rollup,
            vec![
                (stamps[0], Some(4.0)),
                (stamps[1], None),
                (stamps[2], Some(2.0)),
            ]
        );
    }

    #[test]
    fn test_sum_of_no_children_is_all_absent() {
        let window = window_of(2);
        let rollup = window.sum_child_series(&[]);
        assert!(rollup.iter().all(|(_, v)| v.is_none()));
        assert_eq!(rollup.len(), 2);
    }
}
