//! Bounded Two-Tier History Buffer for Metric Time Series
//!
//! ## Overview
//!
//! Each metric of each sensor instance keeps a bounded rolling history used
//! for latest-value queries, session statistics (min/max/avg) and short-term
//! derivative calculations such as rate of turn. Total storage is capped at
//! a fixed capacity chosen at construction, so ingestion bursts (observed up
//! to ~100 messages/sec from a busy NMEA bus) can never grow memory.
//!
//! ## Design Rationale
//!
//! ### Why Two Tiers?
//!
//! A plain ring buffer that overwrites the oldest entry would satisfy the
//! memory bound but destroy session statistics: after a few minutes the
//! session minimum depth from the morning would be gone. Instead the buffer
//! keeps:
//!
//! - a **recent window** (default 60s) at full resolution, for derivatives
//!   and short-term charts, and
//! - a **downsampled tail** holding representative points of everything
//!   older, for session-scale statistics.
//!
//! ```text
//! oldest ──────────────────────────────────────────▶ newest
//! ┌───────────── tail ─────────────┬──── recent window ───┐
//! │ representative points (merged) │ every accepted sample │
//! └────────────────────────────────┴──────────────────────┘
//!          total entries <= capacity, always
//! ```
//!
//! ### Representative-Point Downsampling
//!
//! When the buffer is over capacity, the two oldest tail entries are merged
//! into one. Rather than averaging (which flattens extremes - the one depth
//! spike you care about), the merge keeps whichever of the two original
//! points deviates more from the running session mean. Extremes survive and
//! ties fall to the newer point, keeping the tail mean close to honest.
//!
//! ### Invariants
//!
//! - capacity is fixed at construction; zero is a configuration error
//! - `len() <= capacity` at all times
//! - iteration order is timestamp-ascending
//! - the single most recent sample is never dropped

use std::collections::VecDeque;

use crate::errors::{EngineError, EngineResult};
use crate::sample::MetricSample;
use crate::time::Timestamp;

/// Default total capacity per metric
pub const DEFAULT_CAPACITY: usize = 150;

/// Default full-resolution window in milliseconds
pub const DEFAULT_RECENT_WINDOW_MS: u64 = 60_000;

/// Session statistics over the numeric samples currently held
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStats {
    /// Smallest numeric value
    pub min: f64,
    /// Largest numeric value
    pub max: f64,
    /// Arithmetic mean
    pub avg: f64,
    /// Number of numeric samples included
    pub count: usize,
}

/// Bounded two-tier time series for one metric
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    /// Full-resolution entries inside the recent window
    recent: VecDeque<MetricSample>,
    /// Downsampled representative points older than the window
    tail: VecDeque<MetricSample>,
    capacity: usize,
    recent_window_ms: u64,
    /// Running sum/count of every numeric sample ever pushed; reference
    /// point for choosing which merged sample is the outlier worth keeping
    session_sum: f64,
    session_count: u64,
}

impl HistoryBuffer {
    /// Create a buffer with explicit capacity and recent window
    ///
    /// A capacity of zero is rejected: a buffer that cannot hold the most
    /// recent sample is a configuration error, not a degenerate case.
    pub fn new(capacity: usize, recent_window_ms: u64) -> EngineResult<Self> {
        if capacity == 0 {
            return Err(EngineError::ZeroCapacity);
        }
        Ok(Self {
            recent: VecDeque::new(),
            tail: VecDeque::new(),
            capacity,
            recent_window_ms,
            session_sum: 0.0,
            session_count: 0,
        })
    }

    /// Create a buffer with the default capacity and window
    pub fn with_defaults() -> Self {
        // Defaults are compile-time nonzero, so this cannot fail
        Self::new(DEFAULT_CAPACITY, DEFAULT_RECENT_WINDOW_MS)
            .expect("default capacity is nonzero")
    }

    /// Append a sample
    ///
    /// Entries that age out of the recent window migrate to the tail, and
    /// the tail is squeezed by representative-point merging until the total
    /// is back within capacity. O(1) amortized.
    pub fn push(&mut self, sample: MetricSample) {
        debug_assert!(
            self.latest().map_or(true, |last| sample.timestamp >= last.timestamp),
            "history insertion must be timestamp-ascending"
        );

        if let Some(v) = sample.value.as_number() {
            self.session_sum += v;
            self.session_count += 1;
        }

        let newest_ts = sample.timestamp;
        self.recent.push_back(sample);

        // Demote entries that fell out of the recent window. The newest
        // entry always stays in `recent`.
        while self.recent.len() > 1 {
            let front_ts = self.recent[0].timestamp;
            if newest_ts.saturating_sub(front_ts) <= self.recent_window_ms {
                break;
            }
            let demoted = self.recent.pop_front().expect("len checked above");
            self.tail.push_back(demoted);
        }

        while self.len() > self.capacity {
            self.squeeze();
        }
    }

    /// Reduce total size by one entry without losing the newest sample
    fn squeeze(&mut self) {
        if self.tail.len() >= 2 {
            let a = self.tail.pop_front().expect("len checked");
            let b = self.tail.pop_front().expect("len checked");
            let merged = self.merge(a, b);
            self.tail.push_front(merged);
        } else if self.recent.len() > 1 {
            // Recent window alone exceeds capacity (burst ingestion):
            // demote its oldest entry so the next pass can merge it.
            let demoted = self.recent.pop_front().expect("len checked");
            self.tail.push_back(demoted);
        } else if !self.tail.is_empty() {
            self.tail.pop_front();
        }
    }

    /// Pick the representative survivor of two adjacent tail entries
    ///
    /// The point deviating more from the running session mean wins, so
    /// extremes outlive repeated merging. Ties fall to the newer point.
    /// Non-numeric entries (picker values, NaN sentinels) carry no
    /// statistics, so a numeric point always beats one.
    fn merge(&mut self, older: MetricSample, newer: MetricSample) -> MetricSample {
        let (a, b) = match (older.value.as_number(), newer.value.as_number()) {
            (Some(a), Some(b)) => (a, b),
            (Some(_), None) => return older,
            _ => return newer,
        };

        let mean = if self.session_count > 0 {
            self.session_sum / self.session_count as f64
        } else {
            0.0
        };

        if (a - mean).abs() > (b - mean).abs() {
            older
        } else {
            newer
        }
    }

    /// Most recent sample, O(1)
    pub fn latest(&self) -> Option<&MetricSample> {
        self.recent.back().or_else(|| self.tail.back())
    }

    /// All stored samples, oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &MetricSample> {
        self.tail.iter().chain(self.recent.iter())
    }

    /// Samples no older than `window_ms` before `now`, oldest to newest
    pub fn range(&self, window_ms: u64, now: Timestamp) -> Vec<MetricSample> {
        self.iter()
            .filter(|s| now.saturating_sub(s.timestamp) <= window_ms)
            .cloned()
            .collect()
    }

    /// Number of stored samples
    pub fn len(&self) -> usize {
        self.recent.len() + self.tail.len()
    }

    /// True if no samples are stored
    pub fn is_empty(&self) -> bool {
        self.recent.is_empty() && self.tail.is_empty()
    }

    /// Configured total capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Min/max/avg over the numeric samples currently held
    ///
    /// `None` when no numeric sample exists yet. Text samples and NaN
    /// sentinels are skipped, not treated as zero.
    pub fn stats(&self) -> Option<SessionStats> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut count = 0usize;

        for sample in self.iter() {
            if let Some(v) = sample.value.as_number() {
                min = min.min(v);
                max = max.max(v);
                sum += v;
                count += 1;
            }
        }

        if count == 0 {
            return None;
        }
        Some(SessionStats {
            min,
            max,
            avg: sum / count as f64,
            count,
        })
    }

    /// Drop all samples and session aggregates
    pub fn clear(&mut self) {
        self.recent.clear();
        self.tail.clear();
        self.session_sum = 0.0;
        self.session_count = 0;
    }
}

impl HistoryBuffer {
    /// The two most recent samples, oldest first, for derivative metrics
    pub fn last_two(&self) -> Option<(&MetricSample, &MetricSample)> {
        let mut newest = None;
        let mut previous = None;
        for sample in self.iter() {
            previous = newest;
            newest = Some(sample);
        }
        match (previous, newest) {
            (Some(p), Some(n)) => Some((p, n)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleValue;

    fn buf(capacity: usize, window_ms: u64) -> HistoryBuffer {
        HistoryBuffer::new(capacity, window_ms).unwrap()
    }

    #[test]
    fn zero_capacity_rejected() {
        assert_eq!(
            HistoryBuffer::new(0, 1000).unwrap_err(),
            EngineError::ZeroCapacity
        );
    }

    #[test]
    fn empty_buffer() {
        let b = buf(5, 1000);
        assert!(b.is_empty());
        assert!(b.latest().is_none());
        assert!(b.stats().is_none());
    }

    #[test]
    fn latest_is_o1_and_correct() {
        let mut b = buf(5, 60_000);
        b.push(MetricSample::numeric(1.0, 100));
        b.push(MetricSample::numeric(2.0, 200));
        assert_eq!(b.latest().unwrap().value.as_number(), Some(2.0));
    }

    #[test]
    fn capacity_never_exceeded() {
        let mut b = buf(10, 1_000);
        for i in 0..500u64 {
            b.push(MetricSample::numeric(i as f64, i * 100));
            assert!(b.len() <= 10, "len {} at i {}", b.len(), i);
        }
        assert_eq!(b.len(), 10);
        // Newest sample survives
        assert_eq!(b.latest().unwrap().timestamp, 499 * 100);
    }

    #[test]
    fn iteration_is_timestamp_ascending() {
        let mut b = buf(20, 500);
        for i in 0..100u64 {
            b.push(MetricSample::numeric(i as f64, i * 100));
        }
        let stamps: Vec<Timestamp> = b.iter().map(|s| s.timestamp).collect();
        let mut sorted = stamps.clone();
        sorted.sort_unstable();
        assert_eq!(stamps, sorted);
    }

    #[test]
    fn downsampling_preserves_extremes() {
        let mut b = buf(8, 100);
        // One big spike early, then a long plateau that forces merging
        b.push(MetricSample::numeric(40.0, 0));
        for i in 1..200u64 {
            b.push(MetricSample::numeric(5.0, i * 1_000));
        }
        let stats = b.stats().unwrap();
        assert_eq!(stats.max, 40.0, "spike must survive downsampling");
        assert_eq!(stats.min, 5.0);
    }

    #[test]
    fn recent_window_full_resolution() {
        let mut b = buf(150, 60_000);
        for i in 0..30u64 {
            b.push(MetricSample::numeric(i as f64, i * 1_000));
        }
        // Everything inside the window, nothing merged
        assert_eq!(b.len(), 30);
        let values: Vec<f64> = b.iter().filter_map(|s| s.value.as_number()).collect();
        assert_eq!(values.len(), 30);
        assert_eq!(values[0], 0.0);
        assert_eq!(values[29], 29.0);
    }

    #[test]
    fn stats_skip_text_and_sentinel() {
        let mut b = buf(10, 60_000);
        b.push(MetricSample::new(SampleValue::Text("agm".into()), 0));
        b.push(MetricSample::numeric(f64::NAN, 100));
        b.push(MetricSample::numeric(3.0, 200));
        b.push(MetricSample::numeric(5.0, 300));

        let stats = b.stats().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, 3.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.avg, 4.0);
    }

    #[test]
    fn range_filters_by_window() {
        let mut b = buf(50, 60_000);
        for i in 0..10u64 {
            b.push(MetricSample::numeric(i as f64, i * 1_000));
        }
        let recent = b.range(3_000, 9_000);
        assert_eq!(recent.len(), 4); // t = 6000..9000 inclusive
        assert_eq!(recent[0].timestamp, 6_000);
    }

    #[test]
    fn last_two_for_derivatives() {
        let mut b = buf(10, 60_000);
        assert!(b.last_two().is_none());
        b.push(MetricSample::numeric(1.0, 100));
        assert!(b.last_two().is_none());
        b.push(MetricSample::numeric(2.0, 200));
        let (prev, newest) = b.last_two().unwrap();
        assert_eq!(prev.timestamp, 100);
        assert_eq!(newest.timestamp, 200);
    }
}
