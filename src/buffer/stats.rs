//! Stream health tracking
//!
//! Counters shared between the producer and consumer sides, and a
//! consumer-side detector for sample-number discontinuities.

use super::SlotMeta;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A jump in sample numbers between consecutive drained slots
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleGap {
    /// Sample number that should have come next
    pub expected: i64,
    /// Sample number that actually arrived
    pub found: i64,
}

impl SampleGap {
    /// Number of samples skipped; negative when the stream went backwards
    pub fn missing(&self) -> i64 {
        self.found - self.expected
    }
}

/// Detects discontinuities in the sample numbers of drained slots.
///
/// Slots written with a chunk size above one share their chunk's sample
/// number, so the detector tracks runs: a run of `n` slots stamped `s` must
/// be followed by `s + n`. State carries across calls, so a chunk split over
/// two drains is handled.
#[derive(Debug, Default)]
pub struct GapDetector {
    run: Option<(i64, i64)>,
}

impl GapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed drained metadata in order and return the first gap found in it
    pub fn observe(&mut self, metadata: &[SlotMeta]) -> Option<SampleGap> {
        let mut first_gap = None;

        for meta in metadata {
            self.run = match self.run {
                Some((number, length)) if number == meta.sample_number => {
                    Some((number, length + 1))
                }
                Some((number, length)) => {
                    let expected = number + length;
                    if meta.sample_number != expected && first_gap.is_none() {
                        first_gap = Some(SampleGap {
                            expected,
                            found: meta.sample_number,
                        });
                    }
                    Some((meta.sample_number, 1))
                }
                None => Some((meta.sample_number, 1)),
            };
        }

        first_gap
    }

    /// Sample number expected on the next slot, if any slot has been seen
    pub fn expected_next(&self) -> Option<i64> {
        self.run.map(|(number, length)| number + length)
    }

    /// Forget the stream position, e.g. after the buffer was cleared
    pub fn reset(&mut self) {
        self.run = None;
    }
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Slots offered to the ring by the producer
    pub offered: u64,
    /// Slots accepted by the ring
    pub written: u64,
    /// Slots rejected because the ring was full
    pub dropped: u64,
    /// Slots drained by the consumer
    pub drained: u64,
    /// Discontinuities seen by the consumer
    pub gaps: u64,
    pub last_gap: Option<SampleGap>,
}

impl StatsSnapshot {
    /// Fraction of offered slots that were dropped
    pub fn drop_ratio(&self) -> f64 {
        if self.offered == 0 {
            return 0.0;
        }
        self.dropped as f64 / self.offered as f64
    }

    /// Slots written but not yet drained
    pub fn backlog(&self) -> u64 {
        self.written.saturating_sub(self.drained)
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("written: {}", self.written),
            format!("drained: {}", self.drained),
            format!("dropped: {} ({:.2}%)", self.dropped, self.drop_ratio() * 100.0),
            format!("backlog: {}", self.backlog()),
        ];
        if self.gaps > 0 {
            parts.push(format!("gaps: {}", self.gaps));
        }
        parts.join(" | ")
    }
}

/// Counters shared between producer and consumer
#[derive(Debug, Default)]
pub struct StreamStats {
    offered: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    drained: AtomicU64,
    gaps: AtomicU64,
    last_gap: Mutex<Option<SampleGap>>,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one write call
    pub fn record_write(&self, offered: usize, accepted: usize) {
        self.offered.fetch_add(offered as u64, Ordering::Relaxed);
        self.written.fetch_add(accepted as u64, Ordering::Relaxed);
        self.dropped
            .fetch_add(offered.saturating_sub(accepted) as u64, Ordering::Relaxed);
    }

    pub fn record_drain(&self, count: usize) {
        self.drained.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_gap(&self, gap: SampleGap) {
        self.gaps.fetch_add(1, Ordering::Relaxed);
        *self.last_gap.lock() = Some(gap);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            offered: self.offered.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            gaps: self.gaps.load(Ordering::Relaxed),
            last_gap: *self.last_gap.lock(),
        }
    }

    pub fn reset(&self) {
        self.offered.store(0, Ordering::Relaxed);
        self.written.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.drained.store(0, Ordering::Relaxed);
        self.gaps.store(0, Ordering::Relaxed);
        *self.last_gap.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(numbers: &[i64]) -> Vec<SlotMeta> {
        numbers.iter().map(|&n| SlotMeta::new(n, 0.0, 0)).collect()
    }

    #[test]
    fn test_contiguous_stream_has_no_gap() {
        let mut detector = GapDetector::new();
        assert_eq!(detector.observe(&numbered(&[0, 1, 2, 3])), None);
        assert_eq!(detector.observe(&numbered(&[4, 5])), None);
        assert_eq!(detector.expected_next(), Some(6));
    }

    #[test]
    fn test_gap_between_drains() {
        let mut detector = GapDetector::new();
        detector.observe(&numbered(&[10, 11, 12]));
        let gap = detector.observe(&numbered(&[20, 21])).unwrap();
        assert_eq!(gap, SampleGap { expected: 13, found: 20 });
        assert_eq!(gap.missing(), 7);
    }

    #[test]
    fn test_chunked_runs_split_across_drains() {
        let mut detector = GapDetector::new();
        // Chunks of 4 stamped 0, 4, 8; the second chunk straddles two drains
        assert_eq!(detector.observe(&numbered(&[0, 0, 0, 0, 4, 4])), None);
        assert_eq!(detector.observe(&numbered(&[4, 4, 8, 8, 8, 8])), None);
        assert_eq!(detector.expected_next(), Some(12));
    }

    #[test]
    fn test_backwards_jump() {
        let mut detector = GapDetector::new();
        detector.observe(&numbered(&[5, 6]));
        let gap = detector.observe(&numbered(&[3])).unwrap();
        assert_eq!(gap.missing(), -4);
    }

    #[test]
    fn test_reset_forgets_position() {
        let mut detector = GapDetector::new();
        detector.observe(&numbered(&[1, 2]));
        detector.reset();
        assert_eq!(detector.expected_next(), None);
        assert_eq!(detector.observe(&numbered(&[100])), None);
    }

    #[test]
    fn test_stream_stats() {
        let stats = StreamStats::new();
        stats.record_write(100, 100);
        stats.record_write(50, 20);
        stats.record_drain(90);
        stats.record_gap(SampleGap { expected: 120, found: 150 });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.offered, 150);
        assert_eq!(snapshot.written, 120);
        assert_eq!(snapshot.dropped, 30);
        assert_eq!(snapshot.backlog(), 30);
        assert_eq!(snapshot.gaps, 1);
        assert!((snapshot.drop_ratio() - 0.2).abs() < 1e-9);
        assert!(snapshot.summary().contains("gaps: 1"));

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
