//! Data-producing sources
//!
//! A source fills one [`SourceBlock`] per acquisition callback in the layout
//! [`SampleWriter::write`](crate::buffer::SampleWriter::write) expects.

use crate::buffer::SlotMeta;
use crate::config::StreamConfig;
use crate::{EphysError, Result};
use std::f64::consts::PI;

/// One acquisition callback's worth of data, reused between callbacks
#[derive(Debug, Clone, Default)]
pub struct SourceBlock {
    /// Chunk-major, channel-major-within-chunk samples
    pub samples: Vec<f32>,
    /// One entry per chunk
    pub metadata: Vec<SlotMeta>,
    /// Slots in the block
    pub item_count: usize,
    /// Slots per metadata entry
    pub chunk_size: usize,
}

impl SourceBlock {
    /// Allocate room for `item_count` slots of `channel_count` channels
    pub fn with_capacity(channel_count: usize, item_count: usize, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            samples: Vec::with_capacity(channel_count * item_count),
            metadata: Vec::with_capacity(item_count.div_ceil(chunk_size)),
            item_count: 0,
            chunk_size,
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.metadata.clear();
        self.item_count = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }
}

/// A producer of multi-channel sample blocks
pub trait SampleSource: Send {
    /// Channels per slot
    fn channel_count(&self) -> usize;

    /// Sample rate in Hz
    fn sample_rate(&self) -> f64;

    /// Slots produced per call to [`fill_block`](Self::fill_block)
    fn block_size(&self) -> usize;

    /// Replace the block's contents with the next run of slots
    fn fill_block(&mut self, block: &mut SourceBlock) -> Result<()>;

    /// Whether the source has nothing more to produce. Live sources never
    /// run out.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Deterministic test-signal source.
///
/// Channel `n` carries a sine at `base_frequency * (n + 1)` Hz. Event line 0
/// toggles every `event_period` slots. Sample numbers start at 0 and
/// timestamps are sample number over sample rate.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    channel_count: usize,
    sample_rate: f64,
    block_size: usize,
    chunk_size: usize,
    event_period: usize,
    base_frequency: f64,
    amplitude: f64,
    next_sample_number: i64,
}

impl SyntheticSource {
    pub fn new(channel_count: usize, sample_rate: f64, block_size: usize) -> Self {
        Self {
            channel_count,
            sample_rate,
            block_size,
            chunk_size: 1,
            event_period: 0,
            base_frequency: 10.0,
            amplitude: 0.5,
            next_sample_number: 0,
        }
    }

    /// Build a source matching a stream configuration
    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            config.stream.channel_count,
            config.stream.sample_rate,
            config.stream.block_size,
        )
        .with_chunk_size(config.stream.chunk_size)
        .with_event_period(config.stream.event_period)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_event_period(mut self, event_period: usize) -> Self {
        self.event_period = event_period;
        self
    }

    pub fn with_base_frequency(mut self, base_frequency: f64) -> Self {
        self.base_frequency = base_frequency;
        self
    }

    /// Skip ahead, e.g. to simulate lost hardware packets
    pub fn skip(&mut self, slots: i64) {
        self.next_sample_number += slots;
    }

    /// Sample number of the next slot to be produced
    pub fn next_sample_number(&self) -> i64 {
        self.next_sample_number
    }

    fn value(&self, channel: usize, sample_number: i64) -> f32 {
        let frequency = self.base_frequency * (channel + 1) as f64;
        let phase = 2.0 * PI * frequency * sample_number as f64 / self.sample_rate;
        (self.amplitude * phase.sin()) as f32
    }

    fn event_code(&self, sample_number: i64) -> u64 {
        if self.event_period == 0 {
            return 0;
        }
        (sample_number / self.event_period as i64) as u64 & 1
    }
}

impl SampleSource for SyntheticSource {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn fill_block(&mut self, block: &mut SourceBlock) -> Result<()> {
        if self.chunk_size == 0 || self.block_size % self.chunk_size != 0 {
            return Err(EphysError::ConfigError(format!(
                "chunk size {} does not divide block size {}",
                self.chunk_size, self.block_size
            )));
        }

        block.clear();
        block.chunk_size = self.chunk_size;
        block.item_count = self.block_size;

        for chunk in 0..self.block_size / self.chunk_size {
            let start = self.next_sample_number + (chunk * self.chunk_size) as i64;
            block.metadata.push(SlotMeta::new(
                start,
                start as f64 / self.sample_rate,
                self.event_code(start),
            ));
            for channel in 0..self.channel_count {
                for offset in 0..self.chunk_size {
                    block.samples.push(self.value(channel, start + offset as i64));
                }
            }
        }

        self.next_sample_number += self.block_size as i64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_block_interleaved() {
        let mut source = SyntheticSource::new(3, 1000.0, 8);
        let mut block = SourceBlock::with_capacity(3, 8, 1);

        source.fill_block(&mut block).unwrap();
        assert_eq!(block.item_count, 8);
        assert_eq!(block.samples.len(), 24);
        assert_eq!(block.metadata.len(), 8);
        assert_eq!(block.metadata[5].sample_number, 5);
        assert!((block.metadata[5].timestamp - 0.005).abs() < 1e-12);
        assert_eq!(source.next_sample_number(), 8);

        source.fill_block(&mut block).unwrap();
        assert_eq!(block.metadata[0].sample_number, 8);
        assert_eq!(block.samples.len(), 24);
    }

    #[test]
    fn test_fill_block_chunked() {
        let mut source = SyntheticSource::new(2, 1000.0, 12).with_chunk_size(4);
        let mut block = SourceBlock::default();

        source.fill_block(&mut block).unwrap();
        assert_eq!(block.chunk_size, 4);
        assert_eq!(block.metadata.len(), 3);
        let starts: Vec<i64> = block.metadata.iter().map(|m| m.sample_number).collect();
        assert_eq!(starts, vec![0, 4, 8]);
        // Channel 1 of chunk 0 follows the 4 samples of channel 0
        assert_eq!(block.samples[4], source.value(1, 0));
        assert_eq!(block.samples[5], source.value(1, 1));
    }

    #[test]
    fn test_event_line_toggles() {
        let source = SyntheticSource::new(1, 1000.0, 10).with_event_period(5);
        assert_eq!(source.event_code(0), 0);
        assert_eq!(source.event_code(4), 0);
        assert_eq!(source.event_code(5), 1);
        assert_eq!(source.event_code(10), 0);
    }

    #[test]
    fn test_rejects_indivisible_chunks() {
        let mut source = SyntheticSource::new(1, 1000.0, 10).with_chunk_size(3);
        let mut block = SourceBlock::default();
        assert!(source.fill_block(&mut block).is_err());
    }

    #[test]
    fn test_skip_creates_discontinuity() {
        let mut source = SyntheticSource::new(1, 1000.0, 4);
        let mut block = SourceBlock::default();
        source.fill_block(&mut block).unwrap();
        source.skip(10);
        source.fill_block(&mut block).unwrap();
        assert_eq!(block.metadata[0].sample_number, 14);
    }
}
