//! Consumer-side working buffer
//!
//! A [`ChannelBlock`] is what a processing callback drains into: planar
//! channel data plus one [`SlotMeta`] per slot, allocated once and reused
//! every cycle.

use super::{SampleReader, SlotMeta};

/// Planar multi-channel block with per-slot metadata
#[derive(Debug, Clone)]
pub struct ChannelBlock {
    channels: Vec<Vec<f32>>,
    metadata: Vec<SlotMeta>,
    len: usize,
    start: SlotMeta,
}

impl ChannelBlock {
    /// Create a block holding up to `max_slots` slots of `channel_count` channels
    pub fn new(channel_count: usize, max_slots: usize) -> Self {
        Self {
            channels: vec![vec![0.0; max_slots]; channel_count],
            metadata: vec![SlotMeta::default(); max_slots],
            len: 0,
            start: SlotMeta::default(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn max_slots(&self) -> usize {
        self.metadata.len()
    }

    /// Number of valid slots from the last fill
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drain as many slots as fit into every channel of this block
    pub fn fill_from(&mut self, reader: &mut SampleReader) -> usize {
        self.fill_channels_from(reader, 0, None)
    }

    /// Drain into channels `dest_channel_offset..` of this block, copying
    /// `channel_count` stored channels (all that fit when `None`)
    pub fn fill_channels_from(
        &mut self,
        reader: &mut SampleReader,
        dest_channel_offset: usize,
        channel_count: Option<usize>,
    ) -> usize {
        let max_slots = self.max_slots();
        self.len = reader.drain_channels(
            &mut self.channels,
            &mut self.metadata,
            max_slots,
            dest_channel_offset,
            channel_count,
        );

        // An empty drain still reports where the stream currently stands
        self.start = if self.len > 0 {
            self.metadata[0]
        } else {
            SlotMeta::new(reader.last_sample_number(), reader.last_timestamp(), 0)
        };

        self.len
    }

    /// Valid samples of one channel
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(|channel| &channel[..self.len])
    }

    /// Per-slot metadata of the valid slots
    pub fn metadata(&self) -> &[SlotMeta] {
        &self.metadata[..self.len]
    }

    /// Sample number of the first slot, or the last accepted sample number
    /// when the fill drained nothing
    pub fn start_sample_number(&self) -> i64 {
        self.start.sample_number
    }

    /// Timestamp of the first slot, or the last accepted timestamp when the
    /// fill drained nothing
    pub fn start_timestamp(&self) -> f64 {
        self.start.timestamp
    }

    /// Bitwise OR of the event codes of all valid slots
    pub fn event_lines(&self) -> u64 {
        self.metadata().iter().fold(0, |lines, meta| lines | meta.event_code)
    }

    /// Valid data as frame-interleaved samples
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.len * self.channels.len());
        for slot in 0..self.len {
            for channel in &self.channels {
                out.push(channel[slot]);
            }
        }
        out
    }

    /// Mark the block empty without touching the allocation
    pub fn clear(&mut self) {
        self.len = 0;
        self.start = SlotMeta::default();
    }
}
