//! Multi-channel sample ring with per-slot metadata
//!
//! A slot is one time point across all channels plus its sample number,
//! timestamp and event code. Samples and metadata live in two lock-free SPSC
//! rings. The writer pushes a slot's samples before its metadata and the
//! reader pops samples before metadata, so the metadata fill level is the
//! number of fully written slots and a partially written slot is never
//! visible to the reader.

use crate::{EphysError, Result};
use crossbeam::atomic::AtomicCell;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Sample number reported before any slot has been accepted
pub const INITIAL_SAMPLE_NUMBER: i64 = 0;

/// Timestamp reported before any slot has been accepted
pub const INITIAL_TIMESTAMP: f64 = -1.0;

/// Metadata stamped on a slot: sample index, timestamp in seconds and
/// event-line bitmask
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SlotMeta {
    pub sample_number: i64,
    pub timestamp: f64,
    pub event_code: u64,
}

impl SlotMeta {
    pub fn new(sample_number: i64, timestamp: f64, event_code: u64) -> Self {
        Self {
            sample_number,
            timestamp,
            event_code,
        }
    }

    /// Check whether event line `line` (0-63) is high on this slot
    pub fn is_line_high(&self, line: u32) -> bool {
        line < u64::BITS && self.event_code & (1u64 << line) != 0
    }
}

/// Sample number and timestamp of the most recently accepted slot, shared
/// by both halves and published as one pair
type LastSlot = AtomicCell<(i64, f64)>;

const INITIAL_LAST_SLOT: (i64, f64) = (INITIAL_SAMPLE_NUMBER, INITIAL_TIMESTAMP);

/// Producer half of a [`SampleRingBuffer`]
pub struct SampleWriter {
    samples: HeapProd<f32>,
    metadata: HeapProd<SlotMeta>,
    last: Arc<LastSlot>,
    channel_count: usize,
}

impl SampleWriter {
    /// Number of channels per slot
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Maximum number of slots the ring can hold
    pub fn capacity(&self) -> usize {
        self.metadata.capacity().get()
    }

    /// Number of slots that a write issued now is guaranteed to accept
    pub fn free_slots(&self) -> usize {
        self.metadata
            .vacant_len()
            .min(self.samples.vacant_len() / self.channel_count)
    }

    /// Write up to `item_count` slots and return how many were accepted.
    ///
    /// `metadata` holds one entry per chunk of `chunk_size` consecutive slots;
    /// each entry is stamped on every slot of its chunk. Within a chunk the
    /// samples are channel-major, so sample `i` of channel `ch` in chunk `c`
    /// is `samples[c * chunk_size * channels + ch * chunk_size + i]`. A chunk
    /// size of 1 is plain interleaved data, a chunk size of `item_count` is
    /// planar data.
    ///
    /// The accepted count is `min(item_count, free_slots())`; the earliest
    /// slots of the call are kept and the rest are dropped. Data already in
    /// the ring is never overwritten.
    ///
    /// `chunk_size` must be non-zero and divide `item_count`, and the slices
    /// must cover `item_count` slots. This is only checked in debug builds;
    /// release builds clamp to what the slices cover.
    pub fn write(
        &mut self,
        samples: &[f32],
        metadata: &[SlotMeta],
        item_count: usize,
        chunk_size: usize,
    ) -> usize {
        debug_assert!(chunk_size > 0, "chunk size must be non-zero");
        debug_assert!(
            item_count % chunk_size.max(1) == 0,
            "chunk size {} does not divide item count {}",
            chunk_size,
            item_count
        );

        let channels = self.channel_count;
        let chunk_size = chunk_size.max(1);
        let chunk_stride = chunk_size * channels;

        let supplied = item_count
            .min(samples.len() / chunk_stride * chunk_size)
            .min(metadata.len() * chunk_size);
        let accepted = supplied.min(self.free_slots());
        if accepted == 0 {
            return 0;
        }

        if chunk_size == 1 {
            self.samples.push_slice(&samples[..accepted * channels]);
        } else {
            self.samples.push_iter((0..accepted).flat_map(|slot| {
                let base = (slot / chunk_size) * chunk_stride + slot % chunk_size;
                (0..channels).map(move |channel| samples[base + channel * chunk_size])
            }));
        }

        // Publishing metadata is what makes the slots visible to the reader
        let published = self
            .metadata
            .push_iter((0..accepted).map(|slot| metadata[slot / chunk_size]));
        debug_assert_eq!(published, accepted, "metadata ring overflow");

        let last = metadata[(accepted - 1) / chunk_size];
        self.last.store((last.sample_number, last.timestamp));

        accepted
    }

    /// Sample number of the most recently accepted slot
    pub fn last_sample_number(&self) -> i64 {
        self.last.load().0
    }

    /// Timestamp of the most recently accepted slot
    pub fn last_timestamp(&self) -> f64 {
        self.last.load().1
    }
}

impl fmt::Debug for SampleWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleWriter")
            .field("channel_count", &self.channel_count)
            .field("capacity", &self.capacity())
            .field("free_slots", &self.free_slots())
            .finish()
    }
}

/// Consumer half of a [`SampleRingBuffer`]
pub struct SampleReader {
    samples: HeapCons<f32>,
    metadata: HeapCons<SlotMeta>,
    last: Arc<LastSlot>,
    channel_count: usize,
}

impl SampleReader {
    /// Number of channels per slot
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Maximum number of slots the ring can hold
    pub fn capacity(&self) -> usize {
        self.metadata.capacity().get()
    }

    /// Number of fully written slots available to drain
    pub fn num_slots(&self) -> usize {
        self.metadata.occupied_len()
    }

    /// Check if no slots are available
    pub fn is_empty(&self) -> bool {
        self.num_slots() == 0
    }

    /// Drain the oldest slots into `destination`, one entry per channel,
    /// starting at channel 0 and copying every stored channel that fits.
    ///
    /// See [`SampleReader::drain_channels`].
    pub fn drain<D: AsMut<[f32]>>(
        &mut self,
        destination: &mut [D],
        metadata: &mut [SlotMeta],
        max_slots: usize,
    ) -> usize {
        self.drain_channels(destination, metadata, max_slots, 0, None)
    }

    /// Drain up to `max_slots` of the oldest slots and return how many were
    /// removed.
    ///
    /// Stored channels `0..channel_count` are copied into
    /// `destination[dest_channel_offset..]`; channels that do not fit in the
    /// destination are skipped. Slot `k` lands at index `k` of every copied
    /// channel and of `metadata`. The count is further bounded by the length
    /// of `metadata` and of the destination channels. Never blocks; zero
    /// means nothing is available yet.
    pub fn drain_channels<D: AsMut<[f32]>>(
        &mut self,
        destination: &mut [D],
        metadata: &mut [SlotMeta],
        max_slots: usize,
        dest_channel_offset: usize,
        channel_count: Option<usize>,
    ) -> usize {
        let channels = self.channel_count;
        let copy_channels = channel_count
            .unwrap_or(channels)
            .min(channels)
            .min(destination.len().saturating_sub(dest_channel_offset));

        let dest_len = destination
            .iter_mut()
            .skip(dest_channel_offset)
            .take(copy_channels)
            .map(|channel| channel.as_mut().len())
            .min()
            .unwrap_or(usize::MAX);

        let count = max_slots
            .min(self.num_slots())
            .min(metadata.len())
            .min(dest_len);
        if count == 0 {
            return 0;
        }

        let (head, tail) = self.samples.as_slices();
        let mut values = head.iter().chain(tail.iter()).copied();
        for slot in 0..count {
            for channel in 0..channels {
                let value = values.next().unwrap_or_default();
                if channel < copy_channels {
                    destination[dest_channel_offset + channel].as_mut()[slot] = value;
                }
            }
        }
        self.samples.skip(count * channels);

        // Releasing metadata last keeps the writer's free-space view conservative
        self.metadata.pop_slice(&mut metadata[..count]);

        count
    }

    /// Sample number of the most recently accepted slot, even when the ring
    /// is empty
    pub fn last_sample_number(&self) -> i64 {
        self.last.load().0
    }

    /// Timestamp of the most recently accepted slot, even when the ring is
    /// empty
    pub fn last_timestamp(&self) -> f64 {
        self.last.load().1
    }

    /// Sample number and timestamp of the most recently accepted slot, read
    /// as one consistent pair
    pub fn last_slot(&self) -> (i64, f64) {
        self.last.load()
    }
}

impl fmt::Debug for SampleReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleReader")
            .field("channel_count", &self.channel_count)
            .field("capacity", &self.capacity())
            .field("num_slots", &self.num_slots())
            .finish()
    }
}

/// Returned by [`SampleRingBuffer::join`] when the halves come from
/// different buffers. Both halves are handed back untouched.
#[derive(Error)]
#[error("writer and reader belong to different sample buffers")]
pub struct JoinError {
    pub writer: SampleWriter,
    pub reader: SampleReader,
}

impl fmt::Debug for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinError").finish_non_exhaustive()
    }
}

/// Bounded multi-channel ring buffer between one producer and one consumer.
///
/// Owning the whole buffer means neither side is in flight, which is what
/// [`resize`](Self::resize) and [`clear`](Self::clear) require. For
/// concurrent use, [`split`](Self::split) into a [`SampleWriter`] and a
/// [`SampleReader`], or borrow both with [`halves`](Self::halves) inside a
/// thread scope.
#[derive(Debug)]
pub struct SampleRingBuffer {
    writer: SampleWriter,
    reader: SampleReader,
}

impl SampleRingBuffer {
    /// Allocate a ring of `capacity` slots for `channel_count` channels
    ///
    /// # Errors
    /// Returns `ConfigError` for a zero channel count or capacity and
    /// `AllocationError` if the storage cannot be reserved
    pub fn new(channel_count: usize, capacity: usize) -> Result<Self> {
        let last = Arc::new(AtomicCell::new(INITIAL_LAST_SLOT));
        let (writer, reader) = allocate(channel_count, capacity, last)?;
        info!(
            "Created sample buffer: {} channel(s), {} slots",
            channel_count, capacity
        );
        Ok(Self { writer, reader })
    }

    /// Reallocate for a new shape and discard all content.
    ///
    /// On error the buffer keeps its previous shape and content.
    pub fn resize(&mut self, channel_count: usize, capacity: usize) -> Result<()> {
        let (writer, reader) = allocate(channel_count, capacity, Arc::clone(&self.writer.last))?;
        self.writer = writer;
        self.reader = reader;
        self.writer.last.store(INITIAL_LAST_SLOT);

        info!(
            "Resized sample buffer: {} channel(s), {} slots",
            channel_count, capacity
        );
        Ok(())
    }

    /// Empty the ring without reallocating
    pub fn clear(&mut self) {
        self.reader.samples.clear();
        self.reader.metadata.clear();
        self.writer.last.store(INITIAL_LAST_SLOT);
        debug!("Cleared sample buffer");
    }

    /// See [`SampleWriter::write`]
    pub fn write(
        &mut self,
        samples: &[f32],
        metadata: &[SlotMeta],
        item_count: usize,
        chunk_size: usize,
    ) -> usize {
        self.writer.write(samples, metadata, item_count, chunk_size)
    }

    /// See [`SampleReader::drain`]
    pub fn drain<D: AsMut<[f32]>>(
        &mut self,
        destination: &mut [D],
        metadata: &mut [SlotMeta],
        max_slots: usize,
    ) -> usize {
        self.reader.drain(destination, metadata, max_slots)
    }

    /// See [`SampleReader::drain_channels`]
    pub fn drain_channels<D: AsMut<[f32]>>(
        &mut self,
        destination: &mut [D],
        metadata: &mut [SlotMeta],
        max_slots: usize,
        dest_channel_offset: usize,
        channel_count: Option<usize>,
    ) -> usize {
        self.reader.drain_channels(
            destination,
            metadata,
            max_slots,
            dest_channel_offset,
            channel_count,
        )
    }

    pub fn num_slots(&self) -> usize {
        self.reader.num_slots()
    }

    pub fn is_empty(&self) -> bool {
        self.reader.is_empty()
    }

    pub fn free_slots(&self) -> usize {
        self.writer.free_slots()
    }

    pub fn channel_count(&self) -> usize {
        self.writer.channel_count
    }

    pub fn capacity(&self) -> usize {
        self.writer.capacity()
    }

    pub fn last_sample_number(&self) -> i64 {
        self.writer.last_sample_number()
    }

    pub fn last_timestamp(&self) -> f64 {
        self.writer.last_timestamp()
    }

    /// Borrow both halves at once, e.g. to hand them to scoped threads
    pub fn halves(&mut self) -> (&mut SampleWriter, &mut SampleReader) {
        (&mut self.writer, &mut self.reader)
    }

    /// Split into independently owned producer and consumer halves
    pub fn split(self) -> (SampleWriter, SampleReader) {
        (self.writer, self.reader)
    }

    /// Reassemble halves produced by [`split`](Self::split)
    ///
    /// # Errors
    /// Returns both halves in a [`JoinError`] if they belong to different
    /// buffers
    pub fn join(
        writer: SampleWriter,
        reader: SampleReader,
    ) -> std::result::Result<Self, JoinError> {
        if Arc::ptr_eq(&writer.last, &reader.last) {
            Ok(Self { writer, reader })
        } else {
            Err(JoinError { writer, reader })
        }
    }
}

fn allocate(
    channel_count: usize,
    capacity: usize,
    last: Arc<LastSlot>,
) -> Result<(SampleWriter, SampleReader)> {
    if channel_count == 0 {
        return Err(EphysError::ConfigError(
            "Sample buffer needs at least one channel".to_string(),
        ));
    }
    if capacity == 0 {
        return Err(EphysError::ConfigError(
            "Sample buffer capacity must be non-zero".to_string(),
        ));
    }

    let sample_len = channel_count.checked_mul(capacity).ok_or_else(|| {
        EphysError::AllocationError(format!(
            "{} channels x {} slots overflows the address space",
            channel_count, capacity
        ))
    })?;

    let samples = HeapRb::<f32>::try_new(sample_len).map_err(|e| {
        EphysError::AllocationError(format!("Failed to allocate {} samples: {}", sample_len, e))
    })?;
    let metadata = HeapRb::<SlotMeta>::try_new(capacity).map_err(|e| {
        EphysError::AllocationError(format!("Failed to allocate {} slots: {}", capacity, e))
    })?;
    let (samples_tx, samples_rx) = samples.split();
    let (metadata_tx, metadata_rx) = metadata.split();

    let writer = SampleWriter {
        samples: samples_tx,
        metadata: metadata_tx,
        last: Arc::clone(&last),
        channel_count,
    };
    let reader = SampleReader {
        samples: samples_rx,
        metadata: metadata_rx,
        last,
        channel_count,
    };

    Ok((writer, reader))
}
