//! Replaying recordings as an acquisition source

use super::source::{SampleSource, SourceBlock};
use crate::buffer::SlotMeta;
use crate::{EphysError, Result};
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Streams a WAV recording into the ring at its recorded rate.
///
/// Each WAV frame becomes one slot. Sample numbers count frames from the
/// start of the file and timestamps are sample number over sample rate;
/// recordings carry no event lines, so every event code is 0. The last block
/// may be short, after which the source reports itself exhausted.
pub struct WavFileSource {
    reader: WavReader<BufReader<File>>,
    path: PathBuf,
    channel_count: usize,
    sample_rate: f64,
    block_size: usize,
    format: SampleFormat,
    scale: f32,
    total_frames: i64,
    next_sample_number: i64,
}

impl WavFileSource {
    /// Open a recording for replay in blocks of `block_size` frames
    ///
    /// # Errors
    /// Returns `RecordingError` if the file cannot be opened or is not
    /// integer PCM up to 32 bits or 32-bit float, and `ConfigError` for a
    /// zero block size
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        let path = path.as_ref();
        if block_size == 0 {
            return Err(EphysError::ConfigError(
                "Replay block size must be non-zero".to_string(),
            ));
        }

        let reader = WavReader::open(path).map_err(|e| {
            EphysError::RecordingError(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let spec = reader.spec();

        let scale = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, bits @ 1..=32) => ((1i64 << (bits - 1)) - 1).max(1) as f32,
            (SampleFormat::Float, 32) => 1.0,
            (format, bits) => {
                return Err(EphysError::RecordingError(format!(
                    "Unsupported WAV format: {:?} {} bits",
                    format, bits
                )))
            }
        };

        let total_frames = reader.duration() as i64;
        info!(
            "Opened {} for replay: {} channel(s) at {}Hz, {} frames",
            path.display(),
            spec.channels,
            spec.sample_rate,
            total_frames
        );

        Ok(Self {
            reader,
            path: path.to_path_buf(),
            channel_count: spec.channels as usize,
            sample_rate: spec.sample_rate as f64,
            block_size,
            format: spec.sample_format,
            scale,
            total_frames,
            next_sample_number: 0,
        })
    }

    /// Position the source so the next block starts at `sample_number`
    pub fn seek_to(&mut self, sample_number: i64) -> Result<()> {
        if !(0..=self.total_frames).contains(&sample_number) {
            return Err(EphysError::ConfigError(format!(
                "Cannot seek to sample {} of a {}-frame recording",
                sample_number, self.total_frames
            )));
        }

        self.reader
            .seek(sample_number as u32)
            .map_err(|e| EphysError::IOError(format!("Failed to seek {}: {}", self.path.display(), e)))?;
        self.next_sample_number = sample_number;
        debug!("Replay positioned at sample {}", sample_number);
        Ok(())
    }

    /// Frames in the recording
    pub fn total_frames(&self) -> i64 {
        self.total_frames
    }

    /// Sample number of the next slot to be produced
    pub fn next_sample_number(&self) -> i64 {
        self.next_sample_number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_frames(&mut self, frames: usize, out: &mut Vec<f32>) -> Result<()> {
        let wanted = frames * self.channel_count;
        let read_error =
            |e: hound::Error| EphysError::IOError(format!("Failed to read recording: {}", e));

        match self.format {
            SampleFormat::Float => {
                for sample in self.reader.samples::<f32>().take(wanted) {
                    out.push(sample.map_err(read_error)?);
                }
            }
            SampleFormat::Int => {
                let scale = self.scale;
                for sample in self.reader.samples::<i32>().take(wanted) {
                    out.push(sample.map_err(read_error)? as f32 / scale);
                }
            }
        }

        // Drop a trailing partial frame from a truncated file
        out.truncate(out.len() / self.channel_count * self.channel_count);
        Ok(())
    }
}

impl SampleSource for WavFileSource {
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
        block.clear();
        block.chunk_size = 1;

        let remaining = (self.total_frames - self.next_sample_number).max(0) as usize;
        let frames = self.block_size.min(remaining);
        self.read_frames(frames, &mut block.samples)?;

        let read = block.samples.len() / self.channel_count;
        for offset in 0..read {
            let sample_number = self.next_sample_number + offset as i64;
            block.metadata.push(SlotMeta::new(
                sample_number,
                sample_number as f64 / self.sample_rate,
                0,
            ));
        }
        block.item_count = read;

        self.next_sample_number += read as i64;
        if read < frames {
            // The header promised more frames than the file holds
            self.total_frames = self.next_sample_number;
        }
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.next_sample_number >= self.total_frames
    }
}
