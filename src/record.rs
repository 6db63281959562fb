//! Recording drained blocks to disk

use crate::buffer::ChannelBlock;
use crate::{EphysError, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Appends drained blocks to a 16-bit PCM WAV file, one WAV channel per
/// stream channel
pub struct WavRecorder {
    writer: WavWriter<BufWriter<File>>,
    path: PathBuf,
    channel_count: usize,
    frames_written: u64,
}

impl WavRecorder {
    /// Create the output file
    ///
    /// # Arguments
    /// * `path` - Path to the output WAV file
    /// * `channel_count` - Stream channels to record
    /// * `sample_rate` - Sample rate in Hz
    pub fn create<P: AsRef<Path>>(path: P, channel_count: usize, sample_rate: u32) -> Result<Self> {
        let channels = u16::try_from(channel_count)
            .ok()
            .filter(|&c| c > 0)
            .ok_or_else(|| {
                EphysError::RecordingError(format!(
                    "WAV files hold 1-65535 channels, got {}",
                    channel_count
                ))
            })?;

        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let writer = WavWriter::create(path.as_ref(), spec)
            .map_err(|e| EphysError::RecordingError(format!("Failed to create WAV writer: {}", e)))?;

        info!(
            "Recording {} channel(s) at {}Hz to {:?}",
            channel_count,
            sample_rate,
            path.as_ref()
        );

        Ok(Self {
            writer,
            path: path.as_ref().to_path_buf(),
            channel_count,
            frames_written: 0,
        })
    }

    /// Append the valid slots of a block. Channels missing from the block
    /// are written as silence.
    pub fn write_block(&mut self, block: &ChannelBlock) -> Result<usize> {
        for slot in 0..block.len() {
            for channel in 0..self.channel_count {
                let sample = block
                    .channel(channel)
                    .map(|data| data[slot])
                    .unwrap_or(0.0);
                let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                self.writer
                    .write_sample(sample_i16)
                    .map_err(|e| EphysError::RecordingError(format!("Failed to write sample: {}", e)))?;
            }
        }

        self.frames_written += block.len() as u64;
        Ok(block.len())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the header and close the file, returning the frame count
    pub fn finalize(self) -> Result<u64> {
        self.writer
            .finalize()
            .map_err(|e| EphysError::RecordingError(format!("Failed to finalize WAV file: {}", e)))?;

        info!("Wrote {} frames to {:?}", self.frames_written, self.path);
        Ok(self.frames_written)
    }
}

/// Read a 16-bit recording back as interleaved samples
///
/// # Returns
/// * Tuple of (samples, sample_rate, channels)
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32, u16)> {
    let mut reader = WavReader::open(path.as_ref())
        .map_err(|e| EphysError::RecordingError(format!("Failed to open WAV file: {}", e)))?;

    let spec = reader.spec();
    debug!(
        "Reading WAV file: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(EphysError::RecordingError(format!(
            "Unsupported WAV format: {:?} {} bits",
            spec.sample_format, spec.bits_per_sample
        )));
    }

    let samples = reader
        .samples::<i16>()
        .map(|s| {
            s.map(|sample| sample as f32 / i16::MAX as f32)
                .map_err(|e| EphysError::RecordingError(format!("Failed to read sample: {}", e)))
        })
        .collect::<Result<Vec<f32>>>()?;

    Ok((samples, spec.sample_rate, spec.channels))
}
