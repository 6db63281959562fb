//! Stream configuration
//!
//! Loaded from a TOML file or built in code. Every section has defaults, so
//! a file only needs the values it changes:
//!
//! ```toml
//! [stream]
//! channel_count = 32
//! sample_rate = 30000.0
//! latency_ms = 200
//!
//! [run]
//! record_path = "session.wav"
//! # replay_path = "previous.wav"
//! ```

use crate::{EphysError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Producer-side settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    /// Channels per slot declared by the source
    pub channel_count: usize,

    /// Sample rate in Hz
    pub sample_rate: f64,

    /// Desired buffering latency; sets the ring capacity
    pub latency_ms: u64,

    /// Slots produced per acquisition callback
    pub block_size: usize,

    /// Slots sharing one metadata triple
    pub chunk_size: usize,

    /// Slots between TTL toggles of the synthetic source (0 = no events)
    pub event_period: usize,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            channel_count: 16,
            sample_rate: 30000.0,
            latency_ms: 100,
            block_size: 300,
            chunk_size: 1,
            event_period: 15000,
        }
    }
}

/// Consumer-side settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConsumerSection {
    /// Slots drained per processing callback
    pub block_size: usize,

    /// First destination channel
    pub channel_offset: usize,

    /// Number of stored channels to copy (all when absent)
    pub channel_count: Option<usize>,
}

impl Default for ConsumerSection {
    fn default() -> Self {
        Self {
            block_size: 1024,
            channel_offset: 0,
            channel_count: None,
        }
    }
}

/// Settings for the headless runner
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// How long to acquire
    pub duration_ms: u64,

    /// Record drained data to this WAV file
    pub record_path: Option<PathBuf>,

    /// Replay this WAV file instead of the synthetic signal; its channel
    /// count and sample rate replace the `[stream]` values
    pub replay_path: Option<PathBuf>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            duration_ms: 2000,
            record_path: None,
            replay_path: None,
        }
    }
}

/// Complete configuration for one acquisition stream
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub stream: StreamSection,
    pub consumer: ConsumerSection,
    pub run: RunSection,
}

impl StreamConfig {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EphysError::IOError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            EphysError::ConfigError(msg) => {
                EphysError::ConfigError(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StreamConfig =
            toml::from_str(content).map_err(|e| EphysError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the channel count
    pub fn with_channels(mut self, channel_count: usize) -> Self {
        self.stream.channel_count = channel_count;
        self
    }

    /// Set the sample rate
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.stream.sample_rate = sample_rate;
        self
    }

    /// Set the buffering latency
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.stream.latency_ms = latency_ms;
        self
    }

    /// Set the producer block and chunk sizes
    pub fn with_blocks(mut self, block_size: usize, chunk_size: usize) -> Self {
        self.stream.block_size = block_size;
        self.stream.chunk_size = chunk_size;
        self
    }

    /// Set the run duration
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.run.duration_ms = duration_ms;
        self
    }

    /// Record drained data to a WAV file
    pub fn with_record_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.run.record_path = Some(path.into());
        self
    }

    /// Replay a recording instead of generating a test signal
    pub fn with_replay_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.run.replay_path = Some(path.into());
        self
    }

    /// Ring capacity in slots needed to hold `latency_ms` of data
    pub fn capacity(&self) -> usize {
        let slots = self.stream.sample_rate * self.stream.latency_ms as f64 / 1000.0;
        (slots.ceil() as usize).max(1)
    }

    /// Time between consumer callbacks
    pub fn consumer_interval(&self) -> Duration {
        Duration::from_secs_f64(self.consumer.block_size as f64 / self.stream.sample_rate)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let stream = &self.stream;

        if stream.channel_count == 0 {
            return Err(EphysError::ConfigError(
                "channel_count must be at least 1".to_string(),
            ));
        }
        if !(stream.sample_rate.is_finite() && stream.sample_rate > 0.0) {
            return Err(EphysError::ConfigError(format!(
                "sample_rate must be positive, got {}",
                stream.sample_rate
            )));
        }
        if stream.block_size == 0 || self.consumer.block_size == 0 {
            return Err(EphysError::ConfigError(
                "block sizes must be non-zero".to_string(),
            ));
        }
        if stream.chunk_size == 0 || stream.block_size % stream.chunk_size != 0 {
            return Err(EphysError::ConfigError(format!(
                "chunk_size {} must divide block_size {}",
                stream.chunk_size, stream.block_size
            )));
        }
        if self.consumer.channel_count == Some(0) {
            return Err(EphysError::ConfigError(
                "consumer channel_count must be at least 1 when set".to_string(),
            ));
        }
        if self.capacity() < stream.block_size {
            return Err(EphysError::ConfigError(format!(
                "latency of {}ms holds {} slots, less than one block of {}",
                stream.latency_ms,
                self.capacity(),
                stream.block_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capacity(), 3000);
        assert_eq!(config.consumer_interval(), Duration::from_secs_f64(1024.0 / 30000.0));
    }

    #[test]
    fn test_partial_toml() {
        let config = StreamConfig::from_toml_str(
            r#"
            [stream]
            channel_count = 4
            sample_rate = 1000.0
            latency_ms = 500

            [consumer]
            channel_offset = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.stream.channel_count, 4);
        assert_eq!(config.capacity(), 500);
        assert_eq!(config.consumer.channel_offset, 2);
        assert_eq!(config.consumer.block_size, 1024);
        assert_eq!(config.run, RunSection::default());
    }

    #[test]
    fn test_rejects_bad_chunk_size() {
        let result = StreamConfig::default().with_blocks(300, 7).validate();
        assert!(matches!(result, Err(EphysError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_latency_below_one_block() {
        let config = StreamConfig::default()
            .with_sample_rate(1000.0)
            .with_latency_ms(10)
            .with_blocks(100, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_channels_and_rate() {
        assert!(StreamConfig::default().with_channels(0).validate().is_err());
        assert!(StreamConfig::default().with_sample_rate(0.0).validate().is_err());
    }

    #[test]
    fn test_rejects_empty_consumer_selection() {
        let result = StreamConfig::from_toml_str("[consumer]\nchannel_count = 0");
        assert!(matches!(result, Err(EphysError::ConfigError(_))));

        let config = StreamConfig::from_toml_str("[consumer]\nchannel_count = 2").unwrap();
        assert_eq!(config.consumer.channel_count, Some(2));
    }

    #[test]
    fn test_invalid_toml() {
        let result = StreamConfig::from_toml_str("[stream]\nchannel_count = \"many\"");
        assert!(matches!(result, Err(EphysError::ConfigError(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = StreamConfig::load("/nonexistent/ephys_ring.toml");
        assert!(matches!(result, Err(EphysError::IOError(_))));
    }
}
