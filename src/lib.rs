//! Ephys Ring - headless acquisition buffering for multi-channel sample streams
//!
//! The core is [`buffer::SampleRingBuffer`], a bounded single-producer /
//! single-consumer ring that carries per-slot sample numbers, timestamps and
//! event codes alongside the sample data. The remaining modules provide the
//! collaborators around it: acquisition sources (a test signal or a replayed
//! recording) and a producer thread,
//! consumer-side working blocks and stream statistics, WAV recording and
//! TOML configuration.

pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod record;

pub use acquisition::{
    AcquisitionThread, SampleSource, SourceBlock, SyntheticSource, WavFileSource,
};
pub use buffer::{ChannelBlock, SampleReader, SampleRingBuffer, SampleWriter, SlotMeta};
pub use config::StreamConfig;
pub use record::WavRecorder;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EphysError {
    #[error("Allocation error: {0}")]
    AllocationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Recording error: {0}")]
    RecordingError(String),

    #[error("Acquisition error: {0}")]
    AcquisitionError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<std::io::Error> for EphysError {
    fn from(e: std::io::Error) -> Self {
        EphysError::IOError(e.to_string())
    }
}

impl EphysError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // The buffer instance is unusable and must be recreated
            EphysError::AllocationError(_) => false,
            EphysError::ConfigError(_) => false,
            EphysError::IOError(_) => false,
            // A failed block write leaves the recording usable
            EphysError::RecordingError(_) => true,
            // Sources may recover on the next block
            EphysError::AcquisitionError(_) => true,
            EphysError::ChannelError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            EphysError::AllocationError(_) => {
                "Not enough memory for the requested buffer. Reduce channels or latency.".to_string()
            }
            EphysError::ConfigError(_) => {
                "Stream configuration error. Please check settings.".to_string()
            }
            EphysError::IOError(_) => "File system error occurred.".to_string(),
            EphysError::RecordingError(_) => {
                "Recording failed. Data acquisition continues.".to_string()
            }
            EphysError::AcquisitionError(_) => {
                "Data source error. Please check the acquisition device.".to_string()
            }
            EphysError::ChannelError(_) => {
                "Internal communication error. Please restart acquisition.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, EphysError>;
