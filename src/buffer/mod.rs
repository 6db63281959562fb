//! Sample buffering between acquisition and processing

pub mod block;
pub mod ring;
pub mod stats;

pub use block::ChannelBlock;
pub use ring::{
    JoinError, SampleReader, SampleRingBuffer, SampleWriter, SlotMeta, INITIAL_SAMPLE_NUMBER,
    INITIAL_TIMESTAMP,
};
pub use stats::{GapDetector, SampleGap, StatsSnapshot, StreamStats};
