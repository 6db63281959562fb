//! Acquisition side of the stream: sources and the producer thread

pub mod file;
pub mod source;
pub mod thread;

pub use file::WavFileSource;
pub use source::{SampleSource, SourceBlock, SyntheticSource};
pub use thread::{pump, AcquisitionCommand, AcquisitionThread};
