//! Producer thread
//!
//! Drives a [`SampleSource`] at its block rate and writes each block into the
//! ring. Stopping the thread hands the [`SampleWriter`] back to the owner so
//! the buffer can be re-joined and reconfigured.

use super::source::{SampleSource, SourceBlock};
use crate::buffer::{SampleWriter, StreamStats};
use crate::{EphysError, Result};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Commands that can be sent to the acquisition thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionCommand {
    /// Finish the current block and exit
    Stop,
}

/// Run one acquisition callback: fill a block from the source and write it.
///
/// Returns the number of slots the ring accepted; anything short of
/// `block.item_count` was dropped and is counted in `stats`.
pub fn pump<S: SampleSource + ?Sized>(
    source: &mut S,
    writer: &mut SampleWriter,
    block: &mut SourceBlock,
    stats: &StreamStats,
) -> Result<usize> {
    source.fill_block(block)?;

    let accepted = writer.write(
        &block.samples,
        &block.metadata,
        block.item_count,
        block.chunk_size,
    );
    stats.record_write(block.item_count, accepted);

    if accepted < block.item_count {
        warn!(
            "Sample buffer full: dropped {} of {} slots",
            block.item_count - accepted,
            block.item_count
        );
    }

    Ok(accepted)
}

/// Handle to a running producer thread
pub struct AcquisitionThread {
    command_tx: Sender<AcquisitionCommand>,
    handle: Option<JoinHandle<SampleWriter>>,
    is_running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
    last_error: Arc<Mutex<Option<EphysError>>>,
}

impl AcquisitionThread {
    /// Start pumping `source` into `writer` once per block interval
    ///
    /// # Errors
    /// Returns `ConfigError` if the source and buffer disagree on channel
    /// count or the source has no usable rate, and `AcquisitionError` if the
    /// thread cannot be spawned
    pub fn spawn<S: SampleSource + 'static>(
        mut source: S,
        mut writer: SampleWriter,
        stats: Arc<StreamStats>,
    ) -> Result<Self> {
        if source.channel_count() != writer.channel_count() {
            return Err(EphysError::ConfigError(format!(
                "Source has {} channel(s) but the buffer holds {}",
                source.channel_count(),
                writer.channel_count()
            )));
        }
        let sample_rate = source.sample_rate();
        if !sample_rate.is_finite() || sample_rate <= 0.0 || source.block_size() == 0 {
            return Err(EphysError::ConfigError(
                "Source needs a positive sample rate and block size".to_string(),
            ));
        }

        let interval = Duration::from_secs_f64(source.block_size() as f64 / source.sample_rate());
        let (command_tx, command_rx) = bounded(4);
        let is_running = Arc::new(AtomicBool::new(true));
        let last_error = Arc::new(Mutex::new(None));

        let thread_running = Arc::clone(&is_running);
        let thread_stats = Arc::clone(&stats);
        let thread_error = Arc::clone(&last_error);

        info!(
            "Starting acquisition: {} channel(s) at {}Hz, {} slots every {:?}",
            source.channel_count(),
            source.sample_rate(),
            source.block_size(),
            interval
        );

        let handle = thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || {
                let mut block = SourceBlock::with_capacity(
                    source.channel_count(),
                    source.block_size(),
                    1,
                );
                let mut deadline = Instant::now();

                loop {
                    deadline += interval;
                    let wait = deadline.saturating_duration_since(Instant::now());

                    match command_rx.recv_timeout(wait) {
                        Ok(AcquisitionCommand::Stop) => {
                            debug!("Acquisition thread received stop");
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            debug!("Acquisition control channel closed");
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                    }

                    if let Err(e) = pump(&mut source, &mut writer, &mut block, &thread_stats) {
                        let recoverable = e.is_recoverable();
                        *thread_error.lock() = Some(e.clone());
                        if recoverable {
                            warn!("Acquisition block failed: {}", e);
                        } else {
                            error!("Acquisition stopped: {}", e);
                            break;
                        }
                    }

                    if source.is_exhausted() {
                        info!("Acquisition source exhausted");
                        break;
                    }
                }

                thread_running.store(false, Ordering::SeqCst);
                writer
            })
            .map_err(|e| {
                EphysError::AcquisitionError(format!("Failed to spawn acquisition thread: {}", e))
            })?;

        Ok(Self {
            command_tx,
            handle: Some(handle),
            is_running,
            stats,
            last_error,
        })
    }

    /// Stop the thread and take back the writer
    ///
    /// # Errors
    /// Returns `AcquisitionError` if the thread panicked; the writer is lost
    /// and the buffer must be recreated
    pub fn stop(mut self) -> Result<SampleWriter> {
        self.shutdown()
            .ok_or_else(|| EphysError::AcquisitionError("Acquisition thread already joined".into()))?
    }

    /// Check if the thread is still producing
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Shared counters for this stream
    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }

    /// Most recent error reported by the source, if any
    pub fn last_error(&self) -> Option<EphysError> {
        self.last_error.lock().clone()
    }

    fn shutdown(&mut self) -> Option<Result<SampleWriter>> {
        let handle = self.handle.take()?;
        // The thread may already have exited on a source error
        let _ = self.command_tx.send(AcquisitionCommand::Stop);

        let result = handle.join().map_err(|_| {
            EphysError::AcquisitionError("Acquisition thread panicked".to_string())
        });
        self.is_running.store(false, Ordering::SeqCst);

        if result.is_ok() {
            info!("Acquisition stopped: {}", self.stats.snapshot().summary());
        }
        Some(result)
    }
}

impl Drop for AcquisitionThread {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
