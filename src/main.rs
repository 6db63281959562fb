use anyhow::{anyhow, Context, Result};
use ephys_ring::buffer::{GapDetector, StreamStats};
use ephys_ring::{
    AcquisitionThread, ChannelBlock, SampleReader, SampleRingBuffer, SampleSource, StreamConfig,
    SyntheticSource, WavFileSource, WavRecorder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ephys_ring=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ephys-ring acquisition");

    let config = match std::env::args().nth(1) {
        Some(path) => StreamConfig::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => StreamConfig::default(),
    };

    match &config.run.replay_path {
        Some(path) => {
            let source = WavFileSource::open(path, config.stream.block_size)?;
            // The recording decides the stream shape
            let config = config
                .clone()
                .with_channels(source.channel_count())
                .with_sample_rate(source.sample_rate());
            run(&config, source)
        }
        None => run(&config, SyntheticSource::from_config(&config)),
    }
}

fn run<S: SampleSource + 'static>(config: &StreamConfig, source: S) -> Result<()> {
    let buffer = SampleRingBuffer::new(config.stream.channel_count, config.capacity())?;
    let stats = Arc::new(StreamStats::new());

    let (writer, mut reader) = buffer.split();
    let thread = AcquisitionThread::spawn(source, writer, Arc::clone(&stats))?;

    let consumer = &config.consumer;
    let dest_channels = consumer.channel_offset
        + consumer
            .channel_count
            .unwrap_or(config.stream.channel_count)
            .min(config.stream.channel_count);
    let mut block = ChannelBlock::new(dest_channels, consumer.block_size);
    let mut gaps = GapDetector::new();

    let mut recorder = match &config.run.record_path {
        Some(path) => Some(WavRecorder::create(
            path,
            dest_channels,
            config.stream.sample_rate.round() as u32,
        )?),
        None => None,
    };

    let run_for = Duration::from_millis(config.run.duration_ms);
    let started = Instant::now();
    let mut last_report = started;

    while started.elapsed() < run_for {
        std::thread::sleep(config.consumer_interval());
        consume(config, &mut reader, &mut block, &mut gaps, &stats, recorder.as_mut())?;

        if last_report.elapsed() >= Duration::from_secs(1) {
            info!("{}", stats.snapshot().summary());
            last_report = Instant::now();
        }

        if !thread.is_running() {
            match thread.last_error() {
                Some(e) => warn!("Acquisition ended early: {}", e),
                None => info!("Acquisition finished"),
            }
            break;
        }
    }

    let writer = thread.stop()?;

    // Drain what the producer left behind
    while consume(config, &mut reader, &mut block, &mut gaps, &stats, recorder.as_mut())? > 0 {}

    if let Some(recorder) = recorder {
        recorder.finalize()?;
    }

    let snapshot = stats.snapshot();
    info!("Session complete: {}", snapshot.summary());

    // Reconfigure for a longer buffer now that both sides are idle
    let mut buffer = SampleRingBuffer::join(writer, reader).map_err(|e| anyhow!("{}", e))?;
    buffer.resize(config.stream.channel_count, config.capacity() * 2)?;
    info!(
        "Buffer ready for next session: {} channel(s), {} slots",
        buffer.channel_count(),
        buffer.capacity()
    );

    Ok(())
}

/// One processing callback: drain, check continuity, record
fn consume(
    config: &StreamConfig,
    reader: &mut SampleReader,
    block: &mut ChannelBlock,
    gaps: &mut GapDetector,
    stats: &StreamStats,
    recorder: Option<&mut WavRecorder>,
) -> Result<usize> {
    let count = block.fill_channels_from(
        reader,
        config.consumer.channel_offset,
        config.consumer.channel_count,
    );
    if count == 0 {
        return Ok(0);
    }

    stats.record_drain(count);

    if let Some(gap) = gaps.observe(block.metadata()) {
        warn!(
            "Sample discontinuity: expected {}, found {} ({} missing)",
            gap.expected,
            gap.found,
            gap.missing()
        );
        stats.record_gap(gap);
    }

    if let Some(recorder) = recorder {
        recorder.write_block(block)?;
    }

    Ok(count)
}
