//! End-to-end tests: acquisition thread -> ring -> consumer block -> recording

use ephys_ring::buffer::{GapDetector, StreamStats};
use ephys_ring::record::read_wav;
use ephys_ring::{
    AcquisitionThread, ChannelBlock, SampleRingBuffer, SampleSource, SourceBlock, StreamConfig,
    SyntheticSource, WavFileSource, WavRecorder,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_for<F: Fn() -> bool>(condition: F) {
    let start = Instant::now();
    while !condition() && start.elapsed() < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(1));
    }
}

/// Test a full session configured from TOML with chunked metadata
#[test]
fn test_chunked_session_has_no_gaps() {
    let config = StreamConfig::from_toml_str(
        r#"
        [stream]
        channel_count = 3
        sample_rate = 20000.0
        latency_ms = 500
        block_size = 40
        chunk_size = 8
        event_period = 100

        [consumer]
        block_size = 64
        "#,
    )
    .unwrap();

    let buffer = SampleRingBuffer::new(config.stream.channel_count, config.capacity()).unwrap();
    let stats = Arc::new(StreamStats::new());
    let (writer, mut reader) = buffer.split();
    let thread =
        AcquisitionThread::spawn(SyntheticSource::from_config(&config), writer, Arc::clone(&stats))
            .unwrap();

    let mut block = ChannelBlock::new(3, config.consumer.block_size);
    let mut gaps = GapDetector::new();
    let mut drained = 0usize;
    let mut saw_event = false;

    let start = Instant::now();
    while drained < 2000 && start.elapsed() < Duration::from_secs(5) {
        let count = block.fill_from(&mut reader);
        if count == 0 {
            thread::sleep(Duration::from_millis(1));
            continue;
        }
        stats.record_drain(count);
        assert_eq!(gaps.observe(block.metadata()), None);
        saw_event |= block.event_lines() & 1 == 1;
        drained += count;
    }

    let writer = thread.stop().unwrap();
    assert!(drained >= 2000);
    assert!(saw_event);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.dropped, 0);
    assert_eq!(snapshot.gaps, 0);

    let buffer = SampleRingBuffer::join(writer, reader).unwrap();
    assert_eq!(buffer.channel_count(), 3);
}

/// A stalled consumer causes drops, which later show up as a discontinuity
#[test]
fn test_stalled_consumer_sees_drops_as_gap() {
    let buffer = SampleRingBuffer::new(1, 100).unwrap();
    let stats = Arc::new(StreamStats::new());
    let (writer, mut reader) = buffer.split();

    let source = SyntheticSource::new(1, 10000.0, 20);
    let thread = AcquisitionThread::spawn(source, writer, Arc::clone(&stats)).unwrap();

    // Let the ring fill up and overflow
    wait_for(|| stats.snapshot().dropped > 0);
    assert!(stats.snapshot().dropped > 0);

    let mut block = ChannelBlock::new(1, 128);
    let mut gaps = GapDetector::new();
    assert_eq!(block.fill_from(&mut reader), 100);
    assert_eq!(block.start_sample_number(), 0);
    assert_eq!(gaps.observe(block.metadata()), None);

    // Everything kept was the oldest data; the next slots resume after the drops
    wait_for(|| reader.num_slots() > 0);
    block.fill_from(&mut reader);
    let gap = gaps.observe(block.metadata()).unwrap();
    assert_eq!(gap.expected, 100);
    assert!(gap.missing() > 0);

    thread.stop().unwrap();
}

/// Drained blocks can be recorded and read back
#[test]
fn test_record_session_to_wav() {
    let path = std::env::temp_dir().join("ephys_ring_session_test.wav");

    let buffer = SampleRingBuffer::new(2, 4096).unwrap();
    let stats = Arc::new(StreamStats::new());
    let (writer, mut reader) = buffer.split();
    let thread = AcquisitionThread::spawn(
        SyntheticSource::new(2, 8000.0, 16),
        writer,
        Arc::clone(&stats),
    )
    .unwrap();

    wait_for(|| reader.num_slots() >= 256);
    let writer = thread.stop().unwrap();

    let mut recorder = WavRecorder::create(&path, 2, 8000).unwrap();
    let mut block = ChannelBlock::new(2, 100);
    while block.fill_from(&mut reader) > 0 {
        recorder.write_block(&block).unwrap();
    }
    let frames = recorder.finalize().unwrap();
    assert_eq!(frames, stats.snapshot().written);

    let (samples, sample_rate, channels) = read_wav(&path).unwrap();
    assert_eq!(sample_rate, 8000);
    assert_eq!(channels, 2);
    assert_eq!(samples.len() as u64, frames * 2);
    // Every channel of the synthetic source starts at phase zero
    assert!(samples[0].abs() < 1e-3);
    assert!(samples[1].abs() < 1e-3);

    let _ = std::fs::remove_file(&path);
    assert!(SampleRingBuffer::join(writer, reader).is_ok());
}

/// A recording replays into the ring with its shape, data and numbering
#[test]
fn test_replay_recording_through_ring() {
    let path = std::env::temp_dir().join("ephys_ring_replay_test.wav");

    // Record 500 slots of a 3-channel synthetic stream
    let mut buffer = SampleRingBuffer::new(3, 512).unwrap();
    let mut source = SyntheticSource::new(3, 4000.0, 500);
    let mut source_block = SourceBlock::default();
    source.fill_block(&mut source_block).unwrap();
    assert_eq!(
        buffer.write(&source_block.samples, &source_block.metadata, 500, 1),
        500
    );
    let (_writer, mut reader) = buffer.split();
    let mut block = ChannelBlock::new(3, 512);
    block.fill_from(&mut reader);
    let recorded = block.interleaved();

    let mut recorder = WavRecorder::create(&path, 3, 4000).unwrap();
    recorder.write_block(&block).unwrap();
    assert_eq!(recorder.finalize().unwrap(), 500);
    let (on_disk, _, _) = read_wav(&path).unwrap();

    // Replay it through the acquisition thread into a fresh ring
    let replay = WavFileSource::open(&path, 64).unwrap();
    assert_eq!(replay.channel_count(), 3);
    assert_eq!(replay.sample_rate(), 4000.0);

    let buffer = SampleRingBuffer::new(3, 1024).unwrap();
    let stats = Arc::new(StreamStats::new());
    let (writer, mut reader) = buffer.split();
    let thread = AcquisitionThread::spawn(replay, writer, Arc::clone(&stats)).unwrap();

    // The thread ends by itself once the file is exhausted
    wait_for(|| !thread.is_running());
    assert!(!thread.is_running());
    assert!(thread.last_error().is_none());
    let writer = thread.stop().unwrap();

    let mut replayed = ChannelBlock::new(3, 1024);
    assert_eq!(replayed.fill_from(&mut reader), 500);
    assert_eq!(stats.snapshot().written, 500);
    assert_eq!(stats.snapshot().dropped, 0);

    let mut gaps = GapDetector::new();
    assert_eq!(gaps.observe(replayed.metadata()), None);
    assert_eq!(replayed.start_sample_number(), 0);
    assert_eq!(replayed.metadata()[499].sample_number, 499);
    assert!((replayed.metadata()[400].timestamp - 0.1).abs() < 1e-12);
    assert_eq!(reader.last_sample_number(), 499);

    // Replay is exact against the file and within quantization of the source
    let replayed = replayed.interleaved();
    assert_eq!(replayed, on_disk);
    for (original, replayed) in recorded.iter().zip(replayed.iter()) {
        assert!((original - replayed).abs() < 1e-3);
    }

    let _ = std::fs::remove_file(&path);
    assert!(SampleRingBuffer::join(writer, reader).is_ok());
}

/// The lifecycle owner can reconfigure between sessions
#[test]
fn test_reconfigure_between_sessions() {
    let mut buffer = SampleRingBuffer::new(2, 512).unwrap();

    for channels in [2usize, 5] {
        buffer.resize(channels, 512).unwrap();
        let stats = Arc::new(StreamStats::new());
        let (writer, mut reader) = buffer.split();

        let thread = AcquisitionThread::spawn(
            SyntheticSource::new(channels, 5000.0, 10),
            writer,
            Arc::clone(&stats),
        )
        .unwrap();
        wait_for(|| reader.num_slots() >= 20);
        let writer = thread.stop().unwrap();

        let mut block = ChannelBlock::new(channels, 512);
        assert!(block.fill_from(&mut reader) >= 20);
        assert_eq!(block.start_sample_number(), 0);

        buffer = SampleRingBuffer::join(writer, reader).unwrap();
        assert_eq!(buffer.channel_count(), channels);
    }
}
