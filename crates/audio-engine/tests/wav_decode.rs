use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use audio_engine::decode::{DecodeOutcome, DecodeSession};
use audio_engine::source::ByteSource;
use audio_engine::{AudioFormat, FileTrack, PlaybackBuffer, SampleFormat, Track};
use symphonia::core::probe::Hint;

fn write_sine(dir: &Path, name: &str, rate: u32, channels: u16, seconds: f32) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let frames = (rate as f32 * seconds) as u32;
    for i in 0..frames {
        let t = i as f32 / rate as f32;
        let v = ((t * 440.0 * std::f32::consts::TAU).sin() * 0.5 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(v).unwrap();
        }
    }
    writer.finalize().unwrap();
    path
}

/// Block until the decode worker has stopped producing.
fn wait_decoded(buffer: &PlaybackBuffer) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !(buffer.is_full() || buffer.limit() < buffer.capacity() || buffer.has_error()) {
        assert!(Instant::now() < deadline, "decode did not finish");
        thread::sleep(Duration::from_millis(5));
    }
}

fn read_all(buffer: &PlaybackBuffer) -> Vec<u8> {
    let mut out = vec![0u8; buffer.limit()];
    let mut filled = 0;
    while filled < out.len() {
        let n = buffer.read(&mut out[filled..]);
        assert!(n > 0, "read stalled at {filled}");
        filled += n;
    }
    out
}

fn decode_with(track: &FileTrack, format: AudioFormat) -> Arc<PlaybackBuffer> {
    let buffer = track.start_decoding(&format).unwrap();
    assert!(buffer.wait_for_data());
    wait_decoded(&buffer);
    assert!(!buffer.has_error());
    buffer
}

#[test]
fn session_reports_duration_and_decodes_to_the_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sine(dir.path(), "tone.wav", 44_100, 2, 0.5);

    let mut hint = Hint::new();
    hint.with_extension("wav");
    let mut session = DecodeSession::open(ByteSource::open(&path).unwrap(), &hint).unwrap();
    assert_eq!(session.duration(), Some(Duration::from_millis(500)));
    let info = session.source_info();
    assert_eq!(info.codec.as_deref(), Some("PCM_S16"));
    assert_eq!(info.sample_rate, Some(44_100));

    let mut frames = 0usize;
    let outcome = session
        .run(|buf| {
            frames += buf.frames();
            Ok(true)
        })
        .unwrap();
    assert_eq!(outcome, DecodeOutcome::EndOfStream);
    assert_eq!(frames, 22_050);
}

#[test]
fn session_stops_when_the_callback_declines() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sine(dir.path(), "tone.wav", 44_100, 1, 1.0);
    let mut session = DecodeSession::open(ByteSource::open(&path).unwrap(), &Hint::new()).unwrap();
    let outcome = session.run(|_| Ok(false)).unwrap();
    assert_eq!(outcome, DecodeOutcome::Cancelled);
}

#[test]
fn mono_file_is_duplicated_into_stereo_at_the_same_rate() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sine(dir.path(), "mono.wav", 48_000, 1, 0.25);
    let track = FileTrack::new(&path);
    let format = AudioFormat::native(48_000, 2, SampleFormat::Signed16);

    let buffer = decode_with(&track, format);
    assert_eq!(buffer.capacity(), 12_000 * 4);
    assert_eq!(buffer.duration(), Duration::from_millis(250));

    let bytes = read_all(&buffer);
    let mut reader = hound::WavReader::open(&path).unwrap();
    let source: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    for (frame, expected) in bytes.chunks_exact(4).zip(&source).take(2_000) {
        let left = format.decode_sample(&frame[..2]);
        let right = format.decode_sample(&frame[2..]);
        assert_eq!(left, right);
        let got = (left * i16::MAX as f32).round() as i32;
        assert!((got - i32::from(*expected)).abs() <= 1, "{got} vs {expected}");
    }
    assert!(buffer.is_finished());
}

#[test]
fn resamples_to_the_device_rate() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sine(dir.path(), "cd.wav", 44_100, 2, 0.5);
    let track = FileTrack::new(&path).with_chunk_frames(512);
    let format = AudioFormat::native(48_000, 2, SampleFormat::Float32);

    let buffer = decode_with(&track, format);
    assert_eq!(buffer.capacity(), 24_000 * format.bytes_per_frame());
    // The sinc filter delay may trim the tail; the bulk must be there.
    assert!(buffer.limit() > buffer.capacity() * 9 / 10);

    let bytes = read_all(&buffer);
    let peak = bytes
        .chunks_exact(4)
        .map(|s| format.decode_sample(s).abs())
        .fold(0.0f32, f32::max);
    assert!(peak > 0.4 && peak < 0.6, "peak {peak}");
}

#[test]
fn duration_limit_truncates_the_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sine(dir.path(), "long.wav", 48_000, 2, 1.0);
    let track = FileTrack::new(&path);
    track.set_duration_limit(Some(Duration::from_millis(100)));
    let format = AudioFormat::native(48_000, 2, SampleFormat::Signed16);

    let buffer = decode_with(&track, format);
    assert_eq!(buffer.duration(), Duration::from_millis(100));
    assert!(buffer.is_full());
}

#[test]
fn seek_before_sizing_starts_mid_track() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sine(dir.path(), "tone.wav", 48_000, 2, 1.0);
    let track = FileTrack::new(&path);
    let format = AudioFormat::native(48_000, 2, SampleFormat::Signed16);

    let buffer = track.start_decoding(&format).unwrap();
    buffer.seek_to(Duration::from_millis(500));
    assert!(buffer.wait_for_data());
    wait_decoded(&buffer);
    assert_eq!(buffer.position(), Duration::from_millis(500));
}
