use std::sync::mpsc;
use std::time::Duration;

use live_interview::audio::device::AudioBackend;
use live_interview::audio::processing::{rms, AudioFrame, CaptureLine, CaptureSettings, FrameAssembler, MuteFlag, VolumeMeter};
use live_interview::audio::resample::{resample_linear, LineResampler};
use live_interview::mock::MockBackend;

fn settings(frame_len: usize) -> CaptureSettings {
    CaptureSettings {
        sample_rate: 16000,
        frame_len,
        ring_capacity: 16384,
    }
}

#[test]
fn test_phase2_1_assembler_cuts_fixed_frames() {
    let mut assembler = FrameAssembler::new(4096, 16000);
    let mut frames: Vec<AudioFrame> = Vec::new();

    assembler.push(&vec![0.1; 10000], |f| frames.push(f));

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].seq, 0);
    assert_eq!(frames[1].seq, 1);
    assert!(frames.iter().all(|f| f.samples.len() == 4096 && f.sample_rate == 16000));
    assert_eq!(assembler.buffered(), 10000 - 8192, "remainder waits for the next push");

    // Completing the partial frame continues the sequence.
    assembler.push(&vec![0.1; 4096 - 1808], |f| frames.push(f));
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[2].seq, 2);
    assert_eq!(assembler.buffered(), 0);
}

#[test]
fn test_phase2_2_rms_and_meter() {
    assert_eq!(rms(&[]), 0.0);
    assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
    assert!((rms(&[0.5, -0.5]) - 0.5).abs() < 1e-6);

    let meter = VolumeMeter::new();
    assert_eq!(meter.level(), 0.0);
    meter.store(0.42);
    assert_eq!(meter.clone().level(), 0.42, "clones share the level");
}

#[test]
fn test_phase2_3_mute_flag_toggle() {
    let mute = MuteFlag::new();
    assert!(!mute.get());
    assert!(mute.toggle(), "toggle returns the new state");
    assert!(mute.get());
    assert!(!mute.toggle());
    mute.clone().set(true);
    assert!(mute.get());
}

#[test]
fn test_phase2_4_capture_line_delivers_frames_in_order() {
    let backend = MockBackend::new(16000);
    let input = backend.open_input().unwrap();
    let (tx, rx) = mpsc::channel();

    let mut handle = CaptureLine::start(
        input,
        settings(1024),
        MuteFlag::new(),
        VolumeMeter::new(),
        Box::new(move |frame| {
            let _ = tx.send(frame);
        }),
    )
    .unwrap();
    assert!(backend.mic_open());

    assert_eq!(backend.push_mic(&vec![0.25; 3072]), 3072);

    for expected in 0..3u64 {
        let frame = rx.recv_timeout(Duration::from_secs(2)).expect("frame not delivered");
        assert_eq!(frame.seq, expected);
        assert_eq!(frame.samples.len(), 1024);
    }

    handle.stop();
    assert!(!handle.is_running());
    assert_eq!(backend.inputs_closed(), 1);
    assert!(!backend.mic_open());
}

#[test]
fn test_phase2_5_mute_suppresses_forwarding_but_keeps_metering() {
    let backend = MockBackend::new(16000);
    let input = backend.open_input().unwrap();
    let (tx, rx) = mpsc::channel();
    let mute = MuteFlag::new();
    let meter = VolumeMeter::new();
    mute.set(true);

    let mut handle = CaptureLine::start(
        input,
        settings(1024),
        mute.clone(),
        meter.clone(),
        Box::new(move |frame| {
            let _ = tx.send(frame);
        }),
    )
    .unwrap();

    backend.push_mic(&vec![0.5; 1024]);
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err(), "muted frame must not be forwarded");
    assert!((meter.level() - 0.5).abs() < 1e-3, "meter still updates while muted");

    // Unmuting resumes forwarding; the suppressed frame still consumed its seq.
    mute.set(false);
    backend.push_mic(&vec![0.5; 1024]);
    let frame = rx.recv_timeout(Duration::from_secs(2)).expect("frame after unmute");
    assert_eq!(frame.seq, 1);

    handle.stop();
}

#[test]
fn test_phase2_6_stop_is_idempotent() {
    let backend = MockBackend::new(16000);
    let input = backend.open_input().unwrap();

    let mut handle = CaptureLine::start(input, settings(1024), MuteFlag::new(), VolumeMeter::new(), Box::new(|_| {})).unwrap();
    handle.stop();
    handle.stop();
    drop(handle);

    assert_eq!(backend.inputs_opened(), 1);
    assert_eq!(backend.inputs_closed(), 1, "device released exactly once");
}

#[test]
fn test_phase2_7_line_resampler() {
    let mut same = LineResampler::new(16000, 16000).unwrap();
    assert!(same.is_passthrough());
    let mut out = Vec::new();
    same.process(&[0.1, 0.2, 0.3], &mut out);
    assert_eq!(out, vec![0.1, 0.2, 0.3]);

    let mut down = LineResampler::new(48000, 16000).unwrap();
    assert!(!down.is_passthrough());
    let mut out = Vec::new();
    down.process(&vec![0.0; 4096 * 6], &mut out);
    let expected = 4096 * 2;
    assert!(
        (out.len() as i64 - expected as i64).abs() < 64,
        "48k -> 16k produced {} samples, expected about {}",
        out.len(),
        expected
    );
}

#[test]
fn test_phase2_8_linear_resample_lengths() {
    let src = vec![0.5f32; 16000];
    assert_eq!(resample_linear(&src, 16000, 24000).len(), 24000);
    assert_eq!(resample_linear(&src, 16000, 16000).len(), 16000);
    assert!(resample_linear(&[], 16000, 24000).is_empty());

    let ramp: Vec<f32> = (0..4).map(|i| i as f32).collect();
    let up = resample_linear(&ramp, 1, 2);
    assert_eq!(up.len(), 8);
    assert!((up[1] - 0.5).abs() < 1e-6, "midpoint is interpolated");
}
