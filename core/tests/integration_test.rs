// ============================================================================
// INTEGRATION TESTS
// ============================================================================
// Full emit -> audio -> receive paths. Signals are rendered with the encoder,
// optionally degraded, then fed through the decoder and sync engine in
// host-sized buffers.
// ============================================================================

use ltcsync_core::config::ChannelConfig;
use ltcsync_core::playlist::CorrectionReceiver;
use ltcsync_core::{
    correction_queue, CorrectionKind, FrameRate, HostMode, LockState, LtcConfig, LtcDecoder,
    LtcEncoder, LtcFrame, LtcPlugin, PlaylistEvent, PlaylistPosition, SharedPlaylistClock,
    Timebase,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use std::time::Duration;

const BUFFER: usize = 480;

/// Render frames `first..=first + frames` as one continuous signal. The last
/// frame only closes the one before it.
fn render(rate: FrameRate, sample_rate: u32, first: u64, frames: u64) -> Vec<f32> {
    let timebase = Timebase::new(rate, false);
    let mut encoder = LtcEncoder::new(sample_rate, rate, false).expect("Failed to create encoder");
    let mut samples = Vec::new();
    for n in first..=first + frames {
        let position = PlaylistPosition::Elapsed(
            timebase.duration_from_count(n) + Duration::from_micros(100),
        );
        let (frame_samples, _) = encoder.frame_samples(&position);
        samples.extend(frame_samples);
    }
    samples
}

fn decode_counts(rate: FrameRate, sample_rate: u32, samples: &[f32]) -> Vec<u64> {
    let timebase = Timebase::new(rate, false);
    let mut decoder = LtcDecoder::new(sample_rate, rate).expect("Failed to create decoder");
    decoder
        .decode(samples)
        .into_iter()
        .filter_map(|r| r.ok())
        .map(|d| timebase.frame_count(&d.frame))
        .collect()
}

fn remote_plugin(rate: FrameRate, sample_rate: u32) -> (LtcPlugin, CorrectionReceiver) {
    let (tx, rx) = correction_queue(16);
    let mut config = LtcConfig::default();
    config.input = ChannelConfig {
        enabled: true,
        device: "test".to_string(),
        frame_rate: rate,
        sample_rate,
    };
    let mut plugin = LtcPlugin::new(config, HostMode::Remote).with_corrections(Arc::new(tx));
    plugin.enable().expect("Failed to enable input");
    (plugin, rx)
}

// ----------------------------------------------------------------------------
// Round trips
// ----------------------------------------------------------------------------

#[test]
fn test_round_trip_all_rates() {
    for sample_rate in [44_100, 48_000, 96_000] {
        for rate in FrameRate::ALL {
            let samples = render(rate, sample_rate, 1_790, 40);
            let counts = decode_counts(rate, sample_rate, &samples);
            assert_eq!(
                counts,
                (1_790..1_830).collect::<Vec<_>>(),
                "round trip failed at {} fps, {} Hz",
                rate,
                sample_rate
            );
        }
    }
}

#[test]
fn test_drop_frame_labels_skip() {
    let samples = render(FrameRate::Fps2997, 48_000, 1_797, 6);
    let mut decoder =
        LtcDecoder::new(48_000, FrameRate::Fps2997).expect("Failed to create decoder");
    let labels: Vec<String> = decoder
        .decode(&samples)
        .into_iter()
        .filter_map(|r| r.ok())
        .map(|d| d.frame.to_string())
        .collect();
    assert_eq!(
        labels,
        vec![
            "00:00:59;27",
            "00:00:59;28",
            "00:00:59;29",
            "00:01:00;02",
            "00:01:00;03",
            "00:01:00;04",
        ]
    );
}

#[test]
fn test_tenth_minute_keeps_all_labels() {
    // 00:09:59;29 is frame 17981, the next label is 00:10:00;00
    let samples = render(FrameRate::Fps2997, 48_000, 17_980, 3);
    let mut decoder =
        LtcDecoder::new(48_000, FrameRate::Fps2997).expect("Failed to create decoder");
    let frames: Vec<LtcFrame> = decoder
        .decode(&samples)
        .into_iter()
        .filter_map(|r| r.ok())
        .map(|d| d.frame)
        .collect();
    assert_eq!(frames[1].to_string(), "00:09:59;29");
    assert_eq!(frames[2].to_string(), "00:10:00;00");
}

#[test]
fn test_user_bits_survive_the_channel() {
    let mut encoder =
        LtcEncoder::new(48_000, FrameRate::Fps25, false).expect("Failed to create encoder");
    encoder.set_user_bits(0xCAFE_0042);
    let mut samples = Vec::new();
    for n in 0..4u64 {
        let position = PlaylistPosition::Elapsed(Duration::from_millis(40 * n + 1));
        samples.extend(encoder.frame_samples(&position).0);
    }
    let mut decoder = LtcDecoder::new(48_000, FrameRate::Fps25).expect("Failed to create decoder");
    let decoded: Vec<_> = decoder.decode(&samples).into_iter().filter_map(|r| r.ok()).collect();
    assert_eq!(decoded.len(), 3);
    assert!(decoded.iter().all(|d| d.frame.user_bits == 0xCAFE_0042));
}

// ----------------------------------------------------------------------------
// Degraded signals
// ----------------------------------------------------------------------------

#[test]
fn test_decodes_through_gaussian_noise() {
    let mut samples = render(FrameRate::Fps30, 48_000, 0, 60);
    let mut rng = StdRng::seed_from_u64(7);
    let noise = Normal::new(0.0f32, 0.05).expect("Failed to create distribution");
    for sample in samples.iter_mut() {
        *sample += noise.sample(&mut rng);
    }
    let counts = decode_counts(FrameRate::Fps30, 48_000, &samples);
    assert_eq!(counts, (0..60).collect::<Vec<_>>());
}

#[test]
fn test_decodes_with_dc_offset_and_low_level() {
    let samples: Vec<f32> = render(FrameRate::Fps24, 44_100, 500, 24)
        .into_iter()
        .map(|s| s * 0.2 + 0.2)
        .collect();
    let counts = decode_counts(FrameRate::Fps24, 44_100, &samples);
    // the comparator needs a few cells to settle on the new DC level
    assert!(counts.len() >= 20, "only {} frames decoded", counts.len());
    assert!(counts.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(*counts.last().unwrap(), 523);
}

#[test]
fn test_noise_never_locks() {
    let (mut plugin, rx) = remote_plugin(FrameRate::Fps30, 48_000);
    let clock = SharedPlaylistClock::new();
    let mut rng = StdRng::seed_from_u64(42);
    let noise = Normal::new(0.0f32, 0.3).expect("Failed to create distribution");
    let mut buffer = vec![0.0f32; BUFFER];
    // ten seconds of noise
    for _ in 0..1_000 {
        for sample in buffer.iter_mut() {
            *sample = noise.sample(&mut rng);
        }
        plugin.process_input(&buffer, &clock).expect("Failed to process input");
        assert_ne!(plugin.lock_state(), Some(LockState::Locked));
    }
    assert!(rx.drain().is_empty());
}

// ----------------------------------------------------------------------------
// Emit pipeline
// ----------------------------------------------------------------------------

/// Run the output for `buffers` buffers with the clock set just past the end
/// of each buffer, starting the playlist at `start`.
fn emit(
    plugin: &mut LtcPlugin,
    clock: &SharedPlaylistClock,
    sample_rate: u32,
    start: Duration,
    buffers: usize,
    written: &mut Vec<f32>,
) {
    let lookahead = Duration::from_millis(2);
    let mut buffer = vec![0.0f32; BUFFER];
    for _ in 0..buffers {
        let end = Duration::from_secs_f64((written.len() + BUFFER) as f64 / sample_rate as f64);
        clock.set_elapsed(start + end + lookahead);
        plugin.process_output(clock, &mut buffer).expect("Failed to process output");
        written.extend_from_slice(&buffer);
    }
}

fn player_plugin(rate: FrameRate, sample_rate: u32, index_mode: bool) -> LtcPlugin {
    let mut config = LtcConfig::default();
    config.output = ChannelConfig {
        enabled: true,
        device: "test".to_string(),
        frame_rate: rate,
        sample_rate,
    };
    config.hour_is_playlist_index = index_mode;
    let mut plugin = LtcPlugin::new(config, HostMode::Player);
    plugin.enable().expect("Failed to enable output");
    plugin
}

#[test]
fn test_output_follows_running_clock() {
    for rate in FrameRate::ALL {
        let mut plugin = player_plugin(rate, 48_000, false);
        let clock = SharedPlaylistClock::new();
        let mut written = Vec::new();
        // four seconds of playback from one minute in
        emit(&mut plugin, &clock, 48_000, Duration::from_secs(60), 400, &mut written);

        let counts = decode_counts(rate, 48_000, &written);
        assert!(counts.len() > 90, "{} fps: only {} frames", rate, counts.len());
        assert!(
            counts.windows(2).all(|w| w[1] == w[0] + 1),
            "{} fps: output not continuous: {:?}",
            rate,
            counts
        );
        let first = Timebase::new(rate, false).count_from_duration(Duration::from_secs(60));
        assert!(counts[0] >= first && counts[0] <= first + 1);
    }
}

#[test]
fn test_output_continuous_with_large_buffers() {
    let sample_rate = 44_100;
    for buffer_len in [2_048, 4_096] {
        for rate in FrameRate::ALL {
            let mut plugin = player_plugin(rate, sample_rate, false);
            let clock = SharedPlaylistClock::new();
            let start = Duration::from_secs(60);
            let mut buffer = vec![0.0f32; buffer_len];
            let mut written = Vec::new();
            while written.len() < 4 * sample_rate as usize {
                // position published once per callback, as of its first sample
                let now = written.len() as f64 / sample_rate as f64;
                clock.set_elapsed(start + Duration::from_secs_f64(now));
                plugin.process_output(&clock, &mut buffer).expect("Failed to process output");
                written.extend_from_slice(&buffer);
            }

            let counts = decode_counts(rate, sample_rate, &written);
            assert!(
                counts.len() > 90,
                "{} fps, {} samples: only {} frames",
                rate,
                buffer_len,
                counts.len()
            );
            let breaks = counts.windows(2).filter(|w| w[1] != w[0] + 1).count();
            assert_eq!(
                breaks, 0,
                "{} fps, {} samples: output not continuous: {:?}",
                rate, buffer_len, counts
            );
        }
    }
}

#[test]
fn test_paused_clock_repeats_frame() {
    let mut plugin = player_plugin(FrameRate::Fps25, 48_000, false);
    let clock = SharedPlaylistClock::new();
    clock.set_elapsed(Duration::from_secs(5));
    let mut written = vec![0.0f32; 2 * 48_000];
    plugin.process_output(&clock, &mut written).expect("Failed to process output");
    let counts = decode_counts(FrameRate::Fps25, 48_000, &written);
    assert!(counts.len() >= 45);
    // runs on for a quarter second before it treats the clock as paused
    assert!(counts.iter().all(|&c| (125..=132).contains(&c)), "{:?}", counts);
    let held = &counts[counts.len() - 30..];
    assert!(held.iter().all(|&c| c == 125), "{:?}", counts);
}

#[test]
fn test_entry_change_jams_output_in_index_mode() {
    let sample_rate = 48_000;
    let rate = FrameRate::Fps30;
    let mut plugin = player_plugin(rate, sample_rate, true);
    let clock = SharedPlaylistClock::new();
    let entry_starts = vec![
        Duration::ZERO,
        Duration::from_secs(60),
        Duration::from_secs(120),
        Duration::from_secs(180),
    ];
    clock.set_layout(entry_starts, Some(Duration::from_secs(240)));

    // entry 1, ten seconds in
    let mut written = Vec::new();
    emit(&mut plugin, &clock, sample_rate, Duration::from_secs(70), 50, &mut written);

    // entry 3 starts
    clock.set_elapsed(Duration::from_secs(180));
    plugin.playlist_event(PlaylistEvent::EntryStarted { index: 3 }, &clock);
    let switched_at = written.len();
    // boundaries fall on multiples of 1600 samples at 30 fps / 48 kHz
    let boundary = switched_at.div_ceil(1_600) * 1_600;
    let mut buffer = vec![0.0f32; BUFFER];
    for _ in 0..50 {
        let end = written.len() + BUFFER;
        let since = end.saturating_sub(boundary) as f64 / sample_rate as f64;
        clock.set_elapsed(Duration::from_secs(180) + Duration::from_secs_f64(since));
        plugin.process_output(&clock, &mut buffer).expect("Failed to process output");
        written.extend_from_slice(&buffer);
    }

    let mut decoder = LtcDecoder::new(sample_rate, rate).expect("Failed to create decoder");
    let frames: Vec<LtcFrame> = decoder
        .decode(&written)
        .into_iter()
        .filter_map(|r| r.ok())
        .map(|d| d.frame)
        .collect();
    let switch = frames
        .iter()
        .position(|f| f.hours == 3)
        .expect("entry 3 never appeared");
    assert_eq!(frames[switch - 1].hours, 1);
    assert_eq!(frames[switch - 1].seconds, 10);
    assert_eq!(frames[switch], LtcFrame::new(3, 0, 0, 0));
    assert_eq!(frames[switch + 1], LtcFrame::new(3, 0, 0, 1));
    assert!(frames[switch..].iter().all(|f| f.hours == 3));
}

// ----------------------------------------------------------------------------
// Receive pipeline
// ----------------------------------------------------------------------------

/// Feed `signal` to a remote plugin whose local playlist starts at
/// `local_start`. Corrections are applied by jumping the local clock.
fn chase(
    signal: &[f32],
    sample_rate: u32,
    rate: FrameRate,
    local_start: Duration,
) -> (Vec<ltcsync_core::Correction>, LtcPlugin) {
    let (mut plugin, rx) = remote_plugin(rate, sample_rate);
    let clock = SharedPlaylistClock::new();
    let mut origin = local_start.as_secs_f64();
    let mut corrections = Vec::new();
    let mut consumed = 0usize;
    for chunk in signal.chunks(BUFFER) {
        consumed += chunk.len();
        let end = consumed as f64 / sample_rate as f64;
        clock.set_elapsed(Duration::from_secs_f64(origin + end));
        plugin.process_input(chunk, &clock).expect("Failed to process input");
        for correction in rx.drain() {
            if let PlaylistPosition::Elapsed(target) = correction.target {
                origin = target.as_secs_f64() - end;
            }
            corrections.push(correction);
        }
    }
    (corrections, plugin)
}

#[test]
fn test_in_sync_chase_issues_nothing() {
    let signal = render(FrameRate::Fps30, 48_000, 1_800, 150);
    let (corrections, plugin) = chase(&signal, 48_000, FrameRate::Fps30, Duration::from_secs(60));
    assert!(corrections.is_empty(), "unexpected corrections: {:?}", corrections);
    assert_eq!(plugin.lock_state(), Some(LockState::Locked));
}

#[test]
fn test_large_offset_jams_once() {
    // sender is at one minute, local playback at zero
    let signal = render(FrameRate::Fps30, 48_000, 1_800, 150);
    let (corrections, plugin) = chase(&signal, 48_000, FrameRate::Fps30, Duration::ZERO);
    assert_eq!(corrections.len(), 1, "corrections: {:?}", corrections);
    assert_eq!(corrections[0].kind, CorrectionKind::Jam);
    assert!((-1_802..=-1_800).contains(&corrections[0].drift_frames));
    assert_eq!(plugin.lock_state(), Some(LockState::Locked));
}

#[test]
fn test_small_offset_corrects_smoothly() {
    let rate = FrameRate::Fps25;
    let signal = render(rate, 48_000, 250, 100);
    // local playback ten frames ahead
    let local = Duration::from_secs(10) + Duration::from_millis(400);
    let (corrections, _) = chase(&signal, 48_000, rate, local);
    assert_eq!(corrections.len(), 1, "corrections: {:?}", corrections);
    assert_eq!(corrections[0].kind, CorrectionKind::Smooth);
    assert!((9..=11).contains(&corrections[0].drift_frames));
}

#[test]
fn test_drop_frame_chase_stays_locked() {
    let rate = FrameRate::Fps2997;
    // crosses the label skip at 00:01:00
    let start = 1_700;
    let signal = render(rate, 48_000, start, 200);
    let local = Timebase::new(rate, false).duration_from_count(start);
    let (corrections, plugin) = chase(&signal, 48_000, rate, local);
    assert!(corrections.is_empty(), "unexpected corrections: {:?}", corrections);
    assert_eq!(plugin.lock_state(), Some(LockState::Locked));
}
