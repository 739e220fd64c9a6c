use crate::{wav, CliError};
use ltcsync_core::playlist::CorrectionSink;
use ltcsync_core::{
    Correction, CorrectionKind, FrameRate, HostMode, LtcConfig, LtcDecoder, LtcFrame, LtcPlugin,
    PositionSource, SharedPlaylistClock, Timebase,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// How hard a smooth correction bends playback speed, as a fraction of real
/// time.
const SLEW_RATE: f64 = 0.5;

const COMMAND_QUEUE: usize = 16;

enum PlaylistCommand {
    /// Stream time moved on to `now`; `done` fires once the clock shows it.
    Tick { now: Duration, done: oneshot::Sender<()> },
    Correct(Correction),
}

/// Hands corrections to the simulated playlist without waiting.
struct PlaylistSink {
    tx: mpsc::Sender<PlaylistCommand>,
}

impl CorrectionSink for PlaylistSink {
    fn submit(&self, correction: Correction) -> bool {
        match self.tx.try_send(PlaylistCommand::Correct(correction)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("playlist busy, correction dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Local playback: a clock running at stream speed from `origin`, moved by
/// corrections whenever the playlist task gets to them.
struct SimulatedPlaylist {
    clock: SharedPlaylistClock,
    timebase: Timebase,
    origin: f64,
    slew: f64,
    now: f64,
    applied: Vec<Correction>,
}

impl SimulatedPlaylist {
    fn new(clock: SharedPlaylistClock, timebase: Timebase, origin: f64) -> Self {
        Self {
            clock,
            timebase,
            origin,
            slew: 0.0,
            now: 0.0,
            applied: Vec::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<PlaylistCommand>) -> Self {
        while let Some(command) = rx.recv().await {
            match command {
                PlaylistCommand::Tick { now, done } => {
                    let now = now.as_secs_f64();
                    let limit = (now - self.now) * SLEW_RATE;
                    let step = self.slew.clamp(-limit, limit);
                    self.origin += step;
                    self.slew -= step;
                    self.now = now;
                    self.publish();
                    let _ = done.send(());
                }
                PlaylistCommand::Correct(correction) => self.apply(correction),
            }
        }
        self
    }

    fn apply(&mut self, correction: Correction) {
        let Some(target) = self.clock.resolve(&correction.target) else {
            tracing::warn!("correction target {:?} is not in the playlist", correction.target);
            return;
        };
        let local = self.origin + self.now;
        let offset = target.as_secs_f64() - local;
        let label = self.timebase.frame_from_count(self.timebase.count_from_duration(target));
        match correction.kind {
            CorrectionKind::Jam => {
                self.origin += offset;
                self.slew = 0.0;
                self.publish();
                match &correction.playlist {
                    Some(playlist) => println!(
                        "jam to {} in playlist {:?} (drift {} frames)",
                        label, playlist, correction.drift_frames
                    ),
                    None => println!("jam to {} (drift {} frames)", label, correction.drift_frames),
                }
            }
            CorrectionKind::Smooth => {
                self.slew = offset;
                println!("smooth toward {} (drift {} frames)", label, correction.drift_frames);
            }
        }
        self.applied.push(correction);
    }

    fn publish(&self) {
        let elapsed = (self.origin + self.now).max(0.0);
        self.clock.set_elapsed(Duration::from_secs_f64(elapsed));
    }
}

/// First frame in the recording and the time it starts.
fn first_frame(samples: &[f32], sample_rate: u32, rate: FrameRate) -> Option<(LtcFrame, f64)> {
    let mut decoder = LtcDecoder::new(sample_rate, rate).ok()?;
    for chunk in samples.chunks(4096) {
        decoder.write(chunk);
        while let Some(result) = decoder.read() {
            if let Ok(decoded) = result {
                return Some((decoded.frame, decoded.start_sample as f64 / sample_rate as f64));
            }
        }
    }
    None
}

pub async fn chase_command(
    input: &Path,
    settings: Option<&Path>,
    fps: Option<FrameRate>,
    offset: f64,
    index_mode: bool,
) -> Result<(), CliError> {
    let audio = wav::read(input)?;
    let mut config = match settings {
        Some(path) => LtcConfig::from_settings_text(&std::fs::read_to_string(path)?)?,
        None => LtcConfig::default(),
    };
    if let Some(fps) = fps {
        config.input.frame_rate = fps;
    }
    config.hour_is_playlist_index |= index_mode;
    config.input.enabled = true;
    config.input.device = input.display().to_string();
    config.input.sample_rate = audio.sample_rate;

    let rate = config.input.frame_rate;
    let timebase = Timebase::new(rate, config.hour_is_playlist_index);
    let clock = SharedPlaylistClock::new();
    if config.hour_is_playlist_index {
        // one entry per hour so every index the hours field can carry exists
        clock.set_layout((0..24).map(|h| Duration::from_secs(h * 3600)).collect(), None);
    }

    let (frame, frame_start) = first_frame(&audio.samples, audio.sample_rate, rate)
        .ok_or_else(|| CliError::NoTimecode(input.to_path_buf()))?;
    let frame_elapsed = clock
        .resolve(&timebase.to_position(&frame))
        .unwrap_or_default()
        .as_secs_f64();
    let sender_origin = frame_elapsed - frame_start;
    tracing::info!(
        "incoming timecode starts at {}, local playback offset {:+.3} s",
        frame,
        offset
    );

    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let plugin = LtcPlugin::new(config, HostMode::Remote)
        .with_corrections(Arc::new(PlaylistSink { tx: tx.clone() }))
        .shared();
    plugin.lock().enable()?;

    let playlist = SimulatedPlaylist::new(clock.clone(), timebase, sender_origin + offset);
    let playlist = tokio::spawn(playlist.run(rx));

    // ten millisecond buffers, like an audio callback
    let buffer = (audio.sample_rate / 100).max(1) as usize;
    let mut consumed = 0usize;
    for chunk in audio.samples.chunks(buffer) {
        consumed += chunk.len();
        let now = Duration::from_secs_f64(consumed as f64 / audio.sample_rate as f64);
        let (done, ticked) = oneshot::channel();
        if tx.send(PlaylistCommand::Tick { now, done }).await.is_err() {
            break;
        }
        let _ = ticked.await;
        plugin.lock().process_input(chunk, &clock)?;
    }

    let state = plugin.lock().lock_state();
    plugin.lock().disable();
    drop(plugin);
    drop(tx);
    let playlist = playlist.await?;

    let end = consumed as f64 / audio.sample_rate as f64;
    let residual = clock.current_elapsed().as_secs_f64() - (sender_origin + end);
    let jams = playlist
        .applied
        .iter()
        .filter(|c| c.kind == CorrectionKind::Jam)
        .count();
    println!(
        "Applied {} corrections ({} jam, {} smooth), final state: {}",
        playlist.applied.len(),
        jams,
        playlist.applied.len() - jams,
        state.map_or_else(|| "disabled".to_string(), |s| s.to_string())
    );
    println!(
        "Residual offset: {:+.1} frames ({:+.1} ms)",
        residual * rate.as_f64(),
        residual * 1000.0
    );
    Ok(())
}
