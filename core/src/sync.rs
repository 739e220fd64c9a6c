use crate::error::FrameError;
use crate::frame::LtcFrame;
use crate::playlist::{
    Correction, CorrectionKind, CorrectionSink, PositionSource, ResyncNotifier,
};
use crate::timebase::{FrameRate, Timebase};
use std::fmt;
use std::time::Duration;

/// Prefix of the playlist a sender selects through its user bits.
pub const USER_BITS_PLAYLIST_PREFIX: &str = "smpte-pl-";

/// How confident the receiver is that it is following a real LTC stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No usable frames.
    Unlocked,
    /// Valid frames seen but not yet continuous.
    Acquiring,
    /// Following a continuous stream; corrections are issued.
    Locked,
    /// Was locked, frames stopped arriving.
    Lost,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockState::Unlocked => "unlocked",
            LockState::Acquiring => "acquiring",
            LockState::Locked => "locked",
            LockState::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// Drift and timeout limits for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncThresholds {
    /// Drift up to this many frames is jitter and left alone.
    pub small_drift_frames: u64,
    /// Drift up to this is corrected smoothly; beyond it playback jumps.
    pub large_drift: Duration,
    /// Without a valid frame for this long a lock is considered lost.
    pub loss_threshold: Duration,
    /// Time spent lost before giving up and going back to unlocked.
    pub unlock_threshold: Duration,
    /// Quiet period after a correction so it can take effect.
    pub correction_holdoff: Duration,
}

impl Default for SyncThresholds {
    fn default() -> Self {
        Self {
            small_drift_frames: 1,
            large_drift: Duration::from_secs(1),
            loss_threshold: Duration::from_secs(2),
            unlock_threshold: Duration::from_secs(2),
            correction_holdoff: Duration::from_millis(500),
        }
    }
}

/// Outcome of feeding one decoded frame to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Not locked yet, or the frame broke continuity.
    None,
    /// Inside a correction holdoff.
    Holdoff,
    /// Drift within the jitter band.
    InSync,
    Smooth,
    Jam,
    /// The correction could not be delivered or pointed outside the playlist.
    Rejected,
}

/// Compares decoded timecode against local playback and issues corrections.
///
/// Times passed in are stream times, i.e. sample positions converted to
/// durations, so the engine behaves the same offline and live.
pub struct SyncEngine {
    timebase: Timebase,
    thresholds: SyncThresholds,
    state: LockState,
    previous: Option<u64>,
    last_valid_at: Option<Duration>,
    lost_at: Option<Duration>,
    holdoff_until: Option<Duration>,
    default_playlist: Option<String>,
    resend_multisync: bool,
    frame_errors: u64,
    sink: Box<dyn CorrectionSink + Send>,
    notifier: Option<Box<dyn ResyncNotifier + Send>>,
}

impl SyncEngine {
    pub fn new(
        frame_rate: FrameRate,
        hour_is_playlist_index: bool,
        thresholds: SyncThresholds,
        sink: Box<dyn CorrectionSink + Send>,
    ) -> Self {
        Self {
            timebase: Timebase::new(frame_rate, hour_is_playlist_index),
            thresholds,
            state: LockState::Unlocked,
            previous: None,
            last_valid_at: None,
            lost_at: None,
            holdoff_until: None,
            default_playlist: None,
            resend_multisync: false,
            frame_errors: 0,
            sink,
            notifier: None,
        }
    }

    /// Playlist to start on jams when the sender's user bits do not name one.
    pub fn with_default_playlist(mut self, playlist: Option<String>) -> Self {
        self.default_playlist = playlist;
        self
    }

    /// Forward every jam to `notifier`, e.g. to re-send multisync.
    pub fn with_resync(mut self, notifier: Box<dyn ResyncNotifier + Send>) -> Self {
        self.resend_multisync = true;
        self.notifier = Some(notifier);
        self
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn timebase(&self) -> &Timebase {
        &self.timebase
    }

    /// Frame errors seen since creation.
    pub fn frame_errors(&self) -> u64 {
        self.frame_errors
    }

    /// Feed a decoded frame that finished arriving at `at`.
    pub fn on_frame<S: PositionSource + ?Sized>(
        &mut self,
        frame: &LtcFrame,
        at: Duration,
        source: &S,
    ) -> SyncAction {
        self.poll(at);

        let count = self.timebase.frame_count(frame);
        let continuous = self
            .previous
            .is_some_and(|previous| self.timebase.successor(previous) == count);
        self.previous = Some(count);
        self.last_valid_at = Some(at);

        match self.state {
            LockState::Unlocked | LockState::Lost => {
                self.set_state(LockState::Acquiring);
                SyncAction::None
            }
            LockState::Acquiring if continuous => {
                self.set_state(LockState::Locked);
                self.evaluate(frame, count, at, source)
            }
            LockState::Locked if continuous => self.evaluate(frame, count, at, source),
            LockState::Locked => {
                log::debug!("LTC discontinuity at {}, waiting for continuity", frame);
                SyncAction::None
            }
            LockState::Acquiring => SyncAction::None,
        }
    }

    /// Note a frame that failed to decode at `at`.
    pub fn on_error(&mut self, error: FrameError, at: Duration) {
        self.frame_errors += 1;
        log::debug!("LTC frame error: {}", error);
        self.poll(at);
    }

    /// Apply timeouts up to `now`. Call periodically even when no frames
    /// arrive.
    pub fn poll(&mut self, now: Duration) {
        match self.state {
            LockState::Locked | LockState::Acquiring => {
                let silent = self
                    .last_valid_at
                    .map_or(Duration::ZERO, |last| now.saturating_sub(last));
                if silent > self.thresholds.loss_threshold {
                    self.previous = None;
                    if self.state == LockState::Locked {
                        self.lost_at = Some(now);
                        self.set_state(LockState::Lost);
                    } else {
                        self.set_state(LockState::Unlocked);
                    }
                }
            }
            LockState::Lost => {
                let lost_for = self
                    .lost_at
                    .map_or(Duration::ZERO, |lost| now.saturating_sub(lost));
                if lost_for > self.thresholds.unlock_threshold {
                    self.set_state(LockState::Unlocked);
                }
            }
            LockState::Unlocked => {}
        }
    }

    /// Back to unlocked with no history.
    pub fn reset(&mut self) {
        self.state = LockState::Unlocked;
        self.previous = None;
        self.last_valid_at = None;
        self.lost_at = None;
        self.holdoff_until = None;
    }

    fn evaluate<S: PositionSource + ?Sized>(
        &mut self,
        frame: &LtcFrame,
        count: u64,
        at: Duration,
        source: &S,
    ) -> SyncAction {
        if self.holdoff_until.is_some_and(|until| at < until) {
            return SyncAction::Holdoff;
        }

        // the frame describes its own start; by the time it is decoded the
        // sender has moved on by one frame
        let arrived = self.timebase.successor(count);
        let local = self.timebase.read_position(source);
        let expected = self.timebase.position_count(&local);
        let drift = self.timebase.drift(expected, arrived);
        let magnitude = drift.unsigned_abs();

        if magnitude <= self.thresholds.small_drift_frames {
            return SyncAction::InSync;
        }
        let large = self.timebase.count_from_duration(self.thresholds.large_drift);
        let kind = if magnitude <= large {
            CorrectionKind::Smooth
        } else {
            CorrectionKind::Jam
        };

        let mut reached = self.timebase.frame_from_count(arrived);
        reached.user_bits = frame.user_bits;
        let target = self.timebase.to_position(&reached);

        if kind == CorrectionKind::Jam && source.resolve(&target).is_none() {
            log::warn!(
                "LTC position {} is outside the playlist, ignoring until it is valid again",
                reached
            );
            self.previous = None;
            self.set_state(LockState::Unlocked);
            return SyncAction::Rejected;
        }

        let playlist = match kind {
            CorrectionKind::Jam => self.playlist_for(frame.user_bits, source),
            CorrectionKind::Smooth => None,
        };
        let correction = Correction {
            kind,
            target,
            drift_frames: drift,
            playlist,
        };

        if !self.sink.submit(correction.clone()) {
            log::warn!("LTC correction to {} was not accepted", reached);
            return SyncAction::Rejected;
        }
        self.holdoff_until = Some(at + self.thresholds.correction_holdoff);

        match kind {
            CorrectionKind::Smooth => SyncAction::Smooth,
            CorrectionKind::Jam => {
                log::debug!("LTC jam to {} (drift {} frames)", reached, drift);
                if self.resend_multisync {
                    if let Some(notifier) = &self.notifier {
                        notifier.notify(&correction);
                    }
                }
                SyncAction::Jam
            }
        }
    }

    fn playlist_for<S: PositionSource + ?Sized>(
        &self,
        user_bits: u32,
        source: &S,
    ) -> Option<String> {
        let name = format!("{}{}", USER_BITS_PLAYLIST_PREFIX, user_bits);
        if source.playlist_exists(&name) {
            Some(name)
        } else {
            self.default_playlist.clone()
        }
    }

    fn set_state(&mut self, state: LockState) {
        if self.state == state {
            return;
        }
        match state {
            LockState::Lost => log::warn!("LTC input {} -> {}", self.state, state),
            _ => log::info!("LTC input {} -> {}", self.state, state),
        }
        self.state = state;
    }
}
