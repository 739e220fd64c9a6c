//! Boundary to the playlist controller.
//!
//! The controller is never owned here. Reads go through `PositionSource`,
//! writes are commands pushed into a bounded queue the controller drains at
//! its own safe point.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Where playback is, in one of the two forms LTC can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistPosition {
    /// Time since the start of the playlist.
    Elapsed(Duration),
    /// Entry index plus time into that entry.
    Entry { index: usize, offset: Duration },
}

/// Read-only view of the playlist controller.
pub trait PositionSource {
    /// Time since the start of the playlist.
    fn current_elapsed(&self) -> Duration;

    fn current_index(&self) -> usize;

    /// Start of entry `index` relative to the playlist start, if it exists.
    fn entry_start(&self, index: usize) -> Option<Duration>;

    /// Playlist length, if known.
    fn total_duration(&self) -> Option<Duration> {
        None
    }

    fn playlist_exists(&self, _name: &str) -> bool {
        false
    }

    /// Absolute playlist time for `position`, or `None` when it points past
    /// the end of the playlist or at an entry that does not exist.
    fn resolve(&self, position: &PlaylistPosition) -> Option<Duration> {
        let elapsed = match *position {
            PlaylistPosition::Elapsed(elapsed) => elapsed,
            PlaylistPosition::Entry { index, offset } => self.entry_start(index)? + offset,
        };
        match self.total_duration() {
            Some(total) if elapsed > total => None,
            _ => Some(elapsed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionKind {
    /// Nudge playback toward the target gradually.
    Smooth,
    /// Jump playback straight to the target.
    Jam,
}

/// A position correction command for the playlist controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub kind: CorrectionKind,
    pub target: PlaylistPosition,
    /// Local minus decoded position, in frames, when the command was issued.
    pub drift_frames: i64,
    /// Playlist to switch to before seeking, for jams.
    pub playlist: Option<String>,
}

/// Write side of the correction interface. Must never block.
pub trait CorrectionSink {
    /// Returns false when the command was dropped.
    fn submit(&self, correction: Correction) -> bool;
}

impl<T: CorrectionSink + ?Sized> CorrectionSink for Arc<T> {
    fn submit(&self, correction: Correction) -> bool {
        (**self).submit(correction)
    }
}

/// Called once for every jam correction when resync forwarding is enabled.
/// Implementations must return immediately.
pub trait ResyncNotifier {
    fn notify(&self, correction: &Correction);
}

impl<F: Fn(&Correction)> ResyncNotifier for F {
    fn notify(&self, correction: &Correction) {
        self(correction)
    }
}

/// Bounded correction queue. The sender is handed to the sync engine, the
/// receiver to whatever applies corrections to playback. Submitting never
/// blocks or allocates.
pub fn correction_queue(capacity: usize) -> (CorrectionSender, CorrectionReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (CorrectionSender { tx }, CorrectionReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct CorrectionSender {
    tx: Sender<Correction>,
}

impl CorrectionSink for CorrectionSender {
    fn submit(&self, correction: Correction) -> bool {
        match self.tx.try_send(correction) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("correction queue full, dropping correction");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

#[derive(Debug)]
pub struct CorrectionReceiver {
    rx: Receiver<Correction>,
}

impl CorrectionReceiver {
    pub fn try_recv(&self) -> Option<Correction> {
        self.rx.try_recv().ok()
    }

    /// All pending corrections, oldest first.
    pub fn drain(&self) -> Vec<Correction> {
        self.rx.try_iter().collect()
    }
}

#[derive(Debug, Default)]
struct PlaylistLayout {
    entry_starts: Vec<Duration>,
    total: Option<Duration>,
    playlists: Vec<String>,
}

#[derive(Debug, Default)]
struct ClockInner {
    elapsed_us: AtomicU64,
    index: AtomicUsize,
    layout: RwLock<PlaylistLayout>,
}

/// Playback position published by the playlist controller and read by the
/// audio path. Position reads are wait-free.
#[derive(Debug, Clone, Default)]
pub struct SharedPlaylistClock {
    inner: Arc<ClockInner>,
}

impl SharedPlaylistClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Describe the loaded playlist: entry start times (ascending) and total
    /// length.
    pub fn set_layout(&self, entry_starts: Vec<Duration>, total: Option<Duration>) {
        let mut layout = self.inner.layout.write();
        layout.entry_starts = entry_starts;
        layout.total = total;
    }

    pub fn set_playlists(&self, names: Vec<String>) {
        self.inner.layout.write().playlists = names;
    }

    /// Publish a new playback time; the current index follows from the
    /// layout.
    pub fn set_elapsed(&self, elapsed: Duration) {
        let index = {
            let layout = self.inner.layout.read();
            layout
                .entry_starts
                .iter()
                .rposition(|&start| start <= elapsed)
                .unwrap_or(0)
        };
        self.inner
            .elapsed_us
            .store(elapsed.as_micros() as u64, Ordering::Release);
        self.inner.index.store(index, Ordering::Release);
    }
}

impl PositionSource for SharedPlaylistClock {
    fn current_elapsed(&self) -> Duration {
        Duration::from_micros(self.inner.elapsed_us.load(Ordering::Acquire))
    }

    fn current_index(&self) -> usize {
        self.inner.index.load(Ordering::Acquire)
    }

    fn entry_start(&self, index: usize) -> Option<Duration> {
        let layout = self.inner.layout.read();
        if layout.entry_starts.is_empty() && index == 0 {
            return Some(Duration::ZERO);
        }
        layout.entry_starts.get(index).copied()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.layout.read().total
    }

    fn playlist_exists(&self, name: &str) -> bool {
        self.inner.layout.read().playlists.iter().any(|p| p == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jam(target: PlaylistPosition) -> Correction {
        Correction {
            kind: CorrectionKind::Jam,
            target,
            drift_frames: 0,
            playlist: None,
        }
    }

    #[test]
    fn test_clock_tracks_index_from_layout() {
        let clock = SharedPlaylistClock::new();
        clock.set_layout(
            vec![Duration::ZERO, Duration::from_secs(30), Duration::from_secs(90)],
            Some(Duration::from_secs(120)),
        );
        clock.set_elapsed(Duration::from_secs(45));
        assert_eq!(clock.current_index(), 1);
        assert_eq!(clock.current_elapsed(), Duration::from_secs(45));
        clock.set_elapsed(Duration::from_secs(100));
        assert_eq!(clock.current_index(), 2);
    }

    #[test]
    fn test_resolve_positions() {
        let clock = SharedPlaylistClock::new();
        clock.set_layout(
            vec![Duration::ZERO, Duration::from_secs(30)],
            Some(Duration::from_secs(60)),
        );
        let entry = PlaylistPosition::Entry {
            index: 1,
            offset: Duration::from_secs(5),
        };
        assert_eq!(clock.resolve(&entry), Some(Duration::from_secs(35)));
        let missing = PlaylistPosition::Entry {
            index: 4,
            offset: Duration::ZERO,
        };
        assert_eq!(clock.resolve(&missing), None);
        assert_eq!(
            clock.resolve(&PlaylistPosition::Elapsed(Duration::from_secs(61))),
            None
        );
    }

    #[test]
    fn test_empty_layout_has_single_entry() {
        let clock = SharedPlaylistClock::new();
        assert_eq!(clock.entry_start(0), Some(Duration::ZERO));
        assert_eq!(clock.entry_start(1), None);
    }

    #[test]
    fn test_queue_is_bounded_and_non_blocking() {
        let (tx, rx) = correction_queue(2);
        let target = PlaylistPosition::Elapsed(Duration::from_secs(1));
        assert!(tx.submit(jam(target)));
        assert!(tx.submit(jam(target)));
        assert!(!tx.submit(jam(target)));
        assert_eq!(rx.drain().len(), 2);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_submit_fails_once_receiver_is_gone() {
        let (tx, rx) = correction_queue(2);
        drop(rx);
        assert!(!tx.submit(jam(PlaylistPosition::Elapsed(Duration::ZERO))));
    }

    #[test]
    fn test_playlist_lookup() {
        let clock = SharedPlaylistClock::new();
        clock.set_playlists(vec!["smpte-pl-7".to_string()]);
        assert!(clock.playlist_exists("smpte-pl-7"));
        assert!(!clock.playlist_exists("smpte-pl-8"));
    }
}
