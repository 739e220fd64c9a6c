use crate::error::{LtcError, Result};
use crate::frame::LtcFrame;
use crate::playlist::{PlaylistPosition, PositionSource};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

// Drop-frame bookkeeping at 29.97: two labels are skipped every minute except
// every tenth, so ten minutes hold 17982 frames instead of 18000.
const DF_FRAMES_PER_10_MIN: u64 = 17_982;
const DF_FRAMES_PER_MIN: u64 = 1_798;

/// Timecode frame rates supported on the LTC channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameRate {
    Fps24,
    Fps25,
    /// 30000/1001 fps, always drop-frame.
    Fps2997,
    Fps30,
}

impl FrameRate {
    pub const ALL: [FrameRate; 4] = [
        FrameRate::Fps24,
        FrameRate::Fps25,
        FrameRate::Fps2997,
        FrameRate::Fps30,
    ];

    /// Frame labels per second (30 for 29.97).
    pub const fn nominal(self) -> u8 {
        match self {
            FrameRate::Fps24 => 24,
            FrameRate::Fps25 => 25,
            FrameRate::Fps2997 | FrameRate::Fps30 => 30,
        }
    }

    pub const fn is_drop_frame(self) -> bool {
        matches!(self, FrameRate::Fps2997)
    }

    /// Exact frames-per-second as `(numerator, denominator)`.
    pub const fn ratio(self) -> (u64, u64) {
        match self {
            FrameRate::Fps24 => (24, 1),
            FrameRate::Fps25 => (25, 1),
            FrameRate::Fps2997 => (30_000, 1_001),
            FrameRate::Fps30 => (30, 1),
        }
    }

    pub fn as_f64(self) -> f64 {
        let (num, den) = self.ratio();
        num as f64 / den as f64
    }

    pub const fn frames_per_hour(self) -> u64 {
        if self.is_drop_frame() {
            DF_FRAMES_PER_10_MIN * 6
        } else {
            self.nominal() as u64 * 3600
        }
    }

    pub const fn frames_per_day(self) -> u64 {
        self.frames_per_hour() * 24
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameRate::Fps24 => "24",
            FrameRate::Fps25 => "25",
            FrameRate::Fps2997 => "29.97",
            FrameRate::Fps30 => "30",
        };
        f.write_str(s)
    }
}

impl FromStr for FrameRate {
    type Err = LtcError;

    fn from_str(s: &str) -> Result<Self> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| LtcError::InvalidFrameRate(s.to_string()))?;
        FrameRate::ALL
            .into_iter()
            .find(|rate| (rate.as_f64() - value).abs() < 0.01)
            .ok_or_else(|| LtcError::InvalidFrameRate(s.to_string()))
    }
}

/// Frame counter and position/timecode conversions for one LTC channel.
///
/// Frame counts are the number of frames since 00:00:00:00 and are always
/// contiguous; drop-frame label skipping only happens when converting to and
/// from `LtcFrame` fields.
#[derive(Debug, Clone)]
pub struct Timebase {
    frame_rate: FrameRate,
    hour_is_playlist_index: bool,
    current_frame_count: u64,
}

impl Timebase {
    pub fn new(frame_rate: FrameRate, hour_is_playlist_index: bool) -> Self {
        Self {
            frame_rate,
            hour_is_playlist_index,
            current_frame_count: 0,
        }
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    pub fn hour_is_playlist_index(&self) -> bool {
        self.hour_is_playlist_index
    }

    pub fn current_frame_count(&self) -> u64 {
        self.current_frame_count
    }

    pub fn current_frame(&self) -> LtcFrame {
        self.frame_from_count(self.current_frame_count)
    }

    /// Step the free-running counter by one frame, wrapping at 24 hours.
    pub fn advance(&mut self) {
        self.current_frame_count = self.successor(self.current_frame_count);
    }

    /// Reset the counter to an authoritative frame count.
    pub fn jam(&mut self, frame_count: u64) {
        self.current_frame_count = frame_count % self.frame_rate.frames_per_day();
    }

    pub fn successor(&self, frame_count: u64) -> u64 {
        (frame_count + 1) % self.frame_rate.frames_per_day()
    }

    /// Signed distance `expected - actual` in frames, taking the shorter way
    /// around the 24 hour wrap.
    pub fn drift(&self, expected: u64, actual: u64) -> i64 {
        let day = self.frame_rate.frames_per_day() as i64;
        let mut diff = (expected as i64 - actual as i64) % day;
        if diff > day / 2 {
            diff -= day;
        } else if diff < -day / 2 {
            diff += day;
        }
        diff
    }

    /// Number of whole frames elapsed in `duration`. Floors, so a fractional
    /// rate never reports a frame boundary before it is reached.
    pub fn count_from_duration(&self, duration: Duration) -> u64 {
        let (num, den) = self.frame_rate.ratio();
        (duration.as_nanos() * num as u128 / (den as u128 * NANOS_PER_SEC)) as u64
    }

    /// Start time of frame `count`.
    pub fn duration_from_count(&self, count: u64) -> Duration {
        let (num, den) = self.frame_rate.ratio();
        let nanos = (count as u128 * den as u128 * NANOS_PER_SEC).div_ceil(num as u128);
        Duration::from_nanos(nanos as u64)
    }

    pub fn frame_from_count(&self, count: u64) -> LtcFrame {
        let rate = self.frame_rate;
        let mut n = count % rate.frames_per_day();
        if rate.is_drop_frame() {
            let tens = n / DF_FRAMES_PER_10_MIN;
            let rem = n % DF_FRAMES_PER_10_MIN;
            n += 18 * tens;
            if rem > 1 {
                n += 2 * ((rem - 2) / DF_FRAMES_PER_MIN);
            }
        }
        let base = rate.nominal() as u64;
        LtcFrame {
            hours: ((n / (base * 3600)) % 24) as u8,
            minutes: ((n / (base * 60)) % 60) as u8,
            seconds: ((n / base) % 60) as u8,
            frames: (n % base) as u8,
            drop_frame: rate.is_drop_frame(),
            ..LtcFrame::default()
        }
    }

    pub fn frame_count(&self, frame: &LtcFrame) -> u64 {
        let rate = self.frame_rate;
        let base = rate.nominal() as u64;
        let hours = frame.hours as u64;
        let minutes = frame.minutes as u64;
        let seconds = (hours * 3600 + minutes * 60 + frame.seconds as u64) * base;
        let mut n = seconds + frame.frames as u64;
        if rate.is_drop_frame() {
            let total_minutes = hours * 60 + minutes;
            n = n.saturating_sub(2 * (total_minutes - total_minutes / 10));
        }
        n
    }

    /// Timecode for a playlist position.
    pub fn to_frame(&self, position: &PlaylistPosition) -> LtcFrame {
        match *position {
            PlaylistPosition::Elapsed(elapsed) => {
                self.frame_from_count(self.count_from_duration(elapsed))
            }
            PlaylistPosition::Entry { index, offset } => {
                let within = self.count_from_duration(offset) % self.frame_rate.frames_per_hour();
                let mut frame = self.frame_from_count(within);
                frame.hours = (index % 24) as u8;
                frame
            }
        }
    }

    /// Playlist position a decoded timecode points at.
    pub fn to_position(&self, frame: &LtcFrame) -> PlaylistPosition {
        if self.hour_is_playlist_index {
            let within = LtcFrame { hours: 0, ..*frame };
            PlaylistPosition::Entry {
                index: frame.hours as usize,
                offset: self.duration_from_count(self.frame_count(&within)),
            }
        } else {
            PlaylistPosition::Elapsed(self.duration_from_count(self.frame_count(frame)))
        }
    }

    /// Read the controller's current position in the form this timebase
    /// encodes.
    pub fn read_position<S: PositionSource + ?Sized>(&self, source: &S) -> PlaylistPosition {
        let elapsed = source.current_elapsed();
        if self.hour_is_playlist_index {
            let index = source.current_index();
            let start = source.entry_start(index).unwrap_or_default();
            PlaylistPosition::Entry {
                index,
                offset: elapsed.saturating_sub(start),
            }
        } else {
            PlaylistPosition::Elapsed(elapsed)
        }
    }

    pub fn position_count(&self, position: &PlaylistPosition) -> u64 {
        self.frame_count(&self.to_frame(position))
    }
}
