use crate::biphase::{BiphaseModulator, FrameCursor, FrameSamples};
use crate::error::Result;
use crate::frame::{FrameCodec, LtcFrame};
use crate::playlist::{PlaylistPosition, PositionSource};
use crate::timebase::{FrameRate, Timebase};
use std::time::Duration;

/// How far the playlist may wander from the running counter before the
/// output is jam-synced, and how long it may sit still before the output
/// holds. Hosts that publish their position once per audio buffer report a
/// position up to one buffer stale.
pub const POSITION_TOLERANCE: Duration = Duration::from_millis(250);

/// What the encoder did at a frame boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitStep {
    /// Counter moved on by one frame.
    Advance,
    /// Position has not moved (paused); its frame is repeated.
    Hold,
    /// Position jumped; the counter was reset to it.
    Jam,
}

/// Playlist position in, LTC audio out.
///
/// The frame counter advances by one at every frame boundary. The playlist
/// position only steers it on a discontinuity: a position further than
/// [`POSITION_TOLERANCE`] from the counter is emitted at the next boundary as
/// is, with no frames in between, and a position that stays put for longer
/// than the tolerance is repeated until it moves again.
pub struct LtcEncoder {
    timebase: Timebase,
    codec: FrameCodec,
    modulator: BiphaseModulator,
    cursor: Option<FrameCursor>,
    pending_jam: Option<PlaylistPosition>,
    started: bool,
    user_bits: u32,
    tolerance: u64,
    last_target: Option<u64>,
    unchanged: u64,
}

impl LtcEncoder {
    pub fn new(
        sample_rate: u32,
        frame_rate: FrameRate,
        hour_is_playlist_index: bool,
    ) -> Result<Self> {
        let tolerance = (POSITION_TOLERANCE.as_secs_f64() * frame_rate.as_f64()).ceil() as u64;
        Ok(Self {
            timebase: Timebase::new(frame_rate, hour_is_playlist_index),
            codec: FrameCodec::new(frame_rate),
            modulator: BiphaseModulator::new(sample_rate, frame_rate)?,
            cursor: None,
            pending_jam: None,
            started: false,
            user_bits: 0,
            tolerance,
            last_target: None,
            unchanged: 0,
        })
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.modulator = self.modulator.with_amplitude(amplitude);
        self
    }

    pub fn timebase(&self) -> &Timebase {
        &self.timebase
    }

    pub fn set_user_bits(&mut self, user_bits: u32) {
        self.user_bits = user_bits;
    }

    /// Upper bound on samples per frame, for sizing output buffers.
    pub fn max_frame_samples(&self) -> usize {
        self.modulator.max_frame_samples()
    }

    /// Boundaries the position may stay unchanged, or frames it may differ
    /// from the counter, before the output follows it.
    pub fn tolerance_frames(&self) -> u64 {
        self.tolerance
    }

    /// Force the next frame boundary to `position`, whatever the playlist
    /// reports then. A frame already being played out is finished first.
    pub fn jam(&mut self, position: PlaylistPosition) {
        self.pending_jam = Some(position);
    }

    /// Pick the frame for the next boundary.
    pub fn next_frame(&mut self, position: &PlaylistPosition) -> (LtcFrame, EmitStep) {
        let forced = self.pending_jam.take();
        let target = self.timebase.position_count(forced.as_ref().unwrap_or(position));

        if self.last_target == Some(target) {
            self.unchanged += 1;
        } else {
            self.unchanged = 0;
        }
        self.last_target = Some(target);

        let next = self.timebase.successor(self.timebase.current_frame_count());
        let step = if forced.is_some() || !self.started {
            EmitStep::Jam
        } else if self.unchanged > self.tolerance {
            EmitStep::Hold
        } else if self.timebase.drift(target, next).unsigned_abs() > self.tolerance {
            EmitStep::Jam
        } else {
            EmitStep::Advance
        };

        match step {
            EmitStep::Advance => self.timebase.advance(),
            EmitStep::Hold | EmitStep::Jam => {
                self.timebase.jam(target);
                self.started = true;
            }
        }

        let mut frame = self.timebase.current_frame();
        frame.user_bits = self.user_bits;
        if step == EmitStep::Jam {
            log::debug!("LTC output jam-synced to {}", frame);
        }
        (frame, step)
    }

    /// Samples for the frame at `position`, produced on demand.
    pub fn frame_samples(&mut self, position: &PlaylistPosition) -> (FrameSamples<'_>, EmitStep) {
        let (frame, step) = self.next_frame(position);
        let bits = self.codec.encode(&frame);
        (self.modulator.modulate(&bits), step)
    }

    /// Fill `out` with LTC, reading the playlist at every frame boundary.
    /// Never allocates; suitable for an audio callback as long as `source`
    /// does not block.
    pub fn fill<S: PositionSource + ?Sized>(&mut self, source: &S, out: &mut [f32]) {
        for slot in out.iter_mut() {
            loop {
                if let Some(cursor) = self.cursor.as_mut() {
                    if let Some(sample) = self.modulator.next_sample(cursor) {
                        *slot = sample;
                        break;
                    }
                }
                let position = self.timebase.read_position(source);
                let (frame, _) = self.next_frame(&position);
                self.cursor = Some(FrameCursor::new(self.codec.encode(&frame)));
            }
        }
    }

    /// Write out the rest of a partially played frame. Returns the number
    /// of samples written; anything that does not fit is dropped.
    pub fn drain(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0;
        if let Some(mut cursor) = self.cursor.take() {
            for slot in out.iter_mut() {
                match self.modulator.next_sample(&mut cursor) {
                    Some(sample) => {
                        *slot = sample;
                        written += 1;
                    }
                    None => break,
                }
            }
        }
        written
    }

    /// Drop any partial frame and start over from a clean waveform.
    pub fn flush(&mut self) {
        self.cursor = None;
        self.pending_jam = None;
        self.started = false;
        self.last_target = None;
        self.unchanged = 0;
        self.modulator.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_frame(rate: FrameRate, n: u64) -> PlaylistPosition {
        // middle of frame n so floor() lands on it
        let tb = Timebase::new(rate, false);
        PlaylistPosition::Elapsed(tb.duration_from_count(n) + Duration::from_millis(5))
    }

    #[test]
    fn test_first_frame_is_a_jam() {
        let mut encoder = LtcEncoder::new(48_000, FrameRate::Fps30, false).unwrap();
        let (frame, step) = encoder.next_frame(&at_frame(FrameRate::Fps30, 45));
        assert_eq!(step, EmitStep::Jam);
        assert_eq!(frame, LtcFrame::new(0, 0, 1, 15));
    }

    #[test]
    fn test_counter_runs_between_position_updates() {
        let rate = FrameRate::Fps30;
        let mut encoder = LtcEncoder::new(44_100, rate, false).unwrap();
        encoder.next_frame(&at_frame(rate, 100));
        // host publishes its position once every three frames
        for n in 101..130u64 {
            let published = n - n % 3;
            let (_, step) = encoder.next_frame(&at_frame(rate, published));
            assert_eq!(step, EmitStep::Advance, "frame {}", n);
            assert_eq!(encoder.timebase().current_frame_count(), n);
        }
    }

    #[test]
    fn test_small_offsets_do_not_jam() {
        let rate = FrameRate::Fps25;
        let mut encoder = LtcEncoder::new(48_000, rate, false).unwrap();
        encoder.next_frame(&at_frame(rate, 10));
        let tolerance = encoder.tolerance_frames();
        assert_eq!(tolerance, 7);
        let (_, step) = encoder.next_frame(&at_frame(rate, 11 + tolerance));
        assert_eq!(step, EmitStep::Advance);
        assert_eq!(encoder.timebase().current_frame_count(), 11);
    }

    #[test]
    fn test_jump_jams() {
        let rate = FrameRate::Fps25;
        let mut encoder = LtcEncoder::new(48_000, rate, false).unwrap();
        encoder.next_frame(&at_frame(rate, 10));
        encoder.next_frame(&at_frame(rate, 11));
        let (frame, step) = encoder.next_frame(&at_frame(rate, 500));
        assert_eq!(step, EmitStep::Jam);
        assert_eq!(frame, LtcFrame::new(0, 0, 20, 0));
        assert_eq!(encoder.timebase().current_frame_count(), 500);

        // backwards as well
        let (_, step) = encoder.next_frame(&at_frame(rate, 400));
        assert_eq!(step, EmitStep::Jam);
        assert_eq!(encoder.timebase().current_frame_count(), 400);
    }

    #[test]
    fn test_paused_position_holds_then_resumes() {
        let rate = FrameRate::Fps30;
        let mut encoder = LtcEncoder::new(48_000, rate, false).unwrap();
        encoder.next_frame(&at_frame(rate, 60));
        let tolerance = encoder.tolerance_frames();
        for _ in 0..tolerance {
            assert_eq!(encoder.next_frame(&at_frame(rate, 60)).1, EmitStep::Advance);
        }
        for _ in 0..5 {
            let (frame, step) = encoder.next_frame(&at_frame(rate, 60));
            assert_eq!(step, EmitStep::Hold);
            assert_eq!(frame, LtcFrame::new(0, 0, 2, 0));
        }
        assert_eq!(encoder.next_frame(&at_frame(rate, 61)).1, EmitStep::Advance);
        assert_eq!(encoder.timebase().current_frame_count(), 61);
    }

    #[test]
    fn test_forced_jam_wins_over_position() {
        let rate = FrameRate::Fps30;
        let mut encoder = LtcEncoder::new(48_000, rate, false).unwrap();
        encoder.next_frame(&at_frame(rate, 300));
        encoder.jam(PlaylistPosition::Elapsed(Duration::ZERO));
        let (frame, step) = encoder.next_frame(&at_frame(rate, 301));
        assert_eq!(step, EmitStep::Jam);
        assert_eq!(frame, LtcFrame::new(0, 0, 0, 0));
    }

    #[test]
    fn test_user_bits_are_stamped() {
        let mut encoder = LtcEncoder::new(48_000, FrameRate::Fps24, false).unwrap();
        encoder.set_user_bits(0x1234);
        let (frame, _) = encoder.next_frame(&at_frame(FrameRate::Fps24, 3));
        assert_eq!(frame.user_bits, 0x1234);
    }

    #[test]
    fn test_drain_and_flush() {
        let clock = crate::playlist::SharedPlaylistClock::new();
        let mut encoder = LtcEncoder::new(48_000, FrameRate::Fps30, false).unwrap();
        let mut out = vec![0.0f32; 600];
        encoder.fill(&clock, &mut out);
        let mut rest = vec![0.0f32; 2000];
        // 1600 samples per frame at 48 kHz / 30 fps
        assert_eq!(encoder.drain(&mut rest), 1000);
        assert_eq!(encoder.drain(&mut rest), 0);

        encoder.fill(&clock, &mut out);
        encoder.flush();
        assert_eq!(encoder.drain(&mut rest), 0);
    }
}
