use crate::error::{LtcError, Result};
use crate::frame::{FrameBits, FRAME_BITS};
use crate::timebase::FrameRate;

// Biphase mark coding on the audio channel
//
// Every bit cell starts with a transition. A `1` has a second transition
// half way through the cell, a `0` does not. Polarity carries nothing, so the
// demodulator only looks at the spacing between transitions:
// - one half-cell gap followed by another: bit 1
// - one full-cell gap: bit 0
//
// Cell length is sample_rate / (fps * 80) samples, which is rarely an
// integer (44.1 kHz at 30 fps gives 18.375). The modulator carries the
// fractional remainder forward so the frame length averages out exactly.

/// Half cells per frame.
const HALF_CELLS: usize = FRAME_BITS * 2;

/// Below this many samples per half cell the edges cannot be timed.
const MIN_SAMPLES_PER_HALF_CELL: f64 = 3.0;

/// Default output amplitude (about -6 dBFS).
pub const DEFAULT_AMPLITUDE: f32 = 0.5;

/// Classification window around the expected interval, as a fraction.
const TIMING_TOLERANCE: f64 = 0.25;

/// Gain of the half-cell length tracker.
const HALF_CELL_TRACKING_GAIN: f64 = 0.05;

/// Comparator hysteresis as a fraction of the tracked envelope.
const HYSTERESIS_RATIO: f32 = 0.25;

/// Comparator never switches on signals smaller than this.
const MIN_HYSTERESIS: f32 = 1e-4;

/// Samples per half bit cell for the given rates.
pub fn samples_per_half_cell(sample_rate: u32, frame_rate: FrameRate) -> Result<f64> {
    let half = sample_rate as f64 / (frame_rate.as_f64() * HALF_CELLS as f64);
    if half < MIN_SAMPLES_PER_HALF_CELL {
        return Err(LtcError::InvalidSampleRate(sample_rate));
    }
    Ok(half)
}

/// Position inside one frame being modulated. Kept separate from the
/// modulator so a frame can be spread across several output buffers.
#[derive(Debug, Clone)]
pub struct FrameCursor {
    bits: FrameBits,
    half: usize,
    remaining: usize,
}

impl FrameCursor {
    pub fn new(bits: FrameBits) -> Self {
        Self {
            bits,
            half: 0,
            remaining: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.half == HALF_CELLS && self.remaining == 0
    }
}

/// Turns frames of bits into a continuous biphase-mark waveform.
#[derive(Debug, Clone)]
pub struct BiphaseModulator {
    samples_per_half: f64,
    amplitude: f32,
    level: bool,
    carry: f64,
}

impl BiphaseModulator {
    pub fn new(sample_rate: u32, frame_rate: FrameRate) -> Result<Self> {
        Ok(Self {
            samples_per_half: samples_per_half_cell(sample_rate, frame_rate)?,
            amplitude: DEFAULT_AMPLITUDE,
            level: false,
            carry: 0.0,
        })
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Upper bound on the samples one frame can produce.
    pub fn max_frame_samples(&self) -> usize {
        (self.samples_per_half * HALF_CELLS as f64).ceil() as usize + 1
    }

    /// Lazily modulate one frame. The waveform continues from wherever the
    /// previous frame left off.
    pub fn modulate(&mut self, bits: &FrameBits) -> FrameSamples<'_> {
        FrameSamples {
            modulator: self,
            cursor: FrameCursor::new(*bits),
        }
    }

    /// Next sample of the frame under `cursor`, or `None` once it is done.
    pub fn next_sample(&mut self, cursor: &mut FrameCursor) -> Option<f32> {
        while cursor.remaining == 0 {
            if cursor.half == HALF_CELLS {
                return None;
            }
            let bit = cursor.bits[cursor.half / 2];
            if cursor.half % 2 == 0 || bit {
                self.level = !self.level;
            }
            self.carry += self.samples_per_half;
            let whole = self.carry.floor();
            self.carry -= whole;
            cursor.remaining = whole as usize;
            cursor.half += 1;
        }
        cursor.remaining -= 1;
        Some(if self.level {
            self.amplitude
        } else {
            -self.amplitude
        })
    }

    /// Forget phase and polarity, as after a restart.
    pub fn reset(&mut self) {
        self.level = false;
        self.carry = 0.0;
    }
}

/// Samples for one frame, produced on demand.
pub struct FrameSamples<'a> {
    modulator: &'a mut BiphaseModulator,
    cursor: FrameCursor,
}

impl Iterator for FrameSamples<'_> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        self.modulator.next_sample(&mut self.cursor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitEvent {
    /// A complete bit cell spanning samples `start..end` of the input.
    Bit { value: bool, start: u64, end: u64 },
    /// Transition timing fell outside both windows; bit alignment is lost.
    Slip,
}

/// Recovers bits from a biphase-mark waveform using transition timing only.
#[derive(Debug, Clone)]
pub struct BiphaseDemodulator {
    nominal_half: f64,
    half: f64,
    dc_alpha: f32,
    envelope_alpha: f32,
    dc: f32,
    envelope: f32,
    level: Option<bool>,
    last_edge: Option<u64>,
    cell_start: Option<u64>,
    position: u64,
    queued: Option<BitEvent>,
}

impl BiphaseDemodulator {
    pub fn new(sample_rate: u32, frame_rate: FrameRate) -> Result<Self> {
        let half = samples_per_half_cell(sample_rate, frame_rate)?;
        let frame_samples = half * HALF_CELLS as f64;
        Ok(Self {
            nominal_half: half,
            half,
            dc_alpha: (1.0 / frame_samples) as f32,
            envelope_alpha: (1.0 / (half * 8.0)) as f32,
            dc: 0.0,
            envelope: 0.0,
            level: None,
            last_edge: None,
            cell_start: None,
            position: 0,
            queued: None,
        })
    }

    /// Samples consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Currently tracked half-cell length in samples.
    pub fn half_cell(&self) -> f64 {
        self.half
    }

    /// Lazily demodulate `samples`. State carries over between calls, so a
    /// stream can be fed one buffer at a time.
    pub fn demodulate<I>(&mut self, samples: I) -> DemodulatedBits<'_, I::IntoIter>
    where
        I: IntoIterator<Item = f32>,
    {
        DemodulatedBits {
            demodulator: self,
            samples: samples.into_iter(),
        }
    }

    /// Drop any partial cell and comparator state.
    pub fn reset(&mut self) {
        self.half = self.nominal_half;
        self.level = None;
        self.last_edge = None;
        self.cell_start = None;
        self.queued = None;
    }

    fn push_sample(&mut self, sample: f32) -> Option<BitEvent> {
        let at = self.position;
        self.position += 1;

        self.dc += (sample - self.dc) * self.dc_alpha;
        let centered = sample - self.dc;
        self.envelope += (centered.abs() - self.envelope) * self.envelope_alpha;
        let threshold = (self.envelope * HYSTERESIS_RATIO).max(MIN_HYSTERESIS);

        let new_level = if centered > threshold {
            true
        } else if centered < -threshold {
            false
        } else {
            return None;
        };

        match self.level {
            Some(level) if level == new_level => None,
            Some(_) => {
                self.level = Some(new_level);
                self.on_edge(at)
            }
            None => {
                self.level = Some(new_level);
                self.last_edge = Some(at);
                None
            }
        }
    }

    fn on_edge(&mut self, at: u64) -> Option<BitEvent> {
        let prev = self.last_edge.replace(at)?;
        let interval = (at - prev) as f64;
        let half = self.half;

        if (interval - half).abs() <= half * TIMING_TOLERANCE {
            self.track(interval);
            match self.cell_start.take() {
                Some(start) => Some(BitEvent::Bit {
                    value: true,
                    start,
                    end: at,
                }),
                None => {
                    self.cell_start = Some(prev);
                    None
                }
            }
        } else if (interval - 2.0 * half).abs() <= 2.0 * half * TIMING_TOLERANCE {
            self.track(interval / 2.0);
            let bit = BitEvent::Bit {
                value: false,
                start: prev,
                end: at,
            };
            if self.cell_start.take().is_some() {
                // a dangling half cell means the pairing of halves was off
                self.queued = Some(bit);
                Some(BitEvent::Slip)
            } else {
                Some(bit)
            }
        } else {
            self.cell_start = None;
            Some(BitEvent::Slip)
        }
    }

    fn track(&mut self, measured_half: f64) {
        self.half += (measured_half - self.half) * HALF_CELL_TRACKING_GAIN;
        self.half = self
            .half
            .clamp(self.nominal_half * 0.5, self.nominal_half * 2.0);
    }
}

/// Bit events recovered from a sample iterator, produced on demand.
pub struct DemodulatedBits<'a, I> {
    demodulator: &'a mut BiphaseDemodulator,
    samples: I,
}

impl<I: Iterator<Item = f32>> Iterator for DemodulatedBits<'_, I> {
    type Item = BitEvent;

    fn next(&mut self) -> Option<BitEvent> {
        if let Some(event) = self.demodulator.queued.take() {
            return Some(event);
        }
        for sample in self.samples.by_ref() {
            if let Some(event) = self.demodulator.push_sample(sample) {
                return Some(event);
            }
        }
        None
    }
}
