use crate::biphase::{BiphaseDemodulator, BitEvent};
use crate::error::{FrameError, Result};
use crate::frame::{bits_from_register, FrameCodec, LtcFrame, FRAME_BITS, SYNC_PATTERN};
use crate::timebase::FrameRate;
use arraydeque::{ArrayDeque, Wrapping};

/// Results buffered between `write` and `read`. Oldest entries are dropped
/// when the reader falls behind.
pub const DECODE_QUEUE_SIZE: usize = 32;

pub type DecodeResult = std::result::Result<DecodedFrame, FrameError>;

/// A frame recovered from the input, with the sample range it occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame {
    pub frame: LtcFrame,
    pub start_sample: u64,
    pub end_sample: u64,
}

/// Audio in, LTC frames out.
///
/// Bits from the demodulator are shifted through an 80-bit register; a frame
/// is decoded whenever the last 16 bits match the sync word, so the stream
/// can start anywhere and realigns by itself after dropouts.
pub struct LtcDecoder {
    sample_rate: u32,
    demodulator: BiphaseDemodulator,
    codec: FrameCodec,
    register: u128,
    bit_starts: [u64; FRAME_BITS],
    bits_seen: u64,
    aligned_bits: usize,
    bits_since_sync: usize,
    queue: ArrayDeque<DecodeResult, DECODE_QUEUE_SIZE, Wrapping>,
    dropped: u64,
}

impl LtcDecoder {
    pub fn new(sample_rate: u32, frame_rate: FrameRate) -> Result<Self> {
        Ok(Self {
            sample_rate,
            demodulator: BiphaseDemodulator::new(sample_rate, frame_rate)?,
            codec: FrameCodec::new(frame_rate),
            register: 0,
            bit_starts: [0; FRAME_BITS],
            bits_seen: 0,
            aligned_bits: 0,
            bits_since_sync: 0,
            queue: ArrayDeque::new(),
            dropped: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.codec.frame_rate()
    }

    /// Samples consumed since creation.
    pub fn position(&self) -> u64 {
        self.demodulator.position()
    }

    /// Results lost because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Feed one buffer of samples. Never allocates.
    pub fn write(&mut self, samples: &[f32]) {
        let Self {
            demodulator,
            codec,
            register,
            bit_starts,
            bits_seen,
            aligned_bits,
            bits_since_sync,
            queue,
            dropped,
            ..
        } = self;

        for event in demodulator.demodulate(samples.iter().copied()) {
            let (value, start, end) = match event {
                BitEvent::Bit { value, start, end } => (value, start, end),
                BitEvent::Slip => {
                    *aligned_bits = 0;
                    continue;
                }
            };

            *register = (*register >> 1) | ((value as u128) << (FRAME_BITS - 1));
            bit_starts[(*bits_seen % FRAME_BITS as u64) as usize] = start;
            *bits_seen += 1;
            *aligned_bits = (*aligned_bits + 1).min(FRAME_BITS);

            let result = if (*register >> 64) as u16 == SYNC_PATTERN {
                *bits_since_sync = 0;
                if *aligned_bits < FRAME_BITS {
                    // sync word seen before a full frame was collected
                    continue;
                }
                let first = (*bits_seen % FRAME_BITS as u64) as usize;
                codec
                    .decode(&bits_from_register(*register))
                    .map(|frame| DecodedFrame {
                        frame,
                        start_sample: bit_starts[first],
                        end_sample: end,
                    })
            } else {
                *bits_since_sync += 1;
                if *bits_since_sync < FRAME_BITS {
                    continue;
                }
                *bits_since_sync = 0;
                Err(FrameError::BadSyncWord)
            };

            if queue.push_back(result).is_some() {
                *dropped += 1;
            }
        }
    }

    /// Next buffered result, oldest first.
    pub fn read(&mut self) -> Option<DecodeResult> {
        self.queue.pop_front()
    }

    /// Decode a whole recording at once.
    pub fn decode(&mut self, samples: &[f32]) -> Vec<DecodeResult> {
        let mut results = Vec::new();
        for chunk in samples.chunks(DECODE_QUEUE_SIZE * 64) {
            self.write(chunk);
            while let Some(result) = self.read() {
                results.push(result);
            }
        }
        results
    }

    /// Discard partial bits and anything not yet read.
    pub fn reset(&mut self) {
        self.demodulator.reset();
        self.register = 0;
        self.aligned_bits = 0;
        self.bits_since_sync = 0;
        self.queue.clear();
    }
}
