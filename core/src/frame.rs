use crate::error::FrameError;
use crate::timebase::FrameRate;

/// Bits per LTC frame.
pub const FRAME_BITS: usize = 80;

/// One LTC frame in transmission order (bit 0 is sent first).
pub type FrameBits = [bool; FRAME_BITS];

/// Sync word occupying bits 64..80, in transmission order.
pub const SYNC_BITS: [bool; 16] = [
    false, false, true, true, true, true, true, true, true, true, true, true, true, true, false,
    true,
];

/// `SYNC_BITS` packed with transmission bit `j` at bit `j`.
pub const SYNC_PATTERN: u16 = 0xBFFC;

const SYNC_START: usize = 64;

// Field offsets in the 80-bit word, each value LSB first
const FRAME_UNITS: usize = 0;
const FRAME_TENS: usize = 8;
const DROP_FRAME_FLAG: usize = 10;
const COLOR_FRAME_FLAG: usize = 11;
const SECOND_UNITS: usize = 16;
const SECOND_TENS: usize = 24;
const MINUTE_UNITS: usize = 32;
const MINUTE_TENS: usize = 40;
const HOUR_UNITS: usize = 48;
const HOUR_TENS: usize = 56;
const USER_GROUPS: [usize; 8] = [4, 12, 20, 28, 36, 44, 52, 60];

/// Decoded contents of one LTC frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LtcFrame {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
    pub drop_frame: bool,
    pub color_frame: bool,
    /// Eight 4-bit binary groups, group 1 in the lowest nibble.
    pub user_bits: u32,
}

impl LtcFrame {
    pub fn new(hours: u8, minutes: u8, seconds: u8, frames: u8) -> Self {
        Self {
            hours,
            minutes,
            seconds,
            frames,
            ..Self::default()
        }
    }
}

impl std::fmt::Display for LtcFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sep = if self.drop_frame { ';' } else { ':' };
        write!(
            f,
            "{:02}:{:02}:{:02}{}{:02}",
            self.hours, self.minutes, self.seconds, sep, self.frames
        )
    }
}

/// Packs and unpacks the standard 80-bit SMPTE LTC layout.
///
/// The only rate-dependent part of the layout is the position of the
/// polarity correction bit, which moves from bit 27 to bit 59 at 25 fps.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    frame_rate: FrameRate,
}

impl FrameCodec {
    pub fn new(frame_rate: FrameRate) -> Self {
        Self { frame_rate }
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    fn polarity_bit(&self) -> usize {
        if self.frame_rate == FrameRate::Fps25 {
            59
        } else {
            27
        }
    }

    pub fn encode(&self, frame: &LtcFrame) -> FrameBits {
        let mut bits = [false; FRAME_BITS];

        put(&mut bits, FRAME_UNITS, 4, frame.frames % 10);
        put(&mut bits, FRAME_TENS, 2, frame.frames / 10);
        bits[DROP_FRAME_FLAG] = frame.drop_frame;
        bits[COLOR_FRAME_FLAG] = frame.color_frame;
        put(&mut bits, SECOND_UNITS, 4, frame.seconds % 10);
        put(&mut bits, SECOND_TENS, 3, frame.seconds / 10);
        put(&mut bits, MINUTE_UNITS, 4, frame.minutes % 10);
        put(&mut bits, MINUTE_TENS, 3, frame.minutes / 10);
        put(&mut bits, HOUR_UNITS, 4, frame.hours % 10);
        put(&mut bits, HOUR_TENS, 2, frame.hours / 10);

        for (group, &start) in USER_GROUPS.iter().enumerate() {
            put(&mut bits, start, 4, (frame.user_bits >> (4 * group)) as u8 & 0x0F);
        }

        bits[SYNC_START..].copy_from_slice(&SYNC_BITS);

        // Even number of zeros keeps every frame starting on the same edge.
        let zeros = bits.iter().filter(|&&b| !b).count();
        bits[self.polarity_bit()] = zeros % 2 == 1;

        bits
    }

    pub fn decode(&self, bits: &FrameBits) -> Result<LtcFrame, FrameError> {
        if !has_sync_word(bits) {
            return Err(FrameError::BadSyncWord);
        }

        let frames = bcd(bits, FRAME_UNITS, FRAME_TENS, 2, "frames")?;
        let seconds = bcd(bits, SECOND_UNITS, SECOND_TENS, 3, "seconds")?;
        let minutes = bcd(bits, MINUTE_UNITS, MINUTE_TENS, 3, "minutes")?;
        let hours = bcd(bits, HOUR_UNITS, HOUR_TENS, 2, "hours")?;

        if seconds > 59 {
            return Err(FrameError::InvalidBcd("seconds"));
        }
        if minutes > 59 {
            return Err(FrameError::InvalidBcd("minutes"));
        }
        if hours > 23 {
            return Err(FrameError::InvalidBcd("hours"));
        }

        let fps = self.frame_rate.nominal();
        if frames >= fps {
            return Err(FrameError::FrameRateMismatch { frames, fps });
        }

        let drop_frame = bits[DROP_FRAME_FLAG];
        if drop_frame
            && self.frame_rate.is_drop_frame()
            && frames < 2
            && seconds == 0
            && minutes % 10 != 0
        {
            return Err(FrameError::FrameRateMismatch { frames, fps });
        }

        let user_bits = USER_GROUPS
            .iter()
            .enumerate()
            .fold(0u32, |acc, (group, &start)| {
                acc | (get(bits, start, 4) as u32) << (4 * group)
            });

        Ok(LtcFrame {
            hours,
            minutes,
            seconds,
            frames,
            drop_frame,
            color_frame: bits[COLOR_FRAME_FLAG],
            user_bits,
        })
    }
}

pub fn has_sync_word(bits: &FrameBits) -> bool {
    bits[SYNC_START..] == SYNC_BITS
}

/// Unpack a shift register holding the most recent 80 bits, oldest bit in
/// bit 0.
pub fn bits_from_register(register: u128) -> FrameBits {
    let mut bits = [false; FRAME_BITS];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = (register >> i) & 1 == 1;
    }
    bits
}

fn put(bits: &mut FrameBits, start: usize, width: usize, value: u8) {
    for i in 0..width {
        bits[start + i] = (value >> i) & 1 == 1;
    }
}

fn get(bits: &FrameBits, start: usize, width: usize) -> u8 {
    (0..width).fold(0u8, |acc, i| acc | (bits[start + i] as u8) << i)
}

fn bcd(
    bits: &FrameBits,
    units_at: usize,
    tens_at: usize,
    tens_width: usize,
    field: &'static str,
) -> Result<u8, FrameError> {
    let units = get(bits, units_at, 4);
    if units > 9 {
        return Err(FrameError::InvalidBcd(field));
    }
    Ok(get(bits, tens_at, tens_width) * 10 + units)
}
