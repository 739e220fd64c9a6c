use thiserror::Error;

/// Reasons an 80-bit window was rejected as an LTC frame.
///
/// These are never fatal: the decoder discards the window and keeps
/// searching the bit stream for the next sync word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("sync word not found at end of frame")]
    BadSyncWord,

    #[error("invalid BCD digit in {0} field")]
    InvalidBcd(&'static str),

    #[error("frame number {frames} not valid at {fps} fps")]
    FrameRateMismatch { frames: u8, fps: u8 },
}

#[derive(Debug, Error)]
pub enum LtcError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("unsupported frame rate: {0}")]
    InvalidFrameRate(String),

    #[error("unsupported sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    #[error("feature is disabled")]
    Disabled,
}

pub type Result<T> = std::result::Result<T, LtcError>;
