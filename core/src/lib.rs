//! SMPTE linear timecode for playlist synchronization
//!
//! Emits LTC from a playlist position and chases incoming LTC by issuing
//! position corrections to a playlist controller. Supports 24, 25, 29.97
//! (drop-frame) and 30 fps.

pub mod biphase;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod playlist;
pub mod plugin;
pub mod sync;
pub mod timebase;

pub use config::{HostMode, LtcConfig};
pub use decoder::{DecodedFrame, LtcDecoder};
pub use encoder::{EmitStep, LtcEncoder};
pub use error::{FrameError, LtcError, Result};
pub use frame::{FrameCodec, LtcFrame, FRAME_BITS};
pub use playlist::{
    correction_queue, Correction, CorrectionKind, CorrectionSink, PlaylistPosition,
    PositionSource, ResyncNotifier, SharedPlaylistClock,
};
pub use plugin::{LtcPlugin, PlaylistEvent, SharedPlugin};
pub use sync::{LockState, SyncAction, SyncEngine, SyncThresholds};
pub use timebase::{FrameRate, Timebase};

