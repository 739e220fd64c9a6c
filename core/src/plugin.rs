use crate::config::{HostMode, LtcConfig};
use crate::decoder::LtcDecoder;
use crate::encoder::LtcEncoder;
use crate::error::{LtcError, Result};
use crate::playlist::{Correction, CorrectionSink, PlaylistPosition, PositionSource, ResyncNotifier};
use crate::sync::{LockState, SyncEngine};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Plugin handle shared between the audio callbacks and the host's control
/// thread. Hold the lock only for one buffer or one event.
pub type SharedPlugin = Arc<Mutex<LtcPlugin>>;

/// Playlist lifecycle notifications from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistEvent {
    Started,
    Stopped,
    /// Entry `index` began playing from its start.
    EntryStarted { index: usize },
}

/// An enabled LTC output.
pub struct OutputSession {
    device: String,
    encoder: LtcEncoder,
}

impl OutputSession {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn encoder(&self) -> &LtcEncoder {
        &self.encoder
    }

    pub fn process<S: PositionSource + ?Sized>(&mut self, source: &S, out: &mut [f32]) {
        self.encoder.fill(source, out);
    }
}

/// An enabled LTC input: decoder on the sample side, sync engine behind it.
pub struct InputSession {
    device: String,
    decoder: LtcDecoder,
    engine: SyncEngine,
}

impl InputSession {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn lock_state(&self) -> LockState {
        self.engine.state()
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Decode one buffer and run every result through the sync engine.
    pub fn process<S: PositionSource + ?Sized>(&mut self, samples: &[f32], source: &S) {
        self.decoder.write(samples);
        while let Some(result) = self.decoder.read() {
            match result {
                Ok(decoded) => {
                    let at = self.stream_time(decoded.end_sample);
                    self.engine.on_frame(&decoded.frame, at, source);
                }
                Err(error) => {
                    let now = self.stream_time(self.decoder.position());
                    self.engine.on_error(error, now);
                }
            }
        }
        self.engine.poll(self.stream_time(self.decoder.position()));
    }

    fn stream_time(&self, sample: u64) -> Duration {
        let nanos = sample as u128 * 1_000_000_000 / self.decoder.sample_rate() as u128;
        Duration::from_nanos(nanos as u64)
    }
}

/// The LTC feature as the host sees it: two independently enabled
/// directions, each gated by settings and by the host mode.
pub struct LtcPlugin {
    config: LtcConfig,
    mode: HostMode,
    sink: Option<Arc<dyn CorrectionSink + Send + Sync>>,
    notifier: Option<Arc<dyn ResyncNotifier + Send + Sync>>,
    output: Option<OutputSession>,
    input: Option<InputSession>,
}

impl LtcPlugin {
    pub fn new(config: LtcConfig, mode: HostMode) -> Self {
        Self {
            config,
            mode,
            sink: None,
            notifier: None,
            output: None,
            input: None,
        }
    }

    /// Where input corrections go. Required before input can be enabled.
    pub fn with_corrections(mut self, sink: Arc<dyn CorrectionSink + Send + Sync>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Called on every jam when multisync re-sending is configured.
    pub fn with_resync(mut self, notifier: Arc<dyn ResyncNotifier + Send + Sync>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn shared(self) -> SharedPlugin {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &LtcConfig {
        &self.config
    }

    pub fn mode(&self) -> HostMode {
        self.mode
    }

    pub fn output(&self) -> Option<&OutputSession> {
        self.output.as_ref()
    }

    pub fn input(&self) -> Option<&InputSession> {
        self.input.as_ref()
    }

    pub fn lock_state(&self) -> Option<LockState> {
        self.input.as_ref().map(InputSession::lock_state)
    }

    /// Enable whatever the settings ask for and the host mode allows.
    pub fn enable(&mut self) -> Result<()> {
        if self.config.output.enabled && self.mode == HostMode::Player {
            self.enable_output()?;
        }
        if self.config.input.enabled && self.mode == HostMode::Remote {
            self.enable_input()?;
        }
        Ok(())
    }

    pub fn enable_output(&mut self) -> Result<()> {
        if self.mode != HostMode::Player {
            return Err(LtcError::Configuration(
                "LTC output is only available in player mode".to_string(),
            ));
        }
        let channel = &self.config.output;
        if channel.device.is_empty() {
            return Err(LtcError::Device("no LTC output device selected".to_string()));
        }
        let encoder = LtcEncoder::new(
            channel.sample_rate,
            channel.frame_rate,
            self.config.hour_is_playlist_index,
        )?;
        log::info!(
            "LTC output enabled on {} at {} fps, {} Hz",
            channel.device,
            channel.frame_rate,
            channel.sample_rate
        );
        self.output = Some(OutputSession {
            device: channel.device.clone(),
            encoder,
        });
        Ok(())
    }

    pub fn enable_input(&mut self) -> Result<()> {
        if self.mode != HostMode::Remote {
            return Err(LtcError::Configuration(
                "LTC input is only available in remote mode".to_string(),
            ));
        }
        let channel = &self.config.input;
        if channel.device.is_empty() {
            return Err(LtcError::Device("no LTC input device selected".to_string()));
        }
        let sink = self.sink.clone().ok_or_else(|| {
            LtcError::Configuration("LTC input needs a correction sink".to_string())
        })?;
        let decoder = LtcDecoder::new(channel.sample_rate, channel.frame_rate)?;
        let mut engine = SyncEngine::new(
            channel.frame_rate,
            self.config.hour_is_playlist_index,
            self.config.thresholds.clone(),
            Box::new(sink),
        )
        .with_default_playlist(self.config.default_playlist.clone());
        if self.config.resend_multisync {
            if let Some(notifier) = self.notifier.clone() {
                engine = engine.with_resync(Box::new(move |correction: &Correction| {
                    notifier.notify(correction)
                }));
            }
        }
        log::info!(
            "LTC input enabled on {} at {} fps, {} Hz",
            channel.device,
            channel.frame_rate,
            channel.sample_rate
        );
        self.input = Some(InputSession {
            device: channel.device.clone(),
            decoder,
            engine,
        });
        Ok(())
    }

    /// Render the next output buffer.
    pub fn process_output<S: PositionSource + ?Sized>(
        &mut self,
        source: &S,
        out: &mut [f32],
    ) -> Result<()> {
        let session = self.output.as_mut().ok_or(LtcError::Disabled)?;
        session.process(source, out);
        Ok(())
    }

    /// Consume the next input buffer.
    pub fn process_input<S: PositionSource + ?Sized>(
        &mut self,
        samples: &[f32],
        source: &S,
    ) -> Result<()> {
        let session = self.input.as_mut().ok_or(LtcError::Disabled)?;
        session.process(samples, source);
        Ok(())
    }

    /// Jam the output to where the playlist just went.
    pub fn playlist_event<S: PositionSource + ?Sized>(&mut self, event: PlaylistEvent, source: &S) {
        let Some(session) = self.output.as_mut() else {
            return;
        };
        let position = match event {
            PlaylistEvent::Started | PlaylistEvent::Stopped => {
                PlaylistPosition::Elapsed(Duration::ZERO)
            }
            PlaylistEvent::EntryStarted { index } if self.config.hour_is_playlist_index => {
                PlaylistPosition::Entry {
                    index,
                    offset: Duration::ZERO,
                }
            }
            PlaylistEvent::EntryStarted { index } => {
                PlaylistPosition::Elapsed(source.entry_start(index).unwrap_or_default())
            }
        };
        session.encoder.jam(position);
    }

    /// Release both directions. Partial frames are discarded and nothing
    /// decoded but unread survives.
    pub fn disable(&mut self) {
        if let Some(mut session) = self.output.take() {
            session.encoder.flush();
            log::info!("LTC output disabled on {}", session.device);
        }
        if let Some(mut session) = self.input.take() {
            session.decoder.reset();
            session.engine.reset();
            log::info!("LTC input disabled on {}", session.device);
        }
    }
}

impl Drop for LtcPlugin {
    fn drop(&mut self) {
        self.disable();
    }
}
