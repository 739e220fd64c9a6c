//! Plugin settings.
//!
//! Settings arrive as string key/value pairs, the way the host stores them.
//! Missing or empty values fall back to defaults; values that cannot be
//! interpreted are configuration errors.

use crate::error::{LtcError, Result};
use crate::sync::SyncThresholds;
use crate::timebase::FrameRate;
use std::collections::HashMap;

pub const ENABLE_OUTPUT: &str = "EnableSMPTEOutput";
pub const ENABLE_INPUT: &str = "EnableSMPTEInput";
pub const OUTPUT_DEVICE: &str = "SMPTEOutputDevice";
pub const OUTPUT_FRAME_RATE: &str = "SMPTEOutputFrameRate";
pub const INPUT_DEVICE: &str = "SMPTEInputDevice";
pub const INPUT_FRAME_RATE: &str = "SMPTEInputFrameRate";
pub const INPUT_PLAYLIST: &str = "SMPTEInputPlaylist";
pub const RESEND_MULTISYNC: &str = "SMPTEResendMultisync";
pub const HOUR_IS_PLAYLIST: &str = "SMPTEHourIsPlaylist";

/// Playlist setting value meaning "no default playlist".
pub const NO_PLAYLIST: &str = "--none--";

pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_INPUT_SAMPLE_RATE: u32 = 48_000;

const DEFAULTS: [(&str, &str); 9] = [
    (ENABLE_OUTPUT, "0"),
    (ENABLE_INPUT, "0"),
    (OUTPUT_DEVICE, ""),
    (OUTPUT_FRAME_RATE, "30"),
    (INPUT_DEVICE, ""),
    (INPUT_FRAME_RATE, "30"),
    (INPUT_PLAYLIST, NO_PLAYLIST),
    (RESEND_MULTISYNC, "0"),
    (HOUR_IS_PLAYLIST, "0"),
];

/// Which side of the show this host plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMode {
    /// Drives playback; may emit LTC.
    Player,
    /// Follows another system; may chase incoming LTC.
    Remote,
}

/// Settings for one audio direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub enabled: bool,
    /// Device identifier, passed through to the audio layer untouched.
    pub device: String,
    pub frame_rate: FrameRate,
    pub sample_rate: u32,
}

impl ChannelConfig {
    fn new(sample_rate: u32) -> Self {
        Self {
            enabled: false,
            device: String::new(),
            frame_rate: FrameRate::Fps30,
            sample_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LtcConfig {
    pub output: ChannelConfig,
    pub input: ChannelConfig,
    /// Playlist jams switch to when the user bits name none.
    pub default_playlist: Option<String>,
    pub resend_multisync: bool,
    /// Hours field carries the playlist entry index.
    pub hour_is_playlist_index: bool,
    pub thresholds: SyncThresholds,
}

impl Default for LtcConfig {
    fn default() -> Self {
        Self {
            output: ChannelConfig::new(DEFAULT_OUTPUT_SAMPLE_RATE),
            input: ChannelConfig::new(DEFAULT_INPUT_SAMPLE_RATE),
            default_playlist: None,
            resend_multisync: false,
            hour_is_playlist_index: false,
            thresholds: SyncThresholds::default(),
        }
    }
}

impl LtcConfig {
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| setting(settings, key);

        let mut config = LtcConfig::default();
        config.output.enabled = parse_flag(ENABLE_OUTPUT, get(ENABLE_OUTPUT))?;
        config.output.device = get(OUTPUT_DEVICE).to_string();
        config.output.frame_rate = parse_rate(OUTPUT_FRAME_RATE, get(OUTPUT_FRAME_RATE))?;
        config.input.enabled = parse_flag(ENABLE_INPUT, get(ENABLE_INPUT))?;
        config.input.device = get(INPUT_DEVICE).to_string();
        config.input.frame_rate = parse_rate(INPUT_FRAME_RATE, get(INPUT_FRAME_RATE))?;
        config.default_playlist = match get(INPUT_PLAYLIST) {
            NO_PLAYLIST => None,
            name => Some(name.to_string()),
        };
        config.resend_multisync = parse_flag(RESEND_MULTISYNC, get(RESEND_MULTISYNC))?;
        config.hour_is_playlist_index = parse_flag(HOUR_IS_PLAYLIST, get(HOUR_IS_PLAYLIST))?;
        Ok(config)
    }

    /// Parse `key = "value"` lines. Blank lines and lines starting with `#`
    /// or `;` are skipped, as are lines without `=`.
    pub fn parse_settings(text: &str) -> HashMap<String, String> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with(';'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                (key.trim().to_string(), value.to_string())
            })
            .collect()
    }

    pub fn from_settings_text(text: &str) -> Result<Self> {
        Self::from_settings(&Self::parse_settings(text))
    }
}

/// Value for `key`, or its default when missing or empty.
fn setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> &'a str {
    match settings.get(key).map(|v| v.trim()) {
        Some(value) if !value.is_empty() => value,
        _ => DEFAULTS
            .iter()
            .find(|(k, _)| *k == key)
            .map_or("", |(_, v)| *v),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(LtcError::Configuration(format!(
            "{} must be 0 or 1, got {:?}",
            key, other
        ))),
    }
}

fn parse_rate(key: &str, value: &str) -> Result<FrameRate> {
    value.parse().map_err(|_| {
        LtcError::Configuration(format!("{} is not a supported frame rate: {:?}", key, value))
    })
}
