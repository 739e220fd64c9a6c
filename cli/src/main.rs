mod chase;
mod wav;

use clap::{Parser, Subcommand};
use ltcsync_core::playlist::CorrectionSink;
use ltcsync_core::{
    Correction, FrameCodec, FrameRate, LtcDecoder, LtcEncoder, LtcError, LtcFrame,
    SharedPlaylistClock, SyncEngine, SyncThresholds, Timebase,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Ltc(#[from] LtcError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid timecode {0:?}, expected HH:MM:SS:FF")]
    InvalidTimecode(String),

    #[error("unsupported WAV format: {0} bits per sample")]
    UnsupportedFormat(u16),

    #[error("no LTC found in {}", .0.display())]
    NoTimecode(PathBuf),

    #[error("playlist task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Parser)]
#[command(name = "ltcsync")]
#[command(about = "SMPTE linear timecode generator, reader and chase simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render LTC for a running playlist to a WAV file
    Generate {
        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// First timecode
        #[arg(short, long, default_value = "00:00:00:00")]
        start: String,

        /// Length in seconds
        #[arg(short, long, default_value = "10")]
        duration: f64,

        /// Frame rate: 24, 25, 29.97 or 30
        #[arg(short, long, default_value = "30")]
        fps: FrameRate,

        #[arg(long, default_value = "48000")]
        sample_rate: u32,

        /// User bits stamped on every frame
        #[arg(short, long, default_value = "0")]
        user_bits: u32,

        /// Carry this playlist entry index (0-23) in the hours field
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..24))]
        playlist_index: Option<u8>,
    },

    /// Decode LTC from a WAV file
    Read {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Frame rate: 24, 25, 29.97 or 30
        #[arg(short, long, default_value = "30")]
        fps: FrameRate,

        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// Follow LTC from a WAV file with a simulated playlist
    Chase {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Plugin settings file (key = "value" lines)
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Frame rate, overrides the settings file
        #[arg(short, long)]
        fps: Option<FrameRate>,

        /// Where local playback starts relative to the incoming timecode, in
        /// seconds
        #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
        offset: f64,

        /// Hours field carries the playlist entry index
        #[arg(long)]
        index_mode: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Generate {
            output,
            start,
            duration,
            fps,
            sample_rate,
            user_bits,
            playlist_index,
        } => generate_command(
            &output,
            &start,
            duration,
            fps,
            sample_rate,
            user_bits,
            playlist_index,
        ),
        Commands::Read { input, fps, json } => read_command(&input, fps, json),
        Commands::Chase {
            input,
            settings,
            fps,
            offset,
            index_mode,
        } => chase::chase_command(&input, settings.as_deref(), fps, offset, index_mode).await,
    };

    if let Err(error) = result {
        eprintln!("Error: {}", error);
        std::process::exit(1);
    }
}

/// Parse `HH:MM:SS:FF`, also accepting `;` before the frames.
fn parse_timecode(text: &str, rate: FrameRate) -> Result<LtcFrame, CliError> {
    let invalid = || CliError::InvalidTimecode(text.to_string());
    let fields: Vec<u8> = text
        .split([':', ';', '.'])
        .map(|field| field.parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;
    let [hours, minutes, seconds, frames] = fields[..] else {
        return Err(invalid());
    };
    let mut frame = LtcFrame::new(hours, minutes, seconds, frames);
    frame.drop_frame = rate.is_drop_frame();

    // let the codec do the range checks
    let codec = FrameCodec::new(rate);
    codec.decode(&codec.encode(&frame)).map_err(|_| invalid())
}

fn generate_command(
    output: &PathBuf,
    start: &str,
    duration: f64,
    fps: FrameRate,
    sample_rate: u32,
    user_bits: u32,
    playlist_index: Option<u8>,
) -> Result<(), CliError> {
    let index_mode = playlist_index.is_some();
    let timebase = Timebase::new(fps, index_mode);
    let mut first = parse_timecode(start, fps)?;
    if index_mode {
        first.hours = 0;
    }
    let start_elapsed = timebase.duration_from_count(timebase.frame_count(&first));

    let clock = SharedPlaylistClock::new();
    if let Some(index) = playlist_index {
        // every entry before `index` is empty, so playback sits in `index`
        clock.set_layout(vec![Duration::ZERO; usize::from(index) + 1], None);
    }

    let mut encoder = LtcEncoder::new(sample_rate, fps, index_mode)?;
    encoder.set_user_bits(user_bits);

    let total = (duration.max(0.0) * sample_rate as f64) as usize;
    let lookahead = Duration::from_millis(2);
    let mut samples = vec![0.0f32; total];
    for (i, chunk) in samples.chunks_mut(1024).enumerate() {
        let end = (i * 1024 + chunk.len()) as f64 / sample_rate as f64;
        clock.set_elapsed(start_elapsed + Duration::from_secs_f64(end) + lookahead);
        encoder.fill(&clock, chunk);
    }
    wav::write(output, sample_rate, &samples)?;

    let mut first_label = first;
    if let Some(index) = playlist_index {
        first_label.hours = index;
    }
    println!(
        "Wrote {} samples ({} fps, {} Hz) from {} to {} to {}",
        samples.len(),
        fps,
        sample_rate,
        first_label,
        encoder.timebase().current_frame(),
        output.display()
    );
    Ok(())
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ReadEvent {
    Frame {
        timecode: String,
        hours: u8,
        minutes: u8,
        seconds: u8,
        frames: u8,
        drop_frame: bool,
        user_bits: u32,
        start_sample: u64,
        end_sample: u64,
    },
    Error {
        message: String,
        sample: u64,
    },
    Lock {
        state: String,
        sample: u64,
    },
}

impl std::fmt::Display for ReadEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadEvent::Frame {
                timecode,
                user_bits,
                start_sample,
                end_sample,
                ..
            } => write!(
                f,
                "{}  user bits {:08x}  samples {}..{}",
                timecode, user_bits, start_sample, end_sample
            ),
            ReadEvent::Error { message, sample } => write!(f, "error at {}: {}", sample, message),
            ReadEvent::Lock { state, sample } => write!(f, "{} at {}", state, sample),
        }
    }
}

/// Accepts and forgets corrections; reading only reports lock state.
struct DiscardCorrections;

impl CorrectionSink for DiscardCorrections {
    fn submit(&self, _correction: Correction) -> bool {
        true
    }
}

fn read_command(input: &PathBuf, fps: FrameRate, json: bool) -> Result<(), CliError> {
    let audio = wav::read(input)?;
    let mut decoder = LtcDecoder::new(audio.sample_rate, fps)?;
    let mut engine = SyncEngine::new(
        fps,
        false,
        SyncThresholds::default(),
        Box::new(DiscardCorrections),
    );
    let clock = SharedPlaylistClock::new();
    let stream_time = |sample: u64| {
        Duration::from_nanos((sample as u128 * 1_000_000_000 / audio.sample_rate as u128) as u64)
    };

    let mut frames = 0usize;
    let mut errors = 0usize;
    let mut state = engine.state();
    let emit = |event: ReadEvent| -> Result<(), CliError> {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{}", event);
        }
        Ok(())
    };

    for chunk in audio.samples.chunks(1024) {
        decoder.write(chunk);
        while let Some(result) = decoder.read() {
            let sample = match result {
                Ok(decoded) => {
                    frames += 1;
                    let frame = decoded.frame;
                    engine.on_frame(&frame, stream_time(decoded.end_sample), &clock);
                    emit(ReadEvent::Frame {
                        timecode: frame.to_string(),
                        hours: frame.hours,
                        minutes: frame.minutes,
                        seconds: frame.seconds,
                        frames: frame.frames,
                        drop_frame: frame.drop_frame,
                        user_bits: frame.user_bits,
                        start_sample: decoded.start_sample,
                        end_sample: decoded.end_sample,
                    })?;
                    decoded.end_sample
                }
                Err(error) => {
                    errors += 1;
                    let sample = decoder.position();
                    engine.on_error(error, stream_time(sample));
                    emit(ReadEvent::Error {
                        message: error.to_string(),
                        sample,
                    })?;
                    sample
                }
            };
            if engine.state() != state {
                state = engine.state();
                emit(ReadEvent::Lock {
                    state: state.to_string(),
                    sample,
                })?;
            }
        }
        engine.poll(stream_time(decoder.position()));
        if engine.state() != state {
            state = engine.state();
            emit(ReadEvent::Lock {
                state: state.to_string(),
                sample: decoder.position(),
            })?;
        }
    }

    if !json {
        println!("Decoded {} frames, {} errors", frames, errors);
    }
    tracing::info!("read {} frames from {}", frames, input.display());
    Ok(())
}
