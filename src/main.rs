use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wakeword_listener::voice::{
    AudioSource, CaptureSpec, MicrophoneSource, ModelCache, SpeechBackend, WavFileSource,
    frame_queue, normalize,
};
use wakeword_listener::{
    Config, Listener, ListenerOptions, ListenerSnapshot, ListenerState, WakeWordConfig,
};

/// Wakeword - listen on the microphone for a spoken wake phrase
#[derive(Parser)]
#[command(name = "wakeword", version, about)]
struct Cli {
    /// Wake phrase (overrides config and `WAKEWORD_PHRASE`)
    #[arg(short, long)]
    phrase: Option<String>,

    /// Speech model directory
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Input device name
    #[arg(short, long)]
    device: Option<String>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for the wake phrase until Ctrl-C (default)
    Listen {
        /// Replay a WAV file instead of capturing from the microphone
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Replay the input file as fast as possible
        #[arg(long, requires = "input")]
        fast: bool,

        /// Print every snapshot as a JSON line
        #[arg(long)]
        json: bool,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short = 't', long, default_value = "5")]
        duration: u64,
    },
    /// Print the normalized form of a phrase
    Normalize {
        /// Text to normalize
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,wakeword_listener=info,wakeword=info",
        1 => "info,wakeword_listener=debug,wakeword=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let command = cli.command.unwrap_or(Command::Listen {
        input: None,
        fast: false,
        json: false,
    });

    if let Command::Normalize { text } = &command {
        println!("{}", normalize(text));
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(phrase) = cli.phrase {
        config.wake.phrase = phrase;
    }
    if let Some(model) = cli.model {
        config.model.path = model;
    }
    if cli.device.is_some() {
        config.audio.device = cli.device;
    }
    config.validate()?;

    match command {
        Command::Listen { input, fast, json } => listen(&config, input, fast, json).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::Normalize { .. } => Ok(()),
    }
}

#[cfg(feature = "vosk")]
#[allow(clippy::unnecessary_wraps)]
fn speech_backend() -> anyhow::Result<Arc<dyn SpeechBackend>> {
    Ok(Arc::new(wakeword_listener::voice::VoskBackend))
}

#[cfg(not(feature = "vosk"))]
fn speech_backend() -> anyhow::Result<Arc<dyn SpeechBackend>> {
    anyhow::bail!("no speech backend compiled in; rebuild with `--features vosk`")
}

async fn listen(
    config: &Config,
    input: Option<PathBuf>,
    fast: bool,
    json: bool,
) -> anyhow::Result<()> {
    let cache = Arc::new(ModelCache::new(speech_backend()?));
    let source: Arc<dyn AudioSource> = match input {
        Some(path) => Arc::new(WavFileSource::new(path).realtime(!fast)),
        None => Arc::new(MicrophoneSource::new(config.audio.device.clone())),
    };

    let activations = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&activations);
    let phrase = config.wake.phrase.clone();
    let wake = WakeWordConfig::new(config.wake.phrase.clone(), move || {
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        println!("activated: \"{phrase}\" (#{count})");
    })
    .enabled(config.wake.enabled);

    if !config.wake.enabled {
        tracing::warn!("wake word is disabled in the configuration, nothing to do");
    }

    tracing::info!(
        phrase = %config.wake.phrase,
        model = %config.model.path.display(),
        source = source.name(),
        "starting wake word listener"
    );

    let listener = Listener::spawn(ListenerOptions::from_config(config), wake, cache, source);
    let mut updates = listener.subscribe();
    listener.start_listening().await?;

    let mut last = ListenerSnapshot::default();
    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break Ok(());
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = updates.borrow_and_update().clone();
                report(&last, &snapshot, json)?;
                if let ListenerState::Error(message) = &snapshot.state {
                    break Err(anyhow::anyhow!("{message}"));
                }
                last = snapshot;
            }
        }
    };

    listener.dispose().await?;
    tracing::info!(
        activations = activations.load(Ordering::SeqCst),
        "listener stopped"
    );
    outcome
}

fn report(last: &ListenerSnapshot, snapshot: &ListenerSnapshot, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    if snapshot.state != last.state {
        match &snapshot.state {
            ListenerState::ModelLoading => println!("loading speech model..."),
            ListenerState::Listening => println!("listening (Ctrl-C to stop)"),
            ListenerState::Idle => println!("idle"),
            ListenerState::Error(message) => println!("error: {message}"),
        }
    }
    if snapshot.transcript != last.transcript && !snapshot.transcript.is_empty() {
        println!("  > {}", snapshot.transcript);
    }
    Ok(())
}

async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    // 100ms frames for a responsive meter
    let spec = CaptureSpec {
        frame_size: 1600,
        ..config.capture_spec()
    };
    let (sink, mut frames) = frame_queue(spec.queue_frames);
    let source = MicrophoneSource::new(config.audio.device.clone());
    let open_spec = spec.clone();
    let mut session = tokio::task::spawn_blocking(move || source.open(&open_spec, sink)).await??;

    println!("Sample rate: {} Hz", session.sample_rate());
    println!("---");

    for i in 0..duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut samples = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, frames.next()).await {
            samples.extend_from_slice(frame.samples());
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    session.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");
    println!("  3. Pass --device with one of the listed names");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
