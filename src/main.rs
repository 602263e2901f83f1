use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use sitevoice::capability::{Capabilities, ProxyClient, Synthesizer};
use sitevoice::conversation::{ContextAssembler, ConversationTurn, SiteContent};
use sitevoice::engine::{ConversationEngine, EngineState, HostInterface};
use sitevoice::voice::{
    AudioCaptureSession, CpalMicrophone, CpalSpeaker, DecodedAudio, IncrementalRecognizer,
    Microphone, ResourceTracker, Speaker, SpeechPlaybackSession, TranscriptView, rms_level,
};
use sitevoice::{Config, Error};

/// sitevoice - Voice conversations with a website assistant
#[derive(Parser)]
#[command(name = "sitevoice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "SITEVOICE_CONFIG")]
    config: Option<PathBuf>,

    /// Backend proxy URL (overrides config)
    #[arg(long, env = "SITEVOICE_BACKEND_URL")]
    backend_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Start a conversation (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output through the backend
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,sitevoice=info",
        1 => "info,sitevoice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
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
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.backend_url {
        config.backend.url = url;
    }
    config.validate()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => converse(config).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&config, &text).await,
    }
}

/// Interactive conversation in the terminal
async fn converse(config: Config) -> anyhow::Result<()> {
    let client = ProxyClient::new(&config.backend, config.engine().request_timeout)?;
    let capabilities = Capabilities::from_backend(client);

    let site = match &config.site_content {
        Some(path) => SiteContent::load(path)?,
        None => SiteContent::default(),
    };
    let assembler = ContextAssembler::new(
        config.site_name.clone(),
        config.conversation.content_budget,
    );

    let resources = ResourceTracker::new();
    let mut capture = AudioCaptureSession::new(
        Arc::new(CpalMicrophone::new()),
        config.silence(),
        resources.clone(),
    )
    .with_max_duration(config.max_capture());
    if config.voice.live_captions {
        capture = capture.with_recognizer(Arc::new(IncrementalRecognizer::new(Arc::clone(
            &capabilities.transcriber,
        ))));
    }
    let playback = SpeechPlaybackSession::new(Arc::new(CpalSpeaker::new()), resources.clone());

    let terminal = Arc::new(Terminal);
    let handle =
        ConversationEngine::new(config.engine(), capture, playback, capabilities, resources)
            .with_context(assembler, site)
            .with_view(Arc::clone(&terminal) as Arc<dyn TranscriptView>)
            .with_host(terminal)
            .spawn();

    println!("Press Enter to stop talking or start a new turn, Ctrl-C to quit.\n");
    if let Err(e) = handle.start_turn().await {
        eprintln!("could not start listening: {e}");
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                if line?.is_none() {
                    break;
                }
                let outcome = match handle.state() {
                    EngineState::Idle => handle.start_turn().await,
                    _ => handle.stop().await,
                };
                if let Err(e) = outcome {
                    eprintln!("{e}");
                }
            }
        }
    }

    handle.close().await?;
    let leftover = handle.resources().snapshot();
    tracing::debug!(?leftover, "conversation closed");
    Ok(())
}

/// Terminal rendering of captions, bubbles and state
struct Terminal;

impl TranscriptView for Terminal {
    fn update(&self, final_text: &str, interim: &str) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "\r\x1b[2K  {final_text} {interim}");
        let _ = out.flush();
    }
}

impl HostInterface for Terminal {
    fn state_changed(&self, state: EngineState) {
        println!("\r\x1b[2K[{state}]");
    }

    fn show_error(&self, error: &Error) {
        eprintln!("error: {error}");
        if matches!(error, Error::PermissionDenied(_)) {
            eprintln!("Allow microphone access and press Enter to try again.");
        }
    }

    fn append_bubble(&self, turn: &ConversationTurn) {
        println!("\r\x1b[2K{}: {}", turn.role(), turn.content());
    }

    fn redirect(&self, url: &str) {
        println!("(navigate to {url})");
    }
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut stream = CpalMicrophone::new().open().await?;
    println!("Sample rate: {} Hz", stream.sample_rate());
    println!("---");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    let mut second = tokio::time::interval(Duration::from_secs(1));
    second.tick().await;
    let mut window: Vec<f32> = Vec::new();
    let mut elapsed = 0;

    while tokio::time::Instant::now() < deadline {
        tokio::select! {
            frame = stream.next_frame() => match frame {
                Some(frame) => window.extend(frame?),
                None => break,
            },
            _ = second.tick() => {
                elapsed += 1;
                let energy = rms_level(&window);
                let peak = window.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let meter_len = (energy * 100.0).min(50.0) as usize;
                let meter = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);
                println!("[{elapsed:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
                window.clear();
            }
        }
    }

    stream.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24_000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    CpalSpeaker::new()
        .play(DecodedAudio {
            samples,
            sample_rate,
        })
        .await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output through the backend
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let client = ProxyClient::new(&config.backend, config.engine().request_timeout)?;

    println!("Synthesizing speech...");
    let clip = client.synthesize(text).await?;
    println!("Got {} bytes of {} audio", clip.bytes.len(), clip.mime);

    println!("Playing audio...");
    let playback = SpeechPlaybackSession::new(Arc::new(CpalSpeaker::new()), ResourceTracker::new());
    playback.play(&clip).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
