//! CLI binary for lingban.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use lingban::audio::capture::Microphone;
use lingban::audio::playback::{AudioPlayer, CpalPlayback, SpeakerPlayer};
use lingban::pipeline::messages::SessionContext;
use lingban::services::{
    AssetPublisher, Collaborators, EmotionScorer, HttpTts, TextToSpeech, TmpFilesPublisher,
    VisionEmotionScorer,
};
use lingban::video::{JpegFrame, SnapshotFileSource, composite};
use lingban::{AssistantConfig, CaptureSettings, ConversationCoordinator, RuntimeEvent, emotion};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Lingban: a voice and vision driving companion.
#[derive(Parser)]
#[command(name = "lingban", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start a voice conversation. Type `r` and Enter to regenerate the last reply.
    Chat {
        /// Still image kept fresh by an external camera tool.
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Kiosk mode: public capture preset, cloned voice, scene 3.
        #[arg(long)]
        public: bool,
    },

    /// List available audio devices.
    Devices,

    /// Show or reset the persisted capture settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Synthesize text and play it.
    Speak { text: String },

    /// Publish an image and rate the driver's emotion from it.
    Score { image: PathBuf, text: String },

    /// Composite image files into one grid JPEG.
    Grid {
        out: PathBuf,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Reset {
        /// Use the kiosk preset instead of the defaults.
        #[arg(long)]
        public: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Users can override with RUST_LOG=debug to see everything.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lingban=info,reqwest=warn,symphonia=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(AssistantConfig::default_config_path);
    let mut config = if config_path.exists() {
        AssistantConfig::from_file(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?
    } else {
        AssistantConfig::default()
    };
    config.apply_env_overrides();

    let command = cli.command.unwrap_or(Command::Chat {
        snapshot: None,
        public: false,
    });
    match command {
        Command::Chat { snapshot, public } => {
            if public {
                config.capture = CaptureSettings::public_preset();
                config.session.apply_public_preset();
            }
            run_chat(config, snapshot).await
        }
        Command::Devices => list_devices(),
        Command::Settings { action } => settings(&config, &config_path, action),
        Command::Speak { text } => speak(config, &text).await,
        Command::Score { image, text } => score(config, &image, &text).await,
        Command::Grid { out, images } => grid(&config.capture, &out, &images),
    }
}

async fn run_chat(config: AssistantConfig, snapshot: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Lingban v{}", env!("CARGO_PKG_VERSION"));

    let session = SessionContext::from_config(&config.session);
    let collaborators = Collaborators::from_config(&config)?;
    let (events_tx, events_rx) = broadcast::channel(256);
    let (regen_tx, regen_rx) = mpsc::channel(1);

    let mut coordinator = ConversationCoordinator::new(config, session, collaborators)
        .with_runtime_events(events_tx)
        .with_regenerate_requests(regen_rx);
    if let Some(path) = snapshot {
        coordinator = coordinator.with_frame_source(Arc::new(SnapshotFileSource::new(path)));
    }
    let cancel = coordinator.cancel_token();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });
    tokio::spawn(print_events(events_rx));
    read_regenerate_requests(regen_tx);

    println!("\nReady! Speak into your microphone. Type r + Enter to regenerate, Ctrl+C to stop.\n");
    coordinator.run().await?;
    Ok(())
}

/// Stdin is read on a plain thread so a pending read never holds up shutdown.
fn read_regenerate_requests(tx: mpsc::Sender<()>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if matches!(line.trim(), "r" | "regenerate") && tx.blocking_send(()).is_err() {
                break;
            }
        }
    });
}

async fn print_events(mut rx: broadcast::Receiver<RuntimeEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            RuntimeEvent::Transcription { text } => println!("You: {text}"),
            RuntimeEvent::Emotion { score } => {
                let shown = score.map_or_else(|| "unknown".to_owned(), |s| s.to_string());
                println!("Emotion: {} {shown}", emotion::emoji(score));
            }
            RuntimeEvent::AssistantReply { text } => println!("Lingban: {text}\n"),
            RuntimeEvent::TurnFailed { phase, message } => {
                eprintln!("Turn failed while {phase}: {message}");
            }
            _ => {}
        }
    }
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in Microphone::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalPlayback::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}

fn settings(config: &AssistantConfig, path: &Path, action: SettingsAction) -> anyhow::Result<()> {
    let capture = match action {
        SettingsAction::Show => config.capture.clone(),
        SettingsAction::Reset { public } => {
            // Rewrites the file from its own contents; env credentials stay out.
            let saved = AssistantConfig::update_file(path, |stored| {
                if public {
                    stored.capture = CaptureSettings::public_preset();
                    stored.session.apply_public_preset();
                } else {
                    stored.capture.reset();
                }
            })
            .with_context(|| format!("updating {}", path.display()))?;
            println!("Saved {}", path.display());
            saved.capture
        }
    };
    println!("{}", toml::to_string_pretty(&capture)?);
    Ok(())
}

async fn speak(config: AssistantConfig, text: &str) -> anyhow::Result<()> {
    let session = SessionContext::from_config(&config.session);
    let tts = HttpTts::new(config.tts.clone())?;
    let audio = tts.synthesize(text, &session).await?;
    println!("Playing {} bytes via {:?}", audio.bytes.len(), tts.provider_for(&session));
    SpeakerPlayer::new(config.audio).play(audio).await?;
    Ok(())
}

async fn score(config: AssistantConfig, image: &Path, text: &str) -> anyhow::Result<()> {
    let session = SessionContext::from_config(&config.session);
    let grid = composite(&[load_frame(image, &config.capture)?], &config.capture)?;
    let url = TmpFilesPublisher::new(config.upload.clone())?
        .publish(&grid)
        .await?;
    println!("Image: {url}");

    let score = VisionEmotionScorer::new(config.emotion)?
        .score(text, Some(&url), &session)
        .await?;
    let shown = score.map_or_else(|| "null".to_owned(), |s| s.to_string());
    let (r, g, b) = emotion::color(score);
    println!("Score: {shown} {} (#{r:02x}{g:02x}{b:02x})", emotion::emoji(score));
    Ok(())
}

fn grid(settings: &CaptureSettings, out: &Path, images: &[PathBuf]) -> anyhow::Result<()> {
    let frames = images
        .iter()
        .map(|p| load_frame(p, settings))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let image = composite(&frames, settings)?;
    std::fs::write(out, image.to_bytes()?)?;
    println!("Wrote {} frame grid to {}", image.frames(), out.display());
    Ok(())
}

fn load_frame(path: &Path, settings: &CaptureSettings) -> anyhow::Result<JpegFrame> {
    let image = image::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(JpegFrame::encode(&image.to_rgb8(), settings.jpeg_quality())?)
}
