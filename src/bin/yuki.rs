//! CLI binary for yuki.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use yuki::audio::AudioBackend;
use yuki::audio::device::CpalBackend;
use yuki::credentials::{self, CredentialProvider, KeyringCredential, StaticCredential};
use yuki::modes::transcribe::record_clip;
use yuki::modes::{
    AudioClip, ChatMode, GenerativeClient, ImageInput, ImageMode, ImageResult, ImageSize,
    TranscribeMode,
};
use yuki::transport::gemini::GeminiLiveConnector;
use yuki::{RuntimeEvent, SessionCommand, SessionController, YukiConfig};

/// Yuki: a live voice companion.
#[derive(Parser)]
#[command(name = "yuki", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API key to use instead of the environment or keyring.
    #[arg(long, env = "YUKI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Talk to Yuki in a live voice session.
    Live,

    /// Ask a single question, grounded with web search.
    Chat {
        /// The question.
        prompt: String,
        /// Use the extended thinking budget.
        #[arg(long)]
        think: bool,
    },

    /// Generate an image from a prompt.
    Image {
        /// What to draw.
        prompt: String,
        /// Output resolution: 1K, 2K or 4K.
        #[arg(long, default_value = "1K")]
        size: ImageSize,
        /// Where to write the image.
        #[arg(short, long, default_value = "yuki-image.png")]
        output: PathBuf,
    },

    /// Edit an existing image.
    Edit {
        /// Image to edit.
        image: PathBuf,
        /// Edit instruction.
        prompt: String,
        /// Where to write the edited image.
        #[arg(short, long, default_value = "yuki-edit.png")]
        output: PathBuf,
    },

    /// Describe an image.
    Analyze {
        /// Image to describe.
        image: PathBuf,
    },

    /// Transcribe a recording, or record one from the microphone.
    Transcribe {
        /// Audio file to transcribe. Records until Enter when omitted.
        file: Option<PathBuf>,
    },

    /// List available audio devices.
    Devices,

    /// Store an API key in the platform keyring.
    Key {
        /// Remove the stored key instead.
        #[arg(long)]
        delete: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so replies on stdout stay clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("yuki=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let credentials: Arc<dyn CredentialProvider> = match cli.api_key {
        Some(key) => Arc::new(StaticCredential::new(key)),
        None => Arc::new(KeyringCredential::new()),
    };

    match cli.command.unwrap_or(Command::Live) {
        Command::Live => run_live(config, credentials).await,
        Command::Chat { prompt, think } => run_chat(&config, credentials, &prompt, think).await,
        Command::Image {
            prompt,
            size,
            output,
        } => {
            let mode = ImageMode::new(client(&config, credentials)?, &config);
            let result = mode.generate(&prompt, size).await?;
            save_image(&result, &output)
        }
        Command::Edit {
            image,
            prompt,
            output,
        } => {
            let input = ImageInput::from_path(&image)?;
            let mode = ImageMode::new(client(&config, credentials)?, &config);
            let result = mode.edit(&input, &prompt).await?;
            save_image(&result, &output)
        }
        Command::Analyze { image } => {
            let input = ImageInput::from_path(&image)?;
            let mode = ImageMode::new(client(&config, credentials)?, &config);
            println!("{}", mode.analyze(&input).await?);
            Ok(())
        }
        Command::Transcribe { file } => run_transcribe(&config, credentials, file).await,
        Command::Devices => list_devices(),
        Command::Key { delete } => manage_key(delete),
    }
}

/// Explicit path, else the default path when it exists, else defaults.
fn load_config(path: Option<&Path>) -> anyhow::Result<YukiConfig> {
    if let Some(path) = path {
        return YukiConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()));
    }
    let default_path = YukiConfig::default_config_path();
    if default_path.exists() {
        info!(path = %default_path.display(), "loading config");
        return Ok(YukiConfig::from_file(&default_path)?);
    }
    Ok(YukiConfig::default())
}

fn client(
    config: &YukiConfig,
    credentials: Arc<dyn CredentialProvider>,
) -> anyhow::Result<GenerativeClient> {
    credentials::ensure_credential(credentials.as_ref())?;
    Ok(GenerativeClient::new(&config.backend, credentials)?)
}

async fn run_live(
    config: YukiConfig,
    credentials: Arc<dyn CredentialProvider>,
) -> anyhow::Result<()> {
    println!("Yuki v{}", env!("CARGO_PKG_VERSION"));

    // Prompt for a key before stdin is handed to the toggle reader.
    credentials::ensure_credential(credentials.as_ref())?;

    let (runtime_tx, mut runtime_rx) = yuki::runtime::channel();
    let backend: Arc<dyn AudioBackend> = Arc::new(CpalBackend);
    let connector = Arc::new(GeminiLiveConnector::new(Arc::clone(&credentials)));
    let controller = SessionController::new(config, backend, connector, credentials)
        .with_runtime_events(runtime_tx);

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    tokio::spawn(async move {
        loop {
            match runtime_rx.recv().await {
                Ok(RuntimeEvent::StateChanged(state)) => println!("[{state}]"),
                Ok(RuntimeEvent::EmotionChanged(emotion)) => println!("  yuki is {emotion}"),
                Ok(RuntimeEvent::Error(message)) => eprintln!("error: {message}"),
                Ok(RuntimeEvent::ErrorCleared) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let _ = command_tx.send(SessionCommand::Start);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            if line.is_err() || command_tx.send(SessionCommand::Toggle).is_err() {
                break;
            }
        }
    });

    println!("\nPress Enter to start or stop talking. Press Ctrl+C to quit.\n");

    controller.run(command_rx, cancel).await?;
    Ok(())
}

async fn run_chat(
    config: &YukiConfig,
    credentials: Arc<dyn CredentialProvider>,
    prompt: &str,
    think: bool,
) -> anyhow::Result<()> {
    let mode = ChatMode::new(client(config, credentials)?, config);
    let reply = mode.send(prompt, think).await?;
    println!("{}", reply.text);
    if !reply.grounding.is_empty() {
        println!("\nSources:");
        for link in &reply.grounding {
            println!("  - {} <{}>", link.title, link.uri);
        }
    }
    Ok(())
}

async fn run_transcribe(
    config: &YukiConfig,
    credentials: Arc<dyn CredentialProvider>,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mode = TranscribeMode::new(client(config, credentials)?, config);

    let clip = match file {
        Some(path) => AudioClip::from_path(&path)?,
        None => {
            let mic = CpalBackend.open_microphone(&config.audio)?;
            println!("Recording... press Enter to stop.");
            let enter = tokio::task::spawn_blocking(|| {
                let mut line = String::new();
                let _ = std::io::stdin().read_line(&mut line);
            });
            record_clip(mic, async {
                let _ = enter.await;
            })
            .await?
        }
    };

    println!("{}", mode.transcribe(&clip).await?);
    Ok(())
}

fn save_image(result: &ImageResult, output: &Path) -> anyhow::Result<()> {
    result.save(output)?;
    println!("Saved {} ({})", output.display(), result.mime_type);
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalBackend::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalBackend::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}

fn manage_key(delete: bool) -> anyhow::Result<()> {
    let store = KeyringCredential::new();
    if delete {
        store.delete()?;
        println!("API key removed.");
    } else {
        store.request_credential()?;
        println!("API key stored.");
    }
    Ok(())
}
