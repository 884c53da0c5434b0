//! # murmur
//!
//! Command-line front end: transcribe audio files with a local Whisper ONNX
//! model, or download the model ahead of time.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use murmur_decode::{CancellationToken, PromptOptions};
use murmur_settings::{
    MurmurSettings, get_settings, init_settings, load_settings, load_settings_from_path,
};
use murmur_transcription::{TranscriptionEngine, audio, ensure_model, resolve_model_dir};
use tracing::{info, warn};

/// Whisper transcription on ONNX Runtime.
#[derive(Parser, Debug)]
#[command(name = "murmur", version, about = "Whisper transcription on ONNX Runtime")]
struct Cli {
    /// Settings file (defaults to `~/.murmur/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Emit logs and results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transcribe an audio file (WAV, M4A, AAC).
    Transcribe(TranscribeArgs),
    /// Download the model files into the model directory.
    Download {
        /// Model directory (overrides settings).
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct TranscribeArgs {
    /// Audio file to transcribe.
    file: PathBuf,

    /// Language code, e.g. `en` or `zh`.
    #[arg(long)]
    language: Option<String>,

    /// `transcribe` or `translate`.
    #[arg(long)]
    task: Option<String>,

    /// Generation steps allowed after the prompt.
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Model directory (overrides settings).
    #[arg(long)]
    model_dir: Option<PathBuf>,
}

fn init_logging(json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // set_global_default is a no-op if already set
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

fn load(path: Option<&PathBuf>) -> Result<MurmurSettings> {
    match path {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => load_settings().context("failed to load settings"),
    }
}

/// Fold command-line flags over loaded settings.
fn apply_args(settings: &mut MurmurSettings, args: &TranscribeArgs) -> Result<()> {
    if let Some(dir) = &args.model_dir {
        settings.model.dir = Some(dir.to_string_lossy().into_owned());
    }
    if let Some(max_tokens) = args.max_tokens {
        settings.decode.max_tokens = max_tokens;
    }
    settings.validate().context("invalid settings")?;
    Ok(())
}

/// Install `settings` as the process-wide settings and return the global.
fn install(settings: MurmurSettings) -> &'static MurmurSettings {
    if init_settings(settings).is_err() {
        warn!("settings already initialized, keeping the existing values");
    }
    get_settings()
}

fn prompt_options(args: &TranscribeArgs) -> PromptOptions {
    let mut options = PromptOptions::default();
    if let Some(language) = &args.language {
        options = options.language(language.as_str());
    }
    if let Some(task) = &args.task {
        options = options.task(task.as_str());
    }
    options
}

async fn download(mut settings: MurmurSettings, model_dir: Option<PathBuf>) -> Result<()> {
    if let Some(dir) = model_dir {
        settings.model.dir = Some(dir.to_string_lossy().into_owned());
    }
    let settings = install(settings);
    let dir = resolve_model_dir(&settings.model);
    ensure_model(&dir, &settings.model)
        .await
        .with_context(|| format!("failed to download {}", settings.model.hf_repo))?;
    info!(dir = %dir.display(), "model ready");
    Ok(())
}

async fn transcribe(mut settings: MurmurSettings, args: &TranscribeArgs, json: bool) -> Result<()> {
    apply_args(&mut settings, args)?;
    let settings = install(settings);

    let model_dir = resolve_model_dir(&settings.model);
    ensure_model(&model_dir, &settings.model)
        .await
        .context("model files unavailable")?;

    let data = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let mime = audio::mime_for_path(&args.file);

    let engine = TranscriptionEngine::new(settings.clone())
        .await
        .context("failed to load transcription engine")?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling transcription");
            interrupt.cancel();
        }
    });

    let outcome = engine
        .transcribe(&data, mime, prompt_options(args), cancel)
        .await;
    watcher.abort();

    let result = match outcome {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => bail!("transcription cancelled"),
        Err(e) => return Err(e).context("transcription failed"),
    };

    info!(
        tokens = result.tokens,
        stop = %result.stop_reason,
        duration = result.duration_seconds,
        "transcribed {}",
        args.file.display()
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.text);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json);

    let settings = load(cli.settings.as_ref())?;
    match cli.command {
        Command::Transcribe(args) => transcribe(settings, &args, cli.json).await,
        Command::Download { model_dir } => download(settings, model_dir).await,
    }
}
