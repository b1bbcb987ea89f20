//! # genie-cli
//!
//! Binary entry point for the GenIE bridge.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration loading and logging setup
//! - One-shot questions via `genie ask`
//! - An interactive session via `genie chat`
//! - Offline reply extraction via `genie extract`
//! - The instructions document via `genie instructions`

mod logging;
mod repl;

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use genie_adapters::Session;
use genie_core::{BridgeConfig, InstructionBuilder, ResponseProcessor};
use tracing::info;

/// GenIE - drive an interactive chat CLI and get clean replies back
#[derive(Parser, Debug)]
#[command(name = "genie", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (default: $GENIE_CONFIG, then ./genie.yml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask a single question and print the reply
    Ask(AskArgs),

    /// Start an interactive session
    Chat(ChatArgs),

    /// Extract the reply from a captured transcript
    Extract(ExtractArgs),

    /// Print or write the GenIE_json instructions document
    Instructions(InstructionsArgs),

    /// Print the effective configuration as YAML
    Config,
}

/// Arguments for the ask subcommand.
#[derive(Parser, Debug)]
struct AskArgs {
    /// The question, command or confirmation to send
    prompt: String,

    /// Seconds of silence before giving up (default: ask_timeout_secs)
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Switch to this model before asking
    #[arg(short, long)]
    model: Option<String>,
}

/// Arguments for the chat subcommand.
#[derive(Parser, Debug)]
struct ChatArgs {
    /// Switch to this model after launch
    #[arg(short, long)]
    model: Option<String>,
}

/// Arguments for the extract subcommand.
#[derive(Parser, Debug)]
struct ExtractArgs {
    /// Transcript file (reads stdin when omitted)
    file: Option<PathBuf>,
}

/// Arguments for the instructions subcommand.
#[derive(Parser, Debug)]
struct InstructionsArgs {
    /// Write to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Overwrite the output file if it exists
    #[arg(long, requires = "output")]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = BridgeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let log_file = logging::init(&config, cli.verbose)?;
    if let Some(path) = log_file {
        info!(path = %path.display(), "Logging to file");
    }

    match cli.command {
        Commands::Ask(args) => ask_command(config, args).await,
        Commands::Chat(args) => chat_command(config, args).await,
        Commands::Extract(args) => extract_command(&config, &args),
        Commands::Instructions(args) => instructions_command(&args),
        Commands::Config => config_command(&config),
    }
}

async fn ask_command(config: BridgeConfig, args: AskArgs) -> Result<()> {
    let session = Session::with_pty(config).context("Failed to create session")?;

    let result: Result<String> = async {
        repl::ensure_started(&session).await?;
        if let Some(model) = &args.model {
            session
                .select_model(model)
                .await
                .with_context(|| format!("Failed to switch to {model}"))?;
        }
        session
            .ask(&args.prompt, args.timeout.map(Duration::from_secs))
            .await
            .context("Request failed")
    }
    .await;

    session.close().await;
    println!("{}", result?);
    Ok(())
}

async fn chat_command(config: BridgeConfig, args: ChatArgs) -> Result<()> {
    let session = Session::with_pty(config).context("Failed to create session")?;
    let result = repl::run(&session, args.model.as_deref()).await;
    session.close().await;
    result
}

fn extract_command(config: &BridgeConfig, args: &ExtractArgs) -> Result<()> {
    let transcript = match &args.file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            text
        }
    };

    let processor = ResponseProcessor::new(&config.marker).context("Invalid marker regex")?;
    let reply = processor
        .extract_reply(&genie_core::strip_ansi(&transcript))
        .context("No reply could be extracted")?;
    println!("{reply}");
    Ok(())
}

fn instructions_command(args: &InstructionsArgs) -> Result<()> {
    let builder = InstructionBuilder::default();
    match &args.output {
        Some(path) if args.force => {
            fs::write(path, builder.build())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        Some(path) => {
            let written = builder
                .write_if_missing(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if written {
                eprintln!("Wrote {}", path.display());
            } else {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(builder.build().as_bytes())?;
        }
    }
    Ok(())
}

fn config_command(config: &BridgeConfig) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{yaml}");
    Ok(())
}
