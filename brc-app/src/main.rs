//! brclient: command-line front end for the BRClient provider layer.

mod commands;
mod config;
mod init;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "brclient", version, about = "Chat with Claude, Bedrock and OpenAI models")]
struct Cli {
    /// Config file (default: ~/.brclient/config.toml).
    #[arg(long, global = true, env = "BRCLIENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one prompt and print the reply.
    Chat {
        prompt: String,
        #[arg(long)]
        model: Option<String>,
        /// claude | aws | openai | gemini
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        system: Option<String>,
        /// Wait for the full reply instead of streaming it.
        #[arg(long)]
        no_stream: bool,
        /// JSON file with tool definitions (a list, or a tool set object).
        #[arg(long, value_name = "FILE")]
        tools: Option<PathBuf>,
    },
    /// List models offered by the configured backend.
    Models,
    /// Show account usage from the configured backend.
    Usage,
    /// Publish a JSON transcript and print its public link.
    Share {
        transcript: PathBuf,
        #[arg(long)]
        avatar_url: Option<String>,
    },
    /// Write a config template (idempotent).
    Init,
    /// Validate config and show which backend would be used.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("brclient: ignoring unreadable .env: {e}");
        }
    }
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    let config = cli.config;

    match cli.command {
        Command::Chat {
            prompt,
            model,
            provider,
            system,
            no_stream,
            tools,
        } => {
            commands::chat(
                config,
                commands::ChatRequest {
                    prompt,
                    model,
                    provider,
                    system,
                    no_stream,
                    tools,
                },
            )
            .await
        }
        Command::Models => commands::models(config).await,
        Command::Usage => commands::usage(config).await,
        Command::Share {
            transcript,
            avatar_url,
        } => commands::share(config, &transcript, avatar_url.as_deref()).await,
        Command::Init => {
            match init::initialize(config).await? {
                init::InitOutcome::Created(path) => {
                    println!("brclient init: wrote {}", path.display());
                }
                init::InitOutcome::AlreadyPresent(path) => {
                    println!("brclient init: kept existing {}", path.display());
                }
            }
            Ok(())
        }
        Command::Doctor => commands::doctor(config).await,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new("info,brclient=debug,brc_llm=debug"),
    };
    let log_format = std::env::var("BRCLIENT_LOG_FORMAT")
        .unwrap_or_else(|_| "compact".to_string())
        .to_ascii_lowercase();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    match log_format.as_str() {
        "json" => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        "pretty" => builder.pretty().init(),
        "compact" => builder.compact().init(),
        other => {
            return Err(anyhow::anyhow!(
                "unsupported BRCLIENT_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::debug!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}
