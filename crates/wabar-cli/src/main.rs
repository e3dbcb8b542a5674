//! wabar CLI
//!
//! Query sway's bar IPC and watch what the bar bridge publishes.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use wabar_bridge::sway_ipc::{self, parse_payload, RequestKind};
use wabar_bridge::{BarBridge, BarConfig, CommandOutcome, LinkState};
use wabar_config::{BarSettings, Config};

const DEFAULT_CONFIG_PATH: &str = "~/.config/wabar/config.kdl";

#[derive(Parser, Debug)]
#[command(name = "wabar")]
#[command(about = "Sway bar IPC bridge")]
#[command(version)]
struct Cli {
    /// Path to configuration file [default: ~/.config/wabar/config.kdl]
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// List the bar ids sway knows about
    BarIds,

    /// Print a bar's configuration as JSON
    BarConfig {
        /// Bar id (defaults to the configured bar, then the first bar)
        id: Option<String>,
    },

    /// Run a sway command
    Command {
        /// Command string, e.g. "bar mode toggle"
        command: String,
    },

    /// Connect a bridge and print every signal until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let explicit = cli.config.is_some();
    let config_path: PathBuf =
        shellexpand::tilde(cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH))
            .into_owned()
            .into();

    let config = load_config(&config_path, explicit);
    init_tracing(
        config
            .as_ref()
            .map_or("warn", |config| config.global.log_level.as_filter()),
    );

    match cli.command {
        Commands::Validate => cmd_validate(&config_path),
        Commands::BarIds => cmd_bar_ids(&config?.bar).await,
        Commands::BarConfig { id } => cmd_bar_config(&config?.bar, id).await,
        Commands::Command { command } => cmd_command(&config?.bar, &command).await,
        Commands::Watch => cmd_watch(config?.bar).await,
    }
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(fallback: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .init();
}

/// A missing file at the default location means "use defaults"
fn load_config(path: &Path, explicit: bool) -> miette::Result<Config> {
    if !explicit && !path.exists() {
        return Ok(Config::default());
    }
    Ok(wabar_config::parse_config(path)?)
}

fn socket_path(settings: &BarSettings) -> miette::Result<PathBuf> {
    let path = match &settings.socket {
        Some(path) => path.clone(),
        None => sway_ipc::get_socket_path().into_diagnostic()?,
    };
    debug!("Using sway socket {}", path.display());
    Ok(path)
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = wabar_config::parse_config(config_path)?;
    let bar = &config.bar;

    println!("Configuration is valid!");
    println!("  Log level: {}", config.global.log_level.as_filter());
    println!("  Bar: {}", bar.id.as_deref().unwrap_or("<first reported by sway>"));
    if let Some(socket) = &bar.socket {
        println!("    Socket: {}", socket.display());
    }
    println!("    Modifier reset: {:?}", bar.modifier_reset);
    if let Some(modifier) = &bar.toggle_modifier {
        println!("    Toggle modifier: {}", modifier);
    }
    println!("    Max frame size: {} bytes", bar.max_frame_size);

    Ok(())
}

async fn bar_ids(path: &Path) -> miette::Result<Vec<String>> {
    let reply = sway_ipc::request_once(path, RequestKind::GetBarIds, b"")
        .await
        .into_diagnostic()?;
    parse_payload(&reply, "bar id list").into_diagnostic()
}

async fn cmd_bar_ids(settings: &BarSettings) -> miette::Result<()> {
    let path = socket_path(settings)?;

    for id in bar_ids(&path).await? {
        println!("{}", id);
    }

    Ok(())
}

async fn cmd_bar_config(settings: &BarSettings, id: Option<String>) -> miette::Result<()> {
    let path = socket_path(settings)?;

    let id = match id.or_else(|| settings.id.clone()) {
        Some(id) => id,
        None => bar_ids(&path)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| miette::miette!("Sway reports no bars"))?,
    };

    let reply = sway_ipc::request_once(&path, RequestKind::GetBarConfig, id.as_bytes())
        .await
        .into_diagnostic()?;
    let value: serde_json::Value = parse_payload(&reply, "bar config").into_diagnostic()?;

    if value.get("success").and_then(serde_json::Value::as_bool) == Some(false) {
        return Err(miette::miette!(
            "Sway rejected bar {}: {}",
            id,
            value.get("error").and_then(serde_json::Value::as_str).unwrap_or("unknown error")
        ));
    }

    println!("{}", serde_json::to_string_pretty(&value).into_diagnostic()?);
    Ok(())
}

async fn cmd_command(settings: &BarSettings, command: &str) -> miette::Result<()> {
    let path = socket_path(settings)?;

    let reply = sway_ipc::request_once(&path, RequestKind::RunCommand, command.as_bytes())
        .await
        .into_diagnostic()?;
    let outcomes: Vec<CommandOutcome> =
        parse_payload(&reply, "command reply").into_diagnostic()?;

    let mut failed = 0;
    for outcome in &outcomes {
        if outcome.success {
            println!("ok");
        } else {
            failed += 1;
            println!(
                "error: {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if failed > 0 {
        return Err(miette::miette!("{} of {} command(s) failed", failed, outcomes.len()));
    }
    Ok(())
}

#[derive(Debug)]
enum WatchEvent {
    Visible(bool),
    Mode(bool),
    Urgency(bool),
    Config(Option<BarConfig>),
    Link(LinkState),
}

async fn cmd_watch(settings: BarSettings) -> miette::Result<()> {
    let mut bridge = BarBridge::connect(settings).await.into_diagnostic()?;
    let signals = bridge.signals();

    let updates = WatchStream::new(signals.visible)
        .map(WatchEvent::Visible)
        .merge(WatchStream::new(signals.mode).map(WatchEvent::Mode))
        .merge(WatchStream::new(signals.urgency).map(WatchEvent::Urgency))
        .merge(WatchStream::new(signals.config).map(WatchEvent::Config))
        .merge(WatchStream::new(signals.link).map(WatchEvent::Link));
    tokio::pin!(updates);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.into_diagnostic()?;
                info!("Interrupted, closing bridge");
                bridge.disconnect().await;
                return Ok(());
            }
            event = updates.next() => match event {
                Some(WatchEvent::Visible(visible)) => println!("visible {}", visible),
                Some(WatchEvent::Mode(by_mode)) => println!("mode {}", by_mode),
                Some(WatchEvent::Urgency(urgent)) => println!("urgency {}", urgent),
                Some(WatchEvent::Config(Some(config))) => {
                    println!("config {}", serde_json::to_string(&config).into_diagnostic()?);
                }
                Some(WatchEvent::Config(None)) => {}
                Some(WatchEvent::Link(LinkState::Disconnected(reason))) => {
                    return Err(miette::miette!("Disconnected: {}", reason));
                }
                Some(WatchEvent::Link(state)) => println!("link {:?}", state),
                None => return Ok(()),
            }
        }
    }
}
