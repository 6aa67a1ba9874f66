//! QQBridge - QQ to Claude Code CLI message bridge

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use qqbridge::{
    agent::{Invoke, ProcessInvoker, RetryingInvoker},
    config::{BridgeConfig, ConfigDocument, LogFormat},
    BridgeBuilder,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Config file looked up in the working directory when `-c` is not given
const LOCAL_CONFIG: &str = "config.yaml";

#[derive(Parser)]
#[command(name = "qqbridge")]
#[command(version)]
#[command(about = "Bridge QQ chats to the Claude Code CLI")]
struct Cli {
    /// Configuration file path (YAML, or TOML by extension)
    #[arg(short, long, env = "QQBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the OneBot gateway and serve until Ctrl+C
    Run,

    /// Inspect or edit configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Send one prompt to Claude and print the answer
    Ask {
        /// Prompt text
        prompt: String,
    },

    /// Run diagnostics
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },

    /// Print one value by dotted key (e.g. `claude.timeout`)
    Get { key: String },

    /// Set one value by dotted key and write the file back
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);

    match cli.command {
        Commands::Run => run_bridge(setup(&config_path, cli.verbose)?).await,
        Commands::Ask { prompt } => run_ask(setup(&config_path, cli.verbose)?, &prompt).await,
        Commands::Doctor => run_doctor(setup(&config_path, cli.verbose)?, &config_path).await,
        Commands::Config { action } => run_config(action, &config_path),
    }
}

/// Load configuration and initialize logging from it
fn setup(config_path: &Path, verbose: bool) -> Result<BridgeConfig> {
    let config = load_config(config_path)?;
    init_logging(&config, verbose);
    Ok(config)
}

fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    let local = PathBuf::from(LOCAL_CONFIG);
    if local.exists() {
        return local;
    }
    dirs_next::config_dir()
        .map(|dir| dir.join("qqbridge").join(LOCAL_CONFIG))
        .filter(|path| path.exists())
        .unwrap_or(local)
}

fn load_config(path: &Path) -> Result<BridgeConfig> {
    if path.exists() {
        BridgeConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        Ok(BridgeConfig::from_env()?)
    }
}

fn init_logging(config: &BridgeConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let json = config.logging.format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("qqbridge={}", level).into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn run_bridge(config: BridgeConfig) -> Result<()> {
    let bridge = BridgeBuilder::new().config(config).build()?;

    bridge.start().await?;
    tracing::info!("QQ bridge is running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    bridge.stop().await?;
    Ok(())
}

async fn run_ask(config: BridgeConfig, prompt: &str) -> Result<()> {
    let runner = Arc::new(ProcessInvoker::from_config(&config));
    let invoker = RetryingInvoker::from_config(runner, &config.claude);

    let result = invoker.invoke(prompt).await;
    if !result.success {
        bail!("{} (retries: {})", result.error, result.retry_count);
    }

    println!("{}", result.text);
    if result.cost > 0.0 {
        eprintln!("cost: ${:.4}, retries: {}", result.cost, result.retry_count);
    }
    Ok(())
}

async fn run_doctor(config: BridgeConfig, config_path: &Path) -> Result<()> {
    println!("QQBridge Doctor");
    println!();

    println!("Checking configuration...");
    if config_path.exists() {
        println!("  ✓ Configuration file found: {}", config_path.display());
    } else {
        println!("  ℹ No configuration file found (using defaults)");
    }

    println!();
    println!("Checking Claude Code CLI...");
    let invoker = ProcessInvoker::from_config(&config);
    match invoker.resolve_binary() {
        Some(path) => println!("  ✓ Found: {}", path.display()),
        None => println!(
            "  ✗ Not found (configured: {}); install with: npm install -g @anthropic-ai/claude-code",
            config.claude.cli_path
        ),
    }
    let work_dir = invoker.work_dir();
    if work_dir.is_dir() {
        println!("  ✓ Work directory: {}", work_dir.display());
    } else {
        println!("  ℹ Work directory will be created: {}", work_dir.display());
    }

    println!();
    println!("Checking OneBot gateway...");
    let url = config.network.onebot_ws_url.as_str();
    let timeout = config.network.connect_timeout().min(Duration::from_secs(10));
    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
        Ok(Ok((mut stream, _))) => {
            println!("  ✓ Reachable: {}", url);
            let _ = stream.close(None).await;
        }
        Ok(Err(e)) => println!("  ✗ Unreachable: {} ({})", url, e),
        Err(_) => println!("  ✗ Timed out after {}s: {}", timeout.as_secs(), url),
    }

    println!();
    println!("Doctor check complete!");
    Ok(())
}

fn run_config(action: ConfigAction, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Show { default } => {
            let config = if default {
                BridgeConfig::default()
            } else {
                load_config(path)?
            };
            print!("{}", ConfigDocument::from_config(&config)?.to_yaml_string()?);
        }
        ConfigAction::Get { key } => {
            let doc = load_document(path)?;
            let Some(value) = doc.get(&key) else {
                bail!("Unknown config key: {}", key);
            };
            match value {
                serde_yaml::Value::String(s) => println!("{}", s),
                other => print!("{}", serde_yaml::to_string(other)?),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut doc = load_document(path)?;
            let parsed: serde_yaml::Value = serde_yaml::from_str(&value)
                .unwrap_or_else(|_| serde_yaml::Value::String(value.clone()));
            doc.set(&key, parsed)?;
            doc.to_config()?.validate()?;
            doc.save(path)?;
            println!("Set {} in {}", key, path.display());
        }
    }
    Ok(())
}

/// The file's document, or the defaults when the file does not exist yet
fn load_document(path: &Path) -> Result<ConfigDocument> {
    if path.exists() {
        Ok(ConfigDocument::load(path)?)
    } else {
        Ok(ConfigDocument::from_config(&BridgeConfig::default())?)
    }
}
