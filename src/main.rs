//! CLI host for the throttling controller.
//!
//! Assembles a run request from flags and the settings store, starts the
//! supervisor, and wires Ctrl-C to the cancellation entry point so shutdown
//! always waits for rule cleanup before the process exits.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use netcycle::core::CycleConfig;
use netcycle::{config, BackendChoice, ConfigStore, RunRequest, Supervisor, TargetProcess};

#[derive(Parser)]
#[command(
    name = "netcycle",
    version,
    about = "Cyclic outbound network blocker for a target process"
)]
struct Cli {
    /// Path to the SQLite settings store.
    #[arg(long, default_value = config::STORE_FILE_NAME)]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a throttling run against the configured target.
    Run {
        /// Target executable path (defaults to the last saved path).
        #[arg(long)]
        path: Option<String>,
        /// Additional executable name the same binary may run under.
        #[arg(long = "alias")]
        aliases: Vec<String>,
        /// Seconds between launch and the first block (0-300).
        #[arg(long)]
        ban: Option<u64>,
        /// Seconds each blocked interval lasts (0-30).
        #[arg(long)]
        intermittent: Option<u64>,
        /// Seconds each connect window lasts (0-120).
        #[arg(long)]
        connect: Option<u64>,
        /// Firewall tool: netsh or powershell.
        #[arg(long)]
        backend: Option<String>,
    },
    /// Save the target executable path to the store.
    SetPath { path: String },
    /// Print the stored settings as JSON.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in netcycle: {info}");
        default_hook(info);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netcycle=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let store = ConfigStore::open(&cli.store).context("failed to open settings store")?;

    match cli.command {
        Command::SetPath { path } => {
            store.save_path(&path)?;
            tracing::info!("target path saved: {path}");
            Ok(())
        }
        Command::Config => show_config(&store),
        Command::Run {
            path,
            aliases,
            ban,
            intermittent,
            connect,
            backend,
        } => {
            run(
                &store,
                path,
                aliases,
                ban,
                intermittent,
                connect,
                backend,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    store: &ConfigStore,
    path: Option<String>,
    aliases: Vec<String>,
    ban: Option<u64>,
    intermittent: Option<u64>,
    connect: Option<u64>,
    backend: Option<String>,
) -> anyhow::Result<()> {
    let path = match path {
        Some(p) => p,
        None => store.latest_path()?.unwrap_or_default(),
    };
    if path.trim().is_empty() {
        anyhow::bail!("no target path configured; pass --path or run 'netcycle set-path <exe>'");
    }

    let cycle = CycleConfig {
        ban_delay_secs: match ban {
            Some(v) => v,
            None => store
                .ban_delay_secs()?
                .unwrap_or(config::DEFAULT_BAN_DELAY_SECS),
        },
        intermittent_block_secs: match intermittent {
            Some(v) => v,
            None => store
                .intermittent_block_secs()?
                .unwrap_or(config::DEFAULT_INTERMITTENT_BLOCK_SECS),
        },
        connect_window_secs: match connect {
            Some(v) => v,
            None => store
                .connect_window_secs()?
                .unwrap_or(config::DEFAULT_CONNECT_WINDOW_SECS),
        },
    };
    let backend_choice = match backend {
        Some(raw) => raw.parse::<BackendChoice>()?,
        None => store.firewall_tool()?,
    };

    // The chosen values become the next run's defaults.
    store.save_path(&path)?;
    store.save_cycle(&cycle)?;
    store.set_firewall_tool(backend_choice)?;

    let mut target = TargetProcess::from_path(&path)?;
    for alias in &aliases {
        target.add_alias(alias);
    }

    let mut handle = Supervisor::new().start(RunRequest {
        target,
        cycle,
        backend_choice,
    })?;
    tracing::info!("waiting for target to launch; press Ctrl-C to stop");

    let finished = tokio::select! {
        reason = handle.wait() => Some(reason),
        _ = tokio::signal::ctrl_c() => None,
    };
    let reason = match finished {
        Some(reason) => reason,
        None => {
            tracing::info!("shutdown requested; restoring network before exit");
            handle.cancel().await
        }
    };
    tracing::info!("run finished: {reason}");
    Ok(())
}

fn show_config(store: &ConfigStore) -> anyhow::Result<()> {
    let settings = serde_json::json!({
        "target_path": store.latest_path()?,
        "ban_delay_secs": store.ban_delay_secs()?,
        "intermittent_block_secs": store.intermittent_block_secs()?,
        "connect_window_secs": store.connect_window_secs()?,
        "firewall_tool": store.firewall_tool()?.as_store_value(),
    });
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
