mod config_watcher;
mod ingest;

use clap::{Parser, Subcommand};
use config_watcher::ConfigWatcher;
use stagehand_core::{Event, EventPayload, InMemoryMemory, Priority};
use stagehand_mcp::ToolBridge;
use stagehand_orchestrator::{classify, fallback_decision, LaneConfig, Orchestrator, OrchestratorConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stagehand", about = "Stagehand - event orchestration core")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "stagehand.toml")]
    config: PathBuf,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process newline-delimited JSON events from stdin
    Serve {
        /// Do not watch the config file for lane limit changes
        #[arg(long)]
        no_watch: bool,
    },
    /// Show how an event would be classified and routed by the rules
    Route {
        /// Message text
        text: String,
        #[arg(long, default_value = "chat")]
        source: String,
        #[arg(long = "type", default_value = "chat_message")]
        event_type: String,
        #[arg(long, default_value = "medium")]
        priority: String,
        /// Explicitly request (true) or suppress (false) speech
        #[arg(long)]
        speak: Option<bool>,
    },
    /// Validate the config file
    CheckConfig,
}

fn init_logging(pretty: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if pretty {
        builder.init();
    } else {
        builder.json().init();
    }
}

fn load_config(path: &Path, required: bool) -> anyhow::Result<OrchestratorConfig> {
    if !path.exists() && !required {
        warn!(path = %path.display(), "Config file not found, using defaults");
        return Ok(OrchestratorConfig::default());
    }
    Ok(OrchestratorConfig::load(path)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.pretty);

    match cli.command {
        Commands::Serve { no_watch } => {
            let config = load_config(&cli.config, false)?;
            serve(config, &cli.config, !no_watch).await?;
        }
        Commands::Route {
            text,
            source,
            event_type,
            priority,
            speak,
        } => {
            let priority: Priority = priority.parse().map_err(anyhow::Error::msg)?;
            let mut payload = EventPayload::message(text);
            payload.speak = speak;
            let event = Event::new(source, event_type, priority, payload);
            let report = serde_json::json!({
                "classification": classify(&event),
                "decision": fallback_decision(&event),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::CheckConfig => {
            let config = load_config(&cli.config, true)?;
            println!("Config OK: {}", cli.config.display());
            println!(
                "  lanes: standard={} latency_sensitive={}",
                config.lanes.standard_concurrency, config.lanes.latency_sensitive_concurrency
            );
            println!(
                "  retry: max_retries={} interval={}s",
                config.retry.max_retries, config.retry.interval_secs
            );
            println!("  agent: {}", config.supervisor.agent.program);
            let mut backends: Vec<&String> = config.backends.keys().collect();
            backends.sort();
            println!("  backends: {backends:?}");
            println!("  tool servers: {}", config.tool_servers.len());
            println!("  triggers: {}", config.triggers.len());
        }
    }

    Ok(())
}

async fn serve(config: OrchestratorConfig, config_path: &Path, watch: bool) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let mut builder = Orchestrator::builder(config.clone()).memory(Arc::new(InMemoryMemory::new()));

    let bridge = if config.tool_servers.is_empty() {
        None
    } else {
        let bridge = Arc::new(ToolBridge::new(config.tool_servers.clone()));
        for e in bridge.connect_all().await {
            warn!(error = %e, "Tool server unavailable at startup");
        }
        if let Some(path) = &config.supervisor.agent.mcp_config_path {
            bridge.write_agent_config(path).await?;
        }
        bridge
            .clone()
            .start_health_loop(Duration::from_secs(30), cancel.clone());
        builder = builder.tools(bridge.clone());
        Some(bridge)
    };

    let orchestrator = Arc::new(builder.build()?);
    orchestrator.start();

    let (reload_tx, mut reload_rx) = mpsc::unbounded_channel::<LaneConfig>();
    let _watcher = if watch && config_path.exists() {
        Some(ConfigWatcher::start(
            config_path.to_path_buf(),
            500,
            move |reloaded| {
                if let Some(lanes) = reloaded.lanes {
                    let _ = reload_tx.send(lanes);
                }
            },
        )?)
    } else {
        None
    };
    let reloader = orchestrator.clone();
    tokio::spawn(async move {
        while let Some(lanes) = reload_rx.recv().await {
            info!(
                standard = lanes.standard_concurrency,
                latency_sensitive = lanes.latency_sensitive_concurrency,
                "Applying reloaded lane limits"
            );
            reloader.reconfigure_lanes(&lanes);
        }
    });

    info!("Reading events from stdin");
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => match ingest::parse_line(&line) {
                    Ok(Some(event)) => {
                        let admission = orchestrator.queue_event(event).await;
                        println!("{}", serde_json::to_string(&admission)?);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Skipping malformed event line"),
                },
                None => {
                    info!("Input closed, waiting for in-flight events");
                    tokio::select! {
                        _ = &mut shutdown => info!("Shutdown signal received"),
                        _ = drain(&orchestrator) => {}
                    }
                    break;
                }
            },
        }
    }

    let status = orchestrator.get_status().await;
    let killed = orchestrator.shutdown().await;
    cancel.cancel();
    if let Some(bridge) = bridge {
        bridge.shutdown().await;
    }

    let report = serde_json::json!({
        "status": status,
        "activity": orchestrator.monitor().to_json().await,
        "workers_terminated": killed,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn drain(orchestrator: &Orchestrator) {
    while !orchestrator.wait_idle(Duration::from_secs(1)).await {}
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
