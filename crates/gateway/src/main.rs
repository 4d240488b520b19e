//! The `keel` daemon: load config, wire the core, serve HTTP.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use keel_agent::scheduler::Scheduler;
use keel_agent::tools::spawn::{SpawnTool, SubagentRegistry, SubagentsTool};
use keel_agent::tools::ToolSet;
use keel_agent::{Agent, AgentSettings};
use keel_domain::config::Config;
use keel_gateway::{api, AppState};
use keel_providers::HttpProvider;
use keel_store::{FileStore, MessageStore};

#[derive(Parser, Debug)]
#[command(name = "keel", about = "Long-running conversational agent daemon")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, default_value = "keel.toml")]
    config: PathBuf,

    /// Override the configured state directory.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("KEEL_LOG").unwrap_or_else(|_| EnvFilter::new("keel=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let mut config: Config = if args.config.exists() {
        let raw = std::fs::read_to_string(&args.config)
            .with_context(|| format!("reading {}", args.config.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", args.config.display()))?
    } else {
        tracing::info!(path = %args.config.display(), "no config file; using defaults");
        Config::default()
    };
    if let Some(dir) = args.state_dir {
        config.state.dir = dir;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    // ── Core wiring ─────────────────────────────────────────────────
    let store: Arc<dyn MessageStore> = Arc::new(FileStore::open(&config.state.dir)?);
    let provider = Arc::new(HttpProvider::from_config(&config.provider, &config.retry)?);

    let settings = AgentSettings {
        loop_cfg: config.agent.clone(),
        compaction: config.compaction.clone(),
        spawn: config.spawn.clone(),
        pricing: config.pricing.clone(),
        prompt_mode: Default::default(),
    };

    // External tools (fs/shell/memory executors) plug in here; the
    // core ships with the sub-agent tools.
    let base_tools = ToolSet::new();
    let registry = Arc::new(SubagentRegistry::new());
    let mut tools = base_tools.clone();
    tools.register(Arc::new(SpawnTool::new(
        store.clone(),
        provider.clone(),
        settings.clone(),
        registry.clone(),
        base_tools,
    )));
    tools.register(Arc::new(SubagentsTool::new(registry)));

    let agent = Agent::new(store.clone(), provider, tools, settings);

    let scheduler = Arc::new(Scheduler::load(&config.state.dir)?);
    let _ticker = scheduler.spawn_ticker(
        agent.clone(),
        Duration::from_secs(config.scheduler.tick_secs),
    );

    let webhooks: HashMap<String, Option<String>> = config
        .webhooks
        .iter()
        .map(|w| (w.id.clone(), w.secret.clone()))
        .collect();

    let state = AppState {
        agent,
        store,
        scheduler,
        webhooks: Arc::new(webhooks),
    };

    // ── Serve ───────────────────────────────────────────────────────
    let router = api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    tracing::info!(bind = %config.server.bind, "keel listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
