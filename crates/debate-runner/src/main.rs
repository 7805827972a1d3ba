use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use debate_engine::{
    Engine, EngineConfig, GeneratorConfig, HttpAiTurnGenerator, InMemoryCatalog,
    JsonFileSessionStore, SessionEvent, SessionStore, TierAccessPolicy, TopicCatalog, TreeGraph,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (defaults plus DEBATE_* environment overrides when absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Session store directory (overrides store_dir)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a topic's decision tree for structural problems
    Validate {
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        topic: String,
    },
    /// Play a topic's scripted rounds to completion
    Play {
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "local")]
        user: String,
    },
    /// Print the stored report of a completed session as JSON
    Report {
        #[arg(long)]
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::from_env().context("reading DEBATE_* environment")?,
    };
    if let Some(dir) = args.store_dir {
        config.store_dir = dir;
    }
    config.validate().context("invalid configuration")?;

    match args.command {
        Command::Validate { catalog, topic } => validate(&catalog, &topic).await,
        Command::Play {
            catalog,
            topic,
            user,
        } => play(config, &catalog, &topic, &user).await,
        Command::Report { session } => report(&config, &session).await,
    }
}

async fn load_catalog(path: &Path) -> Result<InMemoryCatalog> {
    InMemoryCatalog::from_json_file(path)
        .await
        .with_context(|| format!("loading catalog from {}", path.display()))
}

async fn validate(catalog_path: &Path, topic_id: &str) -> Result<()> {
    let catalog = load_catalog(catalog_path).await?;
    let nodes = catalog.get_tree_nodes(topic_id).await?;
    if nodes.is_empty() {
        bail!("topic {topic_id} has no decision tree");
    }
    let graph = TreeGraph::build(nodes)?;
    let report = graph.validate();

    println!(
        "root={} nodes={} terminal_options={} cycle={}",
        report.root_id, report.node_count, report.terminal_options, report.has_cycle
    );
    for issue in &report.issues {
        println!("  - {issue}");
    }
    if !report.is_valid() {
        bail!("{} issue(s) found in tree for {topic_id}", report.issues.len());
    }
    info!(topic_id, "Decision tree is valid");
    Ok(())
}

async fn play(config: EngineConfig, catalog_path: &Path, topic_id: &str, user: &str) -> Result<()> {
    let catalog = load_catalog(catalog_path).await?.shared();
    let store = JsonFileSessionStore::open(&config.store_dir)
        .await
        .with_context(|| format!("opening session store at {}", config.store_dir.display()))?
        .shared();
    let generator =
        HttpAiTurnGenerator::new(GeneratorConfig::default(), config.generation_timeout())?.shared();
    let engine = Engine::new(
        config,
        store,
        catalog,
        TierAccessPolicy::new().shared(),
        generator,
    );

    let mut events = engine.events().subscribe();
    let playback = engine.scripted(user, topic_id).await?;
    let session = playback.snapshot().await;
    if session.is_completed() {
        info!(session_id = %session.id, "Playback already completed, restarting");
        playback.reset().await?;
    }
    let session_id = playback.snapshot().await.id;
    let total = playback.total_rounds().await;

    print_round(&playback.current_round().await, total);
    playback.play().await?;

    loop {
        match events.recv().await {
            Ok(SessionEvent::RoundAdvanced { session_id: id, .. }) if id == session_id => {
                print_round(&playback.current_round().await, total);
            }
            Ok(SessionEvent::Completed { session_id: id, .. }) if id == session_id => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
            Err(RecvError::Closed) => bail!("event stream closed before playback finished"),
        }
    }

    println!("Completed session {session_id}");
    Ok(())
}

fn print_round(round: &debate_engine::ScriptedRound, total: usize) {
    println!("--- Round {}/{} ---", round.index + 1, total);
    println!("[{}] {}", round.for_persona, round.for_message);
    println!("[{}] {}", round.against_persona, round.against_message);
}

async fn report(config: &EngineConfig, session_id: &str) -> Result<()> {
    let store = JsonFileSessionStore::open(&config.store_dir)
        .await
        .with_context(|| format!("opening session store at {}", config.store_dir.display()))?;
    let session = store
        .load_by_id(session_id)
        .await?
        .with_context(|| format!("no session with id {session_id}"))?;
    let Some(report) = session.report.as_ref().filter(|_| session.is_completed()) else {
        bail!("session {session_id} is {} and has no report", session.status);
    };
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
