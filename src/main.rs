mod agent;
mod cancel;
mod client;
mod clipboard;
mod coalesce;
mod commands;
mod config;
mod conversation;
mod dispatch;
mod error;
mod events;
mod explorer;
mod focus;
mod git;
mod multiplexer;
mod prompt_history;
mod status;
mod theme;
mod tui;
mod watcher;
mod workflow;

#[cfg(test)]
mod test_support;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent::{OpenAiAgent, SharedAgent};
use coalesce::Flush;
use config::{ConfigFile, ResolvedConfig};
use dispatch::Dispatcher;
use events::EventBus;
use prompt_history::PromptHistory;
use tui::{AppState, Services, UiEvent};
use watcher::DirWatcher;
use workflow::{AgentSlot, LocalWorkflowRunner, SharedRunner};

#[derive(Parser, Debug)]
#[command(
    name = "quorum",
    version,
    about = "Interactive terminal controller for multi-agent LLM workflows",
    long_about = None,
)]
struct Args {
    /// Profile to use from config file
    #[arg(short, long, env = "QUORUM_PROFILE")]
    profile: Option<String>,

    /// Override endpoint URL
    #[arg(long, env = "QUORUM_ENDPOINT")]
    endpoint: Option<String>,

    /// Override model name
    #[arg(short, long, env = "QUORUM_MODEL")]
    model: Option<String>,

    /// Override API key
    #[arg(long, env = "QUORUM_API_KEY")]
    api_key: Option<String>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Log file (default: <state dir>/quorum.log)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Write a default config file to ~/.config/quorum/config.toml and exit
    #[arg(long)]
    init: bool,

    /// List available profiles and agents, then exit
    #[arg(long)]
    profiles: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: quorum");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    let file = ConfigFile::load()?;

    // ── --profiles ────────────────────────────────────────────────────────────
    if args.profiles {
        print_profiles(&file);
        return Ok(());
    }

    let resolved = ResolvedConfig::resolve(
        &file,
        args.profile.as_deref(),
        args.endpoint.as_deref(),
        args.model.as_deref(),
        args.api_key.as_deref(),
    );

    let log_path = args
        .log_file
        .clone()
        .unwrap_or_else(|| resolved.state_dir.join("quorum.log"));
    init_tracing(&log_path, args.verbose)?;
    tracing::info!(profile = %resolved.profile_name, model = %resolved.model, "starting");

    run(resolved).await
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// The terminal belongs to the UI, so tracing output goes to a file.
fn init_tracing(path: &Path, verbose: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let filter = if verbose { "quorum=debug" } else { "quorum=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

// ── Wiring ────────────────────────────────────────────────────────────────────

fn build_agents(resolved: &ResolvedConfig) -> Vec<AgentSlot> {
    resolved
        .agents
        .iter()
        .map(|a| {
            let (endpoint, model, api_key) = resolved.agent_backend(a);
            let mut client = client::Client::new(endpoint, model.clone());
            if let Some(key) = api_key {
                client.set_api_key(key);
            }
            let shared: SharedAgent = Arc::new(OpenAiAgent::new(&a.name, client));
            AgentSlot {
                agent: shared,
                system_prompt: agent::system_prompt(a.role.as_deref()),
                model: Some(model),
            }
        })
        .collect()
}

async fn run(resolved: ResolvedConfig) -> Result<()> {
    let (tx, inbox) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(tx);

    let agents = build_agents(&resolved);
    let bus = EventBus::default();
    let runner: SharedRunner = Arc::new(LocalWorkflowRunner::new(
        agents.clone(),
        bus.clone(),
        &resolved.state_dir,
        resolved.cost_per_mtok_input,
    ));

    let _multiplexer = multiplexer::spawn(
        &bus,
        dispatcher.clone(),
        resolved.events.debounce(),
        resolved.events.batch_cap,
        |flush| match flush {
            Flush::Single(ev) => UiEvent::Bus(ev),
            Flush::Batch(evs) => UiEvent::BusBatch(evs),
        },
    );

    let root = std::env::current_dir().context("Failed to read the working directory")?;
    let watcher = match DirWatcher::start(&root, watcher::DEFAULT_DEBOUNCE) {
        Ok(w) => Some(Arc::new(w)),
        Err(e) => {
            tracing::warn!("file watching disabled: {e}");
            None
        }
    };
    if let Some(mut changes) = watcher.as_ref().and_then(|w| w.on_change()) {
        let d = dispatcher.clone();
        tokio::spawn(async move {
            while changes.recv().await.is_some() {
                d.post(UiEvent::FileChanged);
            }
        });
    }

    let history = PromptHistory::load(
        prompt_history::history_path(&resolved.state_dir),
        resolved.session.prompt_history_capacity,
    );
    let state = AppState::new(&resolved, root, history);
    let services = Services {
        dispatcher,
        agents,
        runner: Some(runner),
        watcher,
    };

    tui::run(state, services, inbox).await
}

// ── --profiles ────────────────────────────────────────────────────────────────

fn print_profiles(file: &ConfigFile) {
    let mut entries: Vec<(&String, &config::Profile)> = file.profiles.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    println!();
    println!("  Profiles");
    for (name, p) in &entries {
        let marker = if **name == file.default_profile { " ←" } else { "" };
        println!("  {name}{marker}");
        println!("    endpoint  {}", p.endpoint);
        println!("    model     {}", p.model);
        if let Some(cost) = p.cost_per_mtok_input {
            println!("    cost      ${cost}/Mtok in");
        }
        println!();
    }
    if !file.agents.is_empty() {
        println!("  Agents");
        for a in &file.agents {
            let state = if a.enabled { "" } else { "  (disabled)" };
            let model = a.model.as_deref().unwrap_or("profile model");
            println!("    {:<12} {model}{state}", a.name);
        }
        println!();
    }
}

// ── Shell completions ─────────────────────────────────────────────────────────

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash"    => Shell::Bash,
        "zsh"     => Shell::Zsh,
        "fish"    => Shell::Fish,
        "elvish"  => Shell::Elvish,
        _ => anyhow::bail!("unknown shell {shell_name} (supported: bash, zsh, fish, elvish)"),
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "quorum", &mut std::io::stdout());
    Ok(())
}
