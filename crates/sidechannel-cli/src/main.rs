//! sidechannel CLI
//!
//! The `sidechannel` command drives the advisory mailbox through a scripted
//! agent loop.
//!
//! ## Commands
//!
//! - `simulate`: Run a JSON scenario step by step and print a JSON summary
//! - `config`: Print the effective configuration

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, Level};

use sidechannel_core::{
    Advisory, ContentFormatter, DispatchCoordinator, DispatchHandler, DispatchReport,
    FailureDetector, FailureVerdict, GcReport, HandlerOutput, HandlerRegistry, Message,
    MessageCategory, MessageQuery, MessageStore, Metrics, ResponseDescriptor, Sanitizer, Severity,
    SharedStore, SidechannelConfig, SnapshotFilter, StepSnapshot,
};

#[derive(Parser)]
#[command(name = "sidechannel")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Step-scoped advisory mailbox for agent loops", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted scenario through store, retention, and dispatch
    Simulate {
        /// Scenario file (JSON)
        #[arg(short, long)]
        scenario: PathBuf,

        /// Config file (TOML); SIDECHANNEL_* env vars override it
        #[arg(short, long, env = "SIDECHANNEL_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration as JSON
    Config {
        /// Config file (TOML)
        #[arg(short, long, env = "SIDECHANNEL_CONFIG")]
        config: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Scenario format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct Scenario {
    #[serde(default = "default_thread")]
    thread_id: String,
    #[serde(default)]
    watchers: Vec<WatcherSpec>,
    steps: Vec<ScenarioStep>,
}

fn default_thread() -> String {
    "main".to_string()
}

/// A handler that posts `text` whenever the step outcome contains `keyword`.
#[derive(Debug, Clone, Deserialize)]
struct WatcherSpec {
    id: String,
    #[serde(default)]
    priority: i32,
    keyword: String,
    category: MessageCategory,
    /// `{step}` is replaced with the step number.
    text: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    ttl_steps: Option<u64>,
    #[serde(default)]
    short_circuit: bool,
}

fn default_confidence() -> f64 {
    0.8
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ScenarioStep {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    outcome: String,
    #[serde(default)]
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// One advisory per line: `[category] text (confidence)`.
struct PlainFormatter;

impl ContentFormatter for PlainFormatter {
    fn format(&self, messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| format!("[{}] {} ({:.2})", m.category(), m.text(), m.confidence()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Drops control characters and collapses runs of whitespace.
struct WhitespaceSanitizer;

impl Sanitizer for WhitespaceSanitizer {
    fn sanitize(&self, text: &str) -> String {
        text.split_whitespace()
            .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Treats an explicit error, or an outcome starting with "error", as failure.
struct OutcomeFailureDetector;

impl FailureDetector for OutcomeFailureDetector {
    fn detect(&self, response: &ResponseDescriptor) -> FailureVerdict {
        if let Some(err) = &response.error {
            return FailureVerdict::failure(err.clone(), Severity::High);
        }
        if response.content.to_ascii_lowercase().starts_with("error") {
            return FailureVerdict::failure(response.content.clone(), Severity::Medium);
        }
        FailureVerdict::ok()
    }
}

fn watcher_handler(spec: &WatcherSpec) -> DispatchHandler {
    let template = spec.text.clone();
    let category = spec.category;
    let confidence = spec.confidence;
    let ttl = spec.ttl_steps;
    let short_circuit = spec.short_circuit;

    DispatchHandler::new(
        spec.id.clone(),
        spec.priority,
        move |snapshot: Arc<StepSnapshot>| {
            let text = template.replace("{step}", &snapshot.step.to_string());
            async move {
                let mut advisory = Advisory::new(category, text, confidence);
                if let Some(ttl) = ttl {
                    advisory = advisory.with_expires_at_step(snapshot.step.saturating_add(ttl));
                }
                let output = HandlerOutput::none().with_message(advisory);
                Ok(if short_circuit { output.stop() } else { output })
            }
        },
    )
    .with_filter(SnapshotFilter::outcome_contains(spec.keyword.clone()))
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StepSummary {
    step: u64,
    rendered: String,
    incorporated: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<FailureVerdict>,
    dispatch: DispatchReport,
    gc: GcReport,
}

#[derive(Debug, Serialize)]
struct MetricsSummary {
    messages_accepted: u64,
    messages_deduplicated: u64,
    messages_evicted: u64,
    messages_collected: u64,
    handler_runs: u64,
    handler_failures: u64,
}

impl From<&Metrics> for MetricsSummary {
    fn from(m: &Metrics) -> Self {
        Self {
            messages_accepted: m.messages_accepted(),
            messages_deduplicated: m.messages_deduplicated(),
            messages_evicted: m.messages_evicted(),
            messages_collected: m.messages_collected(),
            handler_runs: m.handler_runs(),
            handler_failures: m.handler_failures(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SimulationSummary {
    thread_id: String,
    steps: Vec<StepSummary>,
    remaining_messages: usize,
    metrics: MetricsSummary,
}

fn load_config(path: Option<&Path>) -> Result<SidechannelConfig> {
    let mut cfg = match path {
        Some(path) => SidechannelConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SidechannelConfig::default(),
    };
    cfg.apply_env_overrides()
        .context("Invalid SIDECHANNEL_* override")?;
    cfg.validate().context("Invalid configuration")?;
    Ok(cfg)
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario {}", path.display()))?;
    serde_json::from_str(&raw).context("Invalid scenario JSON")
}

/// Per step: render pending advisories, mark them used, record the snapshot,
/// dispatch watchers (await mode), then collect.
#[instrument(skip_all, fields(thread_id = %scenario.thread_id))]
async fn run_scenario(cfg: &SidechannelConfig, scenario: &Scenario) -> Result<SimulationSummary> {
    let thread_id = scenario.thread_id.as_str();

    let metrics = Arc::new(Metrics::new());
    let store = SharedStore::new(MessageStore::new(cfg.store.clone())?.with_metrics(metrics.clone()));
    let retention = cfg.retention.build()?;
    let coordinator = DispatchCoordinator::new(Arc::new(store.clone()), cfg.dispatch.to_config())
        .with_metrics(metrics.clone());

    let mut registry = HandlerRegistry::new();
    for watcher in &scenario.watchers {
        registry.register(watcher_handler(watcher))?;
    }

    let formatter = PlainFormatter;
    let sanitizer = WhitespaceSanitizer;
    let detector = OutcomeFailureDetector;

    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (index, scripted) in scenario.steps.iter().enumerate() {
        let step = index as u64 + 1;

        let pending = store.query(thread_id, &MessageQuery::pending_at(step));
        let kept = retention.apply(&pending).keep;
        let rendered = formatter.format(&kept);
        let incorporated: Vec<String> = kept.iter().map(|m| m.id().to_string()).collect();
        store.mark_incorporated(&incorporated, step);

        let outcome = sanitizer.sanitize(&scripted.outcome);
        let verdict = detector.detect(&ResponseDescriptor {
            thread_id: thread_id.to_string(),
            step,
            content: outcome.clone(),
            error: scripted.error.clone(),
            ..Default::default()
        });

        let snapshot = StepSnapshot::new(thread_id, step, Utc::now())
            .with_prompt(sanitizer.sanitize(&scripted.prompt))
            .with_outcome(outcome)
            .with_incorporated(incorporated.clone());
        store.store_snapshot(snapshot.clone());

        let dispatch = coordinator.dispatch_registry(snapshot, &registry).await;
        let gc = store.gc(thread_id, step);

        info!(step, pending = pending.len(), kept = kept.len(), "step complete");
        steps.push(StepSummary {
            step,
            rendered,
            incorporated,
            failure: verdict.is_failure.then_some(verdict),
            dispatch,
            gc,
        });
    }

    metrics.flush();
    let remaining_messages = store.with(|s| s.len(thread_id));
    Ok(SimulationSummary {
        thread_id: thread_id.to_string(),
        steps,
        remaining_messages,
        metrics: MetricsSummary::from(metrics.as_ref()),
    })
}

async fn cmd_simulate(scenario: &Path, config: Option<&Path>) -> Result<()> {
    let cfg = load_config(config)?;
    let scenario = load_scenario(scenario)?;
    let summary = run_scenario(&cfg, &scenario).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_config(config: Option<&Path>) -> Result<()> {
    let cfg = load_config(config)?;
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    sidechannel_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Simulate { scenario, config } => {
            cmd_simulate(&scenario, config.as_deref()).await
        }
        Commands::Config { config } => cmd_config(config.as_deref()),
    }
}
