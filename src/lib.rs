pub mod config;
pub mod error;
pub mod pipeline;
pub mod search;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

use config::RagtuneConfig;
use pipeline::controller::AdaptiveController;
use pipeline::orchestrator::{Orchestrator, RequestReport};
use search::corpus::synthetic_corpus;
use search::quantized_store::{QuantizedStore, Representation};

/// Traffic replayed by `simulate` when no queries are given.
pub const DEMO_TRAFFIC: &[&str] = &[
    "what is rag latency?",
    "how to reduce rag cost?",
    "what is rag latency?",
    "explain caching in rag",
    "how to reduce rag cost?",
    "what is ragserve vs rago?",
];

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "ragtune",
    version,
    about = "Latency-adaptive retrieval over a quantized embedding store"
)]
pub struct Cli {
    /// TOML config file (RAGTUNE_* environment variables still override it)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay queries through the pipeline against a synthetic corpus
    Simulate {
        /// Number of corpus documents
        #[arg(long, default_value_t = 20_000)]
        docs: usize,

        /// Embedding dimension
        #[arg(long, default_value_t = 192)]
        dim: usize,

        /// Corpus RNG seed
        #[arg(long, default_value_t = 7)]
        seed: u64,

        /// Override the latency budget in milliseconds
        #[arg(long)]
        budget_ms: Option<f64>,

        /// Emit one JSON report per line instead of text
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Queries to serve in order (defaults to the demo traffic)
        queries: Vec<String>,
    },
    /// Print the knobs the controller picks for the given latencies
    Knobs {
        #[arg(long)]
        budget_ms: Option<f64>,

        #[arg(long)]
        retrieval_ms: f64,

        #[arg(long)]
        generation_ms: f64,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => RagtuneConfig::load(path)?,
        None => RagtuneConfig::from_env(),
    };

    match cli.command {
        Commands::Simulate {
            docs,
            dim,
            seed,
            budget_ms,
            json,
            queries,
        } => {
            if let Some(budget) = budget_ms {
                cfg.controller.budget_ms = budget;
            }
            let queries = if queries.is_empty() {
                DEMO_TRAFFIC.iter().map(|q| q.to_string()).collect()
            } else {
                queries
            };
            run_simulation(&cfg, docs, dim, seed, &queries, json)
        }
        Commands::Knobs {
            budget_ms,
            retrieval_ms,
            generation_ms,
        } => {
            let budget = budget_ms.unwrap_or(cfg.controller.budget_ms);
            let knobs = AdaptiveController::new(cfg.controller.clone()).choose(
                budget,
                retrieval_ms,
                generation_ms,
            );
            println!("{}", serde_json::to_string_pretty(&knobs)?);
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "ragtune", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
    }
}

fn run_simulation(
    cfg: &RagtuneConfig,
    docs: usize,
    dim: usize,
    seed: u64,
    queries: &[String],
    json: bool,
) -> Result<()> {
    let corpus = synthetic_corpus(docs, dim, seed).context("generate synthetic corpus")?;
    let store = QuantizedStore::build(corpus, &cfg.store).context("build quantized store")?;
    tracing::info!(
        docs,
        dim,
        full_bytes = store.memory_bytes(Representation::Full),
        packed_bytes = store.memory_bytes(Representation::Packed),
        "corpus ready"
    );

    let mut orchestrator = Orchestrator::from_config(Arc::new(store), cfg)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for question in queries {
        // A failed request is counted and logged by the orchestrator; keep replaying.
        match orchestrator.serve(question) {
            Ok(outcome) if json => {
                writeln!(out, "{}", serde_json::to_string(&outcome.report)?)?;
            }
            Ok(outcome) => write_text_report(&mut out, &outcome.report)?,
            Err(err) if json => {
                let line = serde_json::json!({ "query": question, "error": err.to_string() });
                writeln!(out, "{line}")?;
            }
            Err(err) => writeln!(out, "\n--- query {question:?} failed: {err} ---")?,
        }
    }

    let totals = orchestrator.totals();
    let cache = orchestrator.cache();
    if json {
        let summary = serde_json::json!({
            "totals": totals,
            "cache": cache.stats(),
            "cache_len": cache.len(),
        });
        writeln!(out, "{summary}")?;
    } else {
        writeln!(
            out,
            "\nrequests={} hits={} misses={} over_budget={} failures={} cache_len={}",
            totals.requests,
            totals.cache_hits,
            totals.cache_misses,
            totals.over_budget,
            totals.failures,
            cache.len()
        )?;
    }
    Ok(())
}

fn write_text_report<W: Write>(out: &mut W, report: &RequestReport) -> Result<()> {
    let k = &report.knobs;
    let t = &report.timings;
    writeln!(
        out,
        "\n--- req {} | k={} budget={} cheap={} store={} ---",
        report.request,
        k.top_k,
        k.token_budget,
        k.cheap_mode,
        k.representation().as_str()
    )?;
    writeln!(out, "{}", report.answer)?;
    writeln!(
        out,
        "timing(ms): e2e={:.1} retr={:.1} ctx={:.1} gen={:.1} hit={}",
        t.e2e_ms,
        t.retrieval_ms,
        t.context_ms,
        t.generation_ms,
        if report.cache_hit { "yes" } else { "no" }
    )?;
    Ok(())
}
