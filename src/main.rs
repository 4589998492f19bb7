//! traffic-guard entrypoint: run the whole pipeline as one all-or-nothing
//! batch, run a single stage over persisted datasets, or query decisions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use traffic_guard::{
    config::{PipelineConfig, RiskPolicy},
    logging::{DecisionLine, StructuredLogger},
    pipeline::{self, Pipeline},
    risk::Severity,
    storage::{
        datasets::{DECISIONS_FILE, EXPLAINED_FILE, FEATURES_FILE, SCORED_FILE},
        DecisionQuery, DecisionStore,
    },
};

#[derive(Debug, Parser)]
#[command(name = "traffic-guard", version, about = "Traffic anomaly detection and mitigation decisions")]
struct Cli {
    /// JSON configuration file (defaults apply when absent)
    #[arg(long, env = "TRAFFIC_GUARD_CONFIG", default_value = "config.json", global = true)]
    config: PathBuf,

    /// Override the configured rule set
    #[arg(long, value_enum, global = true)]
    policy: Option<RiskPolicy>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every stage and write the final decision dataset
    Run {
        #[arg(long)]
        events: Option<PathBuf>,
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Raw event log → feature dataset
    Features {
        #[arg(long)]
        events: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Feature dataset → scored dataset
    Detect {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        batch: Option<String>,
    },
    /// Scored dataset → explained dataset
    Explain {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        batch: Option<String>,
    },
    /// Explained dataset → decision dataset
    Decide {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        batch: Option<String>,
    },
    /// Read decisions from the store as ndjson
    Query {
        #[arg(long)]
        batch: Option<String>,
        /// Minimum severity: low, medium or high
        #[arg(long)]
        severity: Option<String>,
        /// Normal or Anomaly
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        entity: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn default_batch(config: &PipelineConfig) -> String {
    config
        .events_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "batch".to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let mut config = PipelineConfig::load(&cli.config)?;
    if let Some(policy) = cli.policy {
        config.risk.policy = policy;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    StructuredLogger::init(config.log.json, &config.log.level);
    info!(data_dir = ?config.data_dir, policy = ?config.risk.policy, "traffic-guard starting");

    let data = |file: &str| config.data_dir.join(file);
    let batch_name = |b: Option<String>| b.unwrap_or_else(|| default_batch(&config));

    match cli.command {
        Command::Run { events, model } => {
            let mut config = config.clone();
            if let Some(e) = events {
                config.events_path = e;
            }
            if let Some(m) = model {
                config.model_path = m;
            }
            let report = Pipeline::from_config(config)?.run()?;
            let m = &report.manifest;
            println!(
                "{} events ({} skipped) → {} vectors, {} anomalies, rule set {}",
                m.events, m.skipped_rows, m.vectors, m.anomalies, m.rule_set
            );
            for (severity, n) in &m.severity {
                println!("  {:<6} {}", severity.as_str(), n);
            }
        }
        Command::Features { events, output } => {
            let events = events.unwrap_or_else(|| config.events_path.clone());
            let out = output.unwrap_or_else(|| data(FEATURES_FILE));
            let digest = pipeline::features_stage(&config, &events, &out)?;
            println!("{} rows → {}", digest.rows, digest.path.display());
        }
        Command::Detect {
            input,
            output,
            model,
            batch,
        } => {
            let input = input.unwrap_or_else(|| data(FEATURES_FILE));
            let out = output.unwrap_or_else(|| data(SCORED_FILE));
            let batch = batch_name(batch);
            let mut config = config.clone();
            if let Some(m) = model {
                config.model_path = m;
            }
            let digest = Pipeline::from_config(config)?.detect_stage(&input, &out, &batch)?;
            println!("{} rows → {}", digest.rows, digest.path.display());
        }
        Command::Explain {
            input,
            output,
            batch,
        } => {
            let input = input.unwrap_or_else(|| data(SCORED_FILE));
            let out = output.unwrap_or_else(|| data(EXPLAINED_FILE));
            let digest = pipeline::explain_stage(&config, &input, &out, &batch_name(batch))?;
            println!("{} rows → {}", digest.rows, digest.path.display());
        }
        Command::Decide {
            input,
            output,
            batch,
        } => {
            let input = input.unwrap_or_else(|| data(EXPLAINED_FILE));
            let out = output.unwrap_or_else(|| data(DECISIONS_FILE));
            let digest = pipeline::decide_stage(&config, &input, &out, &batch_name(batch))?;
            println!("{} rows → {}", digest.rows, digest.path.display());
        }
        Command::Query {
            batch,
            severity,
            label,
            entity,
            limit,
        } => {
            let min_severity = match severity {
                Some(s) => Some(Severity::parse(&s).ok_or_else(|| format!("unknown severity {:?}", s))?),
                None => None,
            };
            let store = DecisionStore::open_read_only(&config.store_path())?;
            let rows = store.query(&DecisionQuery {
                batch,
                min_severity,
                label,
                entity_id: entity,
                limit,
            })?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for row in &rows {
                StructuredLogger::emit_json(&DecisionLine::from(row), &mut out)?;
            }
        }
    }

    Ok(())
}
