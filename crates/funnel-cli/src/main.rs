//! CLI binary for validating datasets, rendering boards and moving leads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use funnel_engine::{
    qualification, validate, Dataset, EngineConfig, EventBus, MemoryPersistence, MoveOutcome,
    PipelineBoardViewModel, Severity, StageTransitionCoordinator, ViewerScope,
};

#[derive(Parser)]
#[command(name = "funnel", version, about = "Sales pipeline stage engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine config file (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every pipeline, qualification rule and temperature config in a dataset
    Validate {
        /// Path to the dataset .json file
        dataset: PathBuf,
    },

    /// Render a pipeline board
    Board {
        /// Path to the dataset .json file
        dataset: PathBuf,

        /// Pipeline to render
        #[arg(short, long)]
        pipeline: String,

        /// Render the member board of this viewer instead of the admin board
        #[arg(long)]
        viewer: Option<String>,

        /// Evaluation time (RFC 3339). Defaults to now.
        #[arg(long)]
        now: Option<String>,

        /// Print columns and summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move a lead to another stage
    Move {
        /// Path to the dataset .json file
        dataset: PathBuf,

        /// Lead to move
        #[arg(short, long)]
        lead: String,

        /// Target stage id
        #[arg(short, long)]
        to: String,

        /// Write the updated dataset back to the file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Validate { dataset } => {
            cmd_validate(&dataset)?;
        }
        Commands::Board {
            dataset,
            pipeline,
            viewer,
            now,
            json,
        } => {
            cmd_board(&dataset, &pipeline, viewer, now.as_deref(), json, config).await?;
        }
        Commands::Move {
            dataset,
            lead,
            to,
            write,
        } => {
            cmd_move(&dataset, &lead, &to, write, config).await?;
        }
    }

    Ok(())
}

fn load_dataset(path: &Path) -> anyhow::Result<Dataset> {
    Dataset::from_json_file(path)
        .map_err(|e| anyhow::anyhow!("failed to read dataset {}: {e}", path.display()))
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let dataset = load_dataset(path)?;
    let mut has_error = false;

    for pipeline in &dataset.pipelines {
        println!("Pipeline: {} ({})", pipeline.name, pipeline.id);
        let diagnostics = validate(pipeline);
        for diag in &diagnostics {
            let severity = match diag.severity {
                Severity::Error => {
                    has_error = true;
                    "ERROR"
                }
                Severity::Warning => "WARN",
                Severity::Info => "INFO",
            };
            let at = diag.stage_id.as_deref().map(|s| format!(" [{s}]")).unwrap_or_default();
            println!("  [{}] {}{}: {}", severity, diag.rule, at, diag.message);
            if let Some(fix) = &diag.fix {
                println!("         fix: {fix}");
            }
        }

        for rule in dataset.qualification_rules.get(&pipeline.id).into_iter().flatten() {
            if let Err(e) = qualification::validate_rule(rule, pipeline) {
                has_error = true;
                println!("  [ERROR] qualification_rule: {e}");
            }
        }

        if let Some(temperature) = dataset.temperature_configs.get(&pipeline.id) {
            if let Err(e) = temperature.validate() {
                has_error = true;
                println!("  [ERROR] temperature_config: {e}");
            }
        }

        let stray = dataset
            .leads
            .iter()
            .filter(|l| l.pipeline_id == pipeline.id && !pipeline.contains_stage(&l.stage_id));
        for lead in stray {
            has_error = true;
            println!("  [ERROR] lead_stage: lead '{}' sits in unknown stage '{}'", lead.id, lead.stage_id);
        }
    }

    if has_error {
        std::process::exit(1);
    }
    println!("Dataset is valid");
    Ok(())
}

async fn cmd_board(
    path: &Path,
    pipeline_id: &str,
    viewer: Option<String>,
    now: Option<&str>,
    json: bool,
    config: EngineConfig,
) -> anyhow::Result<()> {
    let now = match now {
        Some(s) => DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc),
        None => Utc::now(),
    };
    let scope = match viewer {
        Some(viewer_id) => ViewerScope::Member { viewer_id },
        None => ViewerScope::Administrator,
    };
    let store = Arc::new(MemoryPersistence::from_dataset(load_dataset(path)?));
    let bus = EventBus::new(config.event_capacity);
    let board = PipelineBoardViewModel::mount(pipeline_id, scope, store, bus, config).await?;

    let columns = board.columns(now);
    let summary = board.summary(now);
    board.unmount();

    if json {
        let out = serde_json::json!({ "columns": columns, "summary": summary });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for column in &columns {
        let marker = if column.stage.is_system_stage { " (system)" } else { "" };
        println!(
            "{}{} [{} leads, value {:.2}]",
            column.stage.name,
            marker,
            column.cards.len(),
            column.total_value
        );
        for card in &column.cards {
            let mut tags = vec![card.temperature.as_str().to_string()];
            if card.qualification.is_sql {
                tags.push("SQL".into());
            } else if card.qualification.is_mql {
                tags.push("MQL".into());
            }
            if card.overdue {
                tags.push(format!("overdue {}d", card.days_in_stage));
            }
            let name = if card.view.name.is_empty() { card.lead.id.as_str() } else { card.view.name.as_str() };
            println!("  - {} <{}> [{}]", name, card.view.email, tags.join(", "));
        }
    }
    println!(
        "\nLeads: {}  Value: {:.2}  Won: {}  Lost: {}  MQL: {}  SQL: {}  Overdue: {}",
        summary.total_leads,
        summary.total_value,
        summary.won,
        summary.lost,
        summary.mql,
        summary.sql,
        summary.overdue
    );
    Ok(())
}

async fn cmd_move(
    path: &Path,
    lead_id: &str,
    to: &str,
    write: bool,
    config: EngineConfig,
) -> anyhow::Result<()> {
    let dataset = load_dataset(path)?;
    let pipeline_id = dataset
        .leads
        .iter()
        .find(|l| l.id == lead_id)
        .map(|l| l.pipeline_id.clone())
        .ok_or_else(|| anyhow::anyhow!("lead '{lead_id}' not found in {}", path.display()))?;

    let store = Arc::new(MemoryPersistence::from_dataset(dataset));
    let bus = EventBus::new(config.event_capacity);
    let mut events = bus.tap();
    let coordinator = StageTransitionCoordinator::new(store.clone(), bus, config);
    coordinator.load_pipeline(&pipeline_id).await?;

    match coordinator.move_lead(lead_id, to).await? {
        MoveOutcome::Unchanged => println!("Lead '{lead_id}' is already in stage '{to}'"),
        MoveOutcome::Moved(event) => {
            println!(
                "Moved lead '{}' from '{}' to '{}'",
                event.lead_id, event.from_stage_id, event.to_stage_id
            );
        }
    }
    while let Ok(event) = events.try_recv() {
        tracing::debug!("{}", serde_json::to_string(&event)?);
    }

    if write {
        store.snapshot().save_json_file(path)?;
        tracing::info!(path = %path.display(), "Dataset written");
    }
    Ok(())
}
