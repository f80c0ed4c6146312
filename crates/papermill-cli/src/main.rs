//! Papermill CLI — run and inspect paper-writing pipelines from the
//! terminal, against the same core engine (papermill-core) regardless of
//! which providers back the sub-agents.

mod commands;

use clap::{Parser, Subcommand};
use papermill_core::supervisor::SupervisorConfig;

/// Papermill CLI — supervised multi-agent paper-writing pipelines
#[derive(Parser)]
#[command(
    name = "papermill",
    version,
    about = "Papermill CLI — supervised multi-agent paper-writing pipelines"
)]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "PAPERMILL_DB_PATH", default_value = "papermill.db")]
    db: String,

    /// Compliance score a manuscript must reach to pass
    #[arg(long, default_value_t = 0.8)]
    compliance_threshold: f64,

    /// Automatic revision rounds before a task needs intervention
    #[arg(long, default_value_t = 3)]
    max_rounds: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a paper-writing pipeline and stream its progress
    Run {
        /// Research topic the paper is about
        #[arg(long)]
        topic: String,
        /// Path to a JSON dataset file declaring the statistical tests;
        /// a built-in demo dataset is used when omitted
        #[arg(long)]
        dataset: Option<String>,
        /// Reporting checklist: consort, prisma, or strobe
        #[arg(long, default_value = "consort")]
        checklist: String,
        /// Owner recorded on the task
        #[arg(long, default_value = "cli")]
        owner: String,
    },

    /// Show a task's current state
    Status {
        /// Task ID
        #[arg(long)]
        id: String,
        /// Print the full task as JSON
        #[arg(long)]
        json: bool,
    },

    /// List tasks for an owner
    Tasks {
        /// Owner to filter by
        #[arg(long, default_value = "cli")]
        owner: String,
    },

    /// Show a task's audit log
    Messages {
        /// Task ID
        #[arg(long)]
        id: String,
        /// Print the full log as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a finished task and its audit log
    Delete {
        /// Task ID
        #[arg(long)]
        id: String,
    },

    /// Submit reviewer feedback and re-enter the revision loop
    Revise {
        /// Task ID
        #[arg(long)]
        id: String,
        /// Feedback for the revision planner
        #[arg(long)]
        feedback: String,
        /// Zero the exhausted round counter of an intervention-pending task
        #[arg(long)]
        reset_rounds: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "papermill_core=warn,papermill_cli=info".into()),
        )
        .init();

    let config = SupervisorConfig {
        compliance_threshold: cli.compliance_threshold,
        max_revision_rounds: cli.max_rounds,
        ..SupervisorConfig::default()
    };
    let engine = commands::init_engine(&cli.db, config);

    let result = match cli.command {
        Commands::Run {
            topic,
            dataset,
            checklist,
            owner,
        } => commands::run::run(&engine, &topic, dataset.as_deref(), &checklist, &owner).await,
        Commands::Status { id, json } => commands::task::status(&engine, &id, json).await,
        Commands::Tasks { owner } => commands::task::list(&engine, &owner).await,
        Commands::Messages { id, json } => commands::task::messages(&engine, &id, json).await,
        Commands::Delete { id } => commands::task::delete(&engine, &id).await,
        Commands::Revise {
            id,
            feedback,
            reset_rounds,
        } => commands::revise::run(&engine, &id, &feedback, reset_rounds).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
