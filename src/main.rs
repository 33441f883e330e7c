use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "anno")]
#[command(about = "Variant annotation task engine")]
#[command(version)]
struct Cli {
    /// Work folder holding the task directories (default: $WORKFOLDER)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Output as JSON for machine consumption
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the engine service daemon
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },

    /// Create a task and queue it (input on stdin unless --vcf-file)
    Submit {
        /// Existing VCF file to annotate
        #[arg(long)]
        vcf_file: Option<PathBuf>,

        /// BED file restricting annotation to regions
        #[arg(long)]
        regions: Option<PathBuf>,

        /// Post-processing target from the targets directory
        #[arg(long)]
        target: Option<String>,

        /// Variable for the target, KEY=VALUE (repeatable)
        #[arg(long = "var")]
        vars: Vec<String>,

        /// File for the target, KEY=PATH (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,

        /// Only convert the input, skip annotation
        #[arg(long)]
        convert_only: bool,

        /// Block until the task has finished
        #[arg(long)]
        wait: bool,
    },

    /// Restart a task from scratch
    Restart {
        id: String,

        /// Allow the priority lane
        #[arg(long)]
        priority: bool,
    },

    /// Show the status of one task, or of all tasks
    Status {
        id: Option<String>,

        /// Include per-step states and marker flags
        #[arg(long)]
        full: bool,
    },

    /// Print the captured output of a task's steps
    Log {
        id: String,

        /// Only steps that failed
        #[arg(long)]
        failed_only: bool,
    },

    /// Print the path of a task's annotated output
    Result {
        id: String,

        /// Block until the task has finished
        #[arg(long)]
        wait: bool,
    },

    /// List task ids
    List {
        /// Only queued or running tasks
        #[arg(long)]
        active: bool,
    },

    /// Kill a task's processes and mark it failed
    Cancel { id: String },

    /// Remove a task, cancelling it first if needed
    Delete { id: String },
}

#[derive(Subcommand)]
enum ServiceCommands {
    /// Start the service daemon in the background
    Start {
        /// Socket path (default: <workfolder>/.service/engine.sock)
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Width of the normal worker pool
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Stop the service daemon
    Stop {
        /// Kill immediately instead of requesting shutdown
        #[arg(long)]
        force: bool,
    },

    /// Show service status
    Status,

    /// Run the daemon in the foreground
    Daemon {
        #[arg(long)]
        socket: Option<PathBuf>,

        #[arg(long)]
        workers: Option<usize>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("anno=info,anno_engine=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.dir.as_deref())?;
    let json = cli.json;

    match cli.command {
        Commands::Service { command } => match command {
            ServiceCommands::Start { socket, workers } => {
                commands::service::run_start(&config, socket.as_deref(), workers, json)
            }
            ServiceCommands::Stop { force } => commands::service::run_stop(&config, force, json),
            ServiceCommands::Status => commands::service::run_status(&config, json),
            ServiceCommands::Daemon { socket, workers } => {
                commands::service::run_daemon(&config, socket.as_deref(), workers)
            }
        },
        Commands::Submit {
            vcf_file,
            regions,
            target,
            vars,
            files,
            convert_only,
            wait,
        } => {
            let opts = commands::submit::SubmitOptions {
                vcf_file,
                regions,
                target,
                vars,
                files,
                convert_only,
                wait,
            };
            commands::submit::run(&config, &opts, json)
        }
        Commands::Restart { id, priority } => commands::restart::run(&config, &id, priority, json),
        Commands::Status { id, full } => commands::status::run(&config, id.as_deref(), full, json),
        Commands::Log { id, failed_only } => commands::log::run(&config, &id, failed_only, json),
        Commands::Result { id, wait } => commands::result::run(&config, &id, wait, json),
        Commands::List { active } => commands::list::run(&config, active, json),
        Commands::Cancel { id } => commands::cancel::run(&config, &id, json),
        Commands::Delete { id } => commands::delete::run(&config, &id, json),
    }
}
