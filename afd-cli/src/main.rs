//! AFD CLI - operator interface to the file distributor.
//!
//! This binary starts and stops an instance and inspects its on-disk
//! state (status areas, message queue, identifier catalogue).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod error;

use error::CliError;

#[derive(Parser)]
#[command(name = "afd")]
#[command(version = afd::VERSION)]
#[command(about = "Automatic file distributor", long_about = None)]
struct Cli {
    /// Work directory; falls back to $AFD_WORK_DIR
    #[arg(short = 'w', long, global = true)]
    work_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Stay attached and mirror the daemon log to stdout
        #[arg(short, long)]
        foreground: bool,
    },
    /// Shut a running instance down
    Stop,
    /// Probe the instance and print host counters
    Status,
    /// List outstanding messages in queue order
    Queue,
    /// Print the identifier catalogue
    Catalog {
        /// Show only aliases containing this substring
        filter: Option<String>,
    },
    /// Create the work directory layout and skeleton configuration
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let work_dir = match afd::paths::WorkDir::resolve(cli.work_dir.as_deref()) {
        Some(w) => w,
        None => CliError::NoWorkDir.exit(),
    };

    let result = match cli.command {
        Commands::Start { foreground } => commands::start::run(work_dir, foreground).await,
        Commands::Stop => commands::stop::run(&work_dir).await,
        Commands::Status => commands::status::run(&work_dir).await,
        Commands::Queue => commands::queue::run(&work_dir),
        Commands::Catalog { filter } => commands::catalog::run(&work_dir, filter.as_deref()),
        Commands::Init => commands::init::run(&work_dir),
    };

    if let Err(err) = result {
        err.exit();
    }
}
