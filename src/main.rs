mod cli;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cli::localize::LocalizeArgs;
use cli::repair::RepairArgs;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "prf")]
#[command(version, about = "Program repair framework: localize faults, validate candidate patches, report fixes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter prf.toml
    Init {
        /// Project directory
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Package prefix of the application classes
        #[arg(long)]
        group: Option<String>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Profile, generate, validate and report plausible patches
    Repair(RepairArgs),

    /// Profile the test suite and rank suspicious program elements
    Localize(LocalizeArgs),

    /// Worker process entry point (spawned by prf itself)
    #[command(hide = true)]
    Worker {
        #[command(subcommand)]
        role: WorkerRole,
    },
}

#[derive(Subcommand)]
enum WorkerRole {
    /// Run the test suite once and report timing, failures and spectra
    Profiler {
        /// Coordinator port on 127.0.0.1
        port: u16,
    },
    /// Validate one patch against the test suite
    Validator {
        /// Coordinator port on 127.0.0.1
        port: u16,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter_layer = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else if cli.verbose {
        tracing_subscriber::EnvFilter::new("info")
    } else {
        tracing_subscriber::EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Init { dir, group, force } => {
            info!("Initializing prf configuration in {:?}", dir);
            cli::init::cmd_init(&dir, group, force)?;
        }
        Commands::Repair(args) => {
            info!("prf v{}", env!("CARGO_PKG_VERSION"));
            cli::repair::cmd_repair(args)?;
        }
        Commands::Localize(args) => {
            info!("Running fault localization");
            cli::localize::cmd_localize(args)?;
        }
        Commands::Worker { role } => match role {
            WorkerRole::Profiler { port } => prf::profiler::serve(port)?,
            WorkerRole::Validator { port } => prf::validator::serve(port)?,
        },
    }

    Ok(())
}
