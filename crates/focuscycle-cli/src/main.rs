use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "focuscycle", version, about = "Focuscycle work/break timer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session in the foreground, resuming the stored one if present
    Run {
        /// Number of sets to run (0 = until stopped)
        #[arg(long, default_value = "0")]
        sets: u32,
    },
    /// Print the stored session as JSON
    Status,
    /// Discard the stored session
    Reset,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run { sets } => commands::session::run(sets),
        Commands::Status => commands::session::status(),
        Commands::Reset => commands::session::reset(),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout carries JSON only.
fn init_logging() {
    let filter =
        EnvFilter::try_from_env("FOCUSCYCLE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
