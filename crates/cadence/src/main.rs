//! Cadence: recurring job scheduler
//!
//! Main binary with subcommands:
//! - `run`: Scheduler daemon
//! - `check`: Validate a definitions file and show each job's plan
//! - `next`: Preview the run times of a schedule rule

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadence_core::JobRegistry;
use cadence_schedule::{Schedule, Tz};

mod config;
mod daemon;
mod executor;
mod store;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Recurring job scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon
    Run {
        /// Job definitions file (JSON)
        #[arg(long, env = "CADENCE_CONFIG")]
        config: PathBuf,

        /// File that keeps run history across restarts
        #[arg(long, env = "CADENCE_STATE")]
        state: Option<PathBuf>,

        /// Shell used to run action commands
        #[arg(long, env = "CADENCE_SHELL", default_value = "/bin/sh")]
        shell: String,
    },

    /// Validate job definitions and print each job's schedule and actions
    Check {
        /// Job definitions file (JSON)
        #[arg(long, env = "CADENCE_CONFIG")]
        config: PathBuf,

        /// Upcoming run times to show per job
        #[arg(long, default_value = "3")]
        upcoming: usize,
    },

    /// Print the next run times of a schedule rule
    Next {
        /// Rule, e.g. "daily 04:00:00 MWF" or "2nd tue of jan,jul at 10:00"
        #[arg(value_name = "RULE")]
        rule: String,

        /// How many run times to print
        #[arg(long, short = 'n', default_value = "5")]
        count: usize,

        /// Time zone to evaluate the rule in (IANA name)
        #[arg(long)]
        time_zone: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cadence=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            state,
            shell,
        } => {
            daemon::run(daemon::DaemonConfig {
                config_path: config,
                state_path: state,
                shell,
            })
            .await
        }

        Commands::Check { config, upcoming } => {
            let definitions = config::load(&config).await.into_diagnostic()?;
            let registry = JobRegistry::new(&definitions).into_diagnostic()?;
            print!("{}", config::describe(&registry, Utc::now(), upcoming));
            Ok(())
        }

        Commands::Next {
            rule,
            count,
            time_zone,
        } => {
            let mut schedule = Schedule::parse(&rule).into_diagnostic()?;
            if let Some(name) = time_zone {
                let tz: Tz = name
                    .parse()
                    .map_err(|_| miette::miette!("unknown time zone: {}", name))?;
                schedule = schedule.with_time_zone(tz);
            }
            let tz = schedule.time_zone();
            for at in schedule.upcoming(Utc::now(), count).into_diagnostic()? {
                println!("{}", at.with_timezone(&tz));
            }
            Ok(())
        }
    }
}
