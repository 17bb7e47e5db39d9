mod report;
mod scaffold;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tidemark_config::{ConfigLoader, DEFAULT_CONFIG_FILE};
use tidemark_engine::{DownMode, Engine, Interrupt};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tidemark", version)]
#[command(about = "Versioned schema migrations for SQLite")]
struct Cli {
    /// Path to the config file
    #[arg(long, short, global = true, env = "TIDEMARK_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a config file and the migrations directory
    Init,

    /// Create a new pair of migration files
    New {
        /// Migration name, sanitized to lowercase letters, digits and underscores
        #[arg(long, default_value = "migration")]
        name: String,
    },

    /// Apply every pending migration in version order
    Up,

    /// Revert applied migrations, newest first
    Down {
        #[command(flatten)]
        scope: DownScope,
    },

    /// Show applied and pending migrations
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct DownScope {
    /// Revert only the most recently applied migration
    #[arg(long)]
    last: bool,

    /// Revert every applied migration
    #[arg(long)]
    all: bool,
}

impl DownScope {
    fn mode(&self) -> DownMode {
        if self.all { DownMode::All } else { DownMode::Last }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report::print_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let loader = ConfigLoader::new(&cli.config);

    match cli.command {
        Commands::Init => {
            let created = scaffold::init(&loader)?;
            report::print_init(&loader, &created);
        }
        Commands::New { name } => {
            let config = loader.load()?;
            let files = scaffold::new_migration(&config.migrations_dir, &name, chrono::Utc::now())?;
            report::print_new(&files);
        }
        Commands::Up => {
            let report = with_engine(&loader, |engine| engine.up()).await?;
            report::print_up(&report);
        }
        Commands::Down { scope } => {
            let mode = scope.mode();
            let report = with_engine(&loader, move |engine| engine.down(mode)).await?;
            report::print_down(&report);
        }
        Commands::Status { json } => {
            let config = loader.load()?;
            // read-only: status never creates or locks the database
            let (status, holder) = tokio::task::spawn_blocking(move || {
                let engine = Engine::read_only(&config)?;
                Ok::<_, tidemark_common::Error>((engine.status()?, engine.lock_holder()?))
            })
            .await
            .context("status task panicked")??;
            if json {
                let out = serde_json::to_string_pretty(&status)
                    .context("failed to serialize status report")?;
                println!("{out}");
            } else {
                report::print_status(&status, holder.as_ref());
            }
        }
    }

    Ok(())
}

/// Build the engine from config and run `op` on a blocking thread while
/// Ctrl-C raises the engine's interrupt flag.
async fn with_engine<T, F>(loader: &ConfigLoader, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Engine) -> tidemark_common::Result<T> + Send + 'static,
{
    let config = loader.load()?;
    let interrupt = Interrupt::new();
    let mut engine = Engine::from_config(&config)?.with_interrupt(interrupt.clone());

    let signals = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(
                "interrupt received, stopping after the current migration \
                 (press Ctrl-C again to abort)"
            );
            interrupt.trigger();
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("second interrupt, exiting without waiting");
                std::process::exit(130);
            }
        }
    });

    let outcome = tokio::task::spawn_blocking(move || op(&mut engine))
        .await
        .context("migration task panicked")?;
    signals.abort();
    Ok(outcome?)
}
