use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use careerlens::cli::commands;

#[derive(Parser)]
#[command(name = "careerlens")]
#[command(
    version,
    about = "Reconcile, validate, and regenerate student career assessment reports"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, global = true, help = "Debug logging")]
    verbose: bool,

    #[arg(long, short, global = true, help = "Only log errors")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize careerlens in the current directory
    Init {
        #[arg(long, help = "Reinitialize an existing project")]
        force: bool,
    },

    /// Import attempts, results, and questions from a JSON fixture
    Import {
        #[arg(help = "Fixture file with attempts, results, questions arrays")]
        file: PathBuf,
    },

    /// Show a reconciled report, regenerating missing analysis
    Show {
        #[arg(help = "Assessment attempt id")]
        attempt_id: String,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Regenerate the analysis once, even after automatic retries ran out
    Retry {
        #[arg(help = "Assessment attempt id")]
        attempt_id: String,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Report a stored result's shape and findings without regenerating
    Check {
        #[arg(help = "Assessment attempt id")]
        attempt_id: String,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Show store and provider status
    Status {
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            help = "Output format: toml, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mcareerlens encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }

        eprintln!("\n\x1b[33mPlease report this issue with the command you ran.\x1b[0m");
        eprintln!();

        // Backtrace when RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Init { force } => commands::init::run(force)?,
        Commands::Import { file } => commands::import::run(&file)?,
        Commands::Show { attempt_id, format } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::show::run(&attempt_id, &format))?;
        }
        Commands::Retry { attempt_id, format } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::retry::run(&attempt_id, &format))?;
        }
        Commands::Check { attempt_id, format } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::check::run(&attempt_id, &format))?;
        }
        Commands::Status { format } => commands::status::run(&format)?,
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => commands::config::show(global, &format)?,
            ConfigAction::Path => commands::config::path()?,
            ConfigAction::Init { global, force } => {
                if global {
                    commands::config::init_global(force)?;
                } else {
                    commands::config::init_project()?;
                }
            }
        },
    }

    Ok(())
}
