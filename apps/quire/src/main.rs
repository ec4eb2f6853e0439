//! # Quire
//!
//! Command-line entry point: page server, one-shot rendering, forced
//! publish passes, and database setup.
//!
//! Logging goes through `tracing`; set `RUST_LOG` to adjust (default
//! `info`).

use clap::{Parser, Subcommand};
use quire::api;
use quire::cli::{CliError, cmd_import, cmd_init, cmd_publish, cmd_render};
use quire::config::AppConfig;
use quire::quire_core::PublishCheck;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Quire CMS.
#[derive(Parser, Debug)]
#[command(name = "quire", version, about = "Quire CMS server")]
struct Cli {
    /// Path to the JSON config file. A missing file means defaults.
    #[arg(short, long, global = true, default_value = "quire.json")]
    config: PathBuf,

    /// Database path (overrides the config file).
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable development mode (profiling, failure comments, module filter).
    #[arg(long, global = true)]
    dev: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve pages and the editor API.
    Serve {
        /// Listen address (overrides the config file).
        #[arg(long)]
        listen: Option<String>,
    },
    /// Render one URL to stdout.
    Render {
        url: String,
        #[arg(long)]
        lang: Option<String>,
        /// Render the working revision instead of the active one.
        #[arg(long)]
        working: bool,
        /// Print status and headers before the body.
        #[arg(long)]
        headers: bool,
    },
    /// Run an auto-publish pass now.
    Publish,
    /// Seed the database from a JSON site file.
    Import { site: PathBuf },
    /// Create an empty database.
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = AppConfig::load(&cli.config)?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    if cli.dev {
        config.generator.development_mode = true;
    }

    match cli.command {
        Command::Serve { listen } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            api::serve(config).await
        }
        Command::Render {
            url,
            lang,
            working,
            headers,
        } => {
            let served = cmd_render(&config, &url, lang.as_deref(), working)?;
            if headers {
                println!("HTTP {}", served.response.status);
                for (name, value) in &served.response.headers {
                    println!("{name}: {value}");
                }
                println!();
            }
            print!("{}", served.response.body);
            Ok(())
        }
        Command::Publish => {
            match cmd_publish(&config)? {
                PublishCheck::Ran(report) => {
                    println!(
                        "published {} revision(s); next check in {}s",
                        report.published.len(),
                        report.next_check_in
                    );
                    for revision in report.published {
                        println!("  revision {revision}");
                    }
                }
                PublishCheck::Busy => println!("another publish pass is running"),
                PublishCheck::NotDue => println!("nothing due"),
            }
            Ok(())
        }
        Command::Import { site } => {
            let summary = cmd_import(&config.database, &site)?;
            println!(
                "imported {} page(s), {} revision(s), {} module(s), {} override(s)",
                summary.pages, summary.revisions, summary.modules, summary.overrides
            );
            Ok(())
        }
        Command::Init { force } => {
            cmd_init(&config.database, force)?;
            println!("initialized {}", config.database.display());
            Ok(())
        }
    }
}
