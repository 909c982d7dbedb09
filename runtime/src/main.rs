use anyhow::Result;
use clap::{Parser, Subcommand};
use crawl_ingest::cli::output::{self, Styled};
use crawl_ingest::cli::{self, Services};
use crawl_ingest::config::IngestConfig;
use crawl_ingest::logging::{self, LogOptions};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "crawl-ingest",
    version,
    about = "Ingest robots.txt files and sitemap trees into SQLite"
)]
struct Cli {
    /// Database file (default ~/.crawl-ingest/ingest.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print results as JSON on stdout and log as JSON
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, short, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[arg(long, short, global = true)]
    verbose: bool,

    /// Flows allowed to run at once
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Keep staged payloads in memory (lost if the process exits)
    #[arg(long, global = true)]
    memory_staging: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch and store robots.txt for a site
    Robots {
        #[arg(long)]
        entity: String,
        /// Site base URL
        #[arg(long)]
        url: String,
        /// Reuse an existing upload ID
        #[arg(long)]
        upload: Option<String>,
    },
    /// Fetch and store one sitemap document
    Sitemap {
        #[arg(long)]
        entity: String,
        /// ID returned by the robots flow
        #[arg(long)]
        robots: String,
        #[arg(long)]
        url: String,
        /// ID of the index record that listed this sitemap
        #[arg(long)]
        origin: Option<String>,
        #[arg(long)]
        upload: Option<String>,
    },
    /// Ingest robots.txt and walk every sitemap it declares
    Crawl {
        #[arg(long)]
        entity: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        upload: Option<String>,
        #[arg(long)]
        max_depth: Option<usize>,
    },
    /// Resume flows interrupted by a crash or ctrl-c
    Resume,
    /// List recent flows
    Flows {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Staging store maintenance
    Staging {
        #[command(subcommand)]
        action: StagingAction,
    },
}

#[derive(Subcommand)]
enum StagingAction {
    /// Delete expired entries
    Purge,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Output helpers read these before any thread is started.
    if cli.json {
        std::env::set_var(output::ENV_JSON, "1");
    }
    if cli.quiet {
        std::env::set_var(output::ENV_QUIET, "1");
    }
    if cli.verbose {
        std::env::set_var(output::ENV_VERBOSE, "1");
    }

    logging::init(LogOptions {
        json: cli.json,
        verbose: cli.verbose,
        quiet: cli.quiet,
    });

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("  failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if output::is_json() {
                output::print_json(&serde_json::json!({ "error": format!("{err:#}") }));
            } else {
                eprintln!("  {} {err:#}", Styled::new().fail_sym());
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let mut config = IngestConfig::load()?;
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(concurrency) = args.concurrency {
        config.max_concurrent_flows = concurrency;
    }
    if args.memory_staging {
        config.memory_staging = true;
    }

    let services = Services::open(config)?;
    services.shutdown_on_ctrl_c();

    match args.command {
        Command::Robots {
            entity,
            url,
            upload,
        } => cli::robots_cmd::run(&services, &entity, &url, upload.as_deref()).await,
        Command::Sitemap {
            entity,
            robots,
            url,
            origin,
            upload,
        } => {
            cli::sitemap_cmd::run(
                &services,
                cli::sitemap_cmd::SitemapArgs {
                    entity: &entity,
                    robots: &robots,
                    url: &url,
                    origin: origin.as_deref(),
                    upload: upload.as_deref(),
                },
            )
            .await
        }
        Command::Crawl {
            entity,
            url,
            upload,
            max_depth,
        } => {
            let max_depth = max_depth.unwrap_or(services.config.max_depth);
            cli::crawl_cmd::run(&services, &entity, &url, upload.as_deref(), max_depth).await
        }
        Command::Resume => cli::resume_cmd::run(&services).await,
        Command::Flows { limit } => cli::flows_cmd::run(&services, limit).await,
        Command::Staging {
            action: StagingAction::Purge,
        } => cli::staging_cmd::run_purge(&services).await,
    }
}
