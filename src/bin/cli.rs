use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use music_catalog_sync as lib;
use lib::api::build_provider;
use lib::config::Config;
use lib::export::{export_playlists, ExportOptions};
use lib::matcher::Matcher;
use lib::models::PlatformKind;
use lib::report::SyncReport;
use lib::sync::{CancelFlag, SyncOptions, SyncOrchestrator};
use std::path::PathBuf;
use tracing::subscriber as tracing_subscriber_global;
use tracing::{info, warn};
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "music-catalog-sync", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Allow source and destination catalogs in different countries
    #[arg(long, global = true)]
    diff_country: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync playlists (and likes, if enabled) from source to destination
    Sync,
    /// Sync playlists from a JSON export archive to the configured destination
    Import {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
    /// Export the source platform's playlists to a JSON archive
    Export {
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        /// Write compact JSON instead of pretty-printed
        #[arg(long)]
        minify: bool,
        /// Include liked tracks in the archive
        #[arg(long)]
        with_likes: bool,
    },
    /// Validate config file and exit
    ConfigValidate,
}

/// Explicit --config wins; then the per-user config dir; then the repository example.
fn resolve_config_path(explicit: &Option<PathBuf>) -> PathBuf {
    if let Some(p) = explicit {
        return p.clone();
    }
    match Config::default_path() {
        Some(p) if p.exists() => p,
        _ => PathBuf::from("config/example-config.toml"),
    }
}

/// Logs go to stdout and, when `log_dir` is configured, to a daily-rotated file.
fn init_logging(cfg: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let _ = LogTracer::init();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &cfg.log_dir {
        Some(dir) => {
            let file_appender: RollingFileAppender =
                tracing_appender::rolling::daily(dir, "music-catalog-sync.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(non_blocking)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer);
    if let Err(e) = tracing_subscriber_global::set_global_default(subscriber) {
        eprintln!("failed to set global tracing subscriber: {}", e);
    }
    guard
}

/// First Ctrl-C asks the run to stop at the next track boundary.
fn install_interrupt_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the current step and stopping");
            cancel.cancel();
        }
    });
}

async fn run_sync(cfg: &Config) -> Result<SyncReport> {
    cfg.validate()?;
    let source = build_provider(cfg.source, cfg).context("building source adapter")?;
    let destination = build_provider(cfg.destination, cfg).context("building destination adapter")?;
    let cancel = CancelFlag::new();
    install_interrupt_handler(cancel.clone());
    let mut orchestrator = SyncOrchestrator::new(
        source,
        destination,
        Matcher::new(cfg.matching.to_options()),
        SyncOptions::from_config(cfg),
    )
    .with_cancel_flag(cancel);
    let report = orchestrator.run().await?;
    Ok(report)
}

fn print_report(report: &SyncReport) {
    println!("{}", report.summary());
    for s in &report.sections {
        println!(
            "  {}: {} added, {} unmatched, {} already present, {} failed ({:.0}% converted)",
            s.name,
            s.matched.len(),
            s.unmatched.len(),
            s.already_present,
            s.failed.len(),
            s.conversion_rate() * 100.0
        );
        if let Some(err) = &s.error {
            println!("    error: {}", err);
        }
    }
    for p in &report.skipped_playlists {
        println!("  skipped {} ({:?})", p.name, p.reason);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let resolved_config_path = resolve_config_path(&cli.config);

    let mut cfg = Config::from_path(&resolved_config_path)
        .with_context(|| format!("loading config from {}", resolved_config_path.display()))?;

    if cli.diff_country {
        cfg.diff_country = true;
    }

    let _guard = init_logging(&cfg);
    info!("Using config {}", resolved_config_path.display());

    match cli.command {
        Commands::Sync => {
            let report = run_sync(&cfg).await.context("running sync")?;
            print_report(&report);
            if report.cancelled {
                std::process::exit(130);
            }
        }
        Commands::Import { file } => {
            cfg.source = PlatformKind::File;
            cfg.file.path = Some(file);
            let report = run_sync(&cfg).await.context("importing archive")?;
            print_report(&report);
            if report.cancelled {
                std::process::exit(130);
            }
        }
        Commands::Export {
            out,
            minify,
            with_likes,
        } => {
            cfg.check_credentials(cfg.source)?;
            let source = build_provider(cfg.source, &cfg).context("building source adapter")?;
            let options = ExportOptions {
                owner: cfg.owner.clone(),
                skip_playlists: cfg.skip_playlists.clone(),
                include_likes: with_likes,
                minify,
            };
            let archive = export_playlists(source.as_ref(), &out, &options)
                .await
                .context("exporting playlists")?;
            println!(
                "Exported {} playlists to {}",
                archive.playlists.len(),
                out.display()
            );
        }
        Commands::ConfigValidate => match cfg.validate() {
            Ok(()) => println!("OK"),
            Err(e) => {
                eprintln!("Config validation failed: {}", e);
                std::process::exit(2);
            }
        },
    }
    Ok(())
}
