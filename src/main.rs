//! RuVector AppSweep - find and quit forgotten desktop applications

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ruvector_appsweep::core::cleanup::{CleanupReport, CleanupStatus};
use ruvector_appsweep::core::config::{AppSweepConfig, FileConfigProvider};
use ruvector_appsweep::core::process::ProcessKey;
use ruvector_appsweep::core::scorer::ScoredProcess;
use ruvector_appsweep::engine::{AppSweepEngine, SweepOptions};
use ruvector_appsweep::platform::{create_platform, format_bytes};

#[cfg(target_os = "linux")]
use ruvector_appsweep::platform::linux::SignalState;

#[derive(Parser)]
#[command(name = "ruvector-appsweep")]
#[command(about = "Tracks running applications and quits the stale ones", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/ruvector/appsweep.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List running applications with their current resource use
    List {
        #[arg(long)]
        json: bool,
    },

    /// Keep tracking, report stale applications after each sampling pass
    /// and optionally ask them to quit
    Watch {
        /// Sampling interval in seconds (default from config)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Ask flagged applications to quit (a dry run unless --yes)
        #[arg(long)]
        clean: bool,

        /// Actually send quit requests when cleaning
        #[arg(short, long, requires = "clean")]
        yes: bool,

        /// Only clean these applications (by executable name)
        #[arg(long, num_args = 1.., requires = "clean")]
        only: Vec<String>,
    },

    /// Show configuration
    Config {
        /// Write the default configuration file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.unwrap_or_else(AppSweepConfig::default_path);

    match cli.command {
        Commands::List { json } => {
            let (engine, _) = open_engine(config_path)?;
            engine.refresh_once().await;
            let ranked = engine.ranked();
            if json {
                println!("{}", serde_json::to_string_pretty(&ranked)?);
            } else {
                print_table(&ranked);
            }
        }

        Commands::Watch { interval, clean, yes, only } => {
            let (engine, provider) = open_engine(config_path)?;
            let clean = clean.then(|| SweepOptions { dry_run: !yes, only });
            watch(&engine, &provider, interval, clean).await?;
        }

        Commands::Config { init } => show_config(config_path, init)?,
    }

    Ok(())
}

fn open_engine(path: PathBuf) -> Result<(AppSweepEngine, Arc<FileConfigProvider>), Box<dyn std::error::Error>> {
    let provider = Arc::new(FileConfigProvider::new(path)?);
    let engine = AppSweepEngine::new(create_platform(), provider.clone());
    Ok((engine, provider))
}

fn show_config(path: PathBuf, init: bool) -> Result<(), Box<dyn std::error::Error>> {
    if init {
        if path.exists() {
            println!("Config already exists at {}", path.display());
        } else {
            AppSweepConfig::default().save(&path)?;
            println!("Wrote default config to {}", path.display());
        }
        return Ok(());
    }

    let config = AppSweepConfig::load_or_default(&path)?;
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    for warning in config.validate() {
        println!("warning: {}", warning);
    }
    Ok(())
}

async fn watch(
    engine: &AppSweepEngine,
    provider: &FileConfigProvider,
    interval: Option<u64>,
    clean: Option<SweepOptions>,
) -> Result<(), Box<dyn std::error::Error>> {
    let signals = SignalState::new();
    signals.install()?;

    engine.start().await;
    if let Some(secs) = interval {
        engine.scheduler().set_interval(Duration::from_secs(secs)).await;
    }
    info!("Watching applications (Ctrl+C to stop)");
    if clean.as_ref().is_some_and(|c| c.dry_run) {
        println!("DRY RUN - no quit requests will be sent (use --yes to clean)");
    }

    let mut asked: HashSet<ProcessKey> = HashSet::new();
    let mut last_pass = 0;
    let mut check = tokio::time::interval(Duration::from_millis(200));
    while !signals.shutdown_requested() {
        check.tick().await;

        if signals.take_reload() {
            match provider.reload() {
                Ok(_) => {
                    engine.reload_config().await;
                    info!("Configuration reloaded");
                }
                Err(e) => warn!("Reload failed: {}", e),
            }
        }

        let passes = engine.scheduler().passes();
        if passes != last_pass {
            last_pass = passes;
            let selection = engine.candidates();
            let top: Vec<ScoredProcess> = selection.candidates().iter().take(5).cloned().collect();
            if top.is_empty() {
                info!("{} applications tracked, none stale", engine.registry().len());
                continue;
            }
            println!();
            print_table(&top);
            println!("Reclaimable: {}", format_bytes(engine.reclaimable_bytes()));

            if let Some(options) = &clean {
                if let Some(report) = engine.sweep(options, &mut asked).await {
                    print_report(&report);
                }
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn print_report(report: &CleanupReport) {
    for outcome in &report.outcomes {
        let status = match &outcome.status {
            CleanupStatus::Requested => "quit requested".to_string(),
            CleanupStatus::DryRun => "would quit".to_string(),
            CleanupStatus::SkippedProtected => "skipped (protected)".to_string(),
            CleanupStatus::Failed(reason) => format!("failed: {}", reason),
        };
        println!(
            "  {:<24} {:>10}  {}",
            outcome.display_name,
            format_bytes(outcome.memory_bytes),
            status
        );
    }
    println!(
        "{} quit requests sent, {} failed, {} freed once they exit",
        report.requested_count(),
        report.failures().len(),
        format_bytes(report.requested_bytes())
    );
}

fn print_table(rows: &[ScoredProcess]) {
    println!(
        "{:>7}  {:<24} {:>10} {:>6} {:>8} {:>6}  {}",
        "PID", "APPLICATION", "MEMORY", "CPU%", "IDLE", "SCORE", "LEVEL"
    );
    for row in rows {
        let p = &row.process;
        let mut name: String = p.display_name.chars().take(22).collect();
        if p.is_foreground {
            name.push_str(" *");
        } else if p.is_protected() {
            name.push_str(" P");
        }
        println!(
            "{:>7}  {:<24} {:>10} {:>6.1} {:>8} {:>6.3}  {}",
            p.process_id,
            name,
            format_bytes(p.memory_bytes),
            p.cpu_percent,
            format_idle(row.inactive_secs),
            row.score,
            row.level
        );
    }
}

fn format_idle(secs: i64) -> String {
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s => format!("{}h {:02}m", s / 3600, (s % 3600) / 60),
    }
}

/// Ctrl+C only; there is no reload signal here.
#[cfg(not(target_os = "linux"))]
#[derive(Clone, Default)]
struct SignalState {
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(not(target_os = "linux"))]
impl SignalState {
    fn new() -> Self {
        Self::default()
    }

    fn install(&self) -> io::Result<()> {
        let flag = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        });
        Ok(())
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn take_reload(&self) -> bool {
        false
    }
}
