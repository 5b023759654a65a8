#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use procguard::cli::{self, CliCommand, RunOptions};
use procguard::constants::APP_SUBSYSTEM;
use procguard::daemon::config::DaemonConfiguration;
use procguard::daemon::logging::{self, DaemonLogger};
use procguard::daemon::Orchestrator;
use procguard::models::MonitoringEpoch;
use procguard::monitor::SnapshotSource;
use procguard::output;
use procguard::platform;
use procguard::storage::JsonEventLog;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    match cli::parse_args()? {
        CliCommand::Run(options) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;
            runtime.block_on(run_daemon(options))
        }
        CliCommand::Snapshot { json } => print_snapshot(json),
        CliCommand::CheckConfig { config } => check_config(config),
    }
}

/// Resolve the config file: explicit path, else the default path if it exists
fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        DaemonConfiguration::default_config_path()
            .ok()
            .filter(|path| path.exists())
    })
}

async fn run_daemon(options: RunOptions) -> Result<()> {
    let config_path = resolve_config_path(options.config);

    let mut config = match &config_path {
        Some(path) => DaemonConfiguration::load_from_file(path)?,
        None => DaemonConfiguration::default(),
    };
    if let Some(interval) = options.interval {
        config.daemon.polling_interval = interval;
    }
    if let Some(level) = options.log_level {
        config.daemon.log_level = level;
    }
    config.validate()?;

    let level = config.daemon.log_level;
    logging::init_backend(APP_SUBSYSTEM, level).context("Failed to initialize logging")?;
    let logger = DaemonLogger::new(level);

    let epoch = MonitoringEpoch::new();
    let log_dir = config.event_log_dir()?;
    let store = JsonEventLog::new(&log_dir, epoch)
        .with_context(|| format!("Failed to open event log in {}", log_dir.display()))?;

    let mut orchestrator =
        Orchestrator::new(config, platform::native(), Arc::new(store), logger.clone())?.with_epoch(epoch);
    if let Some(path) = &config_path {
        orchestrator = orchestrator.with_config_path(path);
    }

    orchestrator.start()?;
    wait_for_shutdown(&orchestrator, config_path.as_deref(), &logger).await?;

    let stats = orchestrator.stop().await?;
    logger.log_debug(
        "Final statistics",
        serde_json::json!({ "event": "daemon_stats", "stats": stats }),
    );
    Ok(())
}

/// Block until SIGINT or SIGTERM, reloading the blocklist on SIGHUP
#[cfg(unix)]
async fn wait_for_shutdown(orchestrator: &Orchestrator, config_path: Option<&Path>, logger: &DaemonLogger) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = terminate.recv() => return Ok(()),
            _ = hangup.recv() => reload_blocklist(orchestrator, config_path, logger),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_orchestrator: &Orchestrator, _config_path: Option<&Path>, _logger: &DaemonLogger) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}

#[cfg_attr(not(unix), allow(dead_code))]
fn reload_blocklist(orchestrator: &Orchestrator, config_path: Option<&Path>, logger: &DaemonLogger) {
    let Some(path) = config_path else {
        logger.log_error("Blocklist reload requested without a configuration file", None);
        return;
    };

    // A bad file leaves the current blocklist in place
    let result = DaemonConfiguration::load_from_file(path)
        .map_err(anyhow::Error::from)
        .and_then(|config| Ok(orchestrator.reload_policy(config.blocklist, "sighup")?));
    if let Err(e) = result {
        logger.log_error("Blocklist reload failed", Some(&format!("{:#}", e)));
    }
}

fn print_snapshot(json: bool) -> Result<()> {
    let source = SnapshotSource::new(platform::native());
    let snapshot = source.capture().context("Failed to enumerate processes")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if json {
        output::format_snapshot_json(&snapshot, &mut out)
    } else {
        output::format_snapshot_human(&snapshot, &mut out)
    }
}

fn check_config(explicit: Option<PathBuf>) -> Result<()> {
    let path = match explicit {
        Some(path) => path,
        None => DaemonConfiguration::default_config_path()?,
    };
    let config = DaemonConfiguration::load_from_file(&path)?;

    println!("Configuration OK: {}", path.display());
    println!("  Polling interval: {}s", config.daemon.polling_interval);
    println!("  Queue capacity: {}", config.daemon.queue_capacity);
    println!("  Termination retries: {}", config.daemon.termination_retries);
    match config.event_log_dir() {
        Ok(dir) => println!("  Event log: {}", dir.display()),
        Err(e) => println!("  Event log: {}", e),
    }
    println!();

    let stdout = std::io::stdout();
    output::format_blocklist_human(&config.blocklist, &mut stdout.lock())
}
