//! CLI argument parsing and validation module
//!
//! Handles command-line interface using clap, including:
//! - Daemon run options (config file, interval override, log level)
//! - One-shot process snapshot with human or JSON output
//! - Configuration validation

use crate::daemon::config::validate_interval;
use crate::daemon::logging::LogLevel;
use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

/// Parsed command line
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Run(RunOptions),
    Snapshot { json: bool },
    CheckConfig { config: Option<PathBuf> },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub config: Option<PathBuf>,
    /// Overrides `daemon.polling_interval`
    pub interval: Option<f64>,
    /// Overrides `daemon.log_level`
    pub log_level: Option<LogLevel>,
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("PATH")
        .help("Configuration file (default: <config dir>/procguard/config.toml)")
        .value_parser(value_parser!(PathBuf))
}

pub fn build_cli() -> Command {
    Command::new("procguard")
        .version(env!("PROCGUARD_VERSION"))
        .long_version(concat!(env!("PROCGUARD_VERSION"), " (", env!("GIT_HASH"), ")"))
        .about("Monitor process lifecycles and terminate blocklisted executables")
        .long_about(
            "Polls the process table, reports process starts and exits to the event log, \
             and terminates processes that match the configured blocklist.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Run the monitor until interrupted (SIGHUP reloads the blocklist)")
                .arg(config_arg())
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("SECONDS")
                        .help("Polling interval in seconds (0.1-300)")
                        .value_parser(value_parser!(f64)),
                )
                .arg(
                    Arg::new("log-level")
                        .short('l')
                        .long("log-level")
                        .value_name("LEVEL")
                        .help("Minimum log level")
                        .value_parser(["error", "warn", "info", "debug"]),
                ),
        )
        .subcommand(
            Command::new("snapshot")
                .about("Print the current process table once")
                .arg(
                    Arg::new("json")
                        .short('j')
                        .long("json")
                        .help("Output in JSON format")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate a configuration file and print its blocklist")
                .arg(config_arg()),
        )
}

/// Parse command line arguments of the current process
pub fn parse_args() -> Result<CliCommand> {
    from_matches(&build_cli().get_matches())
}

/// Parse an explicit argument list
pub fn parse_from<I, T>(args: I) -> Result<CliCommand>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_cli().try_get_matches_from(args)?;
    from_matches(&matches)
}

fn from_matches(matches: &ArgMatches) -> Result<CliCommand> {
    match matches.subcommand() {
        Some(("run", sub)) => {
            let interval = sub.get_one::<f64>("interval").copied();
            if let Some(seconds) = interval {
                validate_interval(seconds)?;
            }

            let log_level = sub
                .get_one::<String>("log-level")
                .map(|level| parse_log_level(level))
                .transpose()?;

            Ok(CliCommand::Run(RunOptions {
                config: sub.get_one::<PathBuf>("config").cloned(),
                interval,
                log_level,
            }))
        }
        Some(("snapshot", sub)) => Ok(CliCommand::Snapshot {
            json: sub.get_flag("json"),
        }),
        Some(("check-config", sub)) => Ok(CliCommand::CheckConfig {
            config: sub.get_one::<PathBuf>("config").cloned(),
        }),
        Some((other, _)) => Err(anyhow!("Unknown command: {}", other)),
        None => Err(anyhow!("No command given")),
    }
}

fn parse_log_level(level: &str) -> Result<LogLevel> {
    match level {
        "error" => Ok(LogLevel::Error),
        "warn" => Ok(LogLevel::Warn),
        "info" => Ok(LogLevel::Info),
        "debug" => Ok(LogLevel::Debug),
        other => Err(anyhow!("Invalid log level: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_run_with_overrides() {
        let command = parse_from([
            "procguard",
            "run",
            "--config",
            "/etc/procguard.toml",
            "--interval",
            "0.5",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(
            command,
            CliCommand::Run(RunOptions {
                config: Some(PathBuf::from("/etc/procguard.toml")),
                interval: Some(0.5),
                log_level: Some(LogLevel::Debug),
            })
        );
    }

    #[test]
    fn test_run_defaults() {
        assert_eq!(
            parse_from(["procguard", "run"]).unwrap(),
            CliCommand::Run(RunOptions::default())
        );
    }

    #[test]
    fn test_out_of_range_interval_rejected() {
        assert!(parse_from(["procguard", "run", "--interval", "0.01"]).is_err());
        assert!(parse_from(["procguard", "run", "--interval", "301"]).is_err());
        assert!(parse_from(["procguard", "run", "--interval", "fast"]).is_err());
    }

    #[test]
    fn test_snapshot_json_flag() {
        assert_eq!(
            parse_from(["procguard", "snapshot", "--json"]).unwrap(),
            CliCommand::Snapshot { json: true }
        );
        assert_eq!(
            parse_from(["procguard", "snapshot"]).unwrap(),
            CliCommand::Snapshot { json: false }
        );
    }

    #[test]
    fn test_check_config() {
        assert_eq!(
            parse_from(["procguard", "check-config", "-c", "cfg.toml"]).unwrap(),
            CliCommand::CheckConfig {
                config: Some(PathBuf::from("cfg.toml"))
            }
        );
    }

    #[test]
    fn test_subcommand_required() {
        assert!(parse_from(["procguard"]).is_err());
    }
}
