// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging setup for RedirFS binaries
//!
//! `RUST_LOG` always wins over the configured level. Output is plaintext or
//! JSON, on stdout or appended to a file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing::Level;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plaintext,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Plaintext => "plaintext",
            LogFormat::Json => "json",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliLogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    /// Includes one event per filter callback
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

/// Logging flags, meant for `#[command(flatten)]`.
#[derive(Clone, Debug, Default, clap::Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliLoggingArgs {
    #[arg(long, value_enum, help = "Log verbosity level (default: info)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<CliLogLevel>,

    #[arg(long, value_enum, help = "Log output format (default: plaintext)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,

    #[arg(long, help = "Write logs to this directory instead of stdout")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    #[arg(long, help = "Write logs to this file instead of stdout")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl CliLoggingArgs {
    /// Console logging unless `--log-file` or `--log-dir` was given.
    pub fn init(self, component: &str) -> anyhow::Result<()> {
        let level = self.log_level.unwrap_or_default().into();
        let format = self.log_format.unwrap_or_default();
        match self.log_path(component) {
            Some(path) => init_to_file(component, level, format, &path),
            None => init(component, level, format),
        }
    }

    /// Where file logging goes, if it was requested. A relative `--log-file`
    /// is placed under `--log-dir`.
    pub fn log_path(&self, component: &str) -> Option<PathBuf> {
        match (&self.log_file, &self.log_dir) {
            (Some(file), Some(dir)) if Path::new(file).is_relative() => Some(Path::new(dir).join(file)),
            (Some(file), _) => Some(PathBuf::from(file)),
            (None, Some(dir)) => Some(Path::new(dir).join(format!("{component}.log"))),
            (None, None) => None,
        }
    }
}

pub fn init(component: &str, default_level: Level, format: LogFormat) -> anyhow::Result<()> {
    init_with_writer(component, default_level, format, io::stdout)
}

pub fn init_to_file(component: &str, default_level: Level, format: LogFormat, log_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = fs::OpenOptions::new().create(true).append(true).open(log_path)?;
    init_with_writer(component, default_level, format, log_file)
}

fn default_filter(component: &str, level: Level) -> EnvFilter {
    let target = component.replace('-', "_");
    EnvFilter::new(format!("{level},{target}={level},redirfs_core={level}"))
}

pub fn init_with_writer<W>(component: &str, default_level: Level, format: LogFormat, writer: W) -> anyhow::Result<()>
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(component, default_level));
    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).json();
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer);
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_conversion() {
        assert_eq!(Level::from(CliLogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(CliLogLevel::Trace), Level::TRACE);
        assert_eq!(CliLogLevel::default(), CliLogLevel::Info);
    }

    #[test]
    fn console_unless_a_file_is_requested() {
        let args = CliLoggingArgs::default();
        assert_eq!(args.log_path("dummyflt"), None);

        let args = CliLoggingArgs {
            log_dir: Some("/var/log/rfs".into()),
            ..Default::default()
        };
        assert_eq!(args.log_path("dummyflt"), Some(PathBuf::from("/var/log/rfs/dummyflt.log")));

        let args = CliLoggingArgs {
            log_dir: Some("/var/log/rfs".into()),
            log_file: Some("run.log".into()),
            ..Default::default()
        };
        assert_eq!(args.log_path("dummyflt"), Some(PathBuf::from("/var/log/rfs/run.log")));

        let args = CliLoggingArgs {
            log_dir: Some("/var/log/rfs".into()),
            log_file: Some("/tmp/abs.log".into()),
            ..Default::default()
        };
        assert_eq!(args.log_path("dummyflt"), Some(PathBuf::from("/tmp/abs.log")));
    }

    #[test]
    fn file_logging_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rfs.log");
        // another test in this process may already own the global subscriber
        let _ = init_to_file("rfs-test", Level::DEBUG, LogFormat::Json, &path);
        assert!(path.exists());
    }
}
