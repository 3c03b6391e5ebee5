// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-test log files

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TestLogError {
    #[error("test log i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not serialize value for test log: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid test name: {name}")]
    InvalidTestName { name: String },
}

/// Writes timestamped diagnostics of one test to its own file.
pub struct TestLogger {
    log_path: PathBuf,
    writer: BufWriter<File>,
    test_name: String,
    start_time: DateTime<Utc>,
}

impl TestLogger {
    pub fn new(test_name: &str) -> Result<Self, TestLogError> {
        validate_test_name(test_name)?;
        let log_path = create_unique_test_log(test_name);
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(&log_path)?;
        let mut logger = Self {
            log_path,
            writer: BufWriter::new(file),
            test_name: test_name.to_string(),
            start_time: Utc::now(),
        };
        logger.write_header()?;
        Ok(logger)
    }

    pub fn log(&mut self, message: &str) -> Result<(), TestLogError> {
        let timestamp = Utc::now().format("%H:%M:%S%.3f");
        writeln!(self.writer, "[{timestamp}] {message}")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn log_json<T: serde::Serialize>(&mut self, label: &str, data: &T) -> Result<(), TestLogError> {
        let json = serde_json::to_string_pretty(data)?;
        self.log(&format!("{label}: {json}"))
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn elapsed_secs(&self) -> f64 {
        Utc::now().signed_duration_since(self.start_time).num_milliseconds() as f64 / 1000.0
    }

    /// One stdout line on success; the log stays on disk.
    pub fn finish_success(mut self) -> Result<PathBuf, TestLogError> {
        let elapsed = self.elapsed_secs();
        self.log(&format!("passed in {elapsed:.3}s"))?;
        self.writer.flush()?;
        drop(self.writer);
        println!("✅ {} passed", self.test_name);
        Ok(self.log_path)
    }

    /// Print the log location and size so the failure can be inspected.
    pub fn finish_failure(mut self, error_message: &str) -> Result<PathBuf, TestLogError> {
        let elapsed = self.elapsed_secs();
        self.log(&format!("failed after {elapsed:.3}s: {error_message}"))?;
        self.writer.flush()?;
        drop(self.writer);
        match fs::metadata(&self.log_path) {
            Ok(meta) => println!(
                "❌ {} failed - log: {} ({} bytes)",
                self.test_name,
                self.log_path.display(),
                meta.len()
            ),
            Err(_) => println!("❌ {} failed - log: {}", self.test_name, self.log_path.display()),
        }
        Ok(self.log_path)
    }

    fn write_header(&mut self) -> Result<(), TestLogError> {
        writeln!(self.writer, "=== RedirFS test log ===")?;
        writeln!(self.writer, "test: {}", self.test_name)?;
        writeln!(self.writer, "started: {}", self.start_time.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(self.writer, "pid: {}", std::process::id())?;
        writeln!(self.writer, "thread: {}", std::thread::current().name().unwrap_or("unnamed"))?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// `target/test-logs/<date>/<test>-<time>-<uuid>.log` under the workspace
/// root.
pub fn create_unique_test_log(test_name: &str) -> PathBuf {
    let now = Utc::now();
    let log_dir = find_workspace_root()
        .join("target")
        .join("test-logs")
        .join(now.format("%Y-%m-%d").to_string());
    if let Err(err) = fs::create_dir_all(&log_dir) {
        panic!("cannot create test log directory {}: {}", log_dir.display(), err);
    }
    let filename = format!(
        "{}-{}-{}.log",
        sanitize_filename(test_name),
        now.format("%H-%M-%S"),
        Uuid::new_v4()
    );
    log_dir.join(filename)
}

fn find_workspace_root() -> PathBuf {
    let current = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    current
        .ancestors()
        .find(|dir| {
            fs::read_to_string(dir.join("Cargo.toml")).is_ok_and(|text| text.contains("[workspace]"))
        })
        .map(Path::to_path_buf)
        .unwrap_or(current)
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn validate_test_name(name: &str) -> Result<(), TestLogError> {
    if name.is_empty() || name.len() > 200 {
        return Err(TestLogError::InvalidTestName {
            name: name.chars().take(40).collect(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[crate::logged_test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_filename("shadow-release_1"), "shadow-release_1");
        assert_eq!(sanitize_filename("a b/c:d"), "a_b_c_d");
    }

    #[crate::logged_test]
    fn test_names_are_validated() {
        assert!(validate_test_name("chain_order").is_ok());
        assert!(validate_test_name("").is_err());
        assert!(validate_test_name(&"x".repeat(201)).is_err());
    }
}
