// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::path::{Path, PathBuf};

use crate::{TestLogError, TestLogger};

/// Finalizes a [`TestLogger`] for `#[logged_test]`.
///
/// A guard dropped without `finish_success` (a panic, an early return)
/// records the test as failed.
pub struct TestLoggerGuard {
    logger: Option<TestLogger>,
    log_path: PathBuf,
}

impl TestLoggerGuard {
    pub fn new(test_name: &str) -> Result<Self, TestLogError> {
        let logger = TestLogger::new(test_name)?;
        let log_path = logger.log_path().to_path_buf();
        Ok(Self {
            logger: Some(logger),
            log_path,
        })
    }

    pub fn logger(&mut self) -> &mut TestLogger {
        self.logger.as_mut().expect("test logger already finalized")
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn finish_success(mut self) -> Result<PathBuf, TestLogError> {
        match self.logger.take() {
            Some(logger) => logger.finish_success(),
            None => Ok(self.log_path.clone()),
        }
    }

    pub fn finish_failure(mut self, message: impl AsRef<str>) -> Result<PathBuf, TestLogError> {
        match self.logger.take() {
            Some(logger) => logger.finish_failure(message.as_ref()),
            None => Ok(self.log_path.clone()),
        }
    }
}

impl Drop for TestLoggerGuard {
    fn drop(&mut self) {
        let Some(logger) = self.logger.take() else {
            return;
        };
        let reason = if std::thread::panicking() {
            "test panicked"
        } else {
            "guard dropped before finish_success"
        };
        if let Err(err) = logger.finish_failure(reason) {
            eprintln!("could not finalize test log {}: {}", self.log_path.display(), err);
        }
    }
}
