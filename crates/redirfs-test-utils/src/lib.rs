// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! RedirFS test utilities
//!
//! Every test writes its diagnostics to its own file under
//! `target/test-logs/<date>/`. A passing test prints one line; a failing
//! one prints the log path and size. [`TraceRecorder`] collects the order
//! in which filters and the replaced operations ran.

extern crate self as redirfs_test_utils;

mod guard;
pub mod logging;
pub mod macros;
pub mod trace;

pub use guard::TestLoggerGuard;
pub use logging::{create_unique_test_log, TestLogError, TestLogger};
pub use redirfs_test_utils_macros::logged_test;
pub use trace::TraceRecorder;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn log_files_are_unique_per_call() {
        let first = create_unique_test_log("unique_files");
        let second = create_unique_test_log("unique_files");
        assert_ne!(first, second);
        assert!(first.parent().is_some_and(|dir| dir.exists()));

        fs::write(&first, "one").unwrap();
        fs::write(&second, "two").unwrap();
        assert_eq!(fs::read_to_string(&first).unwrap(), "one");
        assert_eq!(fs::read_to_string(&second).unwrap(), "two");
        fs::remove_file(&first).unwrap();
        fs::remove_file(&second).unwrap();
    }

    #[logged_test]
    fn guard_exposes_logger() {
        logger.log("inside a logged test").unwrap();
        logger.log_json("stats", &serde_json::json!({ "files": 0 })).unwrap();
        assert!(logger.log_path().exists());
    }
}
