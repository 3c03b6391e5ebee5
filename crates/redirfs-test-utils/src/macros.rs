// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Assertions that leave a line in the test log before panicking

/// `assert!` that records the checked condition in the test log.
#[macro_export]
macro_rules! logged_assert {
    ($logger:expr, $condition:expr) => {
        $crate::logged_assert!($logger, $condition, stringify!($condition))
    };
    ($logger:expr, $condition:expr, $message:expr) => {{
        let ok = $condition;
        let line = format!("{} {}", if ok { "ok:" } else { "FAILED:" }, $message);
        if let Err(e) = $logger.log(&line) {
            eprintln!("test log write failed: {}", e);
        }
        if !ok {
            panic!("assertion failed: {}", $message);
        }
    }};
}

/// `assert_eq!` that records both sides in the test log.
#[macro_export]
macro_rules! logged_assert_eq {
    ($logger:expr, $left:expr, $right:expr) => {{
        let left = &$left;
        let right = &$right;
        let ok = *left == *right;
        let line = format!(
            "{} {} == {} ({:?} vs {:?})",
            if ok { "ok:" } else { "FAILED:" },
            stringify!($left),
            stringify!($right),
            left,
            right
        );
        if let Err(e) = $logger.log(&line) {
            eprintln!("test log write failed: {}", e);
        }
        if !ok {
            panic!("assertion failed: `(left == right)`\n  left: `{:?}`,\n right: `{:?}`", left, right);
        }
    }};
}

#[cfg(test)]
mod tests {
    use crate::TestLogger;

    #[crate::logged_test]
    fn failed_assertions_panic() {
        let result = std::panic::catch_unwind(|| {
            let mut inner = TestLogger::new("inner_assert").unwrap();
            logged_assert!(inner, 1 + 1 == 3, "arithmetic");
        });
        assert!(result.is_err());

        let result = std::panic::catch_unwind(|| {
            let mut inner = TestLogger::new("inner_assert_eq").unwrap();
            logged_assert_eq!(inner, 1, 2);
        });
        assert!(result.is_err());

        logged_assert_eq!(logger, 2, 2);
        logger.log("assertion helpers verified").unwrap();
    }
}
