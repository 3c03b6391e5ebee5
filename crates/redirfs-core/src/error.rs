// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for RedirFS Core

use std::fmt;
use std::io;

/// Framework error type, reported synchronously to the caller that
/// requested a registry, path or shadow change.
#[derive(thiserror::Error, Debug)]
pub enum RfsError {
    #[error("filter name already registered: {0}")]
    DuplicateName(String),
    #[error("unknown or unregistered filter")]
    InvalidFilter,
    #[error("filter is still referenced by {0} chain(s)")]
    StillReferenced(usize),
    #[error("priority {0} is already taken")]
    PriorityConflict(i32),
    #[error("path already registered for filter: {0}")]
    PathExists(String),
    #[error("path not registered for filter: {0}")]
    PathNotFound(String),
    #[error("object is not attached")]
    NotAttached,
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type RfsResult<T> = Result<T, RfsError>;

/// Negative result of an intercepted operation, carried verbatim from the
/// underlying implementation or supplied by a filter.
#[derive(thiserror::Error, Clone, Copy, PartialEq, Eq, Hash)]
#[error("errno {0}")]
pub struct Errno(pub i32);

impl Errno {
    pub const EPERM: Errno = Errno(libc::EPERM);
    pub const ENOENT: Errno = Errno(libc::ENOENT);
    pub const EIO: Errno = Errno(libc::EIO);
    pub const EBADF: Errno = Errno(libc::EBADF);
    pub const ENOMEM: Errno = Errno(libc::ENOMEM);
    pub const EACCES: Errno = Errno(libc::EACCES);
    pub const EEXIST: Errno = Errno(libc::EEXIST);
    pub const ENOTDIR: Errno = Errno(libc::ENOTDIR);
    pub const EISDIR: Errno = Errno(libc::EISDIR);
    pub const EINVAL: Errno = Errno(libc::EINVAL);
    pub const ENODEV: Errno = Errno(libc::ENODEV);
    pub const ENOSPC: Errno = Errno(libc::ENOSPC);
    pub const ENOTEMPTY: Errno = Errno(libc::ENOTEMPTY);
    pub const ENOTTY: Errno = Errno(libc::ENOTTY);
    pub const ENAMETOOLONG: Errno = Errno(libc::ENAMETOOLONG);
    pub const EOPNOTSUPP: Errno = Errno(libc::EOPNOTSUPP);

    pub fn raw(self) -> i32 {
        self.0
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            libc::EPERM => "EPERM",
            libc::ENOENT => "ENOENT",
            libc::EIO => "EIO",
            libc::EBADF => "EBADF",
            libc::ENOMEM => "ENOMEM",
            libc::EACCES => "EACCES",
            libc::EEXIST => "EEXIST",
            libc::ENOTDIR => "ENOTDIR",
            libc::EISDIR => "EISDIR",
            libc::EINVAL => "EINVAL",
            libc::ENODEV => "ENODEV",
            libc::ENOSPC => "ENOSPC",
            libc::ENOTEMPTY => "ENOTEMPTY",
            libc::ENOTTY => "ENOTTY",
            libc::ENAMETOOLONG => "ENAMETOOLONG",
            libc::EOPNOTSUPP => "EOPNOTSUPP",
            _ => "E?",
        }
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl From<Errno> for io::Error {
    fn from(errno: Errno) -> Self {
        io::Error::from_raw_os_error(errno.0)
    }
}

/// Result of every operation entry: a non-negative value (status, byte
/// count, offset) or the errno the call failed with.
pub type OpResult = Result<i64, Errno>;

/// Report a violated internal invariant and halt. Release builds abort.
#[cold]
pub(crate) fn consistency_fault(what: &str, detail: impl fmt::Display) -> ! {
    tracing::error!(%detail, "internal consistency fault: {what}");
    panic!("redirfs internal consistency fault: {what}: {detail}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_names_and_io_conversion() {
        assert_eq!(Errno::EPERM.name(), "EPERM");
        assert_eq!(format!("{:?}", Errno::ENOENT), format!("ENOENT({})", libc::ENOENT));
        let io_err: io::Error = Errno::EACCES.into();
        assert_eq!(io_err.raw_os_error(), Some(libc::EACCES));
    }

    #[test]
    fn framework_errors_render() {
        let err = RfsError::DuplicateName("dummyflt".into());
        assert_eq!(err.to_string(), "filter name already registered: dummyflt");
        assert_eq!(
            RfsError::StillReferenced(2).to_string(),
            "filter is still referenced by 2 chain(s)"
        );
    }
}
