// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Operation identifiers: object kind crossed with operation name

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of an intercepted object, decided once from the inode mode when the
/// shadow is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
}

const REG_OPS: &[OpName] = &[
    OpName::Open,
    OpName::Release,
    OpName::Llseek,
    OpName::Read,
    OpName::Write,
    OpName::Flush,
    OpName::Fsync,
    OpName::Ioctl,
    OpName::Fallocate,
    OpName::Permission,
    OpName::Revalidate,
];

const DIR_OPS: &[OpName] = &[
    OpName::Open,
    OpName::Release,
    OpName::Llseek,
    OpName::Iterate,
    OpName::Fsync,
    OpName::Lookup,
    OpName::Create,
    OpName::Mkdir,
    OpName::Unlink,
    OpName::Rmdir,
    OpName::Permission,
    OpName::Revalidate,
];

const LNK_OPS: &[OpName] = &[
    OpName::Open,
    OpName::Release,
    OpName::Readlink,
    OpName::Permission,
    OpName::Revalidate,
];

const CHR_OPS: &[OpName] = &[
    OpName::Open,
    OpName::Release,
    OpName::Llseek,
    OpName::Read,
    OpName::Write,
    OpName::Flush,
    OpName::Fsync,
    OpName::Ioctl,
    OpName::Permission,
    OpName::Revalidate,
];

const BLK_FIFO_OPS: &[OpName] = &[
    OpName::Open,
    OpName::Release,
    OpName::Permission,
    OpName::Revalidate,
];

impl ObjKind {
    pub const ALL: [ObjKind; 6] = [
        ObjKind::Regular,
        ObjKind::Directory,
        ObjKind::Symlink,
        ObjKind::CharDevice,
        ObjKind::BlockDevice,
        ObjKind::Fifo,
    ];

    /// Decode the file-type bits of a mode. Sockets and unknown types are
    /// never intercepted.
    pub fn from_mode(mode: u32) -> Option<Self> {
        let fmt = mode & libc::S_IFMT as u32;
        if fmt == libc::S_IFREG as u32 {
            Some(ObjKind::Regular)
        } else if fmt == libc::S_IFDIR as u32 {
            Some(ObjKind::Directory)
        } else if fmt == libc::S_IFLNK as u32 {
            Some(ObjKind::Symlink)
        } else if fmt == libc::S_IFCHR as u32 {
            Some(ObjKind::CharDevice)
        } else if fmt == libc::S_IFBLK as u32 {
            Some(ObjKind::BlockDevice)
        } else if fmt == libc::S_IFIFO as u32 {
            Some(ObjKind::Fifo)
        } else {
            None
        }
    }

    pub fn mode_bits(self) -> u32 {
        (match self {
            ObjKind::Regular => libc::S_IFREG,
            ObjKind::Directory => libc::S_IFDIR,
            ObjKind::Symlink => libc::S_IFLNK,
            ObjKind::CharDevice => libc::S_IFCHR,
            ObjKind::BlockDevice => libc::S_IFBLK,
            ObjKind::Fifo => libc::S_IFIFO,
        }) as u32
    }

    pub fn label(self) -> &'static str {
        match self {
            ObjKind::Regular => "REG",
            ObjKind::Directory => "DIR",
            ObjKind::Symlink => "LNK",
            ObjKind::CharDevice => "CHR",
            ObjKind::BlockDevice => "BLK",
            ObjKind::Fifo => "FIFO",
        }
    }

    /// Operations meaningful for this kind of object.
    pub fn operations(self) -> &'static [OpName] {
        match self {
            ObjKind::Regular => REG_OPS,
            ObjKind::Directory => DIR_OPS,
            ObjKind::Symlink => LNK_OPS,
            ObjKind::CharDevice => CHR_OPS,
            ObjKind::BlockDevice | ObjKind::Fifo => BLK_FIFO_OPS,
        }
    }

    pub fn supports(self, op: OpName) -> bool {
        self.operations().contains(&op)
    }

    pub fn op(self, op: OpName) -> OpId {
        OpId::new(self, op)
    }
}

/// Which real-object table an operation lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpTable {
    File,
    Inode,
    Dentry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpName {
    Open,
    Release,
    Llseek,
    Read,
    Write,
    Iterate,
    Flush,
    Fsync,
    Ioctl,
    Fallocate,
    Lookup,
    Create,
    Mkdir,
    Unlink,
    Rmdir,
    Permission,
    Readlink,
    Revalidate,
}

impl OpName {
    pub const COUNT: usize = 18;

    pub const ALL: [OpName; OpName::COUNT] = [
        OpName::Open,
        OpName::Release,
        OpName::Llseek,
        OpName::Read,
        OpName::Write,
        OpName::Iterate,
        OpName::Flush,
        OpName::Fsync,
        OpName::Ioctl,
        OpName::Fallocate,
        OpName::Lookup,
        OpName::Create,
        OpName::Mkdir,
        OpName::Unlink,
        OpName::Rmdir,
        OpName::Permission,
        OpName::Readlink,
        OpName::Revalidate,
    ];

    pub fn table(self) -> OpTable {
        match self {
            OpName::Lookup
            | OpName::Create
            | OpName::Mkdir
            | OpName::Unlink
            | OpName::Rmdir
            | OpName::Permission
            | OpName::Readlink => OpTable::Inode,
            OpName::Revalidate => OpTable::Dentry,
            _ => OpTable::File,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpName::Open => "open",
            OpName::Release => "release",
            OpName::Llseek => "llseek",
            OpName::Read => "read",
            OpName::Write => "write",
            OpName::Iterate => "iterate",
            OpName::Flush => "flush",
            OpName::Fsync => "fsync",
            OpName::Ioctl => "ioctl",
            OpName::Fallocate => "fallocate",
            OpName::Lookup => "lookup",
            OpName::Create => "create",
            OpName::Mkdir => "mkdir",
            OpName::Unlink => "unlink",
            OpName::Rmdir => "rmdir",
            OpName::Permission => "permission",
            OpName::Readlink => "readlink",
            OpName::Revalidate => "revalidate",
        }
    }
}

// Every (kind, op) pair must fit the presence bitmap.
const _: () = assert!(ObjKind::ALL.len() * OpName::COUNT <= 128);

/// Operation identifier a filter registers callbacks against.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId {
    pub kind: ObjKind,
    pub op: OpName,
}

impl OpId {
    pub const fn new(kind: ObjKind, op: OpName) -> Self {
        Self { kind, op }
    }

    fn bit(self) -> u128 {
        1u128 << (self.kind as usize * OpName::COUNT + self.op as usize)
    }

    pub fn is_meaningful(self) -> bool {
        self.kind.supports(self.op)
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = match self.op.table() {
            OpTable::File => "FOP",
            OpTable::Inode => "IOP",
            OpTable::Dentry => "DOP",
        };
        write!(
            f,
            "{}_{}_{}",
            self.kind.label(),
            table,
            self.op.as_str().to_ascii_uppercase()
        )
    }
}

impl fmt::Debug for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Presence bitmap over every operation identifier.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OpMask(u128);

impl OpMask {
    pub const EMPTY: OpMask = OpMask(0);

    pub fn insert(&mut self, op: OpId) {
        self.0 |= op.bit();
    }

    pub fn contains(self, op: OpId) -> bool {
        self.0 & op.bit() != 0
    }

    pub fn union(self, other: OpMask) -> OpMask {
        OpMask(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = OpId> {
        ObjKind::ALL
            .into_iter()
            .flat_map(|kind| OpName::ALL.into_iter().map(move |op| OpId::new(kind, op)))
            .filter(move |id| self.contains(*id))
    }
}

impl FromIterator<OpId> for OpMask {
    fn from_iter<I: IntoIterator<Item = OpId>>(iter: I) -> Self {
        let mut mask = OpMask::EMPTY;
        for op in iter {
            mask.insert(op);
        }
        mask
    }
}

impl fmt::Debug for OpMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Phase in which a filter callback runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Pre,
    Post,
}

impl CallPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CallPhase::Pre => "precall",
            CallPhase::Post => "postcall",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_mode_covers_intercepted_types() {
        for kind in ObjKind::ALL {
            assert_eq!(ObjKind::from_mode(kind.mode_bits() | 0o644), Some(kind));
        }
        assert_eq!(ObjKind::from_mode(libc::S_IFSOCK as u32 | 0o600), None);
    }

    #[test]
    fn every_kind_supports_open_and_release() {
        for kind in ObjKind::ALL {
            assert!(kind.supports(OpName::Open), "{kind:?} open");
            assert!(kind.supports(OpName::Release), "{kind:?} release");
        }
        assert!(!ObjKind::Regular.supports(OpName::Lookup));
        assert!(!ObjKind::Directory.supports(OpName::Read));
    }

    #[test]
    fn op_mask_bits_are_distinct() {
        let mut mask = OpMask::EMPTY;
        for kind in ObjKind::ALL {
            for op in OpName::ALL {
                let id = OpId::new(kind, op);
                assert!(!mask.contains(id), "{id} collides");
                mask.insert(id);
            }
        }
        assert_eq!(mask.len(), ObjKind::ALL.len() * OpName::COUNT);
    }

    #[test]
    fn op_id_display_matches_table_naming() {
        assert_eq!(ObjKind::Regular.op(OpName::Open).to_string(), "REG_FOP_OPEN");
        assert_eq!(ObjKind::Directory.op(OpName::Lookup).to_string(), "DIR_IOP_LOOKUP");
        assert_eq!(ObjKind::Symlink.op(OpName::Revalidate).to_string(), "LNK_DOP_REVALIDATE");
    }

    #[test]
    fn mask_iterates_inserted_ops() {
        let mask: OpMask = [
            ObjKind::Regular.op(OpName::Write),
            ObjKind::Directory.op(OpName::Iterate),
        ]
        .into_iter()
        .collect();
        let ops: Vec<OpId> = mask.iter().collect();
        assert_eq!(
            ops,
            vec![ObjKind::Regular.op(OpName::Write), ObjKind::Directory.op(OpName::Iterate)]
        );
    }
}
