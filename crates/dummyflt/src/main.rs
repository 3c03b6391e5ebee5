// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::{Context, Result};
use clap::Parser;
use redirfs_core::vfs::{self, Dentry};
use redirfs_core::{MemFs, ObjKind, PathFlags, Redirfs, RedirfsConfig};
use redirfs_logging::CliLoggingArgs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run the dummy filter over a scripted workload on an in-memory filesystem"
)]
struct Cli {
    /// Subtree the filter is included on
    #[arg(long, default_value = "/srv")]
    path: PathBuf,

    /// Filter priority; lower runs first
    #[arg(long, default_value_t = dummyflt::DEFAULT_PRIORITY)]
    priority: i32,

    /// Framework configuration (JSON or TOML)
    #[arg(long, env = "REDIRFS_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

fn mkdir_all(fs: &MemFs, path: &Path) -> Result<Arc<Dentry>> {
    let mut cursor = fs.root().clone();
    for component in path.components() {
        let Component::Normal(name) = component else {
            continue;
        };
        let name = name.to_str().context("path is not valid UTF-8")?;
        cursor = match vfs::vfs_lookup(&cursor, name) {
            Ok(existing) => existing,
            Err(_) => vfs::vfs_mkdir(&cursor, name, 0o755)?,
        };
    }
    Ok(cursor)
}

fn write_file(dir: &Arc<Dentry>, name: &str, content: &[u8]) -> Result<()> {
    let dentry = vfs::vfs_create(dir, name, 0o644)?;
    let file = vfs::vfs_open(&dentry, libc::O_WRONLY)?;
    vfs::vfs_write(&file, content)?;
    vfs::vfs_close(&file)?;
    Ok(())
}

fn seed(fs: &MemFs, root: &Path) -> Result<()> {
    let top = mkdir_all(fs, root)?;
    write_file(&top, "readme.txt", b"redirfs dummy filter demo\n")?;
    let notes = vfs::vfs_mkdir(&top, "notes", 0o755)?;
    write_file(&notes, "todo.txt", b"- watch the log\n")?;
    vfs::vfs_mknod(&top, "null", libc::S_IFCHR as u32 | 0o666)?;
    let outside = mkdir_all(fs, Path::new("/outside"))?;
    write_file(&outside, "ignored.txt", b"not filtered\n")?;
    Ok(())
}

/// Walk a directory tree: list, look up and read everything in it.
fn walk(dir: &Arc<Dentry>) -> Result<usize> {
    let handle = vfs::vfs_open(dir, libc::O_RDONLY)?;
    let entries = vfs::vfs_readdir(&handle)?;
    vfs::vfs_close(&handle)?;

    let mut bytes = 0;
    for entry in entries {
        let child = vfs::vfs_lookup(dir, &entry.name)?;
        match entry.kind {
            Some(ObjKind::Directory) => bytes += walk(&child)?,
            Some(ObjKind::Regular) => {
                let file = vfs::vfs_open(&child, libc::O_RDONLY)?;
                let mut buf = [0u8; 256];
                bytes += vfs::vfs_read(&file, &mut buf)? as usize;
                vfs::vfs_close(&file)?;
            }
            Some(ObjKind::CharDevice) => {
                let file = vfs::vfs_open(&child, libc::O_WRONLY)?;
                vfs::vfs_write(&file, b"discarded")?;
                vfs::vfs_close(&file)?;
            }
            _ => {}
        }
    }
    Ok(bytes)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.logging.init("dummyflt")?;

    let config = match &cli.config {
        Some(path) => RedirfsConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => RedirfsConfig::default(),
    };

    let fs = MemFs::new();
    seed(&fs, &cli.path)?;

    let rfs = Redirfs::new(config)?;
    let counters = Arc::new(dummyflt::CallCounters::default());
    let filter = dummyflt::register(&rfs, cli.priority, counters.clone())?;
    let root = vfs::vfs_resolve(fs.root(), &cli.path)?;
    rfs.add_path(&filter, &root, PathFlags::Include)?;
    tracing::info!(path = %cli.path.display(), priority = cli.priority, "dummyflt attached");

    let bytes = walk(&root)? + walk(&vfs::vfs_resolve(fs.root(), "/outside")?)?;
    tracing::info!(
        bytes,
        precalls = counters.precalls(),
        postcalls = counters.postcalls(),
        "workload finished"
    );
    println!("{}", serde_json::to_string_pretty(&rfs.stats())?);

    dummyflt::unregister_with_retry(&rfs, &filter, 50, Duration::from_millis(20))?;
    rfs.shutdown();
    Ok(())
}
