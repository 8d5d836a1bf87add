//! The mount table.
//!
//! Path lookup picks the mount entry with the longest whole-component
//! prefix match, so a mount on `/a/b` shadows one on `/a` for everything
//! below `/a/b`.

use libember::error::ErrorKind;
use libember::path::{
    bounded,
    is_prefix,
    Path,
};
use libember::stat::Stat;
use libember::Pid;
use alloc::collections::BTreeMap;
use alloc::string::String;

/// One mounted tree.
#[derive(Debug, Clone)]
pub struct MountPoint {
    pub path: Path,
    /// Process answering requests below this prefix.
    pub pid: Pid,
    /// Status of the mount root.
    pub info: Stat,
}

/// All mounts, keyed by normalized target path.
#[derive(Debug, Default)]
pub struct MountTable {
    entries: BTreeMap<String, MountPoint>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mount; at most one entry per normalized path.
    pub fn add(&mut self, path: &str, pid: Pid, info: Stat) -> Result<(), ErrorKind> {
        let bounded_path = bounded(path)?;
        if self.entries.contains_key(path) {
            return Err(ErrorKind::Exists);
        }
        self.entries.insert(
            String::from(path),
            MountPoint {
                path: bounded_path,
                pid,
                info,
            },
        );
        log::debug!("mounted {path} -> pid {pid}");
        Ok(())
    }

    /// Longest prefix lookup for a file path.
    pub fn extract(&self, path: &str) -> Option<&MountPoint> {
        self.entries
            .iter()
            .filter(|(mount, _)| is_prefix(mount, path))
            .max_by_key(|(mount, _)| mount.len())
            .map(|(_, point)| point)
    }

    /// Exact match lookup for mount management.
    pub fn extract_exact(&self, path: &str) -> Option<&MountPoint> {
        self.entries.get(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<MountPoint> {
        self.entries.remove(path)
    }

    /// Overwrites the owner of an existing mount.
    pub fn set_owner(&mut self, path: &str, pid: Pid) {
        if let Some(point) = self.entries.get_mut(path) {
            point.pid = pid;
        }
    }
}
