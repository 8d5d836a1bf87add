//! The device tree.
//!
//! Driver processes announce their device files and ioctl commands with
//! `VFS_ADD`; the VFS serves the nodes itself and forwards file
//! operations and ioctls to the registered handler process.

use libember::proto::Dirent;
use libember::stat::{
    Stat,
    S_IFCHR,
    S_IFDIR,
};
use libember::Pid;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

/// One registered device file.
#[derive(Debug, Clone)]
pub struct DeviceNode {
    pub handler: Pid,
    pub info: Stat,
}

/// Registered device files plus the ioctl command registration table.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    nodes: BTreeMap<String, DeviceNode>,
    commands: BTreeMap<u32, Pid>,
}

fn chr_stat() -> Stat {
    Stat {
        st_mode: S_IFCHR | 0o666,
        ..Stat::default()
    }
}

impl DeviceRegistry {
    /// Registry preloaded with the nodes the VFS itself provides.
    pub fn new(own_pid: Pid) -> Self {
        let mut registry = Self::default();
        registry.register(
            "/dev",
            own_pid,
            Stat {
                st_mode: S_IFDIR | 0o755,
                ..Stat::default()
            },
        );
        for path in ["/dev/null", "/dev/stdin", "/dev/stdout", "/dev/stderr"] {
            registry.register(path, own_pid, chr_stat());
        }
        registry
    }

    pub fn register(&mut self, path: &str, handler: Pid, info: Stat) {
        log::debug!("device {path} handled by pid {handler}");
        self.nodes
            .insert(String::from(path), DeviceNode { handler, info });
    }

    pub fn remove(&mut self, path: &str) {
        self.nodes.remove(path);
    }

    pub fn lookup(&self, path: &str) -> Option<&DeviceNode> {
        self.nodes.get(path)
    }

    /// Registers one ioctl command for a handler process.
    pub fn push_command(&mut self, command: u32, handler: Pid) {
        self.commands.insert(command, handler);
    }

    pub fn command_handler(&self, command: u32) -> Option<Pid> {
        self.commands.get(&command).copied()
    }

    /// Drops every command registration of a handler.
    pub fn remove_commands_of(&mut self, handler: Pid) {
        self.commands.retain(|_, pid| *pid != handler);
    }

    /// Direct children of a directory path, for getdents on the device
    /// tree.
    pub fn children(&self, dir: &str) -> Vec<Dirent> {
        let prefix = if dir.ends_with('/') {
            String::from(dir)
        } else {
            format!("{dir}/")
        };
        self.nodes
            .iter()
            .filter_map(|(path, node)| {
                let rest = path.strip_prefix(&prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    return None;
                }
                Some(Dirent {
                    inode: node.info.st_ino,
                    kind: if node.info.is_dir() { 4 } else { 2 },
                    name: String::from(rest),
                })
            })
            .collect()
    }
}
