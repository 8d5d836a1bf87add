//! The VFS server: envelope dispatch plus one module per operation.

mod add;
mod close;
mod fork;
mod getdents;
mod ioctl;
mod mount;
mod open;
mod read;
mod seek;
mod stat;
mod write;

use crate::continuation::{
    Continuation,
    ContinuationTable,
};
use crate::dev::DeviceRegistry;
use crate::handle::HandleTable;
use crate::mount::MountTable;
use crate::ramdisk::Ramdisk;
use libember::error::ErrorKind;
use libember::proto::Dirent;
use libember::rpc::{
    Envelope,
    RpcHandler,
    ServerIo,
};
use libember::service::RpcType;
use libember::stat::{
    Stat,
    S_IFDIR,
};
use libember::Pid;
use alloc::string::String;
use alloc::vec::Vec;

/// The virtual file system server state.
#[derive(Debug)]
pub struct VfsServer {
    pid: Pid,
    handles: HandleTable,
    mounts: MountTable,
    continuations: ContinuationTable,
    devices: DeviceRegistry,
    ramdisk: Option<Ramdisk>,
    ramdisk_mount: Option<String>,
    dev_mount: Option<String>,
    /// Process registered for forwarded `VFS_MOUNT` requests.
    mount_handler: Option<Pid>,
}

fn dir_stat() -> Stat {
    Stat {
        st_mode: S_IFDIR | 0o755,
        ..Stat::default()
    }
}

impl VfsServer {
    /// Creates the server. The self-mount is installed right away; paths
    /// no mount covers fall back to the VFS itself (device tree, root).
    pub fn new(pid: Pid, ramdisk: Option<Ramdisk>) -> Self {
        let mut server = Self {
            pid,
            handles: HandleTable::new(),
            mounts: MountTable::new(),
            continuations: ContinuationTable::new(),
            devices: DeviceRegistry::new(pid),
            ramdisk,
            ramdisk_mount: None,
            dev_mount: None,
            mount_handler: None,
        };
        server
            .mounts
            .add(crate::SELF_MOUNT, pid, dir_stat())
            .expect("fresh mount table takes the self mount");
        server
    }

    /// Owner of a path: registered device nodes stay with the VFS, then
    /// the longest mount prefix decides, and everything unclaimed is
    /// served by the VFS itself.
    pub(super) fn owner_of(&self, path: &str) -> Pid {
        if self.devices.lookup(path).is_some() {
            return self.pid;
        }
        self.mounts
            .extract(path)
            .map(|mount| mount.pid)
            .unwrap_or(self.pid)
    }

    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Test and diagnostics access to the handle table.
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn continuation_count(&self) -> usize {
        self.continuations.len()
    }

    /// Path relative to the ramdisk mount, when the path lives below it.
    fn ramdisk_relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        let mount = self.ramdisk_mount.as_deref()?;
        if !libember::path::is_prefix(mount, path) {
            return None;
        }
        let rest = path.strip_prefix(mount).unwrap_or("");
        Some(rest.strip_prefix('/').unwrap_or(rest))
    }

    /// Resolves a path served by the VFS itself (ramdisk, device tree,
    /// the root). Returns the handler pid responsible for file content
    /// plus the status.
    fn self_stat(&self, path: &str) -> Result<(Pid, Stat), ErrorKind> {
        if let Some(relative) = self.ramdisk_relative(path) {
            let ramdisk = self.ramdisk.as_ref().ok_or(ErrorKind::NotFound)?;
            return Ok((self.pid, ramdisk.stat(relative)?));
        }
        if let Some(node) = self.devices.lookup(path) {
            return Ok((node.handler, node.info));
        }
        if path == "/" || path == crate::SELF_MOUNT {
            return Ok((self.pid, dir_stat()));
        }
        Err(ErrorKind::NotFound)
    }

    /// Reads content the VFS serves itself; only the ramdisk has any.
    fn self_read(&self, path: &str, offset: i64, length: u32) -> Result<Vec<u8>, ErrorKind> {
        let relative = self.ramdisk_relative(path).ok_or(ErrorKind::NotFound)?;
        let ramdisk = self.ramdisk.as_ref().ok_or(ErrorKind::NotFound)?;
        ramdisk.read(relative, offset, length)
    }

    /// Directory listing for self-served paths.
    fn self_getdents(&self, path: &str) -> Result<Vec<Dirent>, ErrorKind> {
        if let Some(relative) = self.ramdisk_relative(path) {
            let ramdisk = self.ramdisk.as_ref().ok_or(ErrorKind::NotFound)?;
            return ramdisk.getdents(relative);
        }
        if let Some(node) = self.devices.lookup(path) {
            if node.info.is_dir() {
                return Ok(self.devices.children(path));
            }
            return Err(ErrorKind::NotDirectory);
        }
        if path == "/" {
            // the root itself only carries the mounted trees
            return Ok(Vec::new());
        }
        Err(ErrorKind::NotFound)
    }

    /// Resumes the continuation a reply envelope belongs to. A missing
    /// record means the request is already answered or the origin died:
    /// the reply is dropped.
    fn resume(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let Some(continuation) = self
            .continuations
            .pop(envelope.rpc_type, envelope.response_id)
        else {
            log::trace!(
                "reply {} / {} without continuation, dropped",
                envelope.rpc_type,
                envelope.response_id
            );
            return;
        };
        match continuation {
            Continuation::Open {
                caller,
                request,
                handle,
            } => self.resume_open(caller, request, handle, envelope, io),
            Continuation::Read { caller, request } => {
                self.resume_read(caller, request, envelope, io)
            }
            Continuation::Write { caller, request } => {
                self.resume_write(caller, request, envelope, io)
            }
            Continuation::Stat { caller, request } => {
                self.resume_stat(caller, request, envelope, io)
            }
            Continuation::Getdents { caller, request } => {
                self.resume_getdents(caller, request, envelope, io)
            }
            Continuation::Ioctl { caller, request } => {
                self.resume_ioctl(caller, request, envelope, io)
            }
            Continuation::Mount { caller, request } => {
                self.resume_mount(caller, request, envelope, io)
            }
            Continuation::Close { caller, request } => {
                self.resume_close(caller, request, envelope, io)
            }
            Continuation::Add { caller, request } => {
                self.resume_add(caller, request, envelope, io)
            }
            Continuation::ForkStat { caller, request } => {
                self.resume_fork_stat(caller, request, envelope, io)
            }
            Continuation::ForkPropagate { caller, request } => {
                self.resume_fork_propagate(caller, request, envelope, io)
            }
        }
    }
}

impl RpcHandler for VfsServer {
    fn handle(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let Some(rpc) = RpcType::from_val(envelope.rpc_type) else {
            log::warn!("unknown rpc type {} dropped", envelope.rpc_type);
            let _ = io.get_data(envelope.data_id);
            return;
        };
        if !envelope.is_request() {
            self.resume(envelope, io);
            return;
        }
        log::trace!("{rpc:?} request from pid {}", envelope.origin);
        match rpc {
            RpcType::VfsAdd => self.handle_add(envelope, io),
            RpcType::VfsRemove => self.handle_remove(envelope, io),
            RpcType::VfsOpen => self.handle_open(envelope, io),
            RpcType::VfsClose => self.handle_close(envelope, io),
            RpcType::VfsRead => self.handle_read(envelope, io),
            RpcType::VfsWrite => self.handle_write(envelope, io),
            RpcType::VfsSeek => self.handle_seek(envelope, io),
            RpcType::VfsStat => self.handle_stat(envelope, io),
            RpcType::VfsIoctl => self.handle_ioctl(envelope, io),
            RpcType::VfsMount => self.handle_mount(envelope, io),
            RpcType::VfsUmount => self.handle_umount(envelope, io),
            RpcType::VfsGetdents => self.handle_getdents(envelope, io),
            RpcType::VfsFork => self.handle_fork(envelope, io),
            RpcType::VfsExit => self.handle_exit(envelope, io),
        }
    }
}

#[cfg(test)]
mod tests;
