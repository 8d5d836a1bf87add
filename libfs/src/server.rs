//! The RPC surface of a filesystem process.
//!
//! Both drivers plug into the same server shell: probe the partition
//! named in the mount request through the MBR, mount the filesystem at
//! the partition offset, then serve open/read/stat/getdents against it.
//! Writes answer `ENOSYS`, as does unmount.

use crate::device::BlockDevice;
use crate::ext::ExtFilesystem;
use crate::fat::FatFilesystem;
use crate::mbr;
use libember::error::ErrorKind;
use libember::proto::*;
use libember::rpc::{
    Envelope,
    RpcHandler,
    ServerIo,
};
use libember::service::RpcType;
use libember::stat::Stat;
use libember::Pid;
use alloc::string::String;
use alloc::vec::Vec;

/// What the plug-in shell needs from a concrete filesystem driver.
pub trait MountableFilesystem: Sized {
    type Device: BlockDevice;

    /// Partition type byte this driver accepts.
    const PARTITION_TYPE: u8;

    fn mount_at(device: Self::Device, partition_offset: u64) -> Result<Self, ErrorKind>;
    fn stat(&mut self, path: &str) -> Result<Stat, ErrorKind>;
    fn read(&mut self, path: &str, offset: i64, length: u32) -> Result<Vec<u8>, ErrorKind>;
    fn getdents(&mut self, path: &str) -> Result<Vec<Dirent>, ErrorKind>;
    fn write(&mut self, path: &str, offset: i64, data: &[u8]) -> Result<u32, ErrorKind>;
}

impl<D: BlockDevice> MountableFilesystem for ExtFilesystem<D> {
    type Device = D;
    const PARTITION_TYPE: u8 = mbr::PARTITION_TYPE_LINUX_NATIVE;

    fn mount_at(device: D, partition_offset: u64) -> Result<Self, ErrorKind> {
        Self::mount(device, partition_offset)
    }

    fn stat(&mut self, path: &str) -> Result<Stat, ErrorKind> {
        Self::stat(self, path)
    }

    fn read(&mut self, path: &str, offset: i64, length: u32) -> Result<Vec<u8>, ErrorKind> {
        Self::read(self, path, offset, length)
    }

    fn getdents(&mut self, path: &str) -> Result<Vec<Dirent>, ErrorKind> {
        Self::getdents(self, path)
    }

    fn write(&mut self, path: &str, offset: i64, data: &[u8]) -> Result<u32, ErrorKind> {
        Self::write(self, path, offset, data)
    }
}

impl<D: BlockDevice> MountableFilesystem for FatFilesystem<D> {
    type Device = D;
    const PARTITION_TYPE: u8 = mbr::PARTITION_TYPE_FAT32_LBA;

    fn mount_at(device: D, partition_offset: u64) -> Result<Self, ErrorKind> {
        Self::mount(device, partition_offset)
    }

    fn stat(&mut self, path: &str) -> Result<Stat, ErrorKind> {
        Self::stat(self, path)
    }

    fn read(&mut self, path: &str, offset: i64, length: u32) -> Result<Vec<u8>, ErrorKind> {
        Self::read(self, path, offset, length)
    }

    fn getdents(&mut self, path: &str) -> Result<Vec<Dirent>, ErrorKind> {
        Self::getdents(self, path)
    }

    fn write(&mut self, path: &str, offset: i64, data: &[u8]) -> Result<u32, ErrorKind> {
        Self::write(self, path, offset, data)
    }
}

/// Plug-in server shell around one driver instance.
pub struct PluginServer<F: MountableFilesystem> {
    pid: Pid,
    /// Storage device, consumed by the first successful probe.
    device: Option<F::Device>,
    mounted: Option<(F, String)>,
}

impl<F: MountableFilesystem> core::fmt::Debug for PluginServer<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginServer")
            .field("pid", &self.pid)
            .field("mounted", &self.mounted.is_some())
            .finish()
    }
}

/// The ext filesystem process.
pub type ExtServer<D> = PluginServer<ExtFilesystem<D>>;
/// The FAT filesystem process.
pub type FatServer<D> = PluginServer<FatFilesystem<D>>;

impl<F: MountableFilesystem> PluginServer<F> {
    pub fn new(pid: Pid, device: F::Device) -> Self {
        Self {
            pid,
            device: Some(device),
            mounted: None,
        }
    }

    /// Path relative to the mounted target; the VFS forwards full paths.
    fn relative<'a>(target: &str, path: &'a str) -> &'a str {
        if target == "/" {
            return path;
        }
        match path.strip_prefix(target) {
            Some(rest) if rest.is_empty() => "/",
            Some(rest) => rest,
            None => path,
        }
    }

    fn filesystem(&mut self) -> Result<(&mut F, &str), ErrorKind> {
        self.mounted
            .as_mut()
            .map(|(fs, target)| (fs, target.as_str()))
            .ok_or(ErrorKind::NoDevice)
    }

    /// Probe plus mount: partition number from the source path, MBR
    /// walk, type byte check, then the driver takes over.
    fn mount(&mut self, request: &MountRequest) -> Result<Stat, ErrorKind> {
        if self.mounted.is_some() {
            return Err(ErrorKind::Exists);
        }
        let mut device = self.device.take().ok_or(ErrorKind::NoDevice)?;
        let number = match mbr::partition_from_path(&request.source) {
            Ok(number) if (1..=mbr::PARTITION_COUNT as u32).contains(&number) => number,
            _ => {
                self.device = Some(device);
                return Err(ErrorKind::InvalidArgument);
            }
        };
        let partition = match mbr::read_partition_table(&mut device) {
            Ok(partitions) => partitions[number as usize - 1],
            Err(kind) => {
                self.device = Some(device);
                return Err(kind);
            }
        };
        if partition.partition_type != F::PARTITION_TYPE {
            log::warn!(
                "partition {number} has type {:#04x}, driver wants {:#04x}",
                partition.partition_type,
                F::PARTITION_TYPE
            );
            self.device = Some(device);
            return Err(ErrorKind::InvalidArgument);
        }
        let mut filesystem = F::mount_at(device, partition.byte_offset())?;
        let root = filesystem.stat("/")?;
        self.mounted = Some((filesystem, request.target.clone()));
        Ok(root)
    }
}

impl<F: MountableFilesystem> RpcHandler for PluginServer<F> {
    fn handle(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        match RpcType::from_val(envelope.rpc_type) {
            Some(RpcType::VfsMount) => {
                let request: MountRequest = match io.get_message(envelope.data_id) {
                    Ok(request) => request,
                    Err(kind) => {
                        return io.reply(&MountResponse {
                            result: kind.status(),
                            ..MountResponse::default()
                        })
                    }
                };
                match self.mount(&request) {
                    Ok(info) => io.reply(&MountResponse {
                        result: 0,
                        handler: self.pid,
                        info,
                    }),
                    Err(kind) => io.reply(&MountResponse {
                        result: kind.status(),
                        ..MountResponse::default()
                    }),
                }
            }
            Some(RpcType::VfsUmount) => {
                // reachable, deliberately unimplemented
                io.reply(&UmountResponse {
                    result: ErrorKind::NotImplemented.status(),
                });
            }
            Some(RpcType::VfsOpen) => {
                let request: OpenRequest = match io.get_message(envelope.data_id) {
                    Ok(request) => request,
                    Err(kind) => {
                        return io.reply(&OpenResponse {
                            handle: kind.status(),
                            ..OpenResponse::default()
                        })
                    }
                };
                let pid = self.pid;
                let result = self
                    .filesystem()
                    .and_then(|(fs, target)| fs.stat(Self::relative(target, &request.path)));
                match result {
                    Ok(st) => io.reply(&OpenResponse {
                        handle: 0,
                        handler: pid,
                        st,
                    }),
                    Err(kind) => io.reply(&OpenResponse {
                        handle: kind.status(),
                        ..OpenResponse::default()
                    }),
                }
            }
            Some(RpcType::VfsRead) => {
                let request: ReadRequest = match io.get_message(envelope.data_id) {
                    Ok(request) => request,
                    Err(kind) => {
                        return io.reply(&ReadResponse {
                            len: kind.status() as i64,
                            data: Vec::new(),
                        })
                    }
                };
                let result = self.filesystem().and_then(|(fs, target)| {
                    fs.read(
                        Self::relative(target, &request.file_path),
                        request.offset,
                        request.len,
                    )
                });
                match result {
                    Ok(data) => io.reply(&ReadResponse {
                        len: data.len() as i64,
                        data,
                    }),
                    Err(kind) => io.reply(&ReadResponse {
                        len: kind.status() as i64,
                        data: Vec::new(),
                    }),
                }
            }
            Some(RpcType::VfsWrite) => {
                let request: WriteRequest = match io.get_message(envelope.data_id) {
                    Ok(request) => request,
                    Err(kind) => {
                        return io.reply(&WriteResponse {
                            len: kind.status() as i64,
                        })
                    }
                };
                let result = self.filesystem().and_then(|(fs, target)| {
                    fs.write(
                        Self::relative(target, &request.file_path),
                        request.offset,
                        &request.data,
                    )
                });
                match result {
                    Ok(written) => io.reply(&WriteResponse {
                        len: written as i64,
                    }),
                    Err(kind) => io.reply(&WriteResponse {
                        len: kind.status() as i64,
                    }),
                }
            }
            Some(RpcType::VfsStat) => {
                let request: StatRequest = match io.get_message(envelope.data_id) {
                    Ok(request) => request,
                    Err(kind) => {
                        return io.reply(&StatResponse {
                            result: kind.status(),
                            ..StatResponse::default()
                        })
                    }
                };
                let pid = self.pid;
                let result = self
                    .filesystem()
                    .and_then(|(fs, target)| fs.stat(Self::relative(target, &request.file_path)));
                match result {
                    Ok(info) => io.reply(&StatResponse {
                        result: 0,
                        handler: pid,
                        info,
                    }),
                    Err(kind) => io.reply(&StatResponse {
                        result: kind.status(),
                        ..StatResponse::default()
                    }),
                }
            }
            Some(RpcType::VfsGetdents) => {
                let request: GetdentsRequest = match io.get_message(envelope.data_id) {
                    Ok(request) => request,
                    Err(kind) => {
                        return io.reply(&GetdentsResponse {
                            result: kind.status() as i64,
                            entries: Vec::new(),
                        })
                    }
                };
                let result = self.filesystem().and_then(|(fs, target)| {
                    fs.getdents(Self::relative(target, &request.file_path))
                });
                match result {
                    Ok(entries) => io.reply(&GetdentsResponse {
                        result: entries.len() as i64,
                        entries,
                    }),
                    Err(kind) => io.reply(&GetdentsResponse {
                        result: kind.status() as i64,
                        entries: Vec::new(),
                    }),
                }
            }
            Some(RpcType::VfsClose) => {
                let _request: Result<CloseRequest, _> = io.get_message(envelope.data_id);
                io.reply(&CloseResponse { status: 0 });
            }
            _ => {
                log::trace!("plug-in ignores rpc {}", envelope.rpc_type);
                let _ = io.get_data(envelope.data_id);
            }
        }
    }
}
