//! Hosted-mode entry point.
//!
//! Wires the VFS server and the filesystem plug-ins over the loopback
//! router, mounts the first partition of the given disk image and lists
//! the root directory. On target hardware the same servers run as
//! separate processes on the kernel rpc transport; this binary exists to
//! exercise the whole stack on a development machine:
//!
//! ```text
//! vfs-bin <disk.img> [ext2|fat32]
//! ```

#![deny(
    clippy::all,
    clippy::cargo,
    // clippy::nursery,
    // clippy::pedantic
)]
// now allow a few rules which are denied by the above statement
// --> they are ridiculous and not necessary
#![allow(
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::fallible_impl_from
)]

mod logger;

use libember::flags::OpenFlags;
use libember::ipc_postcard as postcard;
use libember::proto::{
    AddRequest,
    GetdentsRequest,
    GetdentsResponse,
    MountRequest,
    MountResponse,
    OpenRequest,
    OpenResponse,
};
use libember::rt::Router;
use libember::service::RpcType;
use libember::Pid;
use libfs::device::MemoryDisk;
use libfs::server::{
    ExtServer,
    FatServer,
};
use libvfs::VfsServer;
use std::string::String;

const VFS_PID: Pid = 2;
const EXT_PID: Pid = 10;
const FAT_PID: Pid = 11;
const SHELL_PID: Pid = 100;

fn call<Req, Resp>(router: &mut Router, rpc: RpcType, request: &Req) -> Resp
where
    Req: libember::ipc_serde::Serialize,
    Resp: libember::ipc_serde::de::DeserializeOwned,
{
    let payload = postcard::to_allocvec(request).expect("request serializes");
    router.request(SHELL_PID, VFS_PID, rpc.val(), &payload);
    router.run_until_idle();
    let replies = router.take_replies(SHELL_PID);
    postcard::from_bytes(&replies[0].1).expect("reply decodes")
}

fn main() {
    logger::init();

    let mut arguments = std::env::args().skip(1);
    let Some(image_path) = arguments.next() else {
        eprintln!("usage: vfs-bin <disk.img> [ext2|fat32]");
        std::process::exit(2);
    };
    let fs_type = arguments.next().unwrap_or_else(|| String::from("ext2"));
    let image = match std::fs::read(&image_path) {
        Ok(image) => image,
        Err(error) => {
            log::error!("cannot read {image_path}: {error}");
            std::process::exit(1);
        }
    };

    // bring the servers up
    let mut router = Router::new();
    router.register(VFS_PID, Box::new(VfsServer::new(VFS_PID, None)));
    let plugin_pid = match fs_type.as_str() {
        "fat32" | "vfat" => {
            router.register(
                FAT_PID,
                Box::new(FatServer::new(FAT_PID, MemoryDisk::new(image))),
            );
            FAT_PID
        }
        _ => {
            router.register(
                EXT_PID,
                Box::new(ExtServer::new(EXT_PID, MemoryDisk::new(image))),
            );
            EXT_PID
        }
    };
    router.register_process(SHELL_PID, None);
    log::info!("vfs and {fs_type} plug-in started");

    // the plug-in announces itself as mount handler
    let add = AddRequest {
        devices: Vec::new(),
        commands: Vec::new(),
        handles_mount: true,
    };
    let payload = postcard::to_allocvec(&add).expect("request serializes");
    router.request(plugin_pid, VFS_PID, RpcType::VfsAdd.val(), &payload);
    router.run_until_idle();
    router.take_replies(plugin_pid);

    // mount the first partition on /
    let mounted: MountResponse = call(
        &mut router,
        RpcType::VfsMount,
        &MountRequest {
            source: String::from("/dev/sd1"),
            target: String::from("/"),
            fs_type,
            flags: 0,
            origin: 0,
        },
    );
    if mounted.result != 0 {
        log::error!("mount failed with status {}", mounted.result);
        std::process::exit(1);
    }
    log::info!("mounted partition 1 on / (handler pid {})", mounted.handler);

    // list the root directory
    let opened: OpenResponse = call(
        &mut router,
        RpcType::VfsOpen,
        &OpenRequest {
            path: String::from("/"),
            flags: OpenFlags::O_RDONLY.bits() | OpenFlags::O_DIRECTORY.bits(),
            mode: 0,
            handle: 0,
            origin: 0,
        },
    );
    if opened.handle < 0 {
        log::error!("opening / failed with status {}", opened.handle);
        std::process::exit(1);
    }
    let listing: GetdentsResponse = call(
        &mut router,
        RpcType::VfsGetdents,
        &GetdentsRequest {
            handle: opened.handle,
            count: 128,
            file_path: String::new(),
            offset: 0,
        },
    );
    if listing.result < 0 {
        log::error!("getdents failed with status {}", listing.result);
        std::process::exit(1);
    }
    log::info!("{} entries in /", listing.result);
    for entry in listing.entries {
        let kind = if entry.kind == 4 { "dir " } else { "file" };
        println!("{kind} {}", entry.name);
    }
}
