//! End-to-end tests of the VFS server over the loopback router, with a
//! scripted filesystem plug-in and an authentication stub as peers.

use super::VfsServer;
use crate::ramdisk::{
    build_tar,
    Ramdisk,
};
use libember::error::errno;
use libember::flags::OpenFlags;
use libember::ipc_postcard as postcard;
use libember::ipc_serde as serde;
use libember::proto::*;
use libember::rpc::{
    Envelope,
    RpcHandler,
    ServerIo,
};
use libember::rt::Router;
use libember::service::RpcType;
use libember::stat::{
    Stat,
    S_IFCHR,
    S_IFDIR,
    S_IFREG,
};
use libember::Pid;
use std::boxed::Box;
use std::collections::BTreeMap;
use std::string::String;
use std::vec::Vec;

const VFS: Pid = 2;
const FS_A: Pid = 10;
const FS_B: Pid = 11;
const DRIVER: Pid = 20;
const AUTH: Pid = 40;
const CLIENT: Pid = 100;
const CHILD: Pid = 101;

/// Scripted filesystem plug-in serving an in-memory file map.
struct MockFs {
    pid: Pid,
    files: BTreeMap<String, Vec<u8>>,
    dirs: Vec<String>,
}

impl MockFs {
    fn new(pid: Pid, files: &[(&str, &[u8])], dirs: &[&str]) -> Self {
        Self {
            pid,
            files: files
                .iter()
                .map(|(path, data)| (String::from(*path), data.to_vec()))
                .collect(),
            dirs: dirs.iter().map(|dir| String::from(*dir)).collect(),
        }
    }

    fn reg_stat(size: usize) -> Stat {
        Stat {
            st_mode: S_IFREG | 0o644,
            st_size: size as i64,
            ..Stat::default()
        }
    }

    fn dir_stat() -> Stat {
        Stat {
            st_mode: S_IFDIR | 0o755,
            ..Stat::default()
        }
    }
}

impl RpcHandler for MockFs {
    fn handle(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        match RpcType::from_val(envelope.rpc_type) {
            Some(RpcType::VfsMount) => {
                let _request: MountRequest = io.get_message(envelope.data_id).unwrap();
                io.reply(&MountResponse {
                    result: 0,
                    handler: self.pid,
                    info: Self::dir_stat(),
                });
            }
            Some(RpcType::VfsOpen) => {
                let request: OpenRequest = io.get_message(envelope.data_id).unwrap();
                if let Some(data) = self.files.get(&request.path) {
                    io.reply(&OpenResponse {
                        handle: 0,
                        handler: self.pid,
                        st: Self::reg_stat(data.len()),
                    });
                } else if self.dirs.contains(&request.path) {
                    io.reply(&OpenResponse {
                        handle: 0,
                        handler: self.pid,
                        st: Self::dir_stat(),
                    });
                } else {
                    io.reply(&OpenResponse {
                        handle: -errno::ENOENT,
                        ..OpenResponse::default()
                    });
                }
            }
            Some(RpcType::VfsRead) => {
                let request: ReadRequest = io.get_message(envelope.data_id).unwrap();
                match self.files.get(&request.file_path) {
                    Some(data) => {
                        let start = (request.offset.max(0) as usize).min(data.len());
                        let end = (start + request.len as usize).min(data.len());
                        io.reply(&ReadResponse {
                            len: (end - start) as i64,
                            data: data[start..end].to_vec(),
                        });
                    }
                    None => io.reply(&ReadResponse {
                        len: -errno::ENOENT as i64,
                        data: Vec::new(),
                    }),
                }
            }
            Some(RpcType::VfsWrite) => {
                let request: WriteRequest = io.get_message(envelope.data_id).unwrap();
                io.reply(&WriteResponse {
                    len: request.data.len() as i64,
                });
            }
            Some(RpcType::VfsStat) => {
                let request: StatRequest = io.get_message(envelope.data_id).unwrap();
                match self.files.get(&request.file_path) {
                    Some(data) => io.reply(&StatResponse {
                        result: 0,
                        handler: self.pid,
                        info: Self::reg_stat(data.len()),
                    }),
                    None => io.reply(&StatResponse {
                        result: -errno::ENOENT,
                        ..StatResponse::default()
                    }),
                }
            }
            Some(RpcType::VfsGetdents) => {
                let request: GetdentsRequest = io.get_message(envelope.data_id).unwrap();
                let prefix = format!("{}/", request.file_path);
                let entries: Vec<Dirent> = self
                    .files
                    .keys()
                    .filter_map(|path| {
                        let rest = path.strip_prefix(&prefix)?;
                        (!rest.contains('/')).then(|| Dirent {
                            inode: 1,
                            kind: 8,
                            name: String::from(rest),
                        })
                    })
                    .collect();
                io.reply(&GetdentsResponse {
                    result: entries.len() as i64,
                    entries,
                });
            }
            Some(RpcType::VfsClose) => {
                let _request: CloseRequest = io.get_message(envelope.data_id).unwrap();
                io.reply(&CloseResponse { status: 0 });
            }
            _ => {
                let _ = io.get_data(envelope.data_id);
            }
        }
    }
}

/// Authentication stub: answers the device stat and confirms forks.
struct StubAuth {
    pid: Pid,
}

impl RpcHandler for StubAuth {
    fn handle(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        match RpcType::from_val(envelope.rpc_type) {
            Some(RpcType::VfsStat) => {
                let _request: StatRequest = io.get_message(envelope.data_id).unwrap();
                io.reply(&StatResponse {
                    result: 0,
                    handler: self.pid,
                    info: Stat {
                        st_mode: S_IFCHR | 0o600,
                        ..Stat::default()
                    },
                });
            }
            Some(RpcType::VfsFork) => {
                let _request: ForkRequest = io.get_message(envelope.data_id).unwrap();
                io.reply(&ForkResponse { status: 0 });
            }
            _ => {
                let _ = io.get_data(envelope.data_id);
            }
        }
    }
}

/// Echoing ioctl driver.
struct MockDriver;

impl RpcHandler for MockDriver {
    fn handle(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        if RpcType::from_val(envelope.rpc_type) == Some(RpcType::VfsIoctl) {
            let request: IoctlRequest = io.get_message(envelope.data_id).unwrap();
            let mut data = request.data;
            data.reverse();
            io.reply(&IoctlResponse { result: 0, data });
        } else {
            let _ = io.get_data(envelope.data_id);
        }
    }
}

fn call<Req, Resp>(router: &mut Router, origin: Pid, rpc: RpcType, request: &Req) -> Resp
where
    Req: serde::Serialize,
    Resp: serde::de::DeserializeOwned,
{
    let payload = postcard::to_allocvec(request).unwrap();
    router.request(origin, VFS, rpc.val(), &payload);
    router.run_until_idle();
    let replies = router.take_replies(origin);
    assert_eq!(replies.len(), 1, "expected exactly one reply");
    postcard::from_bytes(&replies[0].1).unwrap()
}

/// Registers a plug-in as mount handler and mounts it at `target`.
fn register_and_mount(router: &mut Router, fs_pid: Pid, target: &str) {
    let add = AddRequest {
        devices: Vec::new(),
        commands: Vec::new(),
        handles_mount: true,
    };
    let payload = postcard::to_allocvec(&add).unwrap();
    router.request(fs_pid, VFS, RpcType::VfsAdd.val(), &payload);
    router.run_until_idle();
    router.take_replies(fs_pid);

    let response: MountResponse = call(
        router,
        CLIENT,
        RpcType::VfsMount,
        &MountRequest {
            source: String::from("/dev/sd1"),
            target: String::from(target),
            fs_type: String::from("ext2"),
            flags: 0,
            origin: 0,
        },
    );
    assert_eq!(response.result, 0, "mount must succeed");
}

/// 100 bytes with a recognizable marker at offset 42.
fn hundred_byte_file() -> Vec<u8> {
    let mut data = vec![b'x'; 42];
    data.extend_from_slice(b"GHIJ");
    data.extend(core::iter::repeat(b'y').take(54));
    data
}

fn fixture() -> Router {
    let mut router = Router::new();
    router.register(
        VFS,
        Box::new(VfsServer::new(
            VFS,
            Some(Ramdisk::new(build_tar(&[("boot/init", b"init binary")]))),
        )),
    );
    let mut fs_a = MockFs::new(
        FS_A,
        &[("/etc/hosts", b"127.0.0.1 localhost and more bytes")],
        &["/etc"],
    );
    fs_a.files
        .insert(String::from("/tmp/a"), hundred_byte_file());
    router.register(FS_A, Box::new(fs_a));
    router.register(AUTH, Box::new(StubAuth { pid: AUTH }));
    router.register(DRIVER, Box::new(MockDriver));
    router.register_process(CLIENT, None);
    router.register_process(CHILD, Some(CLIENT));
    router
}

fn open(router: &mut Router, origin: Pid, path: &str, flags: OpenFlags) -> OpenResponse {
    call(
        router,
        origin,
        RpcType::VfsOpen,
        &OpenRequest {
            path: String::from(path),
            flags: flags.bits(),
            mode: 0,
            handle: 0,
            origin: 0,
        },
    )
}

fn read(router: &mut Router, origin: Pid, handle: i32, len: u32) -> ReadResponse {
    call(
        router,
        origin,
        RpcType::VfsRead,
        &ReadRequest {
            handle,
            len,
            file_path: String::new(),
            offset: 0,
            shm_id: 0,
        },
    )
}

/// Scenario: mount, open, read the first bytes of a real file.
#[test]
fn test_mount_open_read_close() {
    let mut router = fixture();
    register_and_mount(&mut router, FS_A, "/");

    let opened = open(&mut router, CLIENT, "/etc/hosts", OpenFlags::O_RDONLY);
    assert!(opened.handle >= 3, "user handles start at 3");
    assert!(opened.st.is_reg());
    assert_eq!(opened.handler, FS_A);

    let response = read(&mut router, CLIENT, opened.handle, 16);
    assert_eq!(response.len, 16);
    assert_eq!(response.data, b"127.0.0.1 localh");
    // the offset advanced, the next read continues
    let response = read(&mut router, CLIENT, opened.handle, 8);
    assert_eq!(response.data, b"ost and ");

    let closed: CloseResponse = call(
        &mut router,
        CLIENT,
        RpcType::VfsClose,
        &CloseRequest {
            handle: opened.handle,
        },
    );
    assert_eq!(closed.status, 0);
    // the handle is gone now
    let response = read(&mut router, CLIENT, opened.handle, 4);
    assert_eq!(response.len, -errno::EBADF as i64);
}

#[test]
fn test_open_failures() {
    let mut router = fixture();
    register_and_mount(&mut router, FS_A, "/");

    let missing = open(&mut router, CLIENT, "/etc/passwd", OpenFlags::O_RDONLY);
    assert_eq!(missing.handle, -errno::ENOENT);

    let dir_write = open(&mut router, CLIENT, "/etc", OpenFlags::O_WRONLY);
    assert_eq!(dir_write.handle, -errno::EISDIR);

    let not_dir = open(&mut router, CLIENT, "/etc/hosts", OpenFlags::O_DIRECTORY);
    assert_eq!(not_dir.handle, -errno::ENOTDIR);

    let exclusive = open(
        &mut router,
        CLIENT,
        "/etc/hosts",
        OpenFlags::O_CREAT | OpenFlags::O_EXCL,
    );
    assert_eq!(exclusive.handle, -errno::EEXIST);
}

/// Property: two opens yield distinct ids; a closed id is reused.
#[test]
fn test_handle_uniqueness_and_reuse() {
    let mut router = fixture();
    register_and_mount(&mut router, FS_A, "/");

    let first = open(&mut router, CLIENT, "/etc/hosts", OpenFlags::O_RDONLY);
    let second = open(&mut router, CLIENT, "/tmp/a", OpenFlags::O_RDONLY);
    assert_ne!(first.handle, second.handle);
    let _: CloseResponse = call(
        &mut router,
        CLIENT,
        RpcType::VfsClose,
        &CloseRequest {
            handle: first.handle,
        },
    );
    let third = open(&mut router, CLIENT, "/etc/hosts", OpenFlags::O_RDONLY);
    assert_eq!(third.handle, first.handle);
}

/// Scenario: out-of-bounds seeks on a 100 byte file.
#[test]
fn test_seek_bounds() {
    let mut router = fixture();
    register_and_mount(&mut router, FS_A, "/");
    let opened = open(&mut router, CLIENT, "/tmp/a", OpenFlags::O_RDONLY);
    assert_eq!(opened.st.st_size, 100);

    let seek = |router: &mut Router, offset: i64, whence: u32| -> SeekResponse {
        call(
            router,
            CLIENT,
            RpcType::VfsSeek,
            &SeekRequest {
                handle: opened.handle,
                offset,
                whence,
            },
        )
    };
    assert_eq!(seek(&mut router, 101, 0).position, -errno::EINVAL as i64);
    assert_eq!(seek(&mut router, -1, 0).position, -errno::EINVAL as i64);
    assert_eq!(seek(&mut router, 0, 2).position, 100);
    assert_eq!(seek(&mut router, 42, 0).position, 42);
    // reads continue at the seeked position
    let response = read(&mut router, CLIENT, opened.handle, 4);
    assert_eq!(response.data, b"GHIJ");
}

#[test]
fn test_dev_null_short_circuit() {
    let mut router = fixture();
    let opened = open(&mut router, CLIENT, "/dev/null", OpenFlags::O_RDWR);
    assert!(opened.handle >= 3);
    assert_eq!(opened.handler, VFS);

    let response = read(&mut router, CLIENT, opened.handle, 64);
    assert_eq!(response.len, 0);
    let written: WriteResponse = call(
        &mut router,
        CLIENT,
        RpcType::VfsWrite,
        &WriteRequest {
            handle: opened.handle,
            data: b"discarded".to_vec(),
            file_path: String::new(),
            offset: 0,
        },
    );
    assert_eq!(written.len, 9);
}

#[test]
fn test_stdio_handles_reserved() {
    let mut router = fixture();
    let stdin = open(&mut router, CLIENT, "/dev/stdin", OpenFlags::O_RDONLY);
    let stdout = open(&mut router, CLIENT, "/dev/stdout", OpenFlags::O_WRONLY);
    let stderr = open(&mut router, CLIENT, "/dev/stderr", OpenFlags::O_WRONLY);
    assert_eq!(stdin.handle, 0);
    assert_eq!(stdout.handle, 1);
    assert_eq!(stderr.handle, 2);
}

/// Property: the longest mount prefix wins.
#[test]
fn test_mount_longest_prefix_routing() {
    let mut router = fixture();
    router.register(
        FS_B,
        Box::new(MockFs::new(FS_B, &[("/a/b/c", b"deep file")], &[])),
    );
    register_and_mount(&mut router, FS_A, "/a");
    // re-register FS_B as the mount handler, then mount the deeper prefix
    register_and_mount(&mut router, FS_B, "/a/b");

    let opened = open(&mut router, CLIENT, "/a/b/c", OpenFlags::O_RDONLY);
    assert_eq!(opened.handler, FS_B, "deeper mount wins");
    let response = read(&mut router, CLIENT, opened.handle, 32);
    assert_eq!(response.data, b"deep file");
}

#[test]
fn test_duplicate_mount_rejected() {
    let mut router = fixture();
    register_and_mount(&mut router, FS_A, "/data");
    let response: MountResponse = call(
        &mut router,
        CLIENT,
        RpcType::VfsMount,
        &MountRequest {
            source: String::from("/dev/sd1"),
            target: String::from("/data"),
            fs_type: String::from("ext2"),
            flags: 0,
            origin: 0,
        },
    );
    assert_eq!(response.result, -errno::EEXIST);
}

#[test]
fn test_umount_protocol() {
    let mut router = fixture();
    register_and_mount(&mut router, FS_A, "/data");

    let umount = |router: &mut Router, target: &str| -> UmountResponse {
        call(
            router,
            CLIENT,
            RpcType::VfsUmount,
            &UmountRequest {
                target: String::from(target),
            },
        )
    };
    // the self mount is untouchable
    assert_eq!(umount(&mut router, "/vfs").result, -errno::EINVAL);
    // everything else is wired but not implemented
    assert_eq!(umount(&mut router, "/data").result, -errno::ENOSYS);
    assert_eq!(umount(&mut router, "/absent").result, -errno::ENOENT);
}

#[test]
fn test_ramdisk_pseudo_filesystem() {
    let mut router = fixture();
    let mounted: MountResponse = call(
        &mut router,
        CLIENT,
        RpcType::VfsMount,
        &MountRequest {
            source: String::new(),
            target: String::from("/ramdisk"),
            fs_type: String::from("ramdisk"),
            flags: 0,
            origin: 0,
        },
    );
    assert_eq!(mounted.result, 0);
    assert_eq!(mounted.handler, VFS);

    let opened = open(&mut router, CLIENT, "/ramdisk/boot/init", OpenFlags::O_RDONLY);
    assert!(opened.handle >= 3);
    assert_eq!(opened.st.st_size, 11);
    let response = read(&mut router, CLIENT, opened.handle, 4);
    assert_eq!(response.data, b"init");
    let response = read(&mut router, CLIENT, opened.handle, 100);
    assert_eq!(response.data, b" binary");

    // a second ramdisk mount is rejected
    let again: MountResponse = call(
        &mut router,
        CLIENT,
        RpcType::VfsMount,
        &MountRequest {
            source: String::new(),
            target: String::from("/other"),
            fs_type: String::from("ramdisk"),
            flags: 0,
            origin: 0,
        },
    );
    assert_eq!(again.result, -errno::EEXIST);
}

#[test]
fn test_getdents_forwarded() {
    let mut router = fixture();
    register_and_mount(&mut router, FS_A, "/");
    let opened = open(&mut router, CLIENT, "/etc", OpenFlags::O_RDONLY);
    let response: GetdentsResponse = call(
        &mut router,
        CLIENT,
        RpcType::VfsGetdents,
        &GetdentsRequest {
            handle: opened.handle,
            count: 16,
            file_path: String::new(),
            offset: 0,
        },
    );
    assert_eq!(response.result, 1);
    assert_eq!(response.entries[0].name, "hosts");
}

#[test]
fn test_ioctl_routing() {
    let mut router = fixture();
    // the driver announces its device and command
    let add = AddRequest {
        devices: vec![AddDevice {
            path: String::from("/dev/gpio"),
            info: Stat {
                st_mode: S_IFCHR | 0o666,
                ..Stat::default()
            },
        }],
        commands: vec![0x1001],
        handles_mount: false,
    };
    let payload = postcard::to_allocvec(&add).unwrap();
    router.request(DRIVER, VFS, RpcType::VfsAdd.val(), &payload);
    router.run_until_idle();
    router.take_replies(DRIVER);

    let opened = open(&mut router, CLIENT, "/dev/gpio", OpenFlags::O_RDWR);
    assert_eq!(opened.handler, DRIVER);

    let response: IoctlResponse = call(
        &mut router,
        CLIENT,
        RpcType::VfsIoctl,
        &IoctlRequest {
            handle: opened.handle,
            command: 0x1001,
            data: vec![1, 2, 3],
        },
    );
    assert_eq!(response.result, 0);
    assert_eq!(response.data, [3, 2, 1]);

    // unregistered commands have no handler
    let response: IoctlResponse = call(
        &mut router,
        CLIENT,
        RpcType::VfsIoctl,
        &IoctlRequest {
            handle: opened.handle,
            command: 0x2002,
            data: Vec::new(),
        },
    );
    assert_eq!(response.result, -errno::ESRCH);
}

/// Scenario: parent opens and seeks, forks; the child reads from the
/// duplicated handle at the same offset.
#[test]
fn test_fork_duplicates_handles() {
    let mut router = fixture();
    register_and_mount(&mut router, FS_A, "/");
    // the authentication server announces its device
    let add = AddRequest {
        devices: vec![AddDevice {
            path: String::from("/dev/authentication"),
            info: Stat {
                st_mode: S_IFCHR | 0o600,
                ..Stat::default()
            },
        }],
        commands: Vec::new(),
        handles_mount: false,
    };
    let payload = postcard::to_allocvec(&add).unwrap();
    router.request(AUTH, VFS, RpcType::VfsAdd.val(), &payload);
    router.run_until_idle();
    router.take_replies(AUTH);

    let opened = open(&mut router, CLIENT, "/tmp/a", OpenFlags::O_RDONLY);
    let seeked: SeekResponse = call(
        &mut router,
        CLIENT,
        RpcType::VfsSeek,
        &SeekRequest {
            handle: opened.handle,
            offset: 42,
            whence: 0,
        },
    );
    assert_eq!(seeked.position, 42);

    // the child asks for the fork, naming its parent
    let forked: ForkResponse = call(
        &mut router,
        CHILD,
        RpcType::VfsFork,
        &ForkRequest {
            parent: CLIENT,
            process: 0,
        },
    );
    assert_eq!(forked.status, 0);

    // same handle id, same position, in the child
    let response = read(&mut router, CHILD, opened.handle, 4);
    assert_eq!(response.data, b"GHIJ");
    // and the copies are independent
    let response = read(&mut router, CLIENT, opened.handle, 4);
    assert_eq!(response.data, b"GHIJ");

    // a wrong parent claim is rejected
    let bogus: ForkResponse = call(
        &mut router,
        CHILD,
        RpcType::VfsFork,
        &ForkRequest {
            parent: 999,
            process: 0,
        },
    );
    assert_eq!(bogus.status, -errno::EINVAL);
}

#[test]
fn test_exit_destroys_all_handles() {
    let mut router = fixture();
    register_and_mount(&mut router, FS_A, "/");
    let first = open(&mut router, CLIENT, "/etc/hosts", OpenFlags::O_RDONLY);
    let _second = open(&mut router, CLIENT, "/tmp/a", OpenFlags::O_RDONLY);

    let exited: ExitResponse = call(
        &mut router,
        CLIENT,
        RpcType::VfsExit,
        &ExitRequest { process: 0 },
    );
    assert_eq!(exited.status, 0);
    // every handle of the process is gone
    let response = read(&mut router, CLIENT, first.handle, 4);
    assert_eq!(response.len, -errno::EBADF as i64);
}

/// A continuation whose origin died is dropped silently.
#[test]
fn test_dead_origin_reply_dropped() {
    let mut router = fixture();
    register_and_mount(&mut router, FS_A, "/");
    let opened = open(&mut router, CLIENT, "/etc/hosts", OpenFlags::O_RDONLY);

    let payload = postcard::to_allocvec(&ReadRequest {
        handle: opened.handle,
        len: 4,
        file_path: String::new(),
        offset: 0,
        shm_id: 0,
    })
    .unwrap();
    router.request(CLIENT, VFS, RpcType::VfsRead.val(), &payload);
    router.kill(CLIENT);
    router.run_until_idle();
    assert!(router.take_replies(CLIENT).is_empty());
}
