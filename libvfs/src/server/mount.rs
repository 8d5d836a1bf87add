//! Mount and unmount.
//!
//! The ramdisk and dev pseudo filesystems are recorded locally; anything
//! else goes through the process registered as mount handler, whose reply
//! supplies the stat of the mount root and the pid owning the tree.

use super::VfsServer;
use crate::continuation::{
    Caller,
    Continuation,
};
use libember::error::ErrorKind;
use libember::proto::{
    MountRequest,
    MountResponse,
    UmountRequest,
    UmountResponse,
};
use libember::rpc::{
    Envelope,
    ServerIo,
};
use libember::stat::{
    Stat,
    S_IFDIR,
};

fn error_response(status: i32) -> MountResponse {
    MountResponse {
        result: status,
        ..MountResponse::default()
    }
}

fn dir_stat() -> Stat {
    Stat {
        st_mode: S_IFDIR | 0o755,
        ..Stat::default()
    }
}

impl VfsServer {
    pub(super) fn handle_mount(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let request: MountRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(kind) => return io.reply(&error_response(kind.status())),
        };

        // the self-handled pseudo filesystems are recorded locally
        if request.fs_type == "ramdisk" {
            if self.ramdisk_mount.is_some() {
                return io.reply(&error_response(ErrorKind::Exists.status()));
            }
            if self.ramdisk.is_none() {
                return io.reply(&error_response(ErrorKind::NoDevice.status()));
            }
            if let Err(kind) = self.mounts.add(&request.target, self.pid, dir_stat()) {
                return io.reply(&error_response(kind.status()));
            }
            self.ramdisk_mount = Some(request.target.clone());
            return io.reply(&MountResponse {
                result: 0,
                handler: self.pid,
                info: dir_stat(),
            });
        }
        if request.fs_type == "dev" {
            if self.dev_mount.is_some() {
                return io.reply(&error_response(ErrorKind::Exists.status()));
            }
            if let Err(kind) = self.mounts.add(&request.target, self.pid, dir_stat()) {
                return io.reply(&error_response(kind.status()));
            }
            self.dev_mount = Some(request.target.clone());
            return io.reply(&MountResponse {
                result: 0,
                handler: self.pid,
                info: dir_stat(),
            });
        }

        // everything else needs the registered mount handler
        let Some(handler) = self.mount_handler else {
            return io.reply(&error_response(ErrorKind::NoHandler.status()));
        };
        if self.mounts.extract_exact(&request.target).is_some() {
            return io.reply(&error_response(ErrorKind::Exists.status()));
        }

        let mut forward = request;
        forward.origin = envelope.origin;
        match io.raise(envelope.rpc_type, handler, &forward) {
            Ok(response_id) => self.continuations.push(
                envelope.rpc_type,
                response_id,
                Continuation::Mount {
                    caller: Caller {
                        origin: envelope.origin,
                        reply_to: io.reply_token(),
                    },
                    request: forward,
                },
            ),
            Err(kind) => io.reply(&error_response(kind.status())),
        }
    }

    pub(super) fn resume_mount(
        &mut self,
        caller: Caller,
        request: MountRequest,
        envelope: &Envelope,
        io: &mut dyn ServerIo,
    ) {
        let respond = |io: &mut dyn ServerIo, response: &MountResponse| {
            io.respond(envelope.rpc_type, caller.origin, caller.reply_to, response);
        };
        let response: MountResponse = match io.get_message(envelope.data_id) {
            Ok(response) => response,
            Err(kind) => return respond(io, &error_response(kind.status())),
        };
        if response.result != 0 {
            return respond(io, &response);
        }
        // record the mount under the answering handler's pid
        if let Err(kind) = self
            .mounts
            .add(&request.target, response.handler, response.info)
        {
            return respond(io, &error_response(kind.status()));
        }
        respond(io, &response);
    }

    /// The wire protocol knows unmount, the implementation keeps it
    /// explicitly unsupported; only the self-mount check is real.
    pub(super) fn handle_umount(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let request: UmountRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(kind) => {
                return io.reply(&UmountResponse {
                    result: kind.status(),
                })
            }
        };
        let _ = envelope;
        if request.target == crate::SELF_MOUNT {
            // nobody takes the self mount away
            return io.reply(&UmountResponse {
                result: ErrorKind::InvalidArgument.status(),
            });
        }
        if self.mounts.extract_exact(&request.target).is_none() {
            return io.reply(&UmountResponse {
                result: ErrorKind::NotFound.status(),
            });
        }
        io.reply(&UmountResponse {
            result: ErrorKind::NotImplemented.status(),
        });
    }
}
