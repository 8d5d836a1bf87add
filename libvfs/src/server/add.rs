//! `VFS_ADD` / `VFS_REMOVE`: plug-ins and drivers announce their device
//! files, ioctl commands and mount capability.

use super::VfsServer;
use crate::continuation::Caller;
use libember::proto::{
    AddRequest,
    AddResponse,
    RemoveRequest,
    RemoveResponse,
};
use libember::rpc::{
    Envelope,
    ServerIo,
};

impl VfsServer {
    pub(super) fn handle_add(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let request: AddRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(kind) => {
                return io.reply(&AddResponse {
                    status: kind.status(),
                })
            }
        };
        for device in &request.devices {
            self.devices
                .register(&device.path, envelope.origin, device.info);
        }
        for &command in &request.commands {
            self.devices.push_command(command, envelope.origin);
        }
        if request.handles_mount {
            self.mount_handler = Some(envelope.origin);
            log::debug!("pid {} handles mount requests now", envelope.origin);
        }
        io.reply(&AddResponse { status: 0 });
    }

    /// Replies to forwarded adds are possible in the protocol but the
    /// current registration path is fully local.
    pub(super) fn resume_add(
        &mut self,
        caller: Caller,
        _request: AddRequest,
        envelope: &Envelope,
        io: &mut dyn ServerIo,
    ) {
        let response: AddResponse = match io.get_message(envelope.data_id) {
            Ok(response) => response,
            Err(kind) => AddResponse {
                status: kind.status(),
            },
        };
        io.respond(envelope.rpc_type, caller.origin, caller.reply_to, &response);
    }

    pub(super) fn handle_remove(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let request: RemoveRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(kind) => {
                return io.reply(&RemoveResponse {
                    status: kind.status(),
                })
            }
        };
        for path in &request.paths {
            self.devices.remove(path);
        }
        self.devices.remove_commands_of(envelope.origin);
        io.reply(&RemoveResponse { status: 0 });
    }
}
