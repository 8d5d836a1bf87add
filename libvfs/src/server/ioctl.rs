//! Ioctl: routed through the command registration table filled by
//! `VFS_ADD`.

use super::VfsServer;
use crate::continuation::{
    Caller,
    Continuation,
};
use libember::error::ErrorKind;
use libember::proto::{
    IoctlRequest,
    IoctlResponse,
};
use libember::rpc::{
    Envelope,
    ServerIo,
};
use alloc::vec::Vec;

fn error_response(status: i32) -> IoctlResponse {
    IoctlResponse {
        result: status,
        data: Vec::new(),
    }
}

impl VfsServer {
    pub(super) fn handle_ioctl(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let request: IoctlRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(kind) => return io.reply(&error_response(kind.status())),
        };
        if self.handles.get(envelope.origin, request.handle).is_none() {
            return io.reply(&error_response(ErrorKind::BadHandle.status()));
        }
        let Some(handler) = self.devices.command_handler(request.command) else {
            return io.reply(&error_response(ErrorKind::NoHandler.status()));
        };
        match io.raise(envelope.rpc_type, handler, &request) {
            Ok(response_id) => self.continuations.push(
                envelope.rpc_type,
                response_id,
                Continuation::Ioctl {
                    caller: Caller {
                        origin: envelope.origin,
                        reply_to: io.reply_token(),
                    },
                    request,
                },
            ),
            Err(kind) => io.reply(&error_response(kind.status())),
        }
    }

    pub(super) fn resume_ioctl(
        &mut self,
        caller: Caller,
        _request: IoctlRequest,
        envelope: &Envelope,
        io: &mut dyn ServerIo,
    ) {
        let response: IoctlResponse = match io.get_message(envelope.data_id) {
            Ok(response) => response,
            Err(kind) => error_response(kind.status()),
        };
        io.respond(envelope.rpc_type, caller.origin, caller.reply_to, &response);
    }
}
