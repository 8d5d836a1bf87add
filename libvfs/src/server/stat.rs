//! Stat: by handle or by path, forwarded to the owner of the object.

use super::VfsServer;
use crate::continuation::{
    Caller,
    Continuation,
};
use libember::error::ErrorKind;
use libember::proto::{
    StatRequest,
    StatResponse,
};
use libember::rpc::{
    Envelope,
    ServerIo,
};
use alloc::string::String;

fn error_response(status: i32) -> StatResponse {
    StatResponse {
        result: status,
        ..StatResponse::default()
    }
}

impl VfsServer {
    pub(super) fn handle_stat(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let request: StatRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(kind) => return io.reply(&error_response(kind.status())),
        };
        // path based stat resolves through the mount table, handle based
        // through the caller's handle record
        let (path, handler) = if request.file_path.is_empty() {
            let Some(record) = self.handles.get(envelope.origin, request.handle) else {
                return io.reply(&error_response(ErrorKind::BadHandle.status()));
            };
            (String::from(record.path.as_str()), record.handler)
        } else {
            let owner = self.owner_of(&request.file_path);
            (request.file_path.clone(), owner)
        };

        if handler == self.pid {
            match self.self_stat(&path) {
                Ok((node_handler, info)) => io.reply(&StatResponse {
                    result: 0,
                    handler: node_handler,
                    info,
                }),
                Err(kind) => io.reply(&error_response(kind.status())),
            }
            return;
        }

        let forward = StatRequest {
            handle: request.handle,
            file_path: path,
        };
        match io.raise(envelope.rpc_type, handler, &forward) {
            Ok(response_id) => self.continuations.push(
                envelope.rpc_type,
                response_id,
                Continuation::Stat {
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

    pub(super) fn resume_stat(
        &mut self,
        caller: Caller,
        _request: StatRequest,
        envelope: &Envelope,
        io: &mut dyn ServerIo,
    ) {
        let response: StatResponse = match io.get_message(envelope.data_id) {
            Ok(response) => response,
            Err(kind) => error_response(kind.status()),
        };
        io.respond(envelope.rpc_type, caller.origin, caller.reply_to, &response);
    }
}
