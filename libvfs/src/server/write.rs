//! Write: like read, with the null device echoing the request size.

use super::VfsServer;
use crate::continuation::{
    Caller,
    Continuation,
};
use libember::error::ErrorKind;
use libember::proto::{
    WriteRequest,
    WriteResponse,
};
use libember::rpc::{
    Envelope,
    ServerIo,
};

fn error_response(status: i32) -> WriteResponse {
    WriteResponse { len: status as i64 }
}

impl VfsServer {
    pub(super) fn handle_write(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let request: WriteRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(kind) => return io.reply(&error_response(kind.status())),
        };
        let Some(record) = self.handles.get(envelope.origin, request.handle) else {
            return io.reply(&error_response(ErrorKind::BadHandle.status()));
        };
        // the null device swallows everything
        if record.path.as_str() == "/dev/null" {
            return io.reply(&WriteResponse {
                len: request.data.len() as i64,
            });
        }
        let path = record.path;
        let position = record.pos;
        let handler = record.handler;

        if handler == self.pid {
            // the pseudo filesystems are read-only
            return io.reply(&error_response(ErrorKind::NotImplemented.status()));
        }

        let mut forward = request;
        forward.file_path = alloc::string::String::from(path.as_str());
        forward.offset = position;
        match io.raise(envelope.rpc_type, handler, &forward) {
            Ok(response_id) => self.continuations.push(
                envelope.rpc_type,
                response_id,
                Continuation::Write {
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

    pub(super) fn resume_write(
        &mut self,
        caller: Caller,
        request: WriteRequest,
        envelope: &Envelope,
        io: &mut dyn ServerIo,
    ) {
        let response: WriteResponse = match io.get_message(envelope.data_id) {
            Ok(response) => response,
            Err(kind) => {
                return io.respond(
                    envelope.rpc_type,
                    caller.origin,
                    caller.reply_to,
                    &error_response(kind.status()),
                )
            }
        };
        if response.len > 0 {
            if let Some(record) = self.handles.get_mut(caller.origin, request.handle) {
                record.pos += response.len;
            }
        }
        io.respond(envelope.rpc_type, caller.origin, caller.reply_to, &response);
    }
}
