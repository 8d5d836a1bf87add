//! Read: resolves the handle, short-circuits `/dev/null`, otherwise
//! forwards with the cached path and position and advances the position
//! by the reply's byte count.

use super::VfsServer;
use crate::continuation::{
    Caller,
    Continuation,
};
use libember::proto::{
    ReadRequest,
    ReadResponse,
};
use libember::rpc::{
    Envelope,
    ServerIo,
};
use alloc::vec::Vec;

fn error_response(status: i32) -> ReadResponse {
    ReadResponse {
        len: status as i64,
        data: Vec::new(),
    }
}

impl VfsServer {
    pub(super) fn handle_read(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let request: ReadRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(kind) => return io.reply(&error_response(kind.status())),
        };
        let Some(record) = self.handles.get(envelope.origin, request.handle) else {
            return io.reply(&error_response(libember::error::ErrorKind::BadHandle.status()));
        };
        // the null device reads empty
        if record.path.as_str() == "/dev/null" {
            return io.reply(&ReadResponse {
                len: 0,
                data: Vec::new(),
            });
        }
        let path = record.path;
        let position = record.pos;
        let handler = record.handler;

        if handler == self.pid {
            // ramdisk content is served inline
            match self.self_read(path.as_str(), position, request.len) {
                Ok(data) => {
                    let record = self
                        .handles
                        .get_mut(envelope.origin, request.handle)
                        .expect("record just looked up");
                    record.pos += data.len() as i64;
                    io.reply(&ReadResponse {
                        len: data.len() as i64,
                        data,
                    });
                }
                Err(kind) => io.reply(&error_response(kind.status())),
            }
            return;
        }

        let mut forward = request;
        forward.file_path = alloc::string::String::from(path.as_str());
        forward.offset = position;
        match io.raise(envelope.rpc_type, handler, &forward) {
            Ok(response_id) => self.continuations.push(
                envelope.rpc_type,
                response_id,
                Continuation::Read {
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

    pub(super) fn resume_read(
        &mut self,
        caller: Caller,
        request: ReadRequest,
        envelope: &Envelope,
        io: &mut dyn ServerIo,
    ) {
        let response: ReadResponse = match io.get_message(envelope.data_id) {
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
        // advance the cached position by what was actually read
        if response.len > 0 {
            if let Some(record) = self.handles.get_mut(caller.origin, request.handle) {
                record.pos += response.len;
            }
        }
        io.respond(envelope.rpc_type, caller.origin, caller.reply_to, &response);
    }
}
