//! Directory enumeration, forwarded like read.

use super::VfsServer;
use crate::continuation::{
    Caller,
    Continuation,
};
use libember::error::ErrorKind;
use libember::proto::{
    GetdentsRequest,
    GetdentsResponse,
};
use libember::rpc::{
    Envelope,
    ServerIo,
};
use alloc::vec::Vec;

fn error_response(status: i32) -> GetdentsResponse {
    GetdentsResponse {
        result: status as i64,
        entries: Vec::new(),
    }
}

impl VfsServer {
    pub(super) fn handle_getdents(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let request: GetdentsRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(kind) => return io.reply(&error_response(kind.status())),
        };
        let Some(record) = self.handles.get(envelope.origin, request.handle) else {
            return io.reply(&error_response(ErrorKind::BadHandle.status()));
        };
        if !record.info.is_dir() {
            return io.reply(&error_response(ErrorKind::NotDirectory.status()));
        }
        let path = record.path;
        let position = record.pos;
        let handler = record.handler;

        if handler == self.pid {
            match self.self_getdents(path.as_str()) {
                Ok(entries) => io.reply(&GetdentsResponse {
                    result: entries.len() as i64,
                    entries,
                }),
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
                Continuation::Getdents {
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

    pub(super) fn resume_getdents(
        &mut self,
        caller: Caller,
        request: GetdentsRequest,
        envelope: &Envelope,
        io: &mut dyn ServerIo,
    ) {
        let response: GetdentsResponse = match io.get_message(envelope.data_id) {
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
        if response.result > 0 {
            if let Some(record) = self.handles.get_mut(caller.origin, request.handle) {
                record.pos += response.result;
            }
        }
        io.respond(envelope.rpc_type, caller.origin, caller.reply_to, &response);
    }
}
