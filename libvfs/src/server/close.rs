//! Close and process exit.

use super::VfsServer;
use crate::continuation::{
    Caller,
    Continuation,
};
use libember::error::ErrorKind;
use libember::proto::{
    CloseRequest,
    CloseResponse,
    ExitRequest,
    ExitResponse,
};
use libember::rpc::{
    Envelope,
    ServerIo,
};

impl VfsServer {
    pub(super) fn handle_close(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let request: CloseRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(kind) => {
                return io.reply(&CloseResponse {
                    status: kind.status(),
                })
            }
        };
        let Some(record) = self.handles.get(envelope.origin, request.handle) else {
            return io.reply(&CloseResponse {
                status: ErrorKind::BadHandle.status(),
            });
        };
        let handler = record.handler;

        // self-served handles close locally
        if handler == self.pid {
            let _ = self.handles.destroy(envelope.origin, request.handle);
            return io.reply(&CloseResponse { status: 0 });
        }

        match io.raise(envelope.rpc_type, handler, &request) {
            Ok(response_id) => self.continuations.push(
                envelope.rpc_type,
                response_id,
                Continuation::Close {
                    caller: Caller {
                        origin: envelope.origin,
                        reply_to: io.reply_token(),
                    },
                    request,
                },
            ),
            Err(kind) => io.reply(&CloseResponse {
                status: kind.status(),
            }),
        }
    }

    pub(super) fn resume_close(
        &mut self,
        caller: Caller,
        request: CloseRequest,
        envelope: &Envelope,
        io: &mut dyn ServerIo,
    ) {
        let response: CloseResponse = match io.get_message(envelope.data_id) {
            Ok(response) => response,
            Err(kind) => CloseResponse {
                status: kind.status(),
            },
        };
        // the local record goes away only on success
        if response.status >= 0 {
            let _ = self.handles.destroy(caller.origin, request.handle);
        }
        io.respond(envelope.rpc_type, caller.origin, caller.reply_to, &response);
    }

    /// A process died: every handle it owned is destroyed.
    pub(super) fn handle_exit(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let request: ExitRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(_) => ExitRequest {
                process: envelope.origin,
            },
        };
        let process = if request.process != 0 {
            request.process
        } else {
            envelope.origin
        };
        log::debug!("process {process} exited, dropping its handles");
        self.handles.destroy_all(process);
        io.reply(&ExitResponse { status: 0 });
    }
}
