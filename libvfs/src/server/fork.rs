//! Fork: validate the claimed parent, consult the authentication device,
//! propagate the identity, then duplicate the parent's handles.

use super::VfsServer;
use crate::continuation::{
    Caller,
    Continuation,
};
use crate::AUTHENTICATION_DEVICE;
use libember::error::ErrorKind;
use libember::proto::{
    ForkRequest,
    ForkResponse,
    StatRequest,
    StatResponse,
};
use libember::rpc::{
    Envelope,
    ServerIo,
};
use libember::service::RpcType;
use alloc::string::String;

fn error_response(status: i32) -> ForkResponse {
    ForkResponse { status }
}

impl VfsServer {
    pub(super) fn handle_fork(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let mut request: ForkRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(kind) => return io.reply(&error_response(kind.status())),
        };
        // the claimed parent must match the kernel's record of the origin
        if io.parent_of(envelope.origin) != Some(request.parent) {
            return io.reply(&error_response(ErrorKind::InvalidArgument.status()));
        }
        // the authentication device must be present; its stat is routed
        // to the process that announced the node
        let stat_target = match self.devices.lookup(AUTHENTICATION_DEVICE) {
            Some(node) => node.handler,
            None => match self.mounts.extract(AUTHENTICATION_DEVICE) {
                Some(mount) if mount.pid != self.pid => mount.pid,
                _ => return io.reply(&error_response(ErrorKind::InvalidArgument.status())),
            },
        };

        request.process = envelope.origin;
        let stat_request = StatRequest {
            handle: -1,
            file_path: String::from(AUTHENTICATION_DEVICE),
        };
        match io.raise(RpcType::VfsStat.val(), stat_target, &stat_request) {
            Ok(response_id) => self.continuations.push(
                RpcType::VfsStat.val(),
                response_id,
                Continuation::ForkStat {
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

    /// Stat of the authentication device arrived; hand the fork over to
    /// the authentication handler.
    pub(super) fn resume_fork_stat(
        &mut self,
        caller: Caller,
        request: ForkRequest,
        envelope: &Envelope,
        io: &mut dyn ServerIo,
    ) {
        let respond = |io: &mut dyn ServerIo, response: &ForkResponse| {
            io.respond(
                RpcType::VfsFork.val(),
                caller.origin,
                caller.reply_to,
                response,
            );
        };
        let response: StatResponse = match io.get_message(envelope.data_id) {
            Ok(response) => response,
            Err(kind) => return respond(io, &error_response(kind.status())),
        };
        if response.result < 0 {
            return respond(io, &error_response(ErrorKind::NoDevice.status()));
        }
        match io.raise(RpcType::VfsFork.val(), response.handler, &request) {
            Ok(response_id) => self.continuations.push(
                RpcType::VfsFork.val(),
                response_id,
                Continuation::ForkPropagate { caller, request },
            ),
            Err(kind) => respond(io, &error_response(kind.status())),
        }
    }

    /// The authentication server confirmed; duplicate every parent
    /// handle into a fresh tree for the child.
    pub(super) fn resume_fork_propagate(
        &mut self,
        caller: Caller,
        request: ForkRequest,
        envelope: &Envelope,
        io: &mut dyn ServerIo,
    ) {
        let respond = |io: &mut dyn ServerIo, response: &ForkResponse| {
            io.respond(
                RpcType::VfsFork.val(),
                caller.origin,
                caller.reply_to,
                response,
            );
        };
        let response: ForkResponse = match io.get_message(envelope.data_id) {
            Ok(response) => response,
            Err(kind) => return respond(io, &error_response(kind.status())),
        };
        if response.status < 0 {
            return respond(io, &response);
        }
        self.handles.duplicate(request.parent, request.process);
        log::debug!(
            "fork: duplicated {} handles from {} to {}",
            self.handles.count(request.process),
            request.parent,
            request.process
        );
        respond(io, &error_response(0));
    }
}
