//! Open: pre-allocates the handle, forwards to the mount owner and
//! finishes the record from the reply.

use super::VfsServer;
use crate::continuation::{
    Caller,
    Continuation,
};
use libember::error::{
    errno,
    ErrorKind,
};
use libember::flags::OpenFlags;
use libember::proto::{
    OpenRequest,
    OpenResponse,
};
use libember::rpc::{
    Envelope,
    ServerIo,
};
use libember::stat::Stat;

fn error_response(status: i32) -> OpenResponse {
    OpenResponse {
        handle: status,
        ..OpenResponse::default()
    }
}

/// Flag and type checks against the opened object's status.
fn open_checks(info: &Stat, flags: OpenFlags) -> Result<(), ErrorKind> {
    if flags.contains(OpenFlags::O_CREAT) && flags.contains(OpenFlags::O_EXCL) {
        // the object exists, exclusive creation must fail
        return Err(ErrorKind::Exists);
    }
    if info.is_dir() && flags.wants_write() {
        return Err(ErrorKind::IsDirectory);
    }
    if flags.contains(OpenFlags::O_DIRECTORY) && !info.is_dir() {
        return Err(ErrorKind::NotDirectory);
    }
    Ok(())
}

impl VfsServer {
    pub(super) fn handle_open(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let request: OpenRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(kind) => return io.reply(&error_response(kind.status())),
        };
        let flags = OpenFlags::from_bits_truncate(request.flags);
        let mount_pid = self.owner_of(&request.path);
        // pre-allocate the handle record
        let handle = match self.handles.generate(
            envelope.origin,
            mount_pid,
            &request.path,
            request.flags,
            request.mode,
        ) {
            Ok(handle) => handle,
            Err(kind) => return io.reply(&error_response(kind.status())),
        };

        if mount_pid == self.pid {
            // self-served path, no plug-in round trip
            let result = self
                .self_stat(&request.path)
                .and_then(|(handler, info)| open_checks(&info, flags).map(|()| (handler, info)));
            match result {
                Ok((handler, info)) => {
                    let record = self
                        .handles
                        .get_mut(envelope.origin, handle)
                        .expect("freshly generated handle");
                    record.handler = handler;
                    record.info = info;
                    io.reply(&OpenResponse {
                        handle,
                        handler,
                        st: info,
                    });
                }
                Err(kind) => {
                    let _ = self.handles.destroy(envelope.origin, handle);
                    let status = if kind == ErrorKind::NotFound && flags.contains(OpenFlags::O_CREAT)
                    {
                        // creation on the pseudo filesystems is not there
                        -errno::ENOSYS
                    } else {
                        kind.status()
                    };
                    io.reply(&error_response(status));
                }
            }
            return;
        }

        // forward asynchronously to the mount owner
        let mut forward = request;
        forward.handle = handle;
        forward.origin = envelope.origin;
        match io.raise(envelope.rpc_type, mount_pid, &forward) {
            Ok(response_id) => self.continuations.push(
                envelope.rpc_type,
                response_id,
                Continuation::Open {
                    caller: Caller {
                        origin: envelope.origin,
                        reply_to: io.reply_token(),
                    },
                    request: forward,
                    handle,
                },
            ),
            Err(kind) => {
                let _ = self.handles.destroy(envelope.origin, handle);
                io.reply(&error_response(kind.status()));
            }
        }
    }

    pub(super) fn resume_open(
        &mut self,
        caller: Caller,
        request: OpenRequest,
        handle: i32,
        envelope: &Envelope,
        io: &mut dyn ServerIo,
    ) {
        let flags = OpenFlags::from_bits_truncate(request.flags);
        let respond = |io: &mut dyn ServerIo, response: &OpenResponse| {
            io.respond(envelope.rpc_type, caller.origin, caller.reply_to, response);
        };
        let response: OpenResponse = match io.get_message(envelope.data_id) {
            Ok(response) => response,
            Err(kind) => {
                let _ = self.handles.destroy(caller.origin, handle);
                return respond(io, &error_response(kind.status()));
            }
        };
        // plug-in failure destroys the pre-allocated handle again
        if response.handle < 0 {
            let _ = self.handles.destroy(caller.origin, handle);
            let status = if flags.contains(OpenFlags::O_CREAT) {
                // creation is not supported by the read-only plug-ins
                -errno::ENOSYS
            } else {
                response.handle
            };
            return respond(io, &error_response(status));
        }
        if let Err(kind) = open_checks(&response.st, flags) {
            let _ = self.handles.destroy(caller.origin, handle);
            return respond(io, &error_response(kind.status()));
        }
        let Some(record) = self.handles.get_mut(caller.origin, handle) else {
            return respond(io, &error_response(-errno::EBADF));
        };
        record.handler = response.handler;
        record.info = response.st;
        respond(
            io,
            &OpenResponse {
                handle,
                handler: response.handler,
                st: response.st,
            },
        );
    }
}
