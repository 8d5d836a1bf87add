//! Seek: fully local, bounded by the cached object size.

use super::VfsServer;
use libember::error::ErrorKind;
use libember::flags::SeekWhence;
use libember::proto::{
    SeekRequest,
    SeekResponse,
};
use libember::rpc::{
    Envelope,
    ServerIo,
};

fn error_response(status: i32) -> SeekResponse {
    SeekResponse {
        position: status as i64,
    }
}

impl VfsServer {
    pub(super) fn handle_seek(&mut self, envelope: &Envelope, io: &mut dyn ServerIo) {
        let request: SeekRequest = match io.get_message(envelope.data_id) {
            Ok(request) => request,
            Err(kind) => return io.reply(&error_response(kind.status())),
        };
        let Some(record) = self.handles.get_mut(envelope.origin, request.handle) else {
            return io.reply(&error_response(ErrorKind::BadHandle.status()));
        };
        let new_position = match SeekWhence::from_val(request.whence) {
            Some(SeekWhence::Set) => request.offset,
            Some(SeekWhence::Current) => record.pos + request.offset,
            Some(SeekWhence::End) => record.info.st_size,
            None => -1,
        };
        // bounds check against the cached size
        if new_position < 0 || new_position > record.info.st_size {
            return io.reply(&error_response(ErrorKind::InvalidArgument.status()));
        }
        record.pos = new_position;
        io.reply(&SeekResponse {
            position: new_position,
        });
    }
}
