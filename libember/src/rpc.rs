//! The RPC message envelope.
//!
//! A message is `(type, origin, data id, response id)`; the payload itself
//! is fetched separately through the transport ("get data"). A zero
//! response id marks the first delivery of a request, a non-zero one marks
//! the reply belonging to a previously raised rpc.

use crate::error::ErrorKind;
use crate::Pid;
use alloc::vec::Vec;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Identifier of a payload buffer held by the transport.
pub type DataId = u32;

/// Correlation id of a raised rpc; replies echo it.
pub type ResponseId = u32;

/// Message envelope as delivered to a server's event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub rpc_type: u32,
    pub origin: Pid,
    pub data_id: DataId,
    pub response_id: ResponseId,
}

impl Envelope {
    /// True for the first delivery of a request, false for a reply.
    pub const fn is_request(&self) -> bool {
        self.response_id == 0
    }
}

/// The transport operations available to a server while it handles one
/// envelope. Implemented by the loopback router; on target hardware this
/// maps onto the rpc syscalls.
pub trait ServerIo {
    /// Fetches and consumes the payload behind a data id.
    fn get_data(&mut self, id: DataId) -> Option<Vec<u8>>;

    /// Replies to the envelope currently being handled.
    fn reply_raw(&mut self, payload: &[u8]);

    /// The response id a reply to the current envelope will carry. A
    /// continuation captures this together with the origin to answer the
    /// request later.
    fn reply_token(&self) -> ResponseId;

    /// Replies to an earlier request on behalf of a finished continuation.
    fn respond_raw(&mut self, rpc_type: u32, to: Pid, response_id: ResponseId, payload: &[u8]);

    /// Raises an asynchronous rpc towards `target` and returns the
    /// response id its reply will carry.
    fn raise_raw(
        &mut self,
        rpc_type: u32,
        target: Pid,
        payload: &[u8],
    ) -> Result<ResponseId, ErrorKind>;

    /// Whether the given process still exists.
    fn is_alive(&self, pid: Pid) -> bool;

    /// Parent process of `pid`, if any. Used by origin validation.
    fn parent_of(&self, pid: Pid) -> Option<Pid>;
}

/// Serialization helpers layered over the raw [`ServerIo`] operations.
impl<'io> dyn ServerIo + 'io {
    /// Fetches a payload and decodes it, reporting a missing buffer as
    /// [`ErrorKind::InvalidArgument`] and a broken one as
    /// [`ErrorKind::Malformed`].
    pub fn get_message<T: DeserializeOwned>(&mut self, id: DataId) -> Result<T, ErrorKind> {
        if id == 0 {
            return Err(ErrorKind::InvalidArgument);
        }
        let raw = self.get_data(id).ok_or(ErrorKind::InvalidArgument)?;
        postcard::from_bytes(&raw).map_err(|_| ErrorKind::Malformed)
    }

    pub fn reply<T: Serialize>(&mut self, message: &T) {
        match postcard::to_allocvec(message) {
            Ok(raw) => self.reply_raw(&raw),
            Err(_) => log::error!("dropping unserializable reply"),
        }
    }

    pub fn respond<T: Serialize>(
        &mut self,
        rpc_type: u32,
        to: Pid,
        response_id: ResponseId,
        message: &T,
    ) {
        match postcard::to_allocvec(message) {
            Ok(raw) => self.respond_raw(rpc_type, to, response_id, &raw),
            Err(_) => log::error!("dropping unserializable response"),
        }
    }

    pub fn raise<T: Serialize>(
        &mut self,
        rpc_type: u32,
        target: Pid,
        message: &T,
    ) -> Result<ResponseId, ErrorKind> {
        let raw = postcard::to_allocvec(message).map_err(|_| ErrorKind::InvalidArgument)?;
        self.raise_raw(rpc_type, target, &raw)
    }
}

/// A server attached to the message loop. One `handle` call per envelope;
/// raising an rpc and returning suspends the request until the reply
/// envelope arrives.
pub trait RpcHandler {
    fn handle(&mut self, envelope: &Envelope, io: &mut dyn ServerIo);
}
