//! Suspended requests.
//!
//! When a request has to wait for a plug-in, the handler captures its
//! state here keyed by `(rpc type, response id)`. The plug-in's reply
//! resumes it exactly once; replies without a matching record are dropped
//! silently.

use libember::proto::{
    AddRequest,
    CloseRequest,
    ForkRequest,
    GetdentsRequest,
    IoctlRequest,
    MountRequest,
    OpenRequest,
    ReadRequest,
    StatRequest,
    WriteRequest,
};
use libember::rpc::ResponseId;
use libember::Pid;
use alloc::collections::BTreeMap;

/// Common capture of every suspension point: who asked, and which reply
/// token answers them.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub origin: Pid,
    pub reply_to: ResponseId,
}

/// One parked request, a concrete variant per suspension point. Each
/// carries the forwarded request so post-processing has the full context.
#[derive(Debug)]
pub enum Continuation {
    Open {
        caller: Caller,
        request: OpenRequest,
        /// Pre-allocated handle id, destroyed again if the plug-in fails.
        handle: i32,
    },
    Read {
        caller: Caller,
        request: ReadRequest,
    },
    Write {
        caller: Caller,
        request: WriteRequest,
    },
    Stat {
        caller: Caller,
        request: StatRequest,
    },
    Getdents {
        caller: Caller,
        request: GetdentsRequest,
    },
    Ioctl {
        caller: Caller,
        request: IoctlRequest,
    },
    Mount {
        caller: Caller,
        request: MountRequest,
    },
    Close {
        caller: Caller,
        request: CloseRequest,
    },
    Add {
        caller: Caller,
        request: AddRequest,
    },
    /// Fork waiting for the authentication device stat.
    ForkStat {
        caller: Caller,
        request: ForkRequest,
    },
    /// Fork waiting for the authentication server's confirmation.
    ForkPropagate {
        caller: Caller,
        request: ForkRequest,
    },
}

/// The `(type, response id) -> continuation` map.
#[derive(Debug, Default)]
pub struct ContinuationTable {
    parked: BTreeMap<(u32, ResponseId), Continuation>,
}

impl ContinuationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rpc_type: u32, response_id: ResponseId, continuation: Continuation) {
        self.parked.insert((rpc_type, response_id), continuation);
    }

    /// Takes a parked continuation; it cannot run twice.
    pub fn pop(&mut self, rpc_type: u32, response_id: ResponseId) -> Option<Continuation> {
        self.parked.remove(&(rpc_type, response_id))
    }

    pub fn len(&self) -> usize {
        self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }
}
