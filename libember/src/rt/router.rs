//! Loopback message router.
//!
//! Delivers RPC envelopes between servers living in the same address
//! space. This is the transport used by the hosted build and the tests;
//! on target hardware the same [`RpcHandler`] servers sit on top of the
//! kernel rpc syscalls instead. Delivery is FIFO per router, cooperative:
//! a server handles exactly one envelope at a time and suspends by
//! raising an rpc and returning to the loop.

use crate::error::ErrorKind;
use crate::rpc::{
    DataId,
    Envelope,
    ResponseId,
    RpcHandler,
    ServerIo,
};
use crate::Pid;
use alloc::boxed::Box;
use alloc::collections::{
    BTreeMap,
    BTreeSet,
    VecDeque,
};
use alloc::vec::Vec;

struct Delivery {
    to: Pid,
    envelope: Envelope,
    /// Response id a reply to this envelope has to carry; zero when the
    /// sender does not expect an answer.
    pending: ResponseId,
}

#[derive(Default)]
struct RouterState {
    queue: VecDeque<Delivery>,
    data: BTreeMap<DataId, Vec<u8>>,
    alive: BTreeSet<Pid>,
    parents: BTreeMap<Pid, Pid>,
    /// Replies addressed to plain processes (no registered server).
    mailboxes: BTreeMap<Pid, Vec<(Envelope, Vec<u8>)>>,
    next_data: DataId,
    next_response: ResponseId,
}

impl RouterState {
    fn store_data(&mut self, payload: &[u8]) -> DataId {
        self.next_data += 1;
        self.data.insert(self.next_data, payload.to_vec());
        self.next_data
    }

    fn next_response_id(&mut self) -> ResponseId {
        self.next_response += 1;
        self.next_response
    }

    fn push(&mut self, delivery: Delivery) {
        self.queue.push_back(delivery);
    }
}

/// The in-process router owning all registered servers.
pub struct Router {
    state: RouterState,
    servers: BTreeMap<Pid, Box<dyn RpcHandler>>,
}

impl core::fmt::Debug for Router {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Router")
            .field("servers", &self.servers.keys())
            .field("queued", &self.state.queue.len())
            .finish()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            state: RouterState::default(),
            servers: BTreeMap::new(),
        }
    }

    /// Registers a server under its process id.
    pub fn register(&mut self, pid: Pid, server: Box<dyn RpcHandler>) {
        self.state.alive.insert(pid);
        self.servers.insert(pid, server);
    }

    /// Registers a plain process (a client) with an optional parent.
    pub fn register_process(&mut self, pid: Pid, parent: Option<Pid>) {
        self.state.alive.insert(pid);
        if let Some(parent) = parent {
            self.state.parents.insert(pid, parent);
        }
    }

    /// Marks a process as dead. Replies towards it are dropped from now on.
    pub fn kill(&mut self, pid: Pid) {
        self.state.alive.remove(&pid);
        self.state.mailboxes.remove(&pid);
    }

    /// Injects a request from `origin` towards `target` and returns the
    /// response id the reply will carry.
    pub fn request(
        &mut self,
        origin: Pid,
        target: Pid,
        rpc_type: u32,
        payload: &[u8],
    ) -> ResponseId {
        let data_id = self.state.store_data(payload);
        let pending = self.state.next_response_id();
        self.state.push(Delivery {
            to: target,
            envelope: Envelope {
                rpc_type,
                origin,
                data_id,
                response_id: 0,
            },
            pending,
        });
        pending
    }

    /// Takes all replies delivered to a plain process so far.
    pub fn take_replies(&mut self, pid: Pid) -> Vec<(Envelope, Vec<u8>)> {
        self.state.mailboxes.remove(&pid).unwrap_or_default()
    }

    /// Pumps the queue until no deliveries are left.
    pub fn run_until_idle(&mut self) {
        while let Some(delivery) = self.state.queue.pop_front() {
            self.dispatch(delivery);
        }
    }

    fn dispatch(&mut self, delivery: Delivery) {
        if !self.state.alive.contains(&delivery.to) {
            log::trace!("dropping delivery to dead pid {}", delivery.to);
            self.state.data.remove(&delivery.envelope.data_id);
            return;
        }
        // not a server: resolve the payload and park it in the mailbox
        let Some(mut server) = self.servers.remove(&delivery.to) else {
            let payload = self
                .state
                .data
                .remove(&delivery.envelope.data_id)
                .unwrap_or_default();
            self.state
                .mailboxes
                .entry(delivery.to)
                .or_default()
                .push((delivery.envelope, payload));
            return;
        };
        let mut io = RouterIo {
            state: &mut self.state,
            current_pid: delivery.to,
            envelope: delivery.envelope,
            pending: delivery.pending,
        };
        server.handle(&delivery.envelope, &mut io);
        self.servers.insert(delivery.to, server);
    }
}

struct RouterIo<'a> {
    state: &'a mut RouterState,
    current_pid: Pid,
    envelope: Envelope,
    pending: ResponseId,
}

impl ServerIo for RouterIo<'_> {
    fn get_data(&mut self, id: DataId) -> Option<Vec<u8>> {
        self.state.data.remove(&id)
    }

    fn reply_token(&self) -> ResponseId {
        self.pending
    }

    fn reply_raw(&mut self, payload: &[u8]) {
        if self.pending == 0 {
            log::trace!("reply without pending response id, dropped");
            return;
        }
        self.respond_raw(
            self.envelope.rpc_type,
            self.envelope.origin,
            self.pending,
            payload,
        );
    }

    fn respond_raw(&mut self, rpc_type: u32, to: Pid, response_id: ResponseId, payload: &[u8]) {
        if !self.state.alive.contains(&to) {
            log::trace!("response to dead pid {to}, dropped");
            return;
        }
        let data_id = self.state.store_data(payload);
        self.state.push(Delivery {
            to,
            envelope: Envelope {
                rpc_type,
                origin: self.current_pid,
                data_id,
                response_id,
            },
            pending: 0,
        });
    }

    fn raise_raw(
        &mut self,
        rpc_type: u32,
        target: Pid,
        payload: &[u8],
    ) -> Result<ResponseId, ErrorKind> {
        if !self.state.alive.contains(&target) {
            return Err(ErrorKind::NoHandler);
        }
        let data_id = self.state.store_data(payload);
        let pending = self.state.next_response_id();
        self.state.push(Delivery {
            to: target,
            envelope: Envelope {
                rpc_type,
                origin: self.current_pid,
                data_id,
                response_id: 0,
            },
            pending,
        });
        Ok(pending)
    }

    fn is_alive(&self, pid: Pid) -> bool {
        self.state.alive.contains(&pid)
    }

    fn parent_of(&self, pid: Pid) -> Option<Pid> {
        self.state.parents.get(&pid).copied()
    }
}
