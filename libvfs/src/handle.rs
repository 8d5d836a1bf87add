//! Per-process file handle bookkeeping.
//!
//! Every process owns a tree of open handles. Ids 0 to 2 are reserved for
//! the canonical stdio paths; user handles start at 3 and the smallest
//! free id is reused after a close.

use libember::error::ErrorKind;
use libember::path::{
    bounded,
    Path,
};
use libember::stat::Stat;
use libember::Pid;
use alloc::collections::BTreeMap;

/// Smallest id handed out to ordinary opens.
const MIN_HANDLE: i32 = 3;

pub const STDIN_HANDLE: i32 = 0;
pub const STDOUT_HANDLE: i32 = 1;
pub const STDERR_HANDLE: i32 = 2;

/// One open filesystem object of one process.
#[derive(Debug, Clone)]
pub struct HandleRecord {
    pub id: i32,
    pub flags: u32,
    pub mode: u32,
    /// Current file position.
    pub pos: i64,
    pub path: Path,
    /// Process serving operations on this handle.
    pub handler: Pid,
    /// Status cached from the open reply.
    pub info: Stat,
}

/// Handles of a single process.
#[derive(Debug, Default)]
pub struct ProcessHandles {
    tree: BTreeMap<i32, HandleRecord>,
}

impl ProcessHandles {
    /// Smallest id not in use, starting at [`MIN_HANDLE`].
    fn next_free(&self) -> i32 {
        let mut candidate = MIN_HANDLE;
        while self.tree.contains_key(&candidate) {
            candidate += 1;
        }
        candidate
    }
}

/// All handle trees, keyed by process.
#[derive(Debug, Default)]
pub struct HandleTable {
    processes: BTreeMap<Pid, ProcessHandles>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle for `process`. The canonical stdio paths get
    /// their reserved ids unless those are already taken.
    pub fn generate(
        &mut self,
        process: Pid,
        handler: Pid,
        path: &str,
        flags: u32,
        mode: u32,
    ) -> Result<i32, ErrorKind> {
        let path = bounded(path)?;
        let handles = self.processes.entry(process).or_default();
        let reserved = match path.as_str() {
            "/dev/stdin" => Some(STDIN_HANDLE),
            "/dev/stdout" => Some(STDOUT_HANDLE),
            "/dev/stderr" => Some(STDERR_HANDLE),
            _ => None,
        };
        let id = match reserved {
            Some(id) if !handles.tree.contains_key(&id) => id,
            _ => handles.next_free(),
        };
        handles.tree.insert(
            id,
            HandleRecord {
                id,
                flags,
                mode,
                pos: 0,
                path,
                handler,
                info: Stat::default(),
            },
        );
        log::trace!("handle {id} for pid {process} ({})", handles.tree[&id].path);
        Ok(id)
    }

    pub fn get(&self, process: Pid, handle: i32) -> Option<&HandleRecord> {
        self.processes.get(&process)?.tree.get(&handle)
    }

    pub fn get_mut(&mut self, process: Pid, handle: i32) -> Option<&mut HandleRecord> {
        self.processes.get_mut(&process)?.tree.get_mut(&handle)
    }

    /// Removes one handle; unknown ids report [`ErrorKind::BadHandle`].
    pub fn destroy(&mut self, process: Pid, handle: i32) -> Result<(), ErrorKind> {
        self.processes
            .get_mut(&process)
            .and_then(|handles| handles.tree.remove(&handle))
            .map(|_| ())
            .ok_or(ErrorKind::BadHandle)
    }

    /// Drops every handle a process owns (process exit).
    pub fn destroy_all(&mut self, process: Pid) {
        self.processes.remove(&process);
    }

    /// Copies every open handle of `parent` into a fresh tree for
    /// `child`, ids, paths and positions included.
    pub fn duplicate(&mut self, parent: Pid, child: Pid) {
        let copied = self
            .processes
            .get(&parent)
            .map(|handles| handles.tree.clone())
            .unwrap_or_default();
        self.processes
            .insert(child, ProcessHandles { tree: copied });
    }

    /// Number of open handles of a process.
    pub fn count(&self, process: Pid) -> usize {
        self.processes
            .get(&process)
            .map(|handles| handles.tree.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_three_and_are_unique() {
        let mut table = HandleTable::new();
        let a = table.generate(7, 1, "/tmp/a", 0, 0).unwrap();
        let b = table.generate(7, 1, "/tmp/b", 0, 0).unwrap();
        assert_eq!(a, 3);
        assert_eq!(b, 4);
        // another process starts over
        assert_eq!(table.generate(8, 1, "/tmp/c", 0, 0).unwrap(), 3);
    }

    /// Property: a closed id becomes eligible for reuse.
    #[test]
    fn test_id_reuse_after_close() {
        let mut table = HandleTable::new();
        let a = table.generate(7, 1, "/tmp/a", 0, 0).unwrap();
        let b = table.generate(7, 1, "/tmp/b", 0, 0).unwrap();
        assert_ne!(a, b);
        table.destroy(7, a).unwrap();
        assert_eq!(table.generate(7, 1, "/tmp/c", 0, 0).unwrap(), a);
    }

    #[test]
    fn test_stdio_reservation() {
        let mut table = HandleTable::new();
        assert_eq!(table.generate(7, 1, "/dev/stdin", 0, 0).unwrap(), 0);
        assert_eq!(table.generate(7, 1, "/dev/stdout", 0, 0).unwrap(), 1);
        assert_eq!(table.generate(7, 1, "/dev/stderr", 0, 0).unwrap(), 2);
        // a second stdin open falls back to a generated id
        assert_eq!(table.generate(7, 1, "/dev/stdin", 0, 0).unwrap(), 3);
    }

    #[test]
    fn test_duplicate_copies_everything() {
        let mut table = HandleTable::new();
        let id = table.generate(7, 1, "/tmp/a", 0o2, 0o644).unwrap();
        table.get_mut(7, id).unwrap().pos = 42;
        table.duplicate(7, 9);
        let copy = table.get(9, id).unwrap();
        assert_eq!(copy.pos, 42);
        assert_eq!(copy.path.as_str(), "/tmp/a");
        // the copies are independent
        table.get_mut(9, id).unwrap().pos = 7;
        assert_eq!(table.get(7, id).unwrap().pos, 42);
    }

    #[test]
    fn test_destroy_unknown_handle() {
        let mut table = HandleTable::new();
        assert_eq!(table.destroy(7, 3), Err(ErrorKind::BadHandle));
        table.generate(7, 1, "/tmp/a", 0, 0).unwrap();
        assert_eq!(table.destroy(7, 99), Err(ErrorKind::BadHandle));
    }

    #[test]
    fn test_over_long_path_rejected() {
        let mut table = HandleTable::new();
        let long = alloc::string::String::from_utf8(vec![b'a'; 300]).unwrap();
        assert_eq!(
            table.generate(7, 1, &long, 0, 0),
            Err(ErrorKind::InvalidArgument)
        );
    }
}
