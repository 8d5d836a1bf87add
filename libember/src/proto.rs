//! Request and response payloads for every VFS operation.
//!
//! The same request structure travels on both hops of an operation: the
//! client fills the user-visible part, the VFS adds the handle, resolved
//! path and offset before forwarding to the owning plug-in.

use crate::stat::Stat;
use alloc::string::String;
use alloc::vec::Vec;
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct OpenRequest {
    pub path: String,
    pub flags: u32,
    pub mode: u32,
    /// Pre-allocated handle id, filled in by the VFS before forwarding.
    pub handle: i32,
    /// Originating process, filled in by the VFS before forwarding.
    pub origin: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct OpenResponse {
    /// Negative status or the handle id on success.
    pub handle: i32,
    /// Process that will serve requests on this handle.
    pub handler: u32,
    pub st: Stat,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ReadRequest {
    pub handle: i32,
    pub len: u32,
    /// Path of the object, filled by the VFS for the plug-in hop.
    pub file_path: String,
    /// Current position, filled by the VFS for the plug-in hop.
    pub offset: i64,
    /// Optional shared-memory id for bulk transfers; zero means inline.
    pub shm_id: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ReadResponse {
    /// Negative status or the number of bytes read.
    pub len: i64,
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct WriteRequest {
    pub handle: i32,
    pub data: Vec<u8>,
    pub file_path: String,
    pub offset: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct WriteResponse {
    /// Negative status or the number of bytes written.
    pub len: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SeekRequest {
    pub handle: i32,
    pub offset: i64,
    pub whence: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SeekResponse {
    /// Negative status or the new absolute position.
    pub position: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StatRequest {
    pub handle: i32,
    pub file_path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StatResponse {
    pub result: i32,
    /// Process serving the statted object.
    pub handler: u32,
    pub info: Stat,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct GetdentsRequest {
    pub handle: i32,
    pub count: u32,
    pub file_path: String,
    pub offset: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Dirent {
    pub inode: u64,
    pub kind: u8,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct GetdentsResponse {
    /// Negative status or the number of entries returned.
    pub result: i64,
    pub entries: Vec<Dirent>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MountRequest {
    pub source: String,
    pub target: String,
    pub fs_type: String,
    pub flags: u32,
    /// Originating process, filled in by the VFS before forwarding.
    pub origin: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MountResponse {
    pub result: i32,
    /// Process that owns the freshly mounted tree.
    pub handler: u32,
    /// Status of the mount root.
    pub info: Stat,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UmountRequest {
    pub target: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UmountResponse {
    pub result: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct IoctlRequest {
    pub handle: i32,
    pub command: u32,
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct IoctlResponse {
    pub result: i32,
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CloseRequest {
    pub handle: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CloseResponse {
    pub status: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ForkRequest {
    /// Parent claimed by the caller; must match the kernel's record.
    pub parent: u32,
    /// Forked child, filled during the continuation chain.
    pub process: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ForkResponse {
    pub status: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExitRequest {
    pub process: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExitResponse {
    pub status: i32,
}

/// One device announced through `VFS_ADD`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AddDevice {
    pub path: String,
    pub info: Stat,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AddRequest {
    pub devices: Vec<AddDevice>,
    /// Ioctl commands the announcing process handles.
    pub commands: Vec<u32>,
    /// Set when the process also handles `VFS_MOUNT` requests.
    pub handles_mount: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AddResponse {
    pub status: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RemoveRequest {
    pub paths: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RemoveResponse {
    pub status: i32,
}
