//! RPC type constants. The numeric values form the public header shared by
//! all servers; per-domain custom commands start at [`RPC_CUSTOM_START`].

use enum_iterator::IntoEnumIterator;

/// First rpc value usable for per-domain custom commands.
pub const RPC_CUSTOM_START: u32 = 0x1000;

/// Well known rpc types understood at the VFS boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoEnumIterator)]
#[repr(u32)]
pub enum RpcType {
    VfsAdd = 1,
    VfsRemove = 2,
    VfsOpen = 3,
    VfsClose = 4,
    VfsRead = 5,
    VfsWrite = 6,
    VfsSeek = 7,
    VfsStat = 8,
    VfsIoctl = 9,
    VfsMount = 10,
    VfsUmount = 11,
    VfsGetdents = 12,
    VfsFork = 13,
    VfsExit = 14,
}

impl RpcType {
    /// Returns the numeric wire value.
    pub const fn val(self) -> u32 {
        self as u32
    }

    /// Decode a wire value back into the enum.
    pub fn from_val(value: u32) -> Option<Self> {
        Self::into_enum_iter().find(|t| t.val() == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_stable() {
        assert_eq!(RpcType::VfsAdd.val(), 1);
        assert_eq!(RpcType::VfsExit.val(), 14);
        assert!(RpcType::into_enum_iter().all(|t| t.val() < RPC_CUSTOM_START));
    }

    #[test]
    fn test_round_trip() {
        for t in RpcType::into_enum_iter() {
            assert_eq!(RpcType::from_val(t.val()), Some(t));
        }
        assert_eq!(RpcType::from_val(0xdead), None);
    }
}
