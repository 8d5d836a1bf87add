//! Loader error state.
//!
//! Errors are kept in the loader until [`crate::Loader::dlerror`] fetches
//! and clears them, mirroring the usual `dlerror()` contract.

use alloc::string::String;
use libember::error::ErrorKind;

/// Everything `dlopen` and friends can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlErrorKind {
    NoMemory,
    CannotOpen,
    ReadHeader,
    HeaderMagic,
    HeaderClass,
    HeaderMachine,
    HeaderProgram,
    HeaderSection,
    IoError,
    /// Only one or two loadable segments are supported.
    LoadSegmentCount,
    /// Dynamic section offsets or hash geometry out of bounds.
    Malformed,
    UnknownSymbol,
    DtRelaUnsupported,
    NotFound,
}

impl DlErrorKind {
    pub const fn message(self) -> &'static str {
        match self {
            Self::NoMemory => "out of memory",
            Self::CannotOpen => "unable to open file",
            Self::ReadHeader => "unable to read header",
            Self::HeaderMagic => "invalid elf magic",
            Self::HeaderClass => "unsupported elf class",
            Self::HeaderMachine => "unsupported machine",
            Self::HeaderProgram => "invalid program header size",
            Self::HeaderSection => "invalid section header size",
            Self::IoError => "i/o error while reading image",
            Self::LoadSegmentCount => "unsupported amount of load segments",
            Self::Malformed => "malformed dynamic information",
            Self::UnknownSymbol => "unknown relocation or symbol",
            Self::DtRelaUnsupported => "rela relocations not supported",
            Self::NotFound => "no such handle or symbol",
        }
    }
}

impl From<DlErrorKind> for ErrorKind {
    fn from(value: DlErrorKind) -> Self {
        match value {
            DlErrorKind::NoMemory => Self::OutOfMemory,
            DlErrorKind::CannotOpen | DlErrorKind::NotFound => Self::NotFound,
            DlErrorKind::IoError | DlErrorKind::ReadHeader => Self::IoError,
            DlErrorKind::UnknownSymbol => Self::NotFound,
            DlErrorKind::DtRelaUnsupported => Self::NotImplemented,
            _ => Self::Malformed,
        }
    }
}

/// An error with the place it happened at and optional detail, as
/// reported by `dlerror`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlError {
    pub kind: DlErrorKind,
    pub location: &'static str,
    pub detail: String,
}

impl DlError {
    pub fn new(kind: DlErrorKind, location: &'static str) -> Self {
        Self {
            kind,
            location,
            detail: String::new(),
        }
    }

    pub fn with_detail(kind: DlErrorKind, location: &'static str, detail: &str) -> Self {
        Self {
            kind,
            location,
            detail: String::from(detail),
        }
    }

    /// The `location: message detail` rendering handed out by `dlerror`.
    pub fn render(&self) -> String {
        if self.detail.is_empty() {
            format!("{}: {}", self.location, self.kind.message())
        } else {
            format!("{}: {} {}", self.location, self.kind.message(), self.detail)
        }
    }
}
