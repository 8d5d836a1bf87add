//! Bounded, canonical `/`-separated paths.

use crate::error::ErrorKind;
use arrayvec::ArrayString;

/// Maximum path length accepted anywhere in the system.
pub const PATH_MAX: usize = 255;

/// A bounded path as stored inside handle and mount records.
pub type Path = ArrayString<PATH_MAX>;

/// Builds a bounded [`Path`] from a wire string, rejecting over-long or
/// empty input.
pub fn bounded(raw: &str) -> Result<Path, ErrorKind> {
    if raw.is_empty() {
        return Err(ErrorKind::InvalidArgument);
    }
    Path::from(raw).map_err(|_| ErrorKind::InvalidArgument)
}

/// Iterates the non-empty components of a path. Trailing and duplicate
/// separators are skipped, mirroring the walker of the filesystem plug-ins.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

/// True if `prefix` is a whole-component prefix of `path`. Used by the
/// longest-prefix mount lookup.
pub fn is_prefix(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
