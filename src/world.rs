//! World names: validated once, used as both wire argument and directory name.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, SyncError};
use crate::protocol::RESERVED_PREFIX;

/// A name made only of ASCII alphanumerics, `-`, `_` and `.`, never
/// containing `..`. Client and server apply the same rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorldName(String);

impl WorldName {
    pub fn new(name: &str) -> Result<Self> {
        if is_valid_world_name(name) {
            Ok(WorldName(name.to_string()))
        } else {
            Err(SyncError::InvalidName(name.to_string()))
        }
    }

    /// Validate raw name bytes read off the wire.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        match std::str::from_utf8(bytes) {
            Ok(s) => Self::new(s),
            Err(_) => Err(SyncError::InvalidName(
                String::from_utf8_lossy(bytes).into_owned(),
            )),
        }
    }

    /// Default name for pushing `dir`: its final component after resolving
    /// `.`, `..` and trailing slashes.
    pub fn for_directory(dir: &Path) -> Result<Self> {
        let resolved = dir.canonicalize().map_err(|e| {
            SyncError::io(format!("failed to resolve {}", dir.display()), e)
        })?;
        let base = resolved
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| SyncError::InvalidName(resolved.display().to_string()))?;
        Self::new(base)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn is_valid_world_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.starts_with(RESERVED_PREFIX)
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

impl fmt::Display for WorldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorldName {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for WorldName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<Path> for WorldName {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}
