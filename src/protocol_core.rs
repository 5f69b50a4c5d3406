//! Shared protocol logic for both the daemon and the client
//!
//! Every control line is parsed here with an explicit grammar: tokens are
//! separated by exactly one space, numbers are plain ASCII digits, and
//! anything trailing or malformed is rejected. Path helpers keep entry paths
//! from a peer confined to the target directory.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorReason, Result, SyncError};
use crate::protocol::{entry_kind, keyword};

/// Parse a non-empty run of ASCII digits. Signs, whitespace and overflow are
/// all rejected.
pub fn parse_number(token: &str) -> Option<u64> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

fn parse_len(token: Option<&str>) -> Option<usize> {
    // On narrow targets an oversized length saturates and fails range checks
    token
        .and_then(parse_number)
        .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
}

/// A client command, first line of every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Push { name_len: usize },
    Pull { name_len: usize },
    List,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Known verb, bad arguments.
    Malformed(String),
    /// Not a command at all.
    Unknown(String),
}

impl RequestError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            RequestError::Malformed(_) => ErrorReason::InvalidCommand,
            RequestError::Unknown(_) => ErrorReason::UnknownCommand,
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Malformed(line) => write!(f, "malformed command {line:?}"),
            RequestError::Unknown(line) => write!(f, "unknown command {line:?}"),
        }
    }
}

impl Request {
    pub fn parse(line: &str) -> std::result::Result<Request, RequestError> {
        let mut tokens = line.split(' ');
        let verb = tokens.next().unwrap_or_default();
        let malformed = || RequestError::Malformed(line.to_string());
        match verb {
            keyword::PUSH | keyword::PULL => {
                let name_len = parse_len(tokens.next()).ok_or_else(malformed)?;
                if tokens.next().is_some() {
                    return Err(malformed());
                }
                if verb == keyword::PUSH {
                    Ok(Request::Push { name_len })
                } else {
                    Ok(Request::Pull { name_len })
                }
            }
            keyword::LIST if line == keyword::LIST => Ok(Request::List),
            keyword::LIST => Err(malformed()),
            _ => Err(RequestError::Unknown(line.to_string())),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Push { name_len } => write!(f, "{} {}", keyword::PUSH, name_len),
            Request::Pull { name_len } => write!(f, "{} {}", keyword::PULL, name_len),
            Request::List => f.write_str(keyword::LIST),
        }
    }
}

/// Server responses outside the entry stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Found,
    Done,
    Count(u64),
    World { name_len: u64 },
    Err(String),
}

impl Reply {
    pub fn parse(line: &str) -> Result<Reply> {
        if let Some(reason) = line.strip_prefix("ERR ") {
            if reason.is_empty() {
                return Err(SyncError::protocol("ERR without a reason"));
            }
            return Ok(Reply::Err(reason.to_string()));
        }
        let unexpected = || SyncError::protocol(format!("unexpected response: {line:?}"));
        let mut tokens = line.split(' ');
        let verb = tokens.next().unwrap_or_default();
        let reply = match verb {
            keyword::OK => Reply::Ok,
            keyword::FOUND => Reply::Found,
            keyword::DONE => Reply::Done,
            keyword::COUNT => Reply::Count(
                tokens.next().and_then(parse_number).ok_or_else(unexpected)?,
            ),
            keyword::WORLD => Reply::World {
                name_len: tokens.next().and_then(parse_number).ok_or_else(unexpected)?,
            },
            _ => return Err(unexpected()),
        };
        if tokens.next().is_some() {
            return Err(unexpected());
        }
        Ok(reply)
    }

    /// Turn an `ERR` reply into the matching error; pass anything else through.
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Reply::Err(reason) => Err(SyncError::Remote(reason)),
            other => Ok(other),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => f.write_str(keyword::OK),
            Reply::Found => f.write_str(keyword::FOUND),
            Reply::Done => f.write_str(keyword::DONE),
            Reply::Count(n) => write!(f, "{} {}", keyword::COUNT, n),
            Reply::World { name_len } => write!(f, "{} {}", keyword::WORLD, name_len),
            Reply::Err(reason) => write!(f, "{} {}", keyword::ERR, reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn code(self) -> u8 {
        match self {
            EntryKind::File => entry_kind::FILE,
            EntryKind::Directory => entry_kind::DIRECTORY,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            c if c == entry_kind::FILE as u64 => Some(EntryKind::File),
            c if c == entry_kind::DIRECTORY as u64 => Some(EntryKind::Directory),
            _ => None,
        }
    }
}

/// `ENTRY <kind> <pathLen> <size>`: announces one entry of a tree stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub kind: EntryKind,
    pub path_len: u64,
    pub size: u64,
}

impl EntryHeader {
    pub fn directory(path_len: usize) -> Self {
        Self {
            kind: EntryKind::Directory,
            path_len: path_len as u64,
            size: 0,
        }
    }

    pub fn file(path_len: usize, size: u64) -> Self {
        Self {
            kind: EntryKind::File,
            path_len: path_len as u64,
            size,
        }
    }

    pub fn parse(line: &str) -> Result<EntryHeader> {
        let bad = || SyncError::protocol(format!("malformed entry line: {line:?}"));
        let mut tokens = line.split(' ');
        if tokens.next() != Some(keyword::ENTRY) {
            return Err(bad());
        }
        let code = tokens.next().and_then(parse_number).ok_or_else(bad)?;
        let path_len = tokens.next().and_then(parse_number).ok_or_else(bad)?;
        let size = tokens.next().and_then(parse_number).ok_or_else(bad)?;
        if tokens.next().is_some() {
            return Err(bad());
        }
        let kind = EntryKind::from_code(code)
            .ok_or_else(|| SyncError::protocol(format!("unknown entry kind {code}")))?;
        if kind == EntryKind::Directory && size != 0 {
            return Err(SyncError::protocol(format!(
                "directory entry with non-zero size {size}"
            )));
        }
        Ok(EntryHeader {
            kind,
            path_len,
            size,
        })
    }
}

impl fmt::Display for EntryHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            keyword::ENTRY,
            self.kind.code(),
            self.path_len,
            self.size
        )
    }
}

/// Encode a path relative to the tree root as `/`-separated wire bytes.
pub fn relative_to_wire(rel: &Path) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for component in rel.components() {
        let part = match component {
            Component::Normal(s) => s,
            Component::CurDir => continue,
            other => {
                return Err(SyncError::UnsafePath(format!(
                    "{}: unexpected component {:?}",
                    rel.display(),
                    other
                )))
            }
        };
        if !out.is_empty() {
            out.push(b'/');
        }
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt;
            out.extend_from_slice(part.as_bytes());
        }
        #[cfg(not(unix))]
        {
            let s = part.to_str().ok_or_else(|| {
                SyncError::io(
                    format!("{}", rel.display()),
                    std::io::Error::new(ErrorKind::InvalidData, "path is not valid UTF-8"),
                )
            })?;
            out.extend_from_slice(s.as_bytes());
        }
    }
    Ok(out)
}

/// Resolve wire path bytes from a peer to a location under `root`.
///
/// Rejects absolute paths, `..` segments, NUL bytes, paths that reduce to
/// nothing, and any existing symlink along the way. Missing components are
/// fine; the caller creates them.
pub fn resolve_under(root: &Path, raw: &[u8]) -> Result<PathBuf> {
    let shown = || String::from_utf8_lossy(raw).into_owned();
    if raw.contains(&0) || raw.first() == Some(&b'/') {
        return Err(SyncError::UnsafePath(shown()));
    }

    let mut safe = PathBuf::new();
    for segment in raw.split(|b| *b == b'/') {
        match segment {
            b"" | b"." => continue,
            b".." => return Err(SyncError::UnsafePath(shown())),
            _ => {}
        }
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt;
            safe.push(std::ffi::OsStr::from_bytes(segment));
        }
        #[cfg(not(unix))]
        {
            let s = std::str::from_utf8(segment).map_err(|_| SyncError::UnsafePath(shown()))?;
            // Backslash is a separator here, ':' opens an alternate data stream
            if s.contains(['\\', ':']) {
                return Err(SyncError::UnsafePath(shown()));
            }
            safe.push(s);
        }
    }
    if safe.as_os_str().is_empty() {
        return Err(SyncError::UnsafePath(shown()));
    }

    let mut probe = root.to_path_buf();
    for component in safe.components() {
        probe.push(component);
        match std::fs::symlink_metadata(&probe) {
            Ok(md) if md.file_type().is_symlink() => {
                return Err(SyncError::UnsafePath(shown()));
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => break,
            Err(e) => {
                return Err(SyncError::io(format!("failed to inspect {}", probe.display()), e))
            }
        }
    }

    Ok(root.join(safe))
}

/// Create `path` as a directory. Succeeds if a directory is already there.
pub fn ensure_directory(path: &Path) -> Result<()> {
    match std::fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let md = std::fs::metadata(path)
                .map_err(|e| SyncError::io(format!("failed to stat {}", path.display()), e))?;
            if md.is_dir() {
                Ok(())
            } else {
                Err(SyncError::NotADirectory(path.to_path_buf()))
            }
        }
        Err(e) => Err(SyncError::io(
            format!("failed to create directory {}", path.display()),
            e,
        )),
    }
}

/// Create parent directories of `path` as needed
pub fn ensure_parent_exists(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            SyncError::io(format!("failed to create directory {}", parent.display()), e)
        })?;
    }
    Ok(())
}
