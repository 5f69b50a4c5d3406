//! Tree serializer: walks a directory and emits its entry stream.
//!
//! Pre-order, so a directory is always announced before anything inside it.
//! Sibling order is the directory listing's order; it is not sorted and may
//! differ between runs. Symlinks and special files are skipped.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use walkdir::WalkDir;

use super::TreeStats;
use crate::error::{Result, SyncError};
use crate::framing::Connection;
use crate::protocol::{CHUNK_SIZE, PATH_MAX};
use crate::protocol_core::{relative_to_wire, EntryHeader};

/// Stream every directory and regular file under `root`. Does not send the
/// closing `END`; the caller owns the stream framing around the entries.
pub fn send_tree<S: Read + Write>(conn: &mut Connection<S>, root: &Path) -> Result<TreeStats> {
    let mut stats = TreeStats::default();
    let mut buf = vec![0u8; CHUNK_SIZE];

    // walkdir keeps its own stack of open directories, so depth costs no
    // call stack here
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let at = e
                .path()
                .unwrap_or(root)
                .display()
                .to_string();
            SyncError::io(format!("failed to walk {at}"), e.into())
        })?;
        let file_type = entry.file_type();
        if !file_type.is_dir() && !file_type.is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| SyncError::UnsafePath(entry.path().display().to_string()))?;
        let wire = relative_to_wire(rel)?;
        if wire.is_empty() || wire.len() >= PATH_MAX {
            return Err(SyncError::NameTooLong(wire.len() as u64));
        }

        if file_type.is_dir() {
            conn.send_line(format_args!("{}", EntryHeader::directory(wire.len())))?;
            conn.send_exact(&wire)?;
            stats.directories += 1;
        } else {
            stats.bytes += send_file(conn, entry.path(), &wire, &mut buf)?;
            stats.files += 1;
        }
    }
    Ok(stats)
}

fn send_file<S: Read + Write>(
    conn: &mut Connection<S>,
    path: &Path,
    wire: &[u8],
    buf: &mut [u8],
) -> Result<u64> {
    let mut file = File::open(path)
        .map_err(|e| SyncError::io(format!("failed to open {}", path.display()), e))?;
    let size = file
        .metadata()
        .map_err(|e| SyncError::io(format!("failed to stat {}", path.display()), e))?
        .len();

    conn.send_line(format_args!("{}", EntryHeader::file(wire.len(), size)))?;
    conn.send_exact(wire)?;

    // Exactly `size` bytes go out: growth past it is ignored, shrinkage is fatal
    let mut remaining = size;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match file.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(SyncError::io(
                    format!("failed to read {}", path.display()),
                    std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "file shrank during transfer",
                    ),
                ))
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(SyncError::io(format!("failed to read {}", path.display()), e))
            }
        };
        conn.send_exact(&buf[..n])?;
        remaining -= n as u64;
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::mock::MemoryStream;
    use crate::protocol_core::EntryKind;
    use std::fs;
    use tempfile::TempDir;

    /// Decode a serialized stream into (kind, path, body) triples.
    fn decode(wire: Vec<u8>) -> Vec<(EntryKind, String, Vec<u8>)> {
        let total = wire.len();
        let mut conn = Connection::new(MemoryStream::new(wire));
        let mut out = Vec::new();
        let mut consumed = 0usize;
        while consumed < total {
            let line = conn.recv_control_line().unwrap();
            let header = EntryHeader::parse(&line).unwrap();
            let path = conn.recv_exact(header.path_len as usize).unwrap();
            let body = conn.recv_exact(header.size as usize).unwrap();
            consumed += line.len() + 1 + path.len() + body.len();
            out.push((header.kind, String::from_utf8(path).unwrap(), body));
        }
        out
    }

    #[test]
    fn test_emits_directories_before_contents() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("region/deep")).unwrap();
        fs::write(root.join("level.dat"), vec![7u8; 100]).unwrap();
        fs::write(root.join("region/r.0.0.mca"), vec![1u8; 5000]).unwrap();
        fs::write(root.join("region/deep/x"), b"").unwrap();
        fs::create_dir(root.join("empty")).unwrap();

        let mut conn = Connection::new(MemoryStream::new(Vec::new()));
        let stats = send_tree(&mut conn, root).unwrap();
        assert_eq!(
            stats,
            TreeStats {
                files: 3,
                directories: 3,
                bytes: 5100
            }
        );

        let entries = decode(conn.into_inner().output);
        assert_eq!(entries.len(), 6);
        let position = |p: &str| entries.iter().position(|e| e.1 == p).unwrap();
        assert!(position("region") < position("region/r.0.0.mca"));
        assert!(position("region") < position("region/deep"));
        assert!(position("region/deep") < position("region/deep/x"));

        let level = &entries[position("level.dat")];
        assert_eq!(level.0, EntryKind::File);
        assert_eq!(level.2, vec![7u8; 100]);
        assert_eq!(entries[position("empty")].0, EntryKind::Directory);
        assert!(entries[position("empty")].2.is_empty());
    }

    #[test]
    fn test_large_file_spans_chunks() {
        let tmp = TempDir::new().unwrap();
        let body: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        fs::write(tmp.path().join("big.bin"), &body).unwrap();

        let mut conn = Connection::new(MemoryStream::new(Vec::new()));
        send_tree(&mut conn, tmp.path()).unwrap();
        let entries = decode(conn.into_inner().output);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].2, body);
    }

    #[test]
    fn test_empty_root_sends_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut conn = Connection::new(MemoryStream::new(Vec::new()));
        assert_eq!(send_tree(&mut conn, tmp.path()).unwrap(), TreeStats::default());
        assert!(conn.into_inner().output.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_skips_symlinks() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("real"), b"data").unwrap();
        fs::create_dir(root.join("dir")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("link")).unwrap();
        std::os::unix::fs::symlink(root.join("dir"), root.join("dirlink")).unwrap();

        let mut conn = Connection::new(MemoryStream::new(Vec::new()));
        send_tree(&mut conn, root).unwrap();
        let mut paths: Vec<String> = decode(conn.into_inner().output)
            .into_iter()
            .map(|e| e.1)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["dir".to_string(), "real".to_string()]);
    }

    #[test]
    fn test_missing_root_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let mut conn = Connection::new(MemoryStream::new(Vec::new()));
        assert!(matches!(
            send_tree(&mut conn, &tmp.path().join("missing")),
            Err(SyncError::Io { .. })
        ));
    }

    #[test]
    fn test_peer_gone_mid_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("big.bin"), vec![0u8; CHUNK_SIZE * 2]).unwrap();

        let mut stream = MemoryStream::new(Vec::new());
        stream.write_limit = Some(1000);
        let mut conn = Connection::new(stream);
        assert!(send_tree(&mut conn, tmp.path())
            .unwrap_err()
            .is_connection_error());
    }
}
