//! Tree materializer: rebuilds an entry stream under a target directory.
//!
//! The peer is untrusted. Every path is re-validated here regardless of what
//! the sender claims, lengths are bounded before anything is allocated, and
//! the first bad entry aborts the whole transfer.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use super::TreeStats;
use crate::error::{Result, SyncError};
use crate::framing::Connection;
use crate::protocol::{keyword, CHUNK_SIZE, PATH_MAX};
use crate::protocol_core::{
    ensure_directory, ensure_parent_exists, resolve_under, EntryHeader, EntryKind,
};

/// Consume entries until a line reading exactly `END`, writing them under
/// `target`, which must already exist.
pub fn receive_tree<S: Read + Write>(
    conn: &mut Connection<S>,
    target: &Path,
) -> Result<TreeStats> {
    let mut stats = TreeStats::default();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let line = conn.recv_control_line()?;
        if line == keyword::END {
            return Ok(stats);
        }
        let header = EntryHeader::parse(&line)?;
        if header.path_len == 0 || header.path_len >= PATH_MAX as u64 {
            return Err(SyncError::NameTooLong(header.path_len));
        }
        let raw = conn.recv_exact(header.path_len as usize)?;
        let dest = resolve_under(target, &raw)?;

        match header.kind {
            EntryKind::Directory => {
                ensure_directory(&dest)?;
                stats.directories += 1;
            }
            EntryKind::File => {
                receive_file(conn, &dest, header.size, &mut buf)?;
                stats.files += 1;
                stats.bytes += header.size;
            }
        }
    }
}

fn receive_file<S: Read + Write>(
    conn: &mut Connection<S>,
    dest: &Path,
    size: u64,
    buf: &mut [u8],
) -> Result<()> {
    ensure_parent_exists(dest)?;
    let mut file = File::create(dest)
        .map_err(|e| SyncError::io(format!("failed to create {}", dest.display()), e))?;
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(buf.len() as u64) as usize;
        conn.recv_exact_into(&mut buf[..n])?;
        file.write_all(&buf[..n])
            .map_err(|e| SyncError::io(format!("failed to write {}", dest.display()), e))?;
        remaining -= n as u64;
    }
    Ok(())
}
