//! Command-level protocol engine for the worldsync daemon and client.
//!
//! One connection carries exactly one command. The daemon accepts, runs the
//! command to completion, closes, and only then accepts again.

use std::io::{Read, Write};

use crate::error::{Result, SyncError};
use crate::framing::Connection;
use crate::protocol::keyword;
use crate::protocol_core::Reply;

fn send_reply<S: Read + Write>(conn: &mut Connection<S>, reply: &Reply) -> Result<()> {
    conn.send_line(format_args!("{reply}"))
}

fn send_end<S: Read + Write>(conn: &mut Connection<S>) -> Result<()> {
    conn.send_line(format_args!("{}", keyword::END))
}

pub mod server {
    use super::*;
    use crate::error::ErrorReason;
    use crate::logger::Logger;
    use crate::protocol::{timeouts::ACCEPT_POLL_MS, PATH_MAX};
    use crate::protocol_core::Request;
    use crate::storage::Storage;
    use crate::tree::{receive_tree, send_tree};
    use crate::world::WorldName;
    use std::io::ErrorKind;
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Process-wide stop request. The accept loop checks it between
    /// connections only; a transfer in progress always runs to completion.
    #[derive(Clone, Debug, Default)]
    pub struct Shutdown(Arc<AtomicBool>);

    impl Shutdown {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn trigger(&self) {
            self.0.store(true, Ordering::SeqCst);
        }

        pub fn is_triggered(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct ServerSettings {
        /// Read/write timeout on accepted sockets. `None` blocks forever.
        pub io_timeout: Option<Duration>,
    }

    /// How a command ended when no I/O error cut it short.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Outcome {
        Completed,
        Rejected(ErrorReason),
    }

    pub fn serve(
        bind: &str,
        storage: &Storage,
        logger: &dyn Logger,
        settings: &ServerSettings,
        shutdown: &Shutdown,
    ) -> Result<()> {
        let listener =
            TcpListener::bind(bind).map_err(|e| SyncError::io(format!("bind {bind}"), e))?;
        serve_listener(listener, storage, logger, settings, shutdown)
    }

    pub fn serve_listener(
        listener: TcpListener,
        storage: &Storage,
        logger: &dyn Logger,
        settings: &ServerSettings,
        shutdown: &Shutdown,
    ) -> Result<()> {
        // Non-blocking accept so the shutdown flag is seen while idle
        listener
            .set_nonblocking(true)
            .map_err(|e| SyncError::io("configure listener", e))?;
        let addr = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        logger.listening(&addr, storage.root());

        while !shutdown.is_triggered() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    let peer = peer.to_string();
                    logger.connection(&peer);
                    if let Err(e) = tune_socket(&stream, settings) {
                        logger.error(&format!("socket setup peer={peer}"), &e.to_string());
                        continue;
                    }
                    let mut conn = Connection::new(stream);
                    if let Err(e) = handle_conn(&mut conn, storage, logger, &peer) {
                        logger.error(&format!("connection peer={peer}"), &e.to_string());
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(ACCEPT_POLL_MS));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    logger.error("accept", &e.to_string());
                    thread::sleep(Duration::from_millis(ACCEPT_POLL_MS));
                }
            }
        }
        logger.shutdown();
        Ok(())
    }

    fn tune_socket(stream: &TcpStream, settings: &ServerSettings) -> std::io::Result<()> {
        // Accepted sockets may inherit the listener's non-blocking mode
        stream.set_nonblocking(false)?;
        let _ = stream.set_nodelay(true);
        stream.set_read_timeout(settings.io_timeout)?;
        stream.set_write_timeout(settings.io_timeout)?;
        Ok(())
    }

    /// Run the single command carried by `conn`.
    pub fn handle_conn<S: Read + Write>(
        conn: &mut Connection<S>,
        storage: &Storage,
        logger: &dyn Logger,
        peer: &str,
    ) -> Result<Outcome> {
        let line = match conn.recv_control_line() {
            Ok(line) => line,
            Err(e @ (SyncError::LineTooLong { .. } | SyncError::Protocol(_))) => {
                return Ok(reject(conn, logger, peer, ErrorReason::InvalidCommand, &e));
            }
            Err(e) => return Err(e),
        };
        match Request::parse(&line) {
            Ok(Request::Push { name_len }) => handle_push(conn, storage, logger, peer, name_len),
            Ok(Request::Pull { name_len }) => handle_pull(conn, storage, logger, peer, name_len),
            Ok(Request::List) => handle_list(conn, storage, logger, peer),
            Err(e) => Ok(reject(conn, logger, peer, e.reason(), &e)),
        }
    }

    /// Best-effort `ERR` to the peer; the connection closes right after.
    fn reject<S: Read + Write>(
        conn: &mut Connection<S>,
        logger: &dyn Logger,
        peer: &str,
        reason: ErrorReason,
        detail: &dyn std::fmt::Display,
    ) -> Outcome {
        logger.rejected(peer, reason, &detail.to_string());
        let _ = conn.send_error(reason);
        Outcome::Rejected(reason)
    }

    /// Read and validate a world name, bounding its length before reading.
    fn read_world_name<S: Read + Write>(
        conn: &mut Connection<S>,
        logger: &dyn Logger,
        peer: &str,
        name_len: usize,
    ) -> Result<std::result::Result<WorldName, Outcome>> {
        if name_len == 0 || name_len >= PATH_MAX {
            let detail = format!("name length {name_len}");
            return Ok(Err(reject(conn, logger, peer, ErrorReason::InvalidName, &detail)));
        }
        let raw = conn.recv_exact(name_len)?;
        match WorldName::from_wire(&raw) {
            Ok(name) => Ok(Ok(name)),
            Err(e) => Ok(Err(reject(conn, logger, peer, ErrorReason::InvalidName, &e))),
        }
    }

    fn handle_push<S: Read + Write>(
        conn: &mut Connection<S>,
        storage: &Storage,
        logger: &dyn Logger,
        peer: &str,
        name_len: usize,
    ) -> Result<Outcome> {
        let name = match read_world_name(conn, logger, peer, name_len)? {
            Ok(name) => name,
            Err(outcome) => return Ok(outcome),
        };

        // Staging exists before OK, so a server that cannot store the upload
        // says so instead of letting the client stream into a dead end
        let staging = match storage.stage(&name) {
            Ok(staging) => staging,
            Err(e) => return Ok(reject(conn, logger, peer, ErrorReason::ServerError, &e)),
        };
        if let Err(e) = send_reply(conn, &Reply::Ok) {
            storage.discard(staging);
            return Err(e);
        }

        let stats = match receive_tree(conn, staging.path()) {
            Ok(stats) => stats,
            Err(e) => {
                storage.discard(staging);
                return Ok(reject(conn, logger, peer, ErrorReason::ReceiveFailed, &e));
            }
        };
        if let Err(e) = storage.commit(staging) {
            return Ok(reject(conn, logger, peer, ErrorReason::ServerError, &e));
        }
        logger.push_committed(&name, &stats);
        send_reply(conn, &Reply::Done)?;
        Ok(Outcome::Completed)
    }

    fn handle_pull<S: Read + Write>(
        conn: &mut Connection<S>,
        storage: &Storage,
        logger: &dyn Logger,
        peer: &str,
        name_len: usize,
    ) -> Result<Outcome> {
        let name = match read_world_name(conn, logger, peer, name_len)? {
            Ok(name) => name,
            Err(outcome) => return Ok(outcome),
        };
        let Some(path) = storage.locate(&name) else {
            let e = SyncError::NotFound(name.to_string());
            return Ok(reject(conn, logger, peer, ErrorReason::NotFound, &e));
        };

        send_reply(conn, &Reply::Found)?;
        // Past FOUND the peer is reading entries; failures just drop the
        // connection
        let stats = send_tree(conn, &path)?;
        send_end(conn)?;
        send_reply(conn, &Reply::Done)?;
        logger.pull_served(&name, &stats);
        Ok(Outcome::Completed)
    }

    fn handle_list<S: Read + Write>(
        conn: &mut Connection<S>,
        storage: &Storage,
        logger: &dyn Logger,
        peer: &str,
    ) -> Result<Outcome> {
        let worlds = match storage.list() {
            Ok(worlds) => worlds,
            Err(e) => return Ok(reject(conn, logger, peer, ErrorReason::ServerError, &e)),
        };
        send_reply(conn, &Reply::Count(worlds.len() as u64))?;
        for world in &worlds {
            send_reply(
                conn,
                &Reply::World {
                    name_len: world.len() as u64,
                },
            )?;
            conn.send_exact(world.as_bytes())?;
        }
        send_reply(conn, &Reply::Done)?;
        logger.list_served(worlds.len());
        Ok(Outcome::Completed)
    }
}

pub mod client {
    use super::*;
    use crate::protocol::PATH_MAX;
    use crate::protocol_core::{ensure_directory, Request};
    use crate::tree::{receive_tree, send_tree, TreeStats};
    use crate::world::WorldName;
    use std::net::TcpStream;
    use std::path::Path;

    pub fn connect(host: &str, port: u16) -> Result<Connection<TcpStream>> {
        let stream = TcpStream::connect((host, port)).map_err(SyncError::Connection)?;
        let _ = stream.set_nodelay(true);
        Ok(Connection::new(stream))
    }

    /// Upload `dir` as world `name`, replacing any stored version.
    pub fn push(host: &str, port: u16, dir: &Path, name: &WorldName) -> Result<TreeStats> {
        let md = std::fs::metadata(dir)
            .map_err(|e| SyncError::io(format!("world directory {}", dir.display()), e))?;
        if !md.is_dir() {
            return Err(SyncError::NotADirectory(dir.to_path_buf()));
        }
        let mut conn = connect(host, port)?;
        push_over(&mut conn, dir, name)
    }

    pub fn push_over<S: Read + Write>(
        conn: &mut Connection<S>,
        dir: &Path,
        name: &WorldName,
    ) -> Result<TreeStats> {
        conn.send_line(format_args!(
            "{}",
            Request::Push {
                name_len: name.len()
            }
        ))?;
        conn.send_exact(name.as_bytes())?;
        expect(conn, Reply::Ok)?;

        let stats = match send_entries(conn, dir) {
            Ok(stats) => stats,
            // The server may have aborted and said why before closing
            Err(e) if e.is_connection_error() => return Err(pending_error(conn).unwrap_or(e)),
            Err(e) => return Err(e),
        };
        expect(conn, Reply::Done)?;
        Ok(stats)
    }

    fn send_entries<S: Read + Write>(conn: &mut Connection<S>, dir: &Path) -> Result<TreeStats> {
        let stats = send_tree(conn, dir)?;
        send_end(conn)?;
        Ok(stats)
    }

    /// Download world `name` into `dest`, which is created if missing.
    pub fn pull(host: &str, port: u16, name: &WorldName, dest: &Path) -> Result<TreeStats> {
        std::fs::create_dir_all(dest)
            .map_err(|e| SyncError::io(format!("destination {}", dest.display()), e))?;
        ensure_directory(dest)?;
        let mut conn = connect(host, port)?;
        pull_over(&mut conn, name, dest)
    }

    pub fn pull_over<S: Read + Write>(
        conn: &mut Connection<S>,
        name: &WorldName,
        dest: &Path,
    ) -> Result<TreeStats> {
        conn.send_line(format_args!(
            "{}",
            Request::Pull {
                name_len: name.len()
            }
        ))?;
        conn.send_exact(name.as_bytes())?;
        expect(conn, Reply::Found)?;
        let stats = receive_tree(conn, dest)?;
        expect(conn, Reply::Done)?;
        Ok(stats)
    }

    pub fn list(host: &str, port: u16) -> Result<Vec<WorldName>> {
        let mut conn = connect(host, port)?;
        list_over(&mut conn)
    }

    pub fn list_over<S: Read + Write>(conn: &mut Connection<S>) -> Result<Vec<WorldName>> {
        conn.send_line(format_args!("{}", Request::List))?;
        let count = match read_reply(conn)? {
            Reply::Count(n) => n,
            other => return Err(unexpected(&other)),
        };

        // The count is untrusted; grow as names actually arrive
        let mut worlds = Vec::new();
        for _ in 0..count {
            let name_len = match read_reply(conn)? {
                Reply::World { name_len } => name_len,
                other => return Err(unexpected(&other)),
            };
            if name_len == 0 || name_len >= PATH_MAX as u64 {
                return Err(SyncError::protocol(format!("world name length {name_len}")));
            }
            let raw = conn.recv_exact(name_len as usize)?;
            let name = WorldName::from_wire(&raw)
                .map_err(|e| SyncError::protocol(format!("server listed {e}")))?;
            worlds.push(name);
        }
        expect(conn, Reply::Done)?;
        Ok(worlds)
    }

    /// Next reply, with `ERR` turned into `SyncError::Remote`.
    fn read_reply<S: Read + Write>(conn: &mut Connection<S>) -> Result<Reply> {
        let line = conn.recv_control_line()?;
        Reply::parse(&line)?.into_result()
    }

    fn expect<S: Read + Write>(conn: &mut Connection<S>, wanted: Reply) -> Result<()> {
        let reply = read_reply(conn)?;
        if reply == wanted {
            Ok(())
        } else {
            Err(unexpected(&reply))
        }
    }

    fn unexpected(reply: &Reply) -> SyncError {
        SyncError::protocol(format!("unexpected response: {reply}"))
    }

    fn pending_error<S: Read + Write>(conn: &mut Connection<S>) -> Option<SyncError> {
        match read_reply(conn) {
            Err(e @ SyncError::Remote(_)) => Some(e),
            _ => None,
        }
    }
}
