//! Exact-length and line-oriented I/O over a connected byte stream.
//!
//! Every directive runs to completion before the next one starts. Reads go
//! through a single buffer owned by the connection, so a line read never
//! swallows payload bytes that follow it.

use std::fmt;
use std::io::{self, BufReader, ErrorKind, Read, Write};

use crate::error::{ErrorReason, Result, SyncError};
use crate::protocol::{keyword, MAX_LINE};

pub struct Connection<S: Read + Write> {
    stream: BufReader<S>,
}

impl<S: Read + Write> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::with_capacity(MAX_LINE * 8, stream),
        }
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    /// Write all of `bytes`. `write_all` already retries on `Interrupted`.
    pub fn send_exact(&mut self, bytes: &[u8]) -> Result<()> {
        let out = self.stream.get_mut();
        out.write_all(bytes).map_err(SyncError::Connection)?;
        out.flush().map_err(SyncError::Connection)
    }

    pub fn recv_exact_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.stream.read_exact(buf).map_err(SyncError::Connection)
    }

    /// Caller bounds `len` before calling; this allocates it up front.
    pub fn recv_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.recv_exact_into(&mut buf)?;
        Ok(buf)
    }

    /// Read up to a `\n` (stripped). At most `max_len - 1` bytes are consumed
    /// looking for it.
    pub fn recv_line(&mut self, max_len: usize) -> Result<String> {
        let mut line = Vec::new();
        while line.len() + 1 < max_len {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => {
                    return Err(SyncError::Connection(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "peer closed connection before end of line",
                    )))
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SyncError::Connection(e)),
            }
            if byte[0] == b'\n' {
                return String::from_utf8(line)
                    .map_err(|_| SyncError::protocol("control line is not UTF-8"));
            }
            line.push(byte[0]);
        }
        Err(SyncError::LineTooLong { limit: max_len })
    }

    /// `recv_line` with the protocol-wide limit.
    pub fn recv_control_line(&mut self) -> Result<String> {
        self.recv_line(MAX_LINE)
    }

    /// Format one control line, append the terminator and send it. The whole
    /// line must stay below `MAX_LINE`.
    pub fn send_line(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        let mut text = fmt::format(args);
        if text.contains('\n') {
            return Err(SyncError::protocol("control line contains a newline"));
        }
        text.push('\n');
        if text.len() >= MAX_LINE {
            return Err(SyncError::MessageTooLarge {
                len: text.len(),
                limit: MAX_LINE,
            });
        }
        self.send_exact(text.as_bytes())
    }

    pub fn send_error(&mut self, reason: ErrorReason) -> Result<()> {
        self.send_line(format_args!("{} {}", keyword::ERR, reason))
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MemoryStream;
    use super::*;

    #[test]
    fn test_recv_line_strips_terminator() {
        let mut conn = Connection::new(MemoryStream::new(b"LIST\nDONE\n".to_vec()));
        assert_eq!(conn.recv_control_line().unwrap(), "LIST");
        assert_eq!(conn.recv_control_line().unwrap(), "DONE");
        assert!(conn.recv_control_line().unwrap_err().is_connection_error());
    }

    #[test]
    fn test_recv_line_then_raw_payload() {
        let mut conn = Connection::new(MemoryStream::new(b"PUSH 7\nmyworldEND\n".to_vec()));
        assert_eq!(conn.recv_control_line().unwrap(), "PUSH 7");
        assert_eq!(conn.recv_exact(7).unwrap(), b"myworld");
        assert_eq!(conn.recv_control_line().unwrap(), "END");
    }

    #[test]
    fn test_recv_line_limit() {
        // 9 bytes of text + terminator needs a limit of 11
        let mut conn = Connection::new(MemoryStream::new(b"123456789\n".to_vec()));
        assert_eq!(conn.recv_line(11).unwrap(), "123456789");

        let mut conn = Connection::new(MemoryStream::new(b"123456789\n".to_vec()));
        assert!(matches!(
            conn.recv_line(10),
            Err(SyncError::LineTooLong { limit: 10 })
        ));
    }

    #[test]
    fn test_recv_line_premature_close() {
        let mut conn = Connection::new(MemoryStream::new(b"PUS".to_vec()));
        assert!(conn.recv_control_line().unwrap_err().is_connection_error());
    }

    #[test]
    fn test_recv_line_rejects_non_utf8() {
        let mut conn = Connection::new(MemoryStream::new(b"\xff\xfe\n".to_vec()));
        assert!(matches!(
            conn.recv_control_line(),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn test_recv_exact_premature_close() {
        let mut conn = Connection::new(MemoryStream::new(b"abc".to_vec()));
        assert!(conn.recv_exact(4).unwrap_err().is_connection_error());
    }

    #[test]
    fn test_send_line_bounds() {
        let mut conn = Connection::new(MemoryStream::new(Vec::new()));
        conn.send_line(format_args!("COUNT {}", 3)).unwrap();

        let longest = "x".repeat(MAX_LINE - 2);
        conn.send_line(format_args!("{longest}")).unwrap();

        let too_long = "x".repeat(MAX_LINE - 1);
        assert!(matches!(
            conn.send_line(format_args!("{too_long}")),
            Err(SyncError::MessageTooLarge { .. })
        ));
        assert!(matches!(
            conn.send_line(format_args!("OK\nDONE")),
            Err(SyncError::Protocol(_))
        ));

        let out = conn.into_inner().output;
        assert_eq!(out.len(), "COUNT 3\n".len() + MAX_LINE - 1);
        assert!(out.starts_with(b"COUNT 3\n"));
    }

    #[test]
    fn test_longest_sent_line_is_received() {
        let text = "y".repeat(MAX_LINE - 2);
        let mut tx = Connection::new(MemoryStream::new(Vec::new()));
        tx.send_line(format_args!("{text}")).unwrap();
        let wire = tx.into_inner().output;

        let mut rx = Connection::new(MemoryStream::new(wire));
        assert_eq!(rx.recv_control_line().unwrap(), text);
    }

    #[test]
    fn test_send_exact_peer_gone() {
        let mut stream = MemoryStream::new(Vec::new());
        stream.write_limit = Some(4);
        let mut conn = Connection::new(stream);
        assert!(conn.send_exact(b"0123456789").unwrap_err().is_connection_error());
    }

    #[test]
    fn test_send_error_line() {
        let mut conn = Connection::new(MemoryStream::new(Vec::new()));
        conn.send_error(ErrorReason::NotFound).unwrap();
        assert_eq!(conn.into_inner().output, b"ERR NotFound\n");
    }
}
