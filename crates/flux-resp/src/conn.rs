//! Per-connection state and command dispatch.
//!
//! `feed` ports `data()` from the C original: it accumulates bytes into the
//! connection's packet buffer only when a previous read ended mid-command,
//! parses as many complete commands as the bytes allow, and special-cases
//! `quit` before handing anything else to the embedder's command callback.

use std::net::SocketAddr;
use std::os::unix::io::RawFd;

use crate::buf::Buf;
use crate::parser::{self, ParseOutcome};
use crate::reply;

/// A live connection, passed to embedder callbacks. `U` is whatever opaque
/// state the embedder wants to hang off a connection (the Rust analogue of
/// the C API's `void* udata`).
pub struct Conn<U> {
    pub(crate) fd: RawFd,
    peer: SocketAddr,
    write_buf: Buf,
    packet_buf: Buf,
    pub(crate) closed: bool,
    pub(crate) write_interest_armed: bool,
    pub(crate) faulty: bool,
    udata: Option<U>,
}

impl<U> Conn<U> {
    pub(crate) fn new(fd: RawFd, peer: SocketAddr) -> Self {
        Self {
            fd,
            peer,
            write_buf: Buf::new(),
            packet_buf: Buf::new(),
            closed: false,
            write_interest_armed: false,
            faulty: false,
            udata: None,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn udata(&self) -> Option<&U> {
        self.udata.as_ref()
    }

    pub fn udata_mut(&mut self) -> Option<&mut U> {
        self.udata.as_mut()
    }

    pub fn set_udata(&mut self, udata: U) {
        self.udata = Some(udata);
    }

    /// Latches the connection closed. Queued writes are still flushed by
    /// the reactor; reads stop on the next loop pass.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn pending_write(&self) -> &[u8] {
        self.write_buf.as_slice()
    }

    pub(crate) fn advance_write(&mut self, n: usize) {
        self.write_buf.drain_front(n);
        if self.write_buf.is_empty() {
            self.write_buf.clear_or_release();
        }
    }

    pub(crate) fn has_pending_write(&self) -> bool {
        !self.write_buf.is_empty()
    }

    fn write_via(&mut self, f: impl FnOnce(&mut Buf) -> bool) {
        if self.closed {
            return;
        }
        if !f(&mut self.write_buf) {
            self.faulty = true;
            self.closed = true;
        }
    }

    pub fn write_status(&mut self, s: &str) {
        self.write_via(|b| reply::write_status(b, s));
    }

    pub fn write_error(&mut self, s: &str) {
        self.write_via(|b| reply::write_error(b, s));
    }

    pub fn write_int(&mut self, value: i64) {
        self.write_via(|b| reply::write_int(b, value));
    }

    pub fn write_uint(&mut self, value: u64) {
        self.write_via(|b| reply::write_uint(b, value));
    }

    pub fn write_null(&mut self) {
        self.write_via(reply::write_null);
    }

    pub fn write_bulk(&mut self, data: Option<&[u8]>) {
        self.write_via(|b| reply::write_bulk(b, data));
    }

    pub fn write_array(&mut self, count: i64) {
        self.write_via(|b| reply::write_array(b, count));
    }

    pub fn write_raw(&mut self, data: &[u8]) {
        self.write_via(|b| reply::write_raw(b, data));
    }
}

pub(crate) enum FeedOutcome {
    Open,
    Close,
}

enum DriveResult<'a> {
    Closed,
    Remaining(&'a [u8]),
}

fn is_quit(arg: &[u8]) -> bool {
    arg.eq_ignore_ascii_case(b"quit")
}

fn drive<'a, U>(
    conn: &mut Conn<U>,
    mut data: &'a [u8],
    on_command: &mut impl FnMut(&mut Conn<U>, &[Vec<u8>]),
) -> DriveResult<'a> {
    while !data.is_empty() && !conn.closed {
        match parser::parse_command(data) {
            ParseOutcome::NeedMoreData => break,
            ParseOutcome::ProtocolError { message } => {
                conn.write_error(&message);
                conn.closed = true;
                break;
            }
            ParseOutcome::Complete { consumed, args } => {
                data = &data[consumed..];
                if !args.is_empty() {
                    if is_quit(&args[0]) {
                        conn.write_status("OK");
                        conn.closed = true;
                        break;
                    }
                    on_command(conn, &args);
                }
            }
        }
    }
    if conn.closed { DriveResult::Closed } else { DriveResult::Remaining(data) }
}

/// Feeds newly-read bytes through the parser and dispatches completed
/// commands. Returns whether the connection should stay open.
pub(crate) fn feed<U>(
    conn: &mut Conn<U>,
    incoming: &[u8],
    mut on_command: impl FnMut(&mut Conn<U>, &[Vec<u8>]),
) -> FeedOutcome {
    let result = if conn.packet_buf.is_empty() {
        drive(conn, incoming, &mut on_command)
    } else {
        conn.packet_buf.extend_from_slice(incoming);
        let mut staged = std::mem::take(&mut conn.packet_buf);
        let staged_len = staged.len();
        let outcome = drive(conn, staged.as_slice(), &mut on_command);
        match outcome {
            DriveResult::Closed => return FeedOutcome::Close,
            DriveResult::Remaining(rest) => {
                if rest.is_empty() {
                    staged.clear_or_release();
                } else {
                    staged.drain_front(staged_len - rest.len());
                }
                conn.packet_buf = staged;
                return if conn.closed { FeedOutcome::Close } else { FeedOutcome::Open };
            }
        }
    };

    match result {
        DriveResult::Closed => FeedOutcome::Close,
        DriveResult::Remaining(rest) => {
            if !rest.is_empty() {
                conn.packet_buf.extend_from_slice(rest);
            }
            FeedOutcome::Open
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn new_conn() -> Conn<()> {
        Conn::new(0, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6380))
    }

    #[test]
    fn dispatches_one_resp_command() {
        let mut conn = new_conn();
        let mut seen = Vec::new();
        let outcome = feed(&mut conn, b"*1\r\n$4\r\nPING\r\n", |_, args| {
            seen.push(args.to_vec());
        });
        assert!(matches!(outcome, FeedOutcome::Open));
        assert_eq!(seen, vec![vec![b"PING".to_vec()]]);
    }

    #[test]
    fn fragmented_command_is_buffered_until_complete() {
        let mut conn = new_conn();
        let mut seen = 0;
        let whole = b"*1\r\n$4\r\nPING\r\n";
        let outcome1 = feed(&mut conn, &whole[..8], |_, _| seen += 1);
        assert!(matches!(outcome1, FeedOutcome::Open));
        assert_eq!(seen, 0);
        let outcome2 = feed(&mut conn, &whole[8..], |_, _| seen += 1);
        assert!(matches!(outcome2, FeedOutcome::Open));
        assert_eq!(seen, 1);
    }

    #[test]
    fn quit_replies_ok_and_closes() {
        let mut conn = new_conn();
        let outcome = feed(&mut conn, b"quit\r\n", |_, _| panic!("command should not fire"));
        assert!(matches!(outcome, FeedOutcome::Close));
        assert_eq!(conn.pending_write(), b"+OK\r\n");
    }

    #[test]
    fn protocol_error_writes_error_and_closes() {
        let mut conn = new_conn();
        let outcome = feed(&mut conn, b"*-5\r\n", |_, _| panic!("command should not fire"));
        assert!(matches!(outcome, FeedOutcome::Close));
        assert_eq!(conn.pending_write(), b"-ERR Protocol error: invalid multibulk length\r\n");
    }

    #[test]
    fn multiple_commands_in_one_read_all_dispatch() {
        let mut conn = new_conn();
        let mut seen = Vec::new();
        feed(&mut conn, b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n", |_, args| {
            seen.push(args.to_vec());
        });
        assert_eq!(seen.len(), 2);
    }
}
