//! The readiness-driven event loop.
//!
//! Ported from `thread()`/`event_main` in `event.c`: one `mio::Poll` drives
//! every listener and connection, accepts and reads happen in one pass over
//! the reported events, a second pass re-flushes write backlogs and shrinks
//! buffers, and connections that faulted mid-callback are torn down only at
//! the top of the next iteration rather than out from under the code that
//! just faulted them.
//!
//! Connections are keyed directly by file descriptor — both in the
//! [`crate::HashMap`] that owns them and in the `mio::Token` handed to
//! `Poll`, since the descriptor is already a dense, collision-free handle
//! and a second generated id would just be one more thing to keep in sync.

use std::io::{ErrorKind, Read, Write};
use std::mem::size_of;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, warn};

use crate::addr;
use crate::callbacks::Callbacks;
use crate::conn::{self, Conn, FeedOutcome};
use crate::error::Error;
use crate::hashmap::HashMap;

/// Caps the readiness-wait timeout the way `EDELAYNS` caps `tick`'s delay.
const MAX_WAIT: Duration = Duration::from_secs(1);
const READ_CHUNK: usize = 4096;
const MIN_CONN_CAPACITY: usize = 16;

struct Entry<U> {
    stream: TcpStream,
    conn: Conn<U>,
}

fn set_keepalive(fd: RawFd) {
    unsafe {
        let on: libc::c_int = 1;
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            std::ptr::addr_of!(on).cast(),
            size_of::<libc::c_int>() as libc::socklen_t,
        );
        let idle: libc::c_int = 600;
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_KEEPIDLE,
            std::ptr::addr_of!(idle).cast(),
            size_of::<libc::c_int>() as libc::socklen_t,
        );
        let intvl: libc::c_int = 60;
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_KEEPINTVL,
            std::ptr::addr_of!(intvl).cast(),
            size_of::<libc::c_int>() as libc::socklen_t,
        );
        let probes: libc::c_int = 6;
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_KEEPCNT,
            std::ptr::addr_of!(probes).cast(),
            size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

fn mark_for_close<U>(fd: RawFd, conn: &mut Conn<U>, faulty: &mut Vec<RawFd>) {
    conn.closed = true;
    if !conn.faulty {
        conn.faulty = true;
        faulty.push(fd);
    }
}

/// Runs the reactor until a listener-level I/O error occurs. Accepting
/// connections, dispatching parsed commands, and flushing replies all
/// happen on this one thread; embedder callbacks must not block.
pub fn run<U>(addrs: &[String], callbacks: &mut Callbacks<U>) -> Result<(), Error> {
    let mut poll = Poll::new()?;
    let mut listeners: Vec<(RawFd, TcpListener)> = Vec::new();
    let mut bound: Vec<String> = Vec::new();

    for address in addrs {
        let sockaddrs = addr::resolve(address)?;
        for sockaddr in sockaddrs {
            let std_listener = std::net::TcpListener::bind(sockaddr)
                .map_err(|source| Error::Bind { address: address.clone(), source })?;
            std_listener.set_nonblocking(true)?;
            let mut listener = TcpListener::from_std(std_listener);
            let fd = listener.as_raw_fd();
            poll.registry().register(&mut listener, Token(fd as usize), Interest::READABLE)?;
            bound.push(format!("tcp://{sockaddr}"));
            listeners.push((fd, listener));
        }
    }

    if let Some(serving) = &mut callbacks.serving {
        serving(&bound);
    }

    let mut conns: HashMap<RawFd, Entry<U>> =
        HashMap::try_with_capacity(MIN_CONN_CAPACITY).map_err(|()| Error::Oom)?;
    let mut faulty: Vec<RawFd> = Vec::new();
    let mut mio_events = Events::with_capacity(128);
    let mut synced = false;

    loop {
        let timeout = if synced {
            callbacks.tick.as_mut().and_then(|tick| tick()).map(|d| d.min(MAX_WAIT))
        } else {
            Some(Duration::ZERO)
        };

        match poll.poll(&mut mio_events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }

        synced = callbacks.sync.as_mut().is_some_and(|sync| sync());

        if !faulty.is_empty() {
            drain_faulty(&mut poll, &mut conns, &mut faulty, callbacks);
            continue;
        }

        let is_listener = |fd: RawFd| listeners.iter().any(|(lfd, _)| *lfd == fd);

        for event in mio_events.iter() {
            let fd = event.token().0 as RawFd;
            if is_listener(fd) {
                if let Some((_, listener)) = listeners.iter_mut().find(|(lfd, _)| *lfd == fd) {
                    accept_all(listener, &mut poll, &mut conns, callbacks);
                }
                continue;
            }
            let Some(entry) = conns.get_mut(&fd) else { continue };
            if event.is_writable() {
                flush(&mut poll, fd, entry, &mut faulty);
            }
            if entry.conn.closed {
                continue;
            }
            if event.is_readable() {
                read_until_blocked(&mut poll, fd, entry, callbacks, &mut faulty);
            }
        }

        for event in mio_events.iter() {
            let fd = event.token().0 as RawFd;
            if is_listener(fd) {
                continue;
            }
            let Some(entry) = conns.get_mut(&fd) else { continue };
            flush(&mut poll, fd, entry, &mut faulty);
        }
    }
}

fn accept_all<U>(
    listener: &mut TcpListener,
    poll: &mut Poll,
    conns: &mut HashMap<RawFd, Entry<U>>,
    callbacks: &mut Callbacks<U>,
) {
    loop {
        let (mut stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(e) => {
                if let Some(error) = &mut callbacks.error {
                    error(&format!("accept: {e}"), false);
                }
                return;
            }
        };
        let fd = stream.as_raw_fd();
        set_keepalive(fd);
        if poll.registry().register(&mut stream, Token(fd as usize), Interest::READABLE).is_err() {
            continue;
        }
        let mut conn = Conn::new(fd, peer);
        if let Some(opened) = &mut callbacks.opened {
            opened(&mut conn);
        }
        let displaced = conns.set(fd, Entry { stream, conn });
        flux_utils::safe_assert!(displaced.is_none(), "duplicate fd {fd} accepted twice");
        if conns.oom() {
            warn!(%peer, "hash table allocation failed while accepting connection");
        }
    }
}

fn read_until_blocked<U>(
    poll: &mut Poll,
    fd: RawFd,
    entry: &mut Entry<U>,
    callbacks: &mut Callbacks<U>,
    faulty: &mut Vec<RawFd>,
) {
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        match entry.stream.read(&mut buffer) {
            Ok(0) => {
                entry.conn.closed = true;
                flush(poll, fd, entry, faulty);
                return;
            }
            Ok(n) => {
                let outcome = conn::feed(&mut entry.conn, &buffer[..n], |c, args| {
                    if let Some(command) = &mut callbacks.command {
                        command(c, args);
                    }
                });
                // Any reply queued by this batch of commands (including an
                // error or `quit`'s "OK") gets a chance to reach the wire
                // before a faulted or closed connection is torn down.
                flush(poll, fd, entry, faulty);
                if matches!(outcome, FeedOutcome::Close) || entry.conn.closed {
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(_) => {
                entry.conn.closed = true;
                flush(poll, fd, entry, faulty);
                return;
            }
        }
    }
}

/// Writes as much of the backlog as the socket accepts. Arms write-interest
/// ("wakes" the connection) if the kernel buffer is full, and disarms it
/// once the backlog is empty, mirroring `conn_flush`/`wake`/`unwake`.
fn flush<U>(poll: &mut Poll, fd: RawFd, entry: &mut Entry<U>, faulty: &mut Vec<RawFd>) {
    while entry.conn.has_pending_write() {
        match entry.stream.write(entry.conn.pending_write()) {
            Ok(0) => {
                mark_for_close(fd, &mut entry.conn, faulty);
                return;
            }
            Ok(n) => entry.conn.advance_write(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                arm_writable(poll, fd, entry, faulty);
                return;
            }
            Err(_) => {
                mark_for_close(fd, &mut entry.conn, faulty);
                return;
            }
        }
    }
    if entry.conn.closed {
        mark_for_close(fd, &mut entry.conn, faulty);
        return;
    }
    disarm_writable(poll, fd, entry, faulty);
}

fn arm_writable<U>(poll: &mut Poll, fd: RawFd, entry: &mut Entry<U>, faulty: &mut Vec<RawFd>) {
    if entry.conn.write_interest_armed {
        return;
    }
    let interest = Interest::READABLE | Interest::WRITABLE;
    if poll.registry().reregister(&mut entry.stream, Token(fd as usize), interest).is_err() {
        mark_for_close(fd, &mut entry.conn, faulty);
        return;
    }
    entry.conn.write_interest_armed = true;
}

fn disarm_writable<U>(poll: &mut Poll, fd: RawFd, entry: &mut Entry<U>, faulty: &mut Vec<RawFd>) {
    if !entry.conn.write_interest_armed {
        return;
    }
    if poll.registry().reregister(&mut entry.stream, Token(fd as usize), Interest::READABLE).is_err() {
        mark_for_close(fd, &mut entry.conn, faulty);
        return;
    }
    entry.conn.write_interest_armed = false;
}

fn drain_faulty<U>(
    poll: &mut Poll,
    conns: &mut HashMap<RawFd, Entry<U>>,
    faulty: &mut Vec<RawFd>,
    callbacks: &mut Callbacks<U>,
) {
    for fd in faulty.drain(..) {
        let Some(mut entry) = conns.delete(&fd) else { continue };
        // Best-effort: try once more to push out whatever is left, then
        // give up. The connection is going away regardless.
        let _ = entry.stream.write(entry.conn.pending_write());
        let _ = poll.registry().deregister(&mut entry.stream);
        debug!(fd, "connection closed");
        if let Some(closed) = &mut callbacks.closed {
            closed(&mut entry.conn);
        }
    }
}
