//! A small, single-threaded RESP (Redis Serialization Protocol) server
//! framework: a readiness-driven I/O reactor, an incremental RESP + inline
//! command parser, and a Robin Hood hash table for connection storage.
//!
//! Ported from a C implementation (`event.c`/`miniredis.c`/`hashmap.c`)
//! whose architecture this crate keeps: one thread owns the poller, the
//! connection table, and every callback invocation; the wire format is a
//! compatible subset of RESP-2 plus telnet-style inline commands.

mod addr;
mod buf;
mod callbacks;
mod conn;
mod error;
mod hashmap;
mod parser;
mod reactor;
mod reply;
mod server;

pub use callbacks::Callbacks;
pub use conn::Conn;
pub use error::Error;
pub use hashmap::HashMap;
pub use parser::{MAX_ARGS, MAX_ARG_LEN};
pub use server::Server;
