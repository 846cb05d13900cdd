use thiserror::Error;

/// Fatal errors raised at startup or during listener setup. Anything that
/// happens per-connection after that (protocol errors, OOM on a single
/// write) is surfaced through the `error` callback instead, since it
/// doesn't stop the server.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid listener address {address:?}: {reason}")]
    Config { address: String, reason: &'static str },

    #[error("failed to bind {address}: {source}")]
    Bind { address: String, source: std::io::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A global allocation (the connection table, at startup) failed.
    /// Per-connection allocation failures don't raise this — they latch
    /// that one connection closed instead, per the fault-list path.
    #[error("allocation failed")]
    Oom,
}
