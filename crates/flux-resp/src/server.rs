//! Entry point mirroring `miniredis_main`: bind every listener address and
//! run the reactor until a fatal I/O error occurs.

use crate::callbacks::Callbacks;
use crate::error::Error;
use crate::reactor;

/// A RESP server, parameterized by `U`, the opaque per-connection state an
/// embedder wants to carry alongside each [`crate::Conn`].
pub struct Server<U> {
    addrs: Vec<String>,
    callbacks: Callbacks<U>,
}

impl<U> Server<U> {
    pub fn new(addrs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { addrs: addrs.into_iter().map(Into::into).collect(), callbacks: Callbacks::new() }
    }

    pub fn callbacks_mut(&mut self) -> &mut Callbacks<U> {
        &mut self.callbacks
    }

    pub fn with_callbacks(mut self, callbacks: Callbacks<U>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Binds every configured address and runs the event loop on the
    /// calling thread until a listener-level error occurs.
    pub fn run(mut self) -> Result<(), Error> {
        reactor::run(&self.addrs, &mut self.callbacks)
    }
}
