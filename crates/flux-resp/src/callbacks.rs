//! The embedder callback bundle.
//!
//! Rust analogue of `miniredis_events`'s function-pointer struct: every hook
//! is optional, and each is a boxed closure rather than a bare `fn` pointer
//! so an embedder can close over its own state instead of routing
//! everything through a `void* udata`.

use std::time::Duration;

use crate::conn::Conn;

/// Optional hooks a [`crate::Server`] drives while running.
pub struct Callbacks<U> {
    /// Called once, after every listener address is bound.
    pub serving: Option<Box<dyn FnMut(&[String])>>,
    /// Called once per accepted connection, before its first read.
    pub opened: Option<Box<dyn FnMut(&mut Conn<U>)>>,
    /// Called once per connection teardown, after it is removed from the
    /// reactor but before its resources are dropped.
    pub closed: Option<Box<dyn FnMut(&mut Conn<U>)>>,
    /// Called once per fully-parsed command (after `quit` is intercepted).
    pub command: Option<Box<dyn FnMut(&mut Conn<U>, &[Vec<u8>])>>,
    /// Steers the readiness-wait timeout when `sync` last returned `true`.
    /// Returning `None` behaves like an infinite delay (capped internally
    /// at one second, the way `EDELAYNS` caps it).
    pub tick: Option<Box<dyn FnMut() -> Option<Duration>>>,
    /// Gates whether `tick`'s delay is honored this iteration; while this
    /// returns `false` the loop polls with a zero timeout.
    pub sync: Option<Box<dyn FnMut() -> bool>>,
    /// Diagnostic surfacing for non-fatal runtime errors (accept failures,
    /// hash table allocation failures, and the like).
    pub error: Option<Box<dyn FnMut(&str, bool)>>,
}

impl<U> Default for Callbacks<U> {
    fn default() -> Self {
        Self {
            serving: None,
            opened: None,
            closed: None,
            command: None,
            tick: None,
            sync: None,
            error: None,
        }
    }
}

impl<U> Callbacks<U> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_serving(mut self, f: impl FnMut(&[String]) + 'static) -> Self {
        self.serving = Some(Box::new(f));
        self
    }

    pub fn on_opened(mut self, f: impl FnMut(&mut Conn<U>) + 'static) -> Self {
        self.opened = Some(Box::new(f));
        self
    }

    pub fn on_closed(mut self, f: impl FnMut(&mut Conn<U>) + 'static) -> Self {
        self.closed = Some(Box::new(f));
        self
    }

    pub fn on_command(mut self, f: impl FnMut(&mut Conn<U>, &[Vec<u8>]) + 'static) -> Self {
        self.command = Some(Box::new(f));
        self
    }

    pub fn on_tick(mut self, f: impl FnMut() -> Option<Duration> + 'static) -> Self {
        self.tick = Some(Box::new(f));
        self
    }

    pub fn on_sync(mut self, f: impl FnMut() -> bool + 'static) -> Self {
        self.sync = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&str, bool) + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }
}
