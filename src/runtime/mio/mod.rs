//! mio-based reactor.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).
//! One thread owns the poll, the listener, every connection and the
//! dispatch table, so handlers run to completion without locks.

mod event_loop;

pub use event_loop::{Reactor, ReactorStats, ShutdownHandle};
