//! Shared scaffolding for the end-to-end tests: every scenario needs a
//! reactor actually driven by a background thread, since callbacks run
//! either inline (fast path) or from whichever thread calls `run`/`run_once`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::thread::JoinHandle;
use std::time::Duration;

use aiocore::{AsyncBase, Method};

/// Starts a reactor on its own thread and hands back a handle plus the
/// join handle to tear it down with [`stop`].
pub fn spawn_reactor() -> (AsyncBase, JoinHandle<()>) {
    let reactor = AsyncBase::new(Method::Auto).expect("build reactor");
    let driven = reactor.clone();
    let join = std::thread::spawn(move || driven.run());
    (reactor, join)
}

pub fn stop(reactor: &AsyncBase, join: JoinHandle<()>) {
    reactor.post_quit();
    join.join().expect("reactor thread panicked");
}

pub fn any_local_address() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// A generous bound on how long a single callback round-trip over
/// localhost should ever take; tests block on this rather than spinning
/// forever if something regresses.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
