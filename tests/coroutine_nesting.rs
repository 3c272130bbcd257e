//! A coroutine accepts a connection, spawns a child coroutine that reads
//! from it and returns, then the parent finishes. Exercises coroutine
//! resume and the rule that nested coroutine chains are legal.

#![cfg(all(feature = "os-poll", feature = "net", feature = "coroutine"))]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aiocore::coroutine::{io_accept, io_connect, io_read, Coroutine};
use aiocore::net::TcpListener;
use aiocore::AsyncFlags;

#[path = "util/mod.rs"]
mod util;
use util::{any_local_address, spawn_reactor, stop};

#[test]
fn nested_coroutine_call_chain_runs_in_order() {
    let (reactor, join) = spawn_reactor();

    let listener = TcpListener::bind(&reactor, any_local_address()).unwrap();
    let addr = listener.local_addr().unwrap();

    let parent_enter = Arc::new(AtomicUsize::new(0));
    let child_total = Arc::new(AtomicUsize::new(0));
    let parent_exit = Arc::new(AtomicUsize::new(0));

    // A second coroutine plays the client side, so the accept inside the
    // parent coroutine below has something to resolve against.
    let client_reactor = reactor.clone();
    let client = Coroutine::spawn(64 * 1024, move || {
        let (_status, _stream) = io_connect(addr, &client_reactor, Some(Duration::from_secs(2)));
    });

    let parent_enter2 = parent_enter.clone();
    let child_total2 = child_total.clone();
    let parent_exit2 = parent_exit.clone();
    let parent = Coroutine::spawn(64 * 1024, move || {
        parent_enter2.fetch_add(1, Ordering::SeqCst);

        let (_status, accepted) = io_accept(&listener, Some(Duration::from_secs(2)));
        if let Some(stream) = accepted {
            let child_total3 = child_total2.clone();
            let child = Coroutine::spawn(32 * 1024, move || {
                let mut buf = [0u8; 7];
                let (_status, _n) = io_read(&stream, &mut buf, AsyncFlags::empty(), Some(Duration::from_secs(2)));
                child_total3.fetch_add(1, Ordering::SeqCst);
            });
            while !child.finished() {
                child.call();
            }
        }

        parent_exit2.fetch_add(1, Ordering::SeqCst);
    });

    while !client.finished() || !parent.finished() {
        if !client.finished() {
            client.call();
        }
        if !parent.finished() {
            parent.call();
        }
    }

    assert_eq!(parent_enter.load(Ordering::SeqCst), 1);
    assert_eq!(child_total.load(Ordering::SeqCst), 1);
    assert_eq!(parent_exit.load(Ordering::SeqCst), 1);

    stop(&reactor, join);
}
