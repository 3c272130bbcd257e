//! Four read-msg calls on an idle socket with timeouts 1 ms, 5 ms, 10 ms
//! (Realtime), and 100 ms (grid). All four must eventually time out; the
//! three grid-scheduled deadlines land in the same second-granular
//! bucket and so are only ordered relative to each other, by insertion
//! order, not against the independently-timed Realtime one.

#![cfg(all(feature = "os-poll", feature = "net"))]

use std::sync::mpsc::channel;
use std::time::Duration;

use aiocore::net::UdpSocket;
use aiocore::{AsyncFlags, AsyncOpStatus};

#[path = "util/mod.rs"]
mod util;
use util::{any_local_address, spawn_reactor, stop};

#[test]
fn timeout_storm_all_expire_and_grid_entries_stay_in_insertion_order() {
    let (reactor, join) = spawn_reactor();
    let socket = UdpSocket::bind(&reactor, any_local_address()).unwrap();

    let (order_tx, order_rx) = channel();

    let deadlines: [(u32, Duration, AsyncFlags); 4] = [
        (1, Duration::from_millis(1), AsyncFlags::empty()),
        (2, Duration::from_millis(5), AsyncFlags::empty()),
        (3, Duration::from_millis(10), AsyncFlags::REALTIME),
        (4, Duration::from_millis(100), AsyncFlags::empty()),
    ];

    // Each buffer must outlive its pending op; the test blocks on all four
    // completions below before any of them is dropped.
    let mut bufs: Vec<Vec<u8>> = deadlines.iter().map(|_| vec![0u8; 16]).collect();
    for ((id, timeout, flags), buf) in deadlines.into_iter().zip(bufs.iter_mut()) {
        let tx = order_tx.clone();
        socket.aio_read_msg(buf, flags, Some(timeout), move |status, _n, _from| {
            tx.send((id, status)).unwrap();
        });
    }
    drop(order_tx);

    let mut seen = Vec::new();
    for _ in 0..4 {
        let (id, status) = order_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(status, AsyncOpStatus::Timeout);
        seen.push(id);
    }
    assert_eq!(seen.iter().copied().collect::<std::collections::HashSet<_>>(), [1, 2, 3, 4].into());

    let grid_order: Vec<u32> = seen.into_iter().filter(|id| *id != 3).collect();
    assert_eq!(grid_order, vec![1, 2, 4]);

    stop(&reactor, join);
}
