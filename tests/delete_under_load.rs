//! 1000 outstanding read-msg calls, deleted out from under them by a
//! user-event timer 5 ms later. Exercises cancel-drain under load and
//! that the object tears down exactly once.

#![cfg(all(feature = "os-poll", feature = "net"))]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use aiocore::net::UdpSocket;
use aiocore::{AsyncFlags, AsyncOpStatus};
use aiocore::user_event::UserEvent;

#[path = "util/mod.rs"]
mod util;
use util::{any_local_address, spawn_reactor, stop};

const PENDING: usize = 1000;

#[test]
fn delete_under_load_cancels_every_pending_op() {
    let (reactor, join) = spawn_reactor();
    let socket = UdpSocket::bind(&reactor, any_local_address()).unwrap();

    let (done_tx, done_rx) = channel();
    let remaining = Arc::new(AtomicUsize::new(PENDING));
    let non_canceled = Arc::new(AtomicUsize::new(0));

    let mut bufs: Vec<Vec<u8>> = (0..PENDING).map(|_| vec![0u8; 16]).collect();
    for buf in bufs.iter_mut() {
        let remaining = remaining.clone();
        let non_canceled = non_canceled.clone();
        let done_tx = done_tx.clone();
        socket.aio_read_msg(buf, AsyncFlags::empty(), Some(Duration::from_secs(3)), move |status, _n, _from| {
            if status != AsyncOpStatus::Canceled {
                non_canceled.fetch_add(1, Ordering::SeqCst);
            }
            if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                let _ = done_tx.send(());
            }
        });
    }

    let socket_to_delete = socket.clone();
    let timer = UserEvent::new(&reactor, move || {
        socket_to_delete.delete();
    });
    timer.start_timer(Duration::from_millis(5), 1);

    done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(remaining.load(Ordering::SeqCst), 0);
    assert_eq!(non_canceled.load(Ordering::SeqCst), 0, "every pending op must finish Canceled, not some other status");

    stop(&reactor, join);
}
