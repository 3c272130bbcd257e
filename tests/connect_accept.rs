//! A connect/accept handshake, plus the disconnect notification that
//! follows the accepted side closing.

#![cfg(all(feature = "os-poll", feature = "net"))]

use std::sync::mpsc::channel;
use std::time::Duration;

use aiocore::net::{TcpListener, TcpStream};
use aiocore::AsyncOpStatus;

#[path = "util/mod.rs"]
mod util;
use util::{any_local_address, spawn_reactor, stop, RECV_TIMEOUT};

#[test]
fn connect_accept_handshake() {
    let (reactor, join) = spawn_reactor();

    let listener = TcpListener::bind(&reactor, any_local_address()).unwrap();
    let addr = listener.local_addr().unwrap();

    let (accept_tx, accept_rx) = channel();
    listener.aio_accept(Some(Duration::from_millis(333)), move |status, accepted| {
        accept_tx.send((status, accepted)).unwrap();
    });

    let (connect_tx, connect_rx) = channel();
    TcpStream::connect(&reactor, addr, Some(Duration::from_millis(333)), move |status, stream| {
        connect_tx.send((status, stream)).unwrap();
    })
    .unwrap();

    let (connect_status, client) = connect_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(connect_status, AsyncOpStatus::Success);
    let client = client.expect("connect yields a stream on success");

    let (accept_status, accepted) = accept_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(accept_status, AsyncOpStatus::Success);
    let (server_side, _peer) = accepted.expect("accept yields a stream and peer addr on success");

    // Closing the accepted descriptor should surface as Disconnected on a
    // read the client side has outstanding.
    let (read_tx, read_rx) = channel();
    let mut buf = [0u8; 16];
    client.aio_read(&mut buf, Default::default(), Some(Duration::from_secs(2)), move |status, _n| {
        read_tx.send(status).unwrap();
    });
    server_side.delete();
    drop(server_side);

    let read_status = read_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(read_status, AsyncOpStatus::Disconnected);

    stop(&reactor, join);
}
