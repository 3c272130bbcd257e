//! A +1-per-byte echo server over a connected TCP pair, exercising
//! `WAIT_ALL` on both sides.

#![cfg(all(feature = "os-poll", feature = "net"))]

use std::sync::mpsc::channel;
use std::time::Duration;

use aiocore::net::{TcpListener, TcpStream};
use aiocore::{AsyncFlags, AsyncOpStatus};

#[path = "util/mod.rs"]
mod util;
use util::{any_local_address, spawn_reactor, stop, RECV_TIMEOUT};

const REQUEST: &[u8] = b"123456\0";
const REPLY: &[u8] = b"234567\0";

#[test]
fn stream_echo_increments_each_byte() {
    let (reactor, join) = spawn_reactor();

    let listener = TcpListener::bind(&reactor, any_local_address()).unwrap();
    let addr = listener.local_addr().unwrap();

    let (accept_tx, accept_rx) = channel();
    listener.aio_accept(Some(Duration::from_secs(2)), move |status, accepted| {
        accept_tx.send((status, accepted)).unwrap();
    });

    let (connect_tx, connect_rx) = channel();
    TcpStream::connect(&reactor, addr, Some(Duration::from_secs(2)), move |status, stream| {
        connect_tx.send((status, stream)).unwrap();
    })
    .unwrap();

    let (_status, client) = connect_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    let client = client.unwrap();
    let (_status, accepted) = accept_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    let (server, _peer) = accepted.unwrap();

    // Client writes the request, then posts the read for the reply before
    // the server has had a chance to answer.
    let (write_tx, write_rx) = channel();
    client.aio_write(REQUEST, AsyncFlags::WAIT_ALL, Some(Duration::from_secs(2)), move |status, n| {
        write_tx.send((status, n)).unwrap();
    });

    let mut client_reply = vec![0u8; REPLY.len()];
    let (client_read_tx, client_read_rx) = channel();
    client.aio_read(&mut client_reply, AsyncFlags::WAIT_ALL, Some(Duration::from_secs(2)), move |status, n| {
        client_read_tx.send((status, n)).unwrap();
    });

    // Server reads the request, transforms it, writes the reply back.
    let mut request_buf = vec![0u8; REQUEST.len()];
    let (server_read_tx, server_read_rx) = channel();
    server.aio_read(&mut request_buf, AsyncFlags::WAIT_ALL, Some(Duration::from_secs(2)), move |status, n| {
        server_read_tx.send((status, n)).unwrap();
    });

    let (write_status, written) = write_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(write_status, AsyncOpStatus::Success);
    assert_eq!(written, REQUEST.len());

    let (server_status, server_n) = server_read_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(server_status, AsyncOpStatus::Success);
    assert_eq!(server_n, REQUEST.len());
    assert_eq!(&request_buf[..server_n], REQUEST);

    let mut transformed = request_buf.clone();
    for byte in &mut transformed[..6] {
        *byte = byte.wrapping_add(1);
    }

    let (server_write_tx, server_write_rx) = channel();
    server.aio_write(&transformed, AsyncFlags::WAIT_ALL, Some(Duration::from_secs(2)), move |status, n| {
        server_write_tx.send((status, n)).unwrap();
    });
    let (server_write_status, _n) = server_write_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(server_write_status, AsyncOpStatus::Success);

    let (client_read_status, client_n) = client_read_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(client_read_status, AsyncOpStatus::Success);
    assert_eq!(client_n, REPLY.len());
    assert_eq!(&client_reply[..], REPLY);

    stop(&reactor, join);
}
