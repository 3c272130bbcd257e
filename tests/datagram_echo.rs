//! A UDP echo exchange, plus the server's second read timing out once
//! the client has gone quiet.

#![cfg(all(feature = "os-poll", feature = "net"))]

use std::sync::mpsc::channel;
use std::time::Duration;

use aiocore::net::UdpSocket;
use aiocore::{AsyncFlags, AsyncOpStatus};

#[path = "util/mod.rs"]
mod util;
use util::{any_local_address, spawn_reactor, stop, RECV_TIMEOUT};

const REQUEST: &[u8] = b"123456\0";
const REPLY: &[u8] = b"234567\0";

#[test]
fn datagram_echo_then_second_read_times_out() {
    let (reactor, join) = spawn_reactor();

    let server = UdpSocket::bind(&reactor, any_local_address()).unwrap();
    let server_addr = server.local_addr().unwrap();
    let client = UdpSocket::bind(&reactor, any_local_address()).unwrap();

    let mut server_buf = vec![0u8; REQUEST.len()];
    let (server_read_tx, server_read_rx) = channel();
    server.aio_read_msg(&mut server_buf, AsyncFlags::empty(), Some(Duration::from_secs(1)), move |status, n, from| {
        server_read_tx.send((status, n, from)).unwrap();
    });

    let (client_write_tx, client_write_rx) = channel();
    client.aio_write_msg(REQUEST, server_addr, AsyncFlags::empty(), Some(Duration::from_secs(1)), move |status, n| {
        client_write_tx.send((status, n)).unwrap();
    });
    let (write_status, _n) = client_write_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(write_status, AsyncOpStatus::Success);

    let (server_status, server_n, client_addr) = server_read_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(server_status, AsyncOpStatus::Success);
    assert_eq!(&server_buf[..server_n], REQUEST);
    let client_addr = client_addr.expect("read_msg reports the sender's address");

    let mut transformed = server_buf[..server_n].to_vec();
    for byte in &mut transformed[..6] {
        *byte = byte.wrapping_add(1);
    }

    let mut client_buf = vec![0u8; REPLY.len()];
    let (client_read_tx, client_read_rx) = channel();
    client.aio_read_msg(&mut client_buf, AsyncFlags::empty(), Some(Duration::from_secs(1)), move |status, n, _from| {
        client_read_tx.send((status, n)).unwrap();
    });

    let (server_write_tx, server_write_rx) = channel();
    server.aio_write_msg(&transformed, client_addr, AsyncFlags::empty(), Some(Duration::from_secs(1)), move |status, n| {
        server_write_tx.send((status, n)).unwrap();
    });
    server_write_rx.recv_timeout(RECV_TIMEOUT).unwrap();

    let (client_read_status, client_n) = client_read_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(client_read_status, AsyncOpStatus::Success);
    assert_eq!(&client_buf[..client_n], REPLY);

    // The server posts a second read-msg with no further client traffic;
    // it must time out rather than hang.
    let mut second_buf = vec![0u8; 64];
    let (second_tx, second_rx) = channel();
    server.aio_read_msg(&mut second_buf, AsyncFlags::empty(), Some(Duration::from_secs(1)), move |status, _n, _from| {
        second_tx.send(status).unwrap();
    });
    let second_status = second_rx.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(second_status, AsyncOpStatus::Timeout);

    stop(&reactor, join);
}
