//! Free function wrapping [`Socket`] for datagram setup, mirroring
//! `sys/unix/udp.rs`.

use std::io;
use std::net::SocketAddr;

use windows_sys::Win32::Networking::WinSock::SOCK_DGRAM;

use super::Socket;
use super::RawHandle;

pub(crate) fn bind(addr: SocketAddr) -> io::Result<RawHandle> {
    let socket = Socket::from_addr(addr, SOCK_DGRAM as i32)?;
    socket.set_reuse_address()?;
    socket.bind(addr)?;
    Ok(socket.into_raw() as RawHandle)
}
