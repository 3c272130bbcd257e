//! Free functions wrapping [`Socket`] for the TCP opcodes, mirroring
//! `sys/unix/tcp.rs`.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use windows_sys::Win32::Networking::WinSock::SOCK_STREAM;

use super::Socket;
use super::RawHandle;

/// `ConnectEx` requires the socket be explicitly bound before it's called,
/// unlike a plain `connect(2)`-style call — so unlike the unix side, this
/// does not attempt the connect itself. `done` is always `false`; the
/// actual `ConnectEx` call is issued by the combiner executor once the op
/// is queued, since only that path can attach the `OVERLAPPED` the
/// completion port needs.
pub(crate) fn connect(addr: SocketAddr) -> io::Result<(RawHandle, bool)> {
    let socket = Socket::from_addr(addr, SOCK_STREAM as i32)?;
    let wildcard = match addr {
        SocketAddr::V4(_) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
        SocketAddr::V6(_) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
    };
    socket.bind(wildcard)?;
    Ok((socket.into_raw() as RawHandle, false))
}

pub(crate) fn bind(addr: SocketAddr) -> io::Result<RawHandle> {
    let socket = Socket::from_addr(addr, SOCK_STREAM as i32)?;
    socket.set_reuse_address()?;
    socket.bind(addr)?;
    socket.listen(1024)?;
    Ok(socket.into_raw() as RawHandle)
}

/// Pre-creates the placeholder socket `AcceptEx` requires as its second
/// argument — unlike `accept(2)`, `AcceptEx` doesn't create the accepted
/// socket itself, it fills one the caller already owns.
pub(crate) fn new_stream_socket_like(addr: SocketAddr) -> io::Result<RawHandle> {
    let socket = Socket::from_addr(addr, SOCK_STREAM as i32)?;
    Ok(socket.into_raw() as RawHandle)
}

pub(crate) fn accept(raw: RawHandle) -> io::Result<(RawHandle, SocketAddr)> {
    let listener = unsafe { Socket::from_raw(raw as windows_sys::Win32::Networking::WinSock::SOCKET) };
    let result = listener.accept();
    std::mem::forget(listener);
    let (conn, addr) = result?;
    Ok((conn.into_raw() as RawHandle, addr))
}
