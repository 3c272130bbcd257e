//! Free functions wrapping [`Socket`] for the TCP opcodes (`Connect`,
//! `Accept`), a thin std-socket-returning wrapper over the same `Socket`
//! type.

use super::Socket;

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{FromRawFd, IntoRawFd};

/// Begins a nonblocking connect. Returns `(fd, already_connected)`; the
/// latter is the synchronous-fast-path case (a loopback connect on some
/// kernels completes inline).
pub(crate) fn connect(addr: SocketAddr) -> io::Result<(std::os::unix::io::RawFd, bool)> {
    let socket = Socket::from_addr(addr, libc::SOCK_STREAM)?;
    let done = socket.connect(addr)?;
    Ok((socket.into_raw_fd(), done))
}

pub(crate) fn bind(addr: SocketAddr) -> io::Result<std::os::unix::io::RawFd> {
    let socket = Socket::from_addr(addr, libc::SOCK_STREAM)?;
    socket.set_reuse_address()?;
    socket.bind(addr)?;
    socket.listen(1024)?;
    Ok(socket.into_raw_fd())
}

pub(crate) fn accept(
    fd: std::os::unix::io::RawFd,
) -> io::Result<(std::os::unix::io::RawFd, SocketAddr)> {
    let listener = unsafe { Socket::from_raw_fd(fd) };
    let result = listener.accept();
    // `fd` is owned by the caller's object; don't let the temporary
    // `Socket` close it on drop.
    std::mem::forget(listener);
    let (conn, addr) = result?;
    Ok((conn.into_raw_fd(), addr))
}
