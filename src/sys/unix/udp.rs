//! Free function wrapping [`Socket`] for datagram setup. Datagram
//! read/write go straight through `Socket::recv_from`/`send_to` from the
//! combiner executors — there's no separate connect/accept dance to wrap.

use super::Socket;

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::IntoRawFd;

pub(crate) fn bind(addr: SocketAddr) -> io::Result<std::os::unix::io::RawFd> {
    let socket = Socket::from_addr(addr, libc::SOCK_DGRAM)?;
    socket.set_reuse_address()?;
    socket.bind(addr)?;
    Ok(socket.into_raw_fd())
}
