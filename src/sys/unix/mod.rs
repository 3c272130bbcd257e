mod device;
mod net;
mod socket;
mod tcp;
mod udp;

pub(crate) use device::Device;
pub(crate) use socket::Socket;
pub(crate) use tcp::{accept as tcp_accept, bind as tcp_bind, connect as tcp_connect};
pub(crate) use udp::bind as udp_bind;

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

/// Calls a libc function and maps a `-1` return into `io::Error`, the usual
/// convention for a `syscall!` helper used throughout `sys/unix/*.rs`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}
pub(crate) use syscall;

/// Reads the pending error on a connecting fd once it becomes writable.
/// A free function (rather than going through [`Socket`]) because by the
/// time the executor runs, the fd is owned by the object's
/// [`crate::object::ObjectInner`], not by a `Socket` value.
pub(crate) fn take_socket_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    syscall!(getsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_ERROR,
        &mut err as *mut _ as *mut libc::c_void,
        &mut len,
    ))?;
    if err == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(err)))
    }
}

pub(crate) fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    syscall!(read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())).map(|n| n as usize)
}

pub(crate) fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    syscall!(write(fd, buf.as_ptr() as *const libc::c_void, buf.len())).map(|n| n as usize)
}

pub(crate) fn recv_from_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    use std::mem::{size_of, MaybeUninit};
    let mut storage = MaybeUninit::<libc::sockaddr_storage>::zeroed();
    let mut len = size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let n = syscall!(recvfrom(
        fd,
        buf.as_mut_ptr() as *mut libc::c_void,
        buf.len(),
        0,
        storage.as_mut_ptr() as *mut libc::sockaddr,
        &mut len,
    ))?;
    let addr = unsafe { net::to_socket_addr(storage.as_ptr())? };
    Ok((n as usize, addr))
}

/// Puts an already-open descriptor into nonblocking mode and hands back
/// the raw fd, ready to register with the reactor. Used by
/// [`crate::net::Device::new`].
pub(crate) fn prepare_device(fd: RawFd) -> io::Result<RawFd> {
    use std::os::unix::io::IntoRawFd;
    Ok(Device::new(fd)?.into_raw_fd())
}

pub(crate) fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
    use std::mem::{size_of, MaybeUninit};
    let mut storage = MaybeUninit::<libc::sockaddr_storage>::zeroed();
    let mut len = size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    syscall!(getsockname(
        fd,
        storage.as_mut_ptr() as *mut libc::sockaddr,
        &mut len,
    ))?;
    unsafe { net::to_socket_addr(storage.as_ptr()) }
}

pub(crate) fn send_to_fd(fd: RawFd, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
    let storage = net::from_socket_addr(&addr);
    let n = syscall!(sendto(
        fd,
        buf.as_ptr() as *const libc::c_void,
        buf.len(),
        0,
        storage.as_ptr(),
        storage.len(),
    ))?;
    Ok(n as usize)
}

/// Raw OS handle a combiner-managed object owns. On unix this is always a
/// file descriptor, whether it names a socket, a pipe, or a character
/// device — `read(2)`/`write(2)`/`close(2)` treat them uniformly, which is
/// exactly the "device" kind in .
pub(crate) type RawHandle = RawFd;
