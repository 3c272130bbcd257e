//! Nonblocking socket construction and the raw syscalls the combiner
//! executors drive directly. Grounded on a platform socket module,
//! `sys/unix/socket.rs`; trimmed to the mainstream unix targets (Linux and
//! the BSD family) to keep this file a reasonable size — a more exhaustive
//! exhaustive Solaris/espidf/emscripten branches add nothing this spec
//! needs.

use std::io::{self, Read, Write};
use std::mem::{self, MaybeUninit};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use super::net::{from_socket_addr, to_socket_addr};
use super::syscall;

#[derive(Debug)]
pub(crate) struct Socket {
    fd: RawFd,
}

impl Socket {
    pub(crate) fn new(domain: libc::c_int, socket_type: libc::c_int) -> io::Result<Self> {
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly"))]
        let socket_type = socket_type | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC;

        let fd = syscall!(socket(domain, socket_type, 0))?;
        let socket = unsafe { Socket::from_raw_fd(fd) };

        #[cfg(any(target_os = "ios", target_os = "macos"))]
        {
            syscall!(fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK))?;
            syscall!(fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
        }

        Ok(socket)
    }

    pub(crate) fn from_addr(addr: SocketAddr, socket_type: libc::c_int) -> io::Result<Self> {
        let domain = match addr {
            SocketAddr::V4(..) => libc::AF_INET,
            SocketAddr::V6(..) => libc::AF_INET6,
        };
        Self::new(domain, socket_type)
    }

    pub(crate) fn set_reuse_address(&self) -> io::Result<()> {
        syscall!(setsockopt(
            self.fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &1i32 as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        ))
        .map(|_| ())
    }

    /// Begins a nonblocking connect. `Ok(true)` means it finished
    /// synchronously; `Ok(false)` means it is in progress and the caller
    /// must wait for writability.
    pub(crate) fn connect(&self, addr: SocketAddr) -> io::Result<bool> {
        let storage = from_socket_addr(&addr);
        match syscall!(connect(self.fd, storage.as_ptr(), storage.len())) {
            Ok(_) => Ok(true),
            Err(ref err) if err.raw_os_error() == Some(libc::EINPROGRESS) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Reads the pending error on a connecting socket once it becomes
    /// writable, per the standard `connect(2)` + `SO_ERROR` dance.
    pub(crate) fn take_error(&self) -> io::Result<Option<io::Error>> {
        let mut err: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        syscall!(getsockopt(
            self.fd,
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

    pub(crate) fn bind(&self, addr: SocketAddr) -> io::Result<()> {
        let storage = from_socket_addr(&addr);
        syscall!(bind(self.fd, storage.as_ptr(), storage.len())).map(|_| ())
    }

    pub(crate) fn listen(&self, backlog: i32) -> io::Result<()> {
        syscall!(listen(self.fd, backlog)).map(|_| ())
    }

    pub(crate) fn accept(&self) -> io::Result<(Self, SocketAddr)> {
        let mut storage = MaybeUninit::<libc::sockaddr_storage>::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

        #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "openbsd", target_os = "dragonfly"))]
        let fd = syscall!(accept4(
            self.fd,
            storage.as_mut_ptr() as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
        ))?;
        #[cfg(any(target_os = "ios", target_os = "macos", target_os = "netbsd"))]
        let fd = {
            let fd = syscall!(accept(
                self.fd,
                storage.as_mut_ptr() as *mut libc::sockaddr,
                &mut len
            ))?;
            syscall!(fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
            syscall!(fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK))?;
            fd
        };

        let addr = unsafe { to_socket_addr(storage.as_ptr())? };
        Ok((unsafe { Socket::from_raw_fd(fd) }, addr))
    }

    pub(crate) fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut storage = MaybeUninit::<libc::sockaddr_storage>::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let n = syscall!(recvfrom(
            self.fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
            storage.as_mut_ptr() as *mut libc::sockaddr,
            &mut len,
        ))?;
        let addr = unsafe { to_socket_addr(storage.as_ptr())? };
        Ok((n as usize, addr))
    }

    pub(crate) fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let storage = from_socket_addr(&addr);
        let n = syscall!(sendto(
            self.fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            0,
            storage.as_ptr(),
            storage.len(),
        ))?;
        Ok(n as usize)
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        syscall!(read(
            self.fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len()
        ))
        .map(|n| n as usize)
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        syscall!(write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()))
            .map(|n| n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl FromRawFd for Socket {
    unsafe fn from_raw_fd(fd: RawFd) -> Socket {
        Socket { fd }
    }
}

impl IntoRawFd for Socket {
    fn into_raw_fd(self) -> RawFd {
        let fd = self.fd;
        mem::forget(self);
        fd
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let _ = syscall!(close(self.fd));
    }
}
