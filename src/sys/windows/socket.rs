//! Nonblocking socket construction and the raw syscalls the combiner
//! executors would drive directly, mirroring `sys/unix/socket.rs`. Built
//! on raw Winsock2 calls (no `miow`/`socket2`) the same way the unix side
//! goes straight to `libc`.

use std::io;
use std::mem::{self, MaybeUninit};
use std::net::SocketAddr;

use windows_sys::Win32::Networking::WinSock::{
    bind, closesocket, connect, getsockname, getsockopt, ioctlsocket, listen, recvfrom, sendto,
    setsockopt, socket, WSAGetLastError, AF_INET, AF_INET6, FIONBIO, SOCKADDR_STORAGE,
    SOCKET, SOCKET_ERROR, SOL_SOCKET, SO_ERROR, SO_REUSEADDR, WSAEINPROGRESS, WSAEWOULDBLOCK,
};

use super::net::{from_socket_addr, to_socket_addr};

pub(crate) struct Socket {
    raw: SOCKET,
}

fn last_error() -> io::Error {
    io::Error::from_raw_os_error(unsafe { WSAGetLastError() })
}

impl Socket {
    pub(crate) fn new(family: i32, socket_type: i32) -> io::Result<Self> {
        let raw = unsafe { socket(family, socket_type, 0) };
        if raw == windows_sys::Win32::Networking::WinSock::INVALID_SOCKET {
            return Err(last_error());
        }
        let socket = Socket { raw };
        let mut nonblocking: u32 = 1;
        if unsafe { ioctlsocket(raw, FIONBIO, &mut nonblocking) } == SOCKET_ERROR {
            return Err(last_error());
        }
        Ok(socket)
    }

    pub(crate) fn from_addr(addr: SocketAddr, socket_type: i32) -> io::Result<Self> {
        let family = match addr {
            SocketAddr::V4(..) => AF_INET,
            SocketAddr::V6(..) => AF_INET6,
        };
        Self::new(family as i32, socket_type)
    }

    pub(crate) fn set_reuse_address(&self) -> io::Result<()> {
        let value: i32 = 1;
        let ret = unsafe {
            setsockopt(
                self.raw,
                SOL_SOCKET,
                SO_REUSEADDR,
                &value as *const _ as *const u8,
                mem::size_of::<i32>() as i32,
            )
        };
        if ret == SOCKET_ERROR { Err(last_error()) } else { Ok(()) }
    }

    /// `Ok(true)` if the connect completed synchronously; `Ok(false)` if
    /// it is in progress and the caller must wait for writability.
    pub(crate) fn connect(&self, addr: SocketAddr) -> io::Result<bool> {
        let storage = from_socket_addr(&addr);
        let ret = unsafe { connect(self.raw, storage.as_ptr(), storage.len()) };
        if ret == 0 {
            return Ok(true);
        }
        let err = unsafe { WSAGetLastError() };
        if err == WSAEWOULDBLOCK || err == WSAEINPROGRESS {
            Ok(false)
        } else {
            Err(io::Error::from_raw_os_error(err))
        }
    }

    pub(crate) fn take_error(&self) -> io::Result<Option<io::Error>> {
        let mut err: i32 = 0;
        let mut len = mem::size_of::<i32>() as i32;
        let ret = unsafe {
            getsockopt(self.raw, SOL_SOCKET, SO_ERROR, &mut err as *mut _ as *mut u8, &mut len)
        };
        if ret == SOCKET_ERROR {
            return Err(last_error());
        }
        if err == 0 { Ok(None) } else { Ok(Some(io::Error::from_raw_os_error(err))) }
    }

    pub(crate) fn bind(&self, addr: SocketAddr) -> io::Result<()> {
        let storage = from_socket_addr(&addr);
        if unsafe { bind(self.raw, storage.as_ptr(), storage.len()) } == SOCKET_ERROR {
            Err(last_error())
        } else {
            Ok(())
        }
    }

    pub(crate) fn listen(&self, backlog: i32) -> io::Result<()> {
        if unsafe { listen(self.raw, backlog) } == SOCKET_ERROR {
            Err(last_error())
        } else {
            Ok(())
        }
    }

    pub(crate) fn accept(&self) -> io::Result<(Self, SocketAddr)> {
        let mut storage = MaybeUninit::<SOCKADDR_STORAGE>::zeroed();
        let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;
        let raw = unsafe {
            windows_sys::Win32::Networking::WinSock::accept(
                self.raw,
                storage.as_mut_ptr() as *mut _,
                &mut len,
            )
        };
        if raw == windows_sys::Win32::Networking::WinSock::INVALID_SOCKET {
            return Err(last_error());
        }
        let accepted = Socket { raw };
        let mut nonblocking: u32 = 1;
        unsafe { ioctlsocket(raw, FIONBIO, &mut nonblocking) };
        let addr = unsafe { to_socket_addr(storage.as_ptr())? };
        Ok((accepted, addr))
    }

    pub(crate) fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut storage = MaybeUninit::<SOCKADDR_STORAGE>::zeroed();
        let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;
        let n = unsafe {
            recvfrom(
                self.raw,
                buf.as_mut_ptr(),
                buf.len() as i32,
                0,
                storage.as_mut_ptr() as *mut _,
                &mut len,
            )
        };
        if n == SOCKET_ERROR {
            return Err(last_error());
        }
        let addr = unsafe { to_socket_addr(storage.as_ptr())? };
        Ok((n as usize, addr))
    }

    pub(crate) fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let storage = from_socket_addr(&addr);
        let n = unsafe {
            sendto(self.raw, buf.as_ptr(), buf.len() as i32, 0, storage.as_ptr(), storage.len())
        };
        if n == SOCKET_ERROR { Err(last_error()) } else { Ok(n as usize) }
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut storage = MaybeUninit::<SOCKADDR_STORAGE>::zeroed();
        let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;
        if unsafe { getsockname(self.raw, storage.as_mut_ptr() as *mut _, &mut len) } == SOCKET_ERROR {
            return Err(last_error());
        }
        unsafe { to_socket_addr(storage.as_ptr()) }
    }

    pub(crate) fn into_raw(self) -> SOCKET {
        let raw = self.raw;
        mem::forget(self);
        raw
    }

    pub(crate) unsafe fn from_raw(raw: SOCKET) -> Self {
        Socket { raw }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        unsafe {
            closesocket(self.raw);
        }
    }
}
