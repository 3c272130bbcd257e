//! Platform dispatch for Windows. Mirrors `sys/unix/mod.rs`'s small,
//! uniform surface (`RawHandle`, nonblocking socket/device construction)
//! on top of raw Winsock2 and `HANDLE` calls — deliberately not the
//! teacher crate's AFD-polling emulation (see `reactor/iocp.rs`'s module
//! doc for why).

mod device;
mod net;
pub(crate) mod overlapped;
mod socket;
mod tcp;
mod udp;

pub(crate) use socket::Socket;
pub(crate) use tcp::{accept as tcp_accept, bind as tcp_bind, connect as tcp_connect, new_stream_socket_like};
pub(crate) use udp::bind as udp_bind;

use std::io;
use std::mem::MaybeUninit;
use std::net::SocketAddr;

use windows_sys::Win32::Networking::WinSock::{getsockopt, SOCKADDR_STORAGE, SOCKET, SOCKET_ERROR, SOL_SOCKET, SO_ERROR};

/// Raw OS handle a combiner-managed object owns. Sockets and devices
/// (named pipes) are both represented as the numeric handle value IOCP's
/// `CreateIoCompletionPort` expects.
pub(crate) type RawHandle = isize;

pub(crate) fn take_socket_error(handle: RawHandle) -> io::Result<Option<io::Error>> {
    let mut err: i32 = 0;
    let mut len = std::mem::size_of::<i32>() as i32;
    let ret = unsafe {
        getsockopt(handle as SOCKET, SOL_SOCKET, SO_ERROR, &mut err as *mut _ as *mut u8, &mut len)
    };
    if ret == SOCKET_ERROR {
        return Err(io::Error::last_os_error());
    }
    if err == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(err)))
    }
}

pub(crate) fn local_addr(handle: RawHandle) -> io::Result<SocketAddr> {
    let mut storage = MaybeUninit::<SOCKADDR_STORAGE>::zeroed();
    let mut len = std::mem::size_of::<SOCKADDR_STORAGE>() as i32;
    let ret = unsafe {
        windows_sys::Win32::Networking::WinSock::getsockname(handle as SOCKET, storage.as_mut_ptr() as *mut _, &mut len)
    };
    if ret == SOCKET_ERROR {
        return Err(io::Error::last_os_error());
    }
    unsafe { net::to_socket_addr(storage.as_ptr()) }
}

/// Used once an `AcceptEx` completes to read back the peer address, rather
/// than parsing the address buffer `AcceptEx` itself writes
/// (`GetAcceptExSockaddrs`) — the accepted socket already knows its own
/// peer by the time the completion is reclaimed.
pub(crate) fn peer_addr(handle: RawHandle) -> io::Result<SocketAddr> {
    let mut storage = MaybeUninit::<SOCKADDR_STORAGE>::zeroed();
    let mut len = std::mem::size_of::<SOCKADDR_STORAGE>() as i32;
    let ret = unsafe {
        windows_sys::Win32::Networking::WinSock::getpeername(handle as SOCKET, storage.as_mut_ptr() as *mut _, &mut len)
    };
    if ret == SOCKET_ERROR {
        return Err(io::Error::last_os_error());
    }
    unsafe { net::to_socket_addr(storage.as_ptr()) }
}

/// `ConnectEx` leaves the socket without its usual connected-socket
/// behavior (`getpeername`, `shutdown`, further `send`/`recv` via the
/// non-overlapped API) until this option is set once, post-completion.
pub(crate) fn update_connect_context(handle: RawHandle) -> io::Result<()> {
    const SO_UPDATE_CONNECT_CONTEXT: i32 = 0x7010;
    let ret = unsafe {
        windows_sys::Win32::Networking::WinSock::setsockopt(
            handle as SOCKET,
            SOL_SOCKET,
            SO_UPDATE_CONNECT_CONTEXT,
            std::ptr::null(),
            0,
        )
    };
    if ret == SOCKET_ERROR { Err(io::Error::last_os_error()) } else { Ok(()) }
}

/// The `AcceptEx` counterpart to [`update_connect_context`]: without it,
/// `getsockname`/`getpeername`/`setsockopt` on the accepted socket behave
/// as if it were still the listener.
pub(crate) fn update_accept_context(accepted: RawHandle, listener: RawHandle) -> io::Result<()> {
    const SO_UPDATE_ACCEPT_CONTEXT: i32 = 0x700B;
    let listener = listener as SOCKET;
    let ret = unsafe {
        windows_sys::Win32::Networking::WinSock::setsockopt(
            accepted as SOCKET,
            SOL_SOCKET,
            SO_UPDATE_ACCEPT_CONTEXT,
            &listener as *const _ as *const u8,
            std::mem::size_of::<SOCKET>() as i32,
        )
    };
    if ret == SOCKET_ERROR { Err(io::Error::last_os_error()) } else { Ok(()) }
}

/// Puts an already-open handle in a combiner-usable state and hands back
/// the raw value, ready to register with the reactor. Used by
/// [`crate::net::Device::new`].
pub(crate) fn prepare_device(handle: RawHandle) -> io::Result<RawHandle> {
    Ok(device::Device::new(handle as windows_sys::Win32::Foundation::HANDLE)?.into_raw() as RawHandle)
}

pub(crate) fn read_fd(_handle: RawHandle, _buf: &mut [u8]) -> io::Result<usize> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "overlapped reads are issued directly by the combiner executor"))
}

pub(crate) fn write_fd(_handle: RawHandle, _buf: &[u8]) -> io::Result<usize> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "overlapped writes are issued directly by the combiner executor"))
}
