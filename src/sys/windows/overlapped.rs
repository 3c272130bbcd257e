//! Real overlapped I/O. `ConnectEx`/`AcceptEx` have no static import the
//! way `WSARecv`/`WSASend` do — both are looked up once per process via
//! `WSAIoctl`'s extension-function mechanism and cached. Every combiner
//! executor on this platform calls straight into these instead of
//! retrying a nonblocking syscall off a readiness notification: IOCP only
//! ever tells you an overlapped call finished, never that a handle became
//! readable, so the call has to be issued up front.

use std::ffi::c_void;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};

use windows_sys::core::GUID;
use windows_sys::Win32::Foundation::{GetLastError, ERROR_IO_PENDING, HANDLE};
use windows_sys::Win32::Networking::WinSock::{
    WSAGetLastError, WSAIoctl, WSARecv, WSARecvFrom, WSASend, SOCKADDR, SOCKADDR_STORAGE, SOCKET,
    SOCKET_ERROR, WSABUF, WSA_IO_PENDING,
};
use windows_sys::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows_sys::Win32::System::IO::OVERLAPPED;

use super::net::{from_socket_addr, to_socket_addr};
use crate::object::{Direction, ObjectInner};
use crate::sys::RawHandle;

/// Boxed on the heap and handed to the OS as the `LPOVERLAPPED` pointer;
/// reclaimed once the port reports the completion. `#[repr(C)]` with
/// `overlapped` first so the raw `OVERLAPPED*` the OS writes into and the
/// `Box<OverlappedCtx>` the completion handler reconstructs sit at the
/// same address.
#[repr(C)]
pub(crate) struct OverlappedCtx {
    pub(crate) overlapped: OVERLAPPED,
    pub(crate) object: Weak<ObjectInner>,
    pub(crate) direction: Direction,
    /// Set only for an `AcceptEx` call: the freshly created socket handed
    /// to `AcceptEx` as its second argument, kept here so a completion can
    /// attach it to the result without threading a third channel through.
    pub(crate) accepted_handle: Option<RawHandle>,
    /// `AcceptEx`'s required output buffer (local + remote address,
    /// unused past completion — the peer address is read back with
    /// `getpeername` instead of `GetAcceptExSockaddrs`, since by then the
    /// accepted socket already carries it).
    accept_buf: Vec<u8>,
    /// Populated before a `WSARecvFrom` call; read back out once the
    /// completion port reports the transfer.
    addr_storage: SOCKADDR_STORAGE,
    addr_len: i32,
}

/// `AcceptEx`'s documented minimum: each address slot is the transport's
/// max address size plus 16 padding bytes.
pub(crate) const ACCEPT_ADDR_LEN: usize = std::mem::size_of::<SOCKADDR_STORAGE>() + 16;

impl OverlappedCtx {
    pub(crate) fn new(object: &Arc<ObjectInner>, direction: Direction) -> Box<Self> {
        Box::new(OverlappedCtx {
            overlapped: unsafe { std::mem::zeroed() },
            object: Arc::downgrade(object),
            direction,
            accepted_handle: None,
            accept_buf: Vec::new(),
            addr_storage: unsafe { std::mem::zeroed() },
            addr_len: std::mem::size_of::<SOCKADDR_STORAGE>() as i32,
        })
    }

    pub(crate) fn leak(self: Box<Self>) -> *mut OVERLAPPED {
        Box::into_raw(self) as *mut OVERLAPPED
    }

    /// Reclaims a context the OS handed back through a completed
    /// `OVERLAPPED`. Only ever called on the pointer a matching `leak`
    /// produced.
    pub(crate) unsafe fn reclaim(ptr: *mut OVERLAPPED) -> Box<Self> {
        Box::from_raw(ptr as *mut OverlappedCtx)
    }

    /// `true` if the port-reported completion succeeded, read off the
    /// `OVERLAPPED`'s own status field rather than the completion entry
    /// (IOCP posts failures too, not just successes).
    pub(crate) fn succeeded(&self) -> bool {
        self.overlapped.Internal == 0
    }

    /// The peer address `WSARecvFrom` wrote back, once a read-direction
    /// completion carrying one is reclaimed.
    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        unsafe { to_socket_addr(&self.addr_storage as *const _).ok() }
    }
}

pub(crate) enum Issued {
    Pending,
    Done(usize),
}

fn wsa_pending_or_err() -> io::Result<Issued> {
    let err = unsafe { WSAGetLastError() };
    if err == WSA_IO_PENDING {
        Ok(Issued::Pending)
    } else {
        Err(io::Error::from_raw_os_error(err))
    }
}

fn file_pending_or_err() -> io::Result<Issued> {
    let err = unsafe { GetLastError() };
    if err == ERROR_IO_PENDING {
        Ok(Issued::Pending)
    } else {
        Err(io::Error::from_raw_os_error(err as i32))
    }
}

pub(crate) fn recv(handle: RawHandle, buf: &mut [u8], ctx: &mut OverlappedCtx) -> io::Result<Issued> {
    let mut wsabuf = WSABUF { len: buf.len() as u32, buf: buf.as_mut_ptr() };
    let mut flags: u32 = 0;
    let mut transferred: u32 = 0;
    let overlapped = &mut ctx.overlapped as *mut OVERLAPPED;
    let ret = unsafe { WSARecv(handle as SOCKET, &mut wsabuf, 1, &mut transferred, &mut flags, overlapped, None) };
    if ret == 0 {
        Ok(Issued::Done(transferred as usize))
    } else if ret == SOCKET_ERROR {
        wsa_pending_or_err()
    } else {
        unreachable!("WSARecv returned an unexpected value")
    }
}

pub(crate) fn recv_from(handle: RawHandle, buf: &mut [u8], ctx: &mut OverlappedCtx) -> io::Result<Issued> {
    let mut wsabuf = WSABUF { len: buf.len() as u32, buf: buf.as_mut_ptr() };
    let mut flags: u32 = 0;
    let mut transferred: u32 = 0;
    let addr_len_ptr = &mut ctx.addr_len as *mut i32;
    let addr_ptr = &mut ctx.addr_storage as *mut SOCKADDR_STORAGE as *mut SOCKADDR;
    let overlapped = &mut ctx.overlapped as *mut OVERLAPPED;
    let ret = unsafe {
        WSARecvFrom(handle as SOCKET, &mut wsabuf, 1, &mut transferred, &mut flags, addr_ptr, addr_len_ptr, overlapped, None)
    };
    if ret == 0 {
        Ok(Issued::Done(transferred as usize))
    } else if ret == SOCKET_ERROR {
        wsa_pending_or_err()
    } else {
        unreachable!("WSARecvFrom returned an unexpected value")
    }
}

pub(crate) fn send(handle: RawHandle, buf: &[u8], ctx: &mut OverlappedCtx) -> io::Result<Issued> {
    let wsabuf = WSABUF { len: buf.len() as u32, buf: buf.as_ptr() as *mut u8 };
    let mut transferred: u32 = 0;
    let overlapped = &mut ctx.overlapped as *mut OVERLAPPED;
    let ret = unsafe { WSASend(handle as SOCKET, &wsabuf, 1, &mut transferred, 0, overlapped, None) };
    if ret == 0 {
        Ok(Issued::Done(transferred as usize))
    } else if ret == SOCKET_ERROR {
        wsa_pending_or_err()
    } else {
        unreachable!("WSASend returned an unexpected value")
    }
}

pub(crate) fn send_to(handle: RawHandle, buf: &[u8], addr: SocketAddr, ctx: &mut OverlappedCtx) -> io::Result<Issued> {
    let storage = from_socket_addr(&addr);
    let wsabuf = WSABUF { len: buf.len() as u32, buf: buf.as_ptr() as *mut u8 };
    let mut transferred: u32 = 0;
    let overlapped = &mut ctx.overlapped as *mut OVERLAPPED;
    let ret = unsafe {
        windows_sys::Win32::Networking::WinSock::WSASendTo(
            handle as SOCKET,
            &wsabuf,
            1,
            &mut transferred,
            0,
            storage.as_ptr(),
            storage.len(),
            overlapped,
            None,
        )
    };
    if ret == 0 {
        Ok(Issued::Done(transferred as usize))
    } else if ret == SOCKET_ERROR {
        wsa_pending_or_err()
    } else {
        unreachable!("WSASendTo returned an unexpected value")
    }
}

pub(crate) fn read_file(handle: RawHandle, buf: &mut [u8], ctx: &mut OverlappedCtx) -> io::Result<Issued> {
    let mut transferred: u32 = 0;
    let overlapped = &mut ctx.overlapped as *mut OVERLAPPED;
    let ok = unsafe {
        ReadFile(handle as HANDLE, buf.as_mut_ptr() as *mut c_void, buf.len() as u32, &mut transferred, overlapped)
    };
    if ok != 0 {
        Ok(Issued::Done(transferred as usize))
    } else {
        file_pending_or_err()
    }
}

pub(crate) fn write_file(handle: RawHandle, buf: &[u8], ctx: &mut OverlappedCtx) -> io::Result<Issued> {
    let mut transferred: u32 = 0;
    let overlapped = &mut ctx.overlapped as *mut OVERLAPPED;
    let ok = unsafe {
        WriteFile(handle as HANDLE, buf.as_ptr() as *const c_void, buf.len() as u32, &mut transferred, overlapped)
    };
    if ok != 0 {
        Ok(Issued::Done(transferred as usize))
    } else {
        file_pending_or_err()
    }
}

type ConnectExFn =
    unsafe extern "system" fn(SOCKET, *const SOCKADDR, i32, *const c_void, u32, *mut u32, *mut OVERLAPPED) -> i32;
type AcceptExFn =
    unsafe extern "system" fn(SOCKET, SOCKET, *mut c_void, u32, u32, u32, *mut u32, *mut OVERLAPPED) -> i32;

const WSAID_CONNECTEX: GUID = GUID {
    data1: 0x25a2_07b9,
    data2: 0xddf3,
    data3: 0x4660,
    data4: [0x8e, 0xe9, 0x76, 0xe5, 0x8c, 0x74, 0x06, 0x3e],
};
const WSAID_ACCEPTEX: GUID = GUID {
    data1: 0xb536_7df1,
    data2: 0xcbac,
    data3: 0x11cf,
    data4: [0x95, 0xca, 0x00, 0x80, 0x5f, 0x48, 0xa1, 0x92],
};
const SIO_GET_EXTENSION_FUNCTION_POINTER: u32 = 0xC800_0006;

/// Looks an extension function up on an arbitrary socket of the right
/// address family. The resolved pointer is the same for every socket
/// using the default Winsock provider, so one lookup per process suffices
/// — cached in the `OnceLock`s below.
fn load_extension_fn<T: Copy>(socket: RawHandle, guid: &GUID) -> Option<T> {
    let mut fn_ptr: usize = 0;
    let mut bytes_returned: u32 = 0;
    let ret = unsafe {
        WSAIoctl(
            socket as SOCKET,
            SIO_GET_EXTENSION_FUNCTION_POINTER,
            guid as *const GUID as *const c_void,
            std::mem::size_of::<GUID>() as u32,
            &mut fn_ptr as *mut usize as *mut c_void,
            std::mem::size_of::<usize>() as u32,
            &mut bytes_returned,
            std::ptr::null_mut(),
            None,
        )
    };
    if ret == SOCKET_ERROR || fn_ptr == 0 {
        return None;
    }
    Some(unsafe { std::mem::transmute_copy::<usize, T>(&fn_ptr) })
}

static CONNECT_EX: OnceLock<Option<ConnectExFn>> = OnceLock::new();
static ACCEPT_EX: OnceLock<Option<AcceptExFn>> = OnceLock::new();

pub(crate) fn connect_ex(handle: RawHandle, addr: SocketAddr, ctx: &mut OverlappedCtx) -> io::Result<Issued> {
    let f = *CONNECT_EX.get_or_init(|| load_extension_fn::<ConnectExFn>(handle, &WSAID_CONNECTEX));
    let Some(f) = f else {
        return Err(io::Error::new(io::ErrorKind::Unsupported, "ConnectEx unavailable on this provider"));
    };
    let storage = from_socket_addr(&addr);
    let mut bytes_sent: u32 = 0;
    let overlapped = &mut ctx.overlapped as *mut OVERLAPPED;
    let ret = unsafe {
        f(handle as SOCKET, storage.as_ptr(), storage.len(), std::ptr::null(), 0, &mut bytes_sent, overlapped)
    };
    if ret != 0 {
        Ok(Issued::Done(bytes_sent as usize))
    } else {
        wsa_pending_or_err()
    }
}

/// Issues `AcceptEx` on a socket `ctx` already owns (`ctx.accepted_handle`
/// must be set). `ctx.accept_buf` is sized and kept alive by the caller
/// for the duration of the call.
pub(crate) fn accept_ex(listener: RawHandle, ctx: &mut OverlappedCtx) -> io::Result<Issued> {
    let f = *ACCEPT_EX.get_or_init(|| load_extension_fn::<AcceptExFn>(listener, &WSAID_ACCEPTEX));
    let Some(f) = f else {
        return Err(io::Error::new(io::ErrorKind::Unsupported, "AcceptEx unavailable on this provider"));
    };
    let accepted = ctx.accepted_handle.expect("accept_ex requires accepted_handle set first");
    ctx.accept_buf = vec![0u8; ACCEPT_ADDR_LEN * 2];
    let mut bytes_received: u32 = 0;
    let buf_ptr = ctx.accept_buf.as_mut_ptr() as *mut c_void;
    let overlapped = &mut ctx.overlapped as *mut OVERLAPPED;
    let ret = unsafe {
        f(
            listener as SOCKET,
            accepted as SOCKET,
            buf_ptr,
            0,
            ACCEPT_ADDR_LEN as u32,
            ACCEPT_ADDR_LEN as u32,
            &mut bytes_received,
            overlapped,
        )
    };
    if ret != 0 {
        Ok(Issued::Done(bytes_received as usize))
    } else {
        wsa_pending_or_err()
    }
}
