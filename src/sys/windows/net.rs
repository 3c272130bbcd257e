//! `SocketAddr` <-> `SOCKADDR_IN`/`SOCKADDR_IN6` conversion, mirroring
//! `sys/unix/net.rs`'s owned-enum approach (no heap allocation, no
//! thread-local scratch space).

use std::io;
use std::mem::size_of;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};

use windows_sys::Win32::Networking::WinSock::{
    AF_INET, AF_INET6, IN6_ADDR, IN6_ADDR_0, SOCKADDR, SOCKADDR_IN, SOCKADDR_IN6, SOCKADDR_IN6_0,
    SOCKADDR_STORAGE,
};

pub(crate) enum SockAddr {
    V4(SOCKADDR_IN),
    V6(SOCKADDR_IN6),
}

impl SockAddr {
    pub(crate) fn as_ptr(&self) -> *const SOCKADDR {
        match self {
            SockAddr::V4(addr) => addr as *const _ as *const SOCKADDR,
            SockAddr::V6(addr) => addr as *const _ as *const SOCKADDR,
        }
    }

    pub(crate) fn len(&self) -> i32 {
        match self {
            SockAddr::V4(_) => size_of::<SOCKADDR_IN>() as i32,
            SockAddr::V6(_) => size_of::<SOCKADDR_IN6>() as i32,
        }
    }
}

pub(crate) fn from_socket_addr(addr: &SocketAddr) -> SockAddr {
    match addr {
        SocketAddr::V4(addr) => {
            let mut sa: SOCKADDR_IN = unsafe { std::mem::zeroed() };
            sa.sin_family = AF_INET;
            sa.sin_port = addr.port().to_be();
            sa.sin_addr.S_un.S_addr = u32::from_ne_bytes(addr.ip().octets());
            SockAddr::V4(sa)
        }
        SocketAddr::V6(addr) => {
            let mut sa: SOCKADDR_IN6 = unsafe { std::mem::zeroed() };
            sa.sin6_family = AF_INET6;
            sa.sin6_port = addr.port().to_be();
            sa.sin6_flowinfo = addr.flowinfo();
            sa.Anonymous = SOCKADDR_IN6_0 {
                sin6_addr: IN6_ADDR { u: IN6_ADDR_0 { Byte: addr.ip().octets() } },
            };
            SockAddr::V6(sa)
        }
    }
}

pub(crate) unsafe fn to_socket_addr(storage: *const SOCKADDR_STORAGE) -> io::Result<SocketAddr> {
    let family = (*storage).ss_family;
    if family == AF_INET {
        let sa = &*(storage as *const SOCKADDR_IN);
        let octets = sa.sin_addr.S_un.S_addr.to_ne_bytes();
        Ok(SocketAddr::V4(SocketAddrV4::new(octets.into(), u16::from_be(sa.sin_port))))
    } else if family == AF_INET6 {
        let sa = &*(storage as *const SOCKADDR_IN6);
        let octets = sa.Anonymous.sin6_addr.u.Byte;
        Ok(SocketAddr::V6(SocketAddrV6::new(
            octets.into(),
            u16::from_be(sa.sin6_port),
            sa.sin6_flowinfo,
            0,
        )))
    } else {
        Err(io::Error::new(io::ErrorKind::InvalidInput, "unsupported address family"))
    }
}
