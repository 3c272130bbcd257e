//! Conversions between `std::net::SocketAddr` and the raw `sockaddr`
//! family: never reimplement an address type, convert at the syscall
//! boundary without hiding error paths.

use std::io;
use std::mem::size_of;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// Owned on-stack storage for a raw sockaddr, sized for the largest variant
/// we support. Callers pass `storage.as_ptr()` / `storage.len()` straight
/// into the syscall; this sidesteps the thread-local aliasing hazard a raw
/// pointer-returning helper would have.
pub(crate) enum SockAddr {
    V4(libc::sockaddr_in),
    V6(libc::sockaddr_in6),
}

impl SockAddr {
    pub(crate) fn as_ptr(&self) -> *const libc::sockaddr {
        match self {
            SockAddr::V4(addr) => addr as *const _ as *const libc::sockaddr,
            SockAddr::V6(addr) => addr as *const _ as *const libc::sockaddr,
        }
    }

    pub(crate) fn len(&self) -> libc::socklen_t {
        match self {
            SockAddr::V4(_) => size_of::<libc::sockaddr_in>() as libc::socklen_t,
            SockAddr::V6(_) => size_of::<libc::sockaddr_in6>() as libc::socklen_t,
        }
    }
}

pub(crate) fn from_socket_addr(addr: &SocketAddr) -> SockAddr {
    match addr {
        SocketAddr::V4(v4) => SockAddr::V4(sockaddr_in_from(v4)),
        SocketAddr::V6(v6) => SockAddr::V6(sockaddr_in6_from(v6)),
    }
}

fn sockaddr_in_from(addr: &SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        ))]
        sin_len: size_of::<libc::sockaddr_in>() as u8,
    }
}

fn sockaddr_in6_from(addr: &SocketAddrV6) -> libc::sockaddr_in6 {
    libc::sockaddr_in6 {
        sin6_family: libc::AF_INET6 as libc::sa_family_t,
        sin6_port: addr.port().to_be(),
        sin6_flowinfo: addr.flowinfo(),
        sin6_addr: libc::in6_addr {
            s6_addr: addr.ip().octets(),
        },
        sin6_scope_id: addr.scope_id(),
        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        ))]
        sin6_len: size_of::<libc::sockaddr_in6>() as u8,
    }
}

/// Reads back a `sockaddr_storage` populated by `accept`/`recvfrom`/etc.
///
/// # Safety
/// `storage` must point at an initialized `sockaddr_storage` whose
/// `ss_family` names either `AF_INET` or `AF_INET6`.
pub(crate) unsafe fn to_socket_addr(
    storage: *const libc::sockaddr_storage,
) -> io::Result<SocketAddr> {
    match (*storage).ss_family as libc::c_int {
        libc::AF_INET => {
            let addr: libc::sockaddr_in = *(storage as *const libc::sockaddr_in);
            let ip = Ipv4Addr::from(u32::from_ne_bytes(addr.sin_addr.s_addr.to_ne_bytes()));
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(addr.sin_port))))
        }
        libc::AF_INET6 => {
            let addr: libc::sockaddr_in6 = *(storage as *const libc::sockaddr_in6);
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(addr.sin6_port),
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        family => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported address family {family}"),
        )),
    }
}
