//! The thin I/O facade : stream sockets, datagram sockets, and
//! generic devices, each a cheap handle wrapping a combiner-managed
//! [`crate::object::ObjectInner`].

#[cfg(feature = "net")]
mod tcp;
#[cfg(feature = "net")]
pub use self::tcp::{aio_connect, TcpListener, TcpStream};

#[cfg(feature = "net")]
mod udp;
#[cfg(feature = "net")]
pub use self::udp::UdpSocket;

#[cfg(feature = "net")]
mod device;
#[cfg(feature = "net")]
pub use self::device::Device;
