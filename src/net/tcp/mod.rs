//! Stream-socket facade .

mod listener;
mod socket;
mod stream;

pub use self::listener::TcpListener;
pub use self::stream::TcpStream;

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::AsyncOpStatus;
use crate::reactor::AsyncBase;

/// Free-function form of [`TcpStream::connect`], used by the coroutine
/// adapter (`crate::coroutine::io_connect`) which needs a plain function
/// pointer shape rather than a method to pass to its blocking helper.
pub fn aio_connect(
    reactor: &AsyncBase,
    addr: SocketAddr,
    timeout: Option<Duration>,
    callback: impl FnOnce(AsyncOpStatus, Option<TcpStream>) + Send + 'static,
) -> std::io::Result<()> {
    TcpStream::connect(reactor, addr, timeout, callback)
}
