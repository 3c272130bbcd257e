//! Stream-socket listener facade ( `accept`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::combiner;
use crate::error::AsyncOpStatus;
use crate::flags::AsyncFlags;
use crate::object::{HandleKind, ObjectInner};
use crate::op::{OpBuffer, Opcode, OperationRecord};
use crate::reactor::AsyncBase;

use super::socket::new_object;
use super::TcpStream;

/// A bound, listening TCP socket driven by the combiner.
#[derive(Clone)]
pub struct TcpListener {
    object: Arc<ObjectInner>,
    reactor: AsyncBase,
}

impl TcpListener {
    pub fn bind(reactor: &AsyncBase, addr: SocketAddr) -> std::io::Result<Self> {
        let handle = crate::sys::tcp_bind(addr)?;
        let object = new_object(reactor, handle)?;
        Ok(TcpListener { object, reactor: reactor.clone() })
    }

    /// Accepts a new connection. `callback` receives the terminal status
    /// and, on success, the new stream and its peer address. Accept never
    /// reports a byte count, so `ACTIVE_ONCE` has nothing to hand back by
    /// value; this always returns `None`.
    pub fn aio_accept(
        &self,
        timeout: Option<Duration>,
        callback: impl FnOnce(AsyncOpStatus, Option<(TcpStream, SocketAddr)>) + Send + 'static,
    ) {
        let reactor = self.reactor.clone();
        let end_time_us = timeout.map(|d| reactor.now_us() + d.as_micros() as u64);
        let op = OperationRecord::new(
            Opcode::Accept,
            AsyncFlags::empty(),
            Box::new(move |op: &OperationRecord| {
                let status = op.status();
                let result = if status == AsyncOpStatus::Success {
                    let output = op.output.lock();
                    output.accepted.and_then(|handle| {
                        let peer = output.peer?;
                        let object = ObjectInner::new(handle, reactor.clone(), reactor.new_token(), HandleKind::Socket);
                        if reactor.register(&object, crate::reactor::Interest::BOTH).is_err() {
                            return None;
                        }
                        Some((TcpStream { object }, peer))
                    })
                } else {
                    None
                };
                callback(status, result);
            }),
            OpBuffer::None,
            end_time_us,
            None,
        );
        combiner::arm_timeout(&self.reactor, &op);
        combiner::submit(&self.object, Opcode::Accept.direction(), op);
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        crate::sys::local_addr(self.object.handle)
    }

    /// Tears the listener down: every queued accept finishes with
    /// `Canceled`, then it is deregistered from the reactor.
    pub fn delete(&self) {
        combiner::request_delete(&self.object);
    }

    /// Cancels every queued accept without deregistering the listener.
    pub fn cancel_io(&self) {
        combiner::cancel_io(&self.object);
    }
}
