//! Datagram-socket facade ( `read_msg`/`write_msg`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::combiner;
use crate::error::AsyncOpStatus;
use crate::flags::AsyncFlags;
use crate::object::{HandleKind, ObjectInner};
use crate::op::{OpBuffer, Opcode, OperationRecord};
use crate::reactor::{AsyncBase, Interest};

/// A nonblocking UDP endpoint driven by the combiner.
#[derive(Clone)]
pub struct UdpSocket {
    object: Arc<ObjectInner>,
}

impl UdpSocket {
    pub fn bind(reactor: &AsyncBase, addr: SocketAddr) -> std::io::Result<Self> {
        let handle = crate::sys::udp_bind(addr)?;
        let token = reactor.new_token();
        let object = ObjectInner::new(handle, reactor.clone(), token, HandleKind::Socket);
        reactor.register(&object, Interest::BOTH)?;
        Ok(UdpSocket { object })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        crate::sys::local_addr(self.object.handle)
    }

    /// Tears the socket down: every operation currently queued on either
    /// side finishes with `Canceled`, then the socket is deregistered from
    /// the reactor. Safe to call from any thread, including from a
    /// user-event callback firing
    /// on a loop thread while ops are in flight.
    pub fn delete(&self) {
        combiner::request_delete(&self.object);
    }

    /// Cancels every operation currently queued on this socket without
    /// deregistering it.
    pub fn cancel_io(&self) {
        combiner::cancel_io(&self.object);
    }

    /// Receives one datagram into `buf`. `callback` receives the terminal
    /// status, the byte count, and the sender's address.
    pub fn aio_read_msg(
        &self,
        buf: &mut [u8],
        flags: AsyncFlags,
        timeout: Option<Duration>,
        callback: impl FnOnce(AsyncOpStatus, usize, Option<SocketAddr>) + Send + 'static,
    ) -> Option<usize> {
        let ptr = buf.as_mut_ptr();
        let len = buf.len();
        struct BufSlot { ptr: *mut u8, len: usize }
        unsafe impl Send for BufSlot {}
        let slot = BufSlot { ptr, len };

        let end_time_us = timeout.map(|d| self.object.reactor.now_us() + d.as_micros() as u64);
        let reactor = self.object.reactor.clone();
        let scratch = reactor.acquire_buffer(len);
        let op = OperationRecord::new(
            Opcode::ReadMsg,
            flags,
            Box::new(move |op: &OperationRecord| {
                let owned = std::mem::replace(&mut *op.buffer.lock(), OpBuffer::None);
                let n = if let OpBuffer::Read { buf: internal, filled } = owned {
                    let n = filled.min(slot.len);
                    unsafe {
                        std::ptr::copy_nonoverlapping(internal.as_ptr(), slot.ptr, n);
                    }
                    reactor.release_buffer(internal);
                    n
                } else {
                    0
                };
                let peer = op.output.lock().peer;
                if !op.delivered_by_value.load(std::sync::atomic::Ordering::Acquire) {
                    callback(op.status(), n, peer);
                }
            }),
            OpBuffer::Read { buf: scratch, filled: 0 },
            end_time_us,
            None,
        );
        combiner::arm_timeout(&self.object.reactor, &op);
        combiner::submit(&self.object, Opcode::ReadMsg.direction(), op)
    }

    pub fn aio_write_msg(
        &self,
        buf: &[u8],
        peer: SocketAddr,
        flags: AsyncFlags,
        timeout: Option<Duration>,
        callback: impl FnOnce(AsyncOpStatus, usize) + Send + 'static,
    ) -> Option<usize> {
        let reactor = self.object.reactor.clone();
        let mut owned = reactor.acquire_buffer(buf.len());
        owned.copy_from_slice(buf);
        let end_time_us = timeout.map(|d| self.object.reactor.now_us() + d.as_micros() as u64);
        let op = OperationRecord::new(
            Opcode::WriteMsg,
            flags,
            Box::new(move |op: &OperationRecord| {
                let n = op.output.lock().transferred;
                if let OpBuffer::Write { buf, .. } = std::mem::replace(&mut *op.buffer.lock(), OpBuffer::None) {
                    reactor.release_buffer(buf);
                }
                if !op.delivered_by_value.load(std::sync::atomic::Ordering::Acquire) {
                    callback(op.status(), n);
                }
            }),
            OpBuffer::Write { buf: owned, sent: 0 },
            end_time_us,
            Some(peer),
        );
        combiner::arm_timeout(&self.object.reactor, &op);
        combiner::submit(&self.object, Opcode::WriteMsg.direction(), op)
    }
}
