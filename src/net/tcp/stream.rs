//! Stream-socket facade ( `read`/`write`/`connect` surface for
//! TCP). Each public method builds an [`OperationRecord`], pushes it
//! through the combiner, and lets the caller's callback run whenever the
//! combiner (on this thread, if the fast path fires, or a loop thread
//! otherwise) finishes it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::combiner;
use crate::error::AsyncOpStatus;
use crate::flags::AsyncFlags;
use crate::object::ObjectInner;
use crate::op::{OpBuffer, Opcode, OperationRecord};
use crate::reactor::AsyncBase;

use super::socket::new_object;

/// A nonblocking TCP connection driven by the combiner. Cheap to clone;
/// every clone shares the same underlying [`ObjectInner`].
#[derive(Clone)]
pub struct TcpStream {
    pub(crate) object: Arc<ObjectInner>,
}

/// A raw pointer/length pair into a caller-owned buffer, used to splice
/// the op's internal scratch buffer back out once it resolves. Only ever
/// dereferenced from the finisher; every caller in this crate keeps the
/// target buffer alive until then (the coroutine adapter blocks on it,
/// a direct callback caller owns the buffer for the op's lifetime — the
/// same obligation any readiness-based I/O source places on borrowed
/// buffers).
struct BufSlot {
    ptr: *mut u8,
    len: usize,
}
unsafe impl Send for BufSlot {}

impl TcpStream {
    /// Installs an inline receive-side cache of `capacity` bytes:
    /// subsequent reads are served out of it before falling back to a
    /// fresh syscall.
    pub fn set_recv_buffer(&self, capacity: usize) {
        self.object.set_recv_buffer(capacity);
    }

    /// Tears the connection down: every queued read/write finishes with
    /// `Canceled`, then the socket is deregistered from the reactor.
    pub fn delete(&self) {
        combiner::request_delete(&self.object);
    }

    /// Cancels every operation currently queued on this connection without
    /// deregistering it — the socket remains usable for new operations
    /// afterward.
    pub fn cancel_io(&self) {
        combiner::cancel_io(&self.object);
    }

    /// Begins a nonblocking connect and returns immediately; `callback`
    /// runs once the connection resolves (or fails). See
    /// [`super::aio_connect`] for the free-function form used by the
    /// coroutine adapter.
    pub fn connect(
        reactor: &AsyncBase,
        addr: SocketAddr,
        timeout: Option<Duration>,
        callback: impl FnOnce(AsyncOpStatus, Option<TcpStream>) + Send + 'static,
    ) -> std::io::Result<()> {
        let (handle, done) = crate::sys::tcp_connect(addr)?;
        let object = new_object(reactor, handle)?;
        let stream = TcpStream { object: object.clone() };

        if done {
            callback(AsyncOpStatus::Success, Some(stream));
            return Ok(());
        }

        let end_time_us = timeout.map(|d| reactor.now_us() + d.as_micros() as u64);
        let stream_for_cb = stream.clone();
        let op = OperationRecord::new(
            Opcode::Connect,
            AsyncFlags::empty(),
            Box::new(move |op: &OperationRecord| {
                let status = op.status();
                let result = if status == AsyncOpStatus::Success { Some(stream_for_cb.clone()) } else { None };
                callback(status, result);
            }),
            OpBuffer::None,
            end_time_us,
            Some(addr),
        );
        combiner::arm_timeout(reactor, &op);
        combiner::submit(&object, Opcode::Connect.direction(), op);
        Ok(())
    }

    /// Reads into `buf`. `callback` receives the terminal status and the
    /// number of bytes transferred (`0` on any non-`Success` status). If
    /// `flags` carries `ACTIVE_ONCE` and the read completes within this
    /// call, the count is also returned directly instead of only reaching
    /// the caller through `callback`.
    pub fn aio_read(
        &self,
        buf: &mut [u8],
        flags: AsyncFlags,
        timeout: Option<Duration>,
        callback: impl FnOnce(AsyncOpStatus, usize) + Send + 'static,
    ) -> Option<usize> {
        let slot = BufSlot { ptr: buf.as_mut_ptr(), len: buf.len() };
        let end_time_us = timeout.map(|d| self.object.reactor.now_us() + d.as_micros() as u64);
        let reactor = self.object.reactor.clone();
        let scratch = reactor.acquire_buffer(slot.len);
        let op = OperationRecord::new(
            Opcode::Read,
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
                if !op.delivered_by_value.load(std::sync::atomic::Ordering::Acquire) {
                    callback(op.status(), n);
                }
            }),
            OpBuffer::Read { buf: scratch, filled: 0 },
            end_time_us,
            None,
        );
        combiner::arm_timeout(&self.object.reactor, &op);
        combiner::submit(&self.object, Opcode::Read.direction(), op)
    }

    pub fn aio_write(
        &self,
        buf: &[u8],
        flags: AsyncFlags,
        timeout: Option<Duration>,
        callback: impl FnOnce(AsyncOpStatus, usize) + Send + 'static,
    ) -> Option<usize> {
        let reactor = self.object.reactor.clone();
        let mut owned = reactor.acquire_buffer(buf.len());
        owned.copy_from_slice(buf);
        let end_time_us = timeout.map(|d| self.object.reactor.now_us() + d.as_micros() as u64);
        let op = OperationRecord::new(
            Opcode::Write,
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
            None,
        );
        combiner::arm_timeout(&self.object.reactor, &op);
        combiner::submit(&self.object, Opcode::Write.direction(), op)
    }
}
