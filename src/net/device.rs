//! Generic device facade: an arbitrary readable/writable descriptor
//! driven by the same combiner machinery as a socket, with no
//! connect/accept/address dance.

use std::sync::Arc;
use std::time::Duration;

use crate::combiner;
use crate::error::AsyncOpStatus;
use crate::flags::AsyncFlags;
use crate::object::{HandleKind, ObjectInner};
use crate::op::{OpBuffer, Opcode, OperationRecord};
use crate::reactor::{AsyncBase, Interest};
use crate::sys::RawHandle;

/// A combiner-managed descriptor — a pipe, tty, or other already-open
/// handle the caller hands in.
#[derive(Clone)]
pub struct Device {
    object: Arc<ObjectInner>,
}

impl Device {
    /// Takes ownership of `handle`, puts it in nonblocking mode, and
    /// registers it with `reactor`.
    pub fn new(reactor: &AsyncBase, handle: RawHandle) -> std::io::Result<Self> {
        let handle = crate::sys::prepare_device(handle)?;
        let token = reactor.new_token();
        let object = ObjectInner::new(handle, reactor.clone(), token, HandleKind::Device);
        reactor.register(&object, Interest::BOTH)?;
        Ok(Device { object })
    }

    /// Tears the device down: every queued read/write finishes with
    /// `Canceled`, then it is deregistered from the reactor.
    pub fn delete(&self) {
        combiner::request_delete(&self.object);
    }

    /// Cancels every queued read/write without deregistering the device.
    pub fn cancel_io(&self) {
        combiner::cancel_io(&self.object);
    }

    pub fn aio_read(
        &self,
        buf: &mut [u8],
        flags: AsyncFlags,
        timeout: Option<Duration>,
        callback: impl FnOnce(AsyncOpStatus, usize) + Send + 'static,
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
