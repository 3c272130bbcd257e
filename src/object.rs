//! The per-I/O-object combiner state. This is the "single atomic tag word
//! elects one thread as the combiner" design: a
//! push only ever needs one atomic RMW to know whether it must run the
//! combiner loop itself or whether another thread already owns it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use log::debug;
use parking_lot::Mutex;

use crate::op::OperationRecord;
use crate::reactor::Handle as ReactorHandle;
use crate::sys::RawHandle;
use crate::token::Token;

/// Which queue an operation belongs to on the object. Connect/accept ops
/// wait on the read side (they become ready the same way a read would:
/// EPOLLIN / readable), matching asyncio.c's treatment of `ioAccept` on the
/// read queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// Distinguishes a socket handle from a generic device handle. Unused on
/// unix, where `read(2)`/`write(2)` work identically on either; the Windows
/// executors need it to pick `WSARecv`/`WSASend` vs. `ReadFile`/`WriteFile`,
/// since both handle kinds share the same `RawHandle` representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleKind {
    Socket,
    Device,
}

/// Low 24 bits of the tag word: count of outstanding contributions
/// (pushed operations/counters not yet folded into the combiner's view).
/// High 8 bits: sticky status bits a pusher can OR in without taking the
/// combiner role itself.
const OP_COUNT_MASK: u32 = 0x00FF_FFFF;
pub(crate) const READ_READY: u32 = 1 << 24;
pub(crate) const WRITE_READY: u32 = 1 << 25;
pub(crate) const ERROR_EOF: u32 = 1 << 26;
pub(crate) const DELETE: u32 = 1 << 27;
/// Drains both queues with `Canceled` without tearing the object down —
/// unlike `DELETE`, the registration stays live and the object is reusable
/// afterward. `DELETE` always carries this bit too, since a deletion also
/// needs every queued operation canceled before deregistration.
pub(crate) const CANCEL_ALL: u32 = 1 << 28;

/// The shared, heap-allocated state behind every handle the public API
/// hands out (`TcpStream`, `UdpSocket`, `Device`, ...). An intrusive
/// doubly linked queue per direction would be the classic C approach; we
/// use a `Mutex`-guarded `VecDeque<Arc<OperationRecord>>` instead, since
/// every operation is already a heap-allocated `Arc`, an intrusive link
/// field would save one allocation we aren't making in the first place,
/// while costing us `unsafe` pointer juggling for reordering/removal. The
/// single-writer invariant below (only the combiner owner touches the
/// queues) is what the intrusive design was actually protecting; this
/// preserves it without `unsafe`.
pub(crate) struct ObjectInner {
    pub(crate) handle: RawHandle,
    pub(crate) reactor: ReactorHandle,
    pub(crate) token: Token,
    pub(crate) kind: HandleKind,

    /// The single atomic word every pusher contends on. A `fetch_add` that
    /// observes the op-count bits transition 0→nonzero elects that thread
    /// as combiner owner for this pass.
    pub(crate) tag: AtomicU32,

    pub(crate) read_queue: Mutex<VecDeque<Arc<OperationRecord>>>,
    pub(crate) write_queue: Mutex<VecDeque<Arc<OperationRecord>>>,

    /// Inbox for operations submitted by a thread that lost the combiner
    /// race: the owner drains this each pass.
    pub(crate) announcements: Mutex<VecDeque<(Direction, Arc<OperationRecord>)>>,

    /// Optional inline receive buffer for stream sockets, reinstated from
    /// asyncio.c's `internalBuffer`: lets small reads be satisfied out of
    /// a buffer already filled by a prior over-read instead of issuing a
    /// fresh syscall.
    pub(crate) recv_buffer: Mutex<Option<RecvBuffer>>,

    /// Slot the IOCP backend drops a finished overlapped call's result
    /// into, keyed by direction, before waking the combiner the same way
    /// `on_reactor_event` would for readiness on the other backends. The
    /// Windows executors check here first before issuing a fresh
    /// `WSARecv`/`WSASend`/`ReadFile`/`WriteFile`/`AcceptEx`.
    #[cfg(windows)]
    pub(crate) windows_io: Mutex<WindowsIoState>,
}

#[cfg(windows)]
#[derive(Default)]
pub(crate) struct WindowsIoState {
    pub(crate) read_result: Option<WindowsOpResult>,
    pub(crate) write_result: Option<WindowsOpResult>,
}

#[cfg(windows)]
pub(crate) struct WindowsOpResult {
    pub(crate) bytes: u32,
    pub(crate) success: bool,
    pub(crate) accepted: Option<RawHandle>,
    pub(crate) peer: Option<std::net::SocketAddr>,
}

pub(crate) struct RecvBuffer {
    pub(crate) data: Vec<u8>,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl ObjectInner {
    pub(crate) fn new(handle: RawHandle, reactor: ReactorHandle, token: Token, kind: HandleKind) -> Arc<Self> {
        debug!("object created, token={:?}", token);
        Arc::new(ObjectInner {
            handle,
            reactor,
            token,
            kind,
            tag: AtomicU32::new(0),
            read_queue: Mutex::new(VecDeque::new()),
            write_queue: Mutex::new(VecDeque::new()),
            announcements: Mutex::new(VecDeque::new()),
            recv_buffer: Mutex::new(None),
            #[cfg(windows)]
            windows_io: Mutex::new(WindowsIoState::default()),
        })
    }

    /// Contributes `delta` to the op-count bits, returning the *previous*
    /// word. A caller sees `(prev & OP_COUNT_MASK) == 0` exactly when it
    /// must run the combiner loop itself.
    pub(crate) fn fetch_add_tag(&self, delta: u32) -> u32 {
        self.tag.fetch_add(delta, Ordering::AcqRel)
    }

    pub(crate) fn fetch_sub_tag(&self, delta: u32) -> u32 {
        self.tag.fetch_sub(delta, Ordering::AcqRel)
    }

    /// ORs a sticky status bit into the tag word without contending for
    /// combiner ownership. Used by the reactor to record readiness: the
    /// reactor only flips bits, it never drains queues itself.
    pub(crate) fn set_status_bits(&self, bits: u32) -> u32 {
        self.tag.fetch_or(bits, Ordering::AcqRel)
    }

    pub(crate) fn clear_status_bits(&self, bits: u32) {
        self.tag.fetch_and(!bits, Ordering::AcqRel);
    }

    pub(crate) fn op_count(word: u32) -> u32 {
        word & OP_COUNT_MASK
    }

    pub(crate) fn queue_for(&self, direction: Direction) -> &Mutex<VecDeque<Arc<OperationRecord>>> {
        match direction {
            Direction::Read => &self.read_queue,
            Direction::Write => &self.write_queue,
        }
    }

    /// Installs an inline receive-side cache of `capacity` bytes. Once
    /// installed, reads are served out of it before falling back to a
    /// fresh syscall.
    pub(crate) fn set_recv_buffer(&self, capacity: usize) {
        *self.recv_buffer.lock() = Some(RecvBuffer { data: vec![0u8; capacity], start: 0, end: 0 });
    }
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        debug!("object destroyed, token={:?}", self.token);
    }
}

/// A weak-referencing companion used by the reactor's token table, so a
/// closed object doesn't keep a combiner pass alive past its own drop.
pub(crate) type ObjectWeak = Weak<ObjectInner>;
