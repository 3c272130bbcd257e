//! The operation record and its executor/finisher vtable: a trait with
//! three methods, where each opcode is a variant implementing the trait
//! rather than a class hierarchy.

mod exec;

pub(crate) use exec::ExecOutcome;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar};

use parking_lot::Mutex;

use crate::error::AsyncOpStatus;
use crate::flags::AsyncFlags;
use crate::object::Direction;

/// Which async entry point created the operation; selects the executor and
/// the direction (read-side vs write-side) it belongs to in the object's
/// queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Connect,
    Accept,
    Read,
    Write,
    ReadMsg,
    WriteMsg,
    UserEvent,
}

impl Opcode {
    pub(crate) fn direction(self) -> Direction {
        match self {
            // A nonblocking connect resolves on writability, the standard
            // POSIX `connect(2)` + `poll(POLLOUT)` idiom.
            Opcode::Connect | Opcode::Write | Opcode::WriteMsg => Direction::Write,
            Opcode::Accept | Opcode::Read | Opcode::ReadMsg => Direction::Read,
            Opcode::UserEvent => Direction::Read,
        }
    }
}

/// Action carried alongside an operation into the combiner ("Phase B").
/// The two entry points (`combinerCallWithoutLock`, `combinerCallDelayed`)
/// are collapsed into `push_operation`/`push_counter`; this enum is the
/// remaining per-item instruction the combiner dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Start,
    Finish(AsyncOpStatus),
    Cancel,
}

/// Output payload once an operation has resolved. Stored on the record so a
/// finisher (running later, off the combiner) can read it out.
#[derive(Debug, Default)]
pub(crate) struct OpOutput {
    pub transferred: usize,
    pub peer: Option<SocketAddr>,
    pub accepted: Option<crate::sys::RawHandle>,
}

/// Packed (generation, status) word. The generation increments on every
/// cancel or successful finish so a late reactor/timer event referencing a
/// stale operation can be told apart from a live one.
pub(crate) struct StatusTag(AtomicU32);

const GENERATION_SHIFT: u32 = 8;

impl StatusTag {
    pub fn new() -> Self {
        StatusTag(AtomicU32::new(encode(0, AsyncOpStatus::Pending)))
    }

    pub fn generation(&self) -> u32 {
        self.0.load(Ordering::Acquire) >> GENERATION_SHIFT
    }

    pub fn status(&self) -> AsyncOpStatus {
        decode(self.0.load(Ordering::Acquire)).1
    }

    /// The single compare-and-swap transition: only succeeds if
    /// `expected_generation` still matches, so a timer that fires after
    /// the op was already finished by the reactor (or vice versa) silently
    /// loses the race instead of double-finishing the op.
    pub fn try_finish(&self, expected_generation: u32, status: AsyncOpStatus) -> bool {
        let current = self.0.load(Ordering::Acquire);
        let (gen, cur_status) = decode(current);
        if gen != expected_generation || cur_status.is_terminal() {
            return false;
        }
        let next = encode(gen.wrapping_add(1), status);
        self.0
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Used only by the fast path where no concurrent finisher can
    /// possibly race: the op has not yet been handed to any other thread.
    pub fn force(&self, status: AsyncOpStatus) {
        let gen = self.generation();
        self.0
            .store(encode(gen.wrapping_add(1), status), Ordering::Release);
    }
}

fn encode(generation: u32, status: AsyncOpStatus) -> u32 {
    (generation << GENERATION_SHIFT) | (status as u32)
}

fn decode(word: u32) -> (u32, AsyncOpStatus) {
    let status = match word & 0xFF {
        0 => AsyncOpStatus::Pending,
        1 => AsyncOpStatus::Success,
        2 => AsyncOpStatus::Timeout,
        3 => AsyncOpStatus::Disconnected,
        4 => AsyncOpStatus::Canceled,
        5 => AsyncOpStatus::BufferTooSmall,
        _ => AsyncOpStatus::UnknownError,
    };
    (word >> GENERATION_SHIFT, status)
}

type FinisherFn = dyn FnOnce(&OperationRecord) + Send;

/// One in-flight async request.
pub struct OperationRecord {
    pub(crate) opcode: Opcode,
    pub(crate) flags: AsyncFlags,
    pub(crate) status: StatusTag,
    /// Runs exactly once per op, per the combiner's single-writer
    /// guarantee — taken out of the `Mutex` rather than called through a
    /// shared `&Box<dyn Fn>`, since most finishers need to consume a
    /// caller-supplied `FnOnce` callback.
    pub(crate) finisher: Mutex<Option<Box<FinisherFn>>>,

    pub(crate) buffer: Mutex<OpBuffer>,
    pub(crate) output: Mutex<OpOutput>,

    /// Absolute deadline in microseconds since `UNIX_EPOCH`, or `None` for no
    /// timeout. Mutually exclusive with a bare relative timeout in 
    /// C union; in Rust we simply store the resolved absolute value once at
    /// submission time.
    pub(crate) end_time_us: Option<u64>,
    pub(crate) timer_id: Mutex<Option<crate::reactor::RealtimeTimerId>>,

    pub(crate) peer_address: Mutex<Option<SocketAddr>>,

    /// Incremented once per pass through the executor, at queue-head.
    /// Reading `1` right after a `Success` outcome means the op resolved on
    /// its very first attempt — the only case the fast path's `ActiveOnce`
    /// return-by-value contract applies to.
    pub(crate) attempts: AtomicU32,
    /// Set by the combiner when an `ActiveOnce` op finishes synchronously
    /// within the submitting call; the facade's finisher closure checks this
    /// and skips invoking the caller's callback, since the transferred count
    /// is instead handed back as the submission call's return value.
    pub(crate) delivered_by_value: AtomicBool,
    /// Present only for `SERIALIZED` submissions that did not become the
    /// combiner owner: the submitting thread blocks on this until whichever
    /// thread does own the object has run this op's finisher.
    pub(crate) serialized_wait: Mutex<Option<Arc<SerializedWait>>>,
}

/// A one-shot blocking handshake between a `SERIALIZED` submission call and
/// the (possibly different) thread that ends up running its finisher.
pub(crate) struct SerializedWait {
    done: std::sync::Mutex<bool>,
    condvar: Condvar,
}

impl SerializedWait {
    pub(crate) fn new() -> Self {
        SerializedWait { done: std::sync::Mutex::new(false), condvar: Condvar::new() }
    }

    pub(crate) fn signal(&self) {
        *self.done.lock().unwrap() = true;
        self.condvar.notify_one();
    }

    pub(crate) fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.condvar.wait(done).unwrap();
        }
    }
}

/// Buffer state for read/write family operations. A connect/accept op has
/// neither; `None` for both fields in that case.
pub(crate) enum OpBuffer {
    Read { buf: Vec<u8>, filled: usize },
    Write { buf: Vec<u8>, sent: usize },
    None,
}

impl OperationRecord {
    /// Builds a fresh, never-yet-submitted operation. Centralizes the
    /// boilerplate every `aio_*`/`io_*` entry point otherwise repeats, and
    /// the one place the fast-path bookkeeping fields (`attempts`,
    /// `delivered_by_value`, `serialized_wait`) get their initial state.
    pub(crate) fn new(
        opcode: Opcode,
        flags: AsyncFlags,
        finisher: Box<FinisherFn>,
        buffer: OpBuffer,
        end_time_us: Option<u64>,
        peer_address: Option<SocketAddr>,
    ) -> Arc<Self> {
        Arc::new(OperationRecord {
            opcode,
            flags,
            status: StatusTag::new(),
            finisher: Mutex::new(Some(finisher)),
            buffer: Mutex::new(buffer),
            output: Mutex::new(OpOutput::default()),
            end_time_us,
            timer_id: Mutex::new(None),
            peer_address: Mutex::new(peer_address),
            attempts: AtomicU32::new(0),
            delivered_by_value: AtomicBool::new(false),
            serialized_wait: Mutex::new(None),
        })
    }

    pub(crate) fn status(&self) -> AsyncOpStatus {
        self.status.status()
    }

    pub(crate) fn generation(&self) -> u32 {
        self.status.generation()
    }

    /// Runs the finisher exactly once, then releases anyone blocked in a
    /// `SERIALIZED` submission's `SerializedWait::wait`. Signaling always
    /// happens after the finisher — including the no-finisher case (already
    /// taken by a previous call) — so a `SERIALIZED` caller never blocks
    /// past the point its callback actually ran.
    pub(crate) fn run_finisher(self: &std::sync::Arc<Self>) {
        if let Some(finisher) = self.finisher.lock().take() {
            finisher(self);
        }
        if let Some(wait) = self.serialized_wait.lock().take() {
            wait.signal();
        }
    }
}

impl std::fmt::Debug for OperationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRecord")
            .field("opcode", &self.opcode)
            .field("flags", &self.flags)
            .field("status", &self.status())
            .finish()
    }
}
