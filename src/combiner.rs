//! The lock-free combiner. One atomic tag word per object elects a single
//! thread to drain both queues and drive the executors; every other
//! contributor's `fetch_add` returns a nonzero previous count and simply
//! leaves its contribution in the announcement queue for the owner to
//! find.
//!
//! Grounded on `original_source/src/asyncio/asyncio.c`'s
//! `combinerCallWithoutLock`/`combinerCallDelayed`/`combinerAddAction`,
//! collapsed into the two entry points below plus a single
//! `combiner_loop`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, error, trace};

use crate::error::AsyncOpStatus;
use crate::flags::AsyncFlags;
use crate::object::{Direction, ObjectInner, CANCEL_ALL, DELETE, ERROR_EOF, READ_READY, WRITE_READY};
use crate::op::{ExecOutcome, OpBuffer, OperationRecord, SerializedWait};
use crate::reactor::{Interest, Readiness};

thread_local! {
    /// Nonzero while this thread is already inside a finisher call, so a
    /// finisher that triggers a fresh synchronous completion (e.g. the
    /// callback immediately submits another op that also finishes inline)
    /// defers that nested finisher instead of recursing the call stack.
    static FINISHER_DEPTH: std::cell::Cell<usize> = std::cell::Cell::new(0);
    static DEFERRED_FINISHERS: std::cell::RefCell<std::collections::VecDeque<Arc<OperationRecord>>> =
        std::cell::RefCell::new(std::collections::VecDeque::new());
}

/// Runs `op`'s finisher, deferring it to a flat queue instead of recursing
/// if the calling thread is already inside another finisher.
fn run_finisher_bounded(op: Arc<OperationRecord>) {
    FINISHER_DEPTH.with(|depth| {
        if depth.get() > 0 {
            DEFERRED_FINISHERS.with(|q| q.borrow_mut().push_back(op));
            return;
        }
        depth.set(1);
        op.run_finisher();
        loop {
            let next = DEFERRED_FINISHERS.with(|q| q.borrow_mut().pop_front());
            match next {
                Some(op) => op.run_finisher(),
                None => break,
            }
        }
        depth.set(0);
    });
}

/// Maximum number of operations a single thread will finish inline off its
/// own stack before it must hand the rest to the owner's next pass.
/// Grounded directly on asyncio.c's `MAX_SYNCHRONOUS_FINISHED_OPERATION`,
/// preventing unbounded recursion when a burst of synchronous completions
/// would otherwise chain into each other.
pub(crate) const MAX_SYNCHRONOUS_FINISHED_OPERATIONS: usize = 32;

/// The three-layer fast path every `aio_*` entry point funnels through:
/// push the op, and if it happens to finish synchronously within this very
/// call, hand its result back by value instead of only through the
/// callback.
///
/// - `SERIALIZED`: the submitting thread always blocks until the op's
///   finisher has run — on whichever thread ends up owning the combiner —
///   then returns `None` (the callback already ran, by the time this
///   returns).
/// - `ACTIVE_ONCE`: if the op finishes with `Success` on its very first
///   executor attempt, within the synchronous-finish budget, the callback
///   is skipped and the transferred byte count comes back as `Some(n)`
///   instead.
/// - Otherwise: the op is merely queued; the callback runs later,
///   possibly on another thread, and this returns `None`.
pub(crate) fn submit(object: &Arc<ObjectInner>, direction: Direction, op: Arc<OperationRecord>) -> Option<usize> {
    let wait = if op.flags.contains(AsyncFlags::SERIALIZED) {
        let wait = Arc::new(SerializedWait::new());
        *op.serialized_wait.lock() = Some(wait.clone());
        Some(wait)
    } else {
        None
    };

    let became_owner = push_operation(object, direction, op.clone());
    if !became_owner {
        if let Some(wait) = wait {
            wait.wait();
        }
        return None;
    }

    if op.delivered_by_value.load(Ordering::Acquire) {
        Some(op.output.lock().transferred)
    } else {
        None
    }
}

/// Submits a freshly created operation ("Start").
/// Returns `true` if this call became the combiner owner and ran the loop
/// itself; `false` if another thread already owned the object and will
/// pick this operation up.
pub(crate) fn push_operation(object: &Arc<ObjectInner>, direction: Direction, op: Arc<OperationRecord>) -> bool {
    object.announcements.lock().push_back((direction, op));
    let prev = object.fetch_add_tag(1);
    let became_owner = ObjectInner::op_count(prev) == 0;
    trace!("push_operation direction={:?} became_owner={}", direction, became_owner);
    if became_owner {
        combiner_loop(object, 1);
        true
    } else {
        false
    }
}

/// Wakes the owner to re-scan the queues without adding a new operation —
/// used by [`crate::reactor::AsyncBase`] when reporting reactor readiness
/// or a timeout, where the operation already sits on a queue.
pub(crate) fn push_counter(object: &Arc<ObjectInner>) -> bool {
    let prev = object.fetch_add_tag(1);
    if ObjectInner::op_count(prev) == 0 {
        combiner_loop(object, 1);
        true
    } else {
        false
    }
}

pub(crate) fn on_reactor_event(object: &Arc<ObjectInner>, readiness: Readiness) {
    let mut bits = 0;
    if readiness.readable {
        bits |= READ_READY;
    }
    if readiness.writable {
        bits |= WRITE_READY;
    }
    if readiness.error_or_hup {
        bits |= ERROR_EOF;
    }
    object.set_status_bits(bits);
    push_counter(object);
}

pub(crate) fn on_timeout(op: &Arc<OperationRecord>) {
    let generation = op.generation();
    if op.status.try_finish(generation, AsyncOpStatus::Timeout) {
        run_finisher_bounded(op.clone());
    }
}

/// Arms the deadline an `aio_*` caller attached to `op`, once `op` has its
/// final `Arc` address. Non-realtime ops go on the second-granular timeout
/// grid; `AsyncFlags::REALTIME` ops get a dedicated per-op timer off the
/// backend's own OS timer facility instead, so their deadline is honored
/// with OS-timer precision rather than waiting for the grid's coarser
/// sweep. Must run after `op`'s `end_time_us` field (computed from the same
/// deadline) is already set, and before the op is handed to
/// [`push_operation`] so a fast-path finish can observe a real deadline to
/// cancel.
pub(crate) fn arm_timeout(reactor: &crate::reactor::AsyncBase, op: &Arc<OperationRecord>) {
    use crate::flags::AsyncFlags;

    let Some(end_time_us) = op.end_time_us else { return };
    if op.flags.contains(AsyncFlags::REALTIME) {
        let now_us = reactor.now_us();
        let remaining = std::time::Duration::from_micros(end_time_us.saturating_sub(now_us));
        if let Ok(id) = reactor.arm_realtime_timer(op.clone(), remaining) {
            *op.timer_id.lock() = Some(id);
        }
    } else {
        reactor.schedule_timeout(op.clone(), end_time_us);
    }
}

/// Cancels whichever deadline mechanism `arm_timeout` armed for `op` —
/// the timeout grid entry, or the backend realtime timer — once the op
/// finished some other way first.
pub(crate) fn cancel_timeout(reactor: &crate::reactor::AsyncBase, op: &Arc<OperationRecord>) {
    if let Some(id) = op.timer_id.lock().take() {
        reactor.cancel_realtime_timer(id);
        return;
    }
    if let Some(end_time_us) = op.end_time_us {
        reactor.cancel_timeout(op, end_time_us);
    }
}

/// Marks the object for deletion; the next combiner pass to observe the
/// bit drains both queues with `Canceled` and deregisters from the
/// reactor, matching asyncio.c's deferred-delete semantics (a `deleteObject`
/// mid-combiner-pass must not tear down state another thread is reading).
/// `DELETE` always implies `CANCEL_ALL` — a deletion needs every queued
/// operation canceled before deregistration proceeds.
pub(crate) fn request_delete(object: &Arc<ObjectInner>) {
    debug!("delete requested for object token={:?}", object.token);
    object.set_status_bits(DELETE | CANCEL_ALL);
    push_counter(object);
}

/// Cancels every operation currently queued on `object`, without tearing
/// the object itself down. Unlike [`request_delete`], the object remains
/// registered and reusable for new operations afterward.
pub(crate) fn cancel_io(object: &Arc<ObjectInner>) {
    debug!("cancel_io requested for object token={:?}", object.token);
    object.set_status_bits(CANCEL_ALL);
    push_counter(object);
}

/// The owner's drain-and-drive loop . `initial_remaining` is
/// the contribution count the caller already knows about (usually `1`);
/// the loop keeps folding in whatever arrived while it worked until the
/// tag word's op-count bits finally reach zero again.
fn combiner_loop(object: &Arc<ObjectInner>, initial_remaining: u32) {
    let mut remaining = initial_remaining;
    let mut synchronous_finishes = 0usize;

    loop {
        // Phase A: snapshot and clear the sticky status bits this pass
        // will act on.
        let snapshot = object.tag.load(Ordering::Acquire);
        let status_bits = snapshot & !0x00FF_FFFF;
        if status_bits != 0 {
            object.clear_status_bits(status_bits);
        }

        if status_bits & (CANCEL_ALL | DELETE) != 0 {
            drain_with_status(object, Direction::Read, AsyncOpStatus::Canceled);
            drain_with_status(object, Direction::Write, AsyncOpStatus::Canceled);
        }

        if status_bits & DELETE != 0 {
            let _ = object.reactor.deregister(object);
            return;
        }

        // Phase B: pop every announcement queued by threads that lost the
        // race, pushing each onto its proper direction queue.
        {
            let mut announcements = object.announcements.lock();
            while let Some((direction, op)) = announcements.pop_front() {
                object.queue_for(direction).lock().push_back(op);
            }
        }

        // Phase C: drive the executor for whichever queue heads exist.
        // Simplification vs. the literal original: both directions are
        // always polled each pass rather than tracked with a per-side
        // dirty flag — cheap (two queue peeks) and avoids an entire class
        // of missed-wakeup bugs the flag version is prone to.
        synchronous_finishes += drive_queue(object, Direction::Read, status_bits, &mut synchronous_finishes);
        synchronous_finishes += drive_queue(object, Direction::Write, status_bits, &mut synchronous_finishes);

        // Phase D: rearm the reactor registration for whatever directions
        // still have pending work.
        rearm(object);

        // Phase E: give back what this pass consumed. If more arrived
        // while we worked, `fetch_sub` leaves the op-count bits nonzero and
        // we loop; otherwise we're done and relinquish ownership.
        let prev = object.fetch_sub_tag(remaining);
        let left = ObjectInner::op_count(prev).saturating_sub(remaining);
        if left == 0 {
            return;
        }
        remaining = left;
    }
}

/// Runs the executor for every op at or near the head of `direction`'s
/// queue until one returns `Pending`, honoring the synchronous-finish
/// cap. Returns how many operations this call finished.
fn drive_queue(object: &Arc<ObjectInner>, direction: Direction, status_bits: u32, total_sync: &mut usize) -> usize {
    let mut finished_here = 0;
    loop {
        if *total_sync + finished_here >= MAX_SYNCHRONOUS_FINISHED_OPERATIONS {
            break;
        }
        let op = {
            let queue = object.queue_for(direction).lock();
            queue.front().cloned()
        };
        let Some(op) = op else { break };

        let attempt = op.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let outcome = run_executor(object, &op, direction, status_bits);
        match outcome {
            ExecOutcome::Pending => break,
            ExecOutcome::Success => {
                object.queue_for(direction).lock().pop_front();
                let generation = op.generation();
                if op.status.try_finish(generation, AsyncOpStatus::Success) {
                    cancel_timeout(&object.reactor, &op);
                    if op.flags.contains(AsyncFlags::ACTIVE_ONCE)
                        && attempt == 1
                        && *total_sync + finished_here < MAX_SYNCHRONOUS_FINISHED_OPERATIONS
                    {
                        op.delivered_by_value.store(true, Ordering::Release);
                    }
                    run_finisher_bounded(op.clone());
                }
                finished_here += 1;
            }
            ExecOutcome::Failed(status) => {
                object.queue_for(direction).lock().pop_front();
                let generation = op.generation();
                if op.status.try_finish(generation, status) {
                    cancel_timeout(&object.reactor, &op);
                    run_finisher_bounded(op.clone());
                }
                finished_here += 1;
            }
        }
    }
    finished_here
}

fn drain_with_status(object: &Arc<ObjectInner>, direction: Direction, status: AsyncOpStatus) {
    let mut queue = object.queue_for(direction).lock();
    while let Some(op) = queue.pop_front() {
        let generation = op.generation();
        if op.status.try_finish(generation, status) {
            cancel_timeout(&object.reactor, &op);
            drop(queue);
            run_finisher_bounded(op);
            queue = object.queue_for(direction).lock();
        }
    }
}

fn rearm(object: &Arc<ObjectInner>) {
    let want_read = !object.read_queue.lock().is_empty();
    let want_write = !object.write_queue.lock().is_empty();
    let interest = match (want_read, want_write) {
        (true, true) => Some(Interest::BOTH),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    };
    if let Some(interest) = interest {
        let _ = object.reactor.reregister(object, interest);
    }
}

/// Dispatches to the per-opcode syscall attempt (the `executor` half of the
/// executor/finisher/canceller trait). Grounded on asyncio.c's
/// `implRead`/`implWrite`.
fn run_executor(object: &Arc<ObjectInner>, op: &Arc<OperationRecord>, direction: Direction, status_bits: u32) -> ExecOutcome {
    use crate::op::Opcode;

    if status_bits & ERROR_EOF != 0 {
        if let OpBuffer::Read { filled, .. } = &*op.buffer.lock() {
            if *filled > 0 {
                return ExecOutcome::Success;
            }
        }
        return ExecOutcome::Failed(AsyncOpStatus::Disconnected);
    }

    match op.opcode {
        Opcode::Connect => exec_connect(object, op),
        Opcode::Accept => exec_accept(object, op),
        Opcode::Read => exec_read(object, op, false),
        Opcode::ReadMsg => exec_read(object, op, true),
        Opcode::Write => exec_write(object, op, false),
        Opcode::WriteMsg => exec_write(object, op, true),
        Opcode::UserEvent => {
            let _ = direction;
            ExecOutcome::Success
        }
    }
}

#[cfg(unix)]
fn exec_connect(object: &Arc<ObjectInner>, _op: &Arc<OperationRecord>) -> ExecOutcome {
    match crate::sys::take_socket_error(object.handle) {
        Ok(None) => ExecOutcome::Success,
        Ok(Some(err)) => ExecOutcome::Failed(AsyncOpStatus::from(err)),
        Err(err) => ExecOutcome::from(err),
    }
}

#[cfg(unix)]
fn exec_accept(object: &Arc<ObjectInner>, op: &Arc<OperationRecord>) -> ExecOutcome {
    match crate::sys::tcp_accept(object.handle) {
        Ok((fd, addr)) => {
            let mut output = op.output.lock();
            output.accepted = Some(fd);
            output.peer = Some(addr);
            ExecOutcome::Success
        }
        Err(err) => ExecOutcome::from(err),
    }
}

/// Drains whatever is cached in the object's inline receive buffer into
/// `dest`, returning how many bytes it served.
#[cfg(unix)]
fn drain_recv_buffer(object: &Arc<ObjectInner>, dest: &mut [u8]) -> usize {
    let mut cache = object.recv_buffer.lock();
    let Some(rb) = cache.as_mut() else { return 0 };
    let available = rb.end - rb.start;
    if available == 0 {
        return 0;
    }
    let n = available.min(dest.len());
    dest[..n].copy_from_slice(&rb.data[rb.start..rb.start + n]);
    rb.start += n;
    if rb.start == rb.end {
        rb.start = 0;
        rb.end = 0;
    }
    n
}

/// When the cache exists and is empty, and the caller's remaining request
/// is smaller than the cache's capacity, refills it with one real read
/// instead of reading directly into the caller's buffer — asyncio.c's
/// `copyFromBuffer`'s "partially from cache then sync read" branch. Large
/// reads bypass the cache entirely ("no cache" branch): no point copying
/// through an intermediate buffer for a transfer that dwarfs it.
#[cfg(unix)]
fn maybe_refill_recv_buffer(object: &Arc<ObjectInner>, fd: std::os::unix::io::RawFd, remaining: usize) -> std::io::Result<Option<usize>> {
    let mut cache = object.recv_buffer.lock();
    let Some(rb) = cache.as_mut() else { return Ok(None) };
    if rb.end > rb.start || remaining >= rb.data.len() {
        return Ok(None);
    }
    let n = crate::sys::read_fd(fd, &mut rb.data[..])?;
    rb.start = 0;
    rb.end = n;
    Ok(Some(n))
}

#[cfg(unix)]
fn exec_read(object: &Arc<ObjectInner>, op: &Arc<OperationRecord>, with_addr: bool) -> ExecOutcome {
    use std::os::unix::io::RawFd;

    let mut buffer = op.buffer.lock();
    let OpBuffer::Read { buf, filled } = &mut *buffer else {
        error!("read executor invoked on a non-read buffer, opcode={:?}", op.opcode);
        return ExecOutcome::Failed(AsyncOpStatus::UnknownError);
    };

    loop {
        let dest = &mut buf[*filled..];
        if dest.is_empty() {
            return ExecOutcome::Success;
        }

        if !with_addr {
            let from_cache = drain_recv_buffer(object, dest);
            if from_cache > 0 {
                *filled += from_cache;
                op.output.lock().transferred = *filled;
                if !op.flags.contains(AsyncFlags::WAIT_ALL) || *filled >= buf.len() {
                    return ExecOutcome::Success;
                }
                continue;
            }
            match maybe_refill_recv_buffer(object, object.handle as RawFd, buf.len() - *filled) {
                Ok(Some(0)) => {
                    return if *filled > 0 {
                        ExecOutcome::Success
                    } else {
                        ExecOutcome::Failed(AsyncOpStatus::Disconnected)
                    };
                }
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => return ExecOutcome::from(err),
            }
        }

        let result = if with_addr {
            crate::sys::recv_from_fd(object.handle as RawFd, dest).map(|(n, addr)| {
                op.output.lock().peer = Some(addr);
                n
            })
        } else {
            crate::sys::read_fd(object.handle as RawFd, dest)
        };

        match result {
            Ok(0) => {
                return if *filled > 0 {
                    ExecOutcome::Success
                } else {
                    ExecOutcome::Failed(AsyncOpStatus::Disconnected)
                };
            }
            Ok(n) => {
                *filled += n;
                op.output.lock().transferred = *filled;
                if with_addr || !op.flags.contains(AsyncFlags::WAIT_ALL) {
                    return ExecOutcome::Success;
                }
                if *filled >= buf.len() {
                    return ExecOutcome::Success;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return ExecOutcome::Pending,
            Err(err) => return ExecOutcome::Failed(AsyncOpStatus::from(err)),
        }
    }
}

#[cfg(unix)]
fn exec_write(object: &Arc<ObjectInner>, op: &Arc<OperationRecord>, with_addr: bool) -> ExecOutcome {
    use std::os::unix::io::RawFd;

    let mut buffer = op.buffer.lock();
    let OpBuffer::Write { buf, sent } = &mut *buffer else {
        error!("write executor invoked on a non-write buffer, opcode={:?}", op.opcode);
        return ExecOutcome::Failed(AsyncOpStatus::UnknownError);
    };

    loop {
        let src = &buf[*sent..];
        if src.is_empty() {
            return ExecOutcome::Success;
        }

        let result = if with_addr {
            let peer = *op.peer_address.lock();
            match peer {
                Some(addr) => crate::sys::send_to_fd(object.handle as RawFd, src, addr),
                None => return ExecOutcome::Failed(AsyncOpStatus::UnknownError),
            }
        } else {
            crate::sys::write_fd(object.handle as RawFd, src)
        };

        match result {
            Ok(n) => {
                *sent += n;
                op.output.lock().transferred = *sent;
                if with_addr || !op.flags.contains(AsyncFlags::WAIT_ALL) {
                    return ExecOutcome::Success;
                }
                if *sent >= buf.len() {
                    return ExecOutcome::Success;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return ExecOutcome::Pending,
            Err(err) => return ExecOutcome::Failed(AsyncOpStatus::from(err)),
        }
    }
}

// Windows has no readiness notification to retry a nonblocking syscall
// off of: IOCP only ever reports that a previously issued overlapped call
// finished. So every executor here checks `windows_io` for a result the
// port already delivered first; failing that, it issues the real
// `WSARecv`/`WSASend`/`ReadFile`/`WriteFile`/`ConnectEx`/`AcceptEx` call
// and always returns `Pending` — even a call that completes inline still
// posts to the port (`SetFileCompletionNotificationModes` skip-on-success
// is not used here), so waiting for that completion uniformly is simpler
// than special-casing the synchronous-completion return value.

#[cfg(windows)]
use crate::object::{HandleKind, WindowsOpResult};
#[cfg(windows)]
use crate::sys::overlapped::{self, OverlappedCtx};

#[cfg(windows)]
fn exec_connect(object: &Arc<ObjectInner>, op: &Arc<OperationRecord>) -> ExecOutcome {
    if let Some(result) = object.windows_io.lock().write_result.take() {
        if !result.success {
            return ExecOutcome::Failed(AsyncOpStatus::UnknownError);
        }
        return match crate::sys::update_connect_context(object.handle) {
            Ok(()) => ExecOutcome::Success,
            Err(err) => ExecOutcome::from(err),
        };
    }

    let Some(peer) = *op.peer_address.lock() else {
        return ExecOutcome::Failed(AsyncOpStatus::UnknownError);
    };
    let mut ctx = OverlappedCtx::new(object, Direction::Write);
    match overlapped::connect_ex(object.handle, peer, &mut ctx) {
        Ok(_) => {
            ctx.leak();
            ExecOutcome::Pending
        }
        Err(err) => ExecOutcome::from(err),
    }
}

#[cfg(windows)]
fn exec_accept(object: &Arc<ObjectInner>, op: &Arc<OperationRecord>) -> ExecOutcome {
    if let Some(result) = object.windows_io.lock().read_result.take() {
        return finish_windows_accept(object, op, result);
    }

    let local = match crate::sys::local_addr(object.handle) {
        Ok(addr) => addr,
        Err(err) => return ExecOutcome::from(err),
    };
    let accepted_handle = match crate::sys::new_stream_socket_like(local) {
        Ok(h) => h,
        Err(err) => return ExecOutcome::from(err),
    };
    let mut ctx = OverlappedCtx::new(object, Direction::Read);
    ctx.accepted_handle = Some(accepted_handle);
    match overlapped::accept_ex(object.handle, &mut ctx) {
        Ok(_) => {
            ctx.leak();
            ExecOutcome::Pending
        }
        Err(err) => ExecOutcome::from(err),
    }
}

#[cfg(windows)]
fn finish_windows_accept(object: &Arc<ObjectInner>, op: &Arc<OperationRecord>, result: WindowsOpResult) -> ExecOutcome {
    if !result.success {
        return ExecOutcome::Failed(AsyncOpStatus::UnknownError);
    }
    let Some(accepted) = result.accepted else {
        return ExecOutcome::Failed(AsyncOpStatus::UnknownError);
    };
    if let Err(err) = crate::sys::update_accept_context(accepted, object.handle) {
        return ExecOutcome::from(err);
    }
    let peer = crate::sys::peer_addr(accepted).ok();
    let mut output = op.output.lock();
    output.accepted = Some(accepted);
    output.peer = peer;
    ExecOutcome::Success
}

#[cfg(windows)]
fn exec_read(object: &Arc<ObjectInner>, op: &Arc<OperationRecord>, with_addr: bool) -> ExecOutcome {
    if let Some(result) = object.windows_io.lock().read_result.take() {
        return finish_windows_read(object, op, result, with_addr);
    }

    let mut buffer = op.buffer.lock();
    let OpBuffer::Read { buf, filled } = &mut *buffer else {
        error!("read executor invoked on a non-read buffer, opcode={:?}", op.opcode);
        return ExecOutcome::Failed(AsyncOpStatus::UnknownError);
    };
    let dest = &mut buf[*filled..];
    if dest.is_empty() {
        return ExecOutcome::Success;
    }

    let mut ctx = OverlappedCtx::new(object, Direction::Read);
    let issued = if with_addr {
        overlapped::recv_from(object.handle, dest, &mut ctx)
    } else if object.kind == HandleKind::Device {
        overlapped::read_file(object.handle, dest, &mut ctx)
    } else {
        overlapped::recv(object.handle, dest, &mut ctx)
    };
    match issued {
        Ok(_) => {
            ctx.leak();
            ExecOutcome::Pending
        }
        Err(err) => ExecOutcome::from(err),
    }
}

#[cfg(windows)]
fn finish_windows_read(
    object: &Arc<ObjectInner>,
    op: &Arc<OperationRecord>,
    result: WindowsOpResult,
    with_addr: bool,
) -> ExecOutcome {
    if !result.success {
        return ExecOutcome::Failed(AsyncOpStatus::UnknownError);
    }

    let done = {
        let mut buffer = op.buffer.lock();
        let OpBuffer::Read { buf, filled } = &mut *buffer else {
            return ExecOutcome::Failed(AsyncOpStatus::UnknownError);
        };
        if result.bytes == 0 {
            return if *filled > 0 {
                ExecOutcome::Success
            } else {
                ExecOutcome::Failed(AsyncOpStatus::Disconnected)
            };
        }
        *filled += result.bytes as usize;
        op.output.lock().transferred = *filled;
        if with_addr {
            op.output.lock().peer = result.peer;
            true
        } else {
            !op.flags.contains(AsyncFlags::WAIT_ALL) || *filled >= buf.len()
        }
    };

    if done {
        ExecOutcome::Success
    } else {
        exec_read(object, op, with_addr)
    }
}

#[cfg(windows)]
fn exec_write(object: &Arc<ObjectInner>, op: &Arc<OperationRecord>, with_addr: bool) -> ExecOutcome {
    if let Some(result) = object.windows_io.lock().write_result.take() {
        return finish_windows_write(object, op, result, with_addr);
    }

    let mut buffer = op.buffer.lock();
    let OpBuffer::Write { buf, sent } = &mut *buffer else {
        error!("write executor invoked on a non-write buffer, opcode={:?}", op.opcode);
        return ExecOutcome::Failed(AsyncOpStatus::UnknownError);
    };
    let src = &buf[*sent..];
    if src.is_empty() {
        return ExecOutcome::Success;
    }

    let mut ctx = OverlappedCtx::new(object, Direction::Write);
    let issued = if with_addr {
        let peer = *op.peer_address.lock();
        match peer {
            Some(addr) => overlapped::send_to(object.handle, src, addr, &mut ctx),
            None => return ExecOutcome::Failed(AsyncOpStatus::UnknownError),
        }
    } else if object.kind == HandleKind::Device {
        overlapped::write_file(object.handle, src, &mut ctx)
    } else {
        overlapped::send(object.handle, src, &mut ctx)
    };
    match issued {
        Ok(_) => {
            ctx.leak();
            ExecOutcome::Pending
        }
        Err(err) => ExecOutcome::from(err),
    }
}

#[cfg(windows)]
fn finish_windows_write(
    object: &Arc<ObjectInner>,
    op: &Arc<OperationRecord>,
    result: WindowsOpResult,
    with_addr: bool,
) -> ExecOutcome {
    if !result.success {
        return ExecOutcome::Failed(AsyncOpStatus::UnknownError);
    }

    let done = {
        let mut buffer = op.buffer.lock();
        let OpBuffer::Write { buf, sent } = &mut *buffer else {
            return ExecOutcome::Failed(AsyncOpStatus::UnknownError);
        };
        *sent += result.bytes as usize;
        op.output.lock().transferred = *sent;
        with_addr || !op.flags.contains(AsyncFlags::WAIT_ALL) || *sent >= buf.len()
    };

    if done {
        ExecOutcome::Success
    } else {
        exec_write(object, op, with_addr)
    }
}
