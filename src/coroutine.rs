//! Stackful coroutine adapter, built on the `generator` crate the same
//! way the production crate `may` wraps it for its
//! green-thread scheduler. Every blocking-style facade call
//! (`io_read`, `io_write`, `io_connect`, `io_accept`, `io_read_msg`,
//! `io_write_msg`, `io_sleep`) allocates a small on-stack "resume struct",
//! submits the async form with a stock callback that fills it in and
//! resumes the coroutine, then yields — mirroring asyncio.c's
//! `coroReturnStruct` plus its `ioRead`/`ioWrite`/etc. wrappers.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::time::Duration;

use generator::{Generator, Gn};

use crate::error::AsyncOpStatus;
use crate::flags::AsyncFlags;
use crate::net::{Device, TcpListener, TcpStream, UdpSocket};
use crate::op::{OpBuffer, Opcode, OperationRecord};
use crate::reactor::AsyncBase;

/// What a coroutine-form call yields back to the scheduler while it's
/// suspended waiting on an async op; the scheduler's own driver loop
/// (typically the reactor's `run`) treats a yielded `Suspended` the same
/// way asyncio.c's dedicated coroutine stack treats a `yield()`.
pub(crate) enum Msg {
    Suspended,
    Finished,
}

/// One in-flight stackful execution context. `new` allocates the
/// coroutine's own stack (the `generator` crate manages this); `resume`
/// is only ever legal from the coroutine's creator ("main coroutine") —
/// only the main coroutine of a thread may call `coroutine.call`.
pub struct Coroutine {
    gen: RefCell<Generator<'static, (), Msg>>,
}

thread_local! {
    /// The global thread-local "current coroutine" pointer. `None` means
    /// the implicit main coroutine for this OS thread owns the CPU right
    /// now.
    static CURRENT: RefCell<Vec<*const Coroutine>> = RefCell::new(Vec::new());
}

impl Coroutine {
    pub fn spawn<F>(stack_size: usize, entry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let gen = Gn::new_opt(stack_size, move || {
            entry();
            generator::done!()
        });
        Coroutine { gen: RefCell::new(gen) }
    }

    /// Resumes the coroutine until it next yields or finishes. Nested
    /// `call`s are legal — nested coroutine chains form a stack, and the
    /// caller itself may be running inside another coroutine's entry
    /// function, in which case this one is pushed on top of [`CURRENT`]
    /// for the duration of the resume.
    pub fn call(&self) -> Msg {
        CURRENT.with(|stack| stack.borrow_mut().push(self as *const Coroutine));
        let result = {
            let mut gen = self.gen.borrow_mut();
            match gen.resume() {
                Some(msg) => msg,
                None => Msg::Finished,
            }
        };
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
        result
    }

    pub fn finished(&self) -> bool {
        self.gen.borrow().is_done()
    }
}

/// The innermost coroutine currently running on this OS thread, or `None`
/// if the implicit main coroutine owns the CPU right now. The returned
/// pointer is only valid for the duration of the enclosing `call`.
pub(crate) fn current() -> Option<*const Coroutine> {
    CURRENT.with(|stack| stack.borrow().last().copied())
}

/// Suspends the currently running coroutine. A no-op when called from the
/// implicit main coroutine.
pub(crate) fn yield_now() {
    generator::yield_with(Msg::Suspended);
}

/// Runs `io_read`-style adapters: submits `submit`, which must arrange for
/// `on_done` to be called exactly once with the terminal status, then
/// yields until that happens. The `Box<dyn FnOnce>` wrapping in
/// `submit`'s signature mirrors the facade functions in
/// [`crate::net`], which take a plain callback for the non-coroutine form.
pub(crate) fn block_on<T: Send + 'static>(
    submit: impl FnOnce(Box<dyn FnOnce(AsyncOpStatus, T) + Send>),
) -> (AsyncOpStatus, T)
where
    T: Default,
{
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    let done = Arc::new(AtomicBool::new(false));
    let result = Arc::new(Mutex::new((AsyncOpStatus::Pending, T::default())));

    let done2 = done.clone();
    let result2 = result.clone();
    submit(Box::new(move |status, value| {
        *result2.lock().unwrap() = (status, value);
        done2.store(true, Ordering::SeqCst);
    }));

    while !done.load(Ordering::Acquire) {
        yield_now();
    }

    let mut guard = result.lock().unwrap();
    std::mem::replace(&mut *guard, (AsyncOpStatus::Pending, T::default()))
}

/// Coroutine-form sleep: schedules a one-shot timeout-grid entry firing
/// once after `duration` and yields until the reactor's own loop (running
/// on some thread, possibly this one between yields) sweeps it, rather
/// than blocking the OS thread the way `std::thread::sleep` would.
pub fn io_sleep(reactor: &AsyncBase, duration: Duration) {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let done = Arc::new(AtomicBool::new(false));
    let done_for_finisher = done.clone();
    let end_time_us = reactor.now_us() + duration.as_micros() as u64;
    let op = OperationRecord::new(
        Opcode::UserEvent,
        AsyncFlags::empty(),
        Box::new(move |_op: &OperationRecord| {
            done_for_finisher.store(true, Ordering::Release);
        }),
        OpBuffer::None,
        Some(end_time_us),
        None,
    );
    reactor.schedule_timeout(op, end_time_us);

    while !done.load(Ordering::Acquire) {
        yield_now();
    }
}

/// Thin alias for [`io_sleep`], matching the `io_*`-prefixed naming every
/// other coroutine-form adapter in this module uses.
pub fn sleep(reactor: &AsyncBase, duration: Duration) {
    io_sleep(reactor, duration);
}

pub fn io_read(stream: &TcpStream, buf: &mut [u8], flags: AsyncFlags, timeout: Option<Duration>) -> (AsyncOpStatus, usize) {
    let stream = stream.clone();
    let len = buf.len();
    let buf_ptr = buf.as_mut_ptr() as usize;
    block_on(move |done| {
        let buf = unsafe { std::slice::from_raw_parts_mut(buf_ptr as *mut u8, len) };
        stream.aio_read(buf, flags, timeout, move |status, n| done(status, n));
    })
}

pub fn io_write(stream: &TcpStream, buf: &[u8], flags: AsyncFlags, timeout: Option<Duration>) -> (AsyncOpStatus, usize) {
    let stream = stream.clone();
    let owned = buf.to_vec();
    block_on(move |done| {
        stream.aio_write(&owned, flags, timeout, move |status, n| done(status, n));
    })
}

pub fn io_connect(addr: SocketAddr, reactor: &AsyncBase, timeout: Option<Duration>) -> (AsyncOpStatus, Option<TcpStream>) {
    let reactor = reactor.clone();
    block_on(move |done| {
        let _ = crate::net::tcp::aio_connect(&reactor, addr, timeout, move |status, stream| done(status, stream));
    })
}

pub fn io_accept(listener: &TcpListener, timeout: Option<Duration>) -> (AsyncOpStatus, Option<TcpStream>) {
    let listener = listener.clone();
    block_on(move |done| {
        listener.aio_accept(timeout, move |status, accepted| done(status, accepted.map(|(stream, _addr)| stream)));
    })
}

pub fn io_read_msg(
    socket: &UdpSocket,
    buf: &mut [u8],
    flags: AsyncFlags,
    timeout: Option<Duration>,
) -> (AsyncOpStatus, (usize, Option<SocketAddr>)) {
    let socket = socket.clone();
    let len = buf.len();
    let buf_ptr = buf.as_mut_ptr() as usize;
    block_on(move |done| {
        let buf = unsafe { std::slice::from_raw_parts_mut(buf_ptr as *mut u8, len) };
        socket.aio_read_msg(buf, flags, timeout, move |status, n, addr| done(status, (n, addr)));
    })
}

pub fn io_write_msg(
    socket: &UdpSocket,
    buf: &[u8],
    addr: SocketAddr,
    flags: AsyncFlags,
    timeout: Option<Duration>,
) -> (AsyncOpStatus, usize) {
    let socket = socket.clone();
    let owned = buf.to_vec();
    block_on(move |done| {
        socket.aio_write_msg(&owned, addr, flags, timeout, move |status, n| done(status, n));
    })
}

pub fn io_device_read(device: &Device, buf: &mut [u8], timeout: Option<Duration>) -> (AsyncOpStatus, usize) {
    let device = device.clone();
    let len = buf.len();
    let buf_ptr = buf.as_mut_ptr() as usize;
    block_on(move |done| {
        let buf = unsafe { std::slice::from_raw_parts_mut(buf_ptr as *mut u8, len) };
        device.aio_read(buf, AsyncFlags::empty(), timeout, move |status, n| done(status, n));
    })
}
