//! The reactor : owns exactly one OS polling backend, drives
//! the combiner for whichever objects it reports readiness on, and sweeps
//! the timeout grid. Splits a public-facing handle (`AsyncBase`) from a
//! per-OS `Backend` implementation, same separation of concerns as a
//! readiness-based reactor.

mod epoll;
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly"))]
mod kqueue;
mod select;
#[cfg(windows)]
mod iocp;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::RwLock;

use crate::combiner;
use crate::object::{ObjectInner, ObjectWeak};
use crate::pool::Pool;
use crate::timeout_grid::TimeoutGrid;
use crate::token::Token;

/// Selects which backend `AsyncBase::new` builds, mirroring 
/// three interchangeable backends. `Auto` picks the best available one for
/// the current platform; the others force a specific backend (useful for
/// tests and for the `aiocore_unsupported_force_select` cfg override).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Auto,
    /// Completion-based backend: Windows IOCP.
    Completion,
    /// Edge-triggered readiness: Linux epoll, BSD kqueue.
    EdgeTriggered,
    /// select-like readiness: `poll(2)` on any unix.
    SelectLike,
}

/// A unique id for a one-shot realtime timer registered against the
/// backend's own timer facilities (e.g. `timerfd` piggy-backed on epoll),
/// distinct from the timeout-grid deadlines every operation carries.
/// Referenced by [`crate::op::OperationRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RealtimeTimerId(pub(crate) u64);

/// The high bit of a [`Token`] reserved to mark a realtime-timer firing
/// instead of a normal registered handle's readiness. Every backend's
/// `arm_realtime_timer` delivers its fire by calling `on_ready` with a
/// token of `TIMER_TOKEN_BIT | id`; `run_once` strips the bit back off to
/// recover the [`RealtimeTimerId`].
pub(crate) const TIMER_TOKEN_BIT: usize = 1 << (usize::BITS - 1);

trait Backend: Send + Sync {
    fn register(&self, handle: crate::sys::RawHandle, token: Token, interest: Interest) -> std::io::Result<()>;
    fn reregister(&self, handle: crate::sys::RawHandle, token: Token, interest: Interest) -> std::io::Result<()>;
    fn deregister(&self, handle: crate::sys::RawHandle) -> std::io::Result<()>;
    /// Blocks up to `timeout` waiting for events, invoking `on_ready` for
    /// each token that became ready. `None` timeout blocks indefinitely.
    /// A realtime timer firing is reported the same way, via a token
    /// carrying [`TIMER_TOKEN_BIT`].
    fn poll(&self, timeout: Option<Duration>, on_ready: &mut dyn FnMut(Token, Readiness)) -> std::io::Result<()>;
    fn wake(&self) -> std::io::Result<()>;
    /// Arms a one-shot realtime timer using the backend's own OS timer
    /// facility (`timerfd` for epoll, native `EVFILT_TIMER` for kqueue, a
    /// dedicated thread writing into the wake pipe for the `poll(2)`
    /// fallback, `CreateTimerQueueTimer` for IOCP), firing by delivering
    /// `TIMER_TOKEN_BIT | id` through the same `poll`/`on_ready` path
    /// ops/readiness already flow through.
    fn arm_realtime_timer(&self, id: u64, delay: Duration) -> std::io::Result<()>;
    fn cancel_realtime_timer(&self, id: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}

impl Interest {
    pub(crate) const READABLE: Interest = Interest { readable: true, writable: false };
    pub(crate) const WRITABLE: Interest = Interest { readable: false, writable: true };
    pub(crate) const BOTH: Interest = Interest { readable: true, writable: true };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Readiness {
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) error_or_hup: bool,
}

/// The engine ( "AsyncBase"). Cheaply clonable; every clone
/// shares the same backend, registry and timeout grid.
#[derive(Clone)]
pub struct AsyncBase {
    inner: Arc<BaseInner>,
}

struct BaseInner {
    backend: Box<dyn Backend>,
    registry: RwLock<std::collections::HashMap<usize, ObjectWeak>>,
    next_token: AtomicU64,
    timeouts: Mutex<TimeoutGrid>,
    next_timer_id: AtomicU64,
    quit: AtomicBool,
    /// Work posted from [`AsyncBase::post_user_event`], drained once per
    /// `run_once` pass. Lets a user event fired from any thread reach the
    /// reactor thread instead of running inline on the activating thread.
    user_events: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
    /// Shared scratch-buffer pool every `aio_read`/`aio_write`-family call
    /// draws from instead of allocating a fresh `Vec<u8>` per operation.
    buffer_pool: Pool<Vec<u8>>,
    /// Ops with an armed realtime timer, keyed by the id encoded into the
    /// token `arm_realtime_timer` handed the backend. `run_once` looks an
    /// entry up the moment the backend reports `TIMER_TOKEN_BIT | id` ready.
    realtime_timers: Mutex<std::collections::HashMap<u64, Arc<crate::op::OperationRecord>>>,
}

/// A lightweight reference an [`ObjectInner`] keeps to call back into its
/// owning engine (rearm after a partial read, cancel on drop, etc.),
/// analogous to a `Registry` handle threaded through a readiness-source
/// type.
pub type Handle = AsyncBase;

impl AsyncBase {
    pub fn new(method: Method) -> std::io::Result<Self> {
        let backend = build_backend(method)?;
        debug!("reactor built with {:?} method", method);
        Ok(AsyncBase {
            inner: Arc::new(BaseInner {
                backend,
                registry: RwLock::new(std::collections::HashMap::new()),
                next_token: AtomicU64::new(1),
                timeouts: Mutex::new(TimeoutGrid::new()),
                next_timer_id: AtomicU64::new(1),
                quit: AtomicBool::new(false),
                user_events: Mutex::new(VecDeque::new()),
                buffer_pool: Pool::new(Vec::new),
                realtime_timers: Mutex::new(std::collections::HashMap::new()),
            }),
        })
    }

    /// Draws a zeroed scratch buffer of exactly `len` bytes from the
    /// shared pool, falling back to a fresh allocation when the pool is
    /// empty.
    pub(crate) fn acquire_buffer(&self, len: usize) -> Vec<u8> {
        let mut buf = self.inner.buffer_pool.acquire();
        buf.clear();
        buf.resize(len, 0);
        buf
    }

    /// Returns a scratch buffer to the shared pool once its contents have
    /// been copied out to the caller.
    pub(crate) fn release_buffer(&self, buf: Vec<u8>) {
        self.inner.buffer_pool.release(buf);
    }

    /// Posts `f` to run on the next `run_once` pass on whatever thread
    /// drives this reactor, waking it if it's currently blocked in
    /// `poll`. Used by [`crate::user_event::UserEvent::activate`] so a
    /// user event fired from any thread is actually delivered by the
    /// reactor thread rather than racing the caller's own callback
    /// invocation against concurrent combiner passes.
    pub(crate) fn post_user_event(&self, f: impl FnOnce() + Send + 'static) {
        self.inner.user_events.lock().unwrap().push_back(Box::new(f));
        let _ = self.inner.backend.wake();
    }

    pub(crate) fn new_token(&self) -> Token {
        Token(self.inner.next_token.fetch_add(1, Ordering::Relaxed) as usize)
    }

    pub(crate) fn register(&self, object: &Arc<ObjectInner>, interest: Interest) -> std::io::Result<()> {
        trace!("registering handle with backend, token={:?}", object.token);
        self.inner
            .registry
            .write()
            .insert(object.token.0, Arc::downgrade(object));
        self.inner.backend.register(object.handle, object.token, interest)
    }

    pub(crate) fn reregister(&self, object: &ObjectInner, interest: Interest) -> std::io::Result<()> {
        trace!("reregistering handle with backend, token={:?}", object.token);
        self.inner.backend.reregister(object.handle, object.token, interest)
    }

    pub(crate) fn deregister(&self, object: &ObjectInner) -> std::io::Result<()> {
        trace!("deregistering handle from backend, token={:?}", object.token);
        self.inner.registry.write().remove(&object.token.0);
        self.inner.backend.deregister(object.handle)
    }

    pub(crate) fn schedule_timeout(&self, op: Arc<crate::op::OperationRecord>, end_time_us: u64) {
        self.inner.timeouts.lock().unwrap().insert(op, end_time_us);
    }

    pub(crate) fn cancel_timeout(&self, op: &Arc<crate::op::OperationRecord>, end_time_us: u64) -> bool {
        self.inner.timeouts.lock().unwrap().remove(op, end_time_us)
    }

    pub(crate) fn next_timer_id(&self) -> RealtimeTimerId {
        RealtimeTimerId(self.inner.next_timer_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Arms `op`'s deadline on the backend's own realtime timer facility
    /// instead of the second-granular timeout grid. Records `op` under the
    /// returned id so `run_once` can hand it to [`combiner::on_timeout`]
    /// once the backend reports the fire.
    pub(crate) fn arm_realtime_timer(&self, op: Arc<crate::op::OperationRecord>, delay: Duration) -> std::io::Result<RealtimeTimerId> {
        let id = self.next_timer_id();
        self.inner.realtime_timers.lock().unwrap().insert(id.0, op);
        if let Err(err) = self.inner.backend.arm_realtime_timer(id.0, delay) {
            self.inner.realtime_timers.lock().unwrap().remove(&id.0);
            return Err(err);
        }
        Ok(id)
    }

    /// Cancels a timer armed by [`AsyncBase::arm_realtime_timer`]. A no-op
    /// if it already fired.
    pub(crate) fn cancel_realtime_timer(&self, id: RealtimeTimerId) {
        if self.inner.realtime_timers.lock().unwrap().remove(&id.0).is_some() {
            self.inner.backend.cancel_realtime_timer(id.0);
        }
    }

    pub(crate) fn now_us(&self) -> u64 {
        now_micros()
    }

    /// Runs the reactor until [`AsyncBase::post_quit`] is called. Each
    /// iteration: poll the backend for readiness, drive each ready
    /// object's combiner, then sweep the timeout grid. Reactor events are
    /// handled before timeouts each tick, so a connection that both became
    /// readable and hit its deadline in the same tick finishes as a
    /// success, never a spurious timeout.
    pub fn run(&self) {
        while !self.inner.quit.load(Ordering::Acquire) {
            self.run_once(Some(Duration::from_millis(50)));
        }
    }

    pub fn run_once(&self, timeout: Option<Duration>) {
        let registry = &self.inner.registry;
        let backend = &self.inner.backend;
        let mut woken = Vec::new();
        let _ = backend.poll(timeout, &mut |token, readiness| {
            woken.push((token, readiness));
        });
        for (token, readiness) in woken {
            if token.0 & TIMER_TOKEN_BIT != 0 {
                let id = (token.0 & !TIMER_TOKEN_BIT) as u64;
                let op = self.inner.realtime_timers.lock().unwrap().remove(&id);
                if let Some(op) = op {
                    combiner::on_timeout(&op);
                }
                continue;
            }
            let object = registry.read().get(&token.0).and_then(|w| w.upgrade());
            if let Some(object) = object {
                combiner::on_reactor_event(&object, readiness);
            }
        }

        let now_us = now_micros();
        let expired = self.inner.timeouts.lock().unwrap().sweep(now_us);
        for op in expired {
            combiner::on_timeout(&op);
        }

        loop {
            let next = self.inner.user_events.lock().unwrap().pop_front();
            match next {
                Some(f) => f(),
                None => break,
            }
        }
    }

    pub fn post_quit(&self) {
        debug!("reactor quit requested");
        self.inner.quit.store(true, Ordering::Release);
        let _ = self.inner.backend.wake();
    }
}

fn now_micros() -> u64 {
    static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    Instant::now().saturating_duration_since(*epoch).as_micros() as u64
}

fn build_backend(method: Method) -> std::io::Result<Box<dyn Backend>> {
    #[cfg(aiocore_unsupported_force_select)]
    let method = Method::SelectLike;

    match method {
        Method::Auto => {
            #[cfg(target_os = "linux")]
            {
                Ok(Box::new(epoll::Epoll::new()?))
            }
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly"))]
            {
                Ok(Box::new(kqueue::Kqueue::new()?))
            }
            #[cfg(windows)]
            {
                Ok(Box::new(iocp::Iocp::new()?))
            }
            #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly", windows)))]
            {
                Ok(Box::new(select::Select::new()?))
            }
        }
        Method::EdgeTriggered => {
            #[cfg(target_os = "linux")]
            {
                Ok(Box::new(epoll::Epoll::new()?))
            }
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly"))]
            {
                Ok(Box::new(kqueue::Kqueue::new()?))
            }
            #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly")))]
            {
                Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "edge-triggered backend unavailable on this platform"))
            }
        }
        Method::SelectLike => Ok(Box::new(select::Select::new()?)),
        Method::Completion => {
            #[cfg(windows)]
            {
                Ok(Box::new(iocp::Iocp::new()?))
            }
            #[cfg(not(windows))]
            {
                Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "completion backend is windows-only"))
            }
        }
    }
}
