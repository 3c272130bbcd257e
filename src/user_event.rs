//! User events & periodic timers, grounded on
//! `original_source/src/asyncio/asyncio.c`'s `newUserEvent`/
//! `userEventStartTimer`/`userEventStopTimer`/`userEventActivate`/
//! `deleteUserEvent`.
//!
//! A user event is a lightweight operation whose finisher is the caller's
//! own callback; it can be fired by any thread calling [`UserEvent::activate`]
//! or by an attached periodic timer with a bounded counter. Both forms are
//! delivered through the reactor (`AsyncBase::post_user_event` for a bare
//! activation, the timeout grid for a periodic timer) rather than running
//! inline on whatever thread triggered them, so a user event's callback
//! only ever runs on the thread driving `run`/`run_once` — the same
//! delivery guarantee every other op's finisher gets.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::flags::AsyncFlags;
use crate::op::{OpBuffer, Opcode, OperationRecord};
use crate::reactor::AsyncBase;

type Callback = dyn Fn() + Send + Sync;

struct Inner {
    reactor: AsyncBase,
    callback: Box<Callback>,
    /// Remaining periodic firings; `-1` means no timer attached, `0` means
    /// the timer has exhausted its count and stopped.
    counter: AtomicI64,
    stop: AtomicBool,
    /// Bumped by every `start_timer`/`stop_timer` call. A scheduled
    /// firing captures the epoch current at schedule time; if it no
    /// longer matches when the firing runs, a `stop_timer`/`start_timer`
    /// happened in between and the firing is a stale no-op instead of
    /// rescheduling itself.
    epoch: AtomicU64,
}

/// A user-activatable event. Cheap to clone; every clone
/// shares the same callback and timer state.
#[derive(Clone)]
pub struct UserEvent {
    inner: Arc<Inner>,
}

impl UserEvent {
    pub fn new(reactor: &AsyncBase, callback: impl Fn() + Send + Sync + 'static) -> Self {
        UserEvent {
            inner: Arc::new(Inner {
                reactor: reactor.clone(),
                callback: Box::new(callback),
                counter: AtomicI64::new(-1),
                stop: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Fires the callback once. The activating thread only posts the work;
    /// the callback itself runs on whichever thread next calls
    /// `reactor.run`/`run_once` — same "activated from any thread, runs on
    /// the reactor thread" contract as `userEventActivate`.
    pub fn activate(&self) {
        let inner = self.inner.clone();
        self.inner.reactor.post_user_event(move || (inner.callback)());
    }

    /// Starts a periodic timer: fires every `period` until `counter`
    /// activations have happened, then stops on its own (e.g. a periodic
    /// timer with counter 256 plus one explicit `activate()` call totals
    /// 257 invocations). Driven by the reactor's timeout grid rather than
    /// a dedicated sleeping thread: each firing's finisher both invokes
    /// the callback and re-schedules the next occurrence.
    pub fn start_timer(&self, period: Duration, counter: u32) {
        self.inner.counter.store(counter as i64, Ordering::SeqCst);
        self.inner.stop.store(false, Ordering::SeqCst);
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        schedule_next(&self.inner, period, epoch);
    }

    pub fn stop_timer(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.counter.store(0, Ordering::SeqCst);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

fn schedule_next(inner: &Arc<Inner>, period: Duration, epoch: u64) {
    let reactor = inner.reactor.clone();
    let end_time_us = reactor.now_us() + period.as_micros() as u64;
    let inner = inner.clone();
    let op = OperationRecord::new(
        Opcode::UserEvent,
        AsyncFlags::empty(),
        Box::new(move |_op: &OperationRecord| {
            if inner.epoch.load(Ordering::SeqCst) != epoch || inner.stop.load(Ordering::SeqCst) {
                return;
            }
            let remaining = inner.counter.fetch_sub(1, Ordering::SeqCst);
            if remaining <= 0 {
                return;
            }
            (inner.callback)();
            schedule_next(&inner, period, epoch);
        }),
        OpBuffer::None,
        Some(end_time_us),
        None,
    );
    reactor.schedule_timeout(op, end_time_us);
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn activate_runs_via_reactor() {
        let reactor = AsyncBase::new(crate::reactor::Method::SelectLike).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let event = UserEvent::new(&reactor, move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        event.activate();
        event.activate();
        reactor.run_once(Some(Duration::from_millis(10)));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn periodic_timer_respects_counter() {
        let reactor = AsyncBase::new(crate::reactor::Method::SelectLike).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let event = UserEvent::new(&reactor, move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        event.start_timer(Duration::from_millis(5), 3);
        for _ in 0..50 {
            reactor.run_once(Some(Duration::from_millis(10)));
            if count.load(Ordering::SeqCst) >= 3 {
                break;
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stop_timer_prevents_further_firings() {
        let reactor = AsyncBase::new(crate::reactor::Method::SelectLike).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let event = UserEvent::new(&reactor, move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        event.start_timer(Duration::from_millis(5), 100);
        reactor.run_once(Some(Duration::from_millis(10)));
        event.stop_timer();
        let seen = count.load(Ordering::SeqCst);
        for _ in 0..10 {
            reactor.run_once(Some(Duration::from_millis(10)));
        }
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }
}
