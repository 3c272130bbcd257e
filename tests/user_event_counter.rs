//! A periodic timer with a bounded counter plus one explicit
//! `activate()` call, totalling exactly counter+1 callback invocations.

#![cfg(all(feature = "os-poll", feature = "net"))]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aiocore::user_event::UserEvent;

#[path = "util/mod.rs"]
mod util;
use util::spawn_reactor;

#[test]
fn periodic_timer_plus_one_activate_totals_counter_plus_one() {
    let (reactor, join) = spawn_reactor();

    let count = Arc::new(AtomicUsize::new(0));
    let count2 = count.clone();
    let event = UserEvent::new(&reactor, move || {
        count2.fetch_add(1, Ordering::SeqCst);
    });

    event.start_timer(Duration::from_micros(400), 256);
    event.activate();

    // The periodic timer alone needs 256 * 400us ~= 102ms to exhaust its
    // counter; give it generous headroom before checking.
    std::thread::sleep(Duration::from_millis(500));
    event.stop_timer();

    assert_eq!(count.load(Ordering::SeqCst), 257);

    reactor.post_quit();
    join.join().unwrap();
}
