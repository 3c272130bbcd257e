//! Generic lock-free object pool, Vyukov-style bounded MPMC queue chained
//! across partitions for effectively unbounded growth.
//! `crossbeam_queue::ArrayQueue` already implements the bounded Vyukov
//! ring; this just adds a growth-by-partition wrapper on top of it, the
//! same free-list-over-allocator layering used for slab-style growth
//! (double capacity rather than a fixed cap).

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;

const PARTITION_SIZE: usize = 256;

/// A pool of reusable `T`s. `acquire` never blocks: on an empty pool it
/// falls back to `make`, mirroring asyncio.c's pooled-alloc fallback to
/// `malloc` when every free-list partition is exhausted.
pub(crate) struct Pool<T> {
    partitions: Mutex<Vec<Arc<ArrayQueue<T>>>>,
    make: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: Send + 'static> Pool<T> {
    pub(crate) fn new(make: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Pool {
            partitions: Mutex::new(vec![Arc::new(ArrayQueue::new(PARTITION_SIZE))]),
            make: Box::new(make),
        }
    }

    pub(crate) fn acquire(&self) -> T {
        let partitions = self.partitions.lock();
        for partition in partitions.iter() {
            if let Some(item) = partition.pop() {
                return item;
            }
        }
        drop(partitions);
        (self.make)()
    }

    /// Returns an item to the pool. If every partition happens to be full
    /// (a burst of returns racing a burst of acquires) a fresh partition is
    /// appended rather than dropping the item — growth, never loss.
    pub(crate) fn release(&self, item: T) {
        let mut item = item;
        {
            let partitions = self.partitions.lock();
            for partition in partitions.iter() {
                match partition.push(item) {
                    Ok(()) => return,
                    Err(rejected) => item = rejected,
                }
            }
        }
        let mut partitions = self.partitions.lock();
        let fresh = Arc::new(ArrayQueue::new(PARTITION_SIZE));
        let _ = fresh.push(item);
        partitions.push(fresh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn reuses_released_items_before_allocating() {
        let made = Arc::new(AtomicUsize::new(0));
        let made2 = made.clone();
        let pool = Pool::new(move || {
            made2.fetch_add(1, Ordering::SeqCst);
            0usize
        });

        let a = pool.acquire();
        assert_eq!(made.load(Ordering::SeqCst), 1);
        pool.release(a);
        let _b = pool.acquire();
        // Reused the released item instead of calling `make` again.
        assert_eq!(made.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn grows_past_one_partition() {
        let pool = Pool::new(|| 0usize);
        let mut items = Vec::new();
        for _ in 0..PARTITION_SIZE + 10 {
            items.push(pool.acquire());
        }
        for item in items {
            pool.release(item);
        }
        assert!(pool.partitions.lock().len() >= 2);
    }
}
