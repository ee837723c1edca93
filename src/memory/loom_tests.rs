/// Loom-based concurrency tests.
///
/// Run w/ `RUSTFLAGS="--cfg loom" cargo test --lib --release`
///
/// A `SlabPool` is single-threaded; the only shared state is the global
/// diagnostic counters and whatever lock a caller wraps a pool in. These
/// tests cover both.
///
/// # Design notes
///
///   - Thread counts kept to 2 (state space is exponential).
///   - Each model iteration builds a fresh pool; under `cfg(loom)` pages come
///     from the heap-backed `VmOps` mock.
///   - Pointers cross threads as `usize`, since `NonNull` is not `Send`.
#[cfg(loom)]
mod tests {
    use crate::memory::pool::SlabPool;
    use crate::sync::{Arc, Mutex, thread};
    use std::ptr::NonNull;

    fn bounded(preemption: usize) -> loom::model::Builder {
        let mut b = loom::model::Builder::new();
        b.preemption_bound = Some(preemption);
        b
    }

    // =====================================================================
    // 1. stats::Counter
    // =====================================================================

    #[test]
    fn loom_counter_concurrent_add_sub() {
        use crate::memory::stats::Counter;

        loom::model(|| {
            let counter = Arc::new(Counter::new());
            let c1 = counter.clone();
            let c2 = counter.clone();

            let t1 = thread::spawn(move || {
                c1.add(10);
                c1.add(5);
            });

            let t2 = thread::spawn(move || {
                c2.sub(3);
                c2.add(8);
            });

            t1.join().unwrap();
            t2.join().unwrap();

            assert_eq!(counter.get(), 20);
        });
    }

    /// A sub that lands before its matching add must never surface as a
    /// huge unsigned value.
    #[test]
    fn loom_counter_sub_before_add_clamps() {
        use crate::memory::stats::Counter;

        loom::model(|| {
            let counter = Arc::new(Counter::new());
            let c1 = counter.clone();

            let t1 = thread::spawn(move || c1.sub(4));
            let seen = counter.get();
            counter.add(4);
            t1.join().unwrap();

            assert!(seen <= 4);
            assert_eq!(counter.get(), 0);
        });
    }

    // =====================================================================
    // 2. SlabPool behind a Mutex
    // =====================================================================

    /// Two threads allocate and free through one locked pool.
    #[test]
    fn loom_locked_pool_concurrent() {
        loom::model(|| {
            let pool = Arc::new(Mutex::new(SlabPool::new(16).unwrap()));
            let p1 = pool.clone();
            let p2 = pool.clone();

            let worker = |pool: Arc<Mutex<SlabPool>>| {
                move || {
                    let ptr = pool.lock().unwrap().allocate().unwrap();
                    // Safety: Test code; slot is ours until freed.
                    unsafe { ptr.cast::<u64>().write(7) };
                    let mut guard = pool.lock().unwrap();
                    // Safety: Test code.
                    unsafe {
                        assert_eq!(ptr.cast::<u64>().read(), 7);
                        guard.deallocate(ptr);
                    }
                }
            };

            let t1 = thread::spawn(worker(p1));
            let t2 = thread::spawn(worker(p2));
            t1.join().unwrap();
            t2.join().unwrap();

            let pool = pool.lock().unwrap();
            assert_eq!(pool.live_elements(), 0);
            assert_eq!(pool.block_count(), 0);
        });
    }

    /// One thread frees a slot the other allocated.
    #[test]
    fn loom_locked_pool_cross_thread_free() {
        bounded(2).check(|| {
            let pool = Arc::new(Mutex::new(SlabPool::new(32).unwrap()));
            let kept = pool.lock().unwrap().allocate().unwrap().as_ptr() as usize;
            let p1 = pool.clone();
            let p2 = pool.clone();

            let t1 = thread::spawn(move || p1.lock().unwrap().allocate().unwrap().as_ptr() as usize);

            let t2 = thread::spawn(move || {
                let ptr = NonNull::new(kept as *mut u8).unwrap();
                // Safety: Test code; `kept` came from this pool.
                unsafe { p2.lock().unwrap().deallocate(ptr) };
            });

            let addr = t1.join().unwrap();
            t2.join().unwrap();

            let mut pool = pool.lock().unwrap();
            assert_eq!(pool.live_elements(), 1);
            // Safety: Test code.
            unsafe { pool.deallocate(NonNull::new(addr as *mut u8).unwrap()) };
            assert_eq!(pool.block_count(), 0);
        });
    }

    // =====================================================================
    // 3. Pools owned per thread, shared gauges
    // =====================================================================

    #[test]
    fn loom_private_pools_share_gauges() {
        use crate::memory::stats::{BLOCKS_LIVE, SLOTS_LIVE};

        loom::model(|| {
            let spawn_worker = || {
                thread::spawn(|| {
                    let mut pool = SlabPool::new(64).unwrap();
                    let a = pool.allocate().unwrap();
                    let b = pool.allocate().unwrap();
                    // Safety: Test code.
                    unsafe {
                        pool.deallocate(a);
                        pool.deallocate(b);
                    }
                })
            };

            let t1 = spawn_worker();
            let t2 = spawn_worker();
            t1.join().unwrap();
            t2.join().unwrap();

            assert_eq!(SLOTS_LIVE.get(), 0);
            assert_eq!(BLOCKS_LIVE.get(), 0);
        });
    }
}
