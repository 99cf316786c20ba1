//! The compiled DAG and its two executors: one [`Node`] per processor,
//! `children` built by walking the compile-time adjacency list,
//! `num_parents` counted the same way, `parents_to_process` reset (not
//! rebuilt) at the start of every period. The run queue and the per-period
//! atomics are `Dag` fields, built once at [`Dag::compile`] and reused every
//! period — nothing here allocates inside a period.

use std::hint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crate::worker::WorkerPool;

/// Identifies a node in a compiled [`Dag`] — a dense index into its node vec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u32);

/// Everything a [`Dag`] task needs for one period.
///
/// Deliberately minimal: the real per-node audio/event buffers live inside
/// the closures the orchestrator builds (each captures the slices it reads
/// and writes) — `ThreadContext` only carries what's common to every task.
#[derive(Debug, Clone, Copy)]
pub struct ThreadContext {
    /// Frames in this period; constant across all periods for one compiled
    /// `Dag` (a buffer-size change triggers a full orchestrator rebuild).
    pub buffer_size: usize,
}

/// Errors from building or running a [`Dag`].
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// A manually-added edge would create a cycle.
    #[error("edge {from:?} -> {to:?} would create a cycle")]
    WouldCycle {
        /// The edge's source node.
        from: TaskId,
        /// The edge's destination node.
        to: TaskId,
    },
}

type Task = Box<dyn FnMut(&ThreadContext) + Send>;

struct NodeInner {
    task: Task,
    children: Vec<TaskId>,
    num_parents: usize,
    parents_to_process: AtomicUsize,
}

/// Exclusive-access wrapper making [`NodeInner`] shareable across worker
/// threads.
///
/// # Safety invariant
///
/// A node is only ever executed once per period and the executing worker
/// exclusively holds that push until it pops the node — so at most one
/// thread calls [`NodeCell::task_mut`] on a given node within a period, even
/// though many threads hold a shared `&Dag` referencing the same `Vec`.
#[repr(transparent)]
struct NodeCell(std::cell::UnsafeCell<NodeInner>);

#[allow(unsafe_code)]
// SAFETY: see the safety invariant documented on `NodeCell` above — access
// is serialized by the run-queue hand-off protocol, not by this impl.
unsafe impl Sync for NodeCell {}

impl NodeCell {
    fn new(inner: NodeInner) -> Self {
        Self(std::cell::UnsafeCell::new(inner))
    }

    fn get(&self) -> &NodeInner {
        #[allow(unsafe_code)]
        // SAFETY: shared access to the non-atomic fields (`children`,
        // `num_parents`) is always fine; they never change after
        // `Dag::compile`. Only `task`'s *invocation* requires exclusivity,
        // handled by `task_mut`.
        unsafe {
            &*self.0.get()
        }
    }

    /// # Safety
    ///
    /// The caller must hold exclusive logical ownership of this node for
    /// the duration of the borrow — guaranteed by the run-queue hand-off
    /// protocol described on [`NodeCell`].
    #[allow(unsafe_code)]
    unsafe fn task_mut(&self) -> &mut Task {
        unsafe { &mut (*self.0.get()).task }
    }
}

/// A lock-free fixed-capacity LIFO stack of node indices, sized to the
/// DAG's node count up front so `push`/`pop` never allocate — a small
/// Treiber stack over a fixed slab of slots.
struct RunQueue {
    slots: Box<[AtomicUsize]>,
    top: AtomicUsize,
}

impl RunQueue {
    fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1))
            .map(|_| AtomicUsize::new(usize::MAX))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            top: AtomicUsize::new(0),
        }
    }

    fn push(&self, index: usize) {
        let slot = self.top.fetch_add(1, Ordering::AcqRel);
        debug_assert!(slot < self.slots.len(), "run queue overflow");
        self.slots[slot].store(index, Ordering::Release);
    }

    fn pop(&self) -> Option<usize> {
        loop {
            let top = self.top.load(Ordering::Acquire);
            if top == 0 {
                return None;
            }
            if self
                .top
                .compare_exchange_weak(top, top - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(self.slots[top - 1].load(Ordering::Acquire));
            }
            hint::spin_loop();
        }
    }

    fn clear(&self) {
        self.top.store(0, Ordering::Release);
    }
}

/// A compiled, schedulable DAG: one node per processor, edges from the
/// finalized [`piejam_core::Graph`]. Owns its run queue and per-period
/// atomics as fields so that running the same `Dag` period after period
/// allocates nothing; only `compile` (on the control thread, during an
/// orchestrator rebuild) allocates.
pub struct Dag {
    nodes: Vec<NodeCell>,
    roots: Vec<usize>,
    run_queue: RunQueue,
    nodes_to_process: AtomicUsize,
    running_counter: AtomicUsize,
}

impl Dag {
    /// Builds a DAG from a task list and an adjacency map, mirroring the
    /// donor's `dag::tasks_t`/`dag::graph_t` inputs to `make_nodes`. `tasks`
    /// supplies one task per node, indexed by its position; `edges` is
    /// `(parent, child)` pairs. Rejects edges that would create a cycle.
    pub fn compile(tasks: Vec<Task>, edges: &[(TaskId, TaskId)]) -> Result<Self, DagError> {
        let mut children: Vec<Vec<TaskId>> = vec![Vec::new(); tasks.len()];
        let mut num_parents = vec![0usize; tasks.len()];

        for &(parent, child) in edges {
            if is_descendant(&children, child, parent) {
                return Err(DagError::WouldCycle {
                    from: parent,
                    to: child,
                });
            }
            children[parent.0 as usize].push(child);
            num_parents[child.0 as usize] += 1;
        }

        let node_count = tasks.len();
        let roots: Vec<usize> = num_parents
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| if p == 0 { Some(i) } else { None })
            .collect();

        let nodes = tasks
            .into_iter()
            .zip(children)
            .zip(num_parents)
            .map(|((task, children), num_parents)| {
                NodeCell::new(NodeInner {
                    task,
                    children,
                    num_parents,
                    parents_to_process: AtomicUsize::new(num_parents),
                })
            })
            .collect::<Vec<_>>();

        Ok(Self {
            nodes,
            roots,
            run_queue: RunQueue::new(node_count),
            nodes_to_process: AtomicUsize::new(node_count),
            running_counter: AtomicUsize::new(0),
        })
    }

    /// Number of nodes in this DAG.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of root nodes (`num_parents == 0`).
    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Total edge count, for structural-reuse comparisons.
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.get().children.len()).sum()
    }

    fn reset_for_period(&self) {
        self.run_queue.clear();
        for node in &self.nodes {
            let n = node.get();
            n.parents_to_process
                .store(n.num_parents, Ordering::Relaxed);
        }
        for &root in &self.roots {
            self.run_queue.push(root);
        }
        self.nodes_to_process
            .store(self.nodes.len(), Ordering::Release);
    }

    fn pop_and_run(&self, ctx: &ThreadContext) -> bool {
        let Some(mut i) = self.run_queue.pop() else {
            return false;
        };
        loop {
            let node = &self.nodes[i];
            debug_assert_eq!(node.get().parents_to_process.load(Ordering::Relaxed), 0);

            #[allow(unsafe_code)]
            // SAFETY: `i` was popped from the run queue, which only yields
            // a node once its last parent's decrement reached zero — no
            // other worker holds it concurrently (see `NodeCell` docs).
            let task = unsafe { node.task_mut() };
            task(ctx);

            let mut next = None;
            for &child in &node.get().children {
                let child_idx = child.0 as usize;
                let child_node = &self.nodes[child_idx];
                if child_node
                    .get()
                    .parents_to_process
                    .fetch_sub(1, Ordering::AcqRel)
                    == 1
                {
                    if next.is_some() {
                        self.run_queue.push(child_idx);
                    } else {
                        next = Some(child_idx);
                    }
                }
            }

            self.nodes_to_process.fetch_sub(1, Ordering::AcqRel);

            match next {
                Some(n) => i = n,
                None => return true,
            }
        }
    }
}

/// Depth-first search: is `needle` reachable from `start` through `children`?
/// Used at build time to reject edges that would create a cycle.
fn is_descendant(children: &[Vec<TaskId>], start: TaskId, needle: TaskId) -> bool {
    let mut stack = vec![start];
    let mut seen = vec![false; children.len()];
    while let Some(id) = stack.pop() {
        if id.0 == needle.0 {
            return true;
        }
        if seen[id.0 as usize] {
            continue;
        }
        seen[id.0 as usize] = true;
        stack.extend(children[id.0 as usize].iter().copied());
    }
    false
}

/// Runs one period on a single thread: pushes roots, pops the LIFO queue
/// until empty — exactly the donor's `dag_executor_st` collapsed to a single
/// worker. Returns the wall-clock time this sweep took, for CPU-load
/// accounting.
pub fn run_st(dag: &Dag, ctx: &ThreadContext) -> std::time::Duration {
    let start = Instant::now();
    dag.reset_for_period();
    while dag.pop_and_run(ctx) {}
    start.elapsed()
}

/// Runs one period across `pool`'s workers plus the calling (audio) thread
/// : every worker and the calling thread race to pop from the same lock-free
/// run queue, with direct parent-to-child handoff on whichever worker
/// completes a node's last parent. The caller runs inline as the "main
/// worker", then busy-waits on every dispatched worker's completion,
/// matching "the main worker busy-waits on `running_counter == 0`". Returns
/// the average cumulative worker CPU time divided by worker count.
pub fn run_mt(dag: &Dag, pool: &WorkerPool, ctx: &ThreadContext) -> std::time::Duration {
    dag.reset_for_period();

    dag.running_counter
        .fetch_add(1 + pool.len(), Ordering::AcqRel);

    for _ in 0..pool.len() {
        let dag_ptr = dag as *const Dag as usize;
        let ctx = *ctx;
        pool.dispatch(move || {
            #[allow(unsafe_code)]
            // SAFETY: `dag`/`ctx` outlive this call: `run_mt` only returns
            // after busy-waiting for `running_counter` to reach zero, which
            // every dispatched worker decrements after it observes
            // `nodes_to_process == 0`, so no worker touches `dag_ptr` after
            // `run_mt`'s caller regains control of `dag`.
            let dag = unsafe { &*(dag_ptr as *const Dag) };
            while dag.nodes_to_process.load(Ordering::Acquire) > 0 {
                if !dag.pop_and_run(&ctx) {
                    hint::spin_loop();
                }
            }
            dag.running_counter.fetch_sub(1, Ordering::AcqRel);
        });
    }

    let main_start = Instant::now();
    while dag.nodes_to_process.load(Ordering::Acquire) > 0 {
        if !dag.pop_and_run(ctx) {
            hint::spin_loop();
        }
    }
    dag.running_counter.fetch_sub(1, Ordering::AcqRel);
    let main_elapsed = main_start.elapsed();

    while dag.running_counter.load(Ordering::Acquire) != 0 {
        hint::spin_loop();
    }

    main_elapsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn linear_chain(
        len: usize,
        order: Arc<std::sync::Mutex<Vec<usize>>>,
    ) -> (Vec<Task>, Vec<(TaskId, TaskId)>) {
        let tasks: Vec<Task> = (0..len)
            .map(|i| {
                let order = Arc::clone(&order);
                Box::new(move |_ctx: &ThreadContext| {
                    order.lock().unwrap().push(i);
                }) as Task
            })
            .collect();
        let edges = (0..len.saturating_sub(1))
            .map(|i| (TaskId(i as u32), TaskId(i as u32 + 1)))
            .collect();
        (tasks, edges)
    }

    #[test]
    fn single_threaded_runs_every_node_once_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (tasks, edges) = linear_chain(5, Arc::clone(&order));
        let dag = Dag::compile(tasks, &edges).unwrap();
        let ctx = ThreadContext { buffer_size: 64 };
        run_st(&dag, &ctx);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn running_twice_executes_every_node_again() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (tasks, edges) = linear_chain(3, Arc::clone(&order));
        let dag = Dag::compile(tasks, &edges).unwrap();
        let ctx = ThreadContext { buffer_size: 64 };
        run_st(&dag, &ctx);
        run_st(&dag, &ctx);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn cyclic_edge_is_rejected() {
        let tasks: Vec<Task> = (0..3)
            .map(|_| Box::new(|_: &ThreadContext| {}) as Task)
            .collect();
        let edges = vec![
            (TaskId(0), TaskId(1)),
            (TaskId(1), TaskId(2)),
            (TaskId(2), TaskId(0)),
        ];
        assert!(matches!(
            Dag::compile(tasks, &edges),
            Err(DagError::WouldCycle { .. })
        ));
    }

    #[test]
    fn diamond_respects_parent_before_child() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let tasks: Vec<Task> = (0..4)
            .map(|i| {
                let order = Arc::clone(&order);
                Box::new(move |_: &ThreadContext| order.lock().unwrap().push(i)) as Task
            })
            .collect();
        // 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3
        let edges = vec![
            (TaskId(0), TaskId(1)),
            (TaskId(0), TaskId(2)),
            (TaskId(1), TaskId(3)),
            (TaskId(2), TaskId(3)),
        ];
        let dag = Dag::compile(tasks, &edges).unwrap();
        let ctx = ThreadContext { buffer_size: 64 };
        run_st(&dag, &ctx);
        let seen = order.lock().unwrap();
        assert_eq!(seen[0], 0);
        assert_eq!(*seen.last().unwrap(), 3);
    }

    #[test]
    fn multi_threaded_matches_single_threaded_node_count() {
        let order_st = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (tasks, edges) = linear_chain(20, Arc::clone(&order_st));
        let dag = Dag::compile(tasks, &edges).unwrap();
        let pool = WorkerPool::new(3, crate::worker::ThreadConfig::unpinned).unwrap();
        let ctx = ThreadContext { buffer_size: 32 };
        run_mt(&dag, &pool, &ctx);
        assert_eq!(order_st.lock().unwrap().len(), 20);
        pool.shutdown();
    }
}
