//! Compiles a finalized [`piejam_core::Graph`] into a schedulable [`Dag`]
//! . One [`Dag`] task is created per graph node. Each task owns its
//! processor directly (no extra indirection needed there — the processor is
//! only ever invoked by the worker that currently holds the node, exactly as
//! the scheduler's own exclusivity invariant already guarantees for
//! `NodeCell`). What a task *doesn't* own outright is the audio/event data
//! flowing between nodes: a producer's output must be readable by every
//! consumer once the producer's task has run. Each output port therefore
//! gets an [`AudioSlot`]/[`EventSlot`] allocated once at compile time and
//! shared (via `Arc`) between the producing task and every consuming task —
//! the same "shared pointer captured when the graph was built" idiom
//! distilled §3 describes for parameter value cells, applied here to
//! per-edge audio buffers instead. No task allocates once installed: every
//! buffer (audio slot, event slot, per-node event arena, per-input scratch
//! buffer for resolving a constant result) is reserved during this compile
//! pass, which runs on the control thread as part of an orchestrator
//! rebuild, never on the audio thread.

use std::sync::Arc;

use piejam_core::graph::{Edge, EdgeKind, PortRef};
use piejam_core::processor::{AudioResult, Event, EventArena, ProcessContext, Processor};
use piejam_core::Graph;

use crate::dag::{Dag, DagError, TaskId, ThreadContext};

/// Bytes reserved for each node's per-period event-payload arena.
///
/// The distilled spec's "per-worker" arena becomes "per-node" here since a
/// compiled [`Dag`] task only has a `&ThreadContext` to work with, not a
/// worker identity (see `ThreadContext`'s doc comment) — each node reserves
/// its own small arena once at compile time instead of sharing one per
/// worker. Sized generously for MIDI-derived and parameter-change events,
/// which are the only payloads carried on the audio path.
const EVENT_ARENA_BYTES: usize = 4096;

/// Initial capacity for each event-output buffer, to make a mid-period
/// reallocation unlikely without guaranteeing it can never happen (an
/// unusually bursty event port — e.g. many simultaneous MIDI-learn writes —
/// could still grow one). `finalize()`'s mix-insertion pass doesn't apply to
/// events, so this is the one corner of the compiled `Dag` that isn't
/// strictly allocation-free in the worst case; noted rather than hidden.
const EVENT_CAPACITY_HINT: usize = 64;

/// Errors compiling a [`Graph`] into a [`Dag`].
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The graph's edges (as submitted to the underlying DAG builder) would
    /// create a cycle. Should not happen for a graph assembled through the
    /// normal `Graph`/`Component` API, which has no way to introduce a
    /// cycle; surfaced anyway since [`piejam_core::graph::Graph`] does not
    /// itself guarantee acyclicity for manually-added edges.
    #[error(transparent)]
    Dag(#[from] DagError),
}

/// One audio output port's shared, compile-time-allocated backing storage.
///
/// Holds both the raw sample buffer and the "did this port collapse to a
/// constant this period" flag. A consumer must check `constant` before
/// reading `buf`: a processor that reports `AudioResult::Constant` is
/// permitted to leave `buf` stale (see `piejam_core::processor::Smooth`,
/// which does exactly this once settled).
struct AudioSlot {
    buf: Box<[f32]>,
    ptr: *mut f32,
    len: usize,
    constant: std::cell::UnsafeCell<Option<f32>>,
}

#[allow(unsafe_code)]
// SAFETY: `buf`'s heap allocation never moves or resizes after
// construction, and every read/write to it is mediated by the scheduler's
// parent-completes-before-child ordering: the owning node writes during its
// own (exclusive, once-per-period) task invocation; every other reader only
// runs after that task has completed, by construction of the DAG's
// parents-to-process handoff. No two threads touch this slot concurrently.
unsafe impl Sync for AudioSlot {}

impl AudioSlot {
    fn new(buffer_size: usize) -> Self {
        let mut buf: Box<[f32]> = vec![0.0_f32; buffer_size].into_boxed_slice();
        let ptr = buf.as_mut_ptr();
        let len = buf.len();
        Self {
            buf,
            ptr,
            len,
            constant: std::cell::UnsafeCell::new(Some(0.0)),
        }
    }

    /// The writable view the owning node's task passes as its own
    /// `ctx.outputs[port]`.
    ///
    /// # Safety
    /// Caller must be the node that owns this slot as one of its outputs,
    /// and must call this only from within that node's own task body.
    #[allow(unsafe_code)]
    unsafe fn output_slice(&self) -> &'static mut [f32] {
        // SAFETY: see impl-level safety comment; `ptr`/`len` describe
        // `buf`'s stable backing allocation.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Resolves this port's value for the current period as a slice,
    /// expanding into `scratch` if the producer reported a constant.
    ///
    /// # Safety
    /// Caller must only call this once the producing node's task has
    /// finished for the current period (guaranteed by a DAG edge from
    /// producer to consumer).
    #[allow(unsafe_code)]
    unsafe fn resolved(&self, scratch: &mut [f32]) -> &'static [f32] {
        // SAFETY: see impl-level safety comment.
        let constant = unsafe { *self.constant.get() };
        match constant {
            Some(v) => {
                scratch.fill(v);
                unsafe { std::slice::from_raw_parts(scratch.as_ptr(), scratch.len()) }
            }
            None => unsafe { std::slice::from_raw_parts(self.ptr, self.len) },
        }
    }

    /// Records whether the owning node's most recent `process` call
    /// collapsed this port to a constant.
    ///
    /// # Safety
    /// Same as [`AudioSlot::output_slice`].
    #[allow(unsafe_code)]
    unsafe fn set_result(&self, result: AudioResult) {
        // SAFETY: see impl-level safety comment.
        unsafe {
            *self.constant.get() = result.as_constant();
        }
    }
}

/// One event output port's shared, compile-time-allocated backing storage.
struct EventSlot {
    events: std::cell::UnsafeCell<Vec<Event>>,
}

#[allow(unsafe_code)]
// SAFETY: same reasoning as `AudioSlot` — access is serialized by the
// scheduler's parent-before-child ordering.
unsafe impl Sync for EventSlot {}

impl EventSlot {
    fn new() -> Self {
        Self {
            events: std::cell::UnsafeCell::new(Vec::with_capacity(EVENT_CAPACITY_HINT)),
        }
    }

    /// # Safety
    /// Caller must be the owning node, calling from within its own task body.
    #[allow(unsafe_code)]
    unsafe fn output_vec(&self) -> &'static mut Vec<Event> {
        // SAFETY: see impl-level safety comment; the `Vec`'s header lives in
        // `self`, which is kept alive by an `Arc` for the whole `Dag`'s
        // life, and is never touched from more than one thread at a time.
        unsafe { &mut *self.events.get() }
    }

    /// # Safety
    /// Caller must only call this once the producing node's task has
    /// finished for the current period.
    #[allow(unsafe_code)]
    unsafe fn resolved(&self) -> &'static [Event] {
        // SAFETY: see impl-level safety comment.
        unsafe { &*self.events.get() }
    }
}

/// Per-node compile-time context used while resolving edges, kept separate
/// from the final closure so the borrow of `audio_slots`/`event_slots`
/// doesn't have to outlive the loop that builds tasks.
struct Wiring {
    audio_in_src: Vec<Vec<Option<PortRef>>>,
    event_in_src: Vec<Vec<Option<PortRef>>>,
    dag_edges: Vec<(TaskId, TaskId)>,
}

fn resolve_wiring(edges: &[Edge], audio_in_counts: &[usize], event_in_counts: &[usize]) -> Wiring {
    let mut audio_in_src: Vec<Vec<Option<PortRef>>> =
        audio_in_counts.iter().map(|&c| vec![None; c]).collect();
    let mut event_in_src: Vec<Vec<Option<PortRef>>> =
        event_in_counts.iter().map(|&c| vec![None; c]).collect();
    let mut dag_edge_set: std::collections::BTreeSet<(u32, u32)> = Default::default();

    for edge in edges {
        let from_node = edge.from.node.index();
        let to_node = edge.to.node.index();
        dag_edge_set.insert((from_node, to_node));
        match edge.kind {
            EdgeKind::Audio => {
                audio_in_src[to_node as usize][edge.to.port] = Some(edge.from);
            }
            EdgeKind::Event => {
                event_in_src[to_node as usize][edge.to.port] = Some(edge.from);
            }
        }
    }

    let dag_edges = dag_edge_set
        .into_iter()
        .map(|(from, to)| (TaskId(from), TaskId(to)))
        .collect();

    Wiring {
        audio_in_src,
        event_in_src,
        dag_edges,
    }
}

/// Compiles `graph` (already [`Graph::finalize`]d by the caller) into a
/// [`Dag`] sized for periods of `buffer_size` frames.
///
/// Consumes `graph`: node ownership moves into the compiled tasks (see
/// [`Graph::into_parts`]), matching the orchestrator's "builds a new DAG,
/// atomically hands it to the running process callback" flow (distilled
/// §4.5) — the mutable `Graph` used to construct a period's topology has no
/// further use once compiled.
pub fn compile(graph: Graph, buffer_size: usize) -> Result<Dag, CompileError> {
    let (processors, edges) = graph.into_parts();
    let node_count = processors.len();

    let audio_out_counts: Vec<usize> = processors.iter().map(|p| p.num_outputs()).collect();
    let audio_in_counts: Vec<usize> = processors.iter().map(|p| p.num_inputs()).collect();
    let event_out_counts: Vec<usize> = processors.iter().map(|p| p.event_outputs().len()).collect();
    let event_in_counts: Vec<usize> = processors.iter().map(|p| p.event_inputs().len()).collect();

    let audio_slots: Vec<Vec<Arc<AudioSlot>>> = audio_out_counts
        .iter()
        .map(|&count| (0..count).map(|_| Arc::new(AudioSlot::new(buffer_size))).collect())
        .collect();
    let event_slots: Vec<Vec<Arc<EventSlot>>> = event_out_counts
        .iter()
        .map(|&count| (0..count).map(|_| Arc::new(EventSlot::new())).collect())
        .collect();

    // Shared defaults for unconnected ports: silence for audio, no events
    // for event inputs. Never written, so sharing one instance is safe.
    let silence = Arc::new(AudioSlot::new(buffer_size));
    let no_events = Arc::new(EventSlot::new());

    let wiring = resolve_wiring(&edges, &audio_in_counts, &event_in_counts);

    let mut tasks: Vec<Box<dyn FnMut(&ThreadContext) + Send>> = Vec::with_capacity(node_count);

    for (i, mut processor) in processors.into_iter().enumerate() {
        let num_in = audio_in_counts[i];
        let num_out = audio_out_counts[i];
        let num_event_in = event_in_counts[i];
        let num_event_out = event_out_counts[i];

        let my_audio_out = audio_slots[i].clone();
        let my_event_out = event_slots[i].clone();

        let input_sources: Vec<Arc<AudioSlot>> = wiring.audio_in_src[i]
            .iter()
            .map(|src| {
                src.map_or_else(
                    || Arc::clone(&silence),
                    |port_ref| Arc::clone(&audio_slots[port_ref.node.index() as usize][port_ref.port]),
                )
            })
            .collect();
        let event_input_sources: Vec<Arc<EventSlot>> = wiring.event_in_src[i]
            .iter()
            .map(|src| {
                src.map_or_else(
                    || Arc::clone(&no_events),
                    |port_ref| Arc::clone(&event_slots[port_ref.node.index() as usize][port_ref.port]),
                )
            })
            .collect();

        let mut input_scratch: Vec<Box<[f32]>> = (0..num_in)
            .map(|_| vec![0.0_f32; buffer_size].into_boxed_slice())
            .collect();
        let mut input_refs: Vec<&'static [f32]> = vec![&[]; num_in];
        let mut event_input_refs: Vec<&'static [Event]> = vec![&[]; num_event_in];
        let mut output_refs: Vec<&'static mut [f32]> = Vec::with_capacity(num_out);
        let mut event_output_refs: Vec<&'static mut Vec<Event>> = Vec::with_capacity(num_event_out);
        let mut results: Vec<AudioResult> = vec![AudioResult::Constant(0.0); num_out];
        let mut arena_storage = vec![0_u8; EVENT_ARENA_BYTES];

        let task: Box<dyn FnMut(&ThreadContext) + Send> = Box::new(move |_ctx: &ThreadContext| {
            for k in 0..num_in {
                #[allow(unsafe_code)]
                // SAFETY: a DAG edge from each `input_sources[k]`'s owning
                // node to this node guarantees that producer's task has
                // already run this period.
                let resolved = unsafe { input_sources[k].resolved(&mut input_scratch[k]) };
                input_refs[k] = resolved;
            }
            for k in 0..num_event_in {
                #[allow(unsafe_code)]
                // SAFETY: same ordering guarantee as the audio case above.
                let resolved = unsafe { event_input_sources[k].resolved() };
                event_input_refs[k] = resolved;
            }

            output_refs.clear();
            for slot in &my_audio_out {
                #[allow(unsafe_code)]
                // SAFETY: this node is the slot's sole owner/writer.
                let out = unsafe { slot.output_slice() };
                output_refs.push(out);
            }
            event_output_refs.clear();
            for slot in &my_event_out {
                #[allow(unsafe_code)]
                // SAFETY: same as the audio-output case above.
                let out = unsafe { slot.output_vec() };
                out.clear();
                event_output_refs.push(out);
            }
            for result in &mut results {
                *result = AudioResult::Constant(0.0);
            }

            let mut arena = EventArena::new(&mut arena_storage);
            {
                let mut ctx = ProcessContext {
                    inputs: &input_refs,
                    outputs: &mut output_refs,
                    results: &mut results,
                    event_inputs: &event_input_refs,
                    event_outputs: &mut event_output_refs,
                    event_memory: &mut arena,
                    buffer_size,
                };
                processor.process(&mut ctx);
            }

            for (slot, result) in my_audio_out.iter().zip(results.iter().copied()) {
                #[allow(unsafe_code)]
                // SAFETY: this node is the slot's sole owner/writer.
                unsafe {
                    slot.set_result(result);
                }
            }
        });

        tasks.push(task);
    }

    Dag::compile(tasks, &wiring.dag_edges).map_err(CompileError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use piejam_core::graph::PortRef as PR;

    #[test]
    fn identity_chain_passes_audio_through() {
        let mut graph = Graph::new();
        let src = graph.add_node(Box::new(ConstSource(1.5)));
        let id = graph.add_identity();
        graph.connect_audio(PR::new(src, 0), PR::new(id, 0)).unwrap();
        graph.finalize();

        let dag = compile(graph, 4).unwrap();
        let ctx = ThreadContext { buffer_size: 4 };
        crate::dag::run_st(&dag, &ctx);
        // Nothing to assert on output directly (no sink), but the sweep
        // must complete without panicking and touch every node.
        assert_eq!(dag.node_count(), 2);
    }

    #[test]
    fn finalize_then_compile_mixes_fan_in() {
        let mut graph = Graph::new();
        let a = graph.add_node(Box::new(ConstSource(1.0)));
        let b = graph.add_node(Box::new(ConstSource(2.0)));
        let sink = graph.add_node(Box::new(Sink::new()));
        graph.connect_audio(PR::new(a, 0), PR::new(sink, 0)).unwrap();
        graph.connect_audio(PR::new(b, 0), PR::new(sink, 0)).unwrap();
        graph.finalize();

        let dag = compile(graph, 4).unwrap();
        let ctx = ThreadContext { buffer_size: 4 };
        crate::dag::run_st(&dag, &ctx);
        assert_eq!(*SINK_LAST.lock().unwrap(), vec![3.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn clip_and_mix_compile_and_run() {
        let mut graph = Graph::new();
        let src = graph.add_node(Box::new(ConstSource(5.0)));
        let clip = graph.add_clip();
        let sink = graph.add_node(Box::new(Sink::new()));
        graph.connect_audio(PR::new(src, 0), PR::new(clip, 0)).unwrap();
        graph.connect_audio(PR::new(clip, 0), PR::new(sink, 0)).unwrap();
        graph.finalize();

        let dag = compile(graph, 2).unwrap();
        let ctx = ThreadContext { buffer_size: 2 };
        crate::dag::run_st(&dag, &ctx);
        assert_eq!(*SINK_LAST.lock().unwrap(), vec![1.0, 1.0]);
    }

    struct ConstSource(f32);
    impl Processor for ConstSource {
        fn type_name(&self) -> &'static str {
            "const_source"
        }
        fn num_inputs(&self) -> usize {
            0
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
            ctx.outputs[0].fill(self.0);
            ctx.results[0] = AudioResult::Slice;
        }
    }

    static SINK_LAST: std::sync::Mutex<Vec<f32>> = std::sync::Mutex::new(Vec::new());

    struct Sink;
    impl Sink {
        fn new() -> Self {
            Self
        }
    }
    impl Processor for Sink {
        fn type_name(&self) -> &'static str {
            "sink"
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
            *SINK_LAST.lock().unwrap() = ctx.inputs[0].to_vec();
            ctx.outputs[0].copy_from_slice(ctx.inputs[0]);
            ctx.results[0] = AudioResult::Slice;
        }
    }
}
