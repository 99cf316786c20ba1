//! The `Processor` trait: the abstract unit of computation in the audio graph.
//!
//! A processor reads audio/event inputs and writes audio/event outputs once
//! per period. It never allocates in [`Processor::process`] — buffers, event
//! queues and the per-worker arena are all supplied by the caller via
//! [`ProcessContext`].

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;
#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// A single timestamped event carried on an event port.
///
/// `offset` is the sample position within the current period at which the
/// event takes effect; `value` is a plain 32-bit payload (bit-cast to
/// whatever the port's event type actually is — a parameter value, a MIDI
/// byte triple packed into a `u32`, etc).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    /// Sample offset within the current period, `0..buffer_size`.
    pub offset: u32,
    /// Event payload.
    pub value: f32,
}

/// A typed event-port descriptor, paired 1:1 with `event_inputs`/`event_outputs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventPortDescriptor {
    /// Port name, for debugging and GUI binding.
    pub name: &'static str,
}

/// A single output result: either a broadcast constant or a slice into the
/// caller-owned output buffer.
///
/// When every sample in an output would be identical (e.g. a gain node fed a
/// held parameter value and silence), the processor publishes `Constant`
/// instead of writing `buffer_size` identical samples — downstream
/// processors and the mix-insertion pass can special-case a constant input
/// without ever touching the sample buffer.
#[derive(Debug, Clone, Copy)]
pub enum AudioResult {
    /// The whole output buffer is this single value.
    Constant(f32),
    /// The output buffer, written in full. Carries no reference of its own —
    /// the caller already holds the buffer it was written into (`ctx.outputs[i]`
    /// or an [`AudioSlot`](crate)'s own storage), so this variant is just a
    /// marker that that buffer is live this period.
    Slice,
}

impl AudioResult {
    /// Reads this result as a slice, expanding a constant into `scratch`.
    ///
    /// `buf` is the caller's own output buffer for this port (ignored for
    /// `Constant`); `scratch` must be at least `len` samples.
    pub fn as_slice<'b>(&self, buf: &'b [f32], len: usize, scratch: &'b mut [f32]) -> &'b [f32] {
        match *self {
            AudioResult::Slice => &buf[..len],
            AudioResult::Constant(v) => {
                scratch[..len].fill(v);
                &scratch[..len]
            }
        }
    }

    /// The constant value, if this result collapsed to one.
    pub fn as_constant(&self) -> Option<f32> {
        match *self {
            AudioResult::Constant(v) => Some(v),
            AudioResult::Slice => None,
        }
    }
}

/// Per-worker bump allocator for event payloads scoped to one period.
///
/// Processors that need to stash event data beyond a single `u32` (a MIDI
/// sysex blob, a preset name) allocate from here; the arena is released
/// (reset to offset zero) by the scheduler at the end of every period, so
/// nothing allocated here may be retained across periods.
pub struct EventArena<'a> {
    storage: &'a mut [u8],
    offset: usize,
}

impl<'a> EventArena<'a> {
    /// Wraps a pre-reserved byte buffer as a fresh arena.
    pub fn new(storage: &'a mut [u8]) -> Self {
        Self { storage, offset: 0 }
    }

    /// Bump-allocates `len` bytes, or returns `None` if the arena is full.
    ///
    /// Real-time safe: never grows, never calls into the global allocator.
    pub fn alloc(&mut self, len: usize) -> Option<&mut [u8]> {
        let end = self.offset.checked_add(len)?;
        if end > self.storage.len() {
            return None;
        }
        let slice = &mut self.storage[self.offset..end];
        self.offset = end;
        Some(slice)
    }

    /// Resets the arena to empty. Called once per period by the scheduler.
    pub fn release(&mut self) {
        self.offset = 0;
    }

    /// Bytes currently allocated out of this arena.
    pub fn used(&self) -> usize {
        self.offset
    }
}

/// Everything a [`Processor::process`] call needs for one period.
///
/// Two lifetimes, not one: `'ctx` is how long the context (and the slices of
/// references it holds) is borrowed for, while `'buf` is how long the
/// underlying sample/event buffers it points into actually live -- normally
/// far longer, since those buffers are the caller's own per-edge storage,
/// reused period after period. Collapsing them into a single lifetime would
/// force every buffer reference to live exactly as long as this one
/// `process` call, which an `&mut` element type (invariant in its pointee)
/// can't relax back out of once unified; keeping them separate is what lets
/// the same long-lived buffers be handed to a fresh, short-lived context
/// every period.
pub struct ProcessContext<'ctx, 'buf> {
    /// Read-only audio input slices, one per input port.
    pub inputs: &'ctx [&'buf [f32]],
    /// Writable audio output slices, one per output port.
    pub outputs: &'ctx mut [&'buf mut [f32]],
    /// Slice-or-constant result the processor must populate, one per output port.
    pub results: &'ctx mut [AudioResult],
    /// Incoming events, one buffer per event-input port.
    pub event_inputs: &'ctx [&'buf [Event]],
    /// Outgoing events, one buffer per event-output port. Processors push
    /// into these via their own internal accumulation before `process`
    /// returns; the scheduler clears them at the start of the next period.
    pub event_outputs: &'ctx mut [&'buf mut Vec<Event>],
    /// Per-worker event-payload arena, released at the end of the period.
    pub event_memory: &'ctx mut EventArena<'buf>,
    /// Number of samples in this period; constant within a period.
    pub buffer_size: usize,
}

/// The abstract unit of computation in the audio/event graph.
///
/// Object-safe by design (mirroring the donor's `Effect` trait): the graph
/// stores processors as `Box<dyn Processor + Send>` so that heterogeneous fx
/// modules, mixer utility nodes and mix/clip/identity helpers can all live
/// in one `Vec` and be invoked through one vtable call per node per period.
/// Processors that don't need type erasure (e.g. a `Component` wiring its
/// own sub-graph) are free to use static dispatch internally.
pub trait Processor {
    /// Human-readable type name, for debugging and introspection.
    fn type_name(&self) -> &'static str;

    /// Number of audio input ports.
    fn num_inputs(&self) -> usize;

    /// Number of audio output ports.
    fn num_outputs(&self) -> usize;

    /// Event input port descriptors. Empty for purely-audio processors.
    fn event_inputs(&self) -> &[EventPortDescriptor] {
        &[]
    }

    /// Event output port descriptors. Empty for purely-audio processors.
    fn event_outputs(&self) -> &[EventPortDescriptor] {
        &[]
    }

    /// Processes one period's worth of audio/events.
    ///
    /// Must not allocate, block, or panic. Must write every output slice
    /// and populate every `results[i]` entry it declared via `num_outputs`.
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>);
}

/// A sub-graph with its own input/output/event ports, wired into an
/// enclosing [`crate::graph::Graph`] via [`Component::connect`].
///
/// Mirrors `Processor`'s port shape one level up: a component is a reusable
/// unit of graph topology (an fx chain, a mixer channel strip) rather than
/// a single computation.
pub trait Component {
    /// Audio input port count this component exposes to its caller.
    fn inputs(&self) -> usize;
    /// Audio output port count this component exposes to its caller.
    fn outputs(&self) -> usize;
    /// Event input port descriptors exposed to the caller.
    fn event_inputs(&self) -> &[EventPortDescriptor] {
        &[]
    }
    /// Event output port descriptors exposed to the caller.
    fn event_outputs(&self) -> &[EventPortDescriptor] {
        &[]
    }
    /// Wires this component's internal processors into `g`, returning the
    /// node/port handles the caller should connect to.
    fn connect(self: Box<Self>, g: &mut crate::graph::Graph) -> crate::graph::ComponentPorts;
}

/// Identity processor: copies input 0 to output 0 unchanged.
///
/// Used by `Graph::finalize` and by `Component` wiring to pass a signal
/// through a node boundary without transformation (e.g. an unconnected
/// input port that must still resolve to a single incoming edge).
pub struct Identity;

impl Processor for Identity {
    fn type_name(&self) -> &'static str {
        "identity"
    }
    fn num_inputs(&self) -> usize {
        1
    }
    fn num_outputs(&self) -> usize {
        1
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
        ctx.outputs[0].copy_from_slice(ctx.inputs[0]);
        ctx.results[0] = AudioResult::Slice;
    }
}

/// Mix processor: sums `n` inputs into one output.
///
/// Inserted automatically by `Graph::finalize` whenever an input port would
/// otherwise receive more than one incoming edge.
pub struct Mix {
    n: usize,
}

impl Mix {
    /// Creates a mix node summing `n` audio inputs.
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl Processor for Mix {
    fn type_name(&self) -> &'static str {
        "mix"
    }
    fn num_inputs(&self) -> usize {
        self.n
    }
    fn num_outputs(&self) -> usize {
        1
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
        ctx.outputs[0].fill(0.0);
        for input in ctx.inputs {
            for (dst, src) in ctx.outputs[0].iter_mut().zip(input.iter()) {
                *dst += *src;
            }
        }
        ctx.results[0] = AudioResult::Slice;
    }
}

/// Clip processor: clamps its single input to `[-1.0, 1.0]`.
pub struct Clip;

impl Processor for Clip {
    fn type_name(&self) -> &'static str {
        "clip"
    }
    fn num_inputs(&self) -> usize {
        1
    }
    fn num_outputs(&self) -> usize {
        1
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
        for (dst, src) in ctx.outputs[0].iter_mut().zip(ctx.inputs[0].iter()) {
            *dst = src.clamp(-1.0, 1.0);
        }
        ctx.results[0] = AudioResult::Slice;
    }
}

/// A stateless `event_inputs -> event_outputs` converter, e.g. MIDI CC to
/// parameter-value events.
///
/// Wraps a plain function pointer rather than a closure so the node stays
/// `'static` and trivially `Send` without boxing captured state.
pub struct EventConverter {
    inputs: [EventPortDescriptor; 1],
    outputs: [EventPortDescriptor; 1],
    convert: fn(&[Event], &mut Vec<Event>),
}

impl EventConverter {
    /// Creates a single-input/single-output event converter.
    pub fn new(
        input_name: &'static str,
        output_name: &'static str,
        convert: fn(&[Event], &mut Vec<Event>),
    ) -> Self {
        Self {
            inputs: [EventPortDescriptor { name: input_name }],
            outputs: [EventPortDescriptor {
                name: output_name,
            }],
            convert,
        }
    }
}

impl Processor for EventConverter {
    fn type_name(&self) -> &'static str {
        "event_converter"
    }
    fn num_inputs(&self) -> usize {
        0
    }
    fn num_outputs(&self) -> usize {
        0
    }
    fn event_inputs(&self) -> &[EventPortDescriptor] {
        &self.inputs
    }
    fn event_outputs(&self) -> &[EventPortDescriptor] {
        &self.outputs
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
        (self.convert)(ctx.event_inputs[0], ctx.event_outputs[0]);
    }
}

/// Ramps a single audio output towards a target carried by an incoming
/// `f32` event stream, rather than jumping straight to it.
///
/// Grounded in `original_source/piejam_libs/audio/src/piejam/audio/engine/
/// smoother_processor.cpp`'s `lut_smoother_processor`: a new event updates
/// the target; while `current != target` the output buffer is filled with
/// intermediate values, and once the ramp completes within a period the
/// remainder of the buffer (and every following `process` call, until the
/// next event) reports a constant [`AudioResult`] so downstream nodes can
/// skip per-sample work.
pub struct Smooth {
    current: f32,
    target: f32,
    per_sample_step: f32,
}

impl Smooth {
    /// Creates a smoother starting at `initial` with the given constant
    /// per-sample step size used while ramping (the step's sign is derived
    /// from the direction of each new target, its magnitude is fixed -- a
    /// faster ramp needs a larger `per_sample_step`).
    pub fn new(initial: f32, per_sample_step: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            per_sample_step: per_sample_step.abs(),
        }
    }

    fn is_running(&self) -> bool {
        self.current != self.target
    }
}

impl Processor for Smooth {
    fn type_name(&self) -> &'static str {
        "smooth"
    }
    fn num_inputs(&self) -> usize {
        0
    }
    fn num_outputs(&self) -> usize {
        1
    }
    fn event_inputs(&self) -> &[EventPortDescriptor] {
        &[EventPortDescriptor { name: "target" }]
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
        for ev in ctx.event_inputs[0] {
            self.target = ev.value;
        }

        if !self.is_running() {
            ctx.results[0] = AudioResult::Constant(self.current);
            return;
        }

        for sample in ctx.outputs[0].iter_mut() {
            if self.current < self.target {
                self.current = (self.current + self.per_sample_step).min(self.target);
            } else {
                self.current = (self.current - self.per_sample_step).max(self.target);
            }
            *sample = self.current;
        }
        ctx.results[0] = AudioResult::Slice;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<P: Processor>(
        p: &mut P,
        inputs: &[&[f32]],
        buffer_size: usize,
        event_inputs: &[&[Event]],
    ) -> Vec<f32> {
        let num_outputs = p.num_outputs();
        let mut storage: Vec<u8> = Vec::new();
        let mut arena = EventArena::new(&mut storage);
        let mut out_storage: Vec<Vec<f32>> = vec![vec![0.0; buffer_size]; num_outputs];
        let mut out_refs: Vec<&mut [f32]> = out_storage.iter_mut().map(|v| v.as_mut_slice()).collect();
        let mut results: Vec<AudioResult> = vec![AudioResult::Constant(0.0); num_outputs];
        let mut no_event_outputs: Vec<&mut Vec<Event>> = Vec::new();
        {
            let mut ctx = ProcessContext {
                inputs,
                outputs: &mut out_refs,
                results: &mut results,
                event_inputs,
                event_outputs: &mut no_event_outputs,
                event_memory: &mut arena,
                buffer_size,
            };
            p.process(&mut ctx);
        }
        out_storage.into_iter().next().unwrap_or_default()
    }

    #[test]
    fn identity_copies_input() {
        let mut id = Identity;
        let input = [1.0, 2.0, 3.0];
        let out = run(&mut id, &[&input], 3, &[]);
        assert_eq!(out, input);
    }

    #[test]
    fn mix_sums_all_inputs() {
        let mut mix = Mix::new(3);
        let a = [1.0, 1.0];
        let b = [2.0, 2.0];
        let c = [3.0, 3.0];
        let out = run(&mut mix, &[&a, &b, &c], 2, &[]);
        assert_eq!(out, [6.0, 6.0]);
    }

    #[test]
    fn clip_clamps_to_unit_range() {
        let mut clip = Clip;
        let input = [-2.0, 0.5, 2.0];
        let out = run(&mut clip, &[&input], 3, &[]);
        assert_eq!(out, [-1.0, 0.5, 1.0]);
    }

    #[test]
    fn smooth_reports_constant_when_settled() {
        let mut smooth = Smooth::new(0.5, 0.1);
        let out = run(&mut smooth, &[], 4, &[&[]]);
        assert_eq!(out, [0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn smooth_ramps_towards_new_target() {
        let mut smooth = Smooth::new(0.0, 0.25);
        let target_event = [Event {
            offset: 0,
            value: 1.0,
        }];
        let out = run(&mut smooth, &[], 4, &[&target_event]);
        assert_eq!(out, [0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn audio_result_constant_expands_into_scratch() {
        let mut scratch = [0.0; 4];
        let result = AudioResult::Constant(2.0);
        assert_eq!(result.as_slice(&[], 4, &mut scratch), [2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn event_arena_alloc_respects_capacity() {
        let mut storage = [0u8; 8];
        let mut arena = EventArena::new(&mut storage);
        assert!(arena.alloc(8).is_some());
        assert_eq!(arena.used(), 8);
        assert!(arena.alloc(1).is_none());
        arena.release();
        assert_eq!(arena.used(), 0);
    }
}
