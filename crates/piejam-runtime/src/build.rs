//! The engine rebuild: Module E's four-pass translation from [`MixerState`]
//! into a running [`Dag`]. `piejam-engine`'s [`Orchestrator`] owns the
//! generic swap and the structural-reuse bookkeeping
//! ([`DynamicKeySharedObjectMap`]); this module drives the first three
//! passes the orchestrator's own doc comment assigns to the caller: read the
//! mixer/fx state and parameter store, build a fresh [`Graph`] of channel
//! strips, fx stages and routing, and hand it back for
//! `finalize`/`compile`/`install`. Per-effect DSP (LADSPA hosting, the
//! built-in internal effects) is outside this crate's scope;
//! [`FxStageProcessor`] is a bypass-gated stand-in that keeps an fx module's
//! chain position and port width correct so a real implementation can be
//! dropped in behind the same [`Processor`] contract later without touching
//! this module's wiring.

use std::collections::HashMap;
use std::sync::Arc;

use piejam_core::{
    db_to_linear, AudioResult, Event, EventPortDescriptor, Graph, GraphError, ParamId,
    ParamStore, PortRef, ProcessContext, Processor, SharedRead, ValueCell,
};
use piejam_engine::{compile, CompileError, Dag, DynamicKeySharedObjectMap, Orchestrator};

use piejam_io::stream::StreamProcessor;
use rtrb::Consumer;

use crate::ids::{ChannelId, ExternalDeviceId, FxModuleId, StreamId};
use crate::state::{Channel, ChannelType, FxInstanceId, IoAddress, MixerState};

/// How many periods' worth of frames a metering stream's ring buffer holds,
/// so a GUI meter falling a period behind doesn't cause dropped samples
/// under normal conditions.
const STREAM_CAPACITY_PERIODS: usize = 4;

/// Errors building or compiling a rebuilt graph.
#[derive(Debug, thiserror::Error)]
pub enum RebuildError {
    /// `Graph` rejected a connection — practically unreachable for
    /// topology this module builds and sizes itself, but surfaced rather
    /// than unwrapped.
    #[error("graph construction error: {0:?}")]
    Graph(GraphError),
    /// The finalized graph's edges didn't form a DAG, or another
    /// compile-time invariant failed.
    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl From<GraphError> for RebuildError {
    fn from(e: GraphError) -> Self {
        RebuildError::Graph(e)
    }
}

fn fallback_handle(live: Option<SharedRead>) -> SharedRead {
    live.unwrap_or_else(|| SharedRead::new(Arc::new(ValueCell::new(0.0))))
}

fn channel_width(channel_type: ChannelType) -> usize {
    match channel_type {
        ChannelType::Mono => 1,
        ChannelType::Stereo | ChannelType::Aux => 2,
    }
}

fn ports_of(node: piejam_core::NodeId, width: usize) -> Vec<PortRef> {
    (0..width).map(|p| PortRef::new(node, p)).collect()
}

/// Connects `src` to `dst` port-for-port, duplicating the last `src` port
/// across any extra `dst` ports (mono-to-stereo fan-out) or dropping extra
/// `src` ports (stereo-to-mono) when the two widths differ.
fn connect_fanned(g: &mut Graph, src: &[PortRef], dst: &[PortRef]) -> Result<(), GraphError> {
    for (i, &to) in dst.iter().enumerate() {
        let from = src[i.min(src.len().saturating_sub(1))];
        g.connect_audio(from, to)?;
    }
    Ok(())
}

/// Per-channel output stage: volume, pan/balance and mute/solo, read live
/// from the parameter store every period — no lookup, just the `SharedRead`
/// handles captured when the node was built. Solo exclusivity is resolved
/// against the broadcast "any channel soloed" event every
/// [`SoloAggregateProcessor`] publishes: a channel is silenced if its own
/// mute is set, or if some other channel is soloed and this one isn't.
///
/// A mono channel's single input is always panned out to a stereo pair —
/// `pan_balance` is "pan" for a mono source and "balance" for a stereo one,
/// but it's the same left/right gain law either way, so a mono strip's
/// post-fader output is stereo even though its input and fx chain stay
/// mono. `in_width`/`out_width` therefore diverge exactly when `in_width ==
/// 1`; every other channel type keeps `in_width == out_width`.
struct StripProcessor {
    in_width: usize,
    out_width: usize,
    volume: SharedRead,
    pan_balance: SharedRead,
    mute: SharedRead,
    solo: SharedRead,
    any_solo: bool,
    event_inputs: [EventPortDescriptor; 1],
}

/// The post-fader width a channel strip produces for a given input width: a
/// mono channel pans out to stereo, everything else passes its width
/// through unchanged.
fn strip_out_width(in_width: usize) -> usize {
    if in_width == 1 { 2 } else { in_width }
}

impl StripProcessor {
    fn new(width: usize, volume: SharedRead, pan_balance: SharedRead, mute: SharedRead, solo: SharedRead) -> Self {
        Self {
            in_width: width,
            out_width: strip_out_width(width),
            volume,
            pan_balance,
            mute,
            solo,
            any_solo: false,
            event_inputs: [EventPortDescriptor { name: "any_solo" }],
        }
    }
}

impl Processor for StripProcessor {
    fn type_name(&self) -> &'static str {
        "channel_strip"
    }
    fn num_inputs(&self) -> usize {
        self.in_width
    }
    fn num_outputs(&self) -> usize {
        self.out_width
    }
    fn event_inputs(&self) -> &[EventPortDescriptor] {
        &self.event_inputs
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
        for ev in ctx.event_inputs[0] {
            self.any_solo = ev.value >= 0.5;
        }
        let muted = self.mute.get() >= 0.5 || (self.any_solo && self.solo.get() < 0.5);
        let gain = if muted { 0.0 } else { db_to_linear(self.volume.get()) };
        let pan = self.pan_balance.get().clamp(-1.0, 1.0);
        let left_gain = gain * if pan > 0.0 { 1.0 - pan } else { 1.0 };
        let right_gain = gain * if pan < 0.0 { 1.0 + pan } else { 1.0 };

        if self.in_width == 1 {
            for (dst, src) in ctx.outputs[0].iter_mut().zip(ctx.inputs[0].iter()) {
                *dst = src * left_gain;
            }
            ctx.results[0] = AudioResult::Slice;
            for (dst, src) in ctx.outputs[1].iter_mut().zip(ctx.inputs[0].iter()) {
                *dst = src * right_gain;
            }
            ctx.results[1] = AudioResult::Slice;
            return;
        }

        for (dst, src) in ctx.outputs[0].iter_mut().zip(ctx.inputs[0].iter()) {
            *dst = src * left_gain;
        }
        ctx.results[0] = AudioResult::Slice;
        for (dst, src) in ctx.outputs[1].iter_mut().zip(ctx.inputs[1].iter()) {
            *dst = src * right_gain;
        }
        ctx.results[1] = AudioResult::Slice;
    }
}

/// Fixed-width linear gain stage, used to scale an aux send's level
/// .
struct GainProcessor {
    width: usize,
    volume: SharedRead,
}

impl Processor for GainProcessor {
    fn type_name(&self) -> &'static str {
        "send_gain"
    }
    fn num_inputs(&self) -> usize {
        self.width
    }
    fn num_outputs(&self) -> usize {
        self.width
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
        let gain = db_to_linear(self.volume.get());
        for ch in 0..self.width {
            for (dst, src) in ctx.outputs[ch].iter_mut().zip(ctx.inputs[ch].iter()) {
                *dst = src * gain;
            }
            ctx.results[ch] = AudioResult::Slice;
        }
    }
}

/// Bypass-gated stand-in for a loaded effect's DSP (see module doc comment).
///
/// `bypass >= 0.5` means the module is bypassed and passes audio through
/// unchanged; this is the same threshold `reducers::apply`'s
/// `ToggleFxBypass` handler uses to decide which value to flip to.
struct FxStageProcessor {
    width: usize,
    bypass: SharedRead,
}

impl Processor for FxStageProcessor {
    fn type_name(&self) -> &'static str {
        "fx_stage"
    }
    fn num_inputs(&self) -> usize {
        self.width
    }
    fn num_outputs(&self) -> usize {
        self.width
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
        let bypassed = self.bypass.get() >= 0.5;
        for ch in 0..self.width {
            if bypassed {
                ctx.outputs[ch].copy_from_slice(ctx.inputs[ch]);
            } else {
                for (dst, src) in ctx.outputs[ch].iter_mut().zip(ctx.inputs[ch].iter()) {
                    *dst = src.clamp(-1.0, 1.0);
                }
            }
            ctx.results[ch] = AudioResult::Slice;
        }
    }
}

/// Purely event-producing: ORs every channel's solo toggle together into
/// one broadcast event every [`StripProcessor`] reads.
struct SoloAggregateProcessor {
    solos: Vec<SharedRead>,
    event_outputs: [EventPortDescriptor; 1],
}

impl Processor for SoloAggregateProcessor {
    fn type_name(&self) -> &'static str {
        "solo_aggregate"
    }
    fn num_inputs(&self) -> usize {
        0
    }
    fn num_outputs(&self) -> usize {
        0
    }
    fn event_outputs(&self) -> &[EventPortDescriptor] {
        &self.event_outputs
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
        let any = self.solos.iter().any(|s| s.get() >= 0.5);
        ctx.event_outputs[0].push(Event {
            offset: 0,
            value: if any { 1.0 } else { 0.0 },
        });
    }
}

/// A shared, period-sized buffer ferrying samples between a sound-card
/// converter and the graph. This crate never touches a sound card itself —
/// the host driving the audio thread (e.g. `piejam-cli`, wiring a
/// `piejam-io::SoundCard`) calls [`write_channel`](Self::write_channel)
/// before running a period and [`read_channel`](Self::read_channel) after,
/// once per [`ExternalDeviceId`] this rebuild's [`ExternalIoHandles`] names.
#[derive(Clone)]
pub struct ExternalIoBuffer(Arc<std::sync::Mutex<Vec<Vec<f32>>>>);

impl ExternalIoBuffer {
    fn new(width: usize, buffer_size: usize) -> Self {
        Self(Arc::new(std::sync::Mutex::new(vec![
            vec![0.0; buffer_size];
            width
        ])))
    }

    /// A no-op if `ch` is out of range, or if `samples` is a different
    /// length than this buffer's period size.
    pub fn write_channel(&self, ch: usize, samples: &[f32]) {
        let mut buf = self.0.lock().unwrap();
        if let Some(slot) = buf.get_mut(ch) {
            let n = slot.len().min(samples.len());
            slot[..n].copy_from_slice(&samples[..n]);
        }
    }

    /// Copies out channel `ch`'s samples as rendered by the period that
    /// just ran. Empty if `ch` is out of range.
    pub fn read_channel(&self, ch: usize) -> Vec<f32> {
        self.0
            .lock()
            .unwrap()
            .get(ch)
            .cloned()
            .unwrap_or_default()
    }

    /// How many channels (not samples) this buffer carries.
    pub fn width(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Sources a sound-card input channel's captured samples into the graph.
/// Zero audio inputs: every period it republishes whatever the host last
/// wrote into its [`ExternalIoBuffer`].
struct ExternalInputProcessor {
    width: usize,
    buffer: ExternalIoBuffer,
}

impl Processor for ExternalInputProcessor {
    fn type_name(&self) -> &'static str {
        "external_input"
    }
    fn num_inputs(&self) -> usize {
        0
    }
    fn num_outputs(&self) -> usize {
        self.width
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
        let captured = self.buffer.0.lock().unwrap();
        for ch in 0..self.width {
            if let Some(slot) = captured.get(ch) {
                let n = ctx.outputs[ch].len().min(slot.len());
                ctx.outputs[ch][..n].copy_from_slice(&slot[..n]);
            }
            ctx.results[ch] = AudioResult::Slice;
        }
    }
}

/// Sinks a mixer channel's rendered output into a sound-card output
/// channel's [`ExternalIoBuffer`] for the host to drain after the period.
/// A pure sink: no audio outputs of its own.
struct ExternalOutputProcessor {
    width: usize,
    buffer: ExternalIoBuffer,
}

impl Processor for ExternalOutputProcessor {
    fn type_name(&self) -> &'static str {
        "external_output"
    }
    fn num_inputs(&self) -> usize {
        self.width
    }
    fn num_outputs(&self) -> usize {
        0
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
        let mut buf = self.buffer.0.lock().unwrap();
        for ch in 0..self.width {
            if let Some(slot) = buf.get_mut(ch) {
                let n = slot.len().min(ctx.inputs[ch].len());
                slot[..n].copy_from_slice(&ctx.inputs[ch][..n]);
            }
        }
    }
}

/// The external-I/O buffer handles wired into the graph this rebuild just
/// built, keyed by the [`ExternalDeviceId`] each route named. Returned
/// alongside the graph so the caller can fetch fresh handles every rebuild
/// without reaching back into mixer state itself.
#[derive(Default, Clone)]
pub struct ExternalIoHandles {
    /// Sound-card input channels feeding into the mixer, keyed by device.
    pub inputs: HashMap<ExternalDeviceId, ExternalIoBuffer>,
    /// Sound-card output channels the mixer renders into, keyed by device.
    pub outputs: HashMap<ExternalDeviceId, ExternalIoBuffer>,
}

/// Everything the host needs to ferry samples to/from a freshly built graph
/// once per period: external sound-card buffers plus one meter/scope stream
/// consumer per live [`StreamId`]. Unlike [`ExternalIoHandles`], stream
/// consumers aren't reused across rebuilds — each rebuild wires a fresh
/// `rtrb` channel per channel strip, so a structural change (adding/removing
/// a channel) invalidates any consumer a GUI previously held for an
/// unrelated channel too. This is a deliberate simplicity tradeoff over
/// carrying producer/consumer pairs forward the way [`ReuseTables`] does for
/// parameter handles: rebuilds are rare relative to the meter-read rate, so
/// the host re-fetching consumers after every rebuild is cheap.
#[derive(Default)]
pub struct RebuildIo {
    /// Sound-card input/output buffers, keyed by device.
    pub external: ExternalIoHandles,
    /// Metering/scope stream consumers, keyed by the channel's
    /// `out_stream_id`.
    pub streams: HashMap<StreamId, Consumer<f32>>,
}

/// The parameter handles one channel strip needs, cached so an unchanged
/// channel's [`StripProcessor`] reuses the same `SharedRead`s across a
/// rebuild rather than re-resolving them from the parameter store.
struct ChannelHandles {
    volume: SharedRead,
    pan_balance: SharedRead,
    mute: SharedRead,
    solo: SharedRead,
}

/// Parameter-handle caches carried forward across rebuilds, keyed by the
/// entity whose handles they hold. This is deliberately scoped to the read
/// handles a node is built with, not to whole processor instances: a
/// [`crate::build`]-built node's own internal state (e.g. a future ramped
/// smoother) does not currently survive a rebuild, only the `SharedRead`s it
/// would be constructed with.
#[derive(Default)]
pub struct ReuseTables {
    channels: DynamicKeySharedObjectMap<ChannelId, ChannelHandles>,
    fx_bypass: DynamicKeySharedObjectMap<FxModuleId, SharedRead>,
}

impl ReuseTables {
    /// An empty set of reuse tables, as used for the very first rebuild.
    pub fn new() -> Self {
        Self::default()
    }
}

fn channel_handles(
    id: ChannelId,
    channel: &Channel,
    params: &ParamStore,
    reuse: &mut ReuseTables,
    prev: &ReuseTables,
) -> Arc<ChannelHandles> {
    if let Some(handles) = reuse.channels.carry_forward(&id, &prev.channels) {
        return handles;
    }
    let p = &channel.parameters;
    let handles = Arc::new(ChannelHandles {
        volume: fallback_handle(params.cached(p.volume)),
        pan_balance: fallback_handle(params.cached(p.pan_balance)),
        mute: fallback_handle(params.cached(p.mute)),
        solo: fallback_handle(params.cached(p.solo)),
    });
    reuse.channels.insert(id, Arc::clone(&handles));
    handles
}

fn fx_bypass_handle(
    module: FxModuleId,
    bypass_id: ParamId,
    params: &ParamStore,
    reuse: &mut ReuseTables,
    prev: &ReuseTables,
) -> Arc<SharedRead> {
    if let Some(handle) = reuse.fx_bypass.carry_forward(&module, &prev.fx_bypass) {
        return handle;
    }
    let handle = Arc::new(fallback_handle(params.cached(bypass_id)));
    reuse.fx_bypass.insert(module, Arc::clone(&handle));
    handle
}

/// One channel's wiring points, recorded during pass 1+2 and consulted
/// during pass 3 ("connect").
struct ChannelPorts {
    /// Entry (identity) node input ports: where routing, aux sends and the
    /// mix bus wire *into* this channel.
    entry_inputs: Vec<PortRef>,
    /// The fx chain's tail output — after every (non-bypassed) effect,
    /// before the fader. Equal to the entry node's outputs when the chain
    /// is empty. The pre-fader aux-send tap point.
    pre_fader: Vec<PortRef>,
    /// The channel strip's output — the fully processed signal. The
    /// post-fader aux-send tap point, and what channel-to-channel routing
    /// and the mix bus read from.
    post_fader: Vec<PortRef>,
}

/// Builds a fresh, unfinalized [`Graph`] from the current mixer/fx state.
///
/// Implements passes 1–3 of the four-pass rebuild: one entry stage + fx
/// chain + channel strip per channel (1+2), then routing, aux sends and the
/// implicit stereo mix bus (3). The caller still has to call
/// [`Graph::finalize`] and hand the result to [`compile`] — see
/// [`EngineRebuild::rebuild`] for the full pass 4.
///
/// Channel-to-channel routing only honors `IoRoute::input ==
/// IoAddress::Channel(_)` and `IoRoute::output == IoAddress::MixInput`,
/// mirroring the asymmetry `MixerState::routing_edges` already encodes for
/// cycle detection: an output routed directly at another channel is not
/// itself a wiring instruction here (only the receiving channel's own
/// `input` route is). `IoAddress::External(device)` wires an
/// [`ExternalInputProcessor`]/[`ExternalOutputProcessor`] to the named
/// device, one per distinct [`ExternalDeviceId`] seen — if two channels
/// both route from/to the same device, they share the same
/// [`ExternalIoBuffer`], the same way a single physical sound-card channel
/// can only ever carry one signal.
pub fn build_graph(
    state: &MixerState,
    params: &ParamStore,
    buffer_size: usize,
    reuse: &mut ReuseTables,
    prev: &ReuseTables,
) -> Result<(Graph, RebuildIo), RebuildError> {
    let mut g = Graph::new();
    let mut ports: HashMap<ChannelId, ChannelPorts> = HashMap::new();
    let mut strip_nodes = Vec::new();
    let mut all_solos = Vec::new();
    let mut external_io = ExternalIoHandles::default();
    let mut streams: HashMap<StreamId, Consumer<f32>> = HashMap::new();

    for &id in &state.inputs {
        let Some(channel) = state.channels.get(&id) else {
            continue;
        };
        let width = channel_width(channel.channel_type);

        let entry_nodes: Vec<_> = (0..width).map(|_| g.add_identity()).collect();
        let entry_ports: Vec<_> = entry_nodes.iter().map(|&n| PortRef::new(n, 0)).collect();

        let mut tail = entry_ports.clone();
        let empty_chain = Vec::new();
        let chain = state.fx_chains.get(&id).unwrap_or(&empty_chain);
        for &module_id in chain {
            let Some(module) = state.fx_modules.get(&module_id) else {
                continue;
            };
            if matches!(module.fx_instance_id, FxInstanceId::UnavailableLadspa { .. }) {
                // No plugin loaded: a pure passthrough, i.e. no node at all.
                continue;
            }
            let Some(&bypass_id) = state.active_modules.get(&module_id) else {
                continue;
            };
            let bypass = fx_bypass_handle(module_id, bypass_id, params, reuse, prev);
            let stage = g.add_node(Box::new(FxStageProcessor {
                width,
                bypass: (*bypass).clone(),
            }));
            let stage_inputs = ports_of(stage, width);
            connect_fanned(&mut g, &tail, &stage_inputs)?;
            tail = ports_of(stage, width);
        }
        let pre_fader = tail;

        let handles = channel_handles(id, channel, params, reuse, prev);
        let strip = g.add_node(Box::new(StripProcessor::new(
            width,
            handles.volume.clone(),
            handles.pan_balance.clone(),
            handles.mute.clone(),
            handles.solo.clone(),
        )));
        let strip_inputs = ports_of(strip, width);
        connect_fanned(&mut g, &pre_fader, &strip_inputs)?;
        let post_fader = ports_of(strip, strip_out_width(width));

        // `StreamProcessor` is a single-channel tap; a stereo channel's
        // meter stream carries its left (or only, for mono) port, which is
        // enough for a peak/level meter without doubling the ring-buffer
        // count per channel strip.
        let (producer, consumer) =
            piejam_io::stream::channel(buffer_size * STREAM_CAPACITY_PERIODS);
        let meter = g.add_node(Box::new(StreamProcessor::new(producer)));
        let meter_inputs = ports_of(meter, 1);
        g.connect_audio(post_fader[0], meter_inputs[0])?;
        streams.insert(channel.out_stream_id, consumer);

        strip_nodes.push(strip);
        all_solos.push(handles.solo.clone());
        ports.insert(
            id,
            ChannelPorts {
                entry_inputs: entry_ports,
                pre_fader,
                post_fader,
            },
        );
    }

    let solo_agg = g.add_node(Box::new(SoloAggregateProcessor {
        solos: all_solos,
        event_outputs: [EventPortDescriptor { name: "any_solo" }],
    }));
    for &strip in &strip_nodes {
        g.connect_event(PortRef::new(solo_agg, 0), PortRef::new(strip, 0))?;
    }

    let bus_l = g.add_identity();
    let bus_r = g.add_identity();
    let bus_inputs = [PortRef::new(bus_l, 0), PortRef::new(bus_r, 0)];
    let bus_outputs = bus_inputs;

    for (channel_id, route) in state.io_map.iter() {
        let Some(cp) = ports.get(channel_id) else {
            continue;
        };
        let width = cp.entry_inputs.len();
        let out_width = cp.post_fader.len();
        match route.input {
            IoAddress::Default => {}
            IoAddress::MixInput => connect_fanned(&mut g, &bus_outputs, &cp.entry_inputs)?,
            IoAddress::Channel(upstream) => {
                if let Some(up) = ports.get(&upstream) {
                    connect_fanned(&mut g, &up.post_fader, &cp.entry_inputs)?;
                }
            }
            IoAddress::External(device) => {
                let buffer = external_io
                    .inputs
                    .entry(device)
                    .or_insert_with(|| ExternalIoBuffer::new(width, buffer_size))
                    .clone();
                let node = g.add_node(Box::new(ExternalInputProcessor { width, buffer }));
                let node_outputs = ports_of(node, width);
                connect_fanned(&mut g, &node_outputs, &cp.entry_inputs)?;
            }
        }
        match route.output {
            IoAddress::MixInput => connect_fanned(&mut g, &cp.post_fader, &bus_inputs)?,
            IoAddress::External(device) => {
                let buffer = external_io
                    .outputs
                    .entry(device)
                    .or_insert_with(|| ExternalIoBuffer::new(out_width, buffer_size))
                    .clone();
                let node = g.add_node(Box::new(ExternalOutputProcessor {
                    width: out_width,
                    buffer,
                }));
                let node_inputs = ports_of(node, out_width);
                connect_fanned(&mut g, &cp.post_fader, &node_inputs)?;
            }
            IoAddress::Default | IoAddress::Channel(_) => {}
        }
    }

    for (source, sends) in state.aux_sends.iter() {
        for (dest, send) in sends.iter() {
            if params.at(send.active).unwrap_or(0.0) < 0.5 {
                continue;
            }
            let Some(src_ports) = ports.get(source) else {
                continue;
            };
            let Some(dst_ports) = ports.get(dest) else {
                continue;
            };
            let tap = if params.at(send.fader_tap).unwrap_or(0.0) >= 0.5 {
                &src_ports.post_fader
            } else {
                &src_ports.pre_fader
            };
            let width = tap.len();
            let volume = fallback_handle(params.cached(send.volume));
            let gain = g.add_node(Box::new(GainProcessor { width, volume }));
            let gain_inputs = ports_of(gain, width);
            connect_fanned(&mut g, tap, &gain_inputs)?;
            let gain_outputs = ports_of(gain, width);
            connect_fanned(&mut g, &gain_outputs, &dst_ports.entry_inputs)?;
        }
    }

    Ok((
        g,
        RebuildIo {
            external: external_io,
            streams,
        },
    ))
}

/// Owns the live [`Orchestrator`] and the parameter-handle reuse tables
/// across rebuilds; the single thing `piejam-runtime`'s glue code needs to
/// register with a `piejam_store::middleware::AudioEngineRebuildMiddleware`.
pub struct EngineRebuild {
    orchestrator: Orchestrator,
    buffer_size: usize,
    reuse: ReuseTables,
    io: RebuildIo,
}

impl EngineRebuild {
    /// Starts an orchestrator running an empty, freshly compiled graph.
    pub fn new(buffer_size: usize) -> Result<Self, CompileError> {
        let dag = compile(Graph::new(), buffer_size)?;
        Ok(Self {
            orchestrator: Orchestrator::new(dag),
            buffer_size,
            reuse: ReuseTables::new(),
            io: RebuildIo::default(),
        })
    }

    /// Pass 4: finalizes, compiles and installs a graph built from the
    /// current mixer/fx state, reusing whatever parameter handles a
    /// surviving channel or fx module's identity allows.
    pub fn rebuild(&mut self, state: &MixerState, params: &ParamStore) -> Result<(), RebuildError> {
        let mut next = ReuseTables::new();
        let (mut graph, io) =
            build_graph(state, params, self.buffer_size, &mut next, &self.reuse)?;
        graph.finalize();
        let dag = compile(graph, self.buffer_size)?;
        self.orchestrator.install(dag);
        self.reuse = next;
        self.io = io;
        Ok(())
    }

    /// The `Dag` the audio thread should run this period.
    pub fn current(&self) -> Arc<Dag> {
        self.orchestrator.current()
    }

    /// The external-I/O buffer handles wired by the most recent rebuild,
    /// for the host to ferry samples to/from a sound card with.
    pub fn external_io(&self) -> ExternalIoHandles {
        self.io.external.clone()
    }

    /// Takes the metering/scope stream consumers wired by the most recent
    /// rebuild, keyed by `out_stream_id`. Subsequent calls before the next
    /// rebuild return an empty map — see [`RebuildIo`]'s doc comment for why
    /// consumers aren't carried forward across rebuilds.
    pub fn take_stream_consumers(&mut self) -> HashMap<StreamId, Consumer<f32>> {
        std::mem::take(&mut self.io.streams)
    }

    /// Called once the audio thread has observed the most recently
    /// installed `Dag`, so the previous one may be dropped.
    pub fn notify_swap_observed(&self) {
        self.orchestrator.notify_swap_observed();
    }

    /// Drains any pending swap-observed notification; call once per
    /// control-thread tick.
    pub fn confirm_swap_observed(&mut self) {
        self.orchestrator.confirm_swap_observed();
    }
}

/// A control-thread-shared handle to an [`EngineRebuild`], for registering
/// with `piejam_store::AudioEngineRebuildMiddleware`.
///
/// The middleware's `rebuild` hook is a plain `Fn`, not `FnMut` — rebuilding
/// needs `&mut` access to the orchestrator and reuse tables across calls, so
/// this wraps them in a `Mutex` the hook locks for the duration of one
/// rebuild. Rebuilds only ever happen on the control thread (the same
/// thread the middleware chain itself runs on), so the lock is never
/// contended; it exists to satisfy `Fn`'s aliasing rules, not for real
/// concurrency.
#[derive(Clone)]
pub struct SharedEngineRebuild(Arc<std::sync::Mutex<EngineRebuild>>);

impl SharedEngineRebuild {
    /// Wraps a freshly started [`EngineRebuild`] for sharing with the
    /// middleware chain and the audio thread.
    pub fn new(buffer_size: usize) -> Result<Self, CompileError> {
        Ok(Self(Arc::new(std::sync::Mutex::new(EngineRebuild::new(
            buffer_size,
        )?))))
    }

    /// The `Dag` the audio thread should run this period.
    pub fn current(&self) -> Arc<Dag> {
        self.0.lock().unwrap().current()
    }

    /// Called once the audio thread has observed the most recently
    /// installed `Dag`.
    pub fn notify_swap_observed(&self) {
        self.0.lock().unwrap().notify_swap_observed();
    }

    /// Drains any pending swap-observed notification; call once per
    /// control-thread tick.
    pub fn confirm_swap_observed(&self) {
        self.0.lock().unwrap().confirm_swap_observed();
    }

    /// The external-I/O buffer handles wired by the most recent rebuild.
    pub fn external_io(&self) -> ExternalIoHandles {
        self.0.lock().unwrap().external_io()
    }

    /// Takes the metering/scope stream consumers wired by the most recent
    /// rebuild. See [`EngineRebuild::take_stream_consumers`].
    pub fn take_stream_consumers(&self) -> HashMap<StreamId, Consumer<f32>> {
        self.0.lock().unwrap().take_stream_consumers()
    }

    /// Builds the middleware stage that reruns the four-pass rebuild
    /// whenever `MixerState::audio_graph_update_count` has increased since
    /// the last dispatch.
    pub fn middleware(
        &self,
    ) -> piejam_store::AudioEngineRebuildMiddleware<crate::reducers::RuntimeState, crate::actions::Action> {
        let shared = self.0.clone();
        piejam_store::AudioEngineRebuildMiddleware::new(
            |state: &crate::reducers::RuntimeState| state.mixer.audio_graph_update_count,
            move |store: &piejam_store::Store<crate::reducers::RuntimeState, crate::actions::Action>| {
                store.with_state(|state| {
                    if let Err(err) = shared.lock().unwrap().rebuild(&state.mixer, &state.params) {
                        tracing::error!(?err, "audio engine rebuild failed");
                    }
                });
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Action;
    use crate::reducers::RuntimeState;
    use crate::state::{ChannelType, FaderTap};
    use piejam_store::Reducible;

    fn stereo_channel(state: &mut RuntimeState, id: ChannelId) {
        state.reduce(Action::CreateChannel {
            id,
            channel_type: ChannelType::Stereo,
        });
    }

    #[test]
    fn empty_state_builds_and_compiles() {
        let state = RuntimeState::default();
        let mut reuse = ReuseTables::new();
        let prev = ReuseTables::new();
        let (mut graph, _) = build_graph(&state.mixer, &state.params, 64, &mut reuse, &prev).unwrap();
        // Just the solo-aggregate node and the two mix-bus identities.
        assert_eq!(graph.node_count(), 3);
        graph.finalize();
        assert!(compile(graph, 64).is_ok());
    }

    #[test]
    fn routing_one_channel_into_another_connects_post_fader_to_entry() {
        let mut state = RuntimeState::default();
        let a = ChannelId::from_raw(0);
        let b = ChannelId::from_raw(1);
        stereo_channel(&mut state, a);
        stereo_channel(&mut state, b);
        state.reduce(Action::SetChannelInput {
            channel: b,
            input: IoAddress::Channel(a),
        });

        let mut reuse = ReuseTables::new();
        let prev = ReuseTables::new();
        let (graph, _) = build_graph(&state.mixer, &state.params, 64, &mut reuse, &prev).unwrap();
        // a: entry(2) + strip(1) + meter(1); b: same; solo agg; bus l/r.
        assert_eq!(graph.node_count(), 11);
        assert!(graph.edges().len() >= 2 + 2); // a's internal wiring + a->b routing
    }

    #[test]
    fn inactive_aux_send_adds_no_gain_node() {
        let mut state = RuntimeState::default();
        let src = ChannelId::from_raw(0);
        let dst = ChannelId::from_raw(1);
        stereo_channel(&mut state, src);
        state.reduce(Action::CreateChannel {
            id: dst,
            channel_type: ChannelType::Aux,
        });

        let mut reuse = ReuseTables::new();
        let prev = ReuseTables::new();
        let before = build_graph(&state.mixer, &state.params, 64, &mut reuse, &prev)
            .unwrap()
            .0
            .node_count();

        state.reduce(Action::ToggleAuxSend {
            source: src,
            dest: dst,
            active: false,
        });
        let mut reuse2 = ReuseTables::new();
        let after = build_graph(&state.mixer, &state.params, 64, &mut reuse2, &prev)
            .unwrap()
            .0
            .node_count();
        assert_eq!(before, after);
    }

    #[test]
    fn active_aux_send_adds_a_gain_node() {
        let mut state = RuntimeState::default();
        let src = ChannelId::from_raw(0);
        let dst = ChannelId::from_raw(1);
        stereo_channel(&mut state, src);
        state.reduce(Action::CreateChannel {
            id: dst,
            channel_type: ChannelType::Aux,
        });
        state.reduce(Action::ToggleAuxSend {
            source: src,
            dest: dst,
            active: true,
        });
        state.reduce(Action::SetAuxSendFaderTap {
            source: src,
            dest: dst,
            tap: FaderTap::PostFader,
        });

        let mut reuse = ReuseTables::new();
        let prev = ReuseTables::new();
        let (graph, _) = build_graph(&state.mixer, &state.params, 64, &mut reuse, &prev).unwrap();
        let gain_nodes = graph
            .nodes()
            .filter(|(_, p)| p.type_name() == "send_gain")
            .count();
        assert_eq!(gain_nodes, 1);
    }

    #[test]
    fn channel_handles_are_carried_forward_across_rebuilds() {
        let mut state = RuntimeState::default();
        let a = ChannelId::from_raw(0);
        stereo_channel(&mut state, a);

        let mut first = ReuseTables::new();
        let baseline = ReuseTables::new();
        let _ = build_graph(&state.mixer, &state.params, 64, &mut first, &baseline).unwrap();

        let mut second = ReuseTables::new();
        let _ = build_graph(&state.mixer, &state.params, 64, &mut second, &first).unwrap();

        assert!(Arc::ptr_eq(
            first.channels.get(&a).unwrap(),
            second.channels.get(&a).unwrap()
        ));
    }

    #[test]
    fn unavailable_ladspa_module_contributes_no_stage_node() {
        use crate::ids::LadspaInstanceId;
        use crate::state::{FxInstanceId, FxModule};

        let mut state = RuntimeState::default();
        let a = ChannelId::from_raw(0);
        stereo_channel(&mut state, a);

        let module_id = FxModuleId::from_raw(0);
        state.mixer.fx_modules.insert(
            module_id,
            FxModule {
                fx_instance_id: FxInstanceId::UnavailableLadspa {
                    original_id: LadspaInstanceId::from_raw(0),
                    saved_params: Vec::new(),
                    saved_midi_assigns: Vec::new(),
                },
                name: crate::ids::StringId::from_raw(0),
                bus_type: ChannelType::Stereo,
                parameters: piejam_core::BoxedMap::new(),
                streams: piejam_core::BoxedMap::new(),
            },
        );
        state.mixer.fx_chains.insert(a, vec![module_id]);

        let mut reuse = ReuseTables::new();
        let prev = ReuseTables::new();
        let (graph, _) = build_graph(&state.mixer, &state.params, 64, &mut reuse, &prev).unwrap();
        assert!(graph.nodes().all(|(_, p)| p.type_name() != "fx_stage"));
    }

    #[test]
    fn external_route_wires_an_io_processor_and_exposes_its_buffer() {
        let mut state = RuntimeState::default();
        let a = ChannelId::from_raw(0);
        stereo_channel(&mut state, a);
        let device = ExternalDeviceId::from_raw(0);
        state.reduce(Action::SetChannelInput {
            channel: a,
            input: IoAddress::External(device),
        });
        state.reduce(Action::SetChannelOutput {
            channel: a,
            output: IoAddress::External(device),
        });

        let mut reuse = ReuseTables::new();
        let prev = ReuseTables::new();
        let (graph, io) = build_graph(&state.mixer, &state.params, 32, &mut reuse, &prev).unwrap();

        assert!(graph.nodes().any(|(_, p)| p.type_name() == "external_input"));
        assert!(graph.nodes().any(|(_, p)| p.type_name() == "external_output"));
        assert!(io.external.inputs.contains_key(&device));
        assert!(io.external.outputs.contains_key(&device));

        io.external.inputs[&device].write_channel(0, &[1.0; 32]);
        assert_eq!(io.external.inputs[&device].read_channel(0), vec![1.0; 32]);
    }

    #[test]
    fn two_channels_sharing_an_external_input_device_share_one_buffer() {
        let mut state = RuntimeState::default();
        let a = ChannelId::from_raw(0);
        let b = ChannelId::from_raw(1);
        stereo_channel(&mut state, a);
        stereo_channel(&mut state, b);
        let device = ExternalDeviceId::from_raw(0);
        state.reduce(Action::SetChannelInput {
            channel: a,
            input: IoAddress::External(device),
        });
        state.reduce(Action::SetChannelInput {
            channel: b,
            input: IoAddress::External(device),
        });

        let mut reuse = ReuseTables::new();
        let prev = ReuseTables::new();
        let (_, io) = build_graph(&state.mixer, &state.params, 32, &mut reuse, &prev).unwrap();
        assert_eq!(io.external.inputs.len(), 1);
    }

    /// Drives a fully built, finalized and compiled graph through one
    /// period via [`piejam_engine::dag::run_st`], ferrying samples through
    /// the external-device buffers the way `piejam-cli run` does. Used by
    /// the concrete end-to-end scenarios below.
    fn run_one_period(
        state: &RuntimeState,
        buffer_size: usize,
        in_device: ExternalDeviceId,
        out_device: ExternalDeviceId,
        input: &[Vec<f32>],
    ) -> Vec<Vec<f32>> {
        let mut reuse = ReuseTables::new();
        let prev = ReuseTables::new();
        let (mut graph, io) =
            build_graph(&state.mixer, &state.params, buffer_size, &mut reuse, &prev).unwrap();
        graph.finalize();
        let dag = compile(graph, buffer_size).unwrap();

        for (ch, samples) in input.iter().enumerate() {
            io.external.inputs[&in_device].write_channel(ch, samples);
        }

        let ctx = piejam_engine::dag::ThreadContext { buffer_size };
        piejam_engine::dag::run_st(&dag, &ctx);

        let out = &io.external.outputs[&out_device];
        (0..out.width())
            .map(|ch| out.read_channel(ch))
            .collect()
    }

    /// Scenario 1: stereo pass-through — `In -> A -> Out`, unity volume, no
    /// mute, must reproduce the input samples exactly.
    #[test]
    fn stereo_pass_through_reproduces_input_exactly() {
        let mut state = RuntimeState::default();
        let a = ChannelId::from_raw(0);
        stereo_channel(&mut state, a);
        let input_dev = ExternalDeviceId::from_raw(0);
        let output_dev = ExternalDeviceId::from_raw(1);
        state.reduce(Action::SetChannelInput {
            channel: a,
            input: IoAddress::External(input_dev),
        });
        state.reduce(Action::SetChannelOutput {
            channel: a,
            output: IoAddress::External(output_dev),
        });

        let l = vec![1.0, 2.0, 3.0, 4.0];
        let r = vec![-1.0, -2.0, -3.0, -4.0];
        let out = run_one_period(&state, 4, input_dev, output_dev, &[l.clone(), r.clone()]);

        assert_eq!(out[0], l);
        assert_eq!(out[1], r);
    }

    /// Scenario 2: muting the only channel in an otherwise pass-through
    /// routing must zero the output.
    #[test]
    fn muted_channel_produces_silence() {
        let mut state = RuntimeState::default();
        let a = ChannelId::from_raw(0);
        stereo_channel(&mut state, a);
        let input_dev = ExternalDeviceId::from_raw(0);
        let output_dev = ExternalDeviceId::from_raw(1);
        state.reduce(Action::SetChannelInput {
            channel: a,
            input: IoAddress::External(input_dev),
        });
        state.reduce(Action::SetChannelOutput {
            channel: a,
            output: IoAddress::External(output_dev),
        });
        state.reduce(Action::SetParameterValue {
            param: state.mixer.channels.get(&a).unwrap().parameters.mute,
            value: 1.0,
        });

        let l = vec![1.0, 2.0, 3.0, 4.0];
        let r = vec![-1.0, -2.0, -3.0, -4.0];
        let out = run_one_period(&state, 4, input_dev, output_dev, &[l, r]);

        assert_eq!(out[0], vec![0.0; 4]);
        assert_eq!(out[1], vec![0.0; 4]);
    }

    /// Scenario 3: a mono channel panned hard left must appear only on the
    /// stereo output's left bus.
    #[test]
    fn hard_left_pan_on_a_mono_channel_silences_the_right_bus() {
        let mut state = RuntimeState::default();
        let m = ChannelId::from_raw(0);
        state.reduce(Action::CreateChannel {
            id: m,
            channel_type: ChannelType::Mono,
        });
        let input_dev = ExternalDeviceId::from_raw(0);
        let output_dev = ExternalDeviceId::from_raw(1);
        state.reduce(Action::SetChannelInput {
            channel: m,
            input: IoAddress::External(input_dev),
        });
        state.reduce(Action::SetChannelOutput {
            channel: m,
            output: IoAddress::External(output_dev),
        });
        state.reduce(Action::SetParameterValue {
            param: state.mixer.channels.get(&m).unwrap().parameters.pan_balance,
            value: -1.0,
        });

        let input = vec![1.0, 1.0, 1.0, 1.0];
        let out = run_one_period(&state, 4, input_dev, output_dev, &[input.clone()]);

        assert_eq!(out[0], input);
        assert_eq!(out[1], vec![0.0; 4]);
    }
}
