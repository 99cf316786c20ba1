//! Mixer/fx state and the routing-acyclicity invariant.

use piejam_core::{BoxedMap, ParamId};

use crate::ids::{
    ChannelId, ColorId, ExternalDeviceId, FxModuleId, LadspaInstanceId, StreamId, StringId,
};

/// Ordered-by-key copy-on-write map — `piejam-runtime`'s instantiation of
/// `piejam-core`'s `BoxedMap` over `BTreeMap`, chosen (distilled, Module G)
/// for deterministic iteration order so meter/channel-strip lists render
/// stably without a separate ordering key.
pub type IdMap<K, V> = BoxedMap<K, V>;

/// A channel's stereo/mono/aux bus type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    /// Single-sample-per-frame channel.
    Mono,
    /// Two-sample-per-frame channel.
    Stereo,
    /// An aux-return channel, fed only by other channels' aux sends.
    Aux,
}

/// Per-channel built-in parameters every channel owns.
#[derive(Debug, Clone, Copy)]
pub struct ChannelParameters {
    /// Channel output volume.
    pub volume: ParamId,
    /// Stereo pan (or mono balance).
    pub pan_balance: ParamId,
    /// Record-arm toggle.
    pub record: ParamId,
    /// Mute toggle.
    pub mute: ParamId,
    /// Solo toggle.
    pub solo: ParamId,
}

/// One mixer channel strip.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Mono, stereo, or aux-return.
    pub channel_type: ChannelType,
    /// Interned display name.
    pub name_id: StringId,
    /// Interned UI colour.
    pub color_id: ColorId,
    /// The channel's built-in parameters.
    pub parameters: ChannelParameters,
    /// The stream this channel's `StreamProcessor` writes metering samples
    /// to.
    pub out_stream_id: StreamId,
}

/// Where a channel's audio comes from or goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoAddress {
    /// Not connected.
    Default,
    /// Fed from/feeds into the implicit mix bus.
    MixInput,
    /// Routed to/from another mixer channel.
    Channel(ChannelId),
    /// Routed to/from an external sound-card device.
    External(ExternalDeviceId),
}

/// A channel's input and output routing.
#[derive(Debug, Clone, Copy)]
pub struct IoRoute {
    /// Where this channel's input comes from.
    pub input: IoAddress,
    /// Where this channel's output goes.
    pub output: IoAddress,
}

/// Pre-fader or post-fader aux-send tap point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaderTap {
    /// Tapped before the channel's fader.
    PreFader,
    /// Tapped after the channel's fader.
    PostFader,
}

/// One channel's send to an aux-return channel.
#[derive(Debug, Clone, Copy)]
pub struct AuxSend {
    /// Whether this send is currently active.
    pub active: ParamId,
    /// Pre/post fader tap point, stored as an enum-domain parameter.
    pub fader_tap: ParamId,
    /// Send level.
    pub volume: ParamId,
}

/// An aux-return channel's own bookkeeping, beyond the `Channel` record it
/// also has in `channels`.
#[derive(Debug, Clone, Copy)]
pub struct AuxChannel {
    /// The exclusive-solo group this aux return participates in, if any.
    pub solo_group: Option<crate::ids::SoloGroupId>,
}

/// Which concrete effect backs an `FxModule`.
#[derive(Debug, Clone)]
pub enum FxInstanceId {
    /// A built-in, always-available processor.
    Internal(crate::ids::InternalFxId),
    /// A loaded LADSPA plugin instance.
    Ladspa(LadspaInstanceId),
    /// A LADSPA module whose plugin could not be loaded (missing library,
    /// ABI mismatch, ...): parameters and MIDI learn assignments are
    /// preserved so the module can be restored once the plugin becomes
    /// available again.
    UnavailableLadspa {
        /// The plugin instance id this placeholder stands in for.
        original_id: LadspaInstanceId,
        /// Parameter values captured at the moment the plugin became
        /// unavailable, keyed by the module-local parameter key.
        saved_params: Vec<(String, f32)>,
        /// MIDI learn assignments captured the same way.
        saved_midi_assigns: Vec<crate::midi::MidiAssignment>,
    },
}

/// One fx module: an effect instance wired into a channel's chain
/// .
#[derive(Debug, Clone)]
pub struct FxModule {
    /// The concrete effect backing this module.
    pub fx_instance_id: FxInstanceId,
    /// Interned display name.
    pub name: StringId,
    /// Mono/stereo processing width.
    pub bus_type: ChannelType,
    /// This module's parameters, keyed by a module-local string key.
    pub parameters: BoxedMap<String, ParamId>,
    /// This module's metering/scope streams, keyed by a module-local
    /// string key.
    pub streams: BoxedMap<String, StreamId>,
}

/// The complete mixer/fx root state.
#[derive(Debug, Clone, Default)]
pub struct MixerState {
    /// Every mixer channel, keyed by id.
    pub channels: IdMap<ChannelId, Channel>,
    /// User-visible channel strip order (the `main` channel is tracked
    /// separately via `main_channel`).
    pub inputs: Vec<ChannelId>,
    /// The distinguished master/main channel, if created.
    pub main_channel: Option<ChannelId>,
    /// Each channel's input/output routing.
    pub io_map: IdMap<ChannelId, IoRoute>,
    /// Aux sends: source channel -> destination aux channel -> send.
    pub aux_sends: IdMap<ChannelId, IdMap<ChannelId, AuxSend>>,
    /// Per-aux-channel bookkeeping for channels whose type is `Aux`.
    pub aux_channels: IdMap<ChannelId, AuxChannel>,
    /// Each channel's ordered effect chain.
    pub fx_chains: IdMap<ChannelId, Vec<FxModuleId>>,
    /// Every live fx module, keyed by id.
    pub fx_modules: IdMap<FxModuleId, FxModule>,
    /// Bypass state per fx module, stored as a first-class boolean
    /// parameter so toggling it takes the normal audio-graph-affecting path.
    pub active_modules: IdMap<FxModuleId, ParamId>,
    /// Incremented by any reducer whose action is tagged
    /// [`crate::actions::AudioGraphAffecting`].
    pub audio_graph_update_count: u64,
    /// Incremented by any reducer whose action is tagged
    /// [`crate::actions::SoloStateAffecting`].
    pub solo_state_update_count: u64,
}

impl MixerState {
    /// A fresh, empty state with no channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every currently-enabled routing edge, `source -> destination`, drawn
    /// from `io_map` (direct channel-to-channel routes) plus active aux
    /// sends.
    fn routing_edges(&self) -> Vec<(ChannelId, ChannelId, bool)> {
        let mut edges = Vec::new();
        for (channel_id, route) in self.io_map.iter() {
            if let IoAddress::Channel(upstream) = route.input {
                edges.push((upstream, *channel_id, false));
            }
        }
        for (source, sends) in self.aux_sends.iter() {
            for (dest, _send) in sends.iter() {
                edges.push((*source, *dest, true));
            }
        }
        edges
    }

    /// Whether routing `from -> to` (a direct channel route, or an aux
    /// send if `is_aux_send`) would introduce a cycle in the routing graph,
    /// checked by DFS colouring over the edges that would exist *after*
    /// adding it.
    pub fn would_create_cycle(&self, from: ChannelId, to: ChannelId) -> bool {
        if from == to {
            return true;
        }
        let mut adjacency: std::collections::HashMap<ChannelId, Vec<ChannelId>> =
            std::collections::HashMap::new();
        for (src, dst, _) in self.routing_edges() {
            adjacency.entry(src).or_default().push(dst);
        }
        adjacency.entry(to).or_default().push(from);

        // White/grey/black DFS colouring: a grey node reachable again means
        // a cycle.
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Grey,
            Black,
        }
        let mut colors: std::collections::HashMap<ChannelId, Color> = std::collections::HashMap::new();

        fn visit(
            node: ChannelId,
            adjacency: &std::collections::HashMap<ChannelId, Vec<ChannelId>>,
            colors: &mut std::collections::HashMap<ChannelId, Color>,
        ) -> bool {
            match colors.get(&node).copied().unwrap_or(Color::White) {
                Color::Grey => return true,
                Color::Black => return false,
                Color::White => {}
            }
            colors.insert(node, Color::Grey);
            if let Some(children) = adjacency.get(&node) {
                for &child in children {
                    if visit(child, adjacency, colors) {
                        return true;
                    }
                }
            }
            colors.insert(node, Color::Black);
            false
        }

        let nodes: Vec<ChannelId> = adjacency.keys().copied().collect();
        nodes.into_iter().any(|n| visit(n, &adjacency, &mut colors))
    }

    /// Whether `candidate` is a valid input source for `channel` — neither
    /// creating a cycle nor pointing at a nonexistent channel (distilled
    /// §3 `is_mix_input_valid`).
    pub fn is_mix_input_valid(&self, channel: ChannelId, candidate: IoAddress) -> bool {
        match candidate {
            IoAddress::Channel(upstream) => {
                self.channels.contains_key(&upstream) && !self.would_create_cycle(upstream, channel)
            }
            IoAddress::Default | IoAddress::MixInput | IoAddress::External(_) => true,
        }
    }

    /// Whether enabling an aux send `source -> dest` is valid (distilled
    /// §3 `can_toggle_aux`).
    pub fn can_toggle_aux(&self, source: ChannelId, dest: ChannelId) -> bool {
        self.channels.contains_key(&source)
            && self.channels.contains_key(&dest)
            && self.aux_channels.contains_key(&dest)
            && !self.would_create_cycle(source, dest)
    }

    /// The subset of `candidates` that are valid channels to route into
    /// `channel` without creating a cycle.
    pub fn valid_channels(&self, channel: ChannelId, candidates: &[ChannelId]) -> Vec<ChannelId> {
        candidates
            .iter()
            .copied()
            .filter(|&c| c != channel && !self.would_create_cycle(c, channel))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use piejam_core::{ParamDescriptor, ParamId};

    fn dummy_param(raw: u32) -> ParamId {
        ParamId(raw)
    }

    fn route(input: IoAddress) -> IoRoute {
        IoRoute {
            input,
            output: IoAddress::Default,
        }
    }

    #[test]
    fn direct_self_route_is_a_cycle() {
        let mut state = MixerState::new();
        let a = ChannelId::from_raw(0);
        assert!(state.would_create_cycle(a, a));
        state.io_map.insert(a, route(IoAddress::Default));
    }

    #[test]
    fn three_channel_cycle_is_detected() {
        let mut state = MixerState::new();
        let a = ChannelId::from_raw(0);
        let b = ChannelId::from_raw(1);
        let c = ChannelId::from_raw(2);
        state.io_map.insert(b, route(IoAddress::Channel(a)));
        state.io_map.insert(c, route(IoAddress::Channel(b)));
        // a -> b -> c already; would c -> a create a cycle? yes.
        assert!(state.would_create_cycle(c, a));
        let _ = dummy_param(0);
    }

    #[test]
    fn valid_channels_excludes_self_and_cycle_candidates() {
        let mut state = MixerState::new();
        let a = ChannelId::from_raw(0);
        let b = ChannelId::from_raw(1);
        state.io_map.insert(b, route(IoAddress::Channel(a)));
        let valid = state.valid_channels(a, &[a, b]);
        assert!(valid.is_empty());
    }

    #[test]
    fn parameter_descriptor_clamp_keeps_value_in_range() {
        let descriptor = ParamDescriptor::gain_db(dummy_param(0), -60.0, 6.0, 0.0);
        assert_eq!(descriptor.clamp(100.0), 6.0);
        assert_eq!(descriptor.clamp(-100.0), -60.0);
    }
}
