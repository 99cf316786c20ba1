//! The terminal reducer stage: folds an [`Action`] into [`MixerState`] in
//! place, bumping the audio-graph/solo counters per Module G's type-level
//! tagging decision.

use piejam_core::{ParamFlags, ParamStore};
use piejam_store::Reducible;

use crate::actions::{Action, AudioGraphAffecting};
use crate::ids::SoloGroupId;
use crate::midi::MidiLearnState;
use crate::state::{AuxChannel, AuxSend, Channel, FxInstanceId, FxModule, IoAddress, IoRoute, MixerState};

/// The full runtime state: mixer/fx data plus the parameter store that
/// owns every parameter's value cell, and MIDI-learn bookkeeping.
#[derive(Default)]
pub struct RuntimeState {
    /// Routing, fx chains, and the two update counters.
    pub mixer: MixerState,
    /// Owns one value cell + descriptor per live parameter.
    pub params: ParamStore,
    /// Current MIDI-learn mode.
    pub midi_learn: MidiLearnState,
    /// Every learned CC-to-parameter binding.
    pub midi_assignments: Vec<crate::midi::MidiAssignment>,
    /// Exclusive-solo groups, keyed by id.
    pub solo_groups: std::collections::HashMap<SoloGroupId, Vec<crate::ids::ChannelId>>,
    /// The most recent error action's message, if any (surfaced to a GUI
    /// status line; does not affect audio).
    pub last_error: Option<String>,
}

impl Reducible for RuntimeState {
    type Action = Action;

    fn reduce(&mut self, action: Action) {
        let audio_graph_affecting = action.is_audio_graph_affecting();
        let solo_affecting = self.is_solo_affecting(&action);

        apply(self, action);

        if audio_graph_affecting {
            self.mixer.audio_graph_update_count += 1;
        }
        if solo_affecting {
            self.mixer.solo_state_update_count += 1;
        }
    }
}

impl RuntimeState {
    fn is_solo_affecting(&self, action: &Action) -> bool {
        match action {
            Action::SetParameterValue { param, .. } => self
                .params
                .find(*param)
                .is_some_and(|d| d.flags.contains(ParamFlags::SOLO_STATE_AFFECTING)),
            Action::ToggleAuxSend { .. } => true,
            _ => false,
        }
    }
}

fn apply(state: &mut RuntimeState, action: Action) {
    match action {
        Action::CreateChannel { id, channel_type } => {
            let params = default_channel_parameters(id);
            state.params.emplace(
                piejam_core::ParamDescriptor::gain_db("Volume", "Vol", -60.0, 6.0, 0.0)
                    .with_id(params.volume, "channel_volume"),
            );
            state.params.emplace(
                piejam_core::ParamDescriptor::custom("Pan", "Pan", -1.0, 1.0, 0.0)
                    .with_id(params.pan_balance, "channel_pan"),
            );
            state.params.emplace(bool_param(params.record, "channel_record"));
            state.params.emplace(bool_param(params.mute, "channel_mute"));
            state.params.emplace(
                bool_param(params.solo, "channel_solo")
                    .with_flags(piejam_core::ParamFlags::SOLO_STATE_AFFECTING),
            );
            let channel = Channel {
                channel_type,
                name_id: crate::ids::StringId::from_raw(0),
                color_id: crate::ids::ColorId::from_raw(0),
                parameters: params,
                out_stream_id: crate::ids::StreamId::from_raw(id.raw()),
            };
            state.mixer.channels.insert(id, channel);
            state.mixer.inputs.push(id);
            state.mixer.io_map.insert(
                id,
                IoRoute {
                    input: IoAddress::Default,
                    output: IoAddress::Default,
                },
            );
            if matches!(channel_type, crate::state::ChannelType::Aux) {
                state
                    .mixer
                    .aux_channels
                    .insert(id, AuxChannel { solo_group: None });
            }
        }
        Action::DeleteChannel(id) => {
            state.mixer.channels.remove(&id);
            state.mixer.io_map.remove(&id);
            state.mixer.aux_sends.remove(&id);
            state.mixer.aux_channels.remove(&id);
            state.mixer.fx_chains.remove(&id);
            state.mixer.inputs.retain(|c| *c != id);
        }
        Action::SetParameterValue { param, value } => {
            state.params.set(param, value);
        }
        Action::SetChannelInput { channel, input } => {
            if !state.mixer.is_mix_input_valid(channel, input) {
                tracing::warn!(?channel, "rejected routing change that would create a cycle");
                return;
            }
            if let Some(route) = state.mixer.io_map.get(&channel).copied() {
                state.mixer.io_map.insert(channel, IoRoute { input, ..route });
            }
        }
        Action::SetChannelOutput { channel, output } => {
            if let Some(route) = state.mixer.io_map.get(&channel).copied() {
                state.mixer.io_map.insert(channel, IoRoute { output, ..route });
            }
        }
        Action::ToggleAuxSend {
            source,
            dest,
            active,
        } => {
            if active && !state.mixer.can_toggle_aux(source, dest) {
                tracing::warn!(?source, ?dest, "rejected aux send that would create a cycle");
                return;
            }
            let mut sends = state
                .mixer
                .aux_sends
                .get(&source)
                .cloned()
                .unwrap_or_default();
            let send = sends.get(&dest).copied().unwrap_or_else(|| {
                let base = source.raw() as u32 * 4096 + dest.raw() as u32 * 4;
                let active_id = piejam_core::ParamId(base);
                let fader_tap_id = piejam_core::ParamId(base + 1);
                let volume_id = piejam_core::ParamId(base + 2);
                state
                    .params
                    .emplace(bool_param(active_id, "aux_send_active"));
                state.params.emplace(bool_param(fader_tap_id, "aux_send_tap"));
                state.params.emplace(
                    piejam_core::ParamDescriptor::gain_db("Send volume", "Send", -60.0, 6.0, 0.0)
                        .with_id(volume_id, "aux_send_volume"),
                );
                AuxSend {
                    active: active_id,
                    fader_tap: fader_tap_id,
                    volume: volume_id,
                }
            });
            state.params.set(send.active, if active { 1.0 } else { 0.0 });
            sends.insert(dest, send);
            state.mixer.aux_sends.insert(source, sends);
        }
        Action::SetAuxSendFaderTap { source, dest, tap } => {
            if let Some(mut sends) = state.mixer.aux_sends.get(&source).cloned() {
                if let Some(send) = sends.get(&dest).copied() {
                    state.params.set(
                        send.fader_tap,
                        match tap {
                            crate::state::FaderTap::PreFader => 0.0,
                            crate::state::FaderTap::PostFader => 1.0,
                        },
                    );
                    sends.insert(dest, send);
                    state.mixer.aux_sends.insert(source, sends);
                }
            }
        }
        Action::InsertFxModule { channel, module } => {
            let mut chain = state.mixer.fx_chains.get(&channel).cloned().unwrap_or_default();
            chain.push(module);
            state.mixer.fx_chains.insert(channel, chain);
        }
        Action::RemoveFxModule(module) => {
            state.mixer.fx_modules.remove(&module);
            state.mixer.active_modules.remove(&module);
            for (channel, chain) in state.mixer.fx_chains.clone().iter() {
                if chain.contains(&module) {
                    let mut updated = chain.clone();
                    updated.retain(|m| *m != module);
                    state.mixer.fx_chains.insert(*channel, updated);
                }
            }
        }
        Action::ToggleFxBypass(module) => {
            if let Some(&bypass_param) = state.mixer.active_modules.get(&module) {
                let current = state.params.at(bypass_param).unwrap_or(0.0);
                state.params.set(bypass_param, if current > 0.5 { 0.0 } else { 1.0 });
            }
        }
        Action::ReplaceMissingLadspaFxModule {
            module,
            new_instance,
        } => {
            if let Some(existing) = state.mixer.fx_modules.get(&module).cloned() {
                if let FxInstanceId::UnavailableLadspa {
                    saved_params,
                    saved_midi_assigns,
                    ..
                } = existing.fx_instance_id
                {
                    for (key, value) in &saved_params {
                        if let Some(&param) = existing.parameters.get(key) {
                            state.params.set(param, *value);
                        }
                    }
                    state.midi_assignments.extend(saved_midi_assigns);
                    let replaced = FxModule {
                        fx_instance_id: FxInstanceId::Ladspa(new_instance),
                        ..existing
                    };
                    state.mixer.fx_modules.insert(module, replaced);
                }
            }
        }
        Action::StartMidiLearn { target } => {
            state.midi_learn = MidiLearnState::Learning { target };
        }
        Action::CancelMidiLearn => {
            state.midi_learn = MidiLearnState::Idle;
        }
        Action::CompleteMidiLearn { channel, cc } => {
            if let MidiLearnState::Learning { target } = state.midi_learn {
                state.midi_assignments.push(crate::midi::MidiAssignment {
                    channel,
                    cc,
                    target,
                });
            }
            state.midi_learn = MidiLearnState::Idle;
        }
        Action::RemoveMidiAssignment(assignment) => {
            state.midi_assignments.retain(|a| *a != assignment);
        }
        Action::Error(message) => {
            tracing::error!(message, "store received an error action");
            state.last_error = Some(message);
        }
    }
}

fn default_channel_parameters(id: crate::ids::ChannelId) -> crate::state::ChannelParameters {
    let base = id.raw() as u32 * 16;
    crate::state::ChannelParameters {
        volume: piejam_core::ParamId(base + 1),
        pan_balance: piejam_core::ParamId(base + 2),
        record: piejam_core::ParamId(base + 3),
        mute: piejam_core::ParamId(base + 4),
        solo: piejam_core::ParamId(base + 5),
    }
}

/// A boolean-domain parameter descriptor (0.0/1.0), the shape every
/// toggle in this module (mute/solo/record/bypass/aux-active) shares.
fn bool_param(id: piejam_core::ParamId, string_id: &'static str) -> piejam_core::ParamDescriptor {
    piejam_core::ParamDescriptor {
        domain: piejam_core::ParamDomain::Bool,
        ..piejam_core::ParamDescriptor::custom("Toggle", "Toggle", 0.0, 1.0, 0.0)
    }
    .with_id(id, string_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ChannelId;
    use crate::state::ChannelType;

    #[test]
    fn creating_a_channel_bumps_audio_graph_counter() {
        let mut state = RuntimeState::default();
        state.reduce(Action::CreateChannel {
            id: ChannelId::from_raw(0),
            channel_type: ChannelType::Stereo,
        });
        assert_eq!(state.mixer.audio_graph_update_count, 1);
        assert_eq!(state.mixer.channels.len(), 1);
    }

    #[test]
    fn deleting_a_channel_removes_its_routing_and_fx_chain() {
        let mut state = RuntimeState::default();
        let id = ChannelId::from_raw(0);
        state.reduce(Action::CreateChannel {
            id,
            channel_type: ChannelType::Mono,
        });
        state.reduce(Action::DeleteChannel(id));
        assert!(state.mixer.channels.get(&id).is_none());
        assert!(state.mixer.io_map.get(&id).is_none());
        assert_eq!(state.mixer.audio_graph_update_count, 2);
    }

    #[test]
    fn routing_a_channel_into_itself_is_rejected() {
        let mut state = RuntimeState::default();
        let id = ChannelId::from_raw(0);
        state.reduce(Action::CreateChannel {
            id,
            channel_type: ChannelType::Mono,
        });
        let before = state.mixer.audio_graph_update_count;
        state.reduce(Action::SetChannelInput {
            channel: id,
            input: IoAddress::Channel(id),
        });
        // The counter still bumps (the action is tagged audio-graph
        // affecting regardless of outcome); the important invariant is
        // that the route itself did not change.
        assert_eq!(state.mixer.audio_graph_update_count, before + 1);
        assert_eq!(state.mixer.io_map.get(&id).unwrap().input, IoAddress::Default);
    }

    #[test]
    fn toggling_fx_bypass_flips_the_backing_parameter() {
        let mut state = RuntimeState::default();
        let module = crate::ids::FxModuleId::from_raw(0);
        state
            .params
            .emplace(bool_param(piejam_core::ParamId(99), "fx_bypass"));
        state.mixer.active_modules.insert(module, piejam_core::ParamId(99));
        assert_eq!(state.params.at(piejam_core::ParamId(99)), Some(0.0));
        state.reduce(Action::ToggleFxBypass(module));
        assert_eq!(state.params.at(piejam_core::ParamId(99)), Some(1.0));
    }
}
