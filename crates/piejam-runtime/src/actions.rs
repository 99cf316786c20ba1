//! The action surface and the type-level counters it drives.

use piejam_core::ParamId;

use crate::ids::{ChannelId, FxModuleId, LadspaInstanceId};
use crate::midi::{CcId, MidiAssignment};
use crate::state::{ChannelType, FaderTap, IoAddress};

/// Marks an action as one that changes something the audio graph depends
/// on: a routing change, a fx chain edit, or a parameter flagged
/// `audio_graph_affecting`. A type-level tag rather than a state diff, per
/// Module G's decision: an exact count matching "the number of reducer steps
/// whose action... changed" the flag is only trivially correct this way — a
/// value diff on an aggregate could both over- and under-count.
pub trait AudioGraphAffecting {
    /// Whether this particular action instance affects the audio graph.
    /// Most variants are unconditionally one or the other; parameter writes
    /// depend on the target parameter's descriptor flags, so the reducer
    /// (not this trait) makes that determination for
    /// [`Action::SetParameterValue`].
    fn is_audio_graph_affecting(&self) -> bool;
}

/// Marks an action as one that changes solo state.
pub trait SoloStateAffecting {
    /// Whether this action instance affects solo state.
    fn is_solo_state_affecting(&self) -> bool;
}

/// Every mutating action the store's reducer understands.
#[derive(Debug, Clone)]
pub enum Action {
    /// Creates a new mixer channel, appended to `inputs`.
    CreateChannel {
        /// The new channel's id (allocated by the caller via
        /// [`crate::ids::IdSequence`]).
        id: ChannelId,
        /// Mono, stereo, or aux.
        channel_type: ChannelType,
    },
    /// Removes a channel and everything that referenced it (routes, aux
    /// sends, fx chain).
    DeleteChannel(ChannelId),
    /// Writes a new value into a parameter's value cell, clamped to its
    /// descriptor's range.
    SetParameterValue {
        /// The parameter to write.
        param: ParamId,
        /// The new value, pre-clamp.
        value: f32,
    },
    /// Changes a channel's input routing, rejected by the caller (not
    /// applied) if it would create a routing cycle.
    SetChannelInput {
        /// The channel whose input is changing.
        channel: ChannelId,
        /// The new input address.
        input: IoAddress,
    },
    /// Changes a channel's output routing.
    SetChannelOutput {
        /// The channel whose output is changing.
        channel: ChannelId,
        /// The new output address.
        output: IoAddress,
    },
    /// Enables or disables an aux send from `source` to `dest`.
    ToggleAuxSend {
        /// The sending channel.
        source: ChannelId,
        /// The aux-return channel.
        dest: ChannelId,
        /// The requested active state.
        active: bool,
    },
    /// Changes an aux send's fader tap point.
    SetAuxSendFaderTap {
        /// The sending channel.
        source: ChannelId,
        /// The aux-return channel.
        dest: ChannelId,
        /// The new tap point.
        tap: FaderTap,
    },
    /// Appends a new fx module to a channel's chain.
    InsertFxModule {
        /// The channel whose chain is growing.
        channel: ChannelId,
        /// The new module's id.
        module: FxModuleId,
    },
    /// Removes an fx module from its channel's chain.
    RemoveFxModule(FxModuleId),
    /// Toggles an fx module's bypass parameter.
    ToggleFxBypass(FxModuleId),
    /// Replaces a module whose LADSPA plugin was unavailable with a freshly
    /// loaded instance, transferring `saved_params`/`saved_midi_assigns`
    /// .
    ReplaceMissingLadspaFxModule {
        /// The placeholder module being replaced.
        module: FxModuleId,
        /// The now-available plugin instance.
        new_instance: LadspaInstanceId,
    },
    /// Enters MIDI-learn mode for `target`.
    StartMidiLearn {
        /// The parameter to bind the next incoming CC to.
        target: ParamId,
    },
    /// Exits MIDI-learn mode without binding anything.
    CancelMidiLearn,
    /// A learn-mode CC message arrived; binds it to the pending target.
    CompleteMidiLearn {
        /// The MIDI channel the CC arrived on.
        channel: u8,
        /// The controller number to bind.
        cc: CcId,
    },
    /// Removes a previously learned binding.
    RemoveMidiAssignment(MidiAssignment),
    /// An error surfaced by the exception-guard middleware.
    Error(String),
}

impl AudioGraphAffecting for Action {
    fn is_audio_graph_affecting(&self) -> bool {
        matches!(
            self,
            Action::CreateChannel { .. }
                | Action::DeleteChannel(_)
                | Action::SetChannelInput { .. }
                | Action::SetChannelOutput { .. }
                | Action::ToggleAuxSend { .. }
                | Action::SetAuxSendFaderTap { .. }
                | Action::InsertFxModule { .. }
                | Action::RemoveFxModule(_)
                | Action::ToggleFxBypass(_)
                | Action::ReplaceMissingLadspaFxModule { .. }
        )
    }
}

impl SoloStateAffecting for Action {
    fn is_solo_state_affecting(&self) -> bool {
        // `SetParameterValue` targeting a channel's `solo` parameter is
        // also solo-state-affecting; the reducer checks that case against
        // the live descriptor flags (see `reducers::apply`), since this
        // trait can only see the action, not state.
        false
    }
}
