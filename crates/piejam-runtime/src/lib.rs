//! Mixer/fx/IO state, reducers, routing invariants and the engine rebuild
//! for the PieJam real-time audio mixer. [`state`] and [`reducers`] hold the
//! mixer/fx data model and the terminal `piejam-store` reducer stage that
//! folds [`actions::Action`]s into it. [`build`] is Module E's four-pass
//! translation from that state into a running `piejam-engine` `Dag`, owned
//! by [`build::EngineRebuild`]: the glue a host (a sound-card callback, a
//! test harness) registers with
//! `piejam_store::middleware::AudioEngineRebuildMiddleware` so routing and
//! fx-chain edits rebuild the audio graph automatically.

pub mod actions;
pub mod build;
pub mod ids;
pub mod midi;
pub mod reducers;
pub mod state;

pub use actions::{Action, AudioGraphAffecting, SoloStateAffecting};
pub use build::{
    EngineRebuild, ExternalIoBuffer, ExternalIoHandles, RebuildIo, ReuseTables, SharedEngineRebuild,
};
pub use midi::{CcId, MidiAssignment, MidiDispatcher, MidiLearnState};
pub use reducers::RuntimeState;
pub use state::{
    AuxChannel, AuxSend, Channel, ChannelParameters, ChannelType, FaderTap, FxInstanceId,
    FxModule, IoAddress, IoRoute, MixerState,
};
