//! Shared CLI helpers: the demo session envelope and the replay machinery
//! that turns it into a live `piejam-store` `Store`.
//!
//! The CLI is a one-shot process, not a long-running daemon, so it never
//! holds a `Store` across invocations. Instead a session file records just
//! enough to reconstruct one: channel order, type, routing and a handful of
//! built-in parameter values. Every invocation replays that as a sequence of
//! `Action`s into a fresh `RuntimeState`, the same way a GUI's own startup
//! would load a session — this crate just does it once per command instead
//! of once per process.

use std::collections::HashMap;

use piejam_runtime::ids::{ChannelId, ExternalDeviceId, IdSequence};
use piejam_runtime::reducers::RuntimeState;
use piejam_runtime::state::{ChannelType, IoAddress};
use piejam_runtime::{Action, SharedEngineRebuild};
use piejam_store::{
    ExceptionGuardMiddleware, MiddlewareChain, QueueingMiddleware, Store, StoreError,
    ThunkMiddleware,
};
use serde::{Deserialize, Serialize};

/// A saved demo mixer layout: channel order, type, routing and built-in
/// parameter values, referenced by array index rather than the opaque
/// `ChannelId`s a live `RuntimeState` uses — this crate owns this shape,
/// `piejam-config`'s `Session<T>` envelope stays generic over it (distilled
/// §6 "the engine never parses these itself").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DemoSession {
    /// Every mixer channel, in creation order.
    pub channels: Vec<DemoChannel>,
}

/// One channel's persisted shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoChannel {
    /// Display name, local to this file.
    pub name: String,
    /// Mono, stereo or aux.
    pub channel_type: DemoChannelType,
    /// Input routing.
    pub input: DemoIoAddress,
    /// Output routing.
    pub output: DemoIoAddress,
    /// Channel volume in dB.
    pub volume_db: f32,
    /// Pan/balance, `-1.0..=1.0`.
    pub pan_balance: f32,
    /// Mute toggle.
    pub mute: bool,
    /// Solo toggle.
    pub solo: bool,
}

impl Default for DemoChannel {
    fn default() -> Self {
        Self {
            name: "Channel".to_string(),
            channel_type: DemoChannelType::Stereo,
            input: DemoIoAddress::Default,
            output: DemoIoAddress::Default,
            volume_db: 0.0,
            pan_balance: 0.0,
            mute: false,
            solo: false,
        }
    }
}

/// This file's own copy of [`ChannelType`], serializable and free of the
/// live crate's id types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemoChannelType {
    /// Single-sample-per-frame channel.
    Mono,
    /// Two-sample-per-frame channel.
    Stereo,
    /// An aux-return channel.
    Aux,
}

impl From<DemoChannelType> for ChannelType {
    fn from(value: DemoChannelType) -> Self {
        match value {
            DemoChannelType::Mono => ChannelType::Mono,
            DemoChannelType::Stereo => ChannelType::Stereo,
            DemoChannelType::Aux => ChannelType::Aux,
        }
    }
}

impl From<ChannelType> for DemoChannelType {
    fn from(value: ChannelType) -> Self {
        match value {
            ChannelType::Mono => DemoChannelType::Mono,
            ChannelType::Stereo => DemoChannelType::Stereo,
            ChannelType::Aux => DemoChannelType::Aux,
        }
    }
}

/// A saved routing endpoint — `Channel`/`External` reference other entities
/// positionally (by array index / raw device number) rather than by opaque
/// id, since those ids are only ever allocated fresh at replay time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemoIoAddress {
    /// Not connected.
    Default,
    /// The implicit stereo mix bus.
    MixInput,
    /// Another channel, by its index in [`DemoSession::channels`].
    Channel(usize),
    /// A sound-card device, by its raw device number.
    External(u64),
}

impl DemoIoAddress {
    fn resolve(self, ids: &[ChannelId]) -> IoAddress {
        match self {
            DemoIoAddress::Default => IoAddress::Default,
            DemoIoAddress::MixInput => IoAddress::MixInput,
            DemoIoAddress::Channel(index) => ids
                .get(index)
                .map_or(IoAddress::Default, |&id| IoAddress::Channel(id)),
            DemoIoAddress::External(raw) => IoAddress::External(ExternalDeviceId::from_raw(raw)),
        }
    }

    fn capture(address: IoAddress, index_of: &HashMap<ChannelId, usize>) -> Self {
        match address {
            IoAddress::Default => DemoIoAddress::Default,
            IoAddress::MixInput => DemoIoAddress::MixInput,
            IoAddress::Channel(id) => index_of
                .get(&id)
                .map_or(DemoIoAddress::Default, |&index| DemoIoAddress::Channel(index)),
            IoAddress::External(device) => DemoIoAddress::External(device.raw()),
        }
    }
}

/// Builds the ordered middleware chain every command wires up: exception
/// guard, recursive-dispatch queueing, thunk handling, and the audio-engine
/// rebuild stage. Persistence/domain middleware are left out here — this
/// crate owns its own session format directly through [`DemoSession`] rather
/// than intercepting actions for it.
fn build_chain(shared: &SharedEngineRebuild) -> MiddlewareChain<RuntimeState, Action> {
    MiddlewareChain::new(vec![
        Box::new(ExceptionGuardMiddleware::new(|e: StoreError| {
            Action::Error(e.to_string())
        })),
        Box::new(QueueingMiddleware::new()),
        Box::new(ThunkMiddleware),
        Box::new(shared.middleware()),
    ])
}

/// Builds a fresh [`Store`] and [`SharedEngineRebuild`] from a saved session,
/// replaying one `CreateChannel` plus routing/parameter actions per channel
/// in file order. Returns the store alongside the [`ChannelId`] each
/// [`DemoSession::channels`] entry was allocated, so callers can address a
/// channel by its file index without re-deriving ids from state.
///
/// # Errors
///
/// Returns an error if starting the initial (empty) engine rebuild fails.
pub fn build_store(
    session: &DemoSession,
    buffer_size: usize,
) -> anyhow::Result<(Store<RuntimeState, Action>, SharedEngineRebuild, Vec<ChannelId>)> {
    let shared = SharedEngineRebuild::new(buffer_size)
        .map_err(|e| anyhow::anyhow!("failed to start audio engine: {e}"))?;
    let store = Store::new(RuntimeState::default(), build_chain(&shared));

    let id_sequence: IdSequence<ChannelId> = IdSequence::new();
    let mut ids = Vec::with_capacity(session.channels.len());
    for demo in &session.channels {
        let id = id_sequence.next_id();
        ids.push(id);
        store.dispatch(piejam_store::Action::Plain(Action::CreateChannel {
            id,
            channel_type: demo.channel_type.into(),
        }));
    }

    for (demo, &id) in session.channels.iter().zip(&ids) {
        store.dispatch(piejam_store::Action::Plain(Action::SetChannelInput {
            channel: id,
            input: demo.input.resolve(&ids),
        }));
        store.dispatch(piejam_store::Action::Plain(Action::SetChannelOutput {
            channel: id,
            output: demo.output.resolve(&ids),
        }));

        let params = store.with_state(|s| s.mixer.channels.get(&id).map(|c| c.parameters));
        if let Some(params) = params {
            store.dispatch(piejam_store::Action::Plain(Action::SetParameterValue {
                param: params.volume,
                value: demo.volume_db,
            }));
            store.dispatch(piejam_store::Action::Plain(Action::SetParameterValue {
                param: params.pan_balance,
                value: demo.pan_balance,
            }));
            store.dispatch(piejam_store::Action::Plain(Action::SetParameterValue {
                param: params.mute,
                value: if demo.mute { 1.0 } else { 0.0 },
            }));
            store.dispatch(piejam_store::Action::Plain(Action::SetParameterValue {
                param: params.solo,
                value: if demo.solo { 1.0 } else { 0.0 },
            }));
        }
    }

    Ok((store, shared, ids))
}

/// The inverse of [`build_store`]'s replay: reads the live state back into a
/// [`DemoSession`] in the same channel order `ids` names, for saving edits
/// a command made back to disk. `names` must line up with `ids` — a live
/// `Channel` only carries a `StringId`, not the display string itself, so
/// the name has to come back from the caller's own session rather than the
/// replayed state.
pub fn capture_session(
    store: &Store<RuntimeState, Action>,
    ids: &[ChannelId],
    names: &[String],
) -> DemoSession {
    store.with_state(|state| {
        let index_of: HashMap<ChannelId, usize> =
            ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let channels = ids
            .iter()
            .enumerate()
            .map(|(index, id)| {
                let channel = state.mixer.channels.get(id);
                let route = state.mixer.io_map.get(id).copied();
                let params = channel.map(|c| c.parameters);
                let at = |p: Option<piejam_core::ParamId>| {
                    p.and_then(|p| state.params.at(p)).unwrap_or(0.0)
                };
                DemoChannel {
                    name: names
                        .get(index)
                        .cloned()
                        .unwrap_or_else(|| format!("Channel {}", id.raw())),
                    channel_type: channel
                        .map_or(DemoChannelType::Stereo, |c| c.channel_type.into()),
                    input: route.map_or(DemoIoAddress::Default, |r| {
                        DemoIoAddress::capture(r.input, &index_of)
                    }),
                    output: route.map_or(DemoIoAddress::Default, |r| {
                        DemoIoAddress::capture(r.output, &index_of)
                    }),
                    volume_db: at(params.map(|p| p.volume)),
                    pan_balance: at(params.map(|p| p.pan_balance)),
                    mute: at(params.map(|p| p.mute)) >= 0.5,
                    solo: at(params.map(|p| p.solo)) >= 0.5,
                }
            })
            .collect();
        DemoSession { channels }
    })
}

/// A default single-channel layout: one stereo channel routed from
/// sound-card input 0 straight through to sound-card output 1.
pub fn default_session() -> DemoSession {
    DemoSession {
        channels: vec![DemoChannel {
            name: "Main".to_string(),
            channel_type: DemoChannelType::Stereo,
            input: DemoIoAddress::External(0),
            output: DemoIoAddress::External(1),
            ..DemoChannel::default()
        }],
    }
}

/// Parses a `key=value`-free routing spec: `default`, `mix`, `channel:<n>`
/// or `external:<n>`.
pub fn parse_io_address(s: &str) -> Result<DemoIoAddress, String> {
    if s.eq_ignore_ascii_case("default") {
        return Ok(DemoIoAddress::Default);
    }
    if s.eq_ignore_ascii_case("mix") {
        return Ok(DemoIoAddress::MixInput);
    }
    if let Some(rest) = s.strip_prefix("channel:") {
        return rest
            .parse()
            .map(DemoIoAddress::Channel)
            .map_err(|_| format!("invalid channel index: {rest}"));
    }
    if let Some(rest) = s.strip_prefix("external:") {
        return rest
            .parse()
            .map(DemoIoAddress::External)
            .map_err(|_| format!("invalid device number: {rest}"));
    }
    Err(format!(
        "unrecognized routing spec '{s}' (expected default, mix, channel:<n>, or external:<n>)"
    ))
}
