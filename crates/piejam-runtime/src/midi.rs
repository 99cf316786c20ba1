//! MIDI-control domain types owned by the runtime: what a learned
//! assignment *means*, independent of how MIDI bytes are captured or
//! converted (that's `piejam-io`'s concern).
//!
//! Grounded in distilled §4.5 pass 2 ("MIDI-assignment demultiplexer plus
//! one `{cc→value, parameter-writer}` pair per learned assignment") and §6
//! "MIDI interface" — neither has a direct donor-crate analogue (the donor
//! workspace has no MIDI code), so the shapes below follow the spec's own
//! prose.

use std::collections::HashMap;

use piejam_core::{ParamId, ParamStore, SharedWrite};

/// A MIDI continuous-controller number, `0..=127`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CcId(pub u8);

/// One learned MIDI-CC-to-parameter binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiAssignment {
    /// The MIDI channel (0-15) this binding listens on.
    pub channel: u8,
    /// The controller number driving the parameter.
    pub cc: CcId,
    /// The parameter this CC writes to.
    pub target: ParamId,
}

/// Whether the engine is currently in "MIDI learn" mode and, if so, which
/// parameter the next incoming CC message should bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MidiLearnState {
    /// Not learning; incoming CC messages are dispatched through existing
    /// assignments only.
    #[default]
    Idle,
    /// Waiting for the next CC message to bind to `target`.
    Learning {
        /// The parameter awaiting a binding.
        target: ParamId,
    },
}

/// Demultiplexes incoming MIDI CC events into direct parameter writes — one
/// `{cc → value, parameter-writer}` pair per learned assignment (distilled
/// §4.5 pass 2). Deliberately *not* part of [`crate::build::build_graph`]'s
/// audio graph: a write goes straight through a cached [`SharedWrite`]
/// handle rather than round-tripping through a dispatched
/// `SetParameterValue` action, since a CC stream can arrive far faster than
/// the reducer/rebuild cycle should run, and a MIDI controller's physical
/// polling is the control thread's job, not the audio thread's.
#[derive(Default)]
pub struct MidiDispatcher {
    writers: HashMap<(u8, CcId), SharedWrite>,
}

impl MidiDispatcher {
    /// An empty dispatcher with no learned assignments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the `(channel, cc) -> writer` map from the current
    /// assignment list, resolving each target's [`SharedWrite`] handle from
    /// `params`. Call whenever `midi_assignments` changes (a completed
    /// learn, a removal) — mirrors the audio-graph rebuild's own "re-derive
    /// from state" shape, just for a much smaller table.
    pub fn rebuild(&mut self, assignments: &[MidiAssignment], params: &ParamStore) {
        self.writers.clear();
        for assignment in assignments {
            if let Some(writer) = params.cached_write(assignment.target) {
                self.writers.insert((assignment.channel, assignment.cc), writer);
            }
        }
    }

    /// Applies one incoming CC event's normalized value if a learned
    /// assignment exists for its `(channel, cc)` pair. A no-op, not an
    /// error, for CCs with no assignment — most MIDI traffic on a shared
    /// bus is for other controls entirely.
    pub fn dispatch(&self, channel: u8, cc: CcId, normalized_value: f32) {
        if let Some(writer) = self.writers.get(&(channel, cc)) {
            writer.set(normalized_value);
        }
    }

    /// How many CC bindings are currently wired to a parameter writer.
    pub fn len(&self) -> usize {
        self.writers.len()
    }

    /// Whether no CC bindings are currently wired.
    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use piejam_core::ParamDescriptor;

    #[test]
    fn assignment_equality_is_by_value() {
        let a = MidiAssignment {
            channel: 0,
            cc: CcId(7),
            target: ParamId(3),
        };
        let b = a;
        assert_eq!(a, b);
    }

    fn volume_param(id: ParamId) -> ParamDescriptor {
        ParamDescriptor::custom("Volume", "Vol", 0.0, 1.0, 0.0).with_id(id, "volume")
    }

    #[test]
    fn dispatch_writes_through_a_learned_assignment() {
        let mut params = ParamStore::new();
        let target = ParamId(1);
        params.emplace(volume_param(target));

        let mut dispatcher = MidiDispatcher::new();
        dispatcher.rebuild(
            &[MidiAssignment {
                channel: 0,
                cc: CcId(7),
                target,
            }],
            &params,
        );
        assert_eq!(dispatcher.len(), 1);

        dispatcher.dispatch(0, CcId(7), 0.75);
        assert_eq!(params.at(target), Some(0.75));
    }

    #[test]
    fn dispatch_on_an_unassigned_cc_is_a_no_op() {
        let params = ParamStore::new();
        let dispatcher = MidiDispatcher::new();
        // No panic, no effect — just nothing to do.
        dispatcher.dispatch(3, CcId(99), 1.0);
        assert!(dispatcher.is_empty());
        assert_eq!(params.len(), 0);
    }

    #[test]
    fn rebuild_drops_assignments_whose_target_no_longer_exists() {
        let params = ParamStore::new();
        let mut dispatcher = MidiDispatcher::new();
        dispatcher.rebuild(
            &[MidiAssignment {
                channel: 0,
                cc: CcId(1),
                target: ParamId(42),
            }],
            &params,
        );
        assert!(dispatcher.is_empty());
    }
}
