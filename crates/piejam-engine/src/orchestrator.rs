//! Engine orchestrator: graph rebuilds and the wait-free executor hand-off
//! . The four-pass rebuild — enumerate components, enumerate processors,
//! connect, finalize/compile/swap — lives on the control thread and never
//! touches the audio thread's [`Dag`] in place; it builds a brand new one
//! and swaps it in atomically via [`ArcSwap`]. `piejam-runtime` drives the
//! first three passes (it owns the mixer's channel/effects graph); this
//! module owns the generic structural-reuse bookkeeping and the swap itself
//! so that machinery isn't duplicated per caller.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::mpsc;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::dag::Dag;

/// Carries state forward across a rebuild by key, so a component or
/// processor whose inputs haven't changed is reused verbatim rather than
/// rebuilt from scratch.
///
/// Grounded in `sonido-plugin::chain::shared::SlotSnapshot`'s save/restore
/// idiom, generalized from "save/restore chain slots by key" to any
/// `K -> Arc<V>` mapping a rebuild pass wants to carry forward: routing
/// entries keyed by `(ChannelId, IoRoute)`, effect instances keyed by
/// `FxModuleId`, smoothing-processor state keyed by parameter id.
pub struct DynamicKeySharedObjectMap<K, V> {
    entries: HashMap<K, Arc<V>>,
}

impl<K: Eq + Hash + Clone, V> DynamicKeySharedObjectMap<K, V> {
    /// An empty map, built fresh at the start of a rebuild pass.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Carries `key`'s entry forward from `prev` into `self` if present,
    /// returning a clone of the carried value. Returns `None` if `prev` has
    /// no entry for `key` — the caller must build one fresh and
    /// [`insert`](Self::insert) it.
    pub fn carry_forward(&mut self, key: &K, prev: &Self) -> Option<Arc<V>> {
        let value = prev.entries.get(key)?.clone();
        self.entries.insert(key.clone(), Arc::clone(&value));
        Some(value)
    }

    /// Inserts a freshly-built value for `key`, returning the previous
    /// value for that key in *this* build, if any (a caller re-inserting
    /// under the same key within one pass, which should not normally
    /// happen).
    pub fn insert(&mut self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        self.entries.insert(key, value)
    }

    /// The current entry for `key`, if this build has one.
    pub fn get(&self, key: &K) -> Option<&Arc<V>> {
        self.entries.get(key)
    }

    /// Number of entries carried or inserted so far this build.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether this build has no entries yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash + Clone, V> Default for DynamicKeySharedObjectMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sent from the audio thread back to the control thread once it has
/// observed a swapped-in [`Dag`], so the control thread knows it is safe to
/// let the previous `Arc<Dag>` drop.
struct SwapObserved;

/// Owns the currently-installed [`Dag`] and the wait-free hand-off to
/// replace it.
///
/// The audio thread calls [`Orchestrator::current`] once per period and
/// runs whatever it returns; it never blocks on a rebuild in progress. The
/// control thread calls [`Orchestrator::install`] after compiling a new
/// `Dag`, then [`Orchestrator::confirm_swap_observed`] once it knows the
/// audio thread has moved on, at which point the previous `Dag` is free to
/// drop (its last `Arc` reference goes with it).
pub struct Orchestrator {
    current: ArcSwap<Dag>,
    grace: (mpsc::Sender<SwapObserved>, mpsc::Receiver<SwapObserved>),
    previous: Option<Arc<Dag>>,
}

impl Orchestrator {
    /// Starts an orchestrator already running `initial`.
    pub fn new(initial: Dag) -> Self {
        Self {
            current: ArcSwap::new(Arc::new(initial)),
            grace: mpsc::channel(),
            previous: None,
        }
    }

    /// The `Dag` the audio thread should run this period. Lock-free: an
    /// `ArcSwap` load is a single atomic pointer read plus a refcount bump.
    pub fn current(&self) -> Arc<Dag> {
        self.current.load_full()
    }

    /// Installs a freshly-compiled `Dag`, replacing the one audio-thread
    /// readers currently see. The old `Dag` is kept alive in `self.previous`
    /// for one period's grace — until [`Orchestrator::confirm_swap_observed`]
    /// is called — rather than dropped immediately, so a reader that loaded
    /// the old `Arc` just before the swap still finishes its period safely.
    pub fn install(&mut self, new_dag: Dag) {
        let old = self.current.swap(Arc::new(new_dag));
        self.previous = Some(old);
    }

    /// Called by the audio thread (or on its behalf) once a process step
    /// has completed using the newly-installed `Dag`, signalling the
    /// control thread that the previous one may be dropped.
    pub fn notify_swap_observed(&self) {
        let _ = self.grace.0.send(SwapObserved);
    }

    /// Drains any pending swap-observed notifications and drops the
    /// previous `Dag` if one has been confirmed unused. Call this once per
    /// control-thread tick; it never blocks.
    pub fn confirm_swap_observed(&mut self) {
        if self.grace.1.try_recv().is_ok() {
            self.previous = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::ThreadContext;

    fn empty_dag() -> Dag {
        Dag::compile(Vec::new(), &[]).unwrap()
    }

    #[test]
    fn carry_forward_reuses_value_by_key() {
        let mut prev: DynamicKeySharedObjectMap<u32, String> = DynamicKeySharedObjectMap::new();
        prev.insert(1, Arc::new("alpha".to_string()));

        let mut next: DynamicKeySharedObjectMap<u32, String> = DynamicKeySharedObjectMap::new();
        let carried = next.carry_forward(&1, &prev).unwrap();
        assert_eq!(*carried, "alpha");
        assert!(Arc::ptr_eq(next.get(&1).unwrap(), prev.get(&1).unwrap()));
    }

    #[test]
    fn carry_forward_missing_key_returns_none() {
        let prev: DynamicKeySharedObjectMap<u32, String> = DynamicKeySharedObjectMap::new();
        let mut next: DynamicKeySharedObjectMap<u32, String> = DynamicKeySharedObjectMap::new();
        assert!(next.carry_forward(&7, &prev).is_none());
    }

    #[test]
    fn install_keeps_previous_dag_until_observed() {
        let mut orch = Orchestrator::new(empty_dag());
        let first = orch.current();
        orch.install(empty_dag());
        assert!(orch.previous.is_some());
        assert!(!Arc::ptr_eq(&first, &orch.current()));

        orch.notify_swap_observed();
        orch.confirm_swap_observed();
        assert!(orch.previous.is_none());
    }

    #[test]
    fn current_reflects_latest_install() {
        let mut orch = Orchestrator::new(empty_dag());
        let ctx = ThreadContext { buffer_size: 64 };
        let _ = crate::dag::run_st(&orch.current(), &ctx);
        orch.install(empty_dag());
        let _ = crate::dag::run_st(&orch.current(), &ctx);
    }
}
