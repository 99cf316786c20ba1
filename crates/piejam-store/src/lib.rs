//! Dispatch pipeline and selector-based subscriptions for the PieJam store
//! . The store owns one `S: Reducible` state value and runs every dispatched
//! `A` through an ordered middleware chain before (and sometimes instead of)
//! the terminal reducer stage. Grounded throughout in
//! `sonido-plugin::chain::shared::ChainShared`'s command-queue idiom — "GUI
//! pushes a command, the audio thread try-locks and drains it" — which this
//! crate generalizes from "one queue, one consumer thread" to "any thread
//! dispatches, exactly one designated control thread drains and reduces."

mod middleware;
mod subscription;

pub use middleware::{
    AudioEngineRebuildMiddleware, DomainMiddleware, ExceptionGuardMiddleware, Middleware,
    MiddlewareChain, PersistenceMiddleware, QueueingMiddleware, StoreError, Thunk,
};
pub use subscription::{Selector, SubscriptionId, Subscriptions};

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

/// State that can be mutated in place by a dispatched action.
///
/// The terminal middleware stage calls [`Reducible::reduce`] and nothing
/// after it sees the action.
pub trait Reducible {
    /// The action type this state knows how to fold in.
    type Action;

    /// Applies `action` to `self`. Infallible by design — actions that can
    /// fail are expected to have already been converted to error actions by
    /// the exception-guard stage before reaching here.
    fn reduce(&mut self, action: Self::Action);
}

/// An action that is either a plain value handled by the reducer, or a
/// thunk — a closure given read access to the current state and a
/// re-entrant dispatch handle, run instead of reaching the reducer
/// .
pub enum Action<S, A> {
    /// A plain action, folded into state by [`Reducible::reduce`].
    Plain(A),
    /// A thunk: `(state, dispatch) -> ()`, executed directly by the thunk
    /// middleware and never forwarded past it.
    Thunk(Thunk<S, A>),
}

/// The store: current state, the middleware chain, and the thread that owns
/// dispatch.
///
/// `S` must be `Send` because subscribers may read it from a thread other
/// than the control thread while the store itself lives behind an
/// `Arc<Mutex<_>>`-free design: only the control thread ever mutates `S`,
/// matching distilled §5's "single control thread owns state mutation."
pub struct Store<S, A> {
    state: Mutex<S>,
    control_thread: ThreadId,
    chain: MiddlewareChain<S, A>,
    subscriptions: Subscriptions<S>,
    delegate_rx: mpsc::Receiver<Action<S, A>>,
    delegate_tx: mpsc::Sender<Action<S, A>>,
}

impl<S, A> Store<S, A>
where
    S: Reducible<Action = A> + Send + 'static,
    A: Send + 'static,
{
    /// Builds a store whose control thread is the thread calling `new`.
    /// Every subsequent `dispatch` from a different thread is enqueued and
    /// returns immediately.
    pub fn new(initial_state: S, chain: MiddlewareChain<S, A>) -> Self {
        let (delegate_tx, delegate_rx) = mpsc::channel();
        Self {
            state: Mutex::new(initial_state),
            control_thread: std::thread::current().id(),
            chain,
            subscriptions: Subscriptions::new(),
            delegate_rx,
            delegate_tx,
        }
    }

    /// Dispatches `action` through the middleware chain.
    ///
    /// If called off the control thread, the action is pushed onto an MPSC
    /// channel and `dispatch` returns immediately; the control thread picks
    /// it up the next time it calls [`Store::pump_delegated`] or
    /// `dispatch` itself (which drains the delegate queue first, so
    /// delegated and direct actions interleave in arrival order as
    /// distilled §4.6's thread-delegate stage requires).
    pub fn dispatch(&self, action: Action<S, A>) {
        if std::thread::current().id() != self.control_thread {
            let _ = self.delegate_tx.send(action);
            return;
        }
        self.pump_delegated();
        self.dispatch_on_control_thread(action);
    }

    /// Drains any actions enqueued by off-control-thread callers, running
    /// each one through the chain. Must only be called from the control
    /// thread; a no-op if there is nothing queued.
    pub fn pump_delegated(&self) {
        debug_assert_eq!(std::thread::current().id(), self.control_thread);
        while let Ok(action) = self.delegate_rx.try_recv() {
            self.dispatch_on_control_thread(action);
        }
    }

    fn dispatch_on_control_thread(&self, action: Action<S, A>) {
        self.chain.run(self, action);
    }

    /// Reads the current state through `f`, holding the control-thread lock
    /// only for the duration of the call.
    pub fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let guard = self.state.lock().unwrap();
        f(&guard)
    }

    fn with_state_mut<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self.state.lock().unwrap();
        let result = f(&mut guard);
        drop(guard);
        self.subscriptions.notify(self);
        result
    }

    /// Applies the terminal reducer stage directly, bypassing the rest of
    /// the chain. Used by [`MiddlewareChain::run`] once every other stage
    /// has had a chance to intercept the action.
    fn reduce(&self, action: A) {
        self.with_state_mut(|s| s.reduce(action));
    }

    /// Subscribes to changes of `selector(state)`, notified whenever the
    /// selector's output differs by equality from the previous call
    /// .
    pub fn subscribe<V>(
        &self,
        selector: impl Fn(&S) -> V + Send + Sync + 'static,
        handler: impl FnMut(&V) + Send + 'static,
    ) -> SubscriptionId
    where
        V: PartialEq + Send + 'static,
    {
        self.with_state(|s| self.subscriptions.subscribe(s, selector, handler))
    }

    /// Removes a previously-registered subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.remove(id);
    }

    /// Reads `selector(state)` once without subscribing.
    pub fn observe_once<V>(&self, selector: impl Fn(&S) -> V) -> V {
        self.with_state(selector)
    }
}

/// A reference-counted, cloneable handle to a [`Store`], for sharing across
/// the CLI/demo wiring without exposing interior mutability directly.
pub type SharedStore<S, A> = Arc<Store<S, A>>;
