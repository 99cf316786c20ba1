//! The ordered middleware chain a dispatched action passes through
//! .

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use thiserror::Error;

use crate::{Action, Reducible, Store};

/// Errors the exception-guard stage can surface, converted into a
/// caller-supplied error action rather than unwinding further.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A middleware or reducer panicked; the guard caught it and converted
    /// it to this error rather than letting it unwind across the dispatch
    /// boundary.
    #[error("dispatch panicked: {0}")]
    Panicked(String),
}

/// A thunk action: given the store, perform arbitrary logic (typically
/// reading state and dispatching further actions) instead of reaching the
/// reducer. Boxed `FnOnce` since a thunk runs exactly once.
pub type Thunk<S, A> = Box<dyn FnOnce(&Store<S, A>) + Send>;

/// One stage of the dispatch chain.
///
/// A middleware either calls `ctx.next(action)` to continue the chain
/// (optionally transforming or inspecting the action first) or swallows
/// the action by not calling `next` at all — matching the thunk stage's
/// "executes it and does not pass it further."
pub trait Middleware<S, A>: Send + Sync {
    /// Handle `action`, forwarding to `ctx.next` to continue the chain.
    fn handle(&self, ctx: &MiddlewareContext<'_, S, A>, action: Action<S, A>);
}

/// The remaining stages and the store, passed to each [`Middleware`].
pub struct MiddlewareContext<'a, S, A> {
    store: &'a Store<S, A>,
    remaining: &'a [Box<dyn Middleware<S, A>>],
}

impl<'a, S, A> MiddlewareContext<'a, S, A>
where
    S: Reducible<Action = A> + Send + 'static,
    A: Send + 'static,
{
    /// The store this dispatch is running against.
    pub fn store(&self) -> &Store<S, A> {
        self.store
    }

    /// Continues the chain: calls the next middleware, or (once every
    /// stage has run) the terminal reducer stage. A bare
    /// [`Action::Thunk`] that reaches here without having been intercepted
    /// by a [`ThunkMiddleware`] still runs, as a safety net — the chain
    /// should always be built with a `ThunkMiddleware` stage, but a thunk
    /// is never silently dropped.
    pub fn next(&self, action: Action<S, A>) {
        match self.remaining.split_first() {
            Some((middleware, rest)) => {
                let ctx = MiddlewareContext {
                    store: self.store,
                    remaining: rest,
                };
                middleware.handle(&ctx, action);
            }
            None => match action {
                Action::Plain(a) => self.store.reduce(a),
                Action::Thunk(thunk) => thunk(self.store),
            },
        }
    }
}

/// An ordered, immutable list of [`Middleware`] stages.
pub struct MiddlewareChain<S, A> {
    stages: Vec<Box<dyn Middleware<S, A>>>,
}

impl<S, A> MiddlewareChain<S, A>
where
    S: Reducible<Action = A> + Send + 'static,
    A: Send + 'static,
{
    /// Builds a chain from stages in dispatch order (first stage runs
    /// first).
    pub fn new(stages: Vec<Box<dyn Middleware<S, A>>>) -> Self {
        Self { stages }
    }

    pub(crate) fn run(&self, store: &Store<S, A>, action: Action<S, A>) {
        let ctx = MiddlewareContext {
            store,
            remaining: &self.stages,
        };
        ctx.next(action);
    }
}

/// Stage 1: catches a panic anywhere further down the chain and converts it
/// into an error action via `to_error_action`, rather than letting it
/// unwind out of `dispatch`.
pub struct ExceptionGuardMiddleware<S, A> {
    to_error_action: Box<dyn Fn(StoreError) -> A + Send + Sync>,
    _marker: std::marker::PhantomData<fn(&S)>,
}

impl<S, A> ExceptionGuardMiddleware<S, A> {
    /// `to_error_action` builds the domain's error action from a caught
    /// [`StoreError`].
    pub fn new(to_error_action: impl Fn(StoreError) -> A + Send + Sync + 'static) -> Self {
        Self {
            to_error_action: Box::new(to_error_action),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<S, A> Middleware<S, A> for ExceptionGuardMiddleware<S, A>
where
    S: Reducible<Action = A> + Send + 'static,
    A: Send + 'static,
{
    fn handle(&self, ctx: &MiddlewareContext<'_, S, A>, action: Action<S, A>) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| ctx.next(action)));
        if let Err(payload) = result {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(message, "dispatch panicked, converting to error action");
            ctx.next(Action::Plain((self.to_error_action)(StoreError::Panicked(
                message,
            ))));
        }
    }
}

/// Stage 3: serializes dispatches that recurse out of a reducer or an
/// earlier middleware, draining the backlog only once the outermost
/// dispatch finishes.
///
/// Grounded in `sonido-plugin::chain::shared::ChainShared::push_command`/
/// `try_drain_commands`'s "push now, drain later" idiom, generalized with
/// an explicit re-entrancy depth counter (distilled "a re-entrancy depth
/// counter ... increments on entry, decrements on exit, and only drains
/// when the depth returns to 0").
pub struct QueueingMiddleware<S, A> {
    depth: AtomicU32,
    queue: Mutex<std::collections::VecDeque<Action<S, A>>>,
}

impl<S, A> Default for QueueingMiddleware<S, A> {
    fn default() -> Self {
        Self {
            depth: AtomicU32::new(0),
            queue: Mutex::new(std::collections::VecDeque::new()),
        }
    }
}

impl<S, A> QueueingMiddleware<S, A> {
    /// A fresh queueing stage with an empty backlog.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S, A> Middleware<S, A> for QueueingMiddleware<S, A>
where
    S: Reducible<Action = A> + Send + 'static,
    A: Send + 'static,
{
    fn handle(&self, ctx: &MiddlewareContext<'_, S, A>, action: Action<S, A>) {
        let depth = self.depth.fetch_add(1, Ordering::AcqRel);
        if depth > 0 {
            // A recursive dispatch from inside an earlier stage or the
            // reducer: queue it instead of re-entering the chain now.
            self.queue.lock().unwrap().push_back(action);
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        ctx.next(action);

        loop {
            let next = self.queue.lock().unwrap().pop_front();
            match next {
                Some(queued) => ctx.next(queued),
                None => break,
            }
        }
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Stage 4: if the action is an [`Action::Thunk`], runs it with the store
/// and does not forward it further. Plain actions pass through unchanged.
pub struct ThunkMiddleware;

impl<S, A> Middleware<S, A> for ThunkMiddleware
where
    S: Reducible<Action = A> + Send + 'static,
    A: Send + 'static,
{
    fn handle(&self, ctx: &MiddlewareContext<'_, S, A>, action: Action<S, A>) {
        match action {
            Action::Thunk(thunk) => thunk(ctx.store()),
            plain @ Action::Plain(_) => ctx.next(plain),
        }
    }
}

/// Stage 5: intercepts actions an `intercept` predicate matches (session
/// load/save, recording start/stop, network actions per distilled §6),
/// running `handle` instead of forwarding them — everything else passes
/// through. A thin, domain-agnostic shell; `piejam-runtime`/`piejam-config`
/// supply the concrete predicate and handler.
pub struct PersistenceMiddleware<S, A> {
    intercept: Box<dyn Fn(&A) -> bool + Send + Sync>,
    handle_action: Box<dyn Fn(&Store<S, A>, A) + Send + Sync>,
}

impl<S, A> PersistenceMiddleware<S, A> {
    /// `intercept` decides whether an action belongs to this stage;
    /// `handle_action` runs instead of forwarding it when it does.
    pub fn new(
        intercept: impl Fn(&A) -> bool + Send + Sync + 'static,
        handle_action: impl Fn(&Store<S, A>, A) + Send + Sync + 'static,
    ) -> Self {
        Self {
            intercept: Box::new(intercept),
            handle_action: Box::new(handle_action),
        }
    }
}

impl<S, A> Middleware<S, A> for PersistenceMiddleware<S, A>
where
    S: Reducible<Action = A> + Send + 'static,
    A: Send + 'static,
{
    fn handle(&self, ctx: &MiddlewareContext<'_, S, A>, action: Action<S, A>) {
        match action {
            Action::Plain(a) if (self.intercept)(&a) => (self.handle_action)(ctx.store(), a),
            other => ctx.next(other),
        }
    }
}

/// Stage 6: after every action, checks whether `counter(state)` has
/// increased since the last observation and, if so, invokes `rebuild`
/// before continuing — grounded in distilled §4.6 "observes the state's
/// `audio_graph_update_count`; on increase, rebuilds the graph." Always
/// passes the action through unchanged; this stage only observes.
pub struct AudioEngineRebuildMiddleware<S, A> {
    counter: Box<dyn Fn(&S) -> u64 + Send + Sync>,
    rebuild: Box<dyn Fn(&Store<S, A>) + Send + Sync>,
    last_seen: AtomicU64,
}

impl<S, A> AudioEngineRebuildMiddleware<S, A> {
    /// `counter` reads the monotonically-increasing rebuild-trigger counter
    /// out of state; `rebuild` performs the actual orchestrator rebuild.
    pub fn new(
        counter: impl Fn(&S) -> u64 + Send + Sync + 'static,
        rebuild: impl Fn(&Store<S, A>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            counter: Box::new(counter),
            rebuild: Box::new(rebuild),
            last_seen: AtomicU64::new(0),
        }
    }
}

impl<S, A> Middleware<S, A> for AudioEngineRebuildMiddleware<S, A>
where
    S: Reducible<Action = A> + Send + 'static,
    A: Send + 'static,
{
    fn handle(&self, ctx: &MiddlewareContext<'_, S, A>, action: Action<S, A>) {
        ctx.next(action);
        let current = ctx.store().with_state(|s| (self.counter)(s));
        let previous = self.last_seen.swap(current, Ordering::AcqRel);
        if current > previous {
            tracing::debug!(previous, current, "audio graph update count increased, rebuilding");
            (self.rebuild)(ctx.store());
        }
    }
}

/// Stage 7: a generic pre/post hook around the remainder of the chain, for
/// domain-specific middlewares (fx-chain, MIDI-control, recorder,
/// persistence bookkeeping) that don't need the full [`Middleware`] trait
/// surface.
pub struct DomainMiddleware<S, A> {
    before: Box<dyn Fn(&Store<S, A>, &A) + Send + Sync>,
    after: Box<dyn Fn(&Store<S, A>) + Send + Sync>,
}

impl<S, A> DomainMiddleware<S, A> {
    /// `before` runs before the rest of the chain sees a plain action;
    /// `after` runs once the chain returns, regardless of what kind of
    /// action it was. Either may be a no-op closure. Post-action
    /// bookkeeping that needs to know *what* happened should key off
    /// observable state (a counter, a flag) rather than the action value,
    /// the same way [`AudioEngineRebuildMiddleware`] does.
    pub fn new(
        before: impl Fn(&Store<S, A>, &A) + Send + Sync + 'static,
        after: impl Fn(&Store<S, A>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            before: Box::new(before),
            after: Box::new(after),
        }
    }
}

impl<S, A> Middleware<S, A> for DomainMiddleware<S, A>
where
    S: Reducible<Action = A> + Send + 'static,
    A: Send + 'static,
{
    fn handle(&self, ctx: &MiddlewareContext<'_, S, A>, action: Action<S, A>) {
        match action {
            Action::Plain(a) => {
                (self.before)(ctx.store(), &a);
                ctx.next(Action::Plain(a));
            }
            thunk @ Action::Thunk(_) => ctx.next(thunk),
        }
        (self.after)(ctx.store());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::sync::Arc;

    #[derive(Default)]
    struct CounterState {
        value: i32,
    }

    enum CounterAction {
        Add(i32),
        Error(String),
    }

    impl Reducible for CounterState {
        type Action = CounterAction;
        fn reduce(&mut self, action: CounterAction) {
            match action {
                CounterAction::Add(n) => self.value += n,
                CounterAction::Error(_) => {}
            }
        }
    }

    fn store_with(
        stages: Vec<Box<dyn Middleware<CounterState, CounterAction>>>,
    ) -> Store<CounterState, CounterAction> {
        Store::new(CounterState::default(), MiddlewareChain::new(stages))
    }

    #[test]
    fn plain_action_reaches_reducer_through_empty_chain() {
        let store = store_with(vec![]);
        store.dispatch(Action::Plain(CounterAction::Add(5)));
        assert_eq!(store.with_state(|s| s.value), 5);
    }

    #[test]
    fn thunk_runs_and_does_not_reach_reducer_directly() {
        let store = store_with(vec![Box::new(ThunkMiddleware)]);
        store.dispatch(Action::Thunk(Box::new(|store| {
            store.dispatch(Action::Plain(CounterAction::Add(2)));
        })));
        assert_eq!(store.with_state(|s| s.value), 2);
    }

    #[test]
    fn exception_guard_converts_panic_to_error_action() {
        struct Boom;
        impl Middleware<CounterState, CounterAction> for Boom {
            fn handle(
                &self,
                _ctx: &MiddlewareContext<'_, CounterState, CounterAction>,
                _action: Action<CounterState, CounterAction>,
            ) {
                panic!("boom");
            }
        }

        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = Arc::clone(&errors);
        let store = store_with(vec![
            Box::new(ExceptionGuardMiddleware::new(move |e: StoreError| {
                errors_clone.lock().unwrap().push(e.to_string());
                CounterAction::Error(e.to_string())
            })),
            Box::new(Boom),
        ]);
        store.dispatch(Action::Plain(CounterAction::Add(1)));
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn queueing_drains_recursive_dispatch_after_outer_returns() {
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Recorder {
            order: Arc<Mutex<Vec<i32>>>,
        }
        impl Middleware<CounterState, CounterAction> for Recorder {
            fn handle(
                &self,
                ctx: &MiddlewareContext<'_, CounterState, CounterAction>,
                action: Action<CounterState, CounterAction>,
            ) {
                if let Action::Plain(CounterAction::Add(n)) = &action {
                    self.order.lock().unwrap().push(*n);
                    if *n == 1 {
                        ctx.store()
                            .dispatch(Action::Plain(CounterAction::Add(2)));
                    }
                }
                ctx.next(action);
            }
        }

        let store = store_with(vec![
            Box::new(QueueingMiddleware::new()),
            Box::new(Recorder {
                order: Arc::clone(&order),
            }),
        ]);
        store.dispatch(Action::Plain(CounterAction::Add(1)));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        assert_eq!(store.with_state(|s| s.value), 3);
    }

    #[test]
    fn audio_engine_rebuild_fires_only_on_counter_increase() {
        let rebuilds = Arc::new(AtomicI32::new(0));
        let rebuilds_clone = Arc::clone(&rebuilds);
        let store = store_with(vec![Box::new(AudioEngineRebuildMiddleware::new(
            |s: &CounterState| s.value as u64,
            move |_store| {
                rebuilds_clone.fetch_add(1, Ordering::AcqRel);
            },
        ))]);
        store.dispatch(Action::Plain(CounterAction::Add(1)));
        store.dispatch(Action::Plain(CounterAction::Add(0)));
        store.dispatch(Action::Plain(CounterAction::Add(1)));
        assert_eq!(rebuilds.load(Ordering::Acquire), 2);
    }
}
