//! Selector-based subscriptions — "the sole bridge to the GUI" (distilled
//! §4.6).
//!
//! Each subscription caches the last value its selector produced and is
//! notified only when a fresh call differs by equality, the same
//! pointer-equality-first comparison [`piejam_core::Box`] already gives
//! aggregate state types; scalar projections fall back to plain
//! `PartialEq`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::Store;

/// A pure projection from state to some comparable value.
pub type Selector<S, V> = Box<dyn Fn(&S) -> V + Send + Sync>;

/// Identifies a registered subscription, returned by
/// [`crate::Store::subscribe`] so it can later be passed to
/// [`crate::Store::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

trait ErasedSubscription<S>: Send {
    fn id(&self) -> SubscriptionId;
    /// Re-evaluates the selector against `state` and, if it differs from
    /// the cached value, calls the handler and updates the cache.
    fn check(&self, state: &S);
}

struct TypedSubscription<S, V, F> {
    id: SubscriptionId,
    selector: Selector<S, V>,
    last: Mutex<V>,
    handler: Mutex<F>,
}

impl<S, V, F> ErasedSubscription<S> for TypedSubscription<S, V, F>
where
    S: Send,
    V: PartialEq + Send,
    F: FnMut(&V) + Send,
{
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn check(&self, state: &S) {
        let fresh = (self.selector)(state);
        let mut last = self.last.lock().unwrap();
        if *last != fresh {
            *last = fresh;
            (self.handler.lock().unwrap())(&last);
        }
    }
}

/// Owns every live subscription for one [`crate::Store`].
pub struct Subscriptions<S> {
    next_id: AtomicU64,
    entries: Mutex<Vec<Box<dyn ErasedSubscription<S>>>>,
}

impl<S: Send + 'static> Subscriptions<S> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe<V>(
        &self,
        initial_state: &S,
        selector: impl Fn(&S) -> V + Send + Sync + 'static,
        handler: impl FnMut(&V) + Send + 'static,
    ) -> SubscriptionId
    where
        V: PartialEq + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let initial = selector(initial_state);
        let entry = TypedSubscription {
            id,
            selector: Box::new(selector),
            last: Mutex::new(initial),
            handler: Mutex::new(handler),
        };
        self.entries.lock().unwrap().push(Box::new(entry));
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) {
        self.entries.lock().unwrap().retain(|e| e.id() != id);
    }

    /// Notified after every reducer run: re-checks every live subscription
    /// against the store's current state.
    pub(crate) fn notify<A>(&self, store: &Store<S, A>)
    where
        S: crate::Reducible<Action = A>,
        A: Send + 'static,
    {
        let entries = self.entries.lock().unwrap();
        store.with_state(|state| {
            for entry in entries.iter() {
                entry.check(state);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Action, MiddlewareChain, Reducible};
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Default)]
    struct State {
        count: i32,
        other: i32,
    }

    enum Act {
        Bump,
        BumpOther,
    }

    impl Reducible for State {
        type Action = Act;
        fn reduce(&mut self, action: Act) {
            match action {
                Act::Bump => self.count += 1,
                Act::BumpOther => self.other += 1,
            }
        }
    }

    #[test]
    fn subscriber_fires_only_when_selected_value_changes() {
        let store = Store::new(State::default(), MiddlewareChain::new(vec![]));
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        store.subscribe(
            |s: &State| s.count,
            move |v: &i32| seen_clone.lock().unwrap().push(*v),
        );

        store.dispatch(Action::Plain(Act::BumpOther));
        store.dispatch(Action::Plain(Act::Bump));
        store.dispatch(Action::Plain(Act::BumpOther));
        store.dispatch(Action::Plain(Act::Bump));

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_future_notifications() {
        let store = Store::new(State::default(), MiddlewareChain::new(vec![]));
        let seen = Arc::new(StdMutex::new(0));
        let seen_clone = Arc::clone(&seen);
        let id = store.subscribe(
            |s: &State| s.count,
            move |v: &i32| *seen_clone.lock().unwrap() = *v,
        );
        store.dispatch(Action::Plain(Act::Bump));
        store.unsubscribe(id);
        store.dispatch(Action::Plain(Act::Bump));
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
