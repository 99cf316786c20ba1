//! Value cells and the copy-on-write aggregate wrapper. Two independent
//! primitives live here: - [`ValueCell`] — the lock-free
//! single-writer/many-reader scalar slot behind every parameter. The control
//! thread writes with release ordering; any number of audio-thread readers
//! load with acquire ordering. Values are `f32`, i.e. always ≤ one machine
//! word, so reads are never torn. - [`Box`] — the copy-on-write wrapper used
//! for aggregate state (names, colour tables, parameter maps, fx-chain
//! vectors): assignment replaces a shared pointer, `lock()` deep-clones once
//! and exposes a mutable reference until the guard drops. Grounded in
//! `original_source/piejam_libs/base/include/piejam/box.h`: equality is
//! **pointer** equality on the backing allocation (`Arc::ptr_eq`), not
//! structural equality, which is what makes subscriber diff-checks
//! O(pointer-compare).

#[cfg(not(feature = "std"))]
use alloc::sync::Arc;
#[cfg(feature = "std")]
use std::sync::Arc;

use core::sync::atomic::{AtomicU32, Ordering};

/// A lock-free, single-writer/many-reader scalar slot.
///
/// The control thread calls [`ValueCell::set`]; any number of audio-thread
/// readers call [`ValueCell::get`]. No lock is ever taken — the value is a
/// plain `AtomicU32` holding the bit pattern of an `f32`.
#[derive(Debug)]
pub struct ValueCell {
    bits: AtomicU32,
}

impl ValueCell {
    /// Creates a cell holding `initial`.
    pub fn new(initial: f32) -> Self {
        Self {
            bits: AtomicU32::new(initial.to_bits()),
        }
    }

    /// Reads the current value with acquire ordering.
    ///
    /// Safe to call from the audio thread; never blocks, never allocates.
    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Writes a new value with release ordering.
    ///
    /// Called from the control thread. Any audio-thread reader's next
    /// `get()` observes the new value.
    #[inline]
    pub fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }
}

/// A cheaply-cloneable handle to a [`ValueCell`], captured by an audio-thread
/// processor when the graph is built.
#[derive(Debug, Clone)]
pub struct SharedRead(Arc<ValueCell>);

impl SharedRead {
    /// Wraps a shared cell as a read handle.
    pub fn new(cell: Arc<ValueCell>) -> Self {
        Self(cell)
    }

    /// Reads the current value (see [`ValueCell::get`]).
    #[inline]
    pub fn get(&self) -> f32 {
        self.0.get()
    }
}

/// A cheaply-cloneable write handle to a [`ValueCell`], captured by an
/// audio-thread processor that itself produces parameter values — e.g. a
/// MIDI CC/parameter-writer processor — rather than only consuming them.
/// This is the same single-writer contract [`ParamStore::set`] uses from the
/// control thread, relaxed to "whichever single processor holds this
/// handle"; the graph builder never hands the same parameter's write handle
/// to two processors at once.
#[derive(Debug, Clone)]
pub struct SharedWrite(Arc<ValueCell>);

impl SharedWrite {
    /// Wraps a shared cell as a write handle.
    pub fn new(cell: Arc<ValueCell>) -> Self {
        Self(cell)
    }

    /// Writes a new value (see [`ValueCell::set`]). Callers are responsible
    /// for clamping to the parameter's declared range first — unlike
    /// [`crate::ParamStore::set`], this bypasses descriptor lookup entirely
    /// so it can run on the audio thread.
    #[inline]
    pub fn set(&self, value: f32) {
        self.0.set(value);
    }
}

/// A copy-on-write wrapper over a shared immutable value.
///
/// Assignment (`*slot = Box::new(v)`) replaces the backing `Arc`; `lock()`
/// deep-clones the current value into a fresh `Arc` up front (not on first
/// mutation — "always-copy-once-per-lock", per the donor's `box<T>::lock()`)
/// and publishes the clone on drop. Equality is pointer equality on the
/// backing allocation, not structural equality — this is the O(pointer
/// compare) diff the store's subscriber API and the §8 "Store" testable
/// property rely on.
#[derive(Debug)]
pub struct Box<T>(Arc<T>);

impl<T> Box<T> {
    /// Wraps a value as a freshly-allocated box.
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Returns `true` if `a` and `b` share the same backing allocation.
    ///
    /// This is the box's equality — see module docs.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl<T> Clone for Box<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> core::ops::Deref for Box<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: PartialEq> PartialEq for Box<T> {
    /// Pointer equality first (the common case: nothing changed), falling
    /// back to structural equality only when the pointers differ — two
    /// independently-constructed boxes with equal contents should still
    /// compare equal for tests and for state snapshots loaded from disk,
    /// even though the store's own diff-check never relies on this path.
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other) || *self.0 == *other.0
    }
}

impl<T> From<T> for Box<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// A write guard produced by [`Box::lock`] (via [`Locked`]).
///
/// Deep-clones `T` on construction; on drop, publishes the clone as the
/// box's new backing pointer. Holding a guard across an `await` point or a
/// long computation is safe (it doesn't block other threads, it just delays
/// publication) but should be kept brief in practice, matching the spec's
/// "held briefly while a reducer mutates an aggregate".
pub struct Locked<'a, T: Clone> {
    target: &'a mut Box<T>,
    value: Option<T>,
}

impl<'a, T: Clone> Locked<'a, T> {
    fn new(target: &'a mut Box<T>) -> Self {
        let value = Some((*target.0).clone());
        Self { target, value }
    }
}

impl<T: Clone> core::ops::Deref for Locked<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value.as_ref().expect("value present until drop")
    }
}

impl<T: Clone> core::ops::DerefMut for Locked<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("value present until drop")
    }
}

impl<T: Clone> Drop for Locked<'_, T> {
    fn drop(&mut self) {
        let published = self.value.take().expect("value present until drop");
        *self.target = Box::new(published);
    }
}

impl<T> Box<T>
where
    T: Clone,
{
    /// Opens a write guard: deep-clones the current value now, and on drop
    /// publishes the clone as the new backing pointer. `BoxedMap`'s
    /// `insert`/`remove`/`assign` are all expressed as
    /// `self.lock().<mutate>()`.
    pub fn lock(&mut self) -> Locked<'_, T> {
        Locked::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_cell_round_trips() {
        let cell = ValueCell::new(1.0);
        assert_eq!(cell.get(), 1.0);
        cell.set(0.25);
        assert_eq!(cell.get(), 0.25);
    }

    #[test]
    fn shared_read_sees_writer_updates() {
        let cell = Arc::new(ValueCell::new(0.0));
        let reader = SharedRead::new(Arc::clone(&cell));
        assert_eq!(reader.get(), 0.0);
        cell.set(42.0);
        assert_eq!(reader.get(), 42.0);
    }

    #[test]
    fn box_pointer_equality_unchanged() {
        let a = Box::new(vec![1, 2, 3]);
        let b = a.clone();
        assert!(Box::ptr_eq(&a, &b));
        assert_eq!(a, b);
    }

    #[test]
    fn box_lock_publishes_new_pointer() {
        let mut a = Box::new(vec![1, 2, 3]);
        let before = a.clone();
        {
            let mut guard = a.lock();
            guard.push(4);
        }
        assert!(!Box::ptr_eq(&a, &before));
        assert_eq!(*a, vec![1, 2, 3, 4]);
    }
}
