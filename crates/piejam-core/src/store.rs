//! The parameter store: owns one [`ValueCell`] per live [`ParamId`] plus its
//! [`ParamDescriptor`]. A `piejam-runtime` reducer calls
//! [`ParamStore::emplace`] when a mixer channel, fx module or device
//! parameter is created and [`ParamStore::remove`] when it's deleted; the
//! audio thread never touches the store directly — it holds a [`SharedRead`]
//! captured from [`ParamStore::cached`] at graph build time instead.

#[cfg(not(feature = "std"))]
use alloc::sync::Arc;
#[cfg(feature = "std")]
use std::sync::Arc;

use crate::boxed_map::BoxedMap;
use crate::param_info::{ParamDescriptor, ParamId};
use crate::value::{SharedRead, SharedWrite, ValueCell};

struct Slot {
    descriptor: ParamDescriptor,
    cell: Arc<ValueCell>,
}

impl Clone for Slot {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor,
            cell: Arc::clone(&self.cell),
        }
    }
}

/// Owns the value cell and descriptor for every live parameter.
///
/// Backed by a [`BoxedMap`], so a store snapshot compares equal to a
/// previous one in O(1) whenever no parameter was added or removed —
/// exactly the property the store's selector-based subscriber API needs to
/// cheaply skip unaffected listeners.
#[derive(Default, Clone)]
pub struct ParamStore {
    slots: BoxedMap<ParamId, Slot>,
}

impl ParamStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            slots: BoxedMap::new(),
        }
    }

    /// Registers a new parameter, seeding its cell with `descriptor.default`.
    ///
    /// Returns a [`SharedRead`] handle ready to be captured by the
    /// processor that will read this parameter from the audio thread.
    /// Overwrites any existing slot under the same id.
    pub fn emplace(&mut self, descriptor: ParamDescriptor) -> SharedRead {
        let cell = Arc::new(ValueCell::new(descriptor.default));
        let handle = SharedRead::new(Arc::clone(&cell));
        self.slots.insert(descriptor.id, Slot { descriptor, cell });
        handle
    }

    /// Removes a parameter. Any [`SharedRead`] handles already captured by
    /// the audio thread keep working (they hold their own `Arc`) — they
    /// simply become orphaned once the compiled graph that used them is
    /// swapped out.
    pub fn remove(&mut self, id: ParamId) -> bool {
        self.slots.remove(&id).is_some()
    }

    /// Looks up a parameter's descriptor.
    pub fn find(&self, id: ParamId) -> Option<&ParamDescriptor> {
        self.slots.get(&id).map(|slot| &slot.descriptor)
    }

    /// Reads a parameter's current value, clamped to its declared range.
    pub fn at(&self, id: ParamId) -> Option<f32> {
        self.slots.get(&id).map(|slot| slot.cell.get())
    }

    /// Writes a parameter's value from the control thread.
    ///
    /// The value is clamped to the descriptor's `[min, max]` range before
    /// being published. Returns `false` if `id` isn't registered.
    pub fn set(&mut self, id: ParamId, value: f32) -> bool {
        match self.slots.get(&id) {
            Some(slot) => {
                slot.cell.set(slot.descriptor.clamp(value));
                true
            }
            None => false,
        }
    }

    /// Captures a cheaply-cloneable read handle for a registered parameter,
    /// for a processor to hold across the compiled graph's lifetime.
    pub fn cached(&self, id: ParamId) -> Option<SharedRead> {
        self.slots
            .get(&id)
            .map(|slot| SharedRead::new(Arc::clone(&slot.cell)))
    }

    /// Captures a write handle for a registered parameter, for a
    /// MIDI/event-driven processor that writes this parameter's value
    /// directly from the audio thread.
    pub fn cached_write(&self, id: ParamId) -> Option<SharedWrite> {
        self.slots
            .get(&id)
            .map(|slot| SharedWrite::new(Arc::clone(&slot.cell)))
    }

    /// Number of registered parameters.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no parameters are registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
