//! Strongly-typed, non-recycling opaque identifiers. Every long-lived entity
//! gets its own newtype over a monotonically increasing `u64`, generated by
//! [`IdSequence`]. Grounded in the same pattern the donor uses for
//! `sonido-plugin::chain::SlotId` (a dense, never-recycled handle into a
//! growable collection) generalized to every entity kind §3 names.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw value. Only [`IdSequence`] should normally call
            /// this; exposed for deserializing persisted ids.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// The underlying integer value.
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

opaque_id!(
    /// A mixer channel strip.
    ChannelId
);
opaque_id!(
    /// An fx module instance within a channel's chain.
    FxModuleId
);
opaque_id!(
    /// An external audio device (named sound-card endpoint).
    ExternalDeviceId
);
opaque_id!(
    /// A parameter of any domain.
    ParamEntityId
);
opaque_id!(
    /// An SPSC audio stream (meter/scope feed).
    StreamId
);
opaque_id!(
    /// An interned display string.
    StringId
);
opaque_id!(
    /// An interned UI colour.
    ColorId
);
opaque_id!(
    /// A LADSPA plugin instance.
    LadspaInstanceId
);
opaque_id!(
    /// An internal (built-in) fx processor instance.
    InternalFxId
);
opaque_id!(
    /// A group of channels whose solo state is exclusive with one another.
    SoloGroupId
);

/// Generates never-recycled ids of type `T` for the lifetime of the
/// process.
///
/// One sequence per entity kind, matching distilled §3's "identifiers never
/// recycle while the process is alive" — recycling would let a stale
/// `SharedRead`/processor handle from a previous graph build silently alias
/// a new, unrelated entity.
pub struct IdSequence<T> {
    next: AtomicU64,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> IdSequence<T> {
    /// A sequence starting at id `0`.
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Default for IdSequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: From<u64>> IdSequence<T> {
    /// Allocates the next id in this sequence.
    pub fn next_id(&self) -> T {
        T::from(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

macro_rules! impl_from_raw {
    ($name:ident) => {
        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self::from_raw(raw)
            }
        }
    };
}

impl_from_raw!(ChannelId);
impl_from_raw!(FxModuleId);
impl_from_raw!(ExternalDeviceId);
impl_from_raw!(ParamEntityId);
impl_from_raw!(StreamId);
impl_from_raw!(StringId);
impl_from_raw!(ColorId);
impl_from_raw!(LadspaInstanceId);
impl_from_raw!(InternalFxId);
impl_from_raw!(SoloGroupId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_never_repeats_an_id() {
        let seq: IdSequence<ChannelId> = IdSequence::new();
        let a = seq.next_id();
        let b = seq.next_id();
        assert_ne!(a, b);
        assert_eq!(a.raw() + 1, b.raw());
    }
}
