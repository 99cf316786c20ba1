//! Sound-card/MIDI consumed interfaces and stream/metering ring buffers for
//! the PieJam audio mixer. This crate holds everything the engine treats as
//! an *external collaborator* rather than something it implements itself: -
//! [`soundcard`] — the consumed sound-card interface: open by path,
//! negotiate [`soundcard::HwParams`], `start`/`stop` a process callback
//! invoked once per period on the audio thread. [`soundcard::MockSoundCard`]
//! is the only concrete implementation this crate ships; a real ALSA backend
//! is explicitly out of scope. - [`midi`] — the consumed MIDI interface
//! (device enumeration, CC/pitch- bend events) via the object-safe
//! [`midi::MidiBackend`] trait, plus [`midi::MockMidiBackend`] for tests and
//! the CLI demo. - [`stream`] — the lock-free SPSC ring buffer an in-band
//! [`stream::StreamProcessor`] writes captured audio into during graph
//! evaluation, read asynchronously by GUI meters/scopes.

pub mod midi;
pub mod soundcard;
pub mod stream;

/// Errors this crate's consumed-interface implementations can surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Opening or configuring a sound card failed.
    #[error("sound card error: {0}")]
    SoundCard(String),

    /// A MIDI device operation failed.
    #[error("midi device error: {0}")]
    Midi(String),

    /// The requested device was not found.
    #[error("device not found: {0}")]
    DeviceNotFound(String),
}

/// Convenience result type for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
