//! The consumed MIDI interface and the wire-level event shape it delivers,
//! upstream of `piejam-runtime::midi`'s domain types (a learned assignment's
//! *meaning*, not how the bytes arrived). No direct donor-crate analogue —
//! the donor workspace has no MIDI code — so the shapes below follow the
//! distilled spec's own prose: `update_devices` returning added/removed
//! devices, `connect_input`/`disconnect_input` by `(client, port)`, and
//! events carrying `{client,port,channel,cc_id,value}` time-stamped with a
//! monotonic clock.

use std::time::Instant;

/// A control this crate can report: a continuous controller or pitch bend.
///
/// `piejam-runtime::midi::CcId` only models continuous controllers (the
/// learn/assign pipeline's own simplification, recorded in
/// `SPEC_FULL.md`); this wire-level type keeps pitch bend distinguishable
/// up to the point a converter decides whether to fold it into a learnable
/// CC-shaped event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawControl {
    /// A continuous-controller number, `0..=127`.
    ControlChange(u8),
    /// The channel pitch-bend wheel.
    PitchBend,
}

/// One MIDI device, as reported by [`MidiBackend::update_devices`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiDevice {
    /// The sequencer client id this device lives on.
    pub client: u32,
    /// The port number within that client.
    pub port: u32,
    /// Human-readable device name, for GUI device pickers.
    pub name: String,
}

/// A device topology change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiDeviceEvent {
    /// A device became available.
    Added(MidiDevice),
    /// A previously available device disappeared.
    Removed(MidiDevice),
}

/// One incoming MIDI control message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiEvent {
    /// The sequencer client this event arrived from.
    pub client: u32,
    /// The port within that client.
    pub port: u32,
    /// MIDI channel, `0..=15`.
    pub channel: u8,
    /// Which control changed.
    pub control: RawControl,
    /// Raw control value: `0..=127` for a CC, `-8192..=8191` for pitch bend.
    pub value: i32,
    /// Monotonic capture time, for ordering events that arrive faster than
    /// they're drained.
    pub timestamp: Instant,
}

impl MidiEvent {
    /// This event's value normalized to `[0.0, 1.0]` for a CC or
    /// `[-1.0, 1.0]` for pitch bend, the shape a parameter-writer processor
    /// consumes.
    pub fn normalized_value(&self) -> f32 {
        match self.control {
            RawControl::ControlChange(_) => (self.value as f32 / 127.0).clamp(0.0, 1.0),
            RawControl::PitchBend => (self.value as f32 / 8192.0).clamp(-1.0, 1.0),
        }
    }
}

/// The consumed MIDI backend interface. Object-safe, mirroring the donor's
/// own pluggable-backend idiom (a small trait, boxed where type erasure is
/// needed) so a real ALSA sequencer backend could be dropped in later
/// without touching any caller — but per distilled §1's Non-goals, no such
/// backend is implemented here.
pub trait MidiBackend: Send {
    /// Polls for device topology changes since the last call.
    fn update_devices(&mut self) -> Vec<MidiDeviceEvent>;

    /// Starts listening to `(client, port)`'s input.
    fn connect_input(&mut self, client: u32, port: u32) -> crate::Result<()>;

    /// Stops listening to `(client, port)`'s input.
    fn disconnect_input(&mut self, client: u32, port: u32) -> crate::Result<()>;

    /// Blocks for up to `timeout` waiting for at least one event, returning
    /// whatever arrived (possibly empty on timeout) — distilled §5 "MIDI
    /// poll uses a short timeout (≈100 ms) so the thread notices stop
    /// requests promptly".
    fn poll(&mut self, timeout: std::time::Duration) -> Vec<MidiEvent>;
}

/// A deterministic, in-memory [`MidiBackend`] for tests and the CLI demo.
///
/// Events are injected with [`MockMidiBackend::inject`]; [`poll`] drains
/// whatever has been injected so far and never actually blocks, since
/// there is no real device to wait on.
#[derive(Default)]
pub struct MockMidiBackend {
    devices: Vec<MidiDevice>,
    connected: std::collections::HashSet<(u32, u32)>,
    pending_device_events: Vec<MidiDeviceEvent>,
    pending_midi_events: std::collections::VecDeque<MidiEvent>,
}

impl MockMidiBackend {
    /// An empty mock backend with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a device visible to the next [`update_devices`](MidiBackend::update_devices)
    /// call.
    pub fn add_device(&mut self, device: MidiDevice) {
        self.pending_device_events
            .push(MidiDeviceEvent::Added(device.clone()));
        self.devices.push(device);
    }

    /// Removes a previously added device.
    pub fn remove_device(&mut self, client: u32, port: u32) {
        if let Some(pos) = self
            .devices
            .iter()
            .position(|d| d.client == client && d.port == port)
        {
            let device = self.devices.remove(pos);
            self.pending_device_events
                .push(MidiDeviceEvent::Removed(device));
        }
    }

    /// Queues an event for the next [`poll`](MidiBackend::poll) call,
    /// stamping it with the current monotonic time.
    pub fn inject(&mut self, client: u32, port: u32, channel: u8, control: RawControl, value: i32) {
        self.pending_midi_events.push_back(MidiEvent {
            client,
            port,
            channel,
            control,
            value,
            timestamp: Instant::now(),
        });
    }

    /// Whether `(client, port)` is currently connected.
    pub fn is_connected(&self, client: u32, port: u32) -> bool {
        self.connected.contains(&(client, port))
    }
}

impl MidiBackend for MockMidiBackend {
    fn update_devices(&mut self) -> Vec<MidiDeviceEvent> {
        std::mem::take(&mut self.pending_device_events)
    }

    fn connect_input(&mut self, client: u32, port: u32) -> crate::Result<()> {
        if !self.devices.iter().any(|d| d.client == client && d.port == port) {
            return Err(crate::Error::DeviceNotFound(format!("{client}:{port}")));
        }
        self.connected.insert((client, port));
        Ok(())
    }

    fn disconnect_input(&mut self, client: u32, port: u32) -> crate::Result<()> {
        self.connected.remove(&(client, port));
        Ok(())
    }

    fn poll(&mut self, _timeout: std::time::Duration) -> Vec<MidiEvent> {
        self.pending_midi_events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(client: u32, port: u32) -> MidiDevice {
        MidiDevice {
            client,
            port,
            name: format!("mock {client}:{port}"),
        }
    }

    #[test]
    fn added_device_is_reported_once() {
        let mut backend = MockMidiBackend::new();
        backend.add_device(device(1, 0));
        let events = backend.update_devices();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], MidiDeviceEvent::Added(d) if d.client == 1));
        assert!(backend.update_devices().is_empty());
    }

    #[test]
    fn connect_requires_a_known_device() {
        let mut backend = MockMidiBackend::new();
        assert!(backend.connect_input(1, 0).is_err());
        backend.add_device(device(1, 0));
        assert!(backend.connect_input(1, 0).is_ok());
        assert!(backend.is_connected(1, 0));
    }

    #[test]
    fn injected_events_drain_on_poll() {
        let mut backend = MockMidiBackend::new();
        backend.inject(1, 0, 0, RawControl::ControlChange(7), 64);
        let events = backend.poll(std::time::Duration::from_millis(100));
        assert_eq!(events.len(), 1);
        assert!((events[0].normalized_value() - 64.0 / 127.0).abs() < 1e-6);
        assert!(backend.poll(std::time::Duration::from_millis(100)).is_empty());
    }

    #[test]
    fn pitch_bend_normalizes_to_bipolar_range() {
        let mut backend = MockMidiBackend::new();
        backend.inject(1, 0, 0, RawControl::PitchBend, -8192);
        let events = backend.poll(std::time::Duration::from_millis(0));
        assert_eq!(events[0].normalized_value(), -1.0);
    }
}
