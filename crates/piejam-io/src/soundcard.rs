//! The consumed sound-card interface: open by path, negotiate [`HwParams`],
//! `start`/`stop` a process callback invoked once per period on the audio
//! thread. Per distilled §1's Non-goals ("a single blocking input/output
//! pair is assumed", "no cross-platform audio backend"), this crate ships no
//! real ALSA binding — only the trait shape and [`MockSoundCard`], a
//! synchronous, hand-driven implementation used by the engine's own tests
//! and the CLI demo to exercise `piejam-engine::orchestrator`'s process step
//! without real hardware.

use piejam_engine::ThreadConfig;

/// Negotiated stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwParams {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per period — the scheduler's `buffer_size` (distilled
    /// GLOSSARY "Period / buffer size").
    pub period_frames: u32,
    /// Sound-card channel count (interleaved channel index space the
    /// `io_map`'s `IoAddress::External` addresses index into).
    pub channels: u16,
}

impl Default for HwParams {
    /// 48 kHz, a 256-frame period, stereo — the donor's own default audio
    /// worker configuration (`ThreadConfig::pinned_realtime`'s sibling
    /// default).
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            period_frames: 256,
            channels: 2,
        }
    }
}

/// One sound-card channel's audio converter. An input converter copies
/// captured samples for its channel into `dst`; an output converter copies
/// `src` into the sound card's playback buffer for its channel.
/// Implementations must be real-time safe: no allocation, no blocking.
pub trait Converter: Send {
    /// Fills `dst` with this period's captured samples for this channel
    /// (input converters only; output converters may leave this a no-op).
    fn read(&mut self, dst: &mut [f32]) {
        dst.fill(0.0);
    }

    /// Writes this period's processed samples for this channel to the
    /// sound card (output converters only; input converters may leave this
    /// a no-op).
    fn write(&mut self, _src: &[f32]) {}
}

/// Runs once on the audio thread's first wake, before any `process_fn`
/// call.
pub type InitFn = Box<dyn FnOnce() + Send>;

/// The per-period process callback.
pub type ProcessFn = Box<dyn FnMut(&mut [Box<dyn Converter>], &mut [Box<dyn Converter>], usize) + Send>;

/// The consumed sound-card interface.
///
/// `open` negotiates [`HwParams`] against what the caller asked for and
/// returns what was actually granted; `start` hands over ownership of the
/// process loop (the real backend would spawn and pin the audio thread via
/// `thread_config` here); `stop` tears it down.
pub trait SoundCard: Send {
    /// Opens the device at `path`, requesting `requested` parameters.
    /// Returns the negotiated parameters, which may differ.
    fn open(path: &str, requested: HwParams) -> crate::Result<Self>
    where
        Self: Sized;

    /// The parameters actually in effect after [`open`](SoundCard::open).
    fn hw_params(&self) -> HwParams;

    /// Starts the process loop: pins/configures the audio thread per
    /// `thread_config`, runs `init_fn` once, then calls `process_fn` once
    /// per period until [`stop`](SoundCard::stop).
    fn start(
        &mut self,
        thread_config: ThreadConfig,
        init_fn: InitFn,
        process_fn: ProcessFn,
    ) -> crate::Result<()>;

    /// Stops the process loop started by [`start`](SoundCard::start).
    fn stop(&mut self);
}

/// A silent converter: reads as zero, discards writes. The default input
/// for a [`MockSoundCard`] channel nothing has wired test data into.
#[derive(Default)]
pub struct SilentConverter;

impl Converter for SilentConverter {}

/// A fixed input buffer replayed once per [`MockSoundCard::tick`] call,
/// for feeding deterministic test/demo samples into the process callback.
pub struct FixedInputConverter {
    samples: Vec<f32>,
}

impl FixedInputConverter {
    /// Replays `samples` verbatim on every `read` call (the caller is
    /// expected to size it to exactly one period).
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }
}

impl Converter for FixedInputConverter {
    fn read(&mut self, dst: &mut [f32]) {
        let n = dst.len().min(self.samples.len());
        dst[..n].copy_from_slice(&self.samples[..n]);
        dst[n..].fill(0.0);
    }
}

/// An output converter that records every period's samples, for assertions
/// in tests and the CLI demo's `compare`/`analyze`-style commands.
#[derive(Default)]
pub struct CapturingOutputConverter {
    captured: Vec<f32>,
}

impl CapturingOutputConverter {
    /// An empty capture buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sample written across every period so far.
    pub fn captured(&self) -> &[f32] {
        &self.captured
    }
}

impl Converter for CapturingOutputConverter {
    fn write(&mut self, src: &[f32]) {
        self.captured.extend_from_slice(src);
    }
}

/// A hand-driven, synchronous [`SoundCard`]: no real audio thread, no
/// blocking I/O. [`MockSoundCard::tick`] runs exactly one period by calling
/// the installed `process_fn` directly on the calling thread, matching the
/// real device's "one `process_fn` invocation per period" contract without
/// needing hardware to drive the cadence.
pub struct MockSoundCard {
    hw_params: HwParams,
    process_fn: Option<ProcessFn>,
    inputs: Vec<Box<dyn Converter>>,
    outputs: Vec<Box<dyn Converter>>,
    running: bool,
}

impl MockSoundCard {
    /// Replaces this card's input converters (one per negotiated input
    /// channel).
    pub fn set_inputs(&mut self, inputs: Vec<Box<dyn Converter>>) {
        self.inputs = inputs;
    }

    /// Replaces this card's output converters (one per negotiated output
    /// channel).
    pub fn set_outputs(&mut self, outputs: Vec<Box<dyn Converter>>) {
        self.outputs = outputs;
    }

    /// Drives exactly one period through the installed `process_fn`.
    /// No-op (and logs) if [`start`](SoundCard::start) hasn't run yet.
    pub fn tick(&mut self) {
        let Some(process_fn) = self.process_fn.as_mut() else {
            tracing::warn!("tick called before start; ignoring");
            return;
        };
        if !self.running {
            return;
        }
        process_fn(
            &mut self.inputs,
            &mut self.outputs,
            self.hw_params.period_frames as usize,
        );
    }
}

impl SoundCard for MockSoundCard {
    fn open(_path: &str, requested: HwParams) -> crate::Result<Self> {
        let channels = requested.channels.max(1);
        Ok(Self {
            hw_params: requested,
            process_fn: None,
            inputs: (0..channels).map(|_| Box::new(SilentConverter) as Box<dyn Converter>).collect(),
            outputs: (0..channels).map(|_| Box::new(SilentConverter) as Box<dyn Converter>).collect(),
            running: false,
        })
    }

    fn hw_params(&self) -> HwParams {
        self.hw_params
    }

    fn start(
        &mut self,
        _thread_config: ThreadConfig,
        init_fn: InitFn,
        process_fn: ProcessFn,
    ) -> crate::Result<()> {
        init_fn();
        self.process_fn = Some(process_fn);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn open_negotiates_requested_params_verbatim() {
        let params = HwParams {
            sample_rate: 44_100,
            period_frames: 128,
            channels: 2,
        };
        let card = MockSoundCard::open("mock://0", params).unwrap();
        assert_eq!(card.hw_params(), params);
    }

    #[test]
    fn tick_before_start_is_a_harmless_no_op() {
        let mut card = MockSoundCard::open("mock://0", HwParams::default()).unwrap();
        card.tick();
    }

    #[test]
    fn init_fn_runs_exactly_once_and_process_fn_once_per_tick() {
        let init_count = Arc::new(AtomicUsize::new(0));
        let process_count = Arc::new(AtomicUsize::new(0));
        let init_clone = Arc::clone(&init_count);
        let process_clone = Arc::clone(&process_count);

        let mut card = MockSoundCard::open("mock://0", HwParams::default()).unwrap();
        card.start(
            ThreadConfig::unpinned(0),
            Box::new(move || {
                init_clone.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(move |_ins, _outs, _frames| {
                process_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        assert_eq!(init_count.load(Ordering::SeqCst), 1);
        card.tick();
        card.tick();
        assert_eq!(process_count.load(Ordering::SeqCst), 2);

        card.stop();
        card.tick();
        assert_eq!(process_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fixed_input_replays_the_same_period_every_tick() {
        let mut dst = vec![0.0; 4];
        let mut conv = FixedInputConverter::new(vec![1.0, 2.0, 3.0, 4.0]);
        conv.read(&mut dst);
        assert_eq!(dst, vec![1.0, 2.0, 3.0, 4.0]);
        dst.fill(0.0);
        conv.read(&mut dst);
        assert_eq!(dst, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn capturing_output_accumulates_across_periods() {
        let mut conv = CapturingOutputConverter::new();
        conv.write(&[1.0, 2.0]);
        conv.write(&[3.0]);
        assert_eq!(conv.captured(), &[1.0, 2.0, 3.0]);
    }
}
