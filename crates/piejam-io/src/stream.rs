//! Lock-free SPSC ring buffers for meter/scope streaming: a
//! [`StreamProcessor`] copies its single audio input to its single output
//! unchanged while additionally pushing every sample into an `rtrb` ring
//! buffer's producer half, for a GUI meter/scope to read asynchronously off
//! the audio thread. Grounded in `examples/Kajmany-bytebeat`'s own use of
//! `rtrb::Producer<u8>`/ `Consumer<u8>` to hand audio frames from a
//! generator thread to a consumer without locking; generalized here from
//! `u8` to `f32` samples and wired in as a [`piejam_core::Processor`] rather
//! than driven by a bespoke loop.

use piejam_core::processor::{AudioResult, EventPortDescriptor, Processor, ProcessContext};
use rtrb::{Consumer, Producer, RingBuffer};

/// Creates a stream's producer/consumer pair.
///
/// `capacity` should comfortably exceed one period's frame count so the
/// consumer falling a period behind doesn't cause the producer to drop
/// samples.
pub fn channel(capacity: usize) -> (StreamProducer, Consumer<f32>) {
    let (producer, consumer) = RingBuffer::<f32>::new(capacity);
    (StreamProducer(producer), consumer)
}

/// The producer half, wrapped so [`StreamProcessor`] can push without the
/// caller needing to reach into `rtrb` directly.
pub struct StreamProducer(Producer<f32>);

impl StreamProducer {
    /// Pushes `sample`, silently dropping it if the buffer is full
    /// .
    #[inline]
    fn push(&mut self, sample: f32) {
        let _ = self.0.push(sample);
    }
}

/// A pass-through processor that mirrors its single audio input to its
/// single output while also feeding every sample into a [`StreamProducer`]
/// .
pub struct StreamProcessor {
    producer: StreamProducer,
}

impl StreamProcessor {
    /// Wraps `producer` as a processor node wired into a channel's metering
    /// tap point.
    pub fn new(producer: StreamProducer) -> Self {
        Self { producer }
    }
}

impl Processor for StreamProcessor {
    fn type_name(&self) -> &'static str {
        "stream"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn event_inputs(&self) -> &[EventPortDescriptor] {
        &[]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) {
        for &sample in ctx.inputs[0] {
            self.producer.push(sample);
        }
        ctx.outputs[0].copy_from_slice(ctx.inputs[0]);
        ctx.results[0] = AudioResult::Slice;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use piejam_core::processor::{Event, EventArena};

    fn run_one_period(proc: &mut StreamProcessor, input: &[f32]) -> Vec<f32> {
        let mut storage: Vec<u8> = Vec::new();
        let mut arena = EventArena::new(&mut storage);
        let mut out = vec![0.0; input.len()];
        let mut out_refs: Vec<&mut [f32]> = vec![out.as_mut_slice()];
        let mut results = vec![AudioResult::Constant(0.0)];
        let mut no_event_outputs: Vec<&mut Vec<Event>> = Vec::new();
        {
            let mut ctx = ProcessContext {
                inputs: &[input],
                outputs: &mut out_refs,
                results: &mut results,
                event_inputs: &[],
                event_outputs: &mut no_event_outputs,
                event_memory: &mut arena,
                buffer_size: input.len(),
            };
            proc.process(&mut ctx);
        }
        out
    }

    #[test]
    fn passes_audio_through_unchanged() {
        let (producer, _consumer) = channel(16);
        let mut proc = StreamProcessor::new(producer);
        let input = [0.1, 0.2, 0.3];
        assert_eq!(run_one_period(&mut proc, &input), input);
    }

    #[test]
    fn consumer_observes_every_sample_when_capacity_suffices() {
        let (producer, mut consumer) = channel(16);
        let mut proc = StreamProcessor::new(producer);
        run_one_period(&mut proc, &[1.0, 2.0, 3.0]);

        let mut drained = Vec::new();
        while let Ok(sample) = consumer.pop() {
            drained.push(sample);
        }
        assert_eq!(drained, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn a_full_ring_drops_newest_samples_instead_of_blocking() {
        let (producer, consumer) = channel(2);
        let mut proc = StreamProcessor::new(producer);
        let out = run_one_period(&mut proc, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(consumer.slots(), 2);
    }
}
