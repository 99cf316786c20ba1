//! Runs the mixer engine against a [`MockSoundCard`] until interrupted,
//! ferrying captured samples into the graph's external-input buffers,
//! running one period of the `Dag`, then ferrying the rendered samples
//! back out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Args;
use piejam_engine::dag::{run_mt, run_st, ThreadContext};
use piejam_engine::{ThreadConfig, WorkerPool};
use piejam_io::soundcard::{HwParams, MockSoundCard, SilentConverter, SoundCard};
use piejam_runtime::ids::ExternalDeviceId;

use super::common::{build_store, default_session};

#[derive(Args)]
pub struct RunArgs {
    /// Session name or path to load (falls back to a single stereo
    /// pass-through channel if omitted)
    #[arg(long)]
    session: Option<String>,

    /// Frames per period
    #[arg(long, default_value_t = HwParams::default().period_frames)]
    buffer_size: u32,

    /// Sample rate to request from the mock sound card
    #[arg(long, default_value_t = HwParams::default().sample_rate)]
    sample_rate: u32,

    /// Mock sound-card channel count (must cover every external device's
    /// width, summed across all routed devices)
    #[arg(long, default_value_t = 8)]
    channels: u16,

    /// Number of periods to run before stopping on its own (0 = run until
    /// Ctrl+C)
    #[arg(long, default_value_t = 0)]
    periods: u64,

    /// Run the graph on a multi-threaded work-stealing pool with this many
    /// worker threads instead of the single-threaded executor
    #[arg(long)]
    workers: Option<usize>,
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let session = match &args.session {
        Some(name) => piejam_config::load_session(&piejam_config::paths::resolve_session_path(name))
            .map_err(|e| anyhow::anyhow!("failed to load session: {e}"))?
            .payload,
        None => default_session(),
    };

    let (_store, shared, _ids) = build_store(&session, args.buffer_size as usize)?;

    let requested = HwParams {
        sample_rate: args.sample_rate,
        period_frames: args.buffer_size,
        channels: args.channels,
    };
    let mut card = MockSoundCard::open("mock://0", requested)
        .map_err(|e| anyhow::anyhow!("failed to open mock sound card: {e}"))?;
    let negotiated = card.hw_params();
    card.set_inputs(
        (0..negotiated.channels)
            .map(|_| Box::new(SilentConverter) as Box<dyn piejam_io::soundcard::Converter>)
            .collect(),
    );
    card.set_outputs(
        (0..negotiated.channels)
            .map(|_| Box::new(SilentConverter) as Box<dyn piejam_io::soundcard::Converter>)
            .collect(),
    );

    println!("Running mixer engine");
    println!("  Sample rate: {} Hz", negotiated.sample_rate);
    println!("  Period size: {} frames", negotiated.period_frames);
    println!("  Channels:    {}", negotiated.channels);
    if let Some(workers) = args.workers {
        println!("  Executor:    work-stealing pool ({workers} workers)");
    } else {
        println!("  Executor:    single-threaded");
    }
    println!("\nPress Ctrl+C to stop...\n");

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\nStopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    let pool = args
        .workers
        .filter(|&n| n > 0)
        .map(|n| WorkerPool::new(n, ThreadConfig::unpinned))
        .transpose()
        .map_err(|e| anyhow::anyhow!("failed to start worker pool: {e}"))?;

    let shared_for_process = shared.clone();
    let ctx = ThreadContext {
        buffer_size: args.buffer_size as usize,
    };
    card.start(
        ThreadConfig::unpinned(0),
        Box::new(|| tracing::debug!("audio thread starting")),
        Box::new(move |ins, outs, frames| {
            let dag = shared_for_process.current();
            let io = shared_for_process.external_io();

            let mut device_ids: Vec<ExternalDeviceId> = io.inputs.keys().copied().collect();
            device_ids.sort_by_key(|d| d.raw());
            let mut card_channel = 0usize;
            for device in device_ids {
                let Some(buffer) = io.inputs.get(&device) else {
                    continue;
                };
                for port in 0..buffer.width() {
                    let mut scratch = vec![0.0f32; frames];
                    if let Some(conv) = ins.get_mut(card_channel) {
                        conv.read(&mut scratch);
                    }
                    buffer.write_channel(port, &scratch);
                    card_channel += 1;
                }
            }

            if let Some(pool) = &pool {
                run_mt(&dag, pool, &ctx);
            } else {
                run_st(&dag, &ctx);
            }

            let mut device_ids: Vec<ExternalDeviceId> = io.outputs.keys().copied().collect();
            device_ids.sort_by_key(|d| d.raw());
            let mut card_channel = 0usize;
            for device in device_ids {
                let Some(buffer) = io.outputs.get(&device) else {
                    continue;
                };
                for port in 0..buffer.width() {
                    let scratch = buffer.read_channel(port);
                    if let Some(conv) = outs.get_mut(card_channel) {
                        conv.write(&scratch);
                    }
                    card_channel += 1;
                }
            }

            shared_for_process.notify_swap_observed();
        }),
    )
    .map_err(|e| anyhow::anyhow!("failed to start mock sound card: {e}"))?;

    let mut period = 0u64;
    while running.load(Ordering::SeqCst) && (args.periods == 0 || period < args.periods) {
        card.tick();
        shared.confirm_swap_observed();
        period += 1;
    }

    card.stop();
    println!("Ran {period} period(s). Done!");
    Ok(())
}
