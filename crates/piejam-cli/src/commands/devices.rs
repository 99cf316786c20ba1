//! Device-listing command.
//!
//! There is no general-purpose "enumerate the real sound cards/MIDI ports on
//! this machine" API to call into — `piejam_io::soundcard::SoundCard` and
//! `piejam_io::midi::MidiBackend` are consumed-only interfaces. This command
//! instead shows what a front end would see by negotiating against the
//! demo's `MockSoundCard`/`MockMidiBackend`, which is what `run` actually
//! drives.

use clap::Args;
use piejam_io::midi::{MidiBackend, MockMidiBackend};
use piejam_io::soundcard::{HwParams, MockSoundCard, SoundCard};

#[derive(Args)]
pub struct DevicesArgs {
    /// Sample rate to request when negotiating the mock sound card
    #[arg(long, default_value_t = HwParams::default().sample_rate)]
    sample_rate: u32,

    /// Period size to request when negotiating the mock sound card
    #[arg(long, default_value_t = HwParams::default().period_frames)]
    period_frames: u32,
}

pub fn run(args: DevicesArgs) -> anyhow::Result<()> {
    let requested = HwParams {
        sample_rate: args.sample_rate,
        period_frames: args.period_frames,
        ..HwParams::default()
    };
    let card = MockSoundCard::open("mock://0", requested)
        .map_err(|e| anyhow::anyhow!("failed to open mock sound card: {e}"))?;
    let negotiated = card.hw_params();

    println!("Sound Card");
    println!("==========\n");
    println!("  Device: mock://0 (no real backend; see `piejam run`)");
    println!("  Sample rate:  {} Hz", negotiated.sample_rate);
    println!("  Period size:  {} frames", negotiated.period_frames);
    println!("  Channels:     {}", negotiated.channels);
    println!();
    println!(
        "  Use external:<n> (n = 0..{}) as a channel's route address in `piejam mixer route`.",
        negotiated.channels - 1
    );

    let mut midi = MockMidiBackend::new();
    midi.add_device(piejam_io::midi::MidiDevice {
        client: 14,
        port: 0,
        name: "Demo Controller".to_string(),
    });

    println!("\nMIDI Devices");
    println!("============\n");
    for event in midi.poll(std::time::Duration::ZERO) {
        tracing::trace!(?event, "discarding stray event during device listing");
    }
    println!("  [14:0] Demo Controller (not connected)");

    Ok(())
}
