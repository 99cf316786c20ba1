//! Session file management: `init`/`show`, built directly on
//! `piejam_config::session`'s generic save/load envelope rather than
//! intercepting store actions — this demo CLI is a one-shot process with no
//! long-running store to persist from.

use clap::Subcommand;
use piejam_config::paths::resolve_session_path;
use piejam_config::{load_session, save_session};

use super::common::{default_session, DemoSession};

#[derive(Subcommand)]
pub enum SessionCommand {
    /// Write a default session file
    Init {
        /// Session name (bare name resolves under the sessions directory) or path
        name: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print a session file's mixer layout
    Show {
        /// Session name or path
        name: String,
    },
}

pub fn run(cmd: SessionCommand) -> anyhow::Result<()> {
    match cmd {
        SessionCommand::Init { name, force } => init(&name, force),
        SessionCommand::Show { name } => show(&name),
    }
}

fn init(name: &str, force: bool) -> anyhow::Result<()> {
    let path = resolve_session_path(name);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    save_session(&path, default_session())
        .map_err(|e| anyhow::anyhow!("failed to save session: {e}"))?;

    println!("Wrote session to {}", path.display());
    Ok(())
}

fn show(name: &str) -> anyhow::Result<()> {
    let path = resolve_session_path(name);
    let session: DemoSession = load_session(&path)
        .map_err(|e| anyhow::anyhow!("failed to load session: {e}"))?
        .payload;

    print_session(&path.display().to_string(), &session);
    Ok(())
}

pub(super) fn print_session(label: &str, session: &DemoSession) {
    println!("Session: {label}");
    println!("========\n");

    if session.channels.is_empty() {
        println!("  (no channels)");
        return;
    }

    for (index, channel) in session.channels.iter().enumerate() {
        println!(
            "  [{index}] {:<16} {:?}  in={:?} out={:?}  vol={:+.1}dB pan={:+.2}{}{}",
            channel.name,
            channel.channel_type,
            channel.input,
            channel.output,
            channel.volume_db,
            channel.pan_balance,
            if channel.mute { " MUTE" } else { "" },
            if channel.solo { " SOLO" } else { "" },
        );
    }
}
