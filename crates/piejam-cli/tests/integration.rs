//! Integration tests for `piejam-cli`'s binary surface.

use std::process::Command;

use tempfile::TempDir;

fn piejam_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_piejam"))
}

#[test]
fn cli_help_works() {
    let output = piejam_bin().arg("--help").output().expect("failed to run piejam --help");

    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("PieJam audio mixer engine CLI"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("devices"));
    assert!(stdout.contains("session"));
    assert!(stdout.contains("mixer"));
}

#[test]
fn cli_version_works() {
    let output = piejam_bin().arg("--version").output().expect("failed to run piejam --version");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("piejam"));
}

#[test]
fn cli_devices_lists_mock_sound_card_and_midi() {
    let output = piejam_bin().arg("devices").output().expect("failed to run piejam devices");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Sound Card"));
    assert!(stdout.contains("48000"));
    assert!(stdout.contains("MIDI Devices"));
    assert!(stdout.contains("Demo Controller"));
}

#[test]
fn cli_session_init_then_show_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("demo.toml");

    let init = piejam_bin()
        .args(["session", "init", path.to_str().unwrap()])
        .output()
        .expect("failed to run piejam session init");
    assert!(
        init.status.success(),
        "session init failed: {}",
        String::from_utf8_lossy(&init.stderr)
    );
    assert!(path.exists());

    let show = piejam_bin()
        .args(["session", "show", path.to_str().unwrap()])
        .output()
        .expect("failed to run piejam session show");
    assert!(show.status.success());

    let stdout = String::from_utf8_lossy(&show.stdout);
    assert!(stdout.contains("Main"));
    assert!(stdout.contains("Stereo"));
}

#[test]
fn cli_session_init_refuses_to_overwrite_without_force() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("demo.toml");

    piejam_bin()
        .args(["session", "init", path.to_str().unwrap()])
        .output()
        .unwrap();

    let second = piejam_bin()
        .args(["session", "init", path.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(!second.status.success());

    let forced = piejam_bin()
        .args(["session", "init", path.to_str().unwrap(), "--force"])
        .output()
        .unwrap();
    assert!(forced.status.success());
}

#[test]
fn cli_mixer_add_channel_then_show() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("demo.toml");

    piejam_bin()
        .args(["session", "init", path.to_str().unwrap()])
        .output()
        .unwrap();

    let add = piejam_bin()
        .args([
            "mixer",
            "add-channel",
            path.to_str().unwrap(),
            "Guitar",
            "--kind",
            "mono",
        ])
        .output()
        .expect("failed to run piejam mixer add-channel");
    assert!(
        add.status.success(),
        "add-channel failed: {}",
        String::from_utf8_lossy(&add.stderr)
    );

    let show = piejam_bin()
        .args(["mixer", "show", path.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(show.status.success());
    let stdout = String::from_utf8_lossy(&show.stdout);
    assert!(stdout.contains("Guitar"));
    assert!(stdout.contains("Mono"));
}

#[test]
fn cli_mixer_route_then_set_param_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("demo.toml");

    piejam_bin()
        .args(["session", "init", path.to_str().unwrap()])
        .output()
        .unwrap();

    let route = piejam_bin()
        .args([
            "mixer",
            "route",
            path.to_str().unwrap(),
            "0",
            "input",
            "external:3",
        ])
        .output()
        .expect("failed to run piejam mixer route");
    assert!(
        route.status.success(),
        "route failed: {}",
        String::from_utf8_lossy(&route.stderr)
    );

    let set_param = piejam_bin()
        .args(["mixer", "set-param", path.to_str().unwrap(), "0", "volume", "-6"])
        .output()
        .expect("failed to run piejam mixer set-param");
    assert!(set_param.status.success());

    let show = piejam_bin()
        .args(["mixer", "show", path.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(show.status.success());
    let stdout = String::from_utf8_lossy(&show.stdout);
    assert!(stdout.contains("External(3)"));
    assert!(stdout.contains("-6.0"));
}

#[test]
fn cli_mixer_rejects_unknown_channel_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("demo.toml");

    piejam_bin()
        .args(["session", "init", path.to_str().unwrap()])
        .output()
        .unwrap();

    let set_param = piejam_bin()
        .args(["mixer", "set-param", path.to_str().unwrap(), "99", "volume", "0"])
        .output()
        .unwrap();
    assert!(!set_param.status.success());
}

#[test]
fn cli_run_stops_on_its_own_after_n_periods() {
    let output = piejam_bin()
        .args(["run", "--periods", "4"])
        .output()
        .expect("failed to run piejam run");

    assert!(
        output.status.success(),
        "piejam run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Ran 4 period(s)"));
}

#[test]
fn cli_run_with_worker_pool_also_terminates() {
    let output = piejam_bin()
        .args(["run", "--periods", "2", "--workers", "2"])
        .output()
        .expect("failed to run piejam run --workers");

    assert!(
        output.status.success(),
        "piejam run --workers failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("work-stealing pool"));
    assert!(stdout.contains("Ran 2 period(s)"));
}
