#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    sync::Arc,
    time::{Duration, Instant},
};

use common::{is_process_alive, shell_supervisor, wait_for, wait_for_pid_file};
use tempfile::tempdir;
use toggled::{
    error::ToggleError,
    indicator::LogIndicator,
    launcher::{CommandLauncher, LaunchTable},
    process::ProcessExit,
    supervisor::{Slot, SlotPhase, SlotSupervisor, StopOutcome, SupervisorSettings},
};

#[test]
fn press_toggles_real_program_and_its_children() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    fs::write(
        dir.join("spawner.sh"),
        "sleep 30 &\necho $! > child.pid\nwait\n",
    )
    .unwrap();

    let supervisor = shell_supervisor(dir, &["spawner.sh"], Duration::from_secs(2));

    supervisor.press(0).unwrap();
    let status = supervisor.status(0).unwrap();
    assert_eq!(status.phase, SlotPhase::Running);
    let pid = status.pid.expect("running slot has a pid");
    let child_pid = wait_for_pid_file(&dir.join("child.pid"));
    assert!(is_process_alive(child_pid));

    supervisor.press(0).unwrap();
    let status = supervisor.status(0).unwrap();
    assert_eq!(status.phase, SlotPhase::Idle);
    assert!(status.pid.is_none());

    #[cfg(target_os = "linux")]
    {
        common::wait_for_process_exit(pid);
        common::wait_for_process_exit(child_pid);
    }
    #[cfg(not(target_os = "linux"))]
    {
        wait_for("program to exit", || !is_process_alive(pid));
        wait_for("child to exit", || !is_process_alive(child_pid));
    }
}

#[test]
fn program_ignoring_sigterm_is_killed_after_grace_period() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    fs::write(
        dir.join("stubborn.sh"),
        "trap '' TERM\nwhile true; do sleep 0.1; done\n",
    )
    .unwrap();

    let grace = Duration::from_millis(300);
    let supervisor = shell_supervisor(dir, &["stubborn.sh"], grace);

    supervisor.press(0).unwrap();
    assert_eq!(supervisor.status(0).unwrap().phase, SlotPhase::Running);
    // Give the shell time to install its trap.
    std::thread::sleep(Duration::from_millis(200));

    let started = Instant::now();
    let outcome = supervisor.stop(0).unwrap();
    assert!(started.elapsed() >= grace);

    match outcome {
        StopOutcome::Stopped(termination) => {
            assert!(termination.forced);
            assert_eq!(termination.exit, ProcessExit::Signaled(libc::SIGKILL));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(supervisor.status(0).unwrap().phase, SlotPhase::Idle);
}

#[test]
fn natural_exit_returns_slot_to_idle() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    fs::write(dir.join("short.sh"), "sleep 0.2\nexit 3\n").unwrap();

    let supervisor = shell_supervisor(dir, &["short.sh"], Duration::from_secs(1));

    supervisor.press(0).unwrap();
    assert_eq!(supervisor.status(0).unwrap().phase, SlotPhase::Running);

    wait_for("slot to return to idle", || {
        supervisor.status(0).unwrap().phase == SlotPhase::Idle
    });
    assert_eq!(supervisor.status(0).unwrap().launches, 1);

    // Stopping an idle slot does nothing.
    assert_eq!(supervisor.stop(0).unwrap(), StopOutcome::AlreadyIdle);
}

#[test]
fn missing_interpreter_leaves_slot_idle() {
    let temp = tempdir().unwrap();
    let launcher = CommandLauncher::new(
        LaunchTable::default().with_default("toggled-missing-interpreter"),
        temp.path().to_path_buf(),
    );
    let supervisor = SlotSupervisor::new(
        vec![Slot::new(0, "uid0", "payload.bin")],
        Arc::new(launcher),
        Arc::new(LogIndicator),
        SupervisorSettings::default(),
    );

    supervisor.press(0).unwrap();
    let status = supervisor.status(0).unwrap();
    assert_eq!(status.phase, SlotPhase::Idle);
    assert_eq!(status.launch_failures, 1);
    assert!(matches!(
        supervisor.press(3),
        Err(ToggleError::SlotUnavailable(3))
    ));
}
