#![allow(dead_code)]

use std::{
    fs,
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use sysinfo::{Pid, ProcessesToUpdate, System};
use toggled::{
    indicator::{LogIndicator, Palette},
    launcher::{CommandLauncher, LaunchTable},
    supervisor::{Slot, SlotSupervisor, SupervisorSettings},
};

/// Supervisor running `sh` scripts from `dir`, one slot per program.
pub fn shell_supervisor(dir: &Path, programs: &[&str], grace: Duration) -> SlotSupervisor {
    let launcher = CommandLauncher::new(
        LaunchTable::default().with_interpreter("sh", "sh"),
        dir.to_path_buf(),
    );
    let slots = programs
        .iter()
        .enumerate()
        .map(|(id, program)| Slot::new(id, &format!("uid{id}"), program))
        .collect();

    SlotSupervisor::new(
        slots,
        Arc::new(launcher),
        Arc::new(LogIndicator),
        SupervisorSettings {
            palette: Palette::default(),
            grace_period: grace,
        },
    )
}

pub fn wait_for(description: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() >= deadline {
            panic!("Timed out waiting for {description}");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

pub fn wait_for_pid_file(path: &Path) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = fs::read_to_string(path)
            && let Ok(pid) = content.trim().parse::<u32>()
        {
            return pid;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for a pid in {:?}", path);
        }

        thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(target_os = "linux")]
pub fn wait_for_process_exit(pid: u32) {
    use std::path::PathBuf;

    let deadline = Instant::now() + Duration::from_secs(10);
    let proc_path = PathBuf::from(format!("/proc/{}", pid));
    let stat_path = PathBuf::from(format!("/proc/{}/stat", pid));

    while Instant::now() < deadline {
        if !proc_path.exists() {
            return;
        }

        // Zombies (Z) and dead (X) processes count as exited.
        if let Ok(stat) = fs::read_to_string(&stat_path)
            && let Some(state_start) = stat.rfind(')')
            && let Some(state_char) = stat[state_start + 1..].trim().chars().next()
            && (state_char == 'Z' || state_char == 'X')
        {
            return;
        }

        thread::sleep(Duration::from_millis(100));
    }

    panic!("Timed out waiting for PID {} to exit", pid);
}

pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system.process(Pid::from_u32(pid)).is_some()
}
