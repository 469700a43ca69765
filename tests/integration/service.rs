#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    io::{BufRead, BufReader, Write},
    net::TcpListener,
    sync::{Arc, mpsc},
    thread,
};

use common::{is_process_alive, wait_for_pid_file};
use tempfile::tempdir;
use toggled::{
    bridge::TcpBridge,
    config::load_config,
    launcher::CommandLauncher,
    service::{ServiceParts, run_with},
};

fn read_line(reader: &mut impl BufRead) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).expect("daemon read failed");
    line
}

#[test]
fn button_daemon_drives_program_until_it_hangs_up() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    fs::write(dir.join("long.sh"), "echo $$ > running.pid\nexec sleep 30\n").unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let config_path = dir.join("toggled.yaml");
    fs::write(
        &config_path,
        format!(
            r#"version: "1"
event_source:
  kind: tcp
  address: "{address}"
grace_period: "2s"
shutdown_timeout: "10s"
launchers:
  sh: sh
slots:
  - uid: "b0"
    program: "long.sh"
  - uid: "b1"
    program: "other.sh"
"#
        ),
    )
    .unwrap();
    let config = load_config(config_path.to_str()).unwrap();

    let bridge = TcpBridge::connect(&address).unwrap();
    let (daemon, _) = listener.accept().unwrap();
    let parts = ServiceParts {
        indicator: Arc::new(bridge.indicator(vec!["b0".into(), "b1".into()]).unwrap()),
        launcher: Arc::new(CommandLauncher::new(
            config.launch_table(),
            config.working_dir(),
        )),
        source: Box::new(bridge),
    };

    let (tx, rx) = mpsc::channel();
    let service = thread::spawn(move || run_with(&config, parts, tx, rx));

    let mut reader = BufReader::new(daemon.try_clone().unwrap());
    assert_eq!(read_line(&mut reader), "b0 0 0 255\n");
    assert_eq!(read_line(&mut reader), "b1 0 0 255\n");

    let mut writer = daemon;
    writer.write_all(b"b0 1\nb0 0\n").unwrap();
    assert_eq!(read_line(&mut reader), "b0 0 255 255\n");

    let pid = wait_for_pid_file(&dir.join("running.pid"));
    assert!(is_process_alive(pid));

    // Daemon hangs up: the service stops what is running and returns.
    drop(reader);
    drop(writer);
    let report = service.join().unwrap().unwrap();

    assert_eq!(report.stopped, vec![0]);
    assert_eq!(report.idle, vec![1]);
    assert!(report.is_clean());

    #[cfg(target_os = "linux")]
    common::wait_for_process_exit(pid);
    #[cfg(not(target_os = "linux"))]
    common::wait_for("program to exit", || !is_process_alive(pid));
}
