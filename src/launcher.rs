//! Launching bound programs.
use std::{
    collections::HashMap,
    io,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Arc,
};

use tracing::{debug, error};

use crate::{
    config::SlotId,
    error::ToggleError,
    output::{OutputStream, forward_output},
    process::{ChildProcess, ProcessHandle},
};

const DEFAULT_INTERPRETER: &str = "python3";

/// Starts the program bound to a slot.
pub trait Launcher: Send + Sync {
    fn launch(&self, slot: SlotId, program: &str)
    -> Result<Arc<dyn ProcessHandle>, ToggleError>;
}

/// Maps a program's file suffix to the interpreter that runs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTable {
    interpreters: HashMap<String, String>,
    default: String,
}

impl Default for LaunchTable {
    fn default() -> Self {
        let interpreters = [("mp3", "mpg123"), ("py", "python3")]
            .into_iter()
            .map(|(suffix, interpreter)| (suffix.to_string(), interpreter.to_string()))
            .collect();

        Self {
            interpreters,
            default: DEFAULT_INTERPRETER.to_string(),
        }
    }
}

impl LaunchTable {
    /// Adds or replaces the interpreter for `suffix` (with or without leading dot).
    pub fn with_interpreter(mut self, suffix: &str, interpreter: &str) -> Self {
        let suffix = suffix.trim().trim_start_matches('.').to_ascii_lowercase();
        self.interpreters.insert(suffix, interpreter.trim().to_string());
        self
    }

    /// Replaces the interpreter used for unrecognized suffixes.
    pub fn with_default(mut self, interpreter: &str) -> Self {
        self.default = interpreter.trim().to_string();
        self
    }

    /// Builds the argv for `program`: interpreter, target, then any extra arguments.
    pub fn command_for(&self, program: &str) -> io::Result<Vec<String>> {
        let mut parts = program.split_whitespace();
        let target = parts.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "program identifier is empty")
        })?;

        let suffix = Path::new(target)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
        let interpreter = suffix
            .and_then(|suffix| self.interpreters.get(&suffix))
            .unwrap_or(&self.default);

        let mut argv = vec![interpreter.clone(), target.to_string()];
        argv.extend(parts.map(str::to_string));
        Ok(argv)
    }
}

/// Launches programs as attached children with captured output.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    table: LaunchTable,
    working_dir: PathBuf,
}

impl CommandLauncher {
    pub fn new(table: LaunchTable, working_dir: PathBuf) -> Self {
        Self { table, working_dir }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

impl Launcher for CommandLauncher {
    /// Each program gets its own process group so a stop reaches its whole tree.
    ///
    /// On Linux the program also gets `PR_SET_PDEATHSIG(SIGTERM)`. That signal fires when
    /// the *calling thread* exits, not the whole process. Call this from a thread that
    /// outlives the program: slot workers launch, and they only exit after their program
    /// was stopped (`SlotSupervisor::release`) or before it was started
    /// (`SlotSupervisor::disable`).
    fn launch(
        &self,
        slot: SlotId,
        program: &str,
    ) -> Result<Arc<dyn ProcessHandle>, ToggleError> {
        let launch_error = |source| ToggleError::Launch {
            slot,
            program: program.to_string(),
            source,
        };

        let argv = self.table.command_for(program).map_err(launch_error)?;
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Executing command for slot {slot}: {cmd:?}");

        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }

                #[cfg(target_os = "linux")]
                {
                    use libc::{PR_SET_PDEATHSIG, SIGTERM, prctl};
                    if prctl(PR_SET_PDEATHSIG, SIGTERM, 0, 0, 0) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                }

                Ok(())
            });
        }

        match cmd.spawn() {
            Ok(mut child) => {
                debug!("Slot {slot} program started with PID {}", child.id());

                if let Some(out) = child.stdout.take() {
                    forward_output(slot, OutputStream::Stdout, out);
                }
                if let Some(err) = child.stderr.take() {
                    forward_output(slot, OutputStream::Stderr, err);
                }

                Ok(Arc::new(ChildProcess::new(child)))
            }
            Err(e) => {
                error!("Failed to spawn {:?} in {:?}: {e}", argv, self.working_dir);
                Err(launch_error(e))
            }
        }
    }
}
