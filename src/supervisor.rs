//! Slot supervision: the per-button toggle state machine.
//!
//! Every slot is owned by a dedicated worker thread that consumes a mailbox of
//! [`SlotCommand`]s. Press events, exit notifications from watchers, and stop requests
//! from the shutdown sweep all go through that mailbox, so transitions for one slot are
//! totally ordered while unrelated slots never contend.
use std::{
    mem,
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tracing::{debug, error, info, warn};

use crate::{
    config::SlotId,
    error::ToggleError,
    indicator::{Indicator, Palette, Rgb},
    launcher::Launcher,
    process::{self, ProcessExit, ProcessHandle, Termination},
    source::{PRESSED, SignalHandler},
    watcher,
};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One button and the program it toggles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    id: SlotId,
    binding: String,
    program: String,
}

impl Slot {
    pub fn new(id: SlotId, binding: &str, program: &str) -> Self {
        Self {
            id,
            binding: binding.trim().to_string(),
            program: program.trim().to_string(),
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Hardware identity of the button.
    pub fn binding(&self) -> &str {
        &self.binding
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

/// Externally visible phase of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SlotPhase {
    Idle,
    Running,
}

/// Point-in-time view of a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub id: SlotId,
    pub binding: String,
    pub program: String,
    pub phase: SlotPhase,
    /// PID of the tracked program; present iff `phase` is running.
    pub pid: Option<u32>,
    /// Number of successful launches so far.
    pub launches: u64,
    /// Number of failed launch attempts so far.
    pub launch_failures: u64,
    /// False when the slot was excluded at startup.
    pub enabled: bool,
}

/// What a stop request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    AlreadyIdle,
    /// A program was stopped.
    Stopped(Termination),
}

pub type StopResult = Result<StopOutcome, ToggleError>;

/// Messages processed by a slot worker, in arrival order.
#[derive(Debug)]
pub(crate) enum SlotCommand {
    /// Press edge, stamped when the event source delivered it.
    Press { received: Instant },
    /// A watcher saw the program of `episode` exit.
    Exited { episode: u64, exit: ProcessExit },
    /// Synchronous stop. With `closing` set the slot ignores every later press.
    Stop {
        reply: Sender<StopResult>,
        closing: bool,
    },
    Status { reply: Sender<SlotStatus> },
    Terminate,
}

/// Tunables shared by all slot workers.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub palette: Palette,
    pub grace_period: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            palette: Palette::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

#[derive(Debug)]
struct RunningProcess {
    handle: Arc<dyn ProcessHandle>,
    episode: u64,
    started_at: Instant,
}

/// The handle lives inside `Running`, so "running iff a handle is owned" holds by
/// construction.
#[derive(Debug)]
enum SlotState {
    Idle,
    Running(RunningProcess),
}

struct SlotWorker {
    slot: Slot,
    state: SlotState,
    launches: u64,
    launch_failures: u64,
    /// When the last stop sequence finished; presses received earlier are stale.
    last_stop: Option<Instant>,
    /// Set by the shutdown sweep; no program is launched afterwards.
    closing: bool,
    launcher: Arc<dyn Launcher>,
    indicator: Arc<dyn Indicator>,
    settings: SupervisorSettings,
    mailbox: Sender<SlotCommand>,
    inbox: Receiver<SlotCommand>,
}

impl SlotWorker {
    fn run(mut self) {
        debug!("Slot {} worker started", self.slot.id);
        while let Ok(command) = self.inbox.recv() {
            match command {
                SlotCommand::Press { received } => self.on_press(received),
                SlotCommand::Exited { episode, exit } => self.on_exit(episode, exit),
                SlotCommand::Stop { reply, closing } => {
                    self.closing |= closing;
                    let result = self.stop();
                    let _ = reply.send(result);
                }
                SlotCommand::Status { reply } => {
                    let _ = reply.send(self.status());
                }
                SlotCommand::Terminate => break,
            }
        }
        debug!("Slot {} worker finished", self.slot.id);
    }

    fn on_press(&mut self, received: Instant) {
        if self.closing {
            debug!("Slot {} is shutting down; press ignored", self.slot.id);
            return;
        }

        if let Some(stopped_at) = self.last_stop
            && received <= stopped_at
        {
            debug!(
                "Slot {} ignoring press delivered while its program was stopping",
                self.slot.id
            );
            return;
        }

        match self.state {
            SlotState::Idle => self.start(),
            SlotState::Running(_) => {
                // Failures are already logged and the slot is idle either way.
                let _ = self.stop();
            }
        }
    }

    fn start(&mut self) {
        let id = self.slot.id;
        info!("Starting program for slot {id}: {}", self.slot.program);

        let handle = match self.launcher.launch(id, &self.slot.program) {
            Ok(handle) => handle,
            Err(err) => {
                self.launch_failures += 1;
                error!("{err}");
                return;
            }
        };

        self.launches += 1;
        let episode = self.launches;
        info!("Slot {id} program running with PID {}", handle.id());

        self.state = SlotState::Running(RunningProcess {
            handle: Arc::clone(&handle),
            episode,
            started_at: Instant::now(),
        });
        self.paint(self.settings.palette.running);
        watcher::spawn_watcher(id, episode, handle, self.mailbox.clone());
    }

    /// Manual stop path. Bookkeeping returns to idle even if the kill fails; the
    /// program is then abandoned rather than tracked further.
    fn stop(&mut self) -> StopResult {
        let SlotState::Running(running) = mem::replace(&mut self.state, SlotState::Idle)
        else {
            return Ok(StopOutcome::AlreadyIdle);
        };

        let id = self.slot.id;
        let pid = running.handle.id();
        info!("Stopping program for slot {id} (PID {pid})");

        let result = process::terminate(id, running.handle.as_ref(), self.settings.grace_period);
        self.last_stop = Some(Instant::now());
        self.paint(self.settings.palette.idle);

        match result {
            Ok(termination) => {
                info!(
                    "Slot {id} program stopped with {} after {:?}{}",
                    termination.exit,
                    running.started_at.elapsed(),
                    if termination.forced { " (killed)" } else { "" }
                );
                Ok(StopOutcome::Stopped(termination))
            }
            Err(err) => {
                error!("{err}; no longer tracking PID {pid}");
                Err(err)
            }
        }
    }

    fn on_exit(&mut self, episode: u64, exit: ProcessExit) {
        let id = self.slot.id;
        match &self.state {
            SlotState::Running(running) if running.episode == episode => {
                info!(
                    "Program for slot {id} finished with {exit} after {:?}",
                    running.started_at.elapsed()
                );
                self.state = SlotState::Idle;
                self.paint(self.settings.palette.idle);
            }
            _ => debug!("Slot {id} already reconciled the exit of episode {episode}"),
        }
    }

    fn paint(&self, color: Rgb) {
        if let Err(err) = self.indicator.set_indicator(self.slot.id, color) {
            warn!("{err}");
        }
    }

    fn status(&self) -> SlotStatus {
        let (phase, pid) = match &self.state {
            SlotState::Idle => (SlotPhase::Idle, None),
            SlotState::Running(running) => (SlotPhase::Running, Some(running.handle.id())),
        };

        SlotStatus {
            id: self.slot.id,
            binding: self.slot.binding.clone(),
            program: self.slot.program.clone(),
            phase,
            pid,
            launches: self.launches,
            launch_failures: self.launch_failures,
            enabled: true,
        }
    }
}

struct SlotEntry {
    slot: Slot,
    mailbox: Option<Sender<SlotCommand>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SlotEntry {
    fn disabled_status(&self) -> SlotStatus {
        SlotStatus {
            id: self.slot.id,
            binding: self.slot.binding.clone(),
            program: self.slot.program.clone(),
            phase: SlotPhase::Idle,
            pid: None,
            launches: 0,
            launch_failures: 0,
            enabled: false,
        }
    }
}

/// Owns one worker per slot, indexed by slot id.
pub struct SlotSupervisor {
    slots: Vec<SlotEntry>,
}

impl SlotSupervisor {
    /// Spawns a worker for every slot. Slot ids must equal their index.
    pub fn new(
        slots: Vec<Slot>,
        launcher: Arc<dyn Launcher>,
        indicator: Arc<dyn Indicator>,
        settings: SupervisorSettings,
    ) -> Self {
        let slots = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                debug_assert_eq!(index, slot.id, "slot ids must be dense and ordered");
                let (mailbox, inbox) = mpsc::channel();
                let worker = SlotWorker {
                    slot: slot.clone(),
                    state: SlotState::Idle,
                    launches: 0,
                    launch_failures: 0,
                    last_stop: None,
                    closing: false,
                    launcher: Arc::clone(&launcher),
                    indicator: Arc::clone(&indicator),
                    settings,
                    mailbox: mailbox.clone(),
                    inbox,
                };

                SlotEntry {
                    slot,
                    mailbox: Some(mailbox),
                    worker: Some(thread::spawn(move || worker.run())),
                }
            })
            .collect();

        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().map(|entry| &entry.slot)
    }

    /// Ids of slots that still have a worker.
    pub fn enabled_slots(&self) -> Vec<SlotId> {
        self.slots
            .iter()
            .filter(|entry| entry.mailbox.is_some())
            .map(|entry| entry.slot.id)
            .collect()
    }

    fn mailbox(&self, slot: SlotId) -> Result<&Sender<SlotCommand>, ToggleError> {
        self.slots
            .get(slot)
            .and_then(|entry| entry.mailbox.as_ref())
            .ok_or(ToggleError::SlotUnavailable(slot))
    }

    fn send(&self, slot: SlotId, command: SlotCommand) -> Result<(), ToggleError> {
        self.mailbox(slot)?
            .send(command)
            .map_err(|_| ToggleError::SlotUnavailable(slot))
    }

    /// Callback for the event source. Only the press edge reaches the worker.
    pub fn signal_handler(&self, slot: SlotId) -> Result<SignalHandler, ToggleError> {
        let mailbox = self.mailbox(slot)?.clone();
        Ok(Box::new(move |value| {
            if value != PRESSED {
                debug!("Slot {slot} release ignored");
                return;
            }
            let press = SlotCommand::Press {
                received: Instant::now(),
            };
            if mailbox.send(press).is_err() {
                debug!("Slot {slot} is no longer accepting presses");
            }
        }))
    }

    /// Feeds a raw signal value (1 press, 0 release) for `slot`.
    pub fn handle_signal(&self, slot: SlotId, value: u8) -> Result<(), ToggleError> {
        if value != PRESSED {
            debug!("Slot {slot} release ignored");
            self.mailbox(slot)?;
            return Ok(());
        }
        self.press(slot)
    }

    /// Toggles `slot`. Returns once the press is queued.
    pub fn press(&self, slot: SlotId) -> Result<(), ToggleError> {
        self.send(
            slot,
            SlotCommand::Press {
                received: Instant::now(),
            },
        )
    }

    /// Queues a stop and returns the channel its outcome will arrive on.
    pub fn request_stop(&self, slot: SlotId) -> Result<Receiver<StopResult>, ToggleError> {
        self.queue_stop(slot, false)
    }

    /// Like [`request_stop`](Self::request_stop), but the slot ignores every press
    /// handled after it. Used by the shutdown sweep.
    pub fn request_close(&self, slot: SlotId) -> Result<Receiver<StopResult>, ToggleError> {
        self.queue_stop(slot, true)
    }

    fn queue_stop(
        &self,
        slot: SlotId,
        closing: bool,
    ) -> Result<Receiver<StopResult>, ToggleError> {
        let (reply, outcome) = mpsc::channel();
        self.send(slot, SlotCommand::Stop { reply, closing })?;
        Ok(outcome)
    }

    /// Stops `slot` and waits for the stop sequence to finish.
    pub fn stop(&self, slot: SlotId) -> StopResult {
        self.request_stop(slot)?
            .recv()
            .map_err(|_| ToggleError::SlotUnavailable(slot))?
    }

    /// Status after every previously queued command for `slot` was processed.
    pub fn status(&self, slot: SlotId) -> Result<SlotStatus, ToggleError> {
        let entry = self
            .slots
            .get(slot)
            .ok_or(ToggleError::SlotUnavailable(slot))?;
        let Some(mailbox) = entry.mailbox.as_ref() else {
            return Ok(entry.disabled_status());
        };

        let (reply, status) = mpsc::channel();
        mailbox
            .send(SlotCommand::Status { reply })
            .map_err(|_| ToggleError::SlotUnavailable(slot))?;
        status.recv().map_err(|_| ToggleError::SlotUnavailable(slot))
    }

    pub fn statuses(&self) -> Vec<SlotStatus> {
        self.slots
            .iter()
            .filter_map(|entry| match self.status(entry.slot.id) {
                Ok(status) => Some(status),
                Err(err) => {
                    warn!("{err}");
                    None
                }
            })
            .collect()
    }

    /// Excludes `slot` (e.g. its button failed to initialize). Intended for startup,
    /// while the slot is idle.
    pub fn disable(&mut self, slot: SlotId) {
        let Some(entry) = self.slots.get_mut(slot) else {
            return;
        };

        if let Some(mailbox) = entry.mailbox.take() {
            let _ = mailbox.send(SlotCommand::Terminate);
        }
        if let Some(worker) = entry.worker.take()
            && worker.join().is_err()
        {
            error!("Slot {slot} worker panicked");
        }
        debug!("Slot {slot} disabled");
    }

    /// Terminates every worker, joining those that finish before `deadline`. Workers
    /// still inside a stop sequence at the deadline are detached.
    pub fn release(&mut self, deadline: Instant) {
        for entry in &mut self.slots {
            if let Some(mailbox) = entry.mailbox.take() {
                let _ = mailbox.send(SlotCommand::Terminate);
            }
        }

        for entry in &mut self.slots {
            let Some(worker) = entry.worker.take() else {
                continue;
            };

            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL_INTERVAL);
            }

            if worker.is_finished() {
                if worker.join().is_err() {
                    error!("Slot {} worker panicked", entry.slot.id);
                }
            } else {
                warn!(
                    "Slot {} worker still busy at the shutdown deadline; detaching",
                    entry.slot.id
                );
            }
        }
    }
}

impl Drop for SlotSupervisor {
    fn drop(&mut self) {
        for entry in &mut self.slots {
            if let Some(mailbox) = entry.mailbox.take() {
                let _ = mailbox.send(SlotCommand::Terminate);
            }
        }
    }
}
