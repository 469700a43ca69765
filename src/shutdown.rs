//! Best-effort teardown on termination requests.
use std::{
    sync::mpsc::RecvTimeoutError,
    time::{Duration, Instant},
};

use tracing::{error, info, warn};

use crate::{
    config::SlotId,
    error::ToggleError,
    source::EventSource,
    supervisor::{SlotSupervisor, StopOutcome},
};

/// What the stop sweep achieved.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Slots whose program was stopped.
    pub stopped: Vec<SlotId>,
    /// Slots that were already idle.
    pub idle: Vec<SlotId>,
    /// Slots whose stop failed; their bookkeeping is idle regardless.
    pub failed: Vec<(SlotId, ToggleError)>,
    /// Slots that had not finished stopping at the deadline.
    pub timed_out: Vec<SlotId>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

/// Stops every running slot and releases the event source, bounded by `timeout`.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownCoordinator {
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Runs the stop sweep, releases the event source and joins the slot workers.
    pub fn run(
        &self,
        supervisor: &mut SlotSupervisor,
        source: &mut dyn EventSource,
    ) -> ShutdownReport {
        info!("Cleaning up...");
        let deadline = Instant::now() + self.timeout;

        let report = self.sweep_until(supervisor, deadline);

        match source.disconnect() {
            Ok(()) => info!("Event source released"),
            Err(err) => warn!("Failed to release event source: {err}"),
        }

        supervisor.release(deadline);

        if report.is_clean() {
            info!("Shutdown complete; stopped {} program(s)", report.stopped.len());
        } else {
            warn!(
                "Shutdown finished with {} failed and {} unfinished stop(s)",
                report.failed.len(),
                report.timed_out.len()
            );
        }
        report
    }

    /// Sends a closing stop to every enabled slot at once, then collects the outcomes.
    /// Slots ignore presses from then on. Individual failures never abort the sweep.
    pub fn sweep(&self, supervisor: &SlotSupervisor) -> ShutdownReport {
        self.sweep_until(supervisor, Instant::now() + self.timeout)
    }

    fn sweep_until(&self, supervisor: &SlotSupervisor, deadline: Instant) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        let pending: Vec<_> = supervisor
            .enabled_slots()
            .into_iter()
            .filter_map(|slot| match supervisor.request_close(slot) {
                Ok(outcome) => Some((slot, outcome)),
                Err(err) => {
                    error!("Failed to request stop for slot {slot}: {err}");
                    report.failed.push((slot, err));
                    None
                }
            })
            .collect();

        for (slot, outcome) in pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match outcome.recv_timeout(remaining) {
                Ok(Ok(StopOutcome::Stopped(_))) => report.stopped.push(slot),
                Ok(Ok(StopOutcome::AlreadyIdle)) => report.idle.push(slot),
                Ok(Err(err)) => {
                    error!("Error stopping program for slot {slot}: {err}");
                    report.failed.push((slot, err));
                }
                Err(RecvTimeoutError::Timeout) => {
                    error!("Slot {slot} did not finish stopping before the shutdown deadline");
                    report.timed_out.push(slot);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    report.failed.push((slot, ToggleError::SlotUnavailable(slot)));
                }
            }
        }

        report
    }
}
