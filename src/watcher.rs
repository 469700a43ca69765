//! Per-episode exit watchers.
use std::{
    sync::{Arc, mpsc::Sender},
    thread,
};

use tracing::{debug, error};

use crate::{config::SlotId, process::ProcessHandle, supervisor::SlotCommand};

/// Spawns the watcher for one running episode.
///
/// The watcher blocks until the program exits and then posts exactly one
/// [`SlotCommand::Exited`] to the slot's mailbox. It never touches slot state itself; the
/// slot worker decides whether the notification still applies.
pub(crate) fn spawn_watcher(
    slot: SlotId,
    episode: u64,
    handle: Arc<dyn ProcessHandle>,
    mailbox: Sender<SlotCommand>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || match handle.wait() {
        Ok(exit) => {
            debug!(
                "Watcher for slot {slot} episode {episode} saw PID {} exit with {exit}",
                handle.id()
            );
            if mailbox.send(SlotCommand::Exited { episode, exit }).is_err() {
                debug!("Slot {slot} worker is gone; dropping exit notification");
            }
        }
        Err(err) => {
            error!(
                "Error monitoring process {} for slot {slot}: {err}",
                handle.id()
            );
        }
    })
}
