//! Error handling for toggled.
use std::{io, time::Duration};

use thiserror::Error;

use crate::config::SlotId;

/// Defines all possible errors that can occur while supervising button slots.
#[derive(Debug, Error)]
pub enum ToggleError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[from] io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// Configuration parsed but is semantically invalid.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The event source could not be reached. Fatal at startup.
    #[error("Failed to connect to event source at '{address}': {source}")]
    Connection {
        /// Address that was dialed.
        address: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// A single button could not be bound; the slot is excluded.
    #[error("Failed to initialize slot {slot} (UID: {binding}): {reason}")]
    SlotInit {
        /// Slot that failed.
        slot: SlotId,
        /// Hardware identity of the button.
        binding: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Every configured slot failed to initialize.
    #[error("No buttons could be initialized")]
    NoSlots,

    /// The bound program could not be started.
    #[error("Failed to start program '{program}' for slot {slot}: {source}")]
    Launch {
        /// Slot whose program failed.
        slot: SlotId,
        /// Program identifier from the configuration.
        program: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The program ignored the graceful stop request for the whole grace period.
    #[error("Program for slot {slot} did not exit within {grace:?} of the stop request")]
    StopTimeout {
        /// Slot being stopped.
        slot: SlotId,
        /// Grace period that elapsed.
        grace: Duration,
    },

    /// The forced kill or the final wait failed; the process is abandoned.
    #[error("Failed to stop program for slot {slot}: {source}")]
    StopFailure {
        /// Slot being stopped.
        slot: SlotId,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Indicator update failed.
    #[error("Failed to update indicator for slot {slot}: {source}")]
    Indicator {
        /// Slot whose indicator was updated.
        slot: SlotId,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The slot id is out of range or its worker is no longer accepting commands.
    #[error("Slot {0} is not available")]
    SlotUnavailable(SlotId),

    /// Installing the termination handler failed.
    #[error("Failed to install termination handler: {0}")]
    SignalHandler(#[from] ctrlc::Error),

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `ToggleError`.
impl<T> From<std::sync::PoisonError<T>> for ToggleError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ToggleError::MutexPoisonError(err.to_string())
    }
}
