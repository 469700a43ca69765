//! Indicator colors and the driver seam used to display slot state.
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{config::SlotId, error::ToggleError};

/// An RGB color with 8-bit channels. Deserializes from `[r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLUE: Rgb = Rgb(0, 0, 255);
    pub const CYAN: Rgb = Rgb(0, 255, 255);

    pub fn red(&self) -> u8 {
        self.0
    }

    pub fn green(&self) -> u8 {
        self.1
    }

    pub fn blue(&self) -> u8 {
        self.2
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

/// Colors shown for each externally visible slot phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    /// Color while no program runs.
    #[serde(default = "default_idle")]
    pub idle: Rgb,
    /// Color while the bound program runs.
    #[serde(default = "default_running")]
    pub running: Rgb,
}

fn default_idle() -> Rgb {
    Rgb::BLUE
}

fn default_running() -> Rgb {
    Rgb::CYAN
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            idle: default_idle(),
            running: default_running(),
        }
    }
}

/// Drives the light of a button. Implementations must be cheap and non-blocking; callers
/// log failures and carry on.
pub trait Indicator: Send + Sync {
    fn set_indicator(&self, slot: SlotId, color: Rgb) -> Result<(), ToggleError>;
}

/// Indicator that only reports color changes through the log. Used when no hardware
/// bridge is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIndicator;

impl Indicator for LogIndicator {
    fn set_indicator(&self, slot: SlotId, color: Rgb) -> Result<(), ToggleError> {
        info!(slot, %color, "Indicator changed");
        Ok(())
    }
}
