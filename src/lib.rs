//! toggled turns illuminated push buttons into on/off switches for programs. Each button
//! is bound to one program: a press starts it, the next press stops it, and the button's
//! light shows whether the program is running. Programs that exit on their own return
//! their button to idle.

/// TCP bridge to the button daemon.
pub mod bridge;

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Error handling.
pub mod error;

/// Indicator colors and drivers.
pub mod indicator;

/// Program launching.
pub mod launcher;

/// Forwarding of program output to the log.
pub mod output;

/// Process handles and the stop sequence.
pub mod process;

/// Service wiring.
pub mod service;

/// Shutdown coordination.
pub mod shutdown;

/// Event sources.
pub mod source;

/// Per-slot supervision.
pub mod supervisor;

mod watcher;
