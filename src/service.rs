//! Wiring of the button service: startup, steady state, shutdown.
use std::{
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    time::{Duration, Instant},
};

use strum_macros::Display;
use tracing::{error, info, warn};

use crate::{
    bridge::TcpBridge,
    config::{Config, EventSourceConfig},
    error::ToggleError,
    indicator::{Indicator, LogIndicator},
    launcher::{CommandLauncher, Launcher},
    shutdown::{ShutdownCoordinator, ShutdownReport},
    source::{EventSource, StdinSource},
    supervisor::{SlotSupervisor, SupervisorSettings},
};

/// Why the service is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM.
    Signal,
    /// The event source ended on its own.
    SourceClosed,
}

/// Collaborators the service runs with. Production code builds them from the config;
/// tests substitute fakes.
pub struct ServiceParts {
    pub source: Box<dyn EventSource>,
    pub indicator: Arc<dyn Indicator>,
    pub launcher: Arc<dyn Launcher>,
}

/// The running button service.
pub struct Service {
    config: Config,
}

impl Service {
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Connects to the configured event source and runs until SIGINT/SIGTERM or until
    /// the source closes. Returns after the shutdown sweep.
    pub fn run(self) -> Result<ShutdownReport, ToggleError> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel();

        let signal_tx = shutdown_tx.clone();
        ctrlc::set_handler(move || {
            let _ = signal_tx.send(ShutdownReason::Signal);
        })?;

        let parts = self.connect()?;
        run_with(&self.config, parts, shutdown_tx, shutdown_rx)
    }

    fn connect(&self) -> Result<ServiceParts, ToggleError> {
        let launcher: Arc<dyn Launcher> = Arc::new(CommandLauncher::new(
            self.config.launch_table(),
            self.config.working_dir(),
        ));

        match &self.config.event_source {
            EventSourceConfig::Tcp { address } => {
                let bridge = TcpBridge::connect(address)?;
                let bindings = self
                    .config
                    .slots
                    .iter()
                    .map(|slot| slot.uid.trim().to_string())
                    .collect();
                let indicator = bridge.indicator(bindings)?;
                Ok(ServiceParts {
                    source: Box::new(bridge),
                    indicator: Arc::new(indicator),
                    launcher,
                })
            }
            EventSourceConfig::Stdin => Ok(ServiceParts {
                source: Box::new(StdinSource::new()),
                indicator: Arc::new(LogIndicator),
                launcher,
            }),
        }
    }
}

/// Runs the service with explicit collaborators until a [`ShutdownReason`] arrives on
/// `shutdown_rx`. `shutdown_tx` is handed to the event source for its close callback.
pub fn run_with(
    config: &Config,
    parts: ServiceParts,
    shutdown_tx: Sender<ShutdownReason>,
    shutdown_rx: Receiver<ShutdownReason>,
) -> Result<ShutdownReport, ToggleError> {
    let ServiceParts {
        mut source,
        indicator,
        launcher,
    } = parts;

    let settings = SupervisorSettings {
        palette: config.colors,
        grace_period: config.grace_period()?,
    };
    let shutdown = ShutdownCoordinator::new(config.shutdown_timeout()?);

    info!("Starting button service...");
    let mut supervisor = SlotSupervisor::new(
        config.slot_definitions(),
        launcher,
        Arc::clone(&indicator),
        settings,
    );

    let ready = init_slots(&mut supervisor, source.as_mut(), indicator.as_ref(), &settings);
    if ready == 0 {
        let _ = source.disconnect();
        supervisor.release(Instant::now() + Duration::from_secs(1));
        return Err(ToggleError::NoSlots);
    }

    info!("Service running with {ready} button(s)");
    for status in supervisor.statuses() {
        if status.enabled {
            info!("  Slot {} ({}): ready", status.id, status.binding);
        } else {
            info!("  Slot {} ({}): not connected", status.id, status.binding);
        }
    }

    let close_tx = shutdown_tx;
    source.listen(Box::new(move || {
        let _ = close_tx.send(ShutdownReason::SourceClosed);
    }))?;

    let reason = shutdown_rx.recv().unwrap_or(ShutdownReason::Signal);
    info!("Shutting down button service ({reason})");

    Ok(shutdown.run(&mut supervisor, source.as_mut()))
}

/// Paints every slot idle and binds it to the event source. Slots that fail either step
/// are disabled. Returns the number of slots left.
fn init_slots(
    supervisor: &mut SlotSupervisor,
    source: &mut dyn EventSource,
    indicator: &dyn Indicator,
    settings: &SupervisorSettings,
) -> usize {
    let slots: Vec<_> = supervisor.slots().cloned().collect();
    let mut ready = 0;

    for slot in slots {
        let id = slot.id();
        let bound = indicator
            .set_indicator(id, settings.palette.idle)
            .and_then(|()| supervisor.signal_handler(id))
            .and_then(|handler| source.register(id, slot.binding(), handler));

        match bound {
            Ok(()) => {
                info!("Slot {id} (UID: {}) initialized", slot.binding());
                ready += 1;
            }
            Err(err) => {
                let err = match err {
                    err @ ToggleError::SlotInit { .. } => err,
                    other => ToggleError::SlotInit {
                        slot: id,
                        binding: slot.binding().to_string(),
                        reason: other.to_string(),
                    },
                };
                error!("{err}");
                supervisor.disable(id);
            }
        }
    }

    if ready < supervisor.len() {
        warn!("{} slot(s) excluded", supervisor.len() - ready);
    }
    ready
}
