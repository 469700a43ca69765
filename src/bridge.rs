//! TCP bridge to a line-oriented button daemon.
//!
//! Inbound lines are `<uid> <state>` (state `1` press, `0` release). Indicator updates are
//! written back on the same connection as `<uid> <r> <g> <b>`.
use std::{
    io::{BufReader, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    config::SlotId,
    error::ToggleError,
    indicator::{Indicator, Rgb},
    source::{CloseHandler, EventSource, HandlerRegistry, SignalHandler, pump_events},
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection to the button daemon; implements [`EventSource`].
pub struct TcpBridge {
    address: String,
    stream: TcpStream,
    registry: HandlerRegistry,
    disconnected: Arc<AtomicBool>,
}

impl TcpBridge {
    /// Dials `address`, trying every resolved socket address in turn.
    pub fn connect(address: &str) -> Result<Self, ToggleError> {
        let connection_error = |source| ToggleError::Connection {
            address: address.to_string(),
            source,
        };

        let mut last_error = None;
        for candidate in address.to_socket_addrs().map_err(connection_error)? {
            match TcpStream::connect_timeout(&candidate, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    info!("Connected to button daemon at {address} ({candidate})");
                    return Ok(Self {
                        address: address.to_string(),
                        stream,
                        registry: HandlerRegistry::default(),
                        disconnected: Arc::new(AtomicBool::new(false)),
                    });
                }
                Err(err) => {
                    debug!("Connecting to {candidate} failed: {err}");
                    last_error = Some(err);
                }
            }
        }

        Err(connection_error(last_error.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "address resolved to nothing",
            )
        })))
    }

    /// Indicator writing color lines to this connection. `bindings[slot]` is the uid of
    /// each slot.
    pub fn indicator(&self, bindings: Vec<String>) -> Result<BridgeIndicator, ToggleError> {
        let stream = self.stream.try_clone().map_err(|source| ToggleError::Connection {
            address: self.address.clone(),
            source,
        })?;

        Ok(BridgeIndicator {
            writer: Mutex::new(stream),
            bindings,
        })
    }
}

impl EventSource for TcpBridge {
    fn register(
        &mut self,
        slot: SlotId,
        binding: &str,
        handler: SignalHandler,
    ) -> Result<(), ToggleError> {
        self.registry.insert(slot, binding, handler)
    }

    fn listen(&mut self, on_close: CloseHandler) -> Result<(), ToggleError> {
        let stream = self.stream.try_clone().map_err(|source| ToggleError::Connection {
            address: self.address.clone(),
            source,
        })?;
        let registry = self.registry.clone();
        let disconnected = Arc::clone(&self.disconnected);
        let address = self.address.clone();

        thread::spawn(move || {
            if let Err(err) = pump_events(BufReader::new(stream), &registry, &address) {
                if !disconnected.load(Ordering::SeqCst) {
                    warn!("Lost connection to button daemon at {address}: {err}");
                }
            }
            if !disconnected.load(Ordering::SeqCst) {
                warn!("Button daemon at {address} closed the connection");
                on_close();
            }
        });
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ToggleError> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.stream
            .shutdown(Shutdown::Both)
            .map_err(|source| ToggleError::Connection {
                address: self.address.clone(),
                source,
            })?;
        info!("Disconnected from button daemon at {}", self.address);
        Ok(())
    }
}

/// Writes `<uid> <r> <g> <b>` lines back to the button daemon.
pub struct BridgeIndicator {
    writer: Mutex<TcpStream>,
    bindings: Vec<String>,
}

impl Indicator for BridgeIndicator {
    fn set_indicator(&self, slot: SlotId, color: Rgb) -> Result<(), ToggleError> {
        let binding = self
            .bindings
            .get(slot)
            .ok_or(ToggleError::SlotUnavailable(slot))?;

        let line = format!(
            "{binding} {} {} {}\n",
            color.red(),
            color.green(),
            color.blue()
        );
        let mut writer = self.writer.lock()?;
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|source| ToggleError::Indicator { slot, source })?;
        debug!("Slot {slot} ({binding}) set to {color}");
        Ok(())
    }
}
