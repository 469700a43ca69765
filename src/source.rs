//! Button event sources.
//!
//! The supervisor only depends on [`EventSource`]; hardware adapters implement it.
use std::{
    io::{self, BufRead},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use tracing::{debug, info, warn};

use crate::{config::SlotId, error::ToggleError};

/// Signal value of a press edge.
pub const PRESSED: u8 = 1;
/// Signal value of a release edge.
pub const RELEASED: u8 = 0;

/// Per-slot callback receiving raw signal values.
pub type SignalHandler = Box<dyn Fn(u8) + Send + Sync>;

/// Invoked once when a source stops delivering events on its own (EOF, lost link).
pub type CloseHandler = Box<dyn FnOnce() + Send>;

/// Delivers press/release notifications for registered buttons.
///
/// Registration happens at startup, `listen` starts delivery, and `disconnect` releases
/// the connection at shutdown. Handlers may be called from any thread.
pub trait EventSource: Send {
    /// Binds `handler` to the button identified by `binding`. Failing here excludes the
    /// slot with [`ToggleError::SlotInit`].
    fn register(
        &mut self,
        slot: SlotId,
        binding: &str,
        handler: SignalHandler,
    ) -> Result<(), ToggleError>;

    /// Starts delivering events.
    fn listen(&mut self, on_close: CloseHandler) -> Result<(), ToggleError>;

    /// Releases the connection. Events are no longer delivered afterwards.
    fn disconnect(&mut self) -> Result<(), ToggleError>;
}

struct Registration {
    slot: SlotId,
    binding: String,
    handler: SignalHandler,
}

/// Shared binding table used by the line-oriented adapters.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<Mutex<Vec<Registration>>>,
}

impl HandlerRegistry {
    pub fn insert(
        &self,
        slot: SlotId,
        binding: &str,
        handler: SignalHandler,
    ) -> Result<(), ToggleError> {
        let binding = binding.trim();
        let slot_init = |reason: &str| ToggleError::SlotInit {
            slot,
            binding: binding.to_string(),
            reason: reason.to_string(),
        };

        if binding.is_empty() || binding.contains(char::is_whitespace) {
            return Err(slot_init("binding must be a single non-empty token"));
        }

        let mut registrations = self.inner.lock()?;
        if registrations
            .iter()
            .any(|existing| existing.binding == binding || existing.slot == slot)
        {
            return Err(slot_init("already registered"));
        }

        registrations.push(Registration {
            slot,
            binding: binding.to_string(),
            handler,
        });
        Ok(())
    }

    /// Routes `value` to the handler whose binding is `key`, or whose slot number is
    /// `key`. Returns false when nothing matched.
    pub fn dispatch(&self, key: &str, value: u8) -> bool {
        let Ok(registrations) = self.inner.lock() else {
            warn!("Handler registry is poisoned; dropping event for '{key}'");
            return false;
        };

        let by_binding = registrations.iter().find(|r| r.binding == key);
        let target = by_binding.or_else(|| {
            key.parse::<SlotId>()
                .ok()
                .and_then(|slot| registrations.iter().find(|r| r.slot == slot))
        });

        match target {
            Some(registration) => {
                (registration.handler)(value);
                true
            }
            None => false,
        }
    }

    /// Binding registered for `slot`, if any.
    pub fn binding_for(&self, slot: SlotId) -> Option<String> {
        self.inner
            .lock()
            .ok()?
            .iter()
            .find(|r| r.slot == slot)
            .map(|r| r.binding.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parses `<key> <state>` where state is `0` or `1`.
pub fn parse_event_line(line: &str) -> Option<(&str, u8)> {
    let mut parts = line.split_whitespace();
    let key = parts.next()?;
    let value = match parts.next()? {
        "1" => PRESSED,
        "0" => RELEASED,
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((key, value))
}

/// Reads event lines from `reader` until EOF, dispatching each to `registry`.
///
/// Undecodable bytes only spoil their own line; only EOF or a read error ends the pump.
pub(crate) fn pump_events<R: BufRead>(
    mut reader: R,
    registry: &HandlerRegistry,
    origin: &str,
) -> io::Result<()> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buf);
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match parse_event_line(trimmed) {
            Some((key, value)) => {
                debug!("{origin}: button '{key}' state changed: {value}");
                if !registry.dispatch(key, value) {
                    debug!("{origin}: no slot registered for '{key}'");
                }
            }
            None => warn!("{origin}: ignoring malformed event line '{trimmed}'"),
        }
    }
}

/// Events typed on standard input as `<uid|slot> <state>` lines.
#[derive(Default)]
pub struct StdinSource {
    registry: HandlerRegistry,
    disconnected: Arc<AtomicBool>,
}

impl StdinSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSource for StdinSource {
    fn register(
        &mut self,
        slot: SlotId,
        binding: &str,
        handler: SignalHandler,
    ) -> Result<(), ToggleError> {
        self.registry.insert(slot, binding, handler)
    }

    fn listen(&mut self, on_close: CloseHandler) -> Result<(), ToggleError> {
        let registry = self.registry.clone();
        let disconnected = Arc::clone(&self.disconnected);

        info!("Reading button events from stdin as '<uid> <0|1>' lines");
        thread::spawn(move || {
            let stdin = io::stdin();
            if let Err(err) = pump_events(stdin.lock(), &registry, "stdin") {
                warn!("Reading stdin failed: {err}");
            }
            if !disconnected.load(Ordering::SeqCst) {
                info!("stdin closed");
                on_close();
            }
        });
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ToggleError> {
        // The reader thread stays blocked on stdin; it dies with the process.
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
