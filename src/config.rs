//! Configuration management for toggled.
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::{HashMap, HashSet},
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    error::ToggleError, indicator::Palette, launcher::LaunchTable, supervisor::Slot,
};

/// Index of a slot, assigned from its position in the configuration.
pub type SlotId = usize;

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_EVENT_ADDRESS: &str = "localhost:4223";

/// Represents the structure of the configuration file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Configuration version.
    pub version: String,
    /// Where button events come from.
    #[serde(default)]
    pub event_source: EventSourceConfig,
    /// Indicator colors.
    #[serde(default)]
    pub colors: Palette,
    /// How long a stopped program may take to exit before it is killed.
    pub grace_period: Option<String>,
    /// Upper bound for the whole shutdown sweep.
    pub shutdown_timeout: Option<String>,
    /// Working directory for launched programs, relative to the config file.
    pub working_dir: Option<String>,
    /// Interpreter per file suffix (e.g. `mp3: mpg123`).
    #[serde(default)]
    pub launchers: HashMap<String, String>,
    /// Interpreter used when no suffix matches.
    pub default_launcher: Option<String>,
    /// Button to program bindings, in slot order.
    pub slots: Vec<SlotConfig>,
    /// Root directory from which relative paths are resolved.
    #[serde(default)]
    pub project_dir: Option<String>,
}

/// Event source selection.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventSourceConfig {
    /// Line-oriented button daemon reachable over TCP.
    Tcp {
        #[serde(default = "default_event_address")]
        address: String,
    },
    /// Events typed on standard input.
    Stdin,
}

fn default_event_address() -> String {
    DEFAULT_EVENT_ADDRESS.to_string()
}

impl Default for EventSourceConfig {
    fn default() -> Self {
        EventSourceConfig::Tcp {
            address: default_event_address(),
        }
    }
}

/// Configuration for an individual button.
#[derive(Debug, Deserialize, Clone)]
pub struct SlotConfig {
    /// Hardware identity of the button.
    pub uid: String,
    /// Program to toggle, optionally followed by arguments.
    pub program: String,
}

impl Config {
    /// Grace period between the graceful stop request and the forced kill.
    pub fn grace_period(&self) -> Result<Duration, ToggleError> {
        self.grace_period
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map(|value| value.unwrap_or(DEFAULT_GRACE_PERIOD))
    }

    /// Upper bound for stopping every slot during shutdown.
    pub fn shutdown_timeout(&self) -> Result<Duration, ToggleError> {
        self.shutdown_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map(|value| value.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT))
    }

    /// Directory the config file lives in, or `.` when unknown.
    pub fn project_root(&self) -> PathBuf {
        self.project_dir
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Working directory for launched programs.
    pub fn working_dir(&self) -> PathBuf {
        let root = self.project_root();
        match self.working_dir.as_deref() {
            Some(dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
            Some(dir) => root.join(dir),
            None => root,
        }
    }

    /// Suffix dispatch table, falling back to the built-in one for unset entries.
    pub fn launch_table(&self) -> LaunchTable {
        let mut table = LaunchTable::default();
        for (suffix, interpreter) in &self.launchers {
            table = table.with_interpreter(suffix, interpreter);
        }
        if let Some(default) = &self.default_launcher {
            table = table.with_default(default);
        }
        table
    }

    /// Slot records in configuration order.
    pub fn slot_definitions(&self) -> Vec<Slot> {
        self.slots
            .iter()
            .enumerate()
            .map(|(id, slot)| Slot::new(id, &slot.uid, &slot.program))
            .collect()
    }

    /// Rejects configurations the service cannot run with.
    pub fn validate(&self) -> Result<(), ToggleError> {
        if self.slots.is_empty() {
            return Err(config_error("at least one slot must be configured"));
        }

        let mut seen = HashSet::new();
        for (id, slot) in self.slots.iter().enumerate() {
            if slot.uid.trim().is_empty() {
                return Err(config_error(format!("slot {id} has an empty uid")));
            }
            if slot.program.trim().is_empty() {
                return Err(config_error(format!("slot {id} has an empty program")));
            }
            if !seen.insert(slot.uid.trim()) {
                return Err(config_error(format!(
                    "uid '{}' is bound to more than one slot",
                    slot.uid
                )));
            }
        }

        if let EventSourceConfig::Tcp { address } = &self.event_source
            && address.trim().is_empty()
        {
            return Err(config_error("event source address cannot be empty"));
        }

        self.grace_period()?;
        self.shutdown_timeout()?;
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> ToggleError {
    ToggleError::ConfigError(message.into())
}

/// Parses `250ms`, `5s`, `2m`, `1h`, or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ToggleError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(config_error("Duration value cannot be empty"));
    }

    let (amount_str, millis_per_unit) = if let Some(stripped) = value.strip_suffix("ms") {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1_000)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60_000)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3_600_000)
    } else {
        (value, 1_000)
    };

    let amount: u64 = amount_str
        .parse()
        .map_err(|_| config_error(format!("Invalid duration value: '{raw}'")))?;

    Ok(Duration::from_millis(amount.saturating_mul(millis_per_unit)))
}

/// Expands `$VAR` and `${VAR}` references from the environment.
fn expand_env_vars(input: &str) -> Result<String, ToggleError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")
        .map_err(|err| config_error(err.to_string()))?;

    if let Some(missing) = re
        .captures_iter(input)
        .map(|caps| caps[1].to_string())
        .find(|name| env::var(name).is_err())
    {
        return Err(config_error(format!(
            "Missing environment variable: {missing}"
        )));
    }

    let result = re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });
    Ok(result.into_owned())
}

/// Loads, expands and validates the configuration file.
pub fn load_config(config_path: Option<&str>) -> Result<Config, ToggleError> {
    let config_path = config_path.map(Path::new).unwrap_or_else(|| {
        if Path::new("toggled.yaml").exists() {
            Path::new("toggled.yaml")
        } else {
            Path::new("buttons.yaml")
        }
    });

    let content = fs::read_to_string(config_path).map_err(|e| {
        ToggleError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded_content = expand_env_vars(&content)?;
    let mut config: Config = serde_yaml::from_str(&expanded_content)?;

    let base_path = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    config.project_dir = Some(base_path.to_string_lossy().to_string());

    config.validate()?;
    Ok(config)
}
