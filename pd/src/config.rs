//! PowerDaemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::ActivityState;
use crate::trigger::bus::BusRule;
use crate::trigger::text::TextRule;

/// Main PowerDaemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Machines managed by the daemon
    pub machines: MachinesConfig,

    /// Simulated backend timing
    pub service: ServiceConfig,

    /// Kernel wake lock interface
    pub wakelock: WakelockConfig,

    /// IPC socket location
    pub socket: SocketConfig,

    /// Bus trigger rules
    pub bus: BusConfig,

    /// Text trigger rules
    pub text: TextConfig,

    /// Log level filter (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            machines: MachinesConfig::default(),
            service: ServiceConfig::default(),
            wakelock: WakelockConfig::default(),
            socket: SocketConfig::default(),
            bus: BusConfig::default(),
            text: TextConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .powerdaemon.yml
        let local_config = PathBuf::from(".powerdaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/powerdaemon/powerdaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("powerdaemon").join("powerdaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Resolve the socket path, falling back to the runtime-dir default
    pub fn socket_path(&self) -> PathBuf {
        self.socket
            .path
            .clone()
            .unwrap_or_else(crate::ipc::get_socket_path)
    }

    /// Bus trigger rules in engine form
    pub fn bus_rules(&self) -> Vec<BusRule> {
        self.bus
            .triggers
            .iter()
            .map(|t| BusRule {
                frame_id: t.frame_id,
                state: t.state,
            })
            .collect()
    }

    /// Text trigger rules in engine form
    pub fn text_rules(&self) -> Vec<TextRule> {
        self.text
            .triggers
            .iter()
            .map(|t| TextRule {
                phrase: t.phrase.clone(),
                state: t.state,
            })
            .collect()
    }
}

/// Machines managed by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachinesConfig {
    /// Machine names accepted as transition targets
    pub names: Vec<String>,
}

impl Default for MachinesConfig {
    fn default() -> Self {
        Self {
            names: vec!["ecu1".to_string(), "ecu2".to_string()],
        }
    }
}

/// Simulated backend timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Delay before a transition command reports initiation
    #[serde(rename = "command-delay-ms")]
    pub command_delay_ms: u64,

    /// Delay between command initiation and the ack report
    #[serde(rename = "ack-delay-ms")]
    pub ack_delay_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            command_delay_ms: 20,
            ack_delay_ms: 50,
        }
    }
}

/// Kernel wake lock interface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakelockConfig {
    /// Node written to acquire the lock
    #[serde(rename = "lock-path")]
    pub lock_path: PathBuf,

    /// Node written to release the lock
    #[serde(rename = "unlock-path")]
    pub unlock_path: PathBuf,

    /// Lock tag written to both nodes
    pub tag: String,
}

impl Default for WakelockConfig {
    fn default() -> Self {
        Self {
            lock_path: PathBuf::from(crate::engine::DEFAULT_LOCK_PATH),
            unlock_path: PathBuf::from(crate::engine::DEFAULT_UNLOCK_PATH),
            tag: crate::engine::DEFAULT_TAG.to_string(),
        }
    }
}

/// IPC socket location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Socket path override; defaults to the runtime directory
    pub path: Option<PathBuf>,
}

/// Bus trigger rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub triggers: Vec<BusTriggerEntry>,
}

/// One configured frame-id-to-state mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusTriggerEntry {
    #[serde(rename = "frame-id")]
    pub frame_id: u32,
    pub state: ActivityState,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            triggers: vec![
                BusTriggerEntry {
                    frame_id: 0x100,
                    state: ActivityState::Suspend,
                },
                BusTriggerEntry {
                    frame_id: 0x101,
                    state: ActivityState::Resume,
                },
                BusTriggerEntry {
                    frame_id: 0x102,
                    state: ActivityState::Shutdown,
                },
            ],
        }
    }
}

/// Text trigger rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    pub triggers: Vec<TextTriggerEntry>,
}

/// One configured phrase-to-state mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextTriggerEntry {
    pub phrase: String,
    pub state: ActivityState,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            triggers: vec![
                TextTriggerEntry {
                    phrase: "SUSPEND".to_string(),
                    state: ActivityState::Suspend,
                },
                TextTriggerEntry {
                    phrase: "RESUME".to_string(),
                    state: ActivityState::Resume,
                },
                TextTriggerEntry {
                    phrase: "SHUTDOWN".to_string(),
                    state: ActivityState::Shutdown,
                },
            ],
        }
    }
}
