/*!
Configuration management for the camera grabber.
*/

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub capture: CaptureConfig,
    pub classifier: ClassifierConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Reject settings that would make the capture loop misbehave.
    ///
    /// Called once at startup; any error here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.link.port.trim().is_empty() {
            bail!("link.port must not be empty");
        }
        if self.link.kind == LinkKind::Serial && self.link.baud_rate == 0 {
            bail!("link.baud_rate must be greater than zero");
        }
        if self.link.chunk_size == 0 {
            bail!("link.chunk_size must be greater than zero");
        }
        if self.link.phase_timeout_ms == 0 {
            bail!("link.phase_timeout_ms must be greater than zero");
        }
        if self.capture.classify_every == 0 {
            bail!("capture.classify_every must be greater than zero");
        }
        if self.server.poll_interval_ms == 0 || self.server.idle_interval_ms == 0 {
            bail!("server poll and idle intervals must be greater than zero");
        }
        Ok(())
    }
}

/// Physical link flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Serial or Bluetooth SPP port, e.g. `/dev/rfcomm0` or `COM5`
    Serial,
    /// Raw TCP bridge, `host:port`
    Tcp,
}

/// Camera link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub kind: LinkKind,

    /// Serial device path or `host:port` for TCP
    pub port: String,

    /// Serial baud rate (ignored for TCP)
    pub baud_rate: u32,

    /// Deadline for each handshake phase in milliseconds
    pub phase_timeout_ms: u64,

    /// Maximum bytes requested per payload read
    pub chunk_size: usize,

    /// Largest `SIZE:` value accepted from the device
    pub max_frame_bytes: usize,

    /// Apply the phase deadline while waiting for the end marker
    pub enforce_end_deadline: bool,

    /// Wait between reopen attempts in milliseconds
    pub reconnect_backoff_ms: u64,

    /// Consecutive failed opens before giving up (0 = retry forever)
    pub max_reconnect_attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            kind: LinkKind::Serial,
            port: "/dev/rfcomm0".to_string(),
            baud_rate: 115_200,
            phase_timeout_ms: 5_000,
            chunk_size: 1024,
            max_frame_bytes: 2 * 1024 * 1024,
            enforce_end_deadline: true,
            reconnect_backoff_ms: 2_000,
            max_reconnect_attempts: 30,
        }
    }
}

/// Immutable link parameters handed to the connector and the handshake reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSession {
    pub kind: LinkKind,
    pub port: String,
    pub baud_rate: u32,
    pub phase_timeout: Duration,
    pub chunk_size: usize,
    pub max_frame_bytes: usize,
    pub enforce_end_deadline: bool,
}

impl From<&LinkConfig> for LinkSession {
    fn from(config: &LinkConfig) -> Self {
        Self {
            kind: config.kind,
            port: config.port.clone(),
            baud_rate: config.baud_rate,
            phase_timeout: Duration::from_millis(config.phase_timeout_ms),
            chunk_size: config.chunk_size,
            max_frame_bytes: config.max_frame_bytes,
            enforce_end_deadline: config.enforce_end_deadline,
        }
    }
}

/// Capture loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Pause between capture commands in milliseconds
    pub interval_ms: u64,

    /// Successful captures between classifier runs
    pub classify_every: u32,

    /// Pause after an actuator command in milliseconds
    pub cooldown_ms: u64,

    /// Pause after an empty classification in milliseconds
    pub empty_cooldown_ms: u64,

    /// Statistics reporting interval in seconds
    pub stats_interval_seconds: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: 50,
            classify_every: 20,
            cooldown_ms: 10_000,
            empty_cooldown_ms: 1_000,
            stats_interval_seconds: 10,
        }
    }
}

/// Classifier service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Disable to run capture and streaming only
    pub enabled: bool,

    /// Base URL of the generative language API
    pub endpoint: String,

    /// Model name
    pub model: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Instruction sent along with every image
    pub prompt: String,
}

/// Instruction asking for a single material digit followed by an object name
pub const DEFAULT_PROMPT: &str = "Analyze the attached image and identify the material of the object \
located only in the center of the image. Ignore edges, reflections, background and floor. \
If there is no visible object in the center, treat it as empty. If there is an object, \
classify its material as one of: plastic, paper, glass, metal. Your answer must start with \
only the number of the material (metal=1, glass=2, paper=3, plastic=4, empty=5), followed by \
the name of the object with some detail (e.g. pencil, bottle, coin). If there is no object, \
answer only 5.";

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            request_timeout_seconds: 30,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address
    pub bind_addr: String,

    /// HTTP port
    pub port: u16,

    /// Delay between multipart parts per viewer in milliseconds
    pub poll_interval_ms: u64,

    /// Delay between cache checks while no frame exists, in milliseconds
    pub idle_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 5000,
            poll_interval_ms: 40,
            idle_interval_ms: 10,
        }
    }
}
