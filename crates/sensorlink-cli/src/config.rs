//! Configuration file management.
//!
//! ```toml
//! rate_hz = 50.0
//! connect_timeout_secs = 30
//!
//! [reconnect]
//! initial_delay_ms = 250
//! max_delay_ms = 30000
//!
//! [[session]]
//! name = "glove"
//! role = "client"
//! remote_name = "DataGlove"
//! frame_size = 16
//!
//! [[attribute_link]]
//! name = "thermometer"
//! address = "AA:BB:CC:DD:EE:FF"
//! attributes = ["temperature", "battery-level"]
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use sensorlink_core::framing::DEFAULT_MAX_FRAME_SIZE;
use sensorlink_core::{AttributeLinkOptions, ReconnectOptions, SessionOptions};
use sensorlink_types::{DescriptorRegistry, LinkIdentity, Role};

/// Highest accepted sampling rate.
pub const MAX_RATE_HZ: f64 = 1000.0;

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Sampling rate of `watch` in Hz
    #[serde(default = "default_rate")]
    pub rate_hz: f64,

    /// Seconds `watch` waits for every link to connect
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Reconnect policy for links without their own
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Classic stream sessions
    #[serde(default, rename = "session")]
    pub sessions: Vec<SessionConfig>,

    /// Attribute-subscription links
    #[serde(default, rename = "attribute_link")]
    pub attribute_links: Vec<AttributeLinkConfig>,
}

fn default_rate() -> f64 {
    50.0
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate_hz: default_rate(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect: ReconnectConfig::default(),
            sessions: Vec::new(),
            attribute_links: Vec::new(),
        }
    }
}

/// Backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Give up after this many consecutive failures (unset = never)
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_initial_delay() -> u64 {
    250
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            max_attempts: None,
            jitter: true,
        }
    }
}

impl ReconnectConfig {
    pub fn to_options(&self) -> ReconnectOptions {
        let mut options = ReconnectOptions::new()
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .backoff_multiplier(self.multiplier)
            .exponential_backoff(self.multiplier > 1.0)
            .jitter(self.jitter);
        if let Some(attempts) = self.max_attempts {
            options = options.max_attempts(attempts);
        }
        options
    }
}

/// One classic stream session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session name both ends agree on
    pub name: String,

    #[serde(default)]
    pub role: Role,

    /// Bonded device name to dial (client only)
    #[serde(default)]
    pub remote_name: String,

    /// Address to dial when no bonded device has `remote_name` (client only)
    #[serde(default)]
    pub remote_address: Option<String>,

    /// Bytes per sample frame
    pub frame_size: usize,

    /// RFCOMM channel for this session name
    #[serde(default)]
    pub channel: Option<u8>,

    #[serde(default)]
    pub reconnect: Option<ReconnectConfig>,
}

impl SessionConfig {
    pub fn identity(&self) -> LinkIdentity {
        let identity = match self.role {
            Role::Server => LinkIdentity::server(&self.name),
            Role::Client => LinkIdentity::client(&self.name, &self.remote_name),
        };
        match &self.remote_address {
            Some(address) if self.role == Role::Client => identity.with_remote_address(address),
            _ => identity,
        }
    }

    pub fn options(&self, fallback: &ReconnectConfig) -> SessionOptions {
        SessionOptions::default()
            .reconnect(self.reconnect.as_ref().unwrap_or(fallback).to_options())
            .max_frame_size(self.frame_size.max(DEFAULT_MAX_FRAME_SIZE))
    }
}

/// One attribute-subscription link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeLinkConfig {
    pub name: String,

    /// Peripheral address or name
    pub address: String,

    /// Descriptor names, UUIDs or 16-bit ids to subscribe to
    pub attributes: Vec<String>,

    #[serde(default = "default_teardown")]
    pub teardown_timeout_ms: u64,

    /// Reconnect after unexpected loss
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    #[serde(default)]
    pub reconnect: Option<ReconnectConfig>,
}

fn default_teardown() -> u64 {
    2000
}

impl AttributeLinkConfig {
    pub fn options(&self, fallback: &ReconnectConfig) -> AttributeLinkOptions {
        let options = AttributeLinkOptions::default()
            .teardown_timeout(Duration::from_millis(self.teardown_timeout_ms));
        if self.auto_reconnect {
            options.reconnect(self.reconnect.as_ref().unwrap_or(fallback).to_options())
        } else {
            options.no_reconnect()
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensorlink")
            .join("config.toml")
    }

    /// Load `path`, or the default location when `None`.
    ///
    /// A missing file at the default location yields the default config;
    /// an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config")
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.attribute_links.is_empty()
    }

    /// Report the first configuration error, before anything connects.
    pub fn validate(&self, registry: &DescriptorRegistry) -> Result<()> {
        if !self.rate_hz.is_finite() || self.rate_hz <= 0.0 || self.rate_hz > MAX_RATE_HZ {
            bail!("rate_hz must be in (0, {}], got {}", MAX_RATE_HZ, self.rate_hz);
        }
        if self.connect_timeout_secs == 0 {
            bail!("connect_timeout_secs must be > 0");
        }
        self.reconnect
            .to_options()
            .validate()
            .context("[reconnect]")?;

        let mut names = HashSet::new();
        for session in &self.sessions {
            let name = &session.name;
            if name.trim().is_empty() {
                bail!("session name must not be empty");
            }
            if !names.insert(name.as_str()) {
                bail!("duplicate link name '{}'", name);
            }
            if session.role == Role::Client
                && session.remote_name.is_empty()
                && session.remote_address.is_none()
            {
                bail!("session '{}': client needs remote_name or remote_address", name);
            }
            if session.frame_size == 0 {
                bail!("session '{}': frame_size must be > 0", name);
            }
            if let Some(channel) = session.channel
                && !(1..=30).contains(&channel)
            {
                bail!("session '{}': channel must be 1-30, got {}", name, channel);
            }
            if let Some(reconnect) = &session.reconnect {
                reconnect
                    .to_options()
                    .validate()
                    .with_context(|| format!("session '{}'", name))?;
            }
        }

        for link in &self.attribute_links {
            let name = &link.name;
            if name.trim().is_empty() {
                bail!("attribute_link name must not be empty");
            }
            if !names.insert(name.as_str()) {
                bail!("duplicate link name '{}'", name);
            }
            if link.address.trim().is_empty() {
                bail!("attribute_link '{}': address must not be empty", name);
            }
            if link.attributes.is_empty() {
                bail!("attribute_link '{}': no attributes to subscribe", name);
            }
            for reference in &link.attributes {
                registry
                    .resolve(reference)
                    .with_context(|| format!("attribute_link '{}'", name))?;
            }
            if link.teardown_timeout_ms == 0 {
                bail!("attribute_link '{}': teardown_timeout_ms must be > 0", name);
            }
            if let Some(reconnect) = &link.reconnect {
                reconnect
                    .to_options()
                    .validate()
                    .with_context(|| format!("attribute_link '{}'", name))?;
            }
        }
        Ok(())
    }
}
