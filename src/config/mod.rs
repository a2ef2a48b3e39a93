//! # Configuration
//!
//! TOML configuration for the `acconeer-link` binary. The library itself
//! takes no configuration files; everything here ends up as a [`ClientInfo`]
//! plus a session config handed to a client.
//!
//! ## Sections
//!
//! - [`LinkConfig`] - which transport to open and how
//! - [`SessionSettings`] - sensor generation, mode, range and rate of the demo session
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use acconeer_link::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("acconeer-link.toml").await?;
//!     let config = Config::load("acconeer-link.toml").await?;
//!     config.validate()?;
//!     println!("{}", config.client_info()?);
//!     Ok(())
//! }
//! ```
//!
//! ## File format
//!
//! ```toml
//! [link]
//! kind = "socket"
//! host = "192.168.1.10"
//! tcp_port = 6110
//! timeout_ms = 3000
//!
//! [session]
//! generation = "a111"
//! mode = "envelope"
//! range = [0.2, 0.8]
//! update_rate = 10.0
//! frames = 10
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;

use crate::a111::{Mode, ServiceConfig};
use crate::a121::{SensorConfig, SessionConfig};
use crate::client::{ClientInfo, SensorGeneration};
use crate::link::socket::DEFAULT_PORT;

/// A121 distance per start point / step unit, in meters.
const A121_POINT_M: f64 = 0.0025;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Serial,
    Socket,
    Spi,
    Mock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub kind: LinkKind,
    /// Serial device, e.g. `/dev/ttyUSB0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// Fixed serial rate; probing is skipped when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baudrate: Option<u32>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_tcp_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_ms() -> u64 {
    3000
}

impl LinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub generation: SensorGeneration,
    /// A111 service; ignored for A121.
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default = "default_sensor")]
    pub sensor: u32,
    /// `[start, end]` in meters.
    #[serde(default = "default_range")]
    pub range: [f64; 2],
    #[serde(default)]
    pub update_rate: Option<f64>,
    /// Frames to read before stopping; 0 streams until interrupted.
    #[serde(default)]
    pub frames: u32,
    #[serde(default = "default_squeeze")]
    pub squeeze: bool,
}

fn default_mode() -> Mode {
    Mode::Envelope
}

fn default_sensor() -> u32 {
    1
}

fn default_range() -> [f64; 2] {
    [0.2, 0.8]
}

fn default_squeeze() -> bool {
    true
}

impl SessionSettings {
    /// Service config for an A111 session.
    pub fn a111_config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::for_mode(self.mode);
        config.sensor = vec![self.sensor];
        config.range_interval = self.range;
        config.update_rate = self.update_rate;
        config
    }

    /// Single sensor, single subsweep A121 session covering `range`.
    pub fn a121_config(&self) -> SessionConfig {
        let mut sensor = SensorConfig {
            frame_rate: self.update_rate,
            ..SensorConfig::default()
        };
        if let Some(subsweep) = sensor.subsweeps.first_mut() {
            subsweep.start_point = (self.range[0] / A121_POINT_M).round() as i32;
            subsweep.num_points = (((self.range[1] - self.range[0]) / A121_POINT_M).round() as u32).max(1);
        }
        SessionConfig::for_sensor(self.sensor, sensor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub link: LinkConfig,
    pub session: SessionSettings,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            link: LinkConfig {
                kind: LinkKind::Mock,
                port: None,
                host: None,
                tcp_port: DEFAULT_PORT,
                baudrate: None,
                timeout_ms: default_timeout_ms(),
            },
            session: SessionSettings {
                generation: SensorGeneration::A111,
                mode: Mode::Envelope,
                sensor: 1,
                range: default_range(),
                update_rate: Some(10.0),
                frames: 10,
                squeeze: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Write the default configuration to `path`
    pub async fn create_default(path: &str) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        match self.link.kind {
            LinkKind::Serial | LinkKind::Spi if self.link.port.as_deref().map_or(true, str::is_empty) => {
                bail!("[link] port is required for {:?} links", self.link.kind)
            }
            LinkKind::Socket if self.link.host.as_deref().map_or(true, str::is_empty) => {
                bail!("[link] host is required for socket links")
            }
            LinkKind::Spi if self.session.generation == SensorGeneration::A121 => {
                bail!("[link] SPI is only supported for A111 modules")
            }
            _ => {}
        }
        if self.link.timeout_ms == 0 {
            bail!("[link] timeout_ms must be positive");
        }
        let [start, end] = self.session.range;
        if end <= start {
            bail!("[session] range end must be greater than its start");
        }
        if matches!(self.session.update_rate, Some(r) if r <= 0.0 || !r.is_finite()) {
            bail!("[session] update_rate must be positive");
        }
        if self.session.sensor == 0 {
            bail!("[session] sensor ids start at 1");
        }
        log::LevelFilter::from_str(&self.logging.level)
            .map_err(|_| anyhow!("[logging] unknown level '{}'", self.logging.level))?;
        Ok(())
    }

    pub fn client_info(&self) -> Result<ClientInfo> {
        let link = &self.link;
        Ok(match link.kind {
            LinkKind::Serial => ClientInfo::serial(
                link.port.as_deref().ok_or_else(|| anyhow!("[link] port is missing"))?,
                link.baudrate,
            ),
            LinkKind::Socket => ClientInfo::socket(
                link.host.as_deref().ok_or_else(|| anyhow!("[link] host is missing"))?,
                link.tcp_port,
            ),
            LinkKind::Spi => ClientInfo::Spi {
                device: link.port.clone().ok_or_else(|| anyhow!("[link] port is missing"))?,
            },
            LinkKind::Mock => ClientInfo::Mock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a111::ServiceParams;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.client_info().unwrap(), ClientInfo::Mock);
    }

    #[tokio::test]
    async fn default_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acconeer-link.toml");
        let path = path.to_str().unwrap();

        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[tokio::test]
    async fn minimal_file_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minimal.toml");
        tokio::fs::write(
            &path,
            r#"
[link]
kind = "socket"
host = "10.0.0.2"

[session]
generation = "a121"

[logging]
level = "debug"
"#,
        )
        .await
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).await.unwrap();
        config.validate().unwrap();
        assert_eq!(config.link.tcp_port, DEFAULT_PORT);
        assert_eq!(config.link.timeout(), Duration::from_secs(3));
        assert_eq!(config.session.mode, Mode::Envelope);
        assert!(config.session.squeeze);
        assert_eq!(config.client_info().unwrap(), ClientInfo::socket("10.0.0.2", DEFAULT_PORT));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let err = Config::load(path.to_str().unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn validation_catches_incomplete_links() {
        let mut config = Config::default();
        config.link.kind = LinkKind::Serial;
        assert!(config.validate().is_err());
        config.link.port = Some("/dev/ttyUSB0".into());
        config.validate().unwrap();

        config.link.kind = LinkKind::Spi;
        config.session.generation = SensorGeneration::A121;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.range = [0.8, 0.2];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn session_settings_build_configs() {
        let mut settings = Config::default().session;
        settings.mode = Mode::Sparse;
        settings.range = [0.3, 1.2];
        let a111 = settings.a111_config();
        assert!(matches!(a111.service(), ServiceParams::Sparse { .. }));
        assert_eq!(a111.range_interval, [0.3, 1.2]);
        assert_eq!(a111.update_rate, Some(10.0));

        let a121 = settings.a121_config();
        let sensor = &a121.groups[0][&1];
        assert_eq!(sensor.subsweeps[0].start_point, 120);
        assert_eq!(sensor.subsweeps[0].num_points, 360);
        assert_eq!(a121.effective_update_rate(), Some(10.0));
    }
}
