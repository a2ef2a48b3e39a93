//! # Clients
//!
//! Every client goes through the same lifecycle:
//!
//! ```text
//! Disconnected -> Connected -> SessionSetup -> Streaming
//! ```
//!
//! [`Client`] owns the state flags and checks each operation's precondition
//! before anything is sent. The transport and protocol specific work lives in
//! a [`Session`] implementation:
//!
//! - [`UartClient`] - A111 register protocol over UART, module streams frames
//! - [`SpiClient`] - A111 register protocol polled by a worker thread
//! - [`SocketClient`] - A111 legacy JSON streaming server
//! - [`ExplorationClient`] - A121 exploration server over socket or serial
//! - [`MockClient`], [`MockA121Client`] - synthesized data, no hardware
//!
//! ```no_run
//! use acconeer_link::a111::ServiceConfig;
//! use acconeer_link::client::{Client, ClientInfo, SocketClient};
//! use acconeer_link::link::SocketLink;
//!
//! let link = SocketLink::new("192.168.1.10", 6110);
//! let mut client = Client::new(SocketClient::new(link), ClientInfo::socket("192.168.1.10", 6110));
//! client.start_session(Some(&ServiceConfig::envelope())).unwrap();
//! let frame = client.get_next().unwrap();
//! println!("{:?}", frame.data.shape());
//! client.disconnect().unwrap();
//! ```

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::a111::{self, Mode};
use crate::a121;
use crate::alert::{errors_of, Alert};
use crate::error::ClientError;
use crate::link::{timeout_for_update_rate, DEFAULT_TIMEOUT};
use crate::protocol::version::Version;
use crate::record::Record;

pub mod exploration;
pub mod mock;
pub mod module;
pub mod socket;
pub mod spi;
pub mod uart;

pub use exploration::ExplorationClient;
pub use mock::{MockA121Client, MockClient};
pub use socket::SocketClient;
pub use spi::SpiClient;
pub use uart::UartClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorGeneration {
    A111,
    A121,
}

impl SensorGeneration {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorGeneration::A111 => "a111",
            SensorGeneration::A121 => "a121",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "a111" => Some(SensorGeneration::A111),
            "a121" => Some(SensorGeneration::A121),
            _ => None,
        }
    }
}

impl fmt::Display for SensorGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a client reaches its device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientInfo {
    Serial {
        port: String,
        override_baudrate: Option<u32>,
    },
    Socket {
        host: String,
        port: u16,
    },
    Spi {
        device: String,
    },
    Usb {
        vid: u16,
        pid: u16,
        serial: Option<String>,
    },
    Mock,
}

impl ClientInfo {
    pub fn serial(port: &str, override_baudrate: Option<u32>) -> Self {
        ClientInfo::Serial {
            port: port.to_string(),
            override_baudrate,
        }
    }

    pub fn socket(host: &str, port: u16) -> Self {
        ClientInfo::Socket {
            host: host.to_string(),
            port,
        }
    }
}

impl Record for ClientInfo {}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientInfo::Serial {
                port,
                override_baudrate: Some(b),
            } => write!(f, "serial {} @ {} baud", port, b),
            ClientInfo::Serial { port, .. } => write!(f, "serial {}", port),
            ClientInfo::Socket { host, port } => write!(f, "socket {}:{}", host, port),
            ClientInfo::Spi { device } => write!(f, "spi {}", device),
            ClientInfo::Usb { vid, pid, serial } => {
                write!(f, "usb {:04x}:{:04x}", vid, pid)?;
                if let Some(s) = serial {
                    write!(f, " ({})", s)?;
                }
                Ok(())
            }
            ClientInfo::Mock => f.write_str("mock"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub sensor_id: u32,
    pub connected: bool,
    #[serde(default)]
    pub serial: Option<String>,
}

/// Facts reported by the device or server on connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version_string: String,
    pub version: Option<Version>,
    pub sensor: SensorGeneration,
    pub sensor_count: u32,
    #[serde(default)]
    pub ticks_per_second: Option<u64>,
    #[serde(default)]
    pub hardware_name: Option<String>,
    #[serde(default)]
    pub sensors: Vec<SensorInfo>,
    /// A111 service modes the server can run; `None` when not reported.
    #[serde(default)]
    pub supported_modes: Option<Vec<Mode>>,
}

impl Record for ServerInfo {}

impl ServerInfo {
    pub fn new(version_string: &str, version: Option<Version>, sensor: SensorGeneration) -> Self {
        Self {
            version_string: version_string.to_string(),
            version,
            sensor,
            sensor_count: 1,
            ticks_per_second: None,
            hardware_name: None,
            sensors: Vec::new(),
            supported_modes: None,
        }
    }
}

/// What the state machine needs to know about a session config.
pub trait Configuration {
    /// Cross-field checks; only error alerts block a setup.
    fn validate(&self) -> Vec<Alert>;

    /// Expected frames per second, when bounded.
    fn update_rate(&self) -> Option<f64>;

    /// A111 service mode, for the supported-mode check.
    fn mode(&self) -> Option<Mode> {
        None
    }
}

impl Configuration for a111::ServiceConfig {
    fn validate(&self) -> Vec<Alert> {
        a111::ServiceConfig::validate(self)
    }

    fn update_rate(&self) -> Option<f64> {
        self.update_rate
    }

    fn mode(&self) -> Option<Mode> {
        Some(a111::ServiceConfig::mode(self))
    }
}

impl Configuration for a121::SessionConfig {
    fn validate(&self) -> Vec<Alert> {
        a121::SessionConfig::validate(self)
    }

    fn update_rate(&self) -> Option<f64> {
        self.effective_update_rate()
    }
}

/// Transport and protocol specific half of a client.
///
/// Implementations may assume the precondition of each call holds; the
/// [`Client`] wrapper checks them.
pub trait Session: Send {
    type Config: Configuration;
    type Metadata: Clone;
    type Frame;

    /// Sensor family this session speaks to.
    const GENERATION: SensorGeneration;

    /// Open the link and identify the server.
    fn connect(&mut self) -> Result<ServerInfo, ClientError>;

    fn setup_session(&mut self, config: &Self::Config) -> Result<Self::Metadata, ClientError>;

    fn start_session(&mut self) -> Result<(), ClientError>;

    fn get_next(&mut self) -> Result<Self::Frame, ClientError>;

    fn stop_session(&mut self) -> Result<(), ClientError>;

    fn disconnect(&mut self) -> Result<(), ClientError>;

    fn set_timeout(&mut self, timeout: Duration);

    fn default_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    /// Drop the sensor axis of single-sensor arrays. Only A111 output has one.
    fn set_squeeze(&mut self, _squeeze: bool) {}
}

/// Lifecycle state machine around a [`Session`].
pub struct Client<S: Session> {
    session: S,
    info: ClientInfo,
    server_info: Option<ServerInfo>,
    config: Option<S::Config>,
    metadata: Option<S::Metadata>,
    connected: bool,
    session_is_setup: bool,
    session_is_started: bool,
    squeeze: bool,
}

impl<S: Session> Client<S>
where
    S::Config: Clone,
{
    pub fn new(session: S, info: ClientInfo) -> Self {
        let mut session = session;
        session.set_squeeze(true);
        Self {
            session,
            info,
            server_info: None,
            config: None,
            metadata: None,
            connected: false,
            session_is_setup: false,
            session_is_started: false,
            squeeze: true,
        }
    }

    pub fn client_info(&self) -> &ClientInfo {
        &self.info
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn session_is_setup(&self) -> bool {
        self.session_is_setup
    }

    pub fn session_is_started(&self) -> bool {
        self.session_is_started
    }

    pub fn config(&self) -> Option<&S::Config> {
        self.config.as_ref()
    }

    pub fn metadata(&self) -> Option<&S::Metadata> {
        self.metadata.as_ref()
    }

    pub fn squeeze(&self) -> bool {
        self.squeeze
    }

    pub fn set_squeeze(&mut self, squeeze: bool) {
        self.squeeze = squeeze;
        self.session.set_squeeze(squeeze);
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn connect(&mut self) -> Result<&ServerInfo, ClientError> {
        if self.connected {
            return Err(ClientError::State("already connected"));
        }
        info!("Connecting to {} ({})", self.info, S::GENERATION);
        let server_info = self.session.connect()?;
        if server_info.sensor != S::GENERATION {
            if let Err(e) = self.session.disconnect() {
                debug!("disconnect after generation mismatch failed: {}", e);
            }
            return Err(ClientError::WrongGeneration {
                expected: S::GENERATION.as_str(),
                found: server_info.sensor.to_string(),
            });
        }
        info!(
            "Connected: {} sensor, server version {}",
            server_info.sensor, server_info.version_string
        );
        self.connected = true;
        Ok(self.server_info.insert(server_info))
    }

    pub fn setup_session(&mut self, config: &S::Config) -> Result<&S::Metadata, ClientError> {
        self.setup_session_with(config, true)
    }

    pub fn setup_session_with(
        &mut self,
        config: &S::Config,
        check_config: bool,
    ) -> Result<&S::Metadata, ClientError> {
        if self.session_is_started {
            return Err(ClientError::State("can't setup session while streaming"));
        }
        if check_config {
            let errors = errors_of(&config.validate());
            if !errors.is_empty() {
                return Err(ClientError::IllegalConfig(errors));
            }
        }
        let connected_here = !self.connected;
        if connected_here {
            self.connect()?;
        }
        if let (Some(mode), Some(supported)) = (
            config.mode(),
            self.server_info.as_ref().and_then(|s| s.supported_modes.as_ref()),
        ) {
            if !supported.contains(&mode) {
                if connected_here {
                    self.undo_connect("unsupported mode");
                }
                return Err(ClientError::UnsupportedMode(mode.to_string()));
            }
        }

        let default = self.session.default_timeout();
        self.session
            .set_timeout(timeout_for_update_rate(config.update_rate(), default));
        let metadata = match self.session.setup_session(config) {
            Ok(m) => m,
            Err(e) => {
                self.session.set_timeout(default);
                if connected_here {
                    self.undo_connect("failed setup");
                }
                return Err(e);
            }
        };
        debug!("Session set up");
        self.config = Some(config.clone());
        self.session_is_setup = true;
        Ok(self.metadata.insert(metadata))
    }

    /// Start streaming. With a config, the session is set up first.
    pub fn start_session(&mut self, config: Option<&S::Config>) -> Result<(), ClientError> {
        self.start_session_with(config, true)
    }

    pub fn start_session_with(
        &mut self,
        config: Option<&S::Config>,
        check_config: bool,
    ) -> Result<(), ClientError> {
        if self.session_is_started {
            return Err(ClientError::State("already streaming"));
        }
        let (was_connected, was_setup) = (self.connected, self.session_is_setup);
        match config {
            Some(c) => {
                self.setup_session_with(c, check_config)?;
            }
            None if !self.session_is_setup => {
                return Err(ClientError::State("session needs to be set up before starting"));
            }
            None => {}
        }
        if let Err(e) = self.session.start_session() {
            if !was_connected {
                self.undo_connect("failed start");
            } else if !was_setup {
                self.session_is_setup = false;
                self.config = None;
                self.metadata = None;
                self.session.set_timeout(self.session.default_timeout());
            }
            return Err(e);
        }
        info!("Session started");
        self.session_is_started = true;
        Ok(())
    }

    pub fn get_next(&mut self) -> Result<S::Frame, ClientError> {
        if !self.session_is_started {
            return Err(ClientError::State("must be streaming to get next"));
        }
        match self.session.get_next() {
            Err(ClientError::SessionEnded) => {
                info!("Server ended the session");
                self.session_is_started = false;
                self.session.set_timeout(self.session.default_timeout());
                Err(ClientError::SessionEnded)
            }
            other => other,
        }
    }

    /// Stop streaming. A timeout here leaves the link in an unknown state;
    /// disconnect afterwards.
    pub fn stop_session(&mut self) -> Result<(), ClientError> {
        if !self.session_is_started {
            return Err(ClientError::State("not streaming"));
        }
        self.session.stop_session()?;
        self.session_is_started = false;
        self.session.set_timeout(self.session.default_timeout());
        info!("Session stopped");
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::State("not connected"));
        }
        if self.session_is_started {
            if let Err(e) = self.stop_session() {
                warn!("Failed to stop session before disconnecting: {}", e);
            }
        }
        let result = self.session.disconnect();
        self.connected = false;
        self.session_is_setup = false;
        self.session_is_started = false;
        self.server_info = None;
        self.metadata = None;
        info!("Disconnected from {}", self.info);
        result
    }

    /// Drop a connection made implicitly by an operation that then failed.
    fn undo_connect(&mut self, after: &str) {
        if let Err(e) = self.session.disconnect() {
            debug!("disconnect after {} failed: {}", after, e);
        }
        self.connected = false;
        self.session_is_setup = false;
        self.server_info = None;
        self.config = None;
        self.metadata = None;
    }

    pub fn into_session(self) -> S {
        self.session
    }
}
