//! A111 client for modules on a UART, using the register protocol.
//!
//! The module pushes frames as stream packets once `streaming_control` is
//! set to `uart`.

use log::{debug, info, warn};
use std::time::Duration;

use super::module;
use super::{ServerInfo, SensorGeneration, Session};
use crate::a111::{Frame, Metadata, ServiceConfig};
use crate::error::{ClientError, LinkError};
use crate::link::Link;
use crate::protocol::frame::{Packet, RegisterProtocol};
use crate::protocol::json::{decode_stream_payload, ByteOrder, DecodeParams};
use crate::registers::Value;

/// Rates tried, fastest first, when no override is given.
pub const BAUDRATE_CANDIDATES: [u32; 4] = [3_000_000, 1_000_000, 460_800, 115_200];
/// Rate the module is switched to after a successful probe.
pub const MAX_BAUDRATE: u32 = 3_000_000;

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

pub struct UartClient<L: Link> {
    proto: RegisterProtocol<L>,
    override_baudrate: Option<u32>,
    baudrate: Option<u32>,
    config: Option<ServiceConfig>,
    metadata: Option<Metadata>,
    squeeze: bool,
}

impl<L: Link> UartClient<L> {
    pub fn new(link: L) -> Self {
        Self {
            proto: RegisterProtocol::new(link),
            override_baudrate: None,
            baudrate: None,
            config: None,
            metadata: None,
            squeeze: true,
        }
    }

    /// Only ever talk at `baudrate`; no probing, no switching.
    pub fn with_baudrate(link: L, baudrate: u32) -> Self {
        let mut client = Self::new(link);
        client.override_baudrate = Some(baudrate);
        client
    }

    pub fn link(&self) -> &L {
        self.proto.link()
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Current line rate, once connected.
    pub fn baudrate(&self) -> Option<u32> {
        self.baudrate
    }

    fn switch_baudrate(&mut self, baudrate: u32) -> Result<(), ClientError> {
        self.proto.link_mut().set_baudrate(baudrate)?;
        self.proto.reset();
        Ok(())
    }

    /// Find the rate the module currently answers at.
    fn find_baudrate(&mut self) -> Result<u32, ClientError> {
        let candidates: Vec<u32> = match self.override_baudrate {
            Some(b) => vec![b],
            None => BAUDRATE_CANDIDATES.to_vec(),
        };
        let timeout = self.proto.link().timeout();
        self.proto.link_mut().set_timeout(PROBE_TIMEOUT);
        let mut found = None;
        for baudrate in candidates {
            if let Err(e) = self.switch_baudrate(baudrate) {
                debug!("cannot switch link to {} baud: {}", baudrate, e);
                continue;
            }
            match module::probe(&mut self.proto) {
                Ok(true) => {
                    found = Some(baudrate);
                    break;
                }
                Ok(false) => {}
                Err(e) => debug!("no answer at {} baud: {}", baudrate, e),
            }
        }
        self.proto.link_mut().set_timeout(timeout);
        found.ok_or_else(|| ClientError::Client("could not find a module answering at any baud rate".into()))
    }

    fn handshake(&mut self) -> Result<ServerInfo, ClientError> {
        let mut baudrate = self.find_baudrate()?;
        info!("Module answered at {} baud", baudrate);
        if self.override_baudrate.is_none() && baudrate != MAX_BAUDRATE {
            self.proto
                .write_register("uart_baudrate", None, &Value::from(MAX_BAUDRATE))?;
            self.switch_baudrate(MAX_BAUDRATE)?;
            if !module::probe(&mut self.proto)? {
                return Err(ClientError::Client(format!(
                    "module stopped answering after switching to {} baud",
                    MAX_BAUDRATE
                )));
            }
            baudrate = MAX_BAUDRATE;
            debug!("Switched module to {} baud", baudrate);
        }
        self.baudrate = Some(baudrate);
        module::server_info(&mut self.proto)
    }
}

impl<L: Link> Session for UartClient<L> {
    type Config = ServiceConfig;
    type Metadata = Metadata;
    type Frame = Frame;

    const GENERATION: SensorGeneration = SensorGeneration::A111;

    fn connect(&mut self) -> Result<ServerInfo, ClientError> {
        self.proto.link_mut().connect()?;
        match self.handshake() {
            Ok(info) => Ok(info),
            Err(e) => {
                if let Err(close) = self.proto.link_mut().disconnect() {
                    debug!("disconnect after failed handshake failed: {}", close);
                }
                Err(e)
            }
        }
    }

    fn setup_session(&mut self, config: &ServiceConfig) -> Result<Metadata, ClientError> {
        let timeout = self.proto.link().timeout();
        let metadata = module::setup(&mut self.proto, config, timeout)?;
        debug!("Module metadata: {:?}", metadata);
        self.config = Some(config.clone());
        self.metadata = Some(metadata.clone());
        Ok(metadata)
    }

    fn start_session(&mut self) -> Result<(), ClientError> {
        self.proto
            .write_register("streaming_control", None, &Value::from("uart"))?;
        self.proto
            .write_register("main_control", None, &Value::from("activate"))?;
        Ok(())
    }

    fn get_next(&mut self) -> Result<Frame, ClientError> {
        let config = self
            .config
            .as_ref()
            .ok_or(ClientError::State("session needs to be set up before starting"))?;
        let mode = config.mode();
        loop {
            match self.proto.recv_packet(true)? {
                Packet::StreamData { result_info, buffer } => {
                    let info = module::result_info(&result_info, Some(mode))?;
                    let params = DecodeParams {
                        mode,
                        num_sensors: 1,
                        sweeps_per_frame: config.sweeps_per_frame().unwrap_or(1) as usize,
                        squeeze: self.squeeze,
                        byte_order: ByteOrder::Little,
                    };
                    let data = decode_stream_payload(&buffer, &params)?;
                    return Ok(Frame { info: vec![info], data });
                }
                other => debug!("ignoring {} while streaming", other.kind()),
            }
        }
    }

    // The module is not polled for the status change here, so a stop racing
    // a late activation is not detected. Frames still in flight are consumed
    // by the register write.
    fn stop_session(&mut self) -> Result<(), ClientError> {
        let skipped = self
            .proto
            .write_register("main_control", None, &Value::from("stop"))?;
        if skipped > 0 {
            debug!("Dropped {} frames while stopping", skipped);
        }
        self.proto
            .write_register("streaming_control", None, &Value::from("disable"))?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ClientError> {
        self.config = None;
        self.metadata = None;
        self.baudrate = None;
        self.proto.reset();
        match self.proto.link_mut().disconnect() {
            Ok(()) | Err(LinkError::NotConnected) => Ok(()),
            Err(e) => {
                warn!("Error closing UART link: {}", e);
                Err(e.into())
            }
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.proto.link_mut().set_timeout(timeout);
    }

    fn set_squeeze(&mut self, squeeze: bool) {
        self.squeeze = squeeze;
    }
}
