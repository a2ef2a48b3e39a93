//! A121 client for the exploration server (socket or serial).

use log::{debug, info};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{SensorGeneration, ServerInfo, Session};
use crate::a121::{Frame, GroupedMetadata, SensorCalibration, SessionConfig};
use crate::error::ClientError;
use crate::link::Link;
use crate::protocol::exploration as proto;
use crate::protocol::json::{JsonChannel, Status};
use crate::protocol::version::{ExplorationVariant, ProtocolFeatures};

pub struct ExplorationClient<L: Link> {
    channel: JsonChannel<L>,
    variant: Option<ExplorationVariant>,
    config: Option<SessionConfig>,
    metadata: Option<GroupedMetadata>,
    calibrations: BTreeMap<u32, SensorCalibration>,
    /// Line rate to switch to after connecting (serial links only).
    baudrate: Option<u32>,
}

impl<L: Link> ExplorationClient<L> {
    pub fn new(link: L) -> Self {
        Self {
            channel: JsonChannel::new(link),
            variant: None,
            config: None,
            metadata: None,
            calibrations: BTreeMap::new(),
            baudrate: None,
        }
    }

    /// Ask the server to switch to `baudrate` once connected.
    pub fn with_baudrate(link: L, baudrate: u32) -> Self {
        let mut client = Self::new(link);
        client.baudrate = Some(baudrate);
        client
    }

    pub fn link(&self) -> &L {
        self.channel.link()
    }

    pub fn variant(&self) -> Option<ExplorationVariant> {
        self.variant
    }

    pub fn features(&self) -> ProtocolFeatures {
        self.variant
            .unwrap_or(ExplorationVariant::NoCalibrationReuse)
            .features()
    }

    /// Calibrations reported by the server, keyed by sensor id.
    pub fn calibrations(&self) -> &BTreeMap<u32, SensorCalibration> {
        &self.calibrations
    }

    /// Calibrations to send with the next setup, when the server supports reuse.
    pub fn set_calibrations(&mut self, calibrations: BTreeMap<u32, SensorCalibration>) {
        self.calibrations = calibrations;
    }

    fn handshake(&mut self) -> Result<ServerInfo, ClientError> {
        let response = self
            .channel
            .request(&proto::get_system_info_command(), Status::Ok)?;
        let (mut server_info, variant) = proto::parse_system_info(&response)?;
        if server_info.sensor != SensorGeneration::A121 {
            return Ok(server_info);
        }
        info!("Exploration server {} uses protocol variant {:?}", server_info.version_string, variant);
        self.variant = Some(variant);

        let response = self
            .channel
            .request(&proto::get_sensor_info_command(), Status::Ok)?;
        server_info.sensors = proto::parse_sensor_info(&response)?;

        if let Some(baudrate) = self.baudrate {
            self.channel
                .request(&proto::set_baudrate_command(baudrate), Status::Ok)?;
            self.channel.link_mut().set_baudrate(baudrate)?;
            debug!("Switched exploration link to {} baud", baudrate);
        }
        Ok(server_info)
    }
}

impl<L: Link> Session for ExplorationClient<L> {
    type Config = SessionConfig;
    type Metadata = GroupedMetadata;
    type Frame = Frame;

    const GENERATION: SensorGeneration = SensorGeneration::A121;

    fn connect(&mut self) -> Result<ServerInfo, ClientError> {
        self.channel.link_mut().connect()?;
        match self.handshake() {
            Ok(info) => Ok(info),
            Err(e) => {
                if let Err(close) = self.channel.link_mut().disconnect() {
                    debug!("disconnect after failed handshake failed: {}", close);
                }
                Err(e)
            }
        }
    }

    fn setup_session(&mut self, config: &SessionConfig) -> Result<GroupedMetadata, ClientError> {
        let command = proto::setup_command(config, self.features(), &self.calibrations);
        let response = self.channel.request(&command, Status::Ok)?;
        let metadata = proto::parse_metadata(&response, config)?;
        let calibrations = proto::parse_calibrations(&response, config)?;
        if !calibrations.is_empty() {
            debug!("Server reported calibration for sensors {:?}", calibrations.keys());
            self.calibrations.extend(calibrations);
        }
        self.config = Some(config.clone());
        self.metadata = Some(metadata.clone());
        Ok(metadata)
    }

    fn start_session(&mut self) -> Result<(), ClientError> {
        self.channel.request(&proto::start_command(), Status::Start)?;
        Ok(())
    }

    fn get_next(&mut self) -> Result<Frame, ClientError> {
        let response = self.channel.recv_response(None)?;
        if response.status == Status::End {
            return Err(ClientError::SessionEnded);
        }
        let response = response.expect(Status::Ok)?;
        match (&self.config, &self.metadata) {
            (Some(config), Some(metadata)) => proto::parse_result(&response, config, metadata),
            _ => Err(ClientError::State("session needs to be set up before starting")),
        }
    }

    fn stop_session(&mut self) -> Result<(), ClientError> {
        self.channel.send_command(&proto::stop_command())?;
        loop {
            let response = self.channel.recv_response(None)?;
            match response.status {
                Status::Stop | Status::End => return Ok(()),
                Status::Ok => continue,
                _ => {
                    response.expect(Status::Stop)?;
                }
            }
        }
    }

    fn disconnect(&mut self) -> Result<(), ClientError> {
        self.config = None;
        self.metadata = None;
        self.variant = None;
        self.channel.link_mut().disconnect()?;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.channel.link_mut().set_timeout(timeout);
    }
}
