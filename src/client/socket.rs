//! A111 client for the legacy JSON streaming server.

use log::{debug, warn};
use std::time::Duration;

use super::{SensorGeneration, ServerInfo, Session};
use crate::a111::{Frame, Metadata, ServiceConfig};
use crate::error::ClientError;
use crate::link::Link;
use crate::protocol::json::{decode_stream_payload, JsonChannel, Status};
use crate::protocol::legacy;

pub struct SocketClient<L: Link> {
    channel: JsonChannel<L>,
    config: Option<ServiceConfig>,
    squeeze: bool,
}

impl<L: Link> SocketClient<L> {
    pub fn new(link: L) -> Self {
        Self {
            channel: JsonChannel::new(link),
            config: None,
            squeeze: true,
        }
    }

    pub fn link(&self) -> &L {
        self.channel.link()
    }

    fn send_setup(&mut self, config: &ServiceConfig) -> Result<Metadata, ClientError> {
        let response = self
            .channel
            .request(&legacy::setup_command(config), Status::Ok)?;
        legacy::parse_metadata(&response)
    }
}

impl<L: Link> Session for SocketClient<L> {
    type Config = ServiceConfig;
    type Metadata = Metadata;
    type Frame = Frame;

    const GENERATION: SensorGeneration = SensorGeneration::A111;

    fn connect(&mut self) -> Result<ServerInfo, ClientError> {
        self.channel.link_mut().connect()?;
        let response = match self
            .channel
            .request(&legacy::get_version_command(), Status::Ok)
        {
            Ok(r) => r,
            Err(e) => {
                if let Err(close) = self.channel.link_mut().disconnect() {
                    debug!("disconnect after failed handshake failed: {}", close);
                }
                return Err(e);
            }
        };
        match legacy::parse_version(&response) {
            Ok(info) => Ok(info),
            Err(e) => {
                if let Err(close) = self.channel.link_mut().disconnect() {
                    debug!("disconnect after failed handshake failed: {}", close);
                }
                Err(e)
            }
        }
    }

    fn setup_session(&mut self, config: &ServiceConfig) -> Result<Metadata, ClientError> {
        // The server sometimes rejects the first setup after connecting.
        let metadata = match self.send_setup(config) {
            Err(ClientError::Server(msg)) => {
                warn!("Setup rejected ({}), retrying once", msg);
                self.send_setup(config)?
            }
            other => other?,
        };
        debug!("Legacy metadata: {:?}", metadata);
        self.config = Some(config.clone());
        Ok(metadata)
    }

    fn start_session(&mut self) -> Result<(), ClientError> {
        self.channel.request(&legacy::start_command(), Status::Start)?;
        Ok(())
    }

    fn get_next(&mut self) -> Result<Frame, ClientError> {
        let response = self.channel.recv_response(None)?;
        let response = match response.status {
            Status::End => return Err(ClientError::SessionEnded),
            _ => response.expect(Status::Ok)?,
        };
        let config = self
            .config
            .as_ref()
            .ok_or(ClientError::State("session needs to be set up before starting"))?;
        let info = legacy::parse_result_info(&response)?;
        let data = decode_stream_payload(&response.payload, &legacy::decode_params(config, self.squeeze))?;
        Ok(Frame { info, data })
    }

    fn stop_session(&mut self) -> Result<(), ClientError> {
        self.channel.send_command(&legacy::stop_command())?;
        // Frames already in flight arrive before the stop acknowledgement.
        let mut drained = 0usize;
        loop {
            let response = self.channel.recv_response(None)?;
            match response.status {
                Status::Stop | Status::End => break,
                Status::Ok => drained += 1,
                _ => {
                    response.expect(Status::Stop)?;
                }
            }
        }
        if drained > 0 {
            debug!("Drained {} frames while stopping", drained);
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ClientError> {
        self.config = None;
        self.channel.link_mut().disconnect()?;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.channel.link_mut().set_timeout(timeout);
    }

    fn set_squeeze(&mut self, squeeze: bool) {
        self.squeeze = squeeze;
    }
}
