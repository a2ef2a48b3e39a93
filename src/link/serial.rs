//! UART link backed by the `serialport` crate.

use bytes::{Bytes, BytesMut};
use log::{debug, info};
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use super::{Link, RxBuffer, DEFAULT_TIMEOUT};
use crate::error::LinkError;

pub const DEFAULT_BAUDRATE: u32 = 115_200;

/// Granularity of a single blocking port read.
const POLL_READ_TIMEOUT: Duration = Duration::from_millis(20);

pub struct SerialLink {
    port_name: String,
    baudrate: u32,
    port: Option<Box<dyn SerialPort>>,
    timeout: Duration,
    rx: RxBuffer,
}

impl SerialLink {
    pub fn new(port_name: &str, baudrate: u32) -> Self {
        Self {
            port_name: port_name.to_string(),
            baudrate,
            port: None,
            timeout: DEFAULT_TIMEOUT,
            rx: RxBuffer::new(),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }
}

fn read_some(port: &mut Box<dyn SerialPort>, buf: &mut BytesMut) -> Result<usize, LinkError> {
    let mut chunk = [0u8; 1024];
    match port.read(&mut chunk) {
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            Ok(n)
        }
        Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
        Err(e) if e.kind() == ErrorKind::BrokenPipe => Err(LinkError::Disconnected),
        Err(e) => Err(LinkError::Io(e)),
    }
}

impl Link for SerialLink {
    fn connect(&mut self) -> Result<(), LinkError> {
        info!(
            "Opening serial port {} at {} baud",
            self.port_name, self.baudrate
        );
        let mut builder = serialport::new(&self.port_name, self.baudrate).timeout(POLL_READ_TIMEOUT);
        // Some USB serial adapters need explicit settings
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let port = builder.open().map_err(|e| {
            LinkError::Device(format!("failed to open serial port {}: {}", self.port_name, e))
        })?;
        // Drop whatever the module printed before we attached.
        if let Err(e) = port.clear(ClearBuffer::All) {
            debug!("clearing {} failed: {}", self.port_name, e);
        }
        self.rx.clear();
        self.port = Some(port);
        debug!("Serial port {} initialized", self.port_name);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.port_name);
        }
        self.rx.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let port = self.port.as_mut().ok_or(LinkError::NotConnected)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn recv(&mut self, n: usize) -> Result<Bytes, LinkError> {
        let timeout = self.timeout;
        let port = self.port.as_mut().ok_or(LinkError::NotConnected)?;
        self.rx.recv_with(n, timeout, |buf, _| read_some(port, buf))
    }

    fn recv_until(&mut self, delimiter: &[u8]) -> Result<Bytes, LinkError> {
        let timeout = self.timeout;
        let port = self.port.as_mut().ok_or(LinkError::NotConnected)?;
        self.rx
            .recv_until_with(delimiter, timeout, |buf, _| read_some(port, buf))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<(), LinkError> {
        if let Some(port) = self.port.as_mut() {
            port.set_baud_rate(baudrate)
                .map_err(|e| LinkError::Device(format!("can't set baudrate {}: {}", baudrate, e)))?;
            if let Err(e) = port.clear(ClearBuffer::Input) {
                debug!("clearing input after baudrate change failed: {}", e);
            }
        }
        self.rx.clear();
        self.baudrate = baudrate;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "serial"
    }
}
