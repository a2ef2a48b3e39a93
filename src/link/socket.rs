//! TCP socket link to an exploration or streaming server.

use bytes::{Bytes, BytesMut};
use log::{debug, info};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{Link, RxBuffer, DEFAULT_TIMEOUT};
use crate::error::LinkError;

/// Port the Acconeer servers listen on.
pub const DEFAULT_PORT: u16 = 6110;

pub struct SocketLink {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    timeout: Duration,
    rx: RxBuffer,
}

impl SocketLink {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            stream: None,
            timeout: DEFAULT_TIMEOUT,
            rx: RxBuffer::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn stream(&mut self) -> Result<&mut TcpStream, LinkError> {
        self.stream.as_mut().ok_or(LinkError::NotConnected)
    }
}

fn read_some(stream: &mut TcpStream, buf: &mut BytesMut, wait: Duration) -> Result<usize, LinkError> {
    // A zero read timeout means "block forever" for std sockets.
    stream.set_read_timeout(Some(wait.max(Duration::from_millis(1))))?;
    let mut chunk = [0u8; 4096];
    match stream.read(&mut chunk) {
        Ok(0) => Err(LinkError::Disconnected),
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            Ok(n)
        }
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => Ok(0),
        Err(e) if matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::BrokenPipe) => {
            Err(LinkError::Disconnected)
        }
        Err(e) => Err(LinkError::Io(e)),
    }
}

impl Link for SocketLink {
    fn connect(&mut self) -> Result<(), LinkError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| LinkError::Device(format!("can't resolve {}", self.host)))?;
        info!("Connecting to {}:{}", self.host, self.port);
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_nodelay(true)?;
        self.rx.clear();
        self.stream = Some(stream);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        if let Some(stream) = self.stream.take() {
            debug!("Closing socket to {}:{}", self.host, self.port);
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("socket shutdown failed: {}", e);
            }
        }
        self.rx.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let stream = self.stream()?;
        stream.write_all(data).map_err(|e| match e.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => LinkError::Disconnected,
            _ => LinkError::Io(e),
        })
    }

    fn recv(&mut self, n: usize) -> Result<Bytes, LinkError> {
        let timeout = self.timeout;
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        self.rx
            .recv_with(n, timeout, |buf, wait| read_some(stream, buf, wait))
    }

    fn recv_until(&mut self, delimiter: &[u8]) -> Result<Bytes, LinkError> {
        let timeout = self.timeout;
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        self.rx
            .recv_until_with(delimiter, timeout, |buf, wait| read_some(stream, buf, wait))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn kind(&self) -> &'static str {
        "socket"
    }
}
