//! In-process link.
//!
//! Feeds scripted bytes to the protocol layers and records what they send.
//! With a [`Peer`] attached it behaves like a device: every `send` is handed
//! to the peer and its reply becomes readable; when a read runs dry the peer
//! gets a chance to push unsolicited data (streamed frames).

use bytes::{Buf, Bytes, BytesMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{find_subsequence, Link, DEFAULT_TIMEOUT};
use crate::error::LinkError;

/// Emulated far end of a [`MemoryLink`].
pub trait Peer: Send {
    /// Bytes written by the host; returns the bytes the device answers with.
    fn on_receive(&mut self, data: &[u8]) -> Vec<u8>;

    /// Called when the host waits for data that is not buffered yet.
    fn on_idle(&mut self) -> Vec<u8> {
        Vec::new()
    }

    /// The host switched its line rate.
    fn on_baudrate(&mut self, _baudrate: u32) {}
}

/// Shared record of every `send` call, readable after the link moved into a client.
#[derive(Debug, Clone, Default)]
pub struct SentLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl SentLog {
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.0.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, data: &[u8]) {
        if let Ok(mut g) = self.0.lock() {
            g.push(data.to_vec());
        }
    }
}

pub struct MemoryLink {
    connected: bool,
    rx: BytesMut,
    sent: SentLog,
    peer: Option<Box<dyn Peer>>,
    timeout: Duration,
    baudrate: Option<u32>,
}

impl Default for MemoryLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLink {
    pub fn new() -> Self {
        Self {
            connected: false,
            rx: BytesMut::new(),
            sent: SentLog::default(),
            peer: None,
            timeout: DEFAULT_TIMEOUT,
            baudrate: None,
        }
    }

    /// Link whose reads are served from `data` only.
    pub fn scripted(data: &[u8]) -> Self {
        let mut link = Self::new();
        link.rx.extend_from_slice(data);
        link
    }

    pub fn with_peer<P: Peer + 'static>(peer: P) -> Self {
        let mut link = Self::new();
        link.peer = Some(Box::new(peer));
        link
    }

    /// Queue more bytes for the host to read.
    pub fn push_rx(&mut self, data: &[u8]) {
        self.rx.extend_from_slice(data);
    }

    pub fn sent_log(&self) -> SentLog {
        self.sent.clone()
    }

    pub fn baudrate(&self) -> Option<u32> {
        self.baudrate
    }

    /// Ask the peer for unsolicited bytes; false when nothing more will come.
    fn pull_idle(&mut self) -> bool {
        match self.peer.as_mut() {
            Some(peer) => {
                let more = peer.on_idle();
                if more.is_empty() {
                    return false;
                }
                self.rx.extend_from_slice(&more);
                true
            }
            None => false,
        }
    }
}

impl Link for MemoryLink {
    fn connect(&mut self) -> Result<(), LinkError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        self.sent.push(data);
        if let Some(peer) = self.peer.as_mut() {
            let reply = peer.on_receive(data);
            self.rx.extend_from_slice(&reply);
        }
        Ok(())
    }

    fn recv(&mut self, n: usize) -> Result<Bytes, LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        while self.rx.len() < n {
            if !self.pull_idle() {
                return Err(LinkError::Timeout(self.timeout));
            }
        }
        Ok(self.rx.split_to(n).freeze())
    }

    fn recv_until(&mut self, delimiter: &[u8]) -> Result<Bytes, LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        loop {
            if let Some(pos) = find_subsequence(&self.rx, delimiter) {
                let out = self.rx.split_to(pos).freeze();
                self.rx.advance(delimiter.len());
                return Ok(out);
            }
            if !self.pull_idle() {
                return Err(LinkError::Timeout(self.timeout));
            }
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<(), LinkError> {
        self.baudrate = Some(baudrate);
        if let Some(peer) = self.peer.as_mut() {
            peer.on_baudrate(baudrate);
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
