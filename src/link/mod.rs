//! # Links
//!
//! A [`Link`] is an open duplex byte channel to a sensor module or server.
//! The protocol layers only need blocking `send`, `recv(n)` and
//! `recv_until(delimiter)` plus a settable timeout; everything physical lives
//! behind this trait.
//!
//! Built-in links:
//!
//! - [`SocketLink`] - TCP socket to an exploration or streaming server
//! - [`SerialLink`] - UART via `serialport` (feature `serial`)
//! - [`MemoryLink`] - in-process link with an optional emulated [`Peer`]
//!
//! Reads never return partial data: `recv(n)` yields exactly `n` bytes or a
//! [`LinkError`], and bytes following a delimiter stay buffered for the next
//! call.

use bytes::{Buf, Bytes, BytesMut};
use std::time::{Duration, Instant};

use crate::error::LinkError;

pub mod memory;
#[cfg(feature = "serial")]
pub mod serial;
pub mod socket;

pub use memory::{MemoryLink, Peer, SentLog};
#[cfg(feature = "serial")]
pub use serial::SerialLink;
pub use socket::SocketLink;

/// Timeout used until a session tells us its update rate.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Slack added on top of one update period.
const UPDATE_PERIOD_MARGIN: f64 = 0.5;

pub trait Link: Send {
    fn connect(&mut self) -> Result<(), LinkError>;

    fn disconnect(&mut self) -> Result<(), LinkError>;

    fn is_connected(&self) -> bool;

    /// Write all of `data`, blocking until done.
    fn send(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Block until exactly `n` bytes are available or the timeout expires.
    fn recv(&mut self, n: usize) -> Result<Bytes, LinkError>;

    /// Block until `delimiter` is seen; the delimiter is consumed but not returned.
    fn recv_until(&mut self, delimiter: &[u8]) -> Result<Bytes, LinkError>;

    fn timeout(&self) -> Duration;

    fn set_timeout(&mut self, timeout: Duration);

    fn set_baudrate(&mut self, _baudrate: u32) -> Result<(), LinkError> {
        Err(LinkError::Unsupported(self.kind()))
    }

    /// Short name used in logs and errors.
    fn kind(&self) -> &'static str;
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn connect(&mut self) -> Result<(), LinkError> {
        (**self).connect()
    }
    fn disconnect(&mut self) -> Result<(), LinkError> {
        (**self).disconnect()
    }
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        (**self).send(data)
    }
    fn recv(&mut self, n: usize) -> Result<Bytes, LinkError> {
        (**self).recv(n)
    }
    fn recv_until(&mut self, delimiter: &[u8]) -> Result<Bytes, LinkError> {
        (**self).recv_until(delimiter)
    }
    fn timeout(&self) -> Duration {
        (**self).timeout()
    }
    fn set_timeout(&mut self, timeout: Duration) {
        (**self).set_timeout(timeout)
    }
    fn set_baudrate(&mut self, baudrate: u32) -> Result<(), LinkError> {
        (**self).set_baudrate(baudrate)
    }
    fn kind(&self) -> &'static str {
        (**self).kind()
    }
}

/// Link timeout for a session streaming at `update_rate` Hz.
///
/// A slow but deliberate update rate must not trip the default timeout.
pub fn timeout_for_update_rate(update_rate: Option<f64>, default: Duration) -> Duration {
    match update_rate {
        Some(rate) if rate > 0.0 && rate.is_finite() => {
            let period = Duration::from_secs_f64(1.0 / rate + UPDATE_PERIOD_MARGIN);
            period.max(default)
        }
        _ => default,
    }
}

/// Position of `needle` in `haystack`, if any.
pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Accumulating receive buffer shared by the stream-backed links.
///
/// `fill` performs one underlying read with the given remaining time and
/// appends to the buffer, returning how many bytes arrived (0 means nothing
/// yet, not EOF).
#[derive(Debug, Default)]
pub(crate) struct RxBuffer {
    buf: BytesMut,
}

impl RxBuffer {
    pub(crate) fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.buf.clear();
    }

    pub(crate) fn recv_with<F>(
        &mut self,
        n: usize,
        timeout: Duration,
        mut fill: F,
    ) -> Result<Bytes, LinkError>
    where
        F: FnMut(&mut BytesMut, Duration) -> Result<usize, LinkError>,
    {
        let deadline = Instant::now() + timeout;
        while self.buf.len() < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LinkError::Timeout(timeout));
            }
            fill(&mut self.buf, remaining)?;
        }
        Ok(self.buf.split_to(n).freeze())
    }

    pub(crate) fn recv_until_with<F>(
        &mut self,
        delimiter: &[u8],
        timeout: Duration,
        mut fill: F,
    ) -> Result<Bytes, LinkError>
    where
        F: FnMut(&mut BytesMut, Duration) -> Result<usize, LinkError>,
    {
        let deadline = Instant::now() + timeout;
        let mut searched = 0usize;
        loop {
            let from = searched.saturating_sub(delimiter.len().saturating_sub(1));
            if let Some(pos) = find_subsequence(&self.buf[from..], delimiter) {
                let out = self.buf.split_to(from + pos).freeze();
                self.buf.advance(delimiter.len());
                return Ok(out);
            }
            searched = self.buf.len();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LinkError::Timeout(timeout));
            }
            fill(&mut self.buf, remaining)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_update_rate_extends_timeout() {
        let t = timeout_for_update_rate(Some(0.1), DEFAULT_TIMEOUT);
        assert_eq!(t, Duration::from_secs_f64(10.5));
    }

    #[test]
    fn fast_update_rate_keeps_default() {
        assert_eq!(timeout_for_update_rate(Some(100.0), DEFAULT_TIMEOUT), DEFAULT_TIMEOUT);
        assert_eq!(timeout_for_update_rate(None, DEFAULT_TIMEOUT), DEFAULT_TIMEOUT);
        assert_eq!(timeout_for_update_rate(Some(0.0), DEFAULT_TIMEOUT), DEFAULT_TIMEOUT);
    }

    #[test]
    fn recv_until_keeps_trailing_bytes() {
        let mut rx = RxBuffer::new();
        let mut chunks = vec![b"ab".to_vec(), b"c\nde".to_vec()].into_iter();
        let mut fill = |buf: &mut BytesMut, _: Duration| match chunks.next() {
            Some(c) => {
                buf.extend_from_slice(&c);
                Ok(c.len())
            }
            None => Err(LinkError::Disconnected),
        };
        let line = rx
            .recv_until_with(b"\n", Duration::from_secs(1), &mut fill)
            .unwrap();
        assert_eq!(&line[..], b"abc");
        let rest = rx.recv_with(2, Duration::from_secs(1), &mut fill).unwrap();
        assert_eq!(&rest[..], b"de");
    }

    #[test]
    fn recv_until_finds_delimiter_split_across_reads() {
        let mut rx = RxBuffer::new();
        let mut chunks = vec![b"xx\xcc".to_vec(), b"\x02yy".to_vec()].into_iter();
        let fill = |buf: &mut BytesMut, _: Duration| match chunks.next() {
            Some(c) => {
                buf.extend_from_slice(&c);
                Ok(c.len())
            }
            None => Err(LinkError::Disconnected),
        };
        let head = rx
            .recv_until_with(&[0xcc, 0x02], Duration::from_secs(1), fill)
            .unwrap();
        assert_eq!(&head[..], b"xx");
    }
}
