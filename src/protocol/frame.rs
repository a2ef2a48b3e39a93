//! Binary register protocol framing.
//!
//! Every packet travels as
//!
//!   `START | LEN (u16 LE) | PAYLOAD (LEN bytes) | END`
//!
//! with the packet kind in the first payload byte. There is no checksum; a
//! corrupted end marker is the only sign of a desynchronized stream, and the
//! reader can resynchronize by scanning forward for the next frame that
//! carries the same start+length prefix.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, info, trace, warn};

use crate::a111::Mode;
use crate::error::{ClientError, LinkError, ProtocolError, RegisterError};
use crate::link::Link;
use crate::logutil::hex_snippet;
use crate::metrics;
use crate::registers::{self, Value};

pub const START_MARKER: u8 = 0xCC;
pub const END_MARKER: u8 = 0xCD;
pub const LEN_FIELD_SIZE: usize = 2;
const HEADER_SIZE: usize = 1 + LEN_FIELD_SIZE;

/// Link reads allowed while resynchronizing before giving up.
pub const RECOVERY_ATTEMPTS: usize = 8;

/// Buffer id of the sample buffer.
pub const MAIN_BUFFER: u8 = 0xE8;

pub const REG_READ_REQUEST: u8 = 0xF8;
pub const REG_READ_RESPONSE: u8 = 0xF6;
pub const REG_WRITE_REQUEST: u8 = 0xF9;
pub const REG_WRITE_RESPONSE: u8 = 0xF5;
pub const BUF_READ_REQUEST: u8 = 0xFA;
pub const BUF_READ_RESPONSE: u8 = 0xF7;
pub const STREAM_PACKET: u8 = 0xFE;

/// Stream sub-packet types.
const STREAM_RESULT_INFO: u8 = 0xFD;
const STREAM_BUFFER: u8 = 0xFE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    RegReadRequest { address: u8 },
    RegReadResponse { address: u8, value: [u8; 4] },
    RegWriteRequest { address: u8, value: [u8; 4] },
    RegWriteResponse { address: u8, value: [u8; 4] },
    BufReadRequest { buffer: u8, start: u16 },
    BufReadResponse { buffer: u8, data: Bytes },
    /// Pushed by the module while streaming over UART.
    StreamData {
        result_info: Vec<(u8, [u8; 4])>,
        buffer: Bytes,
    },
}

impl Packet {
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::RegReadRequest { .. } => "register read request",
            Packet::RegReadResponse { .. } => "register read response",
            Packet::RegWriteRequest { .. } => "register write request",
            Packet::RegWriteResponse { .. } => "register write response",
            Packet::BufReadRequest { .. } => "buffer read request",
            Packet::BufReadResponse { .. } => "buffer read response",
            Packet::StreamData { .. } => "stream data",
        }
    }

    /// Serialize into a frame payload (opcode first).
    pub fn pack(&self) -> Result<BytesMut, ProtocolError> {
        let mut out = BytesMut::new();
        match self {
            Packet::RegReadRequest { address } => {
                out.put_u8(REG_READ_REQUEST);
                out.put_u8(*address);
            }
            Packet::RegReadResponse { address, value } => {
                out.put_u8(REG_READ_RESPONSE);
                out.put_u8(*address);
                out.put_slice(value);
            }
            Packet::RegWriteRequest { address, value } => {
                out.put_u8(REG_WRITE_REQUEST);
                out.put_u8(*address);
                out.put_slice(value);
            }
            Packet::RegWriteResponse { address, value } => {
                out.put_u8(REG_WRITE_RESPONSE);
                out.put_u8(*address);
                out.put_slice(value);
            }
            Packet::BufReadRequest { buffer, start } => {
                out.put_u8(BUF_READ_REQUEST);
                out.put_u8(*buffer);
                out.put_u16_le(*start);
            }
            Packet::BufReadResponse { buffer, data } => {
                out.put_u8(BUF_READ_RESPONSE);
                out.put_u8(*buffer);
                out.put_slice(data);
            }
            Packet::StreamData { result_info, buffer } => {
                out.put_u8(STREAM_PACKET);
                if !result_info.is_empty() {
                    out.put_u8(STREAM_RESULT_INFO);
                    out.put_u16_le(length_field("result info", result_info.len() * 5)?);
                    for (address, value) in result_info {
                        out.put_u8(*address);
                        out.put_slice(value);
                    }
                }
                if !buffer.is_empty() {
                    out.put_u8(STREAM_BUFFER);
                    out.put_u16_le(length_field("stream buffer", buffer.len())?);
                    out.put_slice(buffer);
                }
            }
        }
        Ok(out)
    }

    /// Parse a frame payload.
    pub fn unpack(payload: &[u8]) -> Result<Packet, ProtocolError> {
        let mut buf = payload;
        if !buf.has_remaining() {
            return Err(ProtocolError::Truncated("empty payload"));
        }
        let opcode = buf.get_u8();
        let packet = match opcode {
            REG_READ_REQUEST => {
                need(buf, 1, "register read request")?;
                Packet::RegReadRequest { address: buf.get_u8() }
            }
            REG_READ_RESPONSE | REG_WRITE_REQUEST | REG_WRITE_RESPONSE => {
                need(buf, 5, "register packet")?;
                let address = buf.get_u8();
                let mut value = [0u8; 4];
                buf.copy_to_slice(&mut value);
                match opcode {
                    REG_READ_RESPONSE => Packet::RegReadResponse { address, value },
                    REG_WRITE_REQUEST => Packet::RegWriteRequest { address, value },
                    _ => Packet::RegWriteResponse { address, value },
                }
            }
            BUF_READ_REQUEST => {
                need(buf, 3, "buffer read request")?;
                Packet::BufReadRequest {
                    buffer: buf.get_u8(),
                    start: buf.get_u16_le(),
                }
            }
            BUF_READ_RESPONSE => {
                need(buf, 1, "buffer read response")?;
                let buffer = buf.get_u8();
                Packet::BufReadResponse {
                    buffer,
                    data: Bytes::copy_from_slice(buf),
                }
            }
            STREAM_PACKET => unpack_stream(buf)?,
            other => return Err(ProtocolError::UnknownPacket(other)),
        };
        Ok(packet)
    }
}

fn length_field(what: &'static str, len: usize) -> Result<u16, ProtocolError> {
    u16::try_from(len).map_err(|_| ProtocolError::TooLong { what, len })
}

fn need(buf: &[u8], n: usize, what: &'static str) -> Result<(), ProtocolError> {
    if buf.remaining() < n {
        return Err(ProtocolError::Truncated(what));
    }
    Ok(())
}

fn unpack_stream(mut buf: &[u8]) -> Result<Packet, ProtocolError> {
    let mut result_info = Vec::new();
    let mut buffer = Bytes::new();
    while buf.has_remaining() {
        need(buf, 3, "stream segment header")?;
        let kind = buf.get_u8();
        let len = buf.get_u16_le() as usize;
        need(buf, len, "stream segment")?;
        let (segment, rest) = buf.split_at(len);
        buf = rest;
        match kind {
            STREAM_RESULT_INFO => {
                if len % 5 != 0 {
                    return Err(ProtocolError::Truncated("result info"));
                }
                for chunk in segment.chunks_exact(5) {
                    result_info.push((chunk[0], [chunk[1], chunk[2], chunk[3], chunk[4]]));
                }
            }
            STREAM_BUFFER => buffer = Bytes::copy_from_slice(segment),
            other => return Err(ProtocolError::UnknownPacket(other)),
        }
    }
    Ok(Packet::StreamData { result_info, buffer })
}

/// Wrap a packet in start marker, length and end marker. Payloads longer
/// than the length field can express are refused.
pub fn insert_packet_into_frame(packet: &Packet) -> Result<Bytes, ProtocolError> {
    let payload = packet.pack()?;
    let len = length_field("frame payload", payload.len())?;
    let mut frame = BytesMut::with_capacity(payload.len() + HEADER_SIZE + 1);
    frame.put_u8(START_MARKER);
    frame.put_u16_le(len);
    frame.put_slice(&payload);
    frame.put_u8(END_MARKER);
    Ok(frame.freeze())
}

/// Parse one complete frame.
pub fn extract_packet_from_frame(frame: &[u8]) -> Result<Packet, ProtocolError> {
    if frame.len() < HEADER_SIZE + 1 {
        return Err(ProtocolError::Truncated("frame"));
    }
    if frame[0] != START_MARKER {
        return Err(ProtocolError::InvalidFrame("incorrect start marker"));
    }
    let len = u16::from_le_bytes([frame[1], frame[2]]) as usize;
    if frame.len() != HEADER_SIZE + len + 1 {
        return Err(ProtocolError::InvalidFrame("length mismatch"));
    }
    if frame[HEADER_SIZE + len] != END_MARKER {
        return Err(ProtocolError::InvalidFrame("incorrect end marker"));
    }
    Packet::unpack(&frame[HEADER_SIZE..HEADER_SIZE + len])
}

/// Frame reader with a pending buffer in front of the link.
///
/// Bytes read ahead during recovery stay in the pending buffer and are
/// served before the link is read again.
#[derive(Debug, Default)]
pub struct FrameReader {
    pending: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn read<L: Link + ?Sized>(&mut self, link: &mut L, n: usize) -> Result<Bytes, LinkError> {
        if self.pending.len() < n {
            let more = link.recv(n - self.pending.len())?;
            self.pending.extend_from_slice(&more);
        }
        Ok(self.pending.split_to(n).freeze())
    }

    /// Read one packet. With `allow_recovery_skip`, a bad end marker starts a
    /// resynchronization instead of failing.
    pub fn recv_packet<L: Link + ?Sized>(
        &mut self,
        link: &mut L,
        allow_recovery_skip: bool,
    ) -> Result<Packet, ClientError> {
        let header = self.read(link, HEADER_SIZE)?;
        if header[0] != START_MARKER {
            metrics::inc_framing_errors();
            debug!("bad start marker in {}", hex_snippet(&header, HEADER_SIZE));
            return Err(ProtocolError::InvalidFrame("incorrect start marker").into());
        }
        let len = u16::from_le_bytes([header[1], header[2]]) as usize;
        let body = self.read(link, len + 1)?;

        let payload = if body[len] == END_MARKER {
            body.slice(..len)
        } else {
            metrics::inc_framing_errors();
            if !allow_recovery_skip {
                return Err(ProtocolError::InvalidFrame("incorrect end marker").into());
            }
            warn!("Bad end marker in {} byte frame, resynchronizing", len);
            self.recover(link, &header, &body)?
        };

        metrics::inc_frames_received();
        trace!("frame payload {}", hex_snippet(&payload, 16));
        Ok(Packet::unpack(&payload)?)
    }

    /// Scan forward for a frame with the same start+length prefix and a good end marker.
    fn recover<L: Link + ?Sized>(
        &mut self,
        link: &mut L,
        header: &[u8],
        body: &[u8],
    ) -> Result<Bytes, ClientError> {
        let prefix = [header[0], header[1], header[2]];
        let len = u16::from_le_bytes([header[1], header[2]]) as usize;
        let frame_size = HEADER_SIZE + len + 1;

        // Everything after the bad start byte is candidate data.
        let mut window = BytesMut::with_capacity(frame_size * 2 + self.pending.len());
        window.extend_from_slice(&header[1..]);
        window.extend_from_slice(body);
        window.extend_from_slice(&self.pending);
        self.pending.clear();

        let mut dropped = 1usize;
        let mut reads = 0usize;
        loop {
            match find_prefix(&window, &prefix) {
                Some(pos) if window.len() >= pos + frame_size => {
                    if window[pos + frame_size - 1] == END_MARKER {
                        dropped += pos;
                        window.advance(pos + HEADER_SIZE);
                        let payload = window.split_to(len).freeze();
                        window.advance(1);
                        self.pending = window;
                        metrics::record_recovery(dropped);
                        info!("Recovered frame stream, dropped {} bytes", dropped);
                        return Ok(payload);
                    }
                    // false start inside the data
                    dropped += pos + 1;
                    window.advance(pos + 1);
                    continue;
                }
                Some(pos) => {
                    let missing = pos + frame_size - window.len();
                    self.fill(link, &mut window, missing, &mut reads)?;
                }
                None => {
                    // keep a possible partial prefix at the end
                    let keep = window.len().min(HEADER_SIZE - 1);
                    let skip = window.len() - keep;
                    dropped += skip;
                    window.advance(skip);
                    let missing = frame_size - window.len();
                    self.fill(link, &mut window, missing, &mut reads)?;
                }
            }
        }
    }

    fn fill<L: Link + ?Sized>(
        &mut self,
        link: &mut L,
        window: &mut BytesMut,
        n: usize,
        reads: &mut usize,
    ) -> Result<(), ClientError> {
        if *reads >= RECOVERY_ATTEMPTS {
            warn!("Frame recovery failed after {} reads", reads);
            return Err(ProtocolError::Unrecoverable.into());
        }
        *reads += 1;
        let more = link.recv(n)?;
        window.extend_from_slice(&more);
        Ok(())
    }
}

fn find_prefix(haystack: &[u8], prefix: &[u8; HEADER_SIZE]) -> Option<usize> {
    haystack.windows(HEADER_SIZE).position(|w| w == prefix)
}

/// Register level operations on top of framed packets.
pub struct RegisterProtocol<L> {
    link: L,
    reader: FrameReader,
}

impl<L: Link> RegisterProtocol<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            reader: FrameReader::new(),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_inner(self) -> L {
        self.link
    }

    /// Drop read-ahead bytes, e.g. after a baud rate change.
    pub fn reset(&mut self) {
        self.reader.clear();
    }

    pub fn send_packet(&mut self, packet: &Packet) -> Result<(), ClientError> {
        let frame = insert_packet_into_frame(packet)?;
        trace!("-> {} {}", packet.kind(), hex_snippet(&frame, 16));
        self.link.send(&frame)?;
        Ok(())
    }

    pub fn recv_packet(&mut self, allow_recovery_skip: bool) -> Result<Packet, ClientError> {
        self.reader.recv_packet(&mut self.link, allow_recovery_skip)
    }

    pub fn read_register_raw(&mut self, address: u8) -> Result<[u8; 4], ClientError> {
        self.send_packet(&Packet::RegReadRequest { address })?;
        loop {
            match self.recv_packet(false)? {
                Packet::RegReadResponse { address: a, value } if a == address => return Ok(value),
                Packet::StreamData { .. } => trace!("skipping stream data while reading 0x{:02X}", address),
                other => {
                    return Err(ProtocolError::UnexpectedPacket {
                        expected: "register read response",
                        got: other.kind().to_string(),
                    }
                    .into())
                }
            }
        }
    }

    /// Write a register and wait for the echo. Streamed frames that arrive
    /// first are discarded; returns how many were skipped.
    pub fn write_register_raw(&mut self, address: u8, value: [u8; 4]) -> Result<usize, ClientError> {
        self.send_packet(&Packet::RegWriteRequest { address, value })?;
        let mut skipped = 0;
        loop {
            match self.recv_packet(true)? {
                Packet::RegWriteResponse { address: a, .. } if a == address => return Ok(skipped),
                Packet::StreamData { .. } => skipped += 1,
                other => {
                    return Err(ProtocolError::UnexpectedPacket {
                        expected: "register write response",
                        got: other.kind().to_string(),
                    }
                    .into())
                }
            }
        }
    }

    pub fn read_register(&mut self, name: &str, mode: Option<Mode>) -> Result<Value, ClientError> {
        let reg = registers::lookup(name, mode)?;
        if !reg.is_readable() {
            return Err(RegisterError::NotReadable(reg.name.clone()).into());
        }
        let raw = self.read_register_raw(reg.address)?;
        Ok(registers::decode(reg, raw)?)
    }

    pub fn write_register(&mut self, name: &str, mode: Option<Mode>, value: &Value) -> Result<usize, ClientError> {
        let reg = registers::lookup(name, mode)?;
        if !reg.is_writable() {
            return Err(RegisterError::NotWritable(reg.name.clone()).into());
        }
        let raw = registers::encode(reg, value)?;
        trace!("write {} = {}", reg.name, value);
        self.write_register_raw(reg.address, raw)
    }

    pub fn read_buffer(&mut self, buffer: u8, start: u16) -> Result<Bytes, ClientError> {
        self.send_packet(&Packet::BufReadRequest { buffer, start })?;
        loop {
            match self.recv_packet(false)? {
                Packet::BufReadResponse { buffer: b, data } if b == buffer => return Ok(data),
                Packet::StreamData { .. } => {}
                other => {
                    return Err(ProtocolError::UnexpectedPacket {
                        expected: "buffer read response",
                        got: other.kind().to_string(),
                    }
                    .into())
                }
            }
        }
    }
}
