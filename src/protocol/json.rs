//! Newline-delimited JSON protocol codec.
//!
//! Shared by the A111 streaming server and the A121 exploration server.
//! A command is one compact JSON object followed by `\n`. A response is one
//! JSON header line, optionally followed by `payload_size` raw bytes.

use bytes::{Buf, Bytes};
use log::{debug, trace};
use ndarray::{Array2, ArrayD, IxDyn};
use num_complex::Complex64;
use serde_json::{Map, Value};
use std::fmt;

use crate::a111::{Mode, SweepData};
use crate::error::{ClientError, ProtocolError};
use crate::link::Link;
use crate::logutil::{escape_bytes, escape_log};
use crate::metrics;

/// Enum that can be put on the wire either by name or by number.
pub trait WireEnum {
    fn name(&self) -> &'static str;

    fn ordinal(&self) -> i64;

    /// String the JSON servers expect, when they don't take the ordinal.
    fn json_value(&self) -> Option<&'static str> {
        None
    }
}

/// Typed config field value, before conversion to JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Enum {
        name: &'static str,
        ordinal: i64,
        json_value: Option<&'static str>,
    },
    List(Vec<ConfigValue>),
}

impl ConfigValue {
    pub fn of_enum<E: WireEnum + ?Sized>(e: &E) -> Self {
        ConfigValue::Enum {
            name: e.name(),
            ordinal: e.ordinal(),
            json_value: e.json_value(),
        }
    }

    /// Booleans go out as 0/1, enums as their json value or else their ordinal.
    pub fn to_wire(&self) -> Value {
        match self {
            ConfigValue::Bool(b) => Value::from(u8::from(*b)),
            ConfigValue::Int(i) => Value::from(*i),
            ConfigValue::Float(f) => Value::from(*f),
            ConfigValue::Enum {
                ordinal,
                json_value,
                ..
            } => match json_value {
                Some(s) => Value::from(*s),
                None => Value::from(*ordinal),
            },
            ConfigValue::List(items) => Value::Array(items.iter().map(|v| v.to_wire()).collect()),
        }
    }
}

/// Read access to config fields by their config-side key.
pub trait WireFields {
    /// `None` when the field is unset or does not apply to this config.
    fn field(&self, key: &str) -> Option<ConfigValue>;
}

/// Build a command object from `(config_key, wire_key)` pairs, skipping absent fields.
pub fn build_fields<C: WireFields + ?Sized>(config: &C, table: &[(&str, &str)]) -> Map<String, Value> {
    let mut out = Map::new();
    for (config_key, wire_key) in table {
        if let Some(value) = config.field(config_key) {
            out.insert((*wire_key).to_string(), value.to_wire());
        }
    }
    out
}

/// Compact JSON followed by a newline.
pub fn encode_command(command: &Value) -> Result<Vec<u8>, ProtocolError> {
    let mut line = serde_json::to_vec(command)?;
    line.push(b'\n');
    Ok(line)
}

/// Translate header keys; keys mapped to `None` and unknown keys are dropped.
pub fn remap_keys(header: &Map<String, Value>, table: &[(&str, Option<&str>)]) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in header {
        match table.iter().find(|(from, _)| *from == key.as_str()) {
            Some((_, Some(to))) => {
                out.insert((*to).to_string(), value.clone());
            }
            Some((_, None)) => {}
            None => trace!("dropping unknown header key {}", key),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Start,
    Stop,
    End,
    Error,
}

impl Status {
    pub fn parse(s: &str) -> Result<Status, ProtocolError> {
        match s {
            "ok" => Ok(Status::Ok),
            "start" => Ok(Status::Start),
            "stop" => Ok(Status::Stop),
            "end" => Ok(Status::End),
            "error" => Ok(Status::Error),
            other => Err(ProtocolError::UnknownStatus(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Start => "start",
            Status::Stop => "stop",
            Status::End => "end",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded response: header line plus its raw payload.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub header: Map<String, Value>,
    pub payload: Bytes,
}

impl Response {
    pub fn message(&self) -> Option<&str> {
        self.header.get("message").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.header.get(key)
    }

    /// Fail unless the status is `expected`.
    pub fn expect(self, expected: Status) -> Result<Self, ClientError> {
        if self.status == expected {
            return Ok(self);
        }
        if self.status == Status::Error {
            let msg = self.message().unwrap_or("no message").to_string();
            return Err(ClientError::Server(msg));
        }
        Err(ClientError::UnexpectedResponse {
            expected: expected.to_string(),
            got: self.status.to_string(),
        })
    }
}

/// JSON command/response channel over any link.
pub struct JsonChannel<L> {
    link: L,
}

impl<L: Link> JsonChannel<L> {
    pub fn new(link: L) -> Self {
        Self { link }
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

    pub fn send_command(&mut self, command: &Value) -> Result<(), ClientError> {
        let line = encode_command(command)?;
        debug!("-> {}", escape_log(String::from_utf8_lossy(&line).trim_end()));
        self.link.send(&line)?;
        Ok(())
    }

    /// Read one header line and its payload; check the status when `expected` is given.
    pub fn recv_response(&mut self, expected: Option<Status>) -> Result<Response, ClientError> {
        let line = self.link.recv_until(b"\n")?;
        let header: Value = serde_json::from_slice(&line).map_err(ProtocolError::from)?;
        let header = match header {
            Value::Object(map) => map,
            other => {
                return Err(ProtocolError::Malformed(format!("header is not an object: {}", other)).into())
            }
        };
        let status = header
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("response has no status".to_string()))?;
        let status = Status::parse(status)?;

        let payload_size = header.get("payload_size").and_then(Value::as_u64).unwrap_or(0) as usize;
        let payload = if payload_size > 0 {
            self.link.recv(payload_size)?
        } else {
            Bytes::new()
        };
        metrics::record_json_response(payload_size);
        if payload_size > 0 {
            trace!("<- status={} payload={}B", status, payload_size);
        } else {
            debug!("<- {}", escape_bytes(&line));
        }

        let response = Response {
            status,
            header,
            payload,
        };
        match expected {
            Some(exp) => response.expect(exp),
            None => Ok(response),
        }
    }

    /// Send a command and wait for the expected status.
    pub fn request(&mut self, command: &Value, expected: Status) -> Result<Response, ClientError> {
        self.send_command(command)?;
        self.recv_response(Some(expected))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeParams {
    pub mode: Mode,
    pub num_sensors: usize,
    /// Only used for sparse.
    pub sweeps_per_frame: usize,
    pub squeeze: bool,
    pub byte_order: ByteOrder,
}

fn read_u16s(payload: &[u8], order: ByteOrder) -> Vec<u16> {
    let mut buf = payload;
    let mut out = Vec::with_capacity(payload.len() / 2);
    while buf.remaining() >= 2 {
        out.push(match order {
            ByteOrder::Big => buf.get_u16(),
            ByteOrder::Little => buf.get_u16_le(),
        });
    }
    out
}

fn read_i16s(payload: &[u8], order: ByteOrder) -> Vec<i16> {
    let mut buf = payload;
    let mut out = Vec::with_capacity(payload.len() / 2);
    while buf.remaining() >= 2 {
        out.push(match order {
            ByteOrder::Big => buf.get_i16(),
            ByteOrder::Little => buf.get_i16_le(),
        });
    }
    out
}

fn size_error(expected: String, got: usize) -> ProtocolError {
    ProtocolError::PayloadSize { expected, got }
}

/// Decode a raw A111 sample payload into an array shaped for the service.
pub fn decode_stream_payload(payload: &[u8], params: &DecodeParams) -> Result<SweepData, ProtocolError> {
    let sensors = params.num_sensors.max(1);
    let squeeze = params.squeeze && sensors == 1;

    match params.mode {
        Mode::Envelope | Mode::PowerBins => {
            if payload.len() % (2 * sensors) != 0 {
                return Err(size_error(format!("{} sensors of u16 samples", sensors), payload.len()));
            }
            let samples: Vec<f64> = read_u16s(payload, params.byte_order)
                .into_iter()
                .map(f64::from)
                .collect();
            let depths = samples.len() / sensors;
            let shape: Vec<usize> = if squeeze { vec![depths] } else { vec![sensors, depths] };
            let array = ArrayD::from_shape_vec(IxDyn(&shape), samples)
                .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
            Ok(SweepData::Real(array))
        }
        Mode::Iq => {
            if payload.len() % (4 * sensors) != 0 {
                return Err(size_error(format!("{} sensors of i16 pairs", sensors), payload.len()));
            }
            let raw = read_i16s(payload, params.byte_order);
            let samples: Vec<Complex64> = raw
                .chunks_exact(2)
                .map(|p| Complex64::new(f64::from(p[0]), f64::from(p[1])))
                .collect();
            let depths = samples.len() / sensors;
            let shape: Vec<usize> = if squeeze { vec![depths] } else { vec![sensors, depths] };
            let array = ArrayD::from_shape_vec(IxDyn(&shape), samples)
                .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
            Ok(SweepData::Complex(array))
        }
        Mode::Sparse => {
            let spf = params.sweeps_per_frame.max(1);
            if payload.len() % (2 * sensors * spf) != 0 {
                return Err(size_error(
                    format!("{} sensors x {} sweeps of u16 samples", sensors, spf),
                    payload.len(),
                ));
            }
            let samples: Vec<f64> = read_u16s(payload, params.byte_order)
                .into_iter()
                .map(f64::from)
                .collect();
            let depths = samples.len() / (sensors * spf);
            let shape: Vec<usize> = if squeeze {
                vec![spf, depths]
            } else {
                vec![sensors, spf, depths]
            };
            let array = ArrayD::from_shape_vec(IxDyn(&shape), samples)
                .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
            Ok(SweepData::Real(array))
        }
    }
}

/// Decode one A121 sensor frame: little-endian `(i16 re, i16 im)` pairs,
/// shaped `(sweeps_per_frame, sweep_data_length)`.
pub fn decode_complex_frame(
    payload: &[u8],
    sweeps_per_frame: usize,
    sweep_data_length: usize,
) -> Result<Array2<Complex64>, ProtocolError> {
    let expected = 4 * sweeps_per_frame * sweep_data_length;
    if payload.len() != expected {
        return Err(size_error(
            format!("{} x {} complex samples", sweeps_per_frame, sweep_data_length),
            payload.len(),
        ));
    }
    let samples: Vec<Complex64> = read_i16s(payload, ByteOrder::Little)
        .chunks_exact(2)
        .map(|p| Complex64::new(f64::from(p[0]), f64::from(p[1])))
        .collect();
    Array2::from_shape_vec((sweeps_per_frame, sweep_data_length), samples)
        .map_err(|e| ProtocolError::Malformed(e.to_string()))
}
