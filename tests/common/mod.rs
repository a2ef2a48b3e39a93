//! Emulated devices and servers for the integration tests.
//!
//! Each one implements [`Peer`] so it can sit behind a [`MemoryLink`]:
//!
//! - [`FakeModule`] - A111 module speaking the register protocol (UART or SPI)
//! - [`FakeStreamingServer`] - A111 legacy JSON streaming server
//! - [`FakeExplorationServer`] - A121 exploration server
#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{json, Value};
use std::collections::HashMap;

use acconeer_link::a111::Mode;
use acconeer_link::link::{MemoryLink, Peer};
use acconeer_link::protocol::frame::{extract_packet_from_frame, insert_packet_into_frame, Packet};
use acconeer_link::protocol::legacy;

pub const MODULE_VERSION: u32 = 0x02_0E_01;
pub const MODULE_VERSION_STRING: &str = "a111-v2.14.1";

const REG_MODE: u8 = 0x02;
const REG_MAIN_CONTROL: u8 = 0x03;
const REG_STREAMING_CONTROL: u8 = 0x05;
const REG_STATUS: u8 = 0x06;
const REG_UART_BAUDRATE: u8 = 0x07;
const REG_PRODUCT_ID: u8 = 0x10;
const REG_PRODUCT_VERSION: u8 = 0x11;
const REG_RANGE_START: u8 = 0x20;
const REG_RANGE_LENGTH: u8 = 0x21;
const REG_DOWNSAMPLING: u8 = 0x29;
const REG_MODE_PARAM: u8 = 0x40;

const CREATED: u32 = 0x1;
const ACTIVATED: u32 = 0x2;
const DATA_READY: u32 = 0x4;
const ERROR_CREATION: u32 = 0x40000;
const ERROR_ACTIVATION: u32 = 0x80000;

/// A111 module answering register requests the way the firmware does.
pub struct FakeModule {
    regs: HashMap<u8, u32>,
    /// Rate the module listens at; `None` answers at any rate.
    device_baudrate: Option<u32>,
    host_baudrate: Option<u32>,
    created: bool,
    activated: bool,
    errors: u32,
    sequence: u32,
    frames_left: usize,
    fail_create: bool,
    corrupt_at: Option<u32>,
    error_at: Option<u32>,
    pub baudrate_writes: Vec<u32>,
}

impl FakeModule {
    pub fn new() -> Self {
        let mut regs = HashMap::new();
        regs.insert(REG_PRODUCT_ID, 0xACC0);
        regs.insert(REG_PRODUCT_VERSION, MODULE_VERSION);
        regs.insert(REG_DOWNSAMPLING, 1);
        Self {
            regs,
            device_baudrate: None,
            host_baudrate: None,
            created: false,
            activated: false,
            errors: 0,
            sequence: 0,
            frames_left: 1000,
            fail_create: false,
            corrupt_at: None,
            error_at: None,
            baudrate_writes: Vec::new(),
        }
    }

    /// Module that only answers at `baudrate` until told otherwise.
    pub fn at_baudrate(baudrate: u32) -> Self {
        let mut module = Self::new();
        module.device_baudrate = Some(baudrate);
        module
    }

    pub fn with_product_version(mut self, raw: u32) -> Self {
        self.regs.insert(REG_PRODUCT_VERSION, raw);
        self
    }

    pub fn with_product_id(mut self, id: u32) -> Self {
        self.regs.insert(REG_PRODUCT_ID, id);
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn with_frame_limit(mut self, frames: usize) -> Self {
        self.frames_left = frames;
        self
    }

    /// Damage the streamed frame carrying `sequence`.
    pub fn corrupting(mut self, sequence: u32) -> Self {
        self.corrupt_at = Some(sequence);
        self
    }

    /// Flag `error_activation` once the frame counter reaches `sequence`.
    pub fn raising_error_at(mut self, sequence: u32) -> Self {
        self.error_at = Some(sequence);
        self
    }

    pub fn into_link(self) -> MemoryLink {
        MemoryLink::with_peer(self)
    }

    fn reg(&self, address: u8) -> u32 {
        self.regs.get(&address).copied().unwrap_or(0)
    }

    fn mode(&self) -> Mode {
        match self.reg(REG_MODE) {
            1 => Mode::PowerBins,
            3 => Mode::Iq,
            4 => Mode::Sparse,
            _ => Mode::Envelope,
        }
    }

    fn uart_streaming(&self) -> bool {
        self.reg(REG_STREAMING_CONTROL) == 1
    }

    fn status(&self) -> u32 {
        let mut bits = self.errors;
        if self.created {
            bits |= CREATED;
        }
        if self.activated {
            bits |= ACTIVATED;
            if !self.uart_streaming() && self.frames_left > 0 {
                bits |= DATA_READY;
            }
        }
        bits
    }

    /// Fill the output registers the way a created service would.
    fn create(&mut self) {
        let mode = self.mode();
        let start_mm = self.reg(REG_RANGE_START) as i32;
        let length_mm = self.reg(REG_RANGE_LENGTH) as i32;
        let downsampling = self.reg(REG_DOWNSAMPLING).max(1);
        let step_um = match mode {
            Mode::Sparse => 60_000,
            _ => 484,
        } * downsampling;
        let depths = ((length_mm as f64 * 1000.0 / step_um as f64).round() as u32).max(1) + 1;
        let data_length = match mode {
            Mode::PowerBins => {
                let bins = self.reg(REG_MODE_PARAM);
                let bins = if bins == 0 { 5 } else { bins };
                self.regs.insert(0x87, bins);
                bins
            }
            Mode::Envelope => {
                self.regs.insert(0x86, 71);
                depths
            }
            Mode::Iq => {
                self.regs.insert(0x87, 250_000);
                depths
            }
            Mode::Sparse => {
                self.regs.insert(0x87, 1_000_000);
                depths * self.reg(REG_MODE_PARAM).max(1)
            }
        };
        self.regs.insert(0x81, start_mm as u32);
        self.regs.insert(0x82, length_mm as u32);
        self.regs.insert(0x83, data_length);
        self.regs.insert(0x84, 0);
        self.regs.insert(0x85, step_um);
        self.created = true;
    }

    fn main_control(&mut self, command: u32) {
        match command {
            0 => self.activated = false,
            1 | 3 => {
                if self.fail_create {
                    self.errors |= ERROR_CREATION;
                    return;
                }
                self.create();
                if command == 3 {
                    self.activated = true;
                }
            }
            2 => {
                if self.created {
                    self.activated = true;
                } else {
                    self.errors |= ERROR_ACTIVATION;
                }
            }
            4 => {
                self.errors = 0;
                if self.activated && !self.uart_streaming() && self.frames_left > 0 {
                    self.frames_left -= 1;
                    self.sequence += 1;
                    if self.error_at == Some(self.sequence) {
                        self.error_at = None;
                        self.errors |= ERROR_ACTIVATION;
                    }
                }
            }
            _ => {}
        }
    }

    fn samples(&self) -> Bytes {
        let count = self.reg(0x83) as usize;
        let width = if self.mode() == Mode::Iq { 2 } else { 1 };
        let mut out = BytesMut::with_capacity(count * width * 2);
        for i in 0..count * width {
            out.put_u16_le((100 + (i % 50) as u16) + self.sequence as u16);
        }
        out.freeze()
    }

    fn result_info(&self) -> Vec<(u8, [u8; 4])> {
        vec![
            (0xA0, [0; 4]),
            (0xA1, [0; 4]),
            (0xA2, [0; 4]),
            (0xA3, [0; 4]),
            (0xA4, self.sequence.to_le_bytes()),
        ]
    }

    fn handle(&mut self, packet: Packet) -> Option<Packet> {
        match packet {
            Packet::RegReadRequest { address } => {
                let value = if address == REG_STATUS {
                    self.status()
                } else {
                    self.reg(address)
                };
                Some(Packet::RegReadResponse {
                    address,
                    value: value.to_le_bytes(),
                })
            }
            Packet::RegWriteRequest { address, value } => {
                let raw = u32::from_le_bytes(value);
                match address {
                    REG_MAIN_CONTROL => self.main_control(raw),
                    REG_UART_BAUDRATE => self.baudrate_writes.push(raw),
                    _ => {
                        self.regs.insert(address, raw);
                    }
                }
                Some(Packet::RegWriteResponse { address, value })
            }
            Packet::BufReadRequest { buffer, .. } => Some(Packet::BufReadResponse {
                buffer,
                data: self.samples(),
            }),
            _ => None,
        }
    }

    fn hears_host(&self) -> bool {
        match (self.device_baudrate, self.host_baudrate) {
            (Some(device), Some(host)) => device == host,
            _ => true,
        }
    }
}

impl Default for FakeModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Peer for FakeModule {
    fn on_receive(&mut self, data: &[u8]) -> Vec<u8> {
        if !self.hears_host() {
            return Vec::new();
        }
        let Ok(packet) = extract_packet_from_frame(data) else {
            return Vec::new();
        };
        let reply = match self.handle(packet) {
            Some(reply) => insert_packet_into_frame(&reply).map(|f| f.to_vec()).unwrap_or_default(),
            None => Vec::new(),
        };
        // the acknowledgement still goes out at the old rate
        if let Some(&rate) = self.baudrate_writes.last() {
            if self.device_baudrate.is_some() && self.device_baudrate != Some(rate) {
                self.device_baudrate = Some(rate);
            }
        }
        reply
    }

    fn on_idle(&mut self) -> Vec<u8> {
        if !(self.activated && self.uart_streaming() && self.frames_left > 0) {
            return Vec::new();
        }
        self.frames_left -= 1;
        self.sequence += 1;
        let Ok(frame) = insert_packet_into_frame(&Packet::StreamData {
            result_info: self.result_info(),
            buffer: self.samples(),
        }) else {
            return Vec::new();
        };
        if self.corrupt_at == Some(self.sequence) && frame.len() > 12 {
            // a few bytes lost on the wire
            let mut damaged = frame[..8].to_vec();
            damaged.extend_from_slice(&frame[12..]);
            self.sequence += 1;
            if let Ok(good) = insert_packet_into_frame(&Packet::StreamData {
                result_info: self.result_info(),
                buffer: self.samples(),
            }) {
                damaged.extend_from_slice(&good);
            }
            return damaged;
        }
        frame.to_vec()
    }

    fn on_baudrate(&mut self, baudrate: u32) {
        self.host_baudrate = Some(baudrate);
    }
}

fn line(value: &Value) -> Vec<u8> {
    let mut out = serde_json::to_vec(value).unwrap_or_default();
    out.push(b'\n');
    out
}

fn commands(data: &[u8]) -> Vec<Value> {
    data.split(|b| *b == b'\n')
        .filter(|l| !l.is_empty())
        .filter_map(|l| serde_json::from_slice(l).ok())
        .collect()
}

/// A111 legacy streaming server.
pub struct FakeStreamingServer {
    version: String,
    modes: Vec<Mode>,
    reject_setups: usize,
    streaming: bool,
    mode: Mode,
    sensors: usize,
    data_length: usize,
    sequence: u32,
    frames_left: usize,
    end_when_done: bool,
    in_flight_on_stop: usize,
}

impl FakeStreamingServer {
    pub fn new() -> Self {
        Self {
            version: "a111-v2.14.1".to_string(),
            modes: Mode::ALL.to_vec(),
            reject_setups: 0,
            streaming: false,
            mode: Mode::Envelope,
            sensors: 1,
            data_length: 0,
            sequence: 0,
            frames_left: 1000,
            end_when_done: false,
            in_flight_on_stop: 0,
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_modes(mut self, modes: &[Mode]) -> Self {
        self.modes = modes.to_vec();
        self
    }

    /// Answer the next `n` setups with an error.
    pub fn rejecting_setups(mut self, n: usize) -> Self {
        self.reject_setups = n;
        self
    }

    /// Send `frames` frames, then end the session on its own.
    pub fn ending_after(mut self, frames: usize) -> Self {
        self.frames_left = frames;
        self.end_when_done = true;
        self
    }

    /// Frames already on the wire when a stop command arrives.
    pub fn with_in_flight_frames(mut self, n: usize) -> Self {
        self.in_flight_on_stop = n;
        self
    }

    pub fn into_link(self) -> MemoryLink {
        MemoryLink::with_peer(self)
    }

    fn setup(&mut self, cmd: &Value, name: &str) -> Value {
        if self.reject_setups > 0 {
            self.reject_setups -= 1;
            return json!({"status": "error", "message": "sensor busy"});
        }
        let mode_name = name.trim_start_matches("setup_").trim_end_matches("_service");
        self.mode = Mode::from_name(mode_name).unwrap_or(Mode::Envelope);
        self.sensors = cmd["sensors"].as_array().map_or(1, |s| s.len().max(1));
        let start = cmd["range_start"].as_f64().unwrap_or(0.2);
        let length = cmd["range_length"].as_f64().unwrap_or(0.6);
        let step = if self.mode == Mode::Sparse { 0.06 } else { 0.000484 };
        let depths = (length / step).round() as usize + 1;
        self.data_length = match self.mode {
            Mode::PowerBins => cmd["bin_count"].as_u64().unwrap_or(5) as usize,
            Mode::Sparse => depths * cmd["sweeps_per_frame"].as_u64().unwrap_or(16) as usize,
            _ => depths,
        };
        json!({
            "status": "ok",
            "start_m": start,
            "length_m": length,
            "data_length": self.data_length,
            "stitch_count": 0,
            "step_length_m": step,
            "payload_size": 0,
        })
    }

    fn data_frame(&mut self) -> Vec<u8> {
        self.sequence += 1;
        let width = if self.mode == Mode::Iq { 2 } else { 1 };
        let mut payload = BytesMut::new();
        for sensor in 0..self.sensors {
            for i in 0..self.data_length * width {
                payload.put_u16(1000 * (sensor as u16 + 1) + (i % 100) as u16);
            }
        }
        let info: Vec<Value> = (0..self.sensors)
            .map(|_| json!({"sequence_number": self.sequence, "data_saturated": false}))
            .collect();
        let mut out = line(&json!({
            "status": "ok",
            "result_info": info,
            "payload_size": payload.len(),
        }));
        out.extend_from_slice(&payload);
        out
    }
}

impl Default for FakeStreamingServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Peer for FakeStreamingServer {
    fn on_receive(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for cmd in commands(data) {
            let name = cmd["cmd"].as_str().unwrap_or_default().to_string();
            match name.as_str() {
                "get_version" => out.extend(line(&legacy::version_reply(&self.version, &self.modes))),
                "start_streaming" => {
                    self.streaming = true;
                    out.extend(line(&json!({"status": "start"})));
                }
                "stop_streaming" => {
                    for _ in 0..self.in_flight_on_stop {
                        let frame = self.data_frame();
                        out.extend(frame);
                    }
                    self.streaming = false;
                    out.extend(line(&json!({"status": "stop"})));
                }
                n if n.starts_with("setup_") => {
                    let reply = self.setup(&cmd, n);
                    out.extend(line(&reply));
                }
                other => out.extend(line(&json!({"status": "error", "message": format!("unknown command {}", other)}))),
            }
        }
        out
    }

    fn on_idle(&mut self) -> Vec<u8> {
        if !self.streaming {
            return Vec::new();
        }
        if self.frames_left == 0 {
            if self.end_when_done {
                self.streaming = false;
                return line(&json!({"status": "end"}));
            }
            return Vec::new();
        }
        self.frames_left -= 1;
        self.data_frame()
    }
}

/// A121 exploration server.
pub struct FakeExplorationServer {
    rss_version: String,
    sensor: &'static str,
    report_calibration: bool,
    streaming: bool,
    /// `frame_data_length`, `sweep_data_length` per configured sensor, group order.
    layout: Vec<Vec<(usize, usize)>>,
    tick: u32,
    frames_left: usize,
    end_when_done: bool,
}

impl FakeExplorationServer {
    pub fn new(rss_version: &str) -> Self {
        Self {
            rss_version: rss_version.to_string(),
            sensor: "a121",
            report_calibration: false,
            streaming: false,
            layout: Vec::new(),
            tick: 0,
            frames_left: 1000,
            end_when_done: false,
        }
    }

    /// Pretend to be an A111 board running the same server.
    pub fn reporting_a111(mut self) -> Self {
        self.sensor = "a111";
        self
    }

    pub fn reporting_calibration(mut self) -> Self {
        self.report_calibration = true;
        self
    }

    pub fn ending_after(mut self, frames: usize) -> Self {
        self.frames_left = frames;
        self.end_when_done = true;
        self
    }

    pub fn into_link(self) -> MemoryLink {
        MemoryLink::with_peer(self)
    }

    fn setup(&mut self, cmd: &Value) -> Value {
        let groups = cmd["groups"].as_array().cloned().unwrap_or_default();
        let mut layout = Vec::new();
        let mut metadata = Vec::new();
        let mut calibration = Vec::new();
        for group in &groups {
            let entries = group.as_array().cloned().unwrap_or_default();
            let mut group_layout = Vec::new();
            let mut group_meta = Vec::new();
            let mut group_cal = Vec::new();
            for entry in &entries {
                let config = &entry["config"];
                let spf = config["sweeps_per_frame"].as_u64().unwrap_or(1) as usize;
                let lengths: Vec<usize> = config["subsweeps"]
                    .as_array()
                    .map(|subs| {
                        subs.iter()
                            .map(|s| s["num_points"].as_u64().unwrap_or(1) as usize)
                            .collect()
                    })
                    .unwrap_or_default();
                let mut offsets = Vec::with_capacity(lengths.len());
                let mut sweep = 0;
                for len in &lengths {
                    offsets.push(sweep);
                    sweep += len;
                }
                group_layout.push((spf * sweep, sweep));
                group_meta.push(json!({
                    "frame_data_length": spf * sweep,
                    "sweep_data_length": sweep,
                    "subsweep_data_offset": offsets,
                    "subsweep_data_length": lengths,
                    "calibration_temperature": 25,
                    "tick_period": 1e-6,
                    "base_step_length_m": 0.0025,
                    "max_sweep_rate": 8000.0,
                }));
                group_cal.push(json!({"temperature": 25, "data": format!("cafe{:02}", entry["sensor_id"].as_u64().unwrap_or(0))}));
            }
            layout.push(group_layout);
            metadata.push(Value::Array(group_meta));
            calibration.push(Value::Array(group_cal));
        }
        self.layout = layout;
        let mut reply = json!({"status": "ok", "metadata": metadata});
        if self.report_calibration {
            reply["calibration_info"] = Value::Array(calibration);
        }
        reply
    }

    fn result_frame(&mut self) -> Vec<u8> {
        self.tick += 1000;
        let mut payload = BytesMut::new();
        let mut info = Vec::new();
        for group in &self.layout {
            let mut group_info = Vec::new();
            for (frame_len, _) in group {
                for i in 0..*frame_len {
                    payload.put_i16_le(i as i16);
                    payload.put_i16_le(-(i as i16));
                }
                group_info.push(json!({
                    "tick": self.tick,
                    "data_saturated": false,
                    "frame_delayed": false,
                    "calibration_needed": false,
                    "temperature": 25,
                }));
            }
            info.push(Value::Array(group_info));
        }
        let mut out = line(&json!({
            "status": "ok",
            "result_info": info,
            "payload_size": payload.len(),
        }));
        out.extend_from_slice(&payload);
        out
    }
}

impl Peer for FakeExplorationServer {
    fn on_receive(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for cmd in commands(data) {
            let reply = match cmd["cmd"].as_str().unwrap_or_default() {
                "get_system_info" => json!({
                    "status": "ok",
                    "system_info": {
                        "rss_version": self.rss_version,
                        "sensor": self.sensor,
                        "sensor_count": 5,
                        "ticks_per_second": 1_000_000,
                        "hw": "xm125",
                    },
                }),
                "get_sensor_info" => json!({
                    "status": "ok",
                    "sensor_info": [
                        {"connected": true, "serial": "0001"},
                        {"connected": false},
                    ],
                }),
                "set_uart_baudrate" => json!({"status": "ok"}),
                "setup" => self.setup(&cmd),
                "start_streaming" => {
                    self.streaming = true;
                    json!({"status": "start"})
                }
                "stop_streaming" => {
                    self.streaming = false;
                    json!({"status": "stop"})
                }
                other => json!({"status": "error", "message": format!("unknown command {}", other)}),
            };
            out.extend(line(&reply));
        }
        out
    }

    fn on_idle(&mut self) -> Vec<u8> {
        if !self.streaming {
            return Vec::new();
        }
        if self.frames_left == 0 {
            if self.end_when_done {
                self.streaming = false;
                return line(&json!({"status": "end"}));
            }
            return Vec::new();
        }
        self.frames_left -= 1;
        self.result_frame()
    }
}

/// Commands the host sent over a JSON link, decoded.
pub fn sent_commands(messages: &[Vec<u8>]) -> Vec<Value> {
    messages.iter().flat_map(|m| commands(m)).collect()
}
