//! A121 exploration server protocol.
//!
//! Commands are `{"cmd": ...}` objects. Configs are sent per group and
//! sensor, and results arrive as a JSON header with per-sensor result info
//! followed by the little-endian complex samples of every sensor in order.

use log::warn;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::json::{build_fields, decode_complex_frame, Response};
use super::version::{exploration_variant, ExplorationVariant, ProtocolFeatures};
use crate::a121::{Frame, GroupedMetadata, Metadata, SensorCalibration, SensorConfig, SensorResult, SessionConfig};
use crate::client::{SensorGeneration, SensorInfo, ServerInfo};
use crate::error::{ClientError, ProtocolError};

const SENSOR_FIELDS: &[(&str, &str)] = &[
    ("sweeps_per_frame", "sweeps_per_frame"),
    ("sweep_rate", "sweep_rate"),
    ("frame_rate", "frame_rate"),
    ("continuous_sweep_mode", "continuous_sweep_mode"),
    ("double_buffering", "double_buffering"),
    ("inter_frame_idle_state", "inter_frame_idle_state"),
    ("inter_sweep_idle_state", "inter_sweep_idle_state"),
];

const SUBSWEEP_FIELDS: &[(&str, &str)] = &[
    ("start_point", "start_point"),
    ("num_points", "num_points"),
    ("step_length", "step_length"),
    ("profile", "profile"),
    ("hwaas", "hwaas"),
    ("receiver_gain", "receiver_gain"),
    ("enable_tx", "enable_tx"),
    ("enable_loopback", "enable_loopback"),
    ("phase_enhancement", "phase_enhancement"),
    ("prf", "prf"),
];

const IQ_IMBALANCE_FIELD: (&str, &str) = ("iq_imbalance_compensation", "iq_imbalance_compensation");

fn command(cmd: &str) -> Value {
    json!({ "cmd": cmd })
}

pub fn get_system_info_command() -> Value {
    command("get_system_info")
}

pub fn get_sensor_info_command() -> Value {
    command("get_sensor_info")
}

pub fn start_command() -> Value {
    command("start_streaming")
}

pub fn stop_command() -> Value {
    command("stop_streaming")
}

pub fn set_baudrate_command(baudrate: u32) -> Value {
    json!({ "cmd": "set_uart_baudrate", "baudrate": baudrate })
}

/// Sensor config as the exploration server expects it.
pub fn sensor_config_json(config: &SensorConfig, features: ProtocolFeatures) -> Value {
    let mut out = build_fields(config, SENSOR_FIELDS);
    let subsweeps: Vec<Value> = config
        .subsweeps
        .iter()
        .map(|sub| {
            let mut fields = build_fields(sub, SUBSWEEP_FIELDS);
            if features.iq_imbalance_compensation {
                fields.extend(build_fields(sub, &[IQ_IMBALANCE_FIELD]));
            }
            Value::Object(fields)
        })
        .collect();
    out.insert("subsweeps".to_string(), Value::Array(subsweeps));
    Value::Object(out)
}

pub fn setup_command(
    config: &SessionConfig,
    features: ProtocolFeatures,
    calibrations: &BTreeMap<u32, SensorCalibration>,
) -> Value {
    if !features.calibration_reuse && !calibrations.is_empty() {
        warn!("Server does not support calibration reuse, ignoring stored calibrations");
    }
    let groups: Vec<Value> = config
        .groups
        .iter()
        .map(|group| {
            Value::Array(
                group
                    .iter()
                    .map(|(sensor_id, sensor_config)| {
                        let mut entry = Map::new();
                        entry.insert("sensor_id".to_string(), Value::from(*sensor_id));
                        entry.insert("config".to_string(), sensor_config_json(sensor_config, features));
                        if features.calibration_reuse {
                            if let Some(cal) = calibrations.get(sensor_id) {
                                entry.insert(
                                    "calibration_info".to_string(),
                                    json!({ "temperature": cal.temperature, "data": cal.data }),
                                );
                            }
                        }
                        Value::Object(entry)
                    })
                    .collect(),
            )
        })
        .collect();

    let mut cmd = Map::new();
    cmd.insert("cmd".to_string(), Value::from("setup"));
    cmd.insert("groups".to_string(), Value::Array(groups));
    if let Some(rate) = config.update_rate {
        cmd.insert("update_rate".to_string(), Value::from(rate));
    }
    Value::Object(cmd)
}

#[derive(Debug, Deserialize)]
struct SystemInfo {
    rss_version: String,
    #[serde(default)]
    sensor: Option<String>,
    #[serde(default = "one")]
    sensor_count: u32,
    #[serde(default)]
    ticks_per_second: Option<u64>,
    #[serde(default)]
    hw: Option<String>,
}

fn one() -> u32 {
    1
}

fn field<'a>(response: &'a Response, key: &str) -> Result<&'a Value, ClientError> {
    response
        .get(key)
        .ok_or_else(|| ProtocolError::Malformed(format!("response lacks {}", key)).into())
}

/// Server info and protocol variant from a `get_system_info` response.
pub fn parse_system_info(response: &Response) -> Result<(ServerInfo, ExplorationVariant), ClientError> {
    let raw: SystemInfo =
        serde_json::from_value(field(response, "system_info")?.clone()).map_err(ProtocolError::from)?;
    let sensor = match raw.sensor.as_deref() {
        Some(name) => SensorGeneration::from_name(name)
            .ok_or_else(|| ProtocolError::Malformed(format!("unknown sensor {}", name)))?,
        None => SensorGeneration::A121,
    };
    let (version, variant) = if sensor == SensorGeneration::A121 {
        let (v, variant) = exploration_variant(&raw.rss_version)?;
        (Some(v), variant)
    } else {
        // Wrong generation; the client reports it, the variant is irrelevant.
        (None, ExplorationVariant::Latest)
    };
    let mut info = ServerInfo::new(&raw.rss_version, version, sensor);
    info.sensor_count = raw.sensor_count;
    info.ticks_per_second = raw.ticks_per_second;
    info.hardware_name = raw.hw;
    Ok((info, variant))
}

pub fn parse_sensor_info(response: &Response) -> Result<Vec<SensorInfo>, ClientError> {
    #[derive(Deserialize)]
    struct Raw {
        connected: bool,
        #[serde(default)]
        serial: Option<String>,
    }
    let raw: Vec<Raw> =
        serde_json::from_value(field(response, "sensor_info")?.clone()).map_err(ProtocolError::from)?;
    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(i, r)| SensorInfo {
            sensor_id: i as u32 + 1,
            connected: r.connected,
            serial: r.serial,
        })
        .collect())
}

/// Pair a `[[...]]` response field with the config's group layout.
fn grouped<T, F>(value: &Value, config: &SessionConfig, what: &str, mut parse: F) -> Result<Vec<BTreeMap<u32, T>>, ClientError>
where
    F: FnMut(&Value) -> Result<T, ClientError>,
{
    let groups = value
        .as_array()
        .ok_or_else(|| ProtocolError::Malformed(format!("{} is not a list", what)))?;
    if groups.len() != config.groups.len() {
        return Err(ProtocolError::Malformed(format!(
            "{} has {} groups, expected {}",
            what,
            groups.len(),
            config.groups.len()
        ))
        .into());
    }
    let mut out = Vec::with_capacity(groups.len());
    for (entries, group) in groups.iter().zip(&config.groups) {
        let entries = entries
            .as_array()
            .filter(|e| e.len() == group.len())
            .ok_or_else(|| ProtocolError::Malformed(format!("{} does not match group layout", what)))?;
        let mut map = BTreeMap::new();
        for (entry, sensor_id) in entries.iter().zip(group.keys()) {
            map.insert(*sensor_id, parse(entry)?);
        }
        out.push(map);
    }
    Ok(out)
}

pub fn parse_metadata(response: &Response, config: &SessionConfig) -> Result<GroupedMetadata, ClientError> {
    grouped(field(response, "metadata")?, config, "metadata", |v| {
        serde_json::from_value::<Metadata>(v.clone()).map_err(|e| ProtocolError::from(e).into())
    })
}

/// Calibrations reported with a setup response, if any.
pub fn parse_calibrations(
    response: &Response,
    config: &SessionConfig,
) -> Result<BTreeMap<u32, SensorCalibration>, ClientError> {
    let Some(value) = response.get("calibration_info") else {
        return Ok(BTreeMap::new());
    };
    let groups = grouped(value, config, "calibration_info", |v| {
        serde_json::from_value::<SensorCalibration>(v.clone()).map_err(|e| ProtocolError::from(e).into())
    })?;
    Ok(groups.into_iter().flatten().collect())
}

#[derive(Debug, Deserialize)]
struct RawResultInfo {
    tick: u32,
    #[serde(default)]
    data_saturated: bool,
    #[serde(default)]
    frame_delayed: bool,
    #[serde(default)]
    calibration_needed: bool,
    temperature: i32,
}

/// Split a result payload into per-sensor frames.
pub fn parse_result(
    response: &Response,
    config: &SessionConfig,
    metadata: &GroupedMetadata,
) -> Result<Frame, ClientError> {
    let expected: usize = metadata
        .iter()
        .flat_map(|g| g.values())
        .map(|m| m.frame_data_length * 4)
        .sum();
    if response.payload.len() != expected {
        return Err(ProtocolError::PayloadSize {
            expected: format!("{} bytes of sensor frames", expected),
            got: response.payload.len(),
        }
        .into());
    }

    let infos = grouped(field(response, "result_info")?, config, "result_info", |v| {
        serde_json::from_value::<RawResultInfo>(v.clone()).map_err(|e| ProtocolError::from(e).into())
    })?;

    let mut offset = 0usize;
    let mut groups = Vec::with_capacity(infos.len());
    for (group_info, group_meta) in infos.into_iter().zip(metadata) {
        let mut results = BTreeMap::new();
        for (sensor_id, info) in group_info {
            let meta = group_meta.get(&sensor_id).ok_or_else(|| {
                ProtocolError::Malformed(format!("no metadata for sensor {}", sensor_id))
            })?;
            let size = meta.frame_data_length * 4;
            let sweeps = if meta.sweep_data_length == 0 {
                0
            } else {
                meta.frame_data_length / meta.sweep_data_length
            };
            let frame = decode_complex_frame(
                &response.payload[offset..offset + size],
                sweeps,
                meta.sweep_data_length,
            )?;
            offset += size;
            results.insert(
                sensor_id,
                SensorResult {
                    tick: info.tick,
                    data_saturated: info.data_saturated,
                    frame_delayed: info.frame_delayed,
                    calibration_needed: info.calibration_needed,
                    temperature: info.temperature,
                    frame,
                },
            );
        }
        groups.push(results);
    }
    Ok(Frame { groups })
}
