//! A111 legacy streaming server protocol.
//!
//! Commands carry `api_version: 2`. Sample payloads are big-endian.

use serde_json::{json, Map, Value};

use super::json::{build_fields, remap_keys, ByteOrder, DecodeParams, Response};
use super::version::{self, Version};
use crate::a111::{Metadata, Mode, ResultInfo, ServiceConfig};
use crate::client::{SensorGeneration, ServerInfo};
use crate::error::{ClientError, ProtocolError};

pub const API_VERSION: u32 = 2;

pub const BYTE_ORDER: ByteOrder = ByteOrder::Big;

/// Config key -> wire key for setup commands.
const SETUP_FIELDS: &[(&str, &str)] = &[
    ("sensor", "sensors"),
    ("range_start", "range_start"),
    ("range_length", "range_length"),
    ("profile", "profile"),
    ("update_rate", "frequency"),
    ("gain", "gain"),
    ("hw_accelerated_average_samples", "hw_accelerated_average_samples"),
    ("repetition_mode", "repetition_mode"),
    ("downsampling_factor", "downsampling_factor"),
    ("power_save_mode", "power_save_mode"),
    ("noise_level_normalization", "noise_level_normalization"),
    ("maximize_signal_attenuation", "maximize_signal_attenuation"),
    ("asynchronous_measurement", "asynchronous_measurement"),
    ("tx_disable", "tx_disable"),
    ("mur", "mur"),
    ("bin_count", "bin_count"),
    ("running_average_factor", "running_average_factor"),
    ("depth_lowpass_cutoff_ratio", "depth_lowpass_cutoff_ratio"),
    ("sampling_mode", "sampling_mode"),
    ("sweeps_per_frame", "sweeps_per_frame"),
    ("sweep_rate", "sweep_rate"),
];

/// Setup response header key -> metadata key.
const METADATA_KEYS: &[(&str, Option<&str>)] = &[
    ("start_m", Some("range_start_m")),
    ("length_m", Some("range_length_m")),
    ("data_length", Some("data_length")),
    ("stitch_count", Some("stitch_count")),
    ("step_length_m", Some("step_length_m")),
    ("bin_count", Some("bin_count")),
    ("sweep_rate", Some("sweep_rate")),
    ("depth_lowpass_cutoff_ratio", Some("depth_lowpass_cutoff_ratio")),
    ("free_space_absolute_offset", Some("free_space_absolute_offset")),
    ("status", None),
    ("payload_size", None),
    ("message", None),
];

fn command(cmd: &str, mut fields: Map<String, Value>) -> Value {
    fields.insert("cmd".to_string(), Value::from(cmd));
    fields.insert("api_version".to_string(), Value::from(API_VERSION));
    Value::Object(fields)
}

pub fn get_version_command() -> Value {
    command("get_version", Map::new())
}

pub fn start_command() -> Value {
    command("start_streaming", Map::new())
}

pub fn stop_command() -> Value {
    command("stop_streaming", Map::new())
}

pub fn setup_command(config: &ServiceConfig) -> Value {
    let fields = build_fields(config, SETUP_FIELDS);
    command(&format!("setup_{}_service", config.mode()), fields)
}

/// Server info from a `get_version` response.
pub fn parse_version(response: &Response) -> Result<ServerInfo, ClientError> {
    let version_string = response
        .get("version_str")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("version response lacks version_str".to_string()))?;
    let version: Version = version::check_a111(version_string)?;
    let sensor = match response.get("sensor").and_then(Value::as_str) {
        Some(name) => SensorGeneration::from_name(name)
            .ok_or_else(|| ProtocolError::Malformed(format!("unknown sensor {}", name)))?,
        None => SensorGeneration::A111,
    };

    let mut info = ServerInfo::new(version_string, Some(version), sensor);
    if let Some(n) = response.get("sensor_count").and_then(Value::as_u64) {
        info.sensor_count = n as u32;
    }
    if let Some(hw) = response.get("hw").and_then(Value::as_str) {
        info.hardware_name = Some(hw.to_string());
    }
    if let Some(modes) = response.get("supported_modes").and_then(Value::as_array) {
        // Modes this client does not know are ignored.
        info.supported_modes = Some(
            modes
                .iter()
                .filter_map(Value::as_str)
                .filter_map(Mode::from_name)
                .collect(),
        );
    }
    Ok(info)
}

pub fn parse_metadata(response: &Response) -> Result<Metadata, ClientError> {
    let fields = remap_keys(&response.header, METADATA_KEYS);
    let metadata: Metadata = serde_json::from_value(Value::Object(fields)).map_err(ProtocolError::from)?;
    Ok(metadata)
}

/// Result info from a streamed data header: a list (one per sensor) or a single object.
pub fn parse_result_info(response: &Response) -> Result<Vec<ResultInfo>, ClientError> {
    let info = match response.get("result_info") {
        None | Some(Value::Null) => Vec::new(),
        Some(v @ Value::Array(_)) => serde_json::from_value(v.clone()).map_err(ProtocolError::from)?,
        Some(v) => vec![serde_json::from_value(v.clone()).map_err(ProtocolError::from)?],
    };
    Ok(info)
}

/// Decode parameters for a configured session.
pub fn decode_params(config: &ServiceConfig, squeeze: bool) -> DecodeParams {
    DecodeParams {
        mode: config.mode(),
        num_sensors: config.sensor.len(),
        sweeps_per_frame: config.sweeps_per_frame().unwrap_or(1) as usize,
        squeeze,
        byte_order: BYTE_ORDER,
    }
}

/// A synthetic `get_version` reply, used by test servers.
pub fn version_reply(version_string: &str, modes: &[Mode]) -> Value {
    json!({
        "status": "ok",
        "version_str": version_string,
        "sensor": "a111",
        "supported_modes": modes.iter().map(|m| m.as_str()).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::json::Status;
    use bytes::Bytes;

    fn response(header: Value) -> Response {
        let Value::Object(header) = header else { unreachable!() };
        Response {
            status: Status::Ok,
            header,
            payload: Bytes::new(),
        }
    }

    #[test]
    fn setup_command_uses_wire_names() {
        let mut config = ServiceConfig::envelope();
        config.update_rate = Some(10.0);
        let cmd = setup_command(&config);
        assert_eq!(cmd["cmd"], "setup_envelope_service");
        assert_eq!(cmd["api_version"], 2);
        assert_eq!(cmd["sensors"], json!([1]));
        assert_eq!(cmd["frequency"], 10.0);
        assert_eq!(cmd["repetition_mode"], "host_driven");
        assert_eq!(cmd["noise_level_normalization"], 1);
        assert!(cmd.get("sweeps_per_frame").is_none());
    }

    #[test]
    fn metadata_keys_are_remapped() {
        let resp = response(json!({
            "status": "ok",
            "start_m": 0.2,
            "length_m": 0.6,
            "data_length": 1239,
            "step_length_m": 0.000484,
            "payload_size": 0,
            "internal_thing": 3,
        }));
        let meta = parse_metadata(&resp).unwrap();
        assert_eq!(meta.range_start_m, 0.2);
        assert_eq!(meta.data_length, 1239);
    }

    #[test]
    fn version_reply_parses() {
        let resp = response(version_reply("a111-v2.12.0", &[Mode::Envelope, Mode::Iq]));
        let info = parse_version(&resp).unwrap();
        assert_eq!(info.sensor, SensorGeneration::A111);
        assert_eq!(info.supported_modes, Some(vec![Mode::Envelope, Mode::Iq]));
        let old = response(json!({"status": "ok", "version_str": "1.5.0"}));
        assert!(matches!(parse_version(&old), Err(ClientError::UnsupportedVersion(_))));
    }

    #[test]
    fn single_result_info_object_is_accepted() {
        let resp = response(json!({"status": "ok", "result_info": {"sequence_number": 4, "data_saturated": true}}));
        let info = parse_result_info(&resp).unwrap();
        assert_eq!(info.len(), 1);
        assert!(info[0].data_saturated);
        assert_eq!(info[0].sequence_number, Some(4));
    }
}
