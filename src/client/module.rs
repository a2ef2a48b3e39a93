//! A111 module session steps shared by the UART and SPI clients.
//!
//! Both talk the register protocol; they only differ in how frames reach
//! the host (pushed stream packets vs. polled buffer reads).

use log::{debug, trace, warn};
use std::thread;
use std::time::{Duration, Instant};

use crate::a111::{Metadata, Mode, ResultInfo, ServiceConfig, ServiceParams};
use crate::client::{SensorGeneration, ServerInfo};
use crate::error::{ClientError, RegisterError};
use crate::link::Link;
use crate::protocol::frame::RegisterProtocol;
use crate::protocol::json::WireEnum;
use crate::protocol::version;
use crate::registers::{self, status_table, Value};

/// Value the `product_id` register holds on A111 modules.
pub const PRODUCT_ID: i64 = 0xACC0;

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(2);

fn enum_value<E: WireEnum>(e: &E) -> Value {
    Value::Enum(e.name().to_string())
}

/// Register writes that configure a session, in order.
pub fn config_writes(config: &ServiceConfig) -> Vec<(&'static str, Value)> {
    let mut writes = vec![
        ("mode_selection", Value::Enum(config.mode().as_str().to_string())),
        ("range_start", Value::Float(config.range_start())),
        ("range_length", Value::Float(config.range_length())),
        ("repetition_mode", enum_value(&config.repetition_mode)),
    ];
    if let Some(rate) = config.update_rate {
        writes.push(("update_rate", Value::Float(rate)));
    }
    writes.extend([
        ("gain", Value::Float(config.gain())),
        ("sensor_power_mode", enum_value(&config.power_save_mode)),
        ("tx_disable", Value::Bool(config.tx_disable)),
        ("profile_selection", enum_value(&config.profile)),
        ("downsampling_factor", Value::from(config.downsampling_factor())),
        (
            "hw_accelerated_average_samples",
            Value::from(config.hw_accelerated_average_samples()),
        ),
        ("noise_level_normalization", Value::Bool(config.noise_level_normalization)),
        ("maximize_signal_attenuation", Value::Bool(config.maximize_signal_attenuation)),
        ("asynchronous_measurement", Value::Bool(config.asynchronous_measurement)),
    ]);
    match config.service() {
        ServiceParams::PowerBins { bin_count } => {
            if let Some(n) = bin_count {
                writes.push(("requested_bin_count", Value::from(*n)));
            }
        }
        ServiceParams::Envelope {
            running_average_factor,
        } => writes.push(("running_average_factor", Value::Float(*running_average_factor))),
        ServiceParams::Iq {
            depth_lowpass_cutoff_ratio,
            sampling_mode,
        } => {
            if let Some(ratio) = depth_lowpass_cutoff_ratio {
                writes.push(("depth_lowpass_cutoff_ratio", Value::Float(*ratio)));
            }
            writes.push(("sampling_mode", enum_value(sampling_mode)));
            writes.push(("mur", enum_value(&config.mur)));
        }
        ServiceParams::Sparse {
            sweeps_per_frame,
            sweep_rate,
            sampling_mode,
        } => {
            writes.push(("sweeps_per_frame", Value::from(*sweeps_per_frame)));
            if let Some(rate) = sweep_rate {
                writes.push(("sweep_rate", Value::Float(*rate)));
            }
            writes.push(("sampling_mode", enum_value(sampling_mode)));
            writes.push(("mur", enum_value(&config.mur)));
        }
    }
    writes
}

/// `product_version` packs major, minor and patch into the low three bytes.
pub fn version_string(raw: u32) -> String {
    format!("a111-v{}.{}.{}", (raw >> 16) & 0xFF, (raw >> 8) & 0xFF, raw & 0xFF)
}

/// Read the product id; `Ok(false)` if something answered but is not an A111 module.
pub fn probe<L: Link>(proto: &mut RegisterProtocol<L>) -> Result<bool, ClientError> {
    match proto.read_register("product_id", None)? {
        Value::Int(id) if id == PRODUCT_ID => Ok(true),
        other => {
            warn!("Unexpected product id {}", other);
            Ok(false)
        }
    }
}

/// Identify the module after the link is up.
pub fn server_info<L: Link>(proto: &mut RegisterProtocol<L>) -> Result<ServerInfo, ClientError> {
    let raw = match proto.read_register("product_version", None)? {
        Value::Int(v) => v as u32,
        other => {
            return Err(RegisterError::Decode {
                register: "product_version".to_string(),
                reason: format!("unexpected value {}", other),
            }
            .into())
        }
    };
    let version_string = version_string(raw);
    let version = version::check_a111(&version_string)?;
    debug!("A111 module software {}", version_string);
    Ok(ServerInfo::new(&version_string, Some(version), SensorGeneration::A111))
}

/// Poll `status` until `flag` is set, failing on any error flag.
pub fn wait_status<L: Link>(
    proto: &mut RegisterProtocol<L>,
    flag: &str,
    timeout: Duration,
) -> Result<(), ClientError> {
    let table = status_table()?;
    let mask = match flag {
        "created" => table.created,
        "activated" => table.activated,
        "data_ready" => table.data_ready,
        other => {
            return Err(RegisterError::Unknown(format!("status flag {}", other)).into());
        }
    };
    let deadline = Instant::now() + timeout;
    loop {
        let bits = read_status(proto)?;
        if table.has_error(bits) {
            return Err(ClientError::Server(format!(
                "module reported {}",
                table.errors(bits).join(", ")
            )));
        }
        if bits & mask == mask {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ClientError::Client(format!("timed out waiting for status {}", flag)));
        }
        thread::sleep(STATUS_POLL_INTERVAL);
    }
}

pub fn read_status<L: Link>(proto: &mut RegisterProtocol<L>) -> Result<u32, ClientError> {
    let table = status_table()?;
    Ok(u32::from_le_bytes(proto.read_register_raw(table.address)?))
}

/// Write the config and create the service; returns the module's metadata.
pub fn setup<L: Link>(
    proto: &mut RegisterProtocol<L>,
    config: &ServiceConfig,
    timeout: Duration,
) -> Result<Metadata, ClientError> {
    let mode = config.mode();
    proto.write_register("main_control", None, &Value::from("stop"))?;
    proto.write_register("main_control", None, &Value::from("clear_status"))?;
    for (name, value) in config_writes(config) {
        trace!("setup {} = {}", name, value);
        proto.write_register(name, Some(mode), &value)?;
    }
    proto.write_register("main_control", None, &Value::from("create"))?;
    wait_status(proto, "created", timeout)?;
    read_metadata(proto, mode)
}

fn read_f64<L: Link>(proto: &mut RegisterProtocol<L>, name: &str, mode: Mode) -> Result<f64, ClientError> {
    let value = proto.read_register(name, Some(mode))?;
    value.as_f64().ok_or_else(|| {
        RegisterError::Decode {
            register: name.to_string(),
            reason: format!("expected a number, got {}", value),
        }
        .into()
    })
}

pub fn read_metadata<L: Link>(proto: &mut RegisterProtocol<L>, mode: Mode) -> Result<Metadata, ClientError> {
    let mut metadata = Metadata {
        range_start_m: read_f64(proto, "output_data_sensor_start", mode)?,
        range_length_m: read_f64(proto, "output_data_sensor_length", mode)?,
        data_length: read_f64(proto, "output_data_length", mode)? as usize,
        stitch_count: read_f64(proto, "output_stitch_count", mode)? as u32,
        step_length_m: read_f64(proto, "output_step_length", mode)?,
        bin_count: None,
        sweep_rate: None,
        depth_lowpass_cutoff_ratio: None,
        free_space_absolute_offset: None,
    };
    match mode {
        Mode::PowerBins => metadata.bin_count = Some(read_f64(proto, "output_bin_count", mode)? as u32),
        Mode::Envelope => {
            metadata.free_space_absolute_offset =
                Some(read_f64(proto, "output_free_space_absolute_offset", mode)? as u32)
        }
        Mode::Iq => {
            metadata.depth_lowpass_cutoff_ratio =
                Some(read_f64(proto, "output_depth_lowpass_cutoff_ratio", mode)?)
        }
        Mode::Sparse => metadata.sweep_rate = Some(read_f64(proto, "output_sweep_rate", mode)?),
    }
    Ok(metadata)
}

/// Decode the result info registers delivered with a frame.
pub fn result_info(entries: &[(u8, [u8; 4])], mode: Option<Mode>) -> Result<ResultInfo, ClientError> {
    let catalog = registers::catalog()?;
    let mut info = ResultInfo::default();
    for (address, raw) in entries {
        let reg = match catalog.lookup(*address, mode) {
            Ok(r) => r,
            Err(e) => {
                debug!("ignoring result info entry: {}", e);
                continue;
            }
        };
        let value = registers::decode(reg, *raw)?;
        match (reg.name.as_str(), value) {
            ("data_saturated", Value::Bool(b)) => info.data_saturated = b,
            ("missed_data", Value::Bool(b)) => info.missed_data = b,
            ("data_quality_warning", Value::Bool(b)) => info.data_quality_warning = b,
            ("sensor_communication_error", Value::Bool(b)) => info.sensor_communication_error = b,
            ("sequence_number", Value::Int(n)) => info.sequence_number = Some(n as u32),
            (name, _) => trace!("unused result info register {}", name),
        }
    }
    Ok(info)
}

/// Addresses of the result info registers, for hosts that poll them.
pub fn result_info_addresses() -> Result<Vec<u8>, ClientError> {
    let mut out = Vec::new();
    for name in [
        "data_saturated",
        "missed_data",
        "data_quality_warning",
        "sensor_communication_error",
        "sequence_number",
    ] {
        out.push(registers::lookup(name, None)?.address);
    }
    Ok(out)
}
