//! # A111 sensor data model
//!
//! Service modes, service configuration, session metadata and per-frame
//! results for the A111 generation. These are plain values: the protocol
//! layers read them to build wire commands and produce them from responses.

use ndarray::ArrayD;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::json::WireEnum;
use crate::record::Record;

pub mod config;

pub use config::{ServiceConfig, ServiceParams};

/// Measurement service of an A111 session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    PowerBins,
    Envelope,
    Iq,
    Sparse,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::PowerBins, Mode::Envelope, Mode::Iq, Mode::Sparse];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::PowerBins => "power_bins",
            Mode::Envelope => "envelope",
            Mode::Iq => "iq",
            Mode::Sparse => "sparse",
        }
    }

    pub fn from_name(name: &str) -> Option<Mode> {
        Mode::ALL.iter().copied().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WireEnum for Mode {
    fn name(&self) -> &'static str {
        self.as_str()
    }
    fn ordinal(&self) -> i64 {
        match self {
            Mode::PowerBins => 1,
            Mode::Envelope => 2,
            Mode::Iq => 3,
            Mode::Sparse => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Profile {
    #[serde(rename = "profile_1")]
    Profile1,
    #[serde(rename = "profile_2")]
    Profile2,
    #[serde(rename = "profile_3")]
    Profile3,
    #[serde(rename = "profile_4")]
    Profile4,
    #[serde(rename = "profile_5")]
    Profile5,
}

impl Profile {
    /// Envelope full width at half maximum of a point reflector, in meters.
    pub fn envelope_fwhm_m(&self) -> f64 {
        match self {
            Profile::Profile1 => 0.10,
            Profile::Profile2 => 0.12,
            Profile::Profile3 => 0.18,
            Profile::Profile4 => 0.36,
            Profile::Profile5 => 0.60,
        }
    }
}

impl WireEnum for Profile {
    fn name(&self) -> &'static str {
        match self {
            Profile::Profile1 => "profile_1",
            Profile::Profile2 => "profile_2",
            Profile::Profile3 => "profile_3",
            Profile::Profile4 => "profile_4",
            Profile::Profile5 => "profile_5",
        }
    }
    fn ordinal(&self) -> i64 {
        match self {
            Profile::Profile1 => 1,
            Profile::Profile2 => 2,
            Profile::Profile3 => 3,
            Profile::Profile4 => 4,
            Profile::Profile5 => 5,
        }
    }
}

/// Who triggers sweeps: the host polling for them, or the sensor on its own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepetitionMode {
    HostDriven,
    SensorDriven,
}

impl WireEnum for RepetitionMode {
    fn name(&self) -> &'static str {
        match self {
            RepetitionMode::HostDriven => "host_driven",
            RepetitionMode::SensorDriven => "sensor_driven",
        }
    }
    fn ordinal(&self) -> i64 {
        match self {
            RepetitionMode::HostDriven => 1,
            RepetitionMode::SensorDriven => 2,
        }
    }
    // The servers still call sensor driven repetition "streaming".
    fn json_value(&self) -> Option<&'static str> {
        Some(match self {
            RepetitionMode::HostDriven => "host_driven",
            RepetitionMode::SensorDriven => "streaming",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSaveMode {
    Off,
    Sleep,
    Ready,
    Active,
    Hibernate,
}

impl WireEnum for PowerSaveMode {
    fn name(&self) -> &'static str {
        match self {
            PowerSaveMode::Off => "off",
            PowerSaveMode::Sleep => "sleep",
            PowerSaveMode::Ready => "ready",
            PowerSaveMode::Active => "active",
            PowerSaveMode::Hibernate => "hibernate",
        }
    }
    fn ordinal(&self) -> i64 {
        match self {
            PowerSaveMode::Off => 0,
            PowerSaveMode::Sleep => 1,
            PowerSaveMode::Ready => 2,
            PowerSaveMode::Active => 3,
            PowerSaveMode::Hibernate => 4,
        }
    }
    fn json_value(&self) -> Option<&'static str> {
        Some(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    A,
    B,
}

impl WireEnum for SamplingMode {
    fn name(&self) -> &'static str {
        match self {
            SamplingMode::A => "a",
            SamplingMode::B => "b",
        }
    }
    fn ordinal(&self) -> i64 {
        match self {
            SamplingMode::A => 0,
            SamplingMode::B => 1,
        }
    }
}

/// Maximum unambiguous range setting (6 or 9 pulses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mur {
    #[serde(rename = "mur_6")]
    Six,
    #[serde(rename = "mur_9")]
    Nine,
}

impl WireEnum for Mur {
    fn name(&self) -> &'static str {
        match self {
            Mur::Six => "mur_6",
            Mur::Nine => "mur_9",
        }
    }
    fn ordinal(&self) -> i64 {
        match self {
            Mur::Six => 6,
            Mur::Nine => 9,
        }
    }
}

/// Server-computed facts about a configured A111 session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub range_start_m: f64,
    pub range_length_m: f64,
    /// Samples per sensor per frame.
    pub data_length: usize,
    #[serde(default)]
    pub stitch_count: u32,
    #[serde(default)]
    pub step_length_m: f64,
    #[serde(default)]
    pub bin_count: Option<u32>,
    #[serde(default)]
    pub sweep_rate: Option<f64>,
    #[serde(default)]
    pub depth_lowpass_cutoff_ratio: Option<f64>,
    #[serde(default)]
    pub free_space_absolute_offset: Option<u32>,
}

impl Record for Metadata {}

/// Side-band information delivered with every frame, one per sensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultInfo {
    #[serde(default)]
    pub sequence_number: Option<u32>,
    #[serde(default)]
    pub data_saturated: bool,
    #[serde(default)]
    pub missed_data: bool,
    #[serde(default)]
    pub data_quality_warning: bool,
    #[serde(default)]
    pub sensor_communication_error: bool,
}

impl Record for ResultInfo {}

/// Decoded samples of one frame.
///
/// Shapes: `(sensors, depths)` for envelope, IQ and power bins and
/// `(sensors, sweeps_per_frame, depths)` for sparse; the sensor axis is
/// dropped when the client squeezes single-sensor output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SweepData {
    Real(ArrayD<f64>),
    Complex(ArrayD<Complex64>),
}

impl SweepData {
    pub fn shape(&self) -> &[usize] {
        match self {
            SweepData::Real(a) => a.shape(),
            SweepData::Complex(a) => a.shape(),
        }
    }

    pub fn as_real(&self) -> Option<&ArrayD<f64>> {
        match self {
            SweepData::Real(a) => Some(a),
            SweepData::Complex(_) => None,
        }
    }

    pub fn as_complex(&self) -> Option<&ArrayD<Complex64>> {
        match self {
            SweepData::Complex(a) => Some(a),
            SweepData::Real(_) => None,
        }
    }
}

/// One A111 measurement as returned by `get_next`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub info: Vec<ResultInfo>,
    pub data: SweepData,
}

impl Record for Frame {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_round_trip() {
        for mode in Mode::ALL {
            assert_eq!(Mode::from_name(mode.as_str()), Some(mode));
        }
        assert_eq!(Mode::from_name("spectrum"), None);
    }

    #[test]
    fn sensor_driven_goes_out_as_streaming() {
        assert_eq!(RepetitionMode::SensorDriven.json_value(), Some("streaming"));
        assert_eq!(RepetitionMode::SensorDriven.name(), "sensor_driven");
    }

    #[test]
    fn metadata_survives_json() {
        let meta = Metadata {
            range_start_m: 0.2,
            range_length_m: 0.6,
            data_length: 1239,
            stitch_count: 0,
            step_length_m: 0.000484,
            bin_count: None,
            sweep_rate: None,
            depth_lowpass_cutoff_ratio: None,
            free_space_absolute_offset: Some(71),
        };
        let back = Metadata::from_json(&meta.to_json().unwrap()).unwrap();
        assert_eq!(back, meta);
    }
}
