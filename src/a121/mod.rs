//! # A121 sensor data model
//!
//! Session configuration, per-sensor metadata, calibration and results for
//! the A121 generation. Sessions are organized in groups of sensors; both
//! metadata and results keep that layout.

use ndarray::Array2;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::record::Record;

pub mod config;

pub use config::{Hwaas, IdleState, Prf, Profile, SensorConfig, SessionConfig, SubsweepConfig};

/// Server computed facts about one configured sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub frame_data_length: usize,
    pub sweep_data_length: usize,
    pub subsweep_data_offset: Vec<usize>,
    pub subsweep_data_length: Vec<usize>,
    pub calibration_temperature: i32,
    /// Seconds per tick of the result `tick` counter.
    pub tick_period: f64,
    pub base_step_length_m: f64,
    pub max_sweep_rate: f64,
    #[serde(default)]
    pub high_speed_mode: bool,
}

impl Record for Metadata {}

/// Metadata laid out like the session groups.
pub type GroupedMetadata = Vec<BTreeMap<u32, Metadata>>;

/// Opaque sensor calibration captured by the server, reusable on later setups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorCalibration {
    pub temperature: i32,
    /// Hex encoded calibration blob.
    pub data: String,
}

impl Record for SensorCalibration {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorResult {
    pub tick: u32,
    pub data_saturated: bool,
    pub frame_delayed: bool,
    pub calibration_needed: bool,
    pub temperature: i32,
    /// Complex samples shaped `(sweeps_per_frame, sweep_data_length)`.
    pub frame: Array2<Complex64>,
}

impl Record for SensorResult {}

impl SensorResult {
    /// Samples of one subsweep, all sweeps.
    pub fn subsweep(&self, metadata: &Metadata, index: usize) -> Option<ndarray::ArrayView2<'_, Complex64>> {
        let offset = *metadata.subsweep_data_offset.get(index)?;
        let length = *metadata.subsweep_data_length.get(index)?;
        if offset + length > self.frame.ncols() {
            return None;
        }
        Some(self.frame.slice(ndarray::s![.., offset..offset + length]))
    }
}

/// One A121 measurement, grouped like the session config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub groups: Vec<BTreeMap<u32, SensorResult>>,
}

impl Record for Frame {}

impl Frame {
    /// The single result of a non-extended session.
    pub fn single(&self) -> Option<&SensorResult> {
        self.groups.first().and_then(|g| g.values().next())
    }
}
