//! A121 session, sensor and subsweep configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::alert::Alert;
use crate::error::ClientError;
use crate::protocol::json::{ConfigValue, WireEnum, WireFields};
use crate::record::Record;

pub const HWAAS_MIN: u32 = 1;
pub const HWAAS_MAX: u32 = 511;
pub const MAX_RECEIVER_GAIN: u32 = 23;
pub const MAX_SUBSWEEPS: usize = 4;

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
    pub fn number(&self) -> u32 {
        match self {
            Profile::Profile1 => 1,
            Profile::Profile2 => 2,
            Profile::Profile3 => 3,
            Profile::Profile4 => 4,
            Profile::Profile5 => 5,
        }
    }

    /// Pulse length (full width at half maximum) in meters.
    pub fn fwhm_m(&self) -> f64 {
        match self {
            Profile::Profile1 => 0.04,
            Profile::Profile2 => 0.07,
            Profile::Profile3 => 0.14,
            Profile::Profile4 => 0.19,
            Profile::Profile5 => 0.32,
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
        i64::from(self.number())
    }
}

/// Pulse repetition frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Prf {
    #[serde(rename = "19_5_MHz")]
    Prf19_5Mhz,
    #[serde(rename = "15_6_MHz")]
    Prf15_6Mhz,
    #[serde(rename = "13_0_MHz")]
    Prf13_0Mhz,
    #[serde(rename = "8_7_MHz")]
    Prf8_7Mhz,
    #[serde(rename = "6_5_MHz")]
    Prf6_5Mhz,
    #[serde(rename = "5_2_MHz")]
    Prf5_2Mhz,
}

impl Prf {
    pub fn frequency_hz(&self) -> f64 {
        match self {
            Prf::Prf19_5Mhz => 19.5e6,
            Prf::Prf15_6Mhz => 15.6e6,
            Prf::Prf13_0Mhz => 13.0e6,
            Prf::Prf8_7Mhz => 8.7e6,
            Prf::Prf6_5Mhz => 6.5e6,
            Prf::Prf5_2Mhz => 5.2e6,
        }
    }
}

impl WireEnum for Prf {
    fn name(&self) -> &'static str {
        match self {
            Prf::Prf19_5Mhz => "19_5_MHz",
            Prf::Prf15_6Mhz => "15_6_MHz",
            Prf::Prf13_0Mhz => "13_0_MHz",
            Prf::Prf8_7Mhz => "8_7_MHz",
            Prf::Prf6_5Mhz => "6_5_MHz",
            Prf::Prf5_2Mhz => "5_2_MHz",
        }
    }
    fn ordinal(&self) -> i64 {
        match self {
            Prf::Prf19_5Mhz => 0,
            Prf::Prf15_6Mhz => 1,
            Prf::Prf13_0Mhz => 2,
            Prf::Prf8_7Mhz => 3,
            Prf::Prf6_5Mhz => 4,
            Prf::Prf5_2Mhz => 5,
        }
    }
    fn json_value(&self) -> Option<&'static str> {
        Some(match self {
            Prf::Prf19_5Mhz => "PRF_19_5_MHz",
            Prf::Prf15_6Mhz => "PRF_15_6_MHz",
            Prf::Prf13_0Mhz => "PRF_13_0_MHz",
            Prf::Prf8_7Mhz => "PRF_8_7_MHz",
            Prf::Prf6_5Mhz => "PRF_6_5_MHz",
            Prf::Prf5_2Mhz => "PRF_5_2_MHz",
        })
    }
}

/// Sensor state between sweeps or frames, deepest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    DeepSleep,
    Sleep,
    Ready,
}

impl WireEnum for IdleState {
    fn name(&self) -> &'static str {
        match self {
            IdleState::DeepSleep => "deep_sleep",
            IdleState::Sleep => "sleep",
            IdleState::Ready => "ready",
        }
    }
    fn ordinal(&self) -> i64 {
        match self {
            IdleState::DeepSleep => 0,
            IdleState::Sleep => 1,
            IdleState::Ready => 2,
        }
    }
    fn json_value(&self) -> Option<&'static str> {
        Some(self.name())
    }
}

/// Hardware accelerated average samples, always within 1..=511.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Hwaas(u16);

impl Hwaas {
    pub fn new(value: u32) -> Result<Self, ClientError> {
        if !(HWAAS_MIN..=HWAAS_MAX).contains(&value) {
            return Err(ClientError::InvalidValue {
                param: "hwaas",
                reason: format!("{} is outside {}..={}", value, HWAAS_MIN, HWAAS_MAX),
            });
        }
        Ok(Self(value as u16))
    }

    pub fn get(&self) -> u32 {
        u32::from(self.0)
    }
}

impl TryFrom<u32> for Hwaas {
    type Error = ClientError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Hwaas::new(value)
    }
}

impl From<Hwaas> for u32 {
    fn from(h: Hwaas) -> u32 {
        h.get()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsweepConfig {
    /// First point, in base step lengths.
    pub start_point: i32,
    pub num_points: u32,
    pub step_length: u32,
    pub profile: Profile,
    pub hwaas: Hwaas,
    pub receiver_gain: u32,
    pub enable_tx: bool,
    pub enable_loopback: bool,
    pub phase_enhancement: bool,
    pub prf: Prf,
    #[serde(default)]
    pub iq_imbalance_compensation: bool,
}

impl Default for SubsweepConfig {
    fn default() -> Self {
        Self {
            start_point: 80,
            num_points: 160,
            step_length: 1,
            profile: Profile::Profile3,
            hwaas: Hwaas(8),
            receiver_gain: 16,
            enable_tx: true,
            enable_loopback: false,
            phase_enhancement: false,
            prf: Prf::Prf15_6Mhz,
            iq_imbalance_compensation: false,
        }
    }
}

impl SubsweepConfig {
    pub fn set_hwaas(&mut self, hwaas: u32) -> Result<(), ClientError> {
        self.hwaas = Hwaas::new(hwaas)?;
        Ok(())
    }

    fn validate_into(&self, prefix: &str, alerts: &mut Vec<Alert>) {
        let param = |name: &str| format!("{}{}", prefix, name);
        if self.num_points == 0 {
            alerts.push(Alert::error(&param("num_points"), "must be at least 1"));
        }
        if self.receiver_gain > MAX_RECEIVER_GAIN {
            alerts.push(Alert::error(
                &param("receiver_gain"),
                format!("must be at most {}", MAX_RECEIVER_GAIN),
            ));
        }
        let s = self.step_length;
        if s == 0 || (24 % s != 0 && s % 24 != 0) {
            alerts.push(Alert::error(
                &param("step_length"),
                "must be a divisor or multiple of 24",
            ));
        }
        if self.enable_loopback && self.profile == Profile::Profile2 {
            alerts.push(Alert::error(&param("enable_loopback"), "not supported with profile 2"));
        }
        if self.prf == Prf::Prf19_5Mhz && self.profile != Profile::Profile1 {
            alerts.push(Alert::error(&param("prf"), "19.5 MHz requires profile 1"));
        }
        if !self.enable_tx {
            alerts.push(Alert::info(&param("enable_tx"), "transmitter is disabled"));
        }
    }
}

impl WireFields for SubsweepConfig {
    fn field(&self, key: &str) -> Option<ConfigValue> {
        Some(match key {
            "start_point" => ConfigValue::Int(i64::from(self.start_point)),
            "num_points" => ConfigValue::Int(i64::from(self.num_points)),
            "step_length" => ConfigValue::Int(i64::from(self.step_length)),
            "profile" => ConfigValue::of_enum(&self.profile),
            "hwaas" => ConfigValue::Int(i64::from(self.hwaas.get())),
            "receiver_gain" => ConfigValue::Int(i64::from(self.receiver_gain)),
            "enable_tx" => ConfigValue::Bool(self.enable_tx),
            "enable_loopback" => ConfigValue::Bool(self.enable_loopback),
            "phase_enhancement" => ConfigValue::Bool(self.phase_enhancement),
            "prf" => ConfigValue::of_enum(&self.prf),
            "iq_imbalance_compensation" => ConfigValue::Bool(self.iq_imbalance_compensation),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub sweeps_per_frame: u32,
    #[serde(default)]
    pub sweep_rate: Option<f64>,
    #[serde(default)]
    pub frame_rate: Option<f64>,
    pub continuous_sweep_mode: bool,
    pub double_buffering: bool,
    pub inter_frame_idle_state: IdleState,
    pub inter_sweep_idle_state: IdleState,
    pub subsweeps: Vec<SubsweepConfig>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            sweeps_per_frame: 1,
            sweep_rate: None,
            frame_rate: None,
            continuous_sweep_mode: false,
            double_buffering: false,
            inter_frame_idle_state: IdleState::DeepSleep,
            inter_sweep_idle_state: IdleState::Ready,
            subsweeps: vec![SubsweepConfig::default()],
        }
    }
}

impl Record for SensorConfig {}

impl SensorConfig {
    pub fn validate(&self) -> Vec<Alert> {
        let mut alerts = Vec::new();
        self.validate_into("", &mut alerts);
        alerts
    }

    fn validate_into(&self, prefix: &str, alerts: &mut Vec<Alert>) {
        let param = |name: &str| format!("{}{}", prefix, name);
        if self.subsweeps.is_empty() || self.subsweeps.len() > MAX_SUBSWEEPS {
            alerts.push(Alert::error(
                &param("subsweeps"),
                format!("must have 1 to {} subsweeps", MAX_SUBSWEEPS),
            ));
        }
        if self.sweeps_per_frame == 0 {
            alerts.push(Alert::error(&param("sweeps_per_frame"), "must be at least 1"));
        }
        for (name, rate) in [("sweep_rate", self.sweep_rate), ("frame_rate", self.frame_rate)] {
            if matches!(rate, Some(r) if r <= 0.0) {
                alerts.push(Alert::error(&param(name), "must be positive"));
            }
        }
        if self.continuous_sweep_mode {
            if self.frame_rate.is_some() {
                alerts.push(Alert::error(
                    &param("continuous_sweep_mode"),
                    "frame rate must be unset in continuous sweep mode",
                ));
            }
            if self.inter_frame_idle_state != self.inter_sweep_idle_state {
                alerts.push(Alert::error(
                    &param("continuous_sweep_mode"),
                    "idle states must match in continuous sweep mode",
                ));
            }
        }
        if self.inter_sweep_idle_state < self.inter_frame_idle_state {
            alerts.push(Alert::error(
                &param("inter_sweep_idle_state"),
                "can't be deeper than the inter frame idle state",
            ));
        }
        if self.double_buffering && self.sweeps_per_frame < 2 {
            alerts.push(Alert::warning(
                &param("double_buffering"),
                "has no effect with a single sweep per frame",
            ));
        }
        for (i, sub) in self.subsweeps.iter().enumerate() {
            sub.validate_into(&format!("{}subsweeps[{}].", prefix, i), alerts);
        }
    }

    /// Points per sweep, summed over subsweeps.
    pub fn sweep_data_length(&self) -> usize {
        self.subsweeps.iter().map(|s| s.num_points as usize).sum()
    }

    pub fn frame_data_length(&self) -> usize {
        self.sweep_data_length() * self.sweeps_per_frame as usize
    }
}

impl WireFields for SensorConfig {
    fn field(&self, key: &str) -> Option<ConfigValue> {
        Some(match key {
            "sweeps_per_frame" => ConfigValue::Int(i64::from(self.sweeps_per_frame)),
            "sweep_rate" => ConfigValue::Float(self.sweep_rate?),
            "frame_rate" => ConfigValue::Float(self.frame_rate?),
            "continuous_sweep_mode" => ConfigValue::Bool(self.continuous_sweep_mode),
            "double_buffering" => ConfigValue::Bool(self.double_buffering),
            "inter_frame_idle_state" => ConfigValue::of_enum(&self.inter_frame_idle_state),
            "inter_sweep_idle_state" => ConfigValue::of_enum(&self.inter_sweep_idle_state),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sensor configs per group, keyed by sensor id.
    pub groups: Vec<BTreeMap<u32, SensorConfig>>,
    #[serde(default)]
    pub update_rate: Option<f64>,
    /// Results are grouped per sensor and group instead of a single sensor result.
    #[serde(default)]
    pub extended: bool,
}

impl Record for SessionConfig {}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(SensorConfig::default())
    }
}

impl SessionConfig {
    /// Single group with one sensor (id 1).
    pub fn new(sensor_config: SensorConfig) -> Self {
        Self::for_sensor(1, sensor_config)
    }

    pub fn for_sensor(sensor_id: u32, sensor_config: SensorConfig) -> Self {
        let mut group = BTreeMap::new();
        group.insert(sensor_id, sensor_config);
        Self {
            groups: vec![group],
            update_rate: None,
            extended: false,
        }
    }

    pub fn sensor_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.groups.iter().flat_map(|g| g.keys().copied()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn validate(&self) -> Vec<Alert> {
        let mut alerts = Vec::new();
        if self.groups.is_empty() {
            alerts.push(Alert::error("groups", "at least one group is required"));
        }
        for (gi, group) in self.groups.iter().enumerate() {
            if group.is_empty() {
                alerts.push(Alert::error("groups", format!("group {} is empty", gi)));
            }
            for (sensor_id, sensor_config) in group {
                if *sensor_id == 0 {
                    alerts.push(Alert::error("groups", "sensor ids are 1-based"));
                }
                sensor_config.validate_into(&format!("groups[{}][{}].", gi, sensor_id), &mut alerts);
            }
        }
        if matches!(self.update_rate, Some(r) if r <= 0.0) {
            alerts.push(Alert::error("update_rate", "must be positive"));
        }
        let entries: usize = self.groups.iter().map(|g| g.len()).sum();
        if !self.extended && entries > 1 {
            alerts.push(Alert::error(
                "extended",
                "must be set for sessions with several sensors or groups",
            ));
        }
        alerts
    }

    /// Rate that bounds the time between frames, if any.
    pub fn effective_update_rate(&self) -> Option<f64> {
        self.update_rate.or_else(|| {
            self.groups
                .first()
                .and_then(|g| g.values().next())
                .and_then(|c| c.frame_rate)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::errors_of;

    #[test]
    fn hwaas_is_checked_on_construction() {
        assert!(Hwaas::new(0).is_err());
        assert!(Hwaas::new(512).is_err());
        assert_eq!(Hwaas::new(511).unwrap().get(), 511);
        let mut sub = SubsweepConfig::default();
        assert!(sub.set_hwaas(1000).is_err());
        assert_eq!(sub.hwaas.get(), 8);
    }

    #[test]
    fn hwaas_out_of_range_fails_deserialization() {
        let mut value = serde_json::to_value(SubsweepConfig::default()).unwrap();
        value["hwaas"] = serde_json::json!(600);
        assert!(serde_json::from_value::<SubsweepConfig>(value).is_err());
    }

    #[test]
    fn default_session_is_valid() {
        assert!(errors_of(&SessionConfig::default().validate()).is_empty());
    }

    #[test]
    fn multi_sensor_requires_extended() {
        let mut config = SessionConfig::default();
        config.groups[0].insert(2, SensorConfig::default());
        assert!(!errors_of(&config.validate()).is_empty());
        config.extended = true;
        assert!(errors_of(&config.validate()).is_empty());
        assert_eq!(config.sensor_ids(), vec![1, 2]);
    }

    #[test]
    fn nested_alerts_name_their_path() {
        let mut config = SessionConfig::default();
        config.groups[0].get_mut(&1).unwrap().subsweeps[0].receiver_gain = 30;
        let errs = errors_of(&config.validate());
        assert_eq!(errs[0].param.as_deref(), Some("groups[0][1].subsweeps[0].receiver_gain"));
    }

    #[test]
    fn idle_state_ordering() {
        let mut sensor = SensorConfig::default();
        sensor.inter_frame_idle_state = IdleState::Ready;
        sensor.inter_sweep_idle_state = IdleState::DeepSleep;
        assert!(!errors_of(&sensor.validate()).is_empty());
    }

    #[test]
    fn data_lengths() {
        let mut sensor = SensorConfig::default();
        sensor.sweeps_per_frame = 4;
        sensor.subsweeps.push(SubsweepConfig {
            num_points: 40,
            ..SubsweepConfig::default()
        });
        assert_eq!(sensor.sweep_data_length(), 200);
        assert_eq!(sensor.frame_data_length(), 800);
    }
}
