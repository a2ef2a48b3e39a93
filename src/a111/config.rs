//! A111 service configuration.
//!
//! Range-checked parameters are private and only change through setters that
//! reject out-of-range values immediately. Cross-field problems are reported
//! by [`ServiceConfig::validate`] as alerts.

use serde::{Deserialize, Serialize};

use super::{Mode, Mur, PowerSaveMode, Profile, RepetitionMode, SamplingMode};
use crate::alert::Alert;
use crate::error::ClientError;
use crate::protocol::json::{ConfigValue, WireFields};
use crate::record::Record;

pub const HWAAS_RANGE: std::ops::RangeInclusive<u32> = 1..=63;
pub const SWEEPS_PER_FRAME_RANGE: std::ops::RangeInclusive<u32> = 1..=2048;
/// Longest range a single session can cover, in meters.
const MAX_RANGE_LENGTH_M: f64 = 7.0;
const MIN_RANGE_START_M: f64 = -0.7;
/// Sparse depth spacing before downsampling, in meters.
pub const SPARSE_BASE_STEP_M: f64 = 0.06;
/// Envelope/IQ depth spacing before downsampling, in meters.
pub const BASE_STEP_M: f64 = 0.000484;
/// Sparse sample buffer size per sensor.
const SPARSE_MAX_SAMPLES: u32 = 2048;

/// Mode specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ServiceParams {
    PowerBins {
        bin_count: Option<u32>,
    },
    Envelope {
        running_average_factor: f64,
    },
    Iq {
        depth_lowpass_cutoff_ratio: Option<f64>,
        sampling_mode: SamplingMode,
    },
    Sparse {
        sweeps_per_frame: u32,
        sweep_rate: Option<f64>,
        sampling_mode: SamplingMode,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawServiceConfig")]
pub struct ServiceConfig {
    /// Sensor ids, 1-based.
    pub sensor: Vec<u32>,
    /// `[start, end]` in meters.
    pub range_interval: [f64; 2],
    pub profile: Profile,
    /// Frames per second; `None` means as fast as possible (host driven only).
    pub update_rate: Option<f64>,
    pub repetition_mode: RepetitionMode,
    pub power_save_mode: PowerSaveMode,
    pub noise_level_normalization: bool,
    pub maximize_signal_attenuation: bool,
    pub asynchronous_measurement: bool,
    pub tx_disable: bool,
    pub mur: Mur,
    gain: f64,
    hw_accelerated_average_samples: u32,
    downsampling_factor: u32,
    service: ServiceParams,
}

impl Record for ServiceConfig {}

/// Stored form of [`ServiceConfig`]; the checked fields go through the setters
/// on the way in.
#[derive(Deserialize)]
struct RawServiceConfig {
    sensor: Vec<u32>,
    range_interval: [f64; 2],
    profile: Profile,
    update_rate: Option<f64>,
    repetition_mode: RepetitionMode,
    power_save_mode: PowerSaveMode,
    noise_level_normalization: bool,
    maximize_signal_attenuation: bool,
    asynchronous_measurement: bool,
    tx_disable: bool,
    mur: Mur,
    gain: f64,
    hw_accelerated_average_samples: u32,
    downsampling_factor: u32,
    service: ServiceParams,
}

impl TryFrom<RawServiceConfig> for ServiceConfig {
    type Error = ClientError;

    fn try_from(raw: RawServiceConfig) -> Result<Self, Self::Error> {
        let service = raw.service.clone();
        let mut config = Self::with_service(raw.service, raw.profile, raw.gain);
        config.sensor = raw.sensor;
        config.range_interval = raw.range_interval;
        config.update_rate = raw.update_rate;
        config.repetition_mode = raw.repetition_mode;
        config.power_save_mode = raw.power_save_mode;
        config.noise_level_normalization = raw.noise_level_normalization;
        config.maximize_signal_attenuation = raw.maximize_signal_attenuation;
        config.asynchronous_measurement = raw.asynchronous_measurement;
        config.tx_disable = raw.tx_disable;
        config.mur = raw.mur;
        config.set_gain(raw.gain)?;
        config.set_hw_accelerated_average_samples(raw.hw_accelerated_average_samples)?;
        config.set_downsampling_factor(raw.downsampling_factor)?;
        match service {
            ServiceParams::PowerBins { bin_count } => config.set_bin_count(bin_count)?,
            ServiceParams::Envelope { running_average_factor } => {
                config.set_running_average_factor(running_average_factor)?
            }
            ServiceParams::Iq { .. } => {}
            ServiceParams::Sparse {
                sweeps_per_frame,
                sweep_rate,
                ..
            } => {
                config.set_sweeps_per_frame(sweeps_per_frame)?;
                config.set_sweep_rate(sweep_rate)?;
            }
        }
        Ok(config)
    }
}

impl ServiceConfig {
    fn with_service(service: ServiceParams, profile: Profile, gain: f64) -> Self {
        Self {
            sensor: vec![1],
            range_interval: [0.2, 0.8],
            profile,
            update_rate: None,
            repetition_mode: RepetitionMode::HostDriven,
            power_save_mode: PowerSaveMode::Active,
            noise_level_normalization: true,
            maximize_signal_attenuation: false,
            asynchronous_measurement: true,
            tx_disable: false,
            mur: Mur::Six,
            gain,
            hw_accelerated_average_samples: 10,
            downsampling_factor: 1,
            service,
        }
    }

    pub fn power_bins() -> Self {
        Self::with_service(ServiceParams::PowerBins { bin_count: None }, Profile::Profile2, 0.5)
    }

    pub fn envelope() -> Self {
        Self::with_service(
            ServiceParams::Envelope {
                running_average_factor: 0.7,
            },
            Profile::Profile2,
            0.5,
        )
    }

    pub fn iq() -> Self {
        Self::with_service(
            ServiceParams::Iq {
                depth_lowpass_cutoff_ratio: None,
                sampling_mode: SamplingMode::A,
            },
            Profile::Profile2,
            0.5,
        )
    }

    pub fn sparse() -> Self {
        let mut config = Self::with_service(
            ServiceParams::Sparse {
                sweeps_per_frame: 16,
                sweep_rate: None,
                sampling_mode: SamplingMode::B,
            },
            Profile::Profile2,
            0.5,
        );
        config.range_interval = [0.48, 0.72];
        config.hw_accelerated_average_samples = 60;
        config
    }

    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::PowerBins => Self::power_bins(),
            Mode::Envelope => Self::envelope(),
            Mode::Iq => Self::iq(),
            Mode::Sparse => Self::sparse(),
        }
    }

    pub fn mode(&self) -> Mode {
        match self.service {
            ServiceParams::PowerBins { .. } => Mode::PowerBins,
            ServiceParams::Envelope { .. } => Mode::Envelope,
            ServiceParams::Iq { .. } => Mode::Iq,
            ServiceParams::Sparse { .. } => Mode::Sparse,
        }
    }

    pub fn service(&self) -> &ServiceParams {
        &self.service
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f64) -> Result<(), ClientError> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(invalid("gain", format!("{} is outside 0..=1", gain)));
        }
        self.gain = gain;
        Ok(())
    }

    pub fn hw_accelerated_average_samples(&self) -> u32 {
        self.hw_accelerated_average_samples
    }

    pub fn set_hw_accelerated_average_samples(&mut self, hwaas: u32) -> Result<(), ClientError> {
        if !HWAAS_RANGE.contains(&hwaas) {
            return Err(invalid(
                "hw_accelerated_average_samples",
                format!("{} is outside {:?}", hwaas, HWAAS_RANGE),
            ));
        }
        self.hw_accelerated_average_samples = hwaas;
        Ok(())
    }

    pub fn downsampling_factor(&self) -> u32 {
        self.downsampling_factor
    }

    pub fn set_downsampling_factor(&mut self, factor: u32) -> Result<(), ClientError> {
        if factor == 0 {
            return Err(invalid("downsampling_factor", "must be at least 1".to_string()));
        }
        self.downsampling_factor = factor;
        Ok(())
    }

    pub fn sweeps_per_frame(&self) -> Option<u32> {
        match self.service {
            ServiceParams::Sparse { sweeps_per_frame, .. } => Some(sweeps_per_frame),
            _ => None,
        }
    }

    pub fn set_sweeps_per_frame(&mut self, spf: u32) -> Result<(), ClientError> {
        if !SWEEPS_PER_FRAME_RANGE.contains(&spf) {
            return Err(invalid(
                "sweeps_per_frame",
                format!("{} is outside {:?}", spf, SWEEPS_PER_FRAME_RANGE),
            ));
        }
        match &mut self.service {
            ServiceParams::Sparse { sweeps_per_frame, .. } => {
                *sweeps_per_frame = spf;
                Ok(())
            }
            _ => Err(invalid("sweeps_per_frame", "only sparse has sweeps per frame".to_string())),
        }
    }

    pub fn set_sweep_rate(&mut self, rate: Option<f64>) -> Result<(), ClientError> {
        if let Some(r) = rate {
            if r <= 0.0 {
                return Err(invalid("sweep_rate", format!("{} must be positive", r)));
            }
        }
        match &mut self.service {
            ServiceParams::Sparse { sweep_rate, .. } => {
                *sweep_rate = rate;
                Ok(())
            }
            _ => Err(invalid("sweep_rate", "only sparse has a sweep rate".to_string())),
        }
    }

    pub fn set_running_average_factor(&mut self, factor: f64) -> Result<(), ClientError> {
        if !(0.0..1.0).contains(&factor) {
            return Err(invalid("running_average_factor", format!("{} is outside 0..1", factor)));
        }
        match &mut self.service {
            ServiceParams::Envelope { running_average_factor } => {
                *running_average_factor = factor;
                Ok(())
            }
            _ => Err(invalid(
                "running_average_factor",
                "only envelope has a running average".to_string(),
            )),
        }
    }

    pub fn set_bin_count(&mut self, count: Option<u32>) -> Result<(), ClientError> {
        if count == Some(0) {
            return Err(invalid("bin_count", "must be at least 1".to_string()));
        }
        match &mut self.service {
            ServiceParams::PowerBins { bin_count } => {
                *bin_count = count;
                Ok(())
            }
            _ => Err(invalid("bin_count", "only power bins has a bin count".to_string())),
        }
    }

    pub fn range_start(&self) -> f64 {
        self.range_interval[0]
    }

    pub fn range_length(&self) -> f64 {
        self.range_interval[1] - self.range_interval[0]
    }

    /// Depth spacing implied by mode and downsampling, in meters.
    pub fn step_length_m(&self) -> f64 {
        let base = match self.mode() {
            Mode::Sparse => SPARSE_BASE_STEP_M,
            _ => BASE_STEP_M,
        };
        base * self.downsampling_factor as f64
    }

    /// Number of depth points per sweep implied by range and spacing, `None`
    /// when the range is not finite, inverted or too long to count.
    pub fn num_depths(&self) -> Option<usize> {
        match self.service {
            ServiceParams::PowerBins { bin_count } => Some(bin_count.unwrap_or(5).max(1) as usize),
            _ => {
                let steps = self.range_length() / self.step_length_m();
                if !steps.is_finite() || steps < 0.0 || steps >= usize::MAX as f64 {
                    return None;
                }
                (steps.round() as usize).max(1).checked_add(1)
            }
        }
    }

    /// Cross-field validation.
    pub fn validate(&self) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if self.sensor.is_empty() {
            alerts.push(Alert::error("sensor", "at least one sensor is required"));
        }
        let mut ids = self.sensor.clone();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.sensor.len() {
            alerts.push(Alert::error("sensor", "duplicate sensor ids"));
        }
        if self.sensor.contains(&0) {
            alerts.push(Alert::error("sensor", "sensor ids are 1-based"));
        }

        let [start, end] = self.range_interval;
        if !start.is_finite() || !end.is_finite() {
            alerts.push(Alert::error("range_interval", "start and end must be finite"));
        } else if start >= end {
            alerts.push(Alert::error("range_interval", "start must be below end"));
        }
        if start < MIN_RANGE_START_M {
            alerts.push(Alert::error(
                "range_interval",
                format!("start must be at least {} m", MIN_RANGE_START_M),
            ));
        }
        if end - start > MAX_RANGE_LENGTH_M {
            alerts.push(Alert::error(
                "range_interval",
                format!("range can't be longer than {} m", MAX_RANGE_LENGTH_M),
            ));
        }

        if !HWAAS_RANGE.contains(&self.hw_accelerated_average_samples) {
            alerts.push(Alert::error("hw_accelerated_average_samples", "outside 1..=63"));
        }
        if !(0.0..=1.0).contains(&self.gain) {
            alerts.push(Alert::error("gain", "outside 0..=1"));
        } else if self.gain > 0.9 {
            alerts.push(Alert::warning("gain", "high gain may saturate close reflectors"));
        }

        match self.update_rate {
            Some(rate) if !rate.is_finite() || rate <= 0.0 => {
                alerts.push(Alert::error("update_rate", "must be positive and finite"));
            }
            None if self.repetition_mode == RepetitionMode::SensorDriven => {
                alerts.push(Alert::error(
                    "update_rate",
                    "sensor driven repetition requires an update rate",
                ));
            }
            _ => {}
        }

        if self.power_save_mode == PowerSaveMode::Hibernate
            && self.repetition_mode == RepetitionMode::SensorDriven
        {
            alerts.push(Alert::error(
                "power_save_mode",
                "hibernate is only supported in host driven mode",
            ));
        }

        match &self.service {
            ServiceParams::Envelope { running_average_factor } => {
                if !(0.0..1.0).contains(running_average_factor) {
                    alerts.push(Alert::error("running_average_factor", "outside 0..1"));
                }
                self.check_downsampling(&mut alerts);
            }
            ServiceParams::Iq {
                depth_lowpass_cutoff_ratio,
                ..
            } => {
                if let Some(ratio) = depth_lowpass_cutoff_ratio {
                    if *ratio <= 0.0 || *ratio > 0.5 {
                        alerts.push(Alert::error("depth_lowpass_cutoff_ratio", "outside (0, 0.5]"));
                    }
                }
                self.check_downsampling(&mut alerts);
            }
            ServiceParams::Sparse {
                sweeps_per_frame,
                sweep_rate,
                ..
            } => {
                if !SWEEPS_PER_FRAME_RANGE.contains(sweeps_per_frame) {
                    alerts.push(Alert::error("sweeps_per_frame", "outside 1..=2048"));
                }
                match self
                    .num_depths()
                    .and_then(|depths| (*sweeps_per_frame as usize).checked_mul(depths))
                {
                    Some(samples) if samples > SPARSE_MAX_SAMPLES as usize => {
                        alerts.push(Alert::error(
                            "sweeps_per_frame",
                            format!(
                                "{} samples per frame exceed the {} sample buffer",
                                samples, SPARSE_MAX_SAMPLES
                            ),
                        ));
                    }
                    Some(_) => {}
                    None => alerts.push(Alert::error(
                        "range_interval",
                        "range does not give a usable number of depths",
                    )),
                }
                if let (Some(sr), Some(ur)) = (sweep_rate, self.update_rate) {
                    if sr / (*sweeps_per_frame as f64) < ur {
                        alerts.push(Alert::error(
                            "sweep_rate",
                            "sweep rate is too low for the requested update rate",
                        ));
                    }
                }
                if *sweeps_per_frame > 64 && self.profile != Profile::Profile1 {
                    alerts.push(Alert::info(
                        "sweeps_per_frame",
                        "long frames give coarse timing, consider a higher update rate",
                    ));
                }
            }
            ServiceParams::PowerBins { bin_count } => {
                if *bin_count == Some(0) {
                    alerts.push(Alert::error("bin_count", "must be at least 1"));
                }
            }
        }

        alerts
    }

    fn check_downsampling(&self, alerts: &mut Vec<Alert>) {
        if ![1, 2, 4].contains(&self.downsampling_factor) {
            alerts.push(Alert::error("downsampling_factor", "must be 1, 2 or 4"));
        }
    }
}

fn invalid(param: &'static str, reason: String) -> ClientError {
    ClientError::InvalidValue { param, reason }
}

impl WireFields for ServiceConfig {
    fn field(&self, key: &str) -> Option<ConfigValue> {
        let value = match (key, &self.service) {
            ("sensor", _) => ConfigValue::List(
                self.sensor.iter().map(|s| ConfigValue::Int(*s as i64)).collect(),
            ),
            ("range_interval", _) => ConfigValue::List(vec![
                ConfigValue::Float(self.range_interval[0]),
                ConfigValue::Float(self.range_interval[1]),
            ]),
            ("range_start", _) => ConfigValue::Float(self.range_start()),
            ("range_length", _) => ConfigValue::Float(self.range_length()),
            ("profile", _) => ConfigValue::of_enum(&self.profile),
            ("update_rate", _) => ConfigValue::Float(self.update_rate?),
            ("gain", _) => ConfigValue::Float(self.gain),
            ("hw_accelerated_average_samples", _) => {
                ConfigValue::Int(self.hw_accelerated_average_samples as i64)
            }
            ("repetition_mode", _) => ConfigValue::of_enum(&self.repetition_mode),
            ("downsampling_factor", _) => ConfigValue::Int(self.downsampling_factor as i64),
            ("power_save_mode", _) => ConfigValue::of_enum(&self.power_save_mode),
            ("noise_level_normalization", _) => ConfigValue::Bool(self.noise_level_normalization),
            ("maximize_signal_attenuation", _) => {
                ConfigValue::Bool(self.maximize_signal_attenuation)
            }
            ("asynchronous_measurement", _) => ConfigValue::Bool(self.asynchronous_measurement),
            ("tx_disable", _) => ConfigValue::Bool(self.tx_disable),
            ("mur", ServiceParams::Sparse { .. }) | ("mur", ServiceParams::Iq { .. }) => {
                ConfigValue::of_enum(&self.mur)
            }
            ("bin_count", ServiceParams::PowerBins { bin_count }) => {
                ConfigValue::Int((*bin_count)? as i64)
            }
            ("running_average_factor", ServiceParams::Envelope { running_average_factor }) => {
                ConfigValue::Float(*running_average_factor)
            }
            (
                "depth_lowpass_cutoff_ratio",
                ServiceParams::Iq {
                    depth_lowpass_cutoff_ratio,
                    ..
                },
            ) => ConfigValue::Float((*depth_lowpass_cutoff_ratio)?),
            ("sampling_mode", ServiceParams::Iq { sampling_mode, .. })
            | ("sampling_mode", ServiceParams::Sparse { sampling_mode, .. }) => {
                ConfigValue::of_enum(sampling_mode)
            }
            ("sweeps_per_frame", ServiceParams::Sparse { sweeps_per_frame, .. }) => {
                ConfigValue::Int(*sweeps_per_frame as i64)
            }
            ("sweep_rate", ServiceParams::Sparse { sweep_rate, .. }) => {
                ConfigValue::Float((*sweep_rate)?)
            }
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::errors_of;

    #[test]
    fn defaults_are_valid() {
        for mode in Mode::ALL {
            let config = ServiceConfig::for_mode(mode);
            assert_eq!(config.mode(), mode);
            assert!(errors_of(&config.validate()).is_empty(), "{:?}", config.validate());
        }
    }

    #[test]
    fn hwaas_is_range_checked_on_set() {
        let mut config = ServiceConfig::envelope();
        assert!(config.set_hw_accelerated_average_samples(0).is_err());
        assert!(config.set_hw_accelerated_average_samples(64).is_err());
        config.set_hw_accelerated_average_samples(63).unwrap();
        assert_eq!(config.hw_accelerated_average_samples(), 63);
    }

    #[test]
    fn inverted_range_is_an_error_alert() {
        let mut config = ServiceConfig::iq();
        config.range_interval = [0.8, 0.2];
        let errs = errors_of(&config.validate());
        assert!(errs.iter().any(|a| a.param.as_deref() == Some("range_interval")));
    }

    #[test]
    fn sensor_driven_without_rate_is_rejected() {
        let mut config = ServiceConfig::envelope();
        config.repetition_mode = RepetitionMode::SensorDriven;
        assert!(!errors_of(&config.validate()).is_empty());
        config.update_rate = Some(20.0);
        assert!(errors_of(&config.validate()).is_empty());
    }

    #[test]
    fn high_gain_only_warns() {
        let mut config = ServiceConfig::envelope();
        config.set_gain(0.95).unwrap();
        let alerts = config.validate();
        assert!(errors_of(&alerts).is_empty());
        assert!(alerts.iter().any(|a| a.param.as_deref() == Some("gain")));
    }

    #[test]
    fn mode_specific_fields_are_scoped() {
        let config = ServiceConfig::sparse();
        assert!(config.field("sweeps_per_frame").is_some());
        assert!(config.field("running_average_factor").is_none());
        // unset optional values are skipped
        assert!(config.field("sweep_rate").is_none());
        assert!(config.field("update_rate").is_none());
    }

    #[test]
    fn unbounded_range_is_an_alert_not_a_panic() {
        let mut config = ServiceConfig::sparse();
        config.range_interval = [0.2, f64::INFINITY];
        assert_eq!(config.num_depths(), None);
        let errs = errors_of(&config.validate());
        assert!(errs.iter().any(|a| a.param.as_deref() == Some("range_interval")));

        config.range_interval = [f64::NAN, 0.8];
        assert!(!errors_of(&config.validate()).is_empty());

        let mut envelope = ServiceConfig::envelope();
        envelope.range_interval = [0.2, f64::INFINITY];
        assert!(!errors_of(&envelope.validate()).is_empty());
    }

    #[test]
    fn stored_config_goes_through_setters() {
        let config = ServiceConfig::sparse();
        let restored = ServiceConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored.mode(), Mode::Sparse);
        assert_eq!(restored.sweeps_per_frame(), Some(16));
        assert_eq!(restored.hw_accelerated_average_samples(), 60);

        let mut value = serde_json::to_value(&config).unwrap();
        value["downsampling_factor"] = serde_json::json!(0);
        assert!(serde_json::from_value::<ServiceConfig>(value).is_err());

        let mut value = serde_json::to_value(&config).unwrap();
        value["gain"] = serde_json::json!(1.5);
        assert!(serde_json::from_value::<ServiceConfig>(value).is_err());

        let mut value = serde_json::to_value(&config).unwrap();
        value["service"]["sweeps_per_frame"] = serde_json::json!(0);
        assert!(serde_json::from_value::<ServiceConfig>(value).is_err());
    }

    #[test]
    fn setters_reject_foreign_modes() {
        let mut config = ServiceConfig::envelope();
        assert!(config.set_sweeps_per_frame(8).is_err());
        assert!(config.set_running_average_factor(0.5).is_ok());
        assert!(config.set_running_average_factor(1.0).is_err());
    }
}
