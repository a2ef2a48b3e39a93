//! Hardware-free clients producing synthetic frames.
//!
//! Data is a few fixed reflectors shaped by the profile's pulse width plus
//! seeded noise, so two mocks with the same seed and config produce the same
//! frames. `get_next` sleeps to hold the configured update rate.

use log::debug;
use ndarray::{Array2, ArrayD, IxDyn};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::f64::consts::{LN_2, PI};
use std::thread;
use std::time::{Duration, Instant};

use super::{SensorGeneration, SensorInfo, ServerInfo, Session};
use crate::a111::{self, Mode, ResultInfo, ServiceConfig, ServiceParams, SweepData};
use crate::a121::{self, GroupedMetadata, SensorResult, SessionConfig};
use crate::error::ClientError;
use crate::protocol::version::Version;

pub const DEFAULT_SEED: u64 = 0x5EED;

/// Sensors the mock boards pretend to have.
const A111_SENSOR_COUNT: u32 = 4;
const A121_SENSOR_COUNT: u32 = 5;

/// `(distance m, amplitude)`
const REFLECTORS: [(f64, f64); 2] = [(0.45, 1800.0), (1.2, 900.0)];
const WAVELENGTH_M: f64 = 0.00494;
const NOISE: f64 = 20.0;
const ENVELOPE_BASELINE: f64 = 100.0;
const SPARSE_OFFSET: f64 = 32768.0;
const DEFAULT_SPARSE_SWEEP_RATE: f64 = 3000.0;

const A121_BASE_STEP_M: f64 = 0.0025;
const A121_TICKS_PER_SECOND: u64 = 1_000_000;
const A121_TEMPERATURE: i32 = 25;

/// Echo strength at `distance` for a pulse of width `fwhm`, with the targets
/// swaying a few millimeters from frame to frame.
fn echo(distance: f64, fwhm: f64, frame: u32) -> (f64, f64) {
    let sway = 0.003 * (2.0 * PI * f64::from(frame) / 40.0).sin();
    let mut amplitude = 0.0;
    let mut phase = 0.0;
    for (d, a) in REFLECTORS {
        let d = d + sway;
        let weight = (-4.0 * LN_2 * (distance - d).powi(2) / (fwhm * fwhm)).exp();
        if weight > 1e-3 {
            phase = 4.0 * PI * d / WAVELENGTH_M;
        }
        amplitude += a * weight;
    }
    (amplitude, phase)
}

fn noise(rng: &mut StdRng) -> f64 {
    rng.gen_range(-NOISE..NOISE)
}

/// Holds `get_next` to the configured update rate.
#[derive(Debug, Default)]
struct Pacer {
    last: Option<Instant>,
}

impl Pacer {
    fn wait(&mut self, update_rate: Option<f64>) {
        if let (Some(rate), Some(last)) = (update_rate, self.last) {
            if rate > 0.0 {
                let period = Duration::from_secs_f64(1.0 / rate);
                let elapsed = last.elapsed();
                if elapsed < period {
                    thread::sleep(period - elapsed);
                }
            }
        }
        self.last = Some(Instant::now());
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

/// A111 mock.
pub struct MockClient {
    seed: u64,
    rng: StdRng,
    config: Option<ServiceConfig>,
    sequence: u32,
    pacer: Pacer,
    squeeze: bool,
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

fn num_depths(config: &ServiceConfig) -> Result<usize, ClientError> {
    config.num_depths().ok_or_else(|| ClientError::InvalidValue {
        param: "range_interval",
        reason: format!("{:?} gives no usable depth count", config.range_interval),
    })
}

impl MockClient {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
            config: None,
            sequence: 0,
            pacer: Pacer::default(),
            squeeze: true,
        }
    }

    fn metadata_for(config: &ServiceConfig) -> Result<a111::Metadata, ClientError> {
        let depths = num_depths(config)?;
        let mut metadata = a111::Metadata {
            range_start_m: config.range_start(),
            range_length_m: config.range_length(),
            data_length: depths,
            stitch_count: 0,
            step_length_m: config.step_length_m(),
            bin_count: None,
            sweep_rate: None,
            depth_lowpass_cutoff_ratio: None,
            free_space_absolute_offset: None,
        };
        match config.service() {
            ServiceParams::PowerBins { .. } => metadata.bin_count = Some(depths as u32),
            ServiceParams::Envelope { .. } => metadata.free_space_absolute_offset = Some(0),
            ServiceParams::Iq {
                depth_lowpass_cutoff_ratio,
                ..
            } => metadata.depth_lowpass_cutoff_ratio = Some(depth_lowpass_cutoff_ratio.unwrap_or(0.5)),
            ServiceParams::Sparse {
                sweeps_per_frame,
                sweep_rate,
                ..
            } => {
                metadata.data_length = depths * *sweeps_per_frame as usize;
                metadata.sweep_rate = Some(sweep_rate.unwrap_or(DEFAULT_SPARSE_SWEEP_RATE));
            }
        }
        Ok(metadata)
    }

    /// Depth of each sample point, in meters.
    fn depths(config: &ServiceConfig) -> Result<Vec<f64>, ClientError> {
        let n = num_depths(config)?;
        let start = config.range_start();
        let points = match config.mode() {
            Mode::PowerBins => {
                let width = config.range_length() / n as f64;
                (0..n).map(|i| start + (i as f64 + 0.5) * width).collect()
            }
            _ => {
                let step = config.step_length_m();
                (0..n).map(|i| start + i as f64 * step).collect()
            }
        };
        Ok(points)
    }

    fn synthesize(&mut self, config: &ServiceConfig) -> Result<SweepData, ClientError> {
        let depths = Self::depths(config)?;
        let sensors = config.sensor.len();
        let fwhm = config.profile.envelope_fwhm_m();
        let frame = self.sequence;
        let keep_sensor_axis = !(self.squeeze && sensors == 1);
        let rng = &mut self.rng;

        let shape_err = |e: ndarray::ShapeError| ClientError::Client(format!("mock frame shape: {}", e));
        match config.mode() {
            Mode::Envelope | Mode::PowerBins => {
                let mut samples = Vec::with_capacity(sensors * depths.len());
                for _ in 0..sensors {
                    for &x in &depths {
                        let (amplitude, _) = echo(x, fwhm, frame);
                        samples.push((ENVELOPE_BASELINE + amplitude + noise(rng)).max(0.0).round());
                    }
                }
                let shape = if keep_sensor_axis { vec![sensors, depths.len()] } else { vec![depths.len()] };
                Ok(SweepData::Real(ArrayD::from_shape_vec(IxDyn(&shape), samples).map_err(shape_err)?))
            }
            Mode::Iq => {
                let mut samples = Vec::with_capacity(sensors * depths.len());
                for _ in 0..sensors {
                    for &x in &depths {
                        let (amplitude, phase) = echo(x, fwhm, frame);
                        let value = Complex64::from_polar(amplitude, phase);
                        samples.push(value + Complex64::new(noise(rng), noise(rng)));
                    }
                }
                let shape = if keep_sensor_axis { vec![sensors, depths.len()] } else { vec![depths.len()] };
                Ok(SweepData::Complex(ArrayD::from_shape_vec(IxDyn(&shape), samples).map_err(shape_err)?))
            }
            Mode::Sparse => {
                let spf = config.sweeps_per_frame().unwrap_or(1) as usize;
                let mut samples = Vec::with_capacity(sensors * spf * depths.len());
                for _ in 0..sensors {
                    for sweep in 0..spf {
                        for &x in &depths {
                            let (amplitude, phase) = echo(x, fwhm, frame);
                            let wobble = 0.2 * (2.0 * PI * sweep as f64 / spf as f64).sin();
                            samples.push((SPARSE_OFFSET + amplitude * (phase + wobble).cos() + noise(rng)).round());
                        }
                    }
                }
                let shape = if keep_sensor_axis {
                    vec![sensors, spf, depths.len()]
                } else {
                    vec![spf, depths.len()]
                };
                Ok(SweepData::Real(ArrayD::from_shape_vec(IxDyn(&shape), samples).map_err(shape_err)?))
            }
        }
    }
}

impl Session for MockClient {
    type Config = ServiceConfig;
    type Metadata = a111::Metadata;
    type Frame = a111::Frame;

    const GENERATION: SensorGeneration = SensorGeneration::A111;

    fn connect(&mut self) -> Result<ServerInfo, ClientError> {
        let mut info = ServerInfo::new("a111-v2.14.0", Some(Version::new(2, 14, 0)), SensorGeneration::A111);
        info.sensor_count = A111_SENSOR_COUNT;
        info.hardware_name = Some("mock".into());
        info.supported_modes = Some(Mode::ALL.to_vec());
        Ok(info)
    }

    fn setup_session(&mut self, config: &ServiceConfig) -> Result<a111::Metadata, ClientError> {
        if let Some(bad) = config.sensor.iter().find(|&&s| s == 0 || s > A111_SENSOR_COUNT) {
            return Err(ClientError::Server(format!("sensor {} is not available", bad)));
        }
        let metadata = Self::metadata_for(config)?;
        self.rng = StdRng::seed_from_u64(self.seed);
        self.sequence = 0;
        self.config = Some(config.clone());
        Ok(metadata)
    }

    fn start_session(&mut self) -> Result<(), ClientError> {
        self.pacer.reset();
        Ok(())
    }

    fn get_next(&mut self) -> Result<a111::Frame, ClientError> {
        let config = self
            .config
            .clone()
            .ok_or(ClientError::State("session needs to be set up before starting"))?;
        self.pacer.wait(config.update_rate);
        let data = self.synthesize(&config)?;
        let info = config
            .sensor
            .iter()
            .map(|_| ResultInfo {
                sequence_number: Some(self.sequence),
                ..ResultInfo::default()
            })
            .collect();
        self.sequence = self.sequence.wrapping_add(1);
        Ok(a111::Frame { info, data })
    }

    fn stop_session(&mut self) -> Result<(), ClientError> {
        debug!("mock stopped after {} frames", self.sequence);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ClientError> {
        self.config = None;
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) {}

    fn set_squeeze(&mut self, squeeze: bool) {
        self.squeeze = squeeze;
    }
}

/// A121 mock.
pub struct MockA121Client {
    seed: u64,
    rng: StdRng,
    config: Option<SessionConfig>,
    metadata: Option<GroupedMetadata>,
    frames: u32,
    tick: u32,
    pacer: Pacer,
}

impl Default for MockA121Client {
    fn default() -> Self {
        Self::new()
    }
}

impl MockA121Client {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
            config: None,
            metadata: None,
            frames: 0,
            tick: 0,
            pacer: Pacer::default(),
        }
    }

    fn sensor_metadata(config: &a121::SensorConfig) -> a121::Metadata {
        let mut offsets = Vec::with_capacity(config.subsweeps.len());
        let mut lengths = Vec::with_capacity(config.subsweeps.len());
        let mut offset = 0;
        for subsweep in &config.subsweeps {
            offsets.push(offset);
            lengths.push(subsweep.num_points as usize);
            offset += subsweep.num_points as usize;
        }
        // Rough sweep time: every point measured hwaas times at the PRF.
        let sweep_seconds: f64 = config
            .subsweeps
            .iter()
            .map(|s| f64::from(s.num_points) * f64::from(s.hwaas.get()) / s.prf.frequency_hz() * 100.0)
            .sum();
        a121::Metadata {
            frame_data_length: config.frame_data_length(),
            sweep_data_length: config.sweep_data_length(),
            subsweep_data_offset: offsets,
            subsweep_data_length: lengths,
            calibration_temperature: A121_TEMPERATURE,
            tick_period: 1.0 / A121_TICKS_PER_SECOND as f64,
            base_step_length_m: A121_BASE_STEP_M,
            max_sweep_rate: if sweep_seconds > 0.0 { 1.0 / sweep_seconds } else { 0.0 },
            high_speed_mode: false,
        }
    }

    fn synthesize(&mut self, config: &a121::SensorConfig) -> Result<Array2<Complex64>, ClientError> {
        let spf = config.sweeps_per_frame as usize;
        let mut frame = Array2::<Complex64>::zeros((spf, config.sweep_data_length()));
        let mut column = 0;
        for subsweep in &config.subsweeps {
            let fwhm = subsweep.profile.fwhm_m();
            for point in 0..subsweep.num_points {
                let distance = f64::from(subsweep.start_point + (point * subsweep.step_length) as i32)
                    * A121_BASE_STEP_M;
                let (amplitude, phase) = echo(distance, fwhm, self.frames);
                for sweep in 0..spf {
                    let value = Complex64::from_polar(amplitude / 2.0, phase)
                        + Complex64::new(noise(&mut self.rng), noise(&mut self.rng));
                    frame[[sweep, column]] = Complex64::new(value.re.round(), value.im.round());
                }
                column += 1;
            }
        }
        Ok(frame)
    }
}

impl Session for MockA121Client {
    type Config = SessionConfig;
    type Metadata = GroupedMetadata;
    type Frame = a121::Frame;

    const GENERATION: SensorGeneration = SensorGeneration::A121;

    fn connect(&mut self) -> Result<ServerInfo, ClientError> {
        let mut info = ServerInfo::new("a121-v1.9.0", Some(Version::new(1, 9, 0)), SensorGeneration::A121);
        info.sensor_count = A121_SENSOR_COUNT;
        info.ticks_per_second = Some(A121_TICKS_PER_SECOND);
        info.hardware_name = Some("mock".into());
        info.sensors = (1..=A121_SENSOR_COUNT)
            .map(|sensor_id| SensorInfo {
                sensor_id,
                connected: true,
                serial: None,
            })
            .collect();
        Ok(info)
    }

    fn setup_session(&mut self, config: &SessionConfig) -> Result<GroupedMetadata, ClientError> {
        if let Some(bad) = config
            .sensor_ids()
            .into_iter()
            .find(|&s| s == 0 || s > A121_SENSOR_COUNT)
        {
            return Err(ClientError::Server(format!("sensor {} is not available", bad)));
        }
        let metadata: GroupedMetadata = config
            .groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|(&id, sensor)| (id, Self::sensor_metadata(sensor)))
                    .collect::<BTreeMap<_, _>>()
            })
            .collect();
        self.rng = StdRng::seed_from_u64(self.seed);
        self.frames = 0;
        self.tick = 0;
        self.config = Some(config.clone());
        self.metadata = Some(metadata.clone());
        Ok(metadata)
    }

    fn start_session(&mut self) -> Result<(), ClientError> {
        self.pacer.reset();
        Ok(())
    }

    fn get_next(&mut self) -> Result<a121::Frame, ClientError> {
        let config = self
            .config
            .clone()
            .ok_or(ClientError::State("session needs to be set up before starting"))?;
        self.pacer.wait(config.effective_update_rate());

        let mut groups = Vec::with_capacity(config.groups.len());
        for group in &config.groups {
            let mut results = BTreeMap::new();
            for (&id, sensor) in group {
                let frame = self.synthesize(sensor)?;
                results.insert(
                    id,
                    SensorResult {
                        tick: self.tick,
                        data_saturated: false,
                        frame_delayed: false,
                        calibration_needed: false,
                        temperature: A121_TEMPERATURE,
                        frame,
                    },
                );
            }
            groups.push(results);
        }

        let period = config.effective_update_rate().map_or(0.01, |r| 1.0 / r);
        self.tick = self
            .tick
            .wrapping_add((period * A121_TICKS_PER_SECOND as f64) as u32);
        self.frames = self.frames.wrapping_add(1);
        Ok(a121::Frame { groups })
    }

    fn stop_session(&mut self) -> Result<(), ClientError> {
        debug!("mock stopped after {} frames", self.frames);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ClientError> {
        self.config = None;
        self.metadata = None;
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) {}
}
