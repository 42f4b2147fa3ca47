//! Simulation utilities and CSV data loading for landmark localization.
//!
//! This module provides:
//! - A struct (`TrajectoryRecord`) for reading and writing recorded trajectory logs
//! - The driving loop (`run_localization`) that plays a log through the particle filter
//! - `StepResult` rows for storing and exporting the per-step estimates
//! - A synthetic straight-line trajectory generator used for testing and demos
//! - `SimulationConfig` with JSON/YAML/TOML import and export

use log::{debug, info};
use nalgebra::Vector2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::{LocalizationError, Result};
use crate::measurements::{
    DEFAULT_LANDMARKS, LandmarkMeasurement, ObservationModel, landmarks_from_config,
    observe_landmarks,
};
use crate::particle::{ParticleFilter, ParticleFilterConfig};
use crate::{Pose, wrap_to_pi};

/// A single line of a trajectory log.
///
/// On disk a line holds the timestamp, the ground-truth pose, the angular-velocity command and one displacement
/// vector per landmark. Array-valued fields may be written as bracketed and quoted text, e.g.
///
/// ```text
/// 0.1,"[0.0, 0.0, 0.5]",0.0,"[[0.75, -1.25], [-1.1, 0.8], [1.5, 2.1]]"
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct TrajectoryRecord {
    /// Timestamp in seconds
    pub time: f64,
    /// Ground-truth pose of the robot at `time`
    pub ground_truth: Pose,
    /// Angular-velocity command (rad/s)
    pub control: f64,
    /// Observed displacement from the robot to each landmark (landmark minus robot position)
    pub observations: Vec<Vector2<f64>>,
}

impl TrajectoryRecord {
    /// Number of scalar values a line must hold for `num_landmarks` landmarks
    pub fn field_count(num_landmarks: usize) -> usize {
        1 + 3 + 1 + 2 * num_landmarks
    }

    /// Parse a record from its flattened numeric values.
    pub fn from_values(values: &[f64], num_landmarks: usize, line: usize) -> Result<Self> {
        let expected = Self::field_count(num_landmarks);
        if values.len() != expected {
            return Err(LocalizationError::malformed(
                line,
                format!(
                    "expected {} numeric values for {} landmarks, found {}",
                    expected,
                    num_landmarks,
                    values.len()
                ),
            ));
        }
        let observations = values[5..]
            .chunks_exact(2)
            .map(|pair| Vector2::new(pair[0], pair[1]))
            .collect();
        Ok(TrajectoryRecord {
            time: values[0],
            ground_truth: Pose::new(values[1], values[2], values[3]),
            control: values[4],
            observations,
        })
    }

    /// Reads a trajectory log and returns one `TrajectoryRecord` per line.
    ///
    /// An optional header line is skipped. Brackets and quotes around array-valued fields are stripped before the
    /// numbers are parsed.
    ///
    /// # Arguments
    /// * `path` - Path to the CSV file to read.
    /// * `num_landmarks` - Number of landmark observations expected on every line.
    ///
    /// # Returns
    /// * `Ok(Vec<TrajectoryRecord>)` if successful.
    /// * `Err(LocalizationError::MalformedRecord)` if a line does not have the expected shape.
    pub fn from_csv<P: AsRef<Path>>(path: P, num_landmarks: usize) -> Result<Vec<Self>> {
        let file = File::open(path)?;
        Self::from_reader(file, num_landmarks)
    }

    /// Same as [`TrajectoryRecord::from_csv`] for any reader.
    pub fn from_reader<R: Read>(reader: R, num_landmarks: usize) -> Result<Vec<Self>> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut records = Vec::new();
        for (index, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| {
                // Decoding failures (e.g. invalid UTF-8) carry the position of the offending line
                let line = e.position().map(|p| p.line() as usize);
                match line {
                    Some(line) => LocalizationError::malformed(line, e.to_string()),
                    None => LocalizationError::Csv(e),
                }
            })?;
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(index + 1);
            if record.iter().all(|field| field.is_empty()) {
                continue;
            }
            match parse_numeric_fields(&record) {
                Ok(values) => records.push(Self::from_values(&values, num_landmarks, line)?),
                // A non-numeric first line is a header
                Err(_) if index == 0 => debug!("Skipping trajectory log header: {:?}", record),
                Err(reason) => return Err(LocalizationError::malformed(line, reason)),
            }
        }
        Ok(records)
    }

    /// Writes trajectory records to a CSV file in the bracketed array layout read by
    /// [`TrajectoryRecord::from_csv`].
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> Result<()> {
        let file = File::create(path)?;
        Self::to_writer(records, file)
    }

    /// Same as [`TrajectoryRecord::to_csv`] for any writer.
    pub fn to_writer<W: Write>(records: &[Self], writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(["time", "ground_truth", "control", "observations"])?;
        for record in records {
            let truth = format!(
                "[{}, {}, {}]",
                record.ground_truth.x, record.ground_truth.y, record.ground_truth.heading
            );
            let observations = record
                .observations
                .iter()
                .map(|z| format!("[{}, {}]", z.x, z.y))
                .collect::<Vec<_>>()
                .join(", ");
            wtr.write_record([
                record.time.to_string(),
                truth,
                record.control.to_string(),
                format!("[{observations}]"),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Flatten a CSV record into numbers, stripping brackets and quotes from array-like text.
fn parse_numeric_fields(record: &csv::StringRecord) -> std::result::Result<Vec<f64>, String> {
    let mut values = Vec::new();
    for field in record.iter() {
        let cleaned: String = field
            .chars()
            .map(|c| match c {
                '[' | ']' | '(' | ')' | '"' | '\'' => ' ',
                other => other,
            })
            .collect();
        for token in cleaned
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            let value = token
                .parse::<f64>()
                .map_err(|e| format!("cannot parse '{token}' as a number: {e}"))?;
            values.push(value);
        }
    }
    Ok(values)
}

/// Filter output for one step of the trajectory log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Timestamp of the record (s)
    pub time: f64,
    /// Time step used for the prediction (s)
    pub dt: f64,
    /// Angular-velocity command (rad/s)
    pub control: f64,
    /// Weighted mean x after the measurement update (m)
    pub estimate_x: f64,
    /// Weighted mean y after the measurement update (m)
    pub estimate_y: f64,
    /// Weighted circular mean heading after the measurement update (rad)
    pub estimate_heading: f64,
    /// Unweighted ensemble centroid x after resampling (m)
    pub centroid_x: f64,
    /// Unweighted ensemble centroid y after resampling (m)
    pub centroid_y: f64,
    /// Unweighted circular mean heading of the ensemble after resampling (rad)
    pub centroid_heading: f64,
    pub true_x: f64,
    pub true_y: f64,
    pub true_heading: f64,
    /// Distance between the weighted estimate and the ground truth (m)
    pub position_error: f64,
    /// Distance between the resampled centroid and the ground truth (m)
    pub centroid_error: f64,
    /// Wrapped heading difference between estimate and ground truth (rad)
    pub heading_error: f64,
    /// Effective sample size of the weights before resampling
    pub effective_sample_size: f64,
}
impl StepResult {
    pub fn estimate(&self) -> Pose {
        Pose::new(self.estimate_x, self.estimate_y, self.estimate_heading)
    }
    pub fn centroid(&self) -> Pose {
        Pose::new(self.centroid_x, self.centroid_y, self.centroid_heading)
    }
    pub fn ground_truth(&self) -> Pose {
        Pose::new(self.true_x, self.true_y, self.true_heading)
    }

    /// Writes a slice of step results to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(results: &[Self], path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for result in results {
            writer.serialize(result)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads step results previously written by [`StepResult::to_csv`].
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut results = Vec::new();
        for result in rdr.deserialize() {
            results.push(result?);
        }
        Ok(results)
    }
}

/// Output of a full localization run.
#[derive(Clone, Debug, Default)]
pub struct LocalizationRun {
    /// One row per trajectory record
    pub results: Vec<StepResult>,
    /// Ensemble at the start of every step, only filled when `record_history` is enabled
    pub history: Vec<Vec<Pose>>,
    /// Ensemble after the final resampling step
    pub final_particles: Vec<Pose>,
}
impl LocalizationRun {
    /// Mean estimate error over the second half of the run (the filter is expected to have converged by then)
    pub fn mean_error_after_midpoint(&self) -> f64 {
        let tail = &self.results[self.results.len() / 2..];
        if tail.is_empty() {
            return 0.0;
        }
        tail.iter().map(|r| r.position_error).sum::<f64>() / tail.len() as f64
    }
}

/// Run the particle filter over a recorded trajectory.
///
/// For every record, in order: snapshot the ensemble (when `record_history` is set), compute the time step from
/// the next timestamp (the final record reuses the previous step; a single-record log uses zero), predict with the
/// record's control input, weigh against the record's landmark observations and resample. There is no early
/// termination and no convergence check.
///
/// # Arguments
/// * `records` - Trajectory log, in time order
/// * `config` - Filter, observation model and landmark configuration
///
/// # Returns
/// * `LocalizationRun` containing one `StepResult` per record.
pub fn run_localization(
    records: &[TrajectoryRecord],
    config: &SimulationConfig,
) -> Result<LocalizationRun> {
    if records.is_empty() {
        return Err(LocalizationError::malformed(0, "trajectory log is empty"));
    }
    let landmarks = landmarks_from_config(&config.landmarks);
    let noise = config.observation.density()?;
    let mut pf = ParticleFilter::new(&config.filter)?;
    info!(
        "Running localization over {} records with {} particles and {} landmarks",
        records.len(),
        pf.num_particles(),
        landmarks.len()
    );

    let mut run = LocalizationRun {
        results: Vec::with_capacity(records.len()),
        ..Default::default()
    };
    let mut dt = 0.0;
    for (i, record) in records.iter().enumerate() {
        if config.record_history {
            run.history.push(pf.particles().to_vec());
        }
        if let Some(next) = records.get(i + 1) {
            dt = next.time - record.time;
            if !dt.is_finite() || dt < 0.0 {
                return Err(LocalizationError::malformed(
                    i + 2,
                    format!(
                        "timestamps must be non-decreasing ({} followed by {})",
                        record.time, next.time
                    ),
                ));
            }
        }
        pf.predict(record.control, dt)?;

        let measurement = LandmarkMeasurement::new(&landmarks, &record.observations, noise)
            .map_err(|e| match e {
                LocalizationError::ObservationCount { .. } => {
                    LocalizationError::malformed(i + 1, e.to_string())
                }
                other => other,
            })?;
        pf.update_weights(&measurement)?;
        let estimate = pf.estimate();
        let effective_sample_size = pf.effective_sample_size();

        pf.resample()?;
        let centroid = pf.centroid();

        let truth = record.ground_truth;
        let result = StepResult {
            time: record.time,
            dt,
            control: record.control,
            estimate_x: estimate.x,
            estimate_y: estimate.y,
            estimate_heading: estimate.heading,
            centroid_x: centroid.x,
            centroid_y: centroid.y,
            centroid_heading: centroid.heading,
            true_x: truth.x,
            true_y: truth.y,
            true_heading: truth.heading,
            position_error: estimate.distance_to(&truth),
            centroid_error: centroid.distance_to(&truth),
            heading_error: wrap_to_pi(estimate.heading - truth.heading),
            effective_sample_size,
        };
        debug!(
            "Step {}: t = {:.3} s, error = {:.4} m, ESS = {:.1}",
            i, result.time, result.position_error, result.effective_sample_size
        );
        run.results.push(result);
    }
    run.final_particles = pf.particles().to_vec();
    if let Some(last) = run.results.last() {
        info!(
            "Localization finished: final error {:.4} m, mean error after midpoint {:.4} m",
            last.position_error,
            run.mean_error_after_midpoint()
        );
    }
    Ok(run)
}

/// Straight-line trajectory at constant speed and zero angular velocity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StraightLineConfig {
    /// Forward speed (m/s)
    pub speed: f64,
    /// Time between records (s)
    pub dt: f64,
    /// Number of records to generate
    pub steps: usize,
    /// Standard deviation of the noise added to every observed displacement component (m)
    #[serde(default)]
    pub observation_noise_std: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Pose at the first record
    pub start: Pose,
}
impl Default for StraightLineConfig {
    fn default() -> Self {
        StraightLineConfig {
            speed: 0.1,
            dt: 0.1,
            steps: 100,
            observation_noise_std: 0.0,
            seed: default_seed(),
            start: Pose::new(-0.5, -0.5, std::f64::consts::FRAC_PI_4),
        }
    }
}

/// Generate a trajectory log for a robot driving in a straight line, observing every landmark.
pub fn generate_straight_line(
    config: &StraightLineConfig,
    landmarks: &[Vector2<f64>],
) -> Result<Vec<TrajectoryRecord>> {
    if !config.dt.is_finite() || config.dt <= 0.0 {
        return Err(LocalizationError::InvalidConfiguration(format!(
            "trajectory time step must be positive, got {}",
            config.dt
        )));
    }
    if !config.observation_noise_std.is_finite() || config.observation_noise_std < 0.0 {
        return Err(LocalizationError::InvalidConfiguration(format!(
            "observation noise must be non-negative, got {}",
            config.observation_noise_std
        )));
    }
    let noise = if config.observation_noise_std > 0.0 {
        Normal::new(0.0, config.observation_noise_std).ok()
    } else {
        None
    };
    let mut rng = StdRng::seed_from_u64(config.seed);
    let (sin, cos) = config.start.heading.sin_cos();
    let records = (0..config.steps)
        .map(|k| {
            let time = k as f64 * config.dt;
            let distance = config.speed * time;
            let truth = Pose::new(
                config.start.x + distance * cos,
                config.start.y + distance * sin,
                config.start.heading,
            );
            let mut observations = observe_landmarks(&truth, landmarks);
            if let Some(normal) = &noise {
                for z in observations.iter_mut() {
                    z.x += normal.sample(&mut rng);
                    z.y += normal.sample(&mut rng);
                }
            }
            TrajectoryRecord {
                time,
                ground_truth: truth,
                control: 0.0,
                observations,
            }
        })
        .collect();
    Ok(records)
}

fn default_seed() -> u64 {
    42
}

fn default_landmarks() -> Vec<[f64; 2]> {
    DEFAULT_LANDMARKS.to_vec()
}

/// Complete configuration of a localization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Landmark positions `[x, y]` in meters, in the same order as the observations in the trajectory log
    #[serde(default = "default_landmarks")]
    pub landmarks: Vec<[f64; 2]>,
    /// Keep a copy of the ensemble at every step (needed for plotting)
    #[serde(default)]
    pub record_history: bool,
    #[serde(default)]
    pub filter: ParticleFilterConfig,
    #[serde(default)]
    pub observation: ObservationModel,
    /// Parameters for synthetic trajectory generation
    #[serde(default)]
    pub trajectory: StraightLineConfig,
}
impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            landmarks: default_landmarks(),
            record_history: false,
            filter: ParticleFilterConfig::default(),
            observation: ObservationModel::default(),
            trajectory: StraightLineConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Landmark positions as vectors
    pub fn landmark_vectors(&self) -> Vec<Vector2<f64>> {
        landmarks_from_config(&self.landmarks)
    }
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        let ext = p
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        let ext = p
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use tempfile::tempdir;

    const SAMPLE_LOG: &str = "\
time,ground_truth,control,observations
0.0,\"[0.0, 0.0, 0.5]\",0.1,\"[[0.75, -1.25], [-1.1, 0.8], [1.5, 2.1]]\"
0.5,\"[0.1 0.05 0.55]\",0.1,\"[[0.65 -1.3] [-1.2 0.75] [1.4 2.05]]\"
";

    #[test]
    fn test_parse_bracketed_log() {
        let records = TrajectoryRecord::from_reader(SAMPLE_LOG.as_bytes(), 3).unwrap();
        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.time, 0.0);
        assert_eq!(first.ground_truth, Pose::new(0.0, 0.0, 0.5));
        assert_eq!(first.control, 0.1);
        assert_eq!(first.observations.len(), 3);
        assert_approx_eq!(first.observations[1].x, -1.1, 1e-12);
        // Space-separated arrays parse the same way
        let second = &records[1];
        assert_approx_eq!(second.ground_truth.y, 0.05, 1e-12);
        assert_approx_eq!(second.observations[2].y, 2.05, 1e-12);
    }

    #[test]
    fn test_parse_unquoted_log_without_header() {
        let log = "0.0,[0.0,0.0,0.0],0.0,[[1.0,2.0],[3.0,4.0]]\n";
        let records = TrajectoryRecord::from_reader(log.as_bytes(), 2).unwrap();
        assert_eq!(records.len(), 1);
        assert_approx_eq!(records[0].observations[1].y, 4.0, 1e-12);
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        let log = "0.0,\"[0.0, 0.0, 0.0]\",0.0,\"[[1.0, 2.0]]\"\n";
        let result = TrajectoryRecord::from_reader(log.as_bytes(), 3);
        assert!(matches!(
            result,
            Err(LocalizationError::MalformedRecord { line: 1, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_garbage_after_header() {
        let log = "time,truth,control,obs\n0.0,\"[a, 0.0, 0.0]\",0.0,\"[[1, 2], [3, 4], [5, 6]]\"\n";
        let result = TrajectoryRecord::from_reader(log.as_bytes(), 3);
        assert!(matches!(
            result,
            Err(LocalizationError::MalformedRecord { line: 2, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_undecodable_line() {
        let mut log = b"0.0,\"[0.0, 0.0, 0.0]\",0.0,\"[[1.0, 2.0]]\"\n".to_vec();
        log.extend_from_slice(b"0.1,\"[0.0, \xff, 0.0]\",0.0,\"[[1.0, 2.0]]\"\n");
        let result = TrajectoryRecord::from_reader(log.as_slice(), 1);
        assert!(matches!(
            result,
            Err(LocalizationError::MalformedRecord { line: 2, .. })
        ));
    }

    #[test]
    fn test_trajectory_csv_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trajectory.csv");
        let landmarks = landmarks_from_config(&DEFAULT_LANDMARKS);
        let records = generate_straight_line(&StraightLineConfig::default(), &landmarks).unwrap();
        TrajectoryRecord::to_csv(&records, &path).unwrap();
        let read_back = TrajectoryRecord::from_csv(&path, 3).unwrap();
        assert_eq!(read_back.len(), records.len());
        for (a, b) in records.iter().zip(read_back.iter()) {
            assert_approx_eq!(a.time, b.time, 1e-12);
            assert_approx_eq!(a.ground_truth.x, b.ground_truth.x, 1e-12);
            assert_approx_eq!(a.observations[2].y, b.observations[2].y, 1e-12);
        }
    }

    #[test]
    fn test_from_csv_missing_file() {
        let result = TrajectoryRecord::from_csv("nonexistent.csv", 3);
        assert!(matches!(result, Err(LocalizationError::Io(_))));
    }

    #[test]
    fn test_generate_straight_line() {
        let landmarks = landmarks_from_config(&DEFAULT_LANDMARKS);
        let config = StraightLineConfig {
            speed: 1.0,
            dt: 0.5,
            steps: 5,
            start: Pose::new(0.0, 0.0, 0.0),
            ..Default::default()
        };
        let records = generate_straight_line(&config, &landmarks).unwrap();
        assert_eq!(records.len(), 5);
        let last = &records[4];
        assert_approx_eq!(last.time, 2.0, 1e-12);
        assert_approx_eq!(last.ground_truth.x, 2.0, 1e-12);
        assert_approx_eq!(last.ground_truth.y, 0.0, 1e-12);
        assert_eq!(last.control, 0.0);
        assert_approx_eq!(last.observations[0].x, 0.75 - 2.0, 1e-12);

        let bad = StraightLineConfig {
            dt: 0.0,
            ..Default::default()
        };
        assert!(generate_straight_line(&bad, &landmarks).is_err());
    }

    #[test]
    fn test_run_localization_empty_log() {
        let result = run_localization(&[], &SimulationConfig::default());
        assert!(matches!(
            result,
            Err(LocalizationError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_run_localization_single_record_uses_zero_dt() {
        let landmarks = landmarks_from_config(&DEFAULT_LANDMARKS);
        let config = StraightLineConfig {
            steps: 1,
            ..Default::default()
        };
        let records = generate_straight_line(&config, &landmarks).unwrap();
        let run = run_localization(&records, &SimulationConfig::default()).unwrap();
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.results[0].dt, 0.0);
        assert_eq!(run.final_particles.len(), 100);
        assert!(run.history.is_empty());
        // The centroid row carries the ensemble's own circular mean heading
        let sin_sum: f64 = run.final_particles.iter().map(|p| p.heading.sin()).sum();
        let cos_sum: f64 = run.final_particles.iter().map(|p| p.heading.cos()).sum();
        assert_approx_eq!(run.results[0].centroid_heading, sin_sum.atan2(cos_sum), 1e-9);
    }

    #[test]
    fn test_run_localization_final_step_reuses_dt() {
        let landmarks = landmarks_from_config(&DEFAULT_LANDMARKS);
        let mut records =
            generate_straight_line(&StraightLineConfig::default(), &landmarks).unwrap();
        records.truncate(3);
        records[1].time = 0.25;
        records[2].time = 0.5;
        let config = SimulationConfig {
            record_history: true,
            ..Default::default()
        };
        let run = run_localization(&records, &config).unwrap();
        let dts: Vec<f64> = run.results.iter().map(|r| r.dt).collect();
        assert_eq!(dts, vec![0.25, 0.25, 0.25]);
        assert_eq!(run.history.len(), 3);
        assert!(run.history.iter().all(|h| h.len() == 100));
    }

    #[test]
    fn test_run_localization_rejects_time_going_backwards() {
        let landmarks = landmarks_from_config(&DEFAULT_LANDMARKS);
        let mut records =
            generate_straight_line(&StraightLineConfig::default(), &landmarks).unwrap();
        records[5].time = -1.0;
        let result = run_localization(&records, &SimulationConfig::default());
        assert!(matches!(
            result,
            Err(LocalizationError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_run_localization_rejects_observation_count_mismatch() {
        let landmarks = landmarks_from_config(&DEFAULT_LANDMARKS);
        let mut records =
            generate_straight_line(&StraightLineConfig::default(), &landmarks).unwrap();
        records[3].observations.pop();
        let result = run_localization(&records, &SimulationConfig::default());
        assert!(matches!(
            result,
            Err(LocalizationError::MalformedRecord { line: 4, .. })
        ));
    }

    #[test]
    fn test_step_results_csv_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let landmarks = landmarks_from_config(&DEFAULT_LANDMARKS);
        let mut records =
            generate_straight_line(&StraightLineConfig::default(), &landmarks).unwrap();
        records.truncate(10);
        let run = run_localization(&records, &SimulationConfig::default()).unwrap();
        StepResult::to_csv(&run.results, &path).unwrap();
        let read_back = StepResult::from_csv(&path).unwrap();
        assert_eq!(read_back.len(), 10);
        let last = &read_back[9];
        assert_eq!(last.centroid().heading, last.centroid_heading);
        assert_eq!(last.estimate().heading, last.estimate_heading);
        assert_approx_eq!(read_back[9].true_x, run.results[9].true_x, 1e-12);
        assert_approx_eq!(
            read_back[9].position_error,
            run.results[9].position_error,
            1e-12
        );
    }

    #[test]
    fn test_config_file_formats() {
        let dir = tempdir().unwrap();
        let config = SimulationConfig {
            record_history: true,
            ..Default::default()
        };
        for name in ["config.json", "config.yaml", "config.toml"] {
            let path = dir.path().join(name);
            config.to_file(&path).unwrap();
            let read_back = SimulationConfig::from_file(&path).unwrap();
            assert_eq!(read_back, config, "{name} did not round trip");
        }
        let bad = dir.path().join("config.ini");
        assert!(config.to_file(&bad).is_err());
        assert!(SimulationConfig::from_file(&bad).is_err());
    }

    #[test]
    fn test_config_defaults_fill_missing_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[filter]\nnum_particles = 250\n").unwrap();
        let config = SimulationConfig::from_file(&path).unwrap();
        assert_eq!(config.filter.num_particles, 250);
        assert_eq!(config.filter.seed, 42);
        assert_eq!(config.landmarks, DEFAULT_LANDMARKS.to_vec());
    }
}
