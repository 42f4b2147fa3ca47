//! Bootstrap particle filter for planar landmark localization.
//!
//! The filter is split into its four stages, each available both as a free function that works on caller-owned
//! buffers and as a method on [`ParticleFilter`], which owns the ensemble, the weights, the scratch buffers and
//! the random number generator:
//!
//! - [`initialize_uniform`]: draw the initial ensemble from a bounding box.
//! - [`predict`]: unicycle motion model plus additive Gaussian process noise.
//! - [`weigh`] / [`normalize_weights`]: Gaussian landmark likelihood, normalized to a distribution.
//! - [`multinomial_resample`]: draw indices with replacement in proportion to the weights.
//!
//! All buffers are allocated once when the filter is built and reused on every step.
use log::{debug, warn};
use nalgebra::Matrix3;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Debug};

use crate::error::{LocalizationError, Result};
use crate::measurements::MeasurementModel;
use crate::{Bounds, Pose, wrap_to_pi};

/// Unicycle motion model: constant forward speed, commanded angular velocity, additive Gaussian noise.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionModel {
    /// Forward speed along the heading (m/s)
    pub speed: f64,
    /// Process noise standard deviation on `[x (m), y (m), heading (rad)]`, applied once per prediction step
    pub noise_std: [f64; 3],
}
impl Default for MotionModel {
    fn default() -> Self {
        MotionModel {
            speed: 0.1,
            noise_std: [0.02, 0.02, 0.01],
        }
    }
}
impl MotionModel {
    pub fn validate(&self) -> Result<()> {
        if !self.speed.is_finite() {
            return Err(LocalizationError::InvalidConfiguration(format!(
                "speed must be finite, got {}",
                self.speed
            )));
        }
        if self.noise_std.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(LocalizationError::InvalidConfiguration(format!(
                "process noise standard deviations must be finite and non-negative, got {:?}",
                self.noise_std
            )));
        }
        Ok(())
    }
    /// Noise-free propagation of a single pose.
    pub fn propagate(&self, pose: &Pose, control: f64, dt: f64) -> Pose {
        Pose {
            x: pose.x + self.speed * pose.heading.cos() * dt,
            y: pose.y + self.speed * pose.heading.sin() * dt,
            heading: pose.heading + control * dt,
        }
    }
}

/// What to do when every particle scores a zero (or non-finite) likelihood.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum DegenerateWeightPolicy {
    /// Abort the run with [`LocalizationError::DegenerateWeights`]
    Fail,
    /// Reset every weight to 1/N, log a warning and carry on
    #[default]
    Uniform,
}

fn default_seed() -> u64 {
    42
}

/// Parameters needed to build a [`ParticleFilter`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleFilterConfig {
    /// Ensemble size, fixed for the filter lifetime
    pub num_particles: usize,
    #[serde(default)]
    pub degenerate_policy: DegenerateWeightPolicy,
    /// Seed for the filter's random number generator
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Bounding box the initial ensemble is drawn from
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default)]
    pub motion: MotionModel,
}
impl Default for ParticleFilterConfig {
    fn default() -> Self {
        ParticleFilterConfig {
            num_particles: 100,
            degenerate_policy: DegenerateWeightPolicy::default(),
            seed: default_seed(),
            bounds: Bounds::default(),
            motion: MotionModel::default(),
        }
    }
}

/// Fill `particles` with `num_particles` poses drawn independently and uniformly from `bounds`.
///
/// The buffer is cleared first and reuses its allocation.
pub fn initialize_uniform<R: Rng + ?Sized>(
    bounds: &Bounds,
    num_particles: usize,
    particles: &mut Vec<Pose>,
    rng: &mut R,
) -> Result<()> {
    if num_particles == 0 {
        return Err(LocalizationError::InvalidConfiguration(
            "number of particles must be positive".to_string(),
        ));
    }
    bounds.validate()?;
    let to_uniform = |lower: f64, upper: f64| {
        Uniform::new_inclusive(lower, upper)
            .map_err(|e| LocalizationError::InvalidConfiguration(e.to_string()))
    };
    let x = to_uniform(bounds.x.lower, bounds.x.upper)?;
    let y = to_uniform(bounds.y.lower, bounds.y.upper)?;
    let heading = to_uniform(bounds.heading.lower, bounds.heading.upper)?;

    particles.clear();
    particles.reserve(num_particles);
    for _ in 0..num_particles {
        particles.push(Pose {
            x: x.sample(rng),
            y: y.sample(rng),
            heading: heading.sample(rng),
        });
    }
    Ok(())
}

/// Advance every particle once with the motion model, then add independent zero-mean Gaussian noise to each
/// coordinate. An axis with a zero standard deviation receives no noise, so with all-zero noise the prediction is
/// deterministic. `dt == 0` is a valid no-motion step.
pub fn predict<R: Rng + ?Sized>(
    particles: &mut [Pose],
    control: f64,
    dt: f64,
    motion: &MotionModel,
    rng: &mut R,
) -> Result<()> {
    if !dt.is_finite() || dt < 0.0 {
        return Err(LocalizationError::InvalidConfiguration(format!(
            "time step must be finite and non-negative, got {dt}"
        )));
    }
    if !control.is_finite() {
        return Err(LocalizationError::InvalidConfiguration(format!(
            "control input must be finite, got {control}"
        )));
    }
    motion.validate()?;
    let noise = motion.noise_std.map(|std| {
        if std > 0.0 {
            Normal::new(0.0, std).ok()
        } else {
            None
        }
    });
    for particle in particles.iter_mut() {
        let mut next = motion.propagate(particle, control, dt);
        if let Some(n) = &noise[0] {
            next.x += n.sample(rng);
        }
        if let Some(n) = &noise[1] {
            next.y += n.sample(rng);
        }
        if let Some(n) = &noise[2] {
            next.heading += n.sample(rng);
        }
        *particle = next;
    }
    Ok(())
}

/// Score every particle against `measurement` and normalize the scores into `weights`.
///
/// Likelihoods are accumulated in log space and shifted by the largest one before exponentiating, which gives the
/// same normalized distribution as dividing the raw products by their sum without underflowing for particles far
/// from the observations.
pub fn weigh<M: MeasurementModel + ?Sized>(
    particles: &[Pose],
    measurement: &M,
    weights: &mut Vec<f64>,
    policy: DegenerateWeightPolicy,
) -> Result<()> {
    weights.clear();
    weights.extend(particles.iter().map(|p| measurement.log_likelihood(p)));
    let max_log_likelihood = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max_log_likelihood.is_finite() || weights.iter().any(|l| l.is_nan()) {
        let raw_sum: f64 = weights.iter().map(|l| l.exp()).sum();
        return handle_degenerate(weights, raw_sum, policy);
    }
    for w in weights.iter_mut() {
        *w = (*w - max_log_likelihood).exp();
    }
    normalize_weights(weights, policy)
}

/// Divide every weight by the sum of all weights.
///
/// All-zero weights, or any negative or non-finite entry, are degenerate and handled per `policy`. Large finite
/// weights are fine: the entries are scaled by the largest one before summing.
pub fn normalize_weights(weights: &mut [f64], policy: DegenerateWeightPolicy) -> Result<()> {
    if weights.is_empty() {
        return Err(LocalizationError::InvalidConfiguration(
            "cannot normalize an empty weight vector".to_string(),
        ));
    }
    let invalid_entry = weights.iter().any(|w| !w.is_finite() || *w < 0.0);
    let max_weight = weights.iter().copied().fold(0.0, f64::max);
    if invalid_entry || max_weight <= 0.0 {
        let sum: f64 = weights.iter().sum();
        return handle_degenerate(weights, sum, policy);
    }
    // Scale by the largest entry first so large finite weights cannot overflow the sum
    let scaled_sum: f64 = weights.iter().map(|w| w / max_weight).sum();
    for w in weights.iter_mut() {
        *w = (*w / max_weight) / scaled_sum;
    }
    Ok(())
}

fn handle_degenerate(weights: &mut [f64], sum: f64, policy: DegenerateWeightPolicy) -> Result<()> {
    match policy {
        DegenerateWeightPolicy::Fail => Err(LocalizationError::DegenerateWeights { sum }),
        DegenerateWeightPolicy::Uniform => {
            warn!(
                "Degenerate particle weights (sum = {:e}); resetting {} weights to uniform",
                sum,
                weights.len()
            );
            let uniform = 1.0 / weights.len() as f64;
            weights.fill(uniform);
            Ok(())
        }
    }
}

/// Draw `count` indices independently from `0..weights.len()` with probability proportional to the weights
/// (multinomial resampling, with replacement). The index buffer is cleared first and reuses its allocation.
pub fn multinomial_resample<R: Rng + ?Sized>(
    weights: &[f64],
    count: usize,
    indices: &mut Vec<usize>,
    rng: &mut R,
) -> Result<()> {
    if count == 0 {
        return Err(LocalizationError::InvalidConfiguration(
            "resample count must be positive".to_string(),
        ));
    }
    let distribution = WeightedIndex::<f64>::new(weights).map_err(|_| {
        LocalizationError::DegenerateWeights {
            sum: weights.iter().sum(),
        }
    })?;
    indices.clear();
    indices.extend((0..count).map(|_| distribution.sample(rng)));
    Ok(())
}

/// Particle filter over planar poses.
///
/// Owns the ensemble, the parallel weight vector, the buffers used while resampling, and a seeded random number
/// generator so that a run is reproducible for a given seed.
#[derive(Clone)]
pub struct ParticleFilter {
    particles: Vec<Pose>,
    weights: Vec<f64>,
    resample_buffer: Vec<Pose>,
    indices: Vec<usize>,
    motion: MotionModel,
    degenerate_policy: DegenerateWeightPolicy,
    rng: StdRng,
}
impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mean = self.estimate();
        let min_weight = self.weights.iter().copied().fold(f64::INFINITY, f64::min);
        let max_weight = self.weights.iter().copied().fold(0.0, f64::max);
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.particles.len())
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            )
            .field(
                "mean_pose",
                &format_args!(
                    "({:.4} m, {:.4} m, {:.2} deg)",
                    mean.x,
                    mean.y,
                    mean.heading.to_degrees()
                ),
            )
            .finish()
    }
}
impl ParticleFilter {
    /// Build a filter and draw its initial ensemble uniformly from `config.bounds`.
    pub fn new(config: &ParticleFilterConfig) -> Result<Self> {
        config.motion.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut particles = Vec::with_capacity(config.num_particles);
        initialize_uniform(&config.bounds, config.num_particles, &mut particles, &mut rng)?;
        debug!(
            "Initialized {} particles within {:?} (seed {})",
            config.num_particles, config.bounds, config.seed
        );
        Ok(Self::assemble(
            particles,
            config.motion,
            config.degenerate_policy,
            rng,
        ))
    }
    /// Build a filter around an explicit ensemble (weights start uniform).
    pub fn from_particles(
        particles: Vec<Pose>,
        motion: MotionModel,
        degenerate_policy: DegenerateWeightPolicy,
        seed: u64,
    ) -> Result<Self> {
        if particles.is_empty() {
            return Err(LocalizationError::InvalidConfiguration(
                "number of particles must be positive".to_string(),
            ));
        }
        motion.validate()?;
        Ok(Self::assemble(
            particles,
            motion,
            degenerate_policy,
            StdRng::seed_from_u64(seed),
        ))
    }
    fn assemble(
        particles: Vec<Pose>,
        motion: MotionModel,
        degenerate_policy: DegenerateWeightPolicy,
        rng: StdRng,
    ) -> Self {
        let n = particles.len();
        ParticleFilter {
            weights: vec![1.0 / n as f64; n],
            resample_buffer: Vec::with_capacity(n),
            indices: Vec::with_capacity(n),
            particles,
            motion,
            degenerate_policy,
            rng,
        }
    }
    pub fn particles(&self) -> &[Pose] {
        &self.particles
    }
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }
    pub fn motion_model(&self) -> &MotionModel {
        &self.motion
    }
    pub fn degenerate_policy(&self) -> DegenerateWeightPolicy {
        self.degenerate_policy
    }
    /// Indices drawn by the most recent resampling step
    pub fn last_resample_indices(&self) -> &[usize] {
        &self.indices
    }
    /// Propagate every particle with the angular-velocity `control` over `dt` seconds.
    pub fn predict(&mut self, control: f64, dt: f64) -> Result<()> {
        predict(&mut self.particles, control, dt, &self.motion, &mut self.rng)
    }
    /// Replace the weights with the normalized likelihoods of `measurement`.
    pub fn update_weights<M: MeasurementModel + ?Sized>(&mut self, measurement: &M) -> Result<()> {
        weigh(
            &self.particles,
            measurement,
            &mut self.weights,
            self.degenerate_policy,
        )
    }
    /// Overwrite the weights with raw (unnormalized) values and normalize them.
    pub fn set_weights(&mut self, weights: &[f64]) -> Result<()> {
        if weights.len() != self.particles.len() {
            return Err(LocalizationError::InvalidConfiguration(format!(
                "expected {} weights, got {}",
                self.particles.len(),
                weights.len()
            )));
        }
        self.weights.clear();
        self.weights.extend_from_slice(weights);
        normalize_weights(&mut self.weights, self.degenerate_policy)
    }
    /// Multinomial resampling back to the current ensemble size.
    pub fn resample(&mut self) -> Result<()> {
        let n = self.particles.len();
        self.resample_to(n)
    }
    /// Multinomial resampling to `count` particles. The new ensemble replaces the old one wholesale and the weights
    /// are reset to uniform.
    pub fn resample_to(&mut self, count: usize) -> Result<()> {
        multinomial_resample(&self.weights, count, &mut self.indices, &mut self.rng)?;
        self.resample_buffer.clear();
        self.resample_buffer
            .extend(self.indices.iter().map(|&i| self.particles[i]));
        std::mem::swap(&mut self.particles, &mut self.resample_buffer);
        self.weights.clear();
        self.weights.resize(count, 1.0 / count as f64);
        Ok(())
    }
    /// One full filter cycle: predict, weigh against `measurement`, resample.
    pub fn step<M: MeasurementModel + ?Sized>(
        &mut self,
        control: f64,
        dt: f64,
        measurement: &M,
    ) -> Result<()> {
        self.predict(control, dt)?;
        self.update_weights(measurement)?;
        self.resample()
    }
    /// Effective sample size, N_eff = 1 / sum(w_i^2)
    pub fn effective_sample_size(&self) -> f64 {
        let sum_of_squares: f64 = self.weights.iter().map(|w| w * w).sum();
        if sum_of_squares > 0.0 {
            1.0 / sum_of_squares
        } else {
            0.0
        }
    }
    /// Weighted mean pose. Heading is averaged on the unit circle.
    pub fn estimate(&self) -> Pose {
        weighted_mean(&self.particles, |i| self.weights[i])
    }
    /// Unweighted mean pose of the ensemble. Heading is averaged on the unit circle.
    pub fn centroid(&self) -> Pose {
        let n = self.particles.len() as f64;
        weighted_mean(&self.particles, |_| 1.0 / n)
    }
    /// Weighted covariance of `[x, y, heading]` about [`ParticleFilter::estimate`]. Heading residuals are wrapped
    /// to `[-pi, pi]`.
    pub fn covariance(&self) -> Matrix3<f64> {
        let mean = self.estimate();
        let mut cov = Matrix3::<f64>::zeros();
        for (particle, w) in self.particles.iter().zip(self.weights.iter()) {
            let diff = nalgebra::Vector3::new(
                particle.x - mean.x,
                particle.y - mean.y,
                wrap_to_pi(particle.heading - mean.heading),
            );
            cov += *w * diff * diff.transpose();
        }
        cov
    }
    /// Particle with the largest weight (first one on ties)
    pub fn highest_weight(&self) -> Pose {
        let mut best = 0;
        for (i, w) in self.weights.iter().enumerate() {
            if *w > self.weights[best] {
                best = i;
            }
        }
        self.particles[best]
    }
}

fn weighted_mean<F: Fn(usize) -> f64>(particles: &[Pose], weight: F) -> Pose {
    let mut x = 0.0;
    let mut y = 0.0;
    let mut sin_sum = 0.0;
    let mut cos_sum = 0.0;
    for (i, p) in particles.iter().enumerate() {
        let w = weight(i);
        x += w * p.x;
        y += w * p.y;
        sin_sum += w * p.heading.sin();
        cos_sum += w * p.heading.cos();
    }
    Pose::new(x, y, sin_sum.atan2(cos_sum))
}
