//! Landmark observation model for the localization filter.
//!
//! The robot observes the displacement from its own position to each of a fixed set of landmarks. A particle is
//! scored by evaluating a bivariate Gaussian density of the observed displacement centred at the displacement the
//! particle would expect to see, and the per-landmark densities are multiplied together.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};

use crate::Pose;
use crate::error::{LocalizationError, Result};

/// Landmark positions used by the reference scenario.
pub const DEFAULT_LANDMARKS: [[f64; 2]; 3] = [[0.75, -1.25], [-1.1, 0.8], [1.5, 2.1]];

/// Generic measurement model trait used by the particle weigher
pub trait MeasurementModel {
    /// Natural log of the likelihood of the measurement given that the robot is at `pose`.
    ///
    /// May return `f64::NEG_INFINITY` for a zero likelihood.
    fn log_likelihood(&self, pose: &Pose) -> f64;
}

/// Observation noise model: a fixed 2x2 covariance on each landmark displacement.
///
/// Stored as nested arrays so that it round-trips cleanly through the configuration file formats.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationModel {
    /// Row-major 2x2 covariance of the displacement observation noise (m^2)
    pub covariance: [[f64; 2]; 2],
}
impl Default for ObservationModel {
    fn default() -> Self {
        ObservationModel {
            covariance: [[0.1, 0.0], [0.0, 0.1]],
        }
    }
}
impl ObservationModel {
    /// Isotropic observation noise with the given per-axis standard deviation
    pub fn isotropic(std_dev: f64) -> ObservationModel {
        let variance = std_dev * std_dev;
        ObservationModel {
            covariance: [[variance, 0.0], [0.0, variance]],
        }
    }
    pub fn covariance_matrix(&self) -> Matrix2<f64> {
        let c = self.covariance;
        Matrix2::new(c[0][0], c[0][1], c[1][0], c[1][1])
    }
    /// Builds the zero-mean density used to score residuals. Fails if the covariance is not symmetric positive
    /// definite.
    pub fn density(&self) -> Result<BivariateGaussian> {
        BivariateGaussian::new(self.covariance_matrix())
    }
}

/// Zero-mean bivariate Gaussian density with a precomputed inverse covariance and log normalizer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BivariateGaussian {
    covariance: Matrix2<f64>,
    information: Matrix2<f64>,
    log_normalizer: f64,
}
impl BivariateGaussian {
    pub fn new(covariance: Matrix2<f64>) -> Result<Self> {
        if covariance.iter().any(|v| !v.is_finite()) {
            return Err(LocalizationError::InvalidConfiguration(format!(
                "observation covariance must be finite, got {covariance:?}"
            )));
        }
        let scale = covariance.amax().max(f64::MIN_POSITIVE);
        if (covariance[(0, 1)] - covariance[(1, 0)]).abs() > 1e-12 * scale {
            return Err(LocalizationError::InvalidConfiguration(
                "observation covariance must be symmetric".to_string(),
            ));
        }
        let determinant = covariance.determinant();
        if covariance[(0, 0)] <= 0.0 || determinant <= 0.0 {
            return Err(LocalizationError::InvalidConfiguration(format!(
                "observation covariance must be positive definite (det = {determinant:e})"
            )));
        }
        let information = covariance.try_inverse().ok_or_else(|| {
            LocalizationError::InvalidConfiguration(
                "observation covariance is not invertible".to_string(),
            )
        })?;
        // ln((2 pi)^(k/2) |S|^(1/2)) with k = 2
        let log_normalizer = (2.0 * std::f64::consts::PI).ln() + 0.5 * determinant.ln();
        Ok(BivariateGaussian {
            covariance,
            information,
            log_normalizer,
        })
    }
    pub fn covariance(&self) -> &Matrix2<f64> {
        &self.covariance
    }
    /// Log density of a residual (observation minus expected observation)
    pub fn log_pdf(&self, residual: &Vector2<f64>) -> f64 {
        let mahalanobis = residual.dot(&(self.information * residual));
        -0.5 * mahalanobis - self.log_normalizer
    }
    /// Density of a residual (observation minus expected observation)
    pub fn pdf(&self, residual: &Vector2<f64>) -> f64 {
        self.log_pdf(residual).exp()
    }
}

/// One step's worth of landmark observations together with the map and the noise model needed to score them.
#[derive(Clone, Debug)]
pub struct LandmarkMeasurement<'a> {
    landmarks: &'a [Vector2<f64>],
    observations: &'a [Vector2<f64>],
    noise: BivariateGaussian,
}
impl Display for LandmarkMeasurement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LandmarkMeasurement(")?;
        for (i, z) in self.observations.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[{:.4}, {:.4}]", z.x, z.y)?;
        }
        write!(f, ")")
    }
}
impl<'a> LandmarkMeasurement<'a> {
    /// Pairs observations with landmarks. The two slices must be the same length.
    pub fn new(
        landmarks: &'a [Vector2<f64>],
        observations: &'a [Vector2<f64>],
        noise: BivariateGaussian,
    ) -> Result<Self> {
        if landmarks.is_empty() {
            return Err(LocalizationError::InvalidConfiguration(
                "at least one landmark is required".to_string(),
            ));
        }
        if landmarks.len() != observations.len() {
            return Err(LocalizationError::ObservationCount {
                expected: landmarks.len(),
                found: observations.len(),
            });
        }
        Ok(LandmarkMeasurement {
            landmarks,
            observations,
            noise,
        })
    }
    /// Displacement from `pose` to every landmark, i.e. what a robot at `pose` would observe without noise.
    pub fn expected_observations(&self, pose: &Pose) -> impl Iterator<Item = Vector2<f64>> + '_ {
        let position = pose.position();
        self.landmarks.iter().map(move |landmark| landmark - position)
    }
    /// Product of the per-landmark densities (not in log space; may underflow to zero)
    pub fn likelihood(&self, pose: &Pose) -> f64 {
        self.expected_observations(pose)
            .zip(self.observations.iter())
            .map(|(expected, observed)| self.noise.pdf(&(observed - expected)))
            .product()
    }
}
impl MeasurementModel for LandmarkMeasurement<'_> {
    fn log_likelihood(&self, pose: &Pose) -> f64 {
        self.expected_observations(pose)
            .zip(self.observations.iter())
            .map(|(expected, observed)| self.noise.log_pdf(&(observed - expected)))
            .sum()
    }
}

/// Convert landmark coordinates from configuration form into vectors
pub fn landmarks_from_config(landmarks: &[[f64; 2]]) -> Vec<Vector2<f64>> {
    landmarks.iter().map(|l| Vector2::new(l[0], l[1])).collect()
}

/// Noise-free displacement observations of every landmark from `pose`
pub fn observe_landmarks(pose: &Pose, landmarks: &[Vector2<f64>]) -> Vec<Vector2<f64>> {
    let position = pose.position();
    landmarks.iter().map(|l| l - position).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_standard_normal_density_at_mean() {
        let gaussian = BivariateGaussian::new(Matrix2::identity()).unwrap();
        // 1 / (2 pi) for a unit covariance
        assert_approx_eq!(
            gaussian.pdf(&Vector2::zeros()),
            1.0 / (2.0 * std::f64::consts::PI),
            1e-12
        );
    }

    #[test]
    fn test_density_matches_closed_form() {
        let covariance = Matrix2::new(0.5, 0.1, 0.1, 0.2);
        let gaussian = BivariateGaussian::new(covariance).unwrap();
        let r = Vector2::new(0.3, -0.4);
        let det: f64 = 0.5 * 0.2 - 0.1 * 0.1;
        let inv = Matrix2::new(0.2, -0.1, -0.1, 0.5) / det;
        let m = (r.transpose() * inv * r)[(0, 0)];
        let expected = (-0.5 * m).exp() / (2.0 * std::f64::consts::PI * det.sqrt());
        assert_approx_eq!(gaussian.pdf(&r), expected, 1e-12);
    }

    #[test]
    fn test_rejects_non_positive_definite_covariance() {
        assert!(BivariateGaussian::new(Matrix2::zeros()).is_err());
        assert!(BivariateGaussian::new(Matrix2::new(1.0, 2.0, 2.0, 1.0)).is_err());
        assert!(BivariateGaussian::new(Matrix2::new(1.0, 0.5, 0.0, 1.0)).is_err());
        assert!(BivariateGaussian::new(Matrix2::new(f64::NAN, 0.0, 0.0, 1.0)).is_err());
    }

    #[test]
    fn test_landmark_measurement_log_likelihood_matches_product() {
        let landmarks = landmarks_from_config(&DEFAULT_LANDMARKS);
        let truth = Pose::new(0.2, -0.1, 0.0);
        let observations = observe_landmarks(&truth, &landmarks);
        let noise = ObservationModel::default().density().unwrap();
        let measurement = LandmarkMeasurement::new(&landmarks, &observations, noise).unwrap();

        let pose = Pose::new(0.4, 0.1, 1.0);
        assert_approx_eq!(
            measurement.log_likelihood(&pose).exp(),
            measurement.likelihood(&pose),
            1e-12
        );
        // The true pose is the most likely one
        assert!(measurement.log_likelihood(&truth) > measurement.log_likelihood(&pose));
    }

    #[test]
    fn test_landmark_measurement_requires_matching_lengths() {
        let landmarks = landmarks_from_config(&DEFAULT_LANDMARKS);
        let observations = vec![Vector2::new(0.0, 0.0)];
        let noise = ObservationModel::default().density().unwrap();
        let result = LandmarkMeasurement::new(&landmarks, &observations, noise);
        assert!(matches!(
            result,
            Err(LocalizationError::ObservationCount {
                expected: 3,
                found: 1
            })
        ));
    }

    #[test]
    fn test_expected_observations_are_landmark_minus_position() {
        let landmarks = landmarks_from_config(&DEFAULT_LANDMARKS);
        let pose = Pose::new(1.0, 1.0, 0.3);
        let observations = observe_landmarks(&pose, &landmarks);
        assert_approx_eq!(observations[0].x, -0.25, 1e-12);
        assert_approx_eq!(observations[0].y, -2.25, 1e-12);
        assert_approx_eq!(observations[2].x, 0.5, 1e-12);
        assert_approx_eq!(observations[2].y, 1.1, 1e-12);
    }
}
