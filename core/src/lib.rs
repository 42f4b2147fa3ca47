//! Planar robot localization with a landmark-aided particle filter
//!
//! This crate estimates the pose of a ground robot moving in the plane from a recorded trajectory log. The robot
//! carries a sensor that reports the displacement from the robot to each of a small set of fixed, known landmarks,
//! and it is driven by an angular-velocity command at a constant forward speed. The estimator is a textbook
//! sequential Monte Carlo (bootstrap) filter built from four stages that run in a strict order:
//!
//! 1. **Initialization**: draw an ensemble of candidate poses uniformly from a bounding box in $(x, y, \theta)$.
//! 2. **Prediction**: advance every candidate with a unicycle motion model and add Gaussian process noise.
//! 3. **Weighting**: score every candidate against the landmark observations with a bivariate Gaussian
//!    observation model and normalize the scores into a probability distribution.
//! 4. **Resampling**: draw a new ensemble from the weight distribution (multinomial, with replacement).
//!
//! Initialization runs once; prediction, weighting and resampling run once per record of the trajectory log.
//!
//! The crate is primarily built off of the following dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): small fixed-size vectors and matrices for the observation model.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): seeded random
//!   number generation for initialization, process noise and resampling.
//! - [`csv`](https://crates.io/crates/csv) and [`serde`](https://crates.io/crates/serde): trajectory log ingestion,
//!   result export and configuration files.
//!
//! ## Crate overview
//!
//! - [measurements]: the landmark observation model and the bivariate Gaussian density.
//! - [particle]: the particle filter itself (initializer, predictor, weigher, resampler and estimates).
//! - [sim]: trajectory log parsing, the driving loop, synthetic trajectories and configuration files.
//! - [error]: the error taxonomy shared by every module.
//!
//! ## Coordinate and state definitions
//!
//! The state of a single particle is the planar pose
//!
//! $$
//! x = [p_x, p_y, \theta]
//! $$
//!
//! where $p_x$ and $p_y$ are positions in meters in a fixed world frame and $\theta$ is the heading in radians,
//! measured counter-clockwise from the world $x$ axis. Heading is **not** wrapped during propagation; any quantity
//! that compares or averages headings does so on the unit circle.
//!
//! ### Motion model
//!
//! Given a forward speed $v$, an angular-velocity command $\omega$ and a time step $\Delta t$:
//!
//! $$
//! p_x(+) = p_x(-) + v \cos\theta(-) \Delta t, \quad
//! p_y(+) = p_y(-) + v \sin\theta(-) \Delta t, \quad
//! \theta(+) = \theta(-) + \omega \Delta t
//! $$
//!
//! ### Observation model
//!
//! For each landmark $l_j$ the sensor reports the displacement $z_j = l_j - p$. A particle at $p$ expects
//! $\hat{z}_j = l_j - p$ and its likelihood is
//!
//! $$
//! w \propto \prod_j \mathcal{N}\left(z_j ; \hat{z}_j, R\right)
//! $$
//!
//! with a fixed $2 \times 2$ observation covariance $R$.
pub mod error;
pub mod measurements;
pub mod particle;
pub mod sim;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};

pub use crate::error::LocalizationError;

/// Planar pose of the robot (or of a single particle).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position along the world x axis in meters
    pub x: f64,
    /// Position along the world y axis in meters
    pub y: f64,
    /// Heading in radians, counter-clockwise from the world x axis
    pub heading: f64,
}
impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose {{ x: {:.4} m, y: {:.4} m, heading: {:.2} deg }}",
            self.x,
            self.y,
            self.heading.to_degrees()
        )
    }
}
impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Pose {
        Pose { x, y, heading }
    }
    /// Position component of the pose
    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
    /// Euclidean distance between the positions of two poses (heading ignored)
    pub fn distance_to(&self, other: &Pose) -> f64 {
        (self.position() - other.position()).norm()
    }
}
impl From<[f64; 3]> for Pose {
    fn from(values: [f64; 3]) -> Self {
        Pose::new(values[0], values[1], values[2])
    }
}
impl From<Pose> for [f64; 3] {
    fn from(pose: Pose) -> Self {
        [pose.x, pose.y, pose.heading]
    }
}
impl TryFrom<&[f64]> for Pose {
    type Error = &'static str;
    /// Attempts to create a Pose from a slice of 3 elements `[x, y, heading]`.
    fn try_from(slice: &[f64]) -> Result<Self, Self::Error> {
        if slice.len() != 3 {
            return Err("Slice must have length 3 for Pose");
        }
        Ok(Pose::new(slice[0], slice[1], slice[2]))
    }
}

/// Closed interval `[lower, upper]` used for uniform initialization of one state axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}
impl Interval {
    pub fn new(lower: f64, upper: f64) -> Interval {
        Interval { lower, upper }
    }
    /// True if `value` lies inside the closed interval
    pub fn contains(&self, value: f64) -> bool {
        (self.lower..=self.upper).contains(&value)
    }
    fn validate(&self, axis: &str) -> Result<(), LocalizationError> {
        if !self.lower.is_finite() || !self.upper.is_finite() {
            return Err(LocalizationError::InvalidConfiguration(format!(
                "{axis} bounds must be finite, got [{}, {}]",
                self.lower, self.upper
            )));
        }
        if self.lower > self.upper {
            return Err(LocalizationError::InvalidConfiguration(format!(
                "{axis} bounds are inverted: lower {} > upper {}",
                self.lower, self.upper
            )));
        }
        Ok(())
    }
}

/// Axis-aligned bounding box in pose space used to seed the particle ensemble.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: Interval,
    pub y: Interval,
    pub heading: Interval,
}
impl Default for Bounds {
    fn default() -> Self {
        Bounds {
            x: Interval::new(-2.0, 2.0),
            y: Interval::new(-2.0, 2.0),
            heading: Interval::new(-std::f64::consts::PI, std::f64::consts::PI),
        }
    }
}
impl Bounds {
    pub fn new(x: (f64, f64), y: (f64, f64), heading: (f64, f64)) -> Bounds {
        Bounds {
            x: Interval::new(x.0, x.1),
            y: Interval::new(y.0, y.1),
            heading: Interval::new(heading.0, heading.1),
        }
    }
    /// Checks that every interval is finite and not inverted.
    pub fn validate(&self) -> Result<(), LocalizationError> {
        self.x.validate("x")?;
        self.y.validate("y")?;
        self.heading.validate("heading")
    }
    /// True if every coordinate of `pose` lies inside its interval
    pub fn contains(&self, pose: &Pose) -> bool {
        self.x.contains(pose.x) && self.y.contains(pose.y) && self.heading.contains(pose.heading)
    }
}

/// Wrap an angle to the range $-\pi$ to $\pi$ radians
///
/// # Example
/// ```rust
/// use pflocalize::wrap_to_pi;
/// use std::f64::consts::PI;
/// let wrapped_angle = wrap_to_pi(3.0 * PI / 2.0);
/// assert!((wrapped_angle + PI / 2.0).abs() < 1e-12);
/// ```
pub fn wrap_to_pi(angle: f64) -> f64 {
    if !angle.is_finite() {
        return angle;
    }
    let mut wrapped = angle;
    while wrapped > std::f64::consts::PI {
        wrapped -= 2.0 * std::f64::consts::PI;
    }
    while wrapped < -std::f64::consts::PI {
        wrapped += 2.0 * std::f64::consts::PI;
    }
    wrapped
}
