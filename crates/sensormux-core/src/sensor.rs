//! Sensor kinds and their static descriptors.
//!
//! Every logical sensor handle is parameterised by a [`SensorKind`]. The kind
//! decides the shape of its readings, the capability-policy features it needs
//! and whether it can be remapped to screen coordinates. Frequency bounds are
//! not part of the kind; they come from the backend when a connection opens.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical sensor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SensorKind {
    Accelerometer,
    LinearAcceleration,
    Gravity,
    Gyroscope,
    Magnetometer,
    AmbientLight,
    AbsoluteOrientation,
    RelativeOrientation,
}

/// Layout of the values in a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingShape {
    /// One value in slot 0 (e.g. illuminance in lux).
    Scalar,
    /// x, y, z in slots 0..3.
    Vector,
    /// x, y, z, w in slots 0..4.
    Quaternion,
}

impl ReadingShape {
    /// Number of meaningful value slots.
    pub const fn value_count(self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vector => 3,
            Self::Quaternion => 4,
        }
    }
}

/// Delivery cadence of a backend connection. Shared by all handles of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportingMode {
    /// A reading is produced only when the measured value changes.
    #[default]
    OnChange,
    /// Readings are produced at the configured frequency.
    Continuous,
}

/// Sampling frequency bounds reported by the backend, in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBounds {
    /// Frequency used when a handle does not request one.
    pub default: f64,
    /// Lowest supported frequency.
    pub min: f64,
    /// Highest supported frequency.
    pub max: f64,
}

impl FrequencyBounds {
    pub const fn new(default: f64, min: f64, max: f64) -> Self {
        Self { default, min, max }
    }

    /// Whether the bounds describe a usable range: finite, with
    /// `0 < min <= max` and a sampling period that fits in a `Duration`.
    pub fn is_valid(&self) -> bool {
        self.min.is_normal()
            && self.min > 0.0
            && self.max.is_finite()
            && self.min <= self.max
            && self.default.is_finite()
    }

    /// Cap the upper bound (and the default) at `cap`.
    ///
    /// The lower bound wins if `cap` is below it.
    #[must_use]
    pub fn capped(self, cap: f64) -> Self {
        let max = self.max.min(cap).max(self.min);
        Self {
            default: self.default.clamp(self.min, max),
            min: self.min,
            max,
        }
    }

    /// Clamp `frequency` into `[min, max]`.
    pub fn clamp(&self, frequency: f64) -> f64 {
        frequency.clamp(self.min, self.max)
    }
}

impl Default for FrequencyBounds {
    fn default() -> Self {
        Self {
            default: 5.0,
            min: 1.0,
            max: 60.0,
        }
    }
}

impl SensorKind {
    /// All known kinds.
    pub const ALL: [Self; 8] = [
        Self::Accelerometer,
        Self::LinearAcceleration,
        Self::Gravity,
        Self::Gyroscope,
        Self::Magnetometer,
        Self::AmbientLight,
        Self::AbsoluteOrientation,
        Self::RelativeOrientation,
    ];

    /// Shape of readings produced for this kind.
    pub const fn reading_shape(self) -> ReadingShape {
        match self {
            Self::AmbientLight => ReadingShape::Scalar,
            Self::AbsoluteOrientation | Self::RelativeOrientation => ReadingShape::Quaternion,
            Self::Accelerometer
            | Self::LinearAcceleration
            | Self::Gravity
            | Self::Gyroscope
            | Self::Magnetometer => ReadingShape::Vector,
        }
    }

    /// Capability-policy features that must all be allowed to construct a
    /// handle of this kind.
    pub const fn required_features(self) -> &'static [&'static str] {
        match self {
            Self::Accelerometer | Self::LinearAcceleration | Self::Gravity => &["accelerometer"],
            Self::Gyroscope => &["gyroscope"],
            Self::Magnetometer => &["magnetometer"],
            Self::AmbientLight => &["ambient-light-sensor"],
            Self::AbsoluteOrientation => &["accelerometer", "gyroscope", "magnetometer"],
            Self::RelativeOrientation => &["accelerometer", "gyroscope"],
        }
    }

    /// Whether readings of this kind can be remapped to screen coordinates.
    pub const fn supports_remap(self) -> bool {
        !matches!(self.reading_shape(), ReadingShape::Scalar)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accelerometer => "Accelerometer",
            Self::LinearAcceleration => "LinearAccelerationSensor",
            Self::Gravity => "GravitySensor",
            Self::Gyroscope => "Gyroscope",
            Self::Magnetometer => "Magnetometer",
            Self::AmbientLight => "AmbientLightSensor",
            Self::AbsoluteOrientation => "AbsoluteOrientationSensor",
            Self::RelativeOrientation => "RelativeOrientationSensor",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
