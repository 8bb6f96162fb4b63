//! Sensor readings and reference-frame remapping.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::sensor::ReadingShape;

/// Immutable snapshot produced by a backend connection.
///
/// Readings are `Copy`; every handle receives its own copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Value slots. Unused slots are zero.
    pub values: [f64; 4],
    /// Backend timestamp, monotonic per connection.
    pub timestamp: Duration,
}

impl Reading {
    pub const fn new(values: [f64; 4], timestamp: Duration) -> Self {
        Self { values, timestamp }
    }

    /// Build a reading from a slice, zero-filling missing slots.
    pub fn from_slice(values: &[f64], timestamp: Duration) -> Self {
        let mut slots = [0.0; 4];
        for (slot, value) in slots.iter_mut().zip(values) {
            *slot = *value;
        }
        Self {
            values: slots,
            timestamp,
        }
    }

    /// Remap this reading into `frame` for the given screen orientation.
    #[must_use]
    pub fn remapped(&self, shape: ReadingShape, frame: ReferenceFrame, angle: ScreenAngle) -> Self {
        match frame {
            ReferenceFrame::Device => *self,
            ReferenceFrame::Screen => Self {
                values: remap_to_screen(shape, self.values, angle),
                timestamp: self.timestamp,
            },
        }
    }
}

/// Coordinate system a handle wants its readings in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceFrame {
    #[default]
    Device,
    Screen,
}

/// Screen orientation angle, clockwise from natural orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenAngle {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl ScreenAngle {
    /// Normalise an arbitrary angle in degrees to the nearest quarter turn.
    pub fn from_degrees(degrees: i32) -> Self {
        match (degrees.rem_euclid(360) + 45) / 90 % 4 {
            1 => Self::Deg90,
            2 => Self::Deg180,
            3 => Self::Deg270,
            _ => Self::Deg0,
        }
    }

    pub const fn degrees(self) -> i32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

fn remap_to_screen(shape: ReadingShape, values: [f64; 4], angle: ScreenAngle) -> [f64; 4] {
    let [x, y, z, w] = values;
    match shape {
        ReadingShape::Scalar => values,
        ReadingShape::Vector => match angle {
            ScreenAngle::Deg0 => values,
            ScreenAngle::Deg90 => [-y, x, z, w],
            ScreenAngle::Deg180 => [-x, -y, z, w],
            ScreenAngle::Deg270 => [y, -x, z, w],
        },
        ReadingShape::Quaternion => {
            if angle == ScreenAngle::Deg0 {
                return values;
            }
            // q * r, r = rotation of -angle about z
            let half = -f64::from(angle.degrees()).to_radians() / 2.0;
            let (rz, rw) = (half.sin(), half.cos());
            [
                x.mul_add(rw, y * rz),
                y.mul_add(rw, -(x * rz)),
                z.mul_add(rw, w * rz),
                w.mul_add(rw, -(z * rz)),
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: [f64; 4], b: [f64; 4]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn from_slice_zero_fills() {
        let r = Reading::from_slice(&[1.0, 2.0], Duration::from_millis(5));
        assert_eq!(r.values, [1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn device_frame_is_identity() {
        let r = Reading::new([1.0, 2.0, 3.0, 0.0], Duration::ZERO);
        let out = r.remapped(ReadingShape::Vector, ReferenceFrame::Device, ScreenAngle::Deg90);
        assert_eq!(out, r);
    }

    #[test]
    fn vector_rotates_with_screen() {
        let r = Reading::new([1.0, 2.0, 3.0, 0.0], Duration::from_secs(1));
        let frame = ReferenceFrame::Screen;
        let v90 = r.remapped(ReadingShape::Vector, frame, ScreenAngle::Deg90);
        let v180 = r.remapped(ReadingShape::Vector, frame, ScreenAngle::Deg180);
        let v270 = r.remapped(ReadingShape::Vector, frame, ScreenAngle::Deg270);
        assert!(close(v90.values, [-2.0, 1.0, 3.0, 0.0]));
        assert!(close(v180.values, [-1.0, -2.0, 3.0, 0.0]));
        assert!(close(v270.values, [2.0, -1.0, 3.0, 0.0]));
        assert_eq!(v90.timestamp, r.timestamp);
    }

    #[test]
    fn identity_quaternion_picks_up_screen_rotation() {
        let r = Reading::new([0.0, 0.0, 0.0, 1.0], Duration::ZERO);
        let out = r.remapped(
            ReadingShape::Quaternion,
            ReferenceFrame::Screen,
            ScreenAngle::Deg180,
        );
        // 180 degrees about -z
        assert!(close(out.values, [0.0, 0.0, -1.0, 0.0]));
    }

    #[test]
    fn scalar_is_never_remapped() {
        let r = Reading::new([42.0, 0.0, 0.0, 0.0], Duration::ZERO);
        let out = r.remapped(ReadingShape::Scalar, ReferenceFrame::Screen, ScreenAngle::Deg90);
        assert_eq!(out, r);
    }

    #[test]
    fn angle_normalisation() {
        assert_eq!(ScreenAngle::from_degrees(-90), ScreenAngle::Deg270);
        assert_eq!(ScreenAngle::from_degrees(450), ScreenAngle::Deg90);
        assert_eq!(ScreenAngle::from_degrees(179), ScreenAngle::Deg180);
        assert_eq!(ScreenAngle::from_degrees(0), ScreenAngle::Deg0);
    }
}
