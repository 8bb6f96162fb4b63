//! Frequency negotiation.
//!
//! Many handles of one sensor kind share a single backend connection. The
//! connection runs at the fastest clamped rate any live handle asked for;
//! slower handles are throttled on delivery instead.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::sensor::FrequencyBounds;

/// Fraction of a handle's sampling period that must elapse before it is
/// notified again in continuous mode.
const THROTTLE_TOLERANCE: f64 = 0.9;

/// How non-positive requested frequencies are treated.
///
/// Rejecting is the default because a zero or negative rate cannot be
/// negotiated against any backend range, so it is reported to the caller as
/// a type error at creation instead of silently running at the minimum.
/// Embedders that need the older clamp-up behaviour select
/// [`NonPositiveFrequency::ClampToMinimum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NonPositiveFrequency {
    /// Reject with [`FrequencyError::Invalid`].
    #[default]
    Reject,
    /// Accept and clamp up to the backend minimum.
    ClampToMinimum,
}

/// Frequency policy applied on top of backend bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyPolicy {
    /// Upper cap in Hz, applied before backend bounds.
    pub max_frequency: f64,
    /// Treatment of zero and negative requests.
    pub non_positive: NonPositiveFrequency,
}

impl Default for FrequencyPolicy {
    fn default() -> Self {
        Self {
            max_frequency: 60.0,
            non_positive: NonPositiveFrequency::Reject,
        }
    }
}

/// Negotiation errors.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum FrequencyError {
    #[error("Invalid sampling frequency: {0}")]
    Invalid(f64),

    #[error("No frequency requests to negotiate")]
    NoRequests,
}

impl FrequencyPolicy {
    /// Validate a requested frequency without any backend knowledge.
    pub fn validate(&self, frequency: f64) -> Result<(), FrequencyError> {
        if !frequency.is_finite() {
            return Err(FrequencyError::Invalid(frequency));
        }
        if frequency <= 0.0 && self.non_positive == NonPositiveFrequency::Reject {
            return Err(FrequencyError::Invalid(frequency));
        }
        Ok(())
    }

    /// Backend bounds narrowed by this policy's cap.
    pub fn effective_bounds(&self, bounds: FrequencyBounds) -> FrequencyBounds {
        bounds.capped(self.max_frequency)
    }

    /// Validate and clamp one request. `None` stands for the backend default.
    pub fn clamp(
        &self,
        requested: Option<f64>,
        bounds: &FrequencyBounds,
    ) -> Result<f64, FrequencyError> {
        let bounds = self.effective_bounds(*bounds);
        match requested {
            Some(frequency) => {
                self.validate(frequency)?;
                Ok(bounds.clamp(frequency))
            }
            None => Ok(bounds.default),
        }
    }
}

/// Compute the effective connection frequency for a set of requests.
///
/// Each request is clamped individually; the result is the maximum of the
/// clamped values.
pub fn negotiate<I>(
    requests: I,
    bounds: &FrequencyBounds,
    policy: &FrequencyPolicy,
) -> Result<f64, FrequencyError>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut effective: Option<f64> = None;
    for requested in requests {
        let clamped = policy.clamp(requested, bounds)?;
        effective = Some(effective.map_or(clamped, |current| current.max(clamped)));
    }
    effective.ok_or(FrequencyError::NoRequests)
}

/// Minimum spacing between two notifications for a handle running at
/// `frequency` Hz.
pub fn notification_interval(frequency: f64) -> Duration {
    if frequency <= 0.0 || !frequency.is_finite() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(THROTTLE_TOLERANCE / frequency)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn bounds(min: f64, max: f64) -> FrequencyBounds {
        FrequencyBounds::new(min, min, max)
    }

    #[test]
    fn fastest_request_wins() {
        let f = negotiate(
            [Some(60.0), Some(20.0)],
            &bounds(1.0, 60.0),
            &FrequencyPolicy::default(),
        )
        .unwrap();
        assert!(approx(f, 60.0));
    }

    #[test]
    fn request_above_backend_max_is_capped() {
        let f = negotiate([Some(60.0)], &bounds(1.0, 5.0), &FrequencyPolicy::default()).unwrap();
        assert!(approx(f, 5.0));
    }

    #[test]
    fn policy_cap_applies_below_backend_max() {
        let f = negotiate(
            [Some(560.0)],
            &bounds(1.0, 1000.0),
            &FrequencyPolicy::default(),
        )
        .unwrap();
        assert!(approx(f, 60.0));
    }

    #[test]
    fn non_positive_rejected_by_default() {
        let err = negotiate([Some(-1.0)], &bounds(2.0, 60.0), &FrequencyPolicy::default());
        assert_eq!(err, Err(FrequencyError::Invalid(-1.0)));
        assert!(FrequencyPolicy::default().validate(0.0).is_err());
    }

    #[test]
    fn non_positive_clamped_to_minimum_when_configured() {
        let policy = FrequencyPolicy {
            non_positive: NonPositiveFrequency::ClampToMinimum,
            ..Default::default()
        };
        let f = negotiate([Some(-1.0)], &bounds(2.0, 60.0), &policy).unwrap();
        assert!(approx(f, 2.0));
    }

    #[test]
    fn non_finite_always_rejected() {
        let policy = FrequencyPolicy {
            non_positive: NonPositiveFrequency::ClampToMinimum,
            ..Default::default()
        };
        assert!(policy.validate(f64::NAN).is_err());
        assert!(policy.validate(f64::INFINITY).is_err());
    }

    #[test]
    fn missing_request_uses_default() {
        let b = FrequencyBounds::new(10.0, 1.0, 60.0);
        let f = negotiate([None, Some(4.0)], &b, &FrequencyPolicy::default()).unwrap();
        assert!(approx(f, 10.0));
    }

    #[test]
    fn empty_set_is_an_error() {
        let r = negotiate(
            std::iter::empty(),
            &bounds(1.0, 60.0),
            &FrequencyPolicy::default(),
        );
        assert_eq!(r, Err(FrequencyError::NoRequests));
    }

    #[test]
    fn removing_fastest_drops_to_next_highest() {
        let b = bounds(1.0, 60.0);
        let policy = FrequencyPolicy::default();
        let all = negotiate([Some(60.0), Some(20.0), Some(10.0)], &b, &policy).unwrap();
        let rest = negotiate([Some(20.0), Some(10.0)], &b, &policy).unwrap();
        assert!(approx(all, 60.0));
        assert!(approx(rest, 20.0));
    }

    #[test]
    fn interval_scales_with_frequency() {
        assert_eq!(notification_interval(10.0), Duration::from_secs_f64(0.09));
        assert_eq!(notification_interval(0.0), Duration::ZERO);
    }
}
