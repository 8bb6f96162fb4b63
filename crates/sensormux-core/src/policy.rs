//! Capability policy engine.
//!
//! Decides whether a browsing context may construct a sensor of a given kind.
//! Rules are matched in priority order (first match wins). A feature with no
//! matching rule is denied.

use serde::{Deserialize, Serialize};

use crate::error::SensorError;
use crate::sensor::SensorKind;

/// Origin pattern matching the top-level context.
pub const SELF_ORIGIN: &str = "self";

/// Capability rule definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRule {
    /// Rule identifier.
    pub id: String,
    /// Feature name pattern (supports glob: "accelerometer", "*").
    pub feature_pattern: String,
    /// Origin pattern ("self", "https://example.com", "https://*", "*").
    #[serde(default = "default_origin_pattern")]
    pub origin_pattern: String,
    /// Action to take when matched.
    pub action: CapabilityAction,
    /// Priority (lower = higher priority).
    #[serde(default)]
    pub priority: u32,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

fn default_origin_pattern() -> String {
    SELF_ORIGIN.to_string()
}

/// Capability action to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityAction {
    Allow,
    #[default]
    Deny,
}

/// Result of capability evaluation.
#[derive(Debug, Clone, Default)]
pub struct CapabilityDecision {
    /// The action to take.
    pub action: CapabilityAction,
    /// ID of the rule that matched (if any).
    pub rule_id: Option<String>,
}

/// Capability policy for sensor construction.
#[derive(Debug, Clone)]
pub struct CapabilityPolicy {
    rules: Vec<CapabilityRule>,
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityPolicy {
    /// Create a policy with default rules (everything allowed for `self`).
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    /// Create a policy with custom rules only.
    pub fn with_rules(mut rules: Vec<CapabilityRule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self { rules }
    }

    /// Add rules (merges with existing).
    pub fn add_rules(&mut self, rules: Vec<CapabilityRule>) {
        self.rules.extend(rules);
        self.rules.sort_by_key(|r| r.priority);
    }

    /// Evaluate a single feature for an origin. `None` is the top-level context.
    pub fn evaluate(&self, feature: &str, origin: Option<&str>) -> CapabilityDecision {
        let origin = origin.unwrap_or(SELF_ORIGIN);
        self.rules
            .iter()
            .find(|rule| {
                matches_pattern(&rule.feature_pattern, feature)
                    && matches_pattern(&rule.origin_pattern, origin)
            })
            .map(|rule| CapabilityDecision {
                action: rule.action,
                rule_id: Some(rule.id.clone()),
            })
            .unwrap_or_default()
    }

    /// Check every feature `kind` needs. Fails on the first denied feature.
    pub fn check(&self, kind: SensorKind, origin: Option<&str>) -> Result<(), SensorError> {
        for feature in kind.required_features() {
            if self.evaluate(feature, origin).action == CapabilityAction::Deny {
                return Err(SensorError::PermissionPolicyViolation {
                    feature: (*feature).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Get all rules.
    pub fn rules(&self) -> &[CapabilityRule] {
        &self.rules
    }
}

/// Match `value` against a pattern with `*` and trailing-`*` support.
fn matches_pattern(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return value.starts_with(prefix);
    }
    pattern == value
}

/// Built-in default rules.
fn default_rules() -> Vec<CapabilityRule> {
    vec![CapabilityRule {
        id: "builtin-self-allow".to_string(),
        feature_pattern: "*".to_string(),
        origin_pattern: SELF_ORIGIN.to_string(),
        action: CapabilityAction::Allow,
        priority: 1000,
        description: Some("Allow all sensor features for the top-level context".to_string()),
    }]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rule(
        id: &str,
        feature: &str,
        origin: &str,
        action: CapabilityAction,
        priority: u32,
    ) -> CapabilityRule {
        CapabilityRule {
            id: id.to_string(),
            feature_pattern: feature.to_string(),
            origin_pattern: origin.to_string(),
            action,
            priority,
            description: None,
        }
    }

    #[test]
    fn matches_exact_and_prefix() {
        assert!(matches_pattern("gyroscope", "gyroscope"));
        assert!(!matches_pattern("gyroscope", "magnetometer"));
        assert!(matches_pattern("https://*", "https://example.com"));
        assert!(matches_pattern("*", "anything"));
    }

    #[test]
    fn top_level_allowed_by_default() {
        let policy = CapabilityPolicy::new();
        assert!(policy.check(SensorKind::AbsoluteOrientation, None).is_ok());
    }

    #[test]
    fn cross_origin_frame_denied_by_default() {
        let policy = CapabilityPolicy::new();
        let err = policy
            .check(SensorKind::Accelerometer, Some("https://ads.example"))
            .unwrap_err();
        assert_eq!(
            err,
            SensorError::PermissionPolicyViolation {
                feature: "accelerometer".to_string()
            }
        );
    }

    #[test]
    fn frame_can_be_granted_single_feature() {
        let mut policy = CapabilityPolicy::new();
        policy.add_rules(vec![rule(
            "frame-accel",
            "accelerometer",
            "https://game.example",
            CapabilityAction::Allow,
            10,
        )]);
        let origin = Some("https://game.example");
        assert!(policy.check(SensorKind::Accelerometer, origin).is_ok());
        // gyroscope is still missing for relative orientation
        let err = policy
            .check(SensorKind::RelativeOrientation, origin)
            .unwrap_err();
        assert!(
            matches!(err, SensorError::PermissionPolicyViolation { feature } if feature == "gyroscope")
        );
    }

    #[test]
    fn higher_priority_deny_overrides_default_allow() {
        let mut policy = CapabilityPolicy::new();
        policy.add_rules(vec![rule(
            "no-mag",
            "magnetometer",
            SELF_ORIGIN,
            CapabilityAction::Deny,
            1,
        )]);
        let decision = policy.evaluate("magnetometer", None);
        assert_eq!(decision.action, CapabilityAction::Deny);
        assert_eq!(decision.rule_id.as_deref(), Some("no-mag"));
        assert!(policy.check(SensorKind::Gyroscope, None).is_ok());
    }
}
