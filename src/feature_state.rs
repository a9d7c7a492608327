use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::environment::EnvironmentId;
use crate::eval::Error;
use crate::feature::{FeatureId, MultivariateOptionId};
use crate::identity::IdentityId;
use crate::segment::SegmentId;
use crate::value::TypedValue;

pub type FeatureStateId = u64;
pub type FeatureSegmentId = u64;
pub type Version = u32;

/// Which layer a feature state overrides.
///
/// A state targets exactly one of the three layers; the stored form's nullable `identity` and
/// `feature_segment` references are folded into this on deserialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OverrideTarget {
    Environment,
    Segment(FeatureSegmentId),
    Identity(IdentityId),
}

/// Lifecycle of a single feature state. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureStateStatus {
    /// No version yet.
    Draft,
    /// Versioned, but `live_from` is unset or in the future.
    Scheduled,
    Live,
}

impl fmt::Display for FeatureStateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureStateStatus::Draft => "draft",
            FeatureStateStatus::Scheduled => "scheduled",
            FeatureStateStatus::Live => "live",
        };
        f.write_str(s)
    }
}

/// Per feature state override of a multivariate option's allocation.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MultivariateFeatureStateValue {
    pub multivariate_feature_option: MultivariateOptionId,
    pub percentage_allocation: f64,
}

/// The override/value record for one feature in one environment.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(try_from = "FeatureStateRepr", into = "FeatureStateRepr")]
pub struct FeatureState {
    pub id: FeatureStateId,
    pub feature: FeatureId,
    pub environment: EnvironmentId,
    pub target: OverrideTarget,
    pub enabled: bool,
    pub version: Option<Version>,
    pub live_from: Option<DateTime<Utc>>,
    pub value: Option<TypedValue>,
    pub multivariate_feature_state_values: Vec<MultivariateFeatureStateValue>,
}

#[derive(Deserialize, Serialize)]
struct FeatureStateRepr {
    id: FeatureStateId,
    feature: FeatureId,
    environment: EnvironmentId,
    #[serde(default)]
    identity: Option<IdentityId>,
    #[serde(default)]
    feature_segment: Option<FeatureSegmentId>,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    version: Option<Version>,
    #[serde(default)]
    live_from: Option<DateTime<Utc>>,
    #[serde(default)]
    feature_state_value: Option<TypedValue>,
    #[serde(default)]
    multivariate_feature_state_values: Vec<MultivariateFeatureStateValue>,
}

impl TryFrom<FeatureStateRepr> for FeatureState {
    type Error = Error;

    fn try_from(repr: FeatureStateRepr) -> Result<Self, Self::Error> {
        let target = match (repr.identity, repr.feature_segment) {
            (None, None) => OverrideTarget::Environment,
            (Some(identity), None) => OverrideTarget::Identity(identity),
            (None, Some(feature_segment)) => OverrideTarget::Segment(feature_segment),
            (Some(_), Some(_)) => {
                return Err(Error::ConflictingOverrideTarget {
                    feature_state: repr.id,
                })
            }
        };
        Ok(FeatureState {
            id: repr.id,
            feature: repr.feature,
            environment: repr.environment,
            target,
            enabled: repr.enabled,
            version: repr.version,
            live_from: repr.live_from,
            value: repr.feature_state_value,
            multivariate_feature_state_values: repr.multivariate_feature_state_values,
        })
    }
}

impl From<FeatureState> for FeatureStateRepr {
    fn from(state: FeatureState) -> Self {
        let (identity, feature_segment) = match state.target {
            OverrideTarget::Environment => (None, None),
            OverrideTarget::Identity(identity) => (Some(identity), None),
            OverrideTarget::Segment(feature_segment) => (None, Some(feature_segment)),
        };
        FeatureStateRepr {
            id: state.id,
            feature: state.feature,
            environment: state.environment,
            identity,
            feature_segment,
            enabled: state.enabled,
            version: state.version,
            live_from: state.live_from,
            feature_state_value: state.value,
            multivariate_feature_state_values: state.multivariate_feature_state_values,
        }
    }
}

impl FeatureState {
    pub fn status(&self, now: DateTime<Utc>) -> FeatureStateStatus {
        match (self.version, self.live_from) {
            (None, _) => FeatureStateStatus::Draft,
            (Some(_), Some(live_from)) if live_from <= now => FeatureStateStatus::Live,
            (Some(_), _) => FeatureStateStatus::Scheduled,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status(now) == FeatureStateStatus::Live
    }

    pub fn total_allocation(&self) -> f64 {
        self.multivariate_feature_state_values
            .iter()
            .map(|v| v.percentage_allocation)
            .sum()
    }

    /// Copies this state into a new draft: same target and values, no version, no live date.
    pub fn clone_as_draft(&self, id: FeatureStateId) -> FeatureState {
        FeatureState {
            id,
            version: None,
            live_from: None,
            ..self.clone()
        }
    }

    /// Publishes a draft. It becomes live once `live_from` has passed.
    pub fn commit(&mut self, version: Version, live_from: DateTime<Utc>) -> Result<(), Error> {
        if self.version.is_some() {
            return Err(Error::InvalidTransition {
                feature_state: self.id,
            });
        }
        self.version = Some(version);
        self.live_from = Some(live_from);
        Ok(())
    }
}

/// The association of a feature, a segment and an environment.
///
/// `priority` is a rank: 0 or 1 outranks 2. It is unique per feature and environment.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct FeatureSegment {
    pub id: FeatureSegmentId,
    pub feature: FeatureId,
    pub segment: SegmentId,
    pub environment: EnvironmentId,
    #[serde(default)]
    pub priority: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use spectral::prelude::*;
    use test_case::test_case;

    fn state(version: Option<Version>, live_from: Option<DateTime<Utc>>) -> FeatureState {
        FeatureState {
            id: 1,
            feature: 1,
            environment: 1,
            target: OverrideTarget::Environment,
            enabled: true,
            version,
            live_from,
            value: Some(TypedValue::from("value")),
            multivariate_feature_state_values: vec![],
        }
    }

    #[test]
    fn status_follows_version_and_live_from() {
        let now = Utc::now();
        let yesterday = now - Duration::days(1);
        let tomorrow = now + Duration::days(1);

        assert_eq!(state(None, Some(yesterday)).status(now), FeatureStateStatus::Draft);
        assert_eq!(state(Some(1), None).status(now), FeatureStateStatus::Scheduled);
        assert_eq!(
            state(Some(1), Some(tomorrow)).status(now),
            FeatureStateStatus::Scheduled
        );
        assert_eq!(state(Some(1), Some(now)).status(now), FeatureStateStatus::Live);
        assert_eq!(
            state(Some(1), Some(tomorrow)).status(tomorrow),
            FeatureStateStatus::Live,
            "scheduled becomes live as time passes"
        );
    }

    #[test]
    fn draft_clone_then_commit() {
        let now = Utc::now();
        let live = state(Some(1), Some(now - Duration::hours(1)));

        let mut draft = live.clone_as_draft(2);
        assert_eq!(draft.id, 2);
        assert_eq!(draft.status(now), FeatureStateStatus::Draft);
        assert_eq!(draft.value, live.value);
        assert_eq!(draft.target, live.target);

        draft.commit(2, now + Duration::hours(1)).expect("drafts commit");
        assert_eq!(draft.status(now), FeatureStateStatus::Scheduled);
        assert_eq!(draft.status(now + Duration::hours(2)), FeatureStateStatus::Live);

        assert_that!(draft.commit(3, now)).is_err();
        assert_eq!(draft.version, Some(2));
    }

    #[test_case(r#"{"id": 1, "feature": 2, "environment": 3}"#, OverrideTarget::Environment)]
    #[test_case(r#"{"id": 1, "feature": 2, "environment": 3, "identity": 4, "feature_segment": null}"#, OverrideTarget::Identity(4))]
    #[test_case(r#"{"id": 1, "feature": 2, "environment": 3, "feature_segment": 5}"#, OverrideTarget::Segment(5))]
    fn target_from_nullable_references(json: &str, expected: OverrideTarget) {
        let state: FeatureState = serde_json::from_str(json).expect("should parse");
        assert_eq!(state.target, expected);
        assert_that!(state.version).is_none();
    }

    #[test]
    fn identity_and_segment_together_are_rejected() {
        let result: Result<FeatureState, _> = serde_json::from_str(
            r#"{"id": 1, "feature": 2, "environment": 3, "identity": 4, "feature_segment": 5}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn serializes_back_to_nullable_references() {
        let mut s = state(Some(1), None);
        s.target = OverrideTarget::Segment(9);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["feature_segment"], 9);
        assert!(json["identity"].is_null());
        assert_eq!(json["feature_state_value"], "value");

        let back: FeatureState = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }
}
