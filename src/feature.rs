use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::environment::Environment;
use crate::feature_state::{FeatureState, FeatureStateId, MultivariateFeatureStateValue, OverrideTarget};
use crate::util::is_false;
use crate::value::TypedValue;

pub type FeatureId = u64;
pub type MultivariateOptionId = u64;

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureType {
    #[default]
    Standard,
    Multivariate,
}

/// A flag or remote-config definition scoped to a project.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Feature {
    pub id: FeatureId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub feature_type: FeatureType,
    #[serde(default)]
    pub default_enabled: bool,
    /// Stored as a string; its type is inferred when environment defaults are created.
    #[serde(default)]
    pub initial_value: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_server_key_only: bool,
    #[serde(default)]
    pub multivariate_options: Vec<MultivariateFeatureOption>,
}

/// One named variant of a multivariate feature's value.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MultivariateFeatureOption {
    pub id: MultivariateOptionId,
    pub value: TypedValue,
    #[serde(default)]
    pub default_percentage_allocation: f64,
}

impl Feature {
    pub fn is_multivariate(&self) -> bool {
        self.feature_type == FeatureType::Multivariate
    }

    pub fn multivariate_option(&self, id: MultivariateOptionId) -> Option<&MultivariateFeatureOption> {
        self.multivariate_options.iter().find(|o| o.id == id)
    }

    /// Feature names are unique per project regardless of case.
    pub fn has_name(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

/// Builds the environment-default feature state every environment owns for a newly created
/// feature.
///
/// The states are live from `now` at version 1 and carry one multivariate allocation per
/// option, at the option's default percentage.
pub fn create_default_feature_states<F>(
    feature: &Feature,
    environments: &[Environment],
    now: DateTime<Utc>,
    mut next_id: F,
) -> Vec<FeatureState>
where
    F: FnMut() -> FeatureStateId,
{
    let value = feature.initial_value.as_deref().map(TypedValue::infer);
    let allocations: Vec<MultivariateFeatureStateValue> = feature
        .multivariate_options
        .iter()
        .map(|option| MultivariateFeatureStateValue {
            multivariate_feature_option: option.id,
            percentage_allocation: option.default_percentage_allocation,
        })
        .collect();

    environments
        .iter()
        .map(|environment| FeatureState {
            id: next_id(),
            feature: feature.id,
            environment: environment.id,
            target: OverrideTarget::Environment,
            enabled: feature.default_enabled,
            version: Some(1),
            live_from: Some(now),
            value: value.clone(),
            multivariate_feature_state_values: allocations.clone(),
        })
        .collect()
}
