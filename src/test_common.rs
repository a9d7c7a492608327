#![cfg(test)]

use chrono::{DateTime, TimeZone, Utc};

use crate::config::EngineConfig;
use crate::environment::{DocumentData, EnvironmentDocument};
use crate::eval::Error;
use crate::feature::{Feature, FeatureType, MultivariateFeatureOption, MultivariateOptionId};
use crate::feature_state::{FeatureState, MultivariateFeatureStateValue, OverrideTarget};
use crate::value::TypedValue;

/// An environment with one feature, `remote_config`, whose default value is overridden for
/// members of segment 1 (`trait-key == trait-value`).
pub fn base_document_json() -> String {
    r#"{
        "environment": {
            "id": 1,
            "api_key": "test-env-key",
            "name": "Test Environment",
            "use_identity_composite_key_for_hashing": true
        },
        "project": {
            "id": 1,
            "name": "Test Project",
            "hide_disabled_flags": false,
            "organisation": {"id": 1, "name": "Test Org", "persist_trait_data": true}
        },
        "segments": [
            {
                "id": 1,
                "name": "matching",
                "rules": [
                    {
                        "type": "ALL",
                        "rules": [],
                        "conditions": [
                            {"operator": "EQUAL", "property": "trait-key", "value": "trait-value"}
                        ]
                    }
                ]
            },
            {
                "id": 2,
                "name": "power_users",
                "rules": [
                    {
                        "type": "ANY",
                        "conditions": [
                            {"operator": "GREATER_THAN", "property": "my_trait", "value": 5}
                        ]
                    }
                ]
            }
        ],
        "features": [
            {
                "id": 1,
                "name": "remote_config",
                "type": "STANDARD",
                "default_enabled": true,
                "initial_value": "initial-value"
            }
        ],
        "feature_segments": [
            {"id": 1, "feature": 1, "segment": 1, "environment": 1, "priority": 1}
        ],
        "feature_states": [
            {
                "id": 1,
                "feature": 1,
                "environment": 1,
                "identity": null,
                "feature_segment": null,
                "enabled": true,
                "version": 1,
                "live_from": "2020-01-01T00:00:00Z",
                "feature_state_value": "initial-value"
            },
            {
                "id": 2,
                "feature": 1,
                "environment": 1,
                "feature_segment": 1,
                "enabled": true,
                "version": 1,
                "live_from": "2020-01-01T00:00:00Z",
                "feature_state_value": "overridden-value"
            }
        ],
        "identities": []
    }"#
    .to_string()
}

pub fn published() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

/// Builder for documents used across the test suites.
pub struct TestDocument {
    data: DocumentData,
}

impl TestDocument {
    pub fn remote_config() -> Self {
        TestDocument {
            data: serde_json::from_str(&base_document_json()).unwrap(),
        }
    }

    /// An environment with one multivariate feature, `checkout`, with options 10
    /// (`variant-a`) and 11 (`variant-b`) and a control value of `control`.
    pub fn multivariate(allocations: &[(MultivariateOptionId, f64)]) -> Self {
        Self::remote_config().modify(|data| {
            data.features = vec![Feature {
                id: 1,
                name: "checkout".into(),
                feature_type: FeatureType::Multivariate,
                default_enabled: true,
                initial_value: Some("control".into()),
                is_server_key_only: false,
                multivariate_options: vec![
                    MultivariateFeatureOption {
                        id: 10,
                        value: TypedValue::from("variant-a"),
                        default_percentage_allocation: 30.0,
                    },
                    MultivariateFeatureOption {
                        id: 11,
                        value: TypedValue::from("variant-b"),
                        default_percentage_allocation: 70.0,
                    },
                ],
            }];
            data.feature_segments.clear();
            data.feature_states = vec![FeatureState {
                id: 1,
                feature: 1,
                environment: 1,
                target: OverrideTarget::Environment,
                enabled: true,
                version: Some(1),
                live_from: Some(published()),
                value: Some(TypedValue::from("control")),
                multivariate_feature_state_values: allocations
                    .iter()
                    .map(|&(option, percentage)| MultivariateFeatureStateValue {
                        multivariate_feature_option: option,
                        percentage_allocation: percentage,
                    })
                    .collect(),
            }];
        })
    }

    pub fn modify<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut DocumentData),
    {
        f(&mut self.data);
        self
    }

    pub fn try_build(self) -> Result<EnvironmentDocument, Error> {
        EnvironmentDocument::new(self.data, &EngineConfig::default())
    }

    pub fn build(self) -> EnvironmentDocument {
        self.try_build().expect("test document should be valid")
    }
}
