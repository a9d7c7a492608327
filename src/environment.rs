use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize, Serializer};

use crate::config::EngineConfig;
use crate::eval::Error;
use crate::feature::{Feature, FeatureId};
use crate::feature_state::{FeatureSegment, FeatureSegmentId, FeatureState, OverrideTarget};
use crate::identity::{Identity, Trait};
use crate::segment::Segment;
use crate::store::TraitProvider;

pub type EnvironmentId = u64;
pub type ProjectId = u64;
pub type OrganisationId = u64;

// Rounding slack when summing multivariate allocations such as 33.3 + 33.3 + 33.4.
const ALLOCATION_EPSILON: f64 = 1e-9;
const MAX_TOTAL_ALLOCATION: f64 = 100.0;

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Organisation {
    pub id: OrganisationId,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub persist_trait_data: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hide_disabled_flags: bool,
    pub organisation: Organisation,
}

/// A deployment context within a project.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Environment {
    pub id: EnvironmentId,
    pub api_key: String,
    #[serde(default)]
    pub name: String,
    /// Overrides the project's setting when present.
    #[serde(default)]
    pub hide_disabled_flags: Option<bool>,
    /// Older environments bucket identities by numeric id rather than by composite key.
    #[serde(default = "default_true")]
    pub use_identity_composite_key_for_hashing: bool,
    /// Under v2 versioning, live states of the same override are ordered by their live date
    /// alone; version numbers are not compared.
    #[serde(default)]
    pub use_v2_feature_versioning: bool,
}

/// The records of an environment document, as stored or transmitted.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DocumentData {
    pub environment: Environment,
    pub project: Project,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub feature_segments: Vec<FeatureSegment>,
    #[serde(default)]
    pub feature_states: Vec<FeatureState>,
    #[serde(default)]
    pub identities: Vec<Identity>,
}

/// An immutable, validated snapshot of everything needed to resolve one environment's flags.
///
/// Changes produce a new document through [EnvironmentDocument::updated], so a document that
/// is being read is never mutated.
#[derive(Clone, Debug)]
pub struct EnvironmentDocument {
    data: DocumentData,
    config: EngineConfig,
    features: HashMap<FeatureId, usize>,
    feature_segments: HashMap<FeatureSegmentId, usize>,
}

impl Serialize for EnvironmentDocument {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.data.serialize(serializer)
    }
}

impl EnvironmentDocument {
    pub fn new(data: DocumentData, config: &EngineConfig) -> Result<Self, Error> {
        validate(&data, config)?;

        let features = data
            .features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id, i))
            .collect();
        let feature_segments = data
            .feature_segments
            .iter()
            .enumerate()
            .map(|(i, fs)| (fs.id, i))
            .collect();

        Ok(EnvironmentDocument {
            data,
            config: config.clone(),
            features,
            feature_segments,
        })
    }

    pub fn from_json(json: &str, config: &EngineConfig) -> Result<Self, Error> {
        let data: DocumentData = serde_json::from_str(json).map_err(|e| Error::MalformedDocument {
            message: e.to_string(),
        })?;
        EnvironmentDocument::new(data, config)
    }

    /// Returns a new, revalidated document with `f` applied to a copy of this one's records.
    pub fn updated<F>(&self, f: F) -> Result<Self, Error>
    where
        F: FnOnce(&mut DocumentData),
    {
        let mut data = self.data.clone();
        f(&mut data);
        EnvironmentDocument::new(data, &self.config)
    }

    pub fn data(&self) -> &DocumentData {
        &self.data
    }

    pub fn environment(&self) -> &Environment {
        &self.data.environment
    }

    pub fn project(&self) -> &Project {
        &self.data.project
    }

    pub fn segments(&self) -> &[Segment] {
        &self.data.segments
    }

    pub fn feature_states(&self) -> &[FeatureState] {
        &self.data.feature_states
    }

    pub fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.features.get(&id).map(|&i| &self.data.features[i])
    }

    pub fn feature_segment(&self, id: FeatureSegmentId) -> Option<&FeatureSegment> {
        self.feature_segments
            .get(&id)
            .map(|&i| &self.data.feature_segments[i])
    }

    pub fn identity(&self, identifier: &str) -> Option<&Identity> {
        self.data
            .identities
            .iter()
            .find(|identity| identity.identifier == identifier)
    }

    /// Whether disabled flags are left out of results. The environment setting wins over the
    /// project's.
    pub fn hide_disabled_flags(&self) -> bool {
        self.data
            .environment
            .hide_disabled_flags
            .unwrap_or(self.data.project.hide_disabled_flags)
    }
}

impl TraitProvider for EnvironmentDocument {
    fn traits(&self, identity: &Identity) -> Option<&[Trait]> {
        self.data
            .identities
            .iter()
            .find(|known| match (known.id, identity.id) {
                (Some(a), Some(b)) => a == b,
                _ => known.identifier == identity.identifier,
            })
            .map(|known| known.traits.as_slice())
    }
}

fn validate(data: &DocumentData, config: &EngineConfig) -> Result<(), Error> {
    let mut names = HashSet::new();
    for feature in &data.features {
        if !names.insert(feature.name.to_lowercase()) {
            return Err(Error::DuplicateFeatureName {
                name: feature.name.clone(),
            });
        }
    }

    for segment in &data.segments {
        let count = segment.condition_count();
        if count > config.segment_rules_conditions_limit {
            return Err(Error::TooManyConditions {
                segment: segment.id,
                count,
                limit: config.segment_rules_conditions_limit,
            });
        }
    }

    let mut priorities = HashSet::new();
    for feature_segment in &data.feature_segments {
        let key = (
            feature_segment.feature,
            feature_segment.environment,
            feature_segment.priority,
        );
        if !priorities.insert(key) {
            return Err(Error::DuplicateSegmentPriority {
                feature: feature_segment.feature,
                priority: feature_segment.priority,
            });
        }
    }

    let features: HashMap<FeatureId, &Feature> = data.features.iter().map(|f| (f.id, f)).collect();
    let feature_segment_ids: HashSet<FeatureSegmentId> =
        data.feature_segments.iter().map(|fs| fs.id).collect();
    let mut versions = HashMap::new();

    for state in &data.feature_states {
        let feature = features
            .get(&state.feature)
            .ok_or(Error::UnknownFeature {
                feature_state: state.id,
                feature: state.feature,
            })?;

        if let OverrideTarget::Segment(feature_segment) = state.target {
            if !feature_segment_ids.contains(&feature_segment) {
                return Err(Error::UnknownFeatureSegment {
                    feature_state: state.id,
                    feature_segment,
                });
            }
        }

        for allocation in &state.multivariate_feature_state_values {
            if feature
                .multivariate_option(allocation.multivariate_feature_option)
                .is_none()
            {
                return Err(Error::UnknownMultivariateOption {
                    feature_state: state.id,
                    option: allocation.multivariate_feature_option,
                });
            }
        }
        let total = state.total_allocation();
        if total > MAX_TOTAL_ALLOCATION + ALLOCATION_EPSILON {
            return Err(Error::AllocationExceeded {
                feature_state: state.id,
                total,
            });
        }

        if let Some(version) = state.version {
            let key = (state.environment, state.feature, state.target, version);
            match versions.entry(key) {
                Entry::Occupied(existing) => {
                    return Err(Error::DuplicateLiveFeatureState {
                        feature: state.feature,
                        left: *existing.get(),
                        right: state.id,
                    })
                }
                Entry::Vacant(slot) => {
                    slot.insert(state.id);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::{base_document_json, TestDocument};
    use crate::value::TypedValue;
    use spectral::prelude::*;

    #[test]
    fn parses_and_indexes_document() {
        let document = TestDocument::remote_config().build();

        assert_eq!(document.environment().api_key, "test-env-key");
        assert_that!(document.feature(1).map(|f| f.name.as_str())).contains_value("remote_config");
        assert_that!(document.feature(99)).is_none();
        assert_that!(document.feature_segment(1).map(|fs| fs.segment)).contains_value(1);
        assert!(!document.hide_disabled_flags());
    }

    #[test]
    fn environment_overrides_project_hide_disabled_flags() {
        let document = TestDocument::remote_config()
            .modify(|data| data.project.hide_disabled_flags = true)
            .build();
        assert!(document.hide_disabled_flags());

        let document = document
            .updated(|data| data.environment.hide_disabled_flags = Some(false))
            .unwrap();
        assert!(!document.hide_disabled_flags());
    }

    #[test]
    fn malformed_json_is_reported() {
        let result = EnvironmentDocument::from_json("{", &EngineConfig::default());
        assert!(matches!(result, Err(Error::MalformedDocument { .. })));
    }

    #[test]
    fn rejects_unknown_feature() {
        let result = TestDocument::remote_config()
            .modify(|data| data.feature_states[0].feature = 99)
            .try_build();
        assert_that!(result).is_err_containing(Error::UnknownFeature {
            feature_state: 1,
            feature: 99,
        });
    }

    #[test]
    fn rejects_unknown_feature_segment() {
        let result = TestDocument::remote_config()
            .modify(|data| data.feature_states[1].target = OverrideTarget::Segment(42))
            .try_build();
        assert_that!(result).is_err_containing(Error::UnknownFeatureSegment {
            feature_state: 2,
            feature_segment: 42,
        });
    }

    #[test]
    fn rejects_duplicate_versions_of_the_same_override() {
        let result = TestDocument::remote_config()
            .modify(|data| {
                let mut copy = data.feature_states[0].clone();
                copy.id = 50;
                data.feature_states.push(copy);
            })
            .try_build();
        assert_that!(result).is_err_containing(Error::DuplicateLiveFeatureState {
            feature: 1,
            left: 1,
            right: 50,
        });
    }

    #[test]
    fn draft_copies_are_not_duplicates() {
        let result = TestDocument::remote_config()
            .modify(|data| {
                let draft = data.feature_states[0].clone_as_draft(50);
                data.feature_states.push(draft);
            })
            .try_build();
        assert_that!(result).is_ok();
    }

    #[test]
    fn rejects_duplicate_segment_priority() {
        let result = TestDocument::remote_config()
            .modify(|data| {
                let mut copy = data.feature_segments[0].clone();
                copy.id = 2;
                copy.segment = 2;
                data.feature_segments.push(copy);
            })
            .try_build();
        assert_that!(result).is_err_containing(Error::DuplicateSegmentPriority {
            feature: 1,
            priority: 1,
        });
    }

    #[test]
    fn rejects_case_insensitive_duplicate_feature_names() {
        let result = TestDocument::remote_config()
            .modify(|data| {
                let mut copy = data.features[0].clone();
                copy.id = 2;
                copy.name = "REMOTE_CONFIG".into();
                data.features.push(copy);
            })
            .try_build();
        assert_that!(result).is_err_containing(Error::DuplicateFeatureName {
            name: "REMOTE_CONFIG".into(),
        });
    }

    #[test]
    fn rejects_segments_over_the_condition_limit() {
        let config = EngineConfig {
            segment_rules_conditions_limit: 0,
        };
        let result = EnvironmentDocument::from_json(&base_document_json(), &config);
        assert_that!(result).is_err_containing(Error::TooManyConditions {
            segment: 1,
            count: 1,
            limit: 0,
        });
    }

    #[test]
    fn multivariate_allocations_are_checked() {
        let document = TestDocument::multivariate(&[(10, 30.0), (11, 70.0)]).build();
        assert_that!(document.feature_states().to_vec()).has_length(1);

        let result = TestDocument::multivariate(&[(10, 60.0), (11, 50.0)]).try_build();
        assert_that!(result).is_err_containing(Error::AllocationExceeded {
            feature_state: 1,
            total: 110.0,
        });

        let result = TestDocument::multivariate(&[(10, 30.0), (12, 10.0)]).try_build();
        assert_that!(result).is_err_containing(Error::UnknownMultivariateOption {
            feature_state: 1,
            option: 12,
        });

        let thirds = TestDocument::multivariate(&[(10, 33.3), (11, 33.3), (12, 33.4)])
            .modify(|data| {
                data.features[0]
                    .multivariate_options
                    .push(crate::feature::MultivariateFeatureOption {
                        id: 12,
                        value: TypedValue::from("c"),
                        default_percentage_allocation: 0.0,
                    })
            })
            .try_build();
        assert_that!(thirds).is_ok();
    }

    #[test]
    fn traits_come_from_known_identities() {
        let document = TestDocument::remote_config()
            .modify(|data| {
                data.identities.push(
                    Identity::new("known")
                        .with_id(7)
                        .with_traits(vec![Trait::new("plan", TypedValue::from("pro"))]),
                )
            })
            .build();

        assert_that!(document.traits(&Identity::new("known")).map(|t| t.len())).contains_value(1);
        assert_that!(document.traits(&Identity::new("other").with_id(7))).is_some();
        assert_that!(document.traits(&Identity::new("unknown"))).is_none();
        assert_that!(document.identity("known").and_then(|i| i.id)).contains_value(7);
    }

    #[test]
    fn serializes_to_the_document_records() {
        let document = TestDocument::remote_config().build();
        let json = serde_json::to_string(&document).unwrap();
        let reparsed = EnvironmentDocument::from_json(&json, &EngineConfig::default()).unwrap();
        assert_eq!(reparsed.data(), document.data());
    }
}
