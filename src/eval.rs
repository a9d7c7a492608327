use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::environment::{EnvironmentDocument, OrganisationId};
use crate::feature::{Feature, FeatureId, FeatureType, MultivariateOptionId};
use crate::feature_state::{FeatureSegmentId, FeatureState, FeatureStateId, OverrideTarget};
use crate::filter::{self, Filter};
use crate::hashing::IdentityHashKey;
use crate::identity::{Identity, IdentityId, Trait};
use crate::multivariate::{self, MultivariateOutcome};
use crate::priority::{Candidate, PriorityComparator};
use crate::segment::{self, Segment, SegmentId};
use crate::store::TraitProvider;
use crate::value::TypedValue;

/// The state a feature resolved to for one identity (or for the bare environment).
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ResolvedFeatureState {
    pub feature: FeatureId,
    pub feature_name: String,
    pub feature_type: FeatureType,
    pub enabled: bool,
    pub value: Option<TypedValue>,
    /// The winning feature state.
    pub feature_state: FeatureStateId,
    /// The segment whose override won, if any.
    pub segment: Option<SegmentId>,
    /// The identity whose override won, if any.
    pub identity: Option<IdentityId>,
    /// The multivariate option served, if the identity landed in one.
    pub multivariate_feature_option: Option<MultivariateOptionId>,
}

/// Resolves the feature states of one environment document.
///
/// A resolver only borrows the document, so it is cheap to build one per request and it may be
/// shared between threads. The instant that decides which states are live is fixed when the
/// resolver is built, which keeps every resolution through it consistent.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    document: &'a EnvironmentDocument,
    trait_provider: Option<&'a (dyn TraitProvider + Sync)>,
    now: DateTime<Utc>,
    use_composite_key: bool,
    preview_drafts: bool,
}

// What an identity brings to candidate selection.
struct IdentityScope {
    id: Option<IdentityId>,
    hash_key: IdentityHashKey,
    segments: HashSet<SegmentId>,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver that reads persisted traits from the document's own identities.
    pub fn new(document: &'a EnvironmentDocument) -> Self {
        Resolver {
            document,
            trait_provider: Some(document),
            now: Utc::now(),
            use_composite_key: document
                .environment()
                .use_identity_composite_key_for_hashing,
            preview_drafts: false,
        }
    }

    pub fn with_trait_provider(mut self, provider: &'a (dyn TraitProvider + Sync)) -> Self {
        self.trait_provider = Some(provider);
        self
    }

    /// Resolves as of `now` instead of the moment the resolver was created.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Overrides the environment's choice between composite and numeric identity hash keys.
    pub fn with_composite_hash_keys(mut self, use_composite_key: bool) -> Self {
        self.use_composite_key = use_composite_key;
        self
    }

    /// When enabled, the newest draft of each segment or identity override is resolved as if
    /// it had been published at the resolver's `now`. Drafts of environment defaults are
    /// never previewed.
    pub fn preview_drafts(mut self, preview_drafts: bool) -> Self {
        self.preview_drafts = preview_drafts;
        self
    }

    /// The segments `identity` belongs to, in id order.
    pub fn matching_segments(&self, identity: &Identity, traits: Option<&[Trait]>) -> Vec<&'a Segment> {
        let hash_key = self.hash_key(identity);
        segment::matching_segments(
            self.document.segments(),
            self.traits_for(identity, traits),
            &hash_key,
        )
    }

    /// Resolves every feature of the environment for `identity`, ordered by feature id.
    ///
    /// `traits`, when given, replaces the identity's persisted traits for this call only.
    pub fn resolve_all(
        &self,
        identity: &Identity,
        traits: Option<&[Trait]>,
        filters: &[Filter],
    ) -> Result<Vec<ResolvedFeatureState>, Error> {
        let scope = IdentityScope {
            id: identity.id,
            hash_key: self.hash_key(identity),
            segments: self
                .matching_segments(identity, traits)
                .into_iter()
                .map(|segment| segment.id)
                .collect(),
        };
        let previews = self.draft_previews();
        let states = self
            .document
            .feature_states()
            .iter()
            .map(|state| (state, false))
            .chain(previews.iter().map(|state| (state, true)));
        self.resolve(states, Some(&scope), filters)
    }

    /// Resolves the environment's defaults, without any identity or segment overrides.
    /// Multivariate features serve their control value.
    pub fn resolve_environment(&self, filters: &[Filter]) -> Result<Vec<ResolvedFeatureState>, Error> {
        let states = self.document.feature_states().iter().map(|state| (state, false));
        self.resolve(states, None, filters)
    }

    fn resolve<'s, I>(
        &self,
        states: I,
        scope: Option<&IdentityScope>,
        filters: &[Filter],
    ) -> Result<Vec<ResolvedFeatureState>, Error>
    where
        I: Iterator<Item = (&'s FeatureState, bool)>,
    {
        let comparator = PriorityComparator::for_environment(self.document.environment(), self.now);
        let hide_disabled_flags = self.document.hide_disabled_flags();

        let groups = states
            .filter_map(|(state, preview)| {
                let candidate = self.candidate(state, scope, filters)?;
                Some(if preview { candidate.as_preview() } else { candidate })
            })
            .into_group_map_by(|candidate| candidate.state.feature);

        let mut resolved = Vec::with_capacity(groups.len());
        for (feature_id, candidates) in groups.into_iter().sorted_by_key(|(id, _)| *id) {
            let mut candidates = candidates.into_iter();
            let mut winner = match candidates.next() {
                Some(first) => first,
                None => continue,
            };
            for challenger in candidates {
                if comparator.wins(&challenger, &winner)? {
                    winner = challenger;
                }
            }

            let state = winner.state;
            if hide_disabled_flags && !state.enabled {
                continue;
            }
            if !filter::accepts_winner(filters, state) {
                continue;
            }
            // Candidates only exist for known features.
            let feature = match self.document.feature(feature_id) {
                Some(feature) => feature,
                None => continue,
            };
            resolved.push(self.resolved_state(feature, state, scope));
        }
        Ok(resolved)
    }

    fn candidate<'s>(
        &self,
        state: &'s FeatureState,
        scope: Option<&IdentityScope>,
        filters: &[Filter],
    ) -> Option<Candidate<'s>> {
        if state.environment != self.document.environment().id || !state.is_live(self.now) {
            return None;
        }
        let feature = self.document.feature(state.feature)?;
        if !filter::accepts_feature(filters, feature) {
            return None;
        }

        match (state.target, scope) {
            (OverrideTarget::Environment, _) => Some(Candidate::new(state, None)),
            (OverrideTarget::Segment(feature_segment), Some(scope)) => {
                let feature_segment = self.document.feature_segment(feature_segment)?;
                let applies = feature_segment.environment == state.environment
                    && feature_segment.feature == state.feature
                    && scope.segments.contains(&feature_segment.segment);
                applies.then(|| Candidate::new(state, Some(feature_segment.priority)))
            }
            (OverrideTarget::Identity(identity), Some(scope)) => {
                (scope.id == Some(identity)).then(|| Candidate::new(state, None))
            }
            (_, None) => None,
        }
    }

    fn resolved_state(
        &self,
        feature: &Feature,
        state: &FeatureState,
        scope: Option<&IdentityScope>,
    ) -> ResolvedFeatureState {
        let outcome = match scope {
            Some(scope) if feature.is_multivariate() => {
                multivariate::resolve(state, feature, &scope.hash_key)
            }
            _ => MultivariateOutcome::Control,
        };
        let multivariate_feature_option = match outcome {
            MultivariateOutcome::Variant(option) => Some(option.id),
            MultivariateOutcome::Control => None,
        };

        let (segment, identity) = match state.target {
            OverrideTarget::Environment => (None, None),
            OverrideTarget::Segment(feature_segment) => (self.segment_of(feature_segment), None),
            OverrideTarget::Identity(identity) => (None, Some(identity)),
        };

        ResolvedFeatureState {
            feature: feature.id,
            feature_name: feature.name.clone(),
            feature_type: feature.feature_type,
            enabled: state.enabled,
            value: outcome.value(state.value.as_ref()).cloned(),
            feature_state: state.id,
            segment,
            identity,
            multivariate_feature_option,
        }
    }

    fn segment_of(&self, feature_segment: FeatureSegmentId) -> Option<SegmentId> {
        self.document
            .feature_segment(feature_segment)
            .map(|feature_segment| feature_segment.segment)
    }

    fn hash_key(&self, identity: &Identity) -> IdentityHashKey {
        identity.hash_key_for(&self.document.environment().api_key, self.use_composite_key)
    }

    fn traits_for<'t>(&'t self, identity: &'t Identity, explicit: Option<&'t [Trait]>) -> &'t [Trait] {
        explicit
            .or_else(|| {
                self.trait_provider
                    .and_then(|provider| provider.traits(identity))
            })
            .unwrap_or(&identity.traits)
    }

    // Drafts stand in for a published version that outranks every existing version of the
    // same override.
    fn draft_previews(&self) -> Vec<FeatureState> {
        if !self.preview_drafts {
            return vec![];
        }
        let states = self.document.feature_states();
        states
            .iter()
            .filter(|state| state.version.is_none() && state.target != OverrideTarget::Environment)
            .into_group_map_by(|state| (state.environment, state.feature, state.target))
            .into_iter()
            .filter_map(|(key, drafts)| {
                let newest = drafts.into_iter().max_by_key(|state| state.id)?;
                let latest = states
                    .iter()
                    .filter(|state| (state.environment, state.feature, state.target) == key)
                    .filter_map(|state| state.version)
                    .max()
                    .unwrap_or(0);
                let version = match latest.checked_add(1) {
                    Some(version) => version,
                    None => {
                        warn!(
                            "cannot preview draft feature state {}: no version after {}",
                            newest.id, latest
                        );
                        return None;
                    }
                };
                debug!(
                    "previewing draft feature state {} as version {}",
                    newest.id, version
                );
                let mut preview = newest.clone();
                preview.version = Some(version);
                preview.live_from = Some(self.now);
                Some(preview)
            })
            .collect()
    }
}

/// Resolves every feature of `document` for `identity` as of now.
///
/// See [Resolver::resolve_all].
pub fn resolve_all(
    document: &EnvironmentDocument,
    identity: &Identity,
    traits: Option<&[Trait]>,
    filters: &[Filter],
) -> Result<Vec<ResolvedFeatureState>, Error> {
    let resolved = Resolver::new(document).resolve_all(identity, traits, filters);
    if let Err(e) = &resolved {
        warn!(
            "could not resolve environment {} for identity {}: {}",
            document.environment().id,
            identity.identifier,
            e
        );
    }
    resolved
}

/// Error is returned when a document fails validation, when resolution meets data that breaks
/// the document's invariants, or when an operation is not allowed in the current state.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind")]
pub enum Error {
    /// FeatureStateMismatch indicates two states of different features or environments were
    /// compared.
    FeatureStateMismatch {
        left: FeatureStateId,
        right: FeatureStateId,
    },
    /// IdentityMismatch indicates overrides for two different identities were compared.
    IdentityMismatch {
        left: FeatureStateId,
        right: FeatureStateId,
    },
    /// DuplicateSegmentPriority indicates two feature segments of one feature share a priority.
    DuplicateSegmentPriority { feature: FeatureId, priority: i32 },
    /// DuplicateLiveFeatureState indicates two states of the same override can't be ordered.
    DuplicateLiveFeatureState {
        feature: FeatureId,
        left: FeatureStateId,
        right: FeatureStateId,
    },
    DuplicateFeatureName { name: String },
    UnknownFeature {
        feature_state: FeatureStateId,
        feature: FeatureId,
    },
    UnknownFeatureSegment {
        feature_state: FeatureStateId,
        feature_segment: FeatureSegmentId,
    },
    UnknownMultivariateOption {
        feature_state: FeatureStateId,
        option: MultivariateOptionId,
    },
    /// AllocationExceeded indicates a state's multivariate allocations add up to over 100%.
    AllocationExceeded {
        feature_state: FeatureStateId,
        total: f64,
    },
    TooManyConditions {
        segment: SegmentId,
        count: usize,
        limit: usize,
    },
    /// ConflictingOverrideTarget indicates a stored state referenced both an identity and a
    /// feature segment.
    ConflictingOverrideTarget { feature_state: FeatureStateId },
    /// TraitPersistenceDisabled indicates trait writes for an organisation that does not
    /// persist trait data.
    TraitPersistenceDisabled { organisation: OrganisationId },
    /// InvalidTransition indicates an attempt to commit a state that is already versioned.
    InvalidTransition { feature_state: FeatureStateId },
    MalformedDocument { message: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FeatureStateMismatch { left, right } => write!(
                f,
                "feature states {} and {} belong to different features or environments",
                left, right
            ),
            Error::IdentityMismatch { left, right } => write!(
                f,
                "feature states {} and {} override different identities",
                left, right
            ),
            Error::DuplicateSegmentPriority { feature, priority } => write!(
                f,
                "feature {} has more than one feature segment with priority {}",
                feature, priority
            ),
            Error::DuplicateLiveFeatureState {
                feature,
                left,
                right,
            } => write!(
                f,
                "feature states {} and {} of feature {} are indistinguishable",
                left, right, feature
            ),
            Error::DuplicateFeatureName { name } => {
                write!(f, "feature name {} is used more than once", name)
            }
            Error::UnknownFeature {
                feature_state,
                feature,
            } => write!(
                f,
                "feature state {} references unknown feature {}",
                feature_state, feature
            ),
            Error::UnknownFeatureSegment {
                feature_state,
                feature_segment,
            } => write!(
                f,
                "feature state {} references unknown feature segment {}",
                feature_state, feature_segment
            ),
            Error::UnknownMultivariateOption {
                feature_state,
                option,
            } => write!(
                f,
                "feature state {} allocates to unknown multivariate option {}",
                feature_state, option
            ),
            Error::AllocationExceeded {
                feature_state,
                total,
            } => write!(
                f,
                "feature state {} allocates {}%, more than 100%",
                feature_state, total
            ),
            Error::TooManyConditions {
                segment,
                count,
                limit,
            } => write!(
                f,
                "segment {} has {} conditions, the limit is {}",
                segment, count, limit
            ),
            Error::ConflictingOverrideTarget { feature_state } => write!(
                f,
                "feature state {} overrides both an identity and a segment",
                feature_state
            ),
            Error::TraitPersistenceDisabled { organisation } => write!(
                f,
                "organisation {} does not persist trait data",
                organisation
            ),
            Error::InvalidTransition { feature_state } => {
                write!(f, "feature state {} is not a draft", feature_state)
            }
            Error::MalformedDocument { message } => {
                write!(f, "malformed environment document: {}", message)
            }
        }
    }
}

impl std::error::Error for Error {}
