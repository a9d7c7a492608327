use crate::feature::{Feature, FeatureId};
use crate::feature_state::FeatureState;

/// Restricts which features a resolution returns.
///
/// Filters on the feature itself narrow the candidate states before any override is compared;
/// filters on the resolved state apply to each feature's winner.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Leaves out features that must never be served to client-side keys.
    ExcludeServerKeyOnly,
    /// Keeps only features whose resolved state is enabled.
    EnabledOnly,
    /// Keeps only the named features. Names compare case-insensitively.
    FeatureNames(Vec<String>),
    FeatureIds(Vec<FeatureId>),
}

impl Filter {
    /// Whether `feature`'s candidate states survive this filter. Filters that only look at
    /// the winner always accept.
    pub fn accepts_feature(&self, feature: &Feature) -> bool {
        match self {
            Filter::ExcludeServerKeyOnly => !feature.is_server_key_only,
            Filter::FeatureNames(names) => names.iter().any(|name| feature.has_name(name)),
            Filter::FeatureIds(ids) => ids.contains(&feature.id),
            Filter::EnabledOnly => true,
        }
    }

    /// Whether a feature's winning state survives this filter.
    pub fn accepts_winner(&self, winner: &FeatureState) -> bool {
        match self {
            Filter::EnabledOnly => winner.enabled,
            _ => true,
        }
    }
}

pub(crate) fn accepts_feature(filters: &[Filter], feature: &Feature) -> bool {
    filters.iter().all(|filter| filter.accepts_feature(feature))
}

pub(crate) fn accepts_winner(filters: &[Filter], winner: &FeatureState) -> bool {
    filters.iter().all(|filter| filter.accepts_winner(winner))
}
