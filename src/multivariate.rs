use itertools::Itertools;
use log::warn;

use crate::feature::{Feature, MultivariateFeatureOption};
use crate::feature_state::FeatureState;
use crate::hashing::{self, IdentityHashKey};
use crate::value::TypedValue;

/// Which value a multivariate feature state serves to an identity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MultivariateOutcome<'a> {
    Variant(&'a MultivariateFeatureOption),
    /// The identity fell outside every allocated bucket; the state's own value is served.
    Control,
}

impl<'a> MultivariateOutcome<'a> {
    /// The value to serve, given the feature state's control value.
    pub fn value(&self, control: Option<&'a TypedValue>) -> Option<&'a TypedValue> {
        match self {
            MultivariateOutcome::Variant(option) => Some(&option.value),
            MultivariateOutcome::Control => control,
        }
    }
}

/// Assigns an identity to one of a feature state's multivariate options.
///
/// The identity's percentage for the state's id is compared against consecutive buckets, one
/// per allocation in option id order, each as wide as its percentage. Allocations that leave
/// part of the range uncovered send the identities that land there to the control value.
pub fn resolve<'a>(
    state: &FeatureState,
    feature: &'a Feature,
    hash_key: &IdentityHashKey,
) -> MultivariateOutcome<'a> {
    if state.multivariate_feature_state_values.is_empty() {
        return MultivariateOutcome::Control;
    }

    bucket(state, feature, hashing::percentage_for(state.id, hash_key))
}

/// Walks the state's allocations in option id order and picks the one whose bucket holds
/// `percentage`.
fn bucket<'a>(
    state: &FeatureState,
    feature: &'a Feature,
    percentage: f64,
) -> MultivariateOutcome<'a> {
    let mut start = 0.0;
    for allocation in state
        .multivariate_feature_state_values
        .iter()
        .sorted_by_key(|v| v.multivariate_feature_option)
    {
        let end = start + allocation.percentage_allocation;
        if start <= percentage && percentage < end {
            match feature.multivariate_option(allocation.multivariate_feature_option) {
                Some(option) => return MultivariateOutcome::Variant(option),
                None => {
                    warn!(
                        "feature state {} allocates to unknown option {}",
                        state.id, allocation.multivariate_feature_option
                    );
                    return MultivariateOutcome::Control;
                }
            }
        }
        start = end;
    }
    MultivariateOutcome::Control
}
