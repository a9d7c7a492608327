use std::cmp::{Ordering, Reverse};

use chrono::{DateTime, Utc};

use crate::environment::Environment;
use crate::eval::Error;
use crate::feature_state::{FeatureState, OverrideTarget, Version};

/// A feature state competing to be the resolved state of its feature.
#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a> {
    pub state: &'a FeatureState,
    /// The feature segment's priority, for segment overrides.
    pub segment_priority: Option<i32>,
    /// A draft standing in for the next published version of its override.
    pub preview: bool,
}

impl<'a> Candidate<'a> {
    pub fn new(state: &'a FeatureState, segment_priority: Option<i32>) -> Self {
        Candidate {
            state,
            segment_priority,
            preview: false,
        }
    }

    /// Marks the candidate as a previewed draft, which outranks every live state of its
    /// override.
    pub fn as_preview(mut self) -> Self {
        self.preview = true;
        self
    }
}

// Variant order is precedence order: later variants outrank earlier ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum OverrideRank {
    Environment,
    // A lower priority number is a higher rank.
    Segment(Reverse<i32>),
    Identity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Liveness {
    NotLive,
    Live {
        live_from: DateTime<Utc>,
        version: Version,
        preview: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PriorityKey {
    rank: OverrideRank,
    liveness: Liveness,
}

/// Orders candidate feature states of the same feature and environment.
///
/// Identity overrides outrank segment overrides, which outrank the environment default;
/// segment overrides are ranked by their feature segment's priority. Between states of the same
/// override, a live state beats a non-live one, then the later `live_from` wins, then the higher
/// version. A previewed draft breaks any remaining tie. Non-live states never outrank each
/// other.
#[derive(Clone, Copy, Debug)]
pub struct PriorityComparator {
    now: DateTime<Utc>,
    compare_versions: bool,
}

impl PriorityComparator {
    pub fn new(now: DateTime<Utc>) -> Self {
        PriorityComparator {
            now,
            compare_versions: true,
        }
    }

    pub fn for_environment(environment: &Environment, now: DateTime<Utc>) -> Self {
        PriorityComparator {
            now,
            compare_versions: !environment.use_v2_feature_versioning,
        }
    }

    /// Compares two candidates; `Ordering::Greater` means `a` wins.
    ///
    /// Fails on inputs that can only come from a corrupted snapshot: states of different
    /// features or environments, overrides of two different identities, two feature segments
    /// sharing a priority, and two live states of the same override that cannot be told apart.
    pub fn compare(&self, a: &Candidate, b: &Candidate) -> Result<Ordering, Error> {
        let (sa, sb) = (a.state, b.state);
        if sa.feature != sb.feature || sa.environment != sb.environment {
            return Err(Error::FeatureStateMismatch {
                left: sa.id,
                right: sb.id,
            });
        }

        match (sa.target, sb.target) {
            (OverrideTarget::Identity(x), OverrideTarget::Identity(y)) if x != y => {
                return Err(Error::IdentityMismatch {
                    left: sa.id,
                    right: sb.id,
                });
            }
            (OverrideTarget::Segment(x), OverrideTarget::Segment(y))
                if x != y && a.segment_priority == b.segment_priority =>
            {
                return Err(Error::DuplicateSegmentPriority {
                    feature: sa.feature,
                    priority: a.segment_priority.unwrap_or(i32::MAX),
                });
            }
            _ => (),
        }

        let (ka, kb) = (self.key(a), self.key(b));
        let ordering = ka.cmp(&kb);
        if ordering == Ordering::Equal && sa.id != sb.id && ka.liveness != Liveness::NotLive {
            return Err(Error::DuplicateLiveFeatureState {
                feature: sa.feature,
                left: sa.id,
                right: sb.id,
            });
        }
        Ok(ordering)
    }

    /// Whether `challenger` should replace `current` as the winner.
    pub fn wins(&self, challenger: &Candidate, current: &Candidate) -> Result<bool, Error> {
        Ok(self.compare(challenger, current)? == Ordering::Greater)
    }

    fn key(&self, candidate: &Candidate) -> PriorityKey {
        let state = candidate.state;
        let rank = match state.target {
            OverrideTarget::Environment => OverrideRank::Environment,
            OverrideTarget::Segment(_) => {
                OverrideRank::Segment(Reverse(candidate.segment_priority.unwrap_or(i32::MAX)))
            }
            OverrideTarget::Identity(_) => OverrideRank::Identity,
        };
        let liveness = match (state.version, state.live_from) {
            (Some(version), Some(live_from)) if live_from <= self.now => Liveness::Live {
                live_from,
                version: if self.compare_versions { version } else { 0 },
                preview: candidate.preview,
            },
            _ => Liveness::NotLive,
        };
        PriorityKey { rank, liveness }
    }
}
