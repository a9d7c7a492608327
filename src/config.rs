use serde::{Deserialize, Serialize};

const DEFAULT_SEGMENT_RULES_CONDITIONS_LIMIT: usize = 100;

/// Engine-wide settings applied when an environment document is loaded.
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of conditions across a single segment's whole rule tree.
    pub segment_rules_conditions_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            segment_rules_conditions_limit: DEFAULT_SEGMENT_RULES_CONDITIONS_LIMIT,
        }
    }
}
