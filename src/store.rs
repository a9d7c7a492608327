use std::collections::HashMap;

use crate::environment::EnvironmentDocument;
use crate::identity::{Identity, Trait};

/// SnapshotProvider is an interface for whatever holds the environment documents the resolver
/// reads from.
///
/// Implementations may be backed by a relational store, an in-process cache or a replicated
/// document store; the resolver only ever sees an immutable [EnvironmentDocument].
pub trait SnapshotProvider {
    /// Retrieve the document for the environment with API key `api_key`.
    fn document(&self, api_key: &str) -> Option<&EnvironmentDocument>;
}

/// TraitProvider supplies an identity's persisted traits when the caller does not pass an
/// explicit trait list.
pub trait TraitProvider {
    /// Retrieve the persisted traits of `identity`, or None if the identity is unknown.
    fn traits(&self, identity: &Identity) -> Option<&[Trait]>;
}

impl SnapshotProvider for HashMap<String, EnvironmentDocument> {
    fn document(&self, api_key: &str) -> Option<&EnvironmentDocument> {
        self.get(api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::TestDocument;
    use maplit::hashmap;

    #[test]
    fn documents_are_looked_up_by_api_key() {
        let documents = hashmap! {
            "test-env-key".to_string() => TestDocument::remote_config().build(),
        };

        let document = documents.document("test-env-key").expect("known key");
        assert_eq!(document.environment().id, 1);
        assert!(documents.document("other-key").is_none());
    }
}
