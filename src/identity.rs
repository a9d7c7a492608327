use log::debug;
use serde::{Deserialize, Serialize};

use crate::environment::{Environment, Organisation};
use crate::eval::Error;
use crate::hashing::IdentityHashKey;
use crate::value::TypedValue;

pub type IdentityId = u64;

/// A typed fact about an identity.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Trait {
    pub trait_key: String,
    pub trait_value: TypedValue,
}

impl Trait {
    pub fn new(trait_key: &str, trait_value: TypedValue) -> Self {
        Trait {
            trait_key: trait_key.to_string(),
            trait_value,
        }
    }
}

/// A requested change to one trait. A `None` value deletes the trait.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TraitUpdate {
    pub trait_key: String,
    pub trait_value: Option<TypedValue>,
}

/// An end-user within an environment.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Identity {
    #[serde(default)]
    pub id: Option<IdentityId>,
    pub identifier: String,
    #[serde(default)]
    pub traits: Vec<Trait>,
}

impl Identity {
    pub fn new(identifier: &str) -> Self {
        Identity {
            id: None,
            identifier: identifier.to_string(),
            traits: vec![],
        }
    }

    pub fn with_id(mut self, id: IdentityId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_traits(mut self, traits: Vec<Trait>) -> Self {
        self.traits = traits;
        self
    }

    pub fn composite_key(&self, environment_api_key: &str) -> IdentityHashKey {
        IdentityHashKey::composite(environment_api_key, &self.identifier)
    }

    /// The key this identity is bucketed by in `environment`.
    ///
    /// Environments that do not use composite keys bucket by the numeric id. An identity
    /// that has no id yet falls back to the composite key.
    pub fn hash_key(&self, environment: &Environment) -> IdentityHashKey {
        self.hash_key_for(
            &environment.api_key,
            environment.use_identity_composite_key_for_hashing,
        )
    }

    pub(crate) fn hash_key_for(
        &self,
        environment_api_key: &str,
        use_composite_key: bool,
    ) -> IdentityHashKey {
        if use_composite_key {
            return self.composite_key(environment_api_key);
        }
        match self.id {
            Some(id) => IdentityHashKey::numeric(id),
            None => {
                debug!(
                    "identity {} has no id, bucketing by composite key",
                    self.identifier
                );
                self.composite_key(environment_api_key)
            }
        }
    }

    /// Applies trait writes to the persisted trait set.
    ///
    /// Writes are rejected as a whole when the organisation does not persist trait data;
    /// callers that still want to evaluate with those traits pass them transiently instead.
    pub fn update_traits(
        &mut self,
        organisation: &Organisation,
        updates: &[TraitUpdate],
    ) -> Result<(), Error> {
        if !organisation.persist_trait_data {
            return Err(Error::TraitPersistenceDisabled {
                organisation: organisation.id,
            });
        }

        for update in updates {
            let existing = self
                .traits
                .iter()
                .position(|t| t.trait_key == update.trait_key);
            match (&update.trait_value, existing) {
                (Some(value), Some(index)) => self.traits[index].trait_value = value.clone(),
                (Some(value), None) => self
                    .traits
                    .push(Trait::new(&update.trait_key, value.clone())),
                (None, Some(index)) => {
                    self.traits.remove(index);
                }
                (None, None) => (),
            }
        }
        Ok(())
    }
}

/// Overlays trait updates on a trait set without persisting anything.
pub fn transient_traits(traits: &[Trait], updates: &[TraitUpdate]) -> Vec<Trait> {
    let mut merged: Vec<Trait> = traits
        .iter()
        .filter(|t| !updates.iter().any(|u| u.trait_key == t.trait_key))
        .cloned()
        .collect();
    merged.extend(updates.iter().filter_map(|u| {
        u.trait_value
            .as_ref()
            .map(|value| Trait::new(&u.trait_key, value.clone()))
    }));
    merged
}
