//! The percentage hash shared by percentage-split conditions and multivariate allocation.
//!
//! Client SDKs and previously deployed servers bucket identities with exactly this algorithm,
//! so any change to it silently moves real users between buckets.

use std::fmt::Write;

/// Divisor applied to the digest. Results land on the grid `0/9998 ..= 9998/9998`.
const HASH_MODULUS: u128 = 9999;
pub(crate) const HASH_SCALE: f64 = 9998.0;

/// Returns a float in `[0, 1)` derived from the given ids.
///
/// The ids are joined with `,`, hashed with MD5, and the 128-bit digest (read big-endian)
/// is reduced modulo 9999 and scaled by 1/9998. A result of exactly 1 is not allowed: in that
/// case the whole id list is repeated once more and hashed again.
pub fn hashed_percentage_for_object_ids(object_ids: &[&str]) -> f64 {
    let mut iterations = 1;
    loop {
        let value = hash_once(object_ids, iterations);
        if value < 1.0 {
            return value;
        }
        iterations += 1;
    }
}

fn hash_once(object_ids: &[&str], iterations: usize) -> f64 {
    let mut to_hash = String::new();
    for (i, id) in object_ids.iter().cycle().take(object_ids.len() * iterations).enumerate() {
        if i > 0 {
            to_hash.push(',');
        }
        to_hash.push_str(id);
    }

    let digest = md5::compute(to_hash.as_bytes());
    let numhash = u128::from_be_bytes(digest.0);

    (numhash % HASH_MODULUS) as f64 / HASH_SCALE
}

/// The key an identity is bucketed by.
///
/// Environments created before composite keys existed bucket by the numeric identity id;
/// everything else uses `"{environment_api_key}_{identifier}"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityHashKey(String);

impl IdentityHashKey {
    pub fn composite(environment_api_key: &str, identifier: &str) -> Self {
        let mut key = String::with_capacity(environment_api_key.len() + identifier.len() + 1);
        let _ = write!(key, "{}_{}", environment_api_key, identifier);
        IdentityHashKey(key)
    }

    pub fn numeric(identity_id: u64) -> Self {
        IdentityHashKey(identity_id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Percentage in `[0, 100)` for an object id and an identity.
pub(crate) fn percentage_for(object_id: u64, hash_key: &IdentityHashKey) -> f64 {
    let object_id = object_id.to_string();
    hashed_percentage_for_object_ids(&[&object_id, hash_key.as_str()]) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    // Reference values produced by the deployed implementation.
    #[test_case(&["1", "test-env-key_test_identity"], 0.5191038207641528)]
    #[test_case(&["2", "test-env-key_test_identity"], 0.3852770554110822)]
    #[test_case(&["10", "12"], 0.8359671934386878)]
    #[test_case(&["1", "2"], 0.2659531906381276)]
    #[test_case(&["12", "13"], 0.1284256851370274)]
    fn matches_reference_buckets(ids: &[&str], expected: f64) {
        assert_eq!(hashed_percentage_for_object_ids(ids), expected);
    }

    #[test]
    fn rehashes_when_value_would_be_one() {
        // "812" reduces to 9998 on the first pass, "812,812" is hashed instead.
        assert_eq!(hash_once(&["812"], 1), 1.0);
        assert_eq!(hashed_percentage_for_object_ids(&["812"]), 0.16973394678935788);
    }

    #[test]
    fn id_list_is_repeated_as_a_whole() {
        assert_eq!(hash_once(&["1", "2"], 2), hash_once(&["1", "2", "1", "2"], 1));
    }

    #[test]
    fn identity_hash_keys() {
        assert_eq!(
            IdentityHashKey::composite("test-env-key", "test_identity").as_str(),
            "test-env-key_test_identity"
        );
        assert_eq!(IdentityHashKey::numeric(12).as_str(), "12");
    }

    #[test]
    fn percentage_is_scaled_to_hundred() {
        let key = IdentityHashKey::numeric(12);
        assert_eq!(percentage_for(10, &key), 0.8359671934386878 * 100.0);
    }

    proptest! {
        #[test]
        fn always_in_unit_interval(a in "[a-z0-9_-]{0,20}", b in 0u64..1_000_000) {
            let b = b.to_string();
            let value = hashed_percentage_for_object_ids(&[&a, &b]);
            prop_assert!((0.0..1.0).contains(&value));
        }
    }
}
