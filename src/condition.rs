use std::cmp::Ordering;

use lazy_static::lazy_static;
use log::{error, warn};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::hashing::{self, IdentityHashKey};
use crate::identity::Trait;
use crate::segment::SegmentId;
use crate::value::{parse_number, TypedValue};

const SEMVER_SUFFIX: &str = ":semver";
const MODULO_SEPARATOR: char = '|';
const IN_SEPARATOR: char = ',';

lazy_static! {
    static ref VERSION_NUMERIC_COMPONENTS_REGEX: Regex =
        Regex::new(r"^\d+(\.\d+)?(\.\d+)?").unwrap();
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanInclusive,
    LessThan,
    LessThanInclusive,
    Contains,
    NotContains,
    Regex,
    IsSet,
    IsNotSet,
    PercentageSplit,
    Modulo,
    In,
    #[serde(other)]
    Unknown,
}

/// A leaf predicate of a segment rule.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Condition {
    pub operator: Operator,
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default, deserialize_with = "deserialize_literal")]
    pub value: Option<String>,
}

/// What a condition needs to know about the evaluation besides the traits.
#[derive(Clone, Copy, Debug)]
pub struct EvaluationContext<'a> {
    pub segment_id: SegmentId,
    pub identity_hash_key: &'a IdentityHashKey,
}

// Literals are stored as strings, but documents written by hand often carry bare numbers or
// booleans.
fn deserialize_literal<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<TypedValue>::deserialize(deserializer).map(|v| v.map(|v| v.to_string()))
}

impl Condition {
    pub fn new(operator: Operator, property: &str, value: &str) -> Self {
        Condition {
            operator,
            property: Some(property.to_string()),
            value: Some(value.to_string()),
        }
    }

    pub fn percentage_split(percentage: f64) -> Self {
        Condition {
            operator: Operator::PercentageSplit,
            property: None,
            value: Some(percentage.to_string()),
        }
    }

    pub fn matches(&self, traits: &[Trait], context: &EvaluationContext) -> bool {
        match self.operator {
            Operator::PercentageSplit => self.matches_percentage_split(context),
            Operator::IsSet => self.find_trait(traits).is_some(),
            Operator::IsNotSet => self.find_trait(traits).is_none(),
            Operator::Unknown => {
                warn!("unknown operator on condition for {:?}", self.property);
                false
            }
            op => match self.find_trait(traits) {
                Some(t) => op.matches(&t.trait_value, self.literal()),
                None => false,
            },
        }
    }

    fn literal(&self) -> &str {
        self.value.as_deref().unwrap_or_default()
    }

    fn find_trait<'t>(&self, traits: &'t [Trait]) -> Option<&'t Trait> {
        let property = self.property.as_deref()?;
        traits.iter().find(|t| t.trait_key == property)
    }

    fn matches_percentage_split(&self, context: &EvaluationContext) -> bool {
        match parse_number(self.literal()) {
            Some(threshold) => {
                hashing::percentage_for(context.segment_id, context.identity_hash_key) < threshold
            }
            None => false,
        }
    }
}

/// The shapes a trait value and a condition literal are compared in.
#[derive(Debug, PartialEq)]
enum Comparable<'a> {
    Numbers(f64, f64),
    Bools(bool, bool),
    Strings(String, &'a str),
}

fn coerce<'a>(lhs: &TypedValue, rhs: &'a str) -> Comparable<'a> {
    if let (Some(l), Some(r)) = (lhs.to_number(), parse_number(rhs)) {
        return Comparable::Numbers(l, r);
    }
    if let (Some(l), Some(r)) = (lhs.to_boolean(), TypedValue::from(rhs).to_boolean()) {
        return Comparable::Bools(l, r);
    }
    Comparable::Strings(lhs.to_string(), rhs)
}

impl Operator {
    fn matches(&self, lhs: &TypedValue, rhs: &str) -> bool {
        match self {
            Operator::Contains => lhs.to_string().contains(rhs),
            Operator::NotContains => !lhs.to_string().contains(rhs),
            Operator::Regex => regex_op(lhs, rhs),
            Operator::Modulo => modulo_op(lhs, rhs),
            Operator::In => {
                let l = lhs.to_string();
                rhs.split(IN_SEPARATOR).any(|candidate| candidate == l)
            }

            Operator::Equal
            | Operator::NotEqual
            | Operator::GreaterThan
            | Operator::GreaterThanInclusive
            | Operator::LessThan
            | Operator::LessThanInclusive => match rhs.strip_suffix(SEMVER_SUFFIX) {
                Some(version) => semver_op(self, lhs, version),
                None => self.compare(lhs, rhs),
            },

            Operator::IsSet | Operator::IsNotSet | Operator::PercentageSplit | Operator::Unknown => {
                error!("{:?} operator should be special-cased, shouldn't get here", self);
                false
            }
        }
    }

    fn compare(&self, lhs: &TypedValue, rhs: &str) -> bool {
        match coerce(lhs, rhs) {
            Comparable::Numbers(l, r) => self.accepts(l.partial_cmp(&r)),
            Comparable::Bools(l, r) => self.accepts(Some(l.cmp(&r))),
            Comparable::Strings(l, r) => self.accepts(Some(l.as_str().cmp(r))),
        }
    }

    fn accepts(&self, ordering: Option<Ordering>) -> bool {
        let ordering = match ordering {
            Some(o) => o,
            None => return false,
        };
        match self {
            Operator::Equal => ordering == Ordering::Equal,
            Operator::NotEqual => ordering != Ordering::Equal,
            Operator::GreaterThan => ordering == Ordering::Greater,
            Operator::GreaterThanInclusive => ordering != Ordering::Less,
            Operator::LessThan => ordering == Ordering::Less,
            Operator::LessThanInclusive => ordering != Ordering::Greater,
            _ => false,
        }
    }
}

fn regex_op(lhs: &TypedValue, pattern: &str) -> bool {
    // Patterns match from the start of the value, not anywhere within it.
    match Regex::new(&format!("^(?:{})", pattern)) {
        Ok(re) => re.is_match(&lhs.to_string()),
        Err(e) => {
            warn!("Invalid regex for 'REGEX' operator ({}): {}", e, pattern);
            false
        }
    }
}

fn modulo_op(lhs: &TypedValue, rhs: &str) -> bool {
    let (divisor, remainder) = match rhs.split_once(MODULO_SEPARATOR) {
        Some((d, r)) => match (parse_number(d), parse_number(r)) {
            (Some(d), Some(r)) => (d, r),
            _ => return false,
        },
        None => return false,
    };
    if divisor == 0.0 {
        return false;
    }
    match lhs.to_number() {
        Some(l) => floored_rem(l, divisor) == remainder,
        None => false,
    }
}

/// Remainder taking the sign of the divisor, so `-3 % 5 == 2`.
fn floored_rem(l: f64, divisor: f64) -> f64 {
    let m = l % divisor;
    if m != 0.0 && (m < 0.0) != (divisor < 0.0) {
        m + divisor
    } else {
        m
    }
}

fn semver_op(op: &Operator, lhs: &TypedValue, rhs: &str) -> bool {
    match (parse_semver(&lhs.to_string()), parse_semver(rhs)) {
        (Some(l), Some(r)) => op.accepts(Some(l.cmp(&r))),
        _ => false,
    }
}

fn parse_semver(version_str: &str) -> Option<semver::Version> {
    semver::Version::parse(version_str)
        .ok()
        .or_else(|| parse_semver_loose(version_str))
        .map(|mut version| {
            version.build = semver::BuildMetadata::EMPTY;
            version
        })
}

fn parse_semver_loose(version_str: &str) -> Option<semver::Version> {
    let parts = VERSION_NUMERIC_COMPONENTS_REGEX.captures(version_str)?;

    let numeric_parts = parts.get(0)?;
    let mut transformed_version_str = numeric_parts.as_str().to_string();

    for i in 1..parts.len() {
        if parts.get(i).is_none() {
            transformed_version_str.push_str(".0");
        }
    }

    let rest = &version_str[numeric_parts.end()..];
    transformed_version_str.push_str(rest);

    semver::Version::parse(&transformed_version_str).ok()
}
