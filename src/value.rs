use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::util::{f64_to_i64_safe, parse_bool};

/// The discriminant of a [TypedValue], as stored alongside feature state and trait values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int,
    Unicode,
    Bool,
    Float,
}

/// A typed value held by a feature state, a multivariate option or a trait.
///
/// Only one variant can ever be populated, so the "exactly one typed field holds the value"
/// rule of the stored representation is carried by the type itself.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for TypedValue {
    fn from(b: bool) -> TypedValue {
        TypedValue::Bool(b)
    }
}

impl From<String> for TypedValue {
    fn from(s: String) -> TypedValue {
        TypedValue::Str(s)
    }
}

impl From<&str> for TypedValue {
    fn from(s: &str) -> TypedValue {
        TypedValue::Str(s.to_owned())
    }
}

impl From<f64> for TypedValue {
    fn from(f: f64) -> TypedValue {
        TypedValue::Float(f)
    }
}

impl From<i64> for TypedValue {
    fn from(i: i64) -> TypedValue {
        TypedValue::Int(i)
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Bool(b) => write!(f, "{}", b),
            TypedValue::Int(i) => write!(f, "{}", i),
            // Whole floats keep their fraction so they never read as integers.
            TypedValue::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 => {
                write!(f, "{}.0", v)
            }
            TypedValue::Float(v) => write!(f, "{}", v),
            TypedValue::Str(s) => f.write_str(s),
        }
    }
}

impl TypedValue {
    /// Infers the type of a raw string the way feature initial values are stored: integers
    /// first, then booleans, otherwise the string itself.
    pub fn infer(raw: &str) -> TypedValue {
        if let Ok(i) = raw.parse::<i64>() {
            return TypedValue::Int(i);
        }
        match parse_bool(raw) {
            Some(b) => TypedValue::Bool(b),
            None => TypedValue::Str(raw.to_owned()),
        }
    }

    /// Parses `raw` as the given type. Returns None if the string does not hold that type.
    pub fn parse_as(value_type: ValueType, raw: &str) -> Option<TypedValue> {
        match value_type {
            ValueType::Int => raw.parse().ok().map(TypedValue::Int),
            ValueType::Float => raw.parse().ok().map(TypedValue::Float),
            ValueType::Bool => parse_bool(raw).map(TypedValue::Bool),
            ValueType::Unicode => Some(TypedValue::Str(raw.to_owned())),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            TypedValue::Bool(_) => ValueType::Bool,
            TypedValue::Int(_) => ValueType::Int,
            TypedValue::Float(_) => ValueType::Float,
            TypedValue::Str(_) => ValueType::Unicode,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Bool(b) => Some(*b),
            _ => {
                warn!("value type is not bool but {:?}", self);
                None
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            TypedValue::Int(i) => Some(*i),
            TypedValue::Float(f) => f64_to_i64_safe(*f),
            _ => None,
        }
    }

    /// Reads the value as a number, parsing strings. Non-finite parses are rejected.
    pub(crate) fn to_number(&self) -> Option<f64> {
        match self {
            TypedValue::Int(i) => Some(*i as f64),
            TypedValue::Float(f) => Some(*f),
            TypedValue::Str(s) => parse_number(s),
            TypedValue::Bool(_) => None,
        }
    }

    /// Reads the value as a boolean, parsing `true`/`false` strings.
    pub(crate) fn to_boolean(&self) -> Option<bool> {
        match self {
            TypedValue::Bool(b) => Some(*b),
            TypedValue::Str(s) => parse_bool(s),
            _ => None,
        }
    }
}

pub(crate) fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test_case("10", TypedValue::Int(10))]
    #[test_case("-3", TypedValue::Int(-3))]
    #[test_case("true", TypedValue::Bool(true))]
    #[test_case("False", TypedValue::Bool(false))]
    #[test_case("1.5", TypedValue::Str("1.5".into()))]
    #[test_case("initial-value", TypedValue::Str("initial-value".into()))]
    fn infers_initial_value_type(raw: &str, expected: TypedValue) {
        assert_eq!(TypedValue::infer(raw), expected);
    }

    #[test]
    fn parse_as_respects_discriminant() {
        assert_that!(TypedValue::parse_as(ValueType::Float, "1.5"))
            .contains_value(TypedValue::Float(1.5));
        assert_that!(TypedValue::parse_as(ValueType::Int, "1.5")).is_none();
        assert_that!(TypedValue::parse_as(ValueType::Unicode, "10"))
            .contains_value(TypedValue::Str("10".into()));
        assert_that!(TypedValue::parse_as(ValueType::Bool, "yes")).is_none();
    }

    #[test]
    fn deserializes_untagged_json() {
        fn test_case(json: &str, expected: TypedValue) {
            assert_eq!(serde_json::from_str::<TypedValue>(json).unwrap(), expected);
        }

        test_case("true", TypedValue::Bool(true));
        test_case("10", TypedValue::Int(10));
        test_case("1.5", TypedValue::Float(1.5));
        test_case("\"10\"", TypedValue::Str("10".into()));
    }

    #[test]
    fn numeric_and_boolean_views() {
        assert_that!(TypedValue::Str(" 42 ".into()).to_number()).contains_value(42.0);
        assert_that!(TypedValue::Str("NaN".into()).to_number()).is_none();
        assert_that!(TypedValue::Bool(true).to_number()).is_none();
        assert_that!(TypedValue::Str("TRUE".into()).to_boolean()).contains_value(true);
        assert_that!(TypedValue::Int(1).to_boolean()).is_none();
        assert_that!(TypedValue::Float(2.0).as_int()).contains_value(2);
    }

    #[test]
    fn value_type_and_display() {
        assert_eq!(TypedValue::Int(7).value_type(), ValueType::Int);
        assert_eq!(TypedValue::from("x").value_type(), ValueType::Unicode);
        assert_eq!(TypedValue::Bool(false).to_string(), "false");
        assert_eq!(TypedValue::Int(7).to_string(), "7");
        assert_eq!(TypedValue::Float(1.0).to_string(), "1.0");
        assert_eq!(TypedValue::Float(-3.0).to_string(), "-3.0");
        assert_eq!(TypedValue::Float(1.5).to_string(), "1.5");
        assert_eq!(
            serde_json::to_string(&ValueType::Unicode).unwrap(),
            "\"unicode\""
        );
    }
}
