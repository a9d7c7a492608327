use serde::{Deserialize, Serialize};

use crate::condition::{Condition, EvaluationContext};
use crate::hashing::IdentityHashKey;
use crate::identity::Trait;

pub type SegmentId = u64;

/// A named, project-scoped rule tree deciding which identities belong to it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Segment {
    pub id: SegmentId,
    pub name: String,
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    All,
    Any,
    None,
}

/// A node of a segment's rule tree: leaf conditions plus nested rules.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SegmentRule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Segment {
    /// Top-level rules are implicitly ANDed.
    pub fn matches(&self, traits: &[Trait], identity_hash_key: &IdentityHashKey) -> bool {
        let context = EvaluationContext {
            segment_id: self.id,
            identity_hash_key,
        };
        self.rules.iter().all(|rule| rule.matches(traits, &context))
    }

    /// Total number of conditions across the whole tree.
    pub fn condition_count(&self) -> usize {
        self.rules.iter().map(SegmentRule::condition_count).sum()
    }
}

impl SegmentRule {
    pub fn new(rule_type: RuleType) -> Self {
        SegmentRule {
            rule_type,
            rules: vec![],
            conditions: vec![],
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_rule(mut self, rule: SegmentRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn matches(&self, traits: &[Trait], context: &EvaluationContext) -> bool {
        let mut children = self
            .conditions
            .iter()
            .map(|condition| condition.matches(traits, context))
            .chain(self.rules.iter().map(|rule| rule.matches(traits, context)));

        match self.rule_type {
            RuleType::All => children.all(|matched| matched),
            RuleType::Any => children.any(|matched| matched),
            RuleType::None => !children.any(|matched| matched),
        }
    }

    fn condition_count(&self) -> usize {
        self.conditions.len()
            + self
                .rules
                .iter()
                .map(SegmentRule::condition_count)
                .sum::<usize>()
    }
}

/// Returns the segments `traits` place the identity in, in id order.
pub fn matching_segments<'a, I>(
    segments: I,
    traits: &[Trait],
    identity_hash_key: &IdentityHashKey,
) -> Vec<&'a Segment>
where
    I: IntoIterator<Item = &'a Segment>,
{
    let mut matched: Vec<&Segment> = segments
        .into_iter()
        .filter(|segment| segment.matches(traits, identity_hash_key))
        .collect();
    matched.sort_by_key(|segment| segment.id);
    matched
}
