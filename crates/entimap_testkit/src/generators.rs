//! Property-based test generators using proptest.
//!
//! Provides strategies for generating schema names and attribute values
//! that stay inside the mapper's validity rules, plus a few that lean on
//! the nasty edges (backslashes, shared prefixes) on purpose.

use entimap_core::{AttrKind, AttrValue};
use proptest::prelude::*;

/// Strategy for generating valid model and attribute names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("valid regex")
}

/// Strategy for generating text values, including backslashes and
/// punctuation that the index member encoding must escape around.
pub fn text_value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ -~]{0,24}").expect("valid regex")
}

/// Strategy for generating short lowercase words.
pub fn word_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}").expect("valid regex")
}

/// Strategy for generating word-indexable sentences of 1 to 5 words.
pub fn sentence_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(word_strategy(), 1..=5).prop_map(|words| words.join(" "))
}

/// Strategy for generating integers whose float score is exact.
pub fn int_value_strategy() -> impl Strategy<Value = i64> {
    -1_000_000i64..1_000_000
}

/// Strategy for generating finite, orderable scores.
pub fn score_strategy() -> impl Strategy<Value = f64> {
    -1.0e9..1.0e9
}

/// Strategy for generating a value of the given kind.
///
/// Covers the kinds the query planner scores and scans; temporal and
/// JSON kinds are exercised by dedicated unit tests instead.
pub fn attr_value_strategy(kind: AttrKind) -> BoxedStrategy<AttrValue> {
    match kind {
        AttrKind::Int => int_value_strategy().prop_map(AttrValue::Int).boxed(),
        AttrKind::Float => score_strategy().prop_map(AttrValue::Float).boxed(),
        AttrKind::Bool => any::<bool>().prop_map(AttrValue::Bool).boxed(),
        _ => text_value_strategy().prop_map(AttrValue::Text).boxed(),
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
