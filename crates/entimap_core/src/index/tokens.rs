//! Word splitting for full-text indexes.

use std::collections::BTreeSet;

use crate::config::TokenizerConfig;

/// Splits text into the set of words to index or match.
///
/// Words are maximal alphanumeric runs. The same splitter runs on both
/// the write path and the query path, so a stored value and a search
/// term always agree on word boundaries.
pub(crate) fn tokenize(config: &TokenizerConfig, text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty() && word.chars().count() >= config.min_word_len)
        .map(|word| {
            if config.lowercase {
                word.to_lowercase()
            } else {
                word.to_string()
            }
        })
        .collect()
}
