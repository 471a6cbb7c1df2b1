//! Reading the index keyspace: one predicate in, candidate ids out.

use std::collections::HashSet;

use entimap_store::{LexRange, ScoreRange, StoreBackend};

use crate::config::DatabaseConfig;
use crate::error::{CoreError, CoreResult};
use crate::index::tokens::tokenize;
use crate::keys;
use crate::schema::ModelSchema;
use crate::value::{AttrKind, AttrValue};

/// One filter condition against an indexed attribute.
#[derive(Debug, Clone)]
pub(crate) enum Predicate {
    /// Exact value match.
    Equals { attribute: String, value: AttrValue },
    /// Inclusive score range; an open side is unbounded.
    Range {
        attribute: String,
        min: Option<AttrValue>,
        max: Option<AttrValue>,
    },
    /// Text starts with `prefix`.
    Prefix { attribute: String, prefix: String },
    /// Text ends with `suffix`.
    Suffix { attribute: String, suffix: String },
    /// Text contains `pattern` anywhere.
    Pattern { attribute: String, pattern: String },
    /// Indexed words contain every word of `text`.
    Words { attribute: String, text: String },
    /// Reference column holds `target_pk`.
    References { column: String, target_pk: u64 },
}

impl Predicate {
    /// The attribute or column the predicate filters on.
    pub fn attribute(&self) -> &str {
        match self {
            Self::Equals { attribute, .. }
            | Self::Range { attribute, .. }
            | Self::Prefix { attribute, .. }
            | Self::Suffix { attribute, .. }
            | Self::Pattern { attribute, .. }
            | Self::Words { attribute, .. } => attribute,
            Self::References { column, .. } => column,
        }
    }
}

/// Read-only view over one model's index keys.
///
/// `validate` rejects a predicate the schema cannot answer, `estimate`
/// prices it from index cardinalities, and `resolve` produces matching
/// ids in the index's natural order. The planner validates everything
/// first, then resolves cheapest-first.
pub(crate) struct IndexReader<'a> {
    store: &'a dyn StoreBackend,
    schema: &'a ModelSchema,
    config: &'a DatabaseConfig,
}

impl<'a> IndexReader<'a> {
    pub fn new(
        store: &'a dyn StoreBackend,
        schema: &'a ModelSchema,
        config: &'a DatabaseConfig,
    ) -> Self {
        Self {
            store,
            schema,
            config,
        }
    }

    /// Checks that the schema can answer the predicate at all.
    pub fn validate(&self, predicate: &Predicate) -> CoreResult<()> {
        let model = self.schema.name();
        match predicate {
            Predicate::Equals { attribute, value } => {
                if self.schema.foreign_key_def(attribute).is_some() {
                    return Err(CoreError::query_usage(format!(
                        "reference column '{attribute}' filters by a referenced id"
                    )));
                }
                let def = self.attr(attribute)?;
                if value.kind() != def.kind() {
                    return Err(CoreError::invalid_value(
                        attribute,
                        format!("expected {}, got {}", def.kind().name(), value.kind().name()),
                    ));
                }
                let flags = def.flags();
                let answerable = flags.unique
                    || (flags.ordered && def.kind().is_scorable())
                    || (flags.prefix && def.kind() == AttrKind::Text);
                if !answerable {
                    return Err(CoreError::missing_index(
                        model,
                        attribute,
                        "equality-capable (unique, ordered, or prefix)",
                    ));
                }
            }
            Predicate::Range { attribute, min, max } => {
                let def = self.attr(attribute)?;
                if !def.flags().ordered {
                    return Err(CoreError::missing_index(model, attribute, "ordered"));
                }
                for bound in [min, max].into_iter().flatten() {
                    if bound.kind() != def.kind() {
                        return Err(CoreError::invalid_value(
                            attribute,
                            format!(
                                "range bound expected {}, got {}",
                                def.kind().name(),
                                bound.kind().name()
                            ),
                        ));
                    }
                }
            }
            Predicate::Prefix { attribute, prefix } => {
                let def = self.attr(attribute)?;
                if !def.flags().prefix {
                    return Err(CoreError::missing_index(model, attribute, "prefix"));
                }
                if prefix.is_empty() {
                    return Err(CoreError::query_usage("prefix match needs a non-empty prefix"));
                }
            }
            Predicate::Suffix { attribute, suffix } => {
                let def = self.attr(attribute)?;
                if !def.flags().suffix {
                    return Err(CoreError::missing_index(model, attribute, "suffix"));
                }
                if suffix.is_empty() {
                    return Err(CoreError::query_usage("suffix match needs a non-empty suffix"));
                }
            }
            Predicate::Pattern { attribute, pattern } => {
                let def = self.attr(attribute)?;
                if !def.flags().supports_pattern() {
                    return Err(CoreError::missing_index(model, attribute, "prefix+suffix"));
                }
                if pattern.is_empty() {
                    return Err(CoreError::query_usage("pattern match needs a non-empty pattern"));
                }
            }
            Predicate::Words { attribute, text } => {
                let def = self.attr(attribute)?;
                if !def.flags().words {
                    return Err(CoreError::missing_index(model, attribute, "word"));
                }
                if tokenize(&self.config.tokenizer, text).is_empty() {
                    return Err(CoreError::query_usage(
                        "word search needs at least one indexable word",
                    ));
                }
            }
            Predicate::References { column, .. } => {
                if self.schema.foreign_key_def(column).is_none() {
                    if self.schema.attribute_def(column).is_some() {
                        return Err(CoreError::query_usage(format!(
                            "'{column}' is not a reference column on model '{model}'"
                        )));
                    }
                    return Err(CoreError::unknown_attribute(model, column));
                }
            }
        }
        Ok(())
    }

    /// Prices a predicate by how many ids resolving it would touch.
    pub fn estimate(&self, predicate: &Predicate) -> CoreResult<u64> {
        let model = self.schema.name();
        match predicate {
            Predicate::Equals { attribute, value } => {
                let def = self.attr(attribute)?;
                let flags = def.flags();
                if flags.unique {
                    return Ok(1);
                }
                if flags.ordered {
                    if let Some(score) = value.score() {
                        let key = keys::ordered_key(model, attribute);
                        return Ok(self.store.zcount(&key, &ScoreRange::exact(score))?);
                    }
                }
                let key = keys::prefix_key(model, attribute);
                let range = equality_lex_range(value);
                Ok(self.store.zlexcount(&key, &range)?)
            }
            Predicate::Range { attribute, min, max } => {
                let key = keys::ordered_key(model, attribute);
                let range = score_range(attribute, min.as_ref(), max.as_ref())?;
                Ok(self.store.zcount(&key, &range)?)
            }
            Predicate::Prefix { attribute, prefix } => {
                let key = keys::prefix_key(model, attribute);
                Ok(self
                    .store
                    .zlexcount(&key, &LexRange::prefix(keys::escape(prefix)))?)
            }
            Predicate::Suffix { attribute, suffix } => {
                let key = keys::suffix_key(model, attribute);
                let reversed = keys::reverse_text(suffix);
                Ok(self
                    .store
                    .zlexcount(&key, &LexRange::prefix(keys::escape(&reversed)))?)
            }
            Predicate::Pattern { attribute, .. } => {
                Ok(self.store.zcard(&keys::prefix_key(model, attribute))?)
            }
            Predicate::Words { attribute, text } => {
                let mut cheapest = u64::MAX;
                for word in tokenize(&self.config.tokenizer, text) {
                    let card = self.store.scard(&keys::word_key(model, attribute, &word))?;
                    cheapest = cheapest.min(card);
                }
                Ok(if cheapest == u64::MAX { 0 } else { cheapest })
            }
            Predicate::References { column, target_pk } => {
                let key = keys::ordered_key(model, column);
                #[allow(clippy::cast_precision_loss)]
                let score = *target_pk as f64;
                Ok(self.store.zcount(&key, &ScoreRange::exact(score))?)
            }
        }
    }

    /// Resolves a predicate to matching ids in index order.
    pub fn resolve(&self, predicate: &Predicate) -> CoreResult<Vec<u64>> {
        let model = self.schema.name();
        match predicate {
            Predicate::Equals { attribute, value } => {
                let def = self.attr(attribute)?;
                let flags = def.flags();
                if flags.unique {
                    let key = keys::unique_key(model, attribute);
                    return match self.store.hget(&key, &value.encode())? {
                        Some(holder) => Ok(vec![parse_pk(&holder)?]),
                        None => Ok(Vec::new()),
                    };
                }
                if flags.ordered {
                    if let Some(score) = value.score() {
                        let key = keys::ordered_key(model, attribute);
                        return self.collect_scored(&key, &ScoreRange::exact(score));
                    }
                }
                let key = keys::prefix_key(model, attribute);
                self.collect_lex(&key, &equality_lex_range(value))
            }
            Predicate::Range { attribute, min, max } => {
                let key = keys::ordered_key(model, attribute);
                let range = score_range(attribute, min.as_ref(), max.as_ref())?;
                self.collect_scored(&key, &range)
            }
            Predicate::Prefix { attribute, prefix } => {
                let key = keys::prefix_key(model, attribute);
                self.collect_lex(&key, &LexRange::prefix(keys::escape(prefix)))
            }
            Predicate::Suffix { attribute, suffix } => {
                let key = keys::suffix_key(model, attribute);
                let reversed = keys::reverse_text(suffix);
                self.collect_lex(&key, &LexRange::prefix(keys::escape(&reversed)))
            }
            Predicate::Pattern { attribute, pattern } => {
                // The prefix index holds every indexed value in full, so a
                // substring match is a verified scan of its members. The
                // suffix side must agree before an id qualifies, which
                // keeps half-written entries out of the result.
                let suffix_ids: HashSet<u64> = self
                    .collect_lex(&keys::suffix_key(model, attribute), &LexRange::all())?
                    .into_iter()
                    .collect();
                let members = self
                    .store
                    .zrange(&keys::prefix_key(model, attribute), 0, -1)?;
                let mut ids = Vec::new();
                for member in members {
                    let (value, pk) = split_member(&member)?;
                    if suffix_ids.contains(&pk) && value.contains(pattern) {
                        ids.push(pk);
                    }
                }
                Ok(ids)
            }
            Predicate::Words { attribute, text } => {
                let words = tokenize(&self.config.tokenizer, text);
                let word_keys: Vec<String> = words
                    .iter()
                    .map(|word| keys::word_key(model, attribute, word))
                    .collect();
                let refs: Vec<&str> = word_keys.iter().map(String::as_str).collect();
                let mut ids = Vec::with_capacity(refs.len());
                for member in self.store.sinter(&refs)? {
                    ids.push(parse_pk(&member)?);
                }
                ids.sort_unstable();
                Ok(ids)
            }
            Predicate::References { column, target_pk } => {
                let key = keys::ordered_key(model, column);
                #[allow(clippy::cast_precision_loss)]
                let score = *target_pk as f64;
                self.collect_scored(&key, &ScoreRange::exact(score))
            }
        }
    }

    fn attr(&self, attribute: &str) -> CoreResult<&crate::schema::AttributeDef> {
        self.schema
            .attribute_def(attribute)
            .ok_or_else(|| CoreError::unknown_attribute(self.schema.name(), attribute))
    }

    fn collect_scored(&self, key: &str, range: &ScoreRange) -> CoreResult<Vec<u64>> {
        let mut ids = Vec::new();
        for (member, _) in self.store.zrange_by_score(key, range)? {
            ids.push(parse_pk(&member)?);
        }
        Ok(ids)
    }

    fn collect_lex(&self, key: &str, range: &LexRange) -> CoreResult<Vec<u64>> {
        let mut ids = Vec::new();
        for member in self.store.zrange_by_lex(key, range)? {
            ids.push(split_member(&member)?.1);
        }
        Ok(ids)
    }
}

/// Equality against a lex index matches members whose value part is
/// exactly the encoded value, which in member form means the escaped
/// value followed by the separator.
fn equality_lex_range(value: &AttrValue) -> LexRange {
    LexRange::prefix(format!("{}\u{0}", keys::escape(&value.encode())))
}

fn score_range(
    attribute: &str,
    min: Option<&AttrValue>,
    max: Option<&AttrValue>,
) -> CoreResult<ScoreRange> {
    let low = min.map(|v| checked(attribute, v)).transpose()?;
    let high = max.map(|v| checked(attribute, v)).transpose()?;
    Ok(match (low, high) {
        (None, None) => ScoreRange::all(),
        (Some(low), None) => ScoreRange::at_least(low),
        (None, Some(high)) => ScoreRange::at_most(high),
        (Some(low), Some(high)) => ScoreRange::closed(low, high),
    })
}

fn checked(attribute: &str, value: &AttrValue) -> CoreResult<f64> {
    match value.score() {
        Some(score) if score.is_finite() => Ok(score),
        _ => Err(CoreError::invalid_value(
            attribute,
            format!("{} has no finite index order", value.kind().name()),
        )),
    }
}

fn parse_pk(raw: &str) -> CoreResult<u64> {
    raw.parse()
        .map_err(|_| CoreError::corrupt_index(format!("non-numeric id '{raw}' in index")))
}

fn split_member(member: &str) -> CoreResult<(String, u64)> {
    keys::split_lex_member(member)
        .ok_or_else(|| CoreError::corrupt_index(format!("malformed lex member '{member}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeDef;
    use entimap_store::InMemoryStore;

    fn schema() -> ModelSchema {
        ModelSchema::new("item")
            .attribute(AttributeDef::new("sku", AttrKind::Text).unique())
            .attribute(AttributeDef::new("price", AttrKind::Int).ordered())
            .attribute(
                AttributeDef::new("name", AttrKind::Text)
                    .prefix()
                    .suffix(),
            )
            .attribute(AttributeDef::new("tags", AttrKind::Text).words())
            .attribute(AttributeDef::new("note", AttrKind::Text))
            .foreign_key("vendor_id", "vendor")
    }

    fn seed_fruit(store: &InMemoryStore) {
        for (pk, name) in [(1u64, "apple"), (2, "apricot"), (3, "mango")] {
            store
                .zadd("item:name:pre", &keys::lex_member(name, pk), 0.0)
                .unwrap();
            store
                .zadd(
                    "item:name:suf",
                    &keys::lex_member(&keys::reverse_text(name), pk),
                    0.0,
                )
                .unwrap();
        }
    }

    fn reader_ids(store: &InMemoryStore, predicate: &Predicate) -> Vec<u64> {
        let schema = schema();
        let config = DatabaseConfig::new();
        let reader = IndexReader::new(store, &schema, &config);
        reader.validate(predicate).unwrap();
        reader.resolve(predicate).unwrap()
    }

    #[test]
    fn unique_equality_reads_the_marker() {
        let store = InMemoryStore::new();
        store.hset("item:sku:uidx", "A-100", "42").unwrap();

        let hit = Predicate::Equals {
            attribute: "sku".into(),
            value: "A-100".into(),
        };
        let miss = Predicate::Equals {
            attribute: "sku".into(),
            value: "A-999".into(),
        };
        assert_eq!(reader_ids(&store, &hit), vec![42]);
        assert_eq!(reader_ids(&store, &miss), Vec::<u64>::new());
    }

    #[test]
    fn ordered_equality_uses_exact_scores() {
        let store = InMemoryStore::new();
        store.zadd("item:price:idx", "1", 10.0).unwrap();
        store.zadd("item:price:idx", "2", 20.0).unwrap();
        store.zadd("item:price:idx", "3", 20.0).unwrap();

        let predicate = Predicate::Equals {
            attribute: "price".into(),
            value: AttrValue::Int(20),
        };
        assert_eq!(reader_ids(&store, &predicate), vec![2, 3]);
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let store = InMemoryStore::new();
        for (pk, price) in [(1, 10.0), (2, 20.0), (3, 30.0)] {
            store
                .zadd("item:price:idx", &pk.to_string(), price)
                .unwrap();
        }

        let predicate = Predicate::Range {
            attribute: "price".into(),
            min: Some(AttrValue::Int(15)),
            max: Some(AttrValue::Int(30)),
        };
        assert_eq!(reader_ids(&store, &predicate), vec![2, 3]);

        let open_end = Predicate::Range {
            attribute: "price".into(),
            min: Some(AttrValue::Int(20)),
            max: None,
        };
        assert_eq!(reader_ids(&store, &open_end), vec![2, 3]);
    }

    #[test]
    fn prefix_scan_matches_only_the_prefix() {
        let store = InMemoryStore::new();
        seed_fruit(&store);

        let predicate = Predicate::Prefix {
            attribute: "name".into(),
            prefix: "ap".into(),
        };
        assert_eq!(reader_ids(&store, &predicate), vec![1, 2]);

        let exact_value_is_matched = Predicate::Prefix {
            attribute: "name".into(),
            prefix: "apple".into(),
        };
        assert_eq!(reader_ids(&store, &exact_value_is_matched), vec![1]);
    }

    #[test]
    fn suffix_scan_reverses_the_needle() {
        let store = InMemoryStore::new();
        seed_fruit(&store);

        let predicate = Predicate::Suffix {
            attribute: "name".into(),
            suffix: "t".into(),
        };
        assert_eq!(reader_ids(&store, &predicate), vec![2]);
    }

    #[test]
    fn pattern_matches_inner_substrings() {
        let store = InMemoryStore::new();
        seed_fruit(&store);

        let predicate = Predicate::Pattern {
            attribute: "name".into(),
            pattern: "pric".into(),
        };
        assert_eq!(reader_ids(&store, &predicate), vec![2]);

        let everywhere = Predicate::Pattern {
            attribute: "name".into(),
            pattern: "a".into(),
        };
        assert_eq!(reader_ids(&store, &everywhere), vec![1, 2, 3]);
    }

    #[test]
    fn word_search_intersects_word_sets() {
        let store = InMemoryStore::new();
        store.sadd("item:tags:red:idx", &["1", "2"]).unwrap();
        store.sadd("item:tags:ripe:idx", &["2", "3"]).unwrap();

        let predicate = Predicate::Words {
            attribute: "tags".into(),
            text: "Red, ripe!".into(),
        };
        assert_eq!(reader_ids(&store, &predicate), vec![2]);
    }

    #[test]
    fn references_read_the_column_index() {
        let store = InMemoryStore::new();
        store.zadd("item:vendor_id:idx", "1", 5.0).unwrap();
        store.zadd("item:vendor_id:idx", "2", 5.0).unwrap();
        store.zadd("item:vendor_id:idx", "3", 6.0).unwrap();

        let predicate = Predicate::References {
            column: "vendor_id".into(),
            target_pk: 5,
        };
        assert_eq!(reader_ids(&store, &predicate), vec![1, 2]);
    }

    #[test]
    fn validate_rejects_what_the_schema_cannot_answer() {
        let store = InMemoryStore::new();
        let schema = schema();
        let config = DatabaseConfig::new();
        let reader = IndexReader::new(&store, &schema, &config);

        let unknown = Predicate::Equals {
            attribute: "missing".into(),
            value: AttrValue::Int(1),
        };
        assert!(matches!(
            reader.validate(&unknown),
            Err(CoreError::UnknownAttribute { .. })
        ));

        let wrong_kind = Predicate::Equals {
            attribute: "price".into(),
            value: "ten".into(),
        };
        assert!(matches!(
            reader.validate(&wrong_kind),
            Err(CoreError::InvalidValue { .. })
        ));

        let unindexed = Predicate::Equals {
            attribute: "note".into(),
            value: "x".into(),
        };
        assert!(matches!(
            reader.validate(&unindexed),
            Err(CoreError::MissingIndex { .. })
        ));

        let no_pattern = Predicate::Pattern {
            attribute: "tags".into(),
            pattern: "x".into(),
        };
        assert!(matches!(
            reader.validate(&no_pattern),
            Err(CoreError::MissingIndex { .. })
        ));

        let empty = Predicate::Prefix {
            attribute: "name".into(),
            prefix: String::new(),
        };
        assert!(matches!(
            reader.validate(&empty),
            Err(CoreError::QueryUsage { .. })
        ));

        let no_words = Predicate::Words {
            attribute: "tags".into(),
            text: "!!!".into(),
        };
        assert!(matches!(
            reader.validate(&no_words),
            Err(CoreError::QueryUsage { .. })
        ));
    }

    #[test]
    fn estimates_price_by_cardinality() {
        let store = InMemoryStore::new();
        let schema = schema();
        let config = DatabaseConfig::new();

        for (pk, price) in [(1, 10.0), (2, 20.0), (3, 30.0)] {
            store
                .zadd("item:price:idx", &pk.to_string(), price)
                .unwrap();
        }
        store.sadd("item:tags:red:idx", &["1", "2"]).unwrap();
        store.sadd("item:tags:ripe:idx", &["2"]).unwrap();

        let reader = IndexReader::new(&store, &schema, &config);
        let range = Predicate::Range {
            attribute: "price".into(),
            min: Some(AttrValue::Int(15)),
            max: None,
        };
        assert_eq!(reader.estimate(&range).unwrap(), 2);

        let words = Predicate::Words {
            attribute: "tags".into(),
            text: "red ripe".into(),
        };
        assert_eq!(reader.estimate(&words).unwrap(), 1);

        let unique = Predicate::Equals {
            attribute: "sku".into(),
            value: "A-1".into(),
        };
        assert_eq!(reader.estimate(&unique).unwrap(), 1);
    }
}
