//! Store key layout and member encodings.
//!
//! Every key the engine touches is built here. For a model `m`,
//! attribute `a` and primary key `pk`:
//!
//! - `m:{pk}`          data hash (attribute name to store string)
//! - `m::`             footprint hash (pk to JSON footprint record)
//! - `m::seq`          primary-key sequence counter
//! - `m:{a}:uidx`      unique markers (value to owning pk)
//! - `m:{a}:idx`       ordered index (member pk, score from value)
//! - `m:{a}:{w}:idx`   word index for word `w` (set of pks)
//! - `m:{a}:pre`       prefix index (member `value\0pk`, score 0)
//! - `m:{a}:suf`       suffix index over the reversed value
//! - `m::result:{id}`  cached query result (member pk, score rank)
//!
//! Lexicographic members and composite-unique marker fields escape
//! backslash and NUL so the `\0` separator stays unambiguous and the
//! prefix-of relation survives encoding.

/// Data hash key of one entity.
pub(crate) fn data_key(model: &str, pk: u64) -> String {
    format!("{model}:{pk}")
}

/// Footprint hash of a model: pk field to JSON footprint record. Doubles
/// as the existence marker consulted by maintenance.
pub(crate) fn footprint_key(model: &str) -> String {
    format!("{model}::")
}

/// Primary-key sequence counter of a model.
pub(crate) fn seq_key(model: &str) -> String {
    format!("{model}::seq")
}

/// Unique-marker hash of a single attribute.
pub(crate) fn unique_key(model: &str, attribute: &str) -> String {
    format!("{model}:{attribute}:uidx")
}

/// Unique-marker hash of a composite attribute tuple.
pub(crate) fn composite_unique_key(model: &str, attributes: &[String]) -> String {
    format!("{model}:{}:uidx", attributes.join(":"))
}

/// Ordered (score) index of an attribute or foreign-key column.
pub(crate) fn ordered_key(model: &str, attribute: &str) -> String {
    format!("{model}:{attribute}:idx")
}

/// Word index of one word of a text attribute.
pub(crate) fn word_key(model: &str, attribute: &str, word: &str) -> String {
    format!("{model}:{attribute}:{word}:idx")
}

/// Prefix index of a text attribute.
pub(crate) fn prefix_key(model: &str, attribute: &str) -> String {
    format!("{model}:{attribute}:pre")
}

/// Suffix index of a text attribute.
pub(crate) fn suffix_key(model: &str, attribute: &str) -> String {
    format!("{model}:{attribute}:suf")
}

/// Cached-result key, namespaced under the model.
pub(crate) fn result_key(model: &str, token: &str) -> String {
    format!("{model}::result:{token}")
}

/// Escapes backslash and NUL so escaped text never contains a literal
/// NUL. The escape expands character by character, so `a` being a prefix
/// of `b` implies `escape(a)` is a prefix of `escape(b)`.
pub(crate) fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out
}

/// Reverses `escape`.
pub(crate) fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Member string of a lexicographic index entry: escaped value, NUL
/// separator, decimal pk.
pub(crate) fn lex_member(value: &str, pk: u64) -> String {
    format!("{}\0{pk}", escape(value))
}

/// Splits a lexicographic member back into its value and pk.
pub(crate) fn split_lex_member(member: &str) -> Option<(String, u64)> {
    let (value, pk) = member.split_once('\0')?;
    Some((unescape(value), pk.parse().ok()?))
}

/// Canonical marker field of a composite-unique tuple: escaped component
/// store strings joined with NUL. Distinct tuples never collide because
/// components cannot contain an unescaped NUL.
pub(crate) fn encode_tuple(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| escape(p))
        .collect::<Vec<_>>()
        .join("\0")
}

/// The value reversed character-wise, the form suffix indexes store.
pub(crate) fn reverse_text(value: &str) -> String {
    value.chars().rev().collect()
}
