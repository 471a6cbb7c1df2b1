//! Index consistency auditing.
//!
//! Walks every index structure a model owns and cross-checks it against
//! the data records, in both directions: index members must point at
//! live entities, and live entities must be filed under their current
//! values. The key and member formats are spelled out here on purpose,
//! so a layout drift in the engine fails these checks instead of being
//! silently mirrored.

use entimap_core::{CoreResult, Database};
use entimap_store::StoreBackend;

/// Outcome of an audit run.
#[derive(Debug, Default)]
pub struct AuditReport {
    /// Index entries and filings examined.
    pub entries_checked: u64,
    /// Human-readable descriptions of every inconsistency found.
    pub problems: Vec<String>,
}

impl AuditReport {
    /// True when no inconsistency was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }

    fn problem(&mut self, message: String) {
        self.problems.push(message);
    }
}

/// Audits every registered model.
///
/// # Errors
///
/// Propagates store failures; inconsistencies are reported, not raised.
pub fn audit_database(db: &Database) -> CoreResult<AuditReport> {
    let mut report = AuditReport::default();
    for model in db.models() {
        audit_model_into(db, model, &mut report)?;
    }
    Ok(report)
}

/// Audits one model.
///
/// # Errors
///
/// Returns an error for an unregistered model or a failing store.
pub fn audit_model(db: &Database, model: &str) -> CoreResult<AuditReport> {
    let mut report = AuditReport::default();
    audit_model_into(db, model, &mut report)?;
    Ok(report)
}

fn audit_model_into(db: &Database, model: &str, report: &mut AuditReport) -> CoreResult<()> {
    let schema = db.schema(model)?;
    let store = db.store().as_ref();

    // The footprint hash doubles as the model's id directory.
    let mut live: Vec<u64> = Vec::new();
    for (field, raw) in store.hgetall(&footprint_key(model))? {
        report.entries_checked += 1;
        let Ok(pk) = field.parse::<u64>() else {
            report.problem(format!("{model}: footprint field '{field}' is not an id"));
            continue;
        };
        if !store.exists(&data_key(model, pk))? {
            report.problem(format!("{model}:{pk}: footprint entry without a data record"));
            continue;
        }
        live.push(pk);
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(footprint) => check_footprint(store, model, pk, &footprint, report)?,
            Err(err) => report.problem(format!("{model}:{pk}: unreadable footprint: {err}")),
        }
    }
    live.sort_unstable();

    for attr in schema.attributes() {
        let flags = attr.flags();
        if flags.ordered {
            check_scored_members(store, &ordered_key(model, attr.name()), &live, report)?;
        }
        if flags.prefix {
            check_lex_members(store, &prefix_key(model, attr.name()), &live, report)?;
        }
        if flags.suffix {
            check_lex_members(store, &suffix_key(model, attr.name()), &live, report)?;
        }
        if flags.unique {
            check_markers(store, &unique_key(model, attr.name()), &live, report)?;
        }
    }
    for fk in schema.foreign_keys() {
        check_scored_members(store, &ordered_key(model, fk.column()), &live, report)?;
    }
    for tuple in schema.composite_unique() {
        check_markers(store, &composite_unique_key(model, tuple), &live, report)?;
    }

    check_filings(db, model, &live, report)?;
    Ok(())
}

/// Every entry a footprint lists must actually be present.
fn check_footprint(
    store: &dyn StoreBackend,
    model: &str,
    pk: u64,
    footprint: &serde_json::Value,
    report: &mut AuditReport,
) -> CoreResult<()> {
    let pk_member = pk.to_string();
    for key in string_array(footprint, "scored") {
        report.entries_checked += 1;
        if store.zscore(&key, &pk_member)?.is_none() {
            report.problem(format!("{model}:{pk}: footprint lists '{key}' but the member is gone"));
        }
    }
    for key in string_array(footprint, "sets") {
        report.entries_checked += 1;
        if !store.sismember(&key, &pk_member)? {
            report.problem(format!("{model}:{pk}: footprint lists '{key}' but the member is gone"));
        }
    }
    for section in ["prefix", "suffix"] {
        for (key, member) in pair_array(footprint, section) {
            report.entries_checked += 1;
            if store.zscore(&key, &member)?.is_none() {
                report.problem(format!(
                    "{model}:{pk}: footprint lists '{key}' but member '{}' is gone",
                    member.replace('\0', "<NUL>")
                ));
            }
        }
    }
    Ok(())
}

/// Every member of a scored index must be the id of a live entity.
fn check_scored_members(
    store: &dyn StoreBackend,
    key: &str,
    live: &[u64],
    report: &mut AuditReport,
) -> CoreResult<()> {
    for member in store.zrange(key, 0, -1)? {
        report.entries_checked += 1;
        match member.parse::<u64>() {
            Ok(pk) if live.binary_search(&pk).is_ok() => {}
            Ok(pk) => report.problem(format!("{key}: member points at dead id {pk}")),
            Err(_) => report.problem(format!("{key}: member '{member}' is not an id")),
        }
    }
    Ok(())
}

/// Every lexicographic member must decode to `value\0pk` with a live pk.
fn check_lex_members(
    store: &dyn StoreBackend,
    key: &str,
    live: &[u64],
    report: &mut AuditReport,
) -> CoreResult<()> {
    for member in store.zrange(key, 0, -1)? {
        report.entries_checked += 1;
        let Some((_, id)) = member.split_once('\0') else {
            report.problem(format!("{key}: member without a NUL separator"));
            continue;
        };
        match id.parse::<u64>() {
            Ok(pk) if live.binary_search(&pk).is_ok() => {}
            Ok(pk) => report.problem(format!("{key}: member points at dead id {pk}")),
            Err(_) => report.problem(format!("{key}: member id '{id}' does not parse")),
        }
    }
    Ok(())
}

/// Every unique marker must name a live holder.
fn check_markers(
    store: &dyn StoreBackend,
    key: &str,
    live: &[u64],
    report: &mut AuditReport,
) -> CoreResult<()> {
    for (field, holder) in store.hgetall(key)? {
        report.entries_checked += 1;
        match holder.parse::<u64>() {
            Ok(pk) if live.binary_search(&pk).is_ok() => {}
            Ok(pk) => report.problem(format!("{key}['{field}']: marker held by dead id {pk}")),
            Err(_) => report.problem(format!("{key}['{field}']: holder '{holder}' is not an id")),
        }
    }
    Ok(())
}

/// Every live entity must be filed under its current attribute values.
fn check_filings(
    db: &Database,
    model: &str,
    live: &[u64],
    report: &mut AuditReport,
) -> CoreResult<()> {
    let schema = db.schema(model)?;
    let store = db.store().as_ref();
    let mut session = db.passthrough_session();

    for &pk in live {
        let Some(entity) = session.get(model, pk)? else {
            report.problem(format!("{model}:{pk}: listed live but not loadable"));
            continue;
        };
        let entity = entity.borrow();
        let pk_member = pk.to_string();

        for attr in schema.attributes() {
            let Some(value) = entity.get(attr.name()) else {
                continue;
            };
            let flags = attr.flags();
            if flags.ordered {
                report.entries_checked += 1;
                let filed = store.zscore(&ordered_key(model, attr.name()), &pk_member)?;
                if filed != value.score() {
                    report.problem(format!(
                        "{model}:{pk}: '{}' filed under score {filed:?}, value scores {:?}",
                        attr.name(),
                        value.score()
                    ));
                }
            }
            if flags.unique {
                report.entries_checked += 1;
                let holder = store.hget(&unique_key(model, attr.name()), &value.encode())?;
                if holder.as_deref() != Some(pk_member.as_str()) {
                    report.problem(format!(
                        "{model}:{pk}: unique marker for '{}' held by {holder:?}",
                        attr.name()
                    ));
                }
            }
            if let Some(text) = value.as_text() {
                if flags.prefix {
                    report.entries_checked += 1;
                    let member = format!("{}\0{pk}", escape(text));
                    if store.zscore(&prefix_key(model, attr.name()), &member)?.is_none() {
                        report.problem(format!(
                            "{model}:{pk}: '{}' missing from the prefix index",
                            attr.name()
                        ));
                    }
                }
                if flags.suffix {
                    report.entries_checked += 1;
                    let reversed: String = text.chars().rev().collect();
                    let member = format!("{}\0{pk}", escape(&reversed));
                    if store.zscore(&suffix_key(model, attr.name()), &member)?.is_none() {
                        report.problem(format!(
                            "{model}:{pk}: '{}' missing from the suffix index",
                            attr.name()
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

fn string_array(footprint: &serde_json::Value, section: &str) -> Vec<String> {
    footprint
        .get(section)
        .and_then(serde_json::Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn pair_array(footprint: &serde_json::Value, section: &str) -> Vec<(String, String)> {
    footprint
        .get(section)
        .and_then(serde_json::Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|pair| {
                    let items = pair.as_array()?;
                    Some((items.first()?.as_str()?.to_string(), items.get(1)?.as_str()?.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn data_key(model: &str, pk: u64) -> String {
    format!("{model}:{pk}")
}

fn footprint_key(model: &str) -> String {
    format!("{model}::")
}

fn unique_key(model: &str, attribute: &str) -> String {
    format!("{model}:{attribute}:uidx")
}

fn composite_unique_key(model: &str, attributes: &[String]) -> String {
    format!("{model}:{}:uidx", attributes.join(":"))
}

fn ordered_key(model: &str, attribute: &str) -> String {
    format!("{model}:{attribute}:idx")
}

fn prefix_key(model: &str, attribute: &str) -> String {
    format!("{model}:{attribute}:pre")
}

fn suffix_key(model: &str, attribute: &str) -> String {
    format!("{model}:{attribute}:suf")
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\0', "\\0")
}
