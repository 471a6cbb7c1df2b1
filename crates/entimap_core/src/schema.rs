//! Model schemas, index flags, relationships, and the registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::value::AttrKind;

/// Which index structures an attribute participates in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexFlags {
    /// Single-attribute unique constraint.
    pub unique: bool,
    /// Ordered (range-queryable) index.
    pub ordered: bool,
    /// Prefix index over the sorted string representation.
    pub prefix: bool,
    /// Suffix index over the reversed string representation.
    pub suffix: bool,
    /// Full-word text index.
    pub words: bool,
}

impl IndexFlags {
    /// No indexing at all.
    pub const NONE: Self = Self {
        unique: false,
        ordered: false,
        prefix: false,
        suffix: false,
        words: false,
    };

    /// Whether any flag is set.
    #[must_use]
    pub const fn any(self) -> bool {
        self.unique || self.ordered || self.prefix || self.suffix || self.words
    }

    /// Substring matching needs both the prefix and the suffix structure.
    #[must_use]
    pub const fn supports_pattern(self) -> bool {
        self.prefix && self.suffix
    }
}

/// One declared attribute of a model.
#[derive(Debug, Clone)]
pub struct AttributeDef {
    name: String,
    kind: AttrKind,
    flags: IndexFlags,
}

impl AttributeDef {
    /// Declares an attribute with no indexing.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: AttrKind) -> Self {
        Self {
            name: name.into(),
            kind,
            flags: IndexFlags::NONE,
        }
    }

    /// Adds a unique constraint.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.flags.unique = true;
        self
    }

    /// Adds an ordered index (range queries, explicit ordering).
    #[must_use]
    pub fn ordered(mut self) -> Self {
        self.flags.ordered = true;
        self
    }

    /// Adds a prefix index.
    #[must_use]
    pub fn prefix(mut self) -> Self {
        self.flags.prefix = true;
        self
    }

    /// Adds a suffix index.
    #[must_use]
    pub fn suffix(mut self) -> Self {
        self.flags.suffix = true;
        self
    }

    /// Adds a full-word text index.
    #[must_use]
    pub fn words(mut self) -> Self {
        self.flags.words = true;
        self
    }

    /// The attribute name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared kind.
    #[must_use]
    pub const fn kind(&self) -> AttrKind {
        self.kind
    }

    /// The index flags.
    #[must_use]
    pub const fn flags(&self) -> IndexFlags {
        self.flags
    }
}

/// What happens to referrers when their target is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Live referrers block the delete.
    #[default]
    Restrict,
    /// Referrers are deleted with the target, depth-first.
    Cascade,
}

/// A ManyToOne column: this model stores the primary key of an entity of
/// `target_model` in `column`.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    column: String,
    target_model: String,
}

impl ForeignKey {
    /// The referencing column name.
    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }

    /// The referenced model.
    #[must_use]
    pub fn target_model(&self) -> &str {
        &self.target_model
    }
}

/// A OneToMany relationship: the read-only reverse side of a ManyToOne
/// column on `target_model`.
///
/// `via_column` names that reciprocal column. It may be left out at
/// declaration time when the target has exactly one ManyToOne column
/// referencing this model; registration resolves it, and fails when the
/// reference is ambiguous.
#[derive(Debug, Clone)]
pub struct Relation {
    name: String,
    target_model: String,
    via_column: Option<String>,
    on_delete: DeletePolicy,
}

impl Relation {
    /// The relation name, used in traversal and error messages.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The referencing (child) model.
    #[must_use]
    pub fn target_model(&self) -> &str {
        &self.target_model
    }

    /// The reciprocal ManyToOne column on the target model. Always set
    /// once the registry has resolved.
    #[must_use]
    pub fn via_column(&self) -> &str {
        self.via_column.as_deref().unwrap_or_default()
    }

    /// The delete policy.
    #[must_use]
    pub const fn on_delete(&self) -> DeletePolicy {
        self.on_delete
    }
}

/// The declaration of one model: its key prefix, attributes, foreign
/// keys, reverse relationships, and composite unique constraints.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    name: String,
    attributes: Vec<AttributeDef>,
    foreign_keys: Vec<ForeignKey>,
    relations: Vec<Relation>,
    composite_unique: Vec<Vec<String>>,
}

impl ModelSchema {
    /// Starts a model declaration. The name becomes the key prefix of
    /// everything the model stores.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            foreign_keys: Vec::new(),
            relations: Vec::new(),
            composite_unique: Vec::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attribute(mut self, def: AttributeDef) -> Self {
        self.attributes.push(def);
        self
    }

    /// Adds a ManyToOne column referencing `target_model`.
    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>, target_model: impl Into<String>) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.into(),
            target_model: target_model.into(),
        });
        self
    }

    /// Adds a OneToMany relationship, leaving the reciprocal column to be
    /// inferred at registration.
    #[must_use]
    pub fn one_to_many(
        mut self,
        name: impl Into<String>,
        target_model: impl Into<String>,
        on_delete: DeletePolicy,
    ) -> Self {
        self.relations.push(Relation {
            name: name.into(),
            target_model: target_model.into(),
            via_column: None,
            on_delete,
        });
        self
    }

    /// Adds a OneToMany relationship naming its reciprocal ManyToOne
    /// column explicitly.
    #[must_use]
    pub fn one_to_many_via(
        mut self,
        name: impl Into<String>,
        target_model: impl Into<String>,
        via_column: impl Into<String>,
        on_delete: DeletePolicy,
    ) -> Self {
        self.relations.push(Relation {
            name: name.into(),
            target_model: target_model.into(),
            via_column: Some(via_column.into()),
            on_delete,
        });
        self
    }

    /// Adds a composite unique constraint over an ordered attribute tuple.
    #[must_use]
    pub fn unique_together<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.composite_unique
            .push(attributes.into_iter().map(Into::into).collect());
        self
    }

    /// The model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All declared attributes.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeDef] {
        &self.attributes
    }

    /// Looks up an attribute by name.
    #[must_use]
    pub fn attribute_def(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// All ManyToOne columns.
    #[must_use]
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Looks up a ManyToOne column by name.
    #[must_use]
    pub fn foreign_key_def(&self, column: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }

    /// All OneToMany relationships.
    #[must_use]
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Looks up a OneToMany relationship by name.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// All composite unique tuples.
    #[must_use]
    pub fn composite_unique(&self) -> &[Vec<String>] {
        &self.composite_unique
    }

    fn validate(&self) -> CoreResult<()> {
        validate_name("model", &self.name)?;

        let mut seen = std::collections::HashSet::new();
        for attr in &self.attributes {
            validate_name("attribute", &attr.name)?;
            if !seen.insert(attr.name.as_str()) {
                return Err(CoreError::schema(format!(
                    "model '{}' declares attribute '{}' twice",
                    self.name, attr.name
                )));
            }
            let flags = attr.flags;
            if flags.ordered && !attr.kind.is_scorable() {
                return Err(CoreError::schema(format!(
                    "model '{}': ordered index on '{}' requires a scorable kind, not {}",
                    self.name,
                    attr.name,
                    attr.kind.name()
                )));
            }
            if (flags.prefix || flags.suffix || flags.words) && attr.kind != AttrKind::Text {
                return Err(CoreError::schema(format!(
                    "model '{}': prefix/suffix/word indexes on '{}' require the text kind",
                    self.name, attr.name
                )));
            }
        }

        for fk in &self.foreign_keys {
            validate_name("column", &fk.column)?;
            if !seen.insert(fk.column.as_str()) {
                return Err(CoreError::schema(format!(
                    "model '{}': column '{}' is declared more than once",
                    self.name, fk.column
                )));
            }
        }

        let mut relation_names = std::collections::HashSet::new();
        for relation in &self.relations {
            validate_name("relation", &relation.name)?;
            if !relation_names.insert(relation.name.as_str()) {
                return Err(CoreError::schema(format!(
                    "model '{}' declares relation '{}' twice",
                    self.name, relation.name
                )));
            }
        }

        let mut tuples = std::collections::HashSet::new();
        for tuple in &self.composite_unique {
            if tuple.len() < 2 {
                return Err(CoreError::schema(format!(
                    "model '{}': a composite unique constraint needs at least two attributes",
                    self.name
                )));
            }
            let mut members = std::collections::HashSet::new();
            for part in tuple {
                let known = self.attribute_def(part).is_some() || self.foreign_key_def(part).is_some();
                if !known {
                    return Err(CoreError::schema(format!(
                        "model '{}': composite unique constraint references unknown attribute '{part}'",
                        self.name
                    )));
                }
                if !members.insert(part.as_str()) {
                    return Err(CoreError::schema(format!(
                        "model '{}': composite unique constraint repeats attribute '{part}'",
                        self.name
                    )));
                }
            }
            if !tuples.insert(tuple.join("\0")) {
                return Err(CoreError::schema(format!(
                    "model '{}' declares the same composite unique constraint twice",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

fn validate_name(what: &str, name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::schema(format!("{what} name must not be empty")));
    }
    if name.contains(':') || name.contains('\0') {
        return Err(CoreError::schema(format!(
            "{what} name '{name}' must not contain ':' or NUL"
        )));
    }
    Ok(())
}

/// Map of resolved model schemas, shared by sessions and queries.
pub(crate) type SchemaMap = HashMap<String, Arc<ModelSchema>>;

/// Collects model declarations and validates them as a whole.
///
/// Intra-model rules are checked at [`register`](Self::register) time;
/// cross-model rules (foreign-key targets, reciprocal-column resolution
/// for OneToMany relationships) are checked when the registry is handed
/// to a database.
#[derive(Debug, Default)]
pub struct Registry {
    models: HashMap<String, ModelSchema>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one model declaration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] when the declaration violates an
    /// intra-model rule or the model name is already taken.
    pub fn register(&mut self, schema: ModelSchema) -> CoreResult<()> {
        schema.validate()?;
        if self.models.contains_key(schema.name()) {
            return Err(CoreError::schema(format!(
                "model '{}' is already registered",
                schema.name()
            )));
        }
        self.models.insert(schema.name().to_string(), schema);
        Ok(())
    }

    /// Registered model names, sorted.
    #[must_use]
    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolves cross-model references and freezes the registry.
    pub(crate) fn resolve(mut self) -> CoreResult<SchemaMap> {
        for (name, schema) in &self.models {
            for fk in &schema.foreign_keys {
                if !self.models.contains_key(&fk.target_model) {
                    return Err(CoreError::schema(format!(
                        "model '{name}': column '{}' references unregistered model '{}'",
                        fk.column, fk.target_model
                    )));
                }
            }
        }

        // Resolve each relation's reciprocal column, inferring it when the
        // target has exactly one reference back to the declaring model.
        let mut resolved: Vec<(String, usize, String)> = Vec::new();
        for (name, schema) in &self.models {
            for (idx, relation) in schema.relations.iter().enumerate() {
                let target = self.models.get(&relation.target_model).ok_or_else(|| {
                    CoreError::schema(format!(
                        "model '{name}': relation '{}' targets unregistered model '{}'",
                        relation.name, relation.target_model
                    ))
                })?;
                let candidates: Vec<&str> = target
                    .foreign_keys
                    .iter()
                    .filter(|fk| fk.target_model == *name)
                    .map(|fk| fk.column.as_str())
                    .collect();
                let via = match &relation.via_column {
                    Some(via) => {
                        if !candidates.contains(&via.as_str()) {
                            return Err(CoreError::schema(format!(
                                "model '{name}': relation '{}' names column '{via}', but '{}' has no such reference back to '{name}'",
                                relation.name, relation.target_model
                            )));
                        }
                        via.clone()
                    }
                    None => match candidates.as_slice() {
                        [] => {
                            return Err(CoreError::schema(format!(
                                "model '{name}': relation '{}' has no reciprocal column on '{}'",
                                relation.name, relation.target_model
                            )))
                        }
                        [only] => (*only).to_string(),
                        _ => {
                            return Err(CoreError::schema(format!(
                                "model '{name}': relation '{}' is ambiguous, '{}' references '{name}' through {} columns; name the column explicitly",
                                relation.name,
                                relation.target_model,
                                candidates.len()
                            )))
                        }
                    },
                };
                resolved.push((name.clone(), idx, via));
            }
        }

        for (model, idx, via) in resolved {
            if let Some(schema) = self.models.get_mut(&model) {
                schema.relations[idx].via_column = Some(via);
            }
        }

        Ok(self
            .models
            .into_iter()
            .map(|(name, schema)| (name, Arc::new(schema)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_schema() -> ModelSchema {
        ModelSchema::new("user")
            .attribute(AttributeDef::new("email", AttrKind::Text).unique())
            .attribute(AttributeDef::new("age", AttrKind::Int).ordered())
    }

    #[test]
    fn register_rejects_duplicate_model() {
        let mut registry = Registry::new();
        registry.register(user_schema()).unwrap();
        let err = registry.register(user_schema()).unwrap_err();
        assert!(matches!(err, CoreError::Schema { .. }));
    }

    #[test]
    fn register_rejects_duplicate_attribute() {
        let schema = ModelSchema::new("user")
            .attribute(AttributeDef::new("email", AttrKind::Text))
            .attribute(AttributeDef::new("email", AttrKind::Text));
        let err = Registry::new().register(schema).unwrap_err();
        assert!(matches!(err, CoreError::Schema { .. }));
    }

    #[test]
    fn register_rejects_ordered_text() {
        let schema =
            ModelSchema::new("user").attribute(AttributeDef::new("name", AttrKind::Text).ordered());
        assert!(Registry::new().register(schema).is_err());
    }

    #[test]
    fn register_rejects_prefix_on_numbers() {
        let schema =
            ModelSchema::new("user").attribute(AttributeDef::new("age", AttrKind::Int).prefix());
        assert!(Registry::new().register(schema).is_err());
    }

    #[test]
    fn register_rejects_separator_in_names() {
        assert!(Registry::new().register(ModelSchema::new("a:b")).is_err());
        let schema =
            ModelSchema::new("user").attribute(AttributeDef::new("a:b", AttrKind::Int));
        assert!(Registry::new().register(schema).is_err());
    }

    #[test]
    fn register_rejects_single_attribute_tuple() {
        let schema = ModelSchema::new("user")
            .attribute(AttributeDef::new("email", AttrKind::Text))
            .unique_together(["email"]);
        assert!(Registry::new().register(schema).is_err());
    }

    #[test]
    fn register_rejects_unknown_tuple_member() {
        let schema = ModelSchema::new("user")
            .attribute(AttributeDef::new("first", AttrKind::Text))
            .unique_together(["first", "last"]);
        assert!(Registry::new().register(schema).is_err());
    }

    #[test]
    fn resolve_infers_unambiguous_reciprocal_column() {
        let mut registry = Registry::new();
        registry
            .register(user_schema().one_to_many("orders", "order", DeletePolicy::Cascade))
            .unwrap();
        registry
            .register(ModelSchema::new("order").foreign_key("user_id", "user"))
            .unwrap();

        let schemas = registry.resolve().unwrap();
        let user = &schemas["user"];
        assert_eq!(user.relation("orders").unwrap().via_column(), "user_id");
    }

    #[test]
    fn resolve_requires_explicit_column_when_ambiguous() {
        let mut registry = Registry::new();
        registry
            .register(user_schema().one_to_many("messages", "message", DeletePolicy::Restrict))
            .unwrap();
        registry
            .register(
                ModelSchema::new("message")
                    .foreign_key("sender_id", "user")
                    .foreign_key("recipient_id", "user"),
            )
            .unwrap();

        let err = registry.resolve().unwrap_err();
        match err {
            CoreError::Schema { message } => assert!(message.contains("ambiguous")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn resolve_accepts_explicit_column_among_many() {
        let mut registry = Registry::new();
        registry
            .register(user_schema().one_to_many_via(
                "sent",
                "message",
                "sender_id",
                DeletePolicy::Cascade,
            ))
            .unwrap();
        registry
            .register(
                ModelSchema::new("message")
                    .foreign_key("sender_id", "user")
                    .foreign_key("recipient_id", "user"),
            )
            .unwrap();

        let schemas = registry.resolve().unwrap();
        assert_eq!(
            schemas["user"].relation("sent").unwrap().via_column(),
            "sender_id"
        );
    }

    #[test]
    fn resolve_rejects_missing_reciprocal() {
        let mut registry = Registry::new();
        registry
            .register(user_schema().one_to_many("orders", "order", DeletePolicy::Restrict))
            .unwrap();
        registry.register(ModelSchema::new("order")).unwrap();
        assert!(registry.resolve().is_err());
    }

    #[test]
    fn resolve_accepts_self_reference() {
        let mut registry = Registry::new();
        registry
            .register(
                ModelSchema::new("category")
                    .foreign_key("parent_id", "category")
                    .one_to_many("children", "category", DeletePolicy::Cascade),
            )
            .unwrap();

        let schemas = registry.resolve().unwrap();
        assert_eq!(
            schemas["category"].relation("children").unwrap().via_column(),
            "parent_id"
        );
    }

    #[test]
    fn resolve_rejects_unregistered_fk_target() {
        let mut registry = Registry::new();
        registry
            .register(ModelSchema::new("order").foreign_key("user_id", "user"))
            .unwrap();
        assert!(registry.resolve().is_err());
    }
}
