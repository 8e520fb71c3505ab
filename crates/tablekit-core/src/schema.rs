//! Record metadata: table, keys, indexes, naming and per-field options.
//!
//! A [`Schema`] is declared once per record type through [`Record::schema`]
//! and cached by a [`SchemaRegistry`] owned by the client.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tablekit_model::types::ScalarAttributeType;
use tablekit_model::{AttributeValue, Item, Key};

use crate::error::{Error, Result};
use crate::value::Value;

/// A type stored as one item of one table.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Describe the table this record lives in.
    fn schema() -> Schema;
}

/// How serde field names map to attribute names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingConvention {
    /// Attribute name equals the field name.
    #[default]
    AsIs,
    /// `created_at` is stored as `createdAt`.
    CamelCase,
    /// `createdAt` is stored as `created_at`.
    SnakeCase,
    /// `created_at` is stored as `CreatedAt`.
    PascalCase,
}

impl NamingConvention {
    /// Apply the convention to a field name.
    #[must_use]
    pub fn apply(&self, field: &str) -> String {
        match self {
            Self::AsIs => field.to_owned(),
            Self::SnakeCase => split_words(field).join("_"),
            Self::CamelCase => {
                let mut out = String::new();
                for (i, word) in split_words(field).iter().enumerate() {
                    if i == 0 {
                        out.push_str(word);
                    } else {
                        out.push_str(&capitalize(word));
                    }
                }
                out
            }
            Self::PascalCase => split_words(field).iter().map(|w| capitalize(w)).collect(),
        }
    }
}

fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in s.chars() {
        if matches!(c, '_' | '-' | ' ') {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// How a field's value is shaped on the wire when the JSON alone is ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeHint {
    /// Infer from the value.
    #[default]
    Auto,
    /// Store a list of strings / numbers as `SS` / `NS`.
    Set,
    /// Store a byte array as `B`.
    Binary,
    /// Store a list of byte arrays as `BS`.
    BinarySet,
}

/// Per-field options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSpec {
    /// The serde name of the field.
    pub name: String,
    /// Explicit attribute name, overriding the naming convention.
    pub attribute: Option<String>,
    /// Wire shape hint.
    pub hint: TypeHint,
    /// Leave the attribute out when its value is empty.
    pub omit_empty: bool,
    /// Encrypt the value through the codec's encryptor.
    pub encrypted: bool,
    /// Name of a converter registered on the codec.
    pub converter: Option<String>,
}

impl FieldSpec {
    /// Options for the field with this serde name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Store under a different attribute name.
    #[must_use]
    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Store lists as sets.
    #[must_use]
    pub fn set(mut self) -> Self {
        self.hint = TypeHint::Set;
        self
    }

    /// Store byte arrays as binary.
    #[must_use]
    pub fn binary(mut self) -> Self {
        self.hint = TypeHint::Binary;
        self
    }

    /// Store lists of byte arrays as a binary set.
    #[must_use]
    pub fn binary_set(mut self) -> Self {
        self.hint = TypeHint::BinarySet;
        self
    }

    /// Omit the attribute when the value is empty.
    #[must_use]
    pub fn omit_empty(mut self) -> Self {
        self.omit_empty = true;
        self
    }

    /// Encrypt the value at rest.
    #[must_use]
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    /// Encode through the named converter.
    #[must_use]
    pub fn converter(mut self, name: impl Into<String>) -> Self {
        self.converter = Some(name.into());
        self
    }
}

/// A key attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    /// Attribute name.
    pub attribute: String,
    /// Scalar type of the attribute.
    pub kind: ScalarAttributeType,
}

/// Global or local secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Global secondary index, with its own partition key.
    Global,
    /// Local secondary index, sharing the table's partition key.
    Local,
}

/// A secondary index declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Global or local.
    pub kind: IndexKind,
    partition_field: Option<(String, ScalarAttributeType)>,
    sort_field: Option<(String, ScalarAttributeType)>,
    /// Resolved partition key; filled in when the schema is built.
    pub partition_key: Option<KeySpec>,
    /// Resolved sort key; filled in when the schema is built.
    pub sort_key: Option<KeySpec>,
}

impl IndexSpec {
    /// A global index keyed by `partition_field`.
    pub fn global(
        name: impl Into<String>,
        partition_field: impl Into<String>,
        kind: ScalarAttributeType,
    ) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Global,
            partition_field: Some((partition_field.into(), kind)),
            sort_field: None,
            partition_key: None,
            sort_key: None,
        }
    }

    /// A local index sorted by `sort_field`.
    pub fn local(
        name: impl Into<String>,
        sort_field: impl Into<String>,
        kind: ScalarAttributeType,
    ) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Local,
            partition_field: None,
            sort_field: Some((sort_field.into(), kind)),
            partition_key: None,
            sort_key: None,
        }
    }

    /// Add a sort key to a global index.
    #[must_use]
    pub fn with_sort_key(mut self, field: impl Into<String>, kind: ScalarAttributeType) -> Self {
        self.sort_field = Some((field.into(), kind));
        self
    }
}

/// Resolved metadata for one record type.
#[derive(Debug, Clone)]
pub struct Schema {
    table: String,
    partition_key: Option<KeySpec>,
    sort_key: Option<KeySpec>,
    indexes: Vec<IndexSpec>,
    naming: NamingConvention,
    fields: BTreeMap<String, FieldSpec>,
    by_attribute: BTreeMap<String, String>,
    version: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl Schema {
    /// Start declaring the schema of `table`.
    pub fn builder(table: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            table: table.into(),
            partition_key: None,
            sort_key: None,
            indexes: Vec::new(),
            naming: NamingConvention::AsIs,
            fields: Vec::new(),
            version: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The table's partition key.
    pub fn partition_key(&self) -> Result<&KeySpec> {
        self.partition_key.as_ref().ok_or_else(|| {
            Error::validation(format!("table `{}` declares no partition key", self.table))
        })
    }

    /// The table's sort key, if any.
    #[must_use]
    pub fn sort_key(&self) -> Option<&KeySpec> {
        self.sort_key.as_ref()
    }

    /// Declared indexes.
    #[must_use]
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Look up an index by name.
    pub fn index(&self, name: &str) -> Result<&IndexSpec> {
        self.indexes.iter().find(|i| i.name == name).ok_or_else(|| {
            Error::validation(format!(
                "table `{}` has no index named `{name}`",
                self.table
            ))
        })
    }

    /// Key attributes of the table, or of `index` when given.
    pub fn keys_for(&self, index: Option<&str>) -> Result<(&KeySpec, Option<&KeySpec>)> {
        match index {
            None => Ok((self.partition_key()?, self.sort_key())),
            Some(name) => {
                let idx = self.index(name)?;
                let pk = idx.partition_key.as_ref().ok_or_else(|| {
                    Error::validation(format!("index `{name}` has no partition key"))
                })?;
                Ok((pk, idx.sort_key.as_ref()))
            }
        }
    }

    /// Naming convention.
    #[must_use]
    pub fn naming(&self) -> NamingConvention {
        self.naming
    }

    /// Resolve a caller-supplied field name (serde name or attribute name)
    /// to its attribute name.
    #[must_use]
    pub fn attribute_name(&self, field: &str) -> String {
        if let Some(spec) = self.fields.get(field) {
            return spec
                .attribute
                .clone()
                .unwrap_or_else(|| self.naming.apply(field));
        }
        if self.by_attribute.contains_key(field) {
            return field.to_owned();
        }
        self.naming.apply(field)
    }

    /// The serde field name an attribute decodes into.
    #[must_use]
    pub fn field_name(&self, attribute: &str) -> String {
        if let Some(field) = self.by_attribute.get(attribute) {
            return field.clone();
        }
        match self.naming {
            NamingConvention::AsIs => attribute.to_owned(),
            _ => NamingConvention::SnakeCase.apply(attribute),
        }
    }

    /// Options for the field stored under `attribute`.
    #[must_use]
    pub fn field_spec(&self, attribute: &str) -> Option<&FieldSpec> {
        self.by_attribute
            .get(attribute)
            .and_then(|field| self.fields.get(field))
    }

    /// Returns `true` when the attribute is marked omit-empty and `value` is
    /// empty. The create, update and filter paths all decide through here.
    #[must_use]
    pub fn omits(&self, attribute: &str, value: &Value) -> bool {
        self.field_spec(attribute).is_some_and(|f| f.omit_empty) && value.is_empty()
    }

    /// Returns `true` when the attribute is encrypted at rest.
    #[must_use]
    pub fn is_encrypted(&self, attribute: &str) -> bool {
        self.field_spec(attribute).is_some_and(|f| f.encrypted)
    }

    /// Attribute holding the optimistic-lock version.
    #[must_use]
    pub fn version_attribute(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Attribute holding the creation timestamp.
    #[must_use]
    pub fn created_at_attribute(&self) -> Option<&str> {
        self.created_at.as_deref()
    }

    /// Attribute holding the last-update timestamp.
    #[must_use]
    pub fn updated_at_attribute(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }

    /// Returns `true` for the table's own key attributes.
    #[must_use]
    pub fn is_key_attribute(&self, attribute: &str) -> bool {
        self.partition_key
            .as_ref()
            .is_some_and(|k| k.attribute == attribute)
            || self
                .sort_key
                .as_ref()
                .is_some_and(|k| k.attribute == attribute)
    }

    /// Extract the table key from a full item.
    pub fn key_of(&self, item: &Item) -> Result<Key> {
        let mut key = Key::new();
        let pk = self.partition_key()?;
        key.insert(pk.attribute.clone(), key_value(item, pk)?);
        if let Some(sk) = self.sort_key() {
            key.insert(sk.attribute.clone(), key_value(item, sk)?);
        }
        Ok(key)
    }

    /// Check that a key has exactly the table's key attributes with the
    /// declared types.
    pub fn check_key(&self, key: &Key) -> Result<()> {
        let expected = 1 + usize::from(self.sort_key.is_some());
        if key.len() != expected {
            return Err(Error::validation(format!(
                "key for table `{}` must have {expected} attribute(s), got {}",
                self.table,
                key.len()
            )));
        }
        let pk = self.partition_key()?;
        key_value(key, pk)?;
        if let Some(sk) = self.sort_key() {
            key_value(key, sk)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(Error::validation("schema declares an empty table name"));
        }
        self.partition_key()?;
        for index in &self.indexes {
            if index.partition_key.is_none() {
                return Err(Error::validation(format!(
                    "index `{}` has no partition key",
                    index.name
                )));
            }
        }
        Ok(())
    }
}

fn key_value(item: &Item, spec: &KeySpec) -> Result<AttributeValue> {
    let value = item
        .get(&spec.attribute)
        .ok_or_else(|| Error::validation(format!("missing key attribute `{}`", spec.attribute)))?;
    if !spec.kind.matches(value) {
        return Err(Error::validation(format!(
            "key attribute `{}` must be of type {}, got {}",
            spec.attribute,
            spec.kind,
            value.type_descriptor()
        )));
    }
    Ok(value.clone())
}

/// Builder returned by [`Schema::builder`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    table: String,
    partition_key: Option<(String, ScalarAttributeType)>,
    sort_key: Option<(String, ScalarAttributeType)>,
    indexes: Vec<IndexSpec>,
    naming: NamingConvention,
    fields: Vec<FieldSpec>,
    version: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl SchemaBuilder {
    /// Partition key field and type.
    #[must_use]
    pub fn partition_key(mut self, field: impl Into<String>, kind: ScalarAttributeType) -> Self {
        self.partition_key = Some((field.into(), kind));
        self
    }

    /// Sort key field and type.
    #[must_use]
    pub fn sort_key(mut self, field: impl Into<String>, kind: ScalarAttributeType) -> Self {
        self.sort_key = Some((field.into(), kind));
        self
    }

    /// Declare a secondary index.
    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Naming convention for fields without an explicit attribute name.
    #[must_use]
    pub fn naming(mut self, naming: NamingConvention) -> Self {
        self.naming = naming;
        self
    }

    /// Per-field options.
    #[must_use]
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Field holding the optimistic-lock version (an integer).
    #[must_use]
    pub fn version_field(mut self, field: impl Into<String>) -> Self {
        self.version = Some(field.into());
        self
    }

    /// Field holding the creation timestamp.
    #[must_use]
    pub fn created_at(mut self, field: impl Into<String>) -> Self {
        self.created_at = Some(field.into());
        self
    }

    /// Field holding the last-update timestamp.
    #[must_use]
    pub fn updated_at(mut self, field: impl Into<String>) -> Self {
        self.updated_at = Some(field.into());
        self
    }

    /// Resolve every name to its attribute name.
    #[must_use]
    pub fn build(self) -> Schema {
        let naming = self.naming;
        let mut fields = BTreeMap::new();
        let mut by_attribute = BTreeMap::new();
        for spec in self.fields {
            let attribute = spec
                .attribute
                .clone()
                .unwrap_or_else(|| naming.apply(&spec.name));
            by_attribute.insert(attribute, spec.name.clone());
            fields.insert(spec.name.clone(), spec);
        }

        let mut schema = Schema {
            table: self.table,
            partition_key: None,
            sort_key: None,
            indexes: Vec::new(),
            naming,
            fields,
            by_attribute,
            version: None,
            created_at: None,
            updated_at: None,
        };
        let resolve = |schema: &Schema, (field, kind): (String, ScalarAttributeType)| KeySpec {
            attribute: schema.attribute_name(&field),
            kind,
        };

        schema.partition_key = self.partition_key.map(|k| resolve(&schema, k));
        schema.sort_key = self.sort_key.map(|k| resolve(&schema, k));
        schema.version = self.version.map(|f| schema.attribute_name(&f));
        schema.created_at = self.created_at.map(|f| schema.attribute_name(&f));
        schema.updated_at = self.updated_at.map(|f| schema.attribute_name(&f));

        let mut indexes = Vec::with_capacity(self.indexes.len());
        for mut index in self.indexes {
            index.partition_key = match (index.kind, index.partition_field.clone()) {
                (IndexKind::Local, _) => schema.partition_key.clone(),
                (IndexKind::Global, Some(k)) => Some(resolve(&schema, k)),
                (IndexKind::Global, None) => None,
            };
            index.sort_key = index.sort_field.clone().map(|k| resolve(&schema, k));
            indexes.push(index);
        }
        schema.indexes = indexes;
        schema
    }
}

/// Per-client cache of built schemas, keyed by record type.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: DashMap<TypeId, Arc<Schema>>,
}

impl SchemaRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The schema of `T`, built and validated on first use.
    pub fn get<T: Record>(&self) -> Result<Arc<Schema>> {
        let id = TypeId::of::<T>();
        if let Some(schema) = self.schemas.get(&id) {
            return Ok(Arc::clone(schema.value()));
        }
        let entry = self.schemas.entry(id).or_try_insert_with(|| {
            let schema = T::schema();
            schema.validate()?;
            Ok::<_, Error>(Arc::new(schema))
        })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Number of cached schemas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns `true` if nothing has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct Order {
        customer_id: String,
        order_date: String,
    }

    impl Record for Order {
        fn schema() -> Schema {
            Schema::builder("orders")
                .naming(NamingConvention::CamelCase)
                .partition_key("customer_id", ScalarAttributeType::S)
                .sort_key("order_date", ScalarAttributeType::S)
                .field(FieldSpec::new("notes").attribute("n").omit_empty())
                .index(IndexSpec::local("by_total", "total", ScalarAttributeType::N))
                .build()
        }
    }

    #[test]
    fn test_should_apply_naming_conventions() {
        assert_eq!(NamingConvention::CamelCase.apply("created_at"), "createdAt");
        assert_eq!(NamingConvention::PascalCase.apply("created_at"), "CreatedAt");
        assert_eq!(NamingConvention::SnakeCase.apply("createdAt"), "created_at");
        assert_eq!(NamingConvention::AsIs.apply("createdAt"), "createdAt");
    }

    #[test]
    fn test_should_resolve_attribute_names() {
        let schema = Order::schema();
        assert_eq!(schema.partition_key().unwrap().attribute, "customerId");
        assert_eq!(schema.attribute_name("notes"), "n");
        assert_eq!(schema.attribute_name("n"), "n");
        assert_eq!(schema.field_name("orderDate"), "order_date");
        assert_eq!(schema.field_name("n"), "notes");
    }

    #[test]
    fn test_should_share_partition_key_with_local_index() {
        let schema = Order::schema();
        let (pk, sk) = schema.keys_for(Some("by_total")).unwrap();
        assert_eq!(pk.attribute, "customerId");
        assert_eq!(sk.unwrap().attribute, "total");
        assert!(schema.keys_for(Some("missing")).is_err());
    }

    #[test]
    fn test_should_only_omit_marked_empty_fields() {
        let schema = Order::schema();
        assert!(schema.omits("n", &Value::from("")));
        assert!(!schema.omits("n", &Value::from("x")));
        assert!(!schema.omits("orderDate", &Value::from("")));
    }

    #[test]
    fn test_should_extract_and_check_keys() {
        let schema = Order::schema();
        let item = Item::from([
            ("customerId".to_owned(), AttributeValue::S("c1".to_owned())),
            ("orderDate".to_owned(), AttributeValue::S("2024".to_owned())),
            ("total".to_owned(), AttributeValue::number(3)),
        ]);
        let key = schema.key_of(&item).unwrap();
        assert_eq!(key.len(), 2);
        schema.check_key(&key).unwrap();

        let bad = Key::from([("customerId".to_owned(), AttributeValue::number(1))]);
        assert!(schema.check_key(&bad).is_err());
    }

    #[test]
    fn test_should_cache_schema_per_type() {
        let registry = SchemaRegistry::new();
        let a = registry.get::<Order>().unwrap();
        let b = registry.get::<Order>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }
}
