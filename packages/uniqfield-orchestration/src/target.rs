//! Constrained collection/field pair and the paths derived from it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use uniqfield_storage::{DocPath, Fields, ID_FIELD};

use crate::error::Result;
use crate::key::IndexKey;

/// Shape accepted for collection paths and field names.
static PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^/]+(/[^/]+/[^/]+)*$").expect("path pattern is a valid regex")
});

/// Field set on an index entry found to be claimed by another document.
pub const DUPLICATE_FIELD: &str = "duplicate";

pub fn is_valid_path(path: &str) -> bool {
    PATH_PATTERN.is_match(path)
}

/// Which half of a target was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidTarget {
    Collection,
    FieldName,
}

/// Primary collection and the field whose values must be unique in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTarget {
    collection: String,
    field_name: String,
}

impl FieldTarget {
    pub fn new(
        collection: impl Into<String>,
        field_name: impl Into<String>,
    ) -> std::result::Result<Self, InvalidTarget> {
        let collection = collection.into();
        let field_name = field_name.into();

        if !is_valid_path(&collection) {
            return Err(InvalidTarget::Collection);
        }
        // `id` is mirrored into every stored body.
        if !is_valid_path(&field_name) || field_name == ID_FIELD {
            return Err(InvalidTarget::FieldName);
        }
        Ok(Self {
            collection,
            field_name,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// `<collection>-<fieldName>`
    pub fn index_collection(&self) -> String {
        index_collection_name(&self.collection, &self.field_name)
    }

    pub fn primary_path(&self, id: &str) -> Result<DocPath> {
        Ok(DocPath::new(self.collection.clone(), id)?)
    }

    pub fn index_path(&self, key: &IndexKey) -> Result<DocPath> {
        Ok(DocPath::new(self.index_collection(), key.as_str())?)
    }

    /// Body of the index entry claiming `raw_value` for `primary_id`.
    pub fn index_entry(&self, primary_id: &str, raw_value: &str) -> Fields {
        let mut entry = Fields::new();
        entry.insert(ID_FIELD.to_string(), Value::String(primary_id.to_string()));
        entry.insert(
            self.field_name.clone(),
            Value::String(raw_value.to_string()),
        );
        entry
    }

    pub fn duplicate_marker() -> Fields {
        let mut fields = Fields::new();
        fields.insert(DUPLICATE_FIELD.to_string(), Value::Bool(true));
        fields
    }
}

fn index_collection_name(collection: &str, field_name: &str) -> String {
    format!("{}-{}", collection, field_name)
}
