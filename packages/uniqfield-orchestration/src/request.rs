//! Mutation request parsing and validation
//!
//! Requests arrive as loosely typed JSON
//! (`{change, collection, fieldName, document: {id, ...}}`) and are checked in
//! a fixed order before anything touches the store. Each check has its own
//! `InvalidArgument` message.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uniqfield_storage::{Document, ID_FIELD};

use crate::error::{Result, UniquenessError};
use crate::target::{is_valid_path, FieldTarget};

pub const MISSING_CHANGE: &str =
    "The function must be called with one argument \"change\" containing the type of change to execute.";
pub const INVALID_COLLECTION: &str =
    "The function must be called with one argument \"collection\" containing a valid collection.";
pub const INVALID_FIELD_NAME: &str =
    "The function must be called with one argument \"fieldName\" containing a valid field.";
pub const INVALID_CHANGE: &str = "The value of the argument \"change\" is not valid.";
pub const INVALID_DOCUMENT: &str =
    "The function must be called with one argument \"document\" containing an object with a non-empty string \"id\".";

/// Raw request body as received from the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequest {
    #[serde(default)]
    pub change: Option<Value>,
    #[serde(default)]
    pub collection: Option<Value>,
    #[serde(default)]
    pub field_name: Option<Value>,
    #[serde(default)]
    pub document: Option<Value>,
}

impl MutationRequest {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(UniquenessError::serialization)
    }

    /// Well-formed request builder.
    pub fn new(
        change: ChangeType,
        collection: &str,
        field_name: &str,
        document: Document,
    ) -> Self {
        Self {
            change: Some(Value::String(change.as_str().to_string())),
            collection: Some(Value::String(collection.to_string())),
            field_name: Some(Value::String(field_name.to_string())),
            document: Some(Value::Object(document.into_body())),
        }
    }

    pub fn validate(&self) -> Result<ValidatedMutation> {
        let change = non_empty_str(&self.change)
            .ok_or_else(|| UniquenessError::invalid_argument(MISSING_CHANGE))?;

        let collection = non_empty_str(&self.collection)
            .filter(|c| is_valid_path(c))
            .ok_or_else(|| UniquenessError::invalid_argument(INVALID_COLLECTION))?;

        let field_name = non_empty_str(&self.field_name)
            .filter(|f| is_valid_path(f))
            .ok_or_else(|| UniquenessError::invalid_argument(INVALID_FIELD_NAME))?;

        let change: ChangeType = change.parse()?;

        let document = match &self.document {
            Some(Value::Object(body)) => match body.get(ID_FIELD) {
                Some(Value::String(id)) if !id.is_empty() && !id.contains('/') => {
                    Document::from_body(id.clone(), body.clone())
                }
                _ => return Err(UniquenessError::invalid_argument(INVALID_DOCUMENT)),
            },
            _ => return Err(UniquenessError::invalid_argument(INVALID_DOCUMENT)),
        };

        // Both halves passed the path check; only the reserved field can fail here.
        let target = FieldTarget::new(collection, field_name)
            .map_err(|_| UniquenessError::invalid_argument(INVALID_FIELD_NAME))?;

        let mutation = match change {
            ChangeType::Create => Mutation::Create(document),
            ChangeType::Update => Mutation::Update(document),
            ChangeType::Delete => Mutation::Delete(document),
        };
        Ok(ValidatedMutation { target, mutation })
    }
}

fn non_empty_str(value: &Option<Value>) -> Option<&str> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "CREATE",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
        }
    }
}

impl FromStr for ChangeType {
    type Err = UniquenessError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATE" => Ok(ChangeType::Create),
            "UPDATE" => Ok(ChangeType::Update),
            "DELETE" => Ok(ChangeType::Delete),
            _ => Err(UniquenessError::invalid_argument(INVALID_CHANGE)),
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A mutation of one primary document.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create(Document),
    Update(Document),
    Delete(Document),
}

impl Mutation {
    pub fn change_type(&self) -> ChangeType {
        match self {
            Mutation::Create(_) => ChangeType::Create,
            Mutation::Update(_) => ChangeType::Update,
            Mutation::Delete(_) => ChangeType::Delete,
        }
    }

    pub fn document(&self) -> &Document {
        match self {
            Mutation::Create(doc) | Mutation::Update(doc) | Mutation::Delete(doc) => doc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedMutation {
    pub target: FieldTarget,
    pub mutation: Mutation,
}

/// Caller identity attached by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    pub uid: Option<String>,
}

impl CallContext {
    pub fn authenticated(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.uid.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResponse {
    pub message: String,
}
