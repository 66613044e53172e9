//! Extension configuration
//!
//! Loaded once per process, either from environment variables or from a
//! YAML file, then injected into the service and the backfill orchestrator.
//!
//! | Env var | Field |
//! |---|---|
//! | `LOCATION` | `location` |
//! | `REQUIRE_AUTH` | `require_auth` (`yes` enables) |
//! | `HASH_FIELD` | `hash_field` (`yes` enables) |
//! | `BACKFILL_COLLECTION` | `backfill_collection` |
//! | `BACKFILL_FIELD_NAME` | `backfill_field_name` |
//! | `BULK_WRITER_MAX_IN_FLIGHT` | `bulk_max_in_flight` |

use serde::{Deserialize, Serialize};
use std::path::Path;
use uniqfield_storage::DEFAULT_MAX_IN_FLIGHT;

use crate::error::{Result, UniquenessError};
use crate::key::KeyNormalizer;
use crate::target::{FieldTarget, InvalidTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtensionConfig {
    /// Deployment location (informational)
    pub location: String,
    /// Reject mutation requests that carry no identity
    pub require_auth: bool,
    /// Hash constrained values before using them as index keys
    pub hash_field: bool,
    pub backfill_collection: Option<String>,
    pub backfill_field_name: Option<String>,
    /// Concurrent index writes per backfill page
    pub bulk_max_in_flight: usize,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            require_auth: false,
            hash_field: false,
            backfill_collection: None,
            backfill_field_name: None,
            bulk_max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl ExtensionConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source (env, test maps).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let flag = |name: &str| lookup(name).map(|v| v.trim() == "yes").unwrap_or(false);

        let bulk_max_in_flight = match non_empty("BULK_WRITER_MAX_IN_FLIGHT") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
                UniquenessError::config(format!(
                    "BULK_WRITER_MAX_IN_FLIGHT must be a positive integer, got '{}': {}",
                    raw, e
                ))
            })?,
            None => DEFAULT_MAX_IN_FLIGHT,
        };

        let config = Self {
            location: lookup("LOCATION").unwrap_or_default(),
            require_auth: flag("REQUIRE_AUTH"),
            hash_field: flag("HASH_FIELD"),
            backfill_collection: non_empty("BACKFILL_COLLECTION"),
            backfill_field_name: non_empty("BACKFILL_FIELD_NAME"),
            bulk_max_in_flight,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(UniquenessError::config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            UniquenessError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bulk_max_in_flight == 0 {
            return Err(UniquenessError::config(
                "bulk_max_in_flight must be at least 1",
            ));
        }
        if let (Some(collection), Some(field)) = (self.backfill_collection_name(), self.backfill_field())
        {
            FieldTarget::new(collection, field).map_err(|invalid| match invalid {
                InvalidTarget::Collection => UniquenessError::config(format!(
                    "Invalid backfill collection: '{}'",
                    collection
                )),
                InvalidTarget::FieldName => UniquenessError::config(format!(
                    "Invalid backfill field name: '{}'",
                    field
                )),
            })?;
        }
        Ok(())
    }

    fn backfill_collection_name(&self) -> Option<&str> {
        self.backfill_collection
            .as_deref()
            .filter(|c| !c.is_empty())
    }

    fn backfill_field(&self) -> Option<&str> {
        self.backfill_field_name.as_deref().filter(|f| !f.is_empty())
    }

    /// Collection/field to backfill; `None` unless both are configured.
    pub fn backfill_target(&self) -> Option<FieldTarget> {
        let collection = self.backfill_collection_name()?;
        let field = self.backfill_field()?;
        FieldTarget::new(collection, field).ok()
    }

    pub fn normalizer(&self) -> KeyNormalizer {
        KeyNormalizer::new(self.hash_field)
    }
}
