//! Uniqueness enforcer
//!
//! Keeps the index collection `<collection>-<fieldName>` in step with the
//! primary collection. Every index entry is a document whose id is the
//! normalized key of a constrained value and whose body names the owning
//! primary document: `{id: <primary id>, <fieldName>: <raw value>}`.
//!
//! # Write paths
//!
//! | Mutation | No key | Key |
//! |---|---|---|
//! | Create | plain set | transaction: check entry, set primary + entry |
//! | Update | plain merge (keys equal) | transaction: check new entry, drop old, merge primary, set new |
//! | Delete | plain delete | batch: delete primary + entry |
//!
//! `AlreadyExists` is raised only when a transaction finds the target entry
//! already present; nothing is written in that case. Storage failures pass
//! through untouched and are never retried here.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uniqfield_storage::{Document, DocumentStore, Fields, StorageError, Transaction, WriteBatch};

use crate::error::{Result, UniquenessError};
use crate::key::{IndexKey, KeyNormalizer, NonStringValue};
use crate::request::{Mutation, ValidatedMutation};
use crate::target::FieldTarget;

/// What a mutation did to the index collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Created { indexed: bool },
    Updated { reindexed: bool },
    Deleted { unindexed: bool },
}

/// Normalized key plus the raw value it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Claim {
    key: IndexKey,
    raw: String,
}

pub struct UniquenessEnforcer<S> {
    store: Arc<S>,
    normalizer: KeyNormalizer,
}

impl<S> Clone for UniquenessEnforcer<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            normalizer: self.normalizer,
        }
    }
}

impl<S: DocumentStore> UniquenessEnforcer<S> {
    pub fn new(store: Arc<S>, normalizer: KeyNormalizer) -> Self {
        Self { store, normalizer }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn normalizer(&self) -> KeyNormalizer {
        self.normalizer
    }

    pub async fn apply(&self, validated: ValidatedMutation) -> Result<MutationOutcome> {
        let ValidatedMutation { target, mutation } = validated;
        match mutation {
            Mutation::Create(doc) => self.create(&target, doc).await,
            Mutation::Update(doc) => self.update(&target, doc).await,
            Mutation::Delete(doc) => self.delete(&target, doc).await,
        }
    }

    pub async fn create(&self, target: &FieldTarget, doc: Document) -> Result<MutationOutcome> {
        let primary = target.primary_path(&doc.id)?;
        let Some(claim) = claim_of(&self.normalizer, target, doc.field(target.field_name()))?
        else {
            self.store.set(&primary, doc.into_body()).await?;
            info!("Document created without unique field: {}", primary);
            return Ok(MutationOutcome::Created { indexed: false });
        };

        let index = target.index_path(&claim.key)?;
        let entry = target.index_entry(&doc.id, &claim.raw);
        let body = doc.into_body();
        let log_path = primary.clone();

        self.store
            .run_transaction(move |txn: &mut Transaction<'_>| -> Result<()> {
                if txn.get(&index)?.is_some() {
                    return Err(UniquenessError::AlreadyExists);
                }
                txn.set(primary, body);
                txn.set(index, entry);
                Ok(())
            })
            .await?;

        info!("Document created with unique field: {}", log_path);
        Ok(MutationOutcome::Created { indexed: true })
    }

    pub async fn update(&self, target: &FieldTarget, doc: Document) -> Result<MutationOutcome> {
        let primary = target.primary_path(&doc.id)?;

        // A merge that leaves the constrained field alone cannot move the key.
        let Some(new_value) = doc.field(target.field_name()) else {
            self.store.update(&primary, doc.into_body()).await?;
            info!("Document updated without unique field: {}", primary);
            return Ok(MutationOutcome::Updated { reindexed: false });
        };
        let new_claim = claim_of(&self.normalizer, target, Some(new_value))?;

        let stored = self
            .store
            .get(&primary)
            .await?
            .ok_or_else(|| StorageError::not_found(&primary))?;
        let previous = stored_key(&self.normalizer, target, &stored);

        if previous.as_ref() == new_claim.as_ref().map(|c| &c.key) {
            self.store.update(&primary, doc.into_body()).await?;
            info!("Document updated without unique field: {}", primary);
            return Ok(MutationOutcome::Updated { reindexed: false });
        }

        let normalizer = self.normalizer;
        let txn_target = target.clone();
        let primary_id = doc.id.clone();
        let body = doc.into_body();
        let log_path = primary.clone();

        let reindexed = self
            .store
            .run_transaction(move |txn: &mut Transaction<'_>| -> Result<bool> {
                // Re-read so the entry we drop matches committed state.
                let current = txn
                    .get(&primary)?
                    .ok_or_else(|| StorageError::not_found(&primary))?;
                let previous = stored_key(&normalizer, &txn_target, &current);
                let new_key = new_claim.as_ref().map(|c| &c.key);

                if previous.as_ref() == new_key {
                    txn.update(primary, body);
                    return Ok(false);
                }

                let new_index = match &new_claim {
                    Some(claim) => {
                        let path = txn_target.index_path(&claim.key)?;
                        if txn.get(&path)?.is_some() {
                            return Err(UniquenessError::AlreadyExists);
                        }
                        Some((path, txn_target.index_entry(&primary_id, &claim.raw)))
                    }
                    None => None,
                };

                if let Some(previous) = previous {
                    txn.delete(txn_target.index_path(&previous)?);
                }
                txn.update(primary, body);
                if let Some((path, entry)) = new_index {
                    txn.set(path, entry);
                }
                Ok(true)
            })
            .await?;

        if reindexed {
            info!("Document updated with unique field: {}", log_path);
        } else {
            debug!("Unique field of {} settled before commit", log_path);
        }
        Ok(MutationOutcome::Updated { reindexed })
    }

    /// Removes the primary document and, when the supplied document carries
    /// a constrained value, its index entry. The key comes from `doc`; the
    /// stored primary is not consulted.
    pub async fn delete(&self, target: &FieldTarget, doc: Document) -> Result<MutationOutcome> {
        let primary = target.primary_path(&doc.id)?;
        let Some(claim) = claim_of(&self.normalizer, target, doc.field(target.field_name()))?
        else {
            self.store.delete(&primary).await?;
            info!("Document deleted without unique field: {}", primary);
            return Ok(MutationOutcome::Deleted { unindexed: false });
        };

        let mut batch = WriteBatch::new();
        batch
            .delete(primary.clone())
            .delete(target.index_path(&claim.key)?);
        self.store.commit_batch(batch).await?;

        info!("Document deleted with unique field: {}", primary);
        Ok(MutationOutcome::Deleted { unindexed: true })
    }
}

fn claim_of(
    normalizer: &KeyNormalizer,
    target: &FieldTarget,
    value: Option<&Value>,
) -> Result<Option<Claim>> {
    let key = normalizer.normalize_value(value).map_err(|NonStringValue(found)| {
        UniquenessError::invalid_argument(format!(
            "The field \"{}\" must contain a string, got {}",
            target.field_name(),
            found
        ))
    })?;
    Ok(key.map(|key| Claim {
        key,
        raw: value.and_then(Value::as_str).unwrap_or_default().to_string(),
    }))
}

/// Key held by a stored primary body. Values that can never have been
/// indexed (non-strings) count as no key.
fn stored_key(normalizer: &KeyNormalizer, target: &FieldTarget, body: &Fields) -> Option<IndexKey> {
    match normalizer.normalize_value(body.get(target.field_name())) {
        Ok(key) => key,
        Err(NonStringValue(found)) => {
            warn!(
                "Stored field \"{}\" holds a non-string value {}; treating it as empty",
                target.field_name(),
                found
            );
            None
        }
    }
}
