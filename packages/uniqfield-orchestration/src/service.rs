//! Callable mutation endpoint
//!
//! Authenticates and validates a raw [`MutationRequest`], then hands the
//! mutation to the [`UniquenessEnforcer`].

use std::sync::Arc;
use tracing::{info, warn};
use uniqfield_storage::DocumentStore;

use crate::config::ExtensionConfig;
use crate::enforcer::{MutationOutcome, UniquenessEnforcer};
use crate::error::{Result, UniquenessError};
use crate::request::{CallContext, MutationRequest, MutationResponse};

pub const SUCCESS_MESSAGE: &str = "Document written with unique field";

pub struct FieldUniquenessService<S> {
    enforcer: UniquenessEnforcer<S>,
    require_auth: bool,
}

impl<S: DocumentStore> FieldUniquenessService<S> {
    pub fn new(enforcer: UniquenessEnforcer<S>, require_auth: bool) -> Self {
        Self {
            enforcer,
            require_auth,
        }
    }

    pub fn from_config(config: &ExtensionConfig, store: Arc<S>) -> Self {
        Self::new(
            UniquenessEnforcer::new(store, config.normalizer()),
            config.require_auth,
        )
    }

    pub fn enforcer(&self) -> &UniquenessEnforcer<S> {
        &self.enforcer
    }

    pub async fn handle(
        &self,
        request: &MutationRequest,
        ctx: &CallContext,
    ) -> Result<MutationResponse> {
        self.handle_outcome(request, ctx)
            .await
            .map(|_| MutationResponse {
                message: SUCCESS_MESSAGE.to_string(),
            })
    }

    /// Same as [`handle`](Self::handle), returning what was written.
    pub async fn handle_outcome(
        &self,
        request: &MutationRequest,
        ctx: &CallContext,
    ) -> Result<MutationOutcome> {
        if self.require_auth && !ctx.is_authenticated() {
            return Err(UniquenessError::Unauthenticated);
        }
        let validated = request.validate()?;

        let change = validated.mutation.change_type();
        let path = format!(
            "{}/{}",
            validated.target.collection(),
            validated.mutation.document().id
        );
        info!("Started execution of field uniqueness: {} {}", change, path);

        match self.enforcer.apply(validated).await {
            Ok(outcome) => {
                info!("Completed execution of field uniqueness: {} {}", change, path);
                Ok(outcome)
            }
            Err(e) => {
                warn!(code = e.code(), "{} {} failed: {}", change, path, e);
                Err(e)
            }
        }
    }
}
