//! Propagation of a freshly issued token into its consumers
//!
//! Two operating modes are supported. Direct mode replaces the secret held
//! by a single stored credential record. Rewire mode creates a new
//! credential record and repoints every workflow document referencing an old
//! record at the new one, reporting exactly how many documents were written.
//!
//! Processing is strictly sequential: one request at a time, documents in
//! listing order. A write failure mid-rewire aborts the scan and reports the
//! number of documents already rewired; documents written before the fault
//! stay rewired.

use serde::Serialize;
use thiserror::Error;

use crate::exchange::IssuedToken;
use crate::registry::{self, WorkflowRegistry};
use crate::store::{CreateError, CredentialStore, NewCredential, SecretUpdate, UpdateError};
use crate::{AccessToken, CredentialId, CredentialName, WorkflowId};

/// What to do with a freshly issued token beyond handing it to the caller
#[derive(Debug, Clone)]
pub enum PropagationMode {
    /// Hand the token back without touching any consumer
    None,

    /// Replace the secret held by a single stored credential record
    Direct(DirectTarget),

    /// Create a new credential record and repoint every document
    /// referencing the old record at it
    Rewire(RewireSpec),
}

/// The target of a direct secret update
#[derive(Debug, Clone)]
pub struct DirectTarget {
    /// The identifier of the credential record to update
    pub credential_id: CredentialId,

    /// An optional display name to set alongside the secret
    pub name: Option<CredentialName>,
}

/// The inputs for a bulk rewire
#[derive(Debug, Clone)]
pub struct RewireSpec {
    /// The credential identifier that documents currently reference
    pub old_credential_id: CredentialId,

    /// The display name for the replacement credential record
    pub new_credential_name: CredentialName,

    /// The secret payload stored in the replacement record
    pub new_secret: serde_json::Value,

    /// The credential type tag, used both for the new record and as the
    /// key under which node references are matched
    pub reference_type_key: String,
}

/// A single node-level change performed during a rewire
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRewire {
    /// The document holding the changed node
    pub workflow_id: WorkflowId,

    /// The name of the changed node
    pub node: String,
}

/// The outcome of a reconciliation invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ReconciliationOutcome {
    /// No propagation was requested
    Skipped,

    /// The consumer(s) now carry the fresh credential
    #[serde(rename_all = "camelCase")]
    Updated {
        /// The credential record that was updated, or the newly created
        /// record for a rewire
        credential_id: CredentialId,

        /// For a rewire, the number of documents written
        #[serde(skip_serializing_if = "Option::is_none")]
        documents_updated: Option<u64>,

        /// For a rewire, the node-level changes performed
        #[serde(skip_serializing_if = "Vec::is_empty")]
        changes: Vec<NodeRewire>,
    },

    /// The deployment does not support propagation into stored credentials
    #[serde(rename_all = "camelCase")]
    Unsupported {
        /// The credential record that could not be updated
        credential_id: CredentialId,
    },
}

/// The structured record handed to the caller after issuance and
/// reconciliation
///
/// Serializes with camelCase fields (`githubToken`,
/// `githubTokenExpiresAt`, `outcome`, ...) for downstream consumption.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenHandoff {
    /// The issued access token
    pub github_token: AccessToken,

    /// The token expiry, verbatim from the authorization server
    pub github_token_expires_at: String,

    /// What reconciliation did
    #[serde(flatten)]
    pub outcome: ReconciliationOutcome,
}

impl TokenHandoff {
    /// The value to place in an outbound `Authorization` header
    #[must_use]
    pub fn authorization_header_value(&self) -> String {
        format!("Bearer {}", self.github_token.as_str())
    }
}

/// A required input was missing before any network call was made
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing required input: {field}")]
pub struct ValidationError {
    field: &'static str,
}

impl ValidationError {
    pub(crate) fn missing(field: &'static str) -> Self {
        Self { field }
    }

    /// The name of the missing input
    #[must_use]
    pub fn field(&self) -> &'static str {
        self.field
    }
}

/// An error during a direct secret update
#[derive(Debug, Error)]
pub enum DirectError {
    /// A required input was missing; nothing was attempted
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The store rejected the update with a fatal status
    #[error(transparent)]
    Update(#[from] UpdateError),
}

/// An error during a bulk rewire
#[derive(Debug, Error)]
pub enum RewireError {
    /// A required input was missing; nothing was attempted
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The replacement credential could not be created; no document was
    /// touched
    #[error(transparent)]
    Create(#[from] CreateError),

    /// The document listing failed
    #[error(transparent)]
    List(#[from] registry::ListError),

    /// A document re-read failed after `documents_updated` documents had
    /// already been rewired; those documents stay rewired
    #[error("document read failed after {documents_updated} documents were rewired")]
    Read {
        /// The number of documents successfully written before the fault
        documents_updated: u64,
        /// The underlying read failure
        #[source]
        source: registry::ReadError,
    },

    /// A document write failed after `documents_updated` documents had
    /// already been rewired; those documents stay rewired
    #[error("document write failed after {documents_updated} documents were rewired")]
    Write {
        /// The number of documents successfully written before the fault
        documents_updated: u64,
        /// The underlying write failure
        #[source]
        source: registry::WriteError,
    },
}

/// An error during reconciliation, in either mode
#[derive(Debug, Error)]
pub enum PropagationError {
    /// Direct mode failed
    #[error(transparent)]
    Direct(#[from] DirectError),

    /// Rewire mode failed
    #[error(transparent)]
    Rewire(#[from] RewireError),
}

/// Replaces the secret of a single stored credential record with the
/// freshly issued token
///
/// An HTTP 405 from the store is not a failure: it means this deployment
/// does not expose the update route, reported as
/// [`ReconciliationOutcome::Unsupported`].
///
/// # Errors
///
/// Returns a [`DirectError`] if the target credential identifier is empty
/// or the store rejects the update with any fatal status.
#[tracing::instrument(err, skip(store, token))]
pub async fn update_one<S>(
    store: &S,
    target: &DirectTarget,
    token: &IssuedToken,
) -> Result<ReconciliationOutcome, DirectError>
where
    S: CredentialStore + ?Sized,
{
    if target.credential_id.as_str().trim().is_empty() {
        return Err(ValidationError::missing("credentialId").into());
    }

    let credential_id = target.credential_id.clone();
    let outcome = store
        .update_secret(
            &credential_id,
            &token.secret_payload(),
            target.name.as_deref(),
        )
        .await?;

    match outcome {
        SecretUpdate::Updated => {
            tracing::info!(credential = %credential_id, "stored secret now carries the fresh token");
            Ok(ReconciliationOutcome::Updated {
                credential_id,
                documents_updated: None,
                changes: Vec::new(),
            })
        }
        SecretUpdate::MethodNotAllowed => {
            tracing::info!(credential = %credential_id, "propagation unsupported by this deployment");
            Ok(ReconciliationOutcome::Unsupported { credential_id })
        }
    }
}

/// Creates a replacement credential record and repoints every document
/// referencing the old record at it
///
/// The replacement record is created before any document is scanned; if
/// creation fails, no document is touched. Documents carrying a matching
/// reference in the listing are re-fetched one at a time and rewritten from
/// that fresh representation, never from the listing snapshot. Only nodes
/// whose reference under the type key exactly equals the old identifier are
/// rewritten, and only documents with at least one such node at read time
/// are written back.
///
/// # Errors
///
/// Returns a [`RewireError`]. A write failure carries the number of
/// documents already rewired; there is no rollback of those documents or of
/// the created record.
#[tracing::instrument(
    err,
    skip(registry, store, spec),
    fields(old_credential = %spec.old_credential_id, type_key = %spec.reference_type_key),
)]
pub async fn rewire<R, S>(
    registry: &R,
    store: &S,
    spec: &RewireSpec,
) -> Result<ReconciliationOutcome, RewireError>
where
    R: WorkflowRegistry + ?Sized,
    S: CredentialStore + ?Sized,
{
    if spec.old_credential_id.as_str().trim().is_empty() {
        return Err(ValidationError::missing("oldCredentialId").into());
    }
    if spec.new_credential_name.as_str().trim().is_empty() {
        return Err(ValidationError::missing("newCredentialName").into());
    }

    let created = store
        .create(NewCredential {
            name: spec.new_credential_name.clone(),
            kind: spec.reference_type_key.clone(),
            data: spec.new_secret.clone(),
        })
        .await?;

    tracing::info!(new_credential = %created.id, "created replacement credential record");

    let workflows = registry.list_all().await?;

    let mut documents_updated = 0u64;
    let mut changes = Vec::new();

    for listed in workflows {
        let listed_match = listed.nodes.iter().any(|node| {
            node.credentials
                .as_ref()
                .and_then(|c| c.get(&spec.reference_type_key))
                .map_or(false, |binding| binding.id == spec.old_credential_id)
        });
        if !listed_match {
            continue;
        }

        let mut workflow = registry
            .read(&listed.id)
            .await
            .map_err(|source| RewireError::Read {
                documents_updated,
                source,
            })?;

        let mut rewired_nodes = Vec::new();

        for node in &mut workflow.nodes {
            let binding = node
                .credentials
                .as_mut()
                .and_then(|c| c.get_mut(&spec.reference_type_key));
            if let Some(binding) = binding {
                if binding.id == spec.old_credential_id {
                    binding.id = created.id.clone();
                    binding.name = Some(created.name.to_string());
                    rewired_nodes.push(NodeRewire {
                        workflow_id: workflow.id.clone(),
                        node: node.name.clone(),
                    });
                }
            }
        }

        // The reference may have moved between the listing and the read.
        if rewired_nodes.is_empty() {
            continue;
        }

        registry
            .write(&workflow)
            .await
            .map_err(|source| RewireError::Write {
                documents_updated,
                source,
            })?;

        documents_updated += 1;
        tracing::debug!(
            workflow = %workflow.id,
            nodes = rewired_nodes.len(),
            "rewired workflow credential references"
        );
        changes.append(&mut rewired_nodes);
    }

    tracing::info!(documents_updated, "rewire complete");

    Ok(ReconciliationOutcome::Updated {
        credential_id: created.id,
        documents_updated: Some(documents_updated),
        changes,
    })
}

/// Runs the requested propagation and packages the result for the caller
///
/// # Errors
///
/// Returns a [`PropagationError`] from whichever mode ran. Mode
/// [`PropagationMode::None`] cannot fail and performs no network calls.
pub async fn propagate<S, R>(
    store: &S,
    registry: &R,
    token: IssuedToken,
    mode: PropagationMode,
) -> Result<TokenHandoff, PropagationError>
where
    S: CredentialStore + ?Sized,
    R: WorkflowRegistry + ?Sized,
{
    let outcome = match &mode {
        PropagationMode::None => ReconciliationOutcome::Skipped,
        PropagationMode::Direct(target) => update_one(store, target, &token).await?,
        PropagationMode::Rewire(spec) => rewire(registry, store, spec).await?,
    };

    Ok(TokenHandoff {
        github_token: token.token().clone(),
        github_token_expires_at: token.expires_at().to_owned(),
        outcome,
    })
}
