//! Client for the workflow document registry
//!
//! Workflow documents embed credential references inside their nodes, keyed
//! by credential type tag. Documents are fetched whole and written back
//! whole; every field this client does not model is captured and carried
//! through a read-modify-write round trip unchanged.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reconcile::ValidationError;
use crate::store::API_KEY_HEADER;
use crate::{ApiKey, CredentialId, WorkflowId, WorkflowIdRef};

/// Fixed page size for the paginated workflow listing
const PAGE_SIZE: usize = 250;

/// Connection settings for a workflow registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    base_url: reqwest::Url,
    api_key: ApiKey,
}

impl RegistryConfig {
    /// Constructs registry connection settings
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the API key is empty.
    pub fn new(base_url: reqwest::Url, api_key: ApiKey) -> Result<Self, ValidationError> {
        if api_key.as_str().trim().is_empty() {
            return Err(ValidationError::missing("apiKey"));
        }
        Ok(Self { base_url, api_key })
    }
}

/// A credential reference embedded in a workflow node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBinding {
    /// The identifier of the referenced credential record
    pub id: CredentialId,

    /// The display name of the referenced credential record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A single node within a workflow document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// The node's name within its workflow
    #[serde(default)]
    pub name: String,

    /// Credential references held by this node, keyed by credential type tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<BTreeMap<String, CredentialBinding>>,

    /// Every other node field, preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A workflow document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// The document identifier
    pub id: WorkflowId,

    /// The nodes embedded in this document
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<WorkflowNode>,

    /// Every other document field, preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Read and write access to workflow documents
#[async_trait]
pub trait WorkflowRegistry: Send + Sync {
    /// Lists every workflow document, paginating transparently
    async fn list_all(&self) -> Result<Vec<Workflow>, ListError>;

    /// Fetches a single workflow document
    async fn read(&self, id: &WorkflowIdRef) -> Result<Workflow, ReadError>;

    /// Replaces a workflow document in full
    async fn write(&self, workflow: &Workflow) -> Result<(), WriteError>;
}

/// A workflow registry reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpWorkflowRegistry {
    client: reqwest::Client,
    config: RegistryConfig,
}

impl HttpWorkflowRegistry {
    /// Constructs a registry client from connection settings
    pub fn new(client: reqwest::Client, config: RegistryConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.as_str().trim_end_matches('/'),
            path
        )
    }
}

#[async_trait]
impl WorkflowRegistry for HttpWorkflowRegistry {
    #[tracing::instrument(err, skip(self))]
    async fn list_all(&self) -> Result<Vec<Workflow>, ListError> {
        let mut all = Vec::new();
        let mut offset = 0usize;

        loop {
            let resp = self
                .client
                .get(self.url(&format!(
                    "api/v1/workflows?limit={}&offset={}",
                    PAGE_SIZE, offset
                )))
                .header(API_KEY_HEADER, self.config.api_key.as_str())
                .send()
                .await
                .map_err(ListError::RequestSend)?;

            let status = resp.status().as_u16();
            if status >= 400 {
                let body = resp.text().await.map_err(ListError::BodyRead)?;
                return Err(ListError::ErrorResponse { status, body });
            }

            let body = resp.bytes().await.map_err(ListError::BodyRead)?;
            let page: dto::WorkflowPage = serde_json::from_slice(&body)?;
            if page.data.is_empty() {
                break;
            }

            offset += page.data.len();
            all.extend(page.data);
        }

        tracing::debug!(workflows = all.len(), "listed workflow documents");

        Ok(all)
    }

    #[tracing::instrument(err, skip(self), fields(workflow = %id))]
    async fn read(&self, id: &WorkflowIdRef) -> Result<Workflow, ReadError> {
        let resp = self
            .client
            .get(self.url(&format!("api/v1/workflows/{}", id)))
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .send()
            .await
            .map_err(ReadError::RequestSend)?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.map_err(ReadError::BodyRead)?;
            return Err(ReadError::ErrorResponse { status, body });
        }

        let body = resp.bytes().await.map_err(ReadError::BodyRead)?;
        Ok(serde_json::from_slice(&body)?)
    }

    #[tracing::instrument(err, skip(self, workflow), fields(workflow = %workflow.id))]
    async fn write(&self, workflow: &Workflow) -> Result<(), WriteError> {
        let resp = self
            .client
            .put(self.url(&format!("api/v1/workflows/{}", workflow.id)))
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .json(workflow)
            .send()
            .await
            .map_err(WriteError::RequestSend)?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.map_err(WriteError::BodyRead)?;
            return Err(WriteError::ErrorResponse { status, body });
        }

        tracing::debug!("replaced workflow document");

        Ok(())
    }
}

mod dto {
    use serde::Deserialize;

    use super::Workflow;

    #[derive(Deserialize)]
    pub(super) struct WorkflowPage {
        #[serde(default)]
        pub data: Vec<Workflow>,
    }
}

/// An error while listing workflow documents
#[derive(Debug, Error)]
pub enum ListError {
    /// A page request could not be sent
    #[error("error sending list request to workflow registry")]
    RequestSend(#[source] reqwest::Error),

    /// A page response body could not be read
    #[error("error reading list response from workflow registry")]
    BodyRead(#[source] reqwest::Error),

    /// The registry rejected a page request
    #[error("workflow registry returned status {status}: {body}")]
    ErrorResponse {
        /// The HTTP status code of the rejection
        status: u16,
        /// The response body, retained for diagnostics
        body: String,
    },

    /// A page could not be deserialized
    #[error("error deserializing workflow listing")]
    Deserialize(#[from] serde_json::Error),
}

/// An error while fetching a workflow document
#[derive(Debug, Error)]
pub enum ReadError {
    /// The request could not be sent
    #[error("error sending read request to workflow registry")]
    RequestSend(#[source] reqwest::Error),

    /// The response body could not be read
    #[error("error reading workflow response body")]
    BodyRead(#[source] reqwest::Error),

    /// The registry rejected the request
    #[error("workflow registry returned status {status}: {body}")]
    ErrorResponse {
        /// The HTTP status code of the rejection
        status: u16,
        /// The response body, retained for diagnostics
        body: String,
    },

    /// The document could not be deserialized
    #[error("error deserializing workflow document")]
    Deserialize(#[from] serde_json::Error),
}

/// An error while replacing a workflow document
#[derive(Debug, Error)]
pub enum WriteError {
    /// The request could not be sent
    #[error("error sending write request to workflow registry")]
    RequestSend(#[source] reqwest::Error),

    /// The response body could not be read
    #[error("error reading write response body")]
    BodyRead(#[source] reqwest::Error),

    /// The registry rejected the replacement
    #[error("workflow registry rejected write with status {status}: {body}")]
    ErrorResponse {
        /// The HTTP status code of the rejection
        status: u16,
        /// The response body, retained for diagnostics
        body: String,
    },
}
