//! Client for the external credential store
//!
//! Credential records live behind a small REST surface
//! (`/api/v1/credentials`), authenticated with a static API key. The update
//! route is optional infrastructure on some deployments: an HTTP 405 there
//! is an expected deployment variance and is reported as a first-class
//! result rather than an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reconcile::ValidationError;
use crate::{ApiKey, CredentialId, CredentialIdRef, CredentialName, CredentialNameRef};

/// The header carrying the static API key on store and registry requests
pub(crate) const API_KEY_HEADER: &str = "X-Api-Key";

/// Connection settings for a credential store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    base_url: reqwest::Url,
    api_key: ApiKey,
}

impl StoreConfig {
    /// Constructs store connection settings
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

    pub(crate) fn base_url(&self) -> &reqwest::Url {
        &self.base_url
    }

    pub(crate) fn api_key(&self) -> &ApiKey {
        &self.api_key
    }
}

/// A reference to an externally stored credential record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialReference {
    /// The record identifier
    pub id: CredentialId,
    /// The record's display name
    pub name: CredentialName,
    /// The credential type tag; updates never change it
    #[serde(rename = "type")]
    pub kind: String,
}

/// The inputs for creating a credential record
#[derive(Debug, Clone, Serialize)]
pub struct NewCredential {
    /// The display name of the new record
    pub name: CredentialName,
    /// The credential type tag
    #[serde(rename = "type")]
    pub kind: String,
    /// The secret payload
    pub data: serde_json::Value,
}

/// The result of a secret update attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretUpdate {
    /// The stored secret now carries the new value
    Updated,
    /// The deployment does not expose the update route; propagation into
    /// stored credentials is unsupported here
    MethodNotAllowed,
}

/// Read and write access to externally stored credential records
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Lists every credential record visible to the API key
    async fn list(&self) -> Result<Vec<CredentialReference>, ListError>;

    /// Fetches a single credential record by filtering the listing, `None`
    /// when it does not exist
    async fn get(&self, id: &CredentialIdRef) -> Result<Option<CredentialReference>, ListError> {
        let records = self.list().await?;
        Ok(records.into_iter().find(|r| r.id.as_str() == id.as_str()))
    }

    /// Creates a credential record holding `data`
    async fn create(&self, credential: NewCredential) -> Result<CredentialReference, CreateError>;

    /// Replaces the secret payload of the record identified by `id`,
    /// optionally refreshing its display name
    ///
    /// HTTP 405 from the host maps to [`SecretUpdate::MethodNotAllowed`];
    /// every other status of 400 or above is an [`UpdateError`].
    async fn update_secret(
        &self,
        id: &CredentialIdRef,
        data: &serde_json::Value,
        name: Option<&CredentialNameRef>,
    ) -> Result<SecretUpdate, UpdateError>;

    /// Lists credential records carrying the given type tag
    async fn list_by_type(&self, kind: &str) -> Result<Vec<CredentialReference>, ListError> {
        let mut records = self.list().await?;
        records.retain(|r| r.kind == kind);
        Ok(records)
    }
}

/// A credential store reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpCredentialStore {
    client: reqwest::Client,
    config: StoreConfig,
}

impl HttpCredentialStore {
    /// Constructs a store client from connection settings
    pub fn new(client: reqwest::Client, config: StoreConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url().as_str().trim_end_matches('/'),
            path
        )
    }
}

#[async_trait]
impl CredentialStore for HttpCredentialStore {
    #[tracing::instrument(err, skip(self))]
    async fn list(&self) -> Result<Vec<CredentialReference>, ListError> {
        let resp = self
            .client
            .get(self.url("api/v1/credentials"))
            .header(API_KEY_HEADER, self.config.api_key().as_str())
            .send()
            .await
            .map_err(ListError::RequestSend)?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.map_err(ListError::BodyRead)?;
            return Err(ListError::ErrorResponse { status, body });
        }

        let body = resp.bytes().await.map_err(ListError::BodyRead)?;
        let page: dto::CredentialList = serde_json::from_slice(&body)?;
        Ok(page.data)
    }

    #[tracing::instrument(err, skip(self, credential), fields(name = %credential.name, kind = %credential.kind))]
    async fn create(&self, credential: NewCredential) -> Result<CredentialReference, CreateError> {
        let resp = self
            .client
            .post(self.url("api/v1/credentials"))
            .header(API_KEY_HEADER, self.config.api_key().as_str())
            .json(&credential)
            .send()
            .await
            .map_err(CreateError::RequestSend)?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.map_err(CreateError::BodyRead)?;
            return Err(CreateError::ErrorResponse { status, body });
        }

        let body = resp.bytes().await.map_err(CreateError::BodyRead)?;
        let created: CredentialReference = serde_json::from_slice(&body)?;

        tracing::info!(credential = %created.id, "created credential record");

        Ok(created)
    }

    #[tracing::instrument(err, skip(self, data, name), fields(credential = %id))]
    async fn update_secret(
        &self,
        id: &CredentialIdRef,
        data: &serde_json::Value,
        name: Option<&CredentialNameRef>,
    ) -> Result<SecretUpdate, UpdateError> {
        let mut body = serde_json::Map::new();
        body.insert("data".to_owned(), data.clone());
        if let Some(name) = name {
            body.insert("name".to_owned(), name.as_str().into());
        }

        let resp = self
            .client
            .put(self.url(&format!("api/v1/credentials/{}", id)))
            .header(API_KEY_HEADER, self.config.api_key().as_str())
            .json(&serde_json::Value::Object(body))
            .send()
            .await
            .map_err(UpdateError::RequestSend)?;

        let status = resp.status().as_u16();
        if status == 405 {
            tracing::info!("credential update route not exposed by this deployment");
            return Ok(SecretUpdate::MethodNotAllowed);
        }
        if status >= 400 {
            let body = resp.text().await.map_err(UpdateError::BodyRead)?;
            return Err(UpdateError::ErrorResponse { status, body });
        }

        tracing::debug!("stored secret replaced");

        Ok(SecretUpdate::Updated)
    }
}

mod dto {
    use serde::Deserialize;

    use super::CredentialReference;

    #[derive(Deserialize)]
    pub(super) struct CredentialList {
        #[serde(default)]
        pub data: Vec<CredentialReference>,
    }
}

/// An error while listing or fetching credential records
#[derive(Debug, Error)]
pub enum ListError {
    /// The request could not be sent
    #[error("error sending request to credential store")]
    RequestSend(#[source] reqwest::Error),

    /// The response body could not be read
    #[error("error reading response body from credential store")]
    BodyRead(#[source] reqwest::Error),

    /// The store rejected the request
    #[error("credential store returned status {status}: {body}")]
    ErrorResponse {
        /// The HTTP status code of the rejection
        status: u16,
        /// The response body, retained for diagnostics
        body: String,
    },

    /// The response could not be deserialized
    #[error("error deserializing credential store response")]
    Deserialize(#[from] serde_json::Error),
}

/// An error while creating a credential record
#[derive(Debug, Error)]
pub enum CreateError {
    /// The request could not be sent
    #[error("error sending create request to credential store")]
    RequestSend(#[source] reqwest::Error),

    /// The response body could not be read
    #[error("error reading create response from credential store")]
    BodyRead(#[source] reqwest::Error),

    /// The store rejected the creation
    #[error("credential store rejected creation with status {status}: {body}")]
    ErrorResponse {
        /// The HTTP status code of the rejection
        status: u16,
        /// The response body, retained for diagnostics
        body: String,
    },

    /// The created record could not be deserialized
    #[error("error deserializing created credential record")]
    Deserialize(#[from] serde_json::Error),
}

/// An error while updating a stored secret
///
/// HTTP 405 is not an error; see [`SecretUpdate::MethodNotAllowed`].
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The request could not be sent
    #[error("error sending update request to credential store")]
    RequestSend(#[source] reqwest::Error),

    /// The response body could not be read
    #[error("error reading update response from credential store")]
    BodyRead(#[source] reqwest::Error),

    /// The store rejected the update
    #[error("credential store rejected update with status {status}: {body}")]
    ErrorResponse {
        /// The HTTP status code of the rejection
        status: u16,
        /// The response body, retained for diagnostics
        body: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> HttpCredentialStore {
        let config = StoreConfig::new(
            reqwest::Url::parse(&server.uri()).unwrap(),
            ApiKey::from_static("test-key"),
        )
        .unwrap();
        HttpCredentialStore::new(reqwest::Client::new(), config)
    }

    #[test]
    fn empty_api_key_is_rejected_before_any_call() {
        let err = StoreConfig::new(
            reqwest::Url::parse("http://localhost:1/").unwrap(),
            ApiKey::from_static("  "),
        )
        .unwrap_err();
        assert!(err.to_string().contains("apiKey"));
    }

    #[tokio::test]
    async fn update_secret_maps_success() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/credentials/cred-1"))
            .and(header("x-api-key", "test-key"))
            .and(body_json(serde_json::json!({
                "data": { "accessToken": "ghs_test" },
                "name": "fresh",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let name = CredentialName::from_static("fresh");
        let outcome = store(&server)
            .update_secret(
                &CredentialId::from_static("cred-1"),
                &serde_json::json!({ "accessToken": "ghs_test" }),
                Some(name.as_ref()),
            )
            .await
            .unwrap();

        assert_eq!(outcome, SecretUpdate::Updated);
    }

    #[tokio::test]
    async fn update_secret_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/credentials/cred-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(2)
            .mount(&server)
            .await;

        let client = store(&server);
        let data = serde_json::json!({ "accessToken": "ghs_test" });
        for _ in 0..2 {
            let outcome = client
                .update_secret(&CredentialId::from_static("cred-1"), &data, None)
                .await
                .unwrap();
            assert_eq!(outcome, SecretUpdate::Updated);
        }
    }

    #[tokio::test]
    async fn update_secret_treats_405_as_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/credentials/cred-1"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;

        let outcome = store(&server)
            .update_secret(
                &CredentialId::from_static("cred-1"),
                &serde_json::json!({}),
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome, SecretUpdate::MethodNotAllowed);
    }

    #[tokio::test]
    async fn update_secret_raises_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/credentials/cred-1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = store(&server)
            .update_secret(
                &CredentialId::from_static("cred-1"),
                &serde_json::json!({}),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UpdateError::ErrorResponse { status: 500, .. }
        ));
    }

    #[tokio::test]
    async fn create_posts_name_type_and_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/credentials"))
            .and(header("x-api-key", "test-key"))
            .and(body_json(serde_json::json!({
                "name": "github (rotated)",
                "type": "githubApi",
                "data": { "accessToken": "ghs_test" },
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "cred-9",
                "name": "github (rotated)",
                "type": "githubApi",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = store(&server)
            .create(NewCredential {
                name: CredentialName::from_static("github (rotated)"),
                kind: "githubApi".to_owned(),
                data: serde_json::json!({ "accessToken": "ghs_test" }),
            })
            .await
            .unwrap();

        assert_eq!(created.id.as_str(), "cred-9");
        assert_eq!(created.kind, "githubApi");
    }

    #[tokio::test]
    async fn create_raises_on_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/credentials"))
            .respond_with(ResponseTemplate::new(400).set_body_string("missing type"))
            .mount(&server)
            .await;

        let err = store(&server)
            .create(NewCredential {
                name: CredentialName::from_static("broken"),
                kind: String::new(),
                data: serde_json::json!({}),
            })
            .await
            .unwrap_err();

        match err {
            CreateError::ErrorResponse { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "missing type");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn list_by_type_filters_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "id": "a", "name": "github", "type": "githubApi" },
                    { "id": "b", "name": "slack", "type": "slackApi" },
                    { "id": "c", "name": "github 2", "type": "githubApi" },
                ],
            })))
            .mount(&server)
            .await;

        let matching = store(&server).list_by_type("githubApi").await.unwrap();
        let ids: Vec<&str> = matching.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn get_filters_the_listing_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "id": "a", "name": "github", "type": "githubApi" },
                    { "id": "b", "name": "slack", "type": "slackApi" },
                ],
            })))
            .mount(&server)
            .await;

        let client = store(&server);
        let found = client
            .get(&CredentialId::from_static("b"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.name.as_str(), "slack");

        let missing = client.get(&CredentialId::from_static("nope")).await.unwrap();
        assert!(missing.is_none());
    }
}
