//! Exchanging a signed assertion for an installation access token
//!
//! The exchanger presents a freshly signed assertion to the authorization
//! endpoint and returns the issued token together with its expiry exactly as
//! reported by the authorization server. The expiry is authoritative data
//! from the response and is never computed from elapsed time on this side.
//!
//! A single attempt is made per invocation; retry policy belongs to the
//! caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assertion::{self, AppKey, SigningError};
use crate::{AccessToken, AppIdRef, InstallationIdRef};

/// The level of access granted to a permitted resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Read-only access
    Read,
    /// Read and write access
    Write,
}

/// Restrictions applied to an issued token
///
/// An unrestricted scope sends no body with the exchange request, yielding
/// the full set of permissions granted to the installation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenScope {
    /// Requested permissions, as a mapping of resource name to access level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<BTreeMap<String, AccessLevel>>,

    /// Repositories the token should be limited to, when the installation
    /// is repository-scoped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repositories: Option<Vec<String>>,
}

impl TokenScope {
    /// A scope placing no additional restriction on the issued token
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Whether this scope requests any restriction at all
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.permissions.is_none() && self.repositories.is_none()
    }
}

/// An access token as issued by the authorization endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    token: AccessToken,
    expires_at: String,
}

impl IssuedToken {
    /// Constructs an issued token from its parts
    pub fn new(token: AccessToken, expires_at: impl Into<String>) -> Self {
        Self {
            token,
            expires_at: expires_at.into(),
        }
    }

    /// The issued access token
    #[must_use]
    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    /// The token expiry, verbatim as returned by the authorization server
    #[must_use]
    pub fn expires_at(&self) -> &str {
        &self.expires_at
    }

    /// The value to place in an outbound `Authorization` header when using
    /// this token against resource endpoints
    #[must_use]
    pub fn authorization_header_value(&self) -> String {
        format!("Bearer {}", self.token.as_str())
    }

    /// The secret payload stored when this token is propagated into a
    /// credential record
    #[must_use]
    pub fn secret_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "accessToken": self.token.as_str(),
            "expiresAt": self.expires_at,
        })
    }
}

/// Exchanges signed assertions for installation access tokens
#[derive(Debug, Clone)]
pub struct TokenExchanger {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl TokenExchanger {
    /// Constructs a new exchanger against the given authorization endpoint
    pub fn new(client: reqwest::Client, base_url: reqwest::Url) -> Self {
        Self { client, base_url }
    }

    /// Signs an assertion for `app_id` and exchanges it for an installation
    /// access token
    ///
    /// The private key text is normalized before use; see
    /// [`AppKey::from_pem`].
    ///
    /// # Errors
    ///
    /// Returns a [`TokenExchangeError`] if the key is unusable, the request
    /// cannot be sent, or the endpoint responds with a status of 400 or
    /// above.
    #[tracing::instrument(
        err,
        skip(self, private_key_pem, scope),
        fields(app_id = %app_id, installation_id = %installation_id),
    )]
    pub async fn exchange(
        &self,
        app_id: &AppIdRef,
        installation_id: &InstallationIdRef,
        private_key_pem: &str,
        scope: &TokenScope,
    ) -> Result<IssuedToken, TokenExchangeError> {
        let key = AppKey::from_pem(private_key_pem)?;
        let bearer = assertion::sign_assertion(app_id, &key)?;

        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.base_url.as_str().trim_end_matches('/'),
            installation_id,
        );

        tracing::trace!("requesting installation access token");

        let mut req = self
            .client
            .post(&url)
            .bearer_auth(bearer.as_str())
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if !scope.is_unrestricted() {
            req = req.json(scope);
        }

        let resp = req.send().await.map_err(TokenExchangeError::RequestSend)?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received token response from authorization endpoint"
        );

        let status = resp.status();
        if status.as_u16() >= 400 {
            let body = resp.text().await.map_err(TokenExchangeError::BodyRead)?;
            return Err(TokenExchangeError::ErrorResponse {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await.map_err(TokenExchangeError::BodyRead)?;
        let resp: dto::AccessTokenResponse = serde_json::from_slice(&body)?;

        tracing::info!(expires_at = %resp.expires_at, "issued installation access token");

        Ok(IssuedToken {
            token: resp.token,
            expires_at: resp.expires_at,
        })
    }
}

mod dto {
    use serde::Deserialize;

    use crate::AccessToken;

    #[derive(Deserialize)]
    pub(super) struct AccessTokenResponse {
        pub token: AccessToken,
        pub expires_at: String,
    }
}

/// An error while exchanging an assertion for an access token
#[derive(Debug, Error)]
pub enum TokenExchangeError {
    /// The assertion could not be produced
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// The exchange request could not be sent
    #[error("error sending request to authorization endpoint")]
    RequestSend(#[source] reqwest::Error),

    /// The response body could not be read
    #[error("error reading response body from authorization endpoint")]
    BodyRead(#[source] reqwest::Error),

    /// The authorization endpoint rejected the exchange
    #[error("authorization endpoint returned status {status}: {body}")]
    ErrorResponse {
        /// The HTTP status code of the rejection
        status: u16,
        /// The response body, retained for diagnostics
        body: String,
    },

    /// The token response could not be deserialized
    #[error("error deserializing access token response")]
    Deserialize(#[from] serde_json::Error),
}
