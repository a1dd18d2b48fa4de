//! Issuance and propagation of short-lived application access tokens
//!
//! A GitHub App authenticates by signing a short-lived identity assertion
//! with its private key and exchanging it, per installation, for a
//! time-boxed access token. That token expires quickly, so any stored
//! credential or workflow document that carries it goes stale just as
//! quickly. This crate mints the token and, on request, reconciles it into
//! those consumers: either by replacing the secret of a single stored
//! credential record, or by creating a fresh credential record and
//! repointing every workflow document that references an old one.
//!
//! Token refresh is caller-triggered per invocation; there is no background
//! renewal here. Propagation is sequential and reports exact progress, so a
//! partial failure always tells you how many documents were already
//! rewired.
//!
//! # General flow
//!
//! ```no_run
//! use tokenward::exchange::{TokenExchanger, TokenScope};
//! use tokenward::reconcile::{self, PropagationMode, RewireSpec};
//! use tokenward::registry::{HttpWorkflowRegistry, RegistryConfig};
//! use tokenward::store::{HttpCredentialStore, StoreConfig};
//! use tokenward::{ApiKey, AppId, CredentialId, CredentialName, InstallationId};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = reqwest::Client::new();
//!
//! let exchanger = TokenExchanger::new(
//!     client.clone(),
//!     reqwest::Url::parse("https://api.github.com")?,
//! );
//! let token = exchanger
//!     .exchange(
//!         &AppId::from_static("123"),
//!         &InstallationId::from_static("456"),
//!         std::fs::read_to_string("app-key.pem")?.as_str(),
//!         &TokenScope::unrestricted(),
//!     )
//!     .await?;
//!
//! let host = reqwest::Url::parse("https://automation.internal")?;
//! let api_key = ApiKey::from_static("...");
//! let store = HttpCredentialStore::new(
//!     client.clone(),
//!     StoreConfig::new(host.clone(), api_key.clone())?,
//! );
//! let registry = HttpWorkflowRegistry::new(
//!     client,
//!     RegistryConfig::new(host, api_key)?,
//! );
//!
//! let secret = token.secret_payload();
//! let handoff = reconcile::propagate(
//!     &store,
//!     &registry,
//!     token,
//!     PropagationMode::Rewire(RewireSpec {
//!         old_credential_id: CredentialId::from_static("cred-17"),
//!         new_credential_name: CredentialName::from_static("github (rotated)"),
//!         new_secret: secret,
//!         reference_type_key: "githubApi".to_owned(),
//!     }),
//! )
//! .await?;
//!
//! tracing::info!(
//!     handoff = format_args!("{:?}", handoff),
//!     "token issued and propagated"
//! );
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod assertion;
mod braids;
pub mod exchange;
pub mod reconcile;
pub mod registry;
pub mod store;

pub use braids::*;
pub use exchange::{AccessLevel, IssuedToken, TokenExchanger, TokenScope};
pub use reconcile::{
    propagate, PropagationMode, ReconciliationOutcome, TokenHandoff, ValidationError,
};
