//! Signed application assertions
//!
//! An assertion is a short-lived RS256-signed statement of identity that is
//! exchanged for an installation access token; it is never presented to
//! resource endpoints directly. The issued-at claim is backdated to tolerate
//! clock skew between this host and the authorization endpoint, and the
//! expiry is kept safely under the common ten-minute ceiling.

use std::{fmt, sync::Arc};

use aliri_base64::Base64Url;
use aliri_clock::{Clock, System};
use openssl::rsa::Rsa;
use ring::signature::RsaKeyPair;
use serde::Serialize;
use thiserror::Error;

use crate::AppIdRef;

/// Clock-skew allowance subtracted from the issued-at claim
const ISSUED_AT_SKEW_SECS: u64 = 60;

/// Assertion validity from now, kept under the ten-minute ceiling
const VALIDITY_SECS: u64 = 540;

/// An application's RSA signing key
///
/// Key text is normalized before parsing: literal `\n` sequences (as often
/// produced when a PEM is stuffed into a single-line environment variable or
/// form field) become real newlines, and Windows line endings become Unix
/// line endings.
#[must_use]
pub struct AppKey {
    ring_key: Arc<RsaKeyPair>,
}

impl AppKey {
    /// Imports an RSA private key from PEM text
    ///
    /// # Errors
    ///
    /// Returns a [`SigningError`] if the key material is empty or is not a
    /// parseable RSA private key.
    pub fn from_pem(pem: &str) -> Result<Self, SigningError> {
        let pem = pem.replace("\\n", "\n").replace("\r\n", "\n");
        if pem.trim().is_empty() {
            return Err(SigningError::EmptyKey);
        }

        let rsa = Rsa::private_key_from_pem(pem.as_bytes())
            .map_err(|e| SigningError::KeyRejected(e.to_string()))?;
        let der = rsa
            .private_key_to_der()
            .map_err(|e| SigningError::KeyRejected(e.to_string()))?;
        let ring_key =
            Arc::new(RsaKeyPair::from_der(&der).map_err(|e| SigningError::KeyRejected(e.to_string()))?);

        Ok(Self { ring_key })
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SigningError> {
        let mut buf = vec![0; self.ring_key.public().modulus_len()];
        self.ring_key
            .sign(
                &ring::signature::RSA_PKCS1_SHA256,
                &ring::rand::SystemRandom::new(),
                data,
                &mut buf,
            )
            .map_err(|e| SigningError::Signing(e.to_string()))?;
        Ok(buf)
    }
}

impl fmt::Debug for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AppKey")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A signed, single-use identity assertion
///
/// Carries the compact serialization: three dot-separated URL-safe base64
/// segments without padding.
#[derive(Clone, PartialEq, Eq)]
#[must_use]
pub struct SignedAssertion(String);

impl SignedAssertion {
    /// The compact serialization of the assertion
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwraps the assertion into its compact serialization
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("***ASSERTION***")
    }
}

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    iat: u64,
    exp: u64,
}

/// Builds and signs an identity assertion for the given application
///
/// Timestamps come from the system clock; see
/// [`sign_assertion_with_clock`] for an injectable time source.
///
/// # Errors
///
/// Returns a [`SigningError`] if serialization of a segment fails or the
/// signing operation itself is rejected.
pub fn sign_assertion(app_id: &AppIdRef, key: &AppKey) -> Result<SignedAssertion, SigningError> {
    sign_assertion_with_clock(app_id, key, &System)
}

/// Builds and signs an identity assertion using the provided clock
///
/// The produced assertion is deterministic given identical timestamps.
///
/// # Errors
///
/// Returns a [`SigningError`] if serialization of a segment fails or the
/// signing operation itself is rejected.
pub fn sign_assertion_with_clock<C: Clock>(
    app_id: &AppIdRef,
    key: &AppKey,
    clock: &C,
) -> Result<SignedAssertion, SigningError> {
    use std::fmt::Write;

    let now = clock.now();
    let header = Header {
        alg: "RS256",
        typ: "JWT",
    };
    let claims = Claims {
        iss: app_id.as_str(),
        iat: now.0 - ISSUED_AT_SKEW_SECS,
        exp: now.0 + VALIDITY_SECS,
    };

    let h_raw = Base64Url::from_raw(serde_json::to_vec(&header)?);
    let c_raw = Base64Url::from_raw(serde_json::to_vec(&claims)?);

    let mut message = String::with_capacity(h_raw.encoded_len() + c_raw.encoded_len() + 2);
    write!(message, "{}.{}", h_raw, c_raw).expect("writes to strings never fail");

    let s_raw = Base64Url::from_raw(key.sign(message.as_bytes())?);
    write!(message, ".{}", s_raw).expect("writes to strings never fail");

    tracing::trace!(app_id = %app_id, iat = claims.iat, exp = claims.exp, "signed assertion");

    Ok(SignedAssertion(message))
}

/// An error while preparing or signing an assertion
#[derive(Debug, Error)]
pub enum SigningError {
    /// The supplied key material was empty
    #[error("key material is empty")]
    EmptyKey,

    /// The supplied key material could not be parsed as an RSA private key
    #[error("key material rejected: {0}")]
    KeyRejected(String),

    /// An assertion segment could not be serialized
    #[error("error serializing assertion segment")]
    Serialization(#[from] serde_json::Error),

    /// The signing operation failed
    #[error("signing operation failed: {0}")]
    Signing(String),
}
