use aliri_braid::braid;
use std::fmt;

macro_rules! concealed {
    ($ty:ty: $hidden:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("***", $hidden, "***"))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("***", $hidden, "***"))
            }
        }
    };
}

/// The identifier of the application on whose behalf assertions are signed
#[braid(serde)]
pub struct AppId;

/// The identifier of the installation under which access tokens are issued
#[braid(serde)]
pub struct InstallationId;

/// A static API key used to authenticate against the credential store and
/// document registry APIs
#[braid(serde, debug = "owned", display = "owned")]
pub struct ApiKey;

concealed!(ApiKeyRef: "API KEY");

/// A short-lived installation access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

concealed!(AccessTokenRef: "ACCESS TOKEN");

/// The identifier of an externally stored credential record
#[braid(serde)]
pub struct CredentialId;

/// The display name of an externally stored credential record
#[braid(serde)]
pub struct CredentialName;

/// The identifier of a workflow document in the registry
#[braid(serde)]
pub struct WorkflowId;
