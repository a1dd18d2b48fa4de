//! End-to-end issuance and propagation against a mock host
//!
//! Drives the full flow the way a plugin host would: exchange an assertion
//! for an installation token, then reconcile that token into the host's
//! credential store and workflow documents.

use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tokenward::exchange::{AccessLevel, TokenExchanger, TokenScope};
use tokenward::reconcile::{
    propagate, DirectTarget, PropagationMode, ReconciliationOutcome, RewireSpec,
};
use tokenward::registry::{HttpWorkflowRegistry, RegistryConfig};
use tokenward::store::{HttpCredentialStore, StoreConfig};
use tokenward::{ApiKey, AppId, CredentialId, CredentialName, InstallationId};

const TEST_PEM: &str = include_str!("data/test_app_key.pem");

fn exchanger(server: &MockServer) -> TokenExchanger {
    TokenExchanger::new(
        reqwest::Client::new(),
        reqwest::Url::parse(&server.uri()).unwrap(),
    )
}

fn store(server: &MockServer) -> HttpCredentialStore {
    HttpCredentialStore::new(
        reqwest::Client::new(),
        StoreConfig::new(
            reqwest::Url::parse(&server.uri()).unwrap(),
            ApiKey::from_static("host-key"),
        )
        .unwrap(),
    )
}

fn registry(server: &MockServer) -> HttpWorkflowRegistry {
    HttpWorkflowRegistry::new(
        reqwest::Client::new(),
        RegistryConfig::new(
            reqwest::Url::parse(&server.uri()).unwrap(),
            ApiKey::from_static("host-key"),
        )
        .unwrap(),
    )
}

async fn mount_exchange(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/app/installations/456/access_tokens"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "token": "ghs_test",
            "expires_at": "2025-11-07T10:10:00Z",
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn token_is_issued_and_rewired_across_documents() {
    let server = MockServer::start().await;
    mount_exchange(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/credentials"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "cred-new",
            "name": "github (rotated)",
            "type": "githubApi",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let w1 = serde_json::json!({
        "id": "w1",
        "active": true,
        "nodes": [
            {
                "name": "fetch",
                "type": "httpRequest",
                "parameters": { "url": "https://example.com" },
                "credentials": { "githubApi": { "id": "cred-old", "name": "github" } },
            },
            { "name": "start", "type": "trigger" },
        ],
    });

    Mock::given(method("GET"))
        .and(path("/api/v1/workflows"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                w1.clone(),
                {
                    "id": "w2",
                    "nodes": [
                        {
                            "name": "notify",
                            "credentials": { "slackApi": { "id": "slack-1", "name": "slack" } },
                        },
                    ],
                },
            ],
        })))
        .mount(&server)
        .await;

    // only the matched document is re-fetched before being rewritten
    Mock::given(method("GET"))
        .and(path("/api/v1/workflows/w1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(w1))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/workflows"))
        .and(query_param("offset", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })),
        )
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/workflows/w1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    // The key arrives flattened, as a form field would deliver it.
    let flattened_pem = TEST_PEM.replace('\n', "\\n");
    let token = exchanger(&server)
        .exchange(
            &AppId::from_static("123"),
            &InstallationId::from_static("456"),
            &flattened_pem,
            &TokenScope::unrestricted(),
        )
        .await
        .unwrap();

    let secret = token.secret_payload();
    let handoff = propagate(
        &store(&server),
        &registry(&server),
        token,
        PropagationMode::Rewire(RewireSpec {
            old_credential_id: CredentialId::from_static("cred-old"),
            new_credential_name: CredentialName::from_static("github (rotated)"),
            new_secret: secret,
            reference_type_key: "githubApi".to_owned(),
        }),
    )
    .await
    .unwrap();

    match &handoff.outcome {
        ReconciliationOutcome::Updated {
            credential_id,
            documents_updated,
            changes,
        } => {
            assert_eq!(credential_id.as_str(), "cred-new");
            assert_eq!(*documents_updated, Some(1));
            assert_eq!(changes.len(), 1);
            assert_eq!(changes[0].node, "fetch");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let rendered = serde_json::to_value(&handoff).unwrap();
    assert_eq!(rendered["githubToken"], "ghs_test");
    assert_eq!(rendered["githubTokenExpiresAt"], "2025-11-07T10:10:00Z");

    // Inspect the written document: only the matching binding changed.
    let requests = server.received_requests().await.unwrap();
    let writes: Vec<_> = requests
        .iter()
        .filter(|r| r.method.to_string() == "PUT")
        .collect();
    assert_eq!(writes.len(), 1);
    let written: serde_json::Value = serde_json::from_slice(&writes[0].body).unwrap();
    assert_eq!(written["id"], "w1");
    assert_eq!(written["active"], true);
    assert_eq!(
        written["nodes"][0]["credentials"]["githubApi"],
        serde_json::json!({ "id": "cred-new", "name": "github (rotated)" })
    );
    assert_eq!(
        written["nodes"][0]["parameters"],
        serde_json::json!({ "url": "https://example.com" })
    );
    assert_eq!(written["nodes"][1]["name"], "start");
}

#[tokio::test]
async fn token_is_issued_and_stored_directly() {
    let server = MockServer::start().await;
    mount_exchange(&server).await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/credentials/cred-17"))
        .and(body_json(serde_json::json!({
            "data": {
                "accessToken": "ghs_test",
                "expiresAt": "2025-11-07T10:10:00Z",
            },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let token = exchanger(&server)
        .exchange(
            &AppId::from_static("123"),
            &InstallationId::from_static("456"),
            TEST_PEM,
            &TokenScope::unrestricted(),
        )
        .await
        .unwrap();

    let handoff = propagate(
        &store(&server),
        &registry(&server),
        token,
        PropagationMode::Direct(DirectTarget {
            credential_id: CredentialId::from_static("cred-17"),
            name: None,
        }),
    )
    .await
    .unwrap();

    assert_eq!(
        handoff.outcome,
        ReconciliationOutcome::Updated {
            credential_id: CredentialId::from_static("cred-17"),
            documents_updated: None,
            changes: Vec::new(),
        }
    );
    assert_eq!(handoff.authorization_header_value(), "Bearer ghs_test");
}

#[tokio::test]
async fn scoped_exchange_sends_the_restriction_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app/installations/456/access_tokens"))
        .and(body_json(serde_json::json!({
            "permissions": { "contents": "write" },
            "repositories": ["octocat/hello-world"],
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "token": "ghs_scoped",
            "expires_at": "2025-11-07T10:10:00Z",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut permissions = std::collections::BTreeMap::new();
    permissions.insert("contents".to_owned(), AccessLevel::Write);
    let token = exchanger(&server)
        .exchange(
            &AppId::from_static("123"),
            &InstallationId::from_static("456"),
            TEST_PEM,
            &TokenScope {
                permissions: Some(permissions),
                repositories: Some(vec!["octocat/hello-world".to_owned()]),
            },
        )
        .await
        .unwrap();

    assert_eq!(token.token().as_str(), "ghs_scoped");
}
