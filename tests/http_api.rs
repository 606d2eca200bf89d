//! HTTP adapter driven through the router without a socket

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use did_registrar::{
    config::{
        LedgerConfig, LoggingConfig, PublicationConfig, RegistrarConfig, ServiceConfig,
        StorageConfig,
    },
    ledger::InMemoryLedger,
    server::build_router,
    store::OperationStore,
    AppContext,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app() -> Router {
    let config = RegistrarConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 8085,
            version: "test".to_string(),
        },
        storage: StorageConfig {
            data_directory: "./data".into(),
            journal_db: "./data/operations.sqlite".into(),
        },
        publication: PublicationConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            max_wait_secs: 5,
            ..PublicationConfig::default()
        },
        ledger: LedgerConfig {
            confirmation_delay_ms: 0,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            json: false,
        },
    };
    let ctx = AppContext::with_components(
        config,
        None,
        Arc::new(OperationStore::in_memory()),
        Arc::new(InMemoryLedger::new(Duration::ZERO)),
    );
    build_router(ctx)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn template() -> Value {
    json!({
        "documentTemplate": {
            "publicKeys": [{"id": "auth-1", "purpose": "AUTHENTICATION"}],
            "services": [{
                "id": "svc-1",
                "type": "LinkedDomains",
                "serviceEndpoint": ["https://svc-1.example.com"]
            }]
        }
    })
}

/// Create and publish through HTTP, returning the short form
async fn publish(app: &Router) -> String {
    let (status, created) = call(app, "POST", "/did-registrar/dids", Some(template())).await;
    assert_eq!(status, StatusCode::OK);
    let long_form = created["longFormDid"].as_str().unwrap().to_string();
    let did = created["shortFormDid"].as_str().unwrap().to_string();
    assert!(long_form.starts_with(&did));

    let (status, body) = call(
        app,
        "POST",
        &format!("/did-registrar/dids/{}/publications", long_form),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["scheduledOperation"]["didRef"], did.as_str());

    let id = body["scheduledOperation"]["id"].as_str().unwrap();
    let (status, op) = call(
        app,
        "GET",
        &format!("/did-registrar/operations/{}?waitSeconds=5", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(op["status"], "CONFIRMED");
    did
}

#[tokio::test]
async fn test_create_publish_resolve_over_http() {
    let app = app();
    let did = publish(&app).await;

    let (status, body) = call(&app, "GET", &format!("/dids/{}", did), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["did"]["id"], did.as_str());
    assert_eq!(body["did"]["authentication"][0]["uri"], format!("{}#auth-1", did));
    assert!(body["did"].get("metadata").is_none());
    assert_eq!(body["metadata"]["deactivated"], false);
    assert_eq!(body["metadata"]["canonicalId"], did.as_str());

    let (status, managed) = call(&app, "GET", &format!("/did-registrar/dids/{}", did), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(managed["status"], "PUBLISHED");
}

#[tokio::test]
async fn test_update_over_http() {
    let app = app();
    let did = publish(&app).await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/did-registrar/dids/{}/updates", did),
        Some(json!({
            "actions": [{
                "actionType": "ADD_SERVICE",
                "addService": {
                    "id": "svc-2",
                    "type": "LinkedDomains",
                    "serviceEndpoint": ["https://svc-2.example.com"]
                }
            }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let id = body["scheduledOperation"]["id"].as_str().unwrap();
    let (_, op) = call(
        &app,
        "GET",
        &format!("/did-registrar/operations/{}?waitSeconds=5", id),
        None,
    )
    .await;
    assert_eq!(op["status"], "CONFIRMED");

    let (_, body) = call(&app, "GET", &format!("/dids/{}", did), None).await;
    let services = body["did"]["service"].as_array().unwrap();
    assert_eq!(services.len(), 2);
}

#[tokio::test]
async fn test_error_mapping() {
    let app = app();

    let unknown = format!("did:prism:{}", "ab".repeat(32));
    let (status, body) = call(&app, "GET", &format!("/dids/{}", unknown), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
    assert_eq!(body["retryable"], false);

    let (status, body) = call(&app, "GET", "/dids/not-a-did", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ValidationError");

    // Update before publication
    let (_, created) = call(&app, "POST", "/did-registrar/dids", Some(template())).await;
    let did = created["shortFormDid"].as_str().unwrap();
    let (status, body) = call(
        &app,
        "POST",
        &format!("/did-registrar/dids/{}/updates", did),
        Some(json!({"actions": [{"actionType": "REMOVE_KEY", "removeKey": {"id": "auth-1"}}]})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Conflict");

    let (status, _) = call(&app, "GET", "/nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_action_is_unprocessable() {
    let app = app();
    let did = publish(&app).await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/did-registrar/dids/{}/updates", did),
        Some(json!({"actions": [{"actionType": "REMOVE_SERVICE", "removeService": {"id": "missing"}}]})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "InvalidActionSequence");
}

#[tokio::test]
async fn test_list_health_and_metrics() {
    let app = app();
    publish(&app).await;

    let (status, body) = call(&app, "GET", "/did-registrar/dids", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contents"].as_array().unwrap().len(), 1);

    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&app, "GET", "/health/detailed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
    assert!(text.contains("did_operations_built_total"));
}
