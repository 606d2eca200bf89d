/// Registrar API endpoints
/// Create, publish, update and deactivate managed DIDs, and poll scheduled operations
use crate::{
    error::RegistrarResult,
    registrar::{CreatedDid, DocumentTemplate, ManagedDid, UpdateActionRequest},
    scheduler::ScheduledOperation,
    AppContext,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDidRequest {
    #[serde(default)]
    pub document_template: DocumentTemplate,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDidRequest {
    pub actions: Vec<UpdateActionRequest>,
}

/// Reference to a scheduled operation, returned with 202 Accepted
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledOperationRef {
    pub id: Uuid,
    pub did_ref: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledOperationResponse {
    pub scheduled_operation: ScheduledOperationRef,
}

impl From<ScheduledOperation> for ScheduledOperationResponse {
    fn from(op: ScheduledOperation) -> Self {
        Self {
            scheduled_operation: ScheduledOperationRef {
                id: op.id,
                did_ref: op.did_ref,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ManagedDidList {
    pub contents: Vec<ManagedDid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitParams {
    pub wait_seconds: Option<u64>,
}

type Accepted = (StatusCode, Json<ScheduledOperationResponse>);

fn accepted(op: ScheduledOperation) -> Accepted {
    (StatusCode::ACCEPTED, Json(op.into()))
}

/// Create a managed DID; nothing is sent to the ledger
pub async fn create_did(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateDidRequest>,
) -> RegistrarResult<Json<CreatedDid>> {
    let created = ctx.registrar.create(req.document_template)?;
    Ok(Json(created))
}

pub async fn list_dids(State(ctx): State<AppContext>) -> Json<ManagedDidList> {
    Json(ManagedDidList {
        contents: ctx.registrar.list_managed_dids(),
    })
}

pub async fn get_did(
    State(ctx): State<AppContext>,
    Path(did): Path<String>,
) -> RegistrarResult<Json<ManagedDid>> {
    Ok(Json(ctx.registrar.managed_did(&did)?))
}

pub async fn publish_did(
    State(ctx): State<AppContext>,
    Path(did): Path<String>,
) -> RegistrarResult<Accepted> {
    let op = ctx.registrar.publish(&did).await?;
    Ok(accepted(op))
}

pub async fn update_did(
    State(ctx): State<AppContext>,
    Path(did): Path<String>,
    Json(req): Json<UpdateDidRequest>,
) -> RegistrarResult<Accepted> {
    let op = ctx.registrar.submit_update(&did, req.actions).await?;
    Ok(accepted(op))
}

pub async fn deactivate_did(
    State(ctx): State<AppContext>,
    Path(did): Path<String>,
) -> RegistrarResult<Accepted> {
    let op = ctx.registrar.deactivate(&did).await?;
    Ok(accepted(op))
}

/// Scheduled operation status, optionally long-polling until it is terminal
pub async fn get_operation(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    Query(params): Query<WaitParams>,
) -> RegistrarResult<Json<ScheduledOperation>> {
    let op = match params.wait_seconds {
        Some(secs) if secs > 0 => {
            ctx.registrar
                .wait_for_operation(&id, Duration::from_secs(secs))
                .await?
        }
        _ => ctx.registrar.scheduled_operation(&id)?,
    };
    Ok(Json(op))
}

/// Build registrar routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/did-registrar/dids", post(create_did).get(list_dids))
        .route("/did-registrar/dids/:did", get(get_did))
        .route("/did-registrar/dids/:did/publications", post(publish_did))
        .route("/did-registrar/dids/:did/updates", post(update_did))
        .route("/did-registrar/dids/:did/deactivations", post(deactivate_did))
        .route("/did-registrar/operations/:id", get(get_operation))
}
