/// DID resolution endpoint
use crate::{
    document::ResolutionMetadata,
    error::{RegistrarError, RegistrarResult},
    AppContext,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveParams {
    /// Hash of the last operation to fold
    pub version_id: Option<String>,
}

/// Resolution result: the W3C document and its metadata side by side
#[derive(Debug, Serialize)]
pub struct DidResolution {
    pub did: serde_json::Value,
    pub metadata: ResolutionMetadata,
}

pub async fn resolve_did(
    State(ctx): State<AppContext>,
    Path(did): Path<String>,
    Query(params): Query<ResolveParams>,
) -> RegistrarResult<Json<DidResolution>> {
    let resolved = ctx
        .registrar
        .resolve(&did, params.version_id.as_deref())?;
    let metadata = resolved.metadata.clone();

    let mut document = serde_json::to_value(&resolved)
        .map_err(|e| RegistrarError::Internal(format!("Failed to serialize document: {}", e)))?;
    if let Some(fields) = document.as_object_mut() {
        fields.remove("metadata");
    }

    Ok(Json(DidResolution {
        did: document,
        metadata,
    }))
}

/// Build resolver routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/dids/:did", get(resolve_did))
}
