/// Record and public key endpoints
use crate::{
    context::AppContext,
    error::{DirError, DirResult},
    store::{Record, RecordStore, ReferrerStore},
    verification::codec,
};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Build record routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/v1/records", post(push_record))
        .route("/api/v1/records/:cid", get(pull_record))
        .route("/api/v1/records/:cid/public-keys", post(attach_public_key))
}

/// Response from pushing a record
#[derive(Debug, Serialize, Deserialize)]
pub struct PushRecordResponse {
    pub cid: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub name: String,
}

/// Request to attach a signing public key
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachPublicKeyRequest {
    /// PEM or standard base64
    pub public_key: String,
}

/// Response from attaching a public key
#[derive(Debug, Serialize, Deserialize)]
pub struct AttachPublicKeyResponse {
    pub cid: String,
}

/// Store a record. Pushing the same record twice returns the same CID.
pub async fn push_record(
    State(ctx): State<AppContext>,
    Json(data): Json<serde_json::Value>,
) -> DirResult<Json<PushRecordResponse>> {
    if !data.is_object() {
        return Err(DirError::Validation(
            "Record must be a JSON object".to_string(),
        ));
    }

    let record = ctx.store.push(data).await?;
    tracing::info!(cid = %record.cid, name = %record.name, "Record stored");

    Ok(Json(PushRecordResponse {
        cid: record.cid,
        name: record.name,
    }))
}

/// Fetch a record by CID
pub async fn pull_record(
    State(ctx): State<AppContext>,
    Path(cid): Path<String>,
) -> DirResult<Json<Record>> {
    let record = ctx
        .store
        .pull(&cid)
        .await?
        .ok_or_else(|| DirError::NotFound(format!("Record not found: {}", cid)))?;

    Ok(Json(record))
}

/// Attach a signing public key to a record
pub async fn attach_public_key(
    State(ctx): State<AppContext>,
    Path(cid): Path<String>,
    Json(req): Json<AttachPublicKeyRequest>,
) -> DirResult<Json<AttachPublicKeyResponse>> {
    let referrer = codec::encode_public_key(&req.public_key)?;
    ctx.store.push_referrer(&cid, &referrer).await?;

    tracing::info!(cid = %cid, key_cid = %referrer.cid, "Public key attached");

    Ok(Json(AttachPublicKeyResponse { cid: referrer.cid }))
}
