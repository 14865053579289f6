/// Name verification endpoints
use crate::{
    context::AppContext,
    error::{DirError, DirResult},
    verification::{DomainVerification, DomainVerificationResponse},
};
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build verification routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/v1/verification/verify", post(verify_domain))
        .route("/api/v1/verification/check", get(check_domain_verification))
        .route("/api/v1/verification/agents", get(list_verified_agents))
}

#[derive(Debug, Deserialize)]
pub struct RecordRef {
    pub cid: String,
}

#[derive(Debug, Deserialize)]
pub struct ListVerifiedAgentsParams {
    pub domain: String,
}

fn require_cid(cid: &str) -> DirResult<&str> {
    let cid = cid.trim();
    if cid.is_empty() {
        return Err(DirError::Validation("cid is required".to_string()));
    }
    Ok(cid)
}

/// Verify that a record's name belongs to the domain that signed it
///
/// Verification failures are a normal response with `verified: false`.
pub async fn verify_domain(
    State(ctx): State<AppContext>,
    Json(req): Json<RecordRef>,
) -> DirResult<Json<DomainVerificationResponse>> {
    let cid = require_cid(&req.cid)?;
    Ok(Json(ctx.controller.verify_domain(cid).await?))
}

/// Report the stored verification without any network I/O
pub async fn check_domain_verification(
    State(ctx): State<AppContext>,
    Query(params): Query<RecordRef>,
) -> DirResult<Json<DomainVerificationResponse>> {
    let cid = require_cid(&params.cid)?;
    Ok(Json(ctx.controller.check_domain_verification(cid).await?))
}

pub async fn list_verified_agents(
    State(ctx): State<AppContext>,
    Query(params): Query<ListVerifiedAgentsParams>,
) -> DirResult<Json<Vec<DomainVerification>>> {
    Ok(Json(ctx.controller.list_verified_agents(&params.domain).await?))
}
