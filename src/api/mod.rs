/// API routes and handlers
pub mod records;
pub mod verification;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(records::routes())
        .merge(verification::routes())
}
