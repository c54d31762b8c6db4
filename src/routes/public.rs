use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints that need no session. Nothing here reads or writes a ficha.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { "ok" }))
        // POST /auth/register
        .route("/auth/register", post(handlers::register_user))
        // POST /auth/login
        // Exchanges username/password for a session token.
        .route("/auth/login", post(handlers::login))
        // POST /diagnosis/suggest
        // Evaluates unsaved orthopedic test values against the rule table.
        .route("/diagnosis/suggest", post(handlers::suggest_diagnosis))
}
