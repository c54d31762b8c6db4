use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Every route here sits behind `auth_middleware`, and every handler also takes
/// `AuthUser` so ficha queries can be scoped to the caller.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // POST /auth/logout
        // Deletes the current session row.
        .route("/auth/logout", post(handlers::logout))
        // GET /me
        .route("/me", get(handlers::get_me))
        // GET/POST /fichas
        // Lists the caller's fichas (optional ?search=) or creates a new one.
        .route(
            "/fichas",
            get(handlers::list_fichas).post(handlers::create_ficha),
        )
        // GET/PUT/PATCH/DELETE /fichas/{id}
        // Owner-only; another user's ficha answers 404.
        .route(
            "/fichas/{id}",
            get(handlers::get_ficha)
                .put(handlers::replace_ficha)
                .patch(handlers::update_ficha)
                .delete(handlers::delete_ficha),
        )
        // GET /fichas/{id}/suggestion
        // Rule-table suggestions for the stored orthopedic test results.
        .route("/fichas/{id}/suggestion", get(handlers::get_ficha_suggestion))
}
