use crate::{
    AppState,
    auth::{self, AuthUser},
    diagnosis::{self, SuggestRequest, SuggestionResponse},
    error::AppError,
    models::{
        Ficha, FichaPayload, LoginRequest, LoginResponse, RegisterRequest, UpdateFichaRequest,
        UserProfile,
    },
    password,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

// --- Filter Structs ---

/// FichaFilter
///
/// Query parameters of `GET /fichas`.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct FichaFilter {
    /// Case-insensitive substring match on the patient's name.
    pub search: Option<String>,
}

fn with_derived(ficha: Ficha) -> Ficha {
    ficha.with_derived(Utc::now().date_naive())
}

// --- Auth Handlers ---

/// register_user
///
/// [Public Route] Creates a user account. The password is hashed with argon2 on the
/// blocking pool before it reaches the repository.
///
/// *Validation*: the username is trimmed first, then checked against the 3..=64 bound.
/// Registration does not open a session; the client logs in afterwards.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = UserProfile),
        (status = 409, description = "Username taken"),
        (status = 422, description = "Invalid username or password")
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserProfile>), AppError> {
    // 1. Trim, then validate the stored form
    let payload = RegisterRequest {
        username: payload.username.trim().to_string(),
        password: payload.password,
    };
    payload.validate()?;

    // 2. Hash off the async runtime
    let plain = payload.password;
    let hash = tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(|e| AppError::Internal(e.to_string()))?;

    // 3. Persist; a taken username surfaces as 409 from the repository
    let user = state.repo.create_user(&payload.username, &hash).await?;
    tracing::info!(user_id = %user.id, "user registered");

    Ok((StatusCode::CREATED, Json(user.into())))
}

/// login
///
/// [Public Route] Verifies credentials, opens a session row and returns a signed token
/// for it. Unknown usernames and wrong passwords are indistinguishable (401).
///
/// Expired sessions are purged opportunistically here; a purge failure is logged and
/// does not block the login.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session opened", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    // 1. Credential check
    let user = state
        .repo
        .get_user_by_username(payload.username.trim())
        .await?
        .ok_or(AppError::Unauthorized)?;

    let plain = payload.password;
    let hash = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || password::verify_password(&plain, &hash))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if !valid {
        tracing::info!(user_id = %user.id, "login rejected: wrong password");
        return Err(AppError::Unauthorized);
    }

    // 2. Housekeeping
    if let Err(e) = state.repo.delete_expired_sessions().await {
        tracing::warn!("expired session cleanup failed: {}", e);
    }

    // 3. Session row + token
    let expires_at = auth::session_expiry(&state.config, Utc::now());
    let session = state.repo.create_session(user.id, expires_at).await?;
    let token = auth::issue_token(&state.config, &session)?;

    tracing::info!(user_id = %user.id, session_id = %session.id, "session opened");

    Ok(Json(LoginResponse {
        token,
        expires_at: session.expires_at,
        user: user.into(),
    }))
}

/// logout
///
/// [Authenticated Route] Deletes the caller's session row, revoking its token.
/// Requests authenticated through the local `x-user-id` bypass have no session and
/// get 204 without side effects.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Session closed"))
)]
pub async fn logout(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    if let Some(session_id) = auth_user.session_id {
        state.repo.delete_session(session_id).await?;
        tracing::info!(user_id = %auth_user.id, session_id = %session_id, "session closed");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// get_me
///
/// [Authenticated Route] The caller's public profile.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Profile", body = UserProfile))
)]
pub async fn get_me(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UserProfile>, AppError> {
    let user = state.repo.get_user(id).await?.ok_or(AppError::Unauthorized)?;
    Ok(Json(user.into()))
}

// --- Ficha Handlers ---

/// list_fichas
///
/// [Authenticated Route] The caller's fichas, most recently updated first.
///
/// *Authorization*: the repository filters on the `user_id` resolved by `AuthUser`,
/// so other users' records never appear. `search` is a literal, case-insensitive
/// substring of `patient_name`; a blank term lists everything.
#[utoipa::path(
    get,
    path = "/fichas",
    params(FichaFilter),
    responses((status = 200, description = "My fichas", body = [Ficha]))
)]
pub async fn list_fichas(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    Query(filter): Query<FichaFilter>,
) -> Result<Json<Vec<Ficha>>, AppError> {
    let fichas = state.repo.list_fichas(id, filter.search).await?;
    Ok(Json(fichas.into_iter().map(with_derived).collect()))
}

/// create_ficha
///
/// [Authenticated Route] Stores a new ficha owned by the caller.
///
/// The body is validated (name, vital-sign ranges, muscle grades) before any write;
/// the response carries the derived `bmi` and `age_years`.
#[utoipa::path(
    post,
    path = "/fichas",
    request_body = FichaPayload,
    responses(
        (status = 201, description = "Created", body = Ficha),
        (status = 422, description = "Validation failed")
    )
)]
pub async fn create_ficha(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<FichaPayload>,
) -> Result<(StatusCode, Json<Ficha>), AppError> {
    payload.validate()?;
    let ficha = state.repo.create_ficha(payload, id).await?;
    tracing::info!(ficha_id = %ficha.id, user_id = %id, "ficha created");
    Ok((StatusCode::CREATED, Json(with_derived(ficha))))
}

/// get_ficha
///
/// [Authenticated Route] A single ficha. Records owned by other users are reported as 404.
#[utoipa::path(
    get,
    path = "/fichas/{id}",
    params(("id" = Uuid, Path, description = "Ficha ID")),
    responses(
        (status = 200, description = "Found", body = Ficha),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_ficha(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ficha>, AppError> {
    match state.repo.get_ficha(id, user_id).await? {
        Some(ficha) => Ok(Json(with_derived(ficha))),
        None => Err(AppError::NotFound),
    }
}

/// replace_ficha
///
/// [Authenticated Route] Full update: fields missing from the body are cleared.
///
/// *Authorization*: enforces the **Owner-Only** check in the repository layer; a foreign
/// or missing id affects no row and maps to 404.
#[utoipa::path(
    put,
    path = "/fichas/{id}",
    params(("id" = Uuid, Path, description = "Ficha ID")),
    request_body = FichaPayload,
    responses(
        (status = 200, description = "Replaced", body = Ficha),
        (status = 404, description = "Not found")
    )
)]
pub async fn replace_ficha(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FichaPayload>,
) -> Result<Json<Ficha>, AppError> {
    payload.validate()?;
    match state.repo.replace_ficha(id, user_id, payload).await? {
        Some(ficha) => Ok(Json(with_derived(ficha))),
        None => Err(AppError::NotFound),
    }
}

/// update_ficha
///
/// [Authenticated Route] Partial update: only fields present in the body change.
///
/// JSON documents (`dynamic_records`, `orthopedic_tests`) are replaced as a whole when
/// present. A field cannot be cleared through PATCH; use PUT for that.
#[utoipa::path(
    patch,
    path = "/fichas/{id}",
    params(("id" = Uuid, Path, description = "Ficha ID")),
    request_body = UpdateFichaRequest,
    responses(
        (status = 200, description = "Updated", body = Ficha),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_ficha(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateFichaRequest>,
) -> Result<Json<Ficha>, AppError> {
    patch.validate()?;
    match state.repo.update_ficha(id, user_id, patch).await? {
        Some(ficha) => Ok(Json(with_derived(ficha))),
        None => Err(AppError::NotFound),
    }
}

/// delete_ficha
///
/// [Authenticated Route] Hard delete. 404 when missing or owned by someone else.
#[utoipa::path(
    delete,
    path = "/fichas/{id}",
    params(("id" = Uuid, Path, description = "Ficha ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_ficha(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.repo.delete_ficha(id, user_id).await? {
        tracing::info!(ficha_id = %id, user_id = %user_id, "ficha deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

// --- Diagnosis Handlers ---

/// get_ficha_suggestion
///
/// [Authenticated Route] Runs the stored orthopedic test results of a ficha through the
/// rule table.
#[utoipa::path(
    get,
    path = "/fichas/{id}/suggestion",
    params(("id" = Uuid, Path, description = "Ficha ID")),
    responses(
        (status = 200, description = "Suggestions", body = SuggestionResponse),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_ficha_suggestion(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuggestionResponse>, AppError> {
    let ficha = state
        .repo
        .get_ficha(id, user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(diagnosis::suggest(&ficha.orthopedic_tests)))
}

/// suggest_diagnosis
///
/// [Public Route] Stateless evaluation of unsaved form values.
#[utoipa::path(
    post,
    path = "/diagnosis/suggest",
    request_body = SuggestRequest,
    responses((status = 200, description = "Suggestions", body = SuggestionResponse))
)]
pub async fn suggest_diagnosis(Json(payload): Json<SuggestRequest>) -> Json<SuggestionResponse> {
    Json(diagnosis::suggest(&payload.orthopedic_tests))
}
