use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, instrument};

use super::{
    dto::{AuthResponse, LoginRequest, PublicUser, RegisterRequest, UpdateUserRequest},
    services::AccountError,
};
use crate::{
    auth::extractors::{BearerToken, JsonBody},
    state::AppState,
};

impl AccountError {
    pub fn status(&self) -> StatusCode {
        match self {
            AccountError::Validation(_) => StatusCode::BAD_REQUEST,
            AccountError::DuplicateEmail => StatusCode::CONFLICT,
            AccountError::InvalidCredentials | AccountError::Unauthorized => StatusCode::UNAUTHORIZED,
            AccountError::NotFound => StatusCode::NOT_FOUND,
            AccountError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AccountError> for (StatusCode, String) {
    fn from(e: AccountError) -> Self {
        let status = e.status();
        match e {
            AccountError::Internal(e) => {
                error!(error = ?e, "account operation failed");
                (status, "Internal server error".into())
            }
            other => (status, other.to_string()),
        }
    }
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(register))
        .route("/users/login", post(login))
        .route("/users/me", get(get_me).put(update_me).delete(delete_me))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<PublicUser>>, (StatusCode, String)> {
    let users = state.accounts.list_users().await?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, [(HeaderName, String); 1], Json<PublicUser>), (StatusCode, String)> {
    let user = state
        .accounts
        .register(&payload.name, &payload.email, &payload.password)
        .await?;

    let location = format!("/api/users?id={}", user.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(user.into()),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let (token, user) = state.accounts.login(&payload.email, &payload.password).await?;
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

#[instrument(skip_all)]
pub async fn get_me(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<Json<PublicUser>, (StatusCode, String)> {
    let user = state.accounts.get_self(&token).await?;
    Ok(Json(user.into()))
}

#[instrument(skip_all)]
pub async fn update_me(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    JsonBody(payload): JsonBody<UpdateUserRequest>,
) -> Result<Json<PublicUser>, (StatusCode, String)> {
    let user = state.accounts.update_self(&token, payload.into()).await?;
    Ok(Json(user.into()))
}

#[instrument(skip_all)]
pub async fn delete_me(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<StatusCode, (StatusCode, String)> {
    state.accounts.delete_self(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}
