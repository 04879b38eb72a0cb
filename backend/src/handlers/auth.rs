use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    error::AppError,
    middleware::AuthIdentity,
    models::{
        wire::{
            AccountView, AuthResponse, ChangePasswordRequest, LoginRequest, LogoutRequest,
            MessageResponse, RefreshRequest, RegisterRequest, TokenResponse,
        },
        ClientMeta,
    },
    services::{AuthOutcome, SessionTokens},
    state::AppState,
};

type HandlerResult<T> = Result<T, AppError>;

pub async fn register(
    State(state): State<AppState>,
    meta: ClientMeta,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> HandlerResult<(StatusCode, Json<AuthResponse>)> {
    let payload = payload(body)?;
    payload.validate()?;

    let outcome = state
        .auth
        .register(&payload.email, &payload.password, meta)
        .await?;
    Ok((StatusCode::CREATED, Json(auth_response(outcome))))
}

pub async fn login(
    State(state): State<AppState>,
    meta: ClientMeta,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> HandlerResult<Json<AuthResponse>> {
    let payload = payload(body)?;
    payload.validate()?;

    let outcome = state
        .auth
        .login(&payload.email, &payload.password, meta)
        .await?;
    Ok(Json(auth_response(outcome)))
}

pub async fn refresh(
    State(state): State<AppState>,
    meta: ClientMeta,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> HandlerResult<Json<TokenResponse>> {
    let payload = payload(body)?;
    payload.validate()?;

    let tokens = state.auth.refresh(&payload.refresh_token, meta).await?;
    Ok(Json(token_response(tokens)))
}

/// Always 200: the client must be able to drop its credentials even if the
/// body is unusable or the store is down.
pub async fn logout(
    State(state): State<AppState>,
    body: Result<Json<LogoutRequest>, JsonRejection>,
) -> Json<MessageResponse> {
    let token = body.ok().and_then(|Json(payload)| payload.refresh_token);
    state.auth.logout(token.as_deref()).await;
    Json(MessageResponse::new("Logged out"))
}

pub async fn profile(
    State(state): State<AppState>,
    identity: AuthIdentity,
) -> HandlerResult<Json<AccountView>> {
    let account = state.auth.profile(identity.account_id).await?;
    Ok(Json(AccountView::from(&account)))
}

pub async fn change_password(
    State(state): State<AppState>,
    identity: AuthIdentity,
    body: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> HandlerResult<Json<MessageResponse>> {
    let payload = payload(body)?;
    payload.validate()?;

    state
        .auth
        .change_password(
            identity.account_id,
            &payload.current_password,
            &payload.new_password,
        )
        .await?;
    Ok(Json(MessageResponse::new(
        "Password changed successfully. Please log in again.",
    )))
}

fn payload<T>(body: Result<Json<T>, JsonRejection>) -> HandlerResult<T> {
    body.map(|Json(payload)| payload).map_err(|rejection| {
        tracing::debug!(error = %rejection, "rejected request body");
        AppError::Validation(vec![format!("body: {}", rejection.body_text())])
    })
}

fn auth_response(outcome: AuthOutcome) -> AuthResponse {
    AuthResponse {
        account: AccountView::from(&outcome.account),
        access_token: outcome.tokens.access.token,
        refresh_token: outcome.tokens.refresh.token,
        expires_at: outcome.tokens.access.expires_at,
    }
}

fn token_response(tokens: SessionTokens) -> TokenResponse {
    TokenResponse {
        access_token: tokens.access.token,
        refresh_token: tokens.refresh.token,
        expires_at: tokens.access.expires_at,
    }
}
