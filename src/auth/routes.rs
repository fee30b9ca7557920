use chrono::Utc;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;

use crate::auth::bearer::{AccessToken, RefreshToken};
use crate::auth::guards::{CurrentUser, RequireAdmin};
use crate::auth::responses::{
    LoginRequest, LoginResponse, LogoutResponse, MeResponse, RefreshResponse, SigningKeyMetadata,
    UserSummary,
};
use crate::auth::{AuthError, AuthState};
use crate::error::ApiError;

#[openapi(tag = "Auth")]
#[post("/users/login", data = "<payload>")]
pub async fn login(
    state: &State<AuthState>,
    payload: Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = match state.users.find_user_by_email(&payload.email).await? {
        Some(user) => user,
        None => {
            log::info!("login failed: unknown email");
            return Err(AuthError::InvalidCredentials.into());
        }
    };

    let verified = state
        .password_service
        .verify_password(&payload.password, &user.password_hash)?;
    if !verified {
        log::info!("login failed for user {}: wrong password", user.id);
        return Err(AuthError::InvalidCredentials.into());
    }

    let identity = user.identity();
    let access = state.issuer.issue_access(&identity)?;
    let refresh = state.issuer.issue_refresh(&identity)?;
    log::info!("user {} logged in", user.id);

    Ok(Json(LoginResponse {
        message: "Login Successfully".to_string(),
        access_token: access.token,
        refresh_token: refresh.token,
        user: UserSummary {
            id: user.id,
            email: user.email,
            name: user.name,
        },
    }))
}

#[openapi(tag = "Auth")]
#[get("/users/refresh_token")]
pub async fn refresh_token(
    state: &State<AuthState>,
    token: RefreshToken,
) -> Result<Json<RefreshResponse>, ApiError> {
    let RefreshToken(payload) = token;
    let still_valid = payload
        .expires_at()
        .is_some_and(|expires_at| expires_at > Utc::now());
    if !still_valid {
        return Err(AuthError::RefreshExpired.into());
    }

    let access = state.issuer.issue_access(&payload.user)?;
    log::debug!("issued access token for user {}", payload.user.user_id);

    Ok(Json(RefreshResponse {
        access_token: access.token,
    }))
}

#[openapi(tag = "Auth")]
#[post("/users/logout")]
pub async fn logout(
    state: &State<AuthState>,
    token: AccessToken,
) -> Result<Json<LogoutResponse>, ApiError> {
    let AccessToken(payload) = token;
    let add = state.revocations.add(&payload.jti);
    match tokio::time::timeout(state.config.revocation_timeout(), add).await {
        Ok(result) => result.map_err(|err| AuthError::RevocationUnavailable(err.to_string()))?,
        Err(_) => {
            return Err(
                AuthError::RevocationUnavailable("blocklist write timed out".into()).into(),
            );
        }
    }
    log::info!("user {} logged out", payload.user.user_id);

    Ok(Json(LogoutResponse {
        message: "Logged Out Successfully".to_string(),
    }))
}

#[openapi(tag = "Auth")]
#[get("/users/me")]
pub async fn me(state: &State<AuthState>, user: CurrentUser) -> Json<MeResponse> {
    let permissions = state
        .permissions
        .permissions_for(user.role.as_ref())
        .into_iter()
        .collect();

    Json(MeResponse {
        id: user.id,
        name: user.name,
        email: user.email,
        role: user.role,
        permissions,
    })
}

#[openapi(tag = "Auth")]
#[get("/users/token/metadata")]
pub async fn token_metadata(
    state: &State<AuthState>,
    _admin: RequireAdmin,
) -> Json<SigningKeyMetadata> {
    let metadata = state.issuer.metadata();
    Json(SigningKeyMetadata {
        algorithm: metadata.algorithm,
        access_token_ttl_secs: metadata.access_token_ttl_secs,
        refresh_token_ttl_secs: metadata.refresh_token_ttl_secs,
    })
}
