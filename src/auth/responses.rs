use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::auth::permissions::Permission;
use crate::users::models::Role;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoginResponse {
    pub message: String,
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct UserSummary {
    pub id: i32,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RefreshResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogoutResponse {
    pub message: String,
}

/// Caller profile with the permissions its role grants.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MeResponse {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub role: Option<Role>,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SigningKeyMetadata {
    pub algorithm: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
}
