//! User and role administration.

use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post, put};
use rocket_okapi::openapi;

use crate::auth::AuthState;
use crate::auth::gates::require_ownership_or_role;
use crate::auth::guards::{Authorized, CurrentUser, RequireAdmin, policy};
use crate::error::ApiError;
use crate::users::models::{NewUser, Role, UserUpdate};
use crate::users::responses::{
    AssignRoleRequest, CreateRoleRequest, CreateUserRequest, MessageResponse, UpdateUserRequest,
    UserWithRole,
};

fn required(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::BadRequest(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

#[openapi(tag = "Users")]
#[get("/users/all")]
pub async fn list_users(
    state: &State<AuthState>,
    _caller: Authorized<policy::ReadUser>,
) -> Result<Json<Vec<UserWithRole>>, ApiError> {
    let users = state.users.list_users().await?;
    Ok(Json(users.into_iter().map(UserWithRole::from).collect()))
}

#[openapi(tag = "Users")]
#[post("/users/create", data = "<payload>")]
pub async fn create_user(
    state: &State<AuthState>,
    caller: Authorized<policy::CreateUser>,
    payload: Json<CreateUserRequest>,
) -> Result<Created<Json<UserWithRole>>, ApiError> {
    let payload = payload.into_inner();
    required("name", &payload.name)?;
    required("email", &payload.email)?;

    if state.users.find_role_by_id(payload.role).await?.is_none() {
        return Err(ApiError::NotFound(format!("Role {} not found", payload.role)));
    }

    let password_hash = state.password_service.hash_password(&payload.password)?;
    let record = state
        .users
        .create_user(NewUser {
            name: payload.name.trim().to_string(),
            email: payload.email,
            password_hash,
            role_id: payload.role,
        })
        .await?;
    log::info!("user {} created user {}", caller.user.id, record.id);

    let location = format!("/api/v1/users/{}", record.id);
    Ok(Created::new(location).body(Json(UserWithRole::from(record))))
}

#[openapi(tag = "Users")]
#[get("/users/<id>")]
pub async fn get_user(
    state: &State<AuthState>,
    caller: CurrentUser,
    id: i32,
) -> Result<Json<UserWithRole>, ApiError> {
    require_ownership_or_role(&caller, id, &RequireAdmin::allow_list())?;

    let record = state
        .users
        .find_user_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {id} not found")))?;
    Ok(Json(record.into()))
}

#[openapi(tag = "Users")]
#[put("/users/<id>", data = "<payload>")]
pub async fn update_user(
    state: &State<AuthState>,
    caller: CurrentUser,
    id: i32,
    payload: Json<UpdateUserRequest>,
) -> Result<Json<UserWithRole>, ApiError> {
    require_ownership_or_role(&caller, id, &RequireAdmin::allow_list())?;

    let payload = payload.into_inner();
    if let Some(name) = &payload.name {
        required("name", name)?;
    }
    let password_hash = match payload.password.as_deref() {
        Some(password) => Some(state.password_service.hash_password(password)?),
        None => None,
    };
    let update = UserUpdate {
        name: payload.name.map(|name| name.trim().to_string()),
        password_hash,
    };
    if update.is_empty() {
        return Err(ApiError::BadRequest("nothing to update".to_string()));
    }

    let record = state.users.update_user(id, update).await?;
    Ok(Json(record.into()))
}

#[openapi(tag = "Users")]
#[delete("/users/<id>")]
pub async fn delete_user(
    state: &State<AuthState>,
    admin: RequireAdmin,
    id: i32,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.users.delete_user(id).await? {
        return Err(ApiError::NotFound(format!("User {id} not found")));
    }
    log::info!("user {} deleted user {}", admin.0.id, id);

    Ok(Json(MessageResponse {
        message: format!("User {id} deleted"),
    }))
}

#[openapi(tag = "Roles")]
#[post("/users/role/create", data = "<payload>")]
pub async fn create_role(
    state: &State<AuthState>,
    _caller: Authorized<policy::CreateRoles>,
    payload: Json<CreateRoleRequest>,
) -> Result<Created<Json<Role>>, ApiError> {
    required("name", &payload.name)?;
    let role = state.users.create_role(&payload.name).await?;
    log::info!("created role {} ({})", role.name, role.id);

    Ok(Created::new("/api/v1/users/all/role").body(Json(role)))
}

#[openapi(tag = "Roles")]
#[get("/users/all/role")]
pub async fn list_roles(
    state: &State<AuthState>,
    _caller: Authorized<policy::ReadRoles>,
) -> Result<Json<Vec<Role>>, ApiError> {
    Ok(Json(state.users.list_roles().await?))
}

#[openapi(tag = "Roles")]
#[post("/users/<id>/assign-role", data = "<payload>")]
pub async fn assign_role(
    state: &State<AuthState>,
    caller: Authorized<policy::AssignRoles>,
    id: i32,
    payload: Json<AssignRoleRequest>,
) -> Result<Json<UserWithRole>, ApiError> {
    let record = state.users.assign_role(id, payload.role_id).await?;
    log::info!(
        "user {} assigned role {} to user {}",
        caller.user.id,
        payload.role_id,
        id
    );
    Ok(Json(record.into()))
}
