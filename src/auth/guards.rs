//! Request guards that resolve the caller and apply authorization gates.
//!
//! Every guard here starts from [`AccessToken`], so the bearer checks run
//! before any store lookup or permission test.

use std::marker::PhantomData;

use rocket::Request;
use rocket::request::{FromRequest, Outcome};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};

use crate::auth::bearer::{AccessToken, auth_state, bearer_security_input};
use crate::auth::gates::{Principal, RoleAllowList, require_permission, require_roles};
use crate::auth::jwt::TokenPayload;
use crate::auth::permissions::Permission;
use crate::auth::{AuthError, AuthState};
use crate::error::{ApiError, guard_failure};
use crate::users::models::{Role, UserRecord};

/// The caller behind a valid access token, loaded from the user store.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub role: Option<Role>,
    pub token: TokenPayload,
}

impl CurrentUser {
    /// Look up the token's user. A token for a deleted account is invalid.
    pub async fn resolve(state: &AuthState, token: TokenPayload) -> Result<Self, ApiError> {
        let record = state
            .users
            .find_user_by_id(token.user.user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        Ok(Self::from_record(record, token))
    }

    fn from_record(record: UserRecord, token: TokenPayload) -> Self {
        Self {
            id: record.id,
            name: record.name,
            email: record.email,
            role: record.role,
            token,
        }
    }

    pub fn role_name(&self) -> Option<&str> {
        self.role.as_ref().map(|role| role.name.as_str())
    }
}

impl Principal for CurrentUser {
    fn principal_id(&self) -> i32 {
        self.id
    }

    fn role(&self) -> Option<&Role> {
        self.role.as_ref()
    }
}

async fn current_user<'r>(
    request: &'r Request<'_>,
) -> Outcome<(CurrentUser, &'r AuthState), ApiError> {
    let token = match request.guard::<AccessToken>().await {
        Outcome::Success(AccessToken(token)) => token,
        Outcome::Error(failure) => return Outcome::Error(failure),
        Outcome::Forward(status) => return Outcome::Forward(status),
    };
    let state = match auth_state(request).await {
        Ok(state) => state,
        Err(err) => return guard_failure(request, err),
    };
    match CurrentUser::resolve(state, token).await {
        Ok(user) => Outcome::Success((user, state)),
        Err(err) => guard_failure(request, err),
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        current_user(request).await.map(|(user, _)| user)
    }
}

/// Names the permission an [`Authorized`] guard demands.
pub trait PermissionPolicy: Send + Sync + 'static {
    const PERMISSION: Permission;
}

macro_rules! permission_policies {
    ($($name:ident => $permission:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy)]
            pub struct $name;

            impl PermissionPolicy for $name {
                const PERMISSION: Permission = Permission::$permission;
            }
        )*
    };
}

/// Marker types for `Authorized<_>`, one per permission.
pub mod policy {
    use super::{Permission, PermissionPolicy};

    permission_policies! {
        CreateUser => CreateUser,
        ReadUser => ReadUser,
        UpdateUser => UpdateUser,
        DeleteUser => DeleteUser,
        CreateBook => CreateBook,
        ReadBook => ReadBook,
        UpdateBook => UpdateBook,
        DeleteBook => DeleteBook,
        ManageRoles => ManageRoles,
        AssignRoles => AssignRoles,
        CreateRoles => CreateRoles,
        ReadRoles => ReadRoles,
        UpdateRoles => UpdateRoles,
        DeleteRoles => DeleteRoles,
        ViewAnalytics => ViewAnalytics,
        SystemConfig => SystemConfig,
    }
}

/// Caller whose role grants `P::PERMISSION`.
#[derive(Debug, Clone)]
pub struct Authorized<P: PermissionPolicy> {
    pub user: CurrentUser,
    policy: PhantomData<fn() -> P>,
}

impl<P: PermissionPolicy> Authorized<P> {
    pub fn into_inner(self) -> CurrentUser {
        self.user
    }
}

#[rocket::async_trait]
impl<'r, P: PermissionPolicy> FromRequest<'r> for Authorized<P> {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let (user, state) = match current_user(request).await {
            Outcome::Success(resolved) => resolved,
            Outcome::Error(failure) => return Outcome::Error(failure),
            Outcome::Forward(status) => return Outcome::Forward(status),
        };
        match require_permission(&state.permissions, &user, P::PERMISSION) {
            Ok(()) => Outcome::Success(Authorized {
                user,
                policy: PhantomData,
            }),
            Err(err) => guard_failure(request, err.into()),
        }
    }
}

/// Caller holding the `admin` role.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub CurrentUser);

impl RequireAdmin {
    pub fn allow_list() -> RoleAllowList {
        RoleAllowList::names(["admin"])
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequireAdmin {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let user = match current_user(request).await {
            Outcome::Success((user, _)) => user,
            Outcome::Error(failure) => return Outcome::Error(failure),
            Outcome::Forward(status) => return Outcome::Forward(status),
        };
        match require_roles(&Self::allow_list(), &user) {
            Ok(()) => Outcome::Success(RequireAdmin(user)),
            Err(err) => guard_failure(request, err.into()),
        }
    }
}

impl<'r> OpenApiFromRequest<'r> for CurrentUser {
    fn from_request_input(
        _generator: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(bearer_security_input())
    }
}

impl<'r, P: PermissionPolicy> OpenApiFromRequest<'r> for Authorized<P> {
    fn from_request_input(
        _generator: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(bearer_security_input())
    }
}

impl<'r> OpenApiFromRequest<'r> for RequireAdmin {
    fn from_request_input(
        _generator: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(bearer_security_input())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::Identity;
    use crate::test_support::test_auth_state;
    use crate::users::models::NewUser;

    #[tokio::test]
    async fn resolves_existing_user_with_role() {
        let state = test_auth_state();
        let record = state
            .users
            .create_user(NewUser {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                password_hash: "hash".into(),
                role_id: 2,
            })
            .await
            .expect("create user");
        let issued = state.issuer.issue_access(&record.identity()).expect("issue");
        let payload = state.issuer.codec().decode(&issued.token).expect("decode");

        let user = CurrentUser::resolve(&state, payload).await.expect("resolve");
        assert_eq!(user.id, record.id);
        assert_eq!(user.role_name(), Some("librarian"));
        assert!(require_permission(&state.permissions, &user, Permission::CreateBook).is_ok());
    }

    #[tokio::test]
    async fn deleted_account_token_is_invalid() {
        let state = test_auth_state();
        let ghost = Identity {
            user_id: 404,
            email: "ghost@example.com".into(),
            name: "Ghost".into(),
        };
        let issued = state.issuer.issue_access(&ghost).expect("issue");
        let payload = state.issuer.codec().decode(&issued.token).expect("decode");

        let err = CurrentUser::resolve(&state, payload).await.unwrap_err();
        assert!(matches!(err, ApiError::Auth(AuthError::InvalidToken)));
    }

    #[test]
    fn policies_name_their_permission() {
        assert_eq!(policy::ReadRoles::PERMISSION, Permission::ReadRoles);
        assert_eq!(policy::CreateBook::PERMISSION, Permission::CreateBook);
    }
}
