//! HTTP route handlers that belong to no particular resource.
//!
//! Auth and user administration routes live beside their modules in
//! [`crate::auth::routes`] and [`crate::users::routes`].

pub mod health;
