//! Users and roles: storage backends, request/response shapes, and the
//! administration routes mounted under `/api/v1/users`.

pub mod memory;
pub mod models;
pub mod postgres;
pub mod responses;
pub mod routes;
pub mod store;

pub use memory::MemoryUserStore;
pub use models::{NewUser, Role, UserRecord, UserUpdate};
pub use postgres::PgUserStore;
pub use store::{SharedUserStore, StoreResult, UserStore, UserStoreError};
