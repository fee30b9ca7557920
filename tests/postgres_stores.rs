use bookshelf_api::auth::{PgRevocationStore, RevocationStore};
use bookshelf_api::test_support::{TestDatabase, TestDatabaseError};
use bookshelf_api::users::{NewUser, PgUserStore, UserStore, UserStoreError, UserUpdate};
use chrono::Duration;

async fn database() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping Postgres store test: no test database configured");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

fn new_user(email: &str, role_id: i32) -> NewUser {
    NewUser {
        name: "Reader".to_string(),
        email: email.to_string(),
        password_hash: "$argon2id$placeholder".to_string(),
        role_id,
    }
}

#[tokio::test]
async fn user_store_round_trip() {
    let Some(test_db) = database().await else {
        return;
    };
    let store = PgUserStore::new(test_db.pool_clone());

    let user_role = store
        .find_role_by_name("USER")
        .await
        .expect("lookup")
        .expect("seeded role");
    let created = store
        .create_user(new_user("Reader@Example.com", user_role.id))
        .await
        .expect("create user");
    assert_eq!(created.email, "reader@example.com");
    assert_eq!(created.role.as_ref(), Some(&user_role));

    let err = store
        .create_user(new_user("reader@example.com", user_role.id))
        .await
        .unwrap_err();
    assert!(matches!(err, UserStoreError::DuplicateEmail(_)));

    let err = store
        .create_user(new_user("orphan@example.com", 9999))
        .await
        .unwrap_err();
    assert!(matches!(err, UserStoreError::RoleNotFound(9999)));

    let found = store
        .find_user_by_email("READER@example.com")
        .await
        .expect("lookup")
        .expect("user exists");
    assert_eq!(found.id, created.id);

    let updated = store
        .update_user(
            created.id,
            UserUpdate {
                name: Some("Renamed".to_string()),
                password_hash: None,
            },
        )
        .await
        .expect("update");
    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.password_hash, created.password_hash);

    let admin = store
        .find_role_by_name("admin")
        .await
        .expect("lookup")
        .expect("seeded role");
    let promoted = store.assign_role(created.id, admin.id).await.expect("assign");
    assert_eq!(promoted.role, Some(admin));

    assert!(store.delete_user(created.id).await.expect("delete"));
    assert!(store.find_user_by_id(created.id).await.expect("lookup").is_none());

    test_db.close().await.expect("drop test database");
}

#[tokio::test]
async fn role_names_are_unique_ignoring_case() {
    let Some(test_db) = database().await else {
        return;
    };
    let store = PgUserStore::new(test_db.pool_clone());

    let archivist = store.create_role("Archivist").await.expect("create role");
    let err = store.create_role("archivist").await.unwrap_err();
    assert!(matches!(err, UserStoreError::DuplicateRole(_)));

    let roles = store.list_roles().await.expect("list roles");
    assert_eq!(roles.len(), 5);
    assert_eq!(roles.last(), Some(&archivist));

    test_db.close().await.expect("drop test database");
}

#[tokio::test]
async fn revocations_are_shared_through_the_table() {
    let Some(test_db) = database().await else {
        return;
    };
    let first = PgRevocationStore::new(test_db.pool_clone(), Duration::days(2));
    let second = PgRevocationStore::new(test_db.pool_clone(), Duration::days(2));

    assert!(!second.contains("jti-1").await.expect("lookup"));
    first.add("jti-1").await.expect("revoke");
    first.add("jti-1").await.expect("revoke twice");
    assert!(second.contains("jti-1").await.expect("lookup"));

    let lapsed = PgRevocationStore::new(test_db.pool_clone(), Duration::seconds(-1));
    lapsed.add("jti-old").await.expect("revoke");
    assert!(!second.contains("jti-old").await.expect("lookup"));
    assert_eq!(second.purge_expired().await.expect("purge"), 1);
    assert!(second.contains("jti-1").await.expect("lookup"));

    test_db.close().await.expect("drop test database");
}
