use bookshelf_api::routes::health::{HealthResponse, health_check};
use bookshelf_api::test_support::TestRocketBuilder;
use rocket::http::Status;
use rocket::routes;

#[test]
fn health_endpoint_returns_ok() {
    let client = TestRocketBuilder::new()
        .mount_api_routes(routes![health_check])
        .blocking_client();

    let response = client.get("/api/v1/health").dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert!(response.headers().get_one("X-Process-Time").is_some());

    let payload: HealthResponse = response.into_json().expect("valid JSON payload");
    assert_eq!(payload.status, "ok");
    assert_eq!(payload.version, env!("CARGO_PKG_VERSION"));
}

#[test]
fn unknown_routes_use_the_json_catcher() {
    let client = TestRocketBuilder::new()
        .mount_api_routes(routes![health_check])
        .blocking_client();

    let response = client.get("/api/v1/nope").dispatch();
    assert_eq!(response.status(), Status::NotFound);

    let body: serde_json::Value = response.into_json().expect("JSON error body");
    assert_eq!(body["error_code"], "not_found");
}
