//! Reply normalization, declared response models and failure mapping.

use bindery::error::INTERNAL_ERROR_DETAIL;
use bindery::prelude::*;
use bindery::testing::TestClient;
use serde_json::{Value, json};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct Pet {
    name: String,
    age: u8,
}

async fn good_pet(_: Arguments) -> Result<Json<Pet>, Error> {
    Ok(Json(Pet {
        name: "Rex".into(),
        age: 3,
    }))
}

async fn bad_pet(_: Arguments) -> Result<Value, Error> {
    Ok(json!({ "name": "Rex", "age": "three" }))
}

async fn adopt(_: Arguments) -> Result<(Json<Pet>, StatusCode), Error> {
    Ok((
        Json(Pet {
            name: "Rex".into(),
            age: 3,
        }),
        StatusCode::CREATED,
    ))
}

async fn forbidden(_: Arguments) -> Result<Value, Error> {
    Err(Error::forbidden("You are not authorised for this operation."))
}

async fn broken(_: Arguments) -> Result<Value, Error> {
    Err(Error::internal("connection to db-01 refused"))
}

async fn explode(_: Arguments) -> Result<Value, Error> {
    panic!("handler exploded");
}

async fn gone(_: Arguments) -> Result<Reply, Error> {
    Ok(Reply::new(StatusCode::GONE, json!({ "detail": "adopted" })))
}

fn client() -> TestClient {
    let api = Api::new(ApiConfig::default())
        .route(Route::get("/pets/good", good_pet).response::<Pet>(200, "A pet"))
        .unwrap()
        .route(Route::get("/pets/bad", bad_pet).response::<Pet>(200, "A pet"))
        .unwrap()
        .route(Route::post("/pets/adopt", adopt).response::<Pet>(201, "Adopted"))
        .unwrap()
        .route(Route::delete("/pets/forbidden", forbidden))
        .unwrap()
        .route(Route::get("/pets/broken", broken))
        .unwrap()
        .route(Route::get("/pets/explode", explode))
        .unwrap()
        .route(Route::get("/pets/gone", gone).response::<Pet>(200, "A pet"))
        .unwrap();
    TestClient::new(api).unwrap()
}

#[tokio::test]
async fn test_matching_reply_passes_model_check() {
    let response = client().get("/pets/good").send().await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({ "name": "Rex", "age": 3 }));
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
}

#[tokio::test]
async fn test_mismatched_reply_is_internal_error() {
    let response = client().get("/pets/bad").send().await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json::<Value>(), json!({ "detail": INTERNAL_ERROR_DETAIL }));
}

#[tokio::test]
async fn test_status_pair_is_kept() {
    let response = client().post("/pets/adopt").send().await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.json::<Value>()["name"], "Rex");
}

#[tokio::test]
async fn test_domain_error_passes_through() {
    let response = client().delete("/pets/forbidden").send().await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        response.json::<Value>(),
        json!({ "detail": "You are not authorised for this operation." })
    );
}

#[tokio::test]
async fn test_internal_error_hides_cause() {
    let response = client().get("/pets/broken").send().await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!response.text().contains("db-01"));
}

#[tokio::test]
async fn test_panic_becomes_internal_error() {
    let client = client();
    let response = client.get("/pets/explode").send().await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json::<Value>(), json!({ "detail": INTERNAL_ERROR_DETAIL }));

    // The router keeps serving after a panic.
    assert_eq!(client.get("/pets/good").send().await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_undeclared_status_skips_model_check() {
    let response = client().get("/pets/gone").send().await;
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(response.json::<Value>(), json!({ "detail": "adopted" }));
}
