//! Url-encoded forms, multipart forms and raw file bodies.

use bindery::config::BodyLimits;
use bindery::extract::FormPart;
use bindery::multipart::MultipartConfig;
use bindery::prelude::*;
use bindery::testing::TestClient;
use serde_json::{Value, json};

#[derive(Debug, Deserialize, JsonSchema)]
struct Vaccine {
    name: String,
    year: i32,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PetRegistration {
    name: String,
    age: u8,
    vaccines: Vec<Vaccine>,
    documents: Vec<UploadFile>,
}

async fn login(mut args: Arguments) -> Result<Value, Error> {
    let form: OAuth2PasswordRequestForm = args.take("form")?;
    if form.password != "secret" {
        return Err(Error::unauthorized("Incorrect username or password"));
    }
    Ok(json!({ "access_token": format!("{}-token", form.username), "token_type": "bearer" }))
}

async fn register_pet(mut args: Arguments) -> Result<Value, Error> {
    let pet: PetRegistration = args.take("pet")?;
    let vaccines: Vec<String> = pet
        .vaccines
        .iter()
        .map(|v| format!("{}@{}", v.name, v.year))
        .collect();
    let documents: Vec<Value> = pet
        .documents
        .iter()
        .map(|d| json!({ "filename": d.filename, "size": d.len() }))
        .collect();
    Ok(json!({
        "name": pet.name,
        "age": pet.age,
        "vaccines": vaccines,
        "documents": documents,
    }))
}

async fn upload_avatar(mut args: Arguments) -> Result<Value, Error> {
    let image: UploadFile = args.take("image")?;
    Ok(json!({ "content_type": image.content_type, "size": image.len() }))
}

fn client() -> TestClient {
    let api = Api::new(ApiConfig::default())
        .route(Route::post("/login", login).param("form", OAuth2PasswordRequestForm::param()))
        .unwrap()
        .route(
            Route::post("/pets/register", register_pet)
                .param("pet", Param::form::<PetRegistration>(FormSpec::multipart())),
        )
        .unwrap()
        .route(
            Route::put("/avatar", upload_avatar).param(
                "image",
                Param::file(FileSpec::new("image/png").min_length(1).max_length(8)),
            ),
        )
        .unwrap();
    TestClient::new(api).unwrap()
}

#[tokio::test]
async fn test_password_form_binds_url_encoded_fields() {
    let response = client()
        .post("/login")
        .form(&[("username", "ada"), ("password", "secret")])
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.json::<Value>(),
        json!({ "access_token": "ada-token", "token_type": "bearer" })
    );
}

#[tokio::test]
async fn test_password_form_missing_password_is_422() {
    let response = client()
        .post("/login")
        .form(&[("username", "ada")])
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["detail"][0]["loc"], json!(["body", "password"]));
}

#[tokio::test]
async fn test_password_form_rejects_json_body() {
    let response = client()
        .post("/login")
        .json(&json!({ "username": "ada", "password": "secret" }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_multipart_rebuilds_object_array_and_files() {
    let response = client()
        .post("/pets/register")
        .multipart(&[
            FormPart::text("name", "Rex"),
            FormPart::text("age", "3"),
            FormPart::text("vaccines", r#"{"name":"rabies","year":2020}"#),
            FormPart::text("vaccines", r#"{"name":"parvo","year":2021}"#),
            FormPart::file("documents", "passport.pdf", "application/pdf", b"%PDF-1".to_vec()),
            FormPart::file("documents", "photo.png", "image/png", b"\x89PNG".to_vec()),
        ])
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.json::<Value>(),
        json!({
            "name": "Rex",
            "age": 3,
            "vaccines": ["rabies@2020", "parvo@2021"],
            "documents": [
                { "filename": "passport.pdf", "size": 6 },
                { "filename": "photo.png", "size": 4 },
            ],
        })
    );
}

#[tokio::test]
async fn test_multipart_bad_scalar_is_422() {
    let response = client()
        .post("/pets/register")
        .multipart(&[
            FormPart::text("name", "Rex"),
            FormPart::text("age", "old"),
            FormPart::text("vaccines", "[]"),
        ])
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["detail"][0]["loc"], json!(["body", "age"]));
}

#[tokio::test]
async fn test_repeated_single_value_field_is_422() {
    let response = client()
        .post("/login")
        .form(&[("username", "ada"), ("username", "bob"), ("password", "secret")])
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["detail"][0]["loc"], json!(["body", "username"]));
    assert_eq!(body["detail"][0]["type"], "value_error.multiple");
}

fn limited_client() -> TestClient {
    let limits = BodyLimits {
        max_body_size: 1024,
        multipart: MultipartConfig::new().max_file_size(16),
    };
    let api = Api::new(ApiConfig::default().with_limits(limits))
        .route(
            Route::post("/pets/register", register_pet)
                .param("pet", Param::form::<PetRegistration>(FormSpec::multipart())),
        )
        .unwrap();
    TestClient::new(api).unwrap()
}

#[tokio::test]
async fn test_oversized_multipart_file_is_413() {
    let response = limited_client()
        .post("/pets/register")
        .multipart(&[
            FormPart::text("name", "Rex"),
            FormPart::text("age", "3"),
            FormPart::text("vaccines", "[]"),
            FormPart::file("documents", "big.bin", "application/octet-stream", vec![0_u8; 17]),
        ])
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let response = limited_client()
        .post("/pets/register")
        .body("application/json", vec![b' '; 2048])
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_file_body_is_bound() {
    let response = client()
        .put("/avatar")
        .body("image/png", b"\x89PNG".to_vec())
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.json::<Value>(),
        json!({ "content_type": "image/png", "size": 4 })
    );
}

#[tokio::test]
async fn test_file_body_wrong_type_is_422() {
    let response = client()
        .put("/avatar")
        .body("image/jpeg", b"\xff\xd8".to_vec())
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["detail"][0]["msg"], "Invalid file type received.");
}

#[tokio::test]
async fn test_file_body_out_of_bounds_is_422() {
    let response = client()
        .put("/avatar")
        .body("image/png", vec![0_u8; 9])
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["detail"][0]["msg"], "Invalid file size received.");
}

#[test]
fn test_form_documents_media_type_and_binary_fields() {
    let api = Api::new(ApiConfig::default())
        .route(
            Route::post("/pets/register", register_pet)
                .param("pet", Param::form::<PetRegistration>(FormSpec::multipart())),
        )
        .unwrap();
    let doc = serde_json::to_value(api.generate().unwrap()).unwrap();
    let content = &doc["paths"]["/pets/register"]["post"]["requestBody"]["content"];
    let schema = &content["multipart/form-data"]["schema"];
    assert!(schema.is_object());
    assert!(content.get("application/json").is_none());
}
