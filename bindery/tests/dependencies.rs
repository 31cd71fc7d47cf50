//! Dependency chaining and authorization ordering.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bindery::prelude::*;
use bindery::testing::TestClient;
use serde_json::{Value, json};

#[derive(Debug, Clone)]
struct User {
    username: String,
}

fn scheme() -> Arc<AuthScheme> {
    Arc::new(AuthScheme::oauth2_password_bearer("/login"))
}

/// Resolves the bearer token to a known user, or 404.
fn current_user() -> Dependency {
    Dependency::new("current_user", |mut args: Arguments| async move {
        let token: String = args.take("token")?;
        match token.as_str() {
            "ada-token" => Ok::<_, Error>(User {
                username: "ada".to_string(),
            }),
            _ => Err(Error::not_found("User not found")),
        }
    })
    .security("token", Security::new(scheme()))
}

fn client(calls: Arc<AtomicUsize>) -> TestClient {
    let me = move |mut args: Arguments| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            let user: User = args.take("user")?;
            Ok::<_, Error>(json!({ "username": user.username }))
        }
    };

    let mut api = Api::new(ApiConfig::default())
        .with_auth_scheme(AuthScheme::oauth2_password_bearer("/login"));
    api.register(
        Route::get("/me", me)
            .name("read_me")
            .param("user", Param::depends(current_user())),
    )
    .unwrap();
    TestClient::new(api).unwrap()
}

#[tokio::test]
async fn test_missing_credential_is_401_and_handler_not_reached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let response = client(Arc::clone(&calls)).get("/me").send().await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>(), json!({ "detail": "Unauthorized" }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_principal_is_404_and_handler_not_reached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let response = client(Arc::clone(&calls)).get("/me").bearer("mallory-token").send().await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>(), json!({ "detail": "User not found" }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_valid_credential_reaches_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let response = client(Arc::clone(&calls)).get("/me").bearer("ada-token").send().await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({ "username": "ada" }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_chained_dependency_resolves_inner_first() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let log = Arc::clone(&order);
    let b = Dependency::new("b", move |_| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push("b");
            Ok::<_, Error>(2_i64)
        }
    });
    let log = Arc::clone(&order);
    let a = Dependency::new("a", move |mut args: Arguments| {
        let log = Arc::clone(&log);
        async move {
            let b: i64 = args.take("b")?;
            log.lock().unwrap().push("a");
            Ok::<_, Error>(format!("a({b})"))
        }
    })
    .depends("b", b);

    let handler = |mut args: Arguments| async move {
        let a: String = args.take("a")?;
        Ok::<_, Error>(json!({ "a": a }))
    };
    let api = Api::new(ApiConfig::default())
        .route(Route::get("/chain", handler).param("a", Param::depends(a)))
        .unwrap();
    let response = TestClient::new(api).unwrap().get("/chain").send().await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({ "a": "a(2)" }));
    assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
}

#[tokio::test]
async fn test_shared_dependency_runs_once_per_sibling() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let db = Dependency::new("db", move |_| {
        let counter = Arc::clone(&counter);
        async move { Ok::<_, Error>(counter.fetch_add(1, Ordering::SeqCst)) }
    });
    let left = Dependency::new("left", |mut args: Arguments| async move {
        args.take::<usize>("db")
    })
    .depends("db", db.clone());
    let right = Dependency::new("right", |mut args: Arguments| async move {
        args.take::<usize>("db")
    })
    .depends("db", db);

    let handler = |mut args: Arguments| async move {
        let left: usize = args.take("left")?;
        let right: usize = args.take("right")?;
        Ok::<_, Error>(json!([left, right]))
    };
    let api = Api::new(ApiConfig::default())
        .route(
            Route::get("/both", handler)
                .param("left", Param::depends(left))
                .param("right", Param::depends(right)),
        )
        .unwrap();
    let response = TestClient::new(api).unwrap().get("/both").send().await;

    assert_eq!(response.json::<Value>(), json!([0, 1]));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_validation_failure_precedes_authorization() {
    let handler = |_: Arguments| async { Ok::<_, Error>(json!(null)) };
    let api = Api::new(ApiConfig::default())
        .route(
            Route::get("/pets", handler)
                .param("limit", Param::of::<i64>())
                .param("token", Param::security(Security::new(scheme()))),
        )
        .unwrap();
    let client = TestClient::new(api).unwrap();

    let response = client.get("/pets").send().await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = client.get("/pets?limit=1").send().await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
