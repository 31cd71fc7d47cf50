//! A small pet store with OAuth2 password login and JWT bearer tokens.
//!
//! Run with: `JWT_SECRET=change-me cargo run --example pet_store`
//!
//! - POST /login              form login, returns a bearer token
//! - GET  /users/me           the logged-in user
//! - GET  /pets?limit=10      list pets
//! - GET  /pets/{pet_id}      one pet
//! - POST /pets               add a pet (owner is the logged-in user)
//! - PUT  /pets/{pet_id}/photo  raw image/png upload
//! - GET  /docs, /redoc, /docs/openapi.json

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bindery::prelude::*;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde_json::{Value, json};

const TOKEN_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct Pet {
    id: u32,
    name: String,
    owner: String,
    age: Option<u8>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
struct NewPet {
    #[validate(length(min = 1, max = 64))]
    name: String,
    age: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct Token {
    access_token: String,
    token_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: u64,
}

#[derive(Debug, Clone)]
struct User {
    username: String,
}

#[derive(Default)]
struct Store {
    pets: Mutex<BTreeMap<u32, Pet>>,
    photos: Mutex<BTreeMap<u32, usize>>,
}

#[derive(Clone)]
struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

fn store_dependency(store: Arc<Store>) -> Dependency {
    Dependency::new("store", move |_| {
        let store = Arc::clone(&store);
        async move { Ok::<_, Error>(store) }
    })
}

fn keys_dependency(keys: Keys) -> Dependency {
    Dependency::new("keys", move |_| {
        let keys = keys.clone();
        async move { Ok::<_, Error>(keys) }
    })
}

/// Decodes the bearer token into the logged-in user.
fn current_user(keys: Keys, bearer: Security) -> Dependency {
    Dependency::new("current_user", |mut args: Arguments| async move {
        let token: String = args.take("token")?;
        let keys: Keys = args.take("keys")?;
        let data = decode::<Claims>(&token, &keys.decoding, &Validation::default())
            .map_err(|_| Error::unauthorized("Could not validate credentials"))?;
        Ok::<_, Error>(User {
            username: data.claims.sub,
        })
    })
    .security("token", bearer)
    .depends("keys", keys_dependency(keys))
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

async fn login(mut args: Arguments) -> Result<Json<Token>, Error> {
    let form: OAuth2PasswordRequestForm = args.take("form")?;
    let keys: Keys = args.take("keys")?;
    if form.username.is_empty() || form.password != "password" {
        return Err(Error::unauthorized("Incorrect username or password"));
    }
    let claims = Claims {
        sub: form.username,
        exp: now() + TOKEN_TTL_SECS,
    };
    let access_token = encode(&Header::default(), &claims, &keys.encoding)
        .map_err(|e| Error::internal(format!("failed to sign token: {e}")))?;
    Ok(Json(Token {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

async fn read_me(mut args: Arguments) -> Result<Value, Error> {
    let user: User = args.take("user")?;
    Ok(json!({ "username": user.username }))
}

async fn list_pets(mut args: Arguments) -> Result<Value, Error> {
    let limit: usize = args.take("limit")?;
    let store: Arc<Store> = args.take("store")?;
    let pets = store
        .pets
        .lock()
        .map_err(|_| Error::internal("pet store lock poisoned"))?;
    let page: Vec<&Pet> = pets.values().take(limit).collect();
    Ok(json!(page))
}

async fn get_pet(mut args: Arguments) -> Result<Json<Pet>, Error> {
    let pet_id: u32 = args.take("pet_id")?;
    let store: Arc<Store> = args.take("store")?;
    let pets = store
        .pets
        .lock()
        .map_err(|_| Error::internal("pet store lock poisoned"))?;
    pets.get(&pet_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| Error::not_found("Pet not found"))
}

async fn create_pet(mut args: Arguments) -> Result<(Json<Pet>, StatusCode), Error> {
    let new_pet: NewPet = args.take("pet")?;
    let user: User = args.take("user")?;
    let store: Arc<Store> = args.take("store")?;
    let mut pets = store
        .pets
        .lock()
        .map_err(|_| Error::internal("pet store lock poisoned"))?;
    let id = pets.keys().next_back().map_or(1, |last| last + 1);
    let pet = Pet {
        id,
        name: new_pet.name,
        owner: user.username,
        age: new_pet.age,
    };
    pets.insert(id, pet.clone());
    Ok((Json(pet), StatusCode::CREATED))
}

async fn upload_photo(mut args: Arguments) -> Result<Value, Error> {
    let pet_id: u32 = args.take("pet_id")?;
    let photo: UploadFile = args.take("photo")?;
    let user: User = args.take("user")?;
    let store: Arc<Store> = args.take("store")?;

    let owner = store
        .pets
        .lock()
        .map_err(|_| Error::internal("pet store lock poisoned"))?
        .get(&pet_id)
        .map(|pet| pet.owner.clone())
        .ok_or_else(|| Error::not_found("Pet not found"))?;
    if owner != user.username {
        return Err(Error::forbidden("You are not authorised for this operation."));
    }
    store
        .photos
        .lock()
        .map_err(|_| Error::internal("pet store lock poisoned"))?
        .insert(pet_id, photo.len());
    Ok(json!({ "pet_id": pet_id, "size": photo.len() }))
}

fn pets_blueprint(store: Arc<Store>, user: Dependency) -> Result<Api, RegistrationError> {
    let store = store_dependency(store);
    Api::blueprint("pets")
        .route(
            Route::get("/pets", list_pets)
                .param("limit", Param::with_default::<usize>(10))
                .param("store", Param::depends(store.clone()))
                .tags(["pets"]),
        )?
        .route(
            Route::get("/pets/<int:pet_id>", get_pet)
                .param("pet_id", Param::of::<u32>())
                .param("store", Param::depends(store.clone()))
                .response::<Pet>(200, "The pet")
                .responses(404, "Pet not found")
                .tags(["pets"]),
        )?
        .route(
            Route::post("/pets", create_pet)
                .param("pet", Param::validated::<NewPet>())
                .param("user", Param::depends(user.clone()))
                .param("store", Param::depends(store.clone()))
                .response::<Pet>(201, "Created")
                .tags(["pets"]),
        )?
        .route(
            Route::put("/pets/<int:pet_id>/photo", upload_photo)
                .param("pet_id", Param::of::<u32>())
                .param("photo", Param::file(FileSpec::new("image/png").max_length(1 << 20)))
                .param("user", Param::depends(user))
                .param("store", Param::depends(store))
                .description("Replaces the pet's photo with a PNG image.")
                .tags(["pets"]),
        )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();
    TracingConfig::new().init();

    let secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| "change-me".to_string());
    let keys = Keys::new(secret.as_bytes());
    let store = Arc::new(Store::default());

    let mut api = Api::new(ApiConfig::from_env()?)
        .with_auth_scheme(AuthScheme::oauth2_password_bearer("/login"));
    let bearer = api
        .security()
        .ok_or("auth scheme must be configured before routes")?;
    let user = current_user(keys.clone(), bearer);

    api.register(
        Route::post("/login", login)
            .param("form", OAuth2PasswordRequestForm::param())
            .param("keys", Param::depends(keys_dependency(keys)))
            .response::<Token>(200, "Bearer token")
            .tags(["auth"]),
    )?;
    api.register(
        Route::get("/users/me", read_me)
            .param("user", Param::depends(user.clone()))
            .tags(["auth"]),
    )?;
    api.extend(pets_blueprint(store, user)?)?;

    let addr: SocketAddr = "127.0.0.1:8000".parse()?;
    println!("pet store listening on http://{addr} (docs at /docs)");
    bindery::server::serve(api, addr).await?;
    Ok(())
}
