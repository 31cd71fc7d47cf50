//! Declarative request binding and OpenAPI generation for async handlers.
//!
//! Each handler is registered with an explicit binding table. At registration
//! the table is checked against the route pattern and turned into both the
//! operation's documentation and a validation plan; at request time the plan
//! binds path, query, body and dependency values before the handler runs.
//!
//! ```rust,ignore
//! use bindery::prelude::*;
//!
//! async fn get_pet(mut args: Arguments) -> Result<Json<Pet>, Error> {
//!     let pet_id: i64 = args.take("pet_id")?;
//!     Ok(Json(find_pet(pet_id)?))
//! }
//!
//! let mut api = Api::new(ApiConfig::from_env()?);
//! api.register(
//!     Route::get("/pets/<int:pet_id>", get_pet)
//!         .param("pet_id", Param::of::<i64>())
//!         .response::<Pet>(200, "The pet"),
//! )?;
//! bindery::server::serve(api, "127.0.0.1:8000".parse()?).await?;
//! ```

pub mod analyzer;
pub mod api;
pub mod auth;
mod binder;
pub mod config;
pub mod dependency;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod multipart;
pub mod observability;
pub mod openapi;
pub mod params;
pub mod response;
pub mod route;
pub mod router;
pub mod schema;
pub mod server;
pub mod testing;

pub use api::Api;
pub use error::{Error, Result};

pub mod prelude {
    pub use crate::api::Api;
    pub use crate::auth::AuthScheme;
    pub use crate::config::{ApiConfig, load_dotenv};
    pub use crate::dependency::{Dependency, Security};
    pub use crate::dispatch::{IntoReply, Reply};
    pub use crate::error::{Error, FieldError, RegistrationError};
    pub use crate::extract::{Arguments, Json};
    pub use crate::observability::TracingConfig;
    pub use crate::params::{
        FileSpec, FormSpec, MediaType, OAuth2PasswordRequestForm, Param, UploadFile,
    };
    pub use crate::route::Route;

    pub use http::StatusCode;
    pub use schemars::JsonSchema;
    pub use serde::{Deserialize, Serialize};
    pub use validator::Validate;
}
