//! Backend of a photo contest: visitors browse the submitted photos and vote once per
//! photo, an administrator manages the catalog behind a shared passphrase.
//!
//! The catalog and the votes are kept in two JSON files under `DATA_DIR`, uploaded images
//! under `UPLOADS_DIR`. Every mutation of either file goes through a single lock per file,
//! which is what keeps the one-vote-per-photo rule intact under concurrent requests.

pub mod catalog;
pub mod config;
pub mod identity;
pub mod images;
pub mod ledger;
pub mod photo;
mod routes;
pub mod service;
pub mod session;
pub mod storage;
pub mod token;

use config::Config;
use identity::IdentityProvider;
use service::ContestService;
use session::SessionGate;
use std::{io, path::PathBuf};
use rocket::{
    catchers,
    data::{Limits, ToByteUnit},
    fs::FileServer,
    http::Status,
    response::{self, status::Custom, Responder},
    routes,
    serde::json::Json,
    Build, Request, Rocket,
};
use serde::Serialize;
use thiserror::Error;


/// Build the contest server from the given config : open the stores, set up the session
/// gate and the voter identity scheme, and mount the routes
pub async fn build(config: Config) -> Result<Rocket<Build>> {
    config.check()?;

    // Open the stores, creating the data and uploads directories if needed
    let service = ContestService::open(&config).await?;
    let gate = SessionGate::from_config(&config);
    let identities = IdentityProvider::from_config(&config);

    // Forward the relevant settings to Rocket's own config
    let max_file_size = config.MAX_UPLOAD_SIZE.bytes();
    let limits = Limits::default()
        .limit("file", max_file_size)
        .limit("data-form", max_file_size + 1.mebibytes());
    let mut figment = rocket::Config::figment()
        .merge(("address", config.ADDRESS.as_str()))
        .merge(("port", config.PORT))
        .merge(("secret_key", config.secret_key()?))
        .merge(("limits", limits));
    figment = if config.BEHIND_REVERSE_PROXY {
        figment.merge(("ip_header", "X-Real-IP"))
    } else {
        figment.merge(("ip_header", false))
    };

    let photo_count = service.photo_count().await;
    tracing::info!(
        photos = photo_count,
        identity = ?config.VOTER_IDENTITY,
        "Contest server ready"
    );

    Ok(rocket::custom(figment)
        .mount("/api", routes![
            routes::list_photos,
            routes::add_photo,
            routes::update_photo,
            routes::delete_photo,
            routes::vote,
            routes::login,
            routes::check,
            routes::logout,
            routes::list_categories,
        ])
        .mount("/", routes![routes::health])
        .mount(images::ImageStore::URL_PREFIX.trim_end_matches('/'), FileServer::from(&config.UPLOADS_DIR))
        .register("/", catchers![routes::not_found, routes::default_catcher])
        .manage(service)
        .manage(gate)
        .manage(identities))
}


pub type Result<T, E = Error> = std::result::Result<T, E>;


/// Generic error type used to uniformize errors across the crate
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed input, correctable by the client
    #[error("{0}")]
    ValidationError(String),

    #[error("Photo not found")]
    NotFound,

    #[error("You have already voted for this photo")]
    AlreadyVoted,

    #[error("{0}")]
    Unauthorized(String),

    #[error("file error for \"{}\" : {}", .1.display(), .0)]
    FileError(#[source] io::Error, PathBuf),

    #[error("JSON error for \"{}\" : {}", .1.display(), .0)]
    JsonError(#[source] serde_json::Error, PathBuf),

    #[error("parser error : {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("config error : {0}")]
    ConfigError(String),
}

impl Error {
    /// HTTP status this error is reported with
    pub fn status(&self) -> Status {
        match self {
            Error::ValidationError(_) | Error::AlreadyVoted => Status::BadRequest,
            Error::NotFound => Status::NotFound,
            Error::Unauthorized(_) => Status::Unauthorized,
            Error::FileError(..) | Error::JsonError(..) | Error::ParseError(_) | Error::ConfigError(_) => {
                Status::InternalServerError
            }
        }
    }

    /// Shorthand for a validation error with the given message
    pub fn validation(message: impl Into<String>) -> Self {
        Error::ValidationError(message.into())
    }
}


/// JSON body of every error response
#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}


/// Errors are answered as `{"error": "..."}` ; server-side failures are logged and never
/// leak their details to the client
impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let message = if status == Status::InternalServerError {
            tracing::error!(method = %request.method(), uri = %request.uri(), "{}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        Custom(status, Json(ErrorBody::new(message))).respond_to(request)
    }
}
