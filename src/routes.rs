use crate::{
    config::Category,
    identity::Voter,
    images::ImageUpload,
    photo::{Photo, PhotoFilter, PhotoId, PhotoView, SortOrder},
    service::{ContestService, PhotoForm},
    session::{AdminSession, SessionGate},
    token::Token,
    Error, ErrorBody, Result,
};
use chrono::Utc;
use rocket::{
    catch, delete,
    form::{self, error::ErrorKind, Form, FromForm},
    fs::TempFile,
    get,
    http::{Cookie, CookieJar, Status},
    post, put,
    response::status::{Created, Custom},
    serde::json::Json,
    tokio::io::AsyncReadExt,
    Request, State,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;


/// Confirmation message returned by actions that have nothing else to return
#[derive(Serialize, Debug)]
pub struct Message {
    pub message: String,
}

impl Message {
    fn new(message: &str) -> Json<Self> {
        Json(Self { message: message.to_string() })
    }
}


/// Route handler listing the photos with their votes, optionally filtered on category and
/// year and sorted on the given fields
#[get("/photos?<category>&<year>&<sort>&<reverse>")]
pub async fn list_photos(
    category: Option<String>,
    year: Option<String>,
    sort: Option<String>,
    reverse: Option<bool>,
    service: &State<ContestService>,
) -> Result<Json<Vec<PhotoView>>> {
    // Empty parameters, as sent by a form with nothing selected, mean no restriction
    let category = category.filter(|c| !c.trim().is_empty());
    let year = match year.as_deref().map(str::trim).filter(|y| !y.is_empty()) {
        Some(year) => Some(year.parse::<i32>().map_err(|_| Error::validation(format!("Invalid year \"{year}\"")))?),
        None => None,
    };
    let filter = PhotoFilter { category, year };

    let sort = match sort.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(fields) => SortOrder::parse(fields, reverse.unwrap_or(false))?,
        None => SortOrder {
            reverse: reverse.unwrap_or(service.default_sort().reverse),
            ..service.default_sort().clone()
        },
    };

    Ok(Json(service.photos_with_votes(&filter, &sort).await))
}


/// Multipart form sent by the admin panel to create or update a photo
#[derive(FromForm)]
pub struct PhotoUploadForm<'r> {
    title: Option<String>,
    author: Option<String>,
    category: Option<String>,
    year: Option<String>,
    photo: Option<TempFile<'r>>,
}

impl PhotoUploadForm<'_> {
    /// Read the uploaded file, if any, and turn this form into the service's input
    async fn into_photo_form(self) -> Result<PhotoForm> {
        let image = match self.photo.as_ref().filter(|file| file.len() > 0) {
            Some(file) => Some(read_upload(file).await?),
            None => None,
        };
        Ok(PhotoForm {
            title: self.title,
            author: self.author,
            category: self.category,
            year: self.year,
            image,
        })
    }
}

/// Read the content of an uploaded file into memory
async fn read_upload(file: &TempFile<'_>) -> Result<ImageUpload> {
    let content_type = file.content_type().map(|ct| ct.to_string());
    let path = file.path().map(|p| p.to_path_buf()).unwrap_or_default();
    let mut bytes = Vec::with_capacity(file.len() as usize);
    file.open().await
        .map_err(|e| Error::FileError(e, path.clone()))?
        .read_to_end(&mut bytes).await
        .map_err(|e| Error::FileError(e, path))?;
    Ok(ImageUpload::new(bytes, content_type.as_deref()))
}

/// Turn the errors of a form that couldn't be parsed into a client error
fn form_error(errors: form::Errors<'_>) -> Error {
    if errors.iter().any(|e| matches!(e.kind, ErrorKind::InvalidLength { .. })) {
        Error::validation("File size too large")
    } else {
        Error::validation(format!("Malformed form : {errors}"))
    }
}


/// Route handler called by the admin panel to add a photo
#[post("/photos", data = "<form>")]
pub async fn add_photo(
    session: Result<AdminSession, Error>,
    form: Result<Form<PhotoUploadForm<'_>>, form::Errors<'_>>,
    service: &State<ContestService>,
) -> Result<Created<Json<Photo>>> {
    let session = session?;
    let form = form.map_err(form_error)?.into_inner().into_photo_form().await?;
    let photo = service.add_photo(&session, form).await?;
    Ok(Created::new(format!("/api/photos/{}", photo.id)).body(Json(photo)))
}


/// Route handler called by the admin panel to update some fields of a photo
#[put("/photos/<id>", data = "<form>")]
pub async fn update_photo(
    id: PhotoId,
    session: Result<AdminSession, Error>,
    form: Result<Form<PhotoUploadForm<'_>>, form::Errors<'_>>,
    service: &State<ContestService>,
) -> Result<Json<Photo>> {
    let session = session?;
    let form = form.map_err(form_error)?.into_inner().into_photo_form().await?;
    Ok(Json(service.update_photo(&session, id, form).await?))
}


/// Route handler called by the admin panel to delete a photo
#[delete("/photos/<id>")]
pub async fn delete_photo(
    id: PhotoId,
    session: Result<AdminSession, Error>,
    service: &State<ContestService>,
) -> Result<Json<Message>> {
    let session = session?;
    service.delete_photo(&session, id).await?;
    Ok(Message::new("Photo deleted successfully"))
}


/// Route handler called when a visitor votes for a photo
#[post("/photos/<id>/vote")]
pub async fn vote(id: PhotoId, voter: Result<Voter, Error>, service: &State<ContestService>) -> Result<Json<Message>> {
    let Voter(voter) = voter?;
    service.submit_vote(id, &voter).await?;
    Ok(Message::new("Vote recorded successfully"))
}


#[derive(Deserialize, Debug)]
pub struct Credentials {
    #[serde(default)]
    password: String,
}

#[derive(Serialize, Debug)]
pub struct LoginResponse {
    success: bool,
    message: String,
}

/// Route handler called by the admin login page
#[post("/admin/login", data = "<credentials>")]
pub async fn login(
    credentials: Json<Credentials>,
    client: Option<IpAddr>,
    cookies: &CookieJar<'_>,
    gate: &State<SessionGate>,
) -> Result<Json<LoginResponse>> {
    let client = client.map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".to_string());
    let session = gate.login(&credentials.password, &client).await?;
    cookies.add_private(session.cookie());
    Ok(Json(LoginResponse {
        success: true,
        message: "Login successful".to_string(),
    }))
}


#[derive(Serialize, Debug)]
pub struct AuthStatus {
    authenticated: bool,
}

/// Route handler called by the admin panel to know whether it is still logged in
#[get("/admin/check")]
pub fn check(session: Option<AdminSession>) -> Custom<Json<AuthStatus>> {
    match session {
        Some(_) => Custom(Status::Ok, Json(AuthStatus { authenticated: true })),
        None => Custom(Status::Unauthorized, Json(AuthStatus { authenticated: false })),
    }
}


/// Route handler closing the admin session, if there is one
#[post("/admin/logout")]
pub async fn logout(cookies: &CookieJar<'_>, gate: &State<SessionGate>) -> Json<Message> {
    let token = cookies.get_private(SessionGate::COOKIE_NAME)
        .and_then(|cookie| Token::try_from(cookie.value()).ok());
    if let Some(token) = token {
        gate.logout(&token).await;
    }
    cookies.remove_private(Cookie::from(SessionGate::COOKIE_NAME));
    Message::new("Logged out successfully")
}


/// Route handler listing the contest categories
#[get("/categories")]
pub fn list_categories(service: &State<ContestService>) -> Json<Vec<Category>> {
    Json(service.categories().to_vec())
}


#[derive(Serialize, Debug)]
pub struct Health {
    status: &'static str,
    timestamp: String,
}

#[get("/health")]
pub fn health() -> Json<Health> {
    Json(Health {
        status: "OK",
        timestamp: Utc::now().to_rfc3339(),
    })
}


#[catch(404)]
pub fn not_found() -> Json<ErrorBody> {
    Json(ErrorBody::new("Route not found"))
}

/// Every other error status is answered with the same JSON shape as the API errors
#[catch(default)]
pub fn default_catcher(status: Status, _request: &Request<'_>) -> Json<ErrorBody> {
    let message = match status.code {
        401 => "Admin session required",
        413 => "File size too large",
        400 | 422 => "Malformed request",
        _ if status.code >= 500 => "Internal server error",
        _ => status.reason().unwrap_or("Error"),
    };
    Json(ErrorBody::new(message))
}

