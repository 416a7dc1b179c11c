use photo_contest::config::{Config, VoterIdentityKind};
use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::{Client, LocalResponse};
use serde_json::{json, Value};
use tempfile::TempDir;

const PASSWORD: &str = "pass3662";
const BOUNDARY: &str = "contest-test-boundary";

/// Bytes recognized as a PNG image
const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x02\0\0\0";


async fn client_with(dir: &TempDir, tweak: impl FnOnce(&mut Config)) -> Client {
    let mut config = Config {
        DATA_DIR: dir.path().join("data").display().to_string(),
        UPLOADS_DIR: dir.path().join("uploads").display().to_string(),
        ADMIN_PASSWORD: PASSWORD.to_string(),
        ..Default::default()
    };
    tweak(&mut config);
    let rocket = photo_contest::build(config).await.expect("build rocket");
    Client::tracked(rocket).await.expect("valid rocket instance")
}

async fn client(dir: &TempDir) -> Client {
    client_with(dir, |_| {}).await
}

/// Build a multipart body with the given text fields and an optional `photo` file
fn multipart(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> (ContentType, Vec<u8>) {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ).as_bytes());
    }
    if let Some((content_type, bytes)) = file {
        body.extend_from_slice(format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"photo.png\"\r\nContent-Type: {content_type}\r\n\r\n"
        ).as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY)), body)
}

async fn json_body(response: LocalResponse<'_>) -> Value {
    response.into_json::<Value>().await.expect("JSON body")
}

async fn login(client: &Client) {
    let response = client.post("/api/admin/login")
        .json(&json!({ "password": PASSWORD }))
        .dispatch().await;
    assert_eq!(response.status(), Status::Ok);
}

/// Add a photo through the admin API and return its id
async fn add_photo(client: &Client, title: &str, category: &str, year: &str) -> u64 {
    let (content_type, body) = multipart(
        &[("title", title), ("author", "Ann"), ("category", category), ("year", year)],
        Some(("image/png", PNG)),
    );
    let response = client.post("/api/photos").header(content_type).body(body).dispatch().await;
    assert_eq!(response.status(), Status::Created);
    json_body(response).await["id"].as_u64().expect("photo id")
}

async fn vote_from<'c>(client: &'c Client, id: u64, address: &str) -> LocalResponse<'c> {
    client.post(format!("/api/photos/{id}/vote"))
        .header(Header::new("X-Real-IP", address.to_string()))
        .dispatch().await
}

async fn list(client: &Client, query: &str) -> Vec<Value> {
    let response = client.get(format!("/api/photos{query}")).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    json_body(response).await.as_array().expect("array of photos").clone()
}


#[rocket::async_test]
async fn health_check() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(&dir).await;
    let response = client.get("/health").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(json_body(response).await["status"], "OK");
}

#[rocket::async_test]
async fn vote_scenario_by_address() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(&dir, |config| config.VOTER_IDENTITY = VoterIdentityKind::Address).await;
    login(&client).await;
    let id = add_photo(&client, "Dawn", "nature", "2024").await;

    assert_eq!(vote_from(&client, id, "10.0.0.1").await.status(), Status::Ok);

    let again = vote_from(&client, id, "10.0.0.1").await;
    assert_eq!(again.status(), Status::BadRequest);
    assert_eq!(json_body(again).await["error"], "You have already voted for this photo");

    assert_eq!(vote_from(&client, id, "10.0.0.2").await.status(), Status::Ok);

    let photos = list(&client, "?year=2024").await;
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0]["id"], id);
    assert_eq!(photos[0]["votes"], 2);
    assert_eq!(photos[0]["category"], "nature");
    assert!(photos[0]["url"].as_str().unwrap().starts_with("/uploads/"));

    assert!(list(&client, "?year=2023").await.is_empty());
    assert_eq!(list(&client, "?category=nature&year=").await.len(), 1);
    assert!(list(&client, "?category=city").await.is_empty());
}

#[rocket::async_test]
async fn vote_cookie_identifies_the_browser() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(&dir).await;
    login(&client).await;
    let id = add_photo(&client, "Dawn", "nature", "2024").await;

    let first = client.post(format!("/api/photos/{id}/vote")).dispatch().await;
    assert_eq!(first.status(), Status::Ok);
    assert!(first.cookies().get_private("contest_voter").is_some());

    // Changing address doesn't help, the cookie identifies the voter
    let second = vote_from(&client, id, "10.9.9.9").await;
    assert_eq!(second.status(), Status::BadRequest);
    assert_eq!(list(&client, "").await[0]["votes"], 1);
}

#[rocket::async_test]
async fn vote_for_unknown_photo() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(&dir).await;
    let response = client.post("/api/photos/12345/vote").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
    assert_eq!(json_body(response).await["error"], "Photo not found");
}

#[rocket::async_test]
async fn mutations_require_an_admin_session() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(&dir).await;

    let (content_type, body) = multipart(
        &[("title", "Dawn"), ("author", "Ann"), ("category", "nature")],
        Some(("image/png", PNG)),
    );
    let response = client.post("/api/photos").header(content_type).body(body).dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);
    assert_eq!(json_body(response).await["error"], "Admin session required");

    let (content_type, body) = multipart(&[("title", "Dusk")], None);
    let response = client.put("/api/photos/1").header(content_type).body(body).dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);

    let response = client.delete("/api/photos/1").dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);

    let response = client.get("/api/admin/check").dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);
    assert_eq!(json_body(response).await["authenticated"], false);

    assert!(list(&client, "").await.is_empty());
}

#[rocket::async_test]
async fn login_check_and_logout() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(&dir).await;

    let response = client.post("/api/admin/login").json(&json!({ "password": "wrong" })).dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);
    assert_eq!(json_body(response).await["error"], "Invalid credentials");

    let response = client.post("/api/admin/login").json(&json!({ "password": PASSWORD })).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert!(response.cookies().get_private("contest_admin").is_some());
    assert_eq!(json_body(response).await["success"], true);

    let response = client.get("/api/admin/check").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(json_body(response).await["authenticated"], true);

    let response = client.post("/api/admin/logout").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    let response = client.get("/api/admin/check").dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);
    let response = client.delete("/api/photos/1").dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);
}

#[rocket::async_test]
async fn lockout_after_failed_logins() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(&dir, |config| config.LOGIN_MAX_ATTEMPTS = 2).await;

    for _ in 0..2 {
        let response = client.post("/api/admin/login")
            .header(Header::new("X-Real-IP", "10.0.0.7"))
            .json(&json!({ "password": "wrong" }))
            .dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }
    let response = client.post("/api/admin/login")
        .header(Header::new("X-Real-IP", "10.0.0.7"))
        .json(&json!({ "password": PASSWORD }))
        .dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);
    assert_eq!(json_body(response).await["error"], "Too many failed login attempts, try again later");
}

#[rocket::async_test]
async fn add_photo_validation() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(&dir).await;
    login(&client).await;

    // Missing title
    let (content_type, body) = multipart(&[("author", "Ann"), ("category", "nature")], Some(("image/png", PNG)));
    let response = client.post("/api/photos").header(content_type).body(body).dispatch().await;
    assert_eq!(response.status(), Status::BadRequest);
    assert_eq!(json_body(response).await["error"], "Title, author, and category are required");

    // Missing file
    let (content_type, body) = multipart(&[("title", "Dawn"), ("author", "Ann"), ("category", "nature")], None);
    let response = client.post("/api/photos").header(content_type).body(body).dispatch().await;
    assert_eq!(response.status(), Status::BadRequest);
    assert_eq!(json_body(response).await["error"], "Photo file is required");

    // Not an image
    let (content_type, body) = multipart(
        &[("title", "Dawn"), ("author", "Ann"), ("category", "nature")],
        Some(("text/plain", b"hello".as_slice())),
    );
    let response = client.post("/api/photos").header(content_type).body(body).dispatch().await;
    assert_eq!(response.status(), Status::BadRequest);
    assert_eq!(json_body(response).await["error"], "Only image files are allowed");

    assert!(list(&client, "").await.is_empty());
}

#[rocket::async_test]
async fn oversize_upload_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(&dir, |config| config.MAX_UPLOAD_SIZE = 64).await;
    login(&client).await;

    let mut big = PNG.to_vec();
    big.resize(4096, 0);
    let (content_type, body) = multipart(
        &[("title", "Dawn"), ("author", "Ann"), ("category", "nature")],
        Some(("image/png", big.as_slice())),
    );
    let response = client.post("/api/photos").header(content_type).body(body).dispatch().await;
    assert_eq!(response.status(), Status::BadRequest);
    assert_eq!(json_body(response).await["error"], "File size too large");
    assert!(list(&client, "").await.is_empty());
}

#[rocket::async_test]
async fn update_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(&dir).await;
    login(&client).await;
    let id = add_photo(&client, "Dawn", "nature", "2024").await;

    let (content_type, body) = multipart(&[("title", "Dusk"), ("year", "2023")], None);
    let response = client.put(format!("/api/photos/{id}")).header(content_type).body(body).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let photo = json_body(response).await;
    assert_eq!(photo["title"], "Dusk");
    assert_eq!(photo["author"], "Ann");
    assert_eq!(photo["year"], 2023);

    let (content_type, body) = multipart(&[("title", "Nope")], None);
    let response = client.put("/api/photos/999").header(content_type).body(body).dispatch().await;
    assert_eq!(response.status(), Status::NotFound);

    let response = client.delete(format!("/api/photos/{id}")).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(json_body(response).await["message"], "Photo deleted successfully");

    let response = client.delete(format!("/api/photos/{id}")).dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
    assert!(list(&client, "").await.is_empty());
}

#[rocket::async_test]
async fn uploaded_images_are_served() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(&dir).await;
    login(&client).await;
    add_photo(&client, "Dawn", "nature", "2024").await;

    let url = list(&client, "").await[0]["url"].as_str().unwrap().to_string();
    let response = client.get(url).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::PNG));
    assert_eq!(response.into_bytes().await.unwrap(), PNG);
}

#[rocket::async_test]
async fn ranking_and_sort_validation() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(&dir, |config| config.VOTER_IDENTITY = VoterIdentityKind::Address).await;
    login(&client).await;
    let first = add_photo(&client, "First", "nature", "2024").await;
    let second = add_photo(&client, "Second", "city", "2024").await;
    vote_from(&client, second, "10.0.0.1").await;

    let ranked = list(&client, "?sort=votes").await;
    assert_eq!(ranked[0]["id"], second);
    assert_eq!(ranked[1]["id"], first);

    let unsorted = list(&client, "").await;
    assert_eq!(unsorted[0]["id"], first);

    let response = client.get("/api/photos?sort=shutter").dispatch().await;
    assert_eq!(response.status(), Status::BadRequest);
    let response = client.get("/api/photos?year=last").dispatch().await;
    assert_eq!(response.status(), Status::BadRequest);
}

#[rocket::async_test]
async fn categories_and_unknown_routes() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(&dir).await;

    let response = client.get("/api/categories").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let categories = json_body(response).await;
    assert_eq!(categories.as_array().unwrap().len(), 8);
    assert_eq!(categories[0]["id"], "city");

    let response = client.get("/api/nothing-here").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
    assert_eq!(json_body(response).await["error"], "Route not found");
}

#[rocket::async_test]
async fn data_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let client = client_with(&dir, |config| config.VOTER_IDENTITY = VoterIdentityKind::Address).await;
        login(&client).await;
        let id = add_photo(&client, "Dawn", "nature", "2024").await;
        assert_eq!(vote_from(&client, id, "10.0.0.1").await.status(), Status::Ok);
        id
    };

    let client = client_with(&dir, |config| config.VOTER_IDENTITY = VoterIdentityKind::Address).await;
    let photos = list(&client, "").await;
    assert_eq!(photos[0]["id"], id);
    assert_eq!(photos[0]["votes"], 1);
    assert_eq!(vote_from(&client, id, "10.0.0.1").await.status(), Status::BadRequest);
}

#[rocket::async_test]
async fn storage_failures_hide_their_details() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(&dir).await;
    login(&client).await;
    let id = add_photo(&client, "Dawn", "nature", "2024").await;

    // Every later write of the ledger fails
    let votes = dir.path().join("data").join("votes.json");
    std::fs::remove_file(&votes).unwrap();
    std::fs::create_dir(&votes).unwrap();

    let response = client.post(format!("/api/photos/{id}/vote")).dispatch().await;
    assert_eq!(response.status(), Status::InternalServerError);
    let body = response.into_string().await.unwrap();
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "error": "Internal server error" }));
    assert!(!body.contains("votes.json"));

    assert_eq!(list(&client, "").await[0]["votes"], 0);
}
