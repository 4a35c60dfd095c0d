//! HTTP surface: HTML forms for people and a JSON API for the CLI.

mod api;
mod html;
mod pages;

use crate::categorizer::PhotoInput;
use crate::engine::EngineError;
use crate::organizer::{Organizer, OrganizerError};
use crate::placement::sanitize_file_name;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use facesort_registry::RegistryError;
use std::collections::HashMap;
use tempfile::TempDir;

pub fn router(organizer: Organizer, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(pages::index))
        .route("/register", post(pages::register))
        .route("/categorize", post(pages::categorize))
        .route("/collections/{folder}/{file}", get(pages::collection_file))
        .route("/api/status", get(api::status))
        .route("/api/persons", get(api::persons).post(api::register))
        .route("/api/persons/{name}", delete(api::remove))
        .route("/api/categorize", post(api::categorize))
        .route("/api/detect", post(api::detect))
        .route("/api/collections", get(api::collections))
        .route("/api/runs", get(api::runs))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(organizer)
}

/// An error answered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(message: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
    }
}

impl From<OrganizerError> for ApiError {
    fn from(e: OrganizerError) -> Self {
        let status = match &e {
            OrganizerError::Registry(
                RegistryError::InvalidName { .. } | RegistryError::ReservedName(_) | RegistryError::NoSamples,
            )
            | OrganizerError::NoPhotos => StatusCode::BAD_REQUEST,
            OrganizerError::Registry(RegistryError::NotFound(_))
            | OrganizerError::PersonNotFound(_)
            | OrganizerError::FileNotFound(_) => StatusCode::NOT_FOUND,
            OrganizerError::NoFaceInSamples { .. } | OrganizerError::Engine(EngineError::Photo(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            OrganizerError::Engine(EngineError::ChannelClosed | EngineError::Spawn(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        } else {
            tracing::debug!(status = %self.status, error = %self.message, "request rejected");
        }
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

/// Files and text fields of a multipart form. Files are written to a
/// temporary directory that lives as long as the upload.
struct Upload {
    _dir: TempDir,
    files: Vec<PhotoInput>,
    fields: HashMap<String, String>,
}

impl Upload {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let dir = tempfile::Builder::new()
            .prefix("facesort-upload-")
            .tempdir()
            .map_err(ApiError::internal)?;
        let mut files = Vec::new();
        let mut fields = HashMap::new();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(sanitize_file_name) {
                Some(file_name) => {
                    let data = field.bytes().await?;
                    // Browsers send an empty part for an untouched file input.
                    if data.is_empty() {
                        continue;
                    }
                    let path = dir.path().join(format!("{:04}-{file_name}", files.len()));
                    tokio::fs::write(&path, &data).await.map_err(ApiError::internal)?;
                    files.push(PhotoInput { path, file_name });
                }
                None => {
                    fields.insert(name, field.text().await?);
                }
            }
        }

        tracing::debug!(files = files.len(), fields = fields.len(), "upload received");
        Ok(Self {
            _dir: dir,
            files,
            fields,
        })
    }

    fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or_default().trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organizer::tests::organizer;
    use crate::testutil::{photo_png_bytes, write_photo, BLUE, RED};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "facesort-test-boundary";

    fn app(dir: &TempDir) -> Router {
        router(organizer(dir), 16 * 1024 * 1024)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// `files` are (field, file name, bytes); `texts` are (field, value).
    fn multipart_request(uri: &str, texts: &[(&str, &str)], files: &[(&str, &str, Vec<u8>)]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in texts {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                    .as_bytes(),
            );
        }
        for (name, file_name, bytes) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_api_register_then_categorize() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        let sample = write_photo(dir.path(), "alice.png", RED);
        let photo = write_photo(dir.path(), "beach.png", RED);

        let (status, body) = send_json(
            &app,
            json_request("POST", "/api/persons", json!({ "name": "Alice", "samples": [sample] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["person"]["name"], "Alice");
        assert_eq!(body["added"], 1);

        let (status, body) = send_json(
            &app,
            json_request("POST", "/api/categorize", json!({ "photos": [photo] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcomes"][0]["status"], "matched");
        assert_eq!(body["outcomes"][0]["matches"][0]["person"], "Alice");
        assert_eq!(body["summary"]["matched"], 1);
        assert!(dir.path().join("data/categorized/Alice/beach.png").exists());
    }

    #[tokio::test]
    async fn test_api_errors_are_json() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let (status, body) = send_json(
            &app,
            json_request("POST", "/api/persons", json!({ "name": "unknown", "samples": ["/x.png"] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("reserved"));

        let (status, body) = send_json(
            &app,
            Request::builder()
                .method("DELETE")
                .uri("/api/persons/Nobody")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        let dark = write_photo(dir.path(), "dark.png", [0, 0, 0]);
        let (status, body) = send_json(
            &app,
            json_request("POST", "/api/persons", json!({ "name": "Bob", "samples": [dark] })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "no face detected in any sample");

        let (status, _) = send_json(
            &app,
            json_request("POST", "/api/categorize", json!({ "photos": [], "person": "Ghost" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_api_listing_and_remove() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        let sample = write_photo(dir.path(), "s.png", BLUE);
        send(&app, json_request("POST", "/api/persons", json!({ "name": "Bob", "samples": [sample] }))).await;

        let (status, body) = send_json(&app, Request::get("/api/persons").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "Bob");
        assert_eq!(body[0]["samples"].as_array().unwrap().len(), 1);

        let (status, body) = send_json(&app, Request::get("/api/status").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["persons"], 1);
        assert_eq!(body["engine_running"], true);

        let (status, _) = send(
            &app,
            Request::builder()
                .method("DELETE")
                .uri("/api/persons/bob")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send_json(&app, Request::get("/api/persons").body(Body::empty()).unwrap()).await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_api_detect_and_runs() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        let photo = write_photo(dir.path(), "p.png", RED);

        let (status, body) = send_json(&app, json_request("POST", "/api/detect", json!({ "photo": photo }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["width"], 64);
        assert_eq!(body["faces"].as_array().unwrap().len(), 2);

        let (status, _) = send_json(
            &app,
            json_request("POST", "/api/detect", json!({ "photo": dir.path().join("missing.png") })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        send(&app, json_request("POST", "/api/categorize", json!({ "photos": [photo] }))).await;
        let (_, runs) = send_json(&app, Request::get("/api/runs").body(Body::empty()).unwrap()).await;
        assert_eq!(runs.as_array().unwrap().len(), 1);
        let (_, collections) = send_json(&app, Request::get("/api/collections").body(Body::empty()).unwrap()).await;
        assert_eq!(collections, json!([{ "name": "unknown", "photos": ["p.png"] }]));
    }

    #[tokio::test]
    async fn test_bad_json_body() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        let request = Request::builder()
            .method("POST")
            .uri("/api/categorize")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send_json(&app, request).await;
        assert!(status.is_client_error());
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_form_register_and_categorize() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let (status, page) = send(
            &app,
            multipart_request(
                "/register",
                &[("name", "Alice")],
                &[("samples", "me.png", photo_png_bytes(RED)), ("samples", "", Vec::new())],
            ),
        )
        .await;
        let page = String::from_utf8(page).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(page.contains("Alice"));
        assert!(dir.path().join("data/registered/Alice/sample_1.png").exists());

        let (status, page) = send(
            &app,
            multipart_request(
                "/categorize",
                &[("person", "auto")],
                &[
                    ("photos", "party.png", photo_png_bytes(RED)),
                    ("photos", "sea.png", photo_png_bytes(BLUE)),
                ],
            ),
        )
        .await;
        let page = String::from_utf8(page).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(page.contains("/collections/Alice/party.png"));
        assert!(page.contains("/collections/unknown/sea.png"));
        assert!(dir.path().join("data/categorized/Alice/party.png").exists());
        assert!(dir.path().join("data/categorized/unknown/sea.png").exists());

        let (status, bytes) = send(&app, Request::get("/collections/Alice/party.png").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, photo_png_bytes(RED));

        let (status, page) = send(&app, Request::get("/").body(Body::empty()).unwrap()).await;
        let page = String::from_utf8(page).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(page.contains("<option value=\"Alice\">"));
        assert!(page.contains("/collections/unknown/sea.png"));
    }

    #[tokio::test]
    async fn test_form_errors_render_html() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let (status, page) = send(
            &app,
            multipart_request("/register", &[("name", "<b>x</b>/y")], &[("samples", "a.png", photo_png_bytes(RED))]),
        )
        .await;
        let page = String::from_utf8(page).unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(page.contains("&lt;b&gt;"));
        assert!(!page.contains("<b>x</b>"));

        let (status, _) = send(&app, multipart_request("/categorize", &[("person", "auto")], &[])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_collection_file_not_found() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        let (status, _) = send(&app, Request::get("/collections/unknown/nothing.png").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Request::get("/collections/..%2F/registry.db").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
