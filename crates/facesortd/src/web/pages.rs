use super::{html, ApiError, Upload};
use crate::organizer::Organizer;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};

/// Form field value that selects automatic matching.
const AUTOMATIC: &str = "auto";

/// An [`ApiError`] rendered as an HTML page.
pub struct PageError(ApiError);

impl<E: Into<ApiError>> From<E> for PageError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let ApiError { status, message } = self.0;
        if status.is_server_error() {
            tracing::error!(status = %status, error = %message, "page failed");
        }
        (status, Html(html::error_page(&message))).into_response()
    }
}

pub async fn index(State(organizer): State<Organizer>) -> Result<Html<String>, PageError> {
    let persons = organizer.persons().await?;
    let collections = organizer.collections().await?;
    let runs = organizer.recent_runs()?;
    Ok(Html(html::index_page(&persons, &runs, &collections)))
}

pub async fn register(State(organizer): State<Organizer>, multipart: Multipart) -> Result<Html<String>, PageError> {
    let upload = Upload::read(multipart).await?;
    let name = upload.field("name");
    tracing::info!(name, samples = upload.files.len(), "form: register");

    let samples = upload.files.iter().map(|f| f.path.clone()).collect();
    let registration = organizer.register(name, samples).await?;
    Ok(Html(html::registration_page(&registration)))
}

pub async fn categorize(State(organizer): State<Organizer>, multipart: Multipart) -> Result<Html<String>, PageError> {
    let upload = Upload::read(multipart).await?;
    let person = match upload.field("person") {
        "" | AUTOMATIC => None,
        name => Some(name),
    };
    tracing::info!(photos = upload.files.len(), person = ?person, "form: categorize");

    let report = organizer.categorize(upload.files.clone(), person).await?;
    Ok(Html(html::report_page(&report)))
}

pub async fn collection_file(
    State(organizer): State<Organizer>,
    Path((folder, file)): Path<(String, String)>,
) -> Result<Response, PageError> {
    let path = organizer.collection_file(&folder, &file)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::new(StatusCode::NOT_FOUND, e.to_string()))?;
    let content_type = image::ImageFormat::from_path(&path)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}
