//! JSON routes. Photo and sample paths are paths on the daemon's host.

use super::ApiError;
use crate::categorizer::{CategorizeReport, PhotoInput};
use crate::engine::DetectResult;
use crate::organizer::{Collection, Organizer, Registration, Status};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use facesort_registry::Person;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize)]
pub struct RegisterRequest {
    name: String,
    samples: Vec<PathBuf>,
}

#[derive(Deserialize)]
pub struct CategorizeRequest {
    photos: Vec<PathBuf>,
    #[serde(default)]
    person: Option<String>,
}

#[derive(Deserialize)]
pub struct DetectRequest {
    photo: PathBuf,
}

pub async fn status(State(organizer): State<Organizer>) -> Result<Json<Status>, ApiError> {
    Ok(Json(organizer.status().await?))
}

pub async fn persons(State(organizer): State<Organizer>) -> Result<Json<Vec<Person>>, ApiError> {
    Ok(Json(organizer.persons().await?))
}

pub async fn register(
    State(organizer): State<Organizer>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let Json(req) = payload?;
    tracing::info!(name = %req.name, samples = req.samples.len(), "api: register");
    let registration = organizer.register(&req.name, req.samples).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

pub async fn remove(State(organizer): State<Organizer>, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    tracing::info!(name = %name, "api: remove");
    organizer.remove(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn categorize(
    State(organizer): State<Organizer>,
    payload: Result<Json<CategorizeRequest>, JsonRejection>,
) -> Result<Json<CategorizeReport>, ApiError> {
    let Json(req) = payload?;
    tracing::info!(photos = req.photos.len(), person = ?req.person, "api: categorize");
    let photos = req.photos.into_iter().map(PhotoInput::from_path).collect();
    Ok(Json(organizer.categorize(photos, req.person.as_deref()).await?))
}

pub async fn detect(
    State(organizer): State<Organizer>,
    payload: Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<DetectResult>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(organizer.detect(req.photo).await?))
}

pub async fn collections(State(organizer): State<Organizer>) -> Result<Json<Vec<Collection>>, ApiError> {
    Ok(Json(organizer.collections().await?))
}

pub async fn runs(State(organizer): State<Organizer>) -> Result<Json<Vec<CategorizeReport>>, ApiError> {
    Ok(Json(organizer.recent_runs()?))
}
