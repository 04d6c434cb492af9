//! Console HTTP surface: session tokens and project listing.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::{ConsoleError, Project, ProjectInfo, Service};
use crate::web::{HttpError, bearer_token};

#[derive(Debug, Deserialize)]
struct TokenRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

pub fn router(service: Arc<Service>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v0/auth/token", post(token))
        .route("/api/v0/projects", get(list_projects).post(create_project))
        .with_state(service)
}

async fn token(
    State(service): State<Arc<Service>>,
    Json(request): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, HttpError> {
    let token = service.token(&request.email, &request.password).await?;
    Ok(Json(TokenResponse { token }))
}

async fn list_projects(
    State(service): State<Arc<Service>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Project>>, HttpError> {
    let token = bearer_token(&headers).ok_or_else(missing_token)?;
    let auth = service.authorize(token)?;
    Ok(Json(service.get_users_projects(&auth)?))
}

async fn create_project(
    State(service): State<Arc<Service>>,
    headers: HeaderMap,
    Json(info): Json<ProjectInfo>,
) -> Result<Json<Project>, HttpError> {
    let token = bearer_token(&headers).ok_or_else(missing_token)?;
    let auth = service.authorize(token)?;
    Ok(Json(service.create_project(&auth, info)?))
}

fn missing_token() -> HttpError {
    HttpError(ConsoleError::InvalidToken("missing bearer token".to_string()).into())
}
