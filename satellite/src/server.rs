//! Public and private listeners of the API role, plus the admin and marketing
//! surfaces.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::console::{User, UserStatus};
use crate::contact::ContactService;
use crate::db::ConsoleDb;
use crate::overlay::CheckInInfo;
use crate::web::HttpError;

#[derive(Debug, Serialize)]
struct NodeInfo {
    id: String,
    address: String,
}

/// Storage nodes and uplinks: health, identity and check-in.
pub fn public_router(contact: Arc<ContactService>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/node", get(node_info))
        .route("/contact/check-in", post(check_in))
        .with_state(contact)
}

/// Operator-facing endpoints on the private address.
pub fn private_router(contact: Arc<ContactService>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/node", get(node_info))
        .with_state(contact)
}

async fn node_info(State(contact): State<Arc<ContactService>>) -> Json<NodeInfo> {
    let local = contact.local();
    Json(NodeInfo {
        id: local.id.to_string(),
        address: local.address.clone(),
    })
}

async fn check_in(
    State(contact): State<Arc<ContactService>>,
    Json(info): Json<CheckInInfo>,
) -> Result<StatusCode, HttpError> {
    contact.check_in(&info)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Clone)]
struct AdminState {
    console: Arc<dyn ConsoleDb>,
    auth_token: Arc<str>,
}

#[derive(Debug, Serialize)]
struct AdminUser {
    id: String,
    full_name: String,
    email: String,
    status: UserStatus,
    project_limit: usize,
}

impl From<User> for AdminUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id.to_string(),
            full_name: user.full_name,
            email: user.email,
            status: user.status,
            project_limit: user.project_limit,
        }
    }
}

/// Administration interface. Every `/api` request must carry the configured
/// token in the `Authorization` header; an empty token disables them.
pub fn admin_router(console: Arc<dyn ConsoleDb>, auth_token: &str) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/users/{email}", get(admin_get_user))
        .with_state(AdminState {
            console,
            auth_token: Arc::from(auth_token),
        })
}

async fn admin_get_user(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(email): Path<String>,
) -> axum::response::Response {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if state.auth_token.is_empty() || presented != Some(&*state.auth_token) {
        return StatusCode::FORBIDDEN.into_response();
    }
    match state.console.get_user_by_email(&email) {
        Ok(Some(user)) => Json(AdminUser::from(user)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => HttpError(e).into_response(),
    }
}

pub fn marketing_router() -> Router {
    Router::new().route("/health", get(|| async { "ok" }))
}
