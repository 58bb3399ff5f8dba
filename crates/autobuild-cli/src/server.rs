//! HTTP front end for the provisioning engine.

use std::sync::Arc;

use autobuild_core::{ProvisionRequest, Provisioner};
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use tracing::{debug, error, info};

pub const SUCCESS_MESSAGE: &str = "ECR and Git repositories created successfully";

#[derive(Clone)]
pub struct AppState {
    provisioner: Arc<dyn Provisioner>,
}

impl AppState {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self { provisioner }
    }
}

// Absent and null fields both count as empty.
#[derive(Debug, Deserialize)]
struct CreateRepoBody {
    #[serde(default)]
    repo_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/create-repo",
            post(create_repo).fallback(method_not_allowed),
        )
        .with_state(state)
}

async fn create_repo(State(state): State<AppState>, body: Bytes) -> Response {
    let body: CreateRepoBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            debug!(error = %err, "rejecting malformed request body");
            return (StatusCode::BAD_REQUEST, "Bad request").into_response();
        }
    };

    let request = match ProvisionRequest::new(
        body.repo_name.unwrap_or_default(),
        body.description.unwrap_or_default(),
    ) {
        Ok(request) => request,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    info!(name = %request.name(), "create-repo request accepted");
    let provisioner = Arc::clone(&state.provisioner);
    let outcome = tokio::task::spawn_blocking(move || provisioner.provision(&request)).await;

    match outcome {
        Ok(Ok(_report)) => (StatusCode::OK, SUCCESS_MESSAGE).into_response(),
        Ok(Err(err)) => {
            let status = StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, err.to_string()).into_response()
        }
        Err(err) => {
            error!(error = %err, "provisioning task did not complete");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

async fn method_not_allowed() -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response()
}
