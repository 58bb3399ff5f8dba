use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::http::{HttpClient, HttpRequest, HttpResponse, TransportError};
use crate::types::RepoConfig;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const ACCEPT: &str = "application/vnd.github+json";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GitHubError {
    #[error("status code: {status}, response: {body}")]
    RemoteApi { status: u16, body: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl GitHubError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GitHubError::RemoteApi { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

pub struct GitHubClient<H> {
    http: H,
    api_base: String,
}

impl<H: HttpClient> GitHubClient<H> {
    pub fn new(http: H, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn authenticated_login(&self, token: &str) -> Result<String, GitHubError> {
        let request = authorized(HttpRequest::get(format!("{}/user", self.api_base)), token);
        let response = self.http.send(&request)?;
        if !response.is_success() {
            return Err(remote_error(response));
        }
        let user: User =
            serde_json::from_str(&response.body).map_err(|e| GitHubError::Decode(e.to_string()))?;
        debug!(login = %user.login, "resolved GitHub identity");
        Ok(user.login)
    }

    pub fn create_from_template(&self, token: &str, config: &RepoConfig) -> Result<(), GitHubError> {
        let body = json!({
            "name": config.name,
            "description": config.description,
            "private": config.private,
            "include_all_branches": false,
        });

        let request = authorized(HttpRequest::post(&config.template_url, body), token)
            .header("Content-Type", "application/json");
        let response = self.http.send(&request)?;
        if response.status == 201 {
            return Ok(());
        }
        Err(remote_error(response))
    }

    /// `Ok(false)` while GitHub still answers 404 for the repository.
    pub fn repository_exists(&self, token: &str, owner: &str, name: &str) -> Result<bool, GitHubError> {
        let url = format!("{}/repos/{}/{}", self.api_base, owner, name);
        let response = self.http.send(&authorized(HttpRequest::get(url), token))?;
        match response.status {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(remote_error(response)),
        }
    }
}

fn authorized(request: HttpRequest, token: &str) -> HttpRequest {
    request
        .header("Authorization", format!("token {token}"))
        .header("Accept", ACCEPT)
}

fn remote_error(response: HttpResponse) -> GitHubError {
    GitHubError::RemoteApi {
        status: response.status,
        body: response.body,
    }
}
