use std::sync::Arc;

use tracing::info;

use crate::github::{GitHubClient, GitHubError};
use crate::http::HttpClient;
use crate::secrets::{CredentialError, CredentialResolver, SecretsBackend};
use crate::types::{ProvisionRequest, RepoConfig};

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to fetch template URL: {0}")]
    TemplateUrl(#[source] CredentialError),
    #[error("error fetching secret token: {0}")]
    Token(#[source] CredentialError),
    #[error(transparent)]
    Request(#[from] GitHubError),
}

pub struct TemplateRepoCreator<S, H> {
    credentials: Arc<CredentialResolver<S>>,
    github: Arc<GitHubClient<H>>,
}

impl<S, H> TemplateRepoCreator<S, H>
where
    S: SecretsBackend,
    H: HttpClient,
{
    pub fn new(credentials: Arc<CredentialResolver<S>>, github: Arc<GitHubClient<H>>) -> Self {
        Self {
            credentials,
            github,
        }
    }

    pub fn repo_config(&self, request: &ProvisionRequest) -> Result<RepoConfig, TemplateError> {
        let template_url = self
            .credentials
            .template_url()
            .map_err(TemplateError::TemplateUrl)?;
        Ok(RepoConfig::from_request(request, template_url))
    }

    pub fn create_from_template(&self, config: &RepoConfig) -> Result<(), TemplateError> {
        let token = self.credentials.github_token().map_err(TemplateError::Token)?;
        self.github.create_from_template(&token, config)?;
        info!(name = %config.name, "GitHub repository generated from template");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::http::{HttpRequest, HttpResponse, TransportError};
    use crate::secrets::{CredentialCache, GITHUB_TOKEN_KEY, InMemorySecrets, TEMPLATE_URL_KEY};

    const TEMPLATE_URL: &str = "https://api.github.test/repos/acme/template/generate";

    fn creator(
        pairs: &[(&str, &str)],
        status: u16,
        seen: Arc<Mutex<Vec<HttpRequest>>>,
    ) -> TemplateRepoCreator<
        InMemorySecrets,
        impl Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + use<>,
    > {
        let http = move |request: &HttpRequest| -> Result<HttpResponse, TransportError> {
            seen.lock().expect("lock").push(request.clone());
            Ok(HttpResponse::new(status, "{}"))
        };
        TemplateRepoCreator::new(
            Arc::new(CredentialResolver::new(
                InMemorySecrets::from_pairs(pairs.iter().copied()),
                Arc::new(CredentialCache::new()),
                "github_token",
            )),
            Arc::new(GitHubClient::new(http, "https://api.github.test")),
        )
    }

    fn request() -> ProvisionRequest {
        ProvisionRequest::new("svc-orders", "Orders service").expect("request")
    }

    #[test]
    fn posts_generated_repo_with_token() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let creator = creator(
            &[(GITHUB_TOKEN_KEY, "tok"), (TEMPLATE_URL_KEY, TEMPLATE_URL)],
            201,
            Arc::clone(&seen),
        );

        let config = creator.repo_config(&request()).expect("config");
        assert_eq!(config.template_url, TEMPLATE_URL);
        creator.create_from_template(&config).expect("created");

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url, TEMPLATE_URL);
        assert_eq!(seen[0].header_value("Authorization"), Some("token tok"));
        let body = seen[0].body.as_ref().expect("body");
        assert_eq!(body["name"], "svc-orders");
        assert_eq!(body["description"], "Orders service");
    }

    #[test]
    fn missing_template_url_is_reported_as_such() {
        let creator = creator(&[(GITHUB_TOKEN_KEY, "tok")], 201, Arc::default());
        let err = creator.repo_config(&request()).expect_err("no template url");
        assert!(matches!(err, TemplateError::TemplateUrl(_)));
        assert_eq!(
            err.to_string(),
            "failed to fetch template URL: secret key TEMPLATE_URL not found"
        );
    }

    #[test]
    fn missing_token_never_reaches_github() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let creator = creator(&[(TEMPLATE_URL_KEY, TEMPLATE_URL)], 201, Arc::clone(&seen));
        let config = creator.repo_config(&request()).expect("config");

        let err = creator.create_from_template(&config).expect_err("no token");

        assert!(matches!(err, TemplateError::Token(_)));
        assert!(seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn rejection_keeps_status_and_body() {
        let creator = creator(
            &[(GITHUB_TOKEN_KEY, "tok"), (TEMPLATE_URL_KEY, TEMPLATE_URL)],
            422,
            Arc::default(),
        );
        let config = creator.repo_config(&request()).expect("config");

        let err = creator.create_from_template(&config).expect_err("rejected");

        assert_eq!(err.to_string(), "status code: 422, response: {}");
    }
}
