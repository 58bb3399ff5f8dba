use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::{ProvisionEngine, ProvisionError, Provisioner};
use crate::github::GitHubClient;
use crate::http::ReqwestClient;
use crate::registry::EcrRegistry;
use crate::secrets::{AwsSecretsManager, CredentialCache, CredentialResolver};
use crate::types::{ProvisionReport, ProvisionRequest};
use crate::workflow::GitCli;

pub type LiveEngine = ProvisionEngine<EcrRegistry, AwsSecretsManager, ReqwestClient, GitCli>;

pub fn live_engine(config: &EngineConfig, cache: Arc<CredentialCache>) -> LiveEngine {
    ProvisionEngine::new(
        EcrRegistry::new(&config.aws_region),
        CredentialResolver::new(
            AwsSecretsManager::new(&config.aws_region),
            cache,
            &config.secret_id,
        ),
        GitHubClient::new(ReqwestClient::new(config.http_timeout), &config.github_api),
        GitCli,
        config.engine_options(),
    )
}

/// Builds a fresh engine for every request around one shared credential cache.
///
/// The blocking HTTP client and the per-call AWS runtimes are created and
/// dropped on the calling thread, which must not be inside an async runtime.
pub struct LiveProvisioner {
    config: EngineConfig,
    cache: Arc<CredentialCache>,
}

impl LiveProvisioner {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cache: Arc::new(CredentialCache::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }
}

impl Provisioner for LiveProvisioner {
    fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionReport, ProvisionError> {
        live_engine(&self.config, Arc::clone(&self.cache)).run(request)
    }
}
