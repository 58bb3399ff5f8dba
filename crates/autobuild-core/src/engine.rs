use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::github::{GitHubClient, GitHubError};
use crate::http::HttpClient;
use crate::registry::{ImageRegistry, RegistryError};
use crate::secrets::{CredentialError, CredentialResolver, SecretsBackend};
use crate::template::{TemplateError, TemplateRepoCreator};
use crate::types::{ProvisionReport, ProvisionRequest, ProvisionStep, StepRecord};
use crate::workflow::{CloneError, CloneRewritePush, CommandRunner, DEFAULT_GIT_HOST};

/// How long to wait for GitHub to finish materializing a generated repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlePolicy {
    /// Unconditional sleep.
    Fixed(Duration),
    /// Probe the repository with exponential backoff between attempts.
    Poll {
        attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
    },
}

impl Default for SettlePolicy {
    fn default() -> Self {
        SettlePolicy::Fixed(Duration::from_secs(20))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub git_host: String,
    pub work_dir: PathBuf,
    pub settle: SettlePolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            git_host: DEFAULT_GIT_HOST.to_string(),
            work_dir: env::temp_dir(),
            settle: SettlePolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettleError {
    #[error("error fetching GitHub token: {0}")]
    Token(#[source] CredentialError),
    #[error("error fetching GitHub username: {0}")]
    Identity(#[source] GitHubError),
    #[error("error checking repository: {0}")]
    Probe(#[source] GitHubError),
    #[error("repository not available after {attempts} attempts")]
    NotReady { attempts: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Settle(#[from] SettleError),
    #[error(transparent)]
    Clone(#[from] CloneError),
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to {}: {}", .step.action(), .source)]
pub struct ProvisionError {
    pub step: ProvisionStep,
    pub source: StepError,
}

impl ProvisionError {
    /// HTTP-style status for front ends.
    pub fn status_code(&self) -> u16 {
        match &self.source {
            StepError::Registry(err) if err.is_already_exists() => 409,
            _ => 500,
        }
    }
}

pub trait Provisioner: Send + Sync {
    fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionReport, ProvisionError>;
}

pub struct ProvisionEngine<R, S, H, C> {
    registry: R,
    credentials: Arc<CredentialResolver<S>>,
    github: Arc<GitHubClient<H>>,
    templates: TemplateRepoCreator<S, H>,
    workflow: CloneRewritePush<S, H, C>,
    settle: SettlePolicy,
}

impl<R, S, H, C> ProvisionEngine<R, S, H, C>
where
    R: ImageRegistry,
    S: SecretsBackend,
    H: HttpClient,
    C: CommandRunner,
{
    pub fn new(
        registry: R,
        credentials: CredentialResolver<S>,
        github: GitHubClient<H>,
        runner: C,
        options: EngineOptions,
    ) -> Self {
        let credentials = Arc::new(credentials);
        let github = Arc::new(github);
        let templates = TemplateRepoCreator::new(Arc::clone(&credentials), Arc::clone(&github));
        let workflow = CloneRewritePush::new(
            Arc::clone(&credentials),
            Arc::clone(&github),
            runner,
            options.git_host,
            options.work_dir,
        );
        Self {
            registry,
            credentials,
            github,
            templates,
            workflow,
            settle: options.settle,
        }
    }

    pub fn run(&self, request: &ProvisionRequest) -> Result<ProvisionReport, ProvisionError> {
        let name = request.name();
        let mut steps = Vec::new();
        info!(name, "provisioning repositories");

        run_step(ProvisionStep::CreateRegistry, &mut steps, || {
            Ok(self.registry.create_repository(name)?)
        })?;

        run_step(ProvisionStep::CreateTemplateRepo, &mut steps, || {
            let config = self.templates.repo_config(request)?;
            Ok(self.templates.create_from_template(&config)?)
        })?;

        run_step(ProvisionStep::Settle, &mut steps, || Ok(self.settle(name)?))?;

        run_step(ProvisionStep::CloneRewritePush, &mut steps, || {
            Ok(self.workflow.run(name)?)
        })?;

        steps.push(StepRecord {
            step: ProvisionStep::Done,
            elapsed_ms: 0,
        });
        info!(name, "ECR and Git repositories created successfully");

        Ok(ProvisionReport {
            name: name.to_string(),
            description: request.description().to_string(),
            steps,
        })
    }

    pub fn credentials(&self) -> &CredentialResolver<S> {
        &self.credentials
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    fn settle(&self, name: &str) -> Result<(), SettleError> {
        let (attempts, initial_delay, max_delay) = match &self.settle {
            SettlePolicy::Fixed(delay) => {
                debug!(name, delay_secs = delay.as_secs_f64(), "waiting for repository");
                thread::sleep(*delay);
                return Ok(());
            }
            SettlePolicy::Poll {
                attempts,
                initial_delay,
                max_delay,
            } => (*attempts, *initial_delay, *max_delay),
        };

        let token = self.credentials.github_token().map_err(SettleError::Token)?;
        let owner = self
            .github
            .authenticated_login(&token)
            .map_err(SettleError::Identity)?;

        let mut delay = initial_delay;
        for attempt in 1..=attempts {
            if self
                .github
                .repository_exists(&token, &owner, name)
                .map_err(SettleError::Probe)?
            {
                debug!(name, attempt, "repository is available");
                return Ok(());
            }
            if attempt < attempts {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                debug!(name, attempt, delay_ms, "repository not ready");
                thread::sleep(delay);
                delay = delay.saturating_mul(2).min(max_delay);
            }
        }
        Err(SettleError::NotReady { attempts })
    }
}

impl<R, S, H, C> Provisioner for ProvisionEngine<R, S, H, C>
where
    R: ImageRegistry,
    S: SecretsBackend,
    H: HttpClient,
    C: CommandRunner,
{
    fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionReport, ProvisionError> {
        self.run(request)
    }
}

fn run_step<T>(
    step: ProvisionStep,
    records: &mut Vec<StepRecord>,
    action: impl FnOnce() -> Result<T, StepError>,
) -> Result<T, ProvisionError> {
    debug!(step = ?step, "starting step");
    let started = Instant::now();
    match action() {
        Ok(value) => {
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            records.push(StepRecord { step, elapsed_ms });
            Ok(value)
        }
        Err(source) => {
            warn!(step = ?step, error = %source, "provisioning step failed");
            Err(ProvisionError { step, source })
        }
    }
}
