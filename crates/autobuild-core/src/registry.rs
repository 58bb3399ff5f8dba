use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use aws_sdk_ecr::error::{DisplayErrorContext, SdkError};
use aws_sdk_ecr::operation::create_repository::CreateRepositoryError;
use tracing::{info, warn};

use crate::aws;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("repository {0} already exists")]
    AlreadyExists(String),
    #[error("failed to create repository: {0}")]
    Create(String),
}

impl RegistryError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, RegistryError::AlreadyExists(_))
    }
}

pub trait ImageRegistry: Send + Sync {
    fn create_repository(&self, name: &str) -> Result<(), RegistryError>;
}

#[derive(Debug, Clone)]
pub struct EcrRegistry {
    region: String,
}

impl EcrRegistry {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }
}

impl ImageRegistry for EcrRegistry {
    fn create_repository(&self, name: &str) -> Result<(), RegistryError> {
        let rt = aws::runtime()
            .map_err(|e| RegistryError::Create(format!("failed to create runtime: {e}")))?;

        rt.block_on(async {
            let config = aws::load_config(&self.region).await;
            let client = aws_sdk_ecr::Client::new(&config);

            match client.create_repository().repository_name(name).send().await {
                Ok(output) => {
                    let uri = output
                        .repository()
                        .and_then(|repo| repo.repository_uri())
                        .unwrap_or_default();
                    info!(name, uri, "ECR repository created");
                    Ok(())
                }
                Err(err) => Err(classify_create_error(name, err)),
            }
        })
    }
}

fn classify_create_error<R>(name: &str, err: SdkError<CreateRepositoryError, R>) -> RegistryError
where
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let exists = err
        .as_service_error()
        .is_some_and(CreateRepositoryError::is_repository_already_exists_exception);
    if exists {
        warn!(name, "ECR repository already exists");
        return RegistryError::AlreadyExists(name.to_string());
    }
    RegistryError::Create(DisplayErrorContext(&err).to_string())
}

/// Registry that keeps repository names in memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    repositories: Mutex<BTreeSet<String>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let repositories = names.into_iter().map(str::to_string).collect();
        Self {
            repositories: Mutex::new(repositories),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.repositories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}

impl ImageRegistry for InMemoryRegistry {
    fn create_repository(&self, name: &str) -> Result<(), RegistryError> {
        let mut repositories = self
            .repositories
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !repositories.insert(name.to_string()) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }
}
