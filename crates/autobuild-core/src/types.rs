use serde::{Deserialize, Serialize};

pub const DEFAULT_DESCRIPTION: &str = "Created from a template via automated setup";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("Repository name is required")]
    EmptyName,
    #[error("invalid repository name {0:?}: use letters, digits, '-', '_' or '.', not starting with '-'")]
    InvalidName(String),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProvisionRequest {
    name: String,
    description: String,
}

impl ProvisionRequest {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Result<Self, RequestError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(RequestError::EmptyName);
        }
        if !is_valid_name(&name) {
            return Err(RequestError::InvalidName(name));
        }
        let description = description.into();
        let description = if description.is_empty() {
            DEFAULT_DESCRIPTION.to_string()
        } else {
            description
        };
        Ok(Self { name, description })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

// The name doubles as a directory name for the working copy and a git
// argument, so it can be neither a relative path nor an option.
fn is_valid_name(name: &str) -> bool {
    name != "."
        && name != ".."
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoConfig {
    pub name: String,
    pub description: String,
    pub private: bool,
    pub auto_init: bool,
    pub template_url: String,
}

impl RepoConfig {
    pub fn from_request(request: &ProvisionRequest, template_url: impl Into<String>) -> Self {
        Self {
            name: request.name().to_string(),
            description: request.description().to_string(),
            private: true,
            auto_init: true,
            template_url: template_url.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStep {
    CreateRegistry,
    CreateTemplateRepo,
    Settle,
    CloneRewritePush,
    Done,
}

impl ProvisionStep {
    /// Phrase used in `Failed to <phrase>: <cause>` messages.
    pub fn action(self) -> &'static str {
        match self {
            ProvisionStep::CreateRegistry => "create ECR repository",
            ProvisionStep::CreateTemplateRepo => "create Git repository",
            ProvisionStep::Settle => "wait for Git repository",
            ProvisionStep::CloneRewritePush => "clone and push repository",
            ProvisionStep::Done => "finish provisioning",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRecord {
    pub step: ProvisionStep,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionReport {
    pub name: String,
    pub description: String,
    pub steps: Vec<StepRecord>,
}

impl ProvisionReport {
    pub fn completed(&self) -> bool {
        self.steps
            .last()
            .is_some_and(|record| record.step == ProvisionStep::Done)
    }
}
