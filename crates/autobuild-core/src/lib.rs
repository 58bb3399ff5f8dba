mod aws;
pub mod config;
pub mod engine;
pub mod github;
pub mod http;
pub mod live;
pub mod registry;
pub mod secrets;
pub mod template;
pub mod types;
pub mod workflow;

pub use config::{ConfigError, EngineConfig};
pub use engine::{
    EngineOptions, ProvisionEngine, ProvisionError, Provisioner, SettleError, SettlePolicy,
    StepError,
};
pub use github::{GitHubClient, GitHubError};
pub use http::{HttpClient, HttpRequest, HttpResponse, Method, ReqwestClient, TransportError};
pub use live::{LiveEngine, LiveProvisioner, live_engine};
pub use registry::{EcrRegistry, ImageRegistry, InMemoryRegistry, RegistryError};
pub use secrets::{
    AwsSecretsManager, CredentialCache, CredentialError, CredentialResolver, InMemorySecrets,
    SecretsBackend,
};
pub use template::{TemplateError, TemplateRepoCreator};
pub use types::{
    DEFAULT_DESCRIPTION, ProvisionReport, ProvisionRequest, ProvisionStep, RepoConfig,
    RequestError, StepRecord,
};
pub use workflow::{
    CloneError, CloneRewritePush, CommandError, CommandRunner, GitCli, GitCommand,
    rewrite_module_line,
};
