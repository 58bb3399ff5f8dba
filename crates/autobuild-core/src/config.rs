use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{EngineOptions, SettlePolicy};
use crate::github::DEFAULT_API_BASE;
use crate::secrets::DEFAULT_SECRET_ID;
use crate::workflow::DEFAULT_GIT_HOST;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8082";
const DEFAULT_SETTLE_SECS: u64 = 20;
const DEFAULT_SETTLE_ATTEMPTS: u32 = 6;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const POLL_INITIAL_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var} must be at least 1, got {value:?}")]
    NotPositive { var: &'static str, value: String },
    #[error("AUTOBUILD_SETTLE must be `fixed` or `poll`, got {0:?}")]
    InvalidSettleMode(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub aws_region: String,
    pub secret_id: String,
    pub github_api: String,
    pub git_host: String,
    pub work_dir: PathBuf,
    pub settle: SettlePolicy,
    pub http_timeout: Duration,
    pub listen: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            aws_region: DEFAULT_REGION.into(),
            secret_id: DEFAULT_SECRET_ID.into(),
            github_api: DEFAULT_API_BASE.into(),
            git_host: DEFAULT_GIT_HOST.into(),
            work_dir: env::temp_dir(),
            settle: SettlePolicy::Fixed(Duration::from_secs(DEFAULT_SETTLE_SECS)),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            listen: DEFAULT_LISTEN.into(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let settle_secs = number(&lookup, "AUTOBUILD_SETTLE_SECS", DEFAULT_SETTLE_SECS)?;
        let settle_delay = Duration::from_secs(settle_secs);
        let settle = match var("AUTOBUILD_SETTLE").as_deref().map(str::trim) {
            None | Some("fixed") => SettlePolicy::Fixed(settle_delay),
            Some("poll") => SettlePolicy::Poll {
                attempts: positive(&lookup, "AUTOBUILD_SETTLE_ATTEMPTS", DEFAULT_SETTLE_ATTEMPTS)?,
                initial_delay: POLL_INITIAL_DELAY.min(settle_delay),
                max_delay: settle_delay,
            },
            Some(other) => return Err(ConfigError::InvalidSettleMode(other.to_string())),
        };

        Ok(Self {
            aws_region: var("AUTOBUILD_AWS_REGION").unwrap_or(defaults.aws_region),
            secret_id: var("AUTOBUILD_SECRET_ID").unwrap_or(defaults.secret_id),
            github_api: var("AUTOBUILD_GITHUB_API").unwrap_or(defaults.github_api),
            git_host: var("AUTOBUILD_GIT_HOST").unwrap_or(defaults.git_host),
            work_dir: var("AUTOBUILD_WORK_DIR").map_or(defaults.work_dir, PathBuf::from),
            settle,
            http_timeout: Duration::from_secs(number(
                &lookup,
                "AUTOBUILD_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            listen: var("AUTOBUILD_LISTEN").unwrap_or(defaults.listen),
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            git_host: self.git_host.clone(),
            work_dir: self.work_dir.clone(),
            settle: self.settle.clone(),
        }
    }
}

fn number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) if value.trim().is_empty() => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
    }
}

fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u32,
) -> Result<u32, ConfigError> {
    let value = number(lookup, var, default)?;
    if value == 0 {
        return Err(ConfigError::NotPositive {
            var,
            value: value.to_string(),
        });
    }
    Ok(value)
}
