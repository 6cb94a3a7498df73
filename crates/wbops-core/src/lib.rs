use thiserror::Error;

pub mod app_config;
pub mod codes;
pub mod config;
pub mod cron;
pub mod lock_key;
pub mod secrets;

pub use app_config::{AppConfig, Environment};
pub use codes::{reason, RunStatus, SourceCode, TriggeredBy};
pub use config::{load_app_config, load_app_config_from_env};
pub use cron::{next_occurrence, parse_timezone, validate_cron_expr, CronError};
pub use lock_key::run_lock_key;
pub use secrets::{mask_token, PassthroughCipher, SecretError, TokenCipher};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for environment variable {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
