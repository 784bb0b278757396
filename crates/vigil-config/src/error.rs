use miette::Diagnostic;
use thiserror::Error;

/// Configuration load/validation failures, rendered with `miette` when the
/// binary prints them to the operator.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    #[diagnostic(code(vigil_config::load))]
    Load(String),

    #[error("configuration failed validation: {0}")]
    #[diagnostic(code(vigil_config::validation))]
    Validation(String),
}

impl From<ConfigError> for vigil_common::IntakeError {
    fn from(err: ConfigError) -> Self {
        vigil_common::IntakeError::config_load(err.to_string())
    }
}
