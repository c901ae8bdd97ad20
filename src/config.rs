//! Configuration loading via `ortho-config`.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Coordination gateway configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, Eq, OrthoConfig, PartialEq)]
#[ortho_config(prefix = "CARAVAN")]
pub struct CoordinatorConfig {
    /// Base URL of the migration cluster's coordination gateway. This
    /// value is required.
    pub endpoint: String,
    /// Bearer token presented to the gateway, when it requires one.
    pub api_token: Option<String>,
    /// Directory migration reports are written into. Defaults to the
    /// working directory.
    #[ortho_config(default = ".".to_owned())]
    pub report_output_dir: String,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

impl CoordinatorConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in caravan.toml",
                metadata.description, metadata.env_var, metadata.toml_key, metadata.section
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI
    /// flags in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge
    /// sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    /// Values still merge defaults, configuration files, and environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("caravan")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages include guidance on
    /// how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is
    /// empty and [`ConfigError::Invalid`] when a value is present but
    /// unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.endpoint,
            &FieldMetadata::new(
                "coordination gateway endpoint",
                "CARAVAN_ENDPOINT",
                "endpoint",
                "caravan",
            ),
        )?;
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "endpoint {:?} must start with http:// or https://",
                self.endpoint
            )));
        }
        Self::require_field(
            &self.report_output_dir,
            &FieldMetadata::new(
                "report output directory",
                "CARAVAN_REPORT_OUTPUT_DIR",
                "report_output_dir",
                "caravan",
            ),
        )?;
        Ok(())
    }

    /// Returns the report output directory as a typed path.
    #[must_use]
    pub fn report_output_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.report_output_dir)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Eq, Error, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration field holds an unusable value.
    #[error("invalid configuration field: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
