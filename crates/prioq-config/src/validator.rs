//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, StoreBackend};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Convert the first error into a `ConfigError`.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(err) => Err(ConfigError::InvalidValue {
                field: err.path,
                message: err.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_server(config, &mut result);
        Self::validate_auth(config, &mut result);
        Self::validate_store(config, &mut result);
        Self::validate_queue(config, &mut result);
        Self::validate_logging(config, &mut result);

        Ok(result)
    }

    fn validate_server(config: &Config, result: &mut ValidationResult) {
        if config.server.port == 0 {
            result.add_error(ValidationError::new("server.port", "Port cannot be 0"));
        }

        if config.server.host.is_empty() {
            result.add_error(ValidationError::new("server.host", "Host cannot be empty"));
        }
    }

    fn validate_auth(config: &Config, result: &mut ValidationResult) {
        if config.auth.api_keys.is_empty() {
            result.add_warning(ValidationWarning::new(
                "auth.api_keys",
                "No API keys configured, every request will be rejected",
            ));
        }

        if config.auth.api_keys.iter().any(|k| k.trim().is_empty()) {
            result.add_error(ValidationError::new(
                "auth.api_keys",
                "API keys cannot be empty strings",
            ));
        }
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        if config.store.backend == StoreBackend::Sqlite {
            match config.store.path.as_deref() {
                None | Some("") => result.add_error(ValidationError::new(
                    "store.path",
                    "sqlite backend requires a database path",
                )),
                Some(_) => {}
            }
        }

        if config.store.retention_secs == 0 {
            result.add_error(ValidationError::new(
                "store.retention_secs",
                "retention_secs must be greater than 0",
            ));
        } else if config.store.retention_secs < 60 {
            result.add_warning(ValidationWarning::new(
                "store.retention_secs",
                "retention is under a minute, tasks may expire before they are claimed",
            ));
        }

        if config.store.purge_interval_secs == 0 {
            result.add_error(ValidationError::new(
                "store.purge_interval_secs",
                "purge_interval_secs must be greater than 0",
            ));
        }
    }

    fn validate_queue(config: &Config, result: &mut ValidationResult) {
        let queue = &config.queue;

        if queue.notifier_capacity == 0 {
            result.add_error(ValidationError::new(
                "queue.notifier_capacity",
                "notifier_capacity must be greater than 0",
            ));
        }

        if queue.default_dequeue_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "queue.default_dequeue_timeout_secs",
                "default_dequeue_timeout_secs must be greater than 0",
            ));
        }

        if queue.default_dequeue_timeout_secs > queue.max_dequeue_timeout_secs {
            result.add_error(ValidationError::new(
                "queue.default_dequeue_timeout_secs",
                format!(
                    "default timeout {}s exceeds max_dequeue_timeout_secs {}s",
                    queue.default_dequeue_timeout_secs, queue.max_dequeue_timeout_secs
                ),
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        if config.logging.level.trim().is_empty() {
            result.add_error(ValidationError::new(
                "logging.level",
                "Log level cannot be empty",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
