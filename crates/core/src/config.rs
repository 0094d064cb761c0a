//! Tunables for the registry, sessions and worker supervisors.
//!
//! All structs deserialize with `#[serde(default)]` so a partial config file
//! (or none at all) yields working defaults. Call [`RegistryConfig::validate`]
//! before handing a config to [`crate::SessionRegistry::new`].

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Characters used for generated session identifiers.
pub const DEFAULT_ID_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Identifier width tried first.
pub const DEFAULT_ID_INITIAL_WIDTH: usize = 4;

/// Widest identifier before `create` gives up.
pub const DEFAULT_ID_MAX_WIDTH: usize = 32;

/// Collisions tolerated at one width before widening.
pub const DEFAULT_ID_ATTEMPTS_PER_WIDTH: usize = 10;

/// Informational messages kept per interaction channel.
pub const DEFAULT_MESSAGE_LOG_CAPACITY: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub id_alphabet: String,
    pub id_initial_width: usize,
    pub id_max_width: usize,
    pub id_attempts_per_width: usize,
    pub session: SessionConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            id_alphabet: DEFAULT_ID_ALPHABET.to_string(),
            id_initial_width: DEFAULT_ID_INITIAL_WIDTH,
            id_max_width: DEFAULT_ID_MAX_WIDTH,
            id_attempts_per_width: DEFAULT_ID_ATTEMPTS_PER_WIDTH,
            session: SessionConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Check the values that would otherwise make identifier generation or
    /// the message log misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id_alphabet.is_empty() {
            return Err(ConfigError::invalid("id_alphabet", "must not be empty"));
        }
        if !self.id_alphabet.is_ascii() {
            return Err(ConfigError::invalid("id_alphabet", "must be ASCII"));
        }
        if self.id_initial_width == 0 {
            return Err(ConfigError::invalid("id_initial_width", "must be at least 1"));
        }
        if self.id_max_width < self.id_initial_width {
            return Err(ConfigError::invalid(
                "id_max_width",
                format!(
                    "must be >= id_initial_width ({} < {})",
                    self.id_max_width, self.id_initial_width
                ),
            ));
        }
        if self.id_attempts_per_width == 0 {
            return Err(ConfigError::invalid(
                "id_attempts_per_width",
                "must be at least 1",
            ));
        }
        self.session.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub message_log_capacity: usize,
    pub supervisor: SupervisorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            message_log_capacity: DEFAULT_MESSAGE_LOG_CAPACITY,
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.message_log_capacity == 0 {
            return Err(ConfigError::invalid(
                "message_log_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Completion policy for a [`crate::WorkerSupervisor`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Return to `Idle` as soon as a job finishes cleanly instead of waiting
    /// for an explicit acknowledgement.
    pub auto_hide: bool,
    /// Also auto-hide jobs that ended because a stop was requested. Off by
    /// default so the user always sees the interruption.
    pub auto_hide_after_stop: bool,
}
