//! Engine configuration with defaults, environment overrides and TOML files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Tunables shared by all controllers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay between automatic scripted round advances (ms)
    pub auto_advance_delay_ms: u64,

    /// Rounds in a live debate
    pub max_rounds: u32,

    /// Wall-clock limit for one user turn (s)
    pub turn_time_limit_secs: u64,

    /// Upper bound on one generation call (s)
    pub generation_timeout_secs: u64,

    /// How long an operation waits for the per-session lock (ms)
    pub lock_timeout_ms: u64,

    /// Directory used by the file-backed session store
    pub store_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_advance_delay_ms: 3_000,
            max_rounds: 5,
            turn_time_limit_secs: 120,
            generation_timeout_secs: 30,
            lock_timeout_ms: 5_000,
            store_dir: PathBuf::from(".debate-sessions"),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables. Overrides are validated
    /// like a TOML document.
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(ms) = env_parse("DEBATE_AUTO_ADVANCE_MS") {
            config.auto_advance_delay_ms = ms;
        }
        if let Some(n) = env_parse("DEBATE_MAX_ROUNDS") {
            config.max_rounds = n;
        }
        if let Some(secs) = env_parse("DEBATE_TURN_LIMIT_SECS") {
            config.turn_time_limit_secs = secs;
        }
        if let Some(secs) = env_parse("DEBATE_GENERATION_TIMEOUT_SECS") {
            config.generation_timeout_secs = secs;
        }
        if let Some(ms) = env_parse("DEBATE_LOCK_TIMEOUT_MS") {
            config.lock_timeout_ms = ms;
        }
        if let Ok(dir) = std::env::var("DEBATE_STORE_DIR") {
            config.store_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(toml_str: &str) -> EngineResult<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| EngineError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Reject values the controllers cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_rounds == 0 {
            return Err(EngineError::config("max_rounds must be at least 1"));
        }
        if self.auto_advance_delay_ms == 0 {
            return Err(EngineError::config("auto_advance_delay_ms must be positive"));
        }
        if self.turn_time_limit_secs == 0 {
            return Err(EngineError::config("turn_time_limit_secs must be positive"));
        }
        if self.generation_timeout_secs == 0 {
            return Err(EngineError::config("generation_timeout_secs must be positive"));
        }
        Ok(())
    }

    pub fn auto_advance_delay(&self) -> Duration {
        Duration::from_millis(self.auto_advance_delay_ms)
    }

    pub fn turn_time_limit(&self) -> Duration {
        Duration::from_secs(self.turn_time_limit_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
