//! Process-level configuration
//!
//! Everything is read once at startup into a [`ServiceConfig`] and passed by
//! reference to the components that need it. Missing storage settings are not
//! an error here; they become [`StorageConfig::Unconfigured`].

use std::path::PathBuf;

use crate::boundary::BoundaryConfig;
use crate::storage::StorageConfig;
use crate::RenderConfig;

/// Selects how the engine binary is located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Probe well-known system install paths before the bundled engine
    Production,
    /// Use the engine library's own discovery
    #[default]
    Development,
}

impl ExecutionMode {
    /// `production` (any case) selects [`ExecutionMode::Production`].
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            ExecutionMode::Production
        } else {
            ExecutionMode::Development
        }
    }

    pub fn is_production(self) -> bool {
        self == ExecutionMode::Production
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Production => f.write_str("production"),
            ExecutionMode::Development => f.write_str("development"),
        }
    }
}

/// Configuration for the HTTP service and every pipeline it spawns
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: String,
    pub render: RenderConfig,
    pub boundary: BoundaryConfig,
    pub storage: StorageConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            render: RenderConfig::default(),
            boundary: BoundaryConfig::default(),
            storage: StorageConfig::Unconfigured {
                reason: "STORAGE_DIR is not set".to_string(),
            },
        }
    }
}

impl ServiceConfig {
    /// Read configuration from the process environment.
    ///
    /// `APP_ENV`, `CHROME_PATH`, `BIND_ADDR`, `STORAGE_DIR`, `STORAGE_PREFIX`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = ServiceConfig::default();
        if let Some(mode) = non_empty("APP_ENV") {
            config.render.mode = ExecutionMode::parse(&mode);
        }
        config.render.chrome_path = non_empty("CHROME_PATH").map(PathBuf::from);
        if let Some(addr) = non_empty("BIND_ADDR") {
            config.bind_addr = addr;
        }
        config.storage = StorageConfig::from_parts(
            non_empty("STORAGE_DIR").map(PathBuf::from),
            non_empty("STORAGE_PREFIX").unwrap_or_default(),
        );
        config
    }
}
