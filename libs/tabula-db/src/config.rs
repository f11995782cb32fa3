use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tabula_security::{AuthPermission, ReferenceId};

use crate::connect::ConnectOpts;

/// Prefix for environment overrides, e.g. `TABULA__DATABASE__DSN`.
pub const ENV_PREFIX: &str = "TABULA__";

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub permission_cache: PermissionCacheConfig,

    /// Members of this group pass every permission check.
    #[serde(default)]
    pub admin_group_id: Option<ReferenceId>,

    /// Mask for tables created without one.
    #[serde(default = "default_permission")]
    pub default_permission: AuthPermission,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            permission_cache: PermissionCacheConfig::default(),
            admin_group_id: None,
            default_permission: default_permission(),
        }
    }
}

impl EngineConfig {
    /// Layer defaults, an optional YAML file and `TABULA__*` env vars.
    ///
    /// # Errors
    /// Returns the figment error if a source cannot be read or a value does
    /// not fit its field.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<figment::Error>> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)
    }

    #[must_use]
    pub fn admin_group(&self) -> ReferenceId {
        self.admin_group_id.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_dsn")]
    pub dsn: String,

    #[serde(default = "default_max_conns")]
    pub max_conns: u32,

    #[serde(default = "default_min_conns")]
    pub min_conns: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: default_dsn(),
            max_conns: default_max_conns(),
            min_conns: default_min_conns(),
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub fn connect_opts(&self) -> ConnectOpts {
        ConnectOpts {
            max_conns: Some(self.max_conns),
            min_conns: Some(self.min_conns),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PermissionCacheConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for PermissionCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: default_max_entries(),
        }
    }
}

fn default_permission() -> AuthPermission {
    AuthPermission::DEFAULT
}

fn default_dsn() -> String {
    "sqlite::memory:".to_owned()
}

fn default_max_conns() -> u32 {
    1
}

fn default_min_conns() -> u32 {
    1
}

fn default_max_entries() -> usize {
    10_000
}
