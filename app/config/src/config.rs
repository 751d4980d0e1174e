// Copyright 2022 SphereEx Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{env, fs, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sharding_error::error::ConfigurationError;
use strategy::{config::SchemaConfig, schema::RuleRegistry};
use thiserror::Error;
use tracing::{trace, Level};

use crate::env_const::*;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("parse config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("schema {name:?}: {source}")]
    Schema {
        name: String,
        #[source]
        source: ConfigurationError,
    },

    #[error("schema {0:?} is declared twice")]
    DuplicateSchema(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admin {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Admin {
    fn default() -> Self {
        Admin { log_level: default_log_level() }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterConfig {
    #[serde(default)]
    pub admin: Admin,
    #[serde(rename = "schema", default)]
    pub schemas: Vec<SchemaConfig>,
}

impl RouterConfig {
    pub fn get_admin(&self) -> &Admin {
        &self.admin
    }

    pub fn get_schemas(&self) -> &[SchemaConfig] {
        &self.schemas
    }

    /// Builds one registry per schema, keyed by schema name in declaration order.
    pub fn build_registries(&self) -> Result<IndexMap<String, RuleRegistry>, ConfigError> {
        let mut registries = IndexMap::with_capacity(self.schemas.len());
        for schema in self.schemas.iter() {
            if registries.contains_key(&schema.name) {
                return Err(ConfigError::DuplicateSchema(schema.name.clone()));
            }

            let registry = RuleRegistry::build(schema)
                .map_err(|source| ConfigError::Schema { name: schema.name.clone(), source })?;
            registries.insert(schema.name.clone(), registry);
        }
        Ok(registries)
    }
}

#[derive(Debug, Default, Clone)]
pub struct RouterConfigBuilder {
    config_path: Option<String>,
    log_level: Option<String>,
}

impl RouterConfigBuilder {
    pub fn new() -> Self {
        RouterConfigBuilder::default()
    }

    pub fn with_config_path(mut self, path: &str) -> Self {
        self.config_path = Some(path.to_string());
        self
    }

    pub fn with_log_level(mut self, level: &str) -> Self {
        self.log_level = Some(level.to_string());
        self
    }

    pub fn build_from_env(mut self) -> Self {
        if let Ok(path) = env::var(ENV_ROUTER_CONFIG) {
            self.config_path = Some(path);
        }
        if let Ok(level) = env::var(ENV_ROUTER_LOG_LEVEL) {
            self.log_level = Some(level);
        }
        self
    }

    pub fn build_from_str(&self, content: &str) -> Result<RouterConfig, ConfigError> {
        let mut config: RouterConfig = toml::from_str(content)?;
        if let Some(level) = self.log_level.as_ref().filter(|x| !x.is_empty()) {
            config.admin.log_level = level.clone();
        }
        Ok(config)
    }

    pub fn build_from_file(&self, path: &str) -> Result<RouterConfig, ConfigError> {
        let content = fs::read_to_string(path)?;
        self.build_from_str(&content)
    }

    /// Environment values override the ones set on the builder.
    pub fn load_config(self) -> Result<RouterConfig, ConfigError> {
        let builder = self.build_from_env();
        let path = builder.config_path.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let config = builder.build_from_file(&path)?;

        trace!("configs: {:#?}", config);
        Ok(config)
    }
}

/// Installs the global fmt subscriber. An unknown level keeps the subscriber's
/// default, a second call is a no-op.
pub fn init_logging(admin: &Admin) {
    let _ = tracing_subscriber::fmt().with_max_level(Level::from_str(admin.log_level.as_str()).ok()).try_init();
}
