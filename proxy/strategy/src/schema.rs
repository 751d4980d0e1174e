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

use std::sync::Arc;

use parking_lot::RwLock;
use sharding_error::error::{ConfigurationError, Error};
use tracing::info;

use crate::{
    config::SchemaConfig,
    keygen::KeyGenerators,
    result::SQLRouteResult,
    route::{Route, RouteInput, RouteStrategy},
};

/// A built logic schema, immutable once created.
#[derive(Debug)]
pub struct LogicSchema {
    name: String,
    strategy: RouteStrategy,
}

impl LogicSchema {
    pub fn build(config: &SchemaConfig) -> Result<Self, ConfigurationError> {
        Self::build_with_generators(config, &KeyGenerators::new())
    }

    pub fn build_with_generators(
        config: &SchemaConfig,
        generators: &KeyGenerators,
    ) -> Result<Self, ConfigurationError> {
        let strategy = RouteStrategy::with_generators(config, generators)?;
        Ok(LogicSchema { name: config.name.clone(), strategy })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> &RouteStrategy {
        &self.strategy
    }
}

impl Route for LogicSchema {
    type Error = Error;

    fn dispatch<'a>(&self, input: RouteInput<'a>) -> Result<SQLRouteResult<'a>, Self::Error> {
        self.strategy.dispatch(input)
    }
}

/// Holds the current schema snapshot. Routing works on a cloned `Arc`, so a
/// reload never affects statements already being routed. Key generators live
/// as long as the registry and are shared by every snapshot.
#[derive(Debug)]
pub struct RuleRegistry {
    current: RwLock<Arc<LogicSchema>>,
    generators: KeyGenerators,
}

impl RuleRegistry {
    pub fn build(config: &SchemaConfig) -> Result<Self, ConfigurationError> {
        let generators = KeyGenerators::new();
        let schema = LogicSchema::build_with_generators(config, &generators)?;
        Ok(RuleRegistry { current: RwLock::new(Arc::new(schema)), generators })
    }

    pub fn snapshot(&self) -> Arc<LogicSchema> {
        self.current.read().clone()
    }

    /// Builds the new schema first, the current one stays in place when the
    /// configuration is invalid.
    pub fn reload(&self, config: &SchemaConfig) -> Result<(), ConfigurationError> {
        let schema = Arc::new(LogicSchema::build_with_generators(config, &self.generators)?);
        *self.current.write() = schema;
        info!(schema = %config.name, "schema rules reloaded");
        Ok(())
    }
}
