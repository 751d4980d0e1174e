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

use sharding_error::error::{ConfigurationError, Error};

use crate::{
    config::SchemaConfig,
    keygen::KeyGenerators,
    readwritesplitting::MasterSlaveRouter,
    result::SQLRouteResult,
    rule::ShardingRule,
    sharding_route::ShardingRouter,
    stmt::ParsedStatement,
    value::Value,
};

/// Values for hint strategies, supplied by the caller per statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteHints {
    pub database_values: Vec<Value>,
    pub table_values: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct RouteInput<'a> {
    pub statement: &'a ParsedStatement,
    // One entry per batch execution, may be empty for plain statements.
    pub parameter_sets: &'a [Vec<Value>],
    pub hints: Option<&'a RouteHints>,
    pub force_master: bool,
}

impl<'a> RouteInput<'a> {
    pub fn new(statement: &'a ParsedStatement, parameter_sets: &'a [Vec<Value>]) -> Self {
        RouteInput { statement, parameter_sets, hints: None, force_master: false }
    }

    pub fn with_hints(mut self, hints: &'a RouteHints) -> Self {
        self.hints = Some(hints);
        self
    }

    pub fn with_force_master(mut self, force_master: bool) -> Self {
        self.force_master = force_master;
        self
    }
}

/// A statement executed without parameters is routed as one empty entry.
pub fn normalize_parameter_sets(parameter_sets: &[Vec<Value>]) -> Vec<Vec<Value>> {
    if parameter_sets.is_empty() {
        return vec![vec![]];
    }
    parameter_sets.to_vec()
}

pub trait Route {
    type Error;

    fn dispatch<'a>(&self, input: RouteInput<'a>) -> Result<SQLRouteResult<'a>, Self::Error>;
}

#[derive(Debug)]
pub enum RouteStrategy {
    Sharding(ShardingRouter),
    MasterSlave(MasterSlaveRouter),
}

impl RouteStrategy {
    /// Sharding rules win when a schema declares both, the master-slave
    /// rule is only used for schemas without table rules.
    pub fn new(config: &SchemaConfig) -> Result<Self, ConfigurationError> {
        Self::with_generators(config, &KeyGenerators::new())
    }

    pub fn with_generators(config: &SchemaConfig, generators: &KeyGenerators) -> Result<Self, ConfigurationError> {
        if let Some(sharding) = &config.sharding {
            let rule = ShardingRule::with_generators(sharding, generators)?;
            return Ok(RouteStrategy::Sharding(ShardingRouter::new(rule)));
        }

        match &config.master_slave {
            Some(ms) => Ok(RouteStrategy::MasterSlave(MasterSlaveRouter::new(ms)?)),
            None => Err(ConfigurationError::EmptySchema(config.name.clone())),
        }
    }
}

impl Route for RouteStrategy {
    type Error = Error;

    fn dispatch<'a>(&self, input: RouteInput<'a>) -> Result<SQLRouteResult<'a>, Self::Error> {
        match self {
            Self::Sharding(ins) => ins.dispatch(input),
            Self::MasterSlave(ins) => {
                let entries = normalize_parameter_sets(input.parameter_sets);
                Ok(ins.route_statement(input.statement, &entries, input.force_master))
            }
        }
    }
}
