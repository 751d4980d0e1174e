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

use loadbalance::{balance::AlgorithmName, node::Node};
use serde::{Deserialize, Serialize};

use crate::{keygen::KeyGeneratorType, sharding::ShardingAlgorithmName};

/// A logic schema carries either sharding rules, which may themselves use
/// master-slave groups as data sources, or a single master-slave rule.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SchemaConfig {
    pub name: String,
    pub sharding: Option<ShardingRuleConfig>,
    pub master_slave: Option<MasterSlaveRuleConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ShardingRuleConfig {
    #[serde(default)]
    pub data_sources: Vec<String>,
    #[serde(rename = "table", default)]
    pub tables: Vec<TableRuleConfig>,
    #[serde(default)]
    pub binding_tables: Vec<Vec<String>>,
    #[serde(default)]
    pub broadcast_tables: Vec<String>,
    pub default_data_source: Option<String>,
    pub default_database_strategy: Option<StrategyConfig>,
    pub default_table_strategy: Option<StrategyConfig>,
    pub default_key_generator: Option<KeyGeneratorType>,
    #[serde(rename = "master_slave", default)]
    pub master_slave_rules: Vec<MasterSlaveRuleConfig>,
    #[serde(default)]
    pub props: ShardingProps,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ShardingProps {
    // Log every routed unit at info level.
    #[serde(default)]
    pub sql_show: bool,
    #[serde(default)]
    pub worker_id: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TableRuleConfig {
    pub logic_table: String,
    // Empty means every data source with the logic table name.
    #[serde(default)]
    pub actual_data_nodes: String,
    pub database_strategy: Option<StrategyConfig>,
    pub table_strategy: Option<StrategyConfig>,
    pub key_generator: Option<KeyGeneratorConfig>,
    pub logic_index: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct KeyGeneratorConfig {
    pub column: String,
    #[serde(rename = "type")]
    pub generator_type: Option<KeyGeneratorType>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    None,
    Standard {
        sharding_column: String,
        algorithm_name: ShardingAlgorithmName,
        // Defaults to the number of candidates.
        #[serde(default)]
        sharding_count: Option<u64>,
    },
    Complex {
        sharding_columns: Vec<String>,
        algorithm_expression: String,
    },
    Hint {
        algorithm_name: ShardingAlgorithmName,
        #[serde(default)]
        sharding_count: Option<u64>,
    },
    Inline {
        sharding_column: String,
        algorithm_expression: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MasterSlaveRuleConfig {
    pub name: String,
    pub master: String,
    #[serde(default)]
    pub slaves: Vec<Node>,
    #[serde(default)]
    pub load_balance: AlgorithmName,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TargetRole {
    Read,
    ReadWrite,
}

impl Default for TargetRole {
    fn default() -> Self {
        TargetRole::ReadWrite
    }
}
