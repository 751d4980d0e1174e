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

use std::{collections::HashMap, fmt, sync::Arc};

use indexmap::IndexMap;
use sharding_error::error::ConfigurationError;
use tracing::trace;

use crate::{
    config::{ShardingProps, ShardingRuleConfig, StrategyConfig, TableRuleConfig},
    datanode::{expand_data_nodes, DataNode},
    keygen::{KeyGenerator, KeyGenerators},
    readwritesplitting::MasterSlaveRouter,
    sharding::{Sharding, ShardingStrategy},
};

#[derive(Clone)]
pub struct KeyGeneratorRule {
    pub column: String,
    pub generator: Arc<dyn KeyGenerator>,
}

impl fmt::Debug for KeyGeneratorRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGeneratorRule").field("column", &self.column).finish()
    }
}

#[derive(Debug)]
pub struct TableRule {
    pub logic_table: String,
    pub actual_data_nodes: Vec<DataNode>,
    pub database_strategy: ShardingStrategy,
    pub table_strategy: ShardingStrategy,
    pub key_generator: Option<KeyGeneratorRule>,
    pub logic_index: Option<String>,
}

impl TableRule {
    /// Distinct data sources in declaration order.
    pub fn data_sources(&self) -> Vec<String> {
        let mut res: Vec<String> = vec![];
        for node in self.actual_data_nodes.iter() {
            if !res.contains(&node.data_source) {
                res.push(node.data_source.clone());
            }
        }
        res
    }

    /// Distinct actual tables in declaration order.
    pub fn actual_tables(&self) -> Vec<String> {
        let mut res: Vec<String> = vec![];
        for node in self.actual_data_nodes.iter() {
            if !res.contains(&node.table) {
                res.push(node.table.clone());
            }
        }
        res
    }

    pub fn tables_in(&self, data_source: &str) -> Vec<String> {
        self.actual_data_nodes
            .iter()
            .filter(|x| x.data_source == data_source)
            .map(|x| x.table.clone())
            .collect()
    }

    pub fn sharding_columns(&self) -> Vec<String> {
        let mut columns = self.database_strategy.sharding_columns().to_vec();
        for column in self.table_strategy.sharding_columns() {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        columns
    }

    pub fn is_hint(&self) -> bool {
        self.database_strategy.is_hint() || self.table_strategy.is_hint()
    }
}

/// Validated sharding rules of one logic schema, read-only while routing.
#[derive(Debug)]
pub struct ShardingRule {
    table_rules: IndexMap<String, TableRule>,
    binding_groups: Vec<Vec<String>>,
    broadcast_tables: Vec<String>,
    data_sources: Vec<String>,
    default_data_source: Option<String>,
    master_slave: IndexMap<String, MasterSlaveRouter>,
    props: ShardingProps,
}

impl ShardingRule {
    pub fn new(config: &ShardingRuleConfig) -> Result<Self, ConfigurationError> {
        Self::with_generators(config, &KeyGenerators::new())
    }

    /// Key generators come from `generators`, so rules rebuilt from the same
    /// set keep generating unique keys.
    pub fn with_generators(
        config: &ShardingRuleConfig,
        generators: &KeyGenerators,
    ) -> Result<Self, ConfigurationError> {
        let mut master_slave = IndexMap::new();
        for ms in config.master_slave_rules.iter() {
            master_slave.insert(ms.name.clone(), MasterSlaveRouter::new(ms)?);
        }

        let mut registered = config.data_sources.clone();
        for name in master_slave.keys() {
            if !registered.contains(name) {
                registered.push(name.clone());
            }
        }

        let mut claimed: HashMap<DataNode, String> = HashMap::new();
        let mut table_rules = IndexMap::new();

        for table in config.tables.iter() {
            let rule = build_table_rule(config, table, &registered, generators)?;
            if table_rules.contains_key(&rule.logic_table) {
                return Err(ConfigurationError::DuplicateTableRule(rule.logic_table));
            }

            for node in rule.actual_data_nodes.iter() {
                if let Some(first) = claimed.insert(node.clone(), rule.logic_table.clone()) {
                    return Err(ConfigurationError::DuplicateDataNode {
                        node: node.to_string(),
                        first,
                        second: rule.logic_table.clone(),
                    });
                }
            }

            trace!(table = %rule.logic_table, nodes = rule.actual_data_nodes.len(), "table rule built");
            table_rules.insert(rule.logic_table.clone(), rule);
        }

        let binding_groups = config
            .binding_tables
            .iter()
            .map(|group| group.iter().map(|x| x.trim().to_ascii_lowercase()).collect::<Vec<_>>())
            .filter(|group| !group.is_empty())
            .collect::<Vec<_>>();
        for group in binding_groups.iter() {
            check_binding_group(&table_rules, group)?;
        }

        if let Some(default) = &config.default_data_source {
            if !registered.is_empty() && !registered.contains(default) {
                return Err(ConfigurationError::DataSourceNotFound(default.clone()));
            }
        }

        let mut data_sources = registered;
        if data_sources.is_empty() {
            for rule in table_rules.values() {
                for ds in rule.data_sources() {
                    if !data_sources.contains(&ds) {
                        data_sources.push(ds);
                    }
                }
            }
            if let Some(default) = &config.default_data_source {
                if !data_sources.contains(default) {
                    data_sources.push(default.clone());
                }
            }
        }

        Ok(ShardingRule {
            table_rules,
            binding_groups,
            broadcast_tables: config.broadcast_tables.iter().map(|x| x.trim().to_ascii_lowercase()).collect(),
            data_sources,
            default_data_source: config.default_data_source.clone(),
            master_slave,
            props: config.props.clone(),
        })
    }

    pub fn table_rule(&self, logic_table: &str) -> Option<&TableRule> {
        self.table_rules.get(&logic_table.to_ascii_lowercase())
    }

    pub fn table_rules(&self) -> impl Iterator<Item = &TableRule> {
        self.table_rules.values()
    }

    /// Table rule declaring `logic_index`.
    pub fn table_rule_by_index(&self, logic_index: &str) -> Option<&TableRule> {
        self.table_rules.values().find(|x| {
            x.logic_index.as_deref().map_or(false, |idx| idx.eq_ignore_ascii_case(logic_index))
        })
    }

    pub fn is_broadcast(&self, logic_table: &str) -> bool {
        self.broadcast_tables.iter().any(|x| x.eq_ignore_ascii_case(logic_table))
    }

    pub fn is_binding(&self, a: &str, b: &str) -> bool {
        let (a, b) = (a.to_ascii_lowercase(), b.to_ascii_lowercase());
        self.binding_groups.iter().any(|group| group.contains(&a) && group.contains(&b))
    }

    /// Every data source of the schema, used for broadcast.
    pub fn data_sources(&self) -> &[String] {
        &self.data_sources
    }

    pub fn default_data_source(&self) -> Option<&str> {
        self.default_data_source.as_deref()
    }

    pub fn master_slave(&self, name: &str) -> Option<&MasterSlaveRouter> {
        self.master_slave.get(name)
    }

    pub fn props(&self) -> &ShardingProps {
        &self.props
    }
}

fn build_table_rule(
    config: &ShardingRuleConfig,
    table: &TableRuleConfig,
    registered: &[String],
    generators: &KeyGenerators,
) -> Result<TableRule, ConfigurationError> {
    let logic_table = table.logic_table.trim().to_ascii_lowercase();
    if logic_table.is_empty() {
        return Err(ConfigurationError::EmptyLogicTable);
    }

    let actual_data_nodes = if table.actual_data_nodes.trim().is_empty() {
        registered.iter().map(|ds| DataNode::new(ds, &logic_table)).collect()
    } else {
        expand_data_nodes(&table.actual_data_nodes)?
    };
    if actual_data_nodes.is_empty() {
        return Err(ConfigurationError::EmptyDataNodes(logic_table));
    }

    if !registered.is_empty() {
        if let Some(node) = actual_data_nodes.iter().find(|x| !registered.contains(&x.data_source)) {
            return Err(ConfigurationError::DataSourceNotFound(node.data_source.clone()));
        }
    }

    let strategy = |own: &Option<StrategyConfig>, default: &Option<StrategyConfig>| {
        match own.as_ref().or(default.as_ref()) {
            Some(config) => ShardingStrategy::build(config),
            None => Ok(ShardingStrategy::None),
        }
    };
    let database_strategy = strategy(&table.database_strategy, &config.default_database_strategy)?;
    let table_strategy = strategy(&table.table_strategy, &config.default_table_strategy)?;

    let key_generator = match &table.key_generator {
        Some(kg) => {
            let kind = kg.generator_type.or(config.default_key_generator).unwrap_or_default();
            let generator = generators.get_or_build(kind, config.props.worker_id)?;
            Some(KeyGeneratorRule { column: kg.column.trim().to_ascii_lowercase(), generator })
        }
        None => None,
    };

    Ok(TableRule {
        logic_table,
        actual_data_nodes,
        database_strategy,
        table_strategy,
        key_generator,
        logic_index: table.logic_index.as_ref().map(|x| x.trim().to_ascii_lowercase()),
    })
}

// Binding tables must spread over the same data sources with the same
// number of tables in each, so suffixes line up by position.
fn check_binding_group(
    table_rules: &IndexMap<String, TableRule>,
    group: &[String],
) -> Result<(), ConfigurationError> {
    let mut rules = vec![];
    for name in group.iter() {
        match table_rules.get(name) {
            Some(rule) => rules.push(rule),
            None => return Err(ConfigurationError::UnknownBindingTable(name.clone())),
        }
    }

    let first = rules[0];
    for other in rules.iter().skip(1) {
        let consistent = first.data_sources() == other.data_sources()
            && first
                .data_sources()
                .iter()
                .all(|ds| first.tables_in(ds).len() == other.tables_in(ds).len());
        if !consistent {
            return Err(ConfigurationError::InconsistentBindingTables(
                first.logic_table.clone(),
                other.logic_table.clone(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::{KeyGeneratorConfig, MasterSlaveRuleConfig},
        sharding::ShardingAlgorithmName,
    };

    fn table(name: &str, nodes: &str) -> TableRuleConfig {
        TableRuleConfig {
            logic_table: name.to_string(),
            actual_data_nodes: nodes.to_string(),
            ..Default::default()
        }
    }

    fn config() -> ShardingRuleConfig {
        ShardingRuleConfig {
            data_sources: vec!["ds_0".to_string(), "ds_1".to_string()],
            tables: vec![
                table("t_order", "ds_${0..1}.t_order_${0..1}"),
                table("t_order_item", "ds_${0..1}.t_order_item_${0..1}"),
            ],
            binding_tables: vec![vec!["t_order".to_string(), "T_ORDER_ITEM".to_string()]],
            default_table_strategy: Some(StrategyConfig::Standard {
                sharding_column: "order_id".to_string(),
                algorithm_name: ShardingAlgorithmName::Mod,
                sharding_count: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_rule() {
        let rule = ShardingRule::new(&config()).unwrap();
        let t_order = rule.table_rule("T_Order").unwrap();
        assert_eq!(t_order.data_sources(), vec!["ds_0", "ds_1"]);
        assert_eq!(t_order.actual_tables(), vec!["t_order_0", "t_order_1"]);
        assert_eq!(t_order.tables_in("ds_1"), vec!["t_order_0", "t_order_1"]);
        assert_eq!(t_order.sharding_columns(), vec!["order_id"]);
        assert!(rule.is_binding("t_order_item", "t_order"));
        assert!(!rule.is_binding("t_order", "t_user"));
    }

    #[test]
    fn test_default_data_nodes() {
        let mut config = config();
        config.binding_tables.clear();
        config.tables.push(table("t_user", ""));
        let rule = ShardingRule::new(&config).unwrap();
        assert_eq!(
            rule.table_rule("t_user").unwrap().actual_data_nodes,
            vec![DataNode::new("ds_0", "t_user"), DataNode::new("ds_1", "t_user")]
        );
    }

    #[test]
    fn test_shared_key_generator() {
        let mut config = config();
        for table in config.tables.iter_mut() {
            table.key_generator = Some(KeyGeneratorConfig { column: "ID".to_string(), generator_type: None });
        }
        let rule = ShardingRule::new(&config).unwrap();
        let a = rule.table_rule("t_order").unwrap().key_generator.clone().unwrap();
        let b = rule.table_rule("t_order_item").unwrap().key_generator.clone().unwrap();
        assert_eq!(a.column, "id");
        assert!(Arc::ptr_eq(&a.generator, &b.generator));
    }

    #[test]
    fn test_master_slave_group_as_data_source() {
        let mut config = config();
        config.data_sources = vec!["ds_0".to_string()];
        config.binding_tables.clear();
        config.tables = vec![table("t_order", "ds_0.t_order, ms_ds.t_order")];
        config.master_slave_rules = vec![MasterSlaveRuleConfig {
            name: "ms_ds".to_string(),
            master: "ds_master".to_string(),
            ..Default::default()
        }];

        let rule = ShardingRule::new(&config).unwrap();
        assert_eq!(rule.data_sources(), &["ds_0", "ms_ds"]);
        assert!(rule.master_slave("ms_ds").is_some());
    }

    #[test]
    fn test_invalid_rules() {
        let mut c = config();
        c.tables.push(table("", "ds_0.t"));
        assert!(matches!(ShardingRule::new(&c), Err(ConfigurationError::EmptyLogicTable)));

        let mut c = config();
        c.tables.push(table("t_order", "ds_0.t_order_9"));
        assert!(matches!(ShardingRule::new(&c), Err(ConfigurationError::DuplicateTableRule(_))));

        let mut c = config();
        c.tables.push(table("t_other", "ds_0.t_order_0"));
        assert!(matches!(ShardingRule::new(&c), Err(ConfigurationError::DuplicateDataNode { .. })));

        let mut c = config();
        c.tables.push(table("t_other", "ds_9.t_other"));
        assert!(matches!(ShardingRule::new(&c), Err(ConfigurationError::DataSourceNotFound(_))));

        let mut c = config();
        c.binding_tables.push(vec!["t_order".to_string(), "t_missing".to_string()]);
        assert!(matches!(ShardingRule::new(&c), Err(ConfigurationError::UnknownBindingTable(_))));

        let mut c = config();
        c.tables[1] = table("t_order_item", "ds_${0..1}.t_order_item_${0..2}");
        assert!(matches!(
            ShardingRule::new(&c),
            Err(ConfigurationError::InconsistentBindingTables(_, _))
        ));

        let mut c = config();
        c.default_data_source = Some("ds_x".to_string());
        assert!(matches!(ShardingRule::new(&c), Err(ConfigurationError::DataSourceNotFound(_))));
    }
}
