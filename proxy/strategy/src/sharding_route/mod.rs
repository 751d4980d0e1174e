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

pub mod condition;

use std::{collections::HashSet, sync::Arc};

use indexmap::IndexMap;
use sharding_error::error::{ConfigurationError, Error, RoutingError};
use tracing::{debug, error, info};

use self::condition::{insert_row_values, ConditionExtractor};
use crate::{
    datanode::DataNode,
    result::{GeneratedKeys, RouteUnit, SQLRouteResult, SQLUnit},
    route::{normalize_parameter_sets, Route, RouteHints, RouteInput},
    rule::{KeyGeneratorRule, ShardingRule, TableRule},
    sharding::{Sharding, ShardingValues},
    sharding_rewrite::{InsertRewrite, KeySplice, SQLRewriteEngine},
    stmt::{InsertClause, ParsedStatement, StatementKind},
    value::Value,
};

/// Physical target of one batch entry: a data source and the actual table
/// standing in for every routed logic table.
#[derive(Debug, Clone, PartialEq)]
struct RouteTarget {
    data_source: String,
    tables: IndexMap<String, String>,
}

impl RouteTarget {
    fn new(node: DataNode, logic_table: &str) -> Self {
        let mut tables = IndexMap::new();
        tables.insert(logic_table.to_string(), node.table);
        RouteTarget { data_source: node.data_source, tables }
    }
}

// Entries sharing a key are executed as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UnitKey {
    data_source: String,
    tables: Vec<(String, String)>,
    rows: Vec<usize>,
    literal_keys: Vec<String>,
}

#[derive(Debug)]
struct UnitBuilder {
    data_source: String,
    tables: IndexMap<String, String>,
    insert: Option<InsertRewrite>,
    parameter_sets: Vec<Vec<Value>>,
}

#[derive(Debug)]
pub struct ShardingRouter {
    rule: Arc<ShardingRule>,
}

impl ShardingRouter {
    pub fn new(rule: ShardingRule) -> Self {
        ShardingRouter { rule: Arc::new(rule) }
    }

    pub fn rule(&self) -> &ShardingRule {
        &self.rule
    }

    pub fn route<'a>(
        &self,
        statement: &'a ParsedStatement,
        parameter_sets: &[Vec<Value>],
        hints: Option<&RouteHints>,
        force_master: bool,
    ) -> Result<SQLRouteResult<'a>, Error> {
        let entries = normalize_parameter_sets(parameter_sets);
        let logic_tables = self.logic_tables(statement);

        let mut sharded = vec![];
        let mut unsharded = vec![];
        for table in logic_tables.iter() {
            match self.rule.table_rule(table) {
                Some(rule) => sharded.push(rule),
                None => unsharded.push(table.as_str()),
            }
        }

        let mut result = SQLRouteResult::new(statement);
        if sharded.is_empty() {
            self.route_unsharded(statement, &unsharded, &entries, force_master, &mut result)?;
            self.show(&result);
            return Ok(result);
        }

        if let Some(table) = unsharded.iter().find(|x| !self.rule.is_broadcast(x)) {
            return Err(ConfigurationError::TableRuleNotFound(table.to_string()).into());
        }

        let units = match &statement.insert {
            Some(clause) if statement.kind == StatementKind::Insert => {
                self.route_insert(statement, clause, sharded[0], &entries, hints, &mut result)?
            }
            _ => self.route_select(statement, &sharded, &entries, hints)?,
        };

        let engine = SQLRewriteEngine::new(statement, &self.rule);
        for mut unit in units.into_values() {
            for table in unsharded.iter() {
                let name = token_name(statement, table);
                unit.tables.entry(table.to_string()).or_insert(name);
            }

            let sql = match engine.rewrite(&unit.tables, unit.insert.as_ref()) {
                Ok(sql) => sql,
                Err(err) => {
                    error!(sql = %statement.sql, tables = ?unit.tables, "rewrite failed: {}", err);
                    return Err(err.into());
                }
            };
            let data_source = self.resolve_data_source(&unit.data_source, statement.kind, force_master);
            debug!(data_source = %data_source, tables = ?unit.tables, "routed");
            result.route_units.push(RouteUnit::new(&data_source, SQLUnit::new(sql, unit.parameter_sets)));
        }

        if result.route_units.is_empty() {
            return Err(RoutingError::NoRoute(sharded[0].logic_table.clone()).into());
        }

        self.show(&result);
        Ok(result)
    }

    // Referenced logic tables, including owners of logic indexes.
    fn logic_tables(&self, statement: &ParsedStatement) -> Vec<String> {
        let mut tables = statement.logic_tables();
        for token in statement.indexes.iter() {
            let owner = match &token.table {
                Some(table) => Some(table.to_ascii_lowercase()),
                None => self.rule.table_rule_by_index(&token.name).map(|x| x.logic_table.clone()),
            };
            if let Some(owner) = owner {
                if !tables.contains(&owner) {
                    tables.push(owner);
                }
            }
        }
        tables
    }

    // Broadcast tables are written everywhere and read from one data source,
    // any other table lives in the default data source.
    fn route_unsharded(
        &self,
        statement: &ParsedStatement,
        tables: &[&str],
        entries: &[Vec<Value>],
        force_master: bool,
        result: &mut SQLRouteResult,
    ) -> Result<(), Error> {
        let all_broadcast = !tables.is_empty() && tables.iter().all(|x| self.rule.is_broadcast(x));

        let data_sources = if all_broadcast && statement.kind.is_write() {
            self.rule.data_sources().to_vec()
        } else if all_broadcast {
            let ds = self
                .rule
                .default_data_source()
                .or_else(|| self.rule.data_sources().first().map(|x| x.as_str()))
                .ok_or(ConfigurationError::NoDefaultDataSource)?;
            vec![ds.to_string()]
        } else {
            match self.rule.default_data_source() {
                Some(ds) => vec![ds.to_string()],
                None => {
                    return Err(match tables.iter().find(|x| !self.rule.is_broadcast(x)) {
                        Some(table) => ConfigurationError::TableRuleNotFound(table.to_string()),
                        None => ConfigurationError::NoDefaultDataSource,
                    }
                    .into())
                }
            }
        };

        if data_sources.is_empty() {
            return Err(ConfigurationError::NoDefaultDataSource.into());
        }

        for ds in data_sources.iter() {
            let data_source = self.resolve_data_source(ds, statement.kind, force_master);
            result
                .route_units
                .push(RouteUnit::new(&data_source, SQLUnit::new(statement.sql.clone(), entries.to_vec())));
        }
        Ok(())
    }

    fn route_select(
        &self,
        statement: &ParsedStatement,
        sharded: &[&TableRule],
        entries: &[Vec<Value>],
        hints: Option<&RouteHints>,
    ) -> Result<IndexMap<UnitKey, UnitBuilder>, Error> {
        let mut units: IndexMap<UnitKey, UnitBuilder> = IndexMap::new();
        for params in entries.iter() {
            for target in self.route_entry(statement, sharded, params, hints)? {
                let key = UnitKey {
                    data_source: target.data_source.clone(),
                    tables: target.tables.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    rows: vec![],
                    literal_keys: vec![],
                };
                units
                    .entry(key)
                    .or_insert_with(|| UnitBuilder {
                        data_source: target.data_source,
                        tables: target.tables,
                        insert: None,
                        parameter_sets: vec![],
                    })
                    .parameter_sets
                    .push(params.clone());
            }
        }
        Ok(units)
    }

    fn route_entry(
        &self,
        statement: &ParsedStatement,
        sharded: &[&TableRule],
        params: &[Value],
        hints: Option<&RouteHints>,
    ) -> Result<Vec<RouteTarget>, RoutingError> {
        let ddl = statement.kind == StatementKind::Ddl;
        let mut groups: Vec<(Vec<String>, Vec<RouteTarget>)> = vec![];
        let mut anchors: Vec<(&TableRule, usize)> = vec![];

        for table_rule in sharded.iter().copied() {
            let anchor = anchors
                .iter()
                .find(|(anchor, _)| self.rule.is_binding(&anchor.logic_table, &table_rule.logic_table));
            if let Some((anchor, idx)) = anchor {
                let (names, targets) = &mut groups[*idx];
                names.push(table_rule.logic_table.clone());
                for target in targets.iter_mut() {
                    let actual = binding_table(anchor, table_rule, target)
                        .ok_or_else(|| RoutingError::NoRoute(table_rule.logic_table.clone()))?;
                    target.tables.insert(table_rule.logic_table.clone(), actual);
                }
                continue;
            }

            let values = if ddl {
                ShardingValues::new()
            } else {
                let columns = table_rule.sharding_columns();
                ConditionExtractor::new(statement, &table_rule.logic_table, &columns).extract(params)?
            };
            let hints = if ddl { None } else { hints };
            let targets = self
                .route_table(table_rule, values, hints)?
                .into_iter()
                .map(|node| RouteTarget::new(node, &table_rule.logic_table))
                .collect();

            groups.push((vec![table_rule.logic_table.clone()], targets));
            anchors.push((table_rule, groups.len() - 1));
        }

        combine(groups)
    }

    /// Database dimension first, then the table dimension, kept to the
    /// nodes that exist.
    fn route_table(
        &self,
        table_rule: &TableRule,
        values: ShardingValues,
        hints: Option<&RouteHints>,
    ) -> Result<Vec<DataNode>, RoutingError> {
        let logic_table = &table_rule.logic_table;

        let mut db_values = values.clone();
        db_values.set_hints(hints.map(|x| x.database_values.clone()));
        let data_sources =
            table_rule.database_strategy.evaluate(logic_table, &table_rule.data_sources(), &db_values)?;

        let mut table_values = values;
        table_values.set_hints(hints.map(|x| x.table_values.clone()));
        let tables = table_rule.table_strategy.evaluate(logic_table, &table_rule.actual_tables(), &table_values)?;

        let nodes = table_rule
            .actual_data_nodes
            .iter()
            .filter(|x| data_sources.contains(&x.data_source) && tables.contains(&x.table))
            .cloned()
            .collect::<Vec<_>>();
        if nodes.is_empty() {
            return Err(RoutingError::NoRoute(logic_table.clone()));
        }
        Ok(nodes)
    }

    // Each row routes on its own and must land on exactly one node. Rows of
    // one entry sharing a node stay in the same unit.
    fn route_insert(
        &self,
        statement: &ParsedStatement,
        clause: &InsertClause,
        table_rule: &TableRule,
        entries: &[Vec<Value>],
        hints: Option<&RouteHints>,
        result: &mut SQLRouteResult,
    ) -> Result<IndexMap<UnitKey, UnitBuilder>, Error> {
        if clause.rows.is_empty() {
            return self.route_select(statement, &[table_rule], entries, hints);
        }

        let key_rule = generated_key(table_rule, clause);
        let placeholder = clause.has_params();
        let columns = table_rule.sharding_columns();
        let row_params = clause.rows.iter().map(|x| x.param_indexes().collect::<Vec<_>>()).collect::<Vec<_>>();
        let in_rows = row_params.iter().flatten().copied().collect::<HashSet<_>>();
        let first_row_param = in_rows.iter().min().copied().unwrap_or(usize::MAX);

        let mut units: IndexMap<UnitKey, UnitBuilder> = IndexMap::new();
        let mut generated = vec![];

        for params in entries.iter() {
            let mut by_node: IndexMap<DataNode, Vec<usize>> = IndexMap::new();
            let mut keys = vec![];

            for row in 0..clause.rows.len() {
                let key = key_rule.map(|kg| kg.generator.next(&table_rule.logic_table));
                let generated_value = key_rule.zip(key.as_ref()).map(|(kg, val)| (kg.column.as_str(), val));
                let values = insert_row_values(clause, row, &columns, params, generated_value)?;

                let nodes = self.route_table(table_rule, values, hints)?;
                if nodes.len() != 1 {
                    return Err(RoutingError::InsertMultipleNodes(table_rule.logic_table.clone()).into());
                }
                by_node.entry(nodes[0].clone()).or_default().push(row);
                keys.push(key);
            }

            let ds_order = self.rule.data_sources();
            let table_order = table_rule.actual_tables();
            by_node.sort_by(|a, _, b, _| {
                let pos = |node: &DataNode| {
                    (
                        ds_order.iter().position(|x| *x == node.data_source),
                        table_order.iter().position(|x| *x == node.table),
                    )
                };
                pos(a).cmp(&pos(b))
            });

            for (node, rows) in by_node {
                let key_splice = key_rule.map(|kg| KeySplice {
                    column: kg.column.clone(),
                    values: rows.iter().map(|x| if placeholder { None } else { keys[*x].clone() }).collect(),
                });
                let literal_keys = match (&key_splice, placeholder) {
                    (Some(splice), false) => splice.values.iter().flatten().map(|x| x.to_sql_literal()).collect(),
                    _ => vec![],
                };

                let unit_params = if placeholder {
                    let mut unit_params = vec![];
                    for idx in (0..params.len()).filter(|x| !in_rows.contains(x) && *x < first_row_param) {
                        unit_params.push(param(params, idx)?);
                    }
                    for row in rows.iter() {
                        for idx in row_params[*row].iter() {
                            unit_params.push(param(params, *idx)?);
                        }
                        if let Some(key) = &keys[*row] {
                            unit_params.push(key.clone());
                        }
                    }
                    for idx in (0..params.len()).filter(|x| !in_rows.contains(x) && *x > first_row_param) {
                        unit_params.push(param(params, idx)?);
                    }
                    unit_params
                } else {
                    params.clone()
                };

                let mut tables = IndexMap::new();
                tables.insert(table_rule.logic_table.clone(), node.table.clone());
                let key = UnitKey {
                    data_source: node.data_source.clone(),
                    tables: vec![(table_rule.logic_table.clone(), node.table.clone())],
                    rows: rows.clone(),
                    literal_keys,
                };

                units
                    .entry(key)
                    .or_insert_with(|| UnitBuilder {
                        data_source: node.data_source.clone(),
                        tables,
                        insert: Some(InsertRewrite { rows, key: key_splice }),
                        parameter_sets: vec![],
                    })
                    .parameter_sets
                    .push(unit_params);
            }

            generated.extend(keys.into_iter().flatten());
        }

        if let Some(kg) = key_rule {
            result.generated_keys = Some(GeneratedKeys { column: kg.column.clone(), values: generated });
        }
        Ok(units)
    }

    // A master-slave group used as data source resolves to one of its members.
    fn resolve_data_source(&self, data_source: &str, kind: StatementKind, force_master: bool) -> String {
        match self.rule.master_slave(data_source) {
            Some(ms) => ms.route(kind, force_master),
            None => data_source.to_string(),
        }
    }

    fn show(&self, result: &SQLRouteResult) {
        if !self.rule.props().sql_show {
            return;
        }

        info!(sql = %result.statement.sql, "Logic SQL");
        for unit in result.route_units.iter() {
            info!(
                data_source = %unit.data_source,
                sql = %unit.sql_unit.sql,
                parameter_sets = ?unit.sql_unit.parameter_sets,
                "Actual SQL"
            );
        }
    }
}

impl Route for ShardingRouter {
    type Error = Error;

    fn dispatch<'a>(&self, input: RouteInput<'a>) -> Result<SQLRouteResult<'a>, Self::Error> {
        self.route(input.statement, input.parameter_sets, input.hints, input.force_master)
    }
}

fn param(params: &[Value], idx: usize) -> Result<Value, RoutingError> {
    params.get(idx).cloned().ok_or(RoutingError::MissingParameter { index: idx, len: params.len() })
}

// Key generation applies when the column list exists and omits the key column.
fn generated_key<'r>(table_rule: &'r TableRule, clause: &InsertClause) -> Option<&'r KeyGeneratorRule> {
    let kg = table_rule.key_generator.as_ref()?;
    if clause.columns_end.is_none() || clause.column_index(&kg.column).is_some() {
        return None;
    }
    Some(kg)
}

// The binding table uses the actual table at the same position within the
// data source as the anchor table.
fn binding_table(anchor: &TableRule, table_rule: &TableRule, target: &RouteTarget) -> Option<String> {
    let actual = target.tables.get(&anchor.logic_table)?;
    let idx = anchor.tables_in(&target.data_source).iter().position(|x| x == actual)?;
    table_rule.tables_in(&target.data_source).get(idx).cloned()
}

// Independently routed tables meet on their common data sources, where all
// combinations of their actual tables are joined.
fn combine(groups: Vec<(Vec<String>, Vec<RouteTarget>)>) -> Result<Vec<RouteTarget>, RoutingError> {
    let mut iter = groups.into_iter();
    let (mut names, mut acc) = match iter.next() {
        Some(first) => first,
        None => return Ok(vec![]),
    };

    for (group_names, targets) in iter {
        names.extend(group_names);
        let mut next = vec![];
        for a in acc.iter() {
            for b in targets.iter().filter(|x| x.data_source == a.data_source) {
                let mut tables = a.tables.clone();
                tables.extend(b.tables.iter().map(|(k, v)| (k.clone(), v.clone())));
                next.push(RouteTarget { data_source: a.data_source.clone(), tables });
            }
        }

        if next.is_empty() {
            return Err(RoutingError::NoCommonDataSource(names));
        }
        acc = next;
    }
    Ok(acc)
}

// Table name as written in the statement, used for tables kept as is.
fn token_name(statement: &ParsedStatement, logic_table: &str) -> String {
    statement
        .tables
        .iter()
        .find(|x| x.name.eq_ignore_ascii_case(logic_table))
        .map(|x| x.name.clone())
        .unwrap_or_else(|| logic_table.to_string())
}
