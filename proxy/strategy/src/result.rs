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

use crate::{stmt::ParsedStatement, value::Value};

#[derive(Debug, Clone, PartialEq)]
pub struct SQLUnit {
    pub sql: String,
    // Batch entries routed to the unit, in original batch order.
    pub parameter_sets: Vec<Vec<Value>>,
}

impl SQLUnit {
    pub fn new(sql: String, parameter_sets: Vec<Vec<Value>>) -> Self {
        SQLUnit { sql, parameter_sets }
    }

    /// All parameter sets concatenated, for binding the unit as a single
    /// statement execution.
    pub fn flatten_parameters(&self) -> Vec<Value> {
        self.parameter_sets.iter().flatten().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteUnit {
    pub data_source: String,
    pub sql_unit: SQLUnit,
}

impl RouteUnit {
    pub fn new(data_source: &str, sql_unit: SQLUnit) -> Self {
        RouteUnit { data_source: data_source.to_string(), sql_unit }
    }
}

/// Keys generated for an insert, one per row per batch entry.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedKeys {
    pub column: String,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SQLRouteResult<'a> {
    pub statement: &'a ParsedStatement,
    pub route_units: Vec<RouteUnit>,
    pub generated_keys: Option<GeneratedKeys>,
}

impl<'a> SQLRouteResult<'a> {
    pub fn new(statement: &'a ParsedStatement) -> Self {
        SQLRouteResult { statement, route_units: vec![], generated_keys: None }
    }

    /// Distinct data sources in unit order.
    pub fn data_sources(&self) -> Vec<&str> {
        let mut res = vec![];
        for unit in self.route_units.iter() {
            if !res.contains(&unit.data_source.as_str()) {
                res.push(unit.data_source.as_str());
            }
        }
        res
    }

    pub fn is_single_route(&self) -> bool {
        self.route_units.len() == 1
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stmt::StatementKind;

    #[test]
    fn test_flatten_parameters() {
        let unit = SQLUnit::new(
            "INSERT INTO t_order_0 (id) VALUES (?)".to_string(),
            vec![vec![Value::Int(1)], vec![Value::Int(3)]],
        );
        assert_eq!(unit.flatten_parameters(), vec![Value::Int(1), Value::Int(3)]);
    }

    #[test]
    fn test_data_sources() {
        let stmt = ParsedStatement::new("SELECT 1", StatementKind::Select);
        let mut result = SQLRouteResult::new(&stmt);
        for ds in ["ds_1", "ds_0", "ds_1"] {
            result.route_units.push(RouteUnit::new(ds, SQLUnit::new("SELECT 1".to_string(), vec![])));
        }
        assert_eq!(result.data_sources(), vec!["ds_1", "ds_0"]);
        assert!(!result.is_single_route());
    }
}
