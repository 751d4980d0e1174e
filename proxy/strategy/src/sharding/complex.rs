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

use std::collections::HashMap;

use itertools::Itertools;
use sharding_error::error::{ConfigurationError, RoutingError};

use super::{collect_targets, Sharding, ShardingValue, ShardingValues};
use crate::inline::{ExprValue, InlineExpression};

/// Multi column strategy. Every combination of the exact values is rendered
/// through the expression.
#[derive(Debug, Clone)]
pub struct ComplexSharding {
    columns: Vec<String>,
    expression: InlineExpression,
}

impl ComplexSharding {
    pub fn new(columns: &[String], expression: &str) -> Result<Self, ConfigurationError> {
        let columns = columns.iter().map(|x| x.trim().to_ascii_lowercase()).collect::<Vec<_>>();
        let expression = InlineExpression::compile(expression)?;
        if columns.is_empty() {
            return Err(ConfigurationError::MalformedExpression {
                expr: expression.source().to_string(),
                reason: "no sharding column".to_string(),
            });
        }

        if let Some(other) = expression.columns().into_iter().find(|x| !columns.contains(x)) {
            return Err(ConfigurationError::MalformedExpression {
                expr: expression.source().to_string(),
                reason: format!("references {:?}, which is not a sharding column", other),
            });
        }

        Ok(ComplexSharding { columns, expression })
    }
}

impl Sharding for ComplexSharding {
    fn sharding_columns(&self) -> &[String] {
        &self.columns
    }

    fn evaluate(
        &self,
        logic_table: &str,
        candidates: &[String],
        values: &ShardingValues,
    ) -> Result<Vec<String>, RoutingError> {
        let mut per_column = vec![];
        for column in self.columns.iter() {
            match values.get(column) {
                Some(ShardingValue::Exact(vals)) => {
                    let vals = vals.iter().map(ExprValue::try_from).collect::<Result<Vec<_>, _>>()?;
                    per_column.push(vals);
                }
                _ => return Ok(candidates.to_vec()),
            }
        }

        let mut targets = vec![];
        for combination in per_column.into_iter().multi_cartesian_product() {
            let vars = self
                .columns
                .iter()
                .cloned()
                .zip(combination.into_iter())
                .collect::<HashMap<_, _>>();
            targets.push(self.expression.render(&vars)?);
        }
        collect_targets(logic_table, candidates, targets)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::Value;

    fn strategy() -> ComplexSharding {
        let columns = vec!["user_id".to_string(), "order_id".to_string()];
        ComplexSharding::new(&columns, "t_order_${(user_id + order_id) % 4}").unwrap()
    }

    fn tables() -> Vec<String> {
        (0..4).map(|x| format!("t_order_{}", x)).collect()
    }

    #[test]
    fn test_complex_cartesian() {
        let mut values = ShardingValues::new();
        values.insert("user_id", ShardingValue::Exact(vec![Value::Int(1), Value::Int(2)]));
        values.insert("order_id", ShardingValue::Exact(vec![Value::Int(0)]));

        let res = strategy().evaluate("t_order", &tables(), &values).unwrap();
        assert_eq!(res, vec!["t_order_1", "t_order_2"]);
    }

    #[test]
    fn test_complex_missing_column_broadcasts() {
        let mut values = ShardingValues::new();
        values.insert("user_id", ShardingValue::Exact(vec![Value::Int(1)]));

        let res = strategy().evaluate("t_order", &tables(), &values).unwrap();
        assert_eq!(res, tables());
    }

    #[test]
    fn test_complex_invalid_column() {
        let columns = vec!["user_id".to_string()];
        let res = ComplexSharding::new(&columns, "t_order_${order_id % 2}");
        assert!(matches!(res, Err(ConfigurationError::MalformedExpression { .. })));
    }
}
