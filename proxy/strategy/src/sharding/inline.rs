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

use sharding_error::error::{ConfigurationError, RoutingError};

use super::{collect_targets, Sharding, ShardingValue, ShardingValues};
use crate::inline::{ExprValue, InlineExpression};

/// Single column strategy whose target name is an inline expression,
/// e.g. `t_order_${order_id % 2}`.
#[derive(Debug, Clone)]
pub struct InlineSharding {
    columns: Vec<String>,
    expression: InlineExpression,
}

impl InlineSharding {
    pub fn new(column: &str, expression: &str) -> Result<Self, ConfigurationError> {
        let column = column.to_ascii_lowercase();
        let expression = InlineExpression::compile(expression)?;
        if let Some(other) = expression.columns().into_iter().find(|x| *x != column) {
            return Err(ConfigurationError::MalformedExpression {
                expr: expression.source().to_string(),
                reason: format!("references {:?}, only {:?} is bound", other, column),
            });
        }

        Ok(InlineSharding { columns: vec![column], expression })
    }
}

impl Sharding for InlineSharding {
    fn sharding_columns(&self) -> &[String] {
        &self.columns
    }

    fn evaluate(
        &self,
        logic_table: &str,
        candidates: &[String],
        values: &ShardingValues,
    ) -> Result<Vec<String>, RoutingError> {
        let vals = match values.get(&self.columns[0]) {
            Some(ShardingValue::Exact(vals)) => vals,
            _ => return Ok(candidates.to_vec()),
        };

        let mut vars = HashMap::new();
        let mut targets = vec![];
        for val in vals.iter() {
            vars.insert(self.columns[0].clone(), ExprValue::try_from(val)?);
            targets.push(self.expression.render(&vars)?);
        }
        collect_targets(logic_table, candidates, targets)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{sharding::ValueRange, value::Value};

    #[test]
    fn test_inline_evaluate() {
        let strategy = InlineSharding::new("user_id", "ds_${user_id % 2}").unwrap();
        let candidates = vec!["ds_0".to_string(), "ds_1".to_string()];

        let mut values = ShardingValues::new();
        values.insert("user_id", ShardingValue::Exact(vec![Value::Int(3)]));
        assert_eq!(strategy.evaluate("t_order", &candidates, &values).unwrap(), vec!["ds_1"]);

        values.insert("user_id", ShardingValue::Range(ValueRange::closed(1, 2)));
        assert_eq!(strategy.evaluate("t_order", &candidates, &values).unwrap(), candidates);
    }

    #[test]
    fn test_inline_unknown_target() {
        let strategy = InlineSharding::new("user_id", "ds_${user_id % 3}").unwrap();
        let candidates = vec!["ds_0".to_string(), "ds_1".to_string()];

        let mut values = ShardingValues::new();
        values.insert("user_id", ShardingValue::Exact(vec![Value::Int(5)]));
        let res = strategy.evaluate("t_order", &candidates, &values);
        assert!(matches!(res, Err(RoutingError::UnknownTarget { .. })));
    }

    #[test]
    fn test_inline_unbound_column() {
        let res = InlineSharding::new("user_id", "ds_${order_id % 2}");
        assert!(matches!(res, Err(ConfigurationError::MalformedExpression { .. })));
    }
}
