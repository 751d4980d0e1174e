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

use sharding_error::error::RoutingError;

use super::{
    algorithm::{select_candidate, slot_of, ShardingAlgorithmName},
    collect_targets, Sharding, ShardingValue, ShardingValues, ValueRange,
};
use crate::value::Value;

/// Single column strategy backed by a built-in precise algorithm.
#[derive(Debug, Clone)]
pub struct StandardSharding {
    columns: Vec<String>,
    algorithm: ShardingAlgorithmName,
    sharding_count: Option<u64>,
}

impl StandardSharding {
    pub fn new(column: &str, algorithm: ShardingAlgorithmName, sharding_count: Option<u64>) -> Self {
        StandardSharding {
            columns: vec![column.to_ascii_lowercase()],
            algorithm,
            sharding_count,
        }
    }
}

impl Sharding for StandardSharding {
    fn sharding_columns(&self) -> &[String] {
        &self.columns
    }

    fn evaluate(
        &self,
        logic_table: &str,
        candidates: &[String],
        values: &ShardingValues,
    ) -> Result<Vec<String>, RoutingError> {
        let count = self.sharding_count.unwrap_or(candidates.len() as u64);
        match values.get(&self.columns[0]) {
            None => Ok(candidates.to_vec()),
            Some(ShardingValue::Exact(vals)) => {
                precise_targets(logic_table, &self.algorithm, count, candidates, vals)
            }
            Some(ShardingValue::Range(range)) => {
                range_targets(logic_table, &self.algorithm, count, candidates, range)
            }
        }
    }
}

/// Routes on values supplied by the caller instead of the statement.
#[derive(Debug, Clone)]
pub struct HintSharding {
    algorithm: ShardingAlgorithmName,
    sharding_count: Option<u64>,
}

impl HintSharding {
    pub fn new(algorithm: ShardingAlgorithmName, sharding_count: Option<u64>) -> Self {
        HintSharding { algorithm, sharding_count }
    }
}

impl Sharding for HintSharding {
    fn sharding_columns(&self) -> &[String] {
        &[]
    }

    fn evaluate(
        &self,
        logic_table: &str,
        candidates: &[String],
        values: &ShardingValues,
    ) -> Result<Vec<String>, RoutingError> {
        match values.hints() {
            None => Ok(candidates.to_vec()),
            Some(hints) => {
                let count = self.sharding_count.unwrap_or(candidates.len() as u64);
                precise_targets(logic_table, &self.algorithm, count, candidates, hints)
            }
        }
    }
}

fn precise_targets(
    logic_table: &str,
    algo: &ShardingAlgorithmName,
    count: u64,
    candidates: &[String],
    vals: &[Value],
) -> Result<Vec<String>, RoutingError> {
    let mut targets = vec![];
    for val in vals.iter() {
        let slot = slot_of(algo, val, count)?;
        match select_candidate(candidates, slot) {
            Some(target) => targets.push(target.clone()),
            None => return Err(RoutingError::NoRoute(logic_table.to_string())),
        }
    }
    collect_targets(logic_table, candidates, targets)
}

// A range wider than the modulus touches every slot. Hashes are not ordered,
// so crc32 always broadcasts.
fn range_targets(
    logic_table: &str,
    algo: &ShardingAlgorithmName,
    count: u64,
    candidates: &[String],
    range: &ValueRange,
) -> Result<Vec<String>, RoutingError> {
    if range.is_empty() {
        return Err(RoutingError::NoRoute(logic_table.to_string()));
    }

    let (lower, width) = match (algo, range.lower(), range.width()) {
        (ShardingAlgorithmName::Mod, Some(lower), Some(width)) if width < count => (lower, width),
        _ => return Ok(candidates.to_vec()),
    };

    let vals = (0..width as i64).map(|x| Value::Int(lower + x)).collect::<Vec<_>>();
    let mut targets = vec![];
    for val in vals.iter() {
        let slot = slot_of(algo, val, count)?;
        if let Some(target) = select_candidate(candidates, slot) {
            targets.push(target.clone());
        }
    }
    if targets.is_empty() {
        return Ok(vec![]);
    }
    collect_targets(logic_table, candidates, targets)
}

#[cfg(test)]
mod test {
    use std::ops::Bound;

    use super::*;

    fn tables() -> Vec<String> {
        (0..4).map(|x| format!("t_order_{}", x)).collect()
    }

    #[test]
    fn test_standard_exact() {
        let strategy = StandardSharding::new("order_id", ShardingAlgorithmName::Mod, None);
        let mut values = ShardingValues::new();
        values.insert("ORDER_ID", ShardingValue::Exact(vec![Value::Int(6), Value::Int(1), Value::Int(10)]));

        let res = strategy.evaluate("t_order", &tables(), &values).unwrap();
        assert_eq!(res, vec!["t_order_1", "t_order_2"]);
    }

    #[test]
    fn test_standard_no_value_broadcasts() {
        let strategy = StandardSharding::new("order_id", ShardingAlgorithmName::Crc32Mod, None);
        let res = strategy.evaluate("t_order", &tables(), &ShardingValues::new()).unwrap();
        assert_eq!(res, tables());
    }

    #[test]
    fn test_standard_range() {
        let strategy = StandardSharding::new("order_id", ShardingAlgorithmName::Mod, None);

        let mut values = ShardingValues::new();
        values.insert("order_id", ShardingValue::Range(ValueRange::closed(5, 6)));
        let res = strategy.evaluate("t_order", &tables(), &values).unwrap();
        assert_eq!(res, vec!["t_order_1", "t_order_2"]);

        values.insert("order_id", ShardingValue::Range(ValueRange::closed(0, 100)));
        assert_eq!(strategy.evaluate("t_order", &tables(), &values).unwrap(), tables());

        values.insert("order_id", ShardingValue::Range(ValueRange::new(Bound::Excluded(3), Bound::Unbounded)));
        assert_eq!(strategy.evaluate("t_order", &tables(), &values).unwrap(), tables());
    }

    #[test]
    fn test_standard_restricted_candidates() {
        let strategy = StandardSharding::new("order_id", ShardingAlgorithmName::Mod, Some(4));
        let mut values = ShardingValues::new();
        values.insert("order_id", ShardingValue::Exact(vec![Value::Int(3)]));

        let candidates = vec!["t_order_0".to_string(), "t_order_1".to_string()];
        let res = strategy.evaluate("t_order", &candidates, &values);
        assert!(matches!(res, Err(RoutingError::NoRoute(_))));
    }

    #[test]
    fn test_hint() {
        let strategy = HintSharding::new(ShardingAlgorithmName::Mod, None);
        let candidates = vec!["ds_0".to_string(), "ds_1".to_string()];

        let mut values = ShardingValues::new();
        assert_eq!(strategy.evaluate("t_order", &candidates, &values).unwrap(), candidates);

        values.set_hints(Some(vec![Value::Int(3)]));
        assert_eq!(strategy.evaluate("t_order", &candidates, &values).unwrap(), vec!["ds_1"]);
    }
}
