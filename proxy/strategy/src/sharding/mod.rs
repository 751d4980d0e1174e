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

//! Sharding strategies. Each strategy narrows the candidates of one routing
//! dimension, data sources or tables, given the values found for its columns.

pub mod algorithm;
pub mod complex;
pub mod inline;
pub mod standard;

use std::ops::Bound;

use indexmap::IndexMap;
use sharding_error::error::{ConfigurationError, RoutingError};

pub use self::{
    algorithm::{CalcShardingIdx, ShardingAlgorithmName},
    complex::ComplexSharding,
    inline::InlineSharding,
    standard::{HintSharding, StandardSharding},
};
use crate::{config::StrategyConfig, value::Value};

/// Inclusive integer range, `None` meaning unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRange {
    lower: Option<i64>,
    upper: Option<i64>,
    empty: bool,
}

impl ValueRange {
    pub fn new(lower: Bound<i64>, upper: Bound<i64>) -> Self {
        let mut empty = false;
        let lower = match lower {
            Bound::Included(v) => Some(v),
            Bound::Excluded(v) => v.checked_add(1).or_else(|| {
                empty = true;
                None
            }),
            Bound::Unbounded => None,
        };
        let upper = match upper {
            Bound::Included(v) => Some(v),
            Bound::Excluded(v) => v.checked_sub(1).or_else(|| {
                empty = true;
                None
            }),
            Bound::Unbounded => None,
        };

        let empty = empty || matches!((lower, upper), (Some(lo), Some(hi)) if lo > hi);
        ValueRange { lower, upper, empty }
    }

    pub fn closed(lower: i64, upper: i64) -> Self {
        ValueRange::new(Bound::Included(lower), Bound::Included(upper))
    }

    pub fn lower(&self) -> Option<i64> {
        self.lower
    }

    pub fn upper(&self) -> Option<i64> {
        self.upper
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn contains(&self, val: i64) -> bool {
        !self.empty && self.lower.map_or(true, |lo| val >= lo) && self.upper.map_or(true, |hi| val <= hi)
    }

    pub fn intersect(&self, other: &ValueRange) -> ValueRange {
        let lower = match (self.lower, other.lower) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let upper = match (self.upper, other.upper) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let empty = self.empty
            || other.empty
            || matches!((lower, upper), (Some(lo), Some(hi)) if lo > hi);
        ValueRange { lower, upper, empty }
    }

    /// Number of integers covered, `None` when unbounded or too large.
    pub fn width(&self) -> Option<u64> {
        if self.empty {
            return Some(0);
        }
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) => (hi as i128 - lo as i128 + 1).try_into().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShardingValue {
    // Values of `=` or `IN`.
    Exact(Vec<Value>),
    Range(ValueRange),
}

/// Sharding column values found for one logic table and one parameter set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardingValues {
    columns: IndexMap<String, ShardingValue>,
    hints: Option<Vec<Value>>,
}

impl ShardingValues {
    pub fn new() -> Self {
        ShardingValues::default()
    }

    pub fn insert(&mut self, column: &str, value: ShardingValue) {
        self.columns.insert(column.to_ascii_lowercase(), value);
    }

    pub fn get(&self, column: &str) -> Option<&ShardingValue> {
        self.columns.get(&column.to_ascii_lowercase())
    }

    pub fn set_hints(&mut self, hints: Option<Vec<Value>>) {
        self.hints = hints.filter(|x| !x.is_empty());
    }

    pub fn hints(&self) -> Option<&[Value]> {
        self.hints.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.hints.is_none()
    }
}

pub trait Sharding {
    fn sharding_columns(&self) -> &[String];

    /// Returns the matching subset of `candidates`, in candidate order.
    fn evaluate(
        &self,
        logic_table: &str,
        candidates: &[String],
        values: &ShardingValues,
    ) -> Result<Vec<String>, RoutingError>;
}

#[derive(Debug, Clone)]
pub enum ShardingStrategy {
    None,
    Standard(StandardSharding),
    Complex(ComplexSharding),
    Hint(HintSharding),
    Inline(InlineSharding),
}

impl ShardingStrategy {
    pub fn build(config: &StrategyConfig) -> Result<Self, ConfigurationError> {
        let strategy = match config {
            StrategyConfig::None => ShardingStrategy::None,
            StrategyConfig::Standard { sharding_column, algorithm_name, sharding_count } => {
                ShardingStrategy::Standard(StandardSharding::new(
                    sharding_column,
                    *algorithm_name,
                    *sharding_count,
                ))
            }
            StrategyConfig::Complex { sharding_columns, algorithm_expression } => {
                ShardingStrategy::Complex(ComplexSharding::new(sharding_columns, algorithm_expression)?)
            }
            StrategyConfig::Hint { algorithm_name, sharding_count } => {
                ShardingStrategy::Hint(HintSharding::new(*algorithm_name, *sharding_count))
            }
            StrategyConfig::Inline { sharding_column, algorithm_expression } => {
                ShardingStrategy::Inline(InlineSharding::new(sharding_column, algorithm_expression)?)
            }
        };
        Ok(strategy)
    }

    pub fn is_hint(&self) -> bool {
        matches!(self, ShardingStrategy::Hint(_))
    }
}

impl Sharding for ShardingStrategy {
    fn sharding_columns(&self) -> &[String] {
        match self {
            ShardingStrategy::None => &[],
            ShardingStrategy::Standard(inner) => inner.sharding_columns(),
            ShardingStrategy::Complex(inner) => inner.sharding_columns(),
            ShardingStrategy::Hint(inner) => inner.sharding_columns(),
            ShardingStrategy::Inline(inner) => inner.sharding_columns(),
        }
    }

    fn evaluate(
        &self,
        logic_table: &str,
        candidates: &[String],
        values: &ShardingValues,
    ) -> Result<Vec<String>, RoutingError> {
        match self {
            ShardingStrategy::None => Ok(candidates.to_vec()),
            ShardingStrategy::Standard(inner) => inner.evaluate(logic_table, candidates, values),
            ShardingStrategy::Complex(inner) => inner.evaluate(logic_table, candidates, values),
            ShardingStrategy::Hint(inner) => inner.evaluate(logic_table, candidates, values),
            ShardingStrategy::Inline(inner) => inner.evaluate(logic_table, candidates, values),
        }
    }
}

/// Keeps candidate order and drops duplicates. A target outside of the
/// candidates is reported as an algorithm defect.
pub(crate) fn collect_targets(
    logic_table: &str,
    candidates: &[String],
    targets: Vec<String>,
) -> Result<Vec<String>, RoutingError> {
    if let Some(target) = targets.iter().find(|x| !candidates.iter().any(|c| c.eq_ignore_ascii_case(x))) {
        return Err(RoutingError::UnknownTarget {
            table: logic_table.to_string(),
            target: target.clone(),
        });
    }

    let res = candidates
        .iter()
        .filter(|c| targets.iter().any(|x| c.eq_ignore_ascii_case(x)))
        .cloned()
        .collect::<Vec<_>>();
    if res.is_empty() {
        return Err(RoutingError::NoRoute(logic_table.to_string()));
    }
    Ok(res)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_value_range() {
        let range = ValueRange::new(Bound::Excluded(1), Bound::Included(5));
        assert_eq!(range.lower(), Some(2));
        assert_eq!(range.width(), Some(4));
        assert!(range.contains(5));
        assert!(!range.contains(1));

        let other = ValueRange::new(Bound::Unbounded, Bound::Excluded(3));
        let both = range.intersect(&other);
        assert_eq!((both.lower(), both.upper()), (Some(2), Some(2)));

        let disjoint = range.intersect(&ValueRange::closed(10, 20));
        assert!(disjoint.is_empty());
        assert_eq!(ValueRange::new(Bound::Unbounded, Bound::Included(0)).width(), None);
    }

    #[test]
    fn test_collect_targets() {
        let candidates = vec!["t_0".to_string(), "t_1".to_string(), "t_2".to_string()];
        let res = collect_targets("t", &candidates, vec!["t_2".into(), "t_0".into(), "t_2".into()]);
        assert_eq!(res.unwrap(), vec!["t_0", "t_2"]);

        let res = collect_targets("t", &candidates, vec!["t_9".into()]);
        assert!(matches!(res, Err(RoutingError::UnknownTarget { .. })));

        let res = collect_targets("t", &candidates, vec![]);
        assert!(matches!(res, Err(RoutingError::NoRoute(_))));
    }

    #[test]
    fn test_none_strategy_broadcasts() {
        let candidates = vec!["ds_0".to_string(), "ds_1".to_string()];
        let res = ShardingStrategy::None.evaluate("t", &candidates, &ShardingValues::new()).unwrap();
        assert_eq!(res, candidates);
    }
}
