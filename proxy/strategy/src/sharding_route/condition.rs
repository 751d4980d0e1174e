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

use crate::{
    sharding::{ShardingValue, ShardingValues, ValueRange},
    stmt::{Column, CompareOp, Expr, InsertClause, ParsedStatement, Predicate},
    value::Value,
};

pub fn resolve(expr: &Expr, params: &[Value]) -> Result<Value, RoutingError> {
    match expr {
        Expr::Literal(val) => Ok(val.clone()),
        Expr::Param(idx) => params
            .get(*idx)
            .cloned()
            .ok_or(RoutingError::MissingParameter { index: *idx, len: params.len() }),
    }
}

/// Collects the sharding values of one logic table from the predicate,
/// against one parameter set. Only conditions combined with `AND` are used,
/// a disjunction gives no usable condition.
pub struct ConditionExtractor<'a> {
    statement: &'a ParsedStatement,
    refs: Vec<&'a str>,
    columns: &'a [String],
}

impl<'a> ConditionExtractor<'a> {
    pub fn new(statement: &'a ParsedStatement, logic_table: &str, columns: &'a [String]) -> Self {
        ConditionExtractor { statement, refs: statement.table_refs(logic_table), columns }
    }

    pub fn extract(&self, params: &[Value]) -> Result<ShardingValues, RoutingError> {
        let mut values = ShardingValues::new();
        if self.columns.is_empty() {
            return Ok(values);
        }

        let mut leaves = vec![];
        if let Some(predicate) = &self.statement.predicate {
            flatten_and(predicate, &mut leaves);
        }

        for leaf in leaves {
            if let Some((column, value)) = self.condition(leaf, params)? {
                let merged = match values.get(&column) {
                    Some(existing) => merge(existing, value),
                    None => value,
                };
                values.insert(&column, merged);
            }
        }
        Ok(values)
    }

    fn matches(&self, column: &Column) -> Option<String> {
        let name = column.name.trim_matches(|c| c == '`' || c == '"').to_ascii_lowercase();
        if !self.columns.contains(&name) {
            return None;
        }

        match &column.owner {
            Some(owner) if !self.refs.iter().any(|x| x.eq_ignore_ascii_case(owner)) => None,
            _ => Some(name),
        }
    }

    fn condition(
        &self,
        leaf: &Predicate,
        params: &[Value],
    ) -> Result<Option<(String, ShardingValue)>, RoutingError> {
        let res = match leaf {
            Predicate::Compare { column, op, value } => {
                let column = match self.matches(column) {
                    Some(column) => column,
                    None => return Ok(None),
                };
                let val = resolve(value, params)?;
                if val.is_null() {
                    return Ok(None);
                }

                use std::ops::Bound::*;
                let range = |lower, upper| Some((column.clone(), ShardingValue::Range(ValueRange::new(lower, upper))));
                match (op, val.as_i64()) {
                    (CompareOp::Eq, _) => Some((column.clone(), ShardingValue::Exact(vec![val]))),
                    (CompareOp::Lt, Some(v)) => range(Unbounded, Excluded(v)),
                    (CompareOp::LtEq, Some(v)) => range(Unbounded, Included(v)),
                    (CompareOp::Gt, Some(v)) => range(Excluded(v), Unbounded),
                    (CompareOp::GtEq, Some(v)) => range(Included(v), Unbounded),
                    _ => None,
                }
            }
            Predicate::In { column, values } => {
                let column = match self.matches(column) {
                    Some(column) => column,
                    None => return Ok(None),
                };
                let mut vals = vec![];
                for expr in values.iter() {
                    let val = resolve(expr, params)?;
                    if !val.is_null() && !vals.contains(&val) {
                        vals.push(val);
                    }
                }
                if vals.is_empty() {
                    None
                } else {
                    Some((column, ShardingValue::Exact(vals)))
                }
            }
            Predicate::Between { column, low, high } => {
                let column = match self.matches(column) {
                    Some(column) => column,
                    None => return Ok(None),
                };
                let low = resolve(low, params)?.as_i64();
                let high = resolve(high, params)?.as_i64();
                match (low, high) {
                    (Some(low), Some(high)) => Some((column, ShardingValue::Range(ValueRange::closed(low, high)))),
                    _ => None,
                }
            }
            _ => None,
        };
        Ok(res)
    }
}

fn flatten_and<'p>(predicate: &'p Predicate, leaves: &mut Vec<&'p Predicate>) {
    match predicate {
        Predicate::And(items) => {
            for item in items.iter() {
                flatten_and(item, leaves);
            }
        }
        Predicate::Or(_) | Predicate::Opaque => {}
        leaf => leaves.push(leaf),
    }
}

// Equality beats ranges. Contradicting equalities keep the first condition.
fn merge(existing: &ShardingValue, value: ShardingValue) -> ShardingValue {
    match (existing, value) {
        (ShardingValue::Exact(a), ShardingValue::Exact(b)) => {
            let both = a.iter().filter(|x| b.contains(x)).cloned().collect::<Vec<_>>();
            if both.is_empty() {
                ShardingValue::Exact(a.clone())
            } else {
                ShardingValue::Exact(both)
            }
        }
        (ShardingValue::Exact(a), ShardingValue::Range(_)) => ShardingValue::Exact(a.clone()),
        (ShardingValue::Range(_), exact @ ShardingValue::Exact(_)) => exact,
        (ShardingValue::Range(a), ShardingValue::Range(b)) => ShardingValue::Range(a.intersect(&b)),
    }
}

/// Sharding values of one insert row. `generated` carries the key generated
/// for the row when the statement omits the key column.
pub fn insert_row_values(
    clause: &InsertClause,
    row: usize,
    columns: &[String],
    params: &[Value],
    generated: Option<(&str, &Value)>,
) -> Result<ShardingValues, RoutingError> {
    let mut values = ShardingValues::new();
    let row = match clause.rows.get(row) {
        Some(row) => row,
        None => return Ok(values),
    };

    for column in columns.iter() {
        if let Some((key, val)) = generated {
            if key == column.as_str() {
                values.insert(column, ShardingValue::Exact(vec![val.clone()]));
                continue;
            }
        }

        let expr = match clause.column_index(column).and_then(|idx| row.values.get(idx)) {
            Some(expr) => expr,
            None => continue,
        };
        let val = resolve(expr, params)?;
        if !val.is_null() {
            values.insert(column, ShardingValue::Exact(vec![val]));
        }
    }
    Ok(values)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stmt::StatementKind;

    fn statement(predicate: Predicate) -> ParsedStatement {
        ParsedStatement::builder(
            "SELECT * FROM t_order o JOIN t_user u ON o.user_id = u.id WHERE x",
            StatementKind::Select,
        )
        .table_with_alias("t_order", "o")
        .table_with_alias("t_user", "u")
        .predicate(predicate)
        .build()
        .unwrap()
    }

    #[test]
    fn test_extract_and_conditions() {
        let stmt = statement(Predicate::And(vec![
            Predicate::eq(Column::owned("o", "ORDER_ID"), Expr::param(0)),
            Predicate::in_list(Column::new("user_id"), vec![Expr::literal(1), Expr::param(1), Expr::literal(1)]),
            Predicate::eq(Column::owned("u", "order_id"), Expr::literal(99)),
        ]));
        let columns = vec!["order_id".to_string(), "user_id".to_string()];
        let extractor = ConditionExtractor::new(&stmt, "t_order", &columns);

        let values = extractor.extract(&[Value::Int(7), Value::Int(2)]).unwrap();
        assert_eq!(values.get("order_id"), Some(&ShardingValue::Exact(vec![Value::Int(7)])));
        assert_eq!(values.get("user_id"), Some(&ShardingValue::Exact(vec![Value::Int(1), Value::Int(2)])));
    }

    #[test]
    fn test_extract_ranges() {
        let stmt = statement(Predicate::And(vec![
            Predicate::compare(Column::new("order_id"), CompareOp::Gt, Expr::literal(10)),
            Predicate::between(Column::new("order_id"), Expr::literal(0), Expr::literal(12)),
            Predicate::compare(Column::new("user_id"), CompareOp::NotEq, Expr::literal(3)),
        ]));
        let columns = vec!["order_id".to_string(), "user_id".to_string()];
        let values = ConditionExtractor::new(&stmt, "t_order", &columns).extract(&[]).unwrap();

        match values.get("order_id") {
            Some(ShardingValue::Range(range)) => assert_eq!((range.lower(), range.upper()), (Some(11), Some(12))),
            other => panic!("unexpected {:?}", other),
        }
        assert!(values.get("user_id").is_none());
    }

    #[test]
    fn test_extract_or_and_conflicts() {
        let columns = vec!["order_id".to_string()];

        let stmt = statement(Predicate::Or(vec![
            Predicate::eq(Column::new("order_id"), Expr::literal(1)),
            Predicate::eq(Column::new("order_id"), Expr::literal(2)),
        ]));
        assert!(ConditionExtractor::new(&stmt, "t_order", &columns).extract(&[]).unwrap().is_empty());

        let stmt = statement(Predicate::And(vec![
            Predicate::compare(Column::new("order_id"), CompareOp::Lt, Expr::literal(5)),
            Predicate::eq(Column::new("order_id"), Expr::literal(1)),
            Predicate::eq(Column::new("order_id"), Expr::literal(2)),
        ]));
        let values = ConditionExtractor::new(&stmt, "t_order", &columns).extract(&[]).unwrap();
        assert_eq!(values.get("order_id"), Some(&ShardingValue::Exact(vec![Value::Int(1)])));
    }

    #[test]
    fn test_missing_parameter() {
        let stmt = statement(Predicate::eq(Column::new("order_id"), Expr::param(3)));
        let columns = vec!["order_id".to_string()];
        let res = ConditionExtractor::new(&stmt, "t_order", &columns).extract(&[Value::Int(1)]);
        assert_eq!(res, Err(RoutingError::MissingParameter { index: 3, len: 1 }));
    }
}
