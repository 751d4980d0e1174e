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

//! Rewrites logic sql into physical sql by splicing replacements at the
//! token spans reported by the parser.

pub mod rewrite_const;

use indexmap::IndexMap;
use sharding_error::error::RewriteError;

use self::rewrite_const::*;
use crate::{
    rule::ShardingRule,
    stmt::{unquote, ParsedStatement, Span},
    value::Value,
};

/// Generated key values to append to the selected rows, `None` entries are
/// bound as an extra `?` parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySplice {
    pub column: String,
    pub values: Vec<Option<Value>>,
}

/// Rows of a multi-row insert kept by one route unit, by row index.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRewrite {
    pub rows: Vec<usize>,
    pub key: Option<KeySplice>,
}

pub struct SQLRewriteEngine<'a> {
    statement: &'a ParsedStatement,
    rule: &'a ShardingRule,
}

impl<'a> SQLRewriteEngine<'a> {
    pub fn new(statement: &'a ParsedStatement, rule: &'a ShardingRule) -> Self {
        SQLRewriteEngine { statement, rule }
    }

    /// `table_map` maps lower cased logic tables to actual tables. Every
    /// table token of the statement must be present, broadcast and
    /// unsharded tables map to themselves.
    pub fn rewrite(
        &self,
        table_map: &IndexMap<String, String>,
        insert: Option<&InsertRewrite>,
    ) -> Result<String, RewriteError> {
        let sql = &self.statement.sql;
        let mut changes: Vec<(Span, String)> = vec![];

        for token in self.statement.tables.iter() {
            let actual = table_map
                .get(&unquote(&token.name).to_ascii_lowercase())
                .ok_or_else(|| RewriteError::UnresolvedToken(token.name.clone()))?;
            let origin = span_text(sql, token.span)?;
            changes.push((token.span, quote_like(origin, actual)));
        }

        for token in self.statement.indexes.iter() {
            let name = unquote(&token.name);
            let owner = match &token.table {
                Some(table) => Some(unquote(table).to_ascii_lowercase()),
                None => self.rule.table_rule_by_index(name).map(|x| x.logic_table.clone()),
            };
            let actual = owner
                .as_ref()
                .and_then(|x| table_map.get(x))
                .ok_or_else(|| RewriteError::UnresolvedToken(token.name.clone()))?;
            let origin = span_text(sql, token.span)?;
            changes.push((token.span, quote_like(origin, &format!("{}{}{}", name, INDEX_SEPARATOR, actual))));
        }

        if let Some(insert) = insert {
            self.insert_changes(insert, &mut changes)?;
        }

        changes.sort_by_key(|(span, _)| (span.start(), span.end()));
        Self::change_sql(sql, &changes)
    }

    fn insert_changes(
        &self,
        insert: &InsertRewrite,
        changes: &mut Vec<(Span, String)>,
    ) -> Result<(), RewriteError> {
        let sql = &self.statement.sql;
        let clause = self.statement.insert.as_ref().ok_or(RewriteError::MissingInsertRows)?;
        let (first, last) = match (clause.rows.first(), clause.rows.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(RewriteError::MissingInsertRows),
        };

        if let (Some(key), Some(end)) = (&insert.key, clause.columns_end) {
            changes.push((Span::new(end, end), format!("{}{}", LIST_SEPARATOR, key.column)));
        }

        let mut rows = Vec::with_capacity(insert.rows.len());
        for (pos, idx) in insert.rows.iter().enumerate() {
            let row = clause.rows.get(*idx).ok_or(RewriteError::MissingInsertRows)?;
            let text = span_text(sql, row.span)?;
            match &insert.key {
                Some(key) => {
                    let value = match key.values.get(pos) {
                        Some(Some(val)) => val.to_sql_literal(),
                        _ => PLACEHOLDER.to_string(),
                    };
                    let body = text.strip_suffix(')').unwrap_or(text).trim_end();
                    rows.push(format!("{}{}{})", body, LIST_SEPARATOR, value));
                }
                None => rows.push(text.to_string()),
            }
        }

        changes.push((Span::new(first.span.start(), last.span.end()), rows.join(LIST_SEPARATOR)));
        Ok(())
    }

    fn change_sql(sql: &str, changes: &[(Span, String)]) -> Result<String, RewriteError> {
        let mut target_sql = String::with_capacity(sql.len());
        let mut offset = 0;
        for (span, target) in changes.iter() {
            if span.start() < offset {
                return Err(RewriteError::OverlappedSpan(span.start()));
            }
            target_sql.push_str(&sql[offset..span.start()]);
            target_sql.push_str(target);
            offset = span.end();
        }
        target_sql.push_str(&sql[offset..]);
        Ok(target_sql)
    }
}

fn span_text(sql: &str, span: Span) -> Result<&str, RewriteError> {
    let valid = span.start() <= span.end()
        && span.end() <= sql.len()
        && sql.is_char_boundary(span.start())
        && sql.is_char_boundary(span.end());
    if !valid {
        return Err(RewriteError::SpanOutOfBounds { start: span.start(), end: span.end(), len: sql.len() });
    }
    Ok(&sql[span.start()..span.end()])
}

// Keeps the quote style of the original token, the schema qualifier is dropped.
fn quote_like(origin: &str, actual: &str) -> String {
    match origin.chars().last() {
        Some(c) if QUOTES.contains(&c) => format!("{}{}{}", c, actual, c),
        _ => actual.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::{ShardingRuleConfig, TableRuleConfig},
        stmt::{Expr, StatementKind},
    };

    fn rule() -> ShardingRule {
        let config = ShardingRuleConfig {
            tables: vec![TableRuleConfig {
                logic_table: "t_order".to_string(),
                actual_data_nodes: "ds_${0..1}.t_order_${0..1}".to_string(),
                logic_index: Some("idx_status".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        ShardingRule::new(&config).unwrap()
    }

    fn map(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_rewrite_tables() {
        let rule = rule();
        let sql = "SELECT t_order.id FROM db.`t_order` o JOIN t_config c ON o.id = c.id WHERE o.id = ?";
        let stmt = ParsedStatement::builder(sql, StatementKind::Select)
            .table_with_alias("t_order", "o")
            .table_with_alias("t_config", "c")
            .build()
            .unwrap();

        let engine = SQLRewriteEngine::new(&stmt, &rule);
        let res = engine.rewrite(&map(&[("t_order", "t_order_1"), ("t_config", "t_config")]), None).unwrap();
        assert_eq!(
            res,
            "SELECT t_order_1.id FROM `t_order_1` o JOIN t_config c ON o.id = c.id WHERE o.id = ?"
        );
    }

    #[test]
    fn test_rewrite_index() {
        let rule = rule();
        let sql = "CREATE INDEX idx_status ON t_order (status)";
        let stmt = ParsedStatement::builder(sql, StatementKind::Ddl)
            .table("t_order")
            .index("idx_status", None)
            .build()
            .unwrap();

        let engine = SQLRewriteEngine::new(&stmt, &rule);
        let res = engine.rewrite(&map(&[("t_order", "t_order_0")]), None).unwrap();
        assert_eq!(res, "CREATE INDEX idx_status_t_order_0 ON t_order_0 (status)");
    }

    #[test]
    fn test_rewrite_insert_rows_and_key() {
        let rule = rule();
        let sql = "INSERT INTO t_order (user_id, status) VALUES (?, ?), (?, ?), (?, ?)";
        let stmt = ParsedStatement::builder(sql, StatementKind::Insert)
            .table("t_order")
            .insert(
                &["user_id", "status"],
                (0..3).map(|x| vec![Expr::param(x * 2), Expr::param(x * 2 + 1)]).collect(),
            )
            .build()
            .unwrap();

        let engine = SQLRewriteEngine::new(&stmt, &rule);
        let insert = InsertRewrite {
            rows: vec![0, 2],
            key: Some(KeySplice { column: "order_id".to_string(), values: vec![None, None] }),
        };
        let res = engine.rewrite(&map(&[("t_order", "t_order_1")]), Some(&insert)).unwrap();
        assert_eq!(res, "INSERT INTO t_order_1 (user_id, status, order_id) VALUES (?, ?, ?), (?, ?, ?)");
    }

    #[test]
    fn test_rewrite_insert_literal_key() {
        let rule = rule();
        let sql = "INSERT INTO t_order (user_id) VALUES (10)";
        let stmt = ParsedStatement::builder(sql, StatementKind::Insert)
            .table("t_order")
            .insert(&["user_id"], vec![vec![Expr::literal(10)]])
            .build()
            .unwrap();

        let engine = SQLRewriteEngine::new(&stmt, &rule);
        let insert = InsertRewrite {
            rows: vec![0],
            key: Some(KeySplice { column: "order_id".to_string(), values: vec![Some(Value::Int(99))] }),
        };
        let res = engine.rewrite(&map(&[("t_order", "t_order_0")]), Some(&insert)).unwrap();
        assert_eq!(res, "INSERT INTO t_order_0 (user_id, order_id) VALUES (10, 99)");
    }

    #[test]
    fn test_rewrite_errors() {
        let rule = rule();
        let stmt = ParsedStatement::builder("SELECT * FROM t_order", StatementKind::Select)
            .table("t_order")
            .build()
            .unwrap();
        let engine = SQLRewriteEngine::new(&stmt, &rule);
        assert!(matches!(engine.rewrite(&map(&[]), None), Err(RewriteError::UnresolvedToken(_))));

        let mut broken = stmt.clone();
        broken.tables[0].span = Span::new(14, 40);
        let engine = SQLRewriteEngine::new(&broken, &rule);
        assert!(matches!(
            engine.rewrite(&map(&[("t_order", "t_order_0")]), None),
            Err(RewriteError::SpanOutOfBounds { .. })
        ));
    }
}
