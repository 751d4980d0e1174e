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

//! Parsed statement as handed over by the parser. Only the parts routing and
//! rewriting need are modelled: the statement kind, table and index tokens
//! with their byte spans, the predicate tree and the insert values.

use lazy_static::lazy_static;
use regex::Regex;

use crate::value::Value;

/// Byte range `[start, end)` of a token inside the raw sql.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    start: usize,
    end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    Other,
}

impl StatementKind {
    pub fn is_query(&self) -> bool {
        matches!(self, StatementKind::Select)
    }

    pub fn is_write(&self) -> bool {
        !self.is_query()
    }
}

/// One occurrence of a logic table in the sql. The span covers the whole,
/// possibly schema qualified and quoted, reference.
#[derive(Debug, Clone, PartialEq)]
pub struct TableToken {
    pub span: Span,
    pub schema: Option<String>,
    pub name: String,
    pub alias: Option<String>,
}

/// One occurrence of a logic index, `table` is known for `CREATE INDEX .. ON t`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexToken {
    pub span: Span,
    pub name: String,
    pub table: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    // Table name or alias qualifying the column.
    pub owner: Option<String>,
}

impl Column {
    pub fn new(name: &str) -> Self {
        Column { name: name.to_string(), owner: None }
    }

    pub fn owned(owner: &str, name: &str) -> Self {
        Column { name: name.to_string(), owner: Some(owner.to_string()) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    // Zero based index of a `?` placeholder.
    Param(usize),
}

impl Expr {
    pub fn param(idx: usize) -> Self {
        Expr::Param(idx)
    }

    pub fn literal(val: impl Into<Value>) -> Self {
        Expr::Literal(val.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Compare { column: Column, op: CompareOp, value: Expr },
    In { column: Column, values: Vec<Expr> },
    Between { column: Column, low: Expr, high: Expr },
    // Any expression routing cannot use.
    Opaque,
}

impl Predicate {
    pub fn eq(column: Column, value: Expr) -> Self {
        Predicate::Compare { column, op: CompareOp::Eq, value }
    }

    pub fn compare(column: Column, op: CompareOp, value: Expr) -> Self {
        Predicate::Compare { column, op, value }
    }

    pub fn in_list(column: Column, values: Vec<Expr>) -> Self {
        Predicate::In { column, values }
    }

    pub fn between(column: Column, low: Expr, high: Expr) -> Self {
        Predicate::Between { column, low, high }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertRow {
    // Covers `( ... )` including both parentheses.
    pub span: Span,
    pub values: Vec<Expr>,
}

impl InsertRow {
    pub fn param_indexes(&self) -> impl Iterator<Item = usize> + '_ {
        self.values.iter().filter_map(|x| match x {
            Expr::Param(idx) => Some(*idx),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertClause {
    pub columns: Vec<String>,
    // Offset of the `)` closing the column list, `None` when the list is omitted.
    pub columns_end: Option<usize>,
    pub rows: Vec<InsertRow>,
}

impl InsertClause {
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|x| unquote(x).eq_ignore_ascii_case(column))
    }

    pub fn has_params(&self) -> bool {
        self.rows.iter().any(|x| x.param_indexes().next().is_some())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStatement {
    pub sql: String,
    pub kind: StatementKind,
    pub tables: Vec<TableToken>,
    pub indexes: Vec<IndexToken>,
    pub predicate: Option<Predicate>,
    pub insert: Option<InsertClause>,
}

impl ParsedStatement {
    pub fn new(sql: &str, kind: StatementKind) -> Self {
        ParsedStatement {
            sql: sql.to_string(),
            kind,
            tables: vec![],
            indexes: vec![],
            predicate: None,
            insert: None,
        }
    }

    pub fn builder(sql: &str, kind: StatementKind) -> StatementBuilder {
        StatementBuilder {
            stmt: ParsedStatement::new(sql, kind),
            tables: vec![],
            indexes: vec![],
            pending_insert: None,
        }
    }

    /// Logic table names in order of first appearance, lower cased.
    pub fn logic_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = vec![];
        for token in self.tables.iter() {
            let name = token.name.to_ascii_lowercase();
            if !tables.contains(&name) {
                tables.push(name);
            }
        }
        tables
    }

    /// Name and aliases a table is referenced with.
    pub fn table_refs(&self, logic_table: &str) -> Vec<&str> {
        let mut refs = vec![];
        for token in self.tables.iter().filter(|x| x.name.eq_ignore_ascii_case(logic_table)) {
            if !refs.contains(&token.name.as_str()) {
                refs.push(token.name.as_str());
            }
            if let Some(alias) = &token.alias {
                if !refs.contains(&alias.as_str()) {
                    refs.push(alias.as_str());
                }
            }
        }
        refs
    }
}

pub(crate) fn unquote(name: &str) -> &str {
    name.trim_matches(|c| c == '`' || c == '"')
}

#[derive(Debug, thiserror::Error)]
pub enum StatementError {
    #[error("table {0:?} does not occur in sql")]
    TableNotFound(String),

    #[error("index {0:?} does not occur in sql")]
    IndexNotFound(String),

    #[error("expect {expect} values rows, found {found}")]
    InsertRowsNotFound { expect: usize, found: usize },
}

/// Locates token spans by scanning the sql text, for collaborators that know
/// table names but not their positions.
pub struct StatementBuilder {
    stmt: ParsedStatement,
    tables: Vec<(String, Option<String>)>,
    indexes: Vec<(String, Option<String>)>,
    pending_insert: Option<(Vec<String>, Vec<Vec<Expr>>)>,
}

impl StatementBuilder {
    /// Registers every occurrence of `name`, including column qualifiers.
    pub fn table(mut self, name: &str) -> Self {
        self.tables.push((name.to_string(), None));
        self
    }

    pub fn table_with_alias(mut self, name: &str, alias: &str) -> Self {
        self.tables.push((name.to_string(), Some(alias.to_string())));
        self
    }

    pub fn index(mut self, name: &str, table: Option<&str>) -> Self {
        self.indexes.push((name.to_string(), table.map(|x| x.to_string())));
        self
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.stmt.predicate = Some(predicate);
        self
    }

    pub fn insert(mut self, columns: &[&str], rows: Vec<Vec<Expr>>) -> Self {
        self.pending_insert = Some((columns.iter().map(|x| x.to_string()).collect(), rows));
        self
    }

    pub fn build(mut self) -> Result<ParsedStatement, StatementError> {
        for (name, alias) in self.tables.iter() {
            let spans = find_word_spans(&self.stmt.sql, name);
            if spans.is_empty() {
                return Err(StatementError::TableNotFound(name.clone()));
            }

            for span in spans {
                let (span, schema) = extend_schema(&self.stmt.sql, span);
                self.stmt.tables.push(TableToken {
                    span,
                    schema,
                    name: name.clone(),
                    alias: alias.clone(),
                });
            }
        }
        self.stmt.tables.sort_by_key(|x| x.span);

        for (name, table) in self.indexes.iter() {
            let spans = find_word_spans(&self.stmt.sql, name);
            if spans.is_empty() {
                return Err(StatementError::IndexNotFound(name.clone()));
            }

            for span in spans {
                self.stmt.indexes.push(IndexToken { span, name: name.clone(), table: table.clone() });
            }
        }

        if let Some((columns, rows)) = self.pending_insert.take() {
            let table_end = self.stmt.tables.first().map(|x| x.span.end()).unwrap_or(0);
            let (columns_end, row_spans) = locate_insert(&self.stmt.sql, table_end);
            if row_spans.len() != rows.len() {
                return Err(StatementError::InsertRowsNotFound {
                    expect: rows.len(),
                    found: row_spans.len(),
                });
            }

            let rows = rows
                .into_iter()
                .zip(row_spans)
                .map(|(values, span)| InsertRow { span, values })
                .collect();
            self.stmt.insert = Some(InsertClause {
                columns,
                columns_end,
                rows,
            });
        }

        Ok(self.stmt)
    }
}

// Occurrences of `word` outside of string literals.
fn find_word_spans(sql: &str, word: &str) -> Vec<Span> {
    let pattern = format!(r#"[`"]?\b{}\b[`"]?"#, regex::escape(word));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(_) => return vec![],
    };

    let literals = string_literals(sql);
    re.find_iter(sql)
        .filter(|m| !literals.iter().any(|x| m.start() < x.end() && x.start() < m.end()))
        .map(|m| Span::new(m.start(), m.end()))
        .collect()
}

// Single quoted literals, quotes included. `''` and backslash escapes stay
// inside the literal.
fn string_literals(sql: &str) -> Vec<Span> {
    let bytes = sql.as_bytes();
    let mut res = vec![];
    let mut start: Option<usize> = None;
    let mut idx = 0;
    while idx < bytes.len() {
        match (start, bytes[idx]) {
            (None, b'\'') => start = Some(idx),
            (Some(_), b'\\') => idx += 1,
            (Some(open), b'\'') => {
                if bytes.get(idx + 1) == Some(&b'\'') {
                    idx += 1;
                } else {
                    res.push(Span::new(open, idx + 1));
                    start = None;
                }
            }
            _ => {}
        }
        idx += 1;
    }

    if let Some(open) = start {
        res.push(Span::new(open, bytes.len()));
    }
    res
}

// Widens `t` to `db.t` when the table is schema qualified.
fn extend_schema(sql: &str, span: Span) -> (Span, Option<String>) {
    let prefix = &sql[..span.start()];
    if !prefix.ends_with('.') {
        return (span, None);
    }

    let head = &prefix[..prefix.len() - 1];
    let schema_start = head
        .char_indices()
        .rev()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '`' || *c == '"'))
        .map(|(idx, c)| idx + c.len_utf8())
        .unwrap_or(0);

    if schema_start == head.len() {
        return (span, None);
    }

    let schema = unquote(&head[schema_start..]).to_string();
    (Span::new(schema_start, span.end()), Some(schema))
}

// Returns the closing offset of the column list and the spans of all rows.
fn locate_insert(sql: &str, table_end: usize) -> (Option<usize>, Vec<Span>) {
    lazy_static! {
        static ref VALUES: Regex = Regex::new(r"(?i)\bvalues?\b").unwrap();
    }

    // The column list directly follows the table name, VALUES comes after it.
    let rest = &sql[table_end..];
    let open = table_end + (rest.len() - rest.trim_start().len());
    let columns_end = match sql.as_bytes().get(open) {
        Some(b'(') => match matching_paren(sql, open) {
            Some(close) => Some(close),
            None => return (None, vec![]),
        },
        _ => None,
    };

    let search_from = columns_end.map(|x| x + 1).unwrap_or(table_end);
    let values_at = match VALUES.find_at(sql, search_from) {
        Some(m) => m,
        None => return (None, vec![]),
    };

    let bytes = sql.as_bytes();
    let mut rows = vec![];
    let mut pos = values_at.end();
    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() || bytes[pos] != b'(' {
            break;
        }

        match matching_paren(sql, pos) {
            Some(close) => {
                rows.push(Span::new(pos, close + 1));
                pos = close + 1;
            }
            None => break,
        }

        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos < bytes.len() && bytes[pos] == b',' {
            pos += 1;
        } else {
            break;
        }
    }

    (columns_end, rows)
}

fn matching_paren(sql: &str, open: usize) -> Option<usize> {
    let mut depth = 0;
    let mut quote: Option<u8> = None;
    for (idx, b) in sql.as_bytes().iter().enumerate().skip(open) {
        match quote {
            Some(q) if *b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' | b'`' => quote = Some(*b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(idx);
                    }
                }
                _ => {}
            },
        }
    }
    None
}
