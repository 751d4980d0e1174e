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

use thiserror::Error as ThisError;

/// Bad or missing rule definitions. Detected when a schema is built or on
/// first use, fatal to that schema until the configuration is corrected.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum ConfigurationError {
    #[error("logic table name is empty")]
    EmptyLogicTable,

    #[error("table rule {0:?} is declared more than once")]
    DuplicateTableRule(String),

    #[error("no table rule registered for logic table {0:?}")]
    TableRuleNotFound(String),

    #[error("invalid range {start}..{end} in expression {expr:?}")]
    InvalidRange { expr: String, start: i64, end: i64 },

    #[error("malformed inline expression {expr:?}: {reason}")]
    MalformedExpression { expr: String, reason: String },

    #[error("invalid data node {0:?}, expect `data_source.table`")]
    InvalidDataNode(String),

    #[error("data source {0:?} is not registered")]
    DataSourceNotFound(String),

    #[error("table rule {0:?} resolves to no data node")]
    EmptyDataNodes(String),

    #[error("data node {node:?} is claimed by both {first:?} and {second:?}")]
    DuplicateDataNode { node: String, first: String, second: String },

    #[error("binding table {0:?} has no table rule")]
    UnknownBindingTable(String),

    #[error("binding tables {0:?} and {1:?} are not sharded the same way")]
    InconsistentBindingTables(String, String),

    #[error("no default data source for unsharded statement")]
    NoDefaultDataSource,

    #[error("master-slave rule {0:?} has no master data source")]
    MissingMaster(String),

    #[error("worker id {0} is out of range 0..1024")]
    InvalidWorkerId(i64),

    #[error("schema {0:?} declares neither sharding nor master-slave rules")]
    EmptySchema(String),
}

/// A statement that cannot be resolved to any physical target. Never retried:
/// routing is deterministic for the same inputs.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum RoutingError {
    #[error("no physical destination for logic table {0:?}")]
    NoRoute(String),

    #[error("algorithm of logic table {table:?} returned {target:?}, which is not a candidate")]
    UnknownTarget { table: String, target: String },

    #[error("parameter index {index} is out of range, {len} parameters bound")]
    MissingParameter { index: usize, len: usize },

    #[error("value {0:?} cannot be used as a sharding value")]
    InvalidShardingValue(String),

    #[error("tables {0:?} share no common data source")]
    NoCommonDataSource(Vec<String>),

    #[error("insert into {0:?} resolves to more than one data node")]
    InsertMultipleNodes(String),

    #[error("algorithm expression failed: {0}")]
    Expression(String),
}

/// Inconsistency between the routing and the rewrite stage, a defect rather
/// than a user error.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum RewriteError {
    #[error("logic token {0:?} cannot be resolved to an actual table")]
    UnresolvedToken(String),

    #[error("token span {start}..{end} is outside of sql with length {len}")]
    SpanOutOfBounds { start: usize, end: usize, len: usize },

    #[error("token spans overlap at offset {0}")]
    OverlappedSpan(usize),

    #[error("insert statement has no values row")]
    MissingInsertRows,
}

#[derive(Debug, ThisError)]
pub enum ErrorKind {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("rewrite error: {0}")]
    Rewrite(#[from] RewriteError),
}

#[derive(Debug, ThisError)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<ConfigurationError> for Error {
    fn from(err: ConfigurationError) -> Self {
        Error::new(ErrorKind::Configuration(err))
    }
}

impl From<RoutingError> for Error {
    fn from(err: RoutingError) -> Self {
        Error::new(ErrorKind::Routing(err))
    }
}

impl From<RewriteError> for Error {
    fn from(err: RewriteError) -> Self {
        Error::new(ErrorKind::Rewrite(err))
    }
}

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        Error { kind }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}
