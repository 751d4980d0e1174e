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

use std::fmt;

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use sharding_error::error::ConfigurationError;

use crate::inline::{Segment, Template};

lazy_static! {
    static ref RANGE: Regex = Regex::new(r"^\s*(-?\d+)\s*\.\.\s*(-?\d+)\s*$").unwrap();
}

/// A physical `(data source, table)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

impl DataNode {
    pub fn new(data_source: &str, table: &str) -> Self {
        DataNode { data_source: data_source.to_string(), table: table.to_string() }
    }

    /// Splits on the first `.`.
    pub fn parse(node: &str) -> Result<Self, ConfigurationError> {
        let node = node.trim();
        match node.split_once('.') {
            Some((ds, table)) if !ds.trim().is_empty() && !table.trim().is_empty() => {
                Ok(DataNode::new(ds.trim(), table.trim()))
            }
            _ => Err(ConfigurationError::InvalidDataNode(node.to_string())),
        }
    }
}

impl fmt::Display for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.data_source, self.table)
    }
}

/// Expands `ds_${0..1}.t_order_${0..1}, ds_2.t_order` into data nodes, in
/// declaration order with the leftmost placeholder varying slowest.
pub fn expand_data_nodes(expr: &str) -> Result<Vec<DataNode>, ConfigurationError> {
    expand_inline(expr)?.iter().map(|x| DataNode::parse(x)).collect()
}

pub fn expand_inline(expr: &str) -> Result<Vec<String>, ConfigurationError> {
    let mut res = vec![];
    for part in split_top_level(expr)? {
        res.extend(expand_one(part)?);
    }
    Ok(res)
}

fn split_top_level(expr: &str) -> Result<Vec<&str>, ConfigurationError> {
    let mut parts = vec![];
    let mut depth = 0i32;
    let mut start = 0;

    for (idx, c) in expr.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(malformed(expr, "unbalanced '}'"));
                }
            }
            ',' if depth == 0 => {
                parts.push(&expr[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(malformed(expr, "unbalanced '{'"));
    }
    parts.push(&expr[start..]);

    let parts = parts.into_iter().map(|x| x.trim()).filter(|x| !x.is_empty()).collect::<Vec<_>>();
    if parts.is_empty() {
        return Err(malformed(expr, "empty expression"));
    }
    Ok(parts)
}

fn expand_one(expr: &str) -> Result<Vec<String>, ConfigurationError> {
    let template = Template::parse(expr).map_err(|e| e.into_configuration(expr))?;

    let mut choices: Vec<Vec<String>> = vec![];
    for segment in template.segments() {
        match segment {
            Segment::Text(text) => choices.push(vec![text.clone()]),
            Segment::Placeholder(body) => choices.push(placeholder_values(expr, body)?),
        }
    }

    if choices.len() == 1 {
        return Ok(choices.remove(0));
    }

    Ok(choices.into_iter().multi_cartesian_product().map(|x| x.concat()).collect())
}

fn placeholder_values(expr: &str, body: &str) -> Result<Vec<String>, ConfigurationError> {
    if let Some(caps) = RANGE.captures(body) {
        let bound = |idx: usize| {
            caps[idx].parse::<i64>().map_err(|_| malformed(expr, "range bound out of range"))
        };
        let (start, end) = (bound(1)?, bound(2)?);
        if start > end {
            return Err(ConfigurationError::InvalidRange { expr: expr.to_string(), start, end });
        }
        return Ok((start..=end).map(|x| x.to_string()).collect());
    }

    let body = body.trim();
    if body.starts_with('[') && body.ends_with(']') {
        let items = body[1..body.len() - 1]
            .split(',')
            .map(|x| x.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
            .collect::<Vec<_>>();
        if items.iter().any(|x| x.is_empty()) {
            return Err(malformed(expr, "empty list item"));
        }
        return Ok(items);
    }

    Err(malformed(expr, &format!("unsupported placeholder {:?}", body)))
}

fn malformed(expr: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::MalformedExpression { expr: expr.to_string(), reason: reason.to_string() }
}
