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

//! Inline expressions: text with `${...}` or `$->{...}` placeholders.

pub mod eval;

use std::collections::HashMap;

use sharding_error::error::{ConfigurationError, RoutingError};

pub use self::eval::{ExprValue, Expression};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InlineError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unbound variable {0:?}")]
    UnboundVariable(String),

    #[error("{0}")]
    Eval(String),
}

impl InlineError {
    pub fn into_configuration(self, expr: &str) -> ConfigurationError {
        ConfigurationError::MalformedExpression { expr: expr.to_string(), reason: self.to_string() }
    }
}

impl From<InlineError> for RoutingError {
    fn from(e: InlineError) -> Self {
        RoutingError::Expression(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Placeholder(String),
}

/// Raw split of an inline string into literal text and placeholder bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, InlineError> {
        let mut segments = vec![];
        let mut text = String::new();
        let mut rest = source;

        while let Some(idx) = rest.find('$') {
            let after = &rest[idx + 1..];
            let body_start = if after.starts_with('{') {
                1
            } else if after.starts_with("->{") {
                3
            } else {
                text.push_str(&rest[..idx + 1]);
                rest = after;
                continue;
            };

            text.push_str(&rest[..idx]);
            let body = &after[body_start..];
            let close = body
                .find('}')
                .ok_or_else(|| InlineError::Syntax(format!("unclosed placeholder in {:?}", source)))?;

            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }
            segments.push(Segment::Placeholder(body[..close].trim().to_string()));
            rest = &body[close + 1..];
        }

        text.push_str(rest);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Template { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_placeholder(&self) -> bool {
        self.segments.iter().any(|x| matches!(x, Segment::Placeholder(_)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Compiled {
    Text(String),
    Expr(Expression),
}

/// A template whose placeholders are compiled arithmetic expressions, used by
/// the inline and complex sharding strategies, e.g. `t_order_${order_id % 2}`.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineExpression {
    source: String,
    parts: Vec<Compiled>,
}

impl InlineExpression {
    pub fn compile(source: &str) -> Result<Self, ConfigurationError> {
        let template = Template::parse(source).map_err(|e| e.into_configuration(source))?;
        if !template.has_placeholder() {
            return Err(InlineError::Syntax("no placeholder".to_string()).into_configuration(source));
        }

        let parts = template
            .segments()
            .iter()
            .map(|x| match x {
                Segment::Text(text) => Ok(Compiled::Text(text.clone())),
                Segment::Placeholder(body) => Expression::compile(body).map(Compiled::Expr),
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.into_configuration(source))?;

        Ok(InlineExpression { source: source.to_string(), parts })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Column names the expression reads, lower cased.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = vec![];
        for part in self.parts.iter() {
            if let Compiled::Expr(expr) = part {
                for ident in expr.idents() {
                    if !columns.contains(&ident) {
                        columns.push(ident);
                    }
                }
            }
        }
        columns
    }

    pub fn render(&self, vars: &HashMap<String, ExprValue>) -> Result<String, InlineError> {
        let mut out = String::new();
        for part in self.parts.iter() {
            match part {
                Compiled::Text(text) => out.push_str(text),
                Compiled::Expr(expr) => out.push_str(&expr.eval(vars)?.to_string()),
            }
        }
        Ok(out)
    }
}
