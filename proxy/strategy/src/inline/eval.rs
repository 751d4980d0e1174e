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

use std::{collections::HashMap, fmt};

use super::InlineError;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprValue::Int(val) => write!(f, "{}", val),
            ExprValue::Str(val) => write!(f, "{}", val),
        }
    }
}

impl TryFrom<&Value> for ExprValue {
    type Error = InlineError;

    fn try_from(val: &Value) -> Result<Self, Self::Error> {
        if val.is_null() {
            return Err(InlineError::Eval("null sharding value".to_string()));
        }

        match val.as_i64() {
            Some(val) => Ok(ExprValue::Int(val)),
            None => Ok(ExprValue::Str(val.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Op(BinOp),
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Int(i64),
    Str(String),
    Ident(String),
    Neg(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
}

/// A compiled arithmetic expression such as `order_id % 2` or `'t_' + (id / 10)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn compile(source: &str) -> Result<Self, InlineError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens: &tokens, pos: 0 };
        let root = parser.parse_expr()?;
        if parser.pos != tokens.len() {
            return Err(InlineError::Syntax(format!("unexpected token at {:?}", source)));
        }

        Ok(Expression { source: source.to_string(), root })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Identifiers referenced, lower cased, in order of first use.
    pub fn idents(&self) -> Vec<String> {
        let mut idents = vec![];
        collect_idents(&self.root, &mut idents);
        idents
    }

    pub fn eval(&self, vars: &HashMap<String, ExprValue>) -> Result<ExprValue, InlineError> {
        eval_node(&self.root, vars)
    }
}

fn collect_idents(node: &Node, idents: &mut Vec<String>) {
    match node {
        Node::Ident(name) => {
            let name = name.to_ascii_lowercase();
            if !idents.contains(&name) {
                idents.push(name);
            }
        }
        Node::Neg(inner) => collect_idents(inner, idents),
        Node::Binary(_, lhs, rhs) => {
            collect_idents(lhs, idents);
            collect_idents(rhs, idents);
        }
        _ => {}
    }
}

fn eval_node(node: &Node, vars: &HashMap<String, ExprValue>) -> Result<ExprValue, InlineError> {
    match node {
        Node::Int(val) => Ok(ExprValue::Int(*val)),
        Node::Str(val) => Ok(ExprValue::Str(val.clone())),
        Node::Ident(name) => vars
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| InlineError::UnboundVariable(name.clone())),
        Node::Neg(inner) => match eval_node(inner, vars)? {
            ExprValue::Int(val) => val
                .checked_neg()
                .map(ExprValue::Int)
                .ok_or_else(|| InlineError::Eval("integer overflow".to_string())),
            ExprValue::Str(val) => Err(InlineError::Eval(format!("cannot negate {:?}", val))),
        },
        Node::Binary(op, lhs, rhs) => {
            let lhs = eval_node(lhs, vars)?;
            let rhs = eval_node(rhs, vars)?;
            eval_binary(*op, lhs, rhs)
        }
    }
}

fn eval_binary(op: BinOp, lhs: ExprValue, rhs: ExprValue) -> Result<ExprValue, InlineError> {
    let (lhs, rhs) = match (op, lhs, rhs) {
        (BinOp::Add, ExprValue::Int(a), ExprValue::Int(b)) => (a, b),
        (BinOp::Add, a, b) => return Ok(ExprValue::Str(format!("{}{}", a, b))),
        (_, ExprValue::Int(a), ExprValue::Int(b)) => (a, b),
        (op, a, b) => {
            return Err(InlineError::Eval(format!("unsupported operand for {:?}: {} and {}", op, a, b)))
        }
    };

    let res = match op {
        BinOp::Add => lhs.checked_add(rhs),
        BinOp::Sub => lhs.checked_sub(rhs),
        BinOp::Mul => lhs.checked_mul(rhs),
        BinOp::Div => {
            if rhs == 0 {
                return Err(InlineError::Eval("division by zero".to_string()));
            }
            lhs.checked_div(rhs)
        }
        BinOp::Rem => {
            if rhs == 0 {
                return Err(InlineError::Eval("division by zero".to_string()));
            }
            lhs.checked_rem_euclid(rhs)
        }
    };

    res.map(ExprValue::Int).ok_or_else(|| InlineError::Eval("integer overflow".to_string()))
}

fn tokenize(source: &str) -> Result<Vec<Token>, InlineError> {
    let chars = source.chars().collect::<Vec<_>>();
    let mut tokens = vec![];
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            c if c.is_whitespace() => pos += 1,
            '+' => {
                tokens.push(Token::Op(BinOp::Add));
                pos += 1
            }
            '-' => {
                tokens.push(Token::Op(BinOp::Sub));
                pos += 1
            }
            '*' => {
                tokens.push(Token::Op(BinOp::Mul));
                pos += 1
            }
            '/' => {
                tokens.push(Token::Op(BinOp::Div));
                pos += 1
            }
            '%' => {
                tokens.push(Token::Op(BinOp::Rem));
                pos += 1
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1
            }
            '\'' | '"' => {
                let end = chars[pos + 1..]
                    .iter()
                    .position(|x| *x == c)
                    .ok_or_else(|| InlineError::Syntax(format!("unterminated string in {:?}", source)))?;
                tokens.push(Token::Str(chars[pos + 1..pos + 1 + end].iter().collect()));
                pos += end + 2;
            }
            c if c.is_ascii_digit() => {
                let start = pos;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
                let text = chars[start..pos].iter().collect::<String>();
                let val = text
                    .parse::<i64>()
                    .map_err(|_| InlineError::Syntax(format!("integer out of range: {}", text)))?;
                tokens.push(Token::Int(val));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    pos += 1;
                }
                tokens.push(Token::Ident(chars[start..pos].iter().collect()));
            }
            c => return Err(InlineError::Syntax(format!("unexpected character {:?} in {:?}", c, source))),
        }
    }

    if tokens.is_empty() {
        return Err(InlineError::Syntax("empty expression".to_string()));
    }

    Ok(tokens)
}

// expr   := term (('+' | '-') term)*
// term   := unary (('*' | '/' | '%') unary)*
// unary  := '-' unary | atom
// atom   := int | str | ident | '(' expr ')'
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_expr(&mut self) -> Result<Node, InlineError> {
        let mut lhs = self.parse_term()?;
        while let Some(Token::Op(op @ (BinOp::Add | BinOp::Sub))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Node, InlineError> {
        let mut lhs = self.parse_unary()?;
        while let Some(Token::Op(op @ (BinOp::Mul | BinOp::Div | BinOp::Rem))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node, InlineError> {
        if let Some(Token::Op(BinOp::Sub)) = self.peek() {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Node::Neg(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Node, InlineError> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| InlineError::Syntax("unexpected end of expression".to_string()))?;
        self.pos += 1;

        match token {
            Token::Int(val) => Ok(Node::Int(val)),
            Token::Str(val) => Ok(Node::Str(val)),
            Token::Ident(name) => Ok(Node::Ident(name)),
            Token::LParen => {
                let inner = self.parse_expr()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(InlineError::Syntax("missing ')'".to_string())),
                }
            }
            token => Err(InlineError::Syntax(format!("unexpected token {:?}", token))),
        }
    }
}
