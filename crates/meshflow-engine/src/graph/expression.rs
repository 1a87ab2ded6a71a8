//! Edge condition evaluation.
//!
//! A condition such as `${p_output.score} > 0.5 && ${mode} == "strict"` is
//! evaluated in two passes. First every `${path}` placeholder is replaced by
//! the JSON encoding of the value found at that dot-path in the context
//! (`null` when the path is missing). The resulting text is then parsed by a
//! small recursive-descent evaluator:
//!
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - Logical: `&&`, `||`, `!`, parentheses
//! - Literals: string (single or double quoted), number, bool, null
//! - Bare dot-path identifiers, resolved against the context
//!
//! Numeric comparison uses f64 coercion. Nothing is ever executed as code.

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;

use meshflow_core::context::ExecutionContext;

/// Errors from expression evaluation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExpressionError {
    #[error("parse error: {message}")]
    Parse { message: String },
}

fn parse_err(message: impl Into<String>) -> ExpressionError {
    ExpressionError::Parse {
        message: message.into(),
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\s*([^}]*?)\s*\}").expect("placeholder regex is valid"))
}

/// Replace every `${path}` with the JSON encoding of its context value.
pub fn render_placeholders(expression: &str, context: &ExecutionContext) -> String {
    placeholder_re()
        .replace_all(expression, |caps: &Captures| {
            context
                .resolve_path(&caps[1])
                .map(|v| v.to_string())
                .unwrap_or_else(|| "null".to_string())
        })
        .into_owned()
}

/// Substitute placeholders, then evaluate the expression to a boolean.
pub fn evaluate(expression: &str, context: &ExecutionContext) -> Result<bool, ExpressionError> {
    let rendered = render_placeholders(expression, context);
    evaluate_rendered(&rendered, context)
}

/// Evaluate an expression that has no placeholders left.
pub fn evaluate_rendered(
    expression: &str,
    context: &ExecutionContext,
) -> Result<bool, ExpressionError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(parse_err("empty expression"));
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        ctx: context,
    };
    let value = parser.disjunction()?;
    if let Some(extra) = parser.peek() {
        return Err(parse_err(format!("unexpected token: {extra:?}")));
    }
    Ok(truthy(&value))
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let next = chars.get(i + 1).copied();
        match chars[i] {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if next == Some('=') => {
                // Accept `===` as well
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                tokens.push(Token::Eq);
            }
            '!' if next == Some('=') => {
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                tokens.push(Token::Ne);
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '"' | '\'' => {
                let quote = chars[i];
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        None => return Err(parse_err("unterminated string literal")),
                        Some(&c) if c == quote => break,
                        Some('\\') => {
                            let escaped = chars
                                .get(i + 1)
                                .ok_or_else(|| parse_err("dangling escape"))?;
                            s.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(&c) => {
                            s.push(c);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
                i += 1; // closing quote
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || chars[i] == 'e'
                        || chars[i] == 'E'
                        || ((chars[i] == '-' || chars[i] == '+')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                let num: f64 = num_str
                    .parse()
                    .map_err(|_| parse_err(format!("invalid number: {num_str}")))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                match ident.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    "null" | "undefined" => tokens.push(Token::Null),
                    _ => tokens.push(Token::Ident(ident)),
                }
            }
            other => return Err(parse_err(format!("unexpected character: {other}"))),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Evaluation. Precedence, loosest first: ||, &&, !, comparison
// ---------------------------------------------------------------------------

/// JavaScript-like truthiness over JSON values.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[derive(Clone, Copy)]
enum CompOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompOp {
    fn from_token(token: &Token) -> Option<Self> {
        Some(match token {
            Token::Eq => Self::Eq,
            Token::Ne => Self::Ne,
            Token::Gt => Self::Gt,
            Token::Lt => Self::Lt,
            Token::Ge => Self::Ge,
            Token::Le => Self::Le,
            _ => return None,
        })
    }

    fn apply(self, left: &Value, right: &Value) -> bool {
        let ordered = |accept: fn(Ordering) -> bool| ordering(left, right).is_some_and(accept);
        match self {
            Self::Eq => same(left, right),
            Self::Ne => !same(left, right),
            Self::Gt => ordered(Ordering::is_gt),
            Self::Lt => ordered(Ordering::is_lt),
            Self::Ge => ordered(Ordering::is_ge),
            Self::Le => ordered(Ordering::is_le),
        }
    }
}

/// Equality without coercion; numbers compare as f64.
fn same(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => (l - r).abs() < f64::EPSILON,
        _ => left == right,
    }
}

/// Only two numbers or two strings are ordered.
fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    ctx: &'t ExecutionContext,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        let hit = self.peek() == Some(expected);
        if hit {
            self.pos += 1;
        }
        hit
    }

    /// Left-folds `operand (joiner operand)*` into a boolean.
    fn chain(
        &mut self,
        joiner: &Token,
        operand: fn(&mut Self) -> Result<Value, ExpressionError>,
        combine: fn(bool, bool) -> bool,
    ) -> Result<Value, ExpressionError> {
        let mut acc = operand(self)?;
        while self.eat(joiner) {
            let rhs = operand(self)?;
            acc = Value::Bool(combine(truthy(&acc), truthy(&rhs)));
        }
        Ok(acc)
    }

    fn disjunction(&mut self) -> Result<Value, ExpressionError> {
        self.chain(&Token::Or, Self::conjunction, |a, b| a || b)
    }

    fn conjunction(&mut self) -> Result<Value, ExpressionError> {
        self.chain(&Token::And, Self::negation, |a, b| a && b)
    }

    fn negation(&mut self) -> Result<Value, ExpressionError> {
        if self.eat(&Token::Not) {
            let inner = self.negation()?;
            return Ok(Value::Bool(!truthy(&inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Value, ExpressionError> {
        let left = self.operand()?;
        let Some(op) = self.peek().and_then(CompOp::from_token) else {
            return Ok(left);
        };
        self.pos += 1;
        let right = self.operand()?;
        Ok(Value::Bool(op.apply(&left, &right)))
    }

    fn operand(&mut self) -> Result<Value, ExpressionError> {
        match self.advance() {
            None => Err(parse_err("unexpected end of expression")),
            Some(Token::LParen) => {
                let inner = self.disjunction()?;
                if !self.eat(&Token::RParen) {
                    return Err(parse_err("missing closing parenthesis"));
                }
                Ok(inner)
            }
            Some(Token::Not) => {
                let inner = self.negation()?;
                Ok(Value::Bool(!truthy(&inner)))
            }
            Some(Token::Str(s)) => Ok(Value::String(s.clone())),
            Some(Token::Num(n)) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .ok_or_else(|| parse_err(format!("number out of range: {n}"))),
            Some(Token::Bool(b)) => Ok(Value::Bool(*b)),
            Some(Token::Null) => Ok(Value::Null),
            Some(Token::Ident(path)) => Ok(self.ctx.resolve_path(path).cloned().unwrap_or(Value::Null)),
            Some(other) => Err(parse_err(format!("expected value, got {other:?}"))),
        }
    }
}
