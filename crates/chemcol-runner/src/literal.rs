//! Literal values that appear on the right-hand side of configuration lines.
//!
//! The grammar is small: numbers, quoted strings, booleans,
//! `None`, `[...]` lists and `(...)` tuples. Anything else is a parse error,
//! which the dedup engine treats as "cannot prove equivalence".

use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    List(Vec<Literal>),
    Tuple(Vec<Literal>),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("literal parse error at offset {offset}: {reason}")]
pub struct LiteralError {
    pub offset: usize,
    pub reason: String,
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        use Literal::*;
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Int(a), Float(b)) | (Float(b), Int(a)) => int_equals_float(*a, *b),
            (Str(a), Str(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (None, None) => true,
            (List(a), List(b)) => a == b,
            (Tuple(a), Tuple(b)) => a == b,
            _ => false,
        }
    }
}

// Exact: no rounding of large integers through f64.
fn int_equals_float(a: i64, b: f64) -> bool {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    b.fract() == 0.0 && (-LIMIT..LIMIT).contains(&b) && b as i64 == a
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            // Debug keeps a fraction or exponent, so the value reads back as a float.
            Literal::Float(v) => write!(f, "{:?}", v),
            Literal::Str(s) => {
                f.write_str("'")?;
                for c in s.chars() {
                    match c {
                        '\\' => f.write_str("\\\\")?,
                        '\'' => f.write_str("\\'")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                f.write_str("'")
            }
            Literal::Bool(true) => f.write_str("True"),
            Literal::Bool(false) => f.write_str("False"),
            Literal::None => f.write_str("None"),
            Literal::List(items) => {
                f.write_str("[")?;
                write_items(f, items)?;
                f.write_str("]")
            }
            Literal::Tuple(items) => {
                f.write_str("(")?;
                write_items(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Literal]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl std::str::FromStr for Literal {
    type Err = LiteralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_literal(s)
    }
}

impl TryFrom<&Value> for Literal {
    type Error = String;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(Literal::None),
            Value::Bool(b) => Ok(Literal::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Literal::Int(i))
                } else {
                    n.as_f64()
                        .map(Literal::Float)
                        .ok_or_else(|| format!("unrepresentable number {}", n))
                }
            }
            Value::String(s) => Ok(Literal::Str(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Literal::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Literal::List),
            Value::Object(_) => Err("nested mappings have no literal form".to_string()),
        }
    }
}

pub fn parse_literal(src: &str) -> Result<Literal, LiteralError> {
    let mut p = Parser { src, pos: 0 };
    p.skip_ws();
    let value = p.value()?;
    p.skip_ws();
    if p.pos != src.len() {
        return Err(p.error("unexpected trailing input"));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn error(&self, reason: impl Into<String>) -> LiteralError {
        LiteralError {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn value(&mut self) -> Result<Literal, LiteralError> {
        match self.peek() {
            None => Err(self.error("expected a value")),
            Some('\'') | Some('"') => self.string(),
            Some('[') => {
                self.bump();
                let (items, _) = self.items(']')?;
                Ok(Literal::List(items))
            }
            Some('(') => {
                self.bump();
                let (mut items, trailing_comma) = self.items(')')?;
                if items.len() == 1 && !trailing_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(Literal::Tuple(items))
                }
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.word(),
            Some(c) => Err(self.error(format!("unexpected character {:?}", c))),
        }
    }

    /// Comma-separated values up to `close`. Reports whether the last value
    /// was followed by a comma, which distinguishes `(1,)` from `(1)`.
    fn items(&mut self, close: char) -> Result<(Vec<Literal>, bool), LiteralError> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.bump();
                return Ok((items, trailing_comma));
            }
            if !items.is_empty() && !trailing_comma {
                return Err(self.error(format!("expected ',' or {:?}", close)));
            }
            items.push(self.value()?);
            self.skip_ws();
            trailing_comma = if self.peek() == Some(',') {
                self.bump();
                true
            } else {
                false
            };
        }
    }

    fn string(&mut self) -> Result<Literal, LiteralError> {
        let quote = self.bump().ok_or_else(|| self.error("expected quote"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(Literal::Str(out)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some(c) => {
                        out.push('\\');
                        out.push(c);
                    }
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<Literal, LiteralError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.bump();
        }
        let mut is_float = false;
        let mut digits = 0usize;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits += 1;
                self.bump();
            } else if c == '.' && !is_float {
                is_float = true;
                self.bump();
            } else {
                break;
            }
        }
        if digits == 0 {
            return Err(self.error("expected digits"));
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            is_float = true;
            self.bump();
            if matches!(self.peek(), Some('-') | Some('+')) {
                self.bump();
            }
            let exp_start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
            if self.pos == exp_start {
                return Err(self.error("expected exponent digits"));
            }
        }
        let text = &self.src[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(Literal::Float)
                .map_err(|e| LiteralError {
                    offset: start,
                    reason: e.to_string(),
                })
        } else {
            text.parse::<i64>()
                .map(Literal::Int)
                .map_err(|e| LiteralError {
                    offset: start,
                    reason: e.to_string(),
                })
        }
    }

    fn word(&mut self) -> Result<Literal, LiteralError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        match &self.src[start..self.pos] {
            "True" | "true" => Ok(Literal::Bool(true)),
            "False" | "false" => Ok(Literal::Bool(false)),
            "None" => Ok(Literal::None),
            other => Err(LiteralError {
                offset: start,
                reason: format!("bare word {:?} is not a literal", other),
            }),
        }
    }
}
