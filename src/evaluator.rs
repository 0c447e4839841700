use std::fmt;

use crate::error::EvalError;
use crate::parser::MAX_DEPTH;
use crate::symbols::{format_number, SymbolTable};
use crate::token::{Kind, Token};

/// A token after variable substitution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Item {
    Value(f64),
    Operator(char),
    Open,
    Close,
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Item::Value(value) => f.write_str(&format_number(*value)),
            Item::Operator(op) => write!(f, "{}", op),
            Item::Open => f.write_str("("),
            Item::Close => f.write_str(")"),
        }
    }
}

/// Replaces every identifier with its stored value, left to right, failing on
/// the first name the table does not know.
pub fn substitute(tokens: &[Token], symbols: &SymbolTable) -> Result<Vec<Item>, EvalError> {
    let mut items = Vec::with_capacity(tokens.len());

    for token in tokens {
        let item = match token.kind {
            Kind::Identifier => symbols
                .get(&token.value)
                .map(Item::Value)
                .ok_or_else(|| EvalError::UndefinedVariable(token.value.clone()))?,
            Kind::Number => {
                let value: f64 = token
                    .value
                    .parse()
                    .map_err(|_| EvalError::UnexpectedToken(token.value.clone()))?;
                if !value.is_finite() {
                    return Err(EvalError::Overflow);
                }
                Item::Value(value)
            }
            Kind::Operator => match token.value.as_str() {
                "+" => Item::Operator('+'),
                "-" => Item::Operator('-'),
                "*" => Item::Operator('*'),
                "/" => Item::Operator('/'),
                _ => return Err(EvalError::UnexpectedToken(token.value.clone())),
            },
            Kind::Symbol if token.value == "(" => Item::Open,
            Kind::Symbol if token.value == ")" => Item::Close,
            Kind::EOF => break,
            _ => return Err(EvalError::UnexpectedToken(token.value.clone())),
        };
        items.push(item);
    }

    Ok(items)
}

/// Space separated infix text of the substituted expression.
pub fn substituted_text(items: &[Item]) -> String {
    items.iter().map(Item::to_string).collect::<Vec<_>>().join(" ")
}

/// Precedence climbing over substituted items. `*` and `/` bind tighter than
/// `+` and `-`, equal precedence folds left.
pub struct Evaluator<'a> {
    items: &'a [Item],
    current: usize,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(items: &'a [Item]) -> Self {
        Self {
            items,
            current: 0,
            depth: 0,
        }
    }

    fn at(&self) -> Option<Item> {
        self.items.get(self.current).copied()
    }

    fn at_operator(&self, operators: &[char]) -> Option<char> {
        match self.at() {
            Some(Item::Operator(op)) if operators.contains(&op) => Some(op),
            _ => None,
        }
    }

    fn unexpected(&self) -> EvalError {
        match self.at() {
            Some(item) => EvalError::UnexpectedToken(item.to_string()),
            None => EvalError::UnexpectedToken("end of expression".to_string()),
        }
    }

    pub fn eval(&mut self) -> Result<f64, EvalError> {
        let value = self.eval_additive()?;
        if self.current != self.items.len() {
            return Err(self.unexpected());
        }
        Ok(value)
    }

    fn eval_additive(&mut self) -> Result<f64, EvalError> {
        let mut left = self.eval_multiplicative()?;

        while let Some(op) = self.at_operator(&['+', '-']) {
            self.current += 1;
            let right = self.eval_multiplicative()?;
            left = apply(op, left, right)?;
        }

        Ok(left)
    }

    fn eval_multiplicative(&mut self) -> Result<f64, EvalError> {
        let mut left = self.eval_primary()?;

        while let Some(op) = self.at_operator(&['*', '/']) {
            self.current += 1;
            let right = self.eval_primary()?;
            left = apply(op, left, right)?;
        }

        Ok(left)
    }

    fn eval_primary(&mut self) -> Result<f64, EvalError> {
        match self.at() {
            Some(Item::Value(value)) => {
                self.current += 1;
                Ok(value)
            }
            Some(Item::Open) => {
                if self.depth == MAX_DEPTH {
                    return Err(EvalError::TooDeep);
                }
                self.depth += 1;
                self.current += 1;
                let value = self.eval_additive()?;
                self.depth -= 1;
                if self.at() != Some(Item::Close) {
                    return Err(self.unexpected());
                }
                self.current += 1;
                Ok(value)
            }
            _ => Err(self.unexpected()),
        }
    }
}

fn apply(op: char, left: f64, right: f64) -> Result<f64, EvalError> {
    let result = match op {
        '+' => left + right,
        '-' => left - right,
        '*' => left * right,
        '/' => {
            if right == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            left / right
        }
        _ => return Err(EvalError::UnexpectedToken(op.to_string())),
    };

    if result.is_finite() {
        Ok(result)
    } else {
        Err(EvalError::Overflow)
    }
}

/// Evaluates an already validated token sequence against `symbols`.
pub fn evaluate(tokens: &[Token], symbols: &SymbolTable) -> Result<f64, EvalError> {
    let items = substitute(tokens, symbols)?;
    Evaluator::new(&items).eval()
}
