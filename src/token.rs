use std::fmt;

#[derive(Debug, PartialEq, Clone)]
pub struct Token {
    pub line: usize,
    pub kind: Kind,
    pub value: String,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Kind {
    ReservedKeyword, // entero, si, mientras, ...
    Identifier,      // x, total_1
    Number,          // 3, 4.25
    Operator,        // = + - * / ^ < > | &
    Symbol,          // newline , ( )
    Unknown,         // anything the scanner could not classify
    EOF,
}

pub const NEWLINE: &str = "\n";

impl Token {
    pub fn new(kind: Kind, value: impl Into<String>, line: usize) -> Self {
        Self {
            line,
            kind,
            value: value.into(),
        }
    }

    pub fn eof(line: usize) -> Self {
        Self::new(Kind::EOF, "EOF", line)
    }

    pub fn is_newline(&self) -> bool {
        self.kind == Kind::Symbol && self.value == NEWLINE
    }

    /// True when the token is `kind` with exactly the text `value`.
    pub fn is(&self, kind: Kind, value: &str) -> bool {
        self.kind == kind && self.value == value
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Kind::ReservedKeyword => "RESERVED_KEYWORD",
            Kind::Identifier => "ID",
            Kind::Number => "NUM",
            Kind::Operator => "OPERATOR",
            Kind::Symbol => "SYMBOL",
            Kind::Unknown => "UNKNOWN",
            Kind::EOF => "EOF",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let value = if self.is_newline() { "newline" } else { self.value.as_str() };
        write!(f, "Type: {}, Value: {}, Line: {}", self.kind, value, self.line)
    }
}
