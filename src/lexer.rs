use std::collections::VecDeque;
use std::str::Chars;
use std::sync::OnceLock;

use regex::Regex;

use crate::token::{Kind, Token, NEWLINE};

pub const RESERVED_KEYWORDS: [&str; 10] = [
    "entero", "real", "si", "sino", "mientras", "fmientras", "fsi", "imprime", "verdadero", "falso",
];

const OPERATOR_CHARS: [char; 10] = ['=', '+', '-', '*', '/', '^', '<', '>', '|', '&'];
const SYMBOL_CHARS: [char; 4] = ['\n', ',', '(', ')'];

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("identifier pattern"))
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]+(\.[0-9]+)?$").expect("number pattern"))
}

/// Characters that end the pending lexeme.
fn is_terminator(ch: char) -> bool {
    ch.is_whitespace() || ch == ',' || ch == '(' || ch == ')' || OPERATOR_CHARS.contains(&ch)
}

fn is_lexeme_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '.'
}

pub fn classify(lexeme: &str, line: usize) -> Token {
    let kind = if RESERVED_KEYWORDS.contains(&lexeme) {
        Kind::ReservedKeyword
    } else if identifier_pattern().is_match(lexeme) {
        Kind::Identifier
    } else if number_pattern().is_match(lexeme) {
        Kind::Number
    } else if lexeme.contains(&OPERATOR_CHARS[..]) {
        Kind::Operator
    } else if lexeme.contains(&SYMBOL_CHARS[..]) {
        Kind::Symbol
    } else {
        eprintln!("LexicalError: unknown lexeme {:?} at line {}", lexeme, line);
        Kind::Unknown
    };

    Token::new(kind, lexeme, line)
}

/// Pull-based scanner. Tokens are produced one character run at a time;
/// `next_token` returns `EOF` forever once the input is used up.
pub struct Lexer<'a> {
    chars: Chars<'a>,
    line: usize,
    lexeme: String,
    pending: VecDeque<Token>,
    exhausted: bool,
    after_newline: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars(),
            line: 1,
            lexeme: String::new(),
            pending: VecDeque::new(),
            exhausted: false,
            // Treat the start of input like a preceding newline so a leading
            // newline token is dropped.
            after_newline: true,
        }
    }

    fn flush(&mut self) {
        if !self.lexeme.is_empty() {
            let lexeme = std::mem::take(&mut self.lexeme);
            self.pending.push_back(classify(&lexeme, self.line));
        }
    }

    /// Raw token production, before newline filtering.
    fn produce(&mut self) -> Option<Token> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(token);
            }
            if self.exhausted {
                return None;
            }

            match self.chars.next() {
                Some('\n') => {
                    self.flush();
                    self.pending.push_back(Token::new(Kind::Symbol, NEWLINE, self.line));
                    self.line += 1;
                }
                Some(ch) if is_terminator(ch) => {
                    self.flush();
                    if !ch.is_whitespace() {
                        self.pending.push_back(classify(&ch.to_string(), self.line));
                    }
                }
                Some(ch) if is_lexeme_char(ch) => self.lexeme.push(ch),
                Some(ch) => {
                    self.flush();
                    self.pending.push_back(classify(&ch.to_string(), self.line));
                }
                None => {
                    self.flush();
                    self.exhausted = true;
                }
            }
        }
    }

    pub fn next_token(&mut self) -> Token {
        while let Some(token) = self.produce() {
            if token.is_newline() && self.after_newline {
                continue;
            }
            self.after_newline = token.is_newline();
            return token;
        }

        Token::eof(self.line)
    }

    /// Collects every token up to, but not including, `EOF`.
    pub fn tokenize(&mut self) -> Vec<Token> {
        self.by_ref().collect()
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        let token = self.next_token();
        if token.kind == Kind::EOF {
            None
        } else {
            Some(token)
        }
    }
}

pub fn scan(text: &str) -> Vec<Token> {
    Lexer::new(text).tokenize()
}
