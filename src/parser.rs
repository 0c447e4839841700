use crate::error::SyntaxError;
use crate::token::{Kind, Token};

/// LL(1) recognizer for the arithmetic grammar:
///
/// ```text
/// expr     := term tail_add
/// tail_add := ('+' | '-') expr | ε on { ')', EOF }
/// term     := factor tail_mul
/// tail_mul := ('*' | '/') term | ε on { '+', '-', ')', EOF }
/// factor   := '(' expr ')' | NUMBER | IDENTIFIER
/// ```
///
/// The tail rules are run as loops, so only parentheses nest on the call
/// stack, and at most `MAX_DEPTH` of them.
///
/// Errors latch instead of unwinding: the walk keeps going on a best-effort
/// basis and the first failure is what `parse` reports. No tree is built.
pub struct Parser<'a> {
    tokens: &'a [Token],
    index: usize,
    current: Token,
    depth: usize,
    error: Option<SyntaxError>,
}

/// Deepest accepted parenthesis nesting.
pub const MAX_DEPTH: usize = 256;

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            index: 0,
            current: Token::eof(1),
            depth: 0,
            error: None,
        }
    }

    fn advance(&mut self) {
        if let Some(token) = self.tokens.get(self.index) {
            self.current = token.clone();
            self.index += 1;
        } else {
            let line = self.tokens.last().map_or(1, |t| t.line);
            self.current = Token::eof(line);
        }
    }

    fn fail(&mut self, message: &str) {
        if self.error.is_none() {
            self.error = Some(SyntaxError::from_token(&self.current, message));
        }
    }

    fn at_operator(&self, operators: &[&str]) -> bool {
        self.current.kind == Kind::Operator && operators.contains(&self.current.value.as_str())
    }

    fn at_close_paren(&self) -> bool {
        self.current.is(Kind::Symbol, ")")
    }

    fn at_eof(&self) -> bool {
        self.current.kind == Kind::EOF
    }

    pub fn parse(&mut self) -> Result<(), SyntaxError> {
        self.advance();
        self.expr();

        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if !self.at_eof() {
            return Err(SyntaxError::from_token(&self.current, "expected end of expression"));
        }
        Ok(())
    }

    fn expr(&mut self) {
        loop {
            self.term();
            // tail_add
            if self.at_operator(&["+", "-"]) {
                self.advance();
                continue;
            }
            if !(self.at_close_paren() || self.at_eof()) {
                self.fail("expected '+', '-', ')' or end of expression");
            }
            break;
        }
    }

    fn term(&mut self) {
        loop {
            self.factor();
            // tail_mul
            if self.at_operator(&["*", "/"]) {
                self.advance();
                continue;
            }
            if !(self.at_operator(&["+", "-"]) || self.at_close_paren() || self.at_eof()) {
                self.fail("expected an operator, ')' or end of expression");
            }
            break;
        }
    }

    fn factor(&mut self) {
        match self.current.kind {
            Kind::Symbol if self.current.value == "(" => {
                if self.depth == MAX_DEPTH {
                    self.fail("expression nested too deeply");
                    return;
                }
                self.depth += 1;
                self.advance();
                self.expr();
                self.depth -= 1;
                if self.at_close_paren() {
                    self.advance();
                } else {
                    self.fail("missing closing ')'");
                }
            }
            Kind::Number | Kind::Identifier => self.advance(),
            Kind::Unknown => self.fail("unrecognized lexeme"),
            _ => self.fail("expected a number, a variable or '('"),
        }
    }
}

pub fn validate(tokens: &[Token]) -> Result<(), SyntaxError> {
    Parser::new(tokens).parse()
}
