use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;

use crate::error::{CalcError, RenderError, StoreError, SyntaxError};
use crate::evaluator::{substitute, substituted_text, Evaluator};
use crate::lexer::{scan, RESERVED_KEYWORDS};
use crate::parser::validate;
use crate::render::{PendingRender, TreeImage, TreeRenderer};
use crate::store::{Store, ALL_KEYS, EVALUATED_EXPRESSIONS, LAST_EXPRESSION, LAST_GENERATED_TREE, SYMBOL_TABLE};
use crate::symbols::{format_number, SymbolTable};
use crate::token::{Kind, Token};

fn assignment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([a-zA-Z_][a-zA-Z0-9_]*)\s*=\s*(.+)$").expect("assignment pattern"))
}

/// Statement candidates of a batch: split on `;` and line breaks, trimmed,
/// empty pieces dropped.
pub fn split_statements(input: &str) -> impl Iterator<Item = &str> {
    input
        .split(|c| c == ';' || c == '\n')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Assigned { name: String, expression: String, value: f64 },
    /// Bare expression; checked for syntax only.
    Validated { expression: String },
}

impl Outcome {
    pub fn expression(&self) -> &str {
        match self {
            Outcome::Assigned { expression, .. } | Outcome::Validated { expression } => expression,
        }
    }
}

/// Everything one interactive session remembers between batches.
#[derive(Debug, Default)]
pub struct Session {
    symbols: SymbolTable,
    accepted: Vec<String>,
    last_input: String,
    last_tree: Option<TreeImage>,
    debug: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Rebuilds a session from whatever a previous run persisted.
    pub fn restore(store: &dyn Store) -> Result<Self, StoreError> {
        let mut session = Session::new();

        if let Some(input) = store.get(LAST_EXPRESSION) {
            session.last_input = input;
        }
        if let Some(json) = store.get(SYMBOL_TABLE) {
            session.symbols = serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
                key: SYMBOL_TABLE.to_string(),
                source,
            })?;
        }
        if let Some(json) = store.get(EVALUATED_EXPRESSIONS) {
            session.accepted = serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
                key: EVALUATED_EXPRESSIONS.to_string(),
                source,
            })?;
        }
        session.last_tree = store
            .get(LAST_GENERATED_TREE)
            .filter(|src| !src.is_empty())
            .map(|src| TreeImage::from_src(&src));

        Ok(session)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn accepted(&self) -> &[String] {
        &self.accepted
    }

    pub fn last_accepted(&self) -> Option<&str> {
        self.accepted.last().map(String::as_str)
    }

    pub fn last_input(&self) -> &str {
        &self.last_input
    }

    pub fn last_tree(&self) -> Option<&TreeImage> {
        self.last_tree.as_ref()
    }

    /// Runs every statement of `input` in order, stopping at the first
    /// failure. The table and accepted list start empty; each statement that
    /// succeeds is written to `store` before it is committed in memory, so
    /// a failed write leaves the session as the store last saw it.
    pub fn run_batch(&mut self, input: &str, store: &mut dyn Store) -> Result<Vec<Outcome>, CalcError> {
        let input = input.trim();
        store.set(LAST_EXPRESSION, input.to_string())?;
        self.last_input = input.to_string();

        persist(store, &SymbolTable::new(), &[])?;
        self.symbols.clear();
        self.accepted.clear();

        let mut outcomes = Vec::new();
        for statement in split_statements(input) {
            let outcome = self.run_statement(statement)?;

            let mut symbols = self.symbols.clone();
            if let Outcome::Assigned { name, value, .. } = &outcome {
                symbols.insert(name.as_str(), *value);
            }
            let mut accepted = self.accepted.clone();
            accepted.push(outcome.expression().to_string());

            persist(store, &symbols, &accepted)?;
            self.symbols = symbols;
            self.accepted = accepted;
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    fn run_statement(&self, statement: &str) -> Result<Outcome, CalcError> {
        let Some(captures) = assignment_pattern().captures(statement) else {
            let tokens = scan(statement);
            validate(&tokens)?;
            if self.debug {
                eprintln!("[debug] validated {:?}", statement);
            }
            return Ok(Outcome::Validated {
                expression: statement.to_string(),
            });
        };

        let name = &captures[1];
        let expression = &captures[2];

        if RESERVED_KEYWORDS.contains(&name) {
            let target = Token::new(Kind::ReservedKeyword, name, 1);
            return Err(SyntaxError::from_token(&target, "cannot assign to a reserved keyword").into());
        }

        let tokens = scan(expression);
        validate(&tokens)?;
        let items = substitute(&tokens, &self.symbols)?;
        let value = Evaluator::new(&items).eval()?;
        if self.debug {
            eprintln!(
                "[debug] {} = {} => {}",
                name,
                substituted_text(&items),
                format_number(value)
            );
        }

        Ok(Outcome::Assigned {
            name: name.to_string(),
            expression: expression.to_string(),
            value,
        })
    }

    /// Starts rendering the last accepted expression in the background.
    pub fn request_tree(&self, renderer: Arc<dyn TreeRenderer>) -> Result<PendingRender, RenderError> {
        let expression = self.last_accepted().ok_or(RenderError::NothingToRender)?;
        Ok(PendingRender::spawn(renderer, expression.to_string()))
    }

    /// Keeps a finished render unless a newer batch has made it stale.
    /// Returns whether the image was kept.
    pub fn accept_tree(&mut self, expression: &str, image: TreeImage, store: &mut dyn Store) -> Result<bool, StoreError> {
        if self.last_accepted() != Some(expression) {
            if self.debug {
                eprintln!("[debug] discarding stale tree for {:?}", expression);
            }
            return Ok(false);
        }

        store.set(LAST_GENERATED_TREE, image.src())?;
        self.last_tree = Some(image);
        Ok(true)
    }

    /// Forgets everything, in memory and in `store`.
    pub fn clear(&mut self, store: &mut dyn Store) -> Result<(), StoreError> {
        for key in ALL_KEYS {
            store.remove(key)?;
        }
        let debug = self.debug;
        *self = Session::new().with_debug(debug);
        Ok(())
    }
}

fn persist(store: &mut dyn Store, symbols: &SymbolTable, accepted: &[String]) -> Result<(), StoreError> {
    let encode = |key: &str, source: serde_json::Error| StoreError::Encode {
        key: key.to_string(),
        source,
    };

    let symbols = serde_json::to_string(symbols).map_err(|e| encode(SYMBOL_TABLE, e))?;
    let accepted = serde_json::to_string(accepted).map_err(|e| encode(EVALUATED_EXPRESSIONS, e))?;
    store.set(SYMBOL_TABLE, symbols)?;
    store.set(EVALUATED_EXPRESSIONS, accepted)
}

/// A session and its store behind one lock, so that batches from different
/// threads never interleave.
pub struct SharedSession<S: Store> {
    inner: Arc<Mutex<(Session, S)>>,
}

impl<S: Store> Clone for SharedSession<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Store> SharedSession<S> {
    pub fn new(session: Session, store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new((session, store))),
        }
    }

    pub fn run_batch(&self, input: &str) -> Result<Vec<Outcome>, CalcError> {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (session, store) = &mut *guard;
        session.run_batch(input, store)
    }

    pub fn with<R>(&self, f: impl FnOnce(&Session, &S) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard.0, &guard.1)
    }
}
