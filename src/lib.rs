pub mod config;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod render;
pub mod session;
pub mod store;
pub mod symbols;
pub mod token;

pub use error::{CalcError, EvalError, RenderError, StoreError, SyntaxError};
pub use evaluator::evaluate;
pub use lexer::{scan, Lexer};
pub use parser::validate;
pub use session::{Outcome, Session, SharedSession};
pub use symbols::SymbolTable;
pub use token::{Kind, Token};
