//! klox: a tree-walking interpreter and C++ transpiler for Lox.
//!
//! Both pipelines share one front end: `lexer` → `parser` → `resolver`.
//! The resolver's side table is mandatory before either back end runs —
//! the evaluator uses it for depth-addressed variable access, the
//! emitter for its scope-faithful identifier mangling.

pub mod ast_printer;
pub mod callable;
pub mod classes;
pub mod emitter;
pub mod environment;
pub mod error;
pub mod functions;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod runtime;
pub mod statement;
pub mod token;
pub mod value;

pub use error::{LoxError, Result};
pub use interpreter::Interpreter;
pub use statement::{Expr, Stmt};
pub use token::{Token, TokenType};
pub use value::Value;
