//! Bounded model checking of JML method contracts
//!
//! Java methods annotated with `requires`/`ensures` contracts are rewritten
//! into plain assume/assert code, compiled, and checked one by one with an
//! external bounded model checker whose JSON verdicts are mapped back to the
//! original source.

pub mod ast;
pub mod catalog;
pub mod config;
pub mod emit;
pub mod encode;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod preprocessor;
pub mod runner;
pub mod types;
pub mod verdict;
pub mod verify;

pub use ast::Span;
pub use error::{CompileError, Result};
