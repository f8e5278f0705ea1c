// src/syntax/mod.rs
pub mod ast;
pub mod intern;
pub mod span;

pub use ast::*;
pub use intern::{Interner, Symbol};
pub use span::Span;
