//! Textual assembly reader for the Anvil assembler.
//!
//! [`Parser::parse_source`] consumes a whole source buffer, one statement
//! per line, and drives an [`anvil_codegen::Assembler`]. The lexical
//! helpers and the error types are public so the driver and tests can use
//! them directly.

#[macro_use]
mod error;
mod lexer;
mod parser;

pub use crate::error::{ErrorKind, Location, ParseError, ParseResult};
pub use crate::lexer::{parse_number, read_identifier};
pub use crate::parser::Parser;
