//! Core code generation for the Anvil assembler.
//!
//! This crate turns already-parsed statements into a loadable code stream.
//! The pieces, in the order the driver uses them:
//!
//! - [`Assembler`] encodes one statement at a time into the block layout:
//!   fixed-size instructions and data land in growing *code* blocks, while
//!   every `jmp`/`jnz` gets its own *jump* block whose size is still
//!   negotiable (see [`block`]).
//! - [`Assembler::finish`] resolves symbolic jump targets against the label
//!   map and runs branch relaxation until every displacement fits its field
//!   and all block addresses are stable.
//! - [`binemit`] serializes the stabilized layout into bytes for the ELF
//!   container.
//!
//! The register table lives in [`reg`], and [`strmap`] provides the
//! Robin-Hood string map used for both the label and constant namespaces.

pub mod binemit;
pub mod block;
mod encode;
pub mod entity;
mod error;
pub mod reg;
mod relax;
pub mod strmap;

pub use crate::encode::{AluOp, Assembler, Operand};
pub use crate::entity::Block;
pub use crate::error::{CodegenError, CodegenResult};
