//! Result and error types for code generation.

use thiserror::Error;

/// An error produced while encoding instructions or laying out the code
/// stream.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodegenError {
    /// A jump referenced a label that was never defined.
    #[error("unknown label \"{name}\"")]
    UndefinedLabel {
        /// The label as written at the jump site.
        name: String,
        /// Source line of the jump.
        line: u32,
    },

    /// The same name was bound twice in one symbol namespace.
    #[error("\"{0}\" is already defined")]
    Redefined(String),

    /// Valid assembly, but outside the implemented subset.
    #[error("{0}")]
    Unsupported(String),
}

/// A convenient alias for a `Result` that uses `CodegenError` as the error.
pub type CodegenResult<T> = Result<T, CodegenError>;
