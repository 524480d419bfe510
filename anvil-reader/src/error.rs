//! Define the `Location`, `ParseError`, and `ParseResult` types.

use std::fmt;

use anvil_codegen::CodegenError;

/// The location of an error in the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    /// Line number; source file lines start from 1.
    pub line: u32,
}

/// Classification of a parse error, for the driver's exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed source text.
    Syntax,
    /// Well-formed text with an impossible meaning, e.g. an undefined label.
    Semantic,
    /// Valid assembly outside the implemented subset.
    Unsupported,
}

/// A parse error is returned when assembly fails; there is no recovery.
#[derive(Debug, PartialEq, Eq)]
pub struct ParseError {
    /// Location of the error.
    pub location: Location,
    /// Error classification.
    pub kind: ErrorKind,
    /// Error message.
    pub message: String,
}

impl ParseError {
    /// Wrap a codegen error, taking the line it carries or `location` for
    /// the variants that don't know their line.
    pub fn from_codegen(err: CodegenError, location: Location) -> Self {
        let (kind, location) = match &err {
            CodegenError::UndefinedLabel { line, .. } => {
                (ErrorKind::Semantic, Location { line: *line })
            }
            CodegenError::Redefined(_) => (ErrorKind::Semantic, location),
            CodegenError::Unsupported(_) => (ErrorKind::Unsupported, location),
        };
        Self {
            location,
            kind,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.location.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Result of a parser operation. The `ParseError` variant includes a
/// location and a kind.
pub type ParseResult<T> = Result<T, ParseError>;

// Create an `Err` variant of `ParseResult<X>` from a location, a kind, and
// `format!` args.
macro_rules! err {
    ( $loc:expr, $kind:expr, $msg:expr ) => {
        Err($crate::ParseError {
            location: $loc,
            kind: $kind,
            message: format!($msg),
        })
    };

    ( $loc:expr, $kind:expr, $fmt:expr, $( $arg:expr ),+ ) => {
        Err($crate::ParseError {
            location: $loc,
            kind: $kind,
            message: format!( $fmt, $( $arg ),+ ),
        })
    };
}
