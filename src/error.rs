use thiserror::Error;

use crate::metadata::token::Token;

macro_rules! bad_image_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::BadImage {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::BadImage {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! not_supported_error {
    ($msg:expr) => {
        crate::Error::NotSupported {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::NotSupported {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

macro_rules! resolution_error {
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::ResolutionFailed(format!($fmt, $($arg)*))
    };
    ($msg:expr) => {
        crate::Error::ResolutionFailed($msg.to_string())
    };
}

/// The generic Error type, covering every failure this library can raise.
///
/// All failures are raised at the point of detection and abort the operation
/// that triggered them (loading a module, projecting its metadata, or
/// transforming one method body). There is no partial or degraded load.
///
/// # Error Categories
///
/// ## Image format errors
/// - [`Error::BadImage`] - Structural violation of the binary module format
/// - [`Error::NotSupported`] - Recognized but unimplemented format shape
/// - [`Error::OutOfBounds`] - A read would have crossed the buffer end
/// - [`Error::Empty`] - Empty input provided
///
/// ## Resolution errors
/// - [`Error::ResolutionFailed`] - An assembly, type, method or field lookup
///   across the AOT/interpreter type universe failed
/// - [`Error::TypeNotFound`] - A metadata token did not resolve to a type
///
/// ## Limits
/// - [`Error::LimitExceeded`] - A hard bound (recursion depth, evaluation
///   stack size, value size) was exceeded
///
/// ## External
/// - [`Error::FileError`] - Filesystem I/O failure while mapping a module
/// - [`Error::LockError`] - A shared-cache lock was poisoned
#[derive(Error, Debug)]
pub enum Error {
    /// The module image is damaged and could not be parsed.
    ///
    /// The error carries the source location where the malformation was
    /// detected, plus a message naming the offending structure (stream,
    /// table, signature or method).
    #[error("BadImage - {file}:{line}: {message}")]
    BadImage {
        /// Description of the structural violation
        message: String,
        /// The source file in which this error was detected
        file: &'static str,
        /// The source line in which this error was detected
        line: u32,
    },

    /// A recognized but unimplemented metadata or bytecode shape.
    ///
    /// Raised for format features the loader understands well enough to
    /// reject deliberately (PDB tables, function-pointer signatures, exotic
    /// opcodes) instead of misparsing them.
    #[error("NotSupported - {file}:{line}: {message}")]
    NotSupported {
        /// Description of the unsupported shape
        message: String,
        /// The source file in which this error was detected
        file: &'static str,
        /// The source line in which this error was detected
        line: u32,
    },

    /// An out of bound access was attempted while parsing the image.
    #[error("Out of bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// A cross-module lookup failed.
    ///
    /// Covers assembly-by-name, type-by-name and member-by-name+signature
    /// resolution against both the AOT universe and loaded interpreter
    /// modules. Always fatal to the triggering operation.
    #[error("Resolution failed - {0}")]
    ResolutionFailed(String),

    /// Failed to find a type for the given metadata token.
    #[error("Failed to find type for token - {0}")]
    TypeNotFound(Token),

    /// A hard structural bound was exceeded.
    ///
    /// The message names the limit (signature recursion depth, evaluation
    /// stack size, value-type size) and the offending value.
    #[error("Limit exceeded - {0}")]
    LimitExceeded(String),

    /// File I/O error while reading or mapping a module image.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Failed to lock a shared cache.
    #[error("Failed to lock target")]
    LockError,

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
