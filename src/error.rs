use std::fmt;

use crate::driver::DriverError;

/// Error types for sqlx-named-runner
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The SQL template could not be encoded
    #[error("Invalid SQL template: {0}")]
    Template(#[from] TemplateError),

    /// A name referenced by the template has no value in the parameter set
    #[error(
        "Parameter '{name}' is referenced by the query but was not supplied \
         ({supplied} parameters supplied, {expected} placeholders)"
    )]
    MissingParameter {
        name: String,
        expected: usize,
        supplied: usize,
    },

    /// The driver reported a different parameter count than was supplied
    #[error("Statement expects {expected} parameters but {actual} were supplied")]
    ParameterCountMismatch { expected: usize, actual: usize },

    /// A driver failure, decorated with the failing SQL and parameters
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// An installed exception translator failed while translating `cause`
    #[error("Exception translator failed: {message} (while translating: {cause})")]
    Translation {
        message: String,
        #[source]
        cause: DriverError,
    },

    /// Engine invariant broken (statement lifecycle misuse, bad index, ...)
    #[error("Internal error: {0}")]
    Internal(String),

    /// The unit of work failed and so did the rollback that followed
    #[error("{cause} (rollback also failed: {rollback})")]
    Rollback {
        cause: Box<Error>,
        rollback: Box<Error>,
    },

    /// Rows could not be shaped into the requested output type
    #[error("Row conversion failed: {0}")]
    Conversion(String),

    /// A unit of work gave up; its transaction is rolled back
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Data source configuration was rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// Untranslated failure from the driver layer
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Failures detected while scanning a SQL template, before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("SQL template is null or empty")]
    NullTemplate,

    #[error(
        "unnamed placeholder '?' at byte {position}; named and positional parameters cannot be mixed"
    )]
    UnnamedParameter { position: usize },

    #[error("named parameter ':{name}' found in positional SQL")]
    NamedInPositional { name: String },

    #[error("SQL has {placeholders} placeholders but {names} parameter names were given")]
    PlaceholderMismatch { placeholders: usize, names: usize },

    #[error("batch mixes templates: expected '{expected}', found '{found}'")]
    MixedBatch { expected: String, found: String },
}

/// Coarse classification attached to a translated driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Execution,
    IntegrityViolation,
    Connectivity,
    TransactionRollback,
    Syntax,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Execution => "execution",
            Self::IntegrityViolation => "integrity violation",
            Self::Connectivity => "connectivity",
            Self::TransactionRollback => "transaction rollback",
            Self::Syntax => "syntax",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// A failed statement with everything needed to diagnose it without
/// re-running the query.
#[derive(Debug, thiserror::Error)]
#[error("{kind} error: {message}\nQuery: {sql}\nParameters: {params}")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    /// SQL text as sent to the driver, placeholders included
    pub sql: String,
    /// Printable form of the bound parameters
    pub params: String,
    pub vendor_code: Option<String>,
    #[source]
    pub source: DriverError,
}

impl ExecutionError {
    /// Vendor error code or SQLSTATE, when the driver reported one.
    pub fn vendor_code(&self) -> Option<&str> {
        self.vendor_code.as_deref()
    }
}

impl Error {
    /// Kind of the underlying execution failure, if this is one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Execution(e) => Some(e.kind),
            Self::Rollback { cause, .. } => cause.kind(),
            _ => None,
        }
    }
}

/// Result type alias for sqlx-named-runner operations
pub type Result<T> = std::result::Result<T, Error>;
