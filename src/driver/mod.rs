//! The relational client API the engine runs on.
//!
//! These traits are the only surface the engine touches: connection
//! acquisition, prepared/callable statements, positional binding by SQL type,
//! result iteration, parameter metadata and transaction controls. The
//! [`sqlx_any`] module implements them over SQLx; tests script them.

pub mod sqlx_any;

use std::fmt;

use crate::builder::PlaceholderStyle;
use crate::value::{SqlType, Value};

/// Coarse failure class reported by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverErrorKind {
    /// Unique, foreign-key, not-null or check constraint
    Constraint,
    /// Transport or pool failure
    Connection,
    #[default]
    Other,
}

/// A failure raised by the client API.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
    /// Vendor error code or SQLSTATE
    pub code: Option<String>,
    pub kind: DriverErrorKind,
    /// Zero-based row of a batch that failed
    pub batch_index: Option<usize>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            kind: DriverErrorKind::Other,
            batch_index: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_kind(mut self, kind: DriverErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_batch_index(mut self, index: usize) -> Self {
        self.batch_index = Some(index);
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn unsupported(what: &str) -> Self {
        Self::new(format!("{what} is not supported by this driver"))
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    None,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub const fn as_sql(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::ReadUncommitted => Some("READ UNCOMMITTED"),
            Self::ReadCommitted => Some("READ COMMITTED"),
            Self::RepeatableRead => Some("REPEATABLE READ"),
            Self::Serializable => Some("SERIALIZABLE"),
        }
    }
}

/// Whether cursors survive a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holdability {
    HoldOverCommit,
    CloseAtCommit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Ask the driver to keep generated keys retrievable after execution.
    pub generated_keys: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub sql_type: Option<SqlType>,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: Option<SqlType>) -> Self {
        Self {
            name: name.into(),
            sql_type,
        }
    }
}

/// Handle to one result set of a statement. Two cursors with the same `id`
/// refer to the same underlying result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub id: u64,
    pub columns: Vec<Column>,
}

/// A prepared or callable statement. Positions are 1-based.
pub trait Statement {
    /// Parameter count from driver metadata.
    fn parameter_count(&mut self) -> DriverResult<usize>;

    fn bind(&mut self, position: usize, value: &Value, sql_type: SqlType) -> DriverResult<()>;

    fn bind_null(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()>;

    /// Declares an OUT position on a callable statement.
    fn register_out(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()>;

    /// Returns true when the first result is a result set.
    fn execute(&mut self) -> DriverResult<bool>;

    /// Update count of the current result, -1 when it is a result set or
    /// there are no more results.
    fn update_count(&mut self) -> DriverResult<i64>;

    fn generated_keys(&mut self) -> DriverResult<Option<Cursor>>;

    /// Result set of the current result, if it is one.
    fn result_set(&mut self) -> DriverResult<Option<Cursor>>;

    fn fetch(&mut self, cursor: &Cursor) -> DriverResult<Option<Vec<Value>>>;

    /// Advances to the next result; false when none is left.
    fn more_results(&mut self) -> DriverResult<bool>;

    fn out_value(&mut self, position: usize) -> DriverResult<Value>;

    /// Queues the currently bound values as one batch row.
    fn add_batch(&mut self) -> DriverResult<()>;

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>>;

    fn close(&mut self) -> DriverResult<()>;
}

/// A live database connection.
pub trait Connection: Send {
    fn prepare(&mut self, sql: &str, options: PrepareOptions) -> DriverResult<Box<dyn Statement + '_>>;

    fn prepare_call(&mut self, sql: &str) -> DriverResult<Box<dyn Statement + '_>>;

    fn auto_commit(&self) -> DriverResult<bool>;
    fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()>;
    fn commit(&mut self) -> DriverResult<()>;
    fn rollback(&mut self) -> DriverResult<()>;

    fn isolation(&self) -> DriverResult<IsolationLevel>;
    fn set_isolation(&mut self, level: IsolationLevel) -> DriverResult<()>;
    fn read_only(&self) -> DriverResult<bool>;
    fn set_read_only(&mut self, read_only: bool) -> DriverResult<()>;
    fn catalog(&self) -> DriverResult<Option<String>>;
    fn set_catalog(&mut self, catalog: Option<&str>) -> DriverResult<()>;
    fn holdability(&self) -> DriverResult<Holdability>;
    fn set_holdability(&mut self, holdability: Holdability) -> DriverResult<()>;
    fn client_info(&self) -> DriverResult<Vec<(String, String)>>;
    fn set_client_info(&mut self, info: &[(String, String)]) -> DriverResult<()>;

    fn savepoint(&mut self, name: &str) -> DriverResult<()> {
        let _ = name;
        Err(DriverError::unsupported("savepoint"))
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> DriverResult<()> {
        let _ = name;
        Err(DriverError::unsupported("savepoint"))
    }

    fn release_savepoint(&mut self, name: &str) -> DriverResult<()> {
        let _ = name;
        Err(DriverError::unsupported("savepoint"))
    }

    fn close(&mut self) -> DriverResult<()>;
    fn is_closed(&self) -> bool;

    /// Short backend name (`"SQLite"`, `"MySQL"`, ...), for translators.
    fn backend_name(&self) -> &str;

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }
}

/// Hands out connections; implemented by pools.
pub trait ConnectionSource: Send + Sync {
    fn connection(&self) -> DriverResult<Box<dyn Connection>>;
}

impl fmt::Debug for dyn Connection + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("backend", &self.backend_name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Savepoint and catalog names go into SQL text unquoted, so only plain
/// identifiers pass.
pub fn validate_identifier(name: &str) -> DriverResult<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63;
    if valid {
        Ok(())
    } else {
        Err(DriverError::new(format!("invalid identifier '{name}'")))
    }
}
