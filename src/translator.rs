//! Turns driver failures into [`Error::Execution`] with the SQL and
//! parameters that caused them.
//!
//! A runner uses the translator from its [`Config`](crate::config::Config)
//! when one is set, otherwise the process-wide one installed here, otherwise
//! [`DefaultTranslator`]. Tests that [`install`] a translator must [`reset`]
//! it afterwards.

use std::sync::{Arc, PoisonError, RwLock};

use crate::driver::{DriverError, DriverErrorKind};
use crate::error::{Error, ErrorKind, ExecutionError};
use crate::params::ParameterSet;

/// A translator could not produce an error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TranslationFailure(pub String);

pub trait ExceptionTranslator: Send + Sync {
    /// `backend` is the connection's [`backend_name`](crate::driver::Connection::backend_name).
    fn translate(
        &self,
        backend: &str,
        cause: DriverError,
        sql: &str,
        params: &ParameterSet,
    ) -> Result<Error, TranslationFailure>;
}

fn execution(kind: ErrorKind, cause: DriverError, sql: &str, params: &ParameterSet) -> Error {
    Error::Execution(ExecutionError {
        kind,
        message: cause.message.clone(),
        sql: sql.to_owned(),
        params: params.to_string(),
        vendor_code: cause.code.clone(),
        source: cause,
    })
}

fn kind_of(cause: &DriverError) -> ErrorKind {
    match cause.kind {
        DriverErrorKind::Constraint => ErrorKind::IntegrityViolation,
        DriverErrorKind::Connection => ErrorKind::Connectivity,
        DriverErrorKind::Other => ErrorKind::Execution,
    }
}

/// Wraps the cause, keeping the driver's own classification.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTranslator;

impl ExceptionTranslator for DefaultTranslator {
    fn translate(
        &self,
        _backend: &str,
        cause: DriverError,
        sql: &str,
        params: &ParameterSet,
    ) -> Result<Error, TranslationFailure> {
        Ok(execution(kind_of(&cause), cause, sql, params))
    }
}

/// Classifies by SQLSTATE class when the driver reports a five-character
/// code, falling back to the driver's classification.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlStateTranslator;

impl SqlStateTranslator {
    pub fn classify(code: &str) -> Option<ErrorKind> {
        if code.len() != 5 {
            return None;
        }
        match code.get(..2)? {
            "23" => Some(ErrorKind::IntegrityViolation),
            "08" => Some(ErrorKind::Connectivity),
            "40" => Some(ErrorKind::TransactionRollback),
            "42" => Some(ErrorKind::Syntax),
            _ => None,
        }
    }
}

impl ExceptionTranslator for SqlStateTranslator {
    fn translate(
        &self,
        _backend: &str,
        cause: DriverError,
        sql: &str,
        params: &ParameterSet,
    ) -> Result<Error, TranslationFailure> {
        let kind = cause
            .code
            .as_deref()
            .and_then(Self::classify)
            .unwrap_or_else(|| kind_of(&cause));
        Ok(execution(kind, cause, sql, params))
    }
}

static INSTALLED: RwLock<Option<Arc<dyn ExceptionTranslator>>> = RwLock::new(None);

/// Replaces the process-wide translator.
pub fn install(translator: Arc<dyn ExceptionTranslator>) {
    *INSTALLED.write().unwrap_or_else(PoisonError::into_inner) = Some(translator);
}

/// Restores [`DefaultTranslator`] as the process-wide translator.
pub fn reset() {
    *INSTALLED.write().unwrap_or_else(PoisonError::into_inner) = None;
}

pub fn installed() -> Arc<dyn ExceptionTranslator> {
    INSTALLED
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .unwrap_or_else(|| Arc::new(DefaultTranslator))
}

/// Runs `translator`; a failing translator surfaces as [`Error::Translation`]
/// carrying the cause's message, code and kind.
pub fn translate(
    translator: &dyn ExceptionTranslator,
    backend: &str,
    cause: DriverError,
    sql: &str,
    params: &ParameterSet,
) -> Error {
    let mut kept = DriverError::new(cause.message.clone()).with_kind(cause.kind);
    kept.code.clone_from(&cause.code);
    kept.batch_index = cause.batch_index;
    translator
        .translate(backend, cause, sql, params)
        .unwrap_or_else(|failure| Error::Translation {
            message: failure.0,
            cause: kept,
        })
}

/// Re-wraps an engine logic error as an execution error of kind
/// [`ErrorKind::Internal`], keeping the original as its source. Other errors
/// pass through.
pub fn from_internal(err: Error, sql: &str, params: &ParameterSet) -> Error {
    match err {
        Error::Internal(message) => {
            let cause = DriverError::new(message.clone()).with_source(Error::Internal(message));
            execution(ErrorKind::Internal, cause, sql, params)
        }
        other => other,
    }
}
