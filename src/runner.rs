//! The query runner: resolves input, prepares, binds, executes, unwraps and
//! shapes results, then releases the connection.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::builder::EncodedQuery;
use crate::config::Config;
use crate::driver::{Connection, ConnectionSource, DriverResult, PrepareOptions, Statement};
use crate::error::{Error, Result};
use crate::input::{resolve_batch, BatchInput, InputHandler, ResolvedInput};
use crate::output::OutputHandler;
use crate::params::ParameterSet;
use crate::profiling::ProfiledStatement;
use crate::statement::{CallResult, MetadataSupport, StatementHandler, Strategy};
use crate::transaction::{TransactionConnection, TransactionContext, TransactionOptions};
use crate::translator::{self, from_internal, ExceptionTranslator};

/// Runs named-parameter SQL against connections from `S`.
///
/// Every call outside [`transaction`](Self::transaction) takes its own
/// connection and releases it before returning, on success or failure.
///
/// # Example
///
/// ```no_run
/// use sqlx_named_runner::prelude::*;
///
/// # fn main() -> sqlx_named_runner::Result<()> {
/// let source = create_data_source(DataSourceConfig::new("sqlite://cats.db?mode=rwc"))?;
/// let runner = QueryRunner::new(source);
///
/// let ids = runner.query(
///     &MapInput::new(
///         "SELECT id FROM cats WHERE age = :age AND name = :name",
///         [("age", Value::from(5)), ("name", Value::from("whiskers"))],
///     ),
///     &ColumnListHandler::new(),
/// )?;
/// # Ok(())
/// # }
/// ```
pub struct QueryRunner<S: ConnectionSource> {
    source: S,
    config: Config,
    metadata: MetadataSupport,
}

impl<S: ConnectionSource> QueryRunner<S> {
    pub fn new(source: S) -> Self {
        Self::with_config(source, Config::default())
    }

    pub fn with_config(source: S, config: Config) -> Self {
        Self {
            metadata: MetadataSupport::new(config.use_metadata),
            source,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// False once the driver failed to report a parameter count.
    pub fn metadata_enabled(&self) -> bool {
        self.metadata.enabled()
    }

    /// Executes a statement and returns its affected-row count.
    pub fn update<I: InputHandler + ?Sized>(&self, input: &I) -> Result<u64> {
        self.with_connection(|session, conn| session.update(conn, input))
    }

    /// Executes an insert and shapes the generated keys with `keys`.
    pub fn insert<I, H>(&self, input: &I, keys: &H) -> Result<H::Output>
    where
        I: InputHandler + ?Sized,
        H: OutputHandler,
    {
        self.with_connection(|session, conn| session.insert(conn, input, keys))
    }

    /// Runs a query and shapes its first result set with `handler`.
    pub fn query<I, H>(&self, input: &I, handler: &H) -> Result<H::Output>
    where
        I: InputHandler + ?Sized,
        H: OutputHandler,
    {
        self.with_connection(|session, conn| session.query(conn, input, handler))
    }

    /// Executes one statement per handler as a single batch. Every handler
    /// must use the same SQL template.
    pub fn batch<I: InputHandler>(&self, inputs: &[I]) -> Result<Vec<i64>> {
        self.with_connection(|session, conn| session.batch(conn, inputs))
    }

    /// Executes one statement per row of a list input as a single batch.
    pub fn batch_rows<B: BatchInput + ?Sized>(&self, input: &B) -> Result<Vec<i64>> {
        self.with_connection(|session, conn| session.batch_rows(conn, input))
    }

    /// Calls a stored procedure or function. OUT and INOUT parameters come
    /// back refreshed in [`CallResult::out_parameters`].
    pub fn call<I: InputHandler + ?Sized>(&self, input: &I) -> Result<CallResult> {
        self.with_connection(|session, conn| session.call(conn, input))
    }

    /// Like [`call`](Self::call), with every result set shaped by `handler`.
    pub fn call_with<I, H>(&self, input: &I, handler: &H) -> Result<(CallResult, Vec<H::Output>)>
    where
        I: InputHandler + ?Sized,
        H: OutputHandler,
    {
        let result = self.call(input)?;
        let shaped = result.shape(handler)?;
        Ok((result, shaped))
    }

    /// Runs `work` inside a transaction on one connection. Commits when it
    /// returns `Ok`; otherwise rolls back and returns its error.
    pub fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        self.transaction_with(TransactionOptions::default(), work)
    }

    pub fn transaction_with<T, F>(&self, options: TransactionOptions, work: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let conn = self.source.connection()?;
        let mut ctx = TransactionContext::begin(conn, options)?;
        let session = self.session();

        let outcome = work(&mut Transaction {
            session,
            ctx: &mut ctx,
        });
        let backend = ctx.backend_name().to_owned();
        let outcome = match outcome {
            Ok(value) => match ctx.commit() {
                Ok(()) => {
                    debug!("transaction committed");
                    Ok(value)
                }
                Err(e) => {
                    let cause = session.fail(&backend, e, "COMMIT", &ParameterSet::new());
                    Err(roll_back(&mut ctx, cause, session, &backend))
                }
            },
            Err(cause) => Err(roll_back(&mut ctx, cause, session, &backend)),
        };
        finish(outcome, ctx.finish())
    }

    fn session(&self) -> Session<'_> {
        Session {
            config: &self.config,
            metadata: &self.metadata,
        }
    }

    fn with_connection<T>(
        &self,
        work: impl FnOnce(Session<'_>, &mut dyn Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.source.connection()?;
        let result = work(self.session(), conn.as_mut());
        let released = conn.close().map_err(Error::from);
        finish(result, released)
    }
}

/// Handle passed to a unit of work. Every operation runs on the
/// transaction's connection, which the work cannot close.
pub struct Transaction<'t> {
    session: Session<'t>,
    ctx: &'t mut TransactionContext,
}

impl Transaction<'_> {
    pub fn update<I: InputHandler + ?Sized>(&mut self, input: &I) -> Result<u64> {
        self.session.update(&mut self.ctx.connection(), input)
    }

    pub fn insert<I, H>(&mut self, input: &I, keys: &H) -> Result<H::Output>
    where
        I: InputHandler + ?Sized,
        H: OutputHandler,
    {
        self.session.insert(&mut self.ctx.connection(), input, keys)
    }

    pub fn query<I, H>(&mut self, input: &I, handler: &H) -> Result<H::Output>
    where
        I: InputHandler + ?Sized,
        H: OutputHandler,
    {
        self.session.query(&mut self.ctx.connection(), input, handler)
    }

    pub fn batch<I: InputHandler>(&mut self, inputs: &[I]) -> Result<Vec<i64>> {
        self.session.batch(&mut self.ctx.connection(), inputs)
    }

    pub fn batch_rows<B: BatchInput + ?Sized>(&mut self, input: &B) -> Result<Vec<i64>> {
        self.session.batch_rows(&mut self.ctx.connection(), input)
    }

    pub fn call<I: InputHandler + ?Sized>(&mut self, input: &I) -> Result<CallResult> {
        self.session.call(&mut self.ctx.connection(), input)
    }

    pub fn savepoint(&mut self, name: &str) -> Result<()> {
        self.ctx.savepoint(name)
    }

    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.ctx.rollback_to_savepoint(name)
    }

    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.ctx.release_savepoint(name)
    }

    /// The proxied connection, for code that wants the client API directly.
    pub fn connection(&mut self) -> TransactionConnection<'_> {
        self.ctx.connection()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Plain,
    GeneratedKeys,
    Call,
}

/// Per-call view of the runner's configuration.
#[derive(Clone, Copy)]
struct Session<'r> {
    config: &'r Config,
    metadata: &'r MetadataSupport,
}

impl Session<'_> {
    fn update<I: InputHandler + ?Sized>(self, conn: &mut dyn Connection, input: &I) -> Result<u64> {
        let resolved = input.resolve(conn.placeholder_style())?;
        let count = self.execute(conn, &resolved, Kind::Plain, |handler, stmt| {
            handler.unwrap(stmt).map(|result| result.update_count)
        })?;
        // -1 means the driver has no count to report.
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn insert<I, H>(self, conn: &mut dyn Connection, input: &I, keys: &H) -> Result<H::Output>
    where
        I: InputHandler + ?Sized,
        H: OutputHandler,
    {
        let resolved = input.resolve(conn.placeholder_style())?;
        let strategy = self.config.strategy;
        self.execute(conn, &resolved, Kind::GeneratedKeys, |handler, stmt| match strategy {
            Strategy::Eager => {
                let rows = handler.unwrap(stmt)?.generated_keys.unwrap_or_default();
                keys.handle(&mut rows.into_iter())
            }
            Strategy::Lazy => {
                let mut results = handler.stream(stmt)?;
                let generated = results.generated_keys();
                match generated {
                    Some(mut rows) => keys.handle(&mut rows),
                    None => keys.handle(&mut Vec::<ParameterSet>::new().into_iter()),
                }
            }
        })
    }

    fn query<I, H>(self, conn: &mut dyn Connection, input: &I, output: &H) -> Result<H::Output>
    where
        I: InputHandler + ?Sized,
        H: OutputHandler,
    {
        let resolved = input.resolve(conn.placeholder_style())?;
        let strategy = self.config.strategy;
        self.execute(conn, &resolved, Kind::Plain, |handler, stmt| match strategy {
            Strategy::Eager => {
                let rows = handler
                    .unwrap(stmt)?
                    .result_sets
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                output.handle(&mut rows.into_iter())
            }
            Strategy::Lazy => {
                let mut results = handler.stream(stmt)?;
                let first = results.next_result_set()?;
                match first {
                    Some(mut rows) => output.handle(&mut rows),
                    None => output.handle(&mut Vec::<ParameterSet>::new().into_iter()),
                }
            }
        })
    }

    fn batch<I: InputHandler>(self, conn: &mut dyn Connection, inputs: &[I]) -> Result<Vec<i64>> {
        let (query, rows) = resolve_batch(inputs, conn.placeholder_style())?;
        self.execute_batch(conn, &query, &rows)
    }

    fn batch_rows<B: BatchInput + ?Sized>(self, conn: &mut dyn Connection, input: &B) -> Result<Vec<i64>> {
        let (query, rows) = input.resolve_rows(conn.placeholder_style())?;
        self.execute_batch(conn, &query, &rows)
    }

    /// Results are always materialized: a call result outlives its statement.
    fn call<I: InputHandler + ?Sized>(self, conn: &mut dyn Connection, input: &I) -> Result<CallResult> {
        let resolved = input.resolve(conn.placeholder_style())?;
        self.execute(conn, &resolved, Kind::Call, |handler, stmt| handler.unwrap(stmt))
    }

    fn handler(self, kind: Kind) -> StatementHandler {
        StatementHandler::new(self.metadata.clone())
            .strategy(self.config.strategy)
            .strict(self.config.strict_parameter_count)
            .generated_keys(kind == Kind::GeneratedKeys)
            .callable(kind == Kind::Call)
    }

    fn prepare<'c>(
        self,
        conn: &'c mut dyn Connection,
        sql: &str,
        kind: Kind,
    ) -> DriverResult<Box<dyn Statement + 'c>> {
        let stmt = match kind {
            Kind::Call => conn.prepare_call(sql)?,
            Kind::Plain | Kind::GeneratedKeys => conn.prepare(
                sql,
                PrepareOptions {
                    generated_keys: kind == Kind::GeneratedKeys,
                },
            )?,
        };
        if self.config.profiling {
            Ok(Box::new(ProfiledStatement::new(stmt, sql)))
        } else {
            Ok(stmt)
        }
    }

    /// Prepare, bind, execute, unwrap and close one statement. Any failure
    /// is translated with the SQL and parameters attached.
    fn execute<T>(
        self,
        conn: &mut dyn Connection,
        input: &ResolvedInput,
        kind: Kind,
        unwrap: impl FnOnce(&mut StatementHandler, &mut dyn Statement) -> Result<T>,
    ) -> Result<T> {
        let backend = conn.backend_name().to_owned();
        let sql = input.query.sql.as_str();
        debug!(sql, params = input.parameters.len(), "executing statement");

        let outcome = self
            .prepare(conn, sql, kind)
            .map_err(Error::from)
            .and_then(|mut stmt| {
                let mut handler = self.handler(kind);
                let result = handler
                    .bind(stmt.as_mut(), &input.parameters)
                    .and_then(|()| handler.execute(stmt.as_mut()))
                    .and_then(|_| unwrap(&mut handler, stmt.as_mut()));
                let closed = handler.close(stmt.as_mut());
                finish(result, closed)
            });
        outcome.map_err(|e| self.fail(&backend, e, sql, &input.parameters))
    }

    fn execute_batch(
        self,
        conn: &mut dyn Connection,
        query: &EncodedQuery,
        rows: &[ParameterSet],
    ) -> Result<Vec<i64>> {
        let backend = conn.backend_name().to_owned();
        let sql = query.sql.as_str();
        debug!(sql, rows = rows.len(), "executing batch");

        let outcome = self
            .prepare(conn, sql, Kind::Plain)
            .map_err(Error::from)
            .and_then(|mut stmt| {
                let mut handler = self.handler(Kind::Plain);
                let result = handler
                    .bind_batch(stmt.as_mut(), rows)
                    .and_then(|()| handler.execute_batch(stmt.as_mut()));
                let closed = handler.close(stmt.as_mut());
                finish(result, closed)
            });
        outcome.map_err(|e| {
            let failed = match &e {
                Error::Driver(cause) => cause.batch_index.and_then(|i| rows.get(i)),
                _ => None,
            };
            let params = failed.or_else(|| rows.first()).cloned().unwrap_or_default();
            self.fail(&backend, e, sql, &params)
        })
    }

    fn translator(self) -> Arc<dyn ExceptionTranslator> {
        self.config
            .translator
            .clone()
            .unwrap_or_else(translator::installed)
    }

    fn fail(self, backend: &str, err: Error, sql: &str, params: &ParameterSet) -> Error {
        match err {
            Error::Driver(cause) => {
                translator::translate(self.translator().as_ref(), backend, cause, sql, params)
            }
            other => from_internal(other, sql, params),
        }
    }
}

fn roll_back(ctx: &mut TransactionContext, cause: Error, session: Session<'_>, backend: &str) -> Error {
    match ctx.rollback() {
        Ok(()) => {
            debug!("transaction rolled back");
            cause
        }
        Err(e) => {
            let rollback = session.fail(backend, e, "ROLLBACK", &ParameterSet::new());
            warn!(error = %rollback, "rollback failed");
            Error::Rollback {
                cause: Box::new(cause),
                rollback: Box::new(rollback),
            }
        }
    }
}

/// Combines an operation's result with its cleanup. A cleanup failure after
/// an earlier error is logged and the earlier error returned.
fn finish<T>(result: Result<T>, cleanup: Result<()>) -> Result<T> {
    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(secondary)) => {
            warn!(error = %secondary, "cleanup failed after an earlier error");
            Err(e)
        }
    }
}
