//! Transaction context and the connection proxy handed out inside it.

use tracing::{debug, warn};

use crate::builder::PlaceholderStyle;
use crate::driver::{
    validate_identifier, Connection, DriverResult, Holdability, IsolationLevel, PrepareOptions,
    Statement,
};
use crate::error::Result;

/// Forwards every call to the transaction's connection except `close`, which
/// does nothing. Only the owning [`TransactionContext`] ends the transaction.
pub struct TransactionConnection<'a> {
    inner: &'a mut dyn Connection,
}

impl<'a> TransactionConnection<'a> {
    pub fn new(inner: &'a mut dyn Connection) -> Self {
        Self { inner }
    }
}

impl Connection for TransactionConnection<'_> {
    fn prepare(&mut self, sql: &str, options: PrepareOptions) -> DriverResult<Box<dyn Statement + '_>> {
        self.inner.prepare(sql, options)
    }

    fn prepare_call(&mut self, sql: &str) -> DriverResult<Box<dyn Statement + '_>> {
        self.inner.prepare_call(sql)
    }

    fn auto_commit(&self) -> DriverResult<bool> {
        self.inner.auto_commit()
    }

    fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()> {
        self.inner.set_auto_commit(enabled)
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.inner.rollback()
    }

    fn isolation(&self) -> DriverResult<IsolationLevel> {
        self.inner.isolation()
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> DriverResult<()> {
        self.inner.set_isolation(level)
    }

    fn read_only(&self) -> DriverResult<bool> {
        self.inner.read_only()
    }

    fn set_read_only(&mut self, read_only: bool) -> DriverResult<()> {
        self.inner.set_read_only(read_only)
    }

    fn catalog(&self) -> DriverResult<Option<String>> {
        self.inner.catalog()
    }

    fn set_catalog(&mut self, catalog: Option<&str>) -> DriverResult<()> {
        self.inner.set_catalog(catalog)
    }

    fn holdability(&self) -> DriverResult<Holdability> {
        self.inner.holdability()
    }

    fn set_holdability(&mut self, holdability: Holdability) -> DriverResult<()> {
        self.inner.set_holdability(holdability)
    }

    fn client_info(&self) -> DriverResult<Vec<(String, String)>> {
        self.inner.client_info()
    }

    fn set_client_info(&mut self, info: &[(String, String)]) -> DriverResult<()> {
        self.inner.set_client_info(info)
    }

    fn savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.inner.savepoint(name)
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.inner.rollback_to_savepoint(name)
    }

    fn release_savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.inner.release_savepoint(name)
    }

    fn close(&mut self) -> DriverResult<()> {
        debug!("close() on a transaction connection ignored");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn backend_name(&self) -> &str {
        self.inner.backend_name()
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        self.inner.placeholder_style()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: Option<bool>,
}

impl TransactionOptions {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }
}

/// Connection settings captured before a transaction changes them.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedConfig {
    pub auto_commit: bool,
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub catalog: Option<String>,
    pub holdability: Holdability,
    pub client_info: Vec<(String, String)>,
}

impl SavedConfig {
    pub fn capture(conn: &dyn Connection) -> DriverResult<Self> {
        Ok(Self {
            auto_commit: conn.auto_commit()?,
            isolation: conn.isolation()?,
            read_only: conn.read_only()?,
            catalog: conn.catalog()?,
            holdability: conn.holdability()?,
            client_info: conn.client_info()?,
        })
    }

    /// Applies every setting, attempting all of them; the first failure is
    /// returned.
    pub fn restore(&self, conn: &mut dyn Connection) -> DriverResult<()> {
        let results = [
            conn.set_auto_commit(self.auto_commit),
            conn.set_isolation(self.isolation),
            conn.set_read_only(self.read_only),
            conn.set_catalog(self.catalog.as_deref()),
            conn.set_holdability(self.holdability),
            conn.set_client_info(&self.client_info),
        ];
        results.into_iter().collect()
    }
}

/// Exclusive owner of one connection for the span of a transaction.
///
/// Dropping an unfinished context rolls back and releases the connection.
pub struct TransactionContext {
    conn: Box<dyn Connection>,
    saved: SavedConfig,
    finished: bool,
}

impl TransactionContext {
    /// Saves the connection's settings, applies `options` and turns
    /// auto-commit off.
    pub fn begin(mut conn: Box<dyn Connection>, options: TransactionOptions) -> Result<Self> {
        let saved = match SavedConfig::capture(conn.as_ref()) {
            Ok(saved) => saved,
            Err(e) => {
                release(conn.as_mut());
                return Err(e.into());
            }
        };
        let applied = apply(conn.as_mut(), options);
        let mut ctx = Self {
            conn,
            saved,
            finished: false,
        };
        if let Err(e) = applied {
            ctx.abandon();
            return Err(e.into());
        }
        debug!(backend = ctx.conn.backend_name(), "transaction started");
        Ok(ctx)
    }

    /// The proxied connection for work inside the transaction.
    pub fn connection(&mut self) -> TransactionConnection<'_> {
        TransactionConnection::new(self.conn.as_mut())
    }

    pub fn backend_name(&self) -> &str {
        self.conn.backend_name()
    }

    pub fn commit(&mut self) -> Result<()> {
        Ok(self.conn.commit()?)
    }

    pub fn rollback(&mut self) -> Result<()> {
        Ok(self.conn.rollback()?)
    }

    pub fn savepoint(&mut self, name: &str) -> Result<()> {
        validate_identifier(name)?;
        Ok(self.conn.savepoint(name)?)
    }

    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        validate_identifier(name)?;
        Ok(self.conn.rollback_to_savepoint(name)?)
    }

    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        validate_identifier(name)?;
        Ok(self.conn.release_savepoint(name)?)
    }

    /// Restores the saved settings and closes the real connection. Both are
    /// attempted; the first failure is returned.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        let restored = self.saved.restore(self.conn.as_mut());
        let closed = self.conn.close();
        restored.and(closed)?;
        Ok(())
    }

    fn abandon(&mut self) {
        self.finished = true;
        if matches!(self.conn.auto_commit(), Ok(false)) {
            if let Err(e) = self.conn.rollback() {
                warn!(error = %e, "rollback of abandoned transaction failed");
            }
        }
        if let Err(e) = self.saved.restore(self.conn.as_mut()) {
            warn!(error = %e, "failed to restore connection settings");
        }
        release(self.conn.as_mut());
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if !self.finished {
            self.abandon();
        }
    }
}

fn apply(conn: &mut dyn Connection, options: TransactionOptions) -> DriverResult<()> {
    if let Some(level) = options.isolation {
        conn.set_isolation(level)?;
    }
    if let Some(read_only) = options.read_only {
        conn.set_read_only(read_only)?;
    }
    conn.set_auto_commit(false)
}

fn release(conn: &mut dyn Connection) {
    if let Err(e) = conn.close() {
        warn!(error = %e, "failed to release connection");
    }
}
