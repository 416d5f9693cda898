//! SQLx-backed driver.
//!
//! Connections come from an `AnyPool` (SQLite, MySQL or PostgreSQL). The
//! driver owns a small tokio runtime and blocks on every SQLx future, so the
//! engine above stays synchronous. Do not call into it from inside an async
//! task: tokio refuses to nest `block_on`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures_util::TryStreamExt;
use serde::Deserialize;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, AnyPool, Column as _, Either, Executor, Row, Statement as _, TypeInfo, ValueRef};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use super::{
    validate_identifier, Column, Connection, ConnectionSource, Cursor, DriverError,
    DriverErrorKind, DriverResult, Holdability, IsolationLevel, PrepareOptions, Statement,
};
use crate::builder::PlaceholderStyle;
use crate::error::{Error, Result};
use crate::value::{SqlType, Value};

/// Type alias for SQLx Query with `Any` arguments
pub type Q<'q> = Query<'q, Any, AnyArguments<'q>>;

/// Column name used for the generated-key row.
pub const GENERATED_KEY_COLUMN: &str = "generated_key";

impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        let (code, kind) = match &err {
            sqlx::Error::Database(db) => {
                let kind = match db.kind() {
                    sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation => DriverErrorKind::Constraint,
                    _ => DriverErrorKind::Other,
                };
                (db.code().map(|c| c.into_owned()), kind)
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => (None, DriverErrorKind::Connection),
            _ => (None, DriverErrorKind::Other),
        };
        Self {
            message: err.to_string(),
            code,
            kind,
            batch_index: None,
            source: Some(Box::new(err)),
        }
    }
}

/// Pool settings, loadable from any serde format.
#[derive(Debug, Clone, Deserialize)]
pub struct DataSourceConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Backend name (`sqlite`, `mysql`, `postgres`); inferred from the URL
    /// scheme when absent.
    #[serde(default)]
    pub driver_class_name: Option<String>,
    #[serde(default)]
    pub initial_pool_size: u32,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
}

const fn default_max_pool_size() -> u32 {
    10
}

impl DataSourceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            driver_class_name: None,
            initial_pool_size: 0,
            max_pool_size: default_max_pool_size(),
        }
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn pool_size(mut self, initial: u32, max: u32) -> Self {
        self.initial_pool_size = initial;
        self.max_pool_size = max;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    MySql,
    Postgres,
}

impl Backend {
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.contains("sqlite") {
            Some(Self::Sqlite)
        } else if name.contains("mysql") || name.contains("mariadb") {
            Some(Self::MySql)
        } else if name.contains("postgres") || name == "pg" {
            Some(Self::Postgres)
        } else {
            None
        }
    }

    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?;
        match scheme {
            "sqlite" => Some(Self::Sqlite),
            "mysql" | "mariadb" => Some(Self::MySql),
            "postgres" | "postgresql" => Some(Self::Postgres),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
        }
    }
}

/// Builds a pooled data source. Unknown backends fail here rather than
/// falling back to unpooled connections.
///
/// # Errors
///
/// `Config` for an unknown backend or bad pool sizes, `Driver` when the pool
/// cannot connect.
pub fn create_data_source(config: DataSourceConfig) -> Result<SqlxDataSource> {
    let backend = match &config.driver_class_name {
        Some(name) => Backend::from_name(name)
            .ok_or_else(|| Error::Config(format!("unsupported driver '{name}'")))?,
        None => Backend::from_url(&config.url)
            .ok_or_else(|| Error::Config(format!("cannot infer driver from url '{}'", config.url)))?,
    };
    if config.max_pool_size == 0 {
        return Err(Error::Config("max_pool_size must be at least 1".into()));
    }
    if config.initial_pool_size > config.max_pool_size {
        return Err(Error::Config(format!(
            "initial_pool_size {} exceeds max_pool_size {}",
            config.initial_pool_size, config.max_pool_size
        )));
    }
    let url = url_with_credentials(&config, backend)?;

    sqlx::any::install_default_drivers();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("sqlx-named-runner")
        .enable_all()
        .build()
        .map_err(|e| Error::Config(format!("cannot start runtime: {e}")))?;

    let pool = runtime
        .block_on(
            AnyPoolOptions::new()
                .min_connections(config.initial_pool_size)
                .max_connections(config.max_pool_size)
                .connect(&url),
        )
        .map_err(DriverError::from)?;

    debug!(
        backend = backend.name(),
        max = config.max_pool_size,
        "created data source"
    );
    Ok(SqlxDataSource {
        pool,
        runtime: Arc::new(runtime),
        backend,
    })
}

fn url_with_credentials(config: &DataSourceConfig, backend: Backend) -> Result<String> {
    if config.username.is_none() || backend == Backend::Sqlite {
        return Ok(config.url.clone());
    }
    let mut url = url::Url::parse(&config.url)
        .map_err(|e| Error::Config(format!("invalid url '{}': {e}", config.url)))?;
    if let Some(username) = &config.username {
        url.set_username(username)
            .map_err(|()| Error::Config("url cannot carry a username".into()))?;
    }
    if let Some(password) = &config.password {
        url.set_password(Some(password))
            .map_err(|()| Error::Config("url cannot carry a password".into()))?;
    }
    Ok(url.into())
}

/// A pooled SQLx data source.
pub struct SqlxDataSource {
    // Dropped before the runtime it was created on.
    pool: AnyPool,
    runtime: Arc<Runtime>,
    backend: Backend,
}

impl SqlxDataSource {
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Closes every pooled connection.
    pub fn close(&self) {
        self.runtime.block_on(self.pool.close());
    }
}

impl ConnectionSource for SqlxDataSource {
    fn connection(&self) -> DriverResult<Box<dyn Connection>> {
        let conn = self.runtime.block_on(self.pool.acquire())?;
        Ok(Box::new(SqlxConnection {
            runtime: Arc::clone(&self.runtime),
            conn: Some(conn),
            backend: self.backend,
            auto_commit: true,
            isolation: IsolationLevel::None,
            read_only: false,
            catalog: None,
            holdability: Holdability::HoldOverCommit,
            client_info: Vec::new(),
            next_cursor: 0,
        }))
    }
}

/// A pooled connection. Transactions are driven with plain `BEGIN` /
/// `COMMIT` / `ROLLBACK` so that auto-commit can be toggled.
pub struct SqlxConnection {
    runtime: Arc<Runtime>,
    conn: Option<PoolConnection<Any>>,
    backend: Backend,
    auto_commit: bool,
    isolation: IsolationLevel,
    read_only: bool,
    catalog: Option<String>,
    holdability: Holdability,
    client_info: Vec<(String, String)>,
    next_cursor: u64,
}

fn closed() -> DriverError {
    DriverError::new("connection is closed").with_kind(DriverErrorKind::Connection)
}

impl SqlxConnection {
    fn exec(&mut self, sql: &str) -> DriverResult<()> {
        let live: &mut AnyConnection = self.conn.as_deref_mut().ok_or_else(closed)?;
        debug!(sql, "exec");
        self.runtime.block_on(live.execute(sql))?;
        Ok(())
    }

    fn begin(&mut self) -> DriverResult<()> {
        let isolation = self.isolation.as_sql();
        match self.backend {
            Backend::MySql => {
                if let Some(level) = isolation {
                    self.exec(&format!("SET TRANSACTION ISOLATION LEVEL {level}"))?;
                }
                if self.read_only {
                    self.exec("SET TRANSACTION READ ONLY")?;
                }
                self.exec("BEGIN")
            }
            Backend::Postgres => {
                self.exec("BEGIN")?;
                if let Some(level) = isolation {
                    self.exec(&format!("SET TRANSACTION ISOLATION LEVEL {level}"))?;
                }
                if self.read_only {
                    self.exec("SET TRANSACTION READ ONLY")?;
                }
                Ok(())
            }
            Backend::Sqlite => self.exec("BEGIN"),
        }
    }

    fn statement(&mut self, sql: &str, generated_keys: bool, callable: bool) -> SqlxStatement<'_> {
        let first_cursor = self.next_cursor;
        // Leave room so cursors of different statements never share ids.
        self.next_cursor += 1 << 32;
        SqlxStatement {
            conn: self,
            sql: sql.to_owned(),
            callable,
            generated_keys,
            bound: Vec::new(),
            batch: Vec::new(),
            results: VecDeque::new(),
            current: None,
            rows: HashMap::new(),
            keys: None,
            next_cursor: first_cursor,
        }
    }
}

impl Connection for SqlxConnection {
    fn prepare(&mut self, sql: &str, options: PrepareOptions) -> DriverResult<Box<dyn Statement + '_>> {
        if self.conn.is_none() {
            return Err(closed());
        }
        Ok(Box::new(self.statement(sql, options.generated_keys, false)))
    }

    fn prepare_call(&mut self, sql: &str) -> DriverResult<Box<dyn Statement + '_>> {
        if self.conn.is_none() {
            return Err(closed());
        }
        Ok(Box::new(self.statement(sql, false, true)))
    }

    fn auto_commit(&self) -> DriverResult<bool> {
        Ok(self.auto_commit)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()> {
        if enabled == self.auto_commit {
            return Ok(());
        }
        if enabled {
            self.exec("COMMIT")?;
        } else {
            self.begin()?;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        if self.auto_commit {
            return Err(DriverError::new("cannot commit while auto-commit is enabled"));
        }
        self.exec("COMMIT")?;
        self.begin()
    }

    fn rollback(&mut self) -> DriverResult<()> {
        if self.auto_commit {
            return Err(DriverError::new("cannot roll back while auto-commit is enabled"));
        }
        self.exec("ROLLBACK")?;
        self.begin()
    }

    fn isolation(&self) -> DriverResult<IsolationLevel> {
        Ok(self.isolation)
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> DriverResult<()> {
        // Applies from the next transaction on.
        self.isolation = level;
        Ok(())
    }

    fn read_only(&self) -> DriverResult<bool> {
        Ok(self.read_only)
    }

    fn set_read_only(&mut self, read_only: bool) -> DriverResult<()> {
        self.read_only = read_only;
        Ok(())
    }

    fn catalog(&self) -> DriverResult<Option<String>> {
        Ok(self.catalog.clone())
    }

    fn set_catalog(&mut self, catalog: Option<&str>) -> DriverResult<()> {
        if let (Backend::MySql, Some(name)) = (self.backend, catalog) {
            validate_identifier(name)?;
            self.exec(&format!("USE {name}"))?;
        }
        self.catalog = catalog.map(str::to_owned);
        Ok(())
    }

    fn holdability(&self) -> DriverResult<Holdability> {
        Ok(self.holdability)
    }

    fn set_holdability(&mut self, holdability: Holdability) -> DriverResult<()> {
        self.holdability = holdability;
        Ok(())
    }

    fn client_info(&self) -> DriverResult<Vec<(String, String)>> {
        Ok(self.client_info.clone())
    }

    fn set_client_info(&mut self, info: &[(String, String)]) -> DriverResult<()> {
        self.client_info = info.to_vec();
        Ok(())
    }

    fn savepoint(&mut self, name: &str) -> DriverResult<()> {
        validate_identifier(name)?;
        self.exec(&format!("SAVEPOINT {name}"))
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> DriverResult<()> {
        validate_identifier(name)?;
        self.exec(&format!("ROLLBACK TO SAVEPOINT {name}"))
    }

    fn release_savepoint(&mut self, name: &str) -> DriverResult<()> {
        validate_identifier(name)?;
        self.exec(&format!("RELEASE SAVEPOINT {name}"))
    }

    fn close(&mut self) -> DriverResult<()> {
        if self.conn.is_none() {
            return Ok(());
        }
        let outcome = if self.auto_commit {
            Ok(())
        } else {
            self.auto_commit = true;
            self.exec("ROLLBACK")
        };
        // Returning a connection to the pool spawns onto the runtime.
        let _guard = self.runtime.enter();
        drop(self.conn.take());
        outcome
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn backend_name(&self) -> &str {
        self.backend.name()
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        match self.backend {
            Backend::Postgres => PlaceholderStyle::Dollar,
            Backend::Sqlite | Backend::MySql => PlaceholderStyle::QuestionMark,
        }
    }
}

impl Drop for SqlxConnection {
    fn drop(&mut self) {
        if self.conn.is_some() {
            if let Err(e) = Connection::close(self) {
                warn!(error = %e, "failed to release connection on drop");
            }
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Rows(Cursor),
    Count(i64),
}

struct Executed {
    outcomes: Vec<(Outcome, VecDeque<Vec<Value>>)>,
    last_insert_id: Option<i64>,
}

/// Statement over a [`SqlxConnection`]. SQLx has no server-side cursors to
/// hand out here, so every result set is buffered at execution time and
/// served from memory.
pub struct SqlxStatement<'c> {
    conn: &'c mut SqlxConnection,
    sql: String,
    callable: bool,
    generated_keys: bool,
    bound: Vec<Option<(Value, SqlType)>>,
    batch: Vec<Vec<(Value, SqlType)>>,
    results: VecDeque<Outcome>,
    current: Option<Outcome>,
    rows: HashMap<u64, VecDeque<Vec<Value>>>,
    keys: Option<Cursor>,
    next_cursor: u64,
}

fn bind_value<'q>(query: Q<'q>, value: &Value, sql_type: SqlType) -> Q<'q> {
    match value {
        Value::Null => bind_null(query, sql_type),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
    }
}

fn bind_null(query: Q<'_>, sql_type: SqlType) -> Q<'_> {
    match sql_type {
        SqlType::Bit | SqlType::Boolean => query.bind(None::<bool>),
        SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => {
            query.bind(None::<i64>)
        }
        SqlType::Float | SqlType::Real | SqlType::Double | SqlType::Numeric | SqlType::Decimal => {
            query.bind(None::<f64>)
        }
        SqlType::Binary | SqlType::VarBinary | SqlType::LongVarBinary | SqlType::Blob => {
            query.bind(None::<Vec<u8>>)
        }
        _ => query.bind(None::<String>),
    }
}

fn type_from_name(name: &str) -> Option<SqlType> {
    match name {
        "BOOLEAN" => Some(SqlType::Boolean),
        "SMALLINT" => Some(SqlType::SmallInt),
        "INTEGER" => Some(SqlType::Integer),
        "BIGINT" => Some(SqlType::BigInt),
        "REAL" => Some(SqlType::Real),
        "DOUBLE" => Some(SqlType::Double),
        "TEXT" => Some(SqlType::Varchar),
        "BLOB" => Some(SqlType::Blob),
        _ => None,
    }
}

fn column_value(row: &AnyRow, index: usize) -> DriverResult<Value> {
    let type_name = {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        raw.type_info().name().to_owned()
    };
    let value = match type_name.as_str() {
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(index)?),
        "SMALLINT" => Value::Int(i64::from(row.try_get::<i16, _>(index)?)),
        "INTEGER" => Value::Int(i64::from(row.try_get::<i32, _>(index)?)),
        "BIGINT" => Value::Int(row.try_get::<i64, _>(index)?),
        "REAL" => Value::Float(f64::from(row.try_get::<f32, _>(index)?)),
        "DOUBLE" => Value::Float(row.try_get::<f64, _>(index)?),
        "BLOB" => Value::Bytes(row.try_get::<Vec<u8>, _>(index)?),
        _ => Value::Text(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}

fn row_columns(row: &AnyRow) -> Vec<Column> {
    row.columns()
        .iter()
        .map(|c| Column::new(c.name(), type_from_name(c.type_info().name())))
        .collect()
}

impl SqlxStatement<'_> {
    fn positional_values(&self) -> DriverResult<Vec<(Value, SqlType)>> {
        self.bound
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.clone()
                    .ok_or_else(|| DriverError::new(format!("parameter {} was not bound", i + 1)))
            })
            .collect()
    }

    /// Runs the statement once. With `fetch_key` set, SQLite's rowid is read
    /// back on the same connection since its `Any` results never carry one.
    fn run(&mut self, values: &[(Value, SqlType)], fetch_key: bool) -> DriverResult<Executed> {
        let sql = self.sql.as_str();
        let SqlxConnection {
            runtime,
            conn,
            backend,
            ..
        } = &mut *self.conn;
        let backend = *backend;
        let live: &mut AnyConnection = conn.as_deref_mut().ok_or_else(closed)?;
        debug!(sql, params = values.len(), "execute");

        runtime.block_on(async move {
            let mut query = sqlx::query::<Any>(sql);
            for (value, sql_type) in values {
                query = bind_value(query, value, *sql_type);
            }

            let mut outcomes = Vec::new();
            let mut last_insert_id = None;
            let mut columns: Option<Vec<Column>> = None;
            let mut rows = VecDeque::new();
            let mut affected = 0;
            let mut stream = (&mut *live).fetch_many(query);
            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(done) => {
                        last_insert_id = done.last_insert_id().or(last_insert_id);
                        match columns.take() {
                            Some(columns) => outcomes.push((
                                Outcome::Rows(Cursor { id: 0, columns }),
                                std::mem::take(&mut rows),
                            )),
                            None => {
                                let count = i64::try_from(done.rows_affected()).unwrap_or(i64::MAX);
                                affected += count;
                                outcomes.push((Outcome::Count(count), VecDeque::new()));
                            }
                        }
                    }
                    Either::Right(row) => {
                        if columns.is_none() {
                            columns = Some(row_columns(&row));
                        }
                        let values = (0..row.len())
                            .map(|i| column_value(&row, i))
                            .collect::<DriverResult<Vec<_>>>()?;
                        rows.push_back(values);
                    }
                }
            }
            drop(stream);
            if let Some(columns) = columns {
                outcomes.push((Outcome::Rows(Cursor { id: 0, columns }), rows));
            }
            if fetch_key && affected > 0 && last_insert_id.is_none() && backend == Backend::Sqlite {
                let row = (&mut *live)
                    .fetch_one(sqlx::query::<Any>("SELECT last_insert_rowid()"))
                    .await?;
                if let Value::Int(id) = column_value(&row, 0)? {
                    last_insert_id = Some(id);
                }
            }
            Ok::<_, DriverError>(Executed {
                outcomes,
                last_insert_id,
            })
        })
    }

    fn cursor_id(&mut self) -> u64 {
        self.next_cursor += 1;
        self.next_cursor
    }
}

impl Statement for SqlxStatement<'_> {
    fn parameter_count(&mut self) -> DriverResult<usize> {
        let sql = self.sql.as_str();
        let SqlxConnection { runtime, conn, .. } = &mut *self.conn;
        let live: &mut AnyConnection = conn.as_deref_mut().ok_or_else(closed)?;
        let prepared = runtime.block_on(live.prepare(sql))?;
        match prepared.parameters() {
            Some(Either::Left(types)) => Ok(types.len()),
            Some(Either::Right(count)) => Ok(count),
            None => Err(DriverError::unsupported("parameter metadata")),
        }
    }

    fn bind(&mut self, position: usize, value: &Value, sql_type: SqlType) -> DriverResult<()> {
        if position == 0 {
            return Err(DriverError::new("parameter positions start at 1"));
        }
        if self.bound.len() < position {
            self.bound.resize(position, None);
        }
        self.bound[position - 1] = Some((value.clone(), sql_type));
        Ok(())
    }

    fn bind_null(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
        self.bind(position, &Value::Null, sql_type)
    }

    fn register_out(&mut self, _position: usize, _sql_type: SqlType) -> DriverResult<()> {
        let what = if self.callable {
            "OUT parameters through SQLx"
        } else {
            "OUT parameters on a prepared statement"
        };
        Err(DriverError::unsupported(what))
    }

    fn execute(&mut self) -> DriverResult<bool> {
        if self.generated_keys && self.conn.backend == Backend::Postgres {
            // Only RETURNING hands keys back there; run it through a query.
            return Err(DriverError::unsupported(
                "generated keys on PostgreSQL without a RETURNING query",
            ));
        }
        let values = self.positional_values()?;
        let executed = self.run(&values, self.generated_keys)?;

        self.results.clear();
        self.rows.clear();
        self.keys = None;
        let mut affected = 0;
        for (outcome, rows) in executed.outcomes {
            let outcome = match outcome {
                Outcome::Rows(cursor) => {
                    let id = self.cursor_id();
                    self.rows.insert(id, rows);
                    Outcome::Rows(Cursor { id, ..cursor })
                }
                Outcome::Count(n) => {
                    affected += n;
                    Outcome::Count(n)
                }
            };
            self.results.push_back(outcome);
        }
        if self.generated_keys && affected > 0 {
            if let Some(key) = executed.last_insert_id {
                let id = self.cursor_id();
                self.rows.insert(id, VecDeque::from([vec![Value::Int(key)]]));
                self.keys = Some(Cursor {
                    id,
                    columns: vec![Column::new(GENERATED_KEY_COLUMN, Some(SqlType::BigInt))],
                });
            }
        }
        self.current = self.results.pop_front();
        Ok(matches!(self.current, Some(Outcome::Rows(_))))
    }

    fn update_count(&mut self) -> DriverResult<i64> {
        Ok(match &self.current {
            Some(Outcome::Count(n)) => *n,
            _ => -1,
        })
    }

    fn generated_keys(&mut self) -> DriverResult<Option<Cursor>> {
        Ok(self.keys.clone())
    }

    fn result_set(&mut self) -> DriverResult<Option<Cursor>> {
        Ok(match &self.current {
            Some(Outcome::Rows(cursor)) => Some(cursor.clone()),
            _ => None,
        })
    }

    fn fetch(&mut self, cursor: &Cursor) -> DriverResult<Option<Vec<Value>>> {
        Ok(self.rows.get_mut(&cursor.id).and_then(VecDeque::pop_front))
    }

    fn more_results(&mut self) -> DriverResult<bool> {
        self.current = self.results.pop_front();
        Ok(self.current.is_some())
    }

    fn out_value(&mut self, position: usize) -> DriverResult<Value> {
        let _ = position;
        Err(DriverError::unsupported("OUT parameters through SQLx"))
    }

    fn add_batch(&mut self) -> DriverResult<()> {
        let values = self.positional_values()?;
        self.batch.push(values);
        self.bound.clear();
        Ok(())
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>> {
        let rows = std::mem::take(&mut self.batch);
        let mut counts = Vec::with_capacity(rows.len());
        for (index, values) in rows.iter().enumerate() {
            let executed = self
                .run(values, false)
                .map_err(|e| e.with_batch_index(index))?;
            let count = executed
                .outcomes
                .iter()
                .map(|(outcome, _)| match outcome {
                    Outcome::Count(n) => *n,
                    Outcome::Rows(_) => 0,
                })
                .sum();
            counts.push(count);
        }
        Ok(counts)
    }

    fn close(&mut self) -> DriverResult<()> {
        self.results.clear();
        self.rows.clear();
        self.current = None;
        self.keys = None;
        Ok(())
    }
}
