//! Timing decorator for statements.

use std::time::Instant;

use tracing::info;

use crate::driver::{Cursor, DriverResult, Statement};
use crate::value::{SqlType, Value};

/// Wraps a statement and logs how long each execution took. Every other call
/// is forwarded untouched.
pub struct ProfiledStatement<'a> {
    inner: Box<dyn Statement + 'a>,
    sql: String,
}

impl<'a> ProfiledStatement<'a> {
    pub fn new(inner: Box<dyn Statement + 'a>, sql: impl Into<String>) -> Self {
        Self {
            inner,
            sql: sql.into(),
        }
    }

    fn timed<T>(&mut self, what: &str, run: impl FnOnce(&mut dyn Statement) -> DriverResult<T>) -> DriverResult<T> {
        let start = Instant::now();
        let result = run(self.inner.as_mut());
        let took = start.elapsed().as_secs_f64() * 1000.0;
        info!(sql = %self.sql, ok = result.is_ok(), "{what} took {took:.3}ms");
        result
    }
}

impl Statement for ProfiledStatement<'_> {
    fn parameter_count(&mut self) -> DriverResult<usize> {
        self.inner.parameter_count()
    }

    fn bind(&mut self, position: usize, value: &Value, sql_type: SqlType) -> DriverResult<()> {
        self.inner.bind(position, value, sql_type)
    }

    fn bind_null(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
        self.inner.bind_null(position, sql_type)
    }

    fn register_out(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
        self.inner.register_out(position, sql_type)
    }

    fn execute(&mut self) -> DriverResult<bool> {
        self.timed("execute", |stmt| stmt.execute())
    }

    fn update_count(&mut self) -> DriverResult<i64> {
        self.inner.update_count()
    }

    fn generated_keys(&mut self) -> DriverResult<Option<Cursor>> {
        self.inner.generated_keys()
    }

    fn result_set(&mut self) -> DriverResult<Option<Cursor>> {
        self.inner.result_set()
    }

    fn fetch(&mut self, cursor: &Cursor) -> DriverResult<Option<Vec<Value>>> {
        self.inner.fetch(cursor)
    }

    fn more_results(&mut self) -> DriverResult<bool> {
        self.inner.more_results()
    }

    fn out_value(&mut self, position: usize) -> DriverResult<Value> {
        self.inner.out_value(position)
    }

    fn add_batch(&mut self) -> DriverResult<()> {
        self.inner.add_batch()
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>> {
        self.timed("batch", |stmt| stmt.execute_batch())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.inner.close()
    }
}
