//! Statement handler: binds an ordered parameter set to a prepared statement,
//! executes it and unwraps every result it produced.
//!
//! A handler walks `Created → Bound → Executed → Unwrapped → Closed` and never
//! goes back. Calls made out of order fail with [`Error::Internal`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::driver::{Cursor, Statement};
use crate::error::{Error, Result};
use crate::output::{OutputHandler, RowSource};
use crate::params::{Parameter, ParameterSet};
use crate::value::{SqlType, Value};

/// When rows are converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Materialize every row during unwrap; results outlive the statement.
    #[default]
    Eager,
    /// Stream rows on demand from the live statement.
    Lazy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Created,
    Bound,
    Executed,
    Unwrapped,
    Closed,
}

/// Whether driver parameter metadata is still trusted. Cloning shares the
/// flag, so one failure switches it off for every handler of the same runner.
#[derive(Debug, Clone)]
pub struct MetadataSupport(Arc<AtomicBool>);

impl MetadataSupport {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn disable(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl Default for MetadataSupport {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Lifecycle hooks around statement close, run exactly once per handler.
pub trait StatementHooks: Send {
    fn before_close(&mut self, stmt: &mut dyn Statement) -> Result<()> {
        let _ = stmt;
        Ok(())
    }

    fn after_close(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl StatementHooks for NoHooks {}

/// Everything one execution produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallResult {
    /// Update count of the first result, -1 when it was a result set.
    pub update_count: i64,
    /// Present when generated keys were requested and rows were affected.
    pub generated_keys: Option<Vec<ParameterSet>>,
    /// Ordinary result sets in driver order.
    pub result_sets: Vec<Vec<ParameterSet>>,
    /// The bound set, OUT and INOUT entries refreshed after a call.
    pub out_parameters: ParameterSet,
}

impl CallResult {
    /// Generated keys first, then result sets.
    pub fn row_groups(&self) -> impl Iterator<Item = &Vec<ParameterSet>> {
        self.generated_keys.iter().chain(self.result_sets.iter())
    }

    pub fn outputs(&self) -> ParameterSet {
        self.out_parameters.outputs()
    }

    /// Runs `handler` over each ordinary result set.
    pub fn shape<H: OutputHandler>(&self, handler: &H) -> Result<Vec<H::Output>> {
        self.result_sets
            .iter()
            .map(|rows| handler.handle(&mut rows.clone().into_iter()))
            .collect()
    }
}

/// Drives one prepared statement through bind, execute and unwrap.
///
/// The handler never owns the statement; it is handed the same statement at
/// every step and closes it exactly once. Close is allowed from any state
/// except `Closed`, so error paths can always release the statement.
///
/// # Examples
///
/// ```no_run
/// use sqlx_named_runner::builder::build_query;
/// use sqlx_named_runner::driver::{Connection, PrepareOptions};
/// use sqlx_named_runner::params::ParameterSet;
/// use sqlx_named_runner::statement::{MetadataSupport, StatementHandler};
///
/// # fn example(conn: &mut dyn Connection) -> sqlx_named_runner::Result<()> {
/// let query = build_query("SELECT id, name FROM cats WHERE age >= :age")?;
/// let mut params = ParameterSet::new();
/// params.set("age", 5);
///
/// let mut stmt = conn.prepare(&query.sql, PrepareOptions::default())?;
/// let mut handler = StatementHandler::new(MetadataSupport::default());
/// handler.bind(stmt.as_mut(), &params)?;
/// handler.execute(stmt.as_mut())?;
/// let result = handler.unwrap(stmt.as_mut())?;
/// handler.close(stmt.as_mut())?;
///
/// for row in &result.result_sets[0] {
///     println!("{row}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct StatementHandler {
    state: HandlerState,
    strategy: Strategy,
    strict: bool,
    generated_keys: bool,
    callable: bool,
    metadata: MetadataSupport,
    hooks: Box<dyn StatementHooks>,
    bound: ParameterSet,
}

impl StatementHandler {
    pub fn new(metadata: MetadataSupport) -> Self {
        Self {
            state: HandlerState::Created,
            strategy: Strategy::default(),
            strict: false,
            generated_keys: false,
            callable: false,
            metadata,
            hooks: Box::new(NoHooks),
            bound: ParameterSet::new(),
        }
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Fail on a parameter-count mismatch instead of logging it.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn generated_keys(mut self, enabled: bool) -> Self {
        self.generated_keys = enabled;
        self
    }

    /// The statement came from `prepare_call`; OUT parameters are registered
    /// and read back.
    pub fn callable(mut self, callable: bool) -> Self {
        self.callable = callable;
        self
    }

    pub fn hooks(mut self, hooks: impl StatementHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    pub fn current_strategy(&self) -> Strategy {
        self.strategy
    }

    /// Binds `params` positionally. The set is copied at handoff.
    pub fn bind(&mut self, stmt: &mut dyn Statement, params: &ParameterSet) -> Result<()> {
        self.expect(HandlerState::Created, "bind")?;
        let params = params.clone();
        self.check_count(stmt, params.len())?;
        self.bind_values(stmt, &params)?;
        self.bound = params;
        self.state = HandlerState::Bound;
        Ok(())
    }

    /// Binds each row and queues it as one batch entry.
    pub fn bind_batch(&mut self, stmt: &mut dyn Statement, rows: &[ParameterSet]) -> Result<()> {
        self.expect(HandlerState::Created, "bind")?;
        if let Some(first) = rows.first() {
            self.check_count(stmt, first.len())?;
        }
        for row in rows {
            self.bind_values(stmt, row)?;
            stmt.add_batch()?;
        }
        self.state = HandlerState::Bound;
        Ok(())
    }

    /// Driver errors pass through untranslated.
    pub fn execute(&mut self, stmt: &mut dyn Statement) -> Result<bool> {
        self.expect(HandlerState::Bound, "execute")?;
        let has_rows = stmt.execute()?;
        self.state = HandlerState::Executed;
        Ok(has_rows)
    }

    pub fn execute_batch(&mut self, stmt: &mut dyn Statement) -> Result<Vec<i64>> {
        self.expect(HandlerState::Bound, "execute")?;
        let counts = stmt.execute_batch()?;
        self.state = HandlerState::Executed;
        Ok(counts)
    }

    /// Materializes every result of the executed statement.
    pub fn unwrap(&mut self, stmt: &mut dyn Statement) -> Result<CallResult> {
        self.expect(HandlerState::Executed, "unwrap")?;
        let update_count = stmt.update_count()?;

        let mut consumed = None;
        let mut generated_keys = None;
        if self.generated_keys && update_count > 0 {
            if let Some(cursor) = stmt.generated_keys()? {
                generated_keys = Some(drain(stmt, &cursor)?);
                consumed = Some(cursor.id);
            }
        }

        let mut result_sets = Vec::new();
        loop {
            match stmt.result_set()? {
                Some(cursor) if Some(cursor.id) == consumed => {
                    debug!(cursor = cursor.id, "skipping result set already read as generated keys");
                }
                Some(cursor) => result_sets.push(drain(stmt, &cursor)?),
                None => {}
            }
            if !stmt.more_results()? {
                break;
            }
        }

        let out_parameters = if self.callable {
            self.refresh_outputs(stmt)?
        } else {
            self.bound.clone()
        };
        self.state = HandlerState::Unwrapped;
        Ok(CallResult {
            update_count,
            generated_keys,
            result_sets,
            out_parameters,
        })
    }

    /// Streams results from the live statement instead of materializing them.
    pub fn stream<'s>(&mut self, stmt: &'s mut dyn Statement) -> Result<LazyResults<'s>> {
        self.expect(HandlerState::Executed, "unwrap")?;
        let update_count = stmt.update_count()?;
        let keys = if self.generated_keys && update_count > 0 {
            stmt.generated_keys()?
        } else {
            None
        };
        self.state = HandlerState::Unwrapped;
        Ok(LazyResults {
            consumed: keys.as_ref().map(|c| c.id),
            stmt,
            update_count,
            keys,
            started: false,
            exhausted: false,
        })
    }

    /// The bound set with OUT and INOUT positions read back from a callable
    /// statement, names and types preserved.
    pub fn read_out_parameters(&mut self, stmt: &mut dyn Statement) -> Result<ParameterSet> {
        if !matches!(self.state, HandlerState::Executed | HandlerState::Unwrapped) {
            return Err(self.out_of_order("read OUT parameters"));
        }
        if !self.callable {
            return Err(Error::Internal(
                "OUT parameters can only be read from a callable statement".into(),
            ));
        }
        self.refresh_outputs(stmt)
    }

    /// Runs the hooks and closes the statement. The first failure is
    /// returned after every step has run.
    pub fn close(&mut self, stmt: &mut dyn Statement) -> Result<()> {
        if self.state == HandlerState::Closed {
            return Err(self.out_of_order("close"));
        }
        self.state = HandlerState::Closed;
        let before = self.hooks.before_close(stmt);
        let closed = stmt.close().map_err(Error::from);
        self.hooks.after_close();
        before.and(closed)
    }

    fn expect(&self, state: HandlerState, action: &str) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(self.out_of_order(action))
        }
    }

    fn out_of_order(&self, action: &str) -> Error {
        Error::Internal(format!("cannot {action} a statement in state {:?}", self.state))
    }

    fn check_count(&mut self, stmt: &mut dyn Statement, supplied: usize) -> Result<()> {
        if !self.metadata.enabled() {
            return Ok(());
        }
        match stmt.parameter_count() {
            Ok(expected) if expected != supplied => {
                if self.strict {
                    return Err(Error::ParameterCountMismatch {
                        expected,
                        actual: supplied,
                    });
                }
                warn!(expected, supplied, "parameter count mismatch, binding anyway");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "parameter metadata unavailable, trusting supplied count");
                self.metadata.disable();
            }
        }
        Ok(())
    }

    fn bind_values(&self, stmt: &mut dyn Statement, params: &ParameterSet) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            let position = i + 1;
            let sql_type = param
                .sql_type
                .or_else(|| param.value.sql_type())
                .unwrap_or(SqlType::Varchar);
            if param.direction.is_input() {
                if param.value.is_null() {
                    stmt.bind_null(position, sql_type)?;
                } else {
                    stmt.bind(position, &param.value, sql_type)?;
                }
            }
            if param.direction.is_output() {
                if !self.callable {
                    return Err(Error::Internal(format!(
                        "OUT parameter '{}' on a statement that is not callable",
                        param.name
                    )));
                }
                stmt.register_out(position, sql_type)?;
            }
        }
        Ok(())
    }

    fn refresh_outputs(&self, stmt: &mut dyn Statement) -> Result<ParameterSet> {
        let mut refreshed = ParameterSet::with_capacity(self.bound.len());
        for (i, param) in self.bound.iter().enumerate() {
            if param.direction.is_output() {
                let value = stmt.out_value(i + 1)?;
                refreshed.push(Parameter { value, ..param.clone() });
            } else {
                refreshed.push(param.clone());
            }
        }
        Ok(refreshed)
    }
}

fn to_row(cursor: &Cursor, values: Vec<Value>) -> ParameterSet {
    cursor
        .columns
        .iter()
        .zip(values)
        .map(|(column, value)| {
            let mut param = Parameter::new(&column.name, value);
            if column.sql_type.is_some() {
                param.sql_type = column.sql_type;
            }
            param
        })
        .collect()
}

fn drain(stmt: &mut dyn Statement, cursor: &Cursor) -> Result<Vec<ParameterSet>> {
    let mut rows = Vec::new();
    while let Some(values) = stmt.fetch(cursor)? {
        rows.push(to_row(cursor, values));
    }
    Ok(rows)
}

/// Results of an executed statement, read on demand. Borrows the statement,
/// so it cannot outlive it.
pub struct LazyResults<'s> {
    stmt: &'s mut dyn Statement,
    update_count: i64,
    keys: Option<Cursor>,
    consumed: Option<u64>,
    started: bool,
    exhausted: bool,
}

impl LazyResults<'_> {
    pub fn update_count(&self) -> i64 {
        self.update_count
    }

    /// Generated keys, at most once.
    pub fn generated_keys(&mut self) -> Option<LazyRows<'_>> {
        self.keys.take().map(|cursor| LazyRows {
            stmt: &mut *self.stmt,
            cursor,
        })
    }

    /// The next ordinary result set, skipping update counts and the
    /// generated-keys cursor.
    pub fn next_result_set(&mut self) -> Result<Option<LazyRows<'_>>> {
        loop {
            if self.exhausted {
                return Ok(None);
            }
            if self.started && !self.stmt.more_results()? {
                self.exhausted = true;
                return Ok(None);
            }
            self.started = true;
            match self.stmt.result_set()? {
                Some(cursor) if Some(cursor.id) == self.consumed => continue,
                Some(cursor) => {
                    return Ok(Some(LazyRows {
                        stmt: &mut *self.stmt,
                        cursor,
                    }))
                }
                None => continue,
            }
        }
    }
}

/// One result set streamed from a live statement.
pub struct LazyRows<'r> {
    stmt: &'r mut dyn Statement,
    cursor: Cursor,
}

impl RowSource for LazyRows<'_> {
    fn next_row(&mut self) -> Result<Option<ParameterSet>> {
        Ok(self
            .stmt
            .fetch(&self.cursor)?
            .map(|values| to_row(&self.cursor, values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Column, DriverError, DriverResult};
    use crate::output::{MapHandler, MapListHandler};
    use crate::value::Direction;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicUsize;

    enum Outcome {
        Count(i64),
        Set(Cursor),
    }

    #[derive(Default)]
    struct FakeStatement {
        param_count: Option<usize>,
        results: Vec<Outcome>,
        pos: usize,
        keys: Option<Cursor>,
        rows: HashMap<u64, VecDeque<Vec<Value>>>,
        bound: Vec<(usize, Value, SqlType)>,
        outs: Vec<(usize, SqlType)>,
        out_values: HashMap<usize, Value>,
        batches: usize,
        closed: usize,
    }

    fn cursor(id: u64, columns: &[&str]) -> Cursor {
        Cursor {
            id,
            columns: columns.iter().map(|c| Column::new(*c, None)).collect(),
        }
    }

    impl FakeStatement {
        fn with_rows(mut self, id: u64, rows: Vec<Vec<Value>>) -> Self {
            self.rows.insert(id, rows.into());
            self
        }
    }

    impl Statement for FakeStatement {
        fn parameter_count(&mut self) -> DriverResult<usize> {
            self.param_count
                .ok_or_else(|| DriverError::unsupported("parameter metadata"))
        }

        fn bind(&mut self, position: usize, value: &Value, sql_type: SqlType) -> DriverResult<()> {
            self.bound.push((position, value.clone(), sql_type));
            Ok(())
        }

        fn bind_null(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
            self.bound.push((position, Value::Null, sql_type));
            Ok(())
        }

        fn register_out(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
            self.outs.push((position, sql_type));
            Ok(())
        }

        fn execute(&mut self) -> DriverResult<bool> {
            self.pos = 0;
            Ok(matches!(self.results.first(), Some(Outcome::Set(_))))
        }

        fn update_count(&mut self) -> DriverResult<i64> {
            Ok(match self.results.get(self.pos) {
                Some(Outcome::Count(n)) => *n,
                _ => -1,
            })
        }

        fn generated_keys(&mut self) -> DriverResult<Option<Cursor>> {
            Ok(self.keys.clone())
        }

        fn result_set(&mut self) -> DriverResult<Option<Cursor>> {
            Ok(match self.results.get(self.pos) {
                Some(Outcome::Set(c)) => Some(c.clone()),
                _ => None,
            })
        }

        fn fetch(&mut self, cursor: &Cursor) -> DriverResult<Option<Vec<Value>>> {
            Ok(self.rows.get_mut(&cursor.id).and_then(VecDeque::pop_front))
        }

        fn more_results(&mut self) -> DriverResult<bool> {
            self.pos += 1;
            Ok(self.pos < self.results.len())
        }

        fn out_value(&mut self, position: usize) -> DriverResult<Value> {
            Ok(self.out_values.get(&position).cloned().unwrap_or_default())
        }

        fn add_batch(&mut self) -> DriverResult<()> {
            self.batches += 1;
            Ok(())
        }

        fn execute_batch(&mut self) -> DriverResult<Vec<i64>> {
            Ok(vec![1; self.batches])
        }

        fn close(&mut self) -> DriverResult<()> {
            self.closed += 1;
            Ok(())
        }
    }

    fn params(pairs: &[(&str, Value)]) -> ParameterSet {
        let mut set = ParameterSet::new();
        for (name, value) in pairs {
            set.set(name, value.clone());
        }
        set
    }

    #[test]
    fn test_lifecycle_and_rows() {
        let mut stmt = FakeStatement {
            param_count: Some(1),
            results: vec![Outcome::Set(cursor(1, &["ID", "Name"]))],
            ..Default::default()
        }
        .with_rows(1, vec![vec![Value::Int(1), Value::from("a")]]);
        let mut handler = StatementHandler::new(MetadataSupport::default());

        handler.bind(&mut stmt, &params(&[("age", Value::Int(5))])).unwrap();
        assert!(handler.execute(&mut stmt).unwrap());
        let result = handler.unwrap(&mut stmt).unwrap();
        handler.close(&mut stmt).unwrap();

        assert_eq!(result.update_count, -1);
        assert_eq!(result.result_sets.len(), 1);
        assert_eq!(result.result_sets[0][0].value("name"), Some(&Value::from("a")));
        assert_eq!(handler.state(), HandlerState::Closed);
        assert_eq!(stmt.closed, 1);
    }

    #[test]
    fn test_out_of_order_calls_fail() {
        let mut stmt = FakeStatement::default();
        let mut handler = StatementHandler::new(MetadataSupport::new(false));
        assert!(matches!(handler.execute(&mut stmt), Err(Error::Internal(_))));
        assert!(matches!(handler.unwrap(&mut stmt), Err(Error::Internal(_))));
        handler.close(&mut stmt).unwrap();
        assert!(matches!(handler.close(&mut stmt), Err(Error::Internal(_))));
        assert!(matches!(
            handler.bind(&mut stmt, &ParameterSet::new()),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_null_binds_with_varchar_fallback() {
        let mut stmt = FakeStatement {
            param_count: Some(2),
            ..Default::default()
        };
        let mut set = params(&[("a", Value::Null)]);
        set.set_typed("b", Value::Null, SqlType::Integer, Direction::In);
        let mut handler = StatementHandler::new(MetadataSupport::default());
        handler.bind(&mut stmt, &set).unwrap();
        assert_eq!(
            stmt.bound,
            vec![
                (1, Value::Null, SqlType::Varchar),
                (2, Value::Null, SqlType::Integer)
            ]
        );
    }

    #[test]
    fn test_count_mismatch_strict_and_lenient() {
        let set = params(&[("a", Value::Int(1))]);

        let mut stmt = FakeStatement {
            param_count: Some(2),
            ..Default::default()
        };
        let mut strict = StatementHandler::new(MetadataSupport::default()).strict(true);
        assert!(matches!(
            strict.bind(&mut stmt, &set),
            Err(Error::ParameterCountMismatch {
                expected: 2,
                actual: 1
            })
        ));

        let mut lenient = StatementHandler::new(MetadataSupport::default());
        lenient.bind(&mut stmt, &set).unwrap();
        assert_eq!(lenient.state(), HandlerState::Bound);
    }

    #[test]
    fn test_metadata_failure_disables_shared_flag() {
        let metadata = MetadataSupport::default();
        let mut stmt = FakeStatement::default();
        let mut handler = StatementHandler::new(metadata.clone()).strict(true);
        handler.bind(&mut stmt, &params(&[("a", Value::Int(1))])).unwrap();
        assert!(!metadata.enabled());
    }

    #[test]
    fn test_generated_keys_are_not_read_twice() {
        let keys = cursor(1, &["generated_key"]);
        let mut stmt = FakeStatement {
            param_count: Some(0),
            results: vec![
                Outcome::Count(1),
                Outcome::Set(keys.clone()),
                Outcome::Set(cursor(2, &["id"])),
            ],
            keys: Some(keys),
            ..Default::default()
        }
        .with_rows(1, vec![vec![Value::Int(10)]])
        .with_rows(2, vec![vec![Value::Int(3)], vec![Value::Int(4)]]);

        let mut handler = StatementHandler::new(MetadataSupport::default()).generated_keys(true);
        handler.bind(&mut stmt, &ParameterSet::new()).unwrap();
        handler.execute(&mut stmt).unwrap();
        let result = handler.unwrap(&mut stmt).unwrap();

        assert_eq!(result.update_count, 1);
        assert_eq!(result.row_groups().count(), 2);
        let keys = result.generated_keys.as_ref().unwrap();
        assert_eq!(keys[0].value("generated_key"), Some(&Value::Int(10)));
        assert_eq!(result.result_sets.len(), 1);
        assert_eq!(result.result_sets[0].len(), 2);
    }

    #[test]
    fn test_out_parameters_refreshed() {
        let mut stmt = FakeStatement {
            param_count: Some(2),
            results: vec![Outcome::Count(0)],
            ..Default::default()
        };
        stmt.out_values.insert(2, Value::Int(10));
        let mut set = ParameterSet::new();
        set.set_typed("x", 5, SqlType::Integer, Direction::In);
        set.set_out("y", SqlType::Integer);

        let mut handler = StatementHandler::new(MetadataSupport::default()).callable(true);
        handler.bind(&mut stmt, &set).unwrap();
        assert_eq!(stmt.outs, vec![(2, SqlType::Integer)]);
        handler.execute(&mut stmt).unwrap();
        let result = handler.unwrap(&mut stmt).unwrap();

        assert_eq!(result.out_parameters.value("x"), Some(&Value::Int(5)));
        assert_eq!(result.out_parameters.value("y"), Some(&Value::Int(10)));
        assert_eq!(result.outputs().len(), 1);
    }

    #[test]
    fn test_out_parameter_requires_callable() {
        let mut stmt = FakeStatement::default();
        let mut set = ParameterSet::new();
        set.set_out("y", SqlType::Integer);
        let mut handler = StatementHandler::new(MetadataSupport::new(false));
        assert!(matches!(handler.bind(&mut stmt, &set), Err(Error::Internal(_))));
    }

    #[test]
    fn test_batch() {
        let mut stmt = FakeStatement::default();
        let rows = vec![params(&[("n", Value::from("a"))]), params(&[("n", Value::from("b"))])];
        let mut handler = StatementHandler::new(MetadataSupport::new(false));
        handler.bind_batch(&mut stmt, &rows).unwrap();
        assert_eq!(handler.execute_batch(&mut stmt).unwrap(), vec![1, 1]);
        assert_eq!(stmt.bound.len(), 2);
    }

    #[test]
    fn test_stream_reads_on_demand() {
        let mut stmt = FakeStatement {
            results: vec![
                Outcome::Set(cursor(1, &["id"])),
                Outcome::Count(3),
                Outcome::Set(cursor(2, &["id"])),
            ],
            ..Default::default()
        }
        .with_rows(1, vec![vec![Value::Int(1)], vec![Value::Int(2)]])
        .with_rows(2, vec![vec![Value::Int(9)]]);

        let mut handler = StatementHandler::new(MetadataSupport::new(false)).strategy(Strategy::Lazy);
        handler.bind(&mut stmt, &ParameterSet::new()).unwrap();
        handler.execute(&mut stmt).unwrap();
        {
            let mut results = handler.stream(&mut stmt).unwrap();
            let mut first = results.next_result_set().unwrap().unwrap();
            let row = MapHandler.handle(&mut first).unwrap().unwrap();
            assert_eq!(row.value("id"), Some(&Value::Int(1)));
            let mut second = results.next_result_set().unwrap().unwrap();
            assert_eq!(MapListHandler.handle(&mut second).unwrap().len(), 1);
            assert!(results.next_result_set().unwrap().is_none());
        }
        // The unread row of the first set stays with the driver.
        assert_eq!(stmt.rows[&1].len(), 1);
    }

    struct CountingHooks(Arc<AtomicUsize>);

    impl StatementHooks for CountingHooks {
        fn before_close(&mut self, _stmt: &mut dyn Statement) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(Error::Internal("hook failed".into()))
        }

        fn after_close(&mut self) {
            self.0.fetch_add(10, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_hooks_run_once_even_on_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut stmt = FakeStatement::default();
        let mut handler =
            StatementHandler::new(MetadataSupport::new(false)).hooks(CountingHooks(calls.clone()));
        assert!(handler.close(&mut stmt).is_err());
        assert!(handler.close(&mut stmt).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 11);
        assert_eq!(stmt.closed, 1);
    }
}
