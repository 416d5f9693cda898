//! Scripted in-memory driver. Every call is recorded as a line in a shared
//! event log; statement executions consume scripted replies in order.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use sqlx_named_runner::driver::{
    Column, Connection, ConnectionSource, Cursor, DriverError, DriverErrorKind, DriverResult,
    Holdability, IsolationLevel, PrepareOptions, Statement,
};
use sqlx_named_runner::{SqlType, Value};

#[derive(Debug, Clone)]
pub enum Outcome {
    Count(i64),
    Rows {
        id: u64,
        columns: Vec<&'static str>,
        rows: Vec<Vec<Value>>,
    },
}

impl Outcome {
    pub fn rows(id: u64, columns: &[&'static str], rows: Vec<Vec<Value>>) -> Self {
        Self::Rows {
            id,
            columns: columns.to_vec(),
            rows,
        }
    }
}

/// What one execution produces.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub results: Vec<Outcome>,
    /// Cursor id and rows of the generated keys. Reusing the id of one of
    /// `results` makes both the same result set.
    pub keys: Option<(u64, Vec<Vec<Value>>)>,
    pub out_values: Vec<(usize, Value)>,
    pub batch: Vec<i64>,
    pub error: Option<(String, Option<String>, DriverErrorKind)>,
    /// Batch row the error is reported against
    pub failed_row: Option<usize>,
}

impl Reply {
    pub fn count(n: i64) -> Self {
        Self {
            results: vec![Outcome::Count(n)],
            ..Self::default()
        }
    }

    pub fn rows(columns: &[&'static str], rows: Vec<Vec<Value>>) -> Self {
        Self {
            results: vec![Outcome::rows(1, columns, rows)],
            ..Self::default()
        }
    }

    pub fn error(message: &str, code: Option<&str>, kind: DriverErrorKind) -> Self {
        Self {
            error: Some((message.to_owned(), code.map(str::to_owned), kind)),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct State {
    events: Vec<String>,
    replies: VecDeque<Reply>,
    /// `None` makes parameter metadata fail.
    param_count: Option<usize>,
    fail_rollback: bool,
    fail_commit: bool,
}

/// Shared handle to the script; clones see the same state.
#[derive(Debug, Clone)]
pub struct MockSource {
    state: Arc<Mutex<State>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn reply(&self, reply: Reply) -> &Self {
        self.lock().replies.push_back(reply);
        self
    }

    pub fn param_count(&self, count: Option<usize>) -> &Self {
        self.lock().param_count = count;
        self
    }

    pub fn fail_rollback(&self) -> &Self {
        self.lock().fail_rollback = true;
        self
    }

    pub fn fail_commit(&self) -> &Self {
        self.lock().fail_commit = true;
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.lock().events.iter().filter(|e| *e == event).count()
    }

    pub fn has(&self, event: &str) -> bool {
        self.count(event) > 0
    }
}

impl ConnectionSource for MockSource {
    fn connection(&self) -> DriverResult<Box<dyn Connection>> {
        record(&self.state, "open".to_owned());
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            closed: false,
            auto_commit: true,
            isolation: IsolationLevel::ReadCommitted,
            read_only: false,
            catalog: Some("main".into()),
            holdability: Holdability::HoldOverCommit,
            client_info: Vec::new(),
        }))
    }
}

fn record(state: &Mutex<State>, event: String) {
    state.lock().unwrap().events.push(event);
}

pub struct MockConnection {
    state: Arc<Mutex<State>>,
    closed: bool,
    auto_commit: bool,
    isolation: IsolationLevel,
    read_only: bool,
    catalog: Option<String>,
    holdability: Holdability,
    client_info: Vec<(String, String)>,
}

impl MockConnection {
    fn statement(&mut self, sql: &str, kind: &str) -> Box<dyn Statement + '_> {
        record(&self.state, format!("{kind} {sql}"));
        Box::new(MockStatement {
            state: Arc::clone(&self.state),
            reply: Reply::default(),
            pos: 0,
            rows: HashMap::new(),
            batches: 0,
        })
    }
}

impl Connection for MockConnection {
    fn prepare(&mut self, sql: &str, _options: PrepareOptions) -> DriverResult<Box<dyn Statement + '_>> {
        Ok(self.statement(sql, "prepare"))
    }

    fn prepare_call(&mut self, sql: &str) -> DriverResult<Box<dyn Statement + '_>> {
        Ok(self.statement(sql, "prepare_call"))
    }

    fn auto_commit(&self) -> DriverResult<bool> {
        Ok(self.auto_commit)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()> {
        record(&self.state, format!("auto_commit {enabled}"));
        self.auto_commit = enabled;
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        record(&self.state, "commit".into());
        if self.state.lock().unwrap().fail_commit {
            return Err(DriverError::new("commit refused").with_code("40001"));
        }
        Ok(())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        record(&self.state, "rollback".into());
        if self.state.lock().unwrap().fail_rollback {
            return Err(DriverError::new("connection lost").with_kind(DriverErrorKind::Connection));
        }
        Ok(())
    }

    fn isolation(&self) -> DriverResult<IsolationLevel> {
        Ok(self.isolation)
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> DriverResult<()> {
        record(&self.state, format!("isolation {level:?}"));
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
        record(&self.state, format!("savepoint {name}"));
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> DriverResult<()> {
        record(&self.state, format!("rollback_to {name}"));
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()> {
        record(&self.state, "close".into());
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn backend_name(&self) -> &str {
        "Mock"
    }
}

struct MockStatement {
    state: Arc<Mutex<State>>,
    reply: Reply,
    pos: usize,
    rows: HashMap<u64, VecDeque<Vec<Value>>>,
    batches: usize,
}

impl MockStatement {
    fn record(&self, event: String) {
        record(&self.state, event);
    }

    fn next_reply(&mut self) -> DriverResult<()> {
        let reply = self.state.lock().unwrap().replies.pop_front().unwrap_or_default();
        if let Some((message, code, kind)) = &reply.error {
            let mut err = DriverError::new(message.clone()).with_kind(*kind);
            if let Some(code) = code {
                err = err.with_code(code.clone());
            }
            if let Some(row) = reply.failed_row {
                err = err.with_batch_index(row);
            }
            return Err(err);
        }
        self.rows.clear();
        for outcome in &reply.results {
            if let Outcome::Rows { id, rows, .. } = outcome {
                self.rows.insert(*id, rows.iter().cloned().collect());
            }
        }
        if let Some((id, rows)) = &reply.keys {
            self.rows.insert(*id, rows.iter().cloned().collect());
        }
        self.pos = 0;
        self.reply = reply;
        Ok(())
    }
}

impl Statement for MockStatement {
    fn parameter_count(&mut self) -> DriverResult<usize> {
        self.record("parameter_count".into());
        self.state
            .lock()
            .unwrap()
            .param_count
            .ok_or_else(|| DriverError::unsupported("parameter metadata"))
    }

    fn bind(&mut self, position: usize, value: &Value, _sql_type: SqlType) -> DriverResult<()> {
        self.record(format!("bind {position} {value}"));
        Ok(())
    }

    fn bind_null(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
        self.record(format!("bind {position} NULL {sql_type:?}"));
        Ok(())
    }

    fn register_out(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
        self.record(format!("out {position} {sql_type:?}"));
        Ok(())
    }

    fn execute(&mut self) -> DriverResult<bool> {
        self.record("execute".into());
        self.next_reply()?;
        Ok(matches!(self.reply.results.first(), Some(Outcome::Rows { .. })))
    }

    fn update_count(&mut self) -> DriverResult<i64> {
        Ok(match self.reply.results.get(self.pos) {
            Some(Outcome::Count(n)) => *n,
            _ => -1,
        })
    }

    fn generated_keys(&mut self) -> DriverResult<Option<Cursor>> {
        Ok(self.reply.keys.as_ref().map(|(id, _)| Cursor {
            id: *id,
            columns: vec![Column::new("generated_key", Some(SqlType::BigInt))],
        }))
    }

    fn result_set(&mut self) -> DriverResult<Option<Cursor>> {
        Ok(match self.reply.results.get(self.pos) {
            Some(Outcome::Rows { id, columns, .. }) => Some(Cursor {
                id: *id,
                columns: columns.iter().map(|c| Column::new(*c, None)).collect(),
            }),
            _ => None,
        })
    }

    fn fetch(&mut self, cursor: &Cursor) -> DriverResult<Option<Vec<Value>>> {
        Ok(self.rows.get_mut(&cursor.id).and_then(VecDeque::pop_front))
    }

    fn more_results(&mut self) -> DriverResult<bool> {
        self.pos += 1;
        Ok(self.pos < self.reply.results.len())
    }

    fn out_value(&mut self, position: usize) -> DriverResult<Value> {
        Ok(self
            .reply
            .out_values
            .iter()
            .find(|(p, _)| *p == position)
            .map(|(_, v)| v.clone())
            .unwrap_or_default())
    }

    fn add_batch(&mut self) -> DriverResult<()> {
        self.record("add_batch".into());
        self.batches += 1;
        Ok(())
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>> {
        self.record("execute_batch".into());
        self.next_reply()?;
        if self.reply.batch.is_empty() {
            Ok(vec![1; self.batches])
        } else {
            Ok(self.reply.batch.clone())
        }
    }

    fn close(&mut self) -> DriverResult<()> {
        self.record("stmt close".into());
        Ok(())
    }
}
