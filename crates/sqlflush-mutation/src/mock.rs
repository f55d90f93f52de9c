//! Recording connection used by unit tests.

use sqlflush_core::{
    Connection, Dialect, Error, GeneratedKeys, QueryError, QueryErrorKind, Result, Row, Statement,
    Value,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Failure {
    pattern: String,
    sqlstate: String,
    message: String,
}

impl Failure {
    fn to_error(&self, sql: &str) -> Error {
        Error::Query(
            QueryError::new(QueryErrorKind::Database, self.message.clone())
                .with_sql(sql)
                .with_sqlstate(self.sqlstate.clone()),
        )
    }
}

#[derive(Debug)]
struct MockState {
    dialect: Dialect,
    prepared: Vec<String>,
    executed: Vec<(String, Vec<Value>)>,
    batches: Vec<(String, usize)>,
    closed: Vec<String>,
    queries: Vec<String>,
    timeouts: Vec<Duration>,
    generated_key: Value,
    update_counts: Vec<(String, u64)>,
    fail_prepare: Vec<Failure>,
    fail_execute: Vec<Failure>,
    fail_close: Vec<String>,
}

impl MockState {
    fn update_count(&self, sql: &str) -> u64 {
        self.update_counts
            .iter()
            .rev()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map_or(1, |(_, n)| *n)
    }

    fn execute_failure(&self, sql: &str) -> Option<Error> {
        self.fail_execute
            .iter()
            .find(|f| sql.contains(f.pattern.as_str()))
            .map(|f| f.to_error(sql))
    }

    fn key_row(&self) -> Row {
        Row::new(vec!["id".to_string()], vec![self.generated_key.clone()])
    }
}

/// Connection that records everything and fails on request.
#[derive(Debug, Clone)]
pub(crate) struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                dialect,
                prepared: Vec::new(),
                executed: Vec::new(),
                batches: Vec::new(),
                closed: Vec::new(),
                queries: Vec::new(),
                timeouts: Vec::new(),
                generated_key: Value::BigInt(1),
                update_counts: Vec::new(),
                fail_prepare: Vec::new(),
                fail_execute: Vec::new(),
                fail_close: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn set_generated_key(&self, value: Value) {
        self.state().generated_key = value;
    }

    /// Row count reported for statements whose SQL contains `pattern`.
    pub(crate) fn set_update_count(&self, pattern: &str, count: u64) {
        self.state().update_counts.push((pattern.to_string(), count));
    }

    pub(crate) fn fail_prepare(&self, pattern: &str, sqlstate: &str, message: &str) {
        self.state().fail_prepare.push(Failure {
            pattern: pattern.to_string(),
            sqlstate: sqlstate.to_string(),
            message: message.to_string(),
        });
    }

    pub(crate) fn fail_execute(&self, pattern: &str, sqlstate: &str, message: &str) {
        self.state().fail_execute.push(Failure {
            pattern: pattern.to_string(),
            sqlstate: sqlstate.to_string(),
            message: message.to_string(),
        });
    }

    pub(crate) fn fail_close(&self, pattern: &str) {
        self.state().fail_close.push(pattern.to_string());
    }

    pub(crate) fn prepared(&self) -> Vec<String> {
        self.state().prepared.clone()
    }

    pub(crate) fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.state().executed.clone()
    }

    pub(crate) fn executed_sql(&self) -> Vec<String> {
        self.state().executed.iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub(crate) fn batches(&self) -> Vec<(String, usize)> {
        self.state().batches.clone()
    }

    pub(crate) fn closed(&self) -> Vec<String> {
        self.state().closed.clone()
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.state().queries.clone()
    }

    pub(crate) fn timeouts(&self) -> Vec<Duration> {
        self.state().timeouts.clone()
    }

    fn statement(&self, sql: &str, callable: bool, keys: GeneratedKeys) -> Result<Box<dyn Statement>> {
        let mut state = self.state();
        if let Some(f) = state.fail_prepare.iter().find(|f| sql.contains(f.pattern.as_str())) {
            return Err(f.to_error(sql));
        }
        state.prepared.push(sql.to_string());
        Ok(Box::new(MockStatement {
            state: Arc::clone(&self.state),
            sql: sql.to_string(),
            callable,
            keys,
            params: BTreeMap::new(),
            batch: Vec::new(),
            out_registered: Vec::new(),
            last_count: 0,
            closed: false,
        }))
    }
}

impl Connection for MockConnection {
    fn dialect(&self) -> Dialect {
        self.state().dialect
    }

    fn prepare(&self, sql: &str, keys: GeneratedKeys) -> Result<Box<dyn Statement>> {
        self.statement(sql, false, keys)
    }

    fn prepare_call(&self, sql: &str) -> Result<Box<dyn Statement>> {
        self.statement(sql, true, GeneratedKeys::None)
    }

    fn execute(&self, sql: &str, _params: &[Value]) -> Result<u64> {
        let mut state = self.state();
        state.queries.push(sql.to_string());
        Ok(state.update_count(sql))
    }

    fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        let mut state = self.state();
        state.queries.push(sql.to_string());
        Ok(vec![state.key_row()])
    }
}

struct MockStatement {
    state: Arc<Mutex<MockState>>,
    sql: String,
    callable: bool,
    keys: GeneratedKeys,
    params: BTreeMap<usize, Value>,
    batch: Vec<Vec<Value>>,
    out_registered: Vec<usize>,
    last_count: u64,
    closed: bool,
}

impl MockStatement {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Query(
                QueryError::new(QueryErrorKind::Database, "statement is closed").with_sql(&self.sql),
            ));
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<Value> {
        self.params.values().cloned().collect()
    }

    fn run(&mut self) -> Result<u64> {
        self.check_open()?;
        let params = self.snapshot();
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.execute_failure(&self.sql) {
            return Err(e);
        }
        state.executed.push((self.sql.clone(), params));
        self.last_count = state.update_count(&self.sql);
        Ok(self.last_count)
    }
}

impl Statement for MockStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn is_callable(&self) -> bool {
        self.callable
    }

    fn bind(&mut self, position: usize, value: &Value) -> Result<()> {
        self.check_open()?;
        self.params.insert(position, value.clone());
        Ok(())
    }

    fn clear_parameters(&mut self) -> Result<()> {
        self.params.clear();
        Ok(())
    }

    fn execute_update(&mut self) -> Result<u64> {
        self.run()
    }

    fn execute_query(&mut self) -> Result<Vec<Row>> {
        self.run()?;
        Ok(vec![self.state.lock().unwrap().key_row()])
    }

    fn add_batch(&mut self) -> Result<()> {
        self.check_open()?;
        let params = self.snapshot();
        self.batch.push(params);
        self.params.clear();
        Ok(())
    }

    fn execute_batch(&mut self) -> Result<Vec<u64>> {
        self.check_open()?;
        let entries = std::mem::take(&mut self.batch);
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.execute_failure(&self.sql) {
            return Err(e);
        }
        state.batches.push((self.sql.clone(), entries.len()));
        let count = state.update_count(&self.sql);
        let mut counts = Vec::with_capacity(entries.len());
        for params in entries {
            state.executed.push((self.sql.clone(), params));
            counts.push(count);
        }
        Ok(counts)
    }

    fn generated_keys(&mut self) -> Result<Vec<Row>> {
        self.check_open()?;
        if self.keys.is_requested() {
            Ok(vec![self.state.lock().unwrap().key_row()])
        } else {
            Ok(Vec::new())
        }
    }

    fn register_out_parameter(&mut self, position: usize) -> Result<()> {
        self.check_open()?;
        self.out_registered.push(position);
        Ok(())
    }

    fn out_parameter(&self, position: usize) -> Result<Value> {
        self.check_open()?;
        if !self.out_registered.contains(&position) {
            return Err(Error::illegal_state(format!(
                "out parameter {position} was not registered"
            )));
        }
        if self.sql.contains(" returning ") {
            Ok(self.state.lock().unwrap().generated_key.clone())
        } else {
            Ok(Value::BigInt(i64::try_from(self.last_count).unwrap_or(i64::MAX)))
        }
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.state.lock().unwrap().timeouts.push(timeout);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_close.iter().any(|p| self.sql.contains(p.as_str())) {
            return Err(Error::Custom(format!("close failed: {}", self.sql)));
        }
        state.closed.push(self.sql.clone());
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
