//! Blocking connection and statement traits.
//!
//! - [`Connection`] prepares statements and runs one-shot SQL
//! - [`Statement`] is a prepared, parameterized statement handle
//!
//! Every call blocks until the driver answers. Statement timeouts are the
//! only way a call is cut short; they surface as ordinary query errors.

use crate::dialect::Dialect;
use crate::error::Result;
use crate::row::Row;
use crate::value::Value;
use std::time::Duration;

/// Whether a prepared statement should expose database-generated keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GeneratedKeys {
    /// Do not track generated keys
    #[default]
    None,
    /// Track generated values for the named key columns
    Columns(Vec<String>),
}

impl GeneratedKeys {
    /// Request generated keys for a single column.
    pub fn column(name: impl Into<String>) -> Self {
        GeneratedKeys::Columns(vec![name.into()])
    }

    /// Check whether generated keys were requested.
    pub const fn is_requested(&self) -> bool {
        matches!(self, GeneratedKeys::Columns(_))
    }
}

/// A prepared statement owned by whoever prepared it.
///
/// Parameter positions are 1-based. After [`close`](Statement::close) every
/// other call fails; `close` itself may be called any number of times.
pub trait Statement {
    /// The SQL text this statement was prepared from.
    fn sql(&self) -> &str;

    /// Whether this is a stored-procedure style (callable) statement.
    fn is_callable(&self) -> bool {
        false
    }

    /// Bind a value to a parameter position.
    fn bind(&mut self, position: usize, value: &Value) -> Result<()>;

    /// Remove all currently bound values.
    fn clear_parameters(&mut self) -> Result<()>;

    /// Execute a mutation, returning the affected row count.
    fn execute_update(&mut self) -> Result<u64>;

    /// Execute and collect every result row.
    fn execute_query(&mut self) -> Result<Vec<Row>>;

    /// Queue the currently bound parameters as one batch entry.
    fn add_batch(&mut self) -> Result<()>;

    /// Execute all queued batch entries, returning one row count per entry.
    fn execute_batch(&mut self) -> Result<Vec<u64>>;

    /// Generated keys of the last execution.
    ///
    /// Only meaningful when the statement was prepared with
    /// [`GeneratedKeys::Columns`].
    fn generated_keys(&mut self) -> Result<Vec<Row>>;

    /// Register an output parameter on a callable statement.
    fn register_out_parameter(&mut self, position: usize) -> Result<()>;

    /// Read an output parameter after execution.
    fn out_parameter(&self, position: usize) -> Result<Value>;

    /// Set the statement-level query timeout.
    fn set_query_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Close the statement and free driver resources.
    fn close(&mut self) -> Result<()>;

    /// Whether [`close`](Statement::close) already succeeded.
    fn is_closed(&self) -> bool;
}

/// A database connection capable of preparing statements.
///
/// The connection is borrowed by the mutation layer and never closed by it.
pub trait Connection {
    /// The SQL dialect spoken by this connection.
    fn dialect(&self) -> Dialect;

    /// Prepare a statement, optionally tracking generated keys.
    fn prepare(&self, sql: &str, keys: GeneratedKeys) -> Result<Box<dyn Statement>>;

    /// Prepare a callable (stored-procedure style) statement.
    fn prepare_call(&self, sql: &str) -> Result<Box<dyn Statement>>;

    /// Execute one-shot SQL, returning the affected row count.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run one-shot SQL, returning all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;
}
