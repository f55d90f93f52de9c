//! One table's statement within a logical mutation.

use crate::expectation::Expectation;
use crate::jdbc::JdbcCoordinator;
use crate::operation::TableMutation;
use sqlflush_core::{GeneratedKeys, Result, Statement, TableMapping};
use std::fmt;
use std::sync::Arc;

/// A lazily prepared statement for one table.
///
/// [`statement`](Self::statement) peeks at the live handle without side
/// effects; [`resolve_statement`](Self::resolve_statement) prepares it on
/// first use and returns the same handle afterwards.
pub struct PreparedStatementDetails {
    mutation: Arc<TableMutation>,
    statement: Option<Box<dyn Statement>>,
    to_release: bool,
}

impl PreparedStatementDetails {
    pub fn new(mutation: Arc<TableMutation>) -> Self {
        let to_release = mutation.is_callable();
        Self {
            mutation,
            statement: None,
            to_release,
        }
    }

    pub fn mutation(&self) -> &Arc<TableMutation> {
        &self.mutation
    }

    /// The table this statement writes.
    pub fn mutating_table_details(&self) -> &TableMapping {
        self.mutation.table()
    }

    pub fn table_name(&self) -> &str {
        self.mutation.table_name()
    }

    pub fn sql(&self) -> &str {
        self.mutation.sql()
    }

    pub fn expectation(&self) -> Expectation {
        self.mutation.expectation()
    }

    /// The live statement, if one has been prepared.
    pub fn statement(&self) -> Option<&dyn Statement> {
        self.statement.as_deref()
    }

    /// Mutable access to the live statement, if one has been prepared.
    pub fn statement_mut(&mut self) -> Option<&mut (dyn Statement + 'static)> {
        self.statement.as_deref_mut()
    }

    pub fn is_active(&self) -> bool {
        self.statement.is_some()
    }

    /// Return the live statement, preparing it first if necessary.
    pub fn resolve_statement(
        &mut self,
        jdbc: &JdbcCoordinator<'_>,
    ) -> Result<&mut (dyn Statement + 'static)> {
        let statement = match self.statement.take() {
            Some(statement) => statement,
            None => {
                tracing::debug!(
                    table = self.mutation.table_name(),
                    callable = self.mutation.is_callable(),
                    "Preparing statement for table"
                );
                jdbc.prepare_statement(
                    self.mutation.sql(),
                    self.mutation.is_callable(),
                    GeneratedKeys::None,
                )?
            }
        };
        Ok(&mut **self.statement.insert(statement))
    }

    /// Close the live statement, if any.
    ///
    /// The handle is dropped from these details before closing, so a
    /// second call is a no-op even when closing failed.
    pub fn release_statement(&mut self, jdbc: &JdbcCoordinator<'_>) -> Result<()> {
        match self.statement.take() {
            Some(statement) => jdbc.release_statement(statement),
            None => Ok(()),
        }
    }

    /// Whether the live statement is a callable statement.
    ///
    /// Before the statement is prepared this reports how it will be prepared.
    pub fn is_callable(&self) -> bool {
        self.statement
            .as_deref()
            .map_or(self.mutation.is_callable(), |s| s.is_callable())
    }

    /// Whether the statement must be closed right after each execution
    /// instead of being kept for the rest of the mutation.
    pub fn to_release(&self) -> bool {
        self.to_release
    }

    pub fn set_to_release(&mut self, to_release: bool) {
        self.to_release = to_release;
    }
}

impl fmt::Debug for PreparedStatementDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatementDetails")
            .field("table", &self.mutation.table_name())
            .field("sql", &self.mutation.sql())
            .field("active", &self.statement.is_some())
            .field("to_release", &self.to_release)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MutationSettings;
    use crate::mock::MockConnection;
    use sqlflush_core::{Dialect, MutationType, ParameterUsage};

    fn details() -> PreparedStatementDetails {
        let table = Arc::new(TableMapping::new("person", &["id"]));
        PreparedStatementDetails::new(Arc::new(TableMutation::insert(
            Dialect::Sqlite,
            table,
            &["id", "name"],
        )))
    }

    #[test]
    fn peek_does_not_prepare() {
        let conn = MockConnection::new(Dialect::Sqlite);
        let d = details();
        assert!(d.statement().is_none());
        assert!(conn.prepared().is_empty());
    }

    #[test]
    fn resolve_is_idempotent() {
        let conn = MockConnection::new(Dialect::Sqlite);
        let jdbc = JdbcCoordinator::new(&conn, MutationSettings::default());
        let mut d = details();

        let first = d.resolve_statement(&jdbc).unwrap() as *const dyn Statement;
        let second = d.resolve_statement(&jdbc).unwrap() as *const dyn Statement;
        assert!(std::ptr::addr_eq(first, second));
        assert_eq!(conn.prepared().len(), 1);
        assert!(d.statement().is_some());

        d.release_statement(&jdbc).unwrap();
    }

    #[test]
    fn release_without_statement_is_noop() {
        let conn = MockConnection::new(Dialect::Sqlite);
        let jdbc = JdbcCoordinator::new(&conn, MutationSettings::default());
        let mut d = details();
        d.release_statement(&jdbc).unwrap();
        assert!(conn.closed().is_empty());
    }

    #[test]
    fn release_twice_closes_once() {
        let conn = MockConnection::new(Dialect::Sqlite);
        let jdbc = JdbcCoordinator::new(&conn, MutationSettings::default());
        let mut d = details();
        d.resolve_statement(&jdbc).unwrap();
        d.release_statement(&jdbc).unwrap();
        d.release_statement(&jdbc).unwrap();
        assert_eq!(conn.closed().len(), 1);
        assert_eq!(jdbc.open_statements(), 0);
    }

    #[test]
    fn callable_statements_are_released_per_execution() {
        let table = Arc::new(TableMapping::new("person", &["id"]));
        let d = PreparedStatementDetails::new(Arc::new(TableMutation::custom(
            table,
            MutationType::Delete,
            "{call delete_person(?)}",
            true,
            Expectation::one_row(),
            &[("id", ParameterUsage::Restrict)],
        )));
        assert!(d.is_callable());
        assert!(d.to_release());
        assert!(!details().to_release());
    }
}
