//! The statements of one logical mutation, one per table.

use crate::jdbc::JdbcCoordinator;
use crate::operation::MutationOperationGroup;
use crate::statement::PreparedStatementDetails;
use sqlflush_core::{Error, ReleaseError, Result};
use std::sync::Arc;

/// Per-mutation collection of [`PreparedStatementDetails`], keyed by table.
///
/// Details are created on demand and kept in creation order. Tables of the
/// operation group that were never resolved have no details at all.
#[derive(Debug)]
pub struct PreparedStatementGroup {
    operations: Arc<MutationOperationGroup>,
    details: Vec<PreparedStatementDetails>,
}

impl PreparedStatementGroup {
    pub fn new(operations: Arc<MutationOperationGroup>) -> Self {
        Self {
            operations,
            details: Vec::new(),
        }
    }

    pub fn operations(&self) -> &Arc<MutationOperationGroup> {
        &self.operations
    }

    /// Details for `table`, created from the table's operation if absent.
    pub fn resolve_prepared_statement_details(
        &mut self,
        table: &str,
    ) -> Result<&mut PreparedStatementDetails> {
        let index = match self.details.iter().position(|d| d.table_name() == table) {
            Some(index) => index,
            None => {
                let operation = self.operations.operation(table).ok_or_else(|| {
                    Error::illegal_state(format!(
                        "no {} operation for table `{}` on `{}`",
                        self.operations.mutation_type(),
                        table,
                        self.operations.target().role_path()
                    ))
                })?;
                self.details
                    .push(PreparedStatementDetails::new(Arc::clone(operation)));
                self.details.len() - 1
            }
        };
        Ok(&mut self.details[index])
    }

    /// Details for `table`, if already resolved.
    pub fn get_prepared_statement_details(&self, table: &str) -> Option<&PreparedStatementDetails> {
        self.details.iter().find(|d| d.table_name() == table)
    }

    pub fn get_prepared_statement_details_mut(
        &mut self,
        table: &str,
    ) -> Option<&mut PreparedStatementDetails> {
        self.details.iter_mut().find(|d| d.table_name() == table)
    }

    /// Visit every resolved `(table, details)` pair in creation order.
    pub fn for_each_statement<F>(&self, mut action: F)
    where
        F: FnMut(&str, &PreparedStatementDetails),
    {
        for details in &self.details {
            action(details.table_name(), details);
        }
    }

    /// Number of table slots the group knows about.
    pub fn number_of_statements(&self) -> usize {
        self.operations.number_of_operations()
    }

    /// Number of details holding a live statement.
    pub fn number_of_active_statements(&self) -> usize {
        self.details.iter().filter(|d| d.is_active()).count()
    }

    /// The details of the only active statement.
    ///
    /// Asking for "the" statement of a group holding zero or several live
    /// statements is a programming error. Resolved details whose statement
    /// was never prepared, or was already released, do not count.
    pub fn single_statement_details(&mut self) -> Result<&mut PreparedStatementDetails> {
        let mut active = self.details.iter_mut().filter(|d| d.is_active());
        match (active.next(), active.next()) {
            (Some(only), None) => Ok(only),
            (first, second) => Err(Error::illegal_state(format!(
                "expected exactly one active statement for `{}`, found {}",
                self.operations.target().role_path(),
                usize::from(first.is_some()) + usize::from(second.is_some()) + active.count()
            ))),
        }
    }

    /// Whether any resolved details satisfy `predicate`.
    pub fn has_matching<P>(&self, predicate: P) -> bool
    where
        P: FnMut(&PreparedStatementDetails) -> bool,
    {
        self.details.iter().any(predicate)
    }

    /// Release every live statement.
    ///
    /// Keeps going past failures and reports them together as
    /// [`Error::Release`]. Calling it again is a no-op.
    pub fn release(&mut self, jdbc: &JdbcCoordinator<'_>) -> Result<()> {
        let mut failures = Vec::new();
        for details in &mut self.details {
            if let Err(e) = details.release_statement(jdbc) {
                tracing::warn!(table = details.table_name(), error = %e, "Statement release failed");
                failures.push(e);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Release(ReleaseError { failures }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MutationSettings;
    use crate::mock::MockConnection;
    use crate::operation::{MutationTarget, TableMutation};
    use sqlflush_core::{Dialect, MutationType, TableMapping};

    fn two_table_group() -> Arc<MutationOperationGroup> {
        let a = Arc::new(TableMapping::new("a", &["id"]).identifier_table(true));
        let b = Arc::new(TableMapping::new("b", &["id"]).optional(true));
        let target = Arc::new(MutationTarget::new("Thing", vec![Arc::clone(&a), Arc::clone(&b)]));
        Arc::new(
            MutationOperationGroup::new(MutationType::Insert, target)
                .with_operation(TableMutation::insert(Dialect::Sqlite, a, &["id", "x"]))
                .with_operation(TableMutation::insert(Dialect::Sqlite, b, &["id", "y"])),
        )
    }

    #[test]
    fn resolve_returns_same_details() {
        let mut group = PreparedStatementGroup::new(two_table_group());
        let first = group.resolve_prepared_statement_details("a").unwrap() as *const _;
        let second = group.resolve_prepared_statement_details("a").unwrap() as *const _;
        assert_eq!(first, second);
        assert!(group.resolve_prepared_statement_details("nope").is_err());
    }

    #[test]
    fn lazy_creation_only_for_resolved_tables() {
        let conn = MockConnection::new(Dialect::Sqlite);
        let jdbc = JdbcCoordinator::new(&conn, MutationSettings::default());
        let mut group = PreparedStatementGroup::new(two_table_group());

        group
            .resolve_prepared_statement_details("a")
            .unwrap()
            .resolve_statement(&jdbc)
            .unwrap();

        assert_eq!(group.number_of_statements(), 2);
        assert_eq!(group.number_of_active_statements(), 1);
        assert!(group.get_prepared_statement_details("b").is_none());

        group.release(&jdbc).unwrap();
    }

    #[test]
    fn single_statement_details_requires_exactly_one_active() {
        let conn = MockConnection::new(Dialect::Sqlite);
        let jdbc = JdbcCoordinator::new(&conn, MutationSettings::default());
        let mut group = PreparedStatementGroup::new(two_table_group());
        assert!(matches!(
            group.single_statement_details(),
            Err(Error::IllegalState(_))
        ));

        group.resolve_prepared_statement_details("a").unwrap();
        assert!(matches!(
            group.single_statement_details(),
            Err(Error::IllegalState(_))
        ));

        group
            .resolve_prepared_statement_details("a")
            .unwrap()
            .resolve_statement(&jdbc)
            .unwrap();
        group.resolve_prepared_statement_details("b").unwrap();
        assert_eq!(group.single_statement_details().unwrap().table_name(), "a");

        group
            .resolve_prepared_statement_details("b")
            .unwrap()
            .resolve_statement(&jdbc)
            .unwrap();
        let err = group.single_statement_details().unwrap_err();
        assert!(err.to_string().contains("found 2"));

        group
            .resolve_prepared_statement_details("a")
            .unwrap()
            .release_statement(&jdbc)
            .unwrap();
        assert_eq!(group.single_statement_details().unwrap().table_name(), "b");

        group.release(&jdbc).unwrap();
    }

    #[test]
    fn release_is_idempotent() {
        let conn = MockConnection::new(Dialect::Sqlite);
        let jdbc = JdbcCoordinator::new(&conn, MutationSettings::default());
        let mut group = PreparedStatementGroup::new(two_table_group());
        for table in ["a", "b"] {
            group
                .resolve_prepared_statement_details(table)
                .unwrap()
                .resolve_statement(&jdbc)
                .unwrap();
        }

        group.release(&jdbc).unwrap();
        group.release(&jdbc).unwrap();

        assert_eq!(conn.closed().len(), 2);
        assert_eq!(group.number_of_active_statements(), 0);
        assert_eq!(jdbc.open_statements(), 0);
    }

    #[test]
    fn release_continues_past_failures() {
        let conn = MockConnection::new(Dialect::Sqlite);
        conn.fail_close("\"a\"");
        let jdbc = JdbcCoordinator::new(&conn, MutationSettings::default());
        let mut group = PreparedStatementGroup::new(two_table_group());
        for table in ["a", "b"] {
            group
                .resolve_prepared_statement_details(table)
                .unwrap()
                .resolve_statement(&jdbc)
                .unwrap();
        }

        let err = group.release(&jdbc).unwrap_err();
        match err {
            Error::Release(r) => assert_eq!(r.failures.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
        assert!(conn.closed().iter().any(|sql| sql.contains("\"b\"")));
        assert_eq!(group.number_of_active_statements(), 0);
    }

    #[test]
    fn has_matching_and_visit_order() {
        let mut group = PreparedStatementGroup::new(two_table_group());
        group.resolve_prepared_statement_details("b").unwrap();
        group.resolve_prepared_statement_details("a").unwrap();

        let mut seen = Vec::new();
        group.for_each_statement(|table, _| seen.push(table.to_string()));
        assert_eq!(seen, vec!["b", "a"]);
        assert!(group.has_matching(|d| d.mutating_table_details().is_optional()));
        assert!(!group.has_matching(|d| d.is_active()));
    }
}
