//! JDBC batching of same-shaped mutations.

use crate::jdbc::JdbcCoordinator;
use crate::operation::MutationOperationGroup;
use crate::statement_group::PreparedStatementGroup;
use crate::value_bindings::JdbcValueBindings;
use sqlflush_core::{MutationType, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Groups logical mutations that may share one JDBC batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    identifier: String,
    mutation_type: MutationType,
}

impl BatchKey {
    pub fn new(identifier: impl Into<String>, mutation_type: MutationType) -> Self {
        Self {
            identifier: identifier.into(),
            mutation_type,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub const fn mutation_type(&self) -> MutationType {
        self.mutation_type
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.identifier, self.mutation_type)
    }
}

/// One in-flight batch: a statement group reused for every queued row.
///
/// Every row in a batch touches the same tables, the batch's
/// participation. A row with a different participation needs a new batch.
#[derive(Debug)]
pub struct Batch {
    key: BatchKey,
    fingerprint: u64,
    participation: Vec<String>,
    statements: PreparedStatementGroup,
    batch_size: usize,
    pending_rows: usize,
    /// Row index of each queued entry, per table.
    queued_rows: HashMap<String, Vec<usize>>,
}

impl Batch {
    pub fn new(
        key: BatchKey,
        operations: Arc<MutationOperationGroup>,
        participation: Vec<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            key,
            fingerprint: operations.sql_fingerprint(),
            participation,
            statements: PreparedStatementGroup::new(operations),
            batch_size: batch_size.max(1),
            pending_rows: 0,
            queued_rows: HashMap::new(),
        }
    }

    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Tables every queued row writes, in group order.
    pub fn participation(&self) -> &[String] {
        &self.participation
    }

    /// Whether a row for `key` touching `participation` can join this batch.
    pub fn accepts(&self, key: &BatchKey, fingerprint: u64, participation: &[String]) -> bool {
        self.key == *key && self.fingerprint == fingerprint && self.participation == participation
    }

    /// Rows queued and not yet executed.
    pub fn pending_rows(&self) -> usize {
        self.pending_rows
    }

    pub fn statement_group(&self) -> &PreparedStatementGroup {
        &self.statements
    }

    /// Queue one row: bind and `add_batch` every participating table.
    ///
    /// Executes the batch once `batch_size` rows are queued. Driver errors
    /// come back already translated.
    pub fn add_to_batch(
        &mut self,
        jdbc: &JdbcCoordinator<'_>,
        bindings: &mut JdbcValueBindings,
    ) -> Result<()> {
        let row = self.pending_rows;
        let operations = Arc::clone(self.statements.operations());
        for operation in operations.operations() {
            let table = operation.table_name();
            if !self.participation.iter().any(|t| t == table) {
                tracing::trace!(table = table, "Skipping table for batch row");
                bindings.after_statement(table);
                continue;
            }

            let details = self.statements.resolve_prepared_statement_details(table)?;
            let queued = details.resolve_statement(jdbc).and_then(|statement| {
                bindings.before_statement(table, statement)?;
                statement.add_batch()
            });
            bindings.after_statement(table);
            queued.map_err(|e| {
                jdbc.exception_helper().convert(
                    e,
                    &format!("could not add row to batch `{}` for table `{}`", self.key, table),
                    operation.sql(),
                )
            })?;
            self.queued_rows.entry(table.to_string()).or_default().push(row);
        }

        self.pending_rows += 1;
        tracing::trace!(key = %self.key, rows = self.pending_rows, "Added row to batch");

        if self.pending_rows >= self.batch_size {
            self.execute(jdbc)?;
        }
        Ok(())
    }

    /// Execute every queued row and verify per-row counts.
    #[tracing::instrument(level = "debug", skip(self, jdbc), fields(key = %self.key, rows = self.pending_rows))]
    pub fn execute(&mut self, jdbc: &JdbcCoordinator<'_>) -> Result<()> {
        if self.pending_rows == 0 {
            return Ok(());
        }
        self.pending_rows = 0;
        let mut queued_rows = std::mem::take(&mut self.queued_rows);

        let operations = Arc::clone(self.statements.operations());
        for operation in operations.operations() {
            let Some(details) = self
                .statements
                .get_prepared_statement_details_mut(operation.table_name())
            else {
                continue;
            };
            let Some(statement) = details.statement_mut() else {
                continue;
            };

            let counts = statement.execute_batch().map_err(|e| {
                jdbc.exception_helper().convert(
                    e,
                    &format!("could not execute batch for `{}`", self.key),
                    operation.sql(),
                )
            })?;
            tracing::debug!(
                table = operation.table_name(),
                entries = counts.len(),
                "Executed batch statement"
            );

            let rows = queued_rows.remove(operation.table_name()).unwrap_or_default();
            let optional = operation.table().is_optional();
            for (entry, count) in counts.into_iter().enumerate() {
                if optional && count == 0 {
                    continue;
                }
                let position = rows.get(entry).copied().unwrap_or(entry);
                operation.expectation().verify_outcome(
                    count,
                    operation.table_name(),
                    operation.sql(),
                    Some(position),
                )?;
            }
        }
        Ok(())
    }

    /// Release every statement the batch prepared.
    pub fn release(&mut self, jdbc: &JdbcCoordinator<'_>) -> Result<()> {
        self.statements.release(jdbc)
    }
}
