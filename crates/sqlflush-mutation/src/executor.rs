//! Execution of one logical mutation across its tables.
//!
//! [`MutationExecutorService::create_executor`] picks an execution strategy
//! once per mutation. The returned [`MutationExecutor`] collects the bound
//! values, runs (or batches) every included table's statement in the order
//! the operation group supplies, verifies row counts, translates driver
//! failures once and releases every statement it prepared.

use crate::batch::BatchKey;
use crate::identity::{Binder, perform_insert_untranslated};
use crate::jdbc::{JdbcCoordinator, JdbcSession, release_on_exit};
use crate::operation::{MutationOperationGroup, TableMutation};
use crate::statement::PreparedStatementDetails;
use crate::statement_group::PreparedStatementGroup;
use crate::value_bindings::JdbcValueBindings;
use sqlflush_core::{Error, MutationType, ParameterUsage, Result, Statement, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Further restricts which tables take part in a mutation.
pub trait TableInclusionChecker {
    fn include_table(&self, mutation: &TableMutation) -> bool;
}

impl<F> TableInclusionChecker for F
where
    F: Fn(&TableMutation) -> bool,
{
    fn include_table(&self, mutation: &TableMutation) -> bool {
        self(mutation)
    }
}

/// Inspects a statement's affected row count before it is verified.
///
/// Returning `false` suppresses the expectation check for that statement.
pub trait OperationResultChecker {
    fn check(
        &self,
        details: &PreparedStatementDetails,
        affected_rows: u64,
        batch_position: Option<usize>,
    ) -> bool;
}

impl<F> OperationResultChecker for F
where
    F: Fn(&PreparedStatementDetails, u64, Option<usize>) -> bool,
{
    fn check(
        &self,
        details: &PreparedStatementDetails,
        affected_rows: u64,
        batch_position: Option<usize>,
    ) -> bool {
        self(details, affected_rows, batch_position)
    }
}

/// How an executor runs its statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Every included table, one statement each, executed immediately.
    Standard,
    /// Exactly one table, executed immediately.
    SingleNonBatched,
    /// Rows queued in the session's batch.
    Batched,
    /// Identity insert first, then the remaining tables with the new key.
    PostInsert,
}

/// One table's outcome within a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOutcome {
    pub table: String,
    /// Affected rows, or `None` when the row was queued in a batch.
    pub affected_rows: Option<u64>,
}

/// What a mutation reports back to the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationResult {
    generated_id: Option<Value>,
    tables: Vec<TableOutcome>,
}

impl MutationResult {
    /// The identifier generated by an identity insert.
    pub fn generated_id(&self) -> Option<&Value> {
        self.generated_id.as_ref()
    }

    /// Tables that took part, in execution order.
    pub fn tables(&self) -> &[TableOutcome] {
        &self.tables
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.table.as_str()).collect()
    }

    /// Whether any table was queued rather than executed.
    pub fn is_batched(&self) -> bool {
        self.tables.iter().any(|t| t.affected_rows.is_none())
    }

    fn record(&mut self, table: &str, affected_rows: Option<u64>) {
        self.tables.push(TableOutcome {
            table: table.to_string(),
            affected_rows,
        });
    }
}

#[derive(Debug)]
enum Strategy {
    Standard,
    SingleNonBatched,
    Batched(BatchKey),
    PostInsert {
        identity: Arc<TableMutation>,
        remaining: Arc<MutationOperationGroup>,
    },
}

/// Creates executors for logical mutations.
#[derive(Debug, Clone, Copy, Default)]
pub struct MutationExecutorService;

impl MutationExecutorService {
    pub fn new() -> Self {
        Self
    }

    /// Choose the execution strategy for `operations`.
    ///
    /// Identity inserts run post-insert and are never batched, remaining
    /// tables included; a batch key with batching enabled and a batchable
    /// group queues rows; a single table takes the single-statement path;
    /// anything else runs table by table.
    pub fn create_executor(
        &self,
        batch_key: Option<BatchKey>,
        operations: Arc<MutationOperationGroup>,
        session: &JdbcSession<'_>,
    ) -> MutationExecutor {
        let settings = session.settings();
        let batching = settings.is_batching_enabled();

        let strategy = if let Some(identity) = operations.identity_operation() {
            let identity = Arc::clone(identity);
            let remaining = Arc::new(operations.without_table(identity.table_name()));
            Strategy::PostInsert { identity, remaining }
        } else {
            match batch_key {
                Some(key) if batching && operations.is_batchable(settings) => Strategy::Batched(key),
                _ if operations.number_of_operations() == 1 => Strategy::SingleNonBatched,
                _ => Strategy::Standard,
            }
        };

        let statements = match &strategy {
            Strategy::PostInsert { remaining, .. } => {
                PreparedStatementGroup::new(Arc::clone(remaining))
            }
            _ => PreparedStatementGroup::new(Arc::clone(&operations)),
        };

        let executor = MutationExecutor {
            bindings: JdbcValueBindings::new(Arc::clone(&operations)),
            operations,
            strategy,
            statements,
        };
        tracing::debug!(
            role = executor.operations.target().role_path(),
            mutation = %executor.operations.mutation_type(),
            kind = ?executor.kind(),
            "Created mutation executor"
        );
        executor
    }
}

/// Executes one logical mutation.
#[derive(Debug)]
pub struct MutationExecutor {
    operations: Arc<MutationOperationGroup>,
    strategy: Strategy,
    bindings: JdbcValueBindings,
    statements: PreparedStatementGroup,
}

impl MutationExecutor {
    pub fn kind(&self) -> ExecutorKind {
        match self.strategy {
            Strategy::Standard => ExecutorKind::Standard,
            Strategy::SingleNonBatched => ExecutorKind::SingleNonBatched,
            Strategy::Batched(_) => ExecutorKind::Batched,
            Strategy::PostInsert { .. } => ExecutorKind::PostInsert,
        }
    }

    pub fn operations(&self) -> &Arc<MutationOperationGroup> {
        &self.operations
    }

    /// The statements this executor prepared and still holds.
    pub fn statement_group(&self) -> &PreparedStatementGroup {
        &self.statements
    }

    pub fn value_bindings(&self) -> &JdbcValueBindings {
        &self.bindings
    }

    pub fn value_bindings_mut(&mut self) -> &mut JdbcValueBindings {
        &mut self.bindings
    }

    /// Bind one value; see [`JdbcValueBindings::bind_value`].
    pub fn bind_value(
        &mut self,
        value: impl Into<Value>,
        table: &str,
        column: &str,
        usage: ParameterUsage,
    ) -> Result<()> {
        self.bindings.bind_value(value, table, column, usage)
    }

    /// Run the mutation.
    ///
    /// Statements executed here are released before returning, on success
    /// and on failure. Each driver failure is translated exactly once and
    /// carries the statement SQL and a description of `entity`.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(
            role = self.operations.target().role_path(),
            mutation = %self.operations.mutation_type(),
            kind = ?self.kind()
        )
    )]
    pub fn execute(
        &mut self,
        session: &mut JdbcSession<'_>,
        entity: &dyn fmt::Debug,
        inclusion: Option<&dyn TableInclusionChecker>,
        result_checker: Option<&dyn OperationResultChecker>,
    ) -> Result<MutationResult> {
        match &self.strategy {
            Strategy::Batched(key) => {
                let key = key.clone();
                let operations = Arc::clone(&self.operations);
                self.queue_in_batch(session, &key, &operations, inclusion)
            }
            Strategy::PostInsert { identity, remaining } => {
                let identity = Arc::clone(identity);
                let remaining = Arc::clone(remaining);
                self.execute_post_insert(
                    session,
                    entity,
                    &identity,
                    &remaining,
                    inclusion,
                    result_checker,
                )
            }
            Strategy::SingleNonBatched => {
                session.execute_batch()?;
                let mut result = MutationResult::default();
                let outcome = self.execute_single(session.jdbc(), entity, inclusion, result_checker, &mut result);
                release_on_exit(outcome, self.statements.release(session.jdbc()))?;
                Ok(result)
            }
            Strategy::Standard => {
                session.execute_batch()?;
                let mut result = MutationResult::default();
                let operations = Arc::clone(&self.operations);
                let outcome = self.execute_each(
                    session.jdbc(),
                    &operations,
                    entity,
                    inclusion,
                    result_checker,
                    &mut result,
                );
                release_on_exit(outcome, self.statements.release(session.jdbc()))?;
                Ok(result)
            }
        }
    }

    /// Release every statement this executor still holds.
    ///
    /// Safe to call more than once.
    pub fn release(&mut self, session: &JdbcSession<'_>) -> Result<()> {
        self.statements.release(session.jdbc())
    }

    /// Whether `operation` takes part in this mutation.
    ///
    /// An update of an optional table whose row does not exist affects no
    /// rows and is accepted. Inserting the missing row instead is the job
    /// of the coordinator above this layer.
    fn includes(&self, operation: &TableMutation, inclusion: Option<&dyn TableInclusionChecker>) -> bool {
        let table = operation.table_name();
        let by_default = match operation.mutation_type() {
            MutationType::Insert => {
                !operation.table().is_optional()
                    || self
                        .bindings
                        .has_non_null_set_values(table, operation.table().key_columns())
            }
            MutationType::Update => self.bindings.has_set_values(table),
            MutationType::Delete => true,
        };
        by_default && inclusion.is_none_or(|checker| checker.include_table(operation))
    }

    fn execute_single(
        &mut self,
        jdbc: &JdbcCoordinator<'_>,
        entity: &dyn fmt::Debug,
        inclusion: Option<&dyn TableInclusionChecker>,
        result_checker: Option<&dyn OperationResultChecker>,
        result: &mut MutationResult,
    ) -> Result<()> {
        let operation = self.operations.single_operation().cloned().ok_or_else(|| {
            Error::illegal_state(format!(
                "single-table executor for `{}` has {} operations",
                self.operations.target().role_path(),
                self.operations.number_of_operations()
            ))
        })?;
        let table = operation.table_name();
        if !self.includes(&operation, inclusion) {
            tracing::debug!(table = table, "Skipping excluded table");
            self.bindings.after_statement(table);
            return Ok(());
        }

        let details = self.statements.resolve_prepared_statement_details(table)?;
        if let Err(e) = details.resolve_statement(jdbc) {
            self.bindings.after_statement(table);
            return Err(translate(jdbc, e, &operation, entity));
        }
        let details = self.statements.single_statement_details()?;
        let rows = run_statement(jdbc, details, &self.bindings, result_checker);
        self.bindings.after_statement(table);
        let rows = rows.map_err(|e| translate(jdbc, e, &operation, entity))?;
        result.record(table, Some(rows));
        Ok(())
    }

    fn execute_each(
        &mut self,
        jdbc: &JdbcCoordinator<'_>,
        operations: &MutationOperationGroup,
        entity: &dyn fmt::Debug,
        inclusion: Option<&dyn TableInclusionChecker>,
        result_checker: Option<&dyn OperationResultChecker>,
        result: &mut MutationResult,
    ) -> Result<()> {
        for operation in operations.operations() {
            let table = operation.table_name();
            if !self.includes(operation, inclusion) {
                tracing::debug!(table = table, "Skipping excluded table");
                self.bindings.after_statement(table);
                continue;
            }

            let details = self.statements.resolve_prepared_statement_details(table)?;
            let rows = run_statement(jdbc, details, &self.bindings, result_checker);
            self.bindings.after_statement(table);
            let rows = rows.map_err(|e| translate(jdbc, e, operation, entity))?;
            result.record(table, Some(rows));
        }
        Ok(())
    }

    fn queue_in_batch(
        &mut self,
        session: &mut JdbcSession<'_>,
        key: &BatchKey,
        operations: &Arc<MutationOperationGroup>,
        inclusion: Option<&dyn TableInclusionChecker>,
    ) -> Result<MutationResult> {
        let included: HashSet<String> = operations
            .operations()
            .iter()
            .filter(|op| self.includes(op, inclusion))
            .map(|op| op.table_name().to_string())
            .collect();

        session.add_to_batch(key, operations, &mut self.bindings, &|op: &TableMutation| {
            included.contains(op.table_name())
        })?;

        let mut result = MutationResult::default();
        for operation in operations.operations() {
            if included.contains(operation.table_name()) {
                result.record(operation.table_name(), None);
            }
        }
        Ok(result)
    }

    fn execute_post_insert(
        &mut self,
        session: &mut JdbcSession<'_>,
        entity: &dyn fmt::Debug,
        identity: &TableMutation,
        remaining: &MutationOperationGroup,
        inclusion: Option<&dyn TableInclusionChecker>,
        result_checker: Option<&dyn OperationResultChecker>,
    ) -> Result<MutationResult> {
        session.execute_batch()?;

        let (delegate, insert) = identity.identity().ok_or_else(|| {
            Error::illegal_state(format!(
                "table `{}` is not an identity insert",
                identity.table_name()
            ))
        })?;
        let table = identity.table_name();

        let id = {
            let jdbc = session.jdbc();
            let binder = ValueBindingsBinder {
                bindings: &self.bindings,
                table,
                entity,
            };
            perform_insert_untranslated(delegate, jdbc, insert, &binder).map_err(|e| {
                jdbc.exception_helper().convert(
                    e,
                    &format!("could not execute identity insert for {entity:?}"),
                    insert.sql(),
                )
            })
        };
        self.bindings.after_statement(table);
        let id = id?;

        let mut result = MutationResult {
            generated_id: Some(id.clone()),
            tables: Vec::new(),
        };
        result.record(table, Some(1));

        for operation in remaining.operations() {
            for key_column in operation.table().key_columns() {
                self.bindings.bind_value(
                    id.clone(),
                    operation.table_name(),
                    key_column,
                    ParameterUsage::Set,
                )?;
            }
        }

        let outcome = self.execute_each(
            session.jdbc(),
            remaining,
            entity,
            inclusion,
            result_checker,
            &mut result,
        );
        release_on_exit(outcome, self.statements.release(session.jdbc()))?;
        Ok(result)
    }
}

/// Prepare, bind, execute and verify one table's statement.
fn run_statement(
    jdbc: &JdbcCoordinator<'_>,
    details: &mut PreparedStatementDetails,
    bindings: &JdbcValueBindings,
    result_checker: Option<&dyn OperationResultChecker>,
) -> Result<u64> {
    let result = execute_and_verify(jdbc, details, bindings, result_checker);
    if details.to_release() {
        return release_on_exit(result, details.release_statement(jdbc));
    }
    result
}

fn execute_and_verify(
    jdbc: &JdbcCoordinator<'_>,
    details: &mut PreparedStatementDetails,
    bindings: &JdbcValueBindings,
    result_checker: Option<&dyn OperationResultChecker>,
) -> Result<u64> {
    let mutation = Arc::clone(details.mutation());
    let expectation = mutation.expectation();
    let table = mutation.table_name();

    let statement = details.resolve_statement(jdbc)?;
    expectation.prepare(&mut *statement)?;
    bindings.before_statement(table, &mut *statement)?;
    let count = statement.execute_update()?;
    let rows = expectation.affected_rows(&*statement, count)?;
    tracing::debug!(table = table, rows = rows, "Executed statement");

    if !result_checker.is_none_or(|checker| checker.check(details, rows, None)) {
        return Ok(rows);
    }
    if mutation.table().is_optional() && rows == 0 {
        tracing::trace!(table = table, "Optional table matched no rows");
        return Ok(rows);
    }
    expectation.verify_outcome(rows, table, mutation.sql(), None)?;
    Ok(rows)
}

fn translate(
    jdbc: &JdbcCoordinator<'_>,
    error: Error,
    operation: &TableMutation,
    entity: &dyn fmt::Debug,
) -> Error {
    jdbc.exception_helper().convert(
        error,
        &format!(
            "Unable to execute {} against table `{}` for {:?}",
            operation.mutation_type(),
            operation.table_name(),
            entity
        ),
        operation.sql(),
    )
}

/// Binds the identity table's collected values onto the insert.
struct ValueBindingsBinder<'a> {
    bindings: &'a JdbcValueBindings,
    table: &'a str,
    entity: &'a dyn fmt::Debug,
}

impl Binder for ValueBindingsBinder<'_> {
    fn bind_values(&self, statement: &mut dyn Statement) -> Result<()> {
        self.bindings.before_statement(self.table, statement)
    }

    fn entity(&self) -> &dyn fmt::Debug {
        self.entity
    }
}
