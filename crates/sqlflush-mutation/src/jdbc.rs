//! Session-side JDBC coordination.
//!
//! [`JdbcCoordinator`] prepares and releases statements on a borrowed
//! connection and counts what is still open. [`JdbcSession`] adds the
//! in-flight batch. [`SqlExceptionHelper`] turns driver failures into
//! dialect-normalized errors at operation boundaries.

use crate::batch::{Batch, BatchKey};
use crate::config::MutationSettings;
use crate::operation::{MutationOperationGroup, TableMutation};
use crate::value_bindings::JdbcValueBindings;
use sqlflush_core::{
    Connection, Dialect, Error, GeneratedKeys, QueryError, Result, Statement,
};
use std::cell::Cell;
use std::sync::Arc;

/// Combine a primary result with the result of releasing resources.
///
/// A release failure never replaces a primary failure; it is logged and
/// dropped. When the primary path succeeded the release failure is returned.
pub fn release_on_exit<T>(result: Result<T>, release: Result<()>) -> Result<T> {
    match (result, release) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(release_err)) => Err(release_err),
        (Err(primary), Ok(())) => Err(primary),
        (Err(primary), Err(release_err)) => {
            tracing::warn!(
                error = %release_err,
                primary = %primary,
                "Suppressed release failure during error handling"
            );
            Err(primary)
        }
    }
}

/// Converts driver errors into dialect-normalized errors.
#[derive(Debug, Clone, Copy)]
pub struct SqlExceptionHelper {
    dialect: Dialect,
}

impl SqlExceptionHelper {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Convert a driver error raised while running `sql`.
    ///
    /// Query errors get the operation description prepended, the statement
    /// text attached, a kind derived from the SQLSTATE class and, when the
    /// dialect recognizes it, the violated constraint name. Everything else
    /// passes through untouched.
    pub fn convert(&self, error: Error, description: &str, sql: &str) -> Error {
        let Error::Query(q) = error else {
            return error;
        };

        let kind = q
            .sqlstate
            .as_deref()
            .and_then(|state| self.dialect.classify_sqlstate(state))
            .unwrap_or(q.kind);
        let constraint = q
            .constraint
            .or_else(|| self.dialect.extract_constraint_name(&q.message));

        tracing::debug!(
            dialect = self.dialect.name(),
            sqlstate = ?q.sqlstate,
            kind = ?kind,
            sql = sql,
            "Translating driver error"
        );

        Error::Query(QueryError {
            kind,
            sql: Some(sql.to_string()),
            sqlstate: q.sqlstate,
            message: format!("{description}: {}", q.message),
            detail: q.detail,
            constraint,
            source: q.source,
        })
    }
}

/// Prepares and releases statements on a borrowed connection.
pub struct JdbcCoordinator<'c> {
    connection: &'c dyn Connection,
    settings: MutationSettings,
    open_statements: Cell<usize>,
}

impl<'c> JdbcCoordinator<'c> {
    pub fn new(connection: &'c dyn Connection, settings: MutationSettings) -> Self {
        Self {
            connection,
            settings,
            open_statements: Cell::new(0),
        }
    }

    pub fn connection(&self) -> &'c dyn Connection {
        self.connection
    }

    pub fn dialect(&self) -> Dialect {
        self.connection.dialect()
    }

    pub fn settings(&self) -> &MutationSettings {
        &self.settings
    }

    pub fn exception_helper(&self) -> SqlExceptionHelper {
        SqlExceptionHelper::new(self.dialect())
    }

    /// Prepare a statement and apply the configured query timeout.
    pub fn prepare_statement(
        &self,
        sql: &str,
        callable: bool,
        keys: GeneratedKeys,
    ) -> Result<Box<dyn Statement>> {
        if self.settings.log_sql {
            tracing::debug!(sql = sql, callable = callable, "Preparing statement");
        }

        let mut statement = if callable {
            self.connection.prepare_call(sql)?
        } else {
            self.connection.prepare(sql, keys)?
        };
        self.open_statements.set(self.open_statements.get() + 1);

        if let Some(timeout) = self.settings.timeout() {
            if let Err(e) = statement.set_query_timeout(timeout) {
                return release_on_exit(Err(e), self.release_statement(statement));
            }
        }
        Ok(statement)
    }

    /// Close a statement this coordinator prepared.
    pub fn release_statement(&self, mut statement: Box<dyn Statement>) -> Result<()> {
        self.open_statements
            .set(self.open_statements.get().saturating_sub(1));
        tracing::trace!(sql = statement.sql(), "Releasing statement");
        statement.close()
    }

    /// Statements prepared here and not released yet.
    pub fn open_statements(&self) -> usize {
        self.open_statements.get()
    }
}

impl std::fmt::Debug for JdbcCoordinator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JdbcCoordinator")
            .field("dialect", &self.dialect())
            .field("settings", &self.settings)
            .field("open_statements", &self.open_statements.get())
            .finish()
    }
}

/// The JDBC side of one session: coordinator plus the in-flight batch.
///
/// A session holds at most one batch. Asking for a batch under a different
/// key, or for a different statement shape, executes the current one first.
#[derive(Debug)]
pub struct JdbcSession<'c> {
    jdbc: JdbcCoordinator<'c>,
    batch: Option<Batch>,
}

impl<'c> JdbcSession<'c> {
    pub fn new(connection: &'c dyn Connection, settings: MutationSettings) -> Self {
        Self {
            jdbc: JdbcCoordinator::new(connection, settings),
            batch: None,
        }
    }

    pub fn jdbc(&self) -> &JdbcCoordinator<'c> {
        &self.jdbc
    }

    pub fn settings(&self) -> &MutationSettings {
        self.jdbc.settings()
    }

    pub fn dialect(&self) -> Dialect {
        self.jdbc.dialect()
    }

    /// Statements prepared and not released, including batched ones.
    pub fn open_statements(&self) -> usize {
        self.jdbc.open_statements()
    }

    /// The in-flight batch, if any.
    pub fn current_batch(&self) -> Option<&Batch> {
        self.batch.as_ref()
    }

    /// Queue one row of `operations` in the batch for `key`.
    ///
    /// `include` decides which tables the row writes. A row whose key,
    /// statements or set of written tables differs from the in-flight
    /// batch executes that batch first and starts a new one.
    ///
    /// Any failure aborts the batch: its statements are released and the
    /// queued rows are discarded.
    #[tracing::instrument(level = "debug", skip(self, operations, bindings, include))]
    pub fn add_to_batch(
        &mut self,
        key: &BatchKey,
        operations: &Arc<MutationOperationGroup>,
        bindings: &mut JdbcValueBindings,
        include: &dyn Fn(&TableMutation) -> bool,
    ) -> Result<()> {
        let fingerprint = operations.sql_fingerprint();
        let participation: Vec<String> = operations
            .operations()
            .iter()
            .filter(|op| include(op))
            .map(|op| op.table_name().to_string())
            .collect();
        let stale = self
            .batch
            .as_ref()
            .is_some_and(|b| !b.accepts(key, fingerprint, &participation));
        if stale {
            tracing::debug!("Batch key or shape changed, executing in-flight batch");
            self.execute_batch()?;
        }

        let batch_size = self.jdbc.settings().batch_size;
        let jdbc = &self.jdbc;
        let batch = self.batch.get_or_insert_with(|| {
            Batch::new(key.clone(), Arc::clone(operations), participation, batch_size)
        });

        let result = batch.add_to_batch(jdbc, bindings);
        if result.is_err() {
            return release_on_exit(result, self.abort_batch());
        }
        result
    }

    /// Execute and release the in-flight batch.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn execute_batch(&mut self) -> Result<()> {
        let Some(mut batch) = self.batch.take() else {
            return Ok(());
        };
        let result = batch.execute(&self.jdbc);
        release_on_exit(result, batch.release(&self.jdbc))
    }

    /// Release the in-flight batch without executing queued rows.
    pub fn abort_batch(&mut self) -> Result<()> {
        let Some(mut batch) = self.batch.take() else {
            return Ok(());
        };
        if batch.pending_rows() > 0 {
            tracing::warn!(
                key = %batch.key(),
                rows = batch.pending_rows(),
                "Discarding queued batch rows"
            );
        }
        batch.release(&self.jdbc)
    }
}

impl Drop for JdbcSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.abort_batch() {
            tracing::warn!(error = %e, "Failed to release batch on session drop");
        }
        let open = self.jdbc.open_statements();
        if open > 0 {
            tracing::warn!(open = open, "Session dropped with unreleased statements");
        }
    }
}
