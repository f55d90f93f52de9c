//! sqlflush - multi-table mutation execution for Rust ORMs.
//!
//! sqlflush is the layer between an ORM's flush and the database driver. It
//! takes the per-table statements of one entity mutation and runs them:
//!
//! - Binds values per table, sorted by parameter position
//! - Skips secondary tables that have nothing to write
//! - Verifies row counts and reports stale state
//! - Batches same-shaped mutations across entities
//! - Inserts rows with database-generated keys and reads the key back
//! - Releases every prepared statement on every exit path
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlflush::prelude::*;
//! use std::sync::Arc;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("create table person (id integer primary key, name text)")?;
//!
//! let person = Arc::new(TableMapping::new("person", &["id"]).identifier_table(true));
//! let target = Arc::new(MutationTarget::new("Person", vec![Arc::clone(&person)]).with_identity_column("id"));
//! let group = Arc::new(
//!     MutationOperationGroup::new(MutationType::Insert, target).with_operation(
//!         TableMutation::identity_insert(
//!             IdentityDelegate::for_dialect(Dialect::Sqlite, "person", "id"),
//!             person,
//!             &["name"],
//!         ),
//!     ),
//! );
//!
//! let mut session = JdbcSession::new(&conn, MutationSettings::default());
//! let mut executor = MutationExecutorService::new().create_executor(None, group, &session);
//! executor.bind_value("Ann", "person", "name", ParameterUsage::Set)?;
//! let result = executor.execute(&mut session, &"Ann", None, None)?;
//! let id = result.generated_id();
//! ```
//!
//! # Crates
//!
//! - `sqlflush-core`: driver traits, dialects, table mappings, values, errors
//! - `sqlflush-mutation`: bindings, statement groups, batching, identity
//!   delegates and executors
//! - `sqlflush-sqlite`: SQLite driver (feature `sqlite`, on by default)

pub use sqlflush_core::{
    ColumnInfo, ConfigError, Connection, ConnectionError, ConnectionErrorKind, Dialect, Error,
    FromValue, GeneratedKeys, IdentifierError, IdentityStrategy, MutationType, ParameterUsage,
    QueryError, QueryErrorKind, ReleaseError, Result, Row, StaleStateError, Statement,
    TableMapping, TypeError, UnknownParameterError, Value,
};
pub use sqlflush_mutation::{
    BasicSelectingDelegate, Batch, BatchKey, Binder, Binding, BindingGroup, ExecutorKind,
    Expectation, GetGeneratedKeysDelegate, IdentifierGeneratingInsert, IdentityDelegate,
    InsertGeneratedIdentifierDelegate, InsertReturningDelegate, JdbcCoordinator, JdbcSession,
    JdbcValueBindings, JdbcValueDescriptor, MutationExecutor, MutationExecutorService,
    MutationOperationGroup, MutationResult, MutationSettings, MutationTarget,
    OperationResultChecker, OutParameterDelegate, PreparedStatementDetails,
    PreparedStatementGroup, SqlExceptionHelper, TableInclusionChecker, TableMutation,
    TableOutcome, release_on_exit,
};

#[cfg(feature = "sqlite")]
pub use sqlflush_sqlite::{OpenFlags, SqliteConfig, SqliteConnection};

#[cfg(feature = "sqlite")]
pub use sqlflush_sqlite as sqlite;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use sqlflush::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        BatchKey, Connection, Dialect, Error, ExecutorKind, Expectation, IdentityDelegate,
        IdentityStrategy, JdbcSession, MutationExecutor, MutationExecutorService,
        MutationOperationGroup, MutationResult, MutationSettings, MutationTarget, MutationType,
        ParameterUsage, Result, TableMapping, TableMutation, Value,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::SqliteConnection;
}
