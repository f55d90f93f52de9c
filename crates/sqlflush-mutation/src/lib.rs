//! Mutation execution for sqlflush.
//!
//! `sqlflush-mutation` runs the per-table statements of one logical
//! mutation: an insert, update or delete of a single entity that may span a
//! primary table and any number of secondary tables.
//!
//! # Role In The Architecture
//!
//! - **Operation groups** ([`MutationOperationGroup`]) describe which tables a
//!   mutation touches, in FK-safe order, with each table's SQL, parameter
//!   layout and row-count [`Expectation`].
//! - **Bindings** ([`JdbcValueBindings`], [`BindingGroup`]) collect values per
//!   table, kept sorted by parameter position.
//! - **Statement groups** ([`PreparedStatementGroup`]) prepare statements
//!   lazily, one per table, and release them all on every exit path.
//! - **Executors** ([`MutationExecutor`]) run, batch and verify the
//!   statements and translate driver failures once.
//! - **Identity delegates** ([`IdentityDelegate`]) insert rows whose key is
//!   generated by the database and read that key back.
//!
//! # Example
//!
//! ```ignore
//! let mut session = JdbcSession::new(&conn, MutationSettings::default());
//! let mut executor = MutationExecutorService::new().create_executor(None, group, &session);
//!
//! executor.bind_value("Ann", "person", "name", ParameterUsage::Set)?;
//! let result = executor.execute(&mut session, &person, None, None)?;
//! let id = result.generated_id();
//! ```

pub mod batch;
pub mod binding;
pub mod config;
pub mod executor;
pub mod expectation;
pub mod identity;
pub mod jdbc;
pub mod operation;
pub mod statement;
pub mod statement_group;
pub mod value_bindings;

#[cfg(test)]
pub(crate) mod mock;

pub use batch::{Batch, BatchKey};
pub use binding::{Binding, BindingGroup, JdbcValueDescriptor};
pub use config::MutationSettings;
pub use executor::{
    ExecutorKind, MutationExecutor, MutationExecutorService, MutationResult,
    OperationResultChecker, TableInclusionChecker, TableOutcome,
};
pub use expectation::Expectation;
pub use identity::{
    BasicSelectingDelegate, Binder, GetGeneratedKeysDelegate, IdentifierGeneratingInsert,
    IdentityDelegate, InsertGeneratedIdentifierDelegate, InsertReturningDelegate,
    OutParameterDelegate,
};
pub use jdbc::{JdbcCoordinator, JdbcSession, SqlExceptionHelper, release_on_exit};
pub use operation::{MutationOperationGroup, MutationTarget, TableMutation};
pub use statement::PreparedStatementDetails;
pub use statement_group::PreparedStatementGroup;
pub use value_bindings::JdbcValueBindings;
