//! Precomputed per-table mutation operations.
//!
//! A [`MutationOperationGroup`] describes which tables a logical mutation
//! touches, in FK-safe order, together with each table's SQL, expectation
//! and parameter layout. Groups are built once per entity shape and shared.

use crate::binding::JdbcValueDescriptor;
use crate::config::MutationSettings;
use crate::expectation::Expectation;
use crate::identity::{IdentifierGeneratingInsert, IdentityDelegate, InsertGeneratedIdentifierDelegate};
use sqlflush_core::{Dialect, MutationType, ParameterUsage, TableMapping};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Build `insert into t (a, b) values (p1, p2)` with positions starting at
/// `first_position`.
pub(crate) fn insert_sql(
    dialect: Dialect,
    table: &str,
    columns: &[&str],
    first_position: usize,
) -> String {
    if columns.is_empty() {
        return dialect.no_columns_insert(table);
    }
    let cols: Vec<String> = columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect();
    let placeholders: Vec<String> = (0..columns.len())
        .map(|i| dialect.placeholder(first_position + i))
        .collect();
    format!(
        "insert into {} ({}) values ({})",
        dialect.quote_identifier(table),
        cols.join(", "),
        placeholders.join(", ")
    )
}

fn restriction_sql(
    dialect: Dialect,
    columns: &[String],
    extra: &[&str],
    first_position: usize,
) -> String {
    columns
        .iter()
        .map(String::as_str)
        .chain(extra.iter().copied())
        .enumerate()
        .map(|(i, c)| {
            format!(
                "{} = {}",
                dialect.quote_identifier(c),
                dialect.placeholder(first_position + i)
            )
        })
        .collect::<Vec<_>>()
        .join(" and ")
}

/// The statement to run against one table for one mutation type.
#[derive(Debug, Clone)]
pub struct TableMutation {
    table: Arc<TableMapping>,
    mutation_type: MutationType,
    sql: String,
    expectation: Expectation,
    callable: bool,
    descriptors: Vec<JdbcValueDescriptor>,
    identity: Option<(IdentityDelegate, IdentifierGeneratingInsert)>,
    extra_restrictions: bool,
}

impl TableMutation {
    /// Insert of the given columns.
    pub fn insert(dialect: Dialect, table: Arc<TableMapping>, columns: &[&str]) -> Self {
        let sql = insert_sql(dialect, table.name(), columns, 1);
        let descriptors = columns
            .iter()
            .enumerate()
            .map(|(i, c)| JdbcValueDescriptor::new(*c, ParameterUsage::Set, i + 1))
            .collect();
        Self {
            table,
            mutation_type: MutationType::Insert,
            sql,
            expectation: Expectation::one_row(),
            callable: false,
            descriptors,
            identity: None,
            extra_restrictions: false,
        }
    }

    /// Update of `set_columns`, restricted by the table's key columns and
    /// any `extra_restrictions` (version columns and the like).
    pub fn update(
        dialect: Dialect,
        table: Arc<TableMapping>,
        set_columns: &[&str],
        extra_restrictions: &[&str],
    ) -> Self {
        let assignments = set_columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "{} = {}",
                    dialect.quote_identifier(c),
                    dialect.placeholder(i + 1)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let restrictions = restriction_sql(
            dialect,
            table.key_columns(),
            extra_restrictions,
            set_columns.len() + 1,
        );
        let sql = format!(
            "update {} set {} where {}",
            dialect.quote_identifier(table.name()),
            assignments,
            restrictions
        );

        let mut descriptors: Vec<JdbcValueDescriptor> = set_columns
            .iter()
            .enumerate()
            .map(|(i, c)| JdbcValueDescriptor::new(*c, ParameterUsage::Set, i + 1))
            .collect();
        let first_restriction = descriptors.len() + 1;
        descriptors.extend(
            table
                .key_columns()
                .iter()
                .map(String::as_str)
                .chain(extra_restrictions.iter().copied())
                .enumerate()
                .map(|(i, c)| {
                    JdbcValueDescriptor::new(c, ParameterUsage::Restrict, first_restriction + i)
                }),
        );

        Self {
            table,
            mutation_type: MutationType::Update,
            sql,
            expectation: Expectation::one_row(),
            callable: false,
            descriptors,
            identity: None,
            extra_restrictions: !extra_restrictions.is_empty(),
        }
    }

    /// Delete restricted by the table's key columns and any extra columns.
    pub fn delete(dialect: Dialect, table: Arc<TableMapping>, extra_restrictions: &[&str]) -> Self {
        let sql = format!(
            "delete from {} where {}",
            dialect.quote_identifier(table.name()),
            restriction_sql(dialect, table.key_columns(), extra_restrictions, 1)
        );
        let descriptors = table
            .key_columns()
            .iter()
            .map(String::as_str)
            .chain(extra_restrictions.iter().copied())
            .enumerate()
            .map(|(i, c)| JdbcValueDescriptor::new(c, ParameterUsage::Restrict, i + 1))
            .collect();
        Self {
            table,
            mutation_type: MutationType::Delete,
            sql,
            expectation: Expectation::one_row(),
            callable: false,
            descriptors,
            identity: None,
            extra_restrictions: !extra_restrictions.is_empty(),
        }
    }

    /// Insert whose identity column is generated by the database.
    ///
    /// `columns` must not contain the identity column; the delegate shapes
    /// the SQL so the generated value can be read back.
    pub fn identity_insert(
        delegate: IdentityDelegate,
        table: Arc<TableMapping>,
        columns: &[&str],
    ) -> Self {
        let insert = delegate.prepare_identifier_generating_insert(columns);
        let descriptors = columns
            .iter()
            .enumerate()
            .map(|(i, c)| JdbcValueDescriptor::new(*c, ParameterUsage::Set, i + 1))
            .collect();
        Self {
            table,
            mutation_type: MutationType::Insert,
            sql: insert.sql().to_string(),
            expectation: Expectation::None,
            callable: insert.is_callable(),
            descriptors,
            identity: Some((delegate, insert)),
            extra_restrictions: false,
        }
    }

    /// Custom SQL, possibly a callable statement.
    ///
    /// Parameter positions are assigned in the order given, after any
    /// positions the expectation reserves.
    pub fn custom(
        table: Arc<TableMapping>,
        mutation_type: MutationType,
        sql: impl Into<String>,
        callable: bool,
        expectation: Expectation,
        parameters: &[(&str, ParameterUsage)],
    ) -> Self {
        let offset = expectation.parameter_offset();
        let descriptors = parameters
            .iter()
            .enumerate()
            .map(|(i, (c, usage))| JdbcValueDescriptor::new(*c, *usage, offset + i + 1))
            .collect();
        Self {
            table,
            mutation_type,
            sql: sql.into(),
            expectation,
            callable,
            descriptors,
            identity: None,
            extra_restrictions: false,
        }
    }

    /// Replace the expectation.
    ///
    /// Parameter positions are not recomputed; use [`TableMutation::custom`]
    /// for expectations that reserve positions.
    pub fn with_expectation(mut self, expectation: Expectation) -> Self {
        self.expectation = expectation;
        self
    }

    pub fn table(&self) -> &Arc<TableMapping> {
        &self.table
    }

    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    pub const fn mutation_type(&self) -> MutationType {
        self.mutation_type
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub const fn expectation(&self) -> Expectation {
        self.expectation
    }

    pub const fn is_callable(&self) -> bool {
        self.callable
    }

    pub fn descriptors(&self) -> &[JdbcValueDescriptor] {
        &self.descriptors
    }

    /// Find the parameter descriptor for a column/usage pair.
    pub fn find_descriptor(&self, column: &str, usage: ParameterUsage) -> Option<&JdbcValueDescriptor> {
        self.descriptors.iter().find(|d| d.matches(column, usage))
    }

    /// The identity delegate and its insert shape, for identity inserts.
    pub fn identity(&self) -> Option<(&IdentityDelegate, &IdentifierGeneratingInsert)> {
        self.identity.as_ref().map(|(d, i)| (d, i))
    }

    pub fn is_identity_insert(&self) -> bool {
        self.identity.is_some()
    }

    /// Whether the restriction includes columns beyond the key.
    pub const fn has_extra_restrictions(&self) -> bool {
        self.extra_restrictions
    }

    /// Whether this statement may join a JDBC batch.
    pub fn is_batchable(&self, settings: &MutationSettings) -> bool {
        self.expectation.can_be_batched()
            && !self.is_identity_insert()
            && (settings.batch_versioned_data || !self.extra_restrictions)
    }
}

/// The entity (or collection) a mutation targets.
#[derive(Debug, Clone)]
pub struct MutationTarget {
    role_path: String,
    tables: Vec<Arc<TableMapping>>,
    identity_column: Option<String>,
}

impl MutationTarget {
    pub fn new(role_path: impl Into<String>, tables: Vec<Arc<TableMapping>>) -> Self {
        Self {
            role_path: role_path.into(),
            tables,
            identity_column: None,
        }
    }

    /// Name the identity column generated by the database on insert.
    pub fn with_identity_column(mut self, column: impl Into<String>) -> Self {
        self.identity_column = Some(column.into());
        self
    }

    /// Navigable role, e.g. the entity name.
    pub fn role_path(&self) -> &str {
        &self.role_path
    }

    pub fn tables(&self) -> &[Arc<TableMapping>] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Arc<TableMapping>> {
        self.tables.iter().find(|t| t.name() == name)
    }

    /// The table holding the identifier (the first table if none is marked).
    pub fn identifier_table(&self) -> Option<&Arc<TableMapping>> {
        self.tables
            .iter()
            .find(|t| t.is_identifier_table())
            .or_else(|| self.tables.first())
    }

    pub fn identity_column(&self) -> Option<&str> {
        self.identity_column.as_deref()
    }
}

/// The ordered per-table operations of one logical mutation.
///
/// Operations keep the order they were added in. Callers add them in
/// FK-safe order: parent tables first for inserts, dependent tables first
/// for deletes.
#[derive(Debug, Clone)]
pub struct MutationOperationGroup {
    mutation_type: MutationType,
    target: Arc<MutationTarget>,
    operations: Vec<Arc<TableMutation>>,
}

impl MutationOperationGroup {
    pub fn new(mutation_type: MutationType, target: Arc<MutationTarget>) -> Self {
        Self {
            mutation_type,
            target,
            operations: Vec::new(),
        }
    }

    /// Append an operation.
    pub fn with_operation(mut self, operation: TableMutation) -> Self {
        debug_assert_eq!(operation.mutation_type(), self.mutation_type);
        debug_assert!(
            self.operation(operation.table_name()).is_none(),
            "duplicate operation for table `{}`",
            operation.table_name()
        );
        self.operations.push(Arc::new(operation));
        self
    }

    pub const fn mutation_type(&self) -> MutationType {
        self.mutation_type
    }

    pub fn target(&self) -> &Arc<MutationTarget> {
        &self.target
    }

    pub fn operations(&self) -> &[Arc<TableMutation>] {
        &self.operations
    }

    pub fn number_of_operations(&self) -> usize {
        self.operations.len()
    }

    pub fn operation(&self, table: &str) -> Option<&Arc<TableMutation>> {
        self.operations.iter().find(|op| op.table_name() == table)
    }

    /// The only operation, if there is exactly one.
    pub fn single_operation(&self) -> Option<&Arc<TableMutation>> {
        match self.operations.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// The identity insert operation, if any.
    pub fn identity_operation(&self) -> Option<&Arc<TableMutation>> {
        self.operations.iter().find(|op| op.is_identity_insert())
    }

    /// The group of all operations except the one for `table`.
    pub fn without_table(&self, table: &str) -> Self {
        Self {
            mutation_type: self.mutation_type,
            target: Arc::clone(&self.target),
            operations: self
                .operations
                .iter()
                .filter(|op| op.table_name() != table)
                .cloned()
                .collect(),
        }
    }

    /// Whether every operation may join a JDBC batch.
    pub fn is_batchable(&self, settings: &MutationSettings) -> bool {
        self.operations.iter().all(|op| op.is_batchable(settings))
    }

    /// Hash of the statement shape; groups with the same fingerprint can
    /// share a batch.
    pub fn sql_fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.mutation_type.hash(&mut hasher);
        for op in &self.operations {
            op.table_name().hash(&mut hasher);
            op.sql().hash(&mut hasher);
        }
        hasher.finish()
    }
}
