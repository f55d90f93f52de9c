//! Values bound for one logical mutation, across all of its tables.

use crate::binding::{Binding, BindingGroup};
use crate::operation::MutationOperationGroup;
use sqlflush_core::{Error, ParameterUsage, Result, Statement, UnknownParameterError, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-mutation map of table name to [`BindingGroup`].
///
/// Column/usage pairs are resolved through the operation group's parameter
/// descriptors. Pairs the group does not know raise
/// [`Error::UnknownParameter`].
#[derive(Debug)]
pub struct JdbcValueBindings {
    operations: Arc<MutationOperationGroup>,
    groups: HashMap<String, BindingGroup>,
}

impl JdbcValueBindings {
    pub fn new(operations: Arc<MutationOperationGroup>) -> Self {
        Self {
            operations,
            groups: HashMap::new(),
        }
    }

    fn unknown(&self, table: &str, column: &str, usage: ParameterUsage) -> Error {
        Error::UnknownParameter(UnknownParameterError {
            mutation_type: self.operations.mutation_type(),
            role_path: self.operations.target().role_path().to_string(),
            table: table.to_string(),
            column: column.to_string(),
            usage,
        })
    }

    /// Bind `value` for the given table/column/usage.
    pub fn bind_value(
        &mut self,
        value: impl Into<Value>,
        table: &str,
        column: &str,
        usage: ParameterUsage,
    ) -> Result<()> {
        let descriptor = self
            .operations
            .operation(table)
            .and_then(|op| op.find_descriptor(column, usage))
            .cloned()
            .ok_or_else(|| self.unknown(table, column, usage))?;

        self.groups
            .entry(table.to_string())
            .or_insert_with(|| BindingGroup::new(table))
            .bind_value(column, value.into(), &descriptor)
    }

    /// The bindings collected for `table`, if any.
    pub fn binding_group(&self, table: &str) -> Option<&BindingGroup> {
        self.groups.get(table)
    }

    /// Look up a bound value.
    pub fn value(&self, table: &str, column: &str, usage: ParameterUsage) -> Result<&Value> {
        self.groups
            .get(table)
            .and_then(|g| g.find(column, usage))
            .map(Binding::value)
            .ok_or_else(|| self.unknown(table, column, usage))
    }

    /// Whether `table` has at least one `Set` binding.
    pub fn has_set_values(&self, table: &str) -> bool {
        self.groups.get(table).is_some_and(|g| {
            g.bindings()
                .any(|b| b.descriptor().usage() == ParameterUsage::Set)
        })
    }

    /// Whether `table` has a non-null `Set` binding outside `excluding`.
    pub fn has_non_null_set_values(&self, table: &str, excluding: &[String]) -> bool {
        self.groups.get(table).is_some_and(|g| {
            g.bindings().any(|b| {
                b.descriptor().usage() == ParameterUsage::Set
                    && !b.value().is_null()
                    && !excluding.iter().any(|c| c.eq_ignore_ascii_case(b.column()))
            })
        })
    }

    /// Bind `table`'s values onto its statement in ascending position order.
    pub fn before_statement(&self, table: &str, statement: &mut dyn Statement) -> Result<()> {
        let Some(group) = self.groups.get(table) else {
            return Ok(());
        };
        for binding in group.bindings() {
            tracing::trace!(
                table = table,
                column = binding.column(),
                position = binding.position(),
                value = %binding.value(),
                "Binding parameter"
            );
            statement.bind(binding.position(), binding.value())?;
        }
        Ok(())
    }

    /// Clear `table`'s bindings once its statement has run.
    pub fn after_statement(&mut self, table: &str) {
        if let Some(group) = self.groups.get_mut(table) {
            group.clear();
        }
    }
}
