//! Parameter bindings for one table.

use sqlflush_core::{Error, ParameterUsage, Result, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Describes where a column's value goes in a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JdbcValueDescriptor {
    column: String,
    usage: ParameterUsage,
    position: usize,
}

impl JdbcValueDescriptor {
    /// Create a descriptor for a 1-based parameter position.
    pub fn new(column: impl Into<String>, usage: ParameterUsage, position: usize) -> Self {
        Self {
            column: column.into(),
            usage,
            position,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub const fn usage(&self) -> ParameterUsage {
        self.usage
    }

    /// 1-based JDBC parameter position.
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Whether this descriptor answers to the given column and usage.
    pub fn matches(&self, column: &str, usage: ParameterUsage) -> bool {
        self.usage == usage && self.column.eq_ignore_ascii_case(column)
    }
}

/// One bound parameter: column, value and the descriptor that places it.
///
/// Equality and ordering consider the parameter position only.
#[derive(Debug, Clone)]
pub struct Binding {
    column: String,
    value: Value,
    descriptor: JdbcValueDescriptor,
}

impl Binding {
    pub fn new(column: impl Into<String>, value: Value, descriptor: JdbcValueDescriptor) -> Self {
        Self {
            column: column.into(),
            value,
            descriptor,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn descriptor(&self) -> &JdbcValueDescriptor {
        &self.descriptor
    }

    pub const fn position(&self) -> usize {
        self.descriptor.position
    }
}

impl PartialEq for Binding {
    fn eq(&self, other: &Self) -> bool {
        self.position() == other.position()
    }
}

impl Eq for Binding {}

impl PartialOrd for Binding {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Binding {
    fn cmp(&self, other: &Self) -> Ordering {
        self.position().cmp(&other.position())
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} @{}", self.column, self.value, self.position())
    }
}

/// The bindings for one table, kept sorted by parameter position.
#[derive(Debug, Clone)]
pub struct BindingGroup {
    table: String,
    bindings: BTreeMap<usize, Binding>,
}

impl BindingGroup {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Bind a value at the descriptor's position.
    ///
    /// Rebinding the same column at an occupied position replaces the prior
    /// value. A different column at an occupied position is an
    /// [`Error::IllegalState`].
    pub fn bind_value(
        &mut self,
        column: &str,
        value: Value,
        descriptor: &JdbcValueDescriptor,
    ) -> Result<()> {
        debug_assert!(
            descriptor.column().eq_ignore_ascii_case(column),
            "descriptor column `{}` does not match `{}`",
            descriptor.column(),
            column
        );

        let position = descriptor.position();
        if let Some(existing) = self.bindings.get(&position) {
            if !existing.column().eq_ignore_ascii_case(column) {
                return Err(Error::illegal_state(format!(
                    "table `{}`: position {} already bound to column `{}`, cannot bind `{}`",
                    self.table,
                    position,
                    existing.column(),
                    column
                )));
            }
            tracing::trace!(
                table = %self.table,
                column = column,
                position = position,
                "Replacing bound value"
            );
        }

        self.bindings
            .insert(position, Binding::new(column, value, descriptor.clone()));
        Ok(())
    }

    /// Visit bindings in ascending position order.
    pub fn for_each_binding<F>(&self, mut action: F)
    where
        F: FnMut(&Binding),
    {
        for binding in self.bindings.values() {
            action(binding);
        }
    }

    /// Iterate bindings in ascending position order.
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values()
    }

    /// Find the binding for a column/usage pair.
    pub fn find(&self, column: &str, usage: ParameterUsage) -> Option<&Binding> {
        self.bindings
            .values()
            .find(|b| b.descriptor().matches(column, usage))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Empty the group so it can be reused for the next row.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(column: &str, position: usize) -> JdbcValueDescriptor {
        JdbcValueDescriptor::new(column, ParameterUsage::Set, position)
    }

    #[test]
    fn iteration_is_position_ordered() {
        let mut group = BindingGroup::new("person");
        group.bind_value("c", Value::Int(3), &set("c", 3)).unwrap();
        group.bind_value("a", Value::Int(1), &set("a", 1)).unwrap();
        group.bind_value("b", Value::Int(2), &set("b", 2)).unwrap();
        group.bind_value("a", Value::Int(10), &set("a", 1)).unwrap();

        let mut positions = Vec::new();
        group.for_each_binding(|b| positions.push(b.position()));
        assert_eq!(positions, vec![1, 2, 3]);
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn rebinding_same_column_replaces() {
        let mut group = BindingGroup::new("person");
        group.bind_value("name", "a".into(), &set("name", 1)).unwrap();
        group.bind_value("name", "b".into(), &set("name", 1)).unwrap();

        assert_eq!(group.len(), 1);
        assert_eq!(
            group.find("name", ParameterUsage::Set).map(Binding::value),
            Some(&Value::Text("b".into()))
        );
    }

    #[test]
    fn different_column_at_same_position_is_rejected() {
        let mut group = BindingGroup::new("person");
        group.bind_value("name", "a".into(), &set("name", 1)).unwrap();
        let err = group
            .bind_value("email", "x".into(), &set("email", 1))
            .unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn clear_keeps_table() {
        let mut group = BindingGroup::new("person");
        group.bind_value("id", Value::BigInt(1), &set("id", 1)).unwrap();
        group.clear();
        assert!(group.is_empty());
        assert_eq!(group.table_name(), "person");
    }

    #[test]
    fn bindings_compare_by_position_only() {
        let a = Binding::new("a", Value::Int(1), set("a", 4));
        let b = Binding::new("b", Value::Int(2), set("b", 4));
        let c = Binding::new("c", Value::Int(2), set("c", 5));
        assert_eq!(a, b);
        assert!(a < c);
    }

    #[test]
    fn usage_distinguishes_lookups() {
        let mut group = BindingGroup::new("person");
        group.bind_value("id", Value::BigInt(7), &JdbcValueDescriptor::new("id", ParameterUsage::Restrict, 2)).unwrap();
        assert!(group.find("id", ParameterUsage::Set).is_none());
        assert!(group.find("ID", ParameterUsage::Restrict).is_some());
    }
}
