//! Table mapping metadata consumed by the mutation machinery.
//!
//! These types are produced by whatever boot-time metadata model sits above
//! this crate. Statement and binding structures only reference them.

use std::fmt;

/// The kind of logical mutation being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationType {
    /// Insert of a new entity row set
    Insert,
    /// Update of existing rows
    Update,
    /// Delete of existing rows
    Delete,
}

impl MutationType {
    /// Upper-case SQL verb for this mutation.
    pub const fn as_str(self) -> &'static str {
        match self {
            MutationType::Insert => "INSERT",
            MutationType::Update => "UPDATE",
            MutationType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for MutationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a column participates in a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParameterUsage {
    /// The column receives a value (INSERT values, UPDATE SET list)
    Set,
    /// The column restricts the affected rows (WHERE clause)
    Restrict,
}

impl fmt::Display for ParameterUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterUsage::Set => f.write_str("SET"),
            ParameterUsage::Restrict => f.write_str("RESTRICT"),
        }
    }
}

/// One physical table backing (part of) an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    name: String,
    key_columns: Vec<String>,
    optional: bool,
    identifier_table: bool,
}

impl TableMapping {
    /// Create a mandatory table mapping.
    pub fn new(name: impl Into<String>, key_columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            key_columns: key_columns.iter().map(|c| (*c).to_string()).collect(),
            optional: false,
            identifier_table: false,
        }
    }

    /// Mark the table as optional (a secondary table whose row may be absent).
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Mark the table as the one holding the entity identifier.
    pub fn identifier_table(mut self, identifier: bool) -> Self {
        self.identifier_table = identifier;
        self
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key columns, in declaration order.
    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// Whether the table is optional.
    pub const fn is_optional(&self) -> bool {
        self.optional
    }

    /// Whether the table holds the entity identifier.
    pub const fn is_identifier_table(&self) -> bool {
        self.identifier_table
    }
}

impl fmt::Display for TableMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mappings_compare_by_name_keys_and_flags() {
        let detail = TableMapping::new("person_detail", &["person_id"]).optional(true);
        assert_eq!(
            detail,
            TableMapping::new("person_detail", &["person_id"]).optional(true)
        );
        assert_ne!(detail, TableMapping::new("person_detail", &["person_id"]));
        assert_eq!(detail.key_columns(), ["person_id"]);
        assert!(detail.is_optional());
        assert!(!detail.is_identifier_table());
        assert_eq!(detail.to_string(), "person_detail");
    }

    #[test]
    fn mutation_type_verbs() {
        assert_eq!(MutationType::Insert.to_string(), "INSERT");
        assert_eq!(MutationType::Delete.as_str(), "DELETE");
        assert_eq!(ParameterUsage::Restrict.to_string(), "RESTRICT");
    }
}
