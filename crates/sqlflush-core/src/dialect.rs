//! Database dialects.
//!
//! A [`Dialect`] decides how identity-returning inserts are written, which
//! identity strategy applies, and how driver failures are classified.

use crate::error::QueryErrorKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// How a database hands back an identity value generated on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// Prepare with generated-key tracking and read the driver's key result
    GetGeneratedKeys,
    /// Execute the insert, then run the dialect's identity select
    SelectAfterInsert,
    /// Append a `RETURNING`/`OUTPUT` clause and read the single result row
    Returning,
    /// Capture the key through an output parameter of a callable statement
    OutParameter,
}

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
    /// SQL Server dialect (uses ? placeholders)
    SqlServer,
}

impl Dialect {
    /// Human-readable dialect name.
    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
            Dialect::Mysql => "mysql",
            Dialect::SqlServer => "sqlserver",
        }
    }

    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql | Dialect::SqlServer => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    ///
    /// Embedded quote characters are doubled.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                let escaped = name.replace('"', "\"\"");
                format!("\"{escaped}\"")
            }
            Dialect::Mysql => {
                let escaped = name.replace('`', "``");
                format!("`{escaped}`")
            }
            Dialect::SqlServer => {
                let escaped = name.replace(']', "]]");
                format!("[{escaped}]")
            }
        }
    }

    /// The post-insert identity strategy this database uses by default.
    pub const fn identity_strategy(self) -> IdentityStrategy {
        match self {
            Dialect::Postgres | Dialect::Sqlite | Dialect::SqlServer => IdentityStrategy::Returning,
            Dialect::Mysql => IdentityStrategy::GetGeneratedKeys,
        }
    }

    /// Query returning the identity value generated by the last insert on
    /// this connection.
    ///
    /// Postgres parses the table argument of `pg_get_serial_sequence` as an
    /// identifier and takes the column argument literally.
    pub fn identity_select_string(self, table: &str, column: &str) -> String {
        match self {
            Dialect::Postgres => format!(
                "select currval(pg_get_serial_sequence({}, {}))",
                string_literal(&self.quote_identifier(table)),
                string_literal(column)
            ),
            Dialect::Sqlite => "select last_insert_rowid()".to_string(),
            Dialect::Mysql => "select last_insert_id()".to_string(),
            Dialect::SqlServer => "select scope_identity()".to_string(),
        }
    }

    /// Rewrite an insert so it returns the identity column as a result row.
    pub fn append_identity_returning(self, insert_sql: &str, column: &str) -> String {
        let quoted = self.quote_identifier(column);
        match self {
            Dialect::SqlServer => {
                let lower = insert_sql.to_ascii_lowercase();
                let at = lower
                    .find(" default values")
                    .or_else(|| lower.find(" values"))
                    .or_else(|| lower.find(" select "));
                match at {
                    Some(at) => format!(
                        "{} output inserted.{}{}",
                        &insert_sql[..at],
                        quoted,
                        &insert_sql[at..]
                    ),
                    None => format!("{insert_sql} output inserted.{quoted}"),
                }
            }
            _ => format!("{insert_sql} returning {quoted}"),
        }
    }

    /// Insert statement for a table whose only column is generated.
    pub fn no_columns_insert(self, table: &str) -> String {
        let table = self.quote_identifier(table);
        match self {
            Dialect::Mysql => format!("insert into {table} () values ()"),
            _ => format!("insert into {table} default values"),
        }
    }

    /// Classify a SQLSTATE code by its class.
    pub fn classify_sqlstate(self, sqlstate: &str) -> Option<QueryErrorKind> {
        match sqlstate {
            "40001" => return Some(QueryErrorKind::Serialization),
            "40P01" => return Some(QueryErrorKind::Deadlock),
            "57014" | "HYT00" | "HYT01" | "55P03" => return Some(QueryErrorKind::Timeout),
            "42501" => return Some(QueryErrorKind::Permission),
            "42P01" | "42703" | "42S02" | "42S22" => return Some(QueryErrorKind::NotFound),
            "0A000" | "HYC00" => return Some(QueryErrorKind::Unsupported),
            _ => {}
        }
        match sqlstate.get(..2)? {
            "23" => Some(QueryErrorKind::Constraint),
            "22" => Some(QueryErrorKind::Data),
            "42" | "37" => Some(QueryErrorKind::Syntax),
            "08" => Some(QueryErrorKind::Connection),
            "40" => Some(QueryErrorKind::Serialization),
            _ => None,
        }
    }

    /// Extract the violated constraint name from a driver message.
    pub fn extract_constraint_name(self, message: &str) -> Option<String> {
        constraint_patterns(self)
            .iter()
            .find_map(|re| re.captures(message))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

const POSTGRES_PATTERNS: &[&str] = &[r#"constraint "([^"]+)""#];
const SQLITE_PATTERNS: &[&str] = &[
    r"(?:UNIQUE|NOT NULL|PRIMARY KEY) constraint failed: ([\w.]+(?:, [\w.]+)*)",
    r"CHECK constraint failed: (\w+)",
];
const MYSQL_PATTERNS: &[&str] = &[r"for key '([^']+)'", r"CONSTRAINT `([^`]+)`"];
const SQLSERVER_PATTERNS: &[&str] = &[r#"constraint ['"]([^'"]+)['"]"#];

fn constraint_patterns(dialect: Dialect) -> &'static [Regex] {
    static POSTGRES: OnceLock<Vec<Regex>> = OnceLock::new();
    static SQLITE: OnceLock<Vec<Regex>> = OnceLock::new();
    static MYSQL: OnceLock<Vec<Regex>> = OnceLock::new();
    static SQLSERVER: OnceLock<Vec<Regex>> = OnceLock::new();

    match dialect {
        Dialect::Postgres => POSTGRES.get_or_init(|| compile(POSTGRES_PATTERNS)),
        Dialect::Sqlite => SQLITE.get_or_init(|| compile(SQLITE_PATTERNS)),
        Dialect::Mysql => MYSQL.get_or_init(|| compile(MYSQL_PATTERNS)),
        Dialect::SqlServer => SQLSERVER.get_or_init(|| compile(SQLSERVER_PATTERNS)),
    }
}

fn compile(sources: &[&str]) -> Vec<Regex> {
    sources
        .iter()
        .filter_map(|src| match Regex::new(src) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = %src, error = %e, "Invalid constraint pattern");
                None
            }
        })
        .collect()
}

fn string_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders() {
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
        assert_eq!(Dialect::Sqlite.placeholder(2), "?2");
        assert_eq!(Dialect::Mysql.placeholder(2), "?");
    }

    #[test]
    fn quote_escapes_embedded_quotes() {
        assert_eq!(Dialect::Sqlite.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::Mysql.quote_identifier("a`b"), "`a``b`");
        assert_eq!(Dialect::SqlServer.quote_identifier("a]b"), "[a]]b]");
    }

    #[test]
    fn returning_suffix_and_output_infix() {
        assert_eq!(
            Dialect::Sqlite.append_identity_returning("insert into \"t\" (\"a\") values (?1)", "id"),
            "insert into \"t\" (\"a\") values (?1) returning \"id\""
        );
        assert_eq!(
            Dialect::SqlServer.append_identity_returning("insert into [t] ([a]) values (?)", "id"),
            "insert into [t] ([a]) output inserted.[id] values (?)"
        );
        assert_eq!(
            Dialect::SqlServer.append_identity_returning("insert into [t] default values", "id"),
            "insert into [t] output inserted.[id] default values"
        );
    }

    #[test]
    fn identity_select_quotes_table_and_column() {
        assert_eq!(
            Dialect::Postgres.identity_select_string("person", "id"),
            r#"select currval(pg_get_serial_sequence('"person"', 'id'))"#
        );
        assert_eq!(
            Dialect::Postgres.identity_select_string("Odd\"Name's", "it's"),
            r#"select currval(pg_get_serial_sequence('"Odd""Name''s"', 'it''s'))"#
        );
        assert_eq!(
            Dialect::Sqlite.identity_select_string("person", "id"),
            "select last_insert_rowid()"
        );
    }

    #[test]
    fn identity_strategy_per_dialect() {
        assert_eq!(Dialect::Mysql.identity_strategy(), IdentityStrategy::GetGeneratedKeys);
        assert_eq!(Dialect::Sqlite.identity_strategy(), IdentityStrategy::Returning);
    }

    #[test]
    fn sqlstate_classes() {
        let d = Dialect::Postgres;
        assert_eq!(d.classify_sqlstate("23505"), Some(QueryErrorKind::Constraint));
        assert_eq!(d.classify_sqlstate("22001"), Some(QueryErrorKind::Data));
        assert_eq!(d.classify_sqlstate("42601"), Some(QueryErrorKind::Syntax));
        assert_eq!(d.classify_sqlstate("42P01"), Some(QueryErrorKind::NotFound));
        assert_eq!(d.classify_sqlstate("40P01"), Some(QueryErrorKind::Deadlock));
        assert_eq!(d.classify_sqlstate("57014"), Some(QueryErrorKind::Timeout));
        assert_eq!(d.classify_sqlstate("XX000"), None);
        assert_eq!(d.classify_sqlstate("2"), None);
    }

    #[test]
    fn constraint_names() {
        assert_eq!(
            Dialect::Postgres.extract_constraint_name(
                "duplicate key value violates unique constraint \"person_email_key\""
            ),
            Some("person_email_key".to_string())
        );
        assert_eq!(
            Dialect::Sqlite.extract_constraint_name("UNIQUE constraint failed: person.email"),
            Some("person.email".to_string())
        );
        assert_eq!(
            Dialect::Mysql
                .extract_constraint_name("Duplicate entry 'a@b' for key 'person.uk_email'"),
            Some("person.uk_email".to_string())
        );
        assert_eq!(Dialect::Postgres.extract_constraint_name("syntax error"), None);
    }
}
