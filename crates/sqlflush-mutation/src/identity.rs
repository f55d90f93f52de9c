//! Post-insert identifier generation.
//!
//! An identity insert runs through a fixed sequence: prepare the
//! dialect-shaped insert, let a [`Binder`] bind every non-generated column,
//! execute, extract the generated key, and release the statement on every
//! exit path. The dialect picks one of a closed set of delegates up front
//! (see [`IdentityDelegate`]).

use crate::config::MutationSettings;
use crate::jdbc::{JdbcCoordinator, release_on_exit};
use crate::operation::insert_sql;
use sqlflush_core::{
    Dialect, Error, GeneratedKeys, IdentifierError, IdentityStrategy, Result, Row, Statement,
    Value,
};
use std::fmt;

/// Binds the values of one insert.
pub trait Binder {
    /// Bind every non-generated column onto the statement.
    fn bind_values(&self, statement: &mut dyn Statement) -> Result<()>;

    /// The entity being inserted, for diagnostics.
    fn entity(&self) -> &dyn fmt::Debug;
}

/// The prepared shape of an identity insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierGeneratingInsert {
    sql: String,
    table: String,
    identity_column: String,
    keys: GeneratedKeys,
    callable: bool,
    out_position: Option<usize>,
}

impl IdentifierGeneratingInsert {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn identity_column(&self) -> &str {
        &self.identity_column
    }

    /// Generated-key tracking to request when preparing.
    pub fn keys(&self) -> &GeneratedKeys {
        &self.keys
    }

    pub const fn is_callable(&self) -> bool {
        self.callable
    }

    /// Position of the out parameter receiving the key, if any.
    pub const fn out_position(&self) -> Option<usize> {
        self.out_position
    }
}

/// Strategy for inserting a row and capturing its generated identifier.
pub trait InsertGeneratedIdentifierDelegate {
    fn strategy(&self) -> IdentityStrategy;

    /// Build the dialect-specific insert for the given non-identity columns.
    fn prepare_identifier_generating_insert(&self, columns: &[&str]) -> IdentifierGeneratingInsert;

    /// Prepare the insert statement.
    fn prepare_statement(
        &self,
        jdbc: &JdbcCoordinator<'_>,
        insert: &IdentifierGeneratingInsert,
    ) -> Result<Box<dyn Statement>> {
        jdbc.prepare_statement(insert.sql(), insert.is_callable(), insert.keys().clone())
    }

    /// Execute the bound insert and read back the generated identifier.
    fn execute_and_extract(
        &self,
        jdbc: &JdbcCoordinator<'_>,
        insert: &IdentifierGeneratingInsert,
        statement: &mut dyn Statement,
    ) -> Result<Value>;

    /// Run the whole insert and return the generated identifier.
    ///
    /// Driver errors are translated once, carrying the insert SQL and a
    /// description of the entity.
    fn perform_insert(
        &self,
        jdbc: &JdbcCoordinator<'_>,
        insert: &IdentifierGeneratingInsert,
        binder: &dyn Binder,
    ) -> Result<Value> {
        perform_insert_untranslated(self, jdbc, insert, binder).map_err(|e| {
            jdbc.exception_helper().convert(
                e,
                &format!("could not execute identity insert for {:?}", binder.entity()),
                insert.sql(),
            )
        })
    }
}

/// Prepare, bind, execute, extract and always release, without translating
/// driver errors.
pub(crate) fn perform_insert_untranslated<D>(
    delegate: &D,
    jdbc: &JdbcCoordinator<'_>,
    insert: &IdentifierGeneratingInsert,
    binder: &dyn Binder,
) -> Result<Value>
where
    D: InsertGeneratedIdentifierDelegate + ?Sized,
{
    tracing::debug!(
        strategy = ?delegate.strategy(),
        table = insert.table(),
        "Performing identity insert"
    );

    let mut statement = delegate.prepare_statement(jdbc, insert)?;
    let result = binder
        .bind_values(statement.as_mut())
        .and_then(|()| delegate.execute_and_extract(jdbc, insert, statement.as_mut()));
    let result = release_on_exit(result, jdbc.release_statement(statement));

    match result {
        Err(Error::Identifier(mut e)) => {
            e.entity = format!("{:?}", binder.entity());
            Err(Error::Identifier(e))
        }
        other => other,
    }
}

fn first_key(rows: &[Row], insert: &IdentifierGeneratingInsert) -> Result<Value> {
    let value = rows
        .first()
        .and_then(|row| {
            row.get_by_name(insert.identity_column())
                .or_else(|| row.get(0))
        })
        .cloned();
    match value {
        Some(v) if !v.is_null() => {
            tracing::debug!(table = insert.table(), id = %v, "Extracted generated identifier");
            Ok(v)
        }
        _ => Err(no_key(insert, "the database returned no natively generated identity value")),
    }
}

fn no_key(insert: &IdentifierGeneratingInsert, message: &str) -> Error {
    Error::Identifier(IdentifierError {
        sql: insert.sql().to_string(),
        entity: String::new(),
        message: message.to_string(),
    })
}

/// Reads the key from the driver's generated-keys result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetGeneratedKeysDelegate {
    dialect: Dialect,
    table: String,
    column: String,
}

impl InsertGeneratedIdentifierDelegate for GetGeneratedKeysDelegate {
    fn strategy(&self) -> IdentityStrategy {
        IdentityStrategy::GetGeneratedKeys
    }

    fn prepare_identifier_generating_insert(&self, columns: &[&str]) -> IdentifierGeneratingInsert {
        IdentifierGeneratingInsert {
            sql: insert_sql(self.dialect, &self.table, columns, 1),
            table: self.table.clone(),
            identity_column: self.column.clone(),
            keys: GeneratedKeys::column(self.column.clone()),
            callable: false,
            out_position: None,
        }
    }

    fn execute_and_extract(
        &self,
        _jdbc: &JdbcCoordinator<'_>,
        insert: &IdentifierGeneratingInsert,
        statement: &mut dyn Statement,
    ) -> Result<Value> {
        statement.execute_update()?;
        let rows = statement.generated_keys()?;
        first_key(&rows, insert)
    }
}

/// Executes the insert, then runs the dialect's identity select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicSelectingDelegate {
    dialect: Dialect,
    table: String,
    column: String,
}

impl InsertGeneratedIdentifierDelegate for BasicSelectingDelegate {
    fn strategy(&self) -> IdentityStrategy {
        IdentityStrategy::SelectAfterInsert
    }

    fn prepare_identifier_generating_insert(&self, columns: &[&str]) -> IdentifierGeneratingInsert {
        IdentifierGeneratingInsert {
            sql: insert_sql(self.dialect, &self.table, columns, 1),
            table: self.table.clone(),
            identity_column: self.column.clone(),
            keys: GeneratedKeys::None,
            callable: false,
            out_position: None,
        }
    }

    fn execute_and_extract(
        &self,
        jdbc: &JdbcCoordinator<'_>,
        insert: &IdentifierGeneratingInsert,
        statement: &mut dyn Statement,
    ) -> Result<Value> {
        statement.execute_update()?;
        let select = self.dialect.identity_select_string(&self.table, &self.column);
        if jdbc.settings().log_sql {
            tracing::debug!(sql = %select, "Selecting generated identity");
        }
        let rows = jdbc.connection().query(&select, &[])?;
        first_key(&rows, insert)
    }
}

/// Appends a `RETURNING`/`OUTPUT` clause and reads the single result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertReturningDelegate {
    dialect: Dialect,
    table: String,
    column: String,
}

impl InsertGeneratedIdentifierDelegate for InsertReturningDelegate {
    fn strategy(&self) -> IdentityStrategy {
        IdentityStrategy::Returning
    }

    fn prepare_identifier_generating_insert(&self, columns: &[&str]) -> IdentifierGeneratingInsert {
        let plain = insert_sql(self.dialect, &self.table, columns, 1);
        IdentifierGeneratingInsert {
            sql: self.dialect.append_identity_returning(&plain, &self.column),
            table: self.table.clone(),
            identity_column: self.column.clone(),
            keys: GeneratedKeys::None,
            callable: false,
            out_position: None,
        }
    }

    fn execute_and_extract(
        &self,
        _jdbc: &JdbcCoordinator<'_>,
        insert: &IdentifierGeneratingInsert,
        statement: &mut dyn Statement,
    ) -> Result<Value> {
        let rows = statement.execute_query()?;
        first_key(&rows, insert)
    }
}

/// Captures the key through an output parameter placed after the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutParameterDelegate {
    dialect: Dialect,
    table: String,
    column: String,
}

impl InsertGeneratedIdentifierDelegate for OutParameterDelegate {
    fn strategy(&self) -> IdentityStrategy {
        IdentityStrategy::OutParameter
    }

    fn prepare_identifier_generating_insert(&self, columns: &[&str]) -> IdentifierGeneratingInsert {
        let out_position = columns.len() + 1;
        let plain = insert_sql(self.dialect, &self.table, columns, 1);
        IdentifierGeneratingInsert {
            sql: format!(
                "{} returning {} into {}",
                plain,
                self.dialect.quote_identifier(&self.column),
                self.dialect.placeholder(out_position)
            ),
            table: self.table.clone(),
            identity_column: self.column.clone(),
            keys: GeneratedKeys::None,
            callable: true,
            out_position: Some(out_position),
        }
    }

    fn prepare_statement(
        &self,
        jdbc: &JdbcCoordinator<'_>,
        insert: &IdentifierGeneratingInsert,
    ) -> Result<Box<dyn Statement>> {
        let mut statement = jdbc.prepare_statement(insert.sql(), true, GeneratedKeys::None)?;
        let position = insert.out_position().unwrap_or(1);
        if let Err(e) = statement.register_out_parameter(position) {
            return release_on_exit(Err(e), jdbc.release_statement(statement));
        }
        Ok(statement)
    }

    fn execute_and_extract(
        &self,
        _jdbc: &JdbcCoordinator<'_>,
        insert: &IdentifierGeneratingInsert,
        statement: &mut dyn Statement,
    ) -> Result<Value> {
        statement.execute_update()?;
        let position = insert.out_position().unwrap_or(1);
        let value = statement.out_parameter(position)?;
        if value.is_null() {
            return Err(no_key(insert, "output parameter held no generated identity value"));
        }
        Ok(value)
    }
}

/// The identity delegate chosen for a table, once, from the dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityDelegate {
    GetGeneratedKeys(GetGeneratedKeysDelegate),
    SelectAfterInsert(BasicSelectingDelegate),
    Returning(InsertReturningDelegate),
    OutParameter(OutParameterDelegate),
}

impl IdentityDelegate {
    /// The delegate for an explicit strategy.
    pub fn new(
        strategy: IdentityStrategy,
        dialect: Dialect,
        table: impl Into<String>,
        identity_column: impl Into<String>,
    ) -> Self {
        let table = table.into();
        let column = identity_column.into();
        match strategy {
            IdentityStrategy::GetGeneratedKeys => {
                IdentityDelegate::GetGeneratedKeys(GetGeneratedKeysDelegate {
                    dialect,
                    table,
                    column,
                })
            }
            IdentityStrategy::SelectAfterInsert => {
                IdentityDelegate::SelectAfterInsert(BasicSelectingDelegate {
                    dialect,
                    table,
                    column,
                })
            }
            IdentityStrategy::Returning => IdentityDelegate::Returning(InsertReturningDelegate {
                dialect,
                table,
                column,
            }),
            IdentityStrategy::OutParameter => {
                IdentityDelegate::OutParameter(OutParameterDelegate {
                    dialect,
                    table,
                    column,
                })
            }
        }
    }

    /// The delegate the dialect uses by default.
    pub fn for_dialect(
        dialect: Dialect,
        table: impl Into<String>,
        identity_column: impl Into<String>,
    ) -> Self {
        Self::new(dialect.identity_strategy(), dialect, table, identity_column)
    }

    /// The delegate named by `settings`, falling back to the dialect's.
    pub fn from_settings(
        settings: &MutationSettings,
        dialect: Dialect,
        table: impl Into<String>,
        identity_column: impl Into<String>,
    ) -> Self {
        let strategy = settings
            .identity_strategy
            .unwrap_or_else(|| dialect.identity_strategy());
        Self::new(strategy, dialect, table, identity_column)
    }

    fn inner(&self) -> &dyn InsertGeneratedIdentifierDelegate {
        match self {
            IdentityDelegate::GetGeneratedKeys(d) => d,
            IdentityDelegate::SelectAfterInsert(d) => d,
            IdentityDelegate::Returning(d) => d,
            IdentityDelegate::OutParameter(d) => d,
        }
    }
}

impl InsertGeneratedIdentifierDelegate for IdentityDelegate {
    fn strategy(&self) -> IdentityStrategy {
        self.inner().strategy()
    }

    fn prepare_identifier_generating_insert(&self, columns: &[&str]) -> IdentifierGeneratingInsert {
        self.inner().prepare_identifier_generating_insert(columns)
    }

    fn prepare_statement(
        &self,
        jdbc: &JdbcCoordinator<'_>,
        insert: &IdentifierGeneratingInsert,
    ) -> Result<Box<dyn Statement>> {
        self.inner().prepare_statement(jdbc, insert)
    }

    fn execute_and_extract(
        &self,
        jdbc: &JdbcCoordinator<'_>,
        insert: &IdentifierGeneratingInsert,
        statement: &mut dyn Statement,
    ) -> Result<Value> {
        self.inner().execute_and_extract(jdbc, insert, statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnection;
    use sqlflush_core::QueryErrorKind;

    #[derive(Debug)]
    struct Person {
        name: &'static str,
    }

    struct PersonBinder {
        person: Person,
    }

    impl Binder for PersonBinder {
        fn bind_values(&self, statement: &mut dyn Statement) -> Result<()> {
            statement.bind(1, &Value::from(self.person.name))
        }

        fn entity(&self) -> &dyn fmt::Debug {
            &self.person
        }
    }

    fn binder() -> PersonBinder {
        PersonBinder {
            person: Person { name: "Ann" },
        }
    }

    #[test]
    fn dialect_picks_delegate() {
        assert!(matches!(
            IdentityDelegate::for_dialect(Dialect::Mysql, "person", "id"),
            IdentityDelegate::GetGeneratedKeys(_)
        ));
        assert!(matches!(
            IdentityDelegate::for_dialect(Dialect::Postgres, "person", "id"),
            IdentityDelegate::Returning(_)
        ));
    }

    #[test]
    fn settings_override_dialect_strategy() {
        let settings = MutationSettings::default().identity_strategy(IdentityStrategy::SelectAfterInsert);
        assert!(matches!(
            IdentityDelegate::from_settings(&settings, Dialect::Postgres, "person", "id"),
            IdentityDelegate::SelectAfterInsert(_)
        ));
        assert!(matches!(
            IdentityDelegate::from_settings(&MutationSettings::default(), Dialect::Mysql, "person", "id"),
            IdentityDelegate::GetGeneratedKeys(_)
        ));
    }

    #[test]
    fn returning_sql_shape() {
        let d = IdentityDelegate::for_dialect(Dialect::Sqlite, "person", "id");
        let insert = d.prepare_identifier_generating_insert(&["name"]);
        assert_eq!(
            insert.sql(),
            "insert into \"person\" (\"name\") values (?1) returning \"id\""
        );
    }

    #[test]
    fn out_parameter_follows_values() {
        let d = IdentityDelegate::new(IdentityStrategy::OutParameter, Dialect::Postgres, "person", "id");
        let insert = d.prepare_identifier_generating_insert(&["name", "email"]);
        assert_eq!(insert.out_position(), Some(3));
        assert!(insert.is_callable());
        assert!(insert.sql().ends_with("returning \"id\" into $3"));
    }

    #[test]
    fn generated_keys_round_trip_releases_statement() {
        let conn = MockConnection::new(Dialect::Mysql);
        conn.set_generated_key(Value::BigInt(42));
        let jdbc = JdbcCoordinator::new(&conn, MutationSettings::default());
        let d = IdentityDelegate::for_dialect(Dialect::Mysql, "person", "id");
        let insert = d.prepare_identifier_generating_insert(&["name"]);

        let id = d.perform_insert(&jdbc, &insert, &binder()).unwrap();

        assert_eq!(id, Value::BigInt(42));
        assert_eq!(jdbc.open_statements(), 0);
        assert_eq!(conn.closed(), vec![insert.sql().to_string()]);
        assert_eq!(
            conn.executed(),
            vec![(insert.sql().to_string(), vec![Value::Text("Ann".into())])]
        );
    }

    #[test]
    fn returning_round_trip() {
        let conn = MockConnection::new(Dialect::Sqlite);
        conn.set_generated_key(Value::BigInt(7));
        let jdbc = JdbcCoordinator::new(&conn, MutationSettings::default());
        let d = IdentityDelegate::for_dialect(Dialect::Sqlite, "person", "id");
        let insert = d.prepare_identifier_generating_insert(&["name"]);

        assert_eq!(d.perform_insert(&jdbc, &insert, &binder()).unwrap(), Value::BigInt(7));
        assert_eq!(jdbc.open_statements(), 0);
    }

    #[test]
    fn select_after_insert_round_trip() {
        let conn = MockConnection::new(Dialect::Sqlite);
        conn.set_generated_key(Value::BigInt(9));
        let jdbc = JdbcCoordinator::new(&conn, MutationSettings::default());
        let d = IdentityDelegate::new(IdentityStrategy::SelectAfterInsert, Dialect::Sqlite, "person", "id");
        let insert = d.prepare_identifier_generating_insert(&["name"]);

        assert_eq!(d.perform_insert(&jdbc, &insert, &binder()).unwrap(), Value::BigInt(9));
        assert!(conn.queries().contains(&"select last_insert_rowid()".to_string()));
    }

    #[test]
    fn out_parameter_round_trip() {
        let conn = MockConnection::new(Dialect::Postgres);
        conn.set_generated_key(Value::BigInt(11));
        let jdbc = JdbcCoordinator::new(&conn, MutationSettings::default());
        let d = IdentityDelegate::new(IdentityStrategy::OutParameter, Dialect::Postgres, "person", "id");
        let insert = d.prepare_identifier_generating_insert(&["name"]);

        assert_eq!(d.perform_insert(&jdbc, &insert, &binder()).unwrap(), Value::BigInt(11));
        assert_eq!(jdbc.open_statements(), 0);
    }

    #[test]
    fn execute_failure_is_translated_and_released() {
        let conn = MockConnection::new(Dialect::Postgres);
        conn.fail_execute("person", "23505", "duplicate key value violates unique constraint \"person_name_key\"");
        let jdbc = JdbcCoordinator::new(&conn, MutationSettings::default());
        let d = IdentityDelegate::for_dialect(Dialect::Postgres, "person", "id");
        let insert = d.prepare_identifier_generating_insert(&["name"]);

        let err = d.perform_insert(&jdbc, &insert, &binder()).unwrap_err();

        assert_eq!(err.sqlstate(), Some("23505"));
        assert_eq!(err.sql(), Some(insert.sql()));
        assert!(err.to_string().contains("Ann"), "{err}");
        match &err {
            Error::Query(q) => {
                assert_eq!(q.kind, QueryErrorKind::Constraint);
                assert_eq!(q.constraint.as_deref(), Some("person_name_key"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(jdbc.open_statements(), 0);
        assert_eq!(conn.closed().len(), 1);
    }

    #[test]
    fn missing_key_is_identifier_error() {
        let conn = MockConnection::new(Dialect::Mysql);
        conn.set_generated_key(Value::Null);
        let jdbc = JdbcCoordinator::new(&conn, MutationSettings::default());
        let d = IdentityDelegate::for_dialect(Dialect::Mysql, "person", "id");
        let insert = d.prepare_identifier_generating_insert(&["name"]);

        let err = d.perform_insert(&jdbc, &insert, &binder()).unwrap_err();
        match err {
            Error::Identifier(e) => assert!(e.entity.contains("Ann")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(jdbc.open_statements(), 0);
    }
}
