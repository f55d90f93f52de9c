//! Error types for mutation execution.

use crate::mapping::{MutationType, ParameterUsage};
use std::fmt;

/// The primary error type for all sqlflush operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, lost, closed)
    Connection(ConnectionError),
    /// Statement preparation and execution errors reported by the driver
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// A column/usage pair has no registered parameter
    UnknownParameter(UnknownParameterError),
    /// Affected row count did not match the statement's expectation
    StaleState(StaleStateError),
    /// One or more statements failed to release
    Release(ReleaseError),
    /// The database produced no usable generated identifier
    Identifier(IdentifierError),
    /// Internal state violated (programming error in the caller)
    IllegalState(String),
    /// Configuration errors
    Config(ConfigError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// Connection already closed
    Closed,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub detail: Option<String>,
    /// Name of the violated constraint, when the dialect could extract it
    pub constraint: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Data exception (truncation, invalid value)
    Data,
    /// Deadlock detected
    Deadlock,
    /// Serialization failure (retry may succeed)
    Serialization,
    /// Lock wait or statement timeout
    Timeout,
    /// Connection failure reported through a statement
    Connection,
    /// Feature not supported by the driver
    Unsupported,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

/// Raised when a `(table, column, usage)` lookup has no registered parameter.
///
/// Carries the full context so callers never have to parse the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownParameterError {
    pub mutation_type: MutationType,
    pub role_path: String,
    pub table: String,
    pub column: String,
    pub usage: ParameterUsage,
}

/// Row-count expectation failure.
///
/// The driver reported success but the number of affected rows differs from
/// what the operation requires. Surrounding layers map this onto optimistic
/// lock failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleStateError {
    pub table: String,
    pub sql: String,
    pub expected: u64,
    pub actual: u64,
    /// Row position within a batch, if the statement was batched
    pub batch_position: Option<usize>,
}

/// Aggregated release failures.
#[derive(Debug)]
pub struct ReleaseError {
    pub failures: Vec<Error>,
}

#[derive(Debug)]
pub struct IdentifierError {
    pub sql: String,
    pub entity: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this a retryable error (deadlock, serialization, timeouts)?
    ///
    /// Nothing in this workspace retries; the flag is for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::Deadlock | QueryErrorKind::Serialization | QueryErrorKind::Timeout
            ),
            _ => false,
        }
    }

    /// Is this a row-count expectation failure?
    pub fn is_stale_state(&self) -> bool {
        matches!(self, Error::StaleState(_))
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::StaleState(s) => Some(&s.sql),
            Error::Identifier(i) => Some(&i.sql),
            _ => None,
        }
    }

    /// Name of the violated constraint, if known.
    pub fn constraint(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.constraint.as_deref(),
            _ => None,
        }
    }

    /// Shorthand for an [`Error::IllegalState`].
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Error::IllegalState(message.into())
    }
}

impl QueryError {
    /// Create a query error with no SQL or SQLSTATE attached.
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sql: None,
            sqlstate: None,
            message: message.into(),
            detail: None,
            constraint: None,
            source: None,
        }
    }

    /// Attach the statement text.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Attach a SQLSTATE code.
    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23505")
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23503")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)?;
                } else {
                    write!(f, "Query error: {}", e.message)?;
                }
                if let Some(sql) = &e.sql {
                    write!(f, " [{sql}]")?;
                }
                Ok(())
            }
            Error::Type(e) => write!(f, "Type error: {e}"),
            Error::UnknownParameter(e) => write!(f, "{e}"),
            Error::StaleState(e) => write!(f, "{e}"),
            Error::Release(e) => write!(f, "{e}"),
            Error::Identifier(e) => write!(f, "{e}"),
            Error::IllegalState(msg) => write!(f, "Illegal state: {msg}"),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Release(e) => e
                .failures
                .first()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for UnknownParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unable to locate parameter for {} of `{}`: table `{}`, column `{}` ({})",
            self.mutation_type, self.role_path, self.table, self.column, self.usage
        )
    }
}

impl fmt::Display for StaleStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unexpected row count for table `{}`: expected {}, actual {}",
            self.table, self.expected, self.actual
        )?;
        if let Some(position) = self.batch_position {
            write!(f, " (batch position {position})")?;
        }
        write!(f, " [{}]", self.sql)
    }
}

impl fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to release {} statement(s)", self.failures.len())?;
        if let Some(first) = self.failures.first() {
            write!(f, ": {first}")?;
        }
        Ok(())
    }
}

impl fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Could not obtain generated identifier for {}: {} [{}]",
            self.entity, self.message, self.sql
        )
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<UnknownParameterError> for Error {
    fn from(err: UnknownParameterError) -> Self {
        Error::UnknownParameter(err)
    }
}

impl From<StaleStateError> for Error {
    fn from(err: StaleStateError) -> Self {
        Error::StaleState(err)
    }
}

impl From<ReleaseError> for Error {
    fn from(err: ReleaseError) -> Self {
        Error::Release(err)
    }
}

impl From<IdentifierError> for Error {
    fn from(err: IdentifierError) -> Self {
        Error::Identifier(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for sqlflush operations.
pub type Result<T> = std::result::Result<T, Error>;
