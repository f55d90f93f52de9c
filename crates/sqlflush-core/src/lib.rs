//! Core types and traits for sqlflush.
//!
//! This crate provides the collaborator abstractions the mutation layer is
//! written against:
//!
//! - `Connection` and `Statement` traits for a blocking, JDBC-shaped driver
//! - `Dialect` for identity SQL and error classification
//! - `TableMapping` and friends describing the physical tables of an entity
//! - `Value` and `Row` for bound parameters and read-back results
//! - the `Error` taxonomy shared by every crate in the workspace

pub mod connection;
pub mod dialect;
pub mod error;
pub mod mapping;
pub mod row;
pub mod value;

pub use connection::{Connection, GeneratedKeys, Statement};
pub use dialect::{Dialect, IdentityStrategy};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, IdentifierError, QueryError,
    QueryErrorKind, ReleaseError, Result, StaleStateError, TypeError, UnknownParameterError,
};
pub use mapping::{MutationType, ParameterUsage, TableMapping};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
