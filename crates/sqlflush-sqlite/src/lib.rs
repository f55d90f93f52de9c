//! SQLite driver for sqlflush.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate implements the blocking `Connection` and `Statement` traits
//! from sqlflush-core on top of libsqlite3, so mutation executors can run
//! against a real database.
//!
//! # Features
//!
//! - Prepared statements with client-side batching
//! - Generated keys via `last_insert_rowid` and `RETURNING`
//! - Constraint failures reported with SQLSTATE codes and constraint names
//! - In-memory and file-based databases
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlflush_sqlite::SqliteConnection;
//! use sqlflush_core::{Connection, GeneratedKeys, Value};
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("create table users (id integer primary key, name text)")?;
//!
//! let mut stmt = conn.prepare("insert into users (name) values (?1)", GeneratedKeys::column("id"))?;
//! stmt.bind(1, &Value::Text("Alice".into()))?;
//! stmt.execute_update()?;
//! let keys = stmt.generated_keys()?;
//! ```
//!
//! # Type Mapping
//!
//! | Rust Type | SQLite Type |
//! |-----------|-------------|
//! | `bool` | INTEGER (0/1) |
//! | `i8`, `i16`, `i32`, `i64` | INTEGER |
//! | `f32`, `f64` | REAL |
//! | `String`, decimals | TEXT |
//! | `Vec<u8>` | BLOB |
//! | `Uuid` | BLOB (16 bytes) |
//! | `Json` | TEXT |
//!
//! Integers always read back as `Value::BigInt` and reals as `Value::Double`.
//!
//! # Limitations
//!
//! SQLite has no stored procedures, so callable statements and output
//! parameters fail with SQLSTATE `0A000`. Statement timeouts are ignored;
//! the connection's busy timeout governs lock waits.

pub mod connection;
pub mod ffi;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection, SqliteStatement};

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Re-export the SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
