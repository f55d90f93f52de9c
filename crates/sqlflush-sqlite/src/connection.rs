//! SQLite connection and prepared statement implementation.
//!
//! This module provides safe wrappers around SQLite's C API and implements
//! the `Connection` and `Statement` traits from sqlflush-core.
//!
//! ```rust,ignore
//! use sqlflush_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("create table person (id integer primary key, name text)")?;
//! ```

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::result_large_err)] // Error type is defined in sqlflush-core
#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers

use crate::ffi;
use crate::types;
use sqlflush_core::{
    ColumnInfo, Connection, ConnectionError, ConnectionErrorKind, Dialect, Error, GeneratedKeys,
    QueryError, QueryErrorKind, Result, Row, Statement, Value,
};
use std::collections::BTreeMap;
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Open in multi-thread mode.
    pub no_mutex: bool,
    /// Open in serialized mode.
    pub full_mutex: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access (database must exist).
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.no_mutex {
            flags |= ffi::SQLITE_OPEN_NOMUTEX;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    #[must_use]
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    #[must_use]
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// Database handle shared by the connection and every statement it prepared.
struct SqliteInner {
    db: *mut ffi::sqlite3,
}

// SAFETY: the handle is only touched while the surrounding Mutex is held.
unsafe impl Send for SqliteInner {}

impl Drop for SqliteInner {
    fn drop(&mut self) {
        if !self.db.is_null() {
            // SAFETY: db is valid; close_v2 defers until statements are finalized
            unsafe {
                ffi::sqlite3_close_v2(self.db);
            }
        }
    }
}

fn lock(inner: &Mutex<SqliteInner>) -> Result<MutexGuard<'_, SqliteInner>> {
    inner.lock().map_err(|_| {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: "SQLite connection lock poisoned".to_string(),
            source: None,
        })
    })
}

/// A connection to a SQLite database.
///
/// Statements prepared from it keep the database handle alive, so a
/// statement may outlive the `SqliteConnection` value itself.
pub struct SqliteConnection {
    inner: Arc<Mutex<SqliteInner>>,
    path: String,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    #[tracing::instrument(level = "debug", skip(config), fields(path = %config.path))]
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is valid, errmsg returns a valid C string
                unsafe {
                    let msg = errmsg(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };

            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database: {msg}"),
                source: None,
            }));
        }

        // SAFETY: db is valid
        unsafe {
            ffi::sqlite3_extended_result_codes(db, 1);
            if config.busy_timeout_ms > 0 {
                let ms = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
                ffi::sqlite3_busy_timeout(db, ms);
            }
        }

        tracing::debug!(version = ffi::version(), "Opened SQLite database");

        Ok(Self {
            inner: Arc::new(Mutex::new(SqliteInner { db })),
            path: config.path.clone(),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Execute SQL directly without preparing (for DDL, etc.)
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let inner = lock(&self.inner)?;
        let c_sql = CString::new(sql).map_err(|_| {
            Error::Query(
                QueryError::new(QueryErrorKind::Syntax, "SQL contains null byte").with_sql(sql),
            )
        })?;

        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_exec(inner.db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg)
        };

        if rc != ffi::SQLITE_OK {
            let msg = if errmsg.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: errmsg is valid and owned by us
                unsafe {
                    let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg.cast());
                    msg
                }
            };
            // SAFETY: db is valid
            let code = unsafe { ffi::sqlite3_extended_errcode(inner.db) };
            return Err(driver_error(code, msg, sql));
        }

        Ok(())
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> Result<i64> {
        let inner = lock(&self.inner)?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(inner.db) })
    }

    /// Get the number of rows changed by the last statement.
    pub fn changes(&self) -> Result<u64> {
        let inner = lock(&self.inner)?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_changes(inner.db) } as u64)
    }

    fn prepare_statement(&self, sql: &str, keys: GeneratedKeys) -> Result<SqliteStatement> {
        let inner = lock(&self.inner)?;
        let stmt = prepare_stmt(inner.db, sql)?;
        // SAFETY: stmt is valid
        let parameter_count = unsafe { ffi::sqlite3_bind_parameter_count(stmt) } as usize;
        tracing::trace!(sql = sql, parameters = parameter_count, "Prepared SQLite statement");
        drop(inner);

        Ok(SqliteStatement {
            inner: Arc::clone(&self.inner),
            stmt,
            sql: sql.to_string(),
            keys,
            parameter_count,
            params: BTreeMap::new(),
            batch: Vec::new(),
            last_rowid: None,
        })
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn prepare(&self, sql: &str, keys: GeneratedKeys) -> Result<Box<dyn Statement>> {
        Ok(Box::new(self.prepare_statement(sql, keys)?))
    }

    fn prepare_call(&self, sql: &str) -> Result<Box<dyn Statement>> {
        Err(Error::Query(
            QueryError::new(
                QueryErrorKind::Unsupported,
                "SQLite does not support callable statements",
            )
            .with_sql(sql)
            .with_sqlstate("0A000"),
        ))
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut stmt = self.prepare_statement(sql, GeneratedKeys::None)?;
        for (i, param) in params.iter().enumerate() {
            stmt.bind(i + 1, param)?;
        }
        let count = stmt.execute_update();
        stmt.close()?;
        count
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.prepare_statement(sql, GeneratedKeys::None)?;
        for (i, param) in params.iter().enumerate() {
            stmt.bind(i + 1, param)?;
        }
        let rows = stmt.execute_query();
        stmt.close()?;
        rows
    }
}

/// A prepared SQLite statement.
///
/// Bound values are held on the Rust side and pushed to SQLite at execution
/// time, so batch entries can be replayed one after another.
pub struct SqliteStatement {
    inner: Arc<Mutex<SqliteInner>>,
    stmt: *mut ffi::sqlite3_stmt,
    sql: String,
    keys: GeneratedKeys,
    parameter_count: usize,
    params: BTreeMap<usize, Value>,
    batch: Vec<BTreeMap<usize, Value>>,
    last_rowid: Option<i64>,
}

impl SqliteStatement {
    fn check_open(&self) -> Result<()> {
        if self.stmt.is_null() {
            return Err(Error::Query(
                QueryError::new(QueryErrorKind::Database, "statement is closed").with_sql(&self.sql),
            ));
        }
        Ok(())
    }

    /// Number of `?N` parameters in the statement.
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// Reset the handle and push `params` into it.
    fn bind_all(&self, db: *mut ffi::sqlite3, params: &BTreeMap<usize, Value>) -> Result<()> {
        // SAFETY: stmt is valid (checked by callers)
        unsafe {
            ffi::sqlite3_reset(self.stmt);
            ffi::sqlite3_clear_bindings(self.stmt);
        }
        for (position, value) in params {
            let index = c_int::try_from(*position).unwrap_or(c_int::MAX);
            // SAFETY: stmt is valid, index was range-checked in bind()
            let rc = unsafe { types::bind_value(self.stmt, index, value) };
            if rc != ffi::SQLITE_OK {
                // SAFETY: db is valid
                let msg = unsafe { errmsg(db) };
                return Err(Error::Query(
                    QueryError::new(
                        QueryErrorKind::Database,
                        format!("Failed to bind parameter {position}: {msg}"),
                    )
                    .with_sql(&self.sql),
                ));
            }
        }
        Ok(())
    }

    /// Run the statement to completion with `params`, collecting any rows.
    fn run(&mut self, params: &BTreeMap<usize, Value>, collect: bool) -> Result<(u64, Vec<Row>)> {
        self.check_open()?;
        let inner = lock(&self.inner)?;
        self.bind_all(inner.db, params)?;

        let mut rows = Vec::new();
        let mut columns: Option<Arc<ColumnInfo>> = None;
        loop {
            // SAFETY: stmt is valid
            let rc = unsafe { ffi::sqlite3_step(self.stmt) };
            match rc {
                ffi::SQLITE_ROW => {
                    if !collect {
                        continue;
                    }
                    // SAFETY: stmt is valid
                    let col_count = unsafe { ffi::sqlite3_column_count(self.stmt) };
                    let columns = columns.get_or_insert_with(|| {
                        let names = (0..col_count)
                            .map(|i| {
                                // SAFETY: stmt is valid, i < column count
                                unsafe { types::column_name(self.stmt, i) }
                                    .unwrap_or_else(|| format!("col{i}"))
                            })
                            .collect();
                        Arc::new(ColumnInfo::new(names))
                    });
                    let values = (0..col_count)
                        // SAFETY: stmt is valid, we just got SQLITE_ROW
                        .map(|i| unsafe { types::read_column(self.stmt, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => {
                    let err = step_error(inner.db, &self.sql);
                    // SAFETY: stmt is valid
                    unsafe { ffi::sqlite3_reset(self.stmt) };
                    return Err(err);
                }
            }
        }

        // SAFETY: db and stmt are valid
        let changes = unsafe {
            ffi::sqlite3_reset(self.stmt);
            ffi::sqlite3_changes(inner.db)
        } as u64;
        if self.keys.is_requested() {
            // SAFETY: db is valid
            self.last_rowid = Some(unsafe { ffi::sqlite3_last_insert_rowid(inner.db) });
        }
        tracing::trace!(sql = %self.sql, changes = changes, rows = rows.len(), "Stepped SQLite statement");
        Ok((changes, rows))
    }

    fn unsupported(&self, what: &str) -> Error {
        Error::Query(
            QueryError::new(
                QueryErrorKind::Unsupported,
                format!("SQLite does not support {what}"),
            )
            .with_sql(&self.sql)
            .with_sqlstate("0A000"),
        )
    }

    fn finalize(&mut self) {
        if !self.stmt.is_null() {
            // SAFETY: stmt is valid and finalized exactly once
            unsafe { ffi::sqlite3_finalize(self.stmt) };
            self.stmt = ptr::null_mut();
        }
    }
}

impl Statement for SqliteStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&mut self, position: usize, value: &Value) -> Result<()> {
        self.check_open()?;
        if position == 0 || position > self.parameter_count {
            return Err(Error::Query(
                QueryError::new(
                    QueryErrorKind::Data,
                    format!(
                        "parameter index {position} out of range (statement has {})",
                        self.parameter_count
                    ),
                )
                .with_sql(&self.sql)
                .with_sqlstate("22023"),
            ));
        }
        self.params.insert(position, value.clone());
        Ok(())
    }

    fn clear_parameters(&mut self) -> Result<()> {
        self.params.clear();
        Ok(())
    }

    fn execute_update(&mut self) -> Result<u64> {
        let params = std::mem::take(&mut self.params);
        let result = self.run(&params, false);
        self.params = params;
        result.map(|(changes, _)| changes)
    }

    fn execute_query(&mut self) -> Result<Vec<Row>> {
        let params = std::mem::take(&mut self.params);
        let result = self.run(&params, true);
        self.params = params;
        result.map(|(_, rows)| rows)
    }

    fn add_batch(&mut self) -> Result<()> {
        self.check_open()?;
        let entry = std::mem::take(&mut self.params);
        self.batch.push(entry);
        Ok(())
    }

    fn execute_batch(&mut self) -> Result<Vec<u64>> {
        self.check_open()?;
        let entries = std::mem::take(&mut self.batch);
        let mut counts = Vec::with_capacity(entries.len());
        for entry in &entries {
            let (changes, _) = self.run(entry, false)?;
            counts.push(changes);
        }
        tracing::trace!(sql = %self.sql, entries = counts.len(), "Executed SQLite batch");
        Ok(counts)
    }

    fn generated_keys(&mut self) -> Result<Vec<Row>> {
        self.check_open()?;
        let GeneratedKeys::Columns(columns) = &self.keys else {
            return Ok(Vec::new());
        };
        let name = columns.first().cloned().unwrap_or_else(|| "rowid".to_string());
        Ok(self
            .last_rowid
            .map(|rowid| vec![Row::new(vec![name], vec![Value::BigInt(rowid)])])
            .unwrap_or_default())
    }

    fn register_out_parameter(&mut self, _position: usize) -> Result<()> {
        Err(self.unsupported("output parameters"))
    }

    fn out_parameter(&self, _position: usize) -> Result<Value> {
        Err(self.unsupported("output parameters"))
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> Result<()> {
        tracing::trace!(
            sql = %self.sql,
            timeout_ms = timeout.as_millis() as u64,
            "SQLite ignores statement timeouts; busy timeout applies"
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.stmt.is_null() {
            return Ok(());
        }
        // Hold the lock so no other statement is stepping while we finalize.
        let shared = Arc::clone(&self.inner);
        let inner = lock(&shared)?;
        self.finalize();
        drop(inner);
        self.batch.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.stmt.is_null()
    }
}

impl Drop for SqliteStatement {
    fn drop(&mut self) {
        self.finalize();
    }
}

fn prepare_stmt(db: *mut ffi::sqlite3, sql: &str) -> Result<*mut ffi::sqlite3_stmt> {
    let c_sql = CString::new(sql).map_err(|_| {
        Error::Query(QueryError::new(QueryErrorKind::Syntax, "SQL contains null byte").with_sql(sql))
    })?;

    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
    // SAFETY: All pointers are valid
    let rc = unsafe { ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), -1, &mut stmt, ptr::null_mut()) };

    if rc != ffi::SQLITE_OK {
        return Err(step_error(db, sql));
    }
    if stmt.is_null() {
        return Err(Error::Query(
            QueryError::new(QueryErrorKind::Syntax, "SQL contains no statement").with_sql(sql),
        ));
    }

    Ok(stmt)
}

/// # Safety
/// `db` must be a valid connection handle.
unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: upheld by the caller; errmsg never returns null for a valid handle
    unsafe {
        let ptr = ffi::sqlite3_errmsg(db);
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (code, msg) = unsafe { (ffi::sqlite3_extended_errcode(db), errmsg(db)) };
    driver_error(code, msg, sql)
}

/// Build a query error carrying a SQLSTATE the dialect layer can classify.
fn driver_error(code: c_int, message: String, sql: &str) -> Error {
    let (kind, sqlstate) = classify(code, &message);
    let mut err = QueryError::new(kind, message).with_sql(sql);
    if let Some(state) = sqlstate {
        err = err.with_sqlstate(state);
    }
    err.constraint = Dialect::Sqlite.extract_constraint_name(&err.message);
    err.detail = Some(format!("sqlite error code {code}"));
    Error::Query(err)
}

fn classify(code: c_int, message: &str) -> (QueryErrorKind, Option<&'static str>) {
    match code {
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
            return (QueryErrorKind::Constraint, Some("23505"));
        }
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return (QueryErrorKind::Constraint, Some("23503")),
        ffi::SQLITE_CONSTRAINT_NOTNULL => return (QueryErrorKind::Constraint, Some("23502")),
        ffi::SQLITE_CONSTRAINT_CHECK => return (QueryErrorKind::Constraint, Some("23514")),
        _ => {}
    }
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => (QueryErrorKind::Constraint, Some("23000")),
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => (QueryErrorKind::Deadlock, None),
        ffi::SQLITE_INTERRUPT => (QueryErrorKind::Timeout, None),
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH => (QueryErrorKind::Permission, Some("42501")),
        ffi::SQLITE_NOTFOUND => (QueryErrorKind::NotFound, None),
        ffi::SQLITE_TOOBIG | ffi::SQLITE_MISMATCH => (QueryErrorKind::Data, Some("22000")),
        ffi::SQLITE_RANGE => (QueryErrorKind::Data, Some("22023")),
        ffi::SQLITE_ERROR if message.starts_with("no such table") => {
            (QueryErrorKind::NotFound, Some("42S02"))
        }
        ffi::SQLITE_ERROR if message.starts_with("no such column") => {
            (QueryErrorKind::NotFound, Some("42S22"))
        }
        ffi::SQLITE_ERROR if message.contains("syntax error") => {
            (QueryErrorKind::Syntax, Some("42000"))
        }
        _ => (QueryErrorKind::Database, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_db() -> SqliteConnection {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw(
            "create table person (id integer primary key, name text not null, email text unique)",
        )
        .unwrap();
        conn
    }

    fn query_error(err: Error) -> QueryError {
        match err {
            Error::Query(q) => q,
            other => panic!("expected query error, got {other}"),
        }
    }

    #[test]
    fn test_open_memory() {
        let conn = SqliteConnection::open_memory().unwrap();
        assert_eq!(conn.path(), ":memory:");
        assert_eq!(conn.dialect(), Dialect::Sqlite);
    }

    #[test]
    fn test_execute_raw() {
        let conn = person_db();
        conn.execute_raw("insert into person (name) values ('Alice')")
            .unwrap();
        assert_eq!(conn.changes().unwrap(), 1);
        assert_eq!(conn.last_insert_rowid().unwrap(), 1);
    }

    #[test]
    fn test_one_shot_execute_and_query() {
        let conn = person_db();
        let n = conn
            .execute(
                "insert into person (name, email) values (?1, ?2)",
                &[Value::from("Alice"), Value::Null],
            )
            .unwrap();
        assert_eq!(n, 1);

        let rows = conn
            .query("select id, name, email from person where name = ?1", &[Value::from("Alice")])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("id"), Some(&Value::BigInt(1)));
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::Text("Alice".into())));
        assert_eq!(rows[0].get_by_name("email"), Some(&Value::Null));
    }

    #[test]
    fn test_statement_reuse_rebinds() {
        let conn = person_db();
        let mut stmt = conn
            .prepare("insert into person (name) values (?1)", GeneratedKeys::None)
            .unwrap();
        for name in ["a", "b", "c"] {
            stmt.bind(1, &Value::from(name)).unwrap();
            assert_eq!(stmt.execute_update().unwrap(), 1);
        }
        stmt.close().unwrap();

        let rows = conn.query("select count(*) as n from person", &[]).unwrap();
        assert_eq!(rows[0].get(0), Some(&Value::BigInt(3)));
    }

    #[test]
    fn test_generated_keys_report_rowid() {
        let conn = person_db();
        let mut stmt = conn
            .prepare("insert into person (name) values (?1)", GeneratedKeys::column("id"))
            .unwrap();
        stmt.bind(1, &Value::from("Alice")).unwrap();
        stmt.execute_update().unwrap();

        let keys = stmt.generated_keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].get_by_name("id"), Some(&Value::BigInt(1)));
    }

    #[test]
    fn test_returning_rows() {
        let conn = person_db();
        let mut stmt = conn
            .prepare("insert into person (name) values (?1) returning id", GeneratedKeys::None)
            .unwrap();
        stmt.bind(1, &Value::from("Alice")).unwrap();
        let rows = stmt.execute_query().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(0), Some(&Value::BigInt(1)));
    }

    #[test]
    fn test_batch_counts_per_entry() {
        let conn = person_db();
        conn.execute_raw("insert into person (name) values ('a'), ('b')")
            .unwrap();
        let mut stmt = conn
            .prepare("update person set name = ?1 where id = ?2", GeneratedKeys::None)
            .unwrap();
        for id in [1_i64, 2, 99] {
            stmt.bind(1, &Value::from("z")).unwrap();
            stmt.bind(2, &Value::from(id)).unwrap();
            stmt.add_batch().unwrap();
        }
        assert_eq!(stmt.execute_batch().unwrap(), vec![1, 1, 0]);
    }

    #[test]
    fn test_unique_violation_has_sqlstate_and_constraint() {
        let conn = person_db();
        conn.execute_raw("insert into person (name, email) values ('a', 'a@x')")
            .unwrap();
        let err = conn
            .execute(
                "insert into person (name, email) values (?1, ?2)",
                &[Value::from("b"), Value::from("a@x")],
            )
            .unwrap_err();
        let q = query_error(err);
        assert_eq!(q.kind, QueryErrorKind::Constraint);
        assert_eq!(q.sqlstate.as_deref(), Some("23505"));
        assert_eq!(q.constraint.as_deref(), Some("person.email"));
    }

    #[test]
    fn test_not_null_violation() {
        let conn = person_db();
        let err = conn
            .execute("insert into person (name) values (?1)", &[Value::Null])
            .unwrap_err();
        assert_eq!(query_error(err).sqlstate.as_deref(), Some("23502"));
    }

    #[test]
    fn test_missing_table_fails_prepare() {
        let conn = person_db();
        let err = conn
            .prepare("insert into nowhere (x) values (?1)", GeneratedKeys::None)
            .err()
            .unwrap();
        let q = query_error(err);
        assert_eq!(q.kind, QueryErrorKind::NotFound);
        assert_eq!(q.sqlstate.as_deref(), Some("42S02"));
    }

    #[test]
    fn test_bind_out_of_range() {
        let conn = person_db();
        let mut stmt = conn
            .prepare("delete from person where id = ?1", GeneratedKeys::None)
            .unwrap();
        let q = query_error(stmt.bind(2, &Value::from(1_i64)).unwrap_err());
        assert_eq!(q.kind, QueryErrorKind::Data);
    }

    #[test]
    fn test_callables_unsupported() {
        let conn = person_db();
        let q = query_error(conn.prepare_call("{call next_id(?)}").err().unwrap());
        assert_eq!(q.kind, QueryErrorKind::Unsupported);
        assert_eq!(q.sqlstate.as_deref(), Some("0A000"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let conn = person_db();
        let mut stmt = conn
            .prepare("delete from person", GeneratedKeys::None)
            .unwrap();
        assert!(!stmt.is_closed());
        stmt.close().unwrap();
        stmt.close().unwrap();
        assert!(stmt.is_closed());
        assert!(stmt.execute_update().is_err());
    }

    #[test]
    fn test_statement_outlives_connection_value() {
        let conn = person_db();
        let mut stmt = conn
            .prepare("insert into person (name) values (?1)", GeneratedKeys::None)
            .unwrap();
        drop(conn);
        stmt.bind(1, &Value::from("late")).unwrap();
        assert_eq!(stmt.execute_update().unwrap(), 1);
    }

    #[test]
    fn test_value_types_round_trip_through_storage() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("create table t (b integer, f real, d text, j text, u blob)")
            .unwrap();
        conn.execute(
            "insert into t values (?1, ?2, ?3, ?4, ?5)",
            &[
                Value::Bool(true),
                Value::Float(1.5),
                Value::Decimal("12.50".into()),
                Value::Json(serde_json::json!({"a": 1})),
                Value::Uuid([7; 16]),
            ],
        )
        .unwrap();
        let row = conn.query("select * from t", &[]).unwrap().remove(0);
        assert_eq!(row.get(0), Some(&Value::BigInt(1)));
        assert_eq!(row.get(1), Some(&Value::Double(1.5)));
        assert_eq!(row.get(2), Some(&Value::Text("12.50".into())));
        assert_eq!(row.get(3), Some(&Value::Text(r#"{"a":1}"#.into())));
        assert_eq!(row.get(4), Some(&Value::Bytes(vec![7; 16])));
    }
}
