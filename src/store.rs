//! SQLite-backed relational store, optionally SQLCipher-encrypted.
//!
//! The storage mode is chosen once, when the store is opened. An encrypted
//! store is keyed before anything else touches it and is then probed with a
//! read of `sqlite_master`; a wrong or missing key surfaces as
//! [`LedgerError::Authentication`] instead of a later, confusing failure.

use std::{fs, path::Path};

use log::{debug, warn};
use rusqlite::{Connection, ErrorCode, OptionalExtension, ToSql, params};
use serde::Serialize;

use crate::{
    data::{Value, quote_ident},
    error::{LedgerError, Result},
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StorageMode {
    #[default]
    Plain,
    Encrypted(String),
}

impl StorageMode {
    pub fn from_key(key: Option<String>) -> Self {
        match key {
            Some(key) if !key.is_empty() => StorageMode::Encrypted(key),
            _ => StorageMode::Plain,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, StorageMode::Encrypted(_))
    }
}

/// One column as reported by table introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub primary_key: bool,
}

/// A fetched row: column names paired with typed values, in table order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<(String, Value)> {
        self.fields
    }
}

/// Comparison applied by [`Store::find_row_matching`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    /// Case-insensitive equality.
    Equals(String),
    /// SQL `LIKE` pattern; a backslash escapes a literal `%` or `_`.
    Like(String),
}

pub struct Store {
    conn: Connection,
    label: String,
}

impl Store {
    /// A refused open does not leave a new, empty database file behind.
    pub fn open(path: &Path, mode: &StorageMode) -> Result<Self> {
        let label = path.display().to_string();
        let existed = path.exists();
        let conn = match open_connection(path, &label, mode) {
            Ok(conn) => conn,
            Err(err) => {
                if !existed && path.exists() {
                    if let Err(remove) = fs::remove_file(path) {
                        warn!("Could not remove {label} after a failed open: {remove}");
                    }
                }
                return Err(err);
            }
        };
        debug!(
            "Opened {} store at {label}",
            if mode.is_encrypted() { "encrypted" } else { "plain" }
        );
        Ok(Self { conn, label })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            label: ":memory:".to_string(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Columns of `table` in declaration order; empty when the table is absent.
    pub fn table_info(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get("name")?,
                    declared_type: row.get("type")?,
                    primary_key: row.get::<_, i64>("pk")? > 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    pub fn count(&self, table: &str) -> Result<usize> {
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn rename_table(&self, from: &str, to: &str) -> Result<()> {
        self.conn.execute_batch(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(from),
            quote_ident(to)
        ))?;
        Ok(())
    }

    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))?;
        Ok(())
    }

    pub fn rows(&self, table: &str) -> Result<Vec<Record>> {
        self.query_records(&format!("SELECT * FROM {}", quote_ident(table)), &[])
    }

    /// The first `limit` rows of `table`.
    pub fn preview(&self, table: &str, limit: usize) -> Result<Vec<Record>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_records(
            &format!("SELECT * FROM {} LIMIT ?1", quote_ident(table)),
            &[&limit as &dyn ToSql],
        )
    }

    /// First row whose `column` equals `value`, ignoring case.
    pub fn find_row(&self, table: &str, column: &str, value: &str) -> Result<Option<Record>> {
        if value.is_empty() {
            return Ok(None);
        }
        self.find_row_matching(table, &[(column, Match::Equals(value.to_string()))])
    }

    /// First row satisfying every `(column, Match)` pair.
    pub fn find_row_matching(&self, table: &str, criteria: &[(&str, Match)]) -> Result<Option<Record>> {
        if criteria.is_empty() {
            return Ok(None);
        }
        let mut conditions = Vec::with_capacity(criteria.len());
        let mut values = Vec::with_capacity(criteria.len());
        for (idx, (column, matcher)) in criteria.iter().enumerate() {
            let placeholder = idx + 1;
            match matcher {
                Match::Equals(value) => {
                    conditions.push(format!(
                        "LOWER({}) = LOWER(?{placeholder})",
                        quote_ident(column)
                    ));
                    values.push(value.as_str());
                }
                Match::Like(pattern) => {
                    conditions.push(format!(
                        "{} LIKE ?{placeholder} ESCAPE '\\'",
                        quote_ident(column)
                    ));
                    values.push(pattern.as_str());
                }
            }
        }
        let sql = format!(
            "SELECT * FROM {} WHERE {} LIMIT 1",
            quote_ident(table),
            conditions.join(" AND ")
        );
        let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        Ok(self.query_records(&sql, &params)?.into_iter().next())
    }

    pub(crate) fn query_records(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let records = stmt
            .query_map(params, |row| {
                let mut fields = Vec::with_capacity(names.len());
                for (idx, name) in names.iter().enumerate() {
                    fields.push((name.clone(), row.get::<_, Value>(idx)?));
                }
                Ok(Record::new(fields))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

fn open_connection(path: &Path, label: &str, mode: &StorageMode) -> Result<Connection> {
    let conn = Connection::open(path)?;
    if let StorageMode::Encrypted(key) = mode {
        apply_key(&conn, key)?;
    }
    verify_readable(&conn, label, mode)?;
    Ok(conn)
}

fn apply_key(conn: &Connection, key: &str) -> Result<()> {
    conn.execute_batch(&format!("PRAGMA key = '{}';", key.replace('\'', "''")))?;
    // Plain SQLite ignores unknown pragmas, so `key` alone proves nothing.
    let cipher: Option<String> = conn
        .query_row("PRAGMA cipher_version", [], |row| row.get(0))
        .optional()?;
    if cipher.is_none() {
        return Err(LedgerError::EncryptionUnavailable);
    }
    Ok(())
}

fn verify_readable(conn: &Connection, label: &str, mode: &StorageMode) -> Result<()> {
    match conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0)) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::NotADatabase => {
            let reason = if mode.is_encrypted() {
                "wrong key or not a database"
            } else {
                "database is encrypted or corrupt; a key is required"
            };
            Err(LedgerError::Authentication {
                path: label.to_string(),
                reason: reason.to_string(),
            })
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .connection()
            .execute_batch(
                "CREATE TABLE payments (id INTEGER PRIMARY KEY, name TEXT, paid REAL);
                 INSERT INTO payments VALUES (1, 'Alice', 10.5), (2, 'Bob', NULL);",
            )
            .unwrap();
        store
    }

    #[test]
    fn table_info_reports_primary_key_placement() {
        let store = seeded();
        let info = store.table_info("payments").unwrap();
        let pk: Vec<&str> = info
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(pk, vec!["id"]);
        assert_eq!(info[2].declared_type, "REAL");
        assert!(store.table_info("missing").unwrap().is_empty());
    }

    #[test]
    fn find_row_ignores_case_and_empty_values() {
        let store = seeded();
        let row = store.find_row("payments", "name", "alice").unwrap().unwrap();
        assert_eq!(row.get("id"), Some(&Value::Integer(1)));
        assert!(store.find_row("payments", "name", "").unwrap().is_none());
        assert!(store.find_row("payments", "name", "carol").unwrap().is_none());
    }

    #[test]
    fn find_row_matching_combines_like_and_equality() {
        let store = seeded();
        let row = store
            .find_row_matching(
                "payments",
                &[
                    ("name", Match::Like("B%".to_string())),
                    ("id", Match::Equals("2".to_string())),
                ],
            )
            .unwrap()
            .unwrap();
        assert_eq!(row.text("name"), Some("Bob"));
        assert_eq!(row.get("paid"), Some(&Value::Null));
        assert!(store.find_row_matching("payments", &[]).unwrap().is_none());
    }

    #[test]
    fn rename_and_drop_tables() {
        let store = seeded();
        store.rename_table("payments", "payments_old").unwrap();
        assert!(!store.table_exists("payments").unwrap());
        assert_eq!(store.count("payments_old").unwrap(), 2);
        store.drop_table("payments_old").unwrap();
        assert!(!store.table_exists("payments_old").unwrap());
    }

    #[test]
    fn preview_limits_rows() {
        let store = seeded();
        assert_eq!(store.preview("payments", 1).unwrap().len(), 1);
        assert_eq!(store.preview("payments", 100).unwrap().len(), 2);
    }

    #[test]
    fn storage_mode_from_key_treats_empty_as_plain() {
        assert_eq!(StorageMode::from_key(None), StorageMode::Plain);
        assert_eq!(StorageMode::from_key(Some(String::new())), StorageMode::Plain);
        assert!(StorageMode::from_key(Some("secret".into())).is_encrypted());
    }
}
