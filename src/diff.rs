//! Row-level comparison of a freshly imported table against its previous
//! snapshot.
//!
//! Rows are matched on a key column chosen by [`detect_key`]. The three
//! categories are each a single set query, so the work stays inside SQLite
//! no matter how large the tables are.

use std::collections::HashSet;

use log::info;
use serde::Serialize;

use crate::{
    data::{Value, quote_ident},
    error::{LedgerError, Result},
    schema::SqlType,
    store::{ColumnInfo, Store},
};

/// Non-key columns carried in each entry's preview.
pub const PREVIEW_COLUMNS: usize = 4;

const KEY_ALIAS: &str = "__diff_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffType {
    Added,
    Deleted,
    Changed,
}

impl DiffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffType::Added => "added",
            DiffType::Deleted => "deleted",
            DiffType::Changed => "changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffEntry {
    pub diff_type: DiffType,
    pub key: Value,
    /// Key column first, then up to [`PREVIEW_COLUMNS`] other columns.
    pub preview: Vec<(String, Value)>,
}

/// Column used to pair rows across the two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffKey {
    Column(String),
    RowId,
}

impl DiffKey {
    pub fn name(&self) -> &str {
        match self {
            DiffKey::Column(name) => name,
            DiffKey::RowId => "rowid",
        }
    }

    fn expr(&self, alias: &str) -> String {
        match self {
            DiffKey::Column(name) => format!("{alias}.{}", quote_ident(name)),
            DiffKey::RowId => format!("{alias}.rowid"),
        }
    }
}

/// Declared primary key, else a column named `id`, else the first column.
/// Fallback columns must hold unique non-null values in both tables;
/// failing that, rows are paired by storage position.
pub fn detect_key(store: &Store, new: &str, old: &str) -> Result<DiffKey> {
    let new_info = columns_of(store, new)?;
    let old_info = columns_of(store, old)?;
    let in_old: HashSet<&str> = old_info.iter().map(|c| c.name.as_str()).collect();

    let declared: Vec<&ColumnInfo> = new_info.iter().filter(|c| c.primary_key).collect();
    if let [pk] = declared.as_slice() {
        if in_old.contains(pk.name.as_str()) {
            return Ok(DiffKey::Column(pk.name.clone()));
        }
    }

    let fallbacks = new_info
        .iter()
        .find(|c| c.name == "id")
        .into_iter()
        .chain(new_info.first());
    for candidate in fallbacks {
        let name = candidate.name.as_str();
        if in_old.contains(name) && is_unique(store, new, name)? && is_unique(store, old, name)? {
            return Ok(DiffKey::Column(name.to_string()));
        }
    }
    Ok(DiffKey::RowId)
}

/// Diffs `new` against `old`, ordered by key ascending.
pub fn diff_tables(store: &Store, new: &str, old: &str) -> Result<Vec<DiffEntry>> {
    let new_info = columns_of(store, new)?;
    let old_info = columns_of(store, old)?;
    let key = detect_key(store, new, old)?;

    let mut entries = Vec::new();
    entries.extend(one_sided(store, DiffType::Added, &key, (new, &new_info), old)?);
    entries.extend(one_sided(store, DiffType::Deleted, &key, (old, &old_info), new)?);
    entries.extend(changed(store, &key, (new, &new_info), (old, &old_info))?);
    entries.sort_by(|a, b| a.key.sql_cmp(&b.key));

    let count = |kind: DiffType| entries.iter().filter(|e| e.diff_type == kind).count();
    info!(
        "Diff '{new}' vs '{old}' on {}: {} added, {} deleted, {} changed",
        key.name(),
        count(DiffType::Added),
        count(DiffType::Deleted),
        count(DiffType::Changed)
    );
    Ok(entries)
}

fn columns_of(store: &Store, table: &str) -> Result<Vec<ColumnInfo>> {
    let info = store.table_info(table)?;
    if info.is_empty() {
        return Err(LedgerError::schema(format!(
            "table '{table}' has no columns to diff"
        )));
    }
    Ok(info)
}

fn is_unique(store: &Store, table: &str, column: &str) -> Result<bool> {
    let duplicates: i64 = store.connection().query_row(
        &format!(
            "SELECT COUNT(*) - COUNT(DISTINCT {}) FROM {}",
            quote_ident(column),
            quote_ident(table)
        ),
        [],
        |row| row.get(0),
    )?;
    Ok(duplicates == 0)
}

fn preview_select(key: &DiffKey, alias: &str, info: &[ColumnInfo]) -> String {
    let mut select = vec![format!("{} AS {KEY_ALIAS}", key.expr(alias))];
    select.extend(
        info.iter()
            .filter(|c| c.name != key.name())
            .take(PREVIEW_COLUMNS)
            .map(|c| format!("{alias}.{}", quote_ident(&c.name))),
    );
    select.join(", ")
}

fn one_sided(
    store: &Store,
    diff_type: DiffType,
    key: &DiffKey,
    (present, present_info): (&str, &[ColumnInfo]),
    absent: &str,
) -> Result<Vec<DiffEntry>> {
    let sql = format!(
        "SELECT {} FROM {} AS p WHERE NOT EXISTS (SELECT 1 FROM {} AS a WHERE {} IS {}) ORDER BY {KEY_ALIAS}",
        preview_select(key, "p", present_info),
        quote_ident(present),
        quote_ident(absent),
        key.expr("a"),
        key.expr("p"),
    );
    collect_entries(store, &sql, diff_type, key)
}

fn changed(
    store: &Store,
    key: &DiffKey,
    (new, new_info): (&str, &[ColumnInfo]),
    (old, old_info): (&str, &[ColumnInfo]),
) -> Result<Vec<DiffEntry>> {
    let shared: HashSet<&str> = old_info.iter().map(|c| c.name.as_str()).collect();
    let conditions: Vec<String> = new_info
        .iter()
        .filter(|c| c.name != key.name() && shared.contains(c.name.as_str()))
        .map(|c| {
            let column = quote_ident(&c.name);
            // REAL columns hold money; compare them at two decimal places.
            match SqlType::from_declared(&c.declared_type) {
                SqlType::Real => format!("ROUND(n.{column}, 2) IS NOT ROUND(o.{column}, 2)"),
                _ => format!("n.{column} IS NOT o.{column}"),
            }
        })
        .collect();
    if conditions.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM {} AS n JOIN {} AS o ON {} = {} WHERE {} ORDER BY {KEY_ALIAS}",
        preview_select(key, "n", new_info),
        quote_ident(new),
        quote_ident(old),
        key.expr("o"),
        key.expr("n"),
        conditions.join(" OR "),
    );
    collect_entries(store, &sql, DiffType::Changed, key)
}

fn collect_entries(
    store: &Store,
    sql: &str,
    diff_type: DiffType,
    key: &DiffKey,
) -> Result<Vec<DiffEntry>> {
    let records = store.query_records(sql, &[])?;
    Ok(records
        .into_iter()
        .map(|record| {
            let mut fields = record.into_fields().into_iter();
            let key_value = fields.next().map(|(_, value)| value).unwrap_or(Value::Null);
            let mut preview = vec![(key.name().to_string(), key_value.clone())];
            preview.extend(fields);
            DiffEntry {
                diff_type,
                key: key_value,
                preview,
            }
        })
        .collect())
}
