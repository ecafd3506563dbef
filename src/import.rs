//! CSV → table import with schema inference, replace/merge strategies and
//! diffing against the replaced snapshot.
//!
//! A replacing import renames the live table to `<name>_old`, loads into a
//! fresh table, diffs the two and drops the snapshot. A merging import
//! appends into the existing table and never diffs. Either way, rows that
//! cannot be stored are collected and reported together after the good rows
//! have been committed.

use std::{
    io::{Cursor, Read},
    path::Path,
};

use encoding_rs::{Encoding, UTF_8};
use log::{debug, info, warn};
use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};

use crate::{
    data::{Value, coerce, normalize_column_name, quote_ident},
    diff::{DiffEntry, diff_tables},
    error::{FAILURE_SAMPLE_LIMIT, ImportFailure, LedgerError, Result},
    io_utils,
    schema::{Column, DEFAULT_SAMPLE_ROWS, TableSchema, infer_columns},
    source::Downloader,
    store::Store,
};

/// Suffix of the transient snapshot table used while replacing.
pub const OLD_SUFFIX: &str = "_old";

/// What happens when an inserted row collides with an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Silently keep the existing row.
    #[default]
    Ignore,
    /// Reject the new row and report it as failed.
    Abort,
}

impl ConflictPolicy {
    fn insert_verb(&self) -> &'static str {
        match self {
            ConflictPolicy::Ignore => "INSERT OR IGNORE",
            ConflictPolicy::Abort => "INSERT OR ABORT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub primary_key: Option<String>,
    /// Rows sampled for type inference; 0 samples the whole input.
    pub sample_size: usize,
    pub merge: bool,
    pub conflict: ConflictPolicy,
    pub encoding: &'static Encoding,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            primary_key: None,
            sample_size: DEFAULT_SAMPLE_ROWS,
            merge: false,
            conflict: ConflictPolicy::default(),
            encoding: UTF_8,
        }
    }
}

impl ImportOptions {
    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    pub fn merging(mut self) -> Self {
        self.merge = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub table: String,
    /// Rows added by this import (count after minus count before).
    pub inserted: usize,
    /// Present only when a previous snapshot was replaced.
    pub diff: Option<Vec<DiffEntry>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRow {
    /// Line in the CSV input where the row starts.
    pub line: u64,
    /// Header → raw cell pairs as read.
    pub raw: Vec<(String, String)>,
    pub error: String,
}

struct RawRow {
    line: u64,
    cells: std::result::Result<Vec<String>, String>,
}

/// Imports CSV streams into one named table, remembering the column map
/// between calls so later merges reuse the first import's types.
pub struct TableImporter<'s> {
    store: &'s Store,
    table: String,
    schema: Option<TableSchema>,
}

impl<'s> TableImporter<'s> {
    pub fn new(store: &'s Store, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            schema: None,
        }
    }

    /// Seeds the column map, skipping inference on the first import.
    pub fn with_schema(mut self, schema: TableSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> Option<&TableSchema> {
        self.schema.as_ref()
    }

    pub fn import_path(&mut self, path: &Path, options: &ImportOptions) -> Result<ImportReport> {
        let file = io_utils::open_input(path)?;
        self.import(file, &path.display().to_string(), options)
    }

    pub fn import_download(
        &mut self,
        downloader: &dyn Downloader,
        url: &str,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        let bytes = downloader.fetch(url)?;
        debug!("Fetched {} byte(s) from {url}", bytes.len());
        self.import(Cursor::new(bytes), url, options)
    }

    pub fn import<R: Read>(
        &mut self,
        input: R,
        origin: &str,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        if self.table.ends_with(OLD_SUFFIX) {
            return Err(LedgerError::schema(format!(
                "table name '{}' uses the reserved '{OLD_SUFFIX}' suffix",
                self.table
            )));
        }

        let mut reader = io_utils::open_csv_reader(input);
        let headers = io_utils::reader_headers(&mut reader, options.encoding)?;
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(LedgerError::EmptyInput {
                origin: origin.to_string(),
            });
        }

        let sample_limit = match options.sample_size {
            0 => usize::MAX,
            n => n,
        };
        let mut sample = Vec::new();
        while sample.len() < sample_limit {
            match next_row(&mut reader, options.encoding)? {
                Some(row) => sample.push(row),
                None => break,
            }
        }
        if sample.is_empty() {
            return Err(LedgerError::EmptyInput {
                origin: origin.to_string(),
            });
        }

        let schema = match self.schema.take() {
            Some(schema) => schema,
            None => self.resolve_schema(&headers, &sample, options)?,
        };
        let definition = schema.table_definition(&self.table, options.primary_key.as_deref());
        self.schema = Some(schema);
        let definition = definition?;
        let plan = column_plan(&definition.columns, &headers);

        let old_table = format!("{}{OLD_SUFFIX}", self.table);
        let conn = self.store.connection();
        let tx = conn.unchecked_transaction()?;
        let replacing = !options.merge && self.store.table_exists(&self.table)?;
        if replacing {
            self.store.drop_table(&old_table)?;
            self.store.rename_table(&self.table, &old_table)?;
            debug!("Moved '{}' aside as '{old_table}'", self.table);
        }
        tx.execute_batch(&definition.create_sql())?;
        let count_before = self.store.count(&self.table)?;

        let insert_sql = format!(
            "{} INTO {} ({}) VALUES ({})",
            options.conflict.insert_verb(),
            quote_ident(&self.table),
            plan.iter()
                .map(|(column, _)| quote_ident(&column.name))
                .collect::<Vec<_>>()
                .join(", "),
            (1..=plan.len())
                .map(|idx| format!("?{idx}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut failures = Vec::new();
        {
            let mut stmt = tx.prepare(&insert_sql)?;
            let mut insert = |row: RawRow| {
                if let Err(error) = insert_row(&mut stmt, &plan, &row) {
                    failures.push(FailedRow {
                        line: row.line,
                        raw: raw_pairs(&headers, &row),
                        error,
                    });
                }
            };
            for row in sample {
                insert(row);
            }
            while let Some(row) = next_row(&mut reader, options.encoding)? {
                insert(row);
            }
        }
        let count_after = self.store.count(&self.table)?;
        tx.commit()?;

        let inserted = count_after.saturating_sub(count_before);
        info!(
            "Inserted {inserted} new row(s) into '{}' from {origin}",
            self.table
        );

        let diff = if replacing {
            let diff = diff_tables(self.store, &self.table, &old_table);
            self.store.drop_table(&old_table)?;
            Some(diff?)
        } else {
            None
        };

        let report = ImportReport {
            table: self.table.clone(),
            inserted,
            diff,
        };
        if failures.is_empty() {
            return Ok(report);
        }

        warn!("{} row(s) failed to insert into '{}'", failures.len(), self.table);
        for failed in failures.iter().take(FAILURE_SAMPLE_LIMIT) {
            warn!("Failed line {}: {}", failed.line, failed.error);
        }
        Err(LedgerError::ImportFailed(Box::new(ImportFailure {
            origin: origin.to_string(),
            report,
            failures,
        })))
    }

    fn resolve_schema(
        &self,
        headers: &[String],
        sample: &[RawRow],
        options: &ImportOptions,
    ) -> Result<TableSchema> {
        if options.merge && self.store.table_exists(&self.table)? {
            debug!("Reusing column map of existing table '{}'", self.table);
            return TableSchema::from_table_info(&self.store.table_info(&self.table)?);
        }
        let decoded: Vec<Vec<String>> = sample
            .iter()
            .filter_map(|row| row.cells.as_ref().ok().cloned())
            .collect();
        infer_columns(headers, &decoded)
    }
}

/// Pairs each table column with the index of its CSV header, if present.
fn column_plan(columns: &[Column], headers: &[String]) -> Vec<(Column, Option<usize>)> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_column_name(h)).collect();
    for (header, name) in headers.iter().zip(&normalized) {
        if !columns.iter().any(|c| &c.name == name) {
            warn!("Ignoring CSV column '{header}' not present in the table");
        }
    }
    columns
        .iter()
        .map(|column| {
            let position = normalized.iter().position(|name| name == &column.name);
            (column.clone(), position)
        })
        .collect()
}

fn next_row<R: Read>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Option<RawRow>> {
    let mut record = csv::ByteRecord::new();
    if !reader.read_byte_record(&mut record)? {
        return Ok(None);
    }
    let line = record.position().map(|p| p.line()).unwrap_or_default();
    let cells = io_utils::decode_record(&record, encoding).map_err(|err| err.to_string());
    Ok(Some(RawRow { line, cells }))
}

fn insert_row(
    stmt: &mut rusqlite::Statement<'_>,
    plan: &[(Column, Option<usize>)],
    row: &RawRow,
) -> std::result::Result<(), String> {
    let cells = row.cells.as_ref().map_err(Clone::clone)?;
    for (column, position) in plan.iter().filter(|(column, _)| column.primary_key) {
        let blank = position
            .and_then(|idx| cells.get(idx))
            .is_none_or(|raw| raw.trim().is_empty());
        if blank {
            return Err(format!("Primary key column '{}' is blank", column.name));
        }
    }
    let values = plan
        .iter()
        .map(|(column, position)| {
            let raw = position
                .and_then(|idx| cells.get(idx))
                .map(String::as_str)
                .unwrap_or("");
            coerce(&column.name, raw, column.sql_type)
        })
        .collect::<std::result::Result<Vec<Value>, _>>()
        .map_err(|err| err.to_string())?;
    stmt.execute(params_from_iter(values.iter()))
        .map(|_| ())
        .map_err(|err| err.to_string())
}

fn raw_pairs(headers: &[String], row: &RawRow) -> Vec<(String, String)> {
    match &row.cells {
        Ok(cells) => headers
            .iter()
            .cloned()
            .zip(cells.iter().cloned().chain(std::iter::repeat(String::new())))
            .collect(),
        Err(_) => Vec::new(),
    }
}
