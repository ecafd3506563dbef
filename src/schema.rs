//! Column types, sampled type inference and table definitions.
//!
//! [`infer_columns`] tallies how each sampled cell parses and settles on the
//! narrowest SQLite type that holds every non-blank value. The resulting
//! [`TableSchema`] is the ordered column map an importer keeps between calls;
//! [`TableSchema::table_definition`] pins a primary key onto it and renders the
//! `CREATE TABLE` statement.

use std::{collections::HashSet, fmt, fs::File, io::BufReader, path::Path};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    data::{Observation, normalize_column_name, observe, quote_ident},
    error::{LedgerError, Result},
    store::ColumnInfo,
};

pub const DEFAULT_SAMPLE_ROWS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SqlType {
    Integer,
    Real,
    Text,
}

impl SqlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Text => "TEXT",
        }
    }

    /// Maps a declared column type back onto a storage type using SQLite's
    /// affinity rules.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            SqlType::Integer
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            SqlType::Real
        } else {
            SqlType::Text
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub sql_type: SqlType,
}

/// Ordered column map keyed by normalized column name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if column.name.is_empty() {
                return Err(LedgerError::schema("column name is empty after normalization"));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(LedgerError::schema(format!(
                    "duplicate column '{}' after normalization",
                    column.name
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Rebuilds the column map of an existing table.
    pub fn from_table_info(info: &[ColumnInfo]) -> Result<Self> {
        let columns = info
            .iter()
            .map(|column| ColumnDef {
                name: column.name.clone(),
                sql_type: SqlType::from_declared(&column.declared_type),
            })
            .collect();
        Self::new(columns)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Resolves the primary key and produces the definition for `table`.
    /// Without a requested key the first column is used.
    pub fn table_definition(&self, table: &str, primary_key: Option<&str>) -> Result<TableDefinition> {
        let first = self
            .columns
            .first()
            .ok_or_else(|| LedgerError::schema(format!("no columns to define table '{table}'")))?;
        let key = match primary_key {
            None => first.name.clone(),
            Some(requested) => {
                let normalized = normalize_column_name(requested);
                if self.column(&normalized).is_none() {
                    return Err(LedgerError::PrimaryKeyNotFound {
                        column: requested.to_string(),
                    });
                }
                normalized
            }
        };
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                primary_key: c.name == key,
                name: c.name.clone(),
                sql_type: c.sql_type,
            })
            .collect();
        Ok(TableDefinition {
            name: table.to_string(),
            columns,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_yaml::to_writer(file, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let schema: TableSchema = serde_yaml::from_reader(reader)?;
        Self::new(schema.columns)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableDefinition {
    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key)
    }

    pub fn create_sql(&self) -> String {
        let defs = self
            .columns
            .iter()
            .map(|c| {
                let pk = if c.primary_key { " PRIMARY KEY NOT NULL" } else { "" };
                format!("{} {}{pk}", quote_ident(&c.name), c.sql_type)
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS {} ({defs})", quote_ident(&self.name))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TypeTally {
    integer: usize,
    real: usize,
    text: usize,
}

impl TypeTally {
    fn record(&mut self, raw: &str) {
        match observe(raw) {
            Observation::Blank => {}
            Observation::Integer => self.integer += 1,
            Observation::Real => self.real += 1,
            Observation::Text => self.text += 1,
        }
    }

    fn decide(&self) -> SqlType {
        if self.text > 0 {
            SqlType::Text
        } else if self.real > 0 {
            SqlType::Real
        } else if self.integer > 0 {
            SqlType::Integer
        } else {
            SqlType::Text
        }
    }
}

/// Infers a column map from sampled rows. `headers` are raw CSV headers and
/// are normalized here; cells missing from short rows count as blank.
pub fn infer_columns(headers: &[String], rows: &[Vec<String>]) -> Result<TableSchema> {
    if rows.is_empty() {
        return Err(LedgerError::EmptyInput {
            origin: "type inference sample".to_string(),
        });
    }
    let mut tallies = vec![TypeTally::default(); headers.len()];
    for row in rows {
        for (tally, raw) in tallies.iter_mut().zip(row.iter()) {
            tally.record(raw);
        }
    }
    let columns = headers
        .iter()
        .zip(tallies.iter())
        .map(|(header, tally)| ColumnDef {
            name: normalize_column_name(header),
            sql_type: tally.decide(),
        })
        .collect();
    let schema = TableSchema::new(columns)?;
    info!(
        "Inferred columns from {} sampled row(s): {}",
        rows.len(),
        schema
            .columns
            .iter()
            .map(|c| format!("{}={}", c.name, c.sql_type))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(schema)
}
