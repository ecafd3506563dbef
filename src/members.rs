//! Typed member table and the lookups the resolver and reports build on.

use std::{fmt, io::Read, path::Path, str::FromStr};

use encoding_rs::Encoding;
use log::{debug, info};
use rusqlite::{ErrorCode, OptionalExtension, params};
use serde::Serialize;

use crate::{
    data::{Value, normalize_column_name, quote_ident},
    error::{LedgerError, Result},
    io_utils,
    store::{Match, Store},
};

pub const DEFAULT_MEMBERS_TABLE: &str = "members";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Title {
    Dr,
    Mr,
    Mrs,
    Miss,
    Ms,
}

impl Title {
    pub const ALL: [Title; 5] = [Title::Dr, Title::Mr, Title::Mrs, Title::Miss, Title::Ms];

    pub fn as_str(&self) -> &'static str {
        match self {
            Title::Dr => "Dr",
            Title::Mr => "Mr",
            Title::Mrs => "Mrs",
            Title::Miss => "Miss",
            Title::Ms => "Ms",
        }
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Title {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = value.trim().trim_end_matches('.');
        Title::ALL
            .into_iter()
            .find(|title| title.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown title '{value}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberIdentity {
    pub member_number: i64,
    pub title: Title,
    pub first_name: String,
    pub last_name: String,
    pub external_id: i64,
    pub profile_url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemberImportReport {
    pub inserted: usize,
    /// Duplicates, unknown titles and unparsable rows.
    pub skipped: usize,
}

/// Export header positions for the typed member fields.
struct MemberColumns {
    member_number: usize,
    title: usize,
    first_name: usize,
    last_name: usize,
    external_id: usize,
    profile_url: usize,
}

impl MemberColumns {
    fn locate(headers: &[String]) -> Result<Self> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_column_name(h)).collect();
        Ok(Self {
            member_number: position(&normalized, &["member_number"])?,
            title: position(&normalized, &["title"])?,
            first_name: position(&normalized, &["first_name"])?,
            last_name: position(&normalized, &["last_name"])?,
            external_id: position(&normalized, &["membermojo_id", "external_id"])?,
            profile_url: position(&normalized, &["short_url", "profile_url"])?,
        })
    }

    fn parse(&self, cells: &[String]) -> std::result::Result<MemberIdentity, String> {
        let cell = |idx: usize| cells.get(idx).map(|s| s.trim()).unwrap_or("");
        let number = |idx: usize, what: &str| {
            cell(idx)
                .parse::<i64>()
                .map_err(|_| format!("invalid {what} '{}'", cell(idx)))
        };
        Ok(MemberIdentity {
            member_number: number(self.member_number, "member number")?,
            title: cell(self.title).parse()?,
            first_name: cell(self.first_name).to_string(),
            last_name: cell(self.last_name).to_string(),
            external_id: number(self.external_id, "external id")?,
            profile_url: cell(self.profile_url).to_string(),
        })
    }
}

fn position(normalized: &[String], aliases: &[&str]) -> Result<usize> {
    aliases
        .iter()
        .find_map(|alias| normalized.iter().position(|name| name == alias))
        .ok_or_else(|| {
            LedgerError::schema(format!("member export is missing a '{}' column", aliases[0]))
        })
}

/// Member records in one table, keyed by `member_number`.
pub struct MemberRegistry<'s> {
    store: &'s Store,
    table: String,
}

impl<'s> MemberRegistry<'s> {
    pub fn new(store: &'s Store, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn create_table(&self) -> Result<()> {
        let titles = Title::ALL
            .iter()
            .map(|t| format!("'{t}'"))
            .collect::<Vec<_>>()
            .join(", ");
        self.store.connection().execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                member_number INTEGER PRIMARY KEY,
                title TEXT NOT NULL CHECK (title IN ({titles})),
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                external_id INTEGER UNIQUE NOT NULL,
                profile_url TEXT NOT NULL
            )",
            quote_ident(&self.table)
        ))?;
        Ok(())
    }

    /// Inserts one member; `false` when a number or external id already exists.
    pub fn insert(&self, member: &MemberIdentity) -> Result<bool> {
        let sql = format!(
            "INSERT OR ABORT INTO {} (member_number, title, first_name, last_name, external_id, profile_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            quote_ident(&self.table)
        );
        let outcome = self.store.connection().execute(
            &sql,
            params![
                member.member_number,
                member.title.as_str(),
                member.first_name,
                member.last_name,
                member.external_id,
                member.profile_url
            ],
        );
        match outcome {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
                debug!(
                    "Skipping member {} ({} {}): already present",
                    member.member_number, member.first_name, member.last_name
                );
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn import_path(&self, path: &Path, encoding: &'static Encoding) -> Result<MemberImportReport> {
        self.import(io_utils::open_input(path)?, encoding)
    }

    /// Loads a member export, creating the table when needed. Only members
    /// not yet present are added.
    pub fn import<R: Read>(&self, input: R, encoding: &'static Encoding) -> Result<MemberImportReport> {
        self.create_table()?;
        let mut reader = io_utils::open_csv_reader(input);
        let headers = io_utils::reader_headers(&mut reader, encoding)?;
        let columns = MemberColumns::locate(&headers)?;

        let tx = self.store.connection().unchecked_transaction()?;
        let mut report = MemberImportReport::default();
        let mut record = csv::ByteRecord::new();
        while reader.read_byte_record(&mut record)? {
            let parsed = io_utils::decode_record(&record, encoding)
                .map_err(|err| err.to_string())
                .and_then(|cells| columns.parse(&cells));
            let member = match parsed {
                Ok(member) => member,
                Err(reason) => {
                    let line = record.position().map(|p| p.line()).unwrap_or_default();
                    debug!("Skipping member row at line {line}: {reason}");
                    report.skipped += 1;
                    continue;
                }
            };
            if self.insert(&member)? {
                report.inserted += 1;
            } else {
                report.skipped += 1;
            }
        }
        tx.commit()?;
        info!(
            "Imported {} member(s) into '{}', skipped {}",
            report.inserted, self.table, report.skipped
        );
        Ok(report)
    }

    /// Member number for an exact, case-insensitive name match.
    pub fn number_for(&self, first_name: &str, last_name: &str, strict: bool) -> Result<Option<i64>> {
        let found = self.store.find_row_matching(
            &self.table,
            &[
                ("first_name", Match::Equals(first_name.to_string())),
                ("last_name", Match::Equals(last_name.to_string())),
            ],
        )?;
        let number = found.as_ref().and_then(|row| row.get("member_number")).and_then(Value::as_i64);
        if number.is_none() && strict {
            let name = format!("{first_name} {last_name}");
            return Err(LedgerError::IdentityNotFound {
                tried: vec![name.clone()],
                name,
            });
        }
        Ok(number)
    }

    pub fn name_pair(&self, member_number: i64) -> Result<Option<(String, String)>> {
        let sql = format!(
            "SELECT first_name, last_name FROM {} WHERE member_number = ?1",
            quote_ident(&self.table)
        );
        let pair = self
            .store
            .connection()
            .query_row(&sql, params![member_number], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;
        Ok(pair)
    }

    /// "First Last" for a member number.
    pub fn full_name(&self, member_number: i64) -> Result<Option<String>> {
        Ok(self
            .name_pair(member_number)?
            .map(|(first, last)| format!("{first} {last}")))
    }

    /// Reads a tick-box column: `true` only when the stored text is "yes".
    pub fn flag(&self, column: &str, member_number: i64) -> Result<bool> {
        let sql = format!(
            "SELECT {} FROM {} WHERE member_number = ?1",
            quote_ident(column),
            quote_ident(&self.table)
        );
        let value: Option<Value> = self
            .store
            .connection()
            .query_row(&sql, params![member_number], |row| row.get(0))
            .optional()?;
        match value {
            Some(value) => Ok(value.to_string().eq_ignore_ascii_case("yes")),
            None => Err(LedgerError::MemberNotFound(member_number)),
        }
    }
}
