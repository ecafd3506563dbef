//! Free-text member name resolution.
//!
//! A name is tried against the member table through an ordered cascade of
//! lookups (full first and last name, middle and last name, then initials),
//! stopping at the first hit. When the cascade comes up empty a fuzzy match
//! over every stored "first last" pair gets the final say.

use std::fmt;

use log::{debug, warn};
use similar::TextDiff;

use crate::{
    data::quote_ident,
    error::{LedgerError, Result},
    members::MemberRegistry,
    store::{Match, Record, Store},
};

/// Minimum similarity ratio a fuzzy candidate must reach.
pub const DEFAULT_FUZZY_CUTOFF: f32 = 0.7;

pub type NamePair = (String, String);

/// One concrete query derived from the split input name.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lookup {
    Exact { first: String, last: String },
    Initial { letter: char, last: String },
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Exact { first, last } => write!(f, "{first} {last}"),
            Lookup::Initial { letter, last } => write!(f, "{letter} {last}"),
        }
    }
}

type Strategy = fn(&[&str]) -> Option<Lookup>;

const CASCADE: [Strategy; 4] = [first_and_last, middle_and_last, first_initial, second_initial];

fn first_and_last(parts: &[&str]) -> Option<Lookup> {
    let (first, last) = (parts.first()?, parts.last()?);
    Some(Lookup::Exact {
        first: first.to_string(),
        last: last.to_string(),
    })
}

/// "Title First Last" or "First Middle Last" with the leading word dropped.
fn middle_and_last(parts: &[&str]) -> Option<Lookup> {
    match parts {
        [_, middle, last] => Some(Lookup::Exact {
            first: middle.to_string(),
            last: last.to_string(),
        }),
        _ => None,
    }
}

fn first_initial(parts: &[&str]) -> Option<Lookup> {
    initial_of(parts.first()?, parts.last()?)
}

fn second_initial(parts: &[&str]) -> Option<Lookup> {
    match parts {
        [_, middle, last] => initial_of(middle, last),
        _ => None,
    }
}

fn initial_of(word: &str, last: &str) -> Option<Lookup> {
    let letter = word.chars().next()?.to_uppercase().next()?;
    Some(Lookup::Initial {
        letter,
        last: last.to_string(),
    })
}

fn escape_like(letter: char) -> String {
    match letter {
        '%' | '_' | '\\' => format!("\\{letter}"),
        other => other.to_string(),
    }
}

/// Resolves names against a table with `first_name` and `last_name` columns.
pub struct IdentityResolver<'s> {
    store: &'s Store,
    table: String,
    cutoff: f32,
}

impl<'s> IdentityResolver<'s> {
    pub fn new(store: &'s Store, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            cutoff: DEFAULT_FUZZY_CUTOFF,
        }
    }

    pub fn fuzzy_cutoff(mut self, cutoff: f32) -> Self {
        self.cutoff = cutoff.clamp(0.0, 1.0);
        self
    }

    /// The stored `(first_name, last_name)` for `full_name`, or `None`.
    /// With `strict`, a miss is an error listing the variants tried and the
    /// fuzzy fallback is skipped.
    pub fn resolve(&self, full_name: &str, strict: bool) -> Result<Option<NamePair>> {
        let parts: Vec<&str> = full_name.split_whitespace().collect();
        if parts.len() < 2 {
            return if strict {
                Err(LedgerError::NameTooShort(full_name.to_string()))
            } else {
                Ok(None)
            };
        }

        let mut tried = Vec::new();
        for strategy in CASCADE {
            let Some(lookup) = strategy(&parts) else {
                continue;
            };
            tried.push(lookup.to_string());
            if let Some(found) = self.lookup(&lookup)? {
                debug!("Resolved '{full_name}' via '{lookup}' to {} {}", found.0, found.1);
                return Ok(Some(found));
            }
        }

        if strict {
            return Err(LedgerError::IdentityNotFound {
                name: full_name.to_string(),
                tried,
            });
        }
        debug!("Cascade exhausted for '{full_name}' after {tried:?}");
        self.fuzzy(full_name, false)
    }

    /// Closest stored "first last" pair to `name` at or above the cutoff.
    pub fn fuzzy(&self, name: &str, strict: bool) -> Result<Option<NamePair>> {
        let needle = name.trim().to_lowercase();
        let sql = format!(
            "SELECT first_name, last_name FROM {}",
            quote_ident(&self.table)
        );
        let candidates = self.store.query_records(&sql, &[])?;

        let mut best: Option<(f32, &Record)> = None;
        for candidate in &candidates {
            let (Some(first), Some(last)) = (candidate.text("first_name"), candidate.text("last_name")) else {
                continue;
            };
            let haystack = format!("{first} {last}").to_lowercase();
            let ratio = TextDiff::from_chars(needle.as_str(), haystack.as_str()).ratio();
            if ratio >= self.cutoff && best.is_none_or(|(score, _)| ratio > score) {
                best = Some((ratio, candidate));
            }
        }

        match best.and_then(|(score, row)| Some((score, pair_of(row)?))) {
            Some((score, pair)) => {
                warn!(
                    "Fuzzy matched '{name}' to {} {} (similarity {score:.2})",
                    pair.0, pair.1
                );
                Ok(Some(pair))
            }
            None if strict => Err(LedgerError::IdentityNotFound {
                name: name.to_string(),
                tried: vec![format!("fuzzy: {needle}")],
            }),
            None => Ok(None),
        }
    }

    /// Member number behind a resolved name. A resolved pair without a
    /// number counts as no match.
    pub fn resolve_number(&self, full_name: &str, strict: bool) -> Result<Option<i64>> {
        let Some((first, last)) = self.resolve(full_name, strict)? else {
            return Ok(None);
        };
        MemberRegistry::new(self.store, self.table.clone()).number_for(&first, &last, false)
    }

    fn lookup(&self, lookup: &Lookup) -> Result<Option<NamePair>> {
        let criteria = match lookup {
            Lookup::Exact { first, last } => [
                ("first_name", Match::Equals(first.clone())),
                ("last_name", Match::Equals(last.clone())),
            ],
            Lookup::Initial { letter, last } => [
                ("first_name", Match::Like(format!("{}%", escape_like(*letter)))),
                ("last_name", Match::Equals(last.clone())),
            ],
        };
        let row = self.store.find_row_matching(&self.table, &criteria)?;
        Ok(row.as_ref().and_then(pair_of))
    }
}

fn pair_of(row: &Record) -> Option<NamePair> {
    Some((
        row.text("first_name")?.to_string(),
        row.text("last_name")?.to_string(),
    ))
}
