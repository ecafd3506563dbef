//! Plain-text rendering of diffs and table previews for the terminal.

use std::borrow::Cow;
use std::fmt::Write as _;

use itertools::Itertools;

use crate::{diff::DiffEntry, store::Record};

/// One line per change: type, key, then the previewed `column=value` pairs.
pub fn render_diff(entries: &[DiffEntry]) -> String {
    if entries.is_empty() {
        return "No changes\n".to_string();
    }
    let headers = ["change", "key", "preview"].map(String::from);
    let rows = entries
        .iter()
        .map(|entry| {
            vec![
                entry.diff_type.as_str().to_string(),
                entry.key.to_string(),
                entry
                    .preview
                    .iter()
                    .skip(1)
                    .map(|(column, value)| format!("{column}={value}"))
                    .join(", "),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

/// Records as an aligned table; column names come from the first record.
pub fn render_records(records: &[Record]) -> String {
    let Some(first) = records.first() else {
        return String::new();
    };
    let headers = first
        .fields()
        .iter()
        .map(|(name, _)| name.clone())
        .collect::<Vec<_>>();
    let rows = records
        .iter()
        .map(|record| {
            record
                .fields()
                .iter()
                .map(|(_, value)| value.to_string())
                .collect()
        })
        .collect::<Vec<Vec<String>>>();
    render_table(&headers, &rows)
}

fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(single_line(cell).chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let rule = widths.iter().map(|w| "-".repeat((*w).max(3))).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| format!("{:<width$}", single_line(value), width = *width))
        .join("  ");
    line.trim_end().to_string()
}

fn single_line(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
