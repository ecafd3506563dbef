//! CSV reader construction and decoding of export bytes.
//!
//! Exports arrive in a configured encoding rather than a sniffed one, so every
//! record is read as raw bytes and decoded through `encoding_rs`.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use encoding_rs::{Encoding, UTF_8};

use crate::error::{LedgerError, Result};

pub const DEFAULT_ENCODING: &str = "utf-8";

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| LedgerError::Encoding(format!("Unknown encoding '{value}'"))),
        None => Ok(UTF_8),
    }
}

/// Reader over a header-first CSV stream. Rows may be ragged; missing cells
/// are treated as blank by the caller.
pub fn open_csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .double_quote(true)
        .flexible(true)
        .from_reader(reader)
}

pub fn open_input(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|err| {
        let message = match err.kind() {
            std::io::ErrorKind::NotFound => format!("CSV file not found: {}", path.display()),
            _ => format!("Cannot open CSV file {}: {err}", path.display()),
        };
        std::io::Error::new(err.kind(), message)
    })?;
    Ok(BufReader::new(file))
}

pub fn decode_field(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(LedgerError::Encoding(format!(
            "Failed to decode text with encoding {}",
            encoding.name()
        )))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_field(field, encoding))
        .collect()
}

pub fn reader_headers<R: Read>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>> {
    let headers = reader.byte_headers()?.clone();
    let decoded = decode_record(&headers, encoding)?;
    // A leading UTF-8 byte order mark would otherwise end up in the first name.
    Ok(decoded
        .into_iter()
        .enumerate()
        .map(|(idx, h)| {
            if idx == 0 {
                h.trim_start_matches('\u{feff}').to_string()
            } else {
                h
            }
        })
        .collect())
}
