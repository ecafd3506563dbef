mod common;

use std::io;

use common::{TestWorkspace, fixture_path};
use encoding_rs::WINDOWS_1252;
use member_ledger::{
    data::Value,
    diff::DiffType,
    error::{LedgerError, Result},
    import::{ConflictPolicy, ImportOptions, ImportReport, TableImporter},
    schema::{SqlType, TableSchema},
    source::{Downloader, MojoUrls},
    store::Store,
};
use rust_decimal::Decimal;

fn import_str(store: &Store, table: &str, csv: &str, options: &ImportOptions) -> Result<ImportReport> {
    TableImporter::new(store, table).import(csv.as_bytes(), "inline", options)
}

#[test]
fn merging_the_same_file_twice_adds_nothing() {
    let store = Store::open_in_memory().expect("store");
    let csv = "id,name\n1,Alice\n2,Bob\n";
    let options = ImportOptions::default().with_primary_key("id").merging();

    let first = import_str(&store, "people", csv, &options).expect("first merge");
    let second = import_str(&store, "people", csv, &options).expect("second merge");

    assert_eq!(first.inserted, 2);
    assert_eq!(second.inserted, 0);
    assert!(second.diff.is_none());
    assert_eq!(store.count("people").unwrap(), 2);
}

#[test]
fn blank_key_cells_fail_instead_of_adding_rows() {
    let store = Store::open_in_memory().expect("store");
    let csv = "id,name\n1,Alice\n,Ghost\n";
    let options = ImportOptions::default().with_primary_key("id").merging();
    let mut importer = TableImporter::new(&store, "people");

    for expected in [1, 0] {
        let err = importer
            .import(csv.as_bytes(), "inline", &options)
            .expect_err("blank key is rejected");
        let failure = err.import_failure().expect("aggregate failure");
        assert_eq!(failure.report.inserted, expected);
        assert_eq!(failure.failures.len(), 1);
        assert_eq!(failure.failures[0].line, 3);
        assert!(failure.failures[0].error.contains("Primary key column 'id' is blank"));
    }
    assert_eq!(store.count("people").unwrap(), 1);
}

#[test]
fn blank_text_key_does_not_show_up_in_the_diff() {
    let store = Store::open_in_memory().expect("store");
    let csv = "code,v\nA,1\n,2\n";
    let options = ImportOptions::default().with_primary_key("code");
    let mut importer = TableImporter::new(&store, "codes");

    importer
        .import(csv.as_bytes(), "inline", &options)
        .expect_err("blank key is rejected");
    let err = importer
        .import(csv.as_bytes(), "inline", &options)
        .expect_err("blank key is rejected again");
    let failure = err.import_failure().expect("aggregate failure");
    assert_eq!(failure.report.diff, Some(Vec::new()));
    assert_eq!(store.count("codes").unwrap(), 1);
}

#[test]
fn importer_reuses_its_column_map_on_later_imports() {
    let store = Store::open_in_memory().expect("store");
    let mut importer = TableImporter::new(&store, "codes");
    importer
        .import("code\nA1\n".as_bytes(), "first", &ImportOptions::default())
        .expect("text codes");
    importer
        .import("code\n007\n".as_bytes(), "second", &ImportOptions::default())
        .expect("numeric-looking codes");

    assert_eq!(
        importer.schema().and_then(|s| s.column("code")).map(|c| c.sql_type),
        Some(SqlType::Text)
    );
    let row = store.find_row("codes", "code", "007").unwrap().expect("row");
    assert_eq!(row.text("code"), Some("007"));
}

#[test]
fn bad_rows_fail_the_import_but_good_rows_stay() {
    let store = Store::open_in_memory().expect("store");
    let csv = "id,qty\n1,5\n2,7\n3,lots\n";
    let options = ImportOptions {
        sample_size: 2,
        ..ImportOptions::default()
    };

    let err = import_str(&store, "stock", csv, &options).expect_err("row 3 cannot be stored");
    let failure = err.import_failure().expect("aggregate failure");
    assert_eq!(failure.failures.len(), 1);
    assert_eq!(failure.failures[0].line, 4);
    assert!(failure.failures[0].error.contains("qty"));
    assert_eq!(
        failure.failures[0].raw,
        vec![("id".to_string(), "3".to_string()), ("qty".to_string(), "lots".to_string())]
    );
    assert_eq!(failure.report.inserted, 2);
    assert_eq!(store.count("stock").unwrap(), 2);
    assert!(err.to_string().contains("Failed to import: inline"));
}

#[test]
fn failure_message_quotes_a_bounded_sample() {
    let store = Store::open_in_memory().expect("store");
    let mut csv = String::from("id,qty\n1,1\n");
    for id in 2..=9 {
        csv.push_str(&format!("{id},bad\n"));
    }
    let options = ImportOptions {
        sample_size: 1,
        ..ImportOptions::default()
    };

    let err = import_str(&store, "stock", &csv, &options).expect_err("eight bad rows");
    let message = err.to_string();
    assert_eq!(message.matches("Failed: ").count(), 5);
    assert!(message.contains("... and 3 more"));
}

#[test]
fn missing_primary_key_creates_nothing() {
    let store = Store::open_in_memory().expect("store");
    let options = ImportOptions::default().with_primary_key("uuid");

    let err = import_str(&store, "people", "id,name\n1,Alice\n", &options).expect_err("no uuid column");
    assert!(matches!(err, LedgerError::PrimaryKeyNotFound { .. }));
    assert!(err.to_string().contains("uuid"));
    assert!(!store.table_exists("people").unwrap());
}

#[test]
fn replacing_reports_a_keyed_diff_and_drops_the_snapshot() {
    let store = Store::open_in_memory().expect("store");
    let options = ImportOptions::default().with_primary_key("k");
    let mut importer = TableImporter::new(&store, "t");

    let first = importer
        .import("k,v\n1,A\n2,B\n".as_bytes(), "v1", &options)
        .expect("first import");
    assert!(first.diff.is_none());

    let second = importer
        .import("k,v\n2,B*\n3,C\n".as_bytes(), "v2", &options)
        .expect("second import");
    let diff = second.diff.expect("replace produces a diff");
    let summary: Vec<(DiffType, Value)> = diff.iter().map(|e| (e.diff_type, e.key.clone())).collect();
    assert_eq!(
        summary,
        vec![
            (DiffType::Deleted, Value::Integer(1)),
            (DiffType::Changed, Value::Integer(2)),
            (DiffType::Added, Value::Integer(3)),
        ]
    );
    assert_eq!(store.count("t").unwrap(), 2);
    assert!(!store.table_exists("t_old").unwrap());
}

#[test]
fn unchanged_reimport_has_an_empty_diff() {
    let store = Store::open_in_memory().expect("store");
    let csv = "id,amount\n1,10.50\n2,3.25\n";
    import_str(&store, "payments", csv, &ImportOptions::default()).expect("first");
    let again = import_str(&store, "payments", csv, &ImportOptions::default()).expect("second");
    assert_eq!(again.diff, Some(Vec::new()));
}

#[test]
fn empty_and_header_only_inputs_are_rejected() {
    let store = Store::open_in_memory().expect("store");
    for csv in ["", "id,name\n"] {
        let err = import_str(&store, "people", csv, &ImportOptions::default()).expect_err("nothing to import");
        assert!(matches!(err, LedgerError::EmptyInput { .. }), "{csv:?} gave {err:?}");
    }
    assert!(!store.table_exists("people").unwrap());
}

#[test]
fn abort_policy_reports_key_collisions() {
    let store = Store::open_in_memory().expect("store");
    let options = ImportOptions {
        conflict: ConflictPolicy::Abort,
        ..ImportOptions::default().with_primary_key("id").merging()
    };
    import_str(&store, "people", "id,name\n1,Alice\n", &options).expect("seed");

    let err = import_str(&store, "people", "id,name\n1,Alicia\n2,Bob\n", &options).expect_err("id 1 collides");
    let failure = err.import_failure().expect("aggregate failure");
    assert_eq!(failure.failures.len(), 1);
    assert!(failure.failures[0].error.contains("UNIQUE"));
    assert_eq!(failure.report.inserted, 1);
    assert_eq!(store.count("people").unwrap(), 2);
}

#[test]
fn fixture_columns_are_typed_and_normalized() {
    let workspace = TestWorkspace::new();
    let store = workspace.store();
    let report = TableImporter::new(&store, "payments")
        .import_path(&fixture_path("payments.csv"), &ImportOptions::default())
        .expect("import fixture");
    assert_eq!(report.inserted, 3);

    let info = store.table_info("payments").unwrap();
    let columns: Vec<(&str, &str, bool)> = info
        .iter()
        .map(|c| (c.name.as_str(), c.declared_type.as_str(), c.primary_key))
        .collect();
    assert_eq!(
        columns,
        vec![
            ("payment_id", "INTEGER", true),
            ("member_number", "INTEGER", false),
            ("amount", "REAL", false),
            ("description", "TEXT", false),
        ]
    );

    let row = store.find_row("payments", "description", "half year").unwrap().expect("row");
    assert_eq!(row.get("amount"), Some(&Value::Decimal(Decimal::new(1250, 2))));
}

#[test]
fn missing_file_names_the_path() {
    let workspace = TestWorkspace::new();
    let store = workspace.store();
    let missing = workspace.path().join("nope.csv");
    let err = TableImporter::new(&store, "x")
        .import_path(&missing, &ImportOptions::default())
        .expect_err("file does not exist");
    assert!(matches!(err, LedgerError::Io(_)));
    assert!(err.to_string().contains("nope.csv"));
}

#[test]
fn short_rows_store_nulls() {
    let store = Store::open_in_memory().expect("store");
    import_str(&store, "t", "id,a,b\n1,x\n2,y,z\n", &ImportOptions::default()).expect("ragged import");
    let row = store.find_row("t", "id", "1").unwrap().expect("row 1");
    assert_eq!(row.get("b"), Some(&Value::Null));
}

#[test]
fn configured_encoding_is_used_for_cells() {
    let workspace = TestWorkspace::new();
    let store = workspace.store();
    let path = workspace.write_bytes("latin1.csv", b"id,town\n1,Z\xfcrich\n");
    let options = ImportOptions {
        encoding: WINDOWS_1252,
        ..ImportOptions::default()
    };
    TableImporter::new(&store, "towns")
        .import_path(&path, &options)
        .expect("latin-1 import");
    let row = store.find_row("towns", "id", "1").unwrap().expect("row");
    assert_eq!(row.text("town"), Some("Zürich"));
}

#[test]
fn saved_column_map_overrides_inference() {
    let workspace = TestWorkspace::new();
    let store = workspace.store();
    let schema_path = workspace.path().join("codes.yaml");

    let mut first = TableImporter::new(&store, "codes");
    first
        .import("code,label\nA1,first\n".as_bytes(), "codes", &ImportOptions::default())
        .expect("text codes");
    first.schema().expect("cached").save(&schema_path).expect("save schema");

    let schema = TableSchema::load(&schema_path).expect("load schema");
    assert_eq!(schema.column("code").map(|c| c.sql_type), Some(SqlType::Text));
    TableImporter::new(&store, "zip_codes")
        .with_schema(schema)
        .import("code,label\n007,bond\n".as_bytes(), "zips", &ImportOptions::default())
        .expect("seeded import");
    let row = store.find_row("zip_codes", "label", "bond").unwrap().expect("row");
    assert_eq!(row.text("code"), Some("007"));
}

#[test]
fn merge_into_existing_table_keeps_its_types() {
    let store = Store::open_in_memory().expect("store");
    let options = ImportOptions::default().merging();
    import_str(&store, "notes", "id,note\n1,hello\n", &options).expect("seed");
    import_str(&store, "notes", "id,note\n2,42\n", &options).expect("merge numeric-looking note");
    let row = store.find_row("notes", "id", "2").unwrap().expect("row");
    assert_eq!(row.text("note"), Some("42"));
}

struct CannedDownloader(&'static str);

impl Downloader for CannedDownloader {
    fn fetch(&self, url: &str) -> io::Result<Vec<u8>> {
        if url.ends_with("download_completed_payments?state=CO") {
            Ok(self.0.as_bytes().to_vec())
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, url.to_string()))
        }
    }
}

#[test]
fn downloads_are_imported_like_files() {
    let store = Store::open_in_memory().expect("store");
    let urls = MojoUrls::new("club");
    let downloader = CannedDownloader("id,amount\n1,5.00\n");
    let mut importer = TableImporter::new(&store, "payments");

    let report = importer
        .import_download(&downloader, &urls.completed_payments(), &ImportOptions::default())
        .expect("download import");
    assert_eq!(report.inserted, 1);

    let err = importer
        .import_download(&downloader, &urls.pending_payments(), &ImportOptions::default())
        .expect_err("unknown URL");
    assert!(matches!(err, LedgerError::Io(_)));
}
