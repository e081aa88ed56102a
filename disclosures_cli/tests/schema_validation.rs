use disclosures_lib::{
    CancelToken, DbTransactionFilter, IngestConfig, IngestionPipeline, PoolSettings, RawRow,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("CLI crate should be inside workspace")
        .to_path_buf()
}

fn load_rows_fixture() -> Vec<RawRow> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/rows.json");
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("read fixture {}: {}", path.display(), e));
    serde_json::from_str(&text).expect("fixture is an array of string rows")
}

fn load_schema(name: &str) -> Value {
    let path = workspace_root().join("schema").join(name);
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("read schema {}: {}", path.display(), e));
    serde_json::from_str(&text).expect("schema is valid JSON")
}

struct Ingested {
    _dir: tempfile::TempDir,
    report: Value,
    archive: Value,
    transactions: Value,
}

/// Runs the fixture through the pipeline and captures every JSON output.
fn ingest_fixture() -> Ingested {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = IngestConfig {
        db_path: dir.path().join("disclosures.db"),
        archive_dir: dir.path().join("db"),
        pool: PoolSettings {
            max_size: 2,
            connection_timeout: Duration::from_secs(5),
        },
    };
    let db = config.open_db().expect("open db");
    let pipeline = IngestionPipeline::new(&db).with_archive(config.archive());
    let report = pipeline
        .run(&load_rows_fixture(), &CancelToken::new())
        .expect("ingest fixture");

    let archive_text = std::fs::read_to_string(config.archive().grouped_path())
        .expect("archive file written");
    let transactions = db
        .query_transactions(&DbTransactionFilter::default())
        .expect("query transactions");

    Ingested {
        report: serde_json::to_value(&report).expect("report serializes"),
        archive: serde_json::from_str(&archive_text).expect("archive is JSON"),
        transactions: serde_json::to_value(&transactions).expect("rows serialize"),
        _dir: dir,
    }
}

// ---------------------------------------------------------------------------
// Positive validation: outputs conform to their schemas
// ---------------------------------------------------------------------------

#[test]
fn test_report_conforms_to_schema() {
    let ingested = ingest_fixture();
    let schema = load_schema("ingestion_report.schema.json");

    let validator = jsonschema::draft202012::new(&schema).expect("report schema compiles");
    if let Err(e) = validator.validate(&ingested.report) {
        panic!("report failed validation: {e}");
    }
    assert_eq!(ingested.report["accepted"], 3);
    assert_eq!(ingested.report["skipped"], 1);
    assert_eq!(ingested.report["failures"][0]["reason"]["kind"], "malformed");
}

#[test]
fn test_archive_file_conforms_to_schema() {
    let ingested = ingest_fixture();
    let schema = load_schema("grouped_archive.schema.json");

    let validator = jsonschema::draft202012::new(&schema).expect("archive schema compiles");
    if let Err(e) = validator.validate(&ingested.archive) {
        panic!("archive failed validation: {e}");
    }
    assert_eq!(ingested.archive["Jan. 09, 2026"].as_array().map(Vec::len), Some(2));
}

#[test]
fn test_transactions_conform_to_schema() {
    let ingested = ingest_fixture();
    let schema = load_schema("transaction.schema.json");

    let validator = jsonschema::draft202012::new(&schema).expect("transaction schema compiles");
    if let Err(e) = validator.validate(&ingested.transactions) {
        panic!("transactions failed validation: {e}");
    }
    assert_eq!(ingested.transactions.as_array().map(Vec::len), Some(3));
}

// ---------------------------------------------------------------------------
// Negative validation: schemas reject invalid data
// ---------------------------------------------------------------------------

#[test]
fn test_report_schema_rejects_missing_required_field() {
    let mut report = ingest_fixture().report;
    report
        .as_object_mut()
        .expect("report is an object")
        .remove("skipped");

    let schema = load_schema("ingestion_report.schema.json");
    let validator = jsonschema::draft202012::new(&schema).expect("schema compiles");
    assert!(
        validator.validate(&report).is_err(),
        "schema should reject report missing skipped"
    );
}

#[test]
fn test_report_schema_rejects_unknown_skip_kind() {
    let mut report = ingest_fixture().report;
    report["failures"][0]["reason"]["kind"] = Value::String("bogus".to_string());

    let schema = load_schema("ingestion_report.schema.json");
    let validator = jsonschema::draft202012::new(&schema).expect("schema compiles");
    assert!(
        validator.validate(&report).is_err(),
        "schema should reject unknown skip kind"
    );
}

#[test]
fn test_archive_schema_rejects_short_rows() {
    let mut archive = ingest_fixture().archive;
    archive["Jan. 07, 2026"]
        .as_array_mut()
        .expect("date bucket is an array")
        .push(serde_json::json!(["NVDA", "Sale"]));

    let schema = load_schema("grouped_archive.schema.json");
    let validator = jsonschema::draft202012::new(&schema).expect("schema compiles");
    assert!(
        validator.validate(&archive).is_err(),
        "schema should reject rows with fewer than five cells"
    );
}

#[test]
fn test_transaction_schema_rejects_invalid_enum() {
    let mut transactions = ingest_fixture().transactions;
    transactions[0]
        .as_object_mut()
        .expect("transaction is an object")
        .insert("transaction_type".to_string(), Value::String("gift".to_string()));

    let schema = load_schema("transaction.schema.json");
    let validator = jsonschema::draft202012::new(&schema).expect("schema compiles");
    assert!(
        validator.validate(&transactions).is_err(),
        "schema should reject invalid transaction_type"
    );
}

// ---------------------------------------------------------------------------
// Edge cases
// ---------------------------------------------------------------------------

#[test]
fn test_empty_outputs_conform() {
    let cases = [
        ("grouped_archive.schema.json", serde_json::json!({})),
        ("transaction.schema.json", serde_json::json!([])),
    ];

    for (schema_name, empty) in cases {
        let schema = load_schema(schema_name);
        let validator =
            jsonschema::draft202012::new(&schema).unwrap_or_else(|e| panic!("{schema_name}: {e}"));
        if let Err(e) = validator.validate(&empty) {
            panic!("empty output should conform to {schema_name}: {e}");
        }
    }
}
