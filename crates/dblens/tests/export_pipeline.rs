//! End-to-end export through the real SQLite plugin: create a unit,
//! insert rows, stream them out as CSV via the facade.

use dblens_core::{
    BackendKind, CancelToken, CellValue, ConnectionProfile, Credentials, ExportOptions,
    UnitField,
};

fn sqlite_profile(dir: &tempfile::TempDir) -> ConnectionProfile {
    let path = dir.path().join("export.db");
    std::fs::File::create(&path).unwrap();

    ConnectionProfile::new(
        "export-fixture",
        Credentials::new(BackendKind::Sqlite, "")
            .with_database(path.to_string_lossy().into_owned()),
    )
}

#[test]
fn create_insert_export_roundtrip() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    let profile = sqlite_profile(&dir);
    let engine = dblens::engine();
    let cancel = CancelToken::new();

    let conn = engine.acquire(&profile, None).unwrap();
    conn.add_storage_unit(
        "",
        "events",
        &[
            UnitField::new("id", "INTEGER").primary(),
            UnitField::new("payload", "TEXT"),
        ],
    )
    .unwrap();

    conn.add_row(
        "",
        "events",
        &[
            CellValue::typed("id", "1", "INTEGER"),
            CellValue::typed("payload", "=1+1", "TEXT"),
        ],
    )
    .unwrap();
    conn.add_row(
        "",
        "events",
        &[
            CellValue::typed("id", "2", "INTEGER"),
            CellValue::typed("payload", "safe", "TEXT"),
        ],
    )
    .unwrap();

    let mut buffer = Vec::new();
    let written = dblens::export_csv(
        &profile,
        "",
        "events",
        &ExportOptions::default(),
        &mut buffer,
        &cancel,
    )
    .unwrap();
    assert_eq!(written, 2);

    let output = String::from_utf8(buffer).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines[0], "id,payload");
    assert_eq!(lines[1], "1,'=1+1");
    assert_eq!(lines[2], "2,safe");
}
