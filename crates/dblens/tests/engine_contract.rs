use dblens::mock::MockPlugin;
use dblens_core::{
    BackendKind, CancelToken, CellValue, Column, ConnectionProfile, Credentials, DbError,
    Engine, ExportOptions, RowQuery, SortCondition, WhereCondition,
};
use std::sync::Arc;

fn seeded_engine() -> (Engine, ConnectionProfile) {
    let plugin = MockPlugin::new().with_table(
        "users",
        vec![
            Column::new("id", "int").primary(),
            Column::new("name", "text"),
            Column::new("score", "int"),
        ],
        vec![
            vec!["1".into(), "alice".into(), "90".into()],
            vec!["2".into(), "bob".into(), "75".into()],
            vec!["3".into(), "carol".into(), "90".into()],
            vec!["4".into(), "dave".into(), "60".into()],
            vec!["5".into(), "erin".into(), "85".into()],
        ],
    );

    let engine = Engine::new();
    engine.register(Arc::new(plugin));

    let profile = ConnectionProfile::new(
        "mock",
        Credentials::new(BackendKind::Sqlite, "").with_database(":memory:"),
    );
    (engine, profile)
}

#[test]
fn pagination_concatenates_to_the_full_result() {
    let (engine, profile) = seeded_engine();
    let conn = engine.acquire(&profile, None).unwrap();
    let cancel = CancelToken::new();
    let sort = vec![SortCondition::asc("id")];

    let mut paged = Vec::new();
    for offset in (0..5).step_by(2) {
        let query = RowQuery::page(2, offset).with_sort(sort.clone());
        paged.extend(conn.rows("", "users", &query, &cancel).unwrap().rows);
    }

    let full = conn
        .rows("", "users", &RowQuery::page(100, 0).with_sort(sort), &cancel)
        .unwrap();
    assert_eq!(paged, full.rows);
}

#[test]
fn sort_obeys_direction_with_tiebreaker() {
    let (engine, profile) = seeded_engine();
    let conn = engine.acquire(&profile, None).unwrap();

    let query = RowQuery::page(100, 0).with_sort(vec![
        SortCondition::desc("score"),
        SortCondition::asc("id"),
    ]);
    let result = conn.rows("", "users", &query, &CancelToken::new()).unwrap();

    let scores: Vec<&str> = result.rows.iter().map(|r| r[2].as_str()).collect();
    assert_eq!(scores, vec!["90", "90", "85", "75", "60"]);
    // Equal scores tie-break ascending by id.
    assert_eq!(result.rows[0][0], "1");
    assert_eq!(result.rows[1][0], "3");
}

#[test]
fn where_tree_idempotence_laws_hold() {
    let (engine, profile) = seeded_engine();
    let conn = engine.acquire(&profile, None).unwrap();
    let cancel = CancelToken::new();

    let atom = WhereCondition::atomic("score", ">=", "85");
    let base = conn
        .rows(
            "",
            "users",
            &RowQuery::page(100, 0).with_where(atom.clone()),
            &cancel,
        )
        .unwrap();

    let and_dup = WhereCondition::and(vec![atom.clone(), atom.clone()]);
    let or_dup = WhereCondition::or(vec![atom.clone(), atom.clone()]);

    for dup in [and_dup, or_dup] {
        let result = conn
            .rows("", "users", &RowQuery::page(100, 0).with_where(dup), &cancel)
            .unwrap();
        assert_eq!(result.rows, base.rows);
    }
}

#[test]
fn double_negation_restores_the_atomic_result() {
    let (engine, profile) = seeded_engine();
    let conn = engine.acquire(&profile, None).unwrap();
    let cancel = CancelToken::new();

    let like = WhereCondition::atomic("name", "LIKE", "a%");
    let positive = conn
        .rows(
            "",
            "users",
            &RowQuery::page(100, 0).with_where(like),
            &cancel,
        )
        .unwrap();

    // NOT LIKE is LIKE's dual; applying it and subtracting from the full
    // set must give the same rows back.
    let not_like = WhereCondition::atomic("name", "NOT LIKE", "a%");
    let negative = conn
        .rows(
            "",
            "users",
            &RowQuery::page(100, 0).with_where(not_like),
            &cancel,
        )
        .unwrap();
    let all = conn
        .rows("", "users", &RowQuery::page(100, 0), &cancel)
        .unwrap();

    assert_eq!(positive.rows.len() + negative.rows.len(), all.rows.len());
    for row in &positive.rows {
        assert!(!negative.rows.contains(row));
    }
}

#[test]
fn empty_compound_nodes_are_rejected() {
    let (engine, profile) = seeded_engine();
    let conn = engine.acquire(&profile, None).unwrap();

    for condition in [WhereCondition::And(vec![]), WhereCondition::Or(vec![])] {
        let query = RowQuery::page(10, 0).with_where(condition);
        assert!(matches!(
            conn.rows("", "users", &query, &CancelToken::new()),
            Err(DbError::InvalidArgument(_))
        ));
    }
}

#[test]
fn insert_then_filter_by_key_roundtrips() {
    let (engine, profile) = seeded_engine();
    let conn = engine.acquire(&profile, None).unwrap();
    let cancel = CancelToken::new();

    conn.add_row(
        "",
        "users",
        &[
            CellValue::typed("id", "9", "int"),
            CellValue::typed("name", "zoe", "text"),
            CellValue::typed("score", "99", "int"),
        ],
    )
    .unwrap();

    let query =
        RowQuery::page(10, 0).with_where(WhereCondition::atomic_typed("id", "=", "9", "int"));
    let result = conn.rows("", "users", &query, &cancel).unwrap();
    assert_eq!(
        result.rows,
        vec![vec!["9".to_string(), "zoe".to_string(), "99".to_string()]]
    );
}

#[test]
fn update_by_key_changes_exactly_one_row() {
    let (engine, profile) = seeded_engine();
    let conn = engine.acquire(&profile, None).unwrap();
    let cancel = CancelToken::new();

    let before = conn
        .rows("", "users", &RowQuery::page(100, 0), &cancel)
        .unwrap();

    conn.update_row(
        "",
        "users",
        &[
            CellValue::typed("id", "2", "int"),
            CellValue::typed("name", "robert", "text"),
        ],
        &["name".to_string()],
    )
    .unwrap();

    let after = conn
        .rows("", "users", &RowQuery::page(100, 0), &cancel)
        .unwrap();
    assert_eq!(before.rows.len(), after.rows.len());

    let changed: Vec<_> = after
        .rows
        .iter()
        .filter(|row| !before.rows.contains(row))
        .collect();
    assert_eq!(changed, vec![&vec![
        "2".to_string(),
        "robert".to_string(),
        "75".to_string()
    ]]);
}

#[test]
fn delete_by_key_removes_exactly_one_row() {
    let (engine, profile) = seeded_engine();
    let conn = engine.acquire(&profile, None).unwrap();
    let cancel = CancelToken::new();

    conn.delete_row("", "users", &[CellValue::typed("id", "3", "int")])
        .unwrap();

    let remaining = conn
        .rows("", "users", &RowQuery::page(100, 0), &cancel)
        .unwrap();
    assert_eq!(remaining.rows.len(), 4);
    assert!(!remaining.rows.iter().any(|r| r[0] == "3"));

    assert!(matches!(
        conn.delete_row("", "users", &[CellValue::typed("id", "3", "int")]),
        Err(DbError::NotFound(_))
    ));
}

#[test]
fn export_escapes_and_honours_selection() {
    let (engine, profile) = seeded_engine();
    let conn = engine.acquire(&profile, None).unwrap();

    conn.add_row(
        "",
        "users",
        &[
            CellValue::typed("id", "7", "int"),
            CellValue::typed("name", "=cmd()", "text"),
            CellValue::typed("score", "0", "int"),
        ],
    )
    .unwrap();

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut sink = |row: &[String]| -> Result<(), DbError> {
        rows.push(row.to_vec());
        Ok(())
    };
    conn.export_rows(
        "",
        "users",
        &ExportOptions {
            include_types_in_header: true,
            selected_rows: Some(vec![vec!["7".to_string()]]),
        },
        &mut sink,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], vec!["id:int", "name:text", "score:int"]);
    assert_eq!(rows[1][1], "'=cmd()");
}

#[test]
fn cancelled_export_returns_cancelled() {
    let (engine, profile) = seeded_engine();
    let conn = engine.acquire(&profile, None).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();

    let mut sink = |_: &[String]| -> Result<(), DbError> { Ok(()) };
    assert!(matches!(
        conn.export_rows("", "users", &ExportOptions::default(), &mut sink, &cancel),
        Err(DbError::Cancelled)
    ));
}

#[test]
fn pool_shares_handles_and_invalidation_drops_them() {
    let (engine, profile) = seeded_engine();

    let a = engine.acquire(&profile, None).unwrap();
    let b = engine.acquire(&profile, None).unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    engine.invalidate(&profile.id);
    let c = engine.acquire(&profile, None).unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
}

#[test]
fn builtin_registry_covers_every_backend() {
    let engine = dblens::engine();
    let mut kinds = engine.registered_kinds();
    kinds.sort_by_key(|k| k.display_name());
    assert_eq!(kinds.len(), 8);

    for kind in BackendKind::all() {
        let metadata = engine.metadata(*kind).unwrap();
        assert!(!metadata.display_name.is_empty());
        assert!(metadata.supports_operator("="), "{:?} lacks '='", kind);
    }
}
