use catalog::Column;
use common::{Config, DbError, Row};
use engine::StorageEngine;
use tempfile::tempdir;
use types::{SqlType, Value};

fn users_columns() -> Vec<Column> {
    vec![
        Column::new("id", SqlType::Int),
        Column::varchar("name", 50),
        Column::new("age", SqlType::Int),
    ]
}

fn engine_in(dir: &std::path::Path) -> StorageEngine {
    let config = Config::builder()
        .data_dir(dir.to_path_buf())
        .buffer_pool_frames(16)
        .build();
    StorageEngine::open(config).unwrap()
}

fn user(id: i32, name: &str, age: i32) -> Row {
    Row::new(vec![
        Value::Int(id),
        Value::Varchar(name.into()),
        Value::Int(age),
    ])
}

#[test]
fn point_lookup_by_primary_key() {
    let dir = tempdir().unwrap();
    let mut engine = engine_in(dir.path());
    engine.create_table("users", users_columns()).unwrap();

    let users = engine.get_table("users").unwrap();
    users.insert(&user(1, "Alice", 25)).unwrap();
    users.insert(&user(2, "Bob", 17)).unwrap();
    users.insert(&user(3, "Charlie", 30)).unwrap();

    let bob = users.select_by_pk(&Value::Int(2)).unwrap().unwrap();
    assert_eq!(bob, user(2, "Bob", 17));
    assert_eq!(users.select_by_pk(&Value::Int(4)).unwrap(), None);
}

#[test]
fn range_scan_after_mixed_deletes() {
    let dir = tempdir().unwrap();
    let mut engine = engine_in(dir.path());
    engine.create_table("users", users_columns()).unwrap();
    let users = engine.get_table("users").unwrap();

    for id in 1..=50 {
        users.insert(&user(id, "u", id)).unwrap();
    }
    for id in 10..=20 {
        assert!(users.delete(&Value::Int(id)).unwrap());
    }

    let rows = users
        .range_select(Some(&Value::Int(5)), Some(&Value::Int(25)))
        .unwrap();
    let ids: Vec<_> = rows
        .iter()
        .map(|row| match &row.values[0] {
            Value::Int(id) => *id,
            other => panic!("unexpected pk {other:?}"),
        })
        .collect();
    assert_eq!(ids, vec![5, 6, 7, 8, 9, 21, 22, 23, 24, 25]);
}

#[test]
fn full_scan_returns_rows_in_key_order() {
    let dir = tempdir().unwrap();
    let mut engine = engine_in(dir.path());
    engine.create_table("users", users_columns()).unwrap();
    let users = engine.get_table("users").unwrap();

    for id in [5, 1, 9, 3] {
        users.insert(&user(id, "u", id)).unwrap();
    }

    let ids: Vec<_> = users
        .full_scan()
        .unwrap()
        .into_iter()
        .map(|row| row.values[0].clone())
        .collect();
    assert_eq!(
        ids,
        vec![Value::Int(1), Value::Int(3), Value::Int(5), Value::Int(9)]
    );
}

#[test]
fn inserted_row_reads_back_byte_equal() {
    let dir = tempdir().unwrap();
    let mut engine = engine_in(dir.path());
    engine
        .create_table(
            "mixed",
            vec![
                Column::new("id", SqlType::Int),
                Column::new("score", SqlType::Double),
                Column::varchar("note", 100),
            ],
        )
        .unwrap();
    let mixed = engine.get_table("mixed").unwrap();

    let row = Row::new(vec![
        Value::Int(7),
        Value::Double(-0.125),
        Value::Null,
    ]);
    mixed.insert(&row).unwrap();

    assert_eq!(mixed.select_by_pk(&Value::Int(7)).unwrap(), Some(row));
}

#[test]
fn duplicate_primary_key_is_rejected() {
    let dir = tempdir().unwrap();
    let mut engine = engine_in(dir.path());
    engine.create_table("users", users_columns()).unwrap();
    let users = engine.get_table("users").unwrap();

    users.insert(&user(1, "Alice", 25)).unwrap();
    let err = users.insert(&user(1, "Impostor", 99)).unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey(_)));

    // The original row survives.
    assert_eq!(
        users.select_by_pk(&Value::Int(1)).unwrap(),
        Some(user(1, "Alice", 25))
    );
}

#[test]
fn update_replaces_the_stored_row() {
    let dir = tempdir().unwrap();
    let mut engine = engine_in(dir.path());
    engine.create_table("users", users_columns()).unwrap();
    let users = engine.get_table("users").unwrap();

    users.insert(&user(1, "Alice", 25)).unwrap();
    users.update(&Value::Int(1), &user(1, "Alice", 26)).unwrap();

    assert_eq!(
        users.select_by_pk(&Value::Int(1)).unwrap(),
        Some(user(1, "Alice", 26))
    );

    let err = users
        .update(&Value::Int(1), &user(2, "Alice", 26))
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));

    let err = users
        .update(&Value::Int(99), &user(99, "Nobody", 1))
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
}

#[test]
fn schema_validation_on_insert() {
    let dir = tempdir().unwrap();
    let mut engine = engine_in(dir.path());
    engine.create_table("users", users_columns()).unwrap();
    let users = engine.get_table("users").unwrap();

    // Wrong arity.
    let err = users.insert(&Row::new(vec![Value::Int(1)])).unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));

    // Type mismatch.
    let err = users
        .insert(&Row::new(vec![
            Value::Varchar("1".into()),
            Value::Varchar("x".into()),
            Value::Int(1),
        ]))
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));

    // Null primary key.
    let err = users
        .insert(&Row::new(vec![
            Value::Null,
            Value::Varchar("x".into()),
            Value::Int(1),
        ]))
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));

    // Varchar over its declared bound.
    let err = users
        .insert(&Row::new(vec![
            Value::Int(1),
            Value::Varchar("x".repeat(51)),
            Value::Int(1),
        ]))
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
}

#[test]
fn registry_operations_and_errors() {
    let dir = tempdir().unwrap();
    let mut engine = engine_in(dir.path());

    assert!(matches!(
        engine.create_table("", users_columns()),
        Err(DbError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.create_table("empty", vec![]),
        Err(DbError::InvalidArgument(_))
    ));

    engine.create_table("users", users_columns()).unwrap();
    assert!(matches!(
        engine.create_table("users", users_columns()),
        Err(DbError::TableExists(_))
    ));

    engine.create_table("orders", users_columns()).unwrap();
    assert_eq!(engine.table_count().unwrap(), 2);
    assert_eq!(
        engine.all_table_names().unwrap(),
        vec!["orders".to_string(), "users".to_string()]
    );
    assert!(engine.table_exists("users").unwrap());
    assert!(!engine.table_exists("ghosts").unwrap());

    assert!(matches!(
        engine.get_table("ghosts"),
        Err(DbError::TableNotFound(_))
    ));
    assert!(matches!(
        engine.drop_table("ghosts"),
        Err(DbError::TableNotFound(_))
    ));

    engine.drop_table("orders").unwrap();
    assert!(!engine.table_exists("orders").unwrap());
    assert_eq!(engine.table_count().unwrap(), 1);
}

#[test]
fn closed_engine_refuses_every_call() {
    let dir = tempdir().unwrap();
    let mut engine = engine_in(dir.path());
    engine.create_table("users", users_columns()).unwrap();
    engine.close().unwrap();

    assert!(matches!(
        engine.get_table("users"),
        Err(DbError::EngineClosed)
    ));
    assert!(matches!(
        engine.create_table("more", users_columns()),
        Err(DbError::EngineClosed)
    ));
    assert!(matches!(engine.drop_table("users"), Err(DbError::EngineClosed)));
    assert!(matches!(engine.table_exists("users"), Err(DbError::EngineClosed)));
    assert!(matches!(engine.all_table_names(), Err(DbError::EngineClosed)));
    assert!(matches!(engine.table_count(), Err(DbError::EngineClosed)));
    assert!(matches!(
        engine.create_index("users", "idx", "name", false),
        Err(DbError::EngineClosed)
    ));
    assert!(matches!(engine.close(), Err(DbError::EngineClosed)));
}

#[test]
fn many_rows_across_many_pages() {
    let dir = tempdir().unwrap();
    let mut engine = engine_in(dir.path());
    engine.create_table("users", users_columns()).unwrap();
    let users = engine.get_table("users").unwrap();

    // Enough rows to force a tree of several levels under a small pool.
    for id in 0..2_000 {
        users.insert(&user(id, &format!("user-{id}"), id % 90)).unwrap();
    }
    for id in (0..2_000).step_by(97) {
        assert_eq!(
            users.select_by_pk(&Value::Int(id)).unwrap(),
            Some(user(id, &format!("user-{id}"), id % 90))
        );
    }
    assert_eq!(users.full_scan().unwrap().len(), 2_000);
}
