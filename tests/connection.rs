#![cfg(feature = "rusqlite")]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::*;
use quarry::prelude::*;
use quarry::{Connection, SqliteConnection};

#[test]
fn test_connection_opens_lazily() {
    let opened = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&opened);
    let db = Database::new(DatabaseConfig::memory(), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        let conn = SqliteConnection::open_in_memory()?;
        Ok(Box::new(conn) as Box<dyn Connection>)
    })
    .unwrap();

    db.register::<Comment>().unwrap();
    assert!(!db.is_connected());
    assert_eq!(opened.load(Ordering::SeqCst), 0);

    db.execute_raw("CREATE TABLE comments (id INTEGER PRIMARY KEY, post_id INTEGER, body TEXT, created_at TEXT, updated_at TEXT)")
        .unwrap();
    Comment::create(&db, attrs! { "body" => "x" }).unwrap();
    assert!(db.is_connected());
    assert_eq!(opened.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failed_connect_is_a_configuration_error() {
    let db = Database::new(DatabaseConfig::memory(), |_| Err("refused".into())).unwrap();
    let err = db.connect().unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("refused"));
}

#[test]
fn test_file_database_persists_between_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quarry.sqlite");
    let config = DatabaseConfig::memory().with_path(path.to_string_lossy());

    let db = Database::sqlite(config.clone()).unwrap();
    db.execute_raw("CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE)")
        .unwrap();
    db.register::<Tag>().unwrap();
    Tag::create(&db, attrs! { "name" => "rust" }).unwrap();
    drop(db);

    let db = Database::sqlite(config).unwrap();
    db.register::<Tag>().unwrap();
    let tag = Tag::find_or_fail(&db, 1).unwrap();
    assert_eq!(tag.get_raw("name"), Value::Text("rust".into()));
}

#[test]
fn test_driver_errors_carry_statement() {
    let db = setup_db();
    Tag::create(&db, attrs! { "name" => "rust" }).unwrap();
    let err = Tag::create(&db, attrs! { "name" => "rust" }).unwrap_err();
    match err {
        QuarryError::Persistence { statement, sql, .. } => {
            assert_eq!(statement, quarry::StatementKind::Insert);
            assert!(sql.starts_with("INSERT INTO `tags`"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(quarry::CONFIG_FILE);
    std::fs::write(
        &path,
        r#"
dialect = "sqlite"
path = ":memory:"
encryption_key = "base64:q83vEjRWeJCrze8SNFZ4kKvN7xI0VniQq83vEjRWeJA="
chunk_size = 50
log_queries = true
"#,
    )
    .unwrap();

    let config = DatabaseConfig::load_from(&path).unwrap();
    assert_eq!(config.chunk_size, 50);
    assert!(config.log_queries);
    assert_eq!(config.encryption_key.as_deref(), Some(ENCRYPTION_KEY));

    let db = setup_with(config);
    // Logging was enabled by configuration, so schema setup is recorded.
    assert!(!db.query_log().is_empty());

    let missing = DatabaseConfig::load_from(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(missing, QuarryError::Configuration(_)));
}

#[test]
fn test_config_from_lookup() {
    let config = DatabaseConfig::from_lookup(|key| match key {
        "QUARRY_DATABASE" => Some("app.sqlite".to_string()),
        "QUARRY_CHUNK_SIZE" => Some("25".to_string()),
        "QUARRY_LOG_QUERIES" => Some("yes".to_string()),
        _ => None,
    })
    .unwrap();
    assert_eq!(config.path, "app.sqlite");
    assert_eq!(config.chunk_size, 25);
    assert!(config.log_queries);
    assert_eq!(config.encryption_key, None);

    let err = DatabaseConfig::from_lookup(|key| (key == "QUARRY_CHUNK_SIZE").then(|| "0".to_string())).unwrap_err();
    assert!(matches!(err, QuarryError::Configuration(_)));
}
