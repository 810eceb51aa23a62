#![cfg(feature = "rusqlite")]

mod common;

use std::panic::{self, AssertUnwindSafe};

use common::*;
use quarry::prelude::*;

fn comment_count(db: &Database) -> u64 {
    Comment::query(db).unwrap().count().unwrap()
}

#[test]
fn test_commit() {
    let db = setup_db();
    let created = db
        .transaction(|db| {
            Comment::create(db, attrs! { "body" => "a" })?;
            Comment::create(db, attrs! { "body" => "b" })?;
            Ok(2)
        })
        .unwrap();
    assert_eq!(created, 2);
    assert_eq!(db.transaction_level(), 0);
    assert_eq!(comment_count(&db), 2);
}

#[test]
fn test_error_rolls_back() {
    let db = setup_db();
    let result: quarry::Result<()> = db.transaction(|db| {
        Comment::create(db, attrs! { "body" => "a" })?;
        Err(QuarryError::Transaction("abort".into()))
    });
    assert!(matches!(result, Err(QuarryError::Transaction(_))));
    assert_eq!(db.transaction_level(), 0);
    assert_eq!(comment_count(&db), 0);
}

#[test]
fn test_nested_failure_rolls_back_to_savepoint() {
    let db = setup_db();
    db.transaction(|db| {
        Comment::create(db, attrs! { "body" => "outer" })?;
        let inner: quarry::Result<()> = db.transaction(|db| {
            assert_eq!(db.transaction_level(), 2);
            Comment::create(db, attrs! { "body" => "inner" })?;
            Err(QuarryError::Transaction("inner abort".into()))
        });
        assert!(inner.is_err());
        assert_eq!(db.transaction_level(), 1);
        Ok(())
    })
    .unwrap();

    let bodies = Comment::query(&db).unwrap().pluck("body").unwrap();
    assert_eq!(bodies, [Value::Text("outer".into())]);
}

#[test]
fn test_outer_rollback_discards_released_savepoint() {
    let db = setup_db();
    db.begin_transaction().unwrap();
    db.begin_transaction().unwrap();
    Comment::create(&db, attrs! { "body" => "inner" }).unwrap();
    db.commit().unwrap();
    assert_eq!(db.transaction_level(), 1);
    db.roll_back().unwrap();

    assert_eq!(db.transaction_level(), 0);
    assert_eq!(comment_count(&db), 0);
}

#[test]
fn test_commit_without_transaction() {
    let db = setup_db();
    assert!(matches!(db.commit(), Err(QuarryError::Transaction(_))));
    assert!(matches!(db.roll_back(), Err(QuarryError::Transaction(_))));
}

#[test]
fn test_panic_rolls_back_and_propagates() {
    let db = setup_db();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let _: quarry::Result<()> = db.transaction(|db| {
            Comment::create(db, attrs! { "body" => "doomed" })?;
            panic!("boom");
        });
    }));
    assert!(outcome.is_err());
    assert_eq!(db.transaction_level(), 0);
    assert_eq!(comment_count(&db), 0);
}

#[test]
fn test_save_or_fail_runs_in_transaction() {
    let db = setup_db();
    db.listen("Comment", ModelEvent::Created, |comment| {
        assert_eq!(comment.db().transaction_level(), 1);
        Propagation::Continue
    });
    let mut comment = Comment::make(&db, attrs! { "body" => "x" }).unwrap();
    assert!(comment.save_or_fail().unwrap());
    assert_eq!(db.transaction_level(), 0);
}

#[test]
fn test_failed_version_check_rolls_back_transaction() {
    let db = setup_db();
    let account = Account::create(&db, attrs! { "balance" => 10 }).unwrap();
    let mut stale = Account::find_or_fail(&db, account.key()).unwrap();
    Account::query(&db).unwrap().update(attrs! { "version" => 5 }).unwrap();

    let result = db.transaction(|db| {
        Comment::create(db, attrs! { "body" => "side effect" })?;
        stale.set("balance", 20)?;
        stale.save()
    });
    assert!(matches!(result, Err(QuarryError::ConcurrencyConflict { .. })));
    assert_eq!(comment_count(&db), 0);
}
