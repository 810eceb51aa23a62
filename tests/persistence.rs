#![cfg(feature = "rusqlite")]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::*;
use quarry::prelude::*;

#[test]
fn test_insert_assigns_key_and_timestamps() {
    let db = setup_db();
    let mut post = Post::make(&db, attrs! { "title" => "Hello" }).unwrap();
    assert!(!post.exists());
    assert_eq!(post.get_raw("status"), Value::Text("draft".into()));

    assert!(post.save().unwrap());
    assert!(post.exists());
    assert!(post.was_recently_created());
    assert_eq!(post.key(), Value::Int(1));
    assert!(post.get_raw("created_at").as_datetime().is_some());
    assert_eq!(post.get_raw("created_at"), post.get_raw("updated_at"));
    assert!(post.is_clean());

    let fetched = Post::find_or_fail(&db, 1).unwrap();
    assert!(!fetched.was_recently_created());
    assert_eq!(fetched.get_raw("title"), Value::Text("Hello".into()));
    assert_eq!(fetched.get_raw("status"), Value::Text("draft".into()));
    // Read back as text in the storage format.
    assert_eq!(
        fetched.get_raw("created_at").to_string(),
        post.get_raw("created_at").to_string()
    );
}

#[test]
fn test_model_without_timestamps() {
    let db = setup_db();
    let tag = Tag::create(&db, attrs! { "name" => "rust" }).unwrap();
    assert!(!tag.has_attribute("created_at"));
    assert!(!tag.has_attribute("updated_at"));
}

#[test]
fn test_update_writes_only_dirty_columns() {
    let db = setup_db();
    let mut post = seed_posts(&db, &["Hello"]).remove(0);

    start_log(&db);
    assert!(post.update(attrs! { "title" => "Changed", "views" => 3 }).unwrap());
    let log = db.query_log();
    assert_eq!(log.len(), 1);
    assert!(log[0].sql.starts_with("UPDATE"));
    assert!(log[0].sql.contains("`title`"));
    assert!(!log[0].sql.contains("`status`"));

    let fetched = Post::find_or_fail(&db, post.key()).unwrap();
    assert_eq!(fetched.get_raw("title"), Value::Text("Changed".into()));
    assert_eq!(fetched.get_raw("views"), Value::Int(3));
}

#[test]
fn test_update_on_new_entity_is_refused() {
    let db = setup_db();
    let mut post = Post::make(&db, attrs! { "title" => "Hello" }).unwrap();
    assert!(!post.update(attrs! { "title" => "Changed" }).unwrap());
    assert!(!post.exists());
}

#[test]
fn test_validation_failure() {
    let db = setup_db();
    let mut post = Post::make(&db, attrs! { "title" => "  " }).unwrap();

    start_log(&db);
    assert!(!post.save().unwrap());
    assert_eq!(statement_count(&db), 0);
    assert!(!post.exists());
    assert_eq!(post.errors().first("title"), Some("The title field is required."));

    let err = post.save_or_fail().unwrap_err();
    match err {
        QuarryError::ValidationFailed(errors) => assert!(errors.has("title")),
        other => panic!("unexpected error: {other}"),
    }

    post.set("title", "Fixed").unwrap();
    assert!(post.save_or_fail().unwrap());
    assert!(post.errors().is_empty());
}

#[test]
fn test_soft_delete_and_restore() {
    let db = setup_db();
    let mut post = seed_posts(&db, &["Hello"]).remove(0);
    let key = post.key();

    assert!(post.delete().unwrap());
    assert!(post.trashed());
    assert!(post.exists());
    assert!(post.is_clean());

    assert!(Post::find(&db, key.clone()).unwrap().is_none());
    assert_eq!(Post::query(&db).unwrap().with_trashed().count().unwrap(), 1);
    assert_eq!(Post::query(&db).unwrap().only_trashed().count().unwrap(), 1);

    let mut trashed = Post::query(&db).unwrap().with_trashed().find_or_fail(key.clone()).unwrap();
    assert!(trashed.trashed());
    assert!(trashed.restore().unwrap());
    assert!(!trashed.trashed());
    assert!(Post::find(&db, key.clone()).unwrap().is_some());

    assert!(trashed.force_delete().unwrap());
    assert!(!trashed.exists());
    assert_eq!(Post::query(&db).unwrap().with_trashed().count().unwrap(), 0);
}

#[test]
fn test_hard_delete() {
    let db = setup_db();
    let post = seed_posts(&db, &["Hello"]).remove(0);
    let mut comment = Comment::create(&db, attrs! { "post_id" => post.key(), "body" => "x" }).unwrap();

    assert!(comment.delete().unwrap());
    assert!(!comment.exists());
    assert!(!comment.delete().unwrap());
    assert_eq!(Comment::query(&db).unwrap().count().unwrap(), 0);
}

#[test]
fn test_restore_requires_soft_deletes() {
    let db = setup_db();
    let mut comment = Comment::create(&db, attrs! { "body" => "x" }).unwrap();
    let err = comment.restore().unwrap_err();
    assert!(matches!(err, QuarryError::Configuration(_)));
}

#[test]
fn test_versioned_update_detects_conflict() {
    let db = setup_db();
    let account = Account::create(&db, attrs! { "balance" => 100 }).unwrap();
    assert_eq!(account.get_raw("version"), Value::Int(1));

    let mut first = Account::find_or_fail(&db, account.key()).unwrap();
    let mut second = Account::find_or_fail(&db, account.key()).unwrap();

    first.set("balance", 150).unwrap();
    assert!(first.save().unwrap());
    assert_eq!(first.get_raw("version"), Value::Int(2));

    second.set("balance", 50).unwrap();
    let err = second.save().unwrap_err();
    match err {
        QuarryError::ConcurrencyConflict { model, key, version } => {
            assert_eq!(model, "Account");
            assert_eq!(key, account.key());
            assert_eq!(version, Value::Int(1));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(second.get_raw("version"), Value::Int(1));
    assert!(second.is_dirty_attribute("balance"));

    let stored = Account::find_or_fail(&db, account.key()).unwrap();
    assert_eq!(stored.get("balance").unwrap(), Value::Int(150));
    assert_eq!(stored.get_raw("version"), Value::Int(2));

    second.refresh().unwrap();
    second.set("balance", 75).unwrap();
    assert!(second.save().unwrap());
    assert_eq!(second.get_raw("version"), Value::Int(3));
}

#[test]
fn test_halting_listener_cancels_save() {
    let db = setup_db();
    db.listen("Post", ModelEvent::Creating, |post| {
        if post.get_raw("title") == Value::Text("blocked".into()) {
            Propagation::Halt
        } else {
            Propagation::Continue
        }
    });

    let mut post = Post::make(&db, attrs! { "title" => "blocked" }).unwrap();
    start_log(&db);
    assert!(!post.save().unwrap());
    assert!(!post.exists());
    assert_eq!(statement_count(&db), 0);

    let post = Post::create(&db, attrs! { "title" => "allowed" }).unwrap();
    assert!(post.exists());
}

#[test]
fn test_event_order() {
    let db = setup_db();
    let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
    for event in [
        ModelEvent::Saving,
        ModelEvent::Creating,
        ModelEvent::Created,
        ModelEvent::Updating,
        ModelEvent::Updated,
        ModelEvent::Saved,
        ModelEvent::Deleting,
        ModelEvent::Deleted,
    ] {
        let fired = Arc::clone(&fired);
        db.listen("Comment", event, move |_| {
            fired.lock().unwrap().push(event.as_str());
            Propagation::Continue
        });
    }

    let mut comment = Comment::create(&db, attrs! { "body" => "x" }).unwrap();
    comment.set("body", "y").unwrap();
    comment.save().unwrap();
    comment.delete().unwrap();

    assert_eq!(
        *fired.lock().unwrap(),
        [
            "saving", "creating", "created", "saved", "saving", "updating", "updated", "saved", "deleting",
            "deleted",
        ]
    );
}

#[test]
fn test_listener_may_modify_entity() {
    let db = setup_db();
    db.listen("Comment", ModelEvent::Saving, |comment| {
        let body = comment.get_raw("body").to_string();
        comment.set_raw("body", body.trim().to_string());
        Propagation::Continue
    });
    let comment = Comment::create(&db, attrs! { "body" => "  padded  " }).unwrap();
    let stored = Comment::find_or_fail(&db, comment.key()).unwrap();
    assert_eq!(stored.get_raw("body"), Value::Text("padded".into()));
}

#[test]
fn test_state_transitions() {
    let db = setup_db();
    let mut post = seed_posts(&db, &["Hello"]).remove(0);

    post.set("status", "published").unwrap();
    let err = post.save().unwrap_err();
    assert!(matches!(
        err,
        QuarryError::IllegalStateTransition { ref attribute, ref from, ref to }
            if attribute == "status" && *from == Value::Text("draft".into()) && *to == Value::Text("published".into())
    ));

    post.set("status", "review").unwrap();
    assert!(post.save().unwrap());
    post.set("status", "published").unwrap();
    assert!(post.save().unwrap());

    let stored = Post::find_or_fail(&db, post.key()).unwrap();
    assert_eq!(stored.get_raw("status"), Value::Text("published".into()));
}

#[test]
fn test_immutable_entity() {
    let db = setup_db();
    let mut video = Video::create(&db, attrs! { "title" => "intro" }).unwrap();

    // Saving without changes is allowed.
    assert!(video.save().unwrap());

    video.set("title", "outro").unwrap();
    let err = video.save().unwrap_err();
    assert!(matches!(err, QuarryError::ImmutableEntity { operation: "updated", .. }));

    let err = video.delete().unwrap_err();
    assert!(matches!(err, QuarryError::ImmutableEntity { operation: "deleted", .. }));

    let err = Video::query(&db).unwrap().update(attrs! { "title" => "x" }).unwrap_err();
    assert!(matches!(err, QuarryError::ImmutableEntity { .. }));

    let stored = Video::find_or_fail(&db, video.key()).unwrap();
    assert_eq!(stored.get_raw("title"), Value::Text("intro".into()));
}

#[test]
fn test_increment_and_decrement() {
    let db = setup_db();
    let mut post = seed_posts(&db, &["Hello"]).remove(0);
    let mut other = Post::find_or_fail(&db, post.key()).unwrap();

    assert!(post.increment("views", 5).unwrap());
    assert_eq!(post.get_raw("views"), Value::Int(5));
    assert!(!post.is_dirty_attribute("views"));

    // Applied in the store relative to the stored value.
    assert!(other.increment("views", 2).unwrap());
    assert_eq!(other.get_raw("views"), Value::Int(2));
    let stored = Post::find_or_fail(&db, post.key()).unwrap();
    assert_eq!(stored.get_raw("views"), Value::Int(7));

    assert!(post.decrement("views", 1).unwrap());
    let stored = Post::find_or_fail(&db, post.key()).unwrap();
    assert_eq!(stored.get_raw("views"), Value::Int(6));

    let err = post.increment("title", 1).unwrap_err();
    assert!(matches!(err, QuarryError::InvalidStatement(_)));
}

#[test]
fn test_increment_overflow_is_rejected() {
    let db = setup_db();
    let mut post = seed_posts(&db, &["Hello"]).remove(0);
    post.increment("views", 5).unwrap();

    start_log(&db);
    let err = post.increment("views", i64::MAX).unwrap_err();
    assert!(matches!(err, QuarryError::InvalidStatement(_)));
    let err = post.decrement("views", i64::MIN).unwrap_err();
    assert!(matches!(err, QuarryError::InvalidStatement(_)));
    assert_eq!(statement_count(&db), 0);
    assert_eq!(post.get_raw("views"), Value::Int(5));

    let stored = Post::find_or_fail(&db, post.key()).unwrap();
    assert_eq!(stored.get_raw("views"), Value::Int(5));
}

#[test]
fn test_refresh_and_fresh() {
    let db = setup_db();
    let mut post = seed_posts(&db, &["Hello"]).remove(0);
    Comment::create(&db, attrs! { "post_id" => post.key(), "body" => "a" }).unwrap();
    post.load(["comments"]).unwrap();
    assert_eq!(post.many("comments").unwrap().len(), 1);

    Post::query(&db).unwrap().update(attrs! { "title" => "Elsewhere" }).unwrap();
    Comment::create(&db, attrs! { "post_id" => post.key(), "body" => "b" }).unwrap();

    let fresh = post.fresh().unwrap().unwrap();
    assert_eq!(fresh.get_raw("title"), Value::Text("Elsewhere".into()));
    assert_eq!(fresh.many("comments").unwrap().len(), 2);
    assert_eq!(post.get_raw("title"), Value::Text("Hello".into()));

    post.set("title", "Local").unwrap();
    post.refresh().unwrap();
    assert_eq!(post.get_raw("title"), Value::Text("Elsewhere".into()));
    assert!(post.is_clean());
    assert_eq!(post.many("comments").unwrap().len(), 2);
}

#[test]
fn test_replicate() {
    let db = setup_db();
    let post = Post::create(&db, attrs! { "title" => "Hello", "views" => 9 }).unwrap();
    let mut copy = post.replicate(&["views"]);

    assert!(!copy.exists());
    assert!(copy.key().is_null());
    assert!(!copy.has_attribute("views"));
    assert!(!copy.has_attribute("created_at"));
    assert_eq!(copy.get_raw("title"), Value::Text("Hello".into()));

    assert!(copy.save().unwrap());
    assert_ne!(copy.key(), post.key());
}

#[test]
fn test_associate_and_dissociate() {
    let db = setup_db();
    let user = User::create(&db, attrs! { "name" => "ada" }).unwrap();
    let mut post = Post::make(&db, attrs! { "title" => "Hello" }).unwrap();

    post.associate("user", &user).unwrap();
    assert_eq!(post.get_raw("user_id"), user.key());
    assert_eq!(post.one("user").unwrap().key(), user.key());
    post.save().unwrap();

    let stored = Post::with(&db, ["user"]).unwrap().first_or_fail().unwrap();
    assert_eq!(stored.one("user").unwrap().get_raw("name"), Value::Text("ada".into()));

    post.dissociate("user").unwrap();
    assert!(post.get_raw("user_id").is_null());
    assert!(post.one("user").is_none());

    let err = post.associate("comments", &user).unwrap_err();
    assert!(matches!(err, QuarryError::InvalidStatement(_)));
}

#[test]
fn test_attach_and_detach() {
    let db = setup_db();
    let mut post = seed_posts(&db, &["Hello"]).remove(0);
    let tags: Vec<Entity> = ["a", "b", "c"]
        .into_iter()
        .map(|name| Tag::create(&db, attrs! { "name" => name }).unwrap())
        .collect();

    assert_eq!(post.attach("tags", tags.iter().map(Entity::key)).unwrap(), 3);
    post.load(["tags"]).unwrap();
    assert_eq!(post.many("tags").unwrap().len(), 3);

    assert_eq!(post.detach("tags", [tags[0].key()]).unwrap(), 1);
    assert!(!post.relation_loaded("tags"));
    post.load(["tags"]).unwrap();
    assert_eq!(post.many("tags").unwrap().len(), 2);

    assert_eq!(post.detach_all("tags").unwrap(), 2);
    post.load(["tags"]).unwrap();
    assert!(post.many("tags").unwrap().is_empty());

    let err = post.attach("comments", [1]).unwrap_err();
    assert!(matches!(err, QuarryError::InvalidStatement(_)));
}

#[test]
fn test_touch_updates_timestamp() {
    let db = setup_db();
    let mut post = seed_posts(&db, &["Hello"]).remove(0);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    db.listen("Post", ModelEvent::Saved, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Propagation::Continue
    });

    assert!(post.touch().unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let mut tag = Tag::create(&db, attrs! { "name" => "rust" }).unwrap();
    assert!(!tag.touch().unwrap());
}
