//! Shared fixtures: model declarations and an in-memory SQLite schema.
#![allow(dead_code)]

use quarry::prelude::*;
use quarry::{Cast, ErrorBag};

/// 32 random bytes, base64 encoded.
pub const ENCRYPTION_KEY: &str = "base64:q83vEjRWeJCrze8SNFZ4kKvN7xI0VniQq83vEjRWeJA=";

const SCHEMA: &[&str] = &[
    "CREATE TABLE countries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL
    )",
    "CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT,
        password TEXT,
        secret TEXT,
        settings TEXT,
        is_admin INTEGER NOT NULL DEFAULT 0,
        country_id INTEGER,
        created_at TEXT,
        updated_at TEXT
    )",
    "CREATE TABLE accounts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER,
        balance INTEGER NOT NULL DEFAULT 0,
        version INTEGER,
        created_at TEXT,
        updated_at TEXT
    )",
    "CREATE TABLE posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER,
        title TEXT,
        status TEXT,
        views INTEGER NOT NULL DEFAULT 0,
        published INTEGER NOT NULL DEFAULT 0,
        deleted_at TEXT,
        created_at TEXT,
        updated_at TEXT
    )",
    "CREATE TABLE comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        post_id INTEGER,
        body TEXT,
        created_at TEXT,
        updated_at TEXT
    )",
    "CREATE TABLE tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE post_tag (
        post_id INTEGER NOT NULL,
        tag_id INTEGER NOT NULL,
        position INTEGER
    )",
    "CREATE TABLE images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT,
        imageable_type TEXT,
        imageable_id INTEGER,
        created_at TEXT,
        updated_at TEXT
    )",
    "CREATE TABLE videos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT
    )",
];

pub struct Country;
impl Model for Country {
    const NAME: &'static str = "Country";
    fn define(model: ModelBuilder) -> ModelBuilder {
        model
            .fillable(["name"])
            .without_timestamps()
            .has_many::<User>("users")
    }
}

pub struct User;
impl Model for User {
    const NAME: &'static str = "User";
    fn define(model: ModelBuilder) -> ModelBuilder {
        model
            .fillable(["name", "email", "password", "secret", "settings", "country_id"])
            .hidden(["password"])
            .cast("is_admin", Cast::Boolean)
            .cast("settings", Cast::Json)
            .cast("secret", Cast::Encrypted)
            .accessor("display_name", |user, _| {
                let name = user.get("name")?;
                Ok(Value::Text(format!("@{}", name.as_str().unwrap_or_default())))
            })
            .appends(["display_name"])
            .mutator("email", |value| {
                Ok(match value {
                    Value::Text(email) => Value::Text(email.to_lowercase()),
                    other => other,
                })
            })
            .has_one::<Account>("account")
            .has_many::<Post>("posts")
            .belongs_to::<Country>("country")
            .morph_many::<Image>("images", "imageable")
    }
}

pub struct Account;
impl Model for Account {
    const NAME: &'static str = "Account";
    fn define(model: ModelBuilder) -> ModelBuilder {
        model
            .fillable(["user_id", "balance"])
            .cast("balance", Cast::Integer)
            .versioned("version")
            .belongs_to::<User>("user")
    }
}

pub struct Post;
impl Model for Post {
    const NAME: &'static str = "Post";
    fn define(model: ModelBuilder) -> ModelBuilder {
        model
            .fillable(["user_id", "title", "status", "views", "published"])
            .cast("published", Cast::Boolean)
            .soft_deletes()
            .default_value("status", "draft")
            .transitions(
                "status",
                [
                    ("draft", vec!["review"]),
                    ("review", vec!["published", "draft"]),
                ],
            )
            .validate(|post, errors: &mut ErrorBag| {
                let title = post.get_raw("title");
                if title.as_str().is_none_or(|t| t.trim().is_empty()) {
                    errors.add("title", "The title field is required.");
                }
            })
            .belongs_to::<User>("user")
            .has_many::<Comment>("comments")
            .relation(RelationDef::belongs_to_many::<Tag>("tags").with_pivot(["position"]))
            .morph_many::<Image>("images", "imageable")
    }
}

pub struct Comment;
impl Model for Comment {
    const NAME: &'static str = "Comment";
    fn define(model: ModelBuilder) -> ModelBuilder {
        model.fillable(["post_id", "body"]).belongs_to::<Post>("post")
    }
}

pub struct Tag;
impl Model for Tag {
    const NAME: &'static str = "Tag";
    fn define(model: ModelBuilder) -> ModelBuilder {
        model
            .fillable(["name"])
            .without_timestamps()
            .relation(RelationDef::belongs_to_many::<Post>("posts").with_pivot(["position"]))
    }
}

pub struct Image;
impl Model for Image {
    const NAME: &'static str = "Image";
    fn define(model: ModelBuilder) -> ModelBuilder {
        model.unguarded().morph_to("imageable")
    }
}

pub struct Video;
impl Model for Video {
    const NAME: &'static str = "Video";
    fn define(model: ModelBuilder) -> ModelBuilder {
        model
            .fillable(["title"])
            .without_timestamps()
            .immutable()
            .morph_alias("video")
            .morph_many::<Image>("images", "imageable")
    }
}

/// In-memory database with the fixture schema and every model registered.
pub fn setup_db() -> Database {
    setup_with(DatabaseConfig::memory().with_encryption_key(ENCRYPTION_KEY))
}

pub fn setup_with(config: DatabaseConfig) -> Database {
    let db = Database::sqlite(config).expect("Failed to create database");
    for ddl in SCHEMA {
        db.execute_raw(ddl).expect("Failed to create table");
    }
    db.register::<Country>().expect("Failed to register Country");
    db.register::<User>().expect("Failed to register User");
    db.register::<Account>().expect("Failed to register Account");
    db.register::<Post>().expect("Failed to register Post");
    db.register::<Comment>().expect("Failed to register Comment");
    db.register::<Tag>().expect("Failed to register Tag");
    db.register::<Image>().expect("Failed to register Image");
    db.register::<Video>().expect("Failed to register Video");
    db
}

/// Inserts posts with the given titles for user 1.
pub fn seed_posts(db: &Database, titles: &[&str]) -> Vec<Entity> {
    titles
        .iter()
        .map(|title| {
            Post::create(db, attrs! { "user_id" => 1, "title" => *title }).expect("Failed to create post")
        })
        .collect()
}

/// Starts recording statements from an empty log.
pub fn start_log(db: &Database) {
    db.enable_query_log();
    db.flush_query_log();
}

/// Number of statements logged since the last flush.
pub fn statement_count(db: &Database) -> usize {
    db.query_log().len()
}
