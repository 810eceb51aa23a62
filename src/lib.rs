//! # Quarry
//!
//! An Active Record data-mapping engine: rows become [`Entity`] values that
//! know how to persist themselves, queries are immutable [`Query`]
//! descriptors, and declared relations are eager loaded in batches so a
//! result set of any size costs one extra query per relation.
//!
//! ## Quick Start
//!
//! ```rust
//! use quarry::prelude::*;
//!
//! struct Comment;
//! impl Model for Comment {
//!     const NAME: &'static str = "Comment";
//!     fn define(model: ModelBuilder) -> ModelBuilder {
//!         model.fillable(["post_id", "body"]).without_timestamps()
//!     }
//! }
//!
//! struct Post;
//! impl Model for Post {
//!     const NAME: &'static str = "Post";
//!     fn define(model: ModelBuilder) -> ModelBuilder {
//!         model
//!             .fillable(["title"])
//!             .without_timestamps()
//!             .has_many::<Comment>("comments")
//!     }
//! }
//!
//! # fn main() -> quarry::Result<()> {
//! let db = Database::in_memory()?;
//! db.execute_raw("CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT)")?;
//! db.execute_raw("CREATE TABLE comments (id INTEGER PRIMARY KEY, post_id INTEGER, body TEXT)")?;
//! db.register::<Post>()?;
//! db.register::<Comment>()?;
//!
//! let post = Post::create(&db, attrs! { "title" => "Hello" })?;
//! Comment::create(&db, attrs! { "post_id" => post.key(), "body" => "First!" })?;
//!
//! let posts = Post::with(&db, ["comments"])?.get()?;
//! assert_eq!(posts[0].many("comments").map(Collection::len), Some(1));
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Support
//!
//! | Database | Driver   | Feature Flag | Status |
//! |----------|----------|--------------|--------|
//! | SQLite   | rusqlite | `rusqlite`   | ✅     |
//! | MySQL    | bring your own [`Connection`] | - | SQL only |

mod attributes;
mod cast;
mod collection;
mod config;
mod connection;
mod database;
mod eager;
mod encryption;
mod entity;
mod events;
mod model;
mod model_query;
mod pagination;
mod persist;
mod registry;
mod relation;
mod serialize;
mod transaction;

pub mod naming;

// =============================================================================
// Root-level exports
// =============================================================================

pub use quarry_core::{
    Aggregate, Assignment, Dialect, Direction, DriverError, ErrorBag, Grammar, ModelKey, Operator,
    QuarryError, Query, Result, Row, Sql, Statement, StatementKind, Value, attrs,
};

pub use cast::Cast;
pub use collection::Collection;
pub use config::{CONFIG_FILE, DatabaseConfig};
pub use connection::{Connection, Record, StatementResult};
#[cfg(feature = "rusqlite")]
pub use connection::SqliteConnection;
pub use database::{Database, QueryLogEntry};
pub use eager::{Constraint, EagerLoad};
pub use encryption::Encrypter;
pub use entity::{Attributes, Entity, RelationValue};
pub use events::{Listener, ModelEvent, Propagation};
pub use model::{Accessor, Model, ModelBuilder, ModelMeta, Mutator, Timestamps, Transitions, Validator};
pub use model_query::{Cursor, ModelQuery, TrashedScope};
pub use pagination::{LengthAwarePaginator, Paginator};
pub use registry::MorphMap;
pub use relation::{Relation, RelationDef, RelationKind};

/// Lower-level query building blocks.
pub mod query {
    pub use quarry_core::query::{
        Boolean, Clause, Column, Join, JoinKind, Order, Predicate,
    };
}

/// Everything needed to declare models and run queries.
pub mod prelude {
    pub use crate::{
        Cast, Collection, Database, DatabaseConfig, Direction, Entity, Model, ModelBuilder,
        ModelEvent, ModelQuery, Operator, Propagation, QuarryError, RelationDef, Result, Value,
        attrs,
    };
}
