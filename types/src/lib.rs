//! Shared type definitions for Quarry
//!
//! - [`Dialect`] - the SQL flavour the statement compiler targets
//! - [`UpsertStyle`] - how that dialect spells an upsert
//!
//! # Features
//!
//! - `serde` - Enable serde serialization/deserialization of [`Dialect`]

mod dialect;

pub use dialect::{Dialect, DialectParseError, UpsertStyle};

/// Prelude module for commonly used types
pub mod prelude {
    pub use crate::{Dialect, UpsertStyle};
}
