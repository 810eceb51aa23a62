//! Database dialect enum
//!
//! A single source of truth for the SQL flavour the compiler emits. MySQL is the
//! reference dialect; SQLite is supported for embedded use and differs only in the
//! upsert clause.

use std::borrow::Cow;

/// SQL dialect for database-specific rendering
///
/// # Examples
///
/// ```
/// use quarry_types::Dialect;
///
/// let dialect = Dialect::MySQL;
/// assert_eq!(dialect.quote_identifier("posts.id"), "`posts`.`id`");
/// assert_eq!(dialect.placeholder(), "?");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Dialect {
    /// MySQL - backtick identifiers, `?` placeholders, `ON DUPLICATE KEY UPDATE`
    #[default]
    MySQL,

    /// SQLite - accepts the same identifier quoting, upserts with `ON CONFLICT`
    ///
    /// Compatible with: rusqlite
    SQLite,
}

/// How an upsert resolves a unique-key collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStyle {
    /// `ON DUPLICATE KEY UPDATE col = VALUES(col)`
    OnDuplicateKey,
    /// `ON CONFLICT (keys) DO UPDATE SET col = excluded.col`
    OnConflict,
}

impl Dialect {
    /// Parse a dialect from a string (case-insensitive)
    ///
    /// ```
    /// use quarry_types::Dialect;
    ///
    /// assert_eq!(Dialect::parse("mysql"), Some(Dialect::MySQL));
    /// assert_eq!(Dialect::parse("mariadb"), Some(Dialect::MySQL));
    /// assert_eq!(Dialect::parse("sqlite"), Some(Dialect::SQLite));
    /// assert_eq!(Dialect::parse("unknown"), None);
    /// ```
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("mysql") || s.eq_ignore_ascii_case("mariadb") {
            Some(Dialect::MySQL)
        } else if s.eq_ignore_ascii_case("sqlite") || s.eq_ignore_ascii_case("sqlite3") {
            Some(Dialect::SQLite)
        } else {
            None
        }
    }

    /// Positional placeholder. Both dialects use `?`.
    #[inline]
    #[must_use]
    pub const fn placeholder(&self) -> &'static str {
        "?"
    }

    #[inline]
    #[must_use]
    pub const fn quote_char(&self) -> char {
        '`'
    }

    #[must_use]
    pub const fn upsert_style(&self) -> UpsertStyle {
        match self {
            Dialect::MySQL => UpsertStyle::OnDuplicateKey,
            Dialect::SQLite => UpsertStyle::OnConflict,
        }
    }

    /// Quotes an identifier, splitting on `.` so `table.column` becomes
    /// `` `table`.`column` ``. A trailing `*` segment and an `x as y` alias are
    /// handled the way a select list expects.
    ///
    /// ```
    /// use quarry_types::Dialect;
    ///
    /// assert_eq!(Dialect::MySQL.quote_identifier("*"), "*");
    /// assert_eq!(Dialect::MySQL.quote_identifier("tags.*"), "`tags`.*");
    /// assert_eq!(
    ///     Dialect::MySQL.quote_identifier("post_tag.post_id as pivot_post_id"),
    ///     "`post_tag`.`post_id` AS `pivot_post_id`"
    /// );
    /// ```
    #[must_use]
    pub fn quote_identifier(&self, ident: &str) -> String {
        if let Some((column, alias)) = split_alias(ident) {
            return format!(
                "{} AS {}",
                self.quote_identifier(column),
                self.quote_segment(alias)
            );
        }
        ident
            .split('.')
            .map(|segment| self.quote_segment(segment))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn quote_segment<'a>(&self, segment: &'a str) -> Cow<'a, str> {
        if segment == "*" {
            return Cow::Borrowed(segment);
        }
        let q = self.quote_char();
        let escaped = segment.replace(q, &format!("{q}{q}"));
        Cow::Owned(format!("{q}{escaped}{q}"))
    }

    /// `LIMIT` value meaning "no limit", needed when only an offset is set.
    #[must_use]
    pub const fn unbounded_limit(&self) -> &'static str {
        match self {
            Dialect::MySQL => "18446744073709551615",
            Dialect::SQLite => "-1",
        }
    }

    /// Insert tail used when a row has no explicit columns.
    #[must_use]
    pub const fn empty_insert_values(&self) -> &'static str {
        match self {
            Dialect::MySQL => "() VALUES ()",
            Dialect::SQLite => "DEFAULT VALUES",
        }
    }

    #[must_use]
    pub fn savepoint(&self, name: &str) -> String {
        format!("SAVEPOINT {name}")
    }

    #[must_use]
    pub fn release_savepoint(&self, name: &str) -> String {
        format!("RELEASE SAVEPOINT {name}")
    }

    #[must_use]
    pub fn rollback_to_savepoint(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {name}")
    }

    /// Get the dialect name as a lowercase string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Dialect::MySQL => "mysql",
            Dialect::SQLite => "sqlite",
        }
    }
}

fn split_alias(ident: &str) -> Option<(&str, &str)> {
    let lower = ident.to_ascii_lowercase();
    let pos = lower.find(" as ")?;
    Some((ident[..pos].trim(), ident[pos + 4..].trim()))
}

impl core::fmt::Display for Dialect {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Dialect {
    type Err = DialectParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dialect::parse(s).ok_or(DialectParseError)
    }
}

/// Error returned when parsing an unknown dialect string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectParseError;

impl core::fmt::Display for DialectParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("unknown dialect")
    }
}

impl std::error::Error for DialectParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_parse() {
        assert_eq!(Dialect::parse("MySQL"), Some(Dialect::MySQL));
        assert_eq!(Dialect::parse("SQLite"), Some(Dialect::SQLite));
        assert_eq!(Dialect::parse("postgres"), None);
        assert_eq!(Dialect::parse(""), None);
        assert_eq!("sqlite".parse::<Dialect>(), Ok(Dialect::SQLite));
    }

    #[test]
    fn test_quote_identifier() {
        let d = Dialect::MySQL;
        assert_eq!(d.quote_identifier("posts"), "`posts`");
        assert_eq!(d.quote_identifier("posts.title"), "`posts`.`title`");
        assert_eq!(d.quote_identifier("weird`name"), "`weird``name`");
        assert_eq!(d.quote_identifier("count AS total"), "`count` AS `total`");
    }

    #[test]
    fn test_upsert_style() {
        assert_eq!(Dialect::MySQL.upsert_style(), UpsertStyle::OnDuplicateKey);
        assert_eq!(Dialect::SQLite.upsert_style(), UpsertStyle::OnConflict);
    }

    #[test]
    fn test_dialect_display() {
        assert_eq!(format!("{}", Dialect::SQLite), "sqlite");
        assert_eq!(format!("{}", Dialect::MySQL), "mysql");
    }
}
