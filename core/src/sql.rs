use compact_str::{CompactString, ToCompactString};
use quarry_types::Dialect;
use smallvec::{SmallVec, smallvec};

use crate::value::Value;

/// A SQL chunk represents a part of an SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlChunk {
    /// Literal SQL text, emitted verbatim
    Text(CompactString),
    /// An identifier quoted by the dialect at render time
    Ident(CompactString),
    /// A bound value rendered as a positional placeholder
    Param(Value),
    /// A nested fragment wrapped in parentheses
    Group(Box<Sql>),
}

/// A SQL statement or fragment with parameters.
///
/// Parameters live next to the placeholder that binds them, so the order of
/// [`Sql::build`]'s parameter list always matches placeholder emission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sql {
    /// The chunks that make up this SQL statement or fragment.
    pub chunks: SmallVec<[SqlChunk; 3]>,
}

impl Sql {
    /// Creates a new empty SQL fragment.
    pub const fn empty() -> Self {
        Sql {
            chunks: SmallVec::new_const(),
        }
    }

    /// Creates a new SQL fragment from a raw string.
    ///
    /// The string is treated as literal SQL text, not a parameter.
    pub fn raw(sql: impl AsRef<str>) -> Self {
        Self {
            chunks: smallvec![SqlChunk::Text(sql.as_ref().to_compact_string())],
        }
    }

    /// Creates a fragment holding one identifier.
    pub fn ident(name: impl AsRef<str>) -> Self {
        Self {
            chunks: smallvec![SqlChunk::Ident(name.as_ref().to_compact_string())],
        }
    }

    /// Creates a new SQL fragment representing a parameter.
    pub fn param(value: impl Into<Value>) -> Self {
        Self {
            chunks: smallvec![SqlChunk::Param(value.into())],
        }
    }

    /// Raw text with `?` placeholders bound, in order, to `bindings`.
    pub fn raw_with_bindings(sql: &str, bindings: &[Value]) -> Self {
        let mut out = Sql::empty();
        let mut bindings = bindings.iter();
        let mut rest = sql;
        while let Some(pos) = rest.find('?') {
            match bindings.next() {
                Some(value) => {
                    out.push_raw(&rest[..pos]);
                    out.push_param(value.clone());
                }
                None => {
                    out.push_raw(&rest[..=pos]);
                }
            }
            rest = &rest[pos + 1..];
        }
        out.push_raw(rest);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn push_raw(&mut self, sql: impl AsRef<str>) -> &mut Self {
        let sql = sql.as_ref();
        if !sql.is_empty() {
            self.chunks.push(SqlChunk::Text(sql.to_compact_string()));
        }
        self
    }

    pub fn push_ident(&mut self, name: impl AsRef<str>) -> &mut Self {
        self.chunks
            .push(SqlChunk::Ident(name.as_ref().to_compact_string()));
        self
    }

    pub fn push_param(&mut self, value: impl Into<Value>) -> &mut Self {
        self.chunks.push(SqlChunk::Param(value.into()));
        self
    }

    /// Pushes `(fragment)`.
    pub fn push_group(&mut self, fragment: Sql) -> &mut Self {
        self.chunks.push(SqlChunk::Group(Box::new(fragment)));
        self
    }

    pub fn push_sql(&mut self, other: Sql) -> &mut Self {
        self.chunks.extend(other.chunks);
        self
    }

    /// Appends a raw string to this SQL fragment.
    pub fn append_raw(mut self, sql: impl AsRef<str>) -> Self {
        self.push_raw(sql);
        self
    }

    /// Appends another SQL fragment to this one.
    ///
    /// Both the SQL text and parameters are merged.
    pub fn append(mut self, other: Sql) -> Self {
        self.chunks.extend(other.chunks);
        self
    }

    /// Joins multiple SQL fragments with a separator.
    ///
    /// The separator is inserted between each fragment, but not before the first or after the last.
    pub fn join<I>(fragments: I, separator: &str) -> Sql
    where
        I: IntoIterator<Item = Sql>,
    {
        let mut out = Sql::empty();
        for (i, fragment) in fragments.into_iter().enumerate() {
            if i > 0 {
                out.push_raw(separator);
            }
            out.chunks.extend(fragment.chunks);
        }
        out
    }

    /// Placeholder list `?, ?, ?` binding each value.
    pub fn params<I>(values: I) -> Sql
    where
        I: IntoIterator<Item = Value>,
    {
        Sql::join(values.into_iter().map(Sql::param), ", ")
    }

    /// Renders text and collects parameters for `dialect`.
    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut buf = CompactString::with_capacity(self.estimate_capacity());
        let mut params = Vec::new();
        self.write_to(dialect, &mut buf, &mut params);
        (buf.into(), params)
    }

    /// Renders text for `dialect`, dropping the parameters.
    pub fn sql(&self, dialect: Dialect) -> String {
        self.build(dialect).0
    }

    /// Collects parameter values in placeholder order.
    pub fn param_values(&self) -> Vec<&Value> {
        let mut out = Vec::new();
        for chunk in &self.chunks {
            match chunk {
                SqlChunk::Param(value) => out.push(value),
                SqlChunk::Group(inner) => out.extend(inner.param_values()),
                _ => {}
            }
        }
        out
    }

    fn write_to(&self, dialect: Dialect, buf: &mut CompactString, params: &mut Vec<Value>) {
        for chunk in &self.chunks {
            match chunk {
                SqlChunk::Text(text) => buf.push_str(text),
                SqlChunk::Ident(name) => buf.push_str(&dialect.quote_identifier(name)),
                SqlChunk::Param(value) => {
                    buf.push_str(dialect.placeholder());
                    params.push(value.clone());
                }
                SqlChunk::Group(inner) => {
                    buf.push('(');
                    inner.write_to(dialect, buf, params);
                    buf.push(')');
                }
            }
        }
    }

    fn estimate_capacity(&self) -> usize {
        self.chunks
            .iter()
            .map(|chunk| match chunk {
                SqlChunk::Text(text) => text.len(),
                SqlChunk::Ident(name) => name.len() + 2,
                SqlChunk::Param(_) => 1,
                SqlChunk::Group(inner) => inner.estimate_capacity() + 2,
            })
            .sum()
    }
}

impl From<&str> for Sql {
    fn from(value: &str) -> Self {
        Sql::raw(value)
    }
}
