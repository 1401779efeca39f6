//! Feature export: a catalog of exportable tables, a row cursor over one of
//! them, and the stream that wraps cursor rows into a GeoJSON
//! FeatureCollection.

pub mod postgis;
pub mod stream;

use async_trait::async_trait;

use crate::error::Result;

pub use stream::{FeatureStream, TRUNCATION_SENTINEL};

/// One serialized GeoJSON Feature object, emitted verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRow(pub String);

/// A forward-only source of feature rows.
#[async_trait]
pub trait RowCursor: Send {
    /// Next row, or `None` once the cursor is exhausted.
    async fn next_row(&mut self) -> Result<Option<FeatureRow>>;

    /// Release the underlying resources. Called at most once, after which
    /// the cursor is dropped.
    async fn close(self: Box<Self>);
}

/// Resolves request names to tables and opens cursors over them.
#[async_trait]
pub trait FeatureCatalog: Send + Sync {
    /// Look up an exportable table; `Ok(None)` when it does not exist or is
    /// not exposed.
    async fn resolve(&self, name: &str) -> Result<Option<TableRef>>;

    async fn open_cursor(&self, table: &TableRef) -> Result<Box<dyn RowCursor>>;
}

/// A table confirmed to exist by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
    pub geometry_column: String,
}

impl TableRef {
    /// `"schema"."table"`, safe to interpolate into SQL.
    #[must_use]
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_identifier(&self.schema), quote_identifier(&self.table))
    }
}

/// Quote an SQL identifier, doubling embedded double quotes.
#[must_use]
pub fn quote_identifier(ident: &str) -> String {
    let mut quoted = String::with_capacity(ident.len() + 2);
    quoted.push('"');
    for c in ident.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Quote an SQL string literal, doubling embedded single quotes.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
