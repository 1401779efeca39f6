//! PostGIS-backed feature catalog.
//!
//! Tables are looked up in `geometry_columns` with bound parameters; only a
//! table confirmed there is ever interpolated into SQL, and then only through
//! [`quote_identifier`](super::quote_identifier). Rows are read through a
//! server-side cursor inside a read-only transaction, one batch at a time.
//! The geometry column resolved from the catalog is passed to
//! `ST_AsGeoJSON` explicitly, as a quoted literal.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use tracing::{debug, info, warn};

use super::{FeatureCatalog, FeatureRow, RowCursor, TableRef, quote_literal};
use crate::error::Result;

/// PostgreSQL's identifier length limit (NAMEDATALEN - 1).
const MAX_IDENTIFIER_LEN: usize = 63;

const CURSOR_NAME: &str = "geoserve_export";

pub const DEFAULT_BATCH_SIZE: u32 = 64;

const RESOLVE_SQL: &str = "\
SELECT f_table_schema::text, f_table_name::text, f_geometry_column::text \
FROM geometry_columns \
WHERE f_table_schema::text = ANY($1) AND f_table_name::text = $2 \
ORDER BY array_position($1, f_table_schema::text), f_geometry_column \
LIMIT 1";

/// Split a request name into an optional schema and a table name.
///
/// Returns `None` for names that can never match an exposed table: empty
/// parts, NUL bytes, identifiers over the length limit, or a schema outside
/// `allowed`.
fn parse_table_name<'a>(name: &'a str, allowed: &[String]) -> Option<(Option<&'a str>, &'a str)> {
    let valid = |ident: &str| !ident.is_empty() && ident.len() <= MAX_IDENTIFIER_LEN && !ident.contains('\0');

    match name.split_once('.') {
        Some((schema, table)) => {
            (valid(schema) && valid(table) && allowed.iter().any(|s| s == schema)).then_some((Some(schema), table))
        }
        None => valid(name).then_some((None, name)),
    }
}

fn declare_sql(table: &TableRef) -> String {
    format!(
        "DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR SELECT ST_AsGeoJSON(t.*, {})::text FROM {} AS t",
        quote_literal(&table.geometry_column),
        table.qualified()
    )
}

fn fetch_sql(batch_size: u32) -> String {
    format!("FETCH FORWARD {} FROM {CURSOR_NAME}", batch_size.max(1))
}

/// Feature catalog over a PostGIS database.
#[derive(Debug, Clone)]
pub struct PgFeatureCatalog {
    pool: PgPool,
    schemas: Vec<String>,
    batch_size: u32,
    statement_timeout: Option<Duration>,
}

impl PgFeatureCatalog {
    /// Expose the spatial tables of `schemas`; the first schema wins when an
    /// unqualified name exists in several.
    #[must_use]
    pub fn new(pool: PgPool, schemas: Vec<String>) -> Self {
        Self {
            pool,
            schemas,
            batch_size: DEFAULT_BATCH_SIZE,
            statement_timeout: None,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }
}

#[async_trait]
impl FeatureCatalog for PgFeatureCatalog {
    async fn resolve(&self, name: &str) -> Result<Option<TableRef>> {
        let Some((schema, table)) = parse_table_name(name, &self.schemas) else {
            debug!(table = name, "rejected table name");
            return Ok(None);
        };
        let schemas = match schema {
            Some(schema) => vec![schema.to_string()],
            None => self.schemas.clone(),
        };

        let row: Option<(String, String, String)> = sqlx::query_as(RESOLVE_SQL)
            .bind(schemas)
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(schema, table, geometry_column)| TableRef {
            schema,
            table,
            geometry_column,
        }))
    }

    async fn open_cursor(&self, table: &TableRef) -> Result<Box<dyn RowCursor>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
        if let Some(timeout) = self.statement_timeout {
            let sql = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        sqlx::query(&declare_sql(table)).execute(&mut *tx).await?;

        info!(
            schema = %table.schema,
            table = %table.table,
            batch_size = self.batch_size,
            "opened feature cursor"
        );
        Ok(Box::new(PgCursor::new(tx, self.batch_size)))
    }
}

/// Rows fetched from the cursor but not yet handed out.
#[derive(Debug)]
struct RowBuffer {
    rows: VecDeque<FeatureRow>,
    batch_size: usize,
    exhausted: bool,
}

impl RowBuffer {
    fn new(batch_size: usize) -> Self {
        Self {
            rows: VecDeque::with_capacity(batch_size),
            batch_size,
            exhausted: false,
        }
    }

    fn needs_fetch(&self) -> bool {
        self.rows.is_empty() && !self.exhausted
    }

    /// A batch shorter than requested is the last one. NULL rows are skipped.
    fn push_batch(&mut self, batch: Vec<Option<String>>) {
        if batch.len() < self.batch_size {
            self.exhausted = true;
        }
        self.rows.extend(batch.into_iter().flatten().map(FeatureRow));
    }

    fn finish(&mut self) {
        self.exhausted = true;
    }

    fn pop(&mut self) -> Option<FeatureRow> {
        self.rows.pop_front()
    }
}

/// The transaction a cursor reads from.
#[async_trait]
trait CursorTransaction: Send + 'static {
    async fn fetch(&mut self, sql: &str) -> Result<Vec<Option<String>>>;

    async fn rollback(self) -> Result<()>;
}

#[async_trait]
impl CursorTransaction for Transaction<'static, Postgres> {
    async fn fetch(&mut self, sql: &str) -> Result<Vec<Option<String>>> {
        Ok(sqlx::query_scalar(sql).fetch_all(&mut **self).await?)
    }

    async fn rollback(self) -> Result<()> {
        Ok(Transaction::rollback(self).await?)
    }
}

/// Server-side cursor inside a read-only transaction.
///
/// Dropping the cursor drops the transaction, which sqlx rolls back when the
/// connection returns to the pool.
struct PgCursor<T: CursorTransaction = Transaction<'static, Postgres>> {
    tx: Option<T>,
    buffer: RowBuffer,
    fetch_sql: String,
}

impl<T: CursorTransaction> PgCursor<T> {
    fn new(tx: T, batch_size: u32) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            tx: Some(tx),
            buffer: RowBuffer::new(batch_size as usize),
            fetch_sql: fetch_sql(batch_size),
        }
    }

    async fn fill(&mut self) -> Result<()> {
        let Some(tx) = self.tx.as_mut() else {
            self.buffer.finish();
            return Ok(());
        };
        let batch = tx.fetch(&self.fetch_sql).await?;
        self.buffer.push_batch(batch);
        Ok(())
    }
}

#[async_trait]
impl<T: CursorTransaction> RowCursor for PgCursor<T> {
    async fn next_row(&mut self) -> Result<Option<FeatureRow>> {
        while self.buffer.needs_fetch() {
            self.fill().await?;
        }
        Ok(self.buffer.pop())
    }

    async fn close(self: Box<Self>) {
        let mut cursor = self;
        if let Some(tx) = cursor.tx.take()
            && let Err(e) = tx.rollback().await
        {
            warn!(error = %e, "failed to close feature cursor");
        }
    }
}

impl<T: CursorTransaction> Drop for PgCursor<T> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            debug!("feature cursor dropped before completion, rolling back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServeError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn allowed() -> Vec<String> {
        vec!["public".to_string(), "gis".to_string()]
    }

    #[test]
    fn test_parse_table_name() {
        assert_eq!(parse_table_name("roads", &allowed()), Some((None, "roads")));
        assert_eq!(parse_table_name("gis.roads", &allowed()), Some((Some("gis"), "roads")));
        assert_eq!(parse_table_name("private.roads", &allowed()), None);
        assert_eq!(parse_table_name("gis.", &allowed()), None);
        assert_eq!(parse_table_name("", &allowed()), None);
        assert_eq!(parse_table_name("ro\0ads", &allowed()), None);
        assert_eq!(parse_table_name(&"x".repeat(64), &allowed()), None);
        assert_eq!(parse_table_name(&"x".repeat(63), &allowed()), Some((None, "x".repeat(63).as_str())));
    }

    #[test]
    fn test_cursor_sql_quotes_identifiers() {
        let table = TableRef {
            schema: "public".into(),
            table: "odd\"name".into(),
            geometry_column: "geom".into(),
        };
        assert_eq!(
            declare_sql(&table),
            "DECLARE geoserve_export NO SCROLL CURSOR FOR SELECT ST_AsGeoJSON(t.*, 'geom')::text FROM \"public\".\"odd\"\"name\" AS t"
        );

        let table = TableRef {
            geometry_column: "the_geom's".into(),
            ..table
        };
        assert!(declare_sql(&table).contains("ST_AsGeoJSON(t.*, 'the_geom''s')::text"));
        assert_eq!(fetch_sql(0), "FETCH FORWARD 1 FROM geoserve_export");
        assert_eq!(fetch_sql(500), "FETCH FORWARD 500 FROM geoserve_export");
    }

    /// Serves scripted batches and counts what the cursor asks of it.
    struct ScriptedTransaction {
        batches: VecDeque<Result<Vec<Option<String>>>>,
        fetches: Arc<AtomicUsize>,
        rollbacks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CursorTransaction for ScriptedTransaction {
        async fn fetch(&mut self, sql: &str) -> Result<Vec<Option<String>>> {
            assert_eq!(sql, "FETCH FORWARD 2 FROM geoserve_export");
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.batches.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn rollback(self) -> Result<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    type Counters = (Arc<AtomicUsize>, Arc<AtomicUsize>);

    fn scripted(batches: Vec<Result<Vec<Option<String>>>>) -> (PgCursor<ScriptedTransaction>, Counters) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let tx = ScriptedTransaction {
            batches: batches.into(),
            fetches: Arc::clone(&fetches),
            rollbacks: Arc::clone(&rollbacks),
        };
        (PgCursor::new(tx, 2), (fetches, rollbacks))
    }

    fn row(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    async fn drain(cursor: &mut PgCursor<ScriptedTransaction>) -> Vec<String> {
        let mut rows = Vec::new();
        while let Some(FeatureRow(r)) = cursor.next_row().await.unwrap() {
            rows.push(r);
        }
        rows
    }

    #[test]
    fn test_row_buffer_short_batch_ends_cursor() {
        let mut buffer = RowBuffer::new(3);
        assert!(buffer.needs_fetch());

        buffer.push_batch(vec![row("a"), None, row("b")]);
        assert!(!buffer.needs_fetch());
        assert_eq!(buffer.pop(), Some(FeatureRow("a".into())));
        assert_eq!(buffer.pop(), Some(FeatureRow("b".into())));
        assert!(buffer.needs_fetch());

        buffer.push_batch(vec![row("c")]);
        assert_eq!(buffer.pop(), Some(FeatureRow("c".into())));
        assert_eq!(buffer.pop(), None);
        assert!(!buffer.needs_fetch());
    }

    #[tokio::test]
    async fn test_cursor_reads_batches_until_short_one() {
        let (mut cursor, (fetches, _)) = scripted(vec![
            Ok(vec![row("F1"), row("F2")]),
            Ok(vec![row("F3"), row("F4")]),
            Ok(vec![row("F5")]),
        ]);
        assert_eq!(drain(&mut cursor).await, ["F1", "F2", "F3", "F4", "F5"]);
        assert_eq!(fetches.load(Ordering::SeqCst), 3);

        assert!(cursor.next_row().await.unwrap().is_none());
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cursor_exact_multiple_needs_empty_fetch() {
        let (mut cursor, (fetches, _)) = scripted(vec![Ok(vec![row("F1"), row("F2")]), Ok(Vec::new())]);
        assert_eq!(drain(&mut cursor).await, ["F1", "F2"]);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cursor_skips_null_rows() {
        let (mut cursor, (fetches, _)) = scripted(vec![
            Ok(vec![None, None]),
            Ok(vec![row("F1"), None]),
            Ok(vec![None]),
        ]);
        assert_eq!(drain(&mut cursor).await, ["F1"]);
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cursor_fetch_error_propagates() {
        let (mut cursor, _) = scripted(vec![
            Ok(vec![row("F1"), row("F2")]),
            Err(ServeError::DatabaseUnavailable("connection lost".into())),
        ]);
        assert_eq!(cursor.next_row().await.unwrap(), Some(FeatureRow("F1".into())));
        assert_eq!(cursor.next_row().await.unwrap(), Some(FeatureRow("F2".into())));
        assert!(matches!(cursor.next_row().await, Err(ServeError::DatabaseUnavailable(_))));
    }

    #[tokio::test]
    async fn test_close_rolls_back_once() {
        let (mut cursor, (_, rollbacks)) = scripted(vec![Ok(vec![row("F1")])]);
        assert_eq!(drain(&mut cursor).await, ["F1"]);
        assert_eq!(rollbacks.load(Ordering::SeqCst), 0);

        Box::new(cursor).close().await;
        assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_without_transaction_is_noop() {
        let (mut cursor, (fetches, rollbacks)) = scripted(vec![Ok(vec![row("F1")])]);
        drop(cursor.tx.take());
        assert!(cursor.next_row().await.unwrap().is_none());
        assert_eq!(fetches.load(Ordering::SeqCst), 0);

        Box::new(cursor).close().await;
        assert_eq!(rollbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropped_cursor_does_not_roll_back_explicitly() {
        let (cursor, (fetches, rollbacks)) = scripted(vec![Ok(vec![row("F1"), row("F2")])]);
        drop(cursor);
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
        assert_eq!(rollbacks.load(Ordering::SeqCst), 0);
    }
}
