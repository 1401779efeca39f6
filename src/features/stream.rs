//! Incremental GeoJSON FeatureCollection writer over a [`RowCursor`].
//!
//! Output is produced one chunk per poll: the collection prefix, then one
//! feature (with its leading separator) per row, then the suffix. A row is
//! only fetched when the consumer asks for the next chunk, so memory use is
//! bounded by the cursor's fetch batch rather than the result size.
//!
//! Once the prefix has been sent a failure can no longer change the response
//! status. Instead the stream emits [`TRUNCATION_SENTINEL`], leaves the
//! feature array unclosed and then yields an error so the transport aborts the
//! body rather than terminating it cleanly.

use bytes::Bytes;
use futures::Stream;
use tracing::{debug, error};

use super::RowCursor;
use crate::error::{Result, ServeError};

const COLLECTION_PREFIX: &str = r#"{"type":"FeatureCollection","features":["#;
const COLLECTION_SUFFIX: &str = "]}";
const SEPARATOR: &str = ",";

/// Appended to a body that failed mid-stream. The enclosing array is never
/// closed, so the document cannot parse as a complete FeatureCollection.
pub const TRUNCATION_SENTINEL: &str = "\n{\"error\":\"stream aborted\"}";

#[derive(Debug)]
enum StreamState {
    NotStarted,
    Prefix,
    FeatureLoop { is_first: bool },
    Suffix,
    Failed { pending: Option<ServeError> },
}

/// State machine turning cursor rows into FeatureCollection chunks.
pub struct FeatureStream {
    state: StreamState,
    cursor: Option<Box<dyn RowCursor>>,
    table: String,
    emitted: usize,
}

impl FeatureStream {
    /// `table` is used for logging only.
    #[must_use]
    pub fn new(cursor: Box<dyn RowCursor>, table: impl Into<String>) -> Self {
        Self {
            state: StreamState::NotStarted,
            cursor: Some(cursor),
            table: table.into(),
            emitted: 0,
        }
    }

    /// Number of features written so far.
    #[must_use]
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    async fn release_cursor(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            cursor.close().await;
        }
    }

    /// Produce the next chunk of output, or `None` once the stream has ended.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        loop {
            match &mut self.state {
                StreamState::NotStarted => {
                    self.state = StreamState::Prefix;
                    return Some(Ok(Bytes::from_static(COLLECTION_PREFIX.as_bytes())));
                }
                StreamState::Prefix => {
                    self.state = StreamState::FeatureLoop { is_first: true };
                }
                StreamState::FeatureLoop { is_first } => {
                    let is_first = *is_first;
                    let next = match self.cursor.as_mut() {
                        Some(cursor) => cursor.next_row().await,
                        None => Err(ServeError::Internal("cursor already released".into())),
                    };
                    match next {
                        Ok(Some(row)) => {
                            self.state = StreamState::FeatureLoop { is_first: false };
                            self.emitted += 1;
                            let chunk = if is_first {
                                row.0
                            } else {
                                let mut chunk = String::with_capacity(row.0.len() + 1);
                                chunk.push_str(SEPARATOR);
                                chunk.push_str(&row.0);
                                chunk
                            };
                            return Some(Ok(Bytes::from(chunk)));
                        }
                        Ok(None) => {
                            self.release_cursor().await;
                            self.state = StreamState::Suffix;
                            debug!(table = %self.table, features = self.emitted, "feature export complete");
                            return Some(Ok(Bytes::from_static(COLLECTION_SUFFIX.as_bytes())));
                        }
                        Err(e) => {
                            self.release_cursor().await;
                            error!(
                                table = %self.table,
                                features = self.emitted,
                                error = %e,
                                "feature export aborted mid-stream"
                            );
                            self.state = StreamState::Failed { pending: Some(e) };
                            return Some(Ok(Bytes::from_static(TRUNCATION_SENTINEL.as_bytes())));
                        }
                    }
                }
                StreamState::Suffix => return None,
                StreamState::Failed { pending } => {
                    return pending
                        .take()
                        .map(|e| Err(ServeError::MidStreamFailure(e.to_string())));
                }
            }
        }
    }

    /// Adapt into a pull-based [`Stream`] suitable for a chunked response body.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        futures::stream::unfold(self, |mut stream| async move {
            let item = stream.next_chunk().await?;
            Some((item, stream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureRow;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        fetched: AtomicUsize,
        closed: AtomicUsize,
        dropped: AtomicUsize,
    }

    struct MockCursor {
        rows: VecDeque<Result<Option<FeatureRow>>>,
        counters: Arc<Counters>,
    }

    impl MockCursor {
        fn boxed(rows: Vec<Result<Option<FeatureRow>>>, counters: &Arc<Counters>) -> Box<dyn RowCursor> {
            Box::new(Self {
                rows: rows.into(),
                counters: Arc::clone(counters),
            })
        }
    }

    impl Drop for MockCursor {
        fn drop(&mut self) {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RowCursor for MockCursor {
        async fn next_row(&mut self) -> Result<Option<FeatureRow>> {
            self.counters.fetched.fetch_add(1, Ordering::SeqCst);
            self.rows.pop_front().unwrap_or(Ok(None))
        }

        async fn close(self: Box<Self>) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn feature(id: u32) -> Result<Option<FeatureRow>> {
        Ok(Some(FeatureRow(format!(
            r#"{{"type":"Feature","geometry":{{"type":"Point","coordinates":[{id},0]}},"properties":{{"id":{id}}}}}"#
        ))))
    }

    async fn collect(stream: FeatureStream) -> (String, Option<ServeError>) {
        let mut body = Vec::new();
        let mut failure = None;
        let mut chunks = Box::pin(stream.into_stream());
        while let Some(item) = chunks.next().await {
            match item {
                Ok(bytes) => body.extend_from_slice(&bytes),
                Err(e) => failure = Some(e),
            }
        }
        (String::from_utf8(body).unwrap(), failure)
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let counters = Arc::new(Counters::default());
        let stream = FeatureStream::new(MockCursor::boxed(vec![], &counters), "empty");
        let (body, failure) = collect(stream).await;

        assert_eq!(body, r#"{"type":"FeatureCollection","features":[]}"#);
        assert!(failure.is_none());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_features_in_cursor_order() {
        let counters = Arc::new(Counters::default());
        let rows = vec![feature(1), feature(2), feature(3)];
        let stream = FeatureStream::new(MockCursor::boxed(rows, &counters), "points");
        let (body, failure) = collect(stream).await;
        assert!(failure.is_none());

        let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(doc["type"], "FeatureCollection");
        let ids: Vec<i64> = doc["features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["properties"]["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_one_chunk_per_poll() {
        let counters = Arc::new(Counters::default());
        let rows = vec![feature(1), feature(2)];
        let mut stream = FeatureStream::new(MockCursor::boxed(rows, &counters), "points");

        let prefix = stream.next_chunk().await.unwrap().unwrap();
        assert_eq!(&prefix[..], COLLECTION_PREFIX.as_bytes());
        assert_eq!(counters.fetched.load(Ordering::SeqCst), 0);

        let first = stream.next_chunk().await.unwrap().unwrap();
        assert!(first.starts_with(b"{"));
        assert_eq!(counters.fetched.load(Ordering::SeqCst), 1);

        let second = stream.next_chunk().await.unwrap().unwrap();
        assert!(second.starts_with(b",{"));
        assert_eq!(stream.emitted(), 2);

        let suffix = stream.next_chunk().await.unwrap().unwrap();
        assert_eq!(&suffix[..], b"]}");
        assert!(stream.next_chunk().await.is_none());
        assert!(stream.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_is_truncated() {
        let counters = Arc::new(Counters::default());
        let rows = vec![
            feature(1),
            feature(2),
            Err(ServeError::DatabaseUnavailable("connection reset".into())),
            feature(3),
        ];
        let stream = FeatureStream::new(MockCursor::boxed(rows, &counters), "points");
        let (body, failure) = collect(stream).await;

        assert!(body.ends_with(TRUNCATION_SENTINEL));
        assert!(!body.ends_with("]}"));
        assert!(serde_json::from_str::<serde_json::Value>(&body).is_err());
        assert!(matches!(failure, Some(ServeError::MidStreamFailure(msg)) if msg.contains("connection reset")));
        assert_eq!(counters.fetched.load(Ordering::SeqCst), 3);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_on_first_row() {
        let counters = Arc::new(Counters::default());
        let rows = vec![Err(ServeError::DatabaseUnavailable("timeout".into()))];
        let stream = FeatureStream::new(MockCursor::boxed(rows, &counters), "points");
        let (body, failure) = collect(stream).await;

        assert_eq!(body, format!("{COLLECTION_PREFIX}{TRUNCATION_SENTINEL}"));
        assert!(failure.is_some());
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_cursor_once() {
        let counters = Arc::new(Counters::default());
        let rows = vec![feature(1), feature(2), feature(3)];
        let mut stream = FeatureStream::new(MockCursor::boxed(rows, &counters), "points");

        stream.next_chunk().await.unwrap().unwrap();
        stream.next_chunk().await.unwrap().unwrap();
        drop(stream);

        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);
        assert_eq!(counters.dropped.load(Ordering::SeqCst), 1);
    }
}
