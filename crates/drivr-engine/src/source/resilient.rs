//! Timeout and single-retry wrapper around a data source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{DataSource, Mutation, Query, Row, SourceError, WriteAck};

/// Bounds every upstream call with a timeout and retries transient failures
/// once after a backoff.
///
/// Reads are retried on any failure. Writes are retried only when the source
/// reports `Unavailable`, which guarantees nothing was applied; a timed out
/// append is surfaced rather than risk a duplicate row.
pub struct ResilientSource {
    inner: Arc<dyn DataSource>,
    timeout: Duration,
    backoff: Duration,
}

impl ResilientSource {
    pub fn new(inner: Arc<dyn DataSource>, timeout: Duration, backoff: Duration) -> Self {
        Self {
            inner,
            timeout,
            backoff,
        }
    }

    async fn read_once(&self, query: &Query) -> Result<Vec<Row>, SourceError> {
        match tokio::time::timeout(self.timeout, self.inner.read(query)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(self.timeout)),
        }
    }

    async fn write_once(&self, mutation: &Mutation) -> Result<WriteAck, SourceError> {
        match tokio::time::timeout(self.timeout, self.inner.write(mutation)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl DataSource for ResilientSource {
    async fn read(&self, query: &Query) -> Result<Vec<Row>, SourceError> {
        match self.read_once(query).await {
            Ok(rows) => Ok(rows),
            Err(e) => {
                tracing::warn!(table = query.table.as_str(), error = %e, "Upstream read failed, retrying once");
                tokio::time::sleep(self.backoff).await;
                self.read_once(query).await
            }
        }
    }

    async fn write(&self, mutation: &Mutation) -> Result<WriteAck, SourceError> {
        match self.write_once(mutation).await {
            Err(e @ SourceError::Unavailable { .. }) => {
                tracing::warn!(table = mutation.table.as_str(), error = %e, "Upstream write failed, retrying once");
                tokio::time::sleep(self.backoff).await;
                self.write_once(mutation).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemoryDataSource, Table};

    fn wrap(inner: &Arc<MemoryDataSource>, timeout_ms: u64) -> ResilientSource {
        ResilientSource::new(
            inner.clone(),
            Duration::from_millis(timeout_ms),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn test_read_retries_once() {
        let inner = Arc::new(MemoryDataSource::new());
        let source = wrap(&inner, 1_000);

        inner.fail_next_reads(1);
        assert!(source.read(&Query::roster()).await.is_ok());
        assert_eq!(inner.read_count(), 2);

        inner.fail_next_reads(2);
        assert!(matches!(
            source.read(&Query::roster()).await,
            Err(SourceError::Unavailable { .. })
        ));
        assert_eq!(inner.read_count(), 4);
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let inner = Arc::new(MemoryDataSource::new());
        inner.set_latency(Duration::from_millis(200));
        let source = wrap(&inner, 20);

        let err = source.read(&Query::roster()).await.unwrap_err();
        assert!(matches!(err, SourceError::Timeout(_)));
        assert_eq!(inner.read_count(), 2);
    }

    #[tokio::test]
    async fn test_write_retries_only_when_unapplied() {
        let inner = Arc::new(MemoryDataSource::new());
        let source = wrap(&inner, 1_000);
        let mutation = Mutation::append(Table::Roster, Row::new());

        inner.fail_next_writes(1);
        source.write(&mutation).await.unwrap();
        assert_eq!(inner.write_count(), 2);

        inner.set_latency(Duration::from_millis(200));
        let slow = wrap(&inner, 20);
        let err = slow.write(&mutation).await.unwrap_err();
        assert!(matches!(err, SourceError::Timeout(_)));
        assert_eq!(inner.write_count(), 3);
    }
}
