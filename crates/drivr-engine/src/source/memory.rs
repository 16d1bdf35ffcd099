//! In-memory data source.
//!
//! Used by the local runner and by tests. Counts calls, and can inject latency
//! and failures to exercise the resilience and cache paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{DataSource, Mutation, Query, Row, SourceError, Table, WriteAck};

#[derive(Debug, Default)]
pub struct MemoryDataSource {
    tables: RwLock<HashMap<Table, Vec<Row>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    latency_ms: AtomicU64,
    failing_reads: AtomicUsize,
    failing_writes: AtomicUsize,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `table` with `rows` without counting a write.
    pub async fn seed(&self, table: Table, rows: impl IntoIterator<Item = Row>) {
        self.tables
            .write()
            .await
            .entry(table)
            .or_default()
            .extend(rows);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::Relaxed);
    }

    /// Make the next `n` reads fail with `Unavailable`.
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` writes fail with `Unavailable`.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Number of `read` calls received.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `write` calls received.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn row_identity(row: &Row) -> Option<&str> {
    row.get("identity").and_then(Value::as_str)
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn read(&self, query: &Query) -> Result<Vec<Row>, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if take_failure(&self.failing_reads) {
            return Err(SourceError::unavailable("injected read failure"));
        }

        let tables = self.tables.read().await;
        let rows = tables.get(&query.table).map(Vec::as_slice).unwrap_or_default();
        Ok(rows
            .iter()
            .filter(|row| match &query.identity {
                Some(identity) => row_identity(row) == Some(identity.as_str()),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn write(&self, mutation: &Mutation) -> Result<WriteAck, SourceError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if take_failure(&self.failing_writes) {
            return Err(SourceError::unavailable("injected write failure"));
        }

        self.tables
            .write()
            .await
            .entry(mutation.table)
            .or_default()
            .push(mutation.row.clone());
        Ok(WriteAck {
            table: mutation.table,
            rows_written: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    #[tokio::test]
    async fn test_read_filters_by_identity() {
        let source = MemoryDataSource::new();
        source
            .seed(
                Table::MileageLog,
                [
                    row(json!({"identity": "driver7", "distance_km": 1.0})),
                    row(json!({"identity": "driver8", "distance_km": 2.0})),
                ],
            )
            .await;

        let rows = source.read(&Query::events_for("driver7")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(source.read(&Query::roster()).await.unwrap().is_empty());
        assert_eq!(source.read_count(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let source = MemoryDataSource::new();
        source.fail_next_reads(1);
        assert!(source.read(&Query::roster()).await.is_err());
        assert!(source.read(&Query::roster()).await.is_ok());

        source.fail_next_writes(1);
        let mutation = Mutation::append(Table::Roster, row(json!({"identity": "driver9"})));
        assert!(source.write(&mutation).await.is_err());
        let ack = source.write(&mutation).await.unwrap();
        assert_eq!(ack.rows_written, 1);
        assert_eq!(source.read(&Query::roster()).await.unwrap().len(), 1);
    }
}
