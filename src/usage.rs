//! Usage Recorder (§4.4). A bounded, drop-oldest ring buffer decouples
//! metering from the request hot path; a background task batches writes
//! into `usage_records`.
//!
//! Deliberately NOT the teacher's `mpsc`-based `RequestLogger`: `mpsc`
//! backpressures the producer once the channel is full, which is exactly
//! the opposite of the drop-oldest contract this spec requires. Grounded in
//! the teacher's batching/background-task shape (`observability::
//! request_logger`), with the queue itself hand-rolled.

use futures::FutureExt;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::domain::UsageRecord;

const BATCH_SIZE: usize = 64;
const BATCH_INTERVAL: Duration = Duration::from_millis(500);

struct Inner {
    queue: Mutex<VecDeque<UsageRecord>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

#[derive(Clone)]
pub struct UsageRecorder {
    inner: Arc<Inner>,
}

impl UsageRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                notify: Notify::new(),
                capacity,
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Wait-free from the caller's perspective: one mutex lock, an optional
    /// pop of the oldest record, and a push. Never blocks on I/O.
    pub fn enqueue(&self, record: UsageRecord) {
        let mut dropped = false;
        {
            let mut queue = self.inner.queue.lock().unwrap();
            if queue.len() >= self.inner.capacity {
                queue.pop_front();
                dropped = true;
            }
            queue.push_back(record);
        }
        if dropped {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.notify.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    pub(crate) fn drain_batch(&self) -> Vec<UsageRecord> {
        let mut queue = self.inner.queue.lock().unwrap();
        let n = queue.len().min(BATCH_SIZE);
        queue.drain(..n).collect()
    }

    /// Spawns the background batched writer. Panic-safe: an unexpected
    /// panic inside the loop is caught and logged rather than silently
    /// killing telemetry for the rest of the process's life, mirroring the
    /// teacher's background-task spawn idiom in `server.rs`.
    pub fn spawn_writer(self, pool: SqlitePool) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let fut = async move {
                loop {
                    tokio::select! {
                        _ = self.inner.notify.notified() => {}
                        _ = tokio::time::sleep(BATCH_INTERVAL) => {}
                    }

                    loop {
                        let batch = self.drain_batch();
                        if batch.is_empty() {
                            break;
                        }
                        if let Err(e) = write_batch(&pool, &batch).await {
                            tracing::error!(error = %e, "failed to persist usage batch");
                        }
                        if batch.len() < BATCH_SIZE {
                            break;
                        }
                    }
                }
            };

            match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                Ok(()) => {}
                Err(_) => tracing::error!("usage recorder writer task panicked and exited"),
            }
        })
    }
}

async fn write_batch(pool: &SqlitePool, batch: &[UsageRecord]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for record in batch {
        sqlx::query(
            "INSERT INTO usage_records \
             (id, timestamp, client_ip, public_name, config_id, input_tokens, output_tokens, \
              response_time_ms, status, error_message) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.timestamp.to_rfc3339())
        .bind(&record.client_ip)
        .bind(&record.public_name)
        .bind(record.config_id)
        .bind(record.input_tokens as i64)
        .bind(record.output_tokens as i64)
        .bind(record.response_time_ms as i64)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UsageStatus;
    use chrono::Utc;

    fn record(ip: &str) -> UsageRecord {
        UsageRecord {
            id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            client_ip: ip.to_string(),
            public_name: "gpt-4".to_string(),
            config_id: Some(1),
            input_tokens: 10,
            output_tokens: 20,
            response_time_ms: 5,
            status: UsageStatus::Success,
            error_message: None,
        }
    }

    #[test]
    fn enqueue_drops_oldest_when_full() {
        let recorder = UsageRecorder::new(2);
        recorder.enqueue(record("1.1.1.1"));
        recorder.enqueue(record("2.2.2.2"));
        recorder.enqueue(record("3.3.3.3"));
        assert_eq!(recorder.dropped_count(), 1);
        assert_eq!(recorder.queue_depth(), 2);
    }

    #[tokio::test]
    async fn writer_persists_batch() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();

        let recorder = UsageRecorder::new(100);
        recorder.enqueue(record("1.1.1.1"));
        recorder.enqueue(record("2.2.2.2"));

        let handle = recorder.clone().spawn_writer(pool.clone());
        tokio::time::sleep(Duration::from_millis(600)).await;
        handle.abort();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM usage_records")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 2);
    }
}
