// Background persistence queue.
//
// The broadcast path never awaits the durable store: records are handed
// to a bounded queue drained by a dedicated writer task. A full queue
// drops the job; an append failure is logged. Neither delays delivery.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::history::HistoryStore;
use crate::metrics;

const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct PersistJob {
    collection_path: String,
    record: Value,
}

#[derive(Debug, Clone)]
pub struct PersistQueue {
    sender: mpsc::Sender<PersistJob>,
}

impl PersistQueue {
    /// Spawn the writer task draining the queue into `store`.
    pub fn spawn(store: HistoryStore) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(drain(store, receiver));
        Self { sender }
    }

    /// Hand a record to the writer without blocking the caller.
    pub fn enqueue(&self, collection_path: &str, record: Value) {
        let job = PersistJob { collection_path: collection_path.to_owned(), record };
        match self.sender.try_send(job) {
            Ok(()) => {
                metrics::set_persist_queue_depth(
                    (QUEUE_CAPACITY - self.sender.capacity()) as i64,
                );
            }
            Err(rejected) => {
                let job = match rejected {
                    mpsc::error::TrySendError::Full(job) => job,
                    mpsc::error::TrySendError::Closed(job) => job,
                };
                warn!(
                    collection_path = %job.collection_path,
                    "persistence queue unavailable, dropping record"
                );
                metrics::increment_persist_jobs_dropped();
            }
        }
    }
}

async fn drain(store: HistoryStore, mut receiver: mpsc::Receiver<PersistJob>) {
    while let Some(job) = receiver.recv().await {
        if let Err(error) = store.append(&job.collection_path, &job.record).await {
            warn!(
                collection_path = %job.collection_path,
                error = ?error,
                "failed to append history record"
            );
        }
        metrics::set_persist_queue_depth(receiver.len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    async fn wait_for_records(
        store: &HistoryStore,
        collection_path: &str,
        expected: usize,
    ) -> Vec<Value> {
        timeout(Duration::from_secs(2), async {
            loop {
                let records = store.records_for_tests(collection_path).await;
                if records.len() >= expected {
                    return records;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("records should be drained into the store")
    }

    #[tokio::test]
    async fn enqueued_records_reach_the_store() {
        let store = HistoryStore::for_tests();
        let queue = PersistQueue::spawn(store.clone());

        queue.enqueue("chats/s1/messages", json!({"type": "chat", "text": "hi"}));

        let records = wait_for_records(&store, "chats/s1/messages", 1).await;
        assert_eq!(records[0]["text"], "hi");
    }

    #[tokio::test]
    async fn enqueue_never_blocks_and_preserves_order() {
        let store = HistoryStore::for_tests();
        let queue = PersistQueue::spawn(store.clone());

        for i in 0..20 {
            queue.enqueue("chats/s1/messages", json!({"seq": i}));
        }

        let records = wait_for_records(&store, "chats/s1/messages", 20).await;
        let sequence: Vec<i64> =
            records.iter().map(|record| record["seq"].as_i64().unwrap()).collect();
        assert_eq!(sequence, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn enqueue_after_worker_shutdown_drops_quietly() {
        let store = HistoryStore::for_tests();
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        drop(receiver);
        let queue = PersistQueue { sender };
        let _ = store;

        // Must not panic or block.
        queue.enqueue("chats/s1/messages", json!({"text": "lost"}));
    }
}
