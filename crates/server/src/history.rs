// Durable message history. An external append-only store from the
// core's perspective: records are handed over and never read back.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::debug;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Collection path holding a session's chat and file-share records.
pub fn chat_collection_path(session_id: &str) -> String {
    format!("chats/{session_id}/messages")
}

#[derive(Debug, Clone)]
pub enum HistoryStore {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<HashMap<String, Vec<Value>>>>),
    /// No durable backend configured; appends are dropped with a log line.
    Disabled,
    /// Every append fails; lets tests exercise append-failure handling.
    #[cfg(test)]
    FailingForTests,
}

impl HistoryStore {
    /// Connect to the configured PostgreSQL backend, verify it answers,
    /// and ensure the history schema exists.
    ///
    /// The connection string must carry `sslmode=require` or stricter.
    /// Pool sizing comes from `DRAWBRIDGE_DB_MAX_CONNECTIONS` and
    /// `DRAWBRIDGE_DB_ACQUIRE_TIMEOUT_SECS`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = database_url
            .parse::<PgConnectOptions>()
            .context("invalid history database url")?;
        require_tls(&options)?;

        let pool = PgPoolOptions::new()
            .max_connections(env_parse("DRAWBRIDGE_DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS))
            .acquire_timeout(Duration::from_secs(env_parse(
                "DRAWBRIDGE_DB_ACQUIRE_TIMEOUT_SECS",
                DEFAULT_ACQUIRE_TIMEOUT_SECS,
            )))
            .connect_with(options)
            .await
            .context("failed to connect to history database")?;

        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .context("history database health check failed")?;
        ensure_schema(&pool).await?;

        Ok(Self::Postgres(pool))
    }

    /// Append one record to a collection. Callers treat this as
    /// fire-and-forget; failures are logged by the persistence worker.
    pub async fn append(&self, collection_path: &str, record: &Value) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO history_records (collection_path, record) VALUES ($1, $2)",
                )
                .bind(collection_path)
                .bind(record)
                .execute(pool)
                .await
                .with_context(|| format!("failed to append record to {collection_path}"))?;
                Ok(())
            }
            Self::Memory(store) => {
                store.write().await.entry(collection_path.to_owned()).or_default().push(
                    record.clone(),
                );
                Ok(())
            }
            Self::Disabled => {
                debug!(%collection_path, "history store disabled, skipping append");
                Ok(())
            }
            #[cfg(test)]
            Self::FailingForTests => bail!("history store rejected the append"),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    #[cfg(test)]
    pub(crate) async fn records_for_tests(&self, collection_path: &str) -> Vec<Value> {
        match self {
            Self::Memory(store) => {
                store.read().await.get(collection_path).cloned().unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }
}

// Chat history can leave the host; a plaintext database link is a
// misconfiguration, not a degraded mode.
fn require_tls(options: &PgConnectOptions) -> Result<()> {
    match options.get_ssl_mode() {
        PgSslMode::Require | PgSslMode::VerifyCa | PgSslMode::VerifyFull => Ok(()),
        mode => bail!(
            "history database connection must use TLS, got sslmode={mode:?}; \
             set sslmode=require or stricter"
        ),
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|value| value.parse().ok()).unwrap_or(default)
}

async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS history_records (
            id BIGSERIAL PRIMARY KEY,
            collection_path TEXT NOT NULL,
            record JSONB NOT NULL,
            appended_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create history_records table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS history_records_collection_idx \
         ON history_records (collection_path, id)",
    )
    .execute(pool)
    .await
    .context("failed to create history_records index")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_path_is_derived_from_session_id() {
        assert_eq!(chat_collection_path("s1"), "chats/s1/messages");
    }

    #[test]
    fn tls_is_mandatory_for_the_history_database() {
        let plain: PgConnectOptions = "postgres://u:p@db/history".parse().unwrap();
        assert!(require_tls(&plain).is_err(), "default sslmode must be rejected");

        for mode in ["require", "verify-ca", "verify-full"] {
            let options: PgConnectOptions =
                format!("postgres://u:p@db/history?sslmode={mode}").parse().unwrap();
            assert!(require_tls(&options).is_ok(), "sslmode={mode} must be accepted");
        }
    }

    #[test]
    fn pool_sizing_env_parse_ignores_garbage() {
        assert_eq!(env_parse("DRAWBRIDGE_TEST_UNSET_VAR", 10u32), 10);
    }

    #[tokio::test]
    async fn memory_store_appends_in_order() {
        let store = HistoryStore::for_tests();
        let path = chat_collection_path("s1");

        store.append(&path, &json!({"type": "chat", "text": "one"})).await.unwrap();
        store.append(&path, &json!({"type": "chat", "text": "two"})).await.unwrap();

        let records = store.records_for_tests(&path).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["text"], "one");
        assert_eq!(records[1]["text"], "two");
    }

    #[tokio::test]
    async fn collections_are_isolated_per_session() {
        let store = HistoryStore::for_tests();
        store.append(&chat_collection_path("s1"), &json!({"text": "a"})).await.unwrap();
        store.append(&chat_collection_path("s2"), &json!({"text": "b"})).await.unwrap();

        assert_eq!(store.records_for_tests(&chat_collection_path("s1")).await.len(), 1);
        assert_eq!(store.records_for_tests(&chat_collection_path("s2")).await.len(), 1);
    }

    #[tokio::test]
    async fn disabled_store_accepts_appends() {
        let store = HistoryStore::Disabled;
        store.append("chats/s1/messages", &json!({"text": "hi"})).await.unwrap();
    }

    #[tokio::test]
    async fn failing_store_surfaces_append_errors() {
        let store = HistoryStore::FailingForTests;
        let error = store.append("chats/s1/messages", &json!({"text": "hi"})).await.unwrap_err();
        assert!(error.to_string().contains("rejected"));
    }
}
