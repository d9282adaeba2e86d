//! PostgreSQL sink. Each write opens its own connection, inserts one row in
//! a transaction, commits, and closes the connection.

use async_trait::async_trait;
use llmbot_core::config::DatabaseConfig;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::types::Json;
use sqlx::Connection;
use tracing::debug;

use crate::error::SinkError;
use crate::record::EventRecord;
use crate::sink::EventSink;

pub struct RelationalSink {
    options: PgConnectOptions,
    table: String,
}

impl RelationalSink {
    pub fn new(config: &DatabaseConfig) -> Self {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);

        Self {
            options,
            table: config.table.clone(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the events table if it is missing.
    pub async fn ensure_schema(&self) -> Result<(), SinkError> {
        let mut conn = PgConnection::connect_with(&self.options).await?;
        sqlx::query(&self.create_table_sql())
            .execute(&mut conn)
            .await?;
        conn.close().await?;
        Ok(())
    }

    async fn insert(&self, record: &EventRecord) -> Result<(), SinkError> {
        // Dropping the connection or an uncommitted transaction on any early
        // return closes the socket and rolls back.
        let mut conn = PgConnection::connect_with(&self.options).await?;
        let mut tx = conn.begin().await?;

        sqlx::query(&self.insert_sql())
            .bind(record.user_id().as_i64())
            .bind(record.timestamp())
            .bind(record.action().as_str())
            .bind(i64::from(record.completion_tokens()))
            .bind(i64::from(record.prompt_tokens()))
            .bind(record.model_name())
            .bind(record.request_payload().map(Json))
            .bind(record.response_text())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        if let Err(e) = conn.close().await {
            debug!(table = %self.table, error = %e, "Closing connection after commit failed");
        }
        debug!(table = %self.table, "Inserted analytics row");
        Ok(())
    }

    fn create_table_sql(&self) -> String {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                action TEXT NOT NULL,
                completion_tokens BIGINT NOT NULL DEFAULT 0,
                prompt_tokens BIGINT NOT NULL DEFAULT 0,
                model_name TEXT NOT NULL,
                request_payload JSONB,
                response_text TEXT
            )
            "#,
            self.table
        )
    }

    fn insert_sql(&self) -> String {
        format!(
            r#"
            INSERT INTO {} (user_id, timestamp, action, completion_tokens, prompt_tokens,
                            model_name, request_payload, response_text)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
            self.table
        )
    }
}

#[async_trait]
impl EventSink for RelationalSink {
    fn name(&self) -> &'static str {
        "relational"
    }

    async fn write(&self, record: &EventRecord) -> Result<(), SinkError> {
        self.insert(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Interaction;
    use chrono::Utc;
    use llmbot_core::UserId;

    /// A port nothing listens on: bind, read the port, release it.
    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn unreachable_config() -> DatabaseConfig {
        DatabaseConfig {
            host: "127.0.0.1".into(),
            port: closed_port(),
            ..DatabaseConfig::default()
        }
    }

    #[tokio::test]
    async fn test_unreachable_database_is_a_sink_error() {
        let sink = RelationalSink::new(&unreachable_config());
        let record = EventRecord::new(UserId(1), Utc::now(), "m", Interaction::Start);

        let err = sink.write(&record).await.unwrap_err();
        assert!(matches!(err, SinkError::Database(_)));
    }

    #[tokio::test]
    async fn test_ensure_schema_reports_unreachable_database() {
        let sink = RelationalSink::new(&unreachable_config());
        assert!(sink.ensure_schema().await.is_err());
    }

    #[test]
    fn test_statements_target_configured_table() {
        let config = DatabaseConfig {
            table: "bot_events".into(),
            ..DatabaseConfig::default()
        };
        let sink = RelationalSink::new(&config);
        assert_eq!(sink.table(), "bot_events");
        assert!(sink.insert_sql().contains("INSERT INTO bot_events"));
        assert!(sink.create_table_sql().contains("IF NOT EXISTS bot_events"));
        assert!(sink.insert_sql().contains("$8"));
    }
}
