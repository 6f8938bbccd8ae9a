use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use uuid::Uuid;

use super::{
    AgentRecord, LedgerError, NewAgent, NewPayment, NewSession, PaymentLedger, PaymentRecord,
    SessionRecord,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        api_key TEXT NOT NULL UNIQUE,
        free_sessions_remaining INTEGER NOT NULL DEFAULT 4,
        total_sessions INTEGER NOT NULL DEFAULT 0,
        total_paid_sessions INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS payments (
        id TEXT PRIMARY KEY,
        agent_id TEXT,
        session_id TEXT NOT NULL,
        tx_hash TEXT NOT NULL UNIQUE,
        chain TEXT NOT NULL,
        method TEXT NOT NULL,
        amount TEXT NOT NULL,
        verified INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        word_count INTEGER NOT NULL,
        duration_seconds REAL NOT NULL,
        full_session INTEGER NOT NULL,
        payment_method TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_agents_api_key ON agents(api_key)",
    "CREATE INDEX IF NOT EXISTS idx_payments_tx_hash ON payments(tx_hash)",
];

/// `SQLite`-backed [`PaymentLedger`].
pub struct SqliteLedger {
    pool: Pool<Sqlite>,
}

impl SqliteLedger {
    /// Connects and creates the schema if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the connection or schema
    /// creation fails.
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let ledger = Self { pool };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    /// An in-memory ledger for tests. A single connection keeps every
    /// query on the same in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the connection fails.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let ledger = Self { pool };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    async fn init_schema(&self) -> Result<(), LedgerError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<AgentRecord, LedgerError> {
        Ok(AgentRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            api_key: row.try_get("api_key")?,
            free_sessions_remaining: row.try_get("free_sessions_remaining")?,
            total_sessions: row.try_get("total_sessions")?,
            total_paid_sessions: row.try_get("total_paid_sessions")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_payment(row: &sqlx::sqlite::SqliteRow) -> Result<PaymentRecord, LedgerError> {
        Ok(PaymentRecord {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            session_id: row.try_get("session_id")?,
            tx_hash: row.try_get("tx_hash")?,
            chain: row.try_get("chain")?,
            method: row.try_get("method")?,
            amount: row.try_get("amount")?,
            verified: row.try_get("verified")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRecord, LedgerError> {
        Ok(SessionRecord {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            word_count: row.try_get("word_count")?,
            duration_seconds: row.try_get("duration_seconds")?,
            full_session: row.try_get("full_session")?,
            payment_method: row.try_get("payment_method")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl PaymentLedger for SqliteLedger {
    async fn create_agent(&self, agent: &NewAgent) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO agents (id, name, description, api_key, free_sessions_remaining, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(&agent.api_key)
        .bind(agent.free_sessions)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_agent_by_key(&self, api_key: &str) -> Result<Option<AgentRecord>, LedgerError> {
        let row = sqlx::query(
            "SELECT id, name, description, api_key, free_sessions_remaining,
                    total_sessions, total_paid_sessions, created_at
             FROM agents WHERE api_key = ?",
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_agent(&row)).transpose()
    }

    async fn has_free_session(&self, agent_id: &str) -> Result<bool, LedgerError> {
        Ok(self.free_sessions_remaining(agent_id).await? > 0)
    }

    async fn decrement_free_session(&self, agent_id: &str) -> Result<bool, LedgerError> {
        // The `> 0` guard makes this the whole check-and-consume: no
        // read-then-write pair, no way for the counter to go negative.
        let result = sqlx::query(
            "UPDATE agents
             SET free_sessions_remaining = free_sessions_remaining - 1,
                 total_sessions = total_sessions + 1
             WHERE id = ? AND free_sessions_remaining > 0",
        )
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn free_sessions_remaining(&self, agent_id: &str) -> Result<i64, LedgerError> {
        let row = sqlx::query("SELECT free_sessions_remaining FROM agents WHERE id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map_or(0, |row| row.get("free_sessions_remaining")))
    }

    async fn find_payment_by_tx_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<PaymentRecord>, LedgerError> {
        let row = sqlx::query(
            "SELECT id, agent_id, session_id, tx_hash, chain, method, amount, verified, created_at
             FROM payments WHERE tx_hash = ?",
        )
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_payment(&row)).transpose()
    }

    async fn record_payment(&self, payment: &NewPayment) -> Result<PaymentRecord, LedgerError> {
        let record = PaymentRecord {
            id: Uuid::new_v4().to_string(),
            agent_id: payment.agent_id.clone(),
            session_id: payment.session_id.clone(),
            tx_hash: payment.tx_hash.clone(),
            chain: payment.chain.clone(),
            method: payment.method.clone(),
            amount: payment.amount.clone(),
            verified: true,
            created_at: Utc::now().to_rfc3339(),
        };

        sqlx::query(
            "INSERT INTO payments (id, agent_id, session_id, tx_hash, chain, method, amount, verified, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&record.id)
        .bind(&record.agent_id)
        .bind(&record.session_id)
        .bind(&record.tx_hash)
        .bind(&record.chain)
        .bind(&record.method)
        .bind(&record.amount)
        .bind(&record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn update_payment_stats(&self, agent_id: &str) -> Result<(), LedgerError> {
        sqlx::query(
            "UPDATE agents
             SET total_paid_sessions = total_paid_sessions + 1,
                 total_sessions = total_sessions + 1
             WHERE id = ?",
        )
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_session(&self, session: &NewSession) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO sessions (id, agent_id, word_count, duration_seconds, full_session, payment_method, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.agent_id)
        .bind(session.word_count)
        .bind(session.duration_seconds)
        .bind(session.full_session)
        .bind(&session.payment_method)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_session(&self, id: &str) -> Result<Option<SessionRecord>, LedgerError> {
        let row = sqlx::query(
            "SELECT id, agent_id, word_count, duration_seconds, full_session, payment_method, created_at
             FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_session(&row)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn ledger_with_agent(free_sessions: i64) -> SqliteLedger {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger
            .create_agent(&NewAgent {
                id: "agent-1".into(),
                name: "test agent".into(),
                description: None,
                api_key: "anky_0123456789abcdef0123456789abcdef".into(),
                free_sessions,
            })
            .await
            .unwrap();
        ledger
    }

    fn payment(tx_hash: &str) -> NewPayment {
        NewPayment {
            agent_id: Some("agent-1".into()),
            session_id: "session-1".into(),
            tx_hash: tx_hash.into(),
            chain: "base".into(),
            method: "usdc".into(),
            amount: "333000".into(),
        }
    }

    #[tokio::test]
    async fn test_agent_lookup_by_key() {
        let ledger = ledger_with_agent(4).await;

        let agent = ledger
            .find_agent_by_key("anky_0123456789abcdef0123456789abcdef")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agent.id, "agent-1");
        assert_eq!(agent.free_sessions_remaining, 4);

        assert!(ledger.find_agent_by_key("anky_unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_decrement_stops_at_zero() {
        let ledger = ledger_with_agent(2).await;

        assert!(ledger.decrement_free_session("agent-1").await.unwrap());
        assert!(ledger.decrement_free_session("agent-1").await.unwrap());
        assert!(!ledger.decrement_free_session("agent-1").await.unwrap());

        assert_eq!(ledger.free_sessions_remaining("agent-1").await.unwrap(), 0);
        assert!(!ledger.has_free_session("agent-1").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_decrements_consume_exactly_the_quota() {
        let ledger = Arc::new(ledger_with_agent(4).await);

        let mut handles = vec![];
        for _ in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.decrement_free_session("agent-1").await.unwrap()
            }));
        }

        let mut consumed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                consumed += 1;
            }
        }

        assert_eq!(consumed, 4);
        assert_eq!(ledger.free_sessions_remaining("agent-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_tx_hash_is_rejected_on_insert() {
        let ledger = ledger_with_agent(0).await;
        let tx_hash = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

        ledger.record_payment(&payment(tx_hash)).await.unwrap();

        let err = ledger.record_payment(&payment(tx_hash)).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateTxHash));
    }

    #[tokio::test]
    async fn test_find_payment_by_tx_hash() {
        let ledger = ledger_with_agent(0).await;
        let tx_hash = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

        assert!(ledger.find_payment_by_tx_hash(tx_hash).await.unwrap().is_none());

        ledger.record_payment(&payment(tx_hash)).await.unwrap();

        let found = ledger.find_payment_by_tx_hash(tx_hash).await.unwrap().unwrap();
        assert_eq!(found.tx_hash, tx_hash);
        assert_eq!(found.method, "usdc");
        assert!(found.verified);
    }

    #[tokio::test]
    async fn test_payment_stats_accumulate() {
        let ledger = ledger_with_agent(0).await;

        ledger.update_payment_stats("agent-1").await.unwrap();
        ledger.update_payment_stats("agent-1").await.unwrap();

        let agent = ledger
            .find_agent_by_key("anky_0123456789abcdef0123456789abcdef")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agent.total_paid_sessions, 2);
        assert_eq!(agent.total_sessions, 2);
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let ledger = ledger_with_agent(1).await;

        ledger
            .insert_session(&NewSession {
                id: "session-9".into(),
                agent_id: "agent-1".into(),
                word_count: 512,
                duration_seconds: 480.0,
                full_session: true,
                payment_method: "free".into(),
            })
            .await
            .unwrap();

        let session = ledger.find_session("session-9").await.unwrap().unwrap();
        assert_eq!(session.agent_id, "agent-1");
        assert!(session.full_session);
        assert_eq!(session.payment_method, "free");

        assert!(ledger.find_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_agent_has_no_free_sessions() {
        let ledger = SqliteLedger::in_memory().await.unwrap();

        assert!(!ledger.has_free_session("ghost").await.unwrap());
        assert!(!ledger.decrement_free_session("ghost").await.unwrap());
        assert_eq!(ledger.free_sessions_remaining("ghost").await.unwrap(), 0);
    }
}
