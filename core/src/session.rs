use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config, NoTls};
use tracing::warn;

use crate::error::{ReorgError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    InTransaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    Serializable,
}

impl IsolationLevel {
    fn begin_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "BEGIN ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::Serializable => "BEGIN ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

/// One physical connection to the target database, plus the driver task
/// that must be polled for the connection to make progress. Tracks its own
/// transaction state so callers never have to guess whether a `BEGIN` is
/// outstanding.
pub struct DbSession {
    client: Client,
    driver: JoinHandle<()>,
    tx_state: TxState,
    isolation: IsolationLevel,
}

impl DbSession {
    pub async fn connect(config: &Config) -> Result<Self> {
        let (client, connection) = config.connect(NoTls).await?;
        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(%err, "database connection driver task exited with an error");
            }
        });
        Ok(Self {
            client,
            driver,
            tx_state: TxState::Idle,
            isolation: IsolationLevel::ReadCommitted,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn tx_state(&self) -> TxState {
        self.tx_state
    }

    pub fn is_broken(&self) -> bool {
        self.client.is_closed()
    }

    pub async fn begin(&mut self, isolation: IsolationLevel) -> Result<()> {
        self.client.batch_execute(isolation.begin_sql()).await?;
        self.tx_state = TxState::InTransaction;
        self.isolation = isolation;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").await?;
        self.tx_state = TxState::Idle;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        if self.tx_state == TxState::InTransaction {
            self.client.batch_execute("ROLLBACK").await?;
        }
        self.tx_state = TxState::Idle;
        Ok(())
    }

    /// Reconnects this session in place, abandoning the old client and its
    /// driver task. Used by the cleanup hook and by orchestrator-level
    /// retry when a connection is observed broken.
    pub async fn reconnect(&mut self, config: &Config) -> Result<()> {
        self.driver.abort();
        let fresh = DbSession::connect(config).await?;
        *self = fresh;
        Ok(())
    }
}

impl Drop for DbSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// The two independent sessions the protocol drives: a
/// primary that carries the transactional state for the whole run, and a
/// secondary used exclusively by the lock escalator's cancel/terminate
/// issuance and by the cleanup hook. The two must never share a
/// transaction, which is why they are distinct `DbSession` values rather
/// than, say, a pool of interchangeable connections.
pub struct SessionPair {
    config: Config,
    pub primary: DbSession,
    pub secondary: DbSession,
}

impl SessionPair {
    pub async fn connect(config: Config) -> Result<Self> {
        let primary = DbSession::connect(&config).await?;
        let secondary = DbSession::connect(&config).await?;
        Ok(Self { config, primary, secondary })
    }

    /// Reconnects the primary session if it is broken. Called by the
    /// cleanup hook before attempting the companion's teardown function,
    /// and on detecting connection loss mid-run.
    pub async fn ensure_primary(&mut self) -> Result<()> {
        if self.primary.is_broken() {
            self.primary
                .reconnect(&self.config)
                .await
                .map_err(|e| ReorgError::ConnectionLost(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn ensure_secondary(&mut self) -> Result<()> {
        if self.secondary.is_broken() {
            self.secondary
                .reconnect(&self.config)
                .await
                .map_err(|e| ReorgError::ConnectionLost(e.to_string()))?;
        }
        Ok(())
    }
}
