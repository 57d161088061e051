//! Durable per-agent message queues with a shared fan-out.
//!
//! Every agent owns exactly one personal queue `queue:<name>` on the backend;
//! senders `lpush`, the single owner `brpop`s. The `shared` address is not a
//! queue: it expands at send time into one copy per currently-running agent
//! (read from the session file), excluding the sender.
//!
//! The backend is a narrow capability trait. The reference implementation is
//! [`resp::RespBackend`], a RESP2 client for any Redis/Valkey-compatible list
//! server; tests swap in [`memory::MemoryBackend`]. Every bus operation is
//! wrapped in exponential backoff (base 500 ms, 3 attempts). Queue keys are
//! session-scoped process state: the supervisor flushes `queue:*` at startup,
//! and disk state remains the source of truth.

pub mod memory;
pub mod resp;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BusError, ConfigError};
use crate::state;

/// Logical broadcast address, expanded at send time.
pub const SHARED_ADDR: &str = "shared";
/// The supervisor's inbox.
pub const MAIN_ADDR: &str = "main";

/// Base delay for the send/receive retry wrapper.
const BACKOFF_BASE: Duration = Duration::from_millis(500);
/// Attempts per bus operation before the error surfaces.
const BACKOFF_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// QueueMessage
// ---------------------------------------------------------------------------

/// Message categories understood by agents and the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Task,
    Status,
    Review,
    Complete,
    Error,
    Cancel,
    AllComplete,
}

/// A queue message. Immutable once sent; values on the wire are the JSON
/// serialization of this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: String,
}

impl QueueMessage {
    pub fn new(from: &str, to: &str, kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            kind,
            content: content.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Key of an agent's personal queue.
pub fn queue_key(name: &str) -> String {
    format!("queue:{name}")
}

// ---------------------------------------------------------------------------
// QueueBackend
// ---------------------------------------------------------------------------

/// Capability set the bus requires of a queue server.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn lpush(&self, key: &str, value: &str) -> Result<(), BusError>;
    /// Blocking pop from the right end; `None` after `timeout_secs` elapse.
    async fn brpop(&self, key: &str, timeout_secs: u64)
        -> Result<Option<(String, String)>, BusError>;
    async fn rpop(&self, key: &str) -> Result<Option<String>, BusError>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, BusError>;
    async fn del(&self, key: &str) -> Result<u64, BusError>;
    async fn close(&self) -> Result<(), BusError>;
}

// ---------------------------------------------------------------------------
// MessageBus
// ---------------------------------------------------------------------------

/// The send/receive surface used by agents and the supervisor.
#[derive(Clone)]
pub struct MessageBus {
    backend: Arc<dyn QueueBackend>,
}

impl MessageBus {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    /// Connect to the reference RESP backend at `url`
    /// (`valkey://host:port` or `redis://host:port`).
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let backend = resp::RespBackend::connect(url).await?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Send a message. `to = shared` fans out one copy per running agent
    /// (excluding the sender), which requires `workspace` to locate the
    /// session file; omitting it is a configuration error.
    pub async fn send(
        &self,
        msg: &QueueMessage,
        workspace: Option<&Path>,
    ) -> Result<(), BusError> {
        if msg.to == SHARED_ADDR {
            let workspace = workspace.ok_or(ConfigError::FanOutWithoutWorkspace)?;
            let session = state::read_session_state(workspace)
                .await
                .map_err(|e| BusError::Protocol(format!("session read for fan-out: {e}")))?
                .ok_or_else(|| {
                    BusError::Protocol("session file missing for shared fan-out".to_string())
                })?;

            for name in session.running_agents_except(&msg.from) {
                let copy = QueueMessage {
                    to: name.clone(),
                    ..msg.clone()
                };
                let value = serde_json::to_string(&copy)?;
                self.push_with_backoff(&queue_key(&name), &value).await?;
            }
            return Ok(());
        }

        let value = serde_json::to_string(msg)?;
        self.push_with_backoff(&queue_key(&msg.to), &value).await
    }

    /// Blocking receive from an agent's personal queue. At-most-one delivery
    /// per call; `None` when the timeout elapses with an empty queue.
    pub async fn receive(
        &self,
        name: &str,
        timeout_secs: u64,
    ) -> Result<Option<QueueMessage>, BusError> {
        let key = queue_key(name);
        let popped = self
            .with_backoff(|| self.backend.brpop(&key, timeout_secs))
            .await?;
        match popped {
            Some((_, value)) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Non-blocking receive; `None` on an empty queue.
    pub async fn receive_non_blocking(
        &self,
        name: &str,
    ) -> Result<Option<QueueMessage>, BusError> {
        let key = queue_key(name);
        let popped = self.with_backoff(|| self.backend.rpop(&key)).await?;
        match popped {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Delete every `queue:*` key. Called once by the supervisor at session
    /// start; running it twice yields the same post-state.
    pub async fn flush_all(&self) -> Result<u64, BusError> {
        let keys = self
            .with_backoff(|| self.backend.keys("queue:*"))
            .await?;
        let mut deleted = 0;
        for key in keys {
            deleted += self.with_backoff(|| self.backend.del(&key)).await?;
        }
        Ok(deleted)
    }

    pub async fn close(&self) {
        let _ = self.backend.close().await;
    }

    async fn push_with_backoff(&self, key: &str, value: &str) -> Result<(), BusError> {
        self.with_backoff(|| self.backend.lpush(key, value)).await
    }

    /// Retry an operation with exponential backoff: 500 ms, 1 s between the
    /// three attempts.
    async fn with_backoff<T, F, Fut>(&self, mut op: F) -> Result<T, BusError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, BusError>>,
    {
        let mut delay = BACKOFF_BASE;
        let mut last_err = None;
        for attempt in 1..=BACKOFF_ATTEMPTS {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt < BACKOFF_ATTEMPTS {
                        tracing::debug!(attempt, error = %e, "bus operation failed, backing off");
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one attempt ran"))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
