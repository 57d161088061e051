//! In-process queue backend for tests.
//!
//! Keeps every list in a `HashMap` guarded by an async mutex and wakes
//! blocked poppers through a [`Notify`]. Semantics mirror the RESP backend:
//! `lpush` prepends, pops take from the tail, `brpop` waits up to the given
//! timeout.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::QueueBackend;
use crate::error::BusError;

#[derive(Default)]
pub struct MemoryBackend {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    notify: Notify,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn try_pop(&self, key: &str) -> Option<String> {
        let mut queues = self.queues.lock().await;
        let queue = queues.get_mut(key)?;
        let value = queue.pop_back();
        if queue.is_empty() {
            queues.remove(key);
        }
        value
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn lpush(&self, key: &str, value: &str) -> Result<(), BusError> {
        let mut queues = self.queues.lock().await;
        queues
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        drop(queues);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn brpop(
        &self,
        key: &str,
        timeout_secs: u64,
    ) -> Result<Option<(String, String)>, BusError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
        loop {
            if let Some(value) = self.try_pop(key).await {
                return Ok(Some((key.to_string(), value)));
            }
            // timeout_secs = 0 blocks indefinitely, matching the server.
            if timeout_secs == 0 {
                self.notify.notified().await;
                continue;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
            if tokio::time::Instant::now() >= deadline {
                // One last non-blocking check before giving up.
                if let Some(value) = self.try_pop(key).await {
                    return Ok(Some((key.to_string(), value)));
                }
                return Ok(None);
            }
        }
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, BusError> {
        Ok(self.try_pop(key).await)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, BusError> {
        let queues = self.queues.lock().await;
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        Ok(queues
            .keys()
            .filter(|k| {
                if pattern.ends_with('*') {
                    k.starts_with(prefix)
                } else {
                    k.as_str() == pattern
                }
            })
            .cloned()
            .collect())
    }

    async fn del(&self, key: &str) -> Result<u64, BusError> {
        let mut queues = self.queues.lock().await;
        Ok(if queues.remove(key).is_some() { 1 } else { 0 })
    }

    async fn close(&self) -> Result<(), BusError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lpush_rpop_is_fifo() {
        let backend = MemoryBackend::new();
        backend.lpush("queue:a", "first").await.unwrap();
        backend.lpush("queue:a", "second").await.unwrap();

        assert_eq!(backend.rpop("queue:a").await.unwrap().as_deref(), Some("first"));
        assert_eq!(backend.rpop("queue:a").await.unwrap().as_deref(), Some("second"));
        assert_eq!(backend.rpop("queue:a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn brpop_wakes_on_push() {
        let backend = std::sync::Arc::new(MemoryBackend::new());
        let popper = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.brpop("queue:a", 5).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.lpush("queue:a", "wake").await.unwrap();

        let result = popper.await.unwrap().unwrap();
        assert_eq!(result, Some(("queue:a".to_string(), "wake".to_string())));
    }

    #[tokio::test]
    async fn brpop_times_out_to_none() {
        tokio::time::pause();
        let backend = std::sync::Arc::new(MemoryBackend::new());
        let fut = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.brpop("queue:a", 1).await })
        };
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(fut.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn keys_matches_prefix_glob() {
        let backend = MemoryBackend::new();
        backend.lpush("queue:a", "x").await.unwrap();
        backend.lpush("queue:b", "y").await.unwrap();
        backend.lpush("other", "z").await.unwrap();

        let mut keys = backend.keys("queue:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["queue:a", "queue:b"]);
    }
}
