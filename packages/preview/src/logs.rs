use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::RwLock;

use crate::types::{LogType, PreviewLog};

/// Maximum number of entries kept before the oldest are dropped.
pub const LOG_CAPACITY: usize = 1000;

/// Bounded ring of preview log entries.
pub struct LogBuffer {
    entries: RwLock<VecDeque<PreviewLog>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(LOG_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    pub async fn push(&self, log_type: LogType, message: impl Into<String>) {
        let mut entries = self.entries.write().await;
        entries.push_back(PreviewLog {
            timestamp: Utc::now(),
            log_type,
            message: message.into(),
        });

        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Entries newer than `since`, keeping the most recent `limit`.
    pub async fn query(&self, since: Option<DateTime<Utc>>, limit: Option<usize>) -> Vec<PreviewLog> {
        let entries = self.entries.read().await;
        let mut filtered: Vec<PreviewLog> = match since {
            Some(since_time) => entries
                .iter()
                .filter(|log| log.timestamp > since_time)
                .cloned()
                .collect(),
            None => entries.iter().cloned().collect(),
        };

        if let Some(max_count) = limit {
            if filtered.len() > max_count {
                filtered.drain(..filtered.len() - max_count);
            }
        }

        filtered
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ring_drops_oldest() {
        let logs = LogBuffer::new(3);
        for i in 0..5 {
            logs.push(LogType::Stdout, format!("line {}", i)).await;
        }

        let all = logs.query(None, None).await;
        let messages: Vec<_> = all.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
    }

    #[tokio::test]
    async fn test_limit_keeps_most_recent() {
        let logs = LogBuffer::default();
        logs.push(LogType::System, "a").await;
        logs.push(LogType::Stderr, "b").await;
        logs.push(LogType::Stdout, "c").await;

        let tail = logs.query(None, Some(2)).await;
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].message, "b");
        assert_eq!(tail[1].log_type, LogType::Stdout);

        logs.clear().await;
        assert_eq!(logs.len().await, 0);
    }
}
