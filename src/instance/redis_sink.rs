use anyhow::{Context, Result};
use parking_lot::Mutex;
use redis::Commands;
use tracing::warn;

use crate::instance::changes::{ChangeRecord, ChangeSink};

/// Appends change records, as JSON, to one Redis list per flow instance.
pub struct RedisChangeSink {
    client: redis::Client,
    key_prefix: String,
    conn: Mutex<Option<redis::Connection>>,
}

impl RedisChangeSink {
    pub fn new(client: redis::Client, key_prefix: &str) -> Self {
        Self {
            client,
            key_prefix: key_prefix.to_string(),
            conn: Mutex::new(None),
        }
    }

    pub fn open(url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url).with_context(|| format!("invalid Redis URL: {}", url))?;
        Ok(Self::new(client, key_prefix))
    }

    fn changes_key(&self, instance_id: &str) -> String {
        format!("{}:inst:{}:changes", self.key_prefix, instance_id)
    }

    fn push(&self, record: &ChangeRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.client.get_connection()?);
        }
        if let Some(conn) = guard.as_mut() {
            let pushed: redis::RedisResult<()> = conn.rpush(self.changes_key(&record.instance_id), payload);
            if let Err(e) = pushed {
                // Reconnect on the next record.
                *guard = None;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Reads back every change recorded for `instance_id`, in order.
    pub fn load_changes(&self, instance_id: &str) -> Result<Vec<ChangeRecord>> {
        let mut conn = self.client.get_connection()?;
        let raw: Vec<String> = conn.lrange(self.changes_key(instance_id), 0, -1)?;
        raw.iter()
            .map(|s| serde_json::from_str(s).context("malformed change record"))
            .collect()
    }
}

impl std::fmt::Debug for RedisChangeSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisChangeSink")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl ChangeSink for RedisChangeSink {
    fn record(&self, record: &ChangeRecord) {
        if let Err(e) = self.push(record) {
            warn!(instance = %record.instance_id, seq = record.seq, error = %e, "Failed to persist change");
        }
    }
}
