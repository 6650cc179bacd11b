// Redis claim store
//
// One claim is one `SET key owner NX EX ttl`. Redis executes it atomically, so
// among concurrent workers exactly one gets the OK reply.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, error, instrument};

use slackline_core::traits::{ClaimStore, StoreError};

/// Claim store backed by a Redis server
#[derive(Clone)]
pub struct RedisClaimStore {
    manager: ConnectionManager,
}

impl RedisClaimStore {
    /// Connect to `redis://` or `rediss://` URL
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| anyhow::anyhow!("failed to open redis client: {}", e))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to redis: {}", e))?;
        Ok(Self { manager })
    }

    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ClaimStore for RedisClaimStore {
    #[instrument(skip(self, owner))]
    async fn set_if_absent(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        // EX takes whole seconds and rejects zero
        let secs = ttl.as_secs().max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("EX")
            .arg(secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Failed to set claim: {}", e);
                map_error(e)
            })?;

        let claimed = reply.is_some();
        debug!(key, claimed, "redis claim");
        Ok(claimed)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

fn map_error(e: redis::RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

impl std::fmt::Debug for RedisClaimStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClaimStore").finish_non_exhaustive()
    }
}
