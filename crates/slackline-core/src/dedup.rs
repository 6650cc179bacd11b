// Dedup coordinator
//
// Grants exactly one worker the right to answer a given event. The claim is a
// single conditional write against a ClaimStore shared by all workers; when no
// shared store is configured the in-memory store gives the same contract within
// one process.
//
// Store failures fail closed: the event is treated as already claimed so that a
// store outage causes silence, never duplicate replies.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};
use uuid::Uuid;

use crate::config::MIN_DEDUP_TTL;
use crate::error::{BotError, Result};
use crate::memory::InMemoryClaimStore;
use crate::traits::ClaimStore;

/// Result of a claim attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This worker owns the event and must answer it
    Claimed,
    /// Another delivery of the event was claimed first
    AlreadyClaimed,
}

/// Claims events exactly once across workers sharing a store
#[derive(Clone)]
pub struct DedupCoordinator {
    store: Arc<dyn ClaimStore>,
    ttl: Duration,
    key_prefix: String,
    owner: String,
}

impl DedupCoordinator {
    /// Create a coordinator over a shared store
    ///
    /// A zero TTL is replaced by [`MIN_DEDUP_TTL`].
    pub fn new(store: Arc<dyn ClaimStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl: if ttl.is_zero() { MIN_DEDUP_TTL } else { ttl },
            key_prefix: "slackline:event".to_string(),
            owner: Uuid::now_v7().to_string(),
        }
    }

    /// Single-worker fallback backed by an in-process set
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(InMemoryClaimStore::new()), ttl)
    }

    /// Set the key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the owner recorded with each claim (defaults to a fresh worker id)
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Worker id recorded with claims made by this coordinator
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    fn key(&self, event_id: &str) -> String {
        format!("{}:{}", self.key_prefix, event_id)
    }

    /// Attempt the claim, surfacing store failures as `DedupStoreUnavailable`
    ///
    /// Store failures are logged here at `error`; callers only map them.
    pub async fn claim(&self, event_id: &str) -> Result<ClaimOutcome> {
        let key = self.key(event_id);
        let created = self
            .store
            .set_if_absent(&key, &self.owner, self.ttl)
            .await
            .map_err(|e| {
                error!(
                    event_id,
                    backend = self.store.backend(),
                    error = %e,
                    "dedup store unavailable, dropping event"
                );
                BotError::store(e.to_string())
            })?;

        let outcome = if created {
            ClaimOutcome::Claimed
        } else {
            ClaimOutcome::AlreadyClaimed
        };
        debug!(event_id, backend = self.store.backend(), ?outcome, "claim attempt");
        Ok(outcome)
    }

    /// Attempt the claim, failing closed on store errors
    pub async fn try_claim(&self, event_id: &str) -> ClaimOutcome {
        self.claim(event_id)
            .await
            .unwrap_or(ClaimOutcome::AlreadyClaimed)
    }
}

impl std::fmt::Debug for DedupCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupCoordinator")
            .field("backend", &self.store.backend())
            .field("ttl", &self.ttl)
            .field("key_prefix", &self.key_prefix)
            .field("owner", &self.owner)
            .finish()
    }
}
