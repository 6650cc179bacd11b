// Claim store backends
//
// Shared stores let any number of stateless workers agree on which one answers
// an event. The backend is chosen from a URL:
// - unset, empty or memory:// -> in-process store (single worker only)
// - redis:// or rediss://     -> RedisClaimStore
// - postgres:// or postgresql:// -> PostgresClaimStore

mod postgres_claims;
mod redis_claims;

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{info, warn};

use slackline_core::memory::InMemoryClaimStore;
use slackline_core::traits::ClaimStore;

pub use postgres_claims::PostgresClaimStore;
pub use redis_claims::RedisClaimStore;

/// Connected claim store
#[derive(Clone)]
pub enum ClaimBackend {
    /// In-process store (dev mode)
    InMemory(Arc<InMemoryClaimStore>),
    Redis(RedisClaimStore),
    Postgres(PostgresClaimStore),
}

impl ClaimBackend {
    /// Connect to the store named by `url`.
    ///
    /// Postgres migrations are applied on connect.
    pub async fn connect(url: Option<&str>) -> Result<Self> {
        let url = url.map(str::trim).filter(|u| !u.is_empty());

        let backend = match url {
            None => {
                warn!("No claim store configured, using in-memory claims (single worker only)");
                Self::in_memory()
            }
            Some(u) if u.starts_with("memory://") => Self::in_memory(),
            Some(u) if u.starts_with("redis://") || u.starts_with("rediss://") => {
                Self::Redis(RedisClaimStore::connect(u).await?)
            }
            Some(u) if u.starts_with("postgres://") || u.starts_with("postgresql://") => {
                let store = PostgresClaimStore::connect(u).await?;
                store.migrate().await?;
                Self::Postgres(store)
            }
            Some(u) => bail!("unsupported claim store URL scheme: {}", scheme(u)),
        };

        info!(backend = backend.name(), "Claim store ready");
        Ok(backend)
    }

    pub fn in_memory() -> Self {
        Self::InMemory(Arc::new(InMemoryClaimStore::new()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InMemory(_) => "memory",
            Self::Redis(_) => "redis",
            Self::Postgres(_) => "postgres",
        }
    }

    /// Postgres store, when that is the backend (expired rows need purging)
    pub fn postgres(&self) -> Option<&PostgresClaimStore> {
        match self {
            Self::Postgres(store) => Some(store),
            _ => None,
        }
    }

    /// Type-erased store for the dedup coordinator
    pub fn store(&self) -> Arc<dyn ClaimStore> {
        match self {
            Self::InMemory(store) => store.clone(),
            Self::Redis(store) => Arc::new(store.clone()),
            Self::Postgres(store) => Arc::new(store.clone()),
        }
    }
}

/// Scheme part of a URL, without credentials
fn scheme(url: &str) -> &str {
    url.split_once("://").map(|(s, _)| s).unwrap_or("<none>")
}
