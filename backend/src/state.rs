use crate::errors::ExchangeError;
use crate::ledger::{Ledger, LedgerError};
use crate::models::SessionReport;
use crate::provider::ProviderClient;
use crate::session::{self, SessionContext};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::warn;
use uuid::Uuid;

/// How long a requestor reservation survives a process that never releases it.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(600);

/// Reservation of a requestor account shared between processes.
#[async_trait]
pub trait RequestorLeases: Send + Sync {
    /// Reserve `requestor` for `session_id`. Returns `false` while another session holds an
    /// unexpired lease.
    async fn acquire(&self, requestor: &str, session_id: Uuid, ttl: Duration) -> Result<bool, LedgerError>;

    /// Drop the lease if `session_id` still holds it.
    async fn release(&self, requestor: &str, session_id: Uuid) -> Result<(), LedgerError>;
}

type LockMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Shared handles for running sessions.
///
/// Sessions of the same requestor run one at a time: the lock is taken before the balance check
/// and held until the session settles or aborts, so two sessions cannot both pass a balance check
/// that only covers one of them. The in-process lock only orders sessions of this process; with
/// `with_leases` a lease in shared storage also keeps other processes out.
#[derive(Clone)]
pub struct ExchangeState {
    pub ledger: Arc<dyn Ledger>,
    pub client: Arc<dyn ProviderClient>,
    leases: Option<Arc<dyn RequestorLeases>>,
    lease_ttl: Duration,
    locks: LockMap,
}

/// Holds a requestor's session lock; on drop the map entry goes away once nobody else wants it.
struct RequestorGuard {
    requestor: String,
    locks: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RequestorGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters hold a clone, so a count of one means only the map still refers to the lock.
        if locks.get(&self.requestor).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.requestor);
        }
    }
}

impl ExchangeState {
    pub fn new(ledger: Arc<dyn Ledger>, client: Arc<dyn ProviderClient>) -> Self {
        Self {
            ledger,
            client,
            leases: None,
            lease_ttl: DEFAULT_LEASE_TTL,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_leases(mut self, leases: Arc<dyn RequestorLeases>, ttl: Duration) -> Self {
        self.leases = Some(leases);
        self.lease_ttl = ttl;
        self
    }

    async fn lock_requestor(&self, requestor: &str) -> RequestorGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(requestor.to_string()).or_default().clone()
        };
        RequestorGuard {
            requestor: requestor.to_string(),
            locks: self.locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    pub async fn run_session(&self, ctx: &SessionContext) -> Result<SessionReport, ExchangeError> {
        let _guard = self.lock_requestor(&ctx.requestor).await;

        if let Some(leases) = &self.leases {
            if !leases.acquire(&ctx.requestor, ctx.session_id, self.lease_ttl).await? {
                warn!(session_id = %ctx.session_id, requestor = %ctx.requestor, "requestor busy in another process");
                return Err(ExchangeError::RequestorBusy(ctx.requestor.clone()));
            }
        }

        let result = session::run(ctx, self.ledger.as_ref(), self.client.as_ref()).await;
        self.release_lease(ctx).await;
        result
    }

    /// Give up the requestor lease of `ctx`, e.g. after its session future was dropped.
    pub async fn release_lease(&self, ctx: &SessionContext) {
        let Some(leases) = &self.leases else {
            return;
        };
        if let Err(e) = leases.release(&ctx.requestor, ctx.session_id).await {
            warn!(session_id = %ctx.session_id, error = %e, "could not release requestor lease");
        }
    }

    #[cfg(test)]
    fn tracked_requestors(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
