//! Account broker: pool, rotate, refresh and quota-check upstream accounts.
//!
//! The pool is a bounded queue sized to the configured account count and
//! pre-populated at startup. Workers borrow one account per request and the
//! lease returns it on drop, so release runs even when the orchestrator
//! bails early. Account state is only mutated here.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};

use crate::auth::GrazieAuthClient;
use crate::constants::ACQUIRE_TIMEOUT_SECS;
use crate::error::{AppError, AppResult};
use crate::models::{GrazieAccount, TokenInfo};
use crate::modules::jwt;
use crate::modules::quota::QuotaCache;

pub struct AccountSlot {
    state: Mutex<GrazieAccount>,
}

impl AccountSlot {
    fn new(account: GrazieAccount) -> Self {
        Self {
            state: Mutex::new(account),
        }
    }

    pub fn snapshot(&self) -> GrazieAccount {
        self.state.lock().unwrap().clone()
    }
}

/// A borrowed account. Dropping the lease returns the slot to the pool.
pub struct AccountLease {
    slot: Option<Arc<AccountSlot>>,
    tx: mpsc::Sender<Arc<AccountSlot>>,
}

impl AccountLease {
    pub fn jwt(&self) -> String {
        self.slot().state.lock().unwrap().jwt.clone()
    }

    pub fn display_name(&self) -> String {
        self.slot().state.lock().unwrap().display_name()
    }

    fn slot(&self) -> &Arc<AccountSlot> {
        self.slot.as_ref().expect("lease already released")
    }
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            // The queue is sized to the account count, so this only fails if
            // releases outnumber acquisitions.
            let _ = self.tx.try_send(slot);
        }
    }
}

pub struct AccountPool {
    slots: Vec<Arc<AccountSlot>>,
    tx: mpsc::Sender<Arc<AccountSlot>>,
    rx: AsyncMutex<mpsc::Receiver<Arc<AccountSlot>>>,
    auth: GrazieAuthClient,
    /// Process-wide refresh serialization with double-check, so concurrent
    /// workers never trigger redundant token mints.
    refresh_lock: AsyncMutex<()>,
    quota_cache: QuotaCache,
    acquire_timeout: Duration,
}

impl AccountPool {
    pub fn new(accounts: Vec<GrazieAccount>, auth: GrazieAuthClient) -> Self {
        let capacity = accounts.len().max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let slots: Vec<Arc<AccountSlot>> = accounts
            .into_iter()
            .map(|a| Arc::new(AccountSlot::new(a)))
            .collect();
        for slot in &slots {
            let _ = tx.try_send(Arc::clone(slot));
        }
        Self {
            slots,
            tx,
            rx: AsyncMutex::new(rx),
            auth,
            refresh_lock: AsyncMutex::new(()),
            quota_cache: QuotaCache::default(),
            acquire_timeout: Duration::from_secs(ACQUIRE_TIMEOUT_SECS),
        }
    }

    #[cfg(test)]
    fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn quota_cache(&self) -> &QuotaCache {
        &self.quota_cache
    }

    /// Borrow an account believed usable: token refreshed if stale, quota
    /// probed if stale. Candidates that fail the checks go back to the pool
    /// and the next one is tried, up to one full rotation.
    pub async fn acquire(&self) -> AppResult<AccountLease> {
        if self.slots.is_empty() {
            return Err(AppError::NoAccounts);
        }

        let deadline = tokio::time::Instant::now() + self.acquire_timeout;
        for _ in 0..self.slots.len() {
            let slot = {
                let mut rx = self.rx.lock().await;
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(slot)) => slot,
                    Ok(None) => return Err(AppError::NoAccounts),
                    Err(_) => return Err(AppError::AcquireTimeout),
                }
            };

            if let Err(e) = self.ensure_fresh_token(&slot).await {
                warn!("Failed to refresh JWT: {}", e);
                let _ = self.tx.try_send(slot);
                continue;
            }
            self.ensure_quota_fresh(&slot).await;

            let usable = {
                let acc = slot.state.lock().unwrap();
                acc.has_quota && !acc.jwt.is_empty()
            };
            if usable {
                return Ok(AccountLease {
                    slot: Some(slot),
                    tx: self.tx.clone(),
                });
            }
            let _ = self.tx.try_send(slot);
        }

        Err(AppError::QuotaExhausted)
    }

    /// Token staleness check: refresh when the token is missing,
    /// unparseable, or expiring within the refresh window.
    async fn ensure_fresh_token(&self, slot: &Arc<AccountSlot>) -> AppResult<()> {
        let now = Utc::now().timestamp();
        let (needs, license, secret) = {
            let acc = slot.state.lock().unwrap();
            (
                acc.needs_refresh(now),
                acc.license_id.clone(),
                acc.authorization.clone(),
            )
        };
        if !needs {
            return Ok(());
        }
        let (Some(license), Some(secret)) = (license, secret) else {
            return Ok(());
        };

        let _guard = self.refresh_lock.lock().await;
        // Another worker may have refreshed while we waited.
        if !slot.state.lock().unwrap().needs_refresh(now) {
            return Ok(());
        }

        let token = self.auth.refresh_jwt(&license, &secret).await?;
        let expiry = jwt::token_expiry(&token);
        let mut acc = slot.state.lock().unwrap();
        acc.jwt = token;
        acc.jwt_expiry = expiry;
        acc.last_refreshed = now;
        Ok(())
    }

    /// Quota staleness check: one probe per hour per account. Probe failure
    /// sidelines the account until the next probe window.
    async fn ensure_quota_fresh(&self, slot: &Arc<AccountSlot>) {
        let now = Utc::now().timestamp();
        let (stale, token) = {
            let acc = slot.state.lock().unwrap();
            (acc.quota_stale(now), acc.jwt.clone())
        };
        if !stale || token.is_empty() {
            return;
        }

        let usage = match self.quota_cache.get(&token) {
            Some(cached) => cached,
            None => match self.auth.fetch_quota(&token).await {
                Ok(usage) => {
                    self.quota_cache.put(&token, usage);
                    usage
                }
                Err(e) => {
                    warn!("Quota probe failed: {}", e);
                    let mut acc = slot.state.lock().unwrap();
                    acc.has_quota = false;
                    acc.last_quota_check = now;
                    return;
                }
            },
        };

        let mut acc = slot.state.lock().unwrap();
        acc.has_quota = usage.has_quota();
        acc.last_quota_check = now;
        if let Some(until) = usage.until {
            acc.license_until = Some(until);
        }
        if !acc.has_quota {
            info!("Account {} has no quota", acc.display_name());
        }
    }

    /// Upstream said 477: flip the account to out-of-quota. It stays in the
    /// pool (the next probe window may restore it) but is skipped during
    /// acquisition.
    pub fn mark_out_of_quota(&self, lease: &AccountLease) {
        let mut acc = lease.slot().state.lock().unwrap();
        acc.has_quota = false;
        acc.last_quota_check = Utc::now().timestamp();
        info!("Account {} marked out of quota (477)", acc.display_name());
    }

    /// Upstream said 401: mint a fresh token and return it for one retry.
    /// `used_jwt` is the token the failed call presented; if the account
    /// already carries a different token another worker beat us to it.
    pub async fn refresh_after_unauthorized(
        &self,
        lease: &AccountLease,
        used_jwt: &str,
    ) -> AppResult<String> {
        self.quota_cache.invalidate(used_jwt);

        let (license, secret, current) = {
            let acc = lease.slot().state.lock().unwrap();
            (
                acc.license_id.clone(),
                acc.authorization.clone(),
                acc.jwt.clone(),
            )
        };
        if current != used_jwt && !current.is_empty() {
            return Ok(current);
        }
        let (Some(license), Some(secret)) = (license, secret) else {
            return Err(AppError::Refresh(
                "account has no refresh credentials".to_string(),
            ));
        };

        let _guard = self.refresh_lock.lock().await;
        {
            let acc = lease.slot().state.lock().unwrap();
            if acc.jwt != used_jwt && !acc.jwt.is_empty() {
                return Ok(acc.jwt.clone());
            }
        }

        let token = self.auth.refresh_jwt(&license, &secret).await?;
        let expiry = jwt::token_expiry(&token);
        let mut acc = lease.slot().state.lock().unwrap();
        acc.jwt = token.clone();
        acc.jwt_expiry = expiry;
        acc.last_refreshed = Utc::now().timestamp();
        Ok(token)
    }

    /// Per-account rows for the stats endpoint, from cached state only (no
    /// upstream probes on this path).
    pub fn account_infos(&self) -> Vec<TokenInfo> {
        self.slots
            .iter()
            .map(|slot| {
                let acc = slot.snapshot();
                let usage = if acc.jwt.is_empty() {
                    None
                } else {
                    self.quota_cache.get(&acc.jwt)
                };
                let (used, total, rate) = usage
                    .map(|u| (u.used, u.total, u.usage_rate()))
                    .unwrap_or((0.0, 0.0, 0.0));
                let expiry = acc
                    .license_until
                    .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0));
                let status = if !acc.has_quota {
                    "out-of-quota"
                } else if expiry
                    .map(|e| e < Utc::now() + chrono::Duration::hours(24))
                    .unwrap_or(false)
                {
                    "expiring-soon"
                } else {
                    "ok"
                };
                TokenInfo {
                    name: acc.display_name(),
                    license: acc.license_display(),
                    used,
                    total,
                    usage_rate: rate,
                    expiry_date: expiry,
                    status: status.to_string(),
                    has_quota: acc.has_quota,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_account(tag: &str) -> GrazieAccount {
        // Static-JWT account with a recent quota probe: acquire() needs no
        // network for these.
        let mut acc = GrazieAccount::from_static_jwt(format!("header.payload-{}.sig", tag));
        acc.last_quota_check = Utc::now().timestamp();
        acc
    }

    fn test_pool(accounts: Vec<GrazieAccount>) -> AccountPool {
        let auth = GrazieAuthClient::new(reqwest::Client::new(), "http://127.0.0.1:1".to_string());
        AccountPool::new(accounts, auth).with_acquire_timeout(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_acquire_no_accounts() {
        let pool = test_pool(vec![]);
        assert!(matches!(pool.acquire().await, Err(AppError::NoAccounts)));
    }

    #[tokio::test]
    async fn test_acquire_and_release_roundtrip() {
        let pool = test_pool(vec![fresh_account("a")]);
        let lease = pool.acquire().await.unwrap();
        assert!(lease.jwt().contains("payload-a"));
        drop(lease);
        // Released account can be acquired again.
        let lease = pool.acquire().await.unwrap();
        assert!(lease.jwt().contains("payload-a"));
    }

    #[tokio::test]
    async fn test_no_account_held_twice() {
        let pool = Arc::new(test_pool(vec![fresh_account("a"), fresh_account("b")]));

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_ne!(first.jwt(), second.jwt());

        // Pool is drained now: a third acquire times out.
        assert!(matches!(
            pool.acquire().await,
            Err(AppError::AcquireTimeout)
        ));

        drop(first);
        let third = pool.acquire().await.unwrap();
        assert!(!third.jwt().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_quota_account_skipped() {
        let pool = test_pool(vec![fresh_account("only")]);
        let lease = pool.acquire().await.unwrap();
        pool.mark_out_of_quota(&lease);
        drop(lease);

        // Quota was just checked, so the account is skipped without a probe
        // and the rotation ends in exhaustion.
        assert!(matches!(
            pool.acquire().await,
            Err(AppError::QuotaExhausted)
        ));
    }

    #[tokio::test]
    async fn test_static_jwt_401_is_terminal() {
        let pool = test_pool(vec![fresh_account("static")]);
        let lease = pool.acquire().await.unwrap();
        let used = lease.jwt();
        let err = pool.refresh_after_unauthorized(&lease, &used).await;
        assert!(matches!(err, Err(AppError::Refresh(_))));
    }

    #[tokio::test]
    async fn test_refresh_after_unauthorized_double_check() {
        let pool = test_pool(vec![fresh_account("x")]);
        let lease = pool.acquire().await.unwrap();
        // Another worker already rotated the token: no refresh happens and
        // the current token is returned.
        let current = lease.jwt();
        let token = pool
            .refresh_after_unauthorized(&lease, "some-older-token")
            .await
            .unwrap();
        assert_eq!(token, current);
    }

    #[tokio::test]
    async fn test_concurrent_acquires_are_exclusive() {
        let auth =
            GrazieAuthClient::new(reqwest::Client::new(), "http://127.0.0.1:1".to_string());
        let pool = Arc::new(
            AccountPool::new(
                vec![fresh_account("a"), fresh_account("b"), fresh_account("c")],
                auth,
            )
            .with_acquire_timeout(Duration::from_secs(10)),
        );

        let mut handles = Vec::new();
        for _ in 0..12 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..10 {
                    let lease = pool.acquire().await.unwrap();
                    seen.push(lease.jwt());
                    tokio::task::yield_now().await;
                    drop(lease);
                }
                seen
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap().len();
        }
        // Every acquire eventually succeeded: leases were always returned.
        assert_eq!(total, 120);
    }

    #[tokio::test]
    async fn test_account_infos_reflect_state() {
        let pool = test_pool(vec![fresh_account("a")]);
        let lease = pool.acquire().await.unwrap();
        pool.mark_out_of_quota(&lease);
        drop(lease);

        let infos = pool.account_infos();
        assert_eq!(infos.len(), 1);
        assert!(!infos[0].has_quota);
        assert_eq!(infos[0].status, "out-of-quota");
    }
}
