// Lease lock manager - acquisition, release and shutdown flushing

use super::{LeaseGuard, LockRow, RowFilter};
use crate::config::LockConfig;
use crate::storage::LeaseStore;
use crate::time::{duration_ms, Clock, SystemClock};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A lock this process believes it holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldLease {
    /// Expiry written into the row when it was acquired
    pub expiry: u64,
}

/// Parameters for one blocking acquisition
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// Overall wait before giving up
    pub timeout: Duration,
    /// Lease length written into the row
    pub lease: Duration,
    /// Caller-side cancellation, raced against every poll sleep
    pub cancel: Option<CancellationToken>,
}

impl AcquireOptions {
    pub fn from_config(config: &LockConfig) -> Self {
        Self {
            timeout: config.acquire_timeout(),
            lease: config.lease_duration(),
            cancel: None,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    #[must_use]
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug)]
struct Inner {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    config: LockConfig,

    /// Ids held by this process; presence means held
    held: Arc<DashMap<String, HeldLease>>,

    /// Fired by `shutdown`, interrupts pending acquisitions
    shutdown: CancellationToken,

    /// Set once the release-on-exit watcher has been spawned
    hook_armed: AtomicBool,

    /// The watcher itself, taken by `shutdown` to wait for its flush
    hook: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // The watcher flushes whatever is still held
        self.shutdown.cancel();
    }
}

/// Advisory distributed lock over a shared lease table
///
/// Cloning is cheap and clones share the same registry of held ids, so a
/// clone behaves as the same process. Build separate managers over one store
/// to model separate processes.
#[derive(Debug, Clone)]
pub struct LeaseLock {
    inner: Arc<Inner>,
}

impl LeaseLock {
    pub fn new(store: Arc<dyn LeaseStore>, config: LockConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn LeaseStore>, config: LockConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                config,
                held: Arc::new(DashMap::new()),
                shutdown: CancellationToken::new(),
                hook_armed: AtomicBool::new(false),
                hook: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn LeaseStore> {
        &self.inner.store
    }

    /// Single acquisition attempt
    ///
    /// Returns `true` straight away when this process already holds `id`.
    /// Otherwise purges every expired row in the table, then tries to insert
    /// `id` with an expiry `lease` from now. Conflicts and store failures
    /// both come back as `false` and leave the local registry untouched.
    pub async fn try_acquire(&self, id: &str, lease: Duration) -> bool {
        if self.inner.held.contains_key(id) {
            debug!(id, "Lock already held by this process");
            return true;
        }
        if self.is_shut_down() {
            debug!(id, "Refusing lock after shutdown");
            return false;
        }

        let now = self.inner.clock.now_ms();
        match self.inner.store.delete_where(RowFilter::ExpiredAt(now)).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Purged expired lock rows"),
            Err(err) => warn!(%err, "Failed to purge expired lock rows"),
        }

        let expiry = now.saturating_add(duration_ms(lease));
        match self.inner.store.insert(LockRow::new(id, expiry)).await {
            Ok(()) => {
                self.inner.held.insert(id.to_string(), HeldLease { expiry });
                debug!(id, expiry, "Lock acquired");
                true
            }
            Err(err) if err.is_duplicate() => {
                debug!(id, "Lock held elsewhere");
                false
            }
            Err(err) => {
                warn!(id, %err, "Lock insert failed");
                false
            }
        }
    }

    /// [`try_acquire`](Self::try_acquire) with the configured lease duration
    pub async fn try_acquire_default(&self, id: &str) -> bool {
        self.try_acquire(id, self.inner.config.lease_duration()).await
    }

    /// Poll until `id` is acquired or `timeout` elapses
    pub async fn acquire(&self, id: &str, timeout: Duration) -> bool {
        let options = AcquireOptions::from_config(&self.inner.config).timeout(timeout);
        self.acquire_with(id, options).await
    }

    /// [`acquire`](Self::acquire) with the configured timeout
    pub async fn acquire_default(&self, id: &str) -> bool {
        self.acquire_with(id, AcquireOptions::from_config(&self.inner.config))
            .await
    }

    /// Blocking acquisition
    ///
    /// Tries once, then sleeps the configured poll interval between further
    /// attempts. Gives up with `false` at the deadline, on caller
    /// cancellation or when the manager shuts down. At least one attempt is
    /// always made.
    pub async fn acquire_with(&self, id: &str, options: AcquireOptions) -> bool {
        self.arm_shutdown_hook();

        let deadline = Instant::now() + options.timeout;
        let cancel = options.cancel.unwrap_or_else(CancellationToken::new);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            if self.try_acquire(id, options.lease).await {
                if attempts > 1 {
                    debug!(id, attempts, "Lock acquired after polling");
                }
                return true;
            }
            if self.is_shut_down() {
                return false;
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(id, attempts, "Gave up waiting for lock");
                return false;
            }

            let pause = self.inner.config.poll_interval().min(deadline - now);
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                () = self.inner.shutdown.cancelled() => {
                    debug!(id, attempts, "Lock wait interrupted by shutdown");
                    return false;
                }
                () = cancel.cancelled() => {
                    debug!(id, attempts, "Lock wait cancelled");
                    return false;
                }
            }
        }
    }

    /// Release `id`, whoever holds it
    ///
    /// The id leaves the local registry first; the row is then deleted by key,
    /// falling back to a predicate delete. Store failures are logged and
    /// dropped, and an undeletable row is purged by the next contender once
    /// it expires.
    pub async fn release(&self, id: &str) {
        self.inner.held.remove(id);
        delete_row(self.inner.store.as_ref(), id).await;
    }

    /// Release every id this process holds, returning how many there were
    pub async fn release_all(&self) -> usize {
        release_held(self.inner.store.as_ref(), &self.inner.held).await
    }

    /// Interrupt pending acquisitions and release everything held
    ///
    /// Later acquisitions on this manager fail. Safe to call more than once.
    pub async fn shutdown(&self) -> usize {
        self.inner.shutdown.cancel();
        let released = self.release_all().await;

        let watcher = self.inner.hook.lock().take();
        if let Some(watcher) = watcher {
            if let Err(err) = watcher.await {
                warn!(%err, "Lock shutdown watcher failed");
            }
        }
        if released > 0 {
            info!(released, "Released held locks on shutdown");
        }
        released
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// A token cancelled when this manager shuts down
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }

    pub fn is_held(&self, id: &str) -> bool {
        self.inner.held.contains_key(id)
    }

    /// Held locally but past the expiry written at acquisition
    ///
    /// Another contender may already have purged the row and taken the lock.
    pub fn is_stale(&self, id: &str) -> bool {
        let now = self.inner.clock.now_ms();
        self.inner
            .held
            .get(id)
            .is_some_and(|held| held.expiry <= now)
    }

    pub fn held(&self, id: &str) -> Option<HeldLease> {
        self.inner.held.get(id).map(|entry| *entry)
    }

    /// Sorted snapshot of the ids held by this process
    pub fn held_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .held
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_hook_armed(&self) -> bool {
        self.inner.hook_armed.load(Ordering::SeqCst)
    }

    /// Blocking acquisition with configured defaults, wrapped in a guard
    pub async fn lock(&self, id: &str) -> Option<LeaseGuard> {
        if self.acquire_default(id).await {
            Some(LeaseGuard::new(self.clone(), id.to_string()))
        } else {
            None
        }
    }

    /// Single attempt with the configured lease, wrapped in a guard
    pub async fn try_lock(&self, id: &str) -> Option<LeaseGuard> {
        if self.try_acquire_default(id).await {
            Some(LeaseGuard::new(self.clone(), id.to_string()))
        } else {
            None
        }
    }

    /// Drop `id` from the registry without touching the store
    pub(crate) fn forget(&self, id: &str) {
        self.inner.held.remove(id);
    }

    pub(crate) async fn delete_row(&self, id: &str) {
        delete_row(self.inner.store.as_ref(), id).await;
    }

    /// Spawn the release-on-exit watcher, once per manager
    fn arm_shutdown_hook(&self) {
        if self.inner.hook_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!("No tokio runtime, lock shutdown hook not armed");
            self.inner.hook_armed.store(false, Ordering::SeqCst);
            return;
        };

        let watcher = watch_for_exit(
            self.inner.store.clone(),
            self.inner.held.clone(),
            self.inner.shutdown.clone(),
            self.inner.config.release_on_ctrl_c,
        );
        *self.inner.hook.lock() = Some(runtime.spawn(watcher));
    }
}

/// Delete one row by key, falling back to a predicate delete
async fn delete_row(store: &dyn LeaseStore, id: &str) {
    match store.remove(id).await {
        Ok(removed) => debug!(id, removed, "Lock released"),
        Err(err) => {
            warn!(id, %err, "Keyed lock delete failed, retrying by predicate");
            if let Err(err) = store.delete_where(RowFilter::Id(id.to_string())).await {
                warn!(id, %err, "Lock row left to expire");
            }
        }
    }
}

async fn release_held(store: &dyn LeaseStore, held: &DashMap<String, HeldLease>) -> usize {
    let ids: Vec<String> = held.iter().map(|entry| entry.key().clone()).collect();
    for id in &ids {
        held.remove(id);
        delete_row(store, id).await;
    }
    ids.len()
}

/// Runs `release_all` once the manager shuts down or is dropped
///
/// Holds the store and the registry directly so it can still flush after the
/// last `LeaseLock` handle is gone.
async fn watch_for_exit(
    store: Arc<dyn LeaseStore>,
    held: Arc<DashMap<String, HeldLease>>,
    token: CancellationToken,
    on_ctrl_c: bool,
) {
    if on_ctrl_c {
        tokio::select! {
            () = token.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Interrupted, releasing held locks"),
                    Err(err) => warn!(%err, "Cannot listen for Ctrl-C, releasing held locks"),
                }
                token.cancel();
            }
        }
    } else {
        token.cancelled().await;
    }

    let released = release_held(store.as_ref(), &held).await;
    if released > 0 {
        info!(released, "Released held locks on exit");
    }
}
