use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};

use crate::account::{AccountState, AccountStore};
use crate::backends::{BackendFault, BackendSet, Handshake, ProviderEvent, WalletBackend};
use crate::errors::{SessionError, SessionResult};
use crate::registry::{ProviderDescriptor, ProviderRegistry};
use crate::results::{OperationResult, ResultChannel};
use crate::validation::InputValidator;

/// Default bound for a single connection handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_HISTORY_CAPACITY: usize = 64;

static VALIDATOR: Lazy<InputValidator> = Lazy::new(InputValidator::default);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl SessionStatus {
    /// Edges of the session state machine.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connected, Disconnected)
                | (Failed, Disconnected)
                | (Disconnected, Idle)
        )
    }
}

/// Snapshot of the single connection this process owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSession {
    pub status: SessionStatus,
    pub provider: Option<ProviderDescriptor>,
    pub account: Option<String>,
    pub chain_id: Option<u64>,
    pub error: Option<SessionError>,
}

impl ConnectionSession {
    fn idle() -> Self {
        Self {
            status: SessionStatus::Idle,
            provider: None,
            account: None,
            chain_id: None,
            error: None,
        }
    }

    /// Account view of the session; `Some` only while connected.
    pub fn account_state(&self) -> Option<AccountState> {
        if self.status != SessionStatus::Connected {
            return None;
        }
        Some(AccountState {
            account: self.account.clone()?,
            chain_id: self.chain_id?,
            provider_id: self.provider.as_ref()?.id.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    /// Empty means any non-zero chain id is accepted.
    pub supported_chains: Vec<u64>,
    pub history_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            supported_chains: Vec::new(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct PendingAttempt {
    generation: u64,
    cancel: oneshot::Sender<()>,
}

struct SessionCell {
    session: ConnectionSession,
    pending: Option<PendingAttempt>,
    active_backend: Option<Arc<dyn WalletBackend>>,
    generation: u64,
    history: VecDeque<(SessionStatus, SessionStatus)>,
    history_capacity: usize,
    last_provider: Option<String>,
}

impl SessionCell {
    fn transition(&mut self, next: SessionStatus) {
        let from = self.session.status;
        debug_assert!(
            from.can_transition_to(next),
            "illegal session transition {:?} -> {:?}",
            from,
            next
        );
        self.session.status = next;
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back((from, next));
        tracing::debug!(?from, to = ?next, "Session transition");
    }

    /// Walk a settled session back to `Idle` along the state machine.
    fn reset_to_idle(&mut self) {
        if matches!(
            self.session.status,
            SessionStatus::Connected | SessionStatus::Failed
        ) {
            self.transition(SessionStatus::Disconnected);
        }
        if self.session.status == SessionStatus::Disconnected {
            self.transition(SessionStatus::Idle);
        }
        let status = self.session.status;
        self.session = ConnectionSession {
            status,
            ..ConnectionSession::idle()
        };
    }

    /// Abort the in-flight attempt: `Connecting -> Failed(Cancelled)`.
    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            // The receiver may already be gone if the attempt was dropped.
            let _ = pending.cancel.send(());
        }
        self.generation += 1;
        self.session.account = None;
        self.session.chain_id = None;
        self.session.error = Some(SessionError::Cancelled);
        self.transition(SessionStatus::Failed);
    }

    fn mark_disconnected(&mut self) {
        self.transition(SessionStatus::Disconnected);
        self.session.account = None;
        self.session.chain_id = None;
        self.session.error = None;
    }
}

struct SessionInner {
    registry: Arc<ProviderRegistry>,
    backends: BackendSet,
    accounts: AccountStore,
    results: ResultChannel,
    settings: SessionSettings,
    cell: Mutex<SessionCell>,
    updates: watch::Sender<ConnectionSession>,
    /// Backend teardowns taken out of the cell but not finished yet.
    releases: watch::Sender<usize>,
}

/// A backend teardown the next handshake has to wait out.
struct PendingRelease {
    inner: Arc<SessionInner>,
    backend: Arc<dyn WalletBackend>,
}

impl PendingRelease {
    /// Call with the session lock held so a following `connect` observes it.
    fn new(inner: &Arc<SessionInner>, backend: Arc<dyn WalletBackend>) -> Self {
        inner.releases.send_modify(|outstanding| *outstanding += 1);
        Self {
            inner: Arc::clone(inner),
            backend,
        }
    }

    async fn run(self) {
        release_backend(Arc::clone(&self.backend)).await;
    }
}

impl Drop for PendingRelease {
    fn drop(&mut self) {
        self.inner
            .releases
            .send_modify(|outstanding| *outstanding = outstanding.saturating_sub(1));
    }
}

/// Owns the lifecycle of the single wallet connection.
///
/// All state transitions happen under one lock that is never held across an
/// await; the handshake itself runs outside it and settles by generation.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session", &self.current_session())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

/// Cancels the attempt if the `connect` future is dropped before it settles.
struct AttemptGuard<'a> {
    manager: &'a SessionManager,
    generation: u64,
    armed: bool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.manager.abandon(self.generation);
        }
    }
}

impl SessionManager {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        backends: BackendSet,
        settings: SessionSettings,
    ) -> Self {
        let (updates, _) = watch::channel(ConnectionSession::idle());
        let (releases, _) = watch::channel(0usize);
        let cell = SessionCell {
            session: ConnectionSession::idle(),
            pending: None,
            active_backend: None,
            generation: 0,
            history: VecDeque::with_capacity(settings.history_capacity.max(1)),
            history_capacity: settings.history_capacity.max(1),
            last_provider: None,
        };

        Self {
            inner: Arc::new(SessionInner {
                registry,
                backends,
                accounts: AccountStore::new(),
                results: ResultChannel::new(),
                settings,
                cell: Mutex::new(cell),
                updates,
                releases,
            }),
        }
    }

    /// Seed the provider used by [`SessionManager::reconnect`], e.g. from persisted config.
    pub fn restore_last_provider(&self, provider_id: Option<String>) {
        self.inner.cell.lock().last_provider = provider_id;
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.inner.accounts
    }

    pub fn results(&self) -> &ResultChannel {
        &self.inner.results
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn current_session(&self) -> ConnectionSession {
        self.inner.cell.lock().session.clone()
    }

    /// Session and account state read together under the session lock.
    pub fn snapshot(&self) -> (ConnectionSession, Option<AccountState>) {
        let cell = self.inner.cell.lock();
        (cell.session.clone(), self.inner.accounts.current())
    }

    pub fn is_busy(&self) -> bool {
        self.inner.cell.lock().session.status == SessionStatus::Connecting
    }

    pub fn last_provider(&self) -> Option<String> {
        self.inner.cell.lock().last_provider.clone()
    }

    pub fn transition_history(&self) -> Vec<(SessionStatus, SessionStatus)> {
        self.inner.cell.lock().history.iter().copied().collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionSession> {
        self.inner.updates.subscribe()
    }

    /// Start a connection through the given provider and wait for it to settle.
    pub async fn connect(&self, provider_id: &str) -> SessionResult<ConnectionSession> {
        let descriptor = match self.inner.registry.resolve(provider_id) {
            Ok(descriptor) => descriptor.clone(),
            Err(err) => return Err(self.fail_fast(err)),
        };
        let backend = match self.inner.backends.get(provider_id) {
            Some(backend) => Arc::clone(backend),
            None => {
                return Err(self.fail_fast(SessionError::NotFound(format!(
                    "No backend registered for provider '{}'",
                    provider_id
                ))))
            }
        };

        let (generation, cancel_rx, previous) = {
            let mut cell = self.inner.cell.lock();
            if cell.session.status == SessionStatus::Connecting {
                drop(cell);
                return Err(self.fail_fast(SessionError::Busy));
            }

            let previous = cell
                .active_backend
                .take()
                .map(|backend| PendingRelease::new(&self.inner, backend));
            cell.reset_to_idle();

            cell.generation += 1;
            let generation = cell.generation;
            let (cancel, cancel_rx) = oneshot::channel();
            cell.pending = Some(PendingAttempt { generation, cancel });
            cell.session.provider = Some(descriptor.clone());
            cell.transition(SessionStatus::Connecting);
            cell.active_backend = Some(Arc::clone(&backend));

            let changed = self.publish(&cell);
            drop(cell);
            if changed {
                self.inner.accounts.notify();
            }
            (generation, cancel_rx, previous)
        };

        let mut guard = AttemptGuard {
            manager: self,
            generation,
            armed: true,
        };

        if let Some(previous) = previous {
            previous.run().await;
        }

        tracing::info!(provider = %descriptor.id, kind = ?descriptor.kind, "Connecting wallet");
        let timeout = self.inner.settings.connect_timeout;
        let attempt = async {
            self.releases_settled().await;
            backend.handshake(&descriptor).await
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel_rx => Err(SessionError::Cancelled),
            handshake = tokio::time::timeout(timeout, attempt) => {
                match handshake {
                    Err(_) => Err(SessionError::Timeout {
                        after_ms: timeout.as_millis() as u64,
                    }),
                    Ok(Ok(handshake)) => self.check_handshake(handshake),
                    Ok(Err(fault)) => Err(normalize_fault(fault)),
                }
            }
        };

        guard.armed = false;
        self.settle(generation, &descriptor, outcome).await
    }

    /// Reconnect through the last provider that reached `Connected`.
    pub async fn reconnect(&self) -> SessionResult<ConnectionSession> {
        let last = self.inner.cell.lock().last_provider.clone();
        match last {
            Some(provider_id) => self.connect(&provider_id).await,
            None => Err(self.fail_fast(SessionError::NotFound(
                "No previous wallet connection".to_string(),
            ))),
        }
    }

    /// Cancel an in-flight attempt. Returns false when nothing was pending.
    pub async fn cancel_pending(&self) -> SessionResult<bool> {
        let release = {
            let mut cell = self.inner.cell.lock();
            if cell.session.status != SessionStatus::Connecting {
                return Ok(false);
            }
            cell.cancel_pending();
            let release = self.take_release(&mut cell);
            let changed = self.publish(&cell);
            drop(cell);
            if changed {
                self.inner.accounts.notify();
            }
            release
        };

        if let Some(release) = release {
            release.run().await;
        }
        tracing::info!("Pending wallet connection cancelled");
        self.inner
            .results
            .record(OperationResult::from_error(&SessionError::Cancelled));
        Ok(true)
    }

    /// Tear down the session from any state. Disconnecting twice is a no-op.
    pub async fn disconnect(&self) -> SessionResult<()> {
        let released = self.close_session().await;
        self.record_disconnect(released);
        Ok(())
    }

    /// Apply a wallet-side event to the connected session.
    pub async fn handle_provider_event(&self, event: ProviderEvent) -> SessionResult<()> {
        if self.current_session().status != SessionStatus::Connected {
            tracing::debug!(?event, "Ignoring provider event outside a connected session");
            return Ok(());
        }

        match event {
            ProviderEvent::Disconnected => {
                tracing::info!("Wallet closed the session");
                self.close_from_wallet().await;
                Ok(())
            }
            ProviderEvent::AccountsChanged(accounts) => match accounts.into_iter().next() {
                None => {
                    tracing::info!("Wallet revoked all accounts");
                    self.close_from_wallet().await;
                    Ok(())
                }
                Some(account) => {
                    VALIDATOR.validate_address(&account).map_err(|e| {
                        SessionError::ProviderError(format!("wallet reported invalid account: {}", e))
                    })?;
                    self.update_connected(|session| session.account = Some(account));
                    Ok(())
                }
            },
            ProviderEvent::ChainChanged(chain_id) => {
                VALIDATOR
                    .validate_chain_id(chain_id, &self.inner.settings.supported_chains)
                    .map_err(|e| {
                        tracing::warn!(chain_id, "Wallet switched to an unsupported chain");
                        SessionError::ProviderError(e.to_string())
                    })?;
                self.update_connected(|session| session.chain_id = Some(chain_id));
                Ok(())
            }
        }
    }

    /// A concurrent `disconnect` may have closed the session after the event was accepted.
    async fn close_from_wallet(&self) {
        let released = self.close_session().await;
        self.record_disconnect(released);
    }

    fn record_disconnect(&self, released: bool) {
        let message = if released {
            "Wallet disconnected."
        } else {
            "Wallet already disconnected."
        };
        self.inner.results.record(OperationResult::success(message));
    }

    fn update_connected<F>(&self, update: F)
    where
        F: FnOnce(&mut ConnectionSession),
    {
        let mut cell = self.inner.cell.lock();
        if cell.session.status != SessionStatus::Connected {
            return;
        }
        update(&mut cell.session);
        let changed = self.publish(&cell);
        drop(cell);
        if changed {
            self.inner.accounts.notify();
        }
    }

    /// Move to `Disconnected`; returns false when there was nothing to close.
    async fn close_session(&self) -> bool {
        let release = {
            let mut cell = self.inner.cell.lock();
            match cell.session.status {
                SessionStatus::Idle | SessionStatus::Disconnected => return false,
                SessionStatus::Connecting => {
                    cell.cancel_pending();
                    cell.mark_disconnected();
                }
                SessionStatus::Connected | SessionStatus::Failed => cell.mark_disconnected(),
            }
            let release = self.take_release(&mut cell);
            let changed = self.publish(&cell);
            drop(cell);
            if changed {
                self.inner.accounts.notify();
            }
            release
        };

        if let Some(release) = release {
            release.run().await;
        }
        true
    }

    async fn settle(
        &self,
        generation: u64,
        descriptor: &ProviderDescriptor,
        outcome: SessionResult<Handshake>,
    ) -> SessionResult<ConnectionSession> {
        let (result, release) = {
            let mut cell = self.inner.cell.lock();
            let current = cell
                .pending
                .as_ref()
                .map(|pending| pending.generation == generation)
                .unwrap_or(false);
            if !current || cell.generation != generation {
                // Cancelled or disconnected meanwhile; that path already released the backend.
                tracing::debug!(provider = %descriptor.id, "Connection attempt superseded");
                return Err(SessionError::Cancelled);
            }
            cell.pending = None;

            let (result, release) = match outcome {
                Ok(handshake) => {
                    cell.session.account = Some(handshake.account);
                    cell.session.chain_id = Some(handshake.chain_id);
                    cell.session.error = None;
                    cell.transition(SessionStatus::Connected);
                    cell.last_provider = Some(descriptor.id.clone());
                    (Ok(cell.session.clone()), None)
                }
                Err(error) => {
                    cell.session.account = None;
                    cell.session.chain_id = None;
                    cell.session.error = Some(error.clone());
                    cell.transition(SessionStatus::Failed);
                    (Err(error), self.take_release(&mut cell))
                }
            };

            let changed = self.publish(&cell);
            drop(cell);
            if changed {
                self.inner.accounts.notify();
            }
            (result, release)
        };

        if let Some(release) = release {
            release.run().await;
        }

        match &result {
            Ok(session) => {
                tracing::info!(
                    provider = %descriptor.id,
                    chain_id = ?session.chain_id,
                    "Wallet connected"
                );
                let payload = serde_json::json!({
                    "provider": descriptor.id,
                    "account": session.account,
                    "chain_id": session.chain_id,
                });
                self.inner
                    .results
                    .record(OperationResult::success("Wallet connected.").with_payload(payload));
            }
            Err(error) => {
                tracing::warn!(provider = %descriptor.id, error = %error, "Wallet connection failed");
                self.inner.results.record(OperationResult::from_error(error));
            }
        }
        result
    }

    /// Invoked when a `connect` future is dropped mid-handshake.
    fn abandon(&self, generation: u64) {
        let release = {
            let mut cell = self.inner.cell.lock();
            if cell.generation != generation || cell.session.status != SessionStatus::Connecting {
                return;
            }
            cell.cancel_pending();
            let release = self.take_release(&mut cell);
            let changed = self.publish(&cell);
            drop(cell);
            if changed {
                self.inner.accounts.notify();
            }
            release
        };

        tracing::debug!("Connection attempt dropped before settling");
        if let Some(release) = release {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(release.run());
                }
                Err(_) => tracing::warn!("No runtime available to release provider resources"),
            }
        }
    }

    fn take_release(&self, cell: &mut SessionCell) -> Option<PendingRelease> {
        cell.active_backend
            .take()
            .map(|backend| PendingRelease::new(&self.inner, backend))
    }

    /// Wait until every teardown handed out so far has finished.
    async fn releases_settled(&self) {
        let mut releases = self.inner.releases.subscribe();
        loop {
            let outstanding = *releases.borrow_and_update();
            if outstanding == 0 || releases.changed().await.is_err() {
                return;
            }
        }
    }

    fn check_handshake(&self, handshake: Handshake) -> SessionResult<Handshake> {
        VALIDATOR.validate_address(&handshake.account).map_err(|e| {
            SessionError::ProviderError(format!("wallet returned an invalid account: {}", e))
        })?;
        VALIDATOR
            .validate_chain_id(handshake.chain_id, &self.inner.settings.supported_chains)
            .map_err(|e| SessionError::ProviderError(e.to_string()))?;
        Ok(handshake)
    }

    /// Mirror the session into the account store and watchers. Call with the lock held.
    fn publish(&self, cell: &SessionCell) -> bool {
        let changed = self.inner.accounts.replace(cell.session.account_state());
        self.inner.updates.send_replace(cell.session.clone());
        changed
    }

    fn fail_fast(&self, error: SessionError) -> SessionError {
        tracing::warn!(error = %error, "Wallet operation rejected");
        self.inner.results.record(OperationResult::from_error(&error));
        error
    }
}

fn normalize_fault(fault: BackendFault) -> SessionError {
    match fault {
        BackendFault::Rejected => SessionError::Cancelled,
        BackendFault::Unavailable(msg) => SessionError::ProviderError(msg),
        BackendFault::Failed(err) => SessionError::ProviderError(format!("{:#}", err)),
    }
}

async fn release_backend(backend: Arc<dyn WalletBackend>) {
    if let Err(err) = backend.teardown().await {
        tracing::warn!(error = %format!("{:#}", err), "Provider teardown failed");
    }
}
