//! Remote-session pairing backend.
//!
//! A handshake opens a pairing (random topic + symmetric key), publishes its
//! `wc:` URI to a [`PairingDisplay`] for QR rendering, and parks until the
//! relay side answers through a [`PairingResponder`]. A pending pairing lives
//! exactly as long as the handshake that opened it; teardown closes the
//! settled one, so releasing an old attempt never touches a newer pairing.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::{BackendFault, Handshake, WalletBackend};
use crate::errors::{SessionError, SessionResult};
use crate::registry::{ProviderDescriptor, ProviderKind};
use crate::validation::InputValidator;

const TOPIC_BYTES: usize = 32;
const SYM_KEY_BYTES: usize = 32;
const PAIRING_PROTOCOL_VERSION: u8 = 2;
const RELAY_PROTOCOL: &str = "irn";
const PAIRING_TTL_SECS: i64 = 5 * 60;

/// A pairing offer waiting for a wallet to scan it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingProposal {
    pub topic: String,
    pub uri: String,
    pub expires_at: DateTime<Utc>,
}

/// Receives pairing offers so a UI can render the URI (typically as a QR code).
pub trait PairingDisplay: Send + Sync {
    fn show(&self, proposal: &PairingProposal);
}

#[derive(Debug)]
enum PairingReply {
    Approved(Handshake),
    Rejected,
}

#[derive(Debug, Default)]
struct PairingTable {
    pending: HashMap<String, oneshot::Sender<PairingReply>>,
    settled: Option<String>,
}

impl PairingTable {
    fn open_count(&self) -> usize {
        self.pending.len() + usize::from(self.settled.is_some())
    }
}

/// Removes a pending pairing when the handshake future ends or is dropped.
struct PendingGuard {
    table: Arc<Mutex<PairingTable>>,
    topic: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.lock().pending.remove(&self.topic);
    }
}

/// Relay-side handle used to deliver the wallet's answer to a pending pairing.
#[derive(Debug, Clone)]
pub struct PairingResponder {
    table: Arc<Mutex<PairingTable>>,
}

impl PairingResponder {
    pub fn approve(&self, topic: &str, account: &str, chain_id: u64) -> SessionResult<()> {
        self.reply(topic, PairingReply::Approved(Handshake::new(account, chain_id)))
    }

    pub fn reject(&self, topic: &str) -> SessionResult<()> {
        self.reply(topic, PairingReply::Rejected)
    }

    pub fn pending_topics(&self) -> Vec<String> {
        self.table.lock().pending.keys().cloned().collect()
    }

    fn reply(&self, topic: &str, reply: PairingReply) -> SessionResult<()> {
        let sender = self
            .table
            .lock()
            .pending
            .remove(topic)
            .ok_or_else(|| SessionError::NotFound(format!("No pending pairing '{}'", topic)))?;
        sender
            .send(reply)
            .map_err(|_| SessionError::ProviderError("Pairing was closed".to_string()))
    }
}

pub struct PairingBackend {
    relay_url: String,
    project_id: String,
    table: Arc<Mutex<PairingTable>>,
    display: Option<Arc<dyn PairingDisplay>>,
}

impl std::fmt::Debug for PairingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingBackend")
            .field("relay_url", &self.relay_url)
            .field("open_pairings", &self.open_pairings())
            .finish()
    }
}

impl PairingBackend {
    pub fn new(relay_url: impl Into<String>, project_id: impl Into<String>) -> SessionResult<Self> {
        let relay_url = relay_url.into();
        let project_id = project_id.into();
        let validator = InputValidator::default();
        validator.validate_project_id(&project_id)?;

        Ok(Self {
            relay_url,
            project_id,
            table: Arc::new(Mutex::new(PairingTable::default())),
            display: None,
        })
    }

    pub fn with_display(mut self, display: Arc<dyn PairingDisplay>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn responder(&self) -> PairingResponder {
        PairingResponder {
            table: Arc::clone(&self.table),
        }
    }

    /// Pending plus settled pairings still held by this backend.
    pub fn open_pairings(&self) -> usize {
        self.table.lock().open_count()
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn propose(&self) -> PairingProposal {
        let mut topic = [0u8; TOPIC_BYTES];
        let mut sym_key = [0u8; SYM_KEY_BYTES];
        OsRng.fill_bytes(&mut topic);
        OsRng.fill_bytes(&mut sym_key);

        let topic = hex::encode(topic);
        let expires_at = Utc::now() + ChronoDuration::seconds(PAIRING_TTL_SECS);
        let uri = format!(
            "wc:{}@{}?relay-protocol={}&symKey={}&expiryTimestamp={}",
            topic,
            PAIRING_PROTOCOL_VERSION,
            RELAY_PROTOCOL,
            hex::encode(sym_key),
            expires_at.timestamp()
        );

        PairingProposal {
            topic,
            uri,
            expires_at,
        }
    }
}

#[async_trait]
impl WalletBackend for PairingBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::RemotePairing
    }

    async fn handshake(&self, descriptor: &ProviderDescriptor) -> Result<Handshake, BackendFault> {
        let proposal = self.propose();
        let (tx, rx) = oneshot::channel();
        self.table.lock().pending.insert(proposal.topic.clone(), tx);
        let _guard = PendingGuard {
            table: Arc::clone(&self.table),
            topic: proposal.topic.clone(),
        };

        tracing::info!(
            provider = %descriptor.id,
            topic = %proposal.topic,
            expires_at = %proposal.expires_at,
            "Pairing proposal created"
        );
        if let Some(display) = &self.display {
            display.show(&proposal);
        }

        match rx.await {
            Ok(PairingReply::Approved(handshake)) => {
                self.table.lock().settled = Some(proposal.topic);
                Ok(handshake)
            }
            Ok(PairingReply::Rejected) => Err(BackendFault::Rejected),
            Err(_) => Err(BackendFault::Failed(anyhow!(
                "pairing closed before the wallet responded"
            ))),
        }
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        // Pending pairings belong to their handshake's guard.
        let closed = self.table.lock().settled.take();
        tracing::debug!(topic = ?closed, "Pairing backend released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{default_descriptors, REMOTE_SESSION_PROVIDER_ID};
    use std::time::Duration;

    const PROJECT_ID: &str = "0123456789abcdef0123456789abcdef";

    fn descriptor() -> ProviderDescriptor {
        default_descriptors()
            .into_iter()
            .find(|d| d.id == REMOTE_SESSION_PROVIDER_ID)
            .unwrap()
    }

    #[derive(Default)]
    struct RecordingDisplay(Mutex<Vec<PairingProposal>>);

    impl PairingDisplay for RecordingDisplay {
        fn show(&self, proposal: &PairingProposal) {
            self.0.lock().push(proposal.clone());
        }
    }

    #[test]
    fn rejects_malformed_project_id() {
        assert!(PairingBackend::new("wss://relay.example", "not-hex").is_err());
    }

    #[tokio::test]
    async fn approval_completes_handshake() {
        let display = Arc::new(RecordingDisplay::default());
        let backend = Arc::new(
            PairingBackend::new("wss://relay.example", PROJECT_ID)
                .unwrap()
                .with_display(display.clone()),
        );
        let responder = backend.responder();

        let task = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { backend.handshake(&descriptor()).await })
        };

        let topic = loop {
            if let Some(topic) = responder.pending_topics().pop() {
                break topic;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        };
        responder
            .approve(&topic, "0x00000000000000000000000000000000000000b0", 1)
            .unwrap();

        let handshake = task.await.unwrap().unwrap();
        assert_eq!(handshake.chain_id, 1);
        assert_eq!(backend.open_pairings(), 1);

        let shown = display.0.lock();
        assert_eq!(shown.len(), 1);
        assert!(shown[0].uri.starts_with(&format!("wc:{}@2?", topic)));
        assert!(shown[0].uri.contains("symKey="));
        drop(shown);

        backend.teardown().await.unwrap();
        assert_eq!(backend.open_pairings(), 0);
    }

    #[tokio::test]
    async fn rejection_maps_to_rejected_fault() {
        let backend = Arc::new(PairingBackend::new("wss://relay.example", PROJECT_ID).unwrap());
        let responder = backend.responder();
        let task = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { backend.handshake(&descriptor()).await })
        };

        let topic = loop {
            if let Some(topic) = responder.pending_topics().pop() {
                break topic;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        };
        responder.reject(&topic).unwrap();

        let fault = task.await.unwrap().unwrap_err();
        assert!(matches!(fault, BackendFault::Rejected));
        assert_eq!(backend.open_pairings(), 0);
    }

    #[tokio::test]
    async fn dropped_handshake_releases_pending_pairing() {
        let backend = PairingBackend::new("wss://relay.example", PROJECT_ID).unwrap();
        let result =
            tokio::time::timeout(Duration::from_millis(10), backend.handshake(&descriptor())).await;
        assert!(result.is_err());
        assert_eq!(backend.open_pairings(), 0);
    }

    #[tokio::test]
    async fn teardown_keeps_pairing_of_running_handshake() {
        let backend = Arc::new(PairingBackend::new("wss://relay.example", PROJECT_ID).unwrap());
        let responder = backend.responder();
        let task = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { backend.handshake(&descriptor()).await })
        };

        let topic = loop {
            if let Some(topic) = responder.pending_topics().pop() {
                break topic;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        };
        // late release of an earlier attempt
        backend.teardown().await.unwrap();
        assert_eq!(responder.pending_topics(), vec![topic.clone()]);

        responder
            .approve(&topic, "0x00000000000000000000000000000000000000b0", 1)
            .unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[test]
    fn answering_unknown_topic_is_not_found() {
        let backend = PairingBackend::new("wss://relay.example", PROJECT_ID).unwrap();
        let err = backend.responder().reject("deadbeef").unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }
}
