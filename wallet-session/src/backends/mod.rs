//! Wallet provider backends.
//!
//! Each backend performs the handshake for one capability class and releases
//! whatever it holds on teardown. Faults are reported as [`BackendFault`] and
//! normalized by the session manager; nothing here decides session state.

pub mod injected;
pub mod modal;
pub mod pairing;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::registry::{ProviderDescriptor, ProviderKind};

pub use injected::InjectedBackend;
pub use modal::{ModalBackend, ModalChooser};
pub use pairing::{PairingBackend, PairingDisplay, PairingProposal, PairingResponder};

/// Account and chain authorized by a wallet at the end of a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub account: String,
    pub chain_id: u64,
}

impl Handshake {
    pub fn new(account: impl Into<String>, chain_id: u64) -> Self {
        Self {
            account: account.into(),
            chain_id,
        }
    }
}

#[derive(Debug)]
pub enum BackendFault {
    /// The user declined in the wallet or dismissed the prompt.
    Rejected,
    /// The backend cannot run in this environment (no wallet, no relay).
    Unavailable(String),
    /// Anything else raised by the wallet library or transport.
    Failed(anyhow::Error),
}

impl fmt::Display for BackendFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BackendFault::Rejected => write!(f, "request rejected by user"),
            BackendFault::Unavailable(msg) => write!(f, "backend unavailable: {}", msg),
            BackendFault::Failed(err) => write!(f, "{:#}", err),
        }
    }
}

impl From<anyhow::Error> for BackendFault {
    fn from(error: anyhow::Error) -> Self {
        BackendFault::Failed(error)
    }
}

/// Wallet-side notifications for an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(u64),
    Disconnected,
}

/// A connection backend for one capability class.
///
/// `handshake` must tolerate being dropped at any await point; the session
/// manager cancels by dropping it and then calls `teardown`.
#[async_trait]
pub trait WalletBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProviderKind;

    fn is_available(&self) -> bool {
        true
    }

    async fn handshake(&self, descriptor: &ProviderDescriptor) -> Result<Handshake, BackendFault>;

    async fn teardown(&self) -> anyhow::Result<()>;
}

/// Backends keyed by provider id.
pub type BackendSet = HashMap<String, Arc<dyn WalletBackend>>;
