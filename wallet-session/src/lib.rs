// lib.rs - Wallet connection session core

pub mod account;
pub mod app_state;
pub mod backends;
pub mod boundary_client;
pub mod config_store;
pub mod errors;
pub mod paths;
pub mod registry;
pub mod results;
pub mod session;
pub mod validation;

// Re-export common types
pub use account::{AccountState, AccountStore, ObserverId};
pub use app_state::{ContextOptions, SessionContext};
pub use backends::{
    BackendFault, BackendSet, Handshake, InjectedBackend, ModalBackend, ModalChooser,
    PairingBackend, PairingDisplay, PairingProposal, PairingResponder, ProviderEvent,
    WalletBackend,
};
pub use boundary_client::{BoundaryClient, Consent, EligibilityResponse};
pub use config_store::{AppConfig, ConfigStore};
pub use errors::{ErrorKind, SessionError, SessionResult};
pub use paths::SessionPaths;
pub use registry::{ProviderCapabilities, ProviderDescriptor, ProviderKind, ProviderRegistry};
pub use results::{OperationResult, Outcome, ResultChannel};
pub use session::{ConnectionSession, SessionManager, SessionSettings, SessionStatus};
pub use validation::InputValidator;
