use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{BackendFault, Handshake, WalletBackend};
use crate::registry::{ProviderDescriptor, ProviderKind};

/// Presents the available providers to the user and reports the pick.
///
/// `None` means the chooser was dismissed.
#[async_trait]
pub trait ModalChooser: Send + Sync {
    async fn choose(&self, options: &[ProviderDescriptor]) -> Option<String>;
}

/// Delegates the handshake to whichever provider the user picks in a chooser.
pub struct ModalBackend {
    chooser: Arc<dyn ModalChooser>,
    delegates: Vec<(ProviderDescriptor, Arc<dyn WalletBackend>)>,
    selected: Mutex<Option<Arc<dyn WalletBackend>>>,
}

impl std::fmt::Debug for ModalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.delegates.iter().map(|(d, _)| d.id.as_str()).collect();
        f.debug_struct("ModalBackend")
            .field("delegates", &ids)
            .finish()
    }
}

impl ModalBackend {
    pub fn new(
        chooser: Arc<dyn ModalChooser>,
        delegates: Vec<(ProviderDescriptor, Arc<dyn WalletBackend>)>,
    ) -> Self {
        let delegates = delegates
            .into_iter()
            .filter(|(descriptor, _)| descriptor.kind != ProviderKind::ModalDelegated)
            .collect();
        Self {
            chooser,
            delegates,
            selected: Mutex::new(None),
        }
    }

    /// Providers the chooser would currently offer.
    pub fn options(&self) -> Vec<ProviderDescriptor> {
        self.delegates
            .iter()
            .filter(|(_, backend)| backend.is_available())
            .map(|(descriptor, _)| descriptor.clone())
            .collect()
    }
}

#[async_trait]
impl WalletBackend for ModalBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ModalDelegated
    }

    fn is_available(&self) -> bool {
        self.delegates.iter().any(|(_, backend)| backend.is_available())
    }

    async fn handshake(&self, descriptor: &ProviderDescriptor) -> Result<Handshake, BackendFault> {
        let options = self.options();
        if options.is_empty() {
            return Err(BackendFault::Unavailable(
                "no wallet providers to choose from".to_string(),
            ));
        }

        let choice = self
            .chooser
            .choose(&options)
            .await
            .ok_or(BackendFault::Rejected)?;
        let (delegate_descriptor, backend) = self
            .delegates
            .iter()
            .find(|(d, _)| d.id == choice)
            .ok_or_else(|| {
                BackendFault::Failed(anyhow!("chooser returned unknown provider '{}'", choice))
            })?;

        tracing::debug!(
            provider = %descriptor.id,
            delegate = %delegate_descriptor.id,
            "Delegating handshake"
        );
        *self.selected.lock() = Some(Arc::clone(backend));
        backend.handshake(delegate_descriptor).await
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        let selected = self.selected.lock().take();
        match selected {
            Some(backend) => backend.teardown().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_descriptors;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FixedBackend {
        teardowns: AtomicUsize,
    }

    #[async_trait]
    impl WalletBackend for FixedBackend {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Injected
        }

        async fn handshake(&self, _: &ProviderDescriptor) -> Result<Handshake, BackendFault> {
            Ok(Handshake::new("0x00000000000000000000000000000000000000c1", 1))
        }

        async fn teardown(&self) -> anyhow::Result<()> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct PickFirst;

    #[async_trait]
    impl ModalChooser for PickFirst {
        async fn choose(&self, options: &[ProviderDescriptor]) -> Option<String> {
            options.first().map(|d| d.id.clone())
        }
    }

    struct Dismiss;

    #[async_trait]
    impl ModalChooser for Dismiss {
        async fn choose(&self, _: &[ProviderDescriptor]) -> Option<String> {
            None
        }
    }

    fn modal_descriptor() -> ProviderDescriptor {
        default_descriptors().pop().unwrap()
    }

    #[tokio::test]
    async fn delegates_to_chosen_backend_and_tears_it_down() {
        let inner = Arc::new(FixedBackend::default());
        let injected = default_descriptors().remove(0);
        let delegate: Arc<dyn WalletBackend> = inner.clone();
        let modal = ModalBackend::new(Arc::new(PickFirst), vec![(injected, delegate)]);

        let handshake = modal.handshake(&modal_descriptor()).await.unwrap();
        assert_eq!(handshake.chain_id, 1);

        modal.teardown().await.unwrap();
        assert_eq!(inner.teardowns.load(Ordering::SeqCst), 1);

        // nothing selected anymore
        modal.teardown().await.unwrap();
        assert_eq!(inner.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dismissed_chooser_is_rejection() {
        let injected = default_descriptors().remove(0);
        let delegate: Arc<dyn WalletBackend> = Arc::new(FixedBackend::default());
        let modal = ModalBackend::new(Arc::new(Dismiss), vec![(injected, delegate)]);
        let fault = modal.handshake(&modal_descriptor()).await.unwrap_err();
        assert!(matches!(fault, BackendFault::Rejected));
    }

    #[tokio::test]
    async fn modal_never_offers_itself() {
        let delegate: Arc<dyn WalletBackend> = Arc::new(FixedBackend::default());
        let modal = ModalBackend::new(Arc::new(PickFirst), vec![(modal_descriptor(), delegate)]);
        assert!(!modal.is_available());
        let fault = modal.handshake(&modal_descriptor()).await.unwrap_err();
        assert!(matches!(fault, BackendFault::Unavailable(_)));
    }
}
