//! Digest reconciliation between the local image and its registry tag

use crate::{pull_and_tag, Result};
use hugodev_provider::{ContainerProvider, ImageReference, RegistryClient};
use std::sync::Arc;
use tokio::sync::mpsc;

const DIGEST_PREFIX: &str = "sha256:";

/// Strip a leading `sha256:` if present
pub fn strip_digest_prefix(digest: &str) -> &str {
    digest.strip_prefix(DIGEST_PREFIX).unwrap_or(digest)
}

/// Local and remote content digests of one image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestPair {
    /// `None` when the image is missing locally or has no matching repo digest
    pub local: Option<String>,
    pub remote: String,
}

impl DigestPair {
    /// Byte-for-byte comparison once the `sha256:` prefix is gone
    pub fn matches(&self) -> bool {
        match &self.local {
            Some(local) => strip_digest_prefix(local) == strip_digest_prefix(&self.remote),
            None => false,
        }
    }
}

/// Result of a freshness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub up_to_date: bool,
    pub digests: DigestPair,
}

/// Keeps the local image in line with the registry tag it was pulled from
pub struct DigestReconciler {
    provider: Arc<dyn ContainerProvider>,
    registry: Arc<dyn RegistryClient>,
}

impl DigestReconciler {
    pub fn new(provider: Arc<dyn ContainerProvider>, registry: Arc<dyn RegistryClient>) -> Self {
        Self { provider, registry }
    }

    /// Compare the local and remote digests of `image_ref` without pulling
    pub async fn check(&self, image_ref: &str) -> Result<Reconciliation> {
        let reference = ImageReference::parse(image_ref)?;
        self.check_reference(&reference).await
    }

    /// Pull and retag as `local_name` when the local copy is stale
    pub async fn reconcile(
        &self,
        image_ref: &str,
        local_name: &str,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<Reconciliation> {
        let reference = ImageReference::parse(image_ref)?;
        let reconciliation = self.check_reference(&reference).await?;

        if reconciliation.up_to_date {
            tracing::info!("Image {} is up to date", reference);
        } else {
            tracing::info!(
                "Image {} is outdated (local {}, remote {}), pulling",
                reference,
                reconciliation.digests.local.as_deref().unwrap_or("<none>"),
                reconciliation.digests.remote
            );
            pull_and_tag(self.provider.as_ref(), &reference, local_name, progress).await?;
        }

        Ok(reconciliation)
    }

    async fn check_reference(&self, reference: &ImageReference) -> Result<Reconciliation> {
        let remote = self.registry.manifest_digest(reference).await?;
        let local = self.local_digest(reference).await;
        let digests = DigestPair { local, remote };

        Ok(Reconciliation {
            up_to_date: digests.matches(),
            digests,
        })
    }

    /// Digest recorded for `reference` in the local image's repo digests
    async fn local_digest(&self, reference: &ImageReference) -> Option<String> {
        let details = match self.provider.inspect_image(&reference.to_string()).await {
            Ok(details) => details,
            Err(e) => {
                tracing::debug!("No local copy of {}: {}", reference, e);
                return None;
            }
        };

        let prefix = format!("{}@", reference.name());
        let digest = details
            .repo_digests
            .iter()
            .find_map(|entry| entry.strip_prefix(&prefix))
            .map(str::to_string);
        if digest.is_none() {
            tracing::debug!("{} has no repo digest for {}", reference, reference.name());
        }
        digest
    }
}
