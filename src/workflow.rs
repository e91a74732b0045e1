//! Rotation workflow
//!
//! Runs `Start → Minted → Published → CleanedUp` against a
//! [`ClusterSecretManager`] and a [`DestinationStore`]. Nothing is discarded
//! before its replacement exists: the new token is minted before it is
//! published, and published before any old secret is deleted.
//!
//! A publish failure leaves the freshly minted secret in the cluster. The next
//! successful run with cleanup enabled removes it along with the other
//! superseded secrets.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cluster::{ClusterSecretManager, SecretToken, TokenSecret};
use crate::config::RotationConfig;
use crate::harness::DestinationStore;
use crate::{Error, RotationError, Stage};

/// Progress of a rotation run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationState {
    /// Nothing has happened yet
    Start,
    /// A new token secret exists in the cluster
    Minted,
    /// The new token is stored in the destination
    Published,
    /// Superseded token secrets have been processed
    CleanedUp,
}

/// Outcome of the cleanup stage
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Secrets that were deleted (or were already gone)
    pub deleted: Vec<String>,
    /// Per-secret failures, reported as warnings
    pub failures: Vec<Error>,
}

/// Outcome of a successful run
#[derive(Debug)]
pub struct RotationReport {
    /// Terminal state: `Published` or `CleanedUp`
    pub state: RotationState,
    /// The secret minted by this run
    pub token_secret: TokenSecret,
    /// Destination identifier the token was written to
    pub identifier: String,
    /// Cleanup results, present when cleanup was enabled
    pub cleanup: Option<CleanupReport>,
}

impl RotationReport {
    /// The published token
    pub fn token(&self) -> &SecretToken {
        &self.token_secret.token
    }
}

/// Mint → publish → cleanup orchestration for one service account
pub struct RotationWorkflow {
    config: RotationConfig,
    cluster: Arc<dyn ClusterSecretManager>,
    store: Arc<dyn DestinationStore>,
}

impl RotationWorkflow {
    /// Create a workflow from explicit configuration and collaborators
    pub fn new(
        config: RotationConfig,
        cluster: Arc<dyn ClusterSecretManager>,
        store: Arc<dyn DestinationStore>,
    ) -> Self {
        Self {
            config,
            cluster,
            store,
        }
    }

    /// Run the rotation once.
    ///
    /// Mint and publish failures end the run as `Failed(stage)`. Cleanup
    /// failures never do; they are collected in the report.
    pub async fn run(&self) -> Result<RotationReport, RotationError> {
        let sa = &self.config.service_account;
        info!(
            namespace = %sa.namespace,
            service_account = %sa.name,
            identifier = %self.config.identifier,
            cleanup = self.config.delete_old_secrets,
            "Starting token rotation"
        );

        let minted = self
            .cluster
            .create(sa)
            .await
            .map_err(|e| failed(Stage::Mint, e))?;
        info!(secret = %minted.name, state = ?RotationState::Minted, "Minted token secret");

        self.store
            .upsert(
                &self.config.scope,
                &self.config.identifier,
                &minted.token,
                &self.config.tags,
            )
            .await
            .map_err(|e| {
                warn!(
                    secret = %minted.name,
                    "Leaving minted secret in place after publish failure"
                );
                failed(Stage::Publish, e)
            })?;
        info!(
            identifier = %self.config.identifier,
            state = ?RotationState::Published,
            "Published token"
        );

        if !self.config.delete_old_secrets {
            return Ok(RotationReport {
                state: RotationState::Published,
                token_secret: minted,
                identifier: self.config.identifier.clone(),
                cleanup: None,
            });
        }

        let cleanup = self.cleanup(&minted).await;
        info!(
            deleted = cleanup.deleted.len(),
            failed = cleanup.failures.len(),
            state = ?RotationState::CleanedUp,
            "Cleanup finished"
        );

        Ok(RotationReport {
            state: RotationState::CleanedUp,
            token_secret: minted,
            identifier: self.config.identifier.clone(),
            cleanup: Some(cleanup),
        })
    }

    async fn cleanup(&self, current: &TokenSecret) -> CleanupReport {
        let mut report = CleanupReport::default();

        let existing = match self
            .cluster
            .list_token_secrets(&self.config.service_account)
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                warn!(stage = %Stage::Cleanup, error = %e, "Failed to list token secrets");
                report.failures.push(e);
                return report;
            }
        };

        for secret in superseded(existing, &current.name) {
            let namespace = &secret.service_account.namespace;
            match self.cluster.delete(&secret.name, namespace).await {
                Ok(()) => report.deleted.push(secret.name),
                Err(e) => {
                    warn!(
                        stage = %Stage::Cleanup,
                        secret = %secret.name,
                        error = %e,
                        "Failed to delete superseded token secret"
                    );
                    report.failures.push(e);
                }
            }
        }

        report
    }
}

/// Secrets to delete: everything listed except the one this run minted
pub fn superseded(existing: Vec<TokenSecret>, current: &str) -> Vec<TokenSecret> {
    existing.into_iter().filter(|s| s.name != current).collect()
}

fn failed(stage: Stage, source: Error) -> RotationError {
    warn!(stage = %stage, error = %source, "Rotation failed");
    RotationError::new(stage, source)
}
