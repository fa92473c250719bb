//! HTTP-01 challenge orchestration
//!
//! For every domain of an order the orchestrator fetches the authorization,
//! picks an HTTP-01 challenge, publishes the key authorization to the
//! challenge store, checks that it is reachable, asks the CA to verify it
//! and finally retracts it again.
//!
//! Domains are validated concurrently. Each task owns its [`Publication`]
//! and retracts it before finishing, so a failing domain never leaves a
//! stale response behind and never cancels the others.

use crate::directory::{
    Authorization, AuthorizationStatus, Challenge, ChallengeKind, ChallengeOutcome, Directory,
    Order,
};
use crate::error::{IssueError, Result, Stage};
use crate::keys::{Jwk, KeyPair};
use crate::store::ChallengeStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Path prefix the CA fetches challenge responses from
pub const WELL_KNOWN_PREFIX: &str = "/.well-known/acme-challenge/";

/// Request path of the response for `token`
pub fn challenge_path(token: &str) -> String {
    format!("{}{}", WELL_KNOWN_PREFIX, token)
}

/// First single-challenge combination whose challenge is HTTP-01
pub fn select_challenge(authorization: &Authorization) -> Result<&Challenge> {
    authorization
        .combinations
        .iter()
        .filter(|combination| combination.len() == 1)
        .filter_map(|combination| authorization.challenges.get(combination[0]))
        .find(|challenge| challenge.kind == ChallengeKind::Http01)
        .ok_or_else(|| IssueError::NoSupportedChallenge {
            domain: authorization.domain.clone(),
        })
}

/// A challenge response that is currently published
///
/// Call [`Publication::retract`] when done. If the guard is dropped without
/// that (the owning task was cancelled), the delete is spawned on the
/// current runtime instead.
pub struct Publication {
    store: Arc<dyn ChallengeStore>,
    key: String,
    retracted: bool,
}

impl Publication {
    pub async fn publish(store: Arc<dyn ChallengeStore>, key: &str, value: &str) -> Result<Self> {
        store.put(key, value).await.map_err(IssueError::StoreWrite)?;
        Ok(Self {
            store,
            key: key.to_string(),
            retracted: false,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn retract(mut self) -> Result<()> {
        self.retracted = true;
        self.store
            .delete(&self.key)
            .await
            .map_err(IssueError::StoreDelete)
    }
}

impl Drop for Publication {
    fn drop(&mut self) {
        if self.retracted {
            return;
        }

        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(key = %key, "Retracting abandoned challenge response");
                handle.spawn(async move {
                    if let Err(e) = store.delete(&key).await {
                        warn!(key = %key, error = %e, "Failed to retract challenge response");
                    }
                });
            }
            Err(_) => {
                warn!(key = %key, "No runtime available, challenge response left published");
            }
        }
    }
}

/// Confirms a published response is what the CA will see
#[async_trait]
pub trait SelfCheck: Send + Sync {
    async fn verify(&self, domain: &str, token: &str, expected: &str) -> bool;
}

/// Fetches `http://<domain>/.well-known/acme-challenge/<token>` like the CA does
pub struct HttpSelfCheck {
    client: reqwest::Client,
}

impl HttpSelfCheck {
    pub fn new(timeout: Duration) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SelfCheck for HttpSelfCheck {
    async fn verify(&self, domain: &str, token: &str, expected: &str) -> bool {
        let url = format!("http://{}{}", domain, challenge_path(token));
        let response = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(url = %url, status = %response.status(), "Self-check got error status");
                return false;
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Self-check request failed");
                return false;
            }
        };

        match response.text().await {
            Ok(body) => body.trim() == expected,
            Err(e) => {
                debug!(url = %url, error = %e, "Self-check body unreadable");
                false
            }
        }
    }
}

/// Reads the response back from the store instead of over HTTP
pub struct StoreSelfCheck {
    store: Arc<dyn ChallengeStore>,
}

impl StoreSelfCheck {
    pub fn new(store: Arc<dyn ChallengeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SelfCheck for StoreSelfCheck {
    async fn verify(&self, _domain: &str, token: &str, expected: &str) -> bool {
        matches!(self.store.get(token).await, Ok(Some(value)) if value == expected)
    }
}

/// Validates every domain of an order
#[derive(Clone)]
pub struct ChallengeOrchestrator {
    directory: Arc<dyn Directory>,
    store: Arc<dyn ChallengeStore>,
    self_check: Arc<dyn SelfCheck>,
    account_jwk: Jwk,
    max_concurrent: usize,
}

impl ChallengeOrchestrator {
    pub fn new(
        directory: Arc<dyn Directory>,
        store: Arc<dyn ChallengeStore>,
        self_check: Arc<dyn SelfCheck>,
        account_key: &KeyPair,
        max_concurrent: usize,
    ) -> Result<Self> {
        Ok(Self {
            directory,
            store,
            self_check,
            account_jwk: account_key.jwk()?,
            max_concurrent: max_concurrent.max(1),
        })
    }

    /// Validate all `domains`, returning the first failure in completion order
    ///
    /// Every task runs to completion even after a failure.
    pub async fn validate_all(&self, order: &Order, domains: &[String]) -> Result<()> {
        if domains.is_empty() {
            return Err(IssueError::InvalidInput("no domains to verify".to_string()));
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        for domain in domains {
            let worker = self.clone();
            let order = order.clone();
            let domain = domain.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                worker.validate_domain(&order, &domain).await
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(IssueError::from).and_then(|r| r);
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!(domain = e.domain().unwrap_or("-"), error = %e, "Another domain failed validation");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Validate a single domain; the published response is gone when this returns
    pub async fn validate_domain(&self, order: &Order, domain: &str) -> Result<()> {
        let authorization = self
            .directory
            .request_authorization(order, domain)
            .await
            .map_err(|e| IssueError::directory(Stage::Authorization, Some(domain), e))?;

        if authorization.status == AuthorizationStatus::Valid {
            debug!(domain = %domain, "Authorization already valid");
            return Ok(());
        }

        let challenge = select_challenge(&authorization)?.clone();
        let validation = self.account_jwk.key_authorization(&challenge.token);

        debug!(domain = %domain, token = %challenge.token, "Publishing challenge response");
        // Entries are keyed by the bare token
        let publication =
            Publication::publish(self.store.clone(), &challenge.token, &validation).await?;
        let outcome = self
            .check_and_answer(&authorization, &challenge, &validation)
            .await;
        let retracted = publication.retract().await;

        match (outcome, retracted) {
            (Err(e), Err(retract_error)) => {
                warn!(domain = %domain, error = %retract_error, "Failed to retract challenge response");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), retracted) => retracted,
        }
    }

    async fn check_and_answer(
        &self,
        authorization: &Authorization,
        challenge: &Challenge,
        validation: &str,
    ) -> Result<()> {
        let domain = &authorization.domain;
        let reachable = self
            .self_check
            .verify(domain, &challenge.token, validation)
            .await;
        if !reachable {
            return Err(IssueError::LocalValidationMismatch {
                domain: domain.clone(),
            });
        }

        info!(domain = %domain, "Asking CA to verify challenge");
        let outcome = self
            .directory
            .answer_challenge(authorization, challenge)
            .await
            .map_err(|e| IssueError::directory(Stage::Challenge, Some(domain), e))?;

        match outcome {
            ChallengeOutcome::Valid => {
                info!(domain = %domain, "Domain validated");
                Ok(())
            }
            ChallengeOutcome::Invalid { detail } => Err(IssueError::RemoteVerificationFailure {
                domain: domain.clone(),
                detail,
            }),
        }
    }
}
