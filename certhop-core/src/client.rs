//! The issuance flow as one client

use crate::account::{self, AccountPolicy, AccountStatus};
use crate::challenge::{ChallengeOrchestrator, SelfCheck};
use crate::config::AcmeSettings;
use crate::directory::{Directory, DirectoryError, HttpDirectory};
use crate::error::{IssueError, Result, Stage};
use crate::issuance::{IssuanceCoordinator, IssuedCertificate, build_request};
use crate::keys::KeyPair;
use crate::store::ChallengeStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// ACME client bound to one account key and one directory
pub struct AcmeClient {
    directory: Arc<dyn Directory>,
    account_key: KeyPair,
    settings: AcmeSettings,
}

impl AcmeClient {
    pub fn new(directory: Arc<dyn Directory>, account_key: KeyPair, settings: AcmeSettings) -> Self {
        Self {
            directory,
            account_key,
            settings,
        }
    }

    /// Connect to the directory named by `settings`
    pub async fn connect(
        account_key: KeyPair,
        settings: AcmeSettings,
    ) -> std::result::Result<Self, DirectoryError> {
        let directory = HttpDirectory::connect(account_key.clone(), &settings).await?;
        info!(url = %directory.directory_url(), "Connected to ACME directory");
        Ok(Self::new(Arc::new(directory), account_key, settings))
    }

    pub fn settings(&self) -> &AcmeSettings {
        &self.settings
    }

    /// Make sure the account key is registered
    pub async fn check_registration(&self, email: Option<&str>) -> Result<AccountStatus> {
        let policy = AccountPolicy {
            auto_agree_tos: self.settings.auto_agree_tos,
        };
        let status = account::register_or_reuse(self.directory.as_ref(), email, policy).await?;
        match &status {
            AccountStatus::Created { uri } => info!(account = %uri, "Registered new account"),
            AccountStatus::Existing => info!("Using existing account"),
        }
        Ok(status)
    }

    /// Validate every domain, then request and collect the certificate
    ///
    /// No certificate is requested unless all domains validated.
    pub async fn generate_certificate(
        &self,
        domains: &[String],
        store: Arc<dyn ChallengeStore>,
        self_check: Arc<dyn SelfCheck>,
    ) -> Result<IssuedCertificate> {
        validate_domains(domains)?;
        // CAs report identifiers in lowercase
        let domains: Vec<String> = domains.iter().map(|d| d.to_ascii_lowercase()).collect();

        let order = self
            .directory
            .new_order(&domains)
            .await
            .map_err(|e| IssueError::directory(Stage::Order, None, e))?;

        let orchestrator = ChallengeOrchestrator::new(
            self.directory.clone(),
            store,
            self_check,
            &self.account_key,
            self.settings.max_concurrent_validations,
        )?;
        orchestrator.validate_all(&order, &domains).await?;
        info!(domains = domains.len(), "All domains validated");

        let (request, private_key) = build_request(&domains, self.settings.key_bits)?;
        let coordinator = IssuanceCoordinator::new(self.directory.clone(), self.settings.poll_interval);
        let certificate = coordinator.submit_and_poll(&order, &request).await?;
        let chain = coordinator.fetch_chain(&certificate).await?;

        Ok(IssuedCertificate {
            certificate,
            chain,
            private_key,
        })
    }
}

/// Reject domain lists the CA would refuse anyway
pub fn validate_domains(domains: &[String]) -> Result<()> {
    if domains.is_empty() {
        return Err(IssueError::InvalidInput("no domains to verify".to_string()));
    }

    let mut seen = HashSet::new();
    for domain in domains {
        let malformed = domain.is_empty()
            || domain.starts_with('.')
            || domain.contains('/')
            || domain.chars().any(char::is_whitespace);
        if malformed {
            return Err(IssueError::InvalidInput(format!(
                "invalid domain '{}'",
                domain
            )));
        }
        if !seen.insert(domain.to_ascii_lowercase()) {
            return Err(IssueError::InvalidInput(format!(
                "duplicate domain '{}'",
                domain
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains(names: &[&str]) -> Vec<String> {
        names.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_validate_domains() {
        assert!(validate_domains(&domains(&["example.com", "*.example.com"])).is_ok());

        for bad in [
            vec![],
            domains(&[""]),
            domains(&[".example.com"]),
            domains(&["example.com/path"]),
            domains(&["exa mple.com"]),
            domains(&["example.com", "EXAMPLE.com"]),
        ] {
            let err = validate_domains(&bad).unwrap_err();
            assert!(matches!(err, IssueError::InvalidInput(_)), "{:?}", bad);
        }
    }
}
