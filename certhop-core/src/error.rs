//! Errors surfaced by the issuance flow

use crate::directory::DirectoryError;
use crate::keys::KeyError;
use crate::store::StoreError;
use thiserror::Error;

/// Step of the flow a CA call belonged to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Order,
    Authorization,
    Challenge,
    Submission,
    Polling,
    Chain,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Order => "creating order",
            Stage::Authorization => "requesting authorization",
            Stage::Challenge => "answering challenge",
            Stage::Submission => "submitting certificate request",
            Stage::Polling => "polling for certificate",
            Stage::Chain => "fetching certificate chain",
        };
        f.write_str(name)
    }
}

fn for_domain(domain: &Option<String>) -> String {
    domain
        .as_deref()
        .map(|d| format!(" for {}", d))
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Account registration failed: {0}")]
    Registration(#[source] DirectoryError),

    #[error("No supported challenge offered for {domain}")]
    NoSupportedChallenge { domain: String },

    #[error("Challenge response for {domain} is not reachable or does not match")]
    LocalValidationMismatch { domain: String },

    #[error("CA could not verify {domain}: {detail}")]
    RemoteVerificationFailure { domain: String, detail: String },

    #[error("Certificate was not issued after {attempts} checks")]
    IssuancePollTimeout { attempts: u32 },

    #[error("Certificate request rejected: {detail}")]
    IssuanceRejected { detail: String },

    #[error("Failed to publish challenge response: {0}")]
    StoreWrite(#[source] StoreError),

    #[error("Failed to remove challenge response: {0}")]
    StoreDelete(#[source] StoreError),

    #[error("CA error while {stage}{}: {source}", for_domain(.domain))]
    Directory {
        stage: Stage,
        domain: Option<String>,
        #[source]
        source: DirectoryError,
    },

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Validation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IssueError {
    pub(crate) fn directory(stage: Stage, domain: Option<&str>, source: DirectoryError) -> Self {
        IssueError::Directory {
            stage,
            domain: domain.map(str::to_string),
            source,
        }
    }

    /// Domain the failure is attributed to, if any
    pub fn domain(&self) -> Option<&str> {
        match self {
            IssueError::NoSupportedChallenge { domain }
            | IssueError::LocalValidationMismatch { domain }
            | IssueError::RemoteVerificationFailure { domain, .. } => Some(domain),
            IssueError::Directory { domain, .. } => domain.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, IssueError>;
