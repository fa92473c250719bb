//! The certificate authority seam
//!
//! [`Directory`] lists the CA operations the issuance flow performs. The
//! production implementation is [`HttpDirectory`], an RFC 8555 client; tests
//! drive the flow against scripted in-process directories.

mod http;
mod jws;

pub use http::HttpDirectory;

use crate::keys::KeyError;
use async_trait::async_trait;
use openssl::x509::X509;
use serde::Deserialize;
use thiserror::Error;

/// Let's Encrypt production directory
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Errors returned by a [`Directory`]
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("{0}")]
    Problem(Problem),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("No authorization for {0} in order")]
    UnknownIdentifier(String),

    #[error("Account is not registered")]
    NotRegistered,

    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

impl DirectoryError {
    /// Detail text of a CA problem document, if this is one
    pub fn detail(&self) -> Option<&str> {
        match self {
            DirectoryError::Problem(problem) => Some(&problem.detail),
            _ => None,
        }
    }
}

/// An ACME problem document (RFC 7807)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub status: Option<u16>,
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.kind, status, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

/// Account registration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRegistration {
    /// `mailto:` contact URIs
    pub contact: Vec<String>,
    pub terms_of_service_agreed: bool,
}

impl NewRegistration {
    pub fn from_email(email: Option<&str>, terms_of_service_agreed: bool) -> Self {
        Self {
            contact: email
                .map(|e| vec![format!("mailto:{}", e)])
                .unwrap_or_default(),
            terms_of_service_agreed,
        }
    }
}

/// A freshly created account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Account URL
    pub uri: String,
    pub terms_of_service: Option<String>,
}

/// An order covering the domain set of one certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub url: String,
    pub finalize: String,
    /// Authorizations as fetched when the order was opened
    pub authorizations: Vec<Authorization>,
}

impl Order {
    /// Authorization for `domain`; DNS names compare case-insensitively
    pub fn authorization(&self, domain: &str) -> Option<&Authorization> {
        self.authorizations
            .iter()
            .find(|authorization| authorization.domain.eq_ignore_ascii_case(domain))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// The CA's per-domain proof-of-control request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub url: String,
    pub domain: String,
    pub status: AuthorizationStatus,
    pub challenges: Vec<Challenge>,
    /// Alternative sets of challenge indices, any one of which proves control
    pub combinations: Vec<Vec<usize>>,
}

impl Authorization {
    /// Every challenge as its own single-element combination
    pub fn singleton_combinations(challenges: usize) -> Vec<Vec<usize>> {
        (0..challenges).map(|i| vec![i]).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    Http01,
    Dns01,
    TlsAlpn01,
    Other(String),
}

impl ChallengeKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "http-01" => Self::Http01,
            "dns-01" => Self::Dns01,
            "tls-alpn-01" => Self::TlsAlpn01,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Other(other) => other,
        }
    }
}

/// One verification method offered by an authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub kind: ChallengeKind,
    pub url: String,
    pub token: String,
}

/// The CA's verdict on an answered challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Valid,
    Invalid { detail: String },
}

/// An issued certificate as returned by the CA
#[derive(Clone)]
pub struct Certificate {
    /// Download URL
    pub url: String,
    pub x509: X509,
}

impl Certificate {
    pub fn to_pem(&self) -> Result<String, KeyError> {
        let pem = self.x509.to_pem()?;
        Ok(String::from_utf8_lossy(&pem).into_owned())
    }

    /// Subject common name, if present
    pub fn common_name(&self) -> Option<String> {
        self.x509
            .subject_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|cn| cn.to_string())
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("url", &self.url)
            .field("common_name", &self.common_name())
            .finish()
    }
}

/// State of a submitted signing request
#[derive(Debug, Clone)]
pub enum IssuanceStatus {
    Pending,
    Issued(Certificate),
    Rejected { detail: String },
}

/// Operations the issuance flow performs against a CA
#[async_trait]
pub trait Directory: Send + Sync {
    /// Create an account for the directory's account key
    ///
    /// A key that already has an account is reported as a problem whose
    /// detail contains "already in use".
    async fn register(&self, request: &NewRegistration) -> Result<Registration, DirectoryError>;

    /// Agree to the terms of service for a registration
    async fn agree_to_tos(&self, registration: &Registration) -> Result<(), DirectoryError>;

    /// Open an order for `domains`
    async fn new_order(&self, domains: &[String]) -> Result<Order, DirectoryError>;

    /// Fetch the authorization for one domain of `order`
    async fn request_authorization(
        &self,
        order: &Order,
        domain: &str,
    ) -> Result<Authorization, DirectoryError>;

    /// Ask the CA to verify `challenge` and report its verdict
    async fn answer_challenge(
        &self,
        authorization: &Authorization,
        challenge: &Challenge,
    ) -> Result<ChallengeOutcome, DirectoryError>;

    /// Submit the DER-encoded signing request for `order`
    async fn submit_request(&self, order: &Order, csr_der: &[u8]) -> Result<(), DirectoryError>;

    /// Check once whether the certificate for `order` has been issued
    async fn poll_issuance(&self, order: &Order) -> Result<IssuanceStatus, DirectoryError>;

    /// Issuer certificates for `certificate`, in the order the CA returns them
    async fn fetch_chain(&self, certificate: &Certificate) -> Result<Vec<Certificate>, DirectoryError>;
}
