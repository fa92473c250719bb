//! Certificate requests and issuance polling

use crate::directory::{Certificate, Directory, IssuanceStatus, Order};
use crate::error::{IssueError, Result, Stage};
use crate::keys::{KeyError, KeyPair};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509NameBuilder, X509Req, X509ReqBuilder};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Issuance checks allowed per domain in the request
pub const POLL_ATTEMPTS_PER_DOMAIN: u32 = 10;

/// A signed PKCS#10 request for a set of domains
pub struct CertificateRequest {
    domains: Vec<String>,
    request: X509Req,
    der: Vec<u8>,
}

impl CertificateRequest {
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn x509_req(&self) -> &X509Req {
        &self.request
    }

    pub fn to_pem(&self) -> std::result::Result<String, KeyError> {
        let pem = self.request.to_pem()?;
        Ok(String::from_utf8_lossy(&pem).into_owned())
    }
}

impl std::fmt::Debug for CertificateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRequest")
            .field("domains", &self.domains)
            .finish_non_exhaustive()
    }
}

/// Build a signing request for `domains` with a freshly generated key
///
/// The first domain is the subject CN; all domains, in order, go into the
/// subjectAltName extension.
pub fn build_request(domains: &[String], key_bits: u32) -> Result<(CertificateRequest, KeyPair)> {
    if domains.is_empty() {
        return Err(IssueError::InvalidInput(
            "certificate request needs at least one domain".to_string(),
        ));
    }

    let key = KeyPair::generate_rsa(key_bits)?;
    let request = sign_request(domains, &key)?;
    let der = request.to_der().map_err(KeyError::from)?;

    debug!(domains = ?domains, "Built certificate request");
    Ok((
        CertificateRequest {
            domains: domains.to_vec(),
            request,
            der,
        },
        key,
    ))
}

fn sign_request(domains: &[String], key: &KeyPair) -> std::result::Result<X509Req, KeyError> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, &domains[0])?;
    let name = name.build();

    let mut builder = X509ReqBuilder::new()?;
    // PKCS#10 only defines version 0 (v1)
    builder.set_version(0)?;
    builder.set_subject_name(&name)?;
    builder.set_pubkey(key.pkey())?;

    let mut san = SubjectAlternativeName::new();
    for domain in domains {
        san.dns(domain);
    }
    let san = san.build(&builder.x509v3_context(None))?;
    let mut extensions = Stack::new()?;
    extensions.push(san)?;
    builder.add_extensions(&extensions)?;

    builder.sign(key.pkey(), MessageDigest::sha256())?;
    Ok(builder.build())
}

/// Submits requests and waits for the CA to issue
pub struct IssuanceCoordinator {
    directory: Arc<dyn Directory>,
    poll_interval: Duration,
}

impl IssuanceCoordinator {
    pub fn new(directory: Arc<dyn Directory>, poll_interval: Duration) -> Self {
        Self {
            directory,
            poll_interval,
        }
    }

    /// Submit `request` once and poll until issued, rejected or out of attempts
    pub async fn submit_and_poll(
        &self,
        order: &Order,
        request: &CertificateRequest,
    ) -> Result<Certificate> {
        self.directory
            .submit_request(order, request.der())
            .await
            .map_err(|e| IssueError::directory(Stage::Submission, None, e))?;

        let domains = u32::try_from(request.domains().len()).unwrap_or(u32::MAX);
        let attempts = POLL_ATTEMPTS_PER_DOMAIN.saturating_mul(domains);

        for attempt in 1..=attempts {
            let status = self
                .directory
                .poll_issuance(order)
                .await
                .map_err(|e| IssueError::directory(Stage::Polling, None, e))?;

            match status {
                IssuanceStatus::Issued(certificate) => {
                    info!(attempt, url = %certificate.url, "Certificate issued");
                    return Ok(certificate);
                }
                IssuanceStatus::Rejected { detail } => {
                    return Err(IssueError::IssuanceRejected { detail });
                }
                IssuanceStatus::Pending => {
                    debug!(attempt, attempts, "Certificate not issued yet");
                    if attempt < attempts {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            }
        }

        Err(IssueError::IssuancePollTimeout { attempts })
    }

    pub async fn fetch_chain(&self, certificate: &Certificate) -> Result<Vec<Certificate>> {
        self.directory
            .fetch_chain(certificate)
            .await
            .map_err(|e| IssueError::directory(Stage::Chain, None, e))
    }
}

/// Leaf certificate, issuer chain and the certificate's private key
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate: Certificate,
    pub chain: Vec<Certificate>,
    pub private_key: KeyPair,
}

impl IssuedCertificate {
    pub fn certificate_pem(&self) -> std::result::Result<String, KeyError> {
        self.certificate.to_pem()
    }

    /// Chain certificates concatenated in CA order
    pub fn chain_pem(&self) -> std::result::Result<String, KeyError> {
        let mut pem = String::new();
        for certificate in &self.chain {
            pem.push_str(&certificate.to_pem()?);
        }
        Ok(pem)
    }

    pub fn private_key_pem(&self) -> std::result::Result<String, KeyError> {
        self.private_key.to_pem_string()
    }

    /// Leaf, then chain, then private key
    pub fn to_pem_bundle(&self) -> std::result::Result<String, KeyError> {
        Ok(format!(
            "{}{}{}",
            self.certificate_pem()?,
            self.chain_pem()?,
            self.private_key_pem()?
        ))
    }
}
