#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use certhop_core::directory::{
    Authorization, AuthorizationStatus, Certificate, Challenge, ChallengeKind, ChallengeOutcome,
    Directory, DirectoryError, IssuanceStatus, NewRegistration, Order, Problem, Registration,
};
use certhop_core::keys::{DEFAULT_KEY_BITS, KeyPair};
use certhop_core::store::{ChallengeStore, MemoryStore, StoreError};
use certhop_core::{AcmeClient, AcmeSettings, SelfCheck};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::x509::{X509, X509Builder, X509NameBuilder};

const CA: &str = "https://ca.test";

pub fn domains(names: &[&str]) -> Vec<String> {
    names.iter().map(|d| d.to_string()).collect()
}

pub fn test_settings() -> AcmeSettings {
    AcmeSettings {
        poll_interval: Duration::from_millis(1),
        ..AcmeSettings::default()
    }
}

pub fn account_key() -> KeyPair {
    KeyPair::generate_rsa(DEFAULT_KEY_BITS).unwrap()
}

pub fn client(directory: Arc<FakeDirectory>, key: &KeyPair) -> AcmeClient {
    AcmeClient::new(directory, key.clone(), test_settings())
}

pub fn self_signed(cn: &str) -> X509 {
    let key = KeyPair::generate_rsa(DEFAULT_KEY_BITS).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key.pkey()).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(90).unwrap())
        .unwrap();
    builder.sign(key.pkey(), MessageDigest::sha256()).unwrap();
    builder.build()
}

pub fn token_for(domain: &str) -> String {
    format!("tok_{}", domain.replace(['.', '*'], "_"))
}

fn challenge(kind: ChallengeKind, domain: &str, token: String) -> Challenge {
    Challenge {
        url: format!("{}/chall/{}/{}", CA, domain, kind.as_str()),
        kind,
        token,
    }
}

/// A dns-01 and an http-01 challenge, each its own combination
pub fn http_authorization(domain: &str) -> Authorization {
    Authorization {
        url: format!("{}/authz/{}", CA, domain),
        domain: domain.to_string(),
        status: AuthorizationStatus::Pending,
        challenges: vec![
            challenge(ChallengeKind::Dns01, domain, format!("dns_{}", token_for(domain))),
            challenge(ChallengeKind::Http01, domain, token_for(domain)),
        ],
        combinations: vec![vec![0], vec![1]],
    }
}

#[derive(Debug, Clone)]
pub enum Issuance {
    /// Issue on the poll after this many pending answers
    AfterPolls(usize),
    Never,
    Reject(String),
}

#[derive(Debug, Clone, Default)]
pub struct Calls {
    pub register: usize,
    pub agree_to_tos: usize,
    pub new_order: usize,
    pub request_authorization: usize,
    /// Tokens of answered challenges
    pub answered: Vec<String>,
    /// Whether the response was in the store when the CA was asked
    pub published_when_answered: Vec<bool>,
    pub submit_request: usize,
    /// DER of the last submitted signing request
    pub csr_der: Vec<u8>,
    pub poll_issuance: usize,
    pub fetch_chain: usize,
    pub max_in_flight: usize,
    in_flight: usize,
    registered: bool,
}

/// Scripted CA that counts every call
pub struct FakeDirectory {
    authorizations: HashMap<String, Authorization>,
    outcomes: HashMap<String, ChallengeOutcome>,
    answer_errors: HashSet<String>,
    issuance: Issuance,
    registration_problem: Option<Problem>,
    answer_delay: Duration,
    observed_store: Option<Arc<dyn ChallengeStore>>,
    leaf: X509,
    chain: Vec<X509>,
    calls: Mutex<Calls>,
}

impl FakeDirectory {
    pub fn new(domains: &[String]) -> Self {
        Self {
            authorizations: domains
                .iter()
                .map(|d| (d.clone(), http_authorization(d)))
                .collect(),
            outcomes: HashMap::new(),
            answer_errors: HashSet::new(),
            issuance: Issuance::AfterPolls(0),
            registration_problem: None,
            answer_delay: Duration::ZERO,
            observed_store: None,
            leaf: self_signed(domains.first().map(String::as_str).unwrap_or("leaf")),
            chain: vec![self_signed("Fake Intermediate R1"), self_signed("Fake Root X1")],
            calls: Mutex::new(Calls::default()),
        }
    }

    pub fn with_authorization(mut self, authorization: Authorization) -> Self {
        self.authorizations
            .insert(authorization.domain.clone(), authorization);
        self
    }

    pub fn with_outcome(mut self, domain: &str, outcome: ChallengeOutcome) -> Self {
        self.outcomes.insert(domain.to_string(), outcome);
        self
    }

    /// Fail the verification request for `domain` as if the CA were unreachable
    pub fn with_answer_error(mut self, domain: &str) -> Self {
        self.answer_errors.insert(domain.to_string());
        self
    }

    pub fn with_issuance(mut self, issuance: Issuance) -> Self {
        self.issuance = issuance;
        self
    }

    pub fn with_registration_problem(mut self, problem: Problem) -> Self {
        self.registration_problem = Some(problem);
        self
    }

    pub fn with_answer_delay(mut self, delay: Duration) -> Self {
        self.answer_delay = delay;
        self
    }

    pub fn observing(mut self, store: Arc<dyn ChallengeStore>) -> Self {
        self.observed_store = Some(store);
        self
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        let calls = self.calls();
        calls.register
            + calls.agree_to_tos
            + calls.new_order
            + calls.request_authorization
            + calls.answered.len()
            + calls.submit_request
            + calls.poll_issuance
            + calls.fetch_chain
    }

    pub fn chain_names(&self) -> Vec<String> {
        self.chain.iter().map(common_name).collect()
    }
}

pub fn common_name(x509: &X509) -> String {
    x509.subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .unwrap()
        .data()
        .as_utf8()
        .unwrap()
        .to_string()
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn register(&self, _request: &NewRegistration) -> Result<Registration, DirectoryError> {
        let mut calls = self.calls.lock().unwrap();
        calls.register += 1;

        if let Some(problem) = &self.registration_problem {
            return Err(DirectoryError::Problem(problem.clone()));
        }
        if calls.registered {
            return Err(DirectoryError::Problem(Problem {
                kind: "urn:acme:error:malformed".to_string(),
                detail: "Registration key is already in use".to_string(),
                status: Some(409),
            }));
        }

        calls.registered = true;
        Ok(Registration {
            uri: format!("{}/acct/1", CA),
            terms_of_service: Some(format!("{}/terms", CA)),
        })
    }

    async fn agree_to_tos(&self, _registration: &Registration) -> Result<(), DirectoryError> {
        self.calls.lock().unwrap().agree_to_tos += 1;
        Ok(())
    }

    async fn new_order(&self, domains: &[String]) -> Result<Order, DirectoryError> {
        self.calls.lock().unwrap().new_order += 1;
        Ok(Order {
            url: format!("{}/order/1", CA),
            finalize: format!("{}/order/1/finalize", CA),
            authorizations: domains
                .iter()
                .filter_map(|d| self.authorizations.get(d).cloned())
                .collect(),
        })
    }

    async fn request_authorization(
        &self,
        _order: &Order,
        domain: &str,
    ) -> Result<Authorization, DirectoryError> {
        self.calls.lock().unwrap().request_authorization += 1;
        self.authorizations
            .get(domain)
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownIdentifier(domain.to_string()))
    }

    async fn answer_challenge(
        &self,
        authorization: &Authorization,
        challenge: &Challenge,
    ) -> Result<ChallengeOutcome, DirectoryError> {
        let published = match &self.observed_store {
            Some(store) => matches!(store.get(&challenge.token).await, Ok(Some(_))),
            None => true,
        };

        {
            let mut calls = self.calls.lock().unwrap();
            calls.answered.push(challenge.token.clone());
            calls.published_when_answered.push(published);
            calls.in_flight += 1;
            calls.max_in_flight = calls.max_in_flight.max(calls.in_flight);
        }

        if !self.answer_delay.is_zero() {
            tokio::time::sleep(self.answer_delay).await;
        }

        self.calls.lock().unwrap().in_flight -= 1;
        if self.answer_errors.contains(&authorization.domain) {
            return Err(DirectoryError::Malformed {
                url: challenge.url.clone(),
                reason: "connection reset".to_string(),
            });
        }
        Ok(self
            .outcomes
            .get(&authorization.domain)
            .cloned()
            .unwrap_or(ChallengeOutcome::Valid))
    }

    async fn submit_request(&self, _order: &Order, csr_der: &[u8]) -> Result<(), DirectoryError> {
        assert!(!csr_der.is_empty());
        let mut calls = self.calls.lock().unwrap();
        calls.submit_request += 1;
        calls.csr_der = csr_der.to_vec();
        Ok(())
    }

    async fn poll_issuance(&self, _order: &Order) -> Result<IssuanceStatus, DirectoryError> {
        let polls = {
            let mut calls = self.calls.lock().unwrap();
            calls.poll_issuance += 1;
            calls.poll_issuance
        };

        Ok(match &self.issuance {
            Issuance::AfterPolls(pending) if polls > *pending => {
                IssuanceStatus::Issued(Certificate {
                    url: format!("{}/cert/1", CA),
                    x509: self.leaf.clone(),
                })
            }
            Issuance::AfterPolls(_) | Issuance::Never => IssuanceStatus::Pending,
            Issuance::Reject(detail) => IssuanceStatus::Rejected {
                detail: detail.clone(),
            },
        })
    }

    async fn fetch_chain(&self, certificate: &Certificate) -> Result<Vec<Certificate>, DirectoryError> {
        self.calls.lock().unwrap().fetch_chain += 1;
        Ok(self
            .chain
            .iter()
            .map(|x509| Certificate {
                url: certificate.url.clone(),
                x509: x509.clone(),
            })
            .collect())
    }
}

/// Memory store that records every write and delete
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    puts: Mutex<Vec<(String, String)>>,
    deletes: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn puts(&self) -> Vec<(String, String)> {
        self.puts.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl ChallengeStore for RecordingStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.deletes.lock().unwrap().push(key.to_string());
        self.inner.delete(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }
}

/// Store whose backend refuses every write and delete
#[derive(Default)]
pub struct FailingStore {
    attempts: Mutex<usize>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    fn refuse(&self, key: &str) -> (std::path::PathBuf, std::io::Error) {
        *self.attempts.lock().unwrap() += 1;
        (
            std::path::PathBuf::from("/read-only").join(key),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        )
    }
}

#[async_trait]
impl ChallengeStore for FailingStore {
    async fn put(&self, key: &str, _value: &str) -> Result<(), StoreError> {
        let (path, e) = self.refuse(key);
        Err(StoreError::Write(path, e))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let (path, e) = self.refuse(key);
        Err(StoreError::Delete(path, e))
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }
}

/// Self-check with a fixed answer
pub struct FixedSelfCheck(pub bool);

#[async_trait]
impl SelfCheck for FixedSelfCheck {
    async fn verify(&self, _domain: &str, _token: &str, _expected: &str) -> bool {
        self.0
    }
}
