//! RFC 8555 client for the [`Directory`] operations

use super::jws::{self, KeyId};
use super::{
    Authorization, AuthorizationStatus, Certificate, Challenge, ChallengeKind, ChallengeOutcome,
    Directory, DirectoryError, IssuanceStatus, NewRegistration, Order, Problem, Registration,
};
use crate::config::AcmeSettings;
use crate::keys::KeyPair;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use openssl::x509::X509;
use parking_lot::{Mutex, RwLock};
use reqwest::{Client, Response, StatusCode, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const JOSE_JSON: &str = "application/jose+json";
const PEM_CHAIN: &str = "application/pem-certificate-chain";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Resources {
    new_nonce: String,
    new_account: String,
    new_order: String,
    #[serde(default)]
    meta: Meta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Meta {
    terms_of_service: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Identifier {
    value: String,
}

#[derive(Debug, Deserialize)]
struct OrderBody {
    status: String,
    #[serde(default)]
    authorizations: Vec<String>,
    finalize: String,
    certificate: Option<String>,
    error: Option<Problem>,
}

#[derive(Debug, Deserialize)]
struct AuthorizationBody {
    identifier: Identifier,
    status: AuthorizationStatus,
    #[serde(default)]
    challenges: Vec<ChallengeBody>,
    #[serde(default)]
    wildcard: bool,
    combinations: Option<Vec<Vec<usize>>>,
}

#[derive(Debug, Deserialize)]
struct ChallengeBody {
    #[serde(rename = "type")]
    kind: String,
    url: String,
    #[serde(default)]
    token: String,
    error: Option<Problem>,
}

/// ACME directory reached over HTTPS
///
/// Every request is a JWS signed with the account key. Until the account URL
/// is known (after [`Directory::register`]) only registration may be sent.
pub struct HttpDirectory {
    client: Client,
    directory_url: String,
    resources: Resources,
    account_key: KeyPair,
    kid: RwLock<Option<String>>,
    nonce: Mutex<Option<String>>,
    verify_attempts: u32,
    verify_interval: Duration,
}

impl HttpDirectory {
    /// Fetch the directory document and prepare a client for it
    pub async fn connect(
        account_key: KeyPair,
        settings: &AcmeSettings,
    ) -> Result<Self, DirectoryError> {
        let directory_url = settings.directory_url();
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(concat!("certhop/", env!("CARGO_PKG_VERSION")))
            .build()?;

        debug!(url = %directory_url, "Fetching ACME directory");
        let response = client.get(&directory_url).send().await?;
        let response = check_status(response, &directory_url).await?;
        let resources: Resources = read_json(response, &directory_url).await?;

        Ok(Self {
            client,
            directory_url,
            resources,
            account_key,
            kid: RwLock::new(None),
            nonce: Mutex::new(None),
            verify_attempts: settings.verify_attempts,
            verify_interval: settings.verify_interval,
        })
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    /// Account URL, known once registration has been attempted
    pub fn account_url(&self) -> Option<String> {
        self.kid.read().clone()
    }

    pub fn terms_of_service(&self) -> Option<&str> {
        self.resources.meta.terms_of_service.as_deref()
    }

    async fn nonce(&self) -> Result<String, DirectoryError> {
        let cached = self.nonce.lock().take();
        if let Some(nonce) = cached {
            return Ok(nonce);
        }

        let url = &self.resources.new_nonce;
        let response = self.client.head(url).send().await?;
        replay_nonce(&response).ok_or_else(|| DirectoryError::Malformed {
            url: url.clone(),
            reason: "missing Replay-Nonce header".to_string(),
        })
    }

    fn remember_nonce(&self, response: &Response) {
        if let Some(nonce) = replay_nonce(response) {
            *self.nonce.lock() = Some(nonce);
        }
    }

    /// Signed POST identified by the account URL
    async fn post(
        &self,
        url: &str,
        payload: Option<&serde_json::Value>,
        accept: Option<&str>,
    ) -> Result<Response, DirectoryError> {
        let kid = self.account_url().ok_or(DirectoryError::NotRegistered)?;
        self.post_with(url, KeyId::Kid(&kid), payload, accept).await
    }

    async fn post_with(
        &self,
        url: &str,
        key_id: KeyId<'_>,
        payload: Option<&serde_json::Value>,
        accept: Option<&str>,
    ) -> Result<Response, DirectoryError> {
        let nonce = self.nonce().await?;
        let body = jws::sign(&self.account_key, key_id, &nonce, url, payload)?;

        let mut request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, JOSE_JSON)
            .json(&body);
        if let Some(accept) = accept {
            request = request.header(header::ACCEPT, accept);
        }

        let response = request.send().await?;
        self.remember_nonce(&response);
        check_status(response, url).await
    }

    async fn authorization_body(&self, url: &str) -> Result<AuthorizationBody, DirectoryError> {
        let response = self.post(url, None, None).await?;
        read_json(response, url).await
    }

    async fn fetch_authorization(&self, url: &str) -> Result<Authorization, DirectoryError> {
        let body = self.authorization_body(url).await?;
        Ok(to_authorization(url, body))
    }

    async fn download(&self, url: &str) -> Result<Vec<X509>, DirectoryError> {
        let response = self.post(url, None, Some(PEM_CHAIN)).await?;
        let pem = response.bytes().await?;
        let certificates = X509::stack_from_pem(&pem).map_err(|e| DirectoryError::Malformed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if certificates.is_empty() {
            return Err(DirectoryError::Malformed {
                url: url.to_string(),
                reason: "empty certificate chain".to_string(),
            });
        }
        Ok(certificates)
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn register(&self, request: &NewRegistration) -> Result<Registration, DirectoryError> {
        let url = &self.resources.new_account;
        let payload = json!({
            "contact": request.contact,
            "termsOfServiceAgreed": request.terms_of_service_agreed,
        });
        let response = self
            .post_with(url, KeyId::Jwk(self.account_key.jwk()?), Some(&payload), None)
            .await?;

        let status = response.status();
        let uri = location(&response, url)?;
        *self.kid.write() = Some(uri.clone());

        // RFC 8555 answers 200 instead of 201 when the key already has an account
        if status == StatusCode::OK {
            debug!(account = %uri, "Account key is already registered");
            return Err(DirectoryError::Problem(Problem {
                kind: "urn:acme:error:malformed".to_string(),
                detail: "Registration key is already in use".to_string(),
                status: Some(409),
            }));
        }

        info!(account = %uri, "Registered ACME account");
        Ok(Registration {
            uri,
            terms_of_service: self.terms_of_service().map(str::to_string),
        })
    }

    async fn agree_to_tos(&self, registration: &Registration) -> Result<(), DirectoryError> {
        self.kid
            .write()
            .get_or_insert_with(|| registration.uri.clone());
        let payload = json!({ "termsOfServiceAgreed": true });
        self.post(&registration.uri, Some(&payload), None).await?;
        Ok(())
    }

    async fn new_order(&self, domains: &[String]) -> Result<Order, DirectoryError> {
        let new_order = &self.resources.new_order;
        let identifiers: Vec<_> = domains
            .iter()
            .map(|domain| json!({ "type": "dns", "value": domain }))
            .collect();
        let response = self
            .post(new_order, Some(&json!({ "identifiers": identifiers })), None)
            .await?;
        let url = location(&response, new_order)?;
        let body: OrderBody = read_json(response, &url).await?;

        // Fetched once here; the identifier is the only link to a domain
        let mut authorizations = Vec::with_capacity(body.authorizations.len());
        for authorization_url in &body.authorizations {
            authorizations.push(self.fetch_authorization(authorization_url).await?);
        }

        debug!(order = %url, domains = domains.len(), "Created order");
        Ok(Order {
            url,
            finalize: body.finalize,
            authorizations,
        })
    }

    async fn request_authorization(
        &self,
        order: &Order,
        domain: &str,
    ) -> Result<Authorization, DirectoryError> {
        order
            .authorization(domain)
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownIdentifier(domain.to_string()))
    }

    async fn answer_challenge(
        &self,
        authorization: &Authorization,
        challenge: &Challenge,
    ) -> Result<ChallengeOutcome, DirectoryError> {
        self.post(&challenge.url, Some(&json!({})), None).await?;

        for attempt in 1..=self.verify_attempts {
            let body = self.authorization_body(&authorization.url).await?;
            match body.status {
                AuthorizationStatus::Valid => return Ok(ChallengeOutcome::Valid),
                AuthorizationStatus::Pending => {
                    debug!(domain = %authorization.domain, attempt, "Authorization still pending");
                    if attempt < self.verify_attempts {
                        tokio::time::sleep(self.verify_interval).await;
                    }
                }
                status => {
                    let detail = body
                        .challenges
                        .into_iter()
                        .find(|c| c.url == challenge.url)
                        .and_then(|c| c.error)
                        .map(|problem| problem.detail)
                        .unwrap_or_else(|| format!("authorization is {:?}", status));
                    return Ok(ChallengeOutcome::Invalid { detail });
                }
            }
        }

        Ok(ChallengeOutcome::Invalid {
            detail: format!(
                "authorization still pending after {} checks",
                self.verify_attempts
            ),
        })
    }

    async fn submit_request(&self, order: &Order, csr_der: &[u8]) -> Result<(), DirectoryError> {
        let payload = json!({ "csr": URL_SAFE_NO_PAD.encode(csr_der) });
        self.post(&order.finalize, Some(&payload), None).await?;
        Ok(())
    }

    async fn poll_issuance(&self, order: &Order) -> Result<IssuanceStatus, DirectoryError> {
        let response = self.post(&order.url, None, None).await?;
        let body: OrderBody = read_json(response, &order.url).await?;

        match body.status.as_str() {
            "valid" => {
                let url = body.certificate.ok_or_else(|| DirectoryError::Malformed {
                    url: order.url.clone(),
                    reason: "valid order without certificate URL".to_string(),
                })?;
                let mut certificates = self.download(&url).await?;
                let x509 = certificates.remove(0);
                Ok(IssuanceStatus::Issued(Certificate { url, x509 }))
            }
            "invalid" => Ok(IssuanceStatus::Rejected {
                detail: body
                    .error
                    .map(|problem| problem.detail)
                    .unwrap_or_else(|| "order is invalid".to_string()),
            }),
            _ => Ok(IssuanceStatus::Pending),
        }
    }

    async fn fetch_chain(&self, certificate: &Certificate) -> Result<Vec<Certificate>, DirectoryError> {
        let certificates = self.download(&certificate.url).await?;
        Ok(certificates
            .into_iter()
            .skip(1)
            .map(|x509| Certificate {
                url: certificate.url.clone(),
                x509,
            })
            .collect())
    }
}

fn to_authorization(url: &str, body: AuthorizationBody) -> Authorization {
    let domain = if body.wildcard {
        format!("*.{}", body.identifier.value)
    } else {
        body.identifier.value
    };
    let combinations = body
        .combinations
        .unwrap_or_else(|| Authorization::singleton_combinations(body.challenges.len()));
    let challenges = body
        .challenges
        .into_iter()
        .map(|c| Challenge {
            kind: ChallengeKind::parse(&c.kind),
            url: c.url,
            token: c.token,
        })
        .collect();

    Authorization {
        url: url.to_string(),
        domain,
        status: body.status,
        challenges,
        combinations,
    }
}

fn replay_nonce(response: &Response) -> Option<String> {
    response
        .headers()
        .get("Replay-Nonce")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn location(response: &Response, url: &str) -> Result<String, DirectoryError> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| DirectoryError::Malformed {
            url: url.to_string(),
            reason: "missing Location header".to_string(),
        })
}

/// Turn error statuses into [`DirectoryError::Problem`] when the body is a
/// problem document
async fn check_status(response: Response, url: &str) -> Result<Response, DirectoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<Problem>(&body) {
        Ok(mut problem) => {
            problem.status.get_or_insert(status.as_u16());
            Err(DirectoryError::Problem(problem))
        }
        Err(_) => Err(DirectoryError::Malformed {
            url: url.to_string(),
            reason: format!("HTTP {}: {}", status, body.trim()),
        }),
    }
}

async fn read_json<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, DirectoryError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| DirectoryError::Malformed {
        url: url.to_string(),
        reason: e.to_string(),
    })
}
