//! RSA key material for ACME accounts and certificates
//!
//! Account keys sign every request sent to the CA and their JWK thumbprint is
//! part of each HTTP-01 key authorization. Certificate keys are generated
//! fresh for every issuance.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Key size used for account and certificate keys
pub const DEFAULT_KEY_BITS: u32 = 2048;

/// Errors that can occur while handling key material
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Failed to generate key pair: {0}")]
    Generation(String),

    #[error("Failed to parse private key: {0}")]
    Parse(String),

    #[error("Unsupported key type {0:?}, only RSA keys are accepted")]
    UnsupportedKeyType(Id),

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),
}

/// An RSA private key
#[derive(Clone)]
pub struct KeyPair {
    pkey: PKey<Private>,
}

impl KeyPair {
    /// Generate a new RSA key of `bits` size
    pub fn generate_rsa(bits: u32) -> Result<Self, KeyError> {
        let rsa = Rsa::generate(bits).map_err(|e| KeyError::Generation(e.to_string()))?;
        let pkey = PKey::from_rsa(rsa).map_err(|e| KeyError::Generation(e.to_string()))?;
        Ok(Self { pkey })
    }

    /// Load a private key from PEM (PKCS#8 or PKCS#1)
    pub fn from_pem(pem: &[u8]) -> Result<Self, KeyError> {
        let pkey = PKey::private_key_from_pem(pem).map_err(|e| KeyError::Parse(e.to_string()))?;
        if pkey.id() != Id::RSA {
            return Err(KeyError::UnsupportedKeyType(pkey.id()));
        }
        Ok(Self { pkey })
    }

    /// Serialize the private key as PKCS#8 PEM
    pub fn to_pem(&self) -> Result<Vec<u8>, KeyError> {
        Ok(self.pkey.private_key_to_pem_pkcs8()?)
    }

    /// Serialize the private key as a PEM string
    pub fn to_pem_string(&self) -> Result<String, KeyError> {
        let pem = self.to_pem()?;
        Ok(String::from_utf8_lossy(&pem).into_owned())
    }

    /// Key size in bits
    pub fn bits(&self) -> u32 {
        self.pkey.bits()
    }

    pub fn pkey(&self) -> &PKey<Private> {
        &self.pkey
    }

    /// Public half of the key as a JSON Web Key
    pub fn jwk(&self) -> Result<Jwk, KeyError> {
        let rsa = self.pkey.rsa()?;
        Ok(Jwk {
            e: URL_SAFE_NO_PAD.encode(rsa.e().to_vec()),
            kty: "RSA",
            n: URL_SAFE_NO_PAD.encode(rsa.n().to_vec()),
        })
    }

    /// HTTP-01 key authorization for `token`
    pub fn key_authorization(&self, token: &str) -> Result<String, KeyError> {
        Ok(self.jwk()?.key_authorization(token))
    }

    /// Sign `data` with RSASSA-PKCS1-v1_5 using SHA-256 (JWS `RS256`)
    pub fn sign_rs256(&self, data: &[u8]) -> Result<Vec<u8>, KeyError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.pkey)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

/// RSA public key in JWK form
///
/// Fields are declared in lexicographic order so the serialized form is the
/// RFC 7638 canonical input for the thumbprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Jwk {
    pub e: String,
    pub kty: &'static str,
    pub n: String,
}

impl Jwk {
    /// Base64url SHA-256 thumbprint (RFC 7638)
    pub fn thumbprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(Sha256::digest(&canonical))
    }

    pub fn key_authorization(&self, token: &str) -> String {
        format!("{}.{}", token, self.thumbprint())
    }
}
