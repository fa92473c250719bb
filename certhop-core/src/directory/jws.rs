//! Flattened JWS envelopes for ACME requests (RFC 8555 §6.2)

use crate::keys::{Jwk, KeyError, KeyPair};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Serialize;

/// How the request identifies the signing key
pub(crate) enum KeyId<'a> {
    /// Embedded public key, used before the account URL is known
    Jwk(Jwk),
    /// Account URL
    Kid(&'a str),
}

#[derive(Serialize)]
struct Protected<'a> {
    alg: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
    nonce: &'a str,
    url: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct Jws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

/// Sign `payload` for `url`; `None` produces a POST-as-GET body
pub(crate) fn sign(
    key: &KeyPair,
    key_id: KeyId<'_>,
    nonce: &str,
    url: &str,
    payload: Option<&serde_json::Value>,
) -> Result<Jws, KeyError> {
    let (jwk, kid) = match key_id {
        KeyId::Jwk(jwk) => (Some(jwk), None),
        KeyId::Kid(kid) => (None, Some(kid)),
    };
    let protected = Protected {
        alg: "RS256",
        jwk,
        kid,
        nonce,
        url,
    };

    let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected).unwrap_or_default());
    let payload = match payload {
        Some(value) => URL_SAFE_NO_PAD.encode(value.to_string()),
        None => String::new(),
    };

    let signing_input = format!("{}.{}", protected, payload);
    let signature = URL_SAFE_NO_PAD.encode(key.sign_rs256(signing_input.as_bytes())?);

    Ok(Jws {
        protected,
        payload,
        signature,
    })
}
