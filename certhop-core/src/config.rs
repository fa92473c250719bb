//! Configuration record and runtime settings
//!
//! The configuration record is produced once by `certhop create-key` and
//! holds everything an issuance run needs: the contact email, the PEM account
//! key, the credentials of the challenge store backend and the domains.

use crate::directory::{LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING};
use crate::keys::{DEFAULT_KEY_BITS, KeyError, KeyPair};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to write file {0}: {1}")]
    FileWrite(PathBuf, std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid store configuration: {0}")]
    Store(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid account key: {0}")]
    Key(#[from] KeyError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Persisted configuration record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Contact address registered with the CA
    #[serde(default)]
    pub email: Option<String>,
    /// PEM-encoded RSA account key
    pub acme_account_key: String,
    /// Opaque credentials for the challenge store backend
    #[serde(default, alias = "google_credentials")]
    pub store: serde_json::Value,
    /// Domains in certificate order; the first becomes the subject CN
    pub domains: Vec<String>,
}

impl Configuration {
    /// Build a new record with a freshly generated account key
    pub fn generate(
        email: Option<String>,
        store: serde_json::Value,
        domains: Vec<String>,
    ) -> Result<Self> {
        let account_key = KeyPair::generate_rsa(DEFAULT_KEY_BITS)?;
        Ok(Self {
            email,
            acme_account_key: account_key.to_pem_string()?,
            store,
            domains,
        })
    }

    /// Load a configuration record from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the record as pretty JSON, readable by the owner only
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_json_pretty()?;
        write_private(path, content.as_bytes())
            .map_err(|e| ConfigError::FileWrite(path.to_path_buf(), e))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.acme_account_key.trim().is_empty() {
            return Err(ConfigError::Validation(
                "acme_account_key must not be empty".to_string(),
            ));
        }
        if let Some(email) = &self.email
            && !email.contains('@')
        {
            return Err(ConfigError::Validation(format!(
                "invalid email address '{}'",
                email
            )));
        }
        Ok(())
    }

    /// Parse the account key
    pub fn account_key(&self) -> Result<KeyPair> {
        Ok(KeyPair::from_pem(self.acme_account_key.as_bytes())?)
    }

    /// Interpret the opaque store credentials
    pub fn store_config(&self) -> Result<StoreConfig> {
        if self.store.is_null() {
            return Ok(StoreConfig::default());
        }
        serde_json::from_value(self.store.clone()).map_err(|e| ConfigError::Store(e.to_string()))
    }
}

/// Challenge store backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Keep responses in memory and serve them from this process
    Memory {
        #[serde(default = "default_listen")]
        listen: String,
    },
    /// Write responses below a document root served by another process
    Webroot { path: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:80".to_string()
}

/// Runtime settings for talking to the CA
#[derive(Debug, Clone)]
pub struct AcmeSettings {
    /// Use Let's Encrypt staging
    pub staging: bool,
    /// Explicit directory URL, overrides `staging`
    pub directory_url: Option<String>,
    /// Timeout for each HTTP request
    pub request_timeout: Duration,
    /// Delay between issuance status checks
    pub poll_interval: Duration,
    /// Authorization checks after answering a challenge
    pub verify_attempts: u32,
    /// Delay between authorization checks
    pub verify_interval: Duration,
    /// Domains validated at the same time
    pub max_concurrent_validations: usize,
    /// Agree to the CA's terms of service without asking
    pub auto_agree_tos: bool,
    /// Size of generated certificate keys
    pub key_bits: u32,
}

impl Default for AcmeSettings {
    fn default() -> Self {
        Self {
            staging: true,
            directory_url: None,
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            verify_attempts: 30,
            verify_interval: Duration::from_secs(2),
            max_concurrent_validations: 4,
            auto_agree_tos: true,
            key_bits: DEFAULT_KEY_BITS,
        }
    }
}

impl AcmeSettings {
    /// Get the ACME directory URL
    pub fn directory_url(&self) -> String {
        match &self.directory_url {
            Some(url) => url.clone(),
            None if self.staging => LETSENCRYPT_STAGING.to_string(),
            None => LETSENCRYPT_PRODUCTION.to_string(),
        }
    }
}

/// Write `content` to a file only its owner can read
///
/// A new file is created with mode 0600; an existing one is truncated and
/// narrowed to 0600 before anything is written to it.
pub fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    std::os::unix::fs::OpenOptionsExt::mode(&mut options, 0o600);

    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(content)?;
    file.flush()
}
