//! Account registration
//!
//! Registration is idempotent from the caller's point of view: a key that
//! already has an account is reused instead of failing the run.

use crate::directory::{Directory, NewRegistration};
use crate::error::{IssueError, Result};
use tracing::{debug, info};

/// Whether the account was created by this call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountStatus {
    Created { uri: String },
    Existing,
}

/// Registration behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountPolicy {
    /// Agree to the CA's terms of service after creating an account
    pub auto_agree_tos: bool,
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self {
            auto_agree_tos: true,
        }
    }
}

/// Register the directory's account key, or accept the existing account
pub async fn register_or_reuse(
    directory: &dyn Directory,
    email: Option<&str>,
    policy: AccountPolicy,
) -> Result<AccountStatus> {
    let request = NewRegistration::from_email(email, policy.auto_agree_tos);

    let registration = match directory.register(&request).await {
        Ok(registration) => registration,
        Err(e) if e.detail().is_some_and(|d| d.contains("already in use")) => {
            debug!("Account already registered, reusing it");
            return Ok(AccountStatus::Existing);
        }
        Err(e) => return Err(IssueError::Registration(e)),
    };

    if policy.auto_agree_tos {
        if let Some(terms) = &registration.terms_of_service {
            info!(terms = %terms, "Agreeing to terms of service");
        }
        directory
            .agree_to_tos(&registration)
            .await
            .map_err(IssueError::Registration)?;
    }

    Ok(AccountStatus::Created {
        uri: registration.uri,
    })
}
