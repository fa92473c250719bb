//! Core of certhop: obtain certificates from an ACME CA by proving control
//! of each domain with HTTP-01 challenges.
//!
//! The pieces are wired together by [`AcmeClient`]:
//!
//! - [`directory`] talks to the CA ([`HttpDirectory`] speaks RFC 8555)
//! - [`account`] registers or reuses the account key
//! - [`challenge`] validates domains concurrently, publishing each key
//!   authorization to a [`ChallengeStore`] for exactly as long as needed
//! - [`issuance`] builds the signing request and waits for the certificate
//! - [`responder`] serves published responses over HTTP

pub mod account;
pub mod challenge;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod issuance;
pub mod keys;
pub mod responder;
pub mod store;

pub use account::{AccountPolicy, AccountStatus};
pub use challenge::{HttpSelfCheck, SelfCheck, StoreSelfCheck};
pub use client::AcmeClient;
pub use config::{AcmeSettings, Configuration, StoreConfig};
pub use directory::{Directory, DirectoryError, HttpDirectory};
pub use error::{IssueError, Stage};
pub use issuance::IssuedCertificate;
pub use keys::KeyPair;
pub use store::{ChallengeStore, MemoryStore, StoreError, WebrootStore};
