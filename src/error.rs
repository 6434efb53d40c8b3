//! Error types shared by the settings and collection layers

use std::time::Duration;

use thiserror::Error;

use crate::crypto::CipherError;
use crate::source::GatewayError;
use crate::state::StoreError;

/// Operation-level error for settings resolution and issue collection
///
/// Per-repository failures during a fan-out fetch never surface here; they
/// are collected into [`crate::collector::FetchResult::failed_repos`].
#[derive(Debug, Error)]
pub enum Error {
    /// No usable credential for the identity (never set, or undecryptable)
    #[error("no credential registered for this user")]
    CredentialNotFound,

    /// Underlying persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A load-bearing request to the issue source failed
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A proposed exclusion pattern was rejected; nothing was saved
    #[error("invalid exclusion pattern: {0:?} (expected owner/repo, owner/* or owner)")]
    InvalidExclusionPattern(String),

    /// Encrypting a credential for storage failed
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// The issues target was neither `all`, a username, nor `owner/repo`
    #[error("invalid repository target: {0:?} (expected owner/repo, a username, or all)")]
    InvalidRepositoryTarget(String),

    /// The operation did not finish within its deadline
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
