//! Issue source abstraction layer
//!
//! This module describes what the collector needs from an issue tracker:
//! page-at-a-time listing of issues and repositories, credential validation,
//! and a rate limit snapshot per response. [`crate::github`] provides the
//! GitHub REST implementation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An issue as returned by the source
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(rename = "html_url")]
    pub url: String,
    pub state: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub assignees: Vec<User>,
    /// Owning repository; repository-scoped endpoints omit it
    #[serde(default)]
    pub repository: Option<RepositoryRef>,
}

impl Issue {
    /// Full name (`owner/repo`) of the owning repository, when known
    pub fn repository_full_name(&self) -> Option<&str> {
        self.repository.as_ref().map(|r| r.full_name.as_str())
    }

    /// Fill in the owning repository if the source left it out
    pub fn annotate_repository(&mut self, full_name: &str) {
        if self.repository.is_none() {
            self.repository = Some(RepositoryRef {
                full_name: full_name.to_string(),
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepositoryRef {
    pub full_name: String,
}

/// A repository entry from a repository listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Repository {
    pub full_name: String,
}

impl Repository {
    /// Split `owner/repo` into its two segments
    pub fn owner_and_name(&self) -> Option<(&str, &str)> {
        self.full_name.split_once('/')
    }
}

/// Remaining-call count and reset time reported on a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimit {
    /// Whether the remaining budget is at or below `threshold`
    pub fn is_low(&self, threshold: u32) -> bool {
        self.remaining <= threshold
    }
}

/// One page of results plus the rate limit observed on that response
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePage<T> {
    pub items: Vec<T>,
    pub rate_limit: Option<RateLimit>,
}

impl<T> SourcePage<T> {
    pub fn new(items: Vec<T>, rate_limit: Option<RateLimit>) -> Self {
        Self { items, rate_limit }
    }
}

/// Classification of a non-success response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Unauthorized,
    Forbidden,
    NotFound,
    Unprocessable,
    Other(u16),
}

impl SourceStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            401 => SourceStatus::Unauthorized,
            403 => SourceStatus::Forbidden,
            404 => SourceStatus::NotFound,
            422 => SourceStatus::Unprocessable,
            other => SourceStatus::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            SourceStatus::Unauthorized => 401,
            SourceStatus::Forbidden => 403,
            SourceStatus::NotFound => 404,
            SourceStatus::Unprocessable => 422,
            SourceStatus::Other(code) => *code,
        }
    }

    /// Human-readable explanation shown to the user
    pub fn message(&self) -> &'static str {
        match self {
            SourceStatus::Unauthorized => {
                "Authentication failed. The token is invalid or has expired."
            }
            SourceStatus::Forbidden => "Access denied. Check the token's permissions.",
            SourceStatus::NotFound => "Resource not found.",
            SourceStatus::Unprocessable => "The request could not be processed.",
            SourceStatus::Other(_) => "An unexpected error occurred.",
        }
    }
}

/// Failure talking to the issue source
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The source answered with a non-success status
    #[error("GitHub API error: {} - {message}", .status.code())]
    Status {
        status: SourceStatus,
        message: String,
        rate_limit: Option<RateLimit>,
    },

    /// The request never produced a response
    #[error("request to GitHub failed: {0}")]
    Transport(String),

    /// The response body could not be decoded
    #[error("failed to decode GitHub response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn status(status: SourceStatus, rate_limit: Option<RateLimit>) -> Self {
        GatewayError::Status {
            status,
            message: status.message().to_string(),
            rate_limit,
        }
    }

    /// Status classification, if the source answered at all
    pub fn source_status(&self) -> Option<SourceStatus> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A decrypted API credential
///
/// `Debug` is redacted so the token never reaches logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Paginated access to an issue tracker on behalf of one credential
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IssueSource: Send + Sync {
    /// Open issues assigned to the credential's owner
    async fn list_assigned_issues(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<SourcePage<Issue>, GatewayError>;

    /// Open issues of one repository
    async fn list_repository_issues(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<SourcePage<Issue>, GatewayError>;

    /// Repositories visible to the credential's owner
    async fn list_user_repositories(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<SourcePage<Repository>, GatewayError>;

    /// Repositories of another user
    async fn list_repositories_of(
        &self,
        username: &str,
        page: u32,
        per_page: u32,
    ) -> Result<SourcePage<Repository>, GatewayError>;

    /// Check that the credential is accepted
    async fn validate_credential(&self) -> Result<(), GatewayError>;
}

/// Builds an [`IssueSource`] bound to a credential
pub trait IssueSourceFactory: Send + Sync {
    fn connect(&self, credential: &Credential) -> Result<Arc<dyn IssueSource>, GatewayError>;
}
