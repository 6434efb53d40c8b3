//! issuebridge - GitHub issue retrieval for chat communities
//!
//! issuebridge stores a GitHub token per chat user, merges the settings that
//! user has accumulated across channels, and collects open issues from
//! GitHub while honoring per-purpose repository exclusions.
//!
//! ## Core Features
//!
//! - **Settings resolution**: Several stored records per user are folded into one effective view
//! - **Exclusion patterns**: `owner/repo`, `owner/*` and bare `owner` rules
//! - **Issue collection**: Paginated fetches with partial-failure reporting across repositories
//! - **Credential encryption**: Tokens are sealed before they reach the database
//!
//! ## Modules
//!
//! - [`settings`]: Settings fold, persistence contract and resolver
//! - [`collector`]: Pagination and the fetch operations
//! - [`exclusion`]: Exclusion pattern matching and validation
//! - [`github`]: GitHub REST gateway
//! - [`state`]: SQLite settings store
//! - [`config`]: Configuration management and parsing

pub mod collector;
pub mod config;
pub mod crypto;
pub mod error;
pub mod exclusion;
pub mod github;
pub mod settings;
pub mod source;
pub mod state;

pub use collector::{FetchOptions, FetchResult, IssueCollector, RepositoryTarget};
pub use config::Config;
pub use crypto::{Cipher, TokenCipher};
pub use error::{Error, Result};
pub use github::{GitHubGateway, GitHubGatewayFactory};
pub use settings::{CredentialStore, EffectiveSettings, Identity, Purpose, SettingsResolver};
pub use source::{Credential, Issue, IssueSource, IssueSourceFactory, RateLimit};
pub use state::SqliteCredentialStore;
