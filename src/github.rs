use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::GitHubConfig;
use crate::source::{
    Credential, GatewayError, Issue, IssueSource, IssueSourceFactory, RateLimit, Repository,
    SourcePage, SourceStatus,
};

const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// GitHub REST client bound to one user's token
pub struct GitHubGateway {
    http: Client,
    base_url: String,
    credential: Credential,
}

impl GitHubGateway {
    /// Create a gateway with its own HTTP client
    pub fn new(config: &GitHubConfig, credential: Credential) -> Result<Self, GatewayError> {
        Ok(Self::with_client(build_http_client(config)?, config, credential))
    }

    /// Create a gateway that shares an existing HTTP client
    pub fn with_client(http: Client, config: &GitHubConfig, credential: Credential) -> Self {
        Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            credential,
        }
    }

    async fn send(&self, path: &str, query: &[(&str, String)]) -> Result<Response, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);

        self.http
            .get(&url)
            .query(query)
            .header(AUTHORIZATION, format!("Bearer {}", self.credential.expose()))
            .header(ACCEPT, "application/vnd.github+json")
            .header(API_VERSION_HEADER, API_VERSION)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<SourcePage<T>, GatewayError> {
        let response = self.send(path, query).await?;
        let rate_limit = parse_rate_limit(response.headers());

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::status(
                SourceStatus::from_code(status.as_u16()),
                rate_limit,
            ));
        }

        let items = response
            .json::<Vec<T>>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(SourcePage::new(items, rate_limit))
    }
}

fn page_query(page: u32, per_page: u32) -> Vec<(&'static str, String)> {
    vec![("page", page.to_string()), ("per_page", per_page.to_string())]
}

/// Read the rate limit headers; `None` when either is missing or malformed
pub fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimit> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let remaining = header(RATE_LIMIT_REMAINING)?.trim().parse::<u32>().ok()?;
    let reset_secs = header(RATE_LIMIT_RESET)?.trim().parse::<i64>().ok()?;
    let reset_at = DateTime::<Utc>::from_timestamp(reset_secs, 0)?;

    Some(RateLimit {
        remaining,
        reset_at,
    })
}

fn build_http_client(config: &GitHubConfig) -> Result<Client, GatewayError> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.request_timeout))
        .build()
        .map_err(|e| GatewayError::Transport(format!("failed to create HTTP client: {}", e)))
}

#[async_trait]
impl IssueSource for GitHubGateway {
    async fn list_assigned_issues(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<SourcePage<Issue>, GatewayError> {
        let mut query = page_query(page, per_page);
        query.push(("state", "open".to_string()));
        self.get_page("/issues", &query).await
    }

    async fn list_repository_issues(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<SourcePage<Issue>, GatewayError> {
        let mut query = page_query(page, per_page);
        query.push(("state", "open".to_string()));
        self.get_page(&format!("/repos/{}/{}/issues", owner, repo), &query)
            .await
    }

    async fn list_user_repositories(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<SourcePage<Repository>, GatewayError> {
        let mut query = page_query(page, per_page);
        query.push((
            "affiliation",
            "owner,collaborator,organization_member".to_string(),
        ));
        self.get_page("/user/repos", &query).await
    }

    async fn list_repositories_of(
        &self,
        username: &str,
        page: u32,
        per_page: u32,
    ) -> Result<SourcePage<Repository>, GatewayError> {
        let mut query = page_query(page, per_page);
        query.push(("type", "all".to_string()));
        self.get_page(&format!("/users/{}/repos", username), &query)
            .await
    }

    async fn validate_credential(&self) -> Result<(), GatewayError> {
        let response = self.send("/user", &[]).await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(GatewayError::status(
                SourceStatus::from_code(status.as_u16()),
                parse_rate_limit(response.headers()),
            ))
        }
    }
}

/// Hands out [`GitHubGateway`]s that share one connection pool
#[derive(Clone)]
pub struct GitHubGatewayFactory {
    http: Client,
    config: GitHubConfig,
}

impl GitHubGatewayFactory {
    pub fn new(config: &GitHubConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            http: build_http_client(config)?,
            config: config.clone(),
        })
    }
}

impl IssueSourceFactory for GitHubGatewayFactory {
    fn connect(&self, credential: &Credential) -> Result<Arc<dyn IssueSource>, GatewayError> {
        let gateway = GitHubGateway::with_client(self.http.clone(), &self.config, credential.clone());
        Ok(Arc::new(gateway))
    }
}
