//! Common test utilities and helpers for issuebridge tests
#![allow(dead_code)]

use std::sync::Arc;

use issuebridge::config::GitHubConfig;
use issuebridge::{
    FetchOptions, GitHubGatewayFactory, Identity, IssueCollector, SettingsResolver,
    SqliteCredentialStore, TokenCipher,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "ghp_integration_token";
pub const CHANNEL: &str = "channel-1";

/// Settings store, cipher and gateway wired against a mock GitHub server
pub struct TestEnvironment {
    pub server: MockServer,
    pub resolver: SettingsResolver,
    pub sources: Arc<GitHubGatewayFactory>,
    pub identity: Identity,
}

impl TestEnvironment {
    pub async fn new() -> Self {
        let server = MockServer::start().await;
        let store = SqliteCredentialStore::open_in_memory().expect("Failed to open store");
        let cipher = TokenCipher::from_secret("integration-secret").expect("Failed to build cipher");
        let sources = Arc::new(
            GitHubGatewayFactory::new(&github_config(&server)).expect("Failed to build factory"),
        );

        Self {
            server,
            resolver: SettingsResolver::new(Arc::new(store), Arc::new(cipher)),
            sources,
            identity: Identity::new("guild-1", "user-1"),
        }
    }

    pub fn collector(&self, page_size: u32) -> IssueCollector {
        IssueCollector::new(
            self.sources.clone(),
            FetchOptions {
                page_size,
                ..FetchOptions::default()
            },
        )
    }

    /// Store the token directly, skipping validation
    pub fn with_token(self) -> Self {
        self.resolver
            .save_credential(&self.identity, CHANNEL, TOKEN)
            .expect("Failed to save credential");
        self
    }
}

pub fn github_config(server: &MockServer) -> GitHubConfig {
    GitHubConfig {
        api_base_url: server.uri(),
        ..GitHubConfig::default()
    }
}

pub fn issue_json(number: u64, title: &str, repository: Option<&str>) -> Value {
    let mut issue = json!({
        "number": number,
        "title": title,
        "html_url": format!("https://github.com/example/issues/{}", number),
        "state": "open",
        "updated_at": "2025-03-01T12:00:00Z",
        "labels": [{"name": "bug", "color": "d73a4a"}],
        "assignees": [{"login": "octocat"}]
    });
    if let Some(full_name) = repository {
        issue["repository"] = json!({ "full_name": full_name });
    }
    issue
}

pub fn repo_json(full_name: &str) -> Value {
    json!({ "full_name": full_name, "private": false })
}

/// 200 response carrying a JSON body and rate limit headers
pub fn github_response(body: Value, remaining: u32) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(body)
        .insert_header("x-ratelimit-remaining", remaining.to_string().as_str())
        .insert_header("x-ratelimit-reset", "1700000000")
}

pub async fn mount_repository_listing(server: &MockServer, repositories: &[&str]) {
    let body = Value::Array(repositories.iter().map(|name| repo_json(name)).collect());
    Mock::given(method("GET"))
        .and(path("/user/repos"))
        .and(query_param("page", "1"))
        .respond_with(github_response(body, 4999))
        .mount(server)
        .await;
}

pub async fn mount_repository_issues(server: &MockServer, full_name: &str, issues: Value, remaining: u32) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/issues", full_name)))
        .and(query_param("page", "1"))
        .respond_with(github_response(issues, remaining))
        .mount(server)
        .await;
}
