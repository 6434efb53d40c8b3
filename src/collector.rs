//! Issue collection
//!
//! Every paginated call goes through [`paginate`]: pages are requested from 1
//! with a fixed size until a short page comes back, and the rate limit of the
//! latest page wins. Fan-out fetches list repositories first, then collect
//! each repository's issues, recording per-repository failures instead of
//! aborting.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::exclusion;
use crate::settings::{EffectiveSettings, Purpose};
use crate::source::{
    GatewayError, Issue, IssueSource, IssueSourceFactory, RateLimit, Repository, SourcePage,
};

/// Knobs shared by every fetch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub page_size: u32,
    pub max_pages: u32,
    pub timeout: Duration,
    /// Repositories fetched concurrently during a fan-out
    pub max_parallel: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 255,
            timeout: Duration::from_secs(30),
            max_parallel: 1,
        }
    }
}

impl From<&Config> for FetchOptions {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.github.page_size,
            max_pages: config.github.max_pages,
            timeout: config.fetch_timeout(),
            max_parallel: config.fetch.max_parallel.max(1),
        }
    }
}

/// Drive a page-at-a-time call until the source runs dry
///
/// A page shorter than `page_size` ends the loop, so a final page that is
/// exactly full stops one request early. At most `max_pages` pages are read.
pub async fn paginate<T, F, Fut>(
    page_size: u32,
    max_pages: u32,
    mut fetch_page: F,
) -> std::result::Result<SourcePage<T>, GatewayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<SourcePage<T>, GatewayError>>,
{
    let mut items = Vec::new();
    let mut rate_limit = None;
    let mut page = 1;

    loop {
        let batch = fetch_page(page).await?;
        let count = batch.items.len();
        debug!("Fetched page {} ({} items)", page, count);

        if batch.rate_limit.is_some() {
            rate_limit = batch.rate_limit;
        }
        items.extend(batch.items);

        if count < page_size as usize {
            break;
        }
        if page >= max_pages {
            warn!(
                "Stopped after {} pages; results may be incomplete",
                max_pages
            );
            break;
        }
        page += 1;
    }

    Ok(SourcePage::new(items, rate_limit))
}

/// A repository whose issues could not be fetched during a fan-out
#[derive(Debug, Clone)]
pub struct RepositoryFailure {
    pub repository: String,
    pub cause: GatewayError,
}

/// Outcome of a fetch operation
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub issues: Vec<Issue>,
    pub rate_limit: Option<RateLimit>,
    pub failed_repos: Vec<RepositoryFailure>,
}

impl FetchResult {
    fn from_page(page: SourcePage<Issue>) -> Self {
        Self {
            issues: page.items,
            rate_limit: page.rate_limit,
            failed_repos: Vec::new(),
        }
    }

    fn observe_rate_limit(&mut self, rate_limit: Option<RateLimit>) {
        if rate_limit.is_some() {
            self.rate_limit = rate_limit;
        }
    }

    fn absorb(&mut self, repository: &str, page: SourcePage<Issue>) {
        self.observe_rate_limit(page.rate_limit);
        self.issues.extend(page.items.into_iter().map(|mut issue| {
            issue.annotate_repository(repository);
            issue
        }));
    }

    fn record_failure(&mut self, repository: String, cause: GatewayError) {
        warn!("Failed to fetch issues for {}: {}", repository, cause);
        self.failed_repos.push(RepositoryFailure { repository, cause });
    }

    pub fn is_partial(&self) -> bool {
        !self.failed_repos.is_empty()
    }

    pub fn failed_repository_names(&self) -> Vec<&str> {
        self.failed_repos
            .iter()
            .map(|f| f.repository.as_str())
            .collect()
    }
}

/// What the `issues` command should fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryTarget {
    /// Every repository visible to the credential's owner
    All,
    /// Every repository of another user
    User(String),
    /// A single repository
    Repository { owner: String, repo: String },
}

impl RepositoryTarget {
    /// Parse `all`, `username` or `owner/repo`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.eq_ignore_ascii_case("all") {
            return Ok(RepositoryTarget::All);
        }

        let parts: Vec<&str> = input.split('/').collect();
        match parts.as_slice() {
            [username] if !username.is_empty() => Ok(RepositoryTarget::User(username.to_string())),
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
                Ok(RepositoryTarget::Repository {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                })
            }
            _ => Err(Error::InvalidRepositoryTarget(input.to_string())),
        }
    }
}

#[derive(Clone, Copy)]
enum Listing<'a> {
    Own,
    User(&'a str),
}

struct RepositoryTask {
    full_name: String,
    owner: String,
    name: String,
}

/// Fetches issues on behalf of a resolved user
pub struct IssueCollector {
    sources: Arc<dyn IssueSourceFactory>,
    options: FetchOptions,
}

impl IssueCollector {
    pub fn new(sources: Arc<dyn IssueSourceFactory>, options: FetchOptions) -> Self {
        Self { sources, options }
    }

    fn connect(&self, settings: &EffectiveSettings) -> Result<Arc<dyn IssueSource>> {
        let credential = settings.require_credential()?;
        Ok(self.sources.connect(credential)?)
    }

    async fn bounded<T>(&self, operation: &str, work: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.options.timeout, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("{} timed out after {:?}", operation, self.options.timeout);
                Err(Error::TimedOut(self.options.timeout))
            }
        }
    }

    /// Open issues assigned to the user, minus excluded repositories
    pub async fn fetch_assigned(&self, settings: &EffectiveSettings) -> Result<FetchResult> {
        let source = self.connect(settings)?;
        let excluded = settings.excluded_repos(Purpose::Assign);
        let FetchOptions {
            page_size,
            max_pages,
            ..
        } = self.options;

        self.bounded("Assigned issue fetch", async {
            let page = paginate(page_size, max_pages, |page| {
                source.list_assigned_issues(page, page_size)
            })
            .await?;

            let mut result = FetchResult::from_page(page);
            let before = result.issues.len();
            result.issues.retain(|issue| {
                issue
                    .repository_full_name()
                    .map_or(true, |name| !exclusion::is_excluded(name, excluded))
            });

            info!(
                "Fetched {} assigned issues for {} ({} excluded)",
                result.issues.len(),
                settings.identity,
                before - result.issues.len()
            );
            Ok(result)
        })
        .await
    }

    /// Open issues of one repository; exclusions do not apply
    pub async fn fetch_repository(
        &self,
        settings: &EffectiveSettings,
        owner: &str,
        repo: &str,
    ) -> Result<FetchResult> {
        let source = self.connect(settings)?;
        let FetchOptions {
            page_size,
            max_pages,
            ..
        } = self.options;
        let full_name = format!("{}/{}", owner, repo);

        self.bounded("Repository issue fetch", async {
            let page = paginate(page_size, max_pages, |page| {
                source.list_repository_issues(owner, repo, page, page_size)
            })
            .await?;

            let mut result = FetchResult::default();
            result.absorb(&full_name, page);

            info!("Fetched {} issues from {}", result.issues.len(), full_name);
            Ok(result)
        })
        .await
    }

    /// Issues across every repository the user can see
    pub async fn fetch_all_own(&self, settings: &EffectiveSettings) -> Result<FetchResult> {
        self.fetch_fan_out(settings, Listing::Own).await
    }

    /// Issues across every repository of `username`
    pub async fn fetch_for_other_user(
        &self,
        settings: &EffectiveSettings,
        username: &str,
    ) -> Result<FetchResult> {
        self.fetch_fan_out(settings, Listing::User(username)).await
    }

    /// Dispatch a parsed `issues` target
    pub async fn fetch_target(
        &self,
        settings: &EffectiveSettings,
        target: &RepositoryTarget,
    ) -> Result<FetchResult> {
        match target {
            RepositoryTarget::All => self.fetch_all_own(settings).await,
            RepositoryTarget::User(username) => self.fetch_for_other_user(settings, username).await,
            RepositoryTarget::Repository { owner, repo } => {
                self.fetch_repository(settings, owner, repo).await
            }
        }
    }

    async fn fetch_fan_out(
        &self,
        settings: &EffectiveSettings,
        listing: Listing<'_>,
    ) -> Result<FetchResult> {
        let source = self.connect(settings)?;
        let excluded = settings.excluded_repos(Purpose::Issues);
        let FetchOptions {
            page_size,
            max_pages,
            max_parallel,
            ..
        } = self.options;

        self.bounded("Repository fan-out", async {
            let repositories = paginate(page_size, max_pages, |page| match listing {
                Listing::Own => source.list_user_repositories(page, page_size),
                Listing::User(username) => source.list_repositories_of(username, page, page_size),
            })
            .await?;

            let mut result = FetchResult {
                rate_limit: repositories.rate_limit,
                ..FetchResult::default()
            };
            let tasks = repository_tasks(repositories.items, excluded);
            let task_count = tasks.len();

            let source = source.as_ref();
            let outcomes: Vec<_> = stream::iter(tasks)
                .map(|task| async move {
                    let outcome = paginate(page_size, max_pages, |page| {
                        source.list_repository_issues(&task.owner, &task.name, page, page_size)
                    })
                    .await;
                    (task.full_name, outcome)
                })
                .buffered(max_parallel.max(1))
                .collect()
                .await;

            for (full_name, outcome) in outcomes {
                match outcome {
                    Ok(page) => result.absorb(&full_name, page),
                    Err(cause) => result.record_failure(full_name, cause),
                }
            }

            info!(
                "Fetched {} issues from {} repositories for {} ({} failed)",
                result.issues.len(),
                task_count,
                settings.identity,
                result.failed_repos.len()
            );
            Ok(result)
        })
        .await
    }
}

fn repository_tasks(repositories: Vec<Repository>, excluded: &[String]) -> Vec<RepositoryTask> {
    repositories
        .into_iter()
        .filter_map(|repository| {
            if exclusion::is_excluded(&repository.full_name, excluded) {
                debug!("Skipping excluded repository {}", repository.full_name);
                return None;
            }
            let Some((owner, name)) = repository.owner_and_name() else {
                warn!("Skipping malformed repository name {:?}", repository.full_name);
                return None;
            };
            Some(RepositoryTask {
                owner: owner.to_string(),
                name: name.to_string(),
                full_name: repository.full_name.clone(),
            })
        })
        .collect()
}
