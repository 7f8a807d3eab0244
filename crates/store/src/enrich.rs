//! Repository statistics for published modules
//!
//! Enrichment is best effort. A provider failure turns into a warning on the build report and
//! the manifest is published with whatever stats it already had.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use madmin_types::{Changelog, ModuleStats};

use crate::error::Result;

/// Longest changelog entry kept per release, in characters.
pub const CHANGELOG_ENTRY_LIMIT: usize = 500;
/// Number of most recent releases that contribute changelog entries.
pub const CHANGELOG_RELEASES: usize = 5;

/// Whatever a provider could find out. Missing values leave the current stats untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryStats {
    pub version: Option<String>,
    pub stars: Option<u64>,
    pub downloads: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub changelog: Changelog,
}

impl RepositoryStats {
    pub fn apply_to(self, stats: &mut ModuleStats) {
        if let Some(version) = self.version.filter(|v| !v.is_empty()) {
            stats.version = version;
        }
        if let Some(stars) = self.stars {
            stats.stars = stars;
        }
        if let Some(downloads) = self.downloads {
            stats.downloads = downloads;
        }
        if self.updated_at.is_some() {
            stats.updated_at = self.updated_at;
        }
        if !self.changelog.is_empty() {
            stats.changelog = self.changelog;
        }
    }
}

#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// `Ok(None)` means the provider does not handle this repository.
    async fn fetch_stats(&self, repository: &Url) -> Result<Option<RepositoryStats>>;
}

/// Owner and repository name of a GitHub URL.
pub fn github_repo_slug(repository: &Url) -> Option<(String, String)> {
    let host = repository.host_str()?;
    if !host.eq_ignore_ascii_case("github.com") && !host.eq_ignore_ascii_case("www.github.com") {
        return None;
    }

    let mut segments = repository.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

/// Cut `body` down to at most [`CHANGELOG_ENTRY_LIMIT`] characters.
pub fn truncate_changelog(body: &str) -> String {
    match body.char_indices().nth(CHANGELOG_ENTRY_LIMIT) {
        Some((end, _)) => body[..end].to_string(),
        None => body.to_string(),
    }
}

#[cfg(feature = "github")]
pub use github::GithubStatsProvider;

#[cfg(feature = "github")]
mod github {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
    use serde::Deserialize;
    use url::Url;

    use super::{
        CHANGELOG_RELEASES, RepositoryStats, StatsProvider, github_repo_slug, truncate_changelog,
    };
    use crate::error::{Result, StoreError};

    const API_BASE: &str = "https://api.github.com";

    #[derive(Debug, Deserialize)]
    struct RepoInfo {
        #[serde(default)]
        stargazers_count: u64,
        pushed_at: Option<DateTime<Utc>>,
    }

    #[derive(Debug, Deserialize)]
    struct Release {
        tag_name: String,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        assets: Vec<Asset>,
    }

    #[derive(Debug, Deserialize)]
    struct Asset {
        #[serde(default)]
        download_count: u64,
    }

    impl RepositoryStats {
        /// Version, changelog and downloads from a release listing, newest release first.
        fn merge_releases(&mut self, releases: &[Release]) {
            let Some(latest) = releases.first() else {
                return;
            };
            self.version = Some(latest.tag_name.trim_start_matches('v').to_string());
            self.changelog = releases
                .iter()
                .take(CHANGELOG_RELEASES)
                .map(|r| {
                    (
                        r.tag_name.clone(),
                        truncate_changelog(r.body.as_deref().unwrap_or_default()),
                    )
                })
                .collect();
            self.downloads = Some(
                releases
                    .iter()
                    .flat_map(|r| &r.assets)
                    .map(|a| a.download_count)
                    .sum(),
            );
        }
    }

    /// Reads stars, releases and download counts from the GitHub REST API.
    /// The repository and release requests succeed or fail independently.
    pub struct GithubStatsProvider {
        client: reqwest::Client,
        api_base: String,
    }

    impl GithubStatsProvider {
        pub fn new(token: Option<&str>) -> Result<Self> {
            let mut headers = HeaderMap::new();
            headers.insert(
                ACCEPT,
                HeaderValue::from_static("application/vnd.github.v3+json"),
            );
            headers.insert(USER_AGENT, HeaderValue::from_static("madmin-registry"));
            if let Some(token) = token.filter(|t| !t.is_empty()) {
                let value = HeaderValue::from_str(&format!("token {}", token))
                    .map_err(|e| StoreError::ConfigError(format!("invalid GitHub token: {}", e)))?;
                headers.insert(AUTHORIZATION, value);
            }

            let client = reqwest::Client::builder()
                .default_headers(headers)
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| StoreError::NetworkError(e.to_string()))?;

            Ok(Self {
                client,
                api_base: API_BASE.to_string(),
            })
        }

        /// Point at a different API root, e.g. GitHub Enterprise.
        pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
            self.api_base = api_base.into().trim_end_matches('/').to_string();
            self
        }

        async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| StoreError::NetworkError(format!("{}: {}", url, e)))?;
            let status = response.status();
            if !status.is_success() {
                return Err(StoreError::NetworkError(format!(
                    "{} returned HTTP {}",
                    url, status
                )));
            }
            response
                .json::<T>()
                .await
                .map_err(|e| StoreError::NetworkError(format!("{}: {}", url, e)))
        }
    }

    #[async_trait]
    impl StatsProvider for GithubStatsProvider {
        async fn fetch_stats(&self, repository: &Url) -> Result<Option<RepositoryStats>> {
            let Some((owner, repo)) = github_repo_slug(repository) else {
                return Ok(None);
            };
            let base = format!("{}/repos/{}/{}", self.api_base, owner, repo);

            let info = self.get::<RepoInfo>(&base).await;
            let releases = self.get::<Vec<Release>>(&format!("{}/releases", base)).await;

            let (info, releases) = match (info, releases) {
                (Err(e), Err(_)) => return Err(e),
                (info, releases) => {
                    for e in [info.as_ref().err(), releases.as_ref().err()].into_iter().flatten() {
                        tracing::warn!(owner = %owner, repo = %repo, error = %e, "Partial repository stats");
                    }
                    (info.ok(), releases.ok())
                }
            };

            let mut stats = RepositoryStats::default();
            if let Some(info) = info {
                stats.stars = Some(info.stargazers_count);
                stats.updated_at = info.pushed_at;
            }
            if let Some(releases) = releases {
                stats.merge_releases(&releases);
            }

            tracing::debug!(owner = %owner, repo = %repo, "Fetched repository stats");
            Ok(Some(stats))
        }
    }

}
