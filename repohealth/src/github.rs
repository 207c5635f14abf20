//! [`RemoteFetcher`] backed by the GitHub REST API.

use crate::config::GithubConfig;
use crate::core::{Credential, RepoKey};
use crate::errors::RepoHealthError;
use crate::ports::{RemoteFetcher, RepoIdentity};
use crate::utils::now_utc;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const STAR_MEDIA_TYPE: &str = "application/vnd.github.v3.star+json";

#[derive(Debug, Deserialize)]
struct RepoResponse {
    full_name: String,
    clone_url: String,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

/// Fetches repository data from GitHub.
///
/// Requests are authorized with the caller's token. Paginated endpoints are
/// followed through the `Link` header until no `next` page remains.
pub struct GithubFetcher {
    client: Client,
    api_base: String,
    per_page: u32,
}

impl std::fmt::Debug for GithubFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubFetcher")
            .field("api_base", &self.api_base)
            .field("per_page", &self.per_page)
            .finish_non_exhaustive()
    }
}

impl GithubFetcher {
    /// Creates a fetcher from configuration.
    ///
    /// # Errors
    ///
    /// Returns a network failure if the HTTP client cannot be built.
    pub fn new(config: &GithubConfig) -> Result<Self, RepoHealthError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()
            .map_err(|e| RepoHealthError::network_with("failed to build HTTP client", e))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            per_page: config.per_page,
        })
    }

    /// Returns the API base URL.
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn repo_url(&self, full_name: &str) -> String {
        format!("{}/repos/{full_name}", self.api_base)
    }

    async fn get(
        &self,
        url: &str,
        credential: &Credential,
        accept: &str,
        subject: &str,
    ) -> Result<(Value, Option<String>), RepoHealthError> {
        let mut request = self.client.get(url).header(ACCEPT, accept);
        if !credential.is_empty() {
            request = request.header(AUTHORIZATION, format!("token {}", credential.expose()));
        }

        debug!(url, "GitHub request");
        let response = request
            .send()
            .await
            .map_err(|e| RepoHealthError::network_with(format!("request to {url} failed"), e))?;

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &headers, &body, subject));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| RepoHealthError::network_with(format!("unreadable response from {url}"), e))?;
        Ok((body, next_link(&headers)))
    }

    async fn get_all(
        &self,
        first_url: String,
        credential: &Credential,
        accept: &str,
        subject: &str,
    ) -> Result<Vec<Value>, RepoHealthError> {
        let mut items = Vec::new();
        let mut next = Some(first_url);
        while let Some(url) = next {
            let (page, link) = self.get(&url, credential, accept, subject).await?;
            match page {
                Value::Array(page) => items.extend(page),
                other => {
                    return Err(RepoHealthError::pipeline(format!(
                        "expected a list from {url}, got {}",
                        type_name(&other)
                    )))
                }
            }
            next = link;
        }
        Ok(items)
    }
}

#[async_trait]
impl RemoteFetcher for GithubFetcher {
    async fn resolve(
        &self,
        key: &RepoKey,
        credential: &Credential,
    ) -> Result<RepoIdentity, RepoHealthError> {
        if !key.is_slug() {
            return Err(RepoHealthError::not_found(key.as_str()));
        }

        let (body, _) = self
            .get(&self.repo_url(key.as_str()), credential, JSON_MEDIA_TYPE, key.as_str())
            .await?;
        let repo: RepoResponse = serde_json::from_value(body)?;

        let mut identity = RepoIdentity::new(repo.full_name, repo.clone_url);
        if let Some(url) = repo.html_url {
            identity = identity.with_html_url(url);
        }
        if let Some(branch) = repo.default_branch {
            identity = identity.with_default_branch(branch);
        }
        Ok(identity)
    }

    async fn metadata(
        &self,
        identity: &RepoIdentity,
        credential: &Credential,
    ) -> Result<Value, RepoHealthError> {
        let (body, _) = self
            .get(
                &self.repo_url(&identity.full_name),
                credential,
                JSON_MEDIA_TYPE,
                &identity.full_name,
            )
            .await?;
        Ok(body)
    }

    async fn issues(
        &self,
        identity: &RepoIdentity,
        credential: &Credential,
    ) -> Result<Value, RepoHealthError> {
        let url = format!(
            "{}/issues?state=all&per_page={}",
            self.repo_url(&identity.full_name),
            self.per_page
        );
        let issues = self
            .get_all(url, credential, JSON_MEDIA_TYPE, &identity.full_name)
            .await?;
        Ok(Value::Array(issues.iter().filter_map(project_issue).collect()))
    }

    async fn stargazers(
        &self,
        identity: &RepoIdentity,
        credential: &Credential,
    ) -> Result<Value, RepoHealthError> {
        let url = format!(
            "{}/stargazers?per_page={}",
            self.repo_url(&identity.full_name),
            self.per_page
        );
        let stargazers = self
            .get_all(url, credential, STAR_MEDIA_TYPE, &identity.full_name)
            .await?;
        Ok(Value::Array(stargazers.iter().filter_map(project_stargazer).collect()))
    }
}

/// Maps a non-success response to an error.
fn status_error(status: StatusCode, headers: &HeaderMap, body: &str, subject: &str) -> RepoHealthError {
    let message = serde_json::from_str::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| status.to_string());

    match status {
        StatusCode::UNAUTHORIZED => RepoHealthError::auth_failure(message),
        StatusCode::NOT_FOUND => RepoHealthError::not_found(subject),
        StatusCode::TOO_MANY_REQUESTS => RepoHealthError::rate_limited(message, retry_after(headers)),
        StatusCode::FORBIDDEN if rate_limit_exhausted(headers) => {
            RepoHealthError::rate_limited(message, retry_after(headers))
        }
        StatusCode::FORBIDDEN => RepoHealthError::auth_failure(message),
        s if s.is_server_error() => RepoHealthError::network(format!("GitHub returned {s}: {message}")),
        s => {
            warn!(status = %s, subject, "Unexpected GitHub response");
            RepoHealthError::pipeline(format!("GitHub returned {s}: {message}"))
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn rate_limit_exhausted(headers: &HeaderMap) -> bool {
    header_str(headers, "x-ratelimit-remaining").is_some_and(|v| v.trim() == "0")
        || headers.contains_key("retry-after")
}

fn retry_after(headers: &HeaderMap) -> Option<u64> {
    if let Some(seconds) = header_str(headers, "retry-after").and_then(|v| v.trim().parse().ok()) {
        return Some(seconds);
    }
    let reset: i64 = header_str(headers, "x-ratelimit-reset")?.trim().parse().ok()?;
    u64::try_from(reset - now_utc().timestamp()).ok()
}

/// Extracts the `rel="next"` target from a `Link` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|param| param.trim() == "rel=\"next\"")
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

/// Flattens an issue to the fields the analysis reads.
///
/// User fields are flattened to `user/login` and `user/id`. Entries that are
/// not objects are dropped.
fn project_issue(issue: &Value) -> Option<Value> {
    issue.is_object().then(|| {
        json!({
            "number": issue["number"],
            "comments": issue["comments"],
            "created_at": issue["created_at"],
            "state": issue["state"],
            "closed_at": issue["closed_at"],
            "user/login": issue["user"]["login"],
            "user/id": issue["user"]["id"],
        })
    })
}

/// Flattens a stargazer the same way as [`project_issue`].
fn project_stargazer(star: &Value) -> Option<Value> {
    star.is_object().then(|| {
        json!({
            "starred_at": star["starred_at"],
            "user/login": star["user"]["login"],
            "user/id": star["user"]["id"],
        })
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_next_link_follows_rel_next() {
        let map = headers(&[(
            "link",
            "<https://api.github.com/repositories/1/issues?page=2>; rel=\"next\", \
             <https://api.github.com/repositories/1/issues?page=9>; rel=\"last\"",
        )]);
        assert_eq!(
            next_link(&map).as_deref(),
            Some("https://api.github.com/repositories/1/issues?page=2")
        );

        let last_page = headers(&[(
            "link",
            "<https://api.github.com/repositories/1/issues?page=1>; rel=\"first\", \
             <https://api.github.com/repositories/1/issues?page=8>; rel=\"prev\"",
        )]);
        assert_eq!(next_link(&last_page), None);
        assert_eq!(next_link(&HeaderMap::new()), None);
    }

    #[test]
    fn test_status_mapping() {
        let body = r#"{"message": "Bad credentials"}"#;
        let none = HeaderMap::new();

        let err = status_error(StatusCode::UNAUTHORIZED, &none, body, "acme/widgets");
        assert_eq!(err.kind(), ErrorKind::AuthFailure);
        assert!(err.to_string().contains("Bad credentials"));

        let err = status_error(StatusCode::NOT_FOUND, &none, "", "acme/widgets");
        assert!(matches!(err, RepoHealthError::NotFound { ref key } if key == "acme/widgets"));

        let exhausted = headers(&[("x-ratelimit-remaining", "0"), ("retry-after", "60")]);
        let err = status_error(StatusCode::FORBIDDEN, &exhausted, "{}", "acme/widgets");
        assert!(matches!(
            err,
            RepoHealthError::RateLimited { retry_after_seconds: Some(60), .. }
        ));

        let err = status_error(StatusCode::FORBIDDEN, &none, body, "acme/widgets");
        assert_eq!(err.kind(), ErrorKind::AuthFailure);

        let err = status_error(StatusCode::TOO_MANY_REQUESTS, &none, "", "acme/widgets");
        assert_eq!(err.kind(), ErrorKind::RateLimited);

        let err = status_error(StatusCode::BAD_GATEWAY, &none, "", "acme/widgets");
        assert_eq!(err.kind(), ErrorKind::NetworkFailure);
    }

    #[test]
    fn test_issue_projection_keeps_selected_fields() {
        let issue = json!({
            "number": 7,
            "comments": 3,
            "created_at": "2017-01-01T00:00:00Z",
            "state": "closed",
            "closed_at": "2017-01-02T00:00:00Z",
            "title": "dropped",
            "user": {"login": "octocat", "id": 1, "avatar_url": "dropped"},
        });

        let projected = project_issue(&issue).unwrap();

        assert_eq!(projected["number"], 7);
        assert_eq!(projected["user/login"], "octocat");
        assert_eq!(projected["user/id"], 1);
        assert!(projected.get("user").is_none());
        assert!(projected.get("title").is_none());
    }

    #[test]
    fn test_stargazer_projection_flattens_user() {
        let star = json!({"starred_at": "2017-01-01T00:00:00Z", "user": {"login": "octocat", "id": 1}});
        assert_eq!(
            project_stargazer(&star),
            Some(json!({"starred_at": "2017-01-01T00:00:00Z", "user/login": "octocat", "user/id": 1}))
        );
    }

    #[test]
    fn test_non_object_entries_are_dropped() {
        let page = vec![
            json!("garbage"),
            json!(null),
            json!({"starred_at": "2017-01-01T00:00:00Z", "user": {"login": "octocat", "id": 1}}),
        ];

        let kept: Vec<Value> = page.iter().filter_map(project_stargazer).collect();

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["user/login"], "octocat");
        assert_eq!(project_issue(&json!(42)), None);
    }

    #[tokio::test]
    async fn test_non_slug_key_is_not_found_without_request() {
        let config = GithubConfig::default().with_api_base("http://127.0.0.1:9/");
        let fetcher = GithubFetcher::new(&config).unwrap();
        assert_eq!(fetcher.api_base(), "http://127.0.0.1:9");

        let key = RepoKey::parse("not a slug").unwrap();
        let err = fetcher.resolve(&key, &Credential::new("token")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_transport_error_is_network_failure() {
        let config = GithubConfig::default().with_api_base("http://127.0.0.1:1");
        let fetcher = GithubFetcher::new(&config).unwrap();

        let key = RepoKey::parse("acme/widgets").unwrap();
        let err = fetcher.resolve(&key, &Credential::new("token")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NetworkFailure);
        assert!(!err.to_string().contains("token"));
    }
}
