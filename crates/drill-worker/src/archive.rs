//! Game archive sources: the Chess.com public API and local PGN files.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerError;

const API_BASE: &str = "https://api.chess.com/pub/player";

/// Where games come from. One archive is one batch of PGN text.
pub trait ArchiveSource: Send + Sync {
    /// Recorded as `run_meta.from_api`
    fn from_api(&self) -> bool;

    /// Archive locators for a player, in any order.
    fn list_archives(&self, user: &str) -> impl Future<Output = Result<Vec<String>, WorkerError>> + Send;

    /// Raw PGN text of one archive.
    fn fetch_games(&self, archive: &str) -> impl Future<Output = Result<String, WorkerError>> + Send;
}

/// Exponential backoff for transient HTTP failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Sleep before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor)
    }
}

/// Outcome of one try inside [`with_retry`]
pub enum Attempt<T> {
    Done(T),
    Retry(String),
    Fatal(WorkerError),
}

/// Run `op` until it succeeds, fails fatally, or exhausts the retry budget.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, WorkerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(e) => return Err(e),
            Attempt::Retry(reason) => {
                attempt += 1;
                if attempt > policy.max_retries {
                    return Err(WorkerError::Fetch(format!(
                        "{what}: {reason} (gave up after {} retries)",
                        policy.max_retries
                    )));
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    target_url = what,
                    %reason,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_secs = delay.as_secs_f64(),
                    "Retrying request"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Rate limits (403/429) and server errors are worth retrying.
pub fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::FORBIDDEN
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

pub struct ChessComClient {
    client: Client,
    retry: RetryPolicy,
}

impl ChessComClient {
    pub fn new(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));

        let client = Client::builder()
            .user_agent(config.http_user_agent.as_str())
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            retry: RetryPolicy {
                max_retries: config.http_max_retries,
                base_backoff: Duration::from_secs_f64(config.http_backoff_secs.max(0.0)),
            },
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, WorkerError> {
        let client = &self.client;
        with_retry(&self.retry, url, move || async move {
            match client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => Attempt::Done(resp),
                Ok(resp) if is_retryable(resp.status()) => {
                    Attempt::Retry(format!("HTTP {}", resp.status()))
                }
                Ok(resp) => Attempt::Fatal(WorkerError::Fetch(format!("{url}: HTTP {}", resp.status()))),
                Err(e) => Attempt::Retry(e.to_string()),
            }
        })
        .await
    }

    async fn get_json(&self, url: &str) -> Result<Value, WorkerError> {
        Ok(self.get(url).await?.json().await?)
    }

    async fn get_text(&self, url: &str) -> Result<String, WorkerError> {
        Ok(self.get(url).await?.text().await?)
    }
}

impl ArchiveSource for ChessComClient {
    fn from_api(&self) -> bool {
        true
    }

    async fn list_archives(&self, user: &str) -> Result<Vec<String>, WorkerError> {
        let url = format!("{API_BASE}/{}/games/archives", user.trim().to_lowercase());
        let data = self.get_json(&url).await?;

        Ok(data["archives"]
            .as_array()
            .map(|urls| {
                urls.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// `{archive}/pgn`, falling back to the archive JSON's embedded PGNs.
    async fn fetch_games(&self, archive: &str) -> Result<String, WorkerError> {
        let pgn_url = format!("{archive}/pgn");
        match self.get_text(&pgn_url).await {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(archive, error = %e, "PGN endpoint failed, falling back to archive JSON");
                let data = self.get_json(archive).await?;
                Ok(pgns_from_archive_json(&data))
            }
        }
    }
}

/// Join the non-empty `games[].pgn` entries of an archive document.
pub fn pgns_from_archive_json(data: &Value) -> String {
    data["games"]
        .as_array()
        .map(|games| {
            games
                .iter()
                .filter_map(|g| g.get("pgn").and_then(Value::as_str))
                .filter(|pgn| !pgn.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .unwrap_or_default()
}

/// Every `*.pgn` file in a directory is one archive.
pub struct LocalPgnSource {
    dir: PathBuf,
}

impl LocalPgnSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArchiveSource for LocalPgnSource {
    fn from_api(&self) -> bool {
        false
    }

    async fn list_archives(&self, _user: &str) -> Result<Vec<String>, WorkerError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut archives = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_pgn = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pgn"));
            if is_pgn && path.is_file() {
                archives.push(path.to_string_lossy().into_owned());
            }
        }

        archives.sort();
        info!(dir = %self.dir.display(), count = archives.len(), "Found local PGN archives");
        Ok(archives)
    }

    async fn fetch_games(&self, archive: &str) -> Result<String, WorkerError> {
        Ok(tokio::fs::read_to_string(archive).await?)
    }
}
