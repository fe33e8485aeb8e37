//! qBittorrent Web API client.
//!
//! The category store only talks to the [`TorrentSource`] trait; [`QbitClient`]
//! is the production implementation over `reqwest`. Authentication uses the
//! `SID` session cookie returned by the login endpoint. A rejected session
//! (HTTP 403) triggers exactly one re-login and one retry.

use crate::config::QbitConfig;
use crate::resolve::TorrentInfo;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type for upstream queries
#[derive(Debug, Error)]
pub enum SourceError {
    /// Upstream unreachable, login rejected or non-success status
    #[error("qBittorrent unavailable: {0}")]
    Unavailable(String),

    /// Category not known upstream
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    /// Response body did not have the expected shape
    #[error("Unexpected qBittorrent response: {0}")]
    BadResponse(String),
}

impl SourceError {
    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Unavailable(_) => "unavailable",
            SourceError::UnknownCategory(_) => "unknown-category",
            SourceError::BadResponse(_) => "bad-response",
        }
    }
}

/// Category details from `/api/v2/torrents/categories`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CategoryInfo {
    #[serde(rename = "savePath", default)]
    pub save_path: String,
}

/// Category as presented to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub id: String,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    #[serde(default)]
    name: String,
}

/// One completed torrent together with its member file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentListing {
    pub torrent: TorrentInfo,
    pub files: Vec<String>,
}

/// Upstream collaborator providing categories, torrents and file lists.
#[async_trait]
pub trait TorrentSource: Send + Sync {
    async fn categories(&self) -> Result<BTreeMap<String, CategoryInfo>, SourceError>;

    /// Completed torrents of `category`.
    async fn completed_torrents(&self, category: &str) -> Result<Vec<TorrentInfo>, SourceError>;

    /// Flat member file names of the torrent with `hash`.
    async fn files(&self, hash: &str) -> Result<Vec<String>, SourceError>;
}

/// Categories mapped to `{id, name, path}` records.
pub async fn list_categories(
    source: &dyn TorrentSource,
) -> Result<Vec<CategorySummary>, SourceError> {
    let categories = source.categories().await?;
    Ok(categories
        .into_iter()
        .map(|(name, info)| CategorySummary {
            id: name.clone(),
            name,
            path: info.save_path,
        })
        .collect())
}

/// Completed torrents of `category` with their file lists.
///
/// Torrents without a hash are skipped. A failed file listing degrades to
/// an empty list so that the torrent still shows up with a warning.
pub async fn fetch_completed_with_files(
    source: &dyn TorrentSource,
    category: &str,
) -> Result<Vec<TorrentListing>, SourceError> {
    let categories = source.categories().await?;
    if !categories.contains_key(category) {
        return Err(SourceError::UnknownCategory(category.to_string()));
    }

    let torrents = source.completed_torrents(category).await?;
    let total = torrents.len();
    let mut listings = Vec::with_capacity(total);
    for torrent in torrents {
        if torrent.hash.is_empty() {
            continue;
        }
        let files = match source.files(&torrent.hash).await {
            Ok(files) => files,
            Err(e) => {
                warn!(hash = %torrent.hash, error = %e, "qBittorrent file list fetch failed");
                Vec::new()
            }
        };
        listings.push(TorrentListing { torrent, files });
    }
    info!(
        category = %category,
        torrents = total,
        entries = listings.len(),
        "Completed torrent files collected"
    );
    Ok(listings)
}

/// Base URL for `cfg`: `http://` added when no scheme is given, port set
/// from the config, no trailing slash.
pub fn base_url(cfg: &QbitConfig) -> Result<String, SourceError> {
    let raw = if cfg.host.contains("://") {
        cfg.host.clone()
    } else {
        format!("http://{}", cfg.host)
    };
    let mut url =
        Url::parse(&raw).map_err(|e| SourceError::Unavailable(format!("invalid host {}: {}", raw, e)))?;
    url.set_port(Some(cfg.port))
        .map_err(|_| SourceError::Unavailable(format!("cannot set port on {}", raw)))?;
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Session-cookie qBittorrent client.
pub struct QbitClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    cookie: Mutex<Option<String>>,
}

impl QbitClient {
    pub fn new(cfg: &QbitConfig) -> Result<Self, SourceError> {
        let base_url = base_url(cfg)?;
        info!(base_url = %base_url, has_auth = cfg.has_auth(), "qBittorrent settings");
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            cookie: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn has_auth(&self) -> bool {
        !self.user.is_empty()
    }

    async fn login(&self) -> Result<(), SourceError> {
        if !self.has_auth() {
            return Ok(());
        }
        debug!("Attempting qBittorrent login");
        let response = self
            .http
            .post(format!("{}/api/v2/auth/login", self.base_url))
            .form(&[("username", &self.user), ("password", &self.password)])
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "login failed with status {}",
                response.status()
            )));
        }
        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(str::to_string)
            .ok_or_else(|| {
                SourceError::Unavailable("login did not return a session cookie".to_string())
            })?;
        *self.cookie.lock() = Some(cookie);
        info!("qBittorrent login succeeded");
        Ok(())
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, SourceError> {
        if self.has_auth() && self.cookie.lock().is_none() {
            self.login().await?;
        }

        let url = format!("{}{}", self.base_url, path);
        for attempt in 0..2 {
            let cookie = self.cookie.lock().clone();
            let mut request = self.http.get(&url).query(query);
            if let Some(cookie) = cookie {
                request = request.header(COOKIE, cookie);
            }
            let response = request
                .send()
                .await
                .map_err(|e| SourceError::Unavailable(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::FORBIDDEN && attempt == 0 && self.has_auth() {
                warn!(path = %path, "qBittorrent session rejected, re-authenticating");
                *self.cookie.lock() = None;
                self.login().await?;
                continue;
            }
            if !status.is_success() {
                warn!(path = %path, status = %status, "qBittorrent request failed");
                return Err(SourceError::Unavailable(format!(
                    "{} returned status {}",
                    path, status
                )));
            }
            return response
                .json::<Value>()
                .await
                .map_err(|e| SourceError::BadResponse(e.to_string()));
        }
        Err(SourceError::Unavailable(format!("{} rejected the session", path)))
    }
}

#[async_trait]
impl TorrentSource for QbitClient {
    async fn categories(&self) -> Result<BTreeMap<String, CategoryInfo>, SourceError> {
        let value = self.get_json("/api/v2/torrents/categories", &[]).await?;
        serde_json::from_value(value).map_err(|e| SourceError::BadResponse(e.to_string()))
    }

    async fn completed_torrents(&self, category: &str) -> Result<Vec<TorrentInfo>, SourceError> {
        let value = self
            .get_json(
                "/api/v2/torrents/info",
                &[("category", category), ("filter", "completed")],
            )
            .await?;
        let entries = match value {
            Value::Array(entries) => entries,
            _ => {
                return Err(SourceError::BadResponse(
                    "torrent list is not an array".to_string(),
                ))
            }
        };
        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<TorrentInfo>(entry) {
                Ok(torrent) => Some(torrent),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed torrent entry");
                    None
                }
            })
            .collect())
    }

    async fn files(&self, hash: &str) -> Result<Vec<String>, SourceError> {
        let value = self
            .get_json("/api/v2/torrents/files", &[("hash", hash)])
            .await?;
        let entries: Vec<FileEntry> =
            serde_json::from_value(value).map_err(|e| SourceError::BadResponse(e.to_string()))?;
        Ok(entries.into_iter().map(|entry| entry.name).collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory source used by store and API tests.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub categories: Mutex<Option<BTreeMap<String, CategoryInfo>>>,
        pub torrents: Mutex<HashMap<String, Vec<TorrentInfo>>>,
        pub files: Mutex<HashMap<String, Vec<String>>>,
    }

    impl FakeSource {
        pub(crate) fn with_torrent(category: &str, torrent: TorrentInfo, files: &[&str]) -> Self {
            let source = FakeSource::default();
            source.add_torrent(category, torrent, files);
            source
        }

        pub(crate) fn add_torrent(&self, category: &str, torrent: TorrentInfo, files: &[&str]) {
            self.categories
                .lock()
                .get_or_insert_with(BTreeMap::new)
                .insert(
                    category.to_string(),
                    CategoryInfo {
                        save_path: torrent.save_path.clone(),
                    },
                );
            self.files.lock().insert(
                torrent.hash.clone(),
                files.iter().map(|f| f.to_string()).collect(),
            );
            self.torrents
                .lock()
                .entry(category.to_string())
                .or_default()
                .push(torrent);
        }

        /// Make every later query fail as unreachable.
        pub(crate) fn go_offline(&self) {
            *self.categories.lock() = None;
        }
    }

    #[async_trait]
    impl TorrentSource for FakeSource {
        async fn categories(&self) -> Result<BTreeMap<String, CategoryInfo>, SourceError> {
            self.categories
                .lock()
                .clone()
                .ok_or_else(|| SourceError::Unavailable("offline".to_string()))
        }

        async fn completed_torrents(
            &self,
            category: &str,
        ) -> Result<Vec<TorrentInfo>, SourceError> {
            Ok(self.torrents.lock().get(category).cloned().unwrap_or_default())
        }

        async fn files(&self, hash: &str) -> Result<Vec<String>, SourceError> {
            self.files
                .lock()
                .get(hash)
                .cloned()
                .ok_or_else(|| SourceError::Unavailable(format!("no files for {}", hash)))
        }
    }

    pub(crate) fn torrent(hash: &str, name: &str, save_path: &str) -> TorrentInfo {
        TorrentInfo {
            hash: hash.to_string(),
            name: name.to_string(),
            save_path: save_path.to_string(),
            content_path: String::new(),
        }
    }

    #[test]
    fn test_base_url_normalisation() {
        let mut cfg = QbitConfig::default();
        assert_eq!(base_url(&cfg).unwrap(), "http://localhost:8080");

        cfg.host = "https://qbit.example.org/".to_string();
        cfg.port = 8443;
        assert_eq!(base_url(&cfg).unwrap(), "https://qbit.example.org:8443");

        cfg.host = "http://10.0.0.2:9999".to_string();
        cfg.port = 8080;
        assert_eq!(base_url(&cfg).unwrap(), "http://10.0.0.2:8080");
    }

    #[tokio::test]
    async fn test_fetch_unknown_category() {
        let source = FakeSource::with_torrent("movies", torrent("h1", "A", "/data"), &["a.mkv"]);
        let err = fetch_completed_with_files(&source, "tv").await.unwrap_err();
        assert!(matches!(err, SourceError::UnknownCategory(_)));
        assert_eq!(err.kind(), "unknown-category");
    }

    #[tokio::test]
    async fn test_fetch_skips_hashless_and_degrades_missing_files() {
        let source = FakeSource::with_torrent("movies", torrent("h1", "A", "/data"), &["a.mkv"]);
        source
            .torrents
            .lock()
            .get_mut("movies")
            .unwrap()
            .extend([torrent("", "NoHash", "/data"), torrent("h2", "B", "/data")]);

        let listings = fetch_completed_with_files(&source, "movies").await.unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].files, vec!["a.mkv".to_string()]);
        assert_eq!(listings[1].torrent.hash, "h2");
        assert!(listings[1].files.is_empty());
    }

    #[tokio::test]
    async fn test_list_categories_maps_save_path() {
        let source = FakeSource::with_torrent("movies", torrent("h1", "A", "/data/movies"), &[]);
        let categories = list_categories(&source).await.unwrap();
        assert_eq!(
            categories,
            vec![CategorySummary {
                id: "movies".to_string(),
                name: "movies".to_string(),
                path: "/data/movies".to_string(),
            }]
        );
    }

    #[derive(Default)]
    struct Upstream {
        logins: AtomicUsize,
        rejections_left: AtomicUsize,
    }

    async fn fake_login(State(state): State<Arc<Upstream>>) -> impl IntoResponse {
        let n = state.logins.fetch_add(1, Ordering::SeqCst) + 1;
        (
            [(axum::http::header::SET_COOKIE, format!("SID=session{}; HttpOnly; path=/", n))],
            "Ok.",
        )
    }

    async fn fake_categories(
        State(state): State<Arc<Upstream>>,
        headers: HeaderMap,
    ) -> axum::response::Response {
        let rejected = state
            .rejections_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let has_cookie = headers
            .get(axum::http::header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.starts_with("SID=session"));
        if rejected || !has_cookie {
            return HttpStatus::FORBIDDEN.into_response();
        }
        Json(json!({"movies": {"name": "movies", "savePath": "/data/movies"}})).into_response()
    }

    async fn fake_info(Query(params): Query<HashMap<String, String>>) -> axum::response::Response {
        if params.get("filter").map(String::as_str) != Some("completed") {
            return HttpStatus::BAD_REQUEST.into_response();
        }
        Json(json!({"not": "an array"})).into_response()
    }

    async fn spawn_upstream(state: Arc<Upstream>) -> QbitConfig {
        let app = Router::new()
            .route("/api/v2/auth/login", post(fake_login))
            .route("/api/v2/torrents/categories", get(fake_categories))
            .route("/api/v2/torrents/info", get(fake_info))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        QbitConfig {
            host: "127.0.0.1".to_string(),
            port,
            user: "admin".to_string(),
            password: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn test_rejected_session_logs_in_again_once() {
        let upstream = Arc::new(Upstream::default());
        let cfg = spawn_upstream(upstream.clone()).await;
        let client = QbitClient::new(&cfg).unwrap();

        let categories = client.categories().await.unwrap();
        assert_eq!(categories["movies"].save_path, "/data/movies");
        assert_eq!(upstream.logins.load(Ordering::SeqCst), 1);

        upstream.rejections_left.store(1, Ordering::SeqCst);
        assert!(client.categories().await.is_ok());
        assert_eq!(upstream.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_rejection_is_unavailable() {
        let upstream = Arc::new(Upstream::default());
        let cfg = spawn_upstream(upstream.clone()).await;
        let client = QbitClient::new(&cfg).unwrap();

        upstream.rejections_left.store(5, Ordering::SeqCst);
        let err = client.categories().await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
        assert_eq!(upstream.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_array_torrent_list_is_bad_response() {
        let upstream = Arc::new(Upstream::default());
        let cfg = spawn_upstream(upstream).await;
        let client = QbitClient::new(&cfg).unwrap();

        let err = client.completed_torrents("movies").await.unwrap_err();
        assert!(matches!(err, SourceError::BadResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let cfg = QbitConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..QbitConfig::default()
        };
        let client = QbitClient::new(&cfg).unwrap();
        let err = client.categories().await.unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }
}
