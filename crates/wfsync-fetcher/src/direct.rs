//! Direct URL fetchers that bypass the gateway network.
//!
//! Used for local development and tests: `file://` reads are confined to a
//! base directory, `http(s)://` reads are resolved against a base URL.

use crate::config::HTTP_CLIENT_TIMEOUT_SECS;
use crate::error::{FetchError, FetchResult};
use crate::fetcher::ArtifactFetcher;
use crate::gateway::GatewayRequest;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Build a fetcher for `base_url`, dispatching on its scheme.
pub fn new_fetcher(base_url: &str) -> FetchResult<Arc<dyn ArtifactFetcher>> {
    if base_url.is_empty() {
        return Err(FetchError::EmptyBaseUrl);
    }

    let parsed = Url::parse(base_url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "file" => {
            // Url normalizes file paths to absolute ones, so read the raw text.
            let raw = &base_url["file:".len()..];
            let path = raw.strip_prefix("//").unwrap_or(raw);
            Ok(Arc::new(FileFetcher::new(path)?))
        }
        "http" | "https" => Ok(Arc::new(HttpFetcher::new(parsed)?)),
        other => Err(FetchError::UnsupportedScheme(other.to_string())),
    }
}

/// Lexically normalize a path: drop `.`, resolve `..` against preceding
/// components, and never climb above the root of an absolute path.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}

/// Reads artifacts from a directory tree.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    base_path: PathBuf,
}

impl FileFetcher {
    pub fn new(base_path: impl AsRef<Path>) -> FetchResult<Self> {
        let base_path = base_path.as_ref();
        if !base_path.is_absolute() {
            return Err(FetchError::RelativeBasePath(base_path.display().to_string()));
        }
        Ok(Self {
            base_path: clean_path(base_path),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a request URL onto a path inside the base directory.
    pub fn resolve(&self, request_url: &str) -> FetchResult<PathBuf> {
        if request_url.is_empty() {
            return Err(FetchError::EmptyRequestUrl);
        }

        let raw = if request_url.contains("://") {
            let parsed =
                Url::parse(request_url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
            PathBuf::from(parsed.path())
        } else {
            PathBuf::from(request_url)
        };

        let mut full = clean_path(&raw);
        if !full.is_absolute() {
            full = clean_path(&self.base_path.join(full));
        }

        if !full.starts_with(&self.base_path) {
            return Err(FetchError::OutsideBasePath {
                path: full.display().to_string(),
                base: self.base_path.display().to_string(),
            });
        }
        Ok(full)
    }
}

#[async_trait]
impl ArtifactFetcher for FileFetcher {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        message_id: &str,
        request: &GatewayRequest,
    ) -> FetchResult<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let path = self.resolve(&request.url)?;
        tracing::debug!(message_id = %message_id, path = %path.display(), "Fetching file");

        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            data = tokio::fs::read(&path) => Ok(data?),
        }
    }
}

/// Fetches artifacts over HTTP relative to a base URL.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(base_url: Url) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_CLIENT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { base_url, client })
    }

    /// Join the cleaned request path onto the base URL's path.
    pub fn resolve(&self, request_url: &str) -> Url {
        let cleaned = clean_path(Path::new(request_url));
        let relative = cleaned.to_string_lossy();
        let relative = relative.trim_start_matches('/');

        let joined = clean_path(&Path::new(self.base_url.path()).join(relative));
        let mut url = self.base_url.clone();
        url.set_path(&joined.to_string_lossy());
        url
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        message_id: &str,
        request: &GatewayRequest,
    ) -> FetchResult<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let url = self.resolve(&request.url);
        tracing::debug!(message_id = %message_id, url = %url, "Fetching HTTP resource");

        let get = async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if status != reqwest::StatusCode::OK {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }
            Ok(response.bytes().await?.to_vec())
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = get => result.map_err(|e| match e {
                FetchError::Http(inner) if inner.is_timeout() => FetchError::DeadlineExceeded,
                other => other,
            }),
        }
    }
}
