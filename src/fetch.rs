use crate::{config, error::FetchError, item::ItemRef};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Retrieves the raw bytes behind a reference.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, reference: &ItemRef) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: u64,
    allowed_schemes: Vec<String>,
    allow_local_files: bool,
}

impl HttpFetcher {
    pub fn new(cfg: &config::Fetch, security: &config::Security) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds.max(1)))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_seconds.max(1)))
            .user_agent(cfg.user_agent.clone())
            .build()
            .with_context(|| "building HTTP client")?;
        Ok(Self {
            client,
            max_bytes: cfg.max_bytes,
            allowed_schemes: security
                .allowed_schemes
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            allow_local_files: security.allow_local_files,
        })
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;

        if let Some(len) = response.content_length() {
            if self.max_bytes > 0 && len > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if self.max_bytes > 0 && body.len() as u64 > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
        }
        debug!("fetched {} bytes from {url}", body.len());
        Ok(body)
    }

    async fn fetch_local(&self, path: PathBuf) -> Result<Vec<u8>, FetchError> {
        let meta = tokio::fs::metadata(&path).await?;
        if self.max_bytes > 0 && meta.len() > self.max_bytes {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }
        Ok(tokio::fs::read(&path).await?)
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, reference: &ItemRef) -> Result<Vec<u8>, FetchError> {
        let raw = reference.as_str().trim();
        match scheme_of(raw) {
            Some(scheme) if scheme == "file" => {
                if !self.allow_local_files {
                    return Err(FetchError::SchemeNotAllowed(scheme));
                }
                self.fetch_local(PathBuf::from(&raw["file://".len()..])).await
            }
            Some(scheme) => {
                if !self.allowed_schemes.contains(&scheme) {
                    return Err(FetchError::SchemeNotAllowed(scheme));
                }
                self.fetch_http(raw).await
            }
            None if self.allow_local_files => self.fetch_local(PathBuf::from(raw)).await,
            None => Err(FetchError::SchemeNotAllowed("<none>".into())),
        }
    }
}

/// Lowercased scheme of `raw`, if it looks like `scheme://...`.
pub fn scheme_of(raw: &str) -> Option<String> {
    let (scheme, _) = raw.split_once("://")?;
    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return None;
    }
    Some(scheme.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(allow_local_files: bool) -> HttpFetcher {
        let security = config::Security {
            allow_local_files,
            ..Default::default()
        };
        HttpFetcher::new(&config::Fetch::default(), &security).unwrap()
    }

    #[test]
    fn scheme_detection() {
        assert_eq!(scheme_of("HTTPS://x/a.jpg").as_deref(), Some("https"));
        assert_eq!(scheme_of("file:///tmp/a.jpg").as_deref(), Some("file"));
        assert_eq!(scheme_of("/tmp/a.jpg"), None);
        assert_eq!(scheme_of("a b://x"), None);
    }

    #[tokio::test]
    async fn rejects_disallowed_scheme() {
        let err = fetcher(false)
            .fetch(&ItemRef::new("ftp://host/a.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::SchemeNotAllowed(s) if s == "ftp"));
    }

    #[tokio::test]
    async fn local_files_need_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"abc").unwrap();
        let reference = ItemRef::new(format!("file://{}", path.display()));

        assert!(fetcher(false).fetch(&reference).await.is_err());
        assert_eq!(fetcher(true).fetch(&reference).await.unwrap(), b"abc");
    }
}
