use crate::{config, error::ManifestError, fetch::scheme_of, item::ItemRef};
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

/// Supplies the ordered item references for a label.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn read_refs(&self, label: &str) -> Result<Vec<ItemRef>, ManifestError>;
}

/// One reference per line. Blank lines and lines matching `skip` are dropped.
pub fn parse_refs(raw: &str, skip: Option<&Regex>) -> Vec<ItemRef> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| skip.is_none_or(|re| !re.is_match(l)))
        .map(ItemRef::from)
        .collect()
}

fn compile_skip(pattern: &str) -> Result<Option<Regex>, ManifestError> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Ok(Some(Regex::new(pattern)?))
}

pub fn from_config(cfg: &config::Manifest, label: &str) -> Result<Arc<dyn ManifestSource>> {
    let source = cfg.resolve_source(label);
    match scheme_of(&source).as_deref() {
        Some("http") | Some("https") => Ok(Arc::new(HttpManifest::new(cfg)?)),
        _ => Ok(Arc::new(FileManifest::new(cfg)?)),
    }
}

/// Manifest read from the local filesystem.
pub struct FileManifest {
    source: String,
    skip: Option<Regex>,
}

impl FileManifest {
    pub fn new(cfg: &config::Manifest) -> Result<Self> {
        Ok(Self {
            source: cfg.source.clone(),
            skip: compile_skip(&cfg.skip_pattern).with_context(|| "manifest.skip_pattern")?,
        })
    }
}

#[async_trait]
impl ManifestSource for FileManifest {
    async fn read_refs(&self, label: &str) -> Result<Vec<ItemRef>, ManifestError> {
        let resolved = self.source.replace("{label}", label);
        let path = resolved.strip_prefix("file://").unwrap_or(&resolved);
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ManifestError::Read {
                source_name: path.to_string(),
                message: e.to_string(),
            })?;
        Ok(parse_refs(&raw, self.skip.as_ref()))
    }
}

/// Manifest fetched with a GET request.
pub struct HttpManifest {
    client: reqwest::Client,
    source: String,
    skip: Option<Regex>,
}

impl HttpManifest {
    pub fn new(cfg: &config::Manifest) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds.max(1)))
            .build()
            .with_context(|| "building HTTP client")?;
        Ok(Self {
            client,
            source: cfg.source.clone(),
            skip: compile_skip(&cfg.skip_pattern).with_context(|| "manifest.skip_pattern")?,
        })
    }
}

#[async_trait]
impl ManifestSource for HttpManifest {
    async fn read_refs(&self, label: &str) -> Result<Vec<ItemRef>, ManifestError> {
        let url = self.source.replace("{label}", label);
        let read_err = |e: reqwest::Error| ManifestError::Read {
            source_name: url.clone(),
            message: e.to_string(),
        };
        let resp = self.client.get(&url).send().await.map_err(read_err)?;
        if !resp.status().is_success() {
            return Err(ManifestError::Status {
                url: url.clone(),
                status: resp.status().as_u16(),
            });
        }
        let raw = resp.text().await.map_err(read_err)?;
        Ok(parse_refs(&raw, self.skip.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_order_and_drops_noise() {
        let skip = Regex::new(r"^\s*#").unwrap();
        let raw = "http://x/a.jpg\r\n\n# comment\n  http://x/b.jpg  \nhttp://x/a.jpg\n";
        let refs = parse_refs(raw, Some(&skip));
        let got: Vec<&str> = refs.iter().map(ItemRef::as_str).collect();
        assert_eq!(got, ["http://x/a.jpg", "http://x/b.jpg", "http://x/a.jpg"]);
    }

    #[test]
    fn empty_pattern_skips_nothing() {
        assert!(compile_skip("").unwrap().is_none());
        assert_eq!(parse_refs("#x\n", None).len(), 1);
    }

    #[tokio::test]
    async fn file_manifest_substitutes_label() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cats.txt"), "http://x/a.jpg\n").unwrap();
        let cfg = config::Manifest {
            source: format!("{}/{{label}}.txt", dir.path().display()),
            ..Default::default()
        };
        let refs = FileManifest::new(&cfg).unwrap().read_refs("cats").await.unwrap();
        assert_eq!(refs, vec![ItemRef::new("http://x/a.jpg")]);
    }

    #[tokio::test]
    async fn missing_manifest_is_error() {
        let cfg = config::Manifest {
            source: "/nonexistent/{label}.txt".into(),
            ..Default::default()
        };
        let err = FileManifest::new(&cfg)
            .unwrap()
            .read_refs("cats")
            .await
            .unwrap_err();
        assert!(matches!(err, ManifestError::Read { .. }));
    }
}
