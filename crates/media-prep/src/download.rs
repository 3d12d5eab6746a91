//! Content-addressed media downloads.
//!
//! Files are cached under `preprocessor/<crc32(url)>` so repeated runs
//! reuse them; a per-key async lock collapses concurrent downloads of
//! the same URL into one fetch. A HEAD request validates the MIME type
//! before any bytes are pulled.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use webreel_common::{WebreelError, WebreelResult};

const MIME_WHITELIST: &[&str] = &["video/", "application/octet-stream"];

/// Cache filename stem for a URL.
pub fn cache_key(url: &str) -> u32 {
    crc32fast::hash(url.as_bytes())
}

/// Whether a Content-Type is acceptable for video downloads.
pub fn mime_allowed(content_type: &str) -> bool {
    let ct = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    MIME_WHITELIST.iter().any(|prefix| ct.starts_with(prefix))
}

/// Bounded, deduplicating downloader.
pub struct DownloadCache {
    client: reqwest::Client,
    dir: PathBuf,
    semaphore: Arc<Semaphore>,
    locks: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
}

impl DownloadCache {
    pub fn new(dir: impl Into<PathBuf>, max_concurrent: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            dir: dir.into(),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Cache path for a URL with the given extension.
    pub fn path_for(&self, url: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{extension}", cache_key(url)))
    }

    /// Derived artifact path (`<crc32><suffix>`), e.g. `_mask.mp4`.
    pub fn derived_path(&self, url: &str, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}{suffix}", cache_key(url)))
    }

    /// Download `url` into the cache, returning the cached path.
    ///
    /// 4xx responses resolve to `Ok(None)` so the caller can skip the
    /// media; 5xx and transport errors are retried `retry_fetchs` times
    /// with `retry_delay` between attempts, then surface as errors.
    pub async fn fetch(
        &self,
        url: &str,
        extension: &str,
        ignore_cache: bool,
        retry_fetchs: u32,
        retry_delay: Duration,
    ) -> WebreelResult<Option<PathBuf>> {
        let key = cache_key(url);
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(key).or_default().clone()
        };
        // Concurrent consumers of the same URL deduplicate here.
        let _guard = lock.lock().await;

        let path = self.path_for(url, extension);
        if path.exists() && !ignore_cache {
            tracing::debug!(url, path = %path.display(), "download cache hit");
            return Ok(Some(path));
        }

        let mut attempt = 0;
        loop {
            match self.fetch_once(url, &path).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if attempt < retry_fetchs => {
                    attempt += 1;
                    tracing::warn!(
                        url,
                        attempt,
                        error = %err,
                        "download failed, retrying"
                    );
                    tokio::time::sleep(retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_once(&self, url: &str, path: &Path) -> WebreelResult<Option<PathBuf>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| WebreelError::preprocess("download semaphore closed"))?;

        let head = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| WebreelError::preprocess(format!("HEAD {url} failed: {e}")))?;

        if head.status().is_client_error() {
            tracing::warn!(url, status = %head.status(), "media URL rejected by origin");
            return Ok(None);
        }
        if !head.status().is_success() {
            return Err(WebreelError::preprocess(format!(
                "HEAD {url} returned {}",
                head.status()
            )));
        }
        if let Some(ct) = head
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !mime_allowed(ct) {
                return Err(WebreelError::preprocess(format!(
                    "{url} has unsupported content type '{ct}'"
                )));
            }
        }
        let size = head
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WebreelError::preprocess(format!("GET {url} failed: {e}")))?;
        if response.status().is_client_error() {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(WebreelError::preprocess(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| WebreelError::preprocess(format!("reading {url} failed: {e}")))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;

        tracing::info!(
            url,
            bytes = bytes.len(),
            expected = size,
            path = %path.display(),
            "media downloaded"
        );
        Ok(Some(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_per_url() {
        let a = cache_key("https://cdn.test/a.mp4");
        assert_eq!(a, cache_key("https://cdn.test/a.mp4"));
        assert_ne!(a, cache_key("https://cdn.test/b.mp4"));
    }

    #[test]
    fn mime_whitelist_accepts_video_and_octet_stream() {
        assert!(mime_allowed("video/mp4"));
        assert!(mime_allowed("video/webm; codecs=vp9"));
        assert!(mime_allowed("application/octet-stream"));
        assert!(!mime_allowed("text/html"));
        assert!(!mime_allowed("image/gif"));
    }

    #[test]
    fn paths_are_crc_named() {
        let cache = DownloadCache::new("/tmp/pre", 4);
        let url = "https://cdn.test/a.webm";
        let key = cache_key(url);
        assert_eq!(
            cache.path_for(url, "mp4"),
            PathBuf::from(format!("/tmp/pre/{key}.mp4"))
        );
        assert_eq!(
            cache.derived_path(url, "_mask.mp4"),
            PathBuf::from(format!("/tmp/pre/{key}_mask.mp4"))
        );
    }
}
