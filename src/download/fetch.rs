//! Two-phase fetch of a single record.
//!
//! The archive's download links are signed and opaque: a form POST to the
//! link returns a short-lived CDN URL as plain text, and only that URL
//! serves the media. Each call has its own timeout: a total deadline for
//! the resolve POST, connect and per-read limits for the content GET.
//! Retry and back-off belong to the scheduler, so nothing here retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{redirect, Client, ClientBuilder};
use url::Url;

use super::error::{FetchError, Phase};
use super::exif::Annotate;
use super::file;
use crate::archive::Record;

const USER_AGENT: &str = concat!("memories-dl/", env!("CARGO_PKG_VERSION"));

/// Extension used when the CDN URL's path has none.
const DEFAULT_EXTENSION: &str = ".jpg";

/// A record that reached disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub filename: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Fetches one record into `output_dir`.
///
/// Implementations hold no per-call state and are invoked concurrently;
/// admission control is the caller's job. A failure is returned, never
/// raised further: the scheduler turns it into a failed item.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(
        &self,
        record: &Record,
        output_dir: &Path,
        write_metadata: bool,
    ) -> Result<Fetched, FetchError>;
}

/// [`Fetch`] over HTTP: POST to resolve, GET (following redirects) to
/// download.
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    annotator: Arc<dyn Annotate>,
}

/// Client settings shared by every fetch.
///
/// `timeout` bounds connecting and each read, not the whole transfer, so a
/// large body that keeps arriving is never cut off.
fn client_builder(timeout: Duration) -> ClientBuilder {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(redirect::Policy::limited(10))
        .connect_timeout(timeout)
        .read_timeout(timeout)
}

impl HttpFetcher {
    pub fn new(timeout: Duration, annotator: Arc<dyn Annotate>) -> anyhow::Result<Self> {
        let client = client_builder(timeout).build()?;
        Ok(Self::with_client(client, timeout, annotator))
    }

    pub fn with_client(client: Client, timeout: Duration, annotator: Arc<dyn Annotate>) -> Self {
        Self {
            client,
            timeout,
            annotator,
        }
    }

    /// Exchange a signed download link for a direct CDN URL. The reply is a
    /// short text body, so the whole call runs under one deadline.
    async fn resolve(&self, link: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .post(link)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                phase: Phase::Resolve,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::LinkResolution {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|source| FetchError::Transport {
            phase: Phase::Resolve,
            source,
        })?;
        let cdn_url = body.trim();
        if cdn_url.is_empty() {
            return Err(FetchError::EmptyCdnUrl);
        }
        Ok(cdn_url.to_string())
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(
        &self,
        record: &Record,
        output_dir: &Path,
        write_metadata: bool,
    ) -> Result<Fetched, FetchError> {
        let cdn_url = self.resolve(record.source_link()).await?;

        let ext = extension_from_url(&cdn_url);
        let filename = format!("{}{}", record.canonical_name(), ext);
        let output_path = output_dir.join(&filename);

        let response = self
            .client
            .get(&cdn_url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                phase: Phase::Content,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::ContentFetch {
                status: status.as_u16(),
            });
        }

        let bytes = file::write_body(response, &output_path).await?;
        tracing::debug!(bytes, path = %output_path.display(), "downloaded");

        if write_metadata && ext.eq_ignore_ascii_case(DEFAULT_EXTENSION) {
            let annotator = self.annotator.clone();
            let path = output_path.clone();
            let (taken_at, lat, lon) = (record.timestamp(), record.latitude(), record.longitude());
            if let Err(e) =
                tokio::task::spawn_blocking(move || annotator.annotate(&path, taken_at, lat, lon))
                    .await
            {
                tracing::warn!("EXIF task panicked: {}", e);
            }
        }

        // Stamped after annotation so rewriting the file does not reset it.
        let mtime_path = output_path.clone();
        let ts = record.timestamp().timestamp();
        match tokio::task::spawn_blocking(move || file::set_file_mtime(&mtime_path, ts)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!("Could not set mtime on {}: {}", output_path.display(), e)
            }
            Err(e) => tracing::warn!("mtime task panicked: {}", e),
        }

        Ok(Fetched {
            filename,
            path: output_path,
            bytes,
        })
    }
}

/// File extension (with dot) of the CDN URL's last path segment, ignoring
/// query and fragment. Falls back to `.jpg`.
pub(crate) fn extension_from_url(cdn_url: &str) -> String {
    let path = match Url::parse(cdn_url) {
        Ok(url) => url.path().to_string(),
        Err(_) => cdn_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rfind('.') {
        Some(dot) if dot > 0 && dot + 1 < last.len() => last[dot..].to_string(),
        _ => DEFAULT_EXTENSION.to_string(),
    }
}
