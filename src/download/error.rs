use std::fmt;

use thiserror::Error;

/// Which step of a two-phase fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// POST exchanging the signed link for a CDN URL.
    Resolve,
    /// GET of the CDN URL.
    Content,
    /// Writing the body to disk.
    Write,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Resolve => "link resolution",
            Phase::Content => "content fetch",
            Phase::Write => "write",
        })
    }
}

/// Per-item fetch failure.
///
/// These never abort a run: the scheduler counts them as failed items and
/// uses `is_rate_limited()` to drive its back-off.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Link resolution failed with HTTP {status}")]
    LinkResolution { status: u16 },

    #[error("Link resolution returned an empty CDN URL")]
    EmptyCdnUrl,

    #[error("Content fetch failed with HTTP {status}")]
    ContentFetch { status: u16 },

    #[error("Transport error during {phase}: {source}")]
    Transport {
        phase: Phase,
        source: reqwest::Error,
    },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),
}

impl FetchError {
    /// HTTP status of the failing response, if a response was received.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            FetchError::LinkResolution { status } | FetchError::ContentFetch { status } => {
                Some(*status)
            }
            FetchError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            FetchError::EmptyCdnUrl | FetchError::Disk(_) => None,
        }
    }

    /// HTTP 429 from either phase. Treated as authoritative back-pressure.
    pub fn is_rate_limited(&self) -> bool {
        self.http_status() == Some(429)
    }

    pub fn phase(&self) -> Phase {
        match self {
            FetchError::LinkResolution { .. } | FetchError::EmptyCdnUrl => Phase::Resolve,
            FetchError::ContentFetch { .. } => Phase::Content,
            FetchError::Transport { phase, .. } => *phase,
            FetchError::Disk(_) => Phase::Write,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_429_is_rate_limited() {
        let e = FetchError::LinkResolution { status: 429 };
        assert!(e.is_rate_limited());
        assert_eq!(e.http_status(), Some(429));
        assert_eq!(e.phase(), Phase::Resolve);
    }

    #[test]
    fn test_content_429_is_rate_limited() {
        let e = FetchError::ContentFetch { status: 429 };
        assert!(e.is_rate_limited());
        assert_eq!(e.phase(), Phase::Content);
    }

    #[test]
    fn test_http_503_not_rate_limited() {
        let e = FetchError::ContentFetch { status: 503 };
        assert!(!e.is_rate_limited());
        assert_eq!(e.http_status(), Some(503));
    }

    #[test]
    fn test_http_403_not_rate_limited() {
        let e = FetchError::LinkResolution { status: 403 };
        assert!(!e.is_rate_limited());
    }

    #[test]
    fn test_empty_cdn_url_has_no_status() {
        let e = FetchError::EmptyCdnUrl;
        assert_eq!(e.http_status(), None);
        assert_eq!(e.phase(), Phase::Resolve);
    }

    #[test]
    fn test_disk_error_is_write_phase() {
        let e = FetchError::Disk(std::io::Error::other("disk full"));
        assert_eq!(e.phase(), Phase::Write);
        assert!(!e.is_rate_limited());
    }

    #[test]
    fn test_connection_error_has_no_status() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let err = rt
            .block_on(client.get("http://127.0.0.1:1").send())
            .unwrap_err();
        let e = FetchError::Transport {
            phase: Phase::Content,
            source: err,
        };
        assert_eq!(e.http_status(), None);
        assert_eq!(e.phase(), Phase::Content);
        assert!(e.to_string().starts_with("Transport error during content fetch"));
    }
}
