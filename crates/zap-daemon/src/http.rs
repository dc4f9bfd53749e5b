/// Size- and time-capped HTTP fetching for playlists, logos and the
/// reachability probe.
///
/// Everything goes through the `Fetcher` trait so the core and the logo
/// scheduler can be driven by an in-memory fake in tests.
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("response larger than {limit} bytes")]
    TooLarge { limit: usize },
    #[error("empty response")]
    Empty,
    #[error("timed out")]
    Timeout,
    #[error("invalid url '{0}'")]
    InvalidUrl(String),
}

/// Per-request caps.  Redirect limits live on the client.
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub max_bytes: usize,
    pub timeout: Duration,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` and return the whole body.  Fails on non-2xx, an empty body,
    /// a body over `limits.max_bytes`, or when `limits.timeout` elapses.
    async fn get(&self, url: &str, limits: &FetchLimits) -> Result<Vec<u8>, FetchError>;

    /// HEAD `url`; any 2xx/3xx answer counts as reachable.
    async fn head(&self, url: &str, timeout: Duration) -> Result<(), FetchError>;
}

// ── reqwest implementation ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, max_redirects: usize) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .build()?;
        Ok(Self { client })
    }

    async fn fetch_capped(&self, url: Url, max_bytes: usize) -> Result<Vec<u8>, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        // Reject early when the server is honest about the size.
        if let Some(len) = resp.content_length() {
            if len > max_bytes as u64 {
                return Err(FetchError::TooLarge { limit: max_bytes });
            }
        }
        collect_capped(resp.bytes_stream(), max_bytes).await
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str, limits: &FetchLimits) -> Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        debug!("http: GET {}", parsed);
        match tokio::time::timeout(limits.timeout, self.fetch_capped(parsed, limits.max_bytes))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }

    async fn head(&self, url: &str, timeout: Duration) -> Result<(), FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        let resp = match tokio::time::timeout(timeout, self.client.head(parsed).send()).await {
            Ok(resp) => resp?,
            Err(_) => return Err(FetchError::Timeout),
        };
        let status = resp.status();
        if status.is_success() || status.is_redirection() {
            Ok(())
        } else {
            Err(FetchError::Status(status.as_u16()))
        }
    }
}

/// Drain a body stream, aborting as soon as it grows past `max_bytes`.
pub async fn collect_capped<S, B, E>(stream: S, max_bytes: usize) -> Result<Vec<u8>, FetchError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    FetchError: From<E>,
{
    let mut stream = std::pin::pin!(stream);
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let chunk = chunk.as_ref();
        if body.len() + chunk.len() > max_bytes {
            return Err(FetchError::TooLarge { limit: max_bytes });
        }
        body.extend_from_slice(chunk);
    }
    if body.is_empty() {
        return Err(FetchError::Empty);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(sizes: &[usize]) -> impl Stream<Item = Result<Vec<u8>, FetchError>> {
        stream::iter(
            sizes
                .iter()
                .map(|&n| Ok(vec![b'x'; n]))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_collect_within_cap() {
        let body = collect_capped(chunks(&[4, 4, 2]), 10).await.unwrap();
        assert_eq!(body.len(), 10);
    }

    #[tokio::test]
    async fn test_collect_aborts_over_cap() {
        let err = collect_capped(chunks(&[6, 6, 6]), 10).await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 10 }));
    }

    #[tokio::test]
    async fn test_collect_empty_body() {
        let err = collect_capped(chunks(&[]), 10).await.unwrap_err();
        assert!(matches!(err, FetchError::Empty));
    }

    #[tokio::test]
    async fn test_collect_propagates_stream_error() {
        let s = stream::iter(vec![Ok(vec![1u8, 2]), Err(FetchError::Timeout)]);
        let err = collect_capped(s, 10).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_io() {
        let fetcher = HttpFetcher::new("zaptv-test", 1).unwrap();
        let limits = FetchLimits {
            max_bytes: 16,
            timeout: Duration::from_secs(1),
        };
        let err = fetcher.get("not a url", &limits).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
        assert_eq!(err.to_string(), "invalid url 'not a url'");
    }
}
