//! Streaming transport.
//!
//! [`Transport`] is the seam between the connection state machine and the
//! network. [`HttpTransport`] speaks SSE over `reqwest`; tests substitute
//! [`crate::testing::ScriptedTransport`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use scout_core::errors::TransportError;
use scout_core::text::preview;
use tracing::debug;
use url::Url;

use crate::sse::{Frame, SseParserOptions, parse_sse_frames};

/// Stream of frames from one open connection.
///
/// Ends (`None`) when the server closes the body; yields `Err` once on a
/// read failure.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// Opens streaming connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a stream to `url`. Resolves once the handshake succeeds.
    async fn open(&self, url: &Url) -> Result<FrameStream, TransportError>;
}

/// Characters left unescaped by `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Build the stream URL with the credential as a query parameter.
///
/// The handshake cannot carry custom headers, so the credential travels in
/// the query string. An existing query on `endpoint` is preserved.
pub fn build_stream_url(endpoint: &str, param: &str, credential: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(endpoint)?;
    let pair = format!(
        "{}={}",
        utf8_percent_encode(param, COMPONENT),
        utf8_percent_encode(credential, COMPONENT)
    );
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{pair}"),
        _ => pair,
    };
    url.set_query(Some(&query));
    Ok(url)
}

/// SSE over HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    parser: SseParserOptions,
}

impl HttpTransport {
    /// Build a transport whose handshake gives up after `connect_timeout`.
    ///
    /// No overall request timeout is set: the stream is long-lived.
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Wrap an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            parser: SseParserOptions::default(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &Url) -> Result<FrameStream, TransportError> {
        debug!(host = url.host_str().unwrap_or_default(), path = url.path(), "opening SSE request");
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: preview(&body, 200),
            });
        }

        Ok(Box::pin(parse_sse_frames(
            response.bytes_stream(),
            &self.parser,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn appends_token_param() {
        let url = build_stream_url("https://api.scout.app/events", "token", "abc123").unwrap();
        assert_eq!(url.as_str(), "https://api.scout.app/events?token=abc123");
    }

    #[test]
    fn encodes_reserved_characters() {
        let url = build_stream_url("https://api.scout.app/events", "token", "a+b/c=d&e f").unwrap();
        assert_eq!(url.query(), Some("token=a%2Bb%2Fc%3Dd%26e%20f"));
    }

    #[test]
    fn keeps_jwt_safe_characters() {
        let url = build_stream_url("https://api.scout.app/events", "token", "h.p_s-i").unwrap();
        assert_eq!(url.query(), Some("token=h.p_s-i"));
    }

    #[test]
    fn preserves_existing_query() {
        let url =
            build_stream_url("https://api.scout.app/events?channel=jobs", "token", "t").unwrap();
        assert_eq!(url.query(), Some("channel=jobs&token=t"));
    }

    #[test]
    fn custom_param_name() {
        let url = build_stream_url("https://api.scout.app/events", "access_token", "t").unwrap();
        assert_eq!(url.query(), Some("access_token=t"));
    }

    #[test]
    fn invalid_endpoint() {
        assert_matches!(
            build_stream_url("not a url", "token", "t"),
            Err(TransportError::InvalidUrl(_))
        );
    }

    #[test]
    fn http_transport_builds() {
        let _transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
    }
}
