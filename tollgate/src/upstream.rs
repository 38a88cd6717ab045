//! The upstream HTTP client.
//!
//! Forwards the already-mediated request to the real origin and relays the
//! response verbatim. The client never follows redirects and never
//! decompresses: response bytes belong to the guest exactly as the origin
//! produced them.

use bytes::Bytes;
use http::HeaderMap;
use http::Method;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid upstream URL {0:?}")]
    InvalidUrl(String),
    #[error("upstream request failed: {0}")]
    Exchange(#[from] reqwest::Error),
    #[error("could not build upstream client: {0}")]
    Build(reqwest::Error),
}

/// A buffered upstream response, ready to relay.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: http::StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct UpstreamClient {
    inner: reqwest::Client,
}

impl UpstreamClient {
    pub fn new() -> Result<Self, UpstreamError> {
        let inner = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(UpstreamError::Build)?;
        Ok(Self { inner })
    }

    /// Sends the request and buffers the response. `headers` must already
    /// have `Host` stripped and secrets substituted.
    pub async fn forward(
        &self,
        scheme: &str,
        host: &str,
        path_and_query: &str,
        method: Method,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url_text = format!("{scheme}://{host}{path_and_query}");
        let url = url::Url::parse(&url_text).map_err(|_| UpstreamError::InvalidUrl(url_text))?;

        let response = self
            .inner
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let mut headers = response.headers().clone();
        let body = response.bytes().await?;
        // The body is re-framed from a buffer; hop-by-hop framing headers
        // from the origin no longer apply.
        headers.remove(http::header::TRANSFER_ENCODING);
        headers.remove(http::header::CONNECTION);

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
