//! JSON HTTP client with a cookie session.

use std::time::Duration;

use reqwest::{Client, ClientBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use abot_core::{TransportError, TransportResult};

/// Longest response body kept in a [`TransportError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Thin wrapper over [`reqwest::Client`] mapping failures to
/// [`TransportError`].
///
/// Cookies set by one response are sent with later requests, so a login
/// request authenticates the whole client.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with a per-request `timeout`.
    pub fn new(timeout: Duration) -> TransportResult<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .cookie_store(true)
            .user_agent(concat!("abot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        Ok(Self { client })
    }

    /// `GET url`, decoding the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> TransportResult<T> {
        debug!(url, "GET");
        let resp = self.client.get(url).send().await.map_err(request_error(url))?;
        decode(url, resp).await
    }

    /// `GET url?query`, decoding the JSON body.
    pub async fn get_json_query<T, Q>(&self, url: &str, query: &Q) -> TransportResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        debug!(url, "GET");
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(request_error(url))?;
        decode(url, resp).await
    }

    /// `POST url` with a JSON body, decoding the JSON response.
    pub async fn post_json<T, B>(&self, url: &str, body: &B) -> TransportResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        debug!(url, "POST");
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(request_error(url))?;
        decode(url, resp).await
    }

    /// `POST url` without a body, decoding the JSON response.
    pub async fn post_empty<T: DeserializeOwned>(&self, url: &str) -> TransportResult<T> {
        debug!(url, "POST");
        let resp = self.client.post(url).send().await.map_err(request_error(url))?;
        decode(url, resp).await
    }

    /// `POST url` with a form body. Returns the status code and ignores the body.
    pub async fn post_form<B>(&self, url: &str, form: &B) -> TransportResult<u16>
    where
        B: Serialize + ?Sized,
    {
        debug!(url, "POST form");
        let resp = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(request_error(url))?;
        Ok(resp.status().as_u16())
    }
}

fn request_error(url: &str) -> impl FnOnce(reqwest::Error) -> TransportError + '_ {
    move |e| TransportError::Request {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

async fn decode<T: DeserializeOwned>(url: &str, resp: Response) -> TransportResult<T> {
    let status = resp.status();
    let body = resp.text().await.map_err(request_error(url))?;
    trace!(url, status = status.as_u16(), body = %body, "Response");

    if !status.is_success() {
        return Err(TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body: truncate(&body, MAX_ERROR_BODY).to_string(),
        });
    }

    serde_json::from_str(&body).map_err(|e| TransportError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("aé", 2), "a");
    }

    #[test]
    fn client_builds() {
        assert!(HttpClient::new(Duration::from_secs(5)).is_ok());
    }
}
