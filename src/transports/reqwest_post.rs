use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::PbmockError;
use crate::transport::{HttpPost, HttpResponse, HttpTransportContext};

/// [`HttpPost`] over `reqwest`, resolving URL templates against a base URL.
pub struct ReqwestPost {
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for ReqwestPost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestPost")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ReqwestPost {
    /// Create a poster for `base_url` with extra default headers.
    ///
    /// Only `http://` and `https://` base URLs are accepted.
    pub fn new(base_url: &str, headers: &HashMap<String, String>) -> Result<Self, PbmockError> {
        let url = reqwest::Url::parse(base_url).map_err(|e| {
            PbmockError::TransportError(format!("Invalid URL '{base_url}': {e}").into())
        })?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(PbmockError::TransportError(
                    format!("Unsupported URL scheme '{scheme}' in '{base_url}'").into(),
                ));
            }
        }

        let mut header_map = HeaderMap::new();
        header_map.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        for (key, value) in headers {
            let (name, val) = header_pair(key, value)?;
            header_map.insert(name, val);
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|e| PbmockError::TransportError(Box::new(e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }
}

fn header_pair(key: &str, value: &str) -> Result<(HeaderName, HeaderValue), PbmockError> {
    let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
        PbmockError::TransportError(format!("Invalid header name '{key}': {e}").into())
    })?;
    let val = HeaderValue::from_str(value).map_err(|e| {
        PbmockError::TransportError(format!("Invalid header value for '{key}': {e}").into())
    })?;
    Ok((name, val))
}

#[async_trait]
impl HttpPost for ReqwestPost {
    async fn post(
        &self,
        url: &str,
        body: serde_json::Value,
        ctx: &HttpTransportContext,
    ) -> Result<HttpResponse, PbmockError> {
        let mut request = self.client.post(self.resolve(url)).json(&body);

        for (key, value) in &ctx.rpc_options.meta {
            let (name, val) = header_pair(key, value)?;
            request = request.header(name, val);
        }
        if let Some(timeout) = ctx.rpc_options.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PbmockError::TransportError(Box::new(e)))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| PbmockError::TransportError(Box::new(e)))?;
        let data = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };

        Ok(HttpResponse {
            data,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
        })
    }
}
