//! HTTP client for the Hetzner Cloud API
//!
//! Bearer-token authenticated JSON client. Every service module
//! (actions, certificates, ...) builds on the request helpers here.

use crate::error::{ErrorEnvelope, HcloudError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://api.hetzner.cloud/v1";

const PER_PAGE: u32 = 50;

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub token: String,
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: token.into(),
            user_agent: format!("hcloud-provider/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Hetzner Cloud API client
///
/// Cheap to share by reference; build one per process.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

/// Filters for list endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOpts {
    pub label_selector: Option<String>,
    pub name: Option<String>,
}

impl ListOpts {
    pub fn with_selector(selector: impl Into<String>) -> Self {
        Self {
            label_selector: Some(selector.into()),
            name: None,
        }
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            label_selector: None,
            name: Some(name.into()),
        }
    }

    fn query(&self, page: u32) -> Vec<(&'static str, String)> {
        let mut query = vec![("page", page.to_string()), ("per_page", PER_PAGE.to_string())];
        if let Some(selector) = &self.label_selector {
            query.push(("label_selector", selector.clone()));
        }
        if let Some(name) = &self.name {
            query.push(("name", name.clone()));
        }
        query
    }
}

#[derive(Debug, serde::Deserialize)]
struct Meta {
    pagination: Option<Pagination>,
}

#[derive(Debug, serde::Deserialize)]
struct Pagination {
    next_page: Option<u32>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// Send a request and turn non-2xx responses into errors
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await?;
        match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => Err(HcloudError::Api(envelope.error)),
            Err(_) => Err(HcloudError::UnexpectedResponse {
                status: status.as_u16(),
                body,
            }),
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        tracing::debug!("GET {}", path);
        let response = self.send(self.http.get(self.url(path))).await?;
        Self::decode(response).await
    }

    /// GET that maps a `not_found` error to `None`
    pub(crate) async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.get(path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        tracing::debug!("POST {}", path);
        let response = self.send(self.http.post(self.url(path)).json(body)).await?;
        Self::decode(response).await
    }

    pub(crate) async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        tracing::debug!("PUT {}", path);
        let response = self.send(self.http.put(self.url(path)).json(body)).await?;
        Self::decode(response).await
    }

    pub(crate) async fn delete(&self, path: &str) -> Result<()> {
        tracing::debug!("DELETE {}", path);
        self.send(self.http.delete(self.url(path))).await?;
        Ok(())
    }

    /// Fetch every page of a list endpoint
    ///
    /// `key` is the name of the array in the response body, e.g. `certificates`.
    pub(crate) async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &str,
        opts: &ListOpts,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1;

        loop {
            tracing::debug!("GET {} (page {})", path, page);
            let request = self.http.get(self.url(path)).query(&opts.query(page));
            let response = self.send(request).await?;
            let mut body: serde_json::Value = Self::decode(response).await?;

            let batch: Vec<T> = serde_json::from_value(body[key].take())?;
            items.extend(batch);

            let meta: Option<Meta> = serde_json::from_value(body["meta"].take())?;
            match meta.and_then(|m| m.pagination).and_then(|p| p.next_page) {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        Ok(items)
    }
}
