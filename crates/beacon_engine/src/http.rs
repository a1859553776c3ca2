use std::time::Duration;

use beacon_core::{Method, RequestConfig};
use beacon_logging::beacon_trace;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use tokio_util::sync::CancellationToken;

use crate::{FailureKind, HttpResponse, RequestError};

#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Base that relative locators such as `/posts` are resolved against.
    pub base_url: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    /// Sent with every request; per-request headers with the same name win.
    pub default_headers: Vec<(String, String)>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_bytes: 5 * 1024 * 1024,
            default_headers: vec![("Accept".to_string(), "application/json".to_string())],
        }
    }
}

impl HttpSettings {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    /// Performs one request. Resolves to `FailureKind::Cancelled` as soon as
    /// `cancel` fires, whatever the transport is doing.
    async fn request(
        &self,
        locator: &str,
        config: &RequestConfig,
        cancel: CancellationToken,
    ) -> Result<HttpResponse, RequestError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestClient {
    settings: HttpSettings,
    base_url: Option<Url>,
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(settings: HttpSettings) -> Result<Self, RequestError> {
        let base_url = settings
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|err| {
                RequestError::new(FailureKind::InvalidLocator, format!("invalid base url: {err}"))
            })?;

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
            .build()
            .map_err(|err| RequestError::new(FailureKind::Network, err.to_string()))?;

        Ok(Self {
            settings,
            base_url,
            client,
        })
    }

    fn resolve(&self, locator: &str) -> Result<Url, RequestError> {
        match Url::parse(locator) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
                Some(base) => base
                    .join(locator)
                    .map_err(|err| RequestError::new(FailureKind::InvalidLocator, err.to_string())),
                None => Err(RequestError::new(
                    FailureKind::InvalidLocator,
                    format!("relative locator {locator} needs a base url"),
                )),
            },
            Err(err) => Err(RequestError::new(FailureKind::InvalidLocator, err.to_string())),
        }
    }

    async fn send(&self, mut url: Url, config: &RequestConfig) -> Result<HttpResponse, RequestError> {
        if !config.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&config.query);
        }

        let mut builder = self.client.request(map_method(config.method), url);
        for (name, value) in &self.settings.default_headers {
            if !config.headers.keys().any(|key| key.eq_ignore_ascii_case(name)) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        for (name, value) in &config.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &config.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RequestError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(RequestError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large",
                ));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = body.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(RequestError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large",
                ));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            final_url,
            content_type,
            body,
        })
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestClient {
    async fn request(
        &self,
        locator: &str,
        config: &RequestConfig,
        cancel: CancellationToken,
    ) -> Result<HttpResponse, RequestError> {
        let url = self.resolve(locator)?;
        beacon_trace!("{} {}", config.method.as_str(), url);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RequestError::cancelled()),
            result = self.send(url, config) => result,
        }
    }
}

fn map_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn map_reqwest_error(err: reqwest::Error) -> RequestError {
    if err.is_timeout() {
        return RequestError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return RequestError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    RequestError::new(FailureKind::Network, err.to_string())
}
