use url::Url;

/// Connection settings for the websocket transport. Values are passed to the
/// server exactly as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    /// `ws` or `wss`.
    pub scheme: String,
    /// Application key identifying the app on the server.
    pub key: String,
    /// Where private channel subscriptions are authorized. Either an absolute
    /// URL or a path on the transport host.
    pub auth_endpoint: String,
    /// Bearer token sent to the authorization endpoint.
    pub auth_token: Option<String>,
}

impl TransportConfig {
    pub fn new(host: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 443,
            scheme: "wss".to_string(),
            key: key.into(),
            auth_endpoint: "/broadcasting/auth".to_string(),
            auth_token: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_auth_endpoint(mut self, auth_endpoint: impl Into<String>) -> Self {
        self.auth_endpoint = auth_endpoint.into();
        self
    }

    pub fn with_auth_token(mut self, auth_token: impl Into<String>) -> Self {
        self.auth_token = Some(auth_token.into());
        self
    }

    pub fn socket_url(&self) -> String {
        format!(
            "{}://{}:{}/app/{}?protocol=7&client=beacon-rs&version={}&flash=false",
            self.scheme,
            self.host,
            self.port,
            self.key,
            env!("CARGO_PKG_VERSION")
        )
    }

    pub fn auth_url(&self) -> Result<Url, url::ParseError> {
        match Url::parse(&self.auth_endpoint) {
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let http_scheme = if self.scheme.eq_ignore_ascii_case("wss") {
                    "https"
                } else {
                    "http"
                };
                Url::parse(&format!("{http_scheme}://{}:{}", self.host, self.port))?
                    .join(&self.auth_endpoint)
            }
            other => other,
        }
    }
}
