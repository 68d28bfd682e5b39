use async_trait::async_trait;
use reqwest::{Client, Url};

use crate::codec::{HttpMethod, HttpResponse, WireRequest, WireResponse};
use crate::config::TransportConfig;
use crate::endpoint::Credentials;
use crate::error::WallError;
use crate::network::Transport;

/// JSON over HTTP. Every exchange is its own request; there is no link to
/// keep alive beyond the client's connection pool.
#[derive(Debug)]
pub struct HttpTransport {
    base: Url,
    client: Client,
    credentials: Option<Credentials>,
    config: TransportConfig,
    ready: bool,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        credentials: Option<Credentials>,
        config: &TransportConfig,
    ) -> Result<Self, WallError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| WallError::Config(format!("invalid display url {base_url:?}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()
            .map_err(|e| WallError::Config(format!("http client: {e}")))?;
        Ok(Self {
            base,
            client,
            credentials,
            config: config.clone(),
            ready: false,
        })
    }

    fn url(&self, path: &str) -> Result<Url, WallError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| WallError::InvalidCommand(format!("bad request path {path}: {e}")))
    }

    fn classify(&self, e: reqwest::Error) -> WallError {
        if e.is_timeout() {
            WallError::Timeout(self.config.read_timeout())
        } else if e.is_connect() {
            WallError::Link(format!("connect {}: {e}", self.base))
        } else {
            e.into()
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&mut self) -> Result<(), WallError> {
        self.ready = true;
        Ok(())
    }

    async fn exchange(&mut self, request: &WireRequest) -> Result<WireResponse, WallError> {
        let WireRequest::Http(request) = request else {
            return Err(WallError::InvalidCommand(
                "http transport only carries REST calls".into(),
            ));
        };
        let url = self.url(request.path)?;
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        };
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(creds) = &self.credentials {
            if let Some(token) = &creds.token {
                builder = builder.bearer_auth(token);
            } else if let Some(user) = &creds.username {
                builder = builder.basic_auth(user, creds.password.as_ref());
            }
        }

        tracing::debug!(method = ?request.method, path = request.path, base = %self.base, "http exchange");
        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        Ok(WireResponse::Http(HttpResponse { status, body }))
    }

    async fn close(&mut self) {
        self.ready = false;
    }

    fn is_open(&self) -> bool {
        self.ready
    }
}
