use reqwest::header::RETRY_AFTER;
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Proxy, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{DownloadError, Result};

const USER_AGENT: &str = concat!("download-task/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 30;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// A proxy server and optional credentials for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyEndpoint {
    fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn with_credentials(&self, proxy: Proxy) -> Proxy {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => proxy.basic_auth(user, pass),
            _ => proxy,
        }
    }
}

/// Proxies per target scheme. When both are unset the environment's
/// proxy variables apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub http: Option<ProxyEndpoint>,
    #[serde(default)]
    pub https: Option<ProxyEndpoint>,
}

impl ProxySettings {
    fn apply(&self, mut builder: reqwest::ClientBuilder) -> Result<reqwest::ClientBuilder> {
        if let Some(endpoint) = &self.http {
            let proxy = Proxy::http(endpoint.url()).map_err(|e| proxy_error(endpoint, e))?;
            builder = builder.proxy(endpoint.with_credentials(proxy));
        }
        if let Some(endpoint) = &self.https {
            let proxy = Proxy::https(endpoint.url()).map_err(|e| proxy_error(endpoint, e))?;
            builder = builder.proxy(endpoint.with_credentials(proxy));
        }
        Ok(builder)
    }
}

fn proxy_error(endpoint: &ProxyEndpoint, source: reqwest::Error) -> DownloadError {
    DownloadError::Request {
        url: endpoint.url(),
        source,
    }
}

/// Settings shared by every client a factory builds
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub compress: bool,
    pub proxy: ProxySettings,
    pub quiet: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            compress: true,
            proxy: ProxySettings::default(),
            quiet: false,
        }
    }
}

/// A reqwest client plus the retry policy it was built for
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    retries: i32,
    quiet: bool,
}

impl HttpClient {
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Sends the request produced by `build`, retrying 429/503 responses
    /// and, for idempotent methods only, transport failures. A negative
    /// retry count retries forever.
    pub async fn send<F>(&self, build: F) -> Result<Response, reqwest::Error>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let may_retry = self.may_retry(attempt);

            let request = build(&self.client).build()?;
            let idempotent = is_idempotent(request.method());

            match self.client.execute(request).await {
                Ok(response) if may_retry && is_retryable_status(response.status()) => {
                    self.log_retry(attempt);
                    debug!("Status code: {}", response.status().as_u16());
                    let delay = retry_after(&response).unwrap_or(DEFAULT_RETRY_INTERVAL);
                    sleep(delay).await;
                }
                Ok(response) => return Ok(response),
                Err(e) if may_retry && idempotent && is_retryable_error(&e) => {
                    self.log_retry(attempt);
                    debug!("Request attempt failed: {}", e);
                    sleep(DEFAULT_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn may_retry(&self, attempt: u32) -> bool {
        self.retries < 0 || attempt <= self.retries as u32
    }

    fn log_retry(&self, attempt: u32) {
        if self.quiet {
            return;
        }
        if self.retries < 0 {
            warn!("Request attempt {} failed. Retrying ...", attempt);
        } else {
            warn!(
                "Request attempt {}/{} failed. Retrying ...",
                attempt, self.retries
            );
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

/// A failed non-idempotent request may already have reached the server
fn is_idempotent(method: &Method) -> bool {
    method.is_idempotent()
}

fn is_retryable_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request()
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    scheme: String,
    host: String,
    port: Option<u16>,
    accept_any_certificate: bool,
    retries: i32,
}

/// Builds HTTP clients and caches them per host and configuration until
/// [`ClientFactory::close`] is called
#[derive(Debug)]
pub struct ClientFactory {
    settings: ClientSettings,
    clients: HashMap<ClientKey, Arc<HttpClient>>,
}

impl ClientFactory {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            clients: HashMap::new(),
        }
    }

    pub fn client_for(
        &mut self,
        url: &Url,
        accept_any_certificate: bool,
        retries: i32,
    ) -> Result<Arc<HttpClient>> {
        let key = ClientKey {
            scheme: url.scheme().to_string(),
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port(),
            accept_any_certificate,
            retries,
        };

        if let Some(client) = self.clients.get(&key) {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(self.build(url, accept_any_certificate, retries)?);
        self.clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Releases all cached clients
    pub fn close(&mut self) {
        debug!("Releasing {} cached HTTP clients", self.clients.len());
        self.clients.clear();
    }

    fn build(&self, url: &Url, accept_any_certificate: bool, retries: i32) -> Result<HttpClient> {
        let mut builder = Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .read_timeout(self.settings.read_timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .gzip(self.settings.compress)
            .user_agent(USER_AGENT);

        if accept_any_certificate && url.scheme() == "https" {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }

        builder = self.settings.proxy.apply(builder)?;

        let client = builder.build().map_err(|e| DownloadError::Request {
            url: url.to_string(),
            source: e,
        })?;

        Ok(HttpClient {
            client,
            retries,
            quiet: self.settings.quiet,
        })
    }
}

impl Drop for ClientFactory {
    fn drop(&mut self) {
        self.clients.clear();
    }
}
