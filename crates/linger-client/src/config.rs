//! Client configuration and construction.

use std::sync::Arc;
use std::time::Duration;

use mime::Mime;
use serde_json::Value;
use tracing::info;
use url::Url;

use crate::blocking::BlockingLingerClient;
use crate::client::LingerClient;
use crate::codec::{Codec, JsonCodec};
use crate::error::{Error, Result};
use crate::options::RequestOptions;
use crate::retry::BackoffPolicy;
use crate::transport::{HttpTransport, Transport};

/// Server address used when none is configured.
pub const DEFAULT_URL: &str = "http://127.0.0.1:8989/";

/// How long the server may hold a fetch open waiting for a message.
pub const DEFAULT_LONG_POLL_WAIT: Duration = Duration::from_secs(20);

/// Extra transport time granted to a long-poll beyond the server-side wait.
pub const LONG_POLL_GRACE: Duration = Duration::from_secs(5);

/// Configuration shared by every operation of one client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the Linger server.
    pub url: String,
    /// Content type of encoded bodies. Defaults to the codec's own.
    pub content_type: Option<Mime>,
    /// Client-level request options, layered under per-call options.
    pub default_options: RequestOptions,
    /// Delay policy between failed stream fetches.
    pub backoff: BackoffPolicy,
    /// Server-side wait of a long-poll fetch.
    pub long_poll_wait: Duration,
    /// TCP connect timeout of the HTTP transport.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            content_type: None,
            default_options: RequestOptions::default(),
            backoff: BackoffPolicy::default(),
            long_poll_wait: DEFAULT_LONG_POLL_WAIT,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Builder for creating Linger clients.
pub struct ClientBuilder<C = JsonCodec<Value>> {
    config: ClientConfig,
    codec: C,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Create a new client builder with the JSON codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            codec: JsonCodec::new(),
            transport: None,
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ClientBuilder<C> {
    /// Set the server base URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Replace the codec, changing the client's message body type.
    #[must_use]
    pub fn codec<C2: Codec>(self, codec: C2) -> ClientBuilder<C2> {
        ClientBuilder {
            config: self.config,
            codec,
            transport: self.transport,
        }
    }

    /// Set the content type sent with encoded bodies.
    #[must_use]
    pub fn content_type(mut self, content_type: Mime) -> Self {
        self.config.content_type = Some(content_type);
        self
    }

    /// Set the client-level default request options.
    #[must_use]
    pub fn default_options(mut self, options: RequestOptions) -> Self {
        self.config.default_options = options;
        self
    }

    /// Set the backoff policy used by streams.
    #[must_use]
    pub const fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Set the server-side wait of long-poll fetches.
    #[must_use]
    pub const fn long_poll_wait(mut self, wait: Duration) -> Self {
        self.config.long_poll_wait = wait;
        self
    }

    /// Set the TCP connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Use a custom transport instead of the built-in HTTP one.
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// The configuration collected so far.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl<C: Codec> ClientBuilder<C> {
    /// Build the async client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the URL is not an absolute
    /// `http`/`https` URL, the codec does not accept the content type, the
    /// backoff policy or long-poll wait is out of range, or the HTTP transport
    /// cannot be created.
    pub fn build(self) -> Result<LingerClient<C>> {
        let base_url = parse_base_url(&self.config.url)?;

        let content_type = self
            .config
            .content_type
            .clone()
            .unwrap_or_else(|| self.codec.content_type());
        if !self.codec.accepts(&content_type) {
            return Err(Error::InvalidConfig(format!(
                "codec cannot handle content type {content_type}"
            )));
        }

        self.config.backoff.validate()?;
        if self.config.long_poll_wait.as_secs() == 0 {
            return Err(Error::InvalidConfig(
                "long-poll wait must be at least one second".to_string(),
            ));
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.config.connect_timeout)?),
        };

        info!(url = %base_url, %content_type, "linger client ready");

        Ok(LingerClient::from_parts(
            base_url,
            self.codec,
            content_type,
            self.config,
            transport,
        ))
    }

    /// Build a client that blocks the calling thread on a private
    /// single-threaded runtime.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`build`](Self::build), or
    /// [`Error::InvalidConfig`] if the runtime cannot be started.
    pub fn build_blocking(self) -> Result<BlockingLingerClient<C>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| Error::InvalidConfig(format!("failed to start runtime: {err}")))?;

        let client = {
            let _guard = runtime.enter();
            self.build()?
        };

        Ok(BlockingLingerClient::new(client, runtime))
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|err| Error::InvalidConfig(format!("url {raw:?}: {err}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidConfig(format!(
            "url {raw:?}: unsupported scheme {}",
            url.scheme()
        )));
    }
    if url.cannot_be_a_base() || url.host().is_none() {
        return Err(Error::InvalidConfig(format!("url {raw:?} has no host")));
    }

    Ok(url)
}
