use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{HttpRequest, HttpResponse, Transport};
use crate::error::{Error, Result};

/// Connection pools for the two compression settings a request can ask for.
#[derive(Clone, Debug)]
struct Clients {
    compressed: reqwest::Client,
    plain: reqwest::Client,
}

/// Transport over reqwest's pooled HTTP client.
#[derive(Debug)]
pub struct HttpTransport {
    clients: RwLock<Option<Clients>>,
}

impl HttpTransport {
    /// Creates the connection pools.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the TLS backend or resolver cannot be
    /// initialised.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let compressed = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        let plain = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .no_gzip()
            .no_brotli()
            .build()?;

        Ok(Self {
            clients: RwLock::new(Some(Clients { compressed, plain })),
        })
    }

    fn client(&self, use_gzip: bool) -> Result<reqwest::Client> {
        let clients = self.clients.read();
        let clients = clients.as_ref().ok_or(Error::ClientClosed)?;

        Ok(if use_gzip {
            clients.compressed.clone()
        } else {
            clients.plain.clone()
        })
    }
}

fn map_send_error(err: reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::Network(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let client = self.client(request.use_gzip)?;
        let timeout = request.timeout;

        let mut builder = client
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(timeout);
        if let Some(auth) = request.auth {
            builder = builder.basic_auth(auth.username, auth.password);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| map_send_error(err, timeout))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| map_send_error(err, timeout))?;

        debug!(%status, len = body.len(), "received response");

        Ok(HttpResponse::new(status, headers, body))
    }

    fn close(&self) {
        // Dropping both clients releases their idle pooled connections.
        self.clients.write().take();
    }
}
