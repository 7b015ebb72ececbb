//! In-memory Linger server for tests and offline use.
//!
//! [`MemoryServer`] keeps channels, topics and subscriptions in process and
//! answers the same HTTP contract as a real Linger server. Its
//! [`MemoryTransport`] plugs into [`linger_client::ClientBuilder::transport`],
//! so the whole client stack (request building, long-polling, streams, the
//! blocking bridge) runs without a network. Fetch outcomes can be scripted with
//! [`Fault`]s to exercise retry behavior.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod queue;
mod server;

pub use server::{Fault, MemoryServer};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use linger_client::{Error, HttpRequest, HttpResponse, Result, Transport};
use tracing::debug;

/// Transport routing requests to a [`MemoryServer`].
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    server: MemoryServer,
    closed: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Creates a transport for `server`.
    #[must_use]
    pub fn new(server: MemoryServer) -> Self {
        Self {
            server,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The server behind this transport.
    #[must_use]
    pub const fn server(&self) -> &MemoryServer {
        &self.server
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ClientClosed);
        }

        debug!(method = %request.method, url = %request.url, "memory transport request");
        self.server.handle(request).await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
