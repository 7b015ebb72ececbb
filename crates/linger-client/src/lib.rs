//! Client for the Linger message queue.
//!
//! Linger exposes channels (queues) and topics (fan-out) over HTTP. Consumers
//! long-poll a channel for the next message; this crate turns that into a
//! resumable [`MessageStream`] with a bounded or unbounded retry budget, and
//! offers the same engine through a blocking facade for callers without an
//! async runtime.
//!
//! ```no_run
//! use futures::StreamExt;
//! use linger_client::LingerClient;
//! use serde_json::json;
//!
//! # async fn run() -> linger_client::Result<()> {
//! let client = LingerClient::builder()
//!     .url("http://127.0.0.1:8989/")
//!     .build()?;
//!
//! client.post("jobs", &json!({"msg": "hello"})).await?;
//!
//! let mut messages = client.stream("jobs", 3)?;
//! while let Some(message) = messages.next().await {
//!     println!("{}: {}", message.id, message.body);
//!     client.delete(&message.id).await?;
//! }
//! println!("stream ended: {:?}", messages.end_reason());
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod blocking;
mod client;
pub mod codec;
mod config;
mod error;
mod message;
mod options;
pub mod request;
mod retry;
mod stream;
pub mod transport;

pub use blocking::{BlockingLingerClient, BlockingStream};
pub use client::LingerClient;
pub use codec::{BytesCodec, Codec, CodecError, FnCodec, JsonCodec, TextCodec};
pub use config::{
    ClientBuilder, ClientConfig, DEFAULT_LONG_POLL_WAIT, DEFAULT_URL, LONG_POLL_GRACE,
};
pub use error::{Error, Result};
pub use message::{ChannelStats, Message, MessageId, PostReceipt, PublishReceipt, headers};
pub use options::{BasicAuth, DEFAULT_REQUEST_TIMEOUT, RequestOptions, ResolvedOptions};
pub use retry::BackoffPolicy;
pub use stream::{MessageStream, StreamEnd, StreamSession};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Transport};
