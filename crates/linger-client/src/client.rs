//! The async Linger client.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mime::Mime;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use crate::codec::{Codec, JsonCodec};
use crate::config::{ClientBuilder, ClientConfig, LONG_POLL_GRACE};
use crate::error::{Error, Result};
use crate::message::{ChannelStats, Message, MessageId, PostReceipt, PublishReceipt};
use crate::options::{RequestOptions, ResolvedOptions};
use crate::request::{Endpoint, Operation};
use crate::retry::BackoffPolicy;
use crate::stream::{MessageStream, StreamSession};
use crate::transport::{HttpResponse, Transport};

struct Inner<C> {
    base_url: Url,
    codec: C,
    content_type: Mime,
    defaults: RequestOptions,
    backoff: BackoffPolicy,
    long_poll_wait: Duration,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

/// Client for a Linger server.
///
/// Cheap to clone; clones share the connection pool and the lifecycle, so
/// closing any clone closes them all.
pub struct LingerClient<C = JsonCodec<Value>> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for LingerClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for LingerClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LingerClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("content_type", &self.inner.content_type)
            .field("transport", &self.inner.transport)
            .field("closed", &self.closed())
            .finish_non_exhaustive()
    }
}

impl LingerClient {
    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }
}

impl<C> LingerClient<C> {
    pub(crate) fn from_parts(
        base_url: Url,
        codec: C,
        content_type: Mime,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_url,
                codec,
                content_type,
                defaults: config.default_options,
                backoff: config.backoff,
                long_poll_wait: config.long_poll_wait,
                transport,
                shutdown: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The server base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The content type sent with encoded bodies.
    #[must_use]
    pub fn content_type(&self) -> &Mime {
        &self.inner.content_type
    }

    /// The configured codec.
    #[must_use]
    pub fn codec(&self) -> &C {
        &self.inner.codec
    }

    /// The backoff policy applied by streams.
    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        self.inner.backoff
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes the client.
    ///
    /// In-flight requests, long-polls and stream backoff sleeps are aborted and
    /// every later operation fails with [`Error::ClientClosed`]. Calling this
    /// again does nothing.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.shutdown.cancel();
        self.inner.transport.close();

        info!(url = %self.inner.base_url, "linger client closed");
    }

    pub(crate) fn shutdown(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed() {
            Err(Error::ClientClosed)
        } else {
            Ok(())
        }
    }

    /// Resolves per-call options against the client defaults.
    #[must_use]
    pub fn resolve(&self, options: &RequestOptions) -> ResolvedOptions {
        options.resolve(&self.inner.defaults)
    }

    /// Sends one operation.
    ///
    /// Returns `None` for `204 No Content` or an empty body. Nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientClosed`] if the client is or becomes closed,
    /// [`Error::Server`] for a non-2xx status, and the transport's error for
    /// connection failures and timeouts.
    #[instrument(skip(self, operation, options), fields(method = %operation.method(), endpoint = ?operation.endpoint()))]
    pub async fn execute(
        &self,
        operation: Operation,
        options: &ResolvedOptions,
    ) -> Result<Option<HttpResponse>> {
        self.ensure_open()?;

        let request = operation.into_http(&self.inner.base_url, options)?;
        debug!(url = %request.url, timeout = ?request.timeout, "sending request");

        let response = tokio::select! {
            biased;
            () = self.inner.shutdown.cancelled() => return Err(Error::ClientClosed),
            response = self.inner.transport.send(request) => response?,
        };

        if !response.status.is_success() {
            let body = String::from_utf8_lossy(&response.body).into_owned();
            debug!(status = %response.status, %body, "server rejected request");
            return Err(Error::Server {
                status: response.status,
                body,
            });
        }

        if response.is_no_content() {
            debug!(status = %response.status, "no content");
            return Ok(None);
        }

        Ok(Some(response))
    }

    async fn execute_unit(&self, operation: Operation, options: &RequestOptions) -> Result<()> {
        let options = self.resolve(options);
        self.execute(operation, &options).await?;
        Ok(())
    }

    async fn execute_json<T>(&self, operation: Operation) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let options = self.resolve(&RequestOptions::new());
        match self.execute(operation, &options).await? {
            Some(response) => decode_json(&response),
            None => Ok(T::default()),
        }
    }

    /// Lists channels.
    ///
    /// # Errors
    ///
    /// Propagates request and decode failures.
    pub async fn channels(&self) -> Result<Vec<String>> {
        self.execute_json(Operation::get(Endpoint::Channels)).await
    }

    /// Lists topics.
    ///
    /// # Errors
    ///
    /// Propagates request and decode failures.
    pub async fn topics(&self) -> Result<Vec<String>> {
        self.execute_json(Operation::get(Endpoint::Topics)).await
    }

    /// Lists the topics a channel is subscribed to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty channel, and propagates
    /// request and decode failures.
    pub async fn subscriptions(&self, channel: &str) -> Result<Vec<String>> {
        self.execute_json(Operation::get(Endpoint::channel_topics(channel)?))
            .await
    }

    /// Lists the channels subscribed to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty topic, and propagates
    /// request and decode failures.
    pub async fn subscribers(&self, topic: &str) -> Result<Vec<String>> {
        self.execute_json(Operation::get(Endpoint::topic_channels(topic)?))
            .await
    }

    /// Ready and hidden message counts of a channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty channel, and propagates
    /// request and decode failures.
    pub async fn channel_stats(&self, channel: &str) -> Result<ChannelStats> {
        self.execute_json(Operation::get(Endpoint::channel_stats(channel)?))
            .await
    }

    /// Server-wide statistics, as reported by the server.
    ///
    /// # Errors
    ///
    /// Propagates request and decode failures.
    pub async fn stats(&self) -> Result<Value> {
        self.execute_json(Operation::get(Endpoint::Stats)).await
    }

    /// Subscribes a channel to a topic with the client's default options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty name, and propagates request
    /// failures.
    pub async fn subscribe(&self, channel: &str, topic: &str) -> Result<()> {
        self.subscribe_with(channel, topic, &RequestOptions::new())
            .await
    }

    /// Subscribes a channel to a topic. Messages published to the topic are
    /// copied into the channel with the subscription's priority, timeout,
    /// deliver and linger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty name, and propagates request
    /// failures.
    pub async fn subscribe_with(
        &self,
        channel: &str,
        topic: &str,
        options: &RequestOptions,
    ) -> Result<()> {
        let resolved = self.resolve(options);
        let operation = Operation::put(Endpoint::channel_topic(channel, topic)?)
            .message_options(&resolved);
        self.execute(operation, &resolved).await?;
        Ok(())
    }

    /// Removes a channel's subscription to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty name, and propagates request
    /// failures.
    pub async fn unsubscribe(&self, channel: &str, topic: &str) -> Result<()> {
        self.execute_unit(
            Operation::delete(Endpoint::channel_topic(channel, topic)?),
            &RequestOptions::new(),
        )
        .await
    }

    /// Deletes (acknowledges) a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty id, and propagates request
    /// failures.
    pub async fn delete(&self, id: &MessageId) -> Result<()> {
        self.execute_unit(
            Operation::delete(Endpoint::message(id.as_str())?),
            &RequestOptions::new(),
        )
        .await
    }

    /// Removes every message from a channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty channel, and propagates
    /// request failures.
    pub async fn drain(&self, channel: &str) -> Result<()> {
        self.execute_unit(
            Operation::delete(Endpoint::channel(channel)?),
            &RequestOptions::new(),
        )
        .await
    }
}

impl<C: Codec> LingerClient<C> {
    fn encoded(&self, operation: Operation, body: &C::Item) -> Result<Operation> {
        let bytes = self
            .inner
            .codec
            .encode(body)
            .map_err(|err| Error::Encode(err.to_string()))?;

        Ok(operation.body(bytes, self.inner.content_type.clone()))
    }

    /// Posts a message to a channel with the client's default options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty channel, [`Error::Encode`]
    /// if the codec rejects the body, and propagates request and decode
    /// failures.
    pub async fn post(&self, channel: &str, body: &C::Item) -> Result<PostReceipt> {
        self.post_with(channel, body, &RequestOptions::new()).await
    }

    /// Posts a message to a channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty channel, [`Error::Encode`]
    /// if the codec rejects the body, and propagates request and decode
    /// failures.
    pub async fn post_with(
        &self,
        channel: &str,
        body: &C::Item,
        options: &RequestOptions,
    ) -> Result<PostReceipt> {
        let resolved = self.resolve(options);
        let operation = self.encoded(
            Operation::post(Endpoint::channel(channel)?).message_options(&resolved),
            body,
        )?;

        let response = self
            .execute(operation, &resolved)
            .await?
            .ok_or_else(|| Error::Decode("post returned no receipt".to_string()))?;
        decode_json(&response)
    }

    /// Publishes a message to a topic with the client's default options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty topic, [`Error::Encode`] if
    /// the codec rejects the body, and propagates request and decode failures.
    pub async fn publish(&self, topic: &str, body: &C::Item) -> Result<PublishReceipt> {
        self.publish_with(topic, body, &RequestOptions::new()).await
    }

    /// Publishes a message to a topic. The server copies it into every
    /// subscribed channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty topic, [`Error::Encode`] if
    /// the codec rejects the body, and propagates request and decode failures.
    pub async fn publish_with(
        &self,
        topic: &str,
        body: &C::Item,
        options: &RequestOptions,
    ) -> Result<PublishReceipt> {
        let resolved = self.resolve(options);
        let operation = self.encoded(
            Operation::post(Endpoint::topic(topic)?).message_options(&resolved),
            body,
        )?;

        match self.execute(operation, &resolved).await? {
            Some(response) => decode_json(&response),
            None => Ok(PublishReceipt::default()),
        }
    }

    /// Fetches one message from a channel.
    ///
    /// Unless `nowait` is set the server holds the request open until a
    /// message arrives or the long-poll wait expires. `Ok(None)` means no
    /// message was available; it is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty channel,
    /// [`Error::ClientClosed`] if the client is closed during the wait, and
    /// propagates request and decode failures.
    pub async fn fetch(&self, channel: &str, nowait: bool) -> Result<Option<Message<C::Item>>> {
        self.fetch_with(channel, &RequestOptions::new().nowait(nowait))
            .await
    }

    /// Fetches one message from a channel with explicit options.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn fetch_with(
        &self,
        channel: &str,
        options: &RequestOptions,
    ) -> Result<Option<Message<C::Item>>> {
        let resolved = self.resolve(options);
        let mut operation = Operation::get(Endpoint::channel(channel)?);

        if resolved.nowait {
            operation = operation.flag("nowait");
        } else {
            let wait = self.inner.long_poll_wait;
            operation = operation
                .query("wait", wait.as_secs())
                .min_timeout(wait + LONG_POLL_GRACE);
        }

        match self.execute(operation, &resolved).await? {
            Some(response) => Ok(Some(Message::from_response(&self.inner.codec, response)?)),
            None => Ok(None),
        }
    }

    /// Starts a stream of messages from a channel.
    ///
    /// The stream long-polls the channel, yielding messages in server order.
    /// Failed fetches are retried after a backoff delay; after `max_retries + 1`
    /// consecutive failures the stream ends with
    /// [`StreamEnd::Exhausted`](crate::StreamEnd::Exhausted). `0` retries
    /// forever. Closing the client ends the stream with
    /// [`StreamEnd::Closed`](crate::StreamEnd::Closed).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty channel and
    /// [`Error::ClientClosed`] if the client is closed.
    pub fn stream(&self, channel: &str, max_retries: u32) -> Result<MessageStream<C>> {
        Ok(MessageStream::new(self.session(channel, max_retries)?))
    }

    pub(crate) fn session(&self, channel: &str, max_retries: u32) -> Result<StreamSession<C>> {
        self.ensure_open()?;
        Endpoint::channel(channel)?;

        Ok(StreamSession::new(self.clone(), channel, max_retries))
    }
}

fn decode_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body).map_err(|err| Error::Decode(err.to_string()))
}
