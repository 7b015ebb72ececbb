//! Blocking facade over the async client.
//!
//! Every call runs the async operation to completion on a private
//! single-threaded runtime. Do not call these methods from inside another
//! tokio runtime.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Runtime;

use crate::client::LingerClient;
use crate::codec::{Codec, JsonCodec};
use crate::error::Result;
use crate::message::{ChannelStats, Message, MessageId, PostReceipt, PublishReceipt};
use crate::options::RequestOptions;
use crate::stream::{StreamEnd, StreamSession};

/// A Linger client whose calls block the current thread.
pub struct BlockingLingerClient<C = JsonCodec<Value>> {
    client: LingerClient<C>,
    runtime: Arc<Runtime>,
}

impl<C> Clone for BlockingLingerClient<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            runtime: Arc::clone(&self.runtime),
        }
    }
}

impl<C> std::fmt::Debug for BlockingLingerClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingLingerClient")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl<C: Codec> BlockingLingerClient<C> {
    pub(crate) fn new(client: LingerClient<C>, runtime: Runtime) -> Self {
        Self {
            client,
            runtime: Arc::new(runtime),
        }
    }

    /// The underlying async client. Its futures must be driven by
    /// [`block_on`](Self::block_on).
    #[must_use]
    pub const fn client(&self) -> &LingerClient<C> {
        &self.client
    }

    /// Runs any future to completion on the private runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Whether the client has been closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.client.closed()
    }

    /// Closes the client. See [`LingerClient::close`].
    pub fn close(&self) {
        self.client.close();
    }

    /// See [`LingerClient::fetch`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn fetch(&self, channel: &str, nowait: bool) -> Result<Option<Message<C::Item>>> {
        self.block_on(self.client.fetch(channel, nowait))
    }

    /// See [`LingerClient::fetch_with`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn fetch_with(
        &self,
        channel: &str,
        options: &RequestOptions,
    ) -> Result<Option<Message<C::Item>>> {
        self.block_on(self.client.fetch_with(channel, options))
    }

    /// Starts a blocking stream of messages. See [`LingerClient::stream`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`](crate::Error::InvalidName) for an empty
    /// channel and [`Error::ClientClosed`](crate::Error::ClientClosed) if the
    /// client is closed.
    pub fn stream(&self, channel: &str, max_retries: u32) -> Result<BlockingStream<C>> {
        Ok(BlockingStream {
            session: self.client.session(channel, max_retries)?,
            runtime: Arc::clone(&self.runtime),
        })
    }

    /// See [`LingerClient::post`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn post(&self, channel: &str, body: &C::Item) -> Result<PostReceipt> {
        self.block_on(self.client.post(channel, body))
    }

    /// See [`LingerClient::post_with`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn post_with(
        &self,
        channel: &str,
        body: &C::Item,
        options: &RequestOptions,
    ) -> Result<PostReceipt> {
        self.block_on(self.client.post_with(channel, body, options))
    }

    /// See [`LingerClient::publish`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn publish(&self, topic: &str, body: &C::Item) -> Result<PublishReceipt> {
        self.block_on(self.client.publish(topic, body))
    }

    /// See [`LingerClient::publish_with`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn publish_with(
        &self,
        topic: &str,
        body: &C::Item,
        options: &RequestOptions,
    ) -> Result<PublishReceipt> {
        self.block_on(self.client.publish_with(topic, body, options))
    }

    /// See [`LingerClient::channels`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn channels(&self) -> Result<Vec<String>> {
        self.block_on(self.client.channels())
    }

    /// See [`LingerClient::topics`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn topics(&self) -> Result<Vec<String>> {
        self.block_on(self.client.topics())
    }

    /// See [`LingerClient::subscriptions`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn subscriptions(&self, channel: &str) -> Result<Vec<String>> {
        self.block_on(self.client.subscriptions(channel))
    }

    /// See [`LingerClient::subscribers`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn subscribers(&self, topic: &str) -> Result<Vec<String>> {
        self.block_on(self.client.subscribers(topic))
    }

    /// See [`LingerClient::channel_stats`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn channel_stats(&self, channel: &str) -> Result<ChannelStats> {
        self.block_on(self.client.channel_stats(channel))
    }

    /// See [`LingerClient::stats`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn stats(&self) -> Result<Value> {
        self.block_on(self.client.stats())
    }

    /// See [`LingerClient::subscribe`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn subscribe(&self, channel: &str, topic: &str) -> Result<()> {
        self.block_on(self.client.subscribe(channel, topic))
    }

    /// See [`LingerClient::subscribe_with`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn subscribe_with(
        &self,
        channel: &str,
        topic: &str,
        options: &RequestOptions,
    ) -> Result<()> {
        self.block_on(self.client.subscribe_with(channel, topic, options))
    }

    /// See [`LingerClient::unsubscribe`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn unsubscribe(&self, channel: &str, topic: &str) -> Result<()> {
        self.block_on(self.client.unsubscribe(channel, topic))
    }

    /// See [`LingerClient::delete`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn delete(&self, id: &MessageId) -> Result<()> {
        self.block_on(self.client.delete(id))
    }

    /// See [`LingerClient::drain`].
    ///
    /// # Errors
    ///
    /// Propagates every failure of the async call.
    pub fn drain(&self, channel: &str) -> Result<()> {
        self.block_on(self.client.drain(channel))
    }
}

/// Blocking iterator over a channel's messages.
///
/// Each `next()` runs exactly one step of the stream engine; nothing is
/// fetched ahead of the consumer.
pub struct BlockingStream<C: Codec> {
    session: StreamSession<C>,
    runtime: Arc<Runtime>,
}

impl<C: Codec> std::fmt::Debug for BlockingStream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingStream")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl<C: Codec> BlockingStream<C> {
    /// Why the stream ended, once it has.
    #[must_use]
    pub const fn end_reason(&self) -> Option<StreamEnd> {
        self.session.end_reason()
    }
}

impl<C: Codec> Iterator for BlockingStream<C> {
    type Item = Message<C::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.session.next_message())
    }
}
