//! Continuous consumption of a channel.
//!
//! A [`StreamSession`] owns the retry state of one `stream()` call and advances
//! one message at a time. [`MessageStream`] drives it as a [`futures::Stream`];
//! the blocking bridge drives the very same session from an iterator, so both
//! modes see identical sequences and endings.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

use crate::client::LingerClient;
use crate::codec::Codec;
use crate::error::Error;
use crate::message::Message;

/// Why a stream stopped yielding messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// More consecutive fetches failed than the retry budget allows.
    Exhausted {
        /// Consecutive failures, i.e. `max_retries + 1`.
        failures: u32,
    },
    /// The client was closed.
    Closed,
}

impl fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { failures } => {
                write!(f, "gave up after {failures} consecutive failures")
            }
            Self::Closed => f.write_str("client closed"),
        }
    }
}

/// Retry state of one stream.
pub struct StreamSession<C: Codec> {
    client: LingerClient<C>,
    channel: String,
    max_retries: u32,
    failures: u32,
    end: Option<StreamEnd>,
}

impl<C: Codec> fmt::Debug for StreamSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("channel", &self.channel)
            .field("max_retries", &self.max_retries)
            .field("failures", &self.failures)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

impl<C: Codec> StreamSession<C> {
    pub(crate) fn new(client: LingerClient<C>, channel: &str, max_retries: u32) -> Self {
        info!(channel, max_retries, "stream started");

        Self {
            client,
            channel: channel.to_string(),
            max_retries,
            failures: 0,
            end: None,
        }
    }

    /// The consumed channel.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Consecutive failed fetches since the last success.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Why the stream ended, once it has.
    #[must_use]
    pub const fn end_reason(&self) -> Option<StreamEnd> {
        self.end
    }

    /// Fetches until a message arrives or the stream ends.
    ///
    /// Any successful fetch, with or without a message, resets the failure
    /// count. A failed fetch is retried after the backoff delay unless the
    /// count exceeds a non-zero `max_retries`. Returns `None` once the stream
    /// has ended, and on every call after that.
    pub async fn next_message(&mut self) -> Option<Message<C::Item>> {
        if self.end.is_some() {
            return None;
        }

        loop {
            match self.client.fetch(&self.channel, false).await {
                Ok(Some(message)) => {
                    self.failures = 0;
                    debug!(channel = %self.channel, id = %message.id, "stream yielded message");
                    return Some(message);
                }
                Ok(None) => {
                    self.failures = 0;
                }
                Err(Error::ClientClosed) => return self.finish(StreamEnd::Closed),
                Err(err) => {
                    self.failures = self.failures.saturating_add(1);

                    if self.max_retries > 0 && self.failures > self.max_retries {
                        error!(
                            channel = %self.channel,
                            failures = self.failures,
                            error = %err,
                            "stream retry budget exhausted"
                        );
                        return self.finish(StreamEnd::Exhausted {
                            failures: self.failures,
                        });
                    }

                    let delay = self.client.backoff().delay_for(self.failures);
                    warn!(
                        channel = %self.channel,
                        failures = self.failures,
                        ?delay,
                        error = %err,
                        "stream fetch failed, backing off"
                    );

                    let shutdown = self.client.shutdown().clone();
                    tokio::select! {
                        biased;
                        () = shutdown.cancelled() => return self.finish(StreamEnd::Closed),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn finish(&mut self, end: StreamEnd) -> Option<Message<C::Item>> {
        info!(channel = %self.channel, %end, "stream ended");
        self.end = Some(end);
        None
    }
}

type Step<C> = (StreamSession<C>, Option<Message<<C as Codec>::Item>>);

enum State<C: Codec> {
    Idle(StreamSession<C>),
    Fetching(BoxFuture<'static, Step<C>>),
    Ended,
}

/// An async stream of messages from one channel.
///
/// Ends (yields `None`) when the retry budget is exhausted or the client is
/// closed; [`end_reason`](Self::end_reason) tells which. Dropping the stream
/// abandons any in-flight fetch and issues no further requests.
pub struct MessageStream<C: Codec> {
    state: State<C>,
    end: Option<StreamEnd>,
}

impl<C: Codec> fmt::Debug for MessageStream<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Idle(_) => "idle",
            State::Fetching(_) => "fetching",
            State::Ended => "ended",
        };
        f.debug_struct("MessageStream")
            .field("state", &state)
            .field("end", &self.end)
            .finish()
    }
}

impl<C: Codec> MessageStream<C> {
    pub(crate) const fn new(session: StreamSession<C>) -> Self {
        Self {
            state: State::Idle(session),
            end: None,
        }
    }

    /// Why the stream ended, once it has.
    #[must_use]
    pub const fn end_reason(&self) -> Option<StreamEnd> {
        self.end
    }
}

impl<C: Codec> Stream for MessageStream<C> {
    type Item = Message<C::Item>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match std::mem::replace(&mut this.state, State::Ended) {
                State::Idle(mut session) => {
                    this.state = State::Fetching(Box::pin(async move {
                        let message = session.next_message().await;
                        (session, message)
                    }));
                }
                State::Fetching(mut step) => match step.as_mut().poll(cx) {
                    Poll::Pending => {
                        this.state = State::Fetching(step);
                        return Poll::Pending;
                    }
                    Poll::Ready((session, Some(message))) => {
                        this.state = State::Idle(session);
                        return Poll::Ready(Some(message));
                    }
                    Poll::Ready((session, None)) => {
                        this.end = session.end_reason();
                        return Poll::Ready(None);
                    }
                },
                State::Ended => return Poll::Ready(None),
            }
        }
    }
}
