use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use linger_client::request::Endpoint;
use linger_client::{BasicAuth, Error, HttpRequest, HttpResponse, Result, headers};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::MemoryTransport;
use crate::queue::{Delivery, MessageAttrs, Queue, Stored};

/// Server-side wait when a fetch names neither `wait` nor `nowait`.
const DEFAULT_WAIT: Duration = Duration::from_secs(20);

/// A scripted outcome for the next fetch, replacing the server's answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// The connection fails.
    Network,
    /// The request times out.
    Timeout,
    /// The server answers with this status and no message.
    Status(StatusCode),
    /// The server answers with a message whose body no codec can read.
    Malformed,
    /// The server answers `204 No Content` immediately.
    Empty,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    channels: BTreeMap<String, Queue>,
    /// topic -> channel -> attributes of copied messages
    subscriptions: BTreeMap<String, BTreeMap<String, MessageAttrs>>,
    faults: VecDeque<Fault>,
    credentials: Option<BasicAuth>,
    fetches: u64,
    posted: u64,
    delivered: u64,
}

impl State {
    fn store(
        &mut self,
        channel: &str,
        body: Bytes,
        content_type: Option<String>,
        topic: Option<String>,
        attrs: MessageAttrs,
    ) -> u64 {
        self.next_id += 1;
        self.posted += 1;
        let id = self.next_id;

        self.channels.entry(channel.to_string()).or_default().push(Stored {
            id,
            body,
            content_type,
            topic,
            attrs,
            received: unix_now(),
            posted_at: Instant::now(),
            delivered: 0,
            hidden_until: None,
        });

        id
    }

    fn take_next(&mut self, channel: &str) -> (Option<Delivery>, Option<Instant>) {
        let Some(queue) = self.channels.get_mut(channel) else {
            return (None, None);
        };

        let now = Instant::now();
        queue.expire(now);
        let delivery = queue.take_next(channel, now);
        if delivery.is_some() {
            self.delivered += 1;
        }

        (delivery, queue.next_deadline())
    }

    fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(name, _)| name.clone())
            .chain(
                self.subscriptions
                    .values()
                    .flat_map(|channels| channels.keys().cloned()),
            )
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn expire_all(&mut self) {
        let now = Instant::now();
        for queue in self.channels.values_mut() {
            queue.expire(now);
        }
    }
}

/// Query parameters a Linger server understands.
#[derive(Debug, Default)]
struct Query {
    nowait: bool,
    wait: Option<u64>,
    priority: Option<i64>,
    timeout: Option<u64>,
    deliver: Option<u64>,
    linger: Option<u64>,
}

impl Query {
    fn parse(request: &HttpRequest) -> std::result::Result<Self, String> {
        fn number<T: std::str::FromStr>(key: &str, value: &str) -> std::result::Result<T, String> {
            value
                .parse()
                .map_err(|_| format!("invalid value for {key}: {value:?}"))
        }

        let mut query = Self::default();
        for (key, value) in request.url.query_pairs() {
            match key.as_ref() {
                "nowait" => query.nowait = true,
                "wait" => query.wait = Some(number(&key, &value)?),
                "priority" => query.priority = Some(number(&key, &value)?),
                "timeout" => query.timeout = Some(number(&key, &value)?),
                "deliver" => query.deliver = Some(number(&key, &value)?),
                "linger" => query.linger = Some(number(&key, &value)?),
                _ => {}
            }
        }

        Ok(query)
    }

    fn attrs_over(&self, base: MessageAttrs) -> MessageAttrs {
        MessageAttrs {
            priority: self.priority.unwrap_or(base.priority),
            timeout: self.timeout.unwrap_or(base.timeout),
            deliver: self.deliver.unwrap_or(base.deliver),
            linger: self.linger.unwrap_or(base.linger),
        }
    }
}

/// An in-process Linger server.
///
/// Clones share state. Messages are ordered by priority (lower first) and post
/// order; a fetched message stays hidden for its timeout and is redelivered
/// unless deleted, up to its delivery limit; undelivered messages are purged
/// after their linger time. Long-polling fetches wake as soon as a message is
/// posted.
#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<State>>,
    posted: Arc<Notify>,
}

impl fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryServer")
            .field("channels", &state.channels.len())
            .field("topics", &state.subscriptions.len())
            .field("fetches", &state.fetches)
            .finish_non_exhaustive()
    }
}

impl MemoryServer {
    /// Creates an empty server.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects requests that do not carry exactly these credentials.
    #[must_use]
    pub fn with_credentials(self, credentials: BasicAuth) -> Self {
        self.state.lock().credentials = Some(credentials);
        self
    }

    /// A transport that routes requests to this server.
    #[must_use]
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport::new(self.clone())
    }

    /// Queues `fault` as the answer to the next `count` fetches, after any
    /// faults already queued.
    pub fn fail_fetches(&self, count: usize, fault: Fault) {
        self.state
            .lock()
            .faults
            .extend(std::iter::repeat_n(fault, count));
    }

    /// Appends one scripted fetch outcome.
    pub fn push_fault(&self, fault: Fault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Number of fetch requests received so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.state.lock().fetches
    }

    /// Ready and hidden message counts of a channel.
    #[must_use]
    pub fn counts(&self, channel: &str) -> (u64, u64) {
        let mut state = self.state.lock();
        state.expire_all();
        state.channels.get(channel).map_or((0, 0), Queue::counts)
    }

    pub(crate) async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let authorized = {
            let state = self.state.lock();
            state
                .credentials
                .as_ref()
                .is_none_or(|expected| request.auth.as_ref() == Some(expected))
        };
        if !authorized {
            return Ok(text(StatusCode::UNAUTHORIZED, "unauthorized"));
        }

        let Some(endpoint) = parse_endpoint(&request) else {
            return Ok(text(StatusCode::NOT_FOUND, "no such resource"));
        };
        let query = match Query::parse(&request) {
            Ok(query) => query,
            Err(reason) => return Ok(text(StatusCode::BAD_REQUEST, &reason)),
        };

        debug!(method = %request.method, ?endpoint, "memory server request");

        let response = match (request.method.as_str(), endpoint) {
            ("GET", Endpoint::Channels) => json_response(&json!(self.state.lock().channel_names())),
            ("GET", Endpoint::Channel(channel)) => {
                return self.fetch(&channel, &query, request.timeout).await;
            }
            ("POST", Endpoint::Channel(channel)) => self.post(&channel, &query, &request),
            ("DELETE", Endpoint::Channel(channel)) => {
                if let Some(queue) = self.state.lock().channels.get_mut(&channel) {
                    queue.clear();
                }
                no_content()
            }
            ("GET", Endpoint::ChannelStats(channel)) => {
                let (ready, hidden) = self.counts(&channel);
                json_response(&json!({ "ready": ready, "hidden": hidden }))
            }
            ("GET", Endpoint::ChannelTopics(channel)) => {
                let state = self.state.lock();
                let topics: Vec<&String> = state
                    .subscriptions
                    .iter()
                    .filter(|(_, channels)| channels.contains_key(&channel))
                    .map(|(topic, _)| topic)
                    .collect();
                json_response(&json!(topics))
            }
            ("PUT", Endpoint::ChannelTopic { channel, topic }) => {
                let attrs = query.attrs_over(MessageAttrs::default());
                self.state
                    .lock()
                    .subscriptions
                    .entry(topic)
                    .or_default()
                    .insert(channel, attrs);
                no_content()
            }
            ("DELETE", Endpoint::ChannelTopic { channel, topic }) => {
                let mut state = self.state.lock();
                let removed = state
                    .subscriptions
                    .get_mut(&topic)
                    .and_then(|channels| channels.remove(&channel))
                    .is_some();
                state.subscriptions.retain(|_, channels| !channels.is_empty());
                if removed {
                    no_content()
                } else {
                    text(StatusCode::NOT_FOUND, "no such subscription")
                }
            }
            ("GET", Endpoint::Topics) => {
                let state = self.state.lock();
                let topics: Vec<&String> = state.subscriptions.keys().collect();
                json_response(&json!(topics))
            }
            ("POST", Endpoint::Topic(topic)) => self.publish(&topic, &query, &request),
            ("GET", Endpoint::TopicChannels(topic)) => {
                let state = self.state.lock();
                let channels: Vec<&String> = state
                    .subscriptions
                    .get(&topic)
                    .map(|channels| channels.keys().collect())
                    .unwrap_or_default();
                json_response(&json!(channels))
            }
            ("DELETE", Endpoint::Message(id)) => {
                let mut state = self.state.lock();
                let removed = id
                    .parse::<u64>()
                    .is_ok_and(|id| state.channels.values_mut().any(|queue| queue.remove(id)));
                if removed {
                    no_content()
                } else {
                    text(StatusCode::NOT_FOUND, "no such message")
                }
            }
            ("GET", Endpoint::Stats) => {
                let mut state = self.state.lock();
                state.expire_all();
                let (ready, hidden) = state.channels.values().map(Queue::counts).fold(
                    (0, 0),
                    |(ready, hidden), (r, h)| (ready + r, hidden + h),
                );
                json_response(&json!({
                    "channels": state.channel_names().len(),
                    "topics": state.subscriptions.len(),
                    "ready": ready,
                    "hidden": hidden,
                    "posted": state.posted,
                    "delivered": state.delivered,
                }))
            }
            _ => text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
        };

        Ok(response)
    }

    fn post(&self, channel: &str, query: &Query, request: &HttpRequest) -> HttpResponse {
        let id = self.state.lock().store(
            channel,
            request.body.clone().unwrap_or_default(),
            request_content_type(request),
            None,
            query.attrs_over(MessageAttrs::default()),
        );
        self.posted.notify_waiters();

        json_response(&json!({ "id": id }))
    }

    fn publish(&self, topic: &str, query: &Query, request: &HttpRequest) -> HttpResponse {
        let body = request.body.clone().unwrap_or_default();
        let content_type = request_content_type(request);

        let ids: Vec<u64> = {
            let mut state = self.state.lock();
            let targets: Vec<(String, MessageAttrs)> = state
                .subscriptions
                .get(topic)
                .map(|channels| {
                    channels
                        .iter()
                        .map(|(channel, attrs)| (channel.clone(), *attrs))
                        .collect()
                })
                .unwrap_or_default();

            targets
                .into_iter()
                .map(|(channel, attrs)| {
                    state.store(
                        &channel,
                        body.clone(),
                        content_type.clone(),
                        Some(topic.to_string()),
                        query.attrs_over(attrs),
                    )
                })
                .collect()
        };
        self.posted.notify_waiters();

        json_response(&json!({ "ids": ids }))
    }

    async fn fetch(&self, channel: &str, query: &Query, timeout: Duration) -> Result<HttpResponse> {
        let fault = {
            let mut state = self.state.lock();
            state.fetches += 1;
            state.faults.pop_front()
        };
        if let Some(fault) = fault {
            debug!(channel, ?fault, "injecting fetch fault");
            return fault_response(fault, channel, timeout);
        }

        let wait = if query.nowait {
            Duration::ZERO
        } else {
            query.wait.map_or(DEFAULT_WAIT, Duration::from_secs)
        };
        let deadline = Instant::now() + wait;

        loop {
            // Registered before the state check so a post in between is not missed.
            let posted = self.posted.notified();
            tokio::pin!(posted);
            posted.as_mut().enable();

            let (delivery, next_deadline) = self.state.lock().take_next(channel);
            if let Some(delivery) = delivery {
                return Ok(message_response(&delivery));
            }
            if Instant::now() >= deadline {
                return Ok(no_content());
            }

            let wake = next_deadline.map_or(deadline, |next| next.min(deadline));
            tokio::select! {
                () = posted => {}
                () = sleep_until(wake) => {}
            }
        }
    }
}

fn parse_endpoint(request: &HttpRequest) -> Option<Endpoint> {
    let segments: Vec<String> = request
        .url
        .path_segments()?
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .collect();

    // Skip any base path in front of the API root.
    let start = segments
        .iter()
        .position(|segment| matches!(segment.as_str(), "channels" | "topics" | "messages" | "stats"))?;
    let segments: Vec<&str> = segments[start..].iter().map(String::as_str).collect();

    let endpoint = match segments.as_slice() {
        ["channels"] => Endpoint::Channels,
        ["channels", channel] => Endpoint::Channel((*channel).to_string()),
        ["channels", channel, "stats"] => Endpoint::ChannelStats((*channel).to_string()),
        ["channels", channel, "topics"] => Endpoint::ChannelTopics((*channel).to_string()),
        ["channels", channel, "topics", topic] => Endpoint::ChannelTopic {
            channel: (*channel).to_string(),
            topic: (*topic).to_string(),
        },
        ["topics"] => Endpoint::Topics,
        ["topics", topic] => Endpoint::Topic((*topic).to_string()),
        ["topics", topic, "channels"] => Endpoint::TopicChannels((*topic).to_string()),
        ["messages", id] => Endpoint::Message((*id).to_string()),
        ["stats"] => Endpoint::Stats,
        _ => return None,
    };

    Some(endpoint)
}

fn request_content_type(request: &HttpRequest) -> Option<String> {
    request
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64())
}

fn no_content() -> HttpResponse {
    HttpResponse::new(StatusCode::NO_CONTENT, HeaderMap::new(), Bytes::new())
}

fn text(status: StatusCode, body: &str) -> HttpResponse {
    HttpResponse::new(status, HeaderMap::new(), Bytes::copy_from_slice(body.as_bytes()))
}

fn json_response(value: &serde_json::Value) -> HttpResponse {
    let mut map = HeaderMap::new();
    map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    HttpResponse::new(StatusCode::OK, map, Bytes::from(value.to_string()))
}

fn header(map: &mut HeaderMap, name: &'static str, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        map.insert(HeaderName::from_static(name), value);
    }
}

fn message_response(delivery: &Delivery) -> HttpResponse {
    let mut map = HeaderMap::new();
    header(&mut map, headers::MSG_ID, delivery.id);
    header(&mut map, headers::CHANNEL, &delivery.channel);
    header(&mut map, headers::PRIORITY, delivery.attrs.priority);
    header(&mut map, headers::TIMEOUT, delivery.attrs.timeout);
    header(&mut map, headers::LINGER, delivery.attrs.linger);
    header(&mut map, headers::DELIVER, delivery.attrs.deliver);
    header(&mut map, headers::DELIVERED, delivery.delivered);
    header(&mut map, headers::RECEIVED, delivery.received);
    if let Some(topic) = &delivery.topic {
        header(&mut map, headers::TOPIC, topic);
    }
    if let Some(value) = delivery
        .content_type
        .as_deref()
        .and_then(|content_type| HeaderValue::from_str(content_type).ok())
    {
        map.insert(CONTENT_TYPE, value);
    }

    HttpResponse::new(StatusCode::OK, map, delivery.body.clone())
}

fn fault_response(fault: Fault, channel: &str, timeout: Duration) -> Result<HttpResponse> {
    match fault {
        Fault::Network => Err(Error::Network("injected connection failure".to_string())),
        Fault::Timeout => Err(Error::Timeout(timeout)),
        Fault::Status(status) => Ok(text(status, "injected failure")),
        Fault::Empty => Ok(no_content()),
        Fault::Malformed => Ok(message_response(&Delivery {
            id: 0,
            channel: channel.to_string(),
            body: Bytes::from_static(b"\xff{not a body"),
            content_type: None,
            topic: None,
            attrs: MessageAttrs::default(),
            delivered: 1,
            received: unix_now(),
        })),
    }
}
