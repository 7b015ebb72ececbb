//! Endpoint and request composition.

use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method};
use mime::Mime;
use url::Url;

use crate::error::{Error, Result};
use crate::options::ResolvedOptions;
use crate::transport::HttpRequest;

/// A server resource addressed by a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// `/channels`
    Channels,
    /// `/channels/{channel}`
    Channel(String),
    /// `/channels/{channel}/stats`
    ChannelStats(String),
    /// `/channels/{channel}/topics`
    ChannelTopics(String),
    /// `/channels/{channel}/topics/{topic}`
    ChannelTopic {
        /// The subscribing channel.
        channel: String,
        /// The subscribed topic.
        topic: String,
    },
    /// `/topics`
    Topics,
    /// `/topics/{topic}`
    Topic(String),
    /// `/topics/{topic}/channels`
    TopicChannels(String),
    /// `/messages/{id}`
    Message(String),
    /// `/stats`
    Stats,
}

impl Endpoint {
    /// Addresses a channel, rejecting an empty name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if `channel` is empty.
    pub fn channel(channel: &str) -> Result<Self> {
        Ok(Self::Channel(validate_name("channel", channel)?))
    }

    /// Addresses a channel's statistics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if `channel` is empty.
    pub fn channel_stats(channel: &str) -> Result<Self> {
        Ok(Self::ChannelStats(validate_name("channel", channel)?))
    }

    /// Addresses a channel's subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if `channel` is empty.
    pub fn channel_topics(channel: &str) -> Result<Self> {
        Ok(Self::ChannelTopics(validate_name("channel", channel)?))
    }

    /// Addresses one subscription of a channel to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if either name is empty.
    pub fn channel_topic(channel: &str, topic: &str) -> Result<Self> {
        Ok(Self::ChannelTopic {
            channel: validate_name("channel", channel)?,
            topic: validate_name("topic", topic)?,
        })
    }

    /// Addresses a topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if `topic` is empty.
    pub fn topic(topic: &str) -> Result<Self> {
        Ok(Self::Topic(validate_name("topic", topic)?))
    }

    /// Addresses a topic's subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if `topic` is empty.
    pub fn topic_channels(topic: &str) -> Result<Self> {
        Ok(Self::TopicChannels(validate_name("topic", topic)?))
    }

    /// Addresses a message by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if `id` is empty.
    pub fn message(id: &str) -> Result<Self> {
        Ok(Self::Message(validate_name("message id", id)?))
    }

    fn segments(&self) -> Vec<&str> {
        match self {
            Self::Channels => vec!["channels"],
            Self::Channel(channel) => vec!["channels", channel.as_str()],
            Self::ChannelStats(channel) => vec!["channels", channel.as_str(), "stats"],
            Self::ChannelTopics(channel) => vec!["channels", channel.as_str(), "topics"],
            Self::ChannelTopic { channel, topic } => {
                vec!["channels", channel.as_str(), "topics", topic.as_str()]
            }
            Self::Topics => vec!["topics"],
            Self::Topic(topic) => vec!["topics", topic.as_str()],
            Self::TopicChannels(topic) => vec!["topics", topic.as_str(), "channels"],
            Self::Message(id) => vec!["messages", id.as_str()],
            Self::Stats => vec!["stats"],
        }
    }

    /// Resolves the endpoint against the server's base URL. Each name becomes
    /// exactly one percent-encoded path segment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the base URL cannot carry a path.
    pub fn url(&self, base: &Url) -> Result<Url> {
        let mut url = base.clone();
        url.set_query(None);
        url.set_fragment(None);

        url.path_segments_mut()
            .map_err(|()| Error::InvalidConfig(format!("{base} cannot be a base URL")))?
            .pop_if_empty()
            .extend(self.segments());

        Ok(url)
    }
}

fn validate_name(kind: &'static str, name: &str) -> Result<String> {
    // `.` and `..` would be resolved away as relative path segments.
    if matches!(name, "" | "." | "..") {
        return Err(Error::invalid_name(kind, name));
    }

    Ok(name.to_string())
}

/// One logical call: method, endpoint, query and optional encoded body.
#[derive(Clone, Debug)]
pub struct Operation {
    method: Method,
    endpoint: Endpoint,
    query: Vec<(&'static str, String)>,
    flags: Vec<&'static str>,
    body: Option<(Bytes, Mime)>,
    min_timeout: Option<Duration>,
}

impl Operation {
    /// Creates an operation with no query and no body.
    #[must_use]
    pub const fn new(method: Method, endpoint: Endpoint) -> Self {
        Self {
            method,
            endpoint,
            query: Vec::new(),
            flags: Vec::new(),
            body: None,
            min_timeout: None,
        }
    }

    /// A `GET` of `endpoint`.
    #[must_use]
    pub const fn get(endpoint: Endpoint) -> Self {
        Self::new(Method::GET, endpoint)
    }

    /// A `POST` to `endpoint`.
    #[must_use]
    pub const fn post(endpoint: Endpoint) -> Self {
        Self::new(Method::POST, endpoint)
    }

    /// A `PUT` of `endpoint`.
    #[must_use]
    pub const fn put(endpoint: Endpoint) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    /// A `DELETE` of `endpoint`.
    #[must_use]
    pub const fn delete(endpoint: Endpoint) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    /// Adds a `key=value` query parameter.
    #[must_use]
    pub fn query(mut self, key: &'static str, value: impl ToString) -> Self {
        self.query.push((key, value.to_string()));
        self
    }

    /// Adds a bare query flag such as `nowait`.
    #[must_use]
    pub fn flag(mut self, key: &'static str) -> Self {
        self.flags.push(key);
        self
    }

    /// Forwards the message attributes (priority, timeout, deliver, linger)
    /// that are set in `options`.
    #[must_use]
    pub fn message_options(mut self, options: &ResolvedOptions) -> Self {
        self.query.extend(options.message_query());
        self
    }

    /// Attaches an encoded body and its content type.
    #[must_use]
    pub fn body(mut self, body: Bytes, content_type: Mime) -> Self {
        self.body = Some((body, content_type));
        self
    }

    /// Raises the transport timeout to at least `timeout`.
    #[must_use]
    pub const fn min_timeout(mut self, timeout: Duration) -> Self {
        self.min_timeout = Some(timeout);
        self
    }

    /// The addressed endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Builds the HTTP request against `base` with the resolved options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the base URL or the content type
    /// cannot be used.
    pub fn into_http(self, base: &Url, options: &ResolvedOptions) -> Result<HttpRequest> {
        let mut url = self.endpoint.url(base)?;
        if !self.query.is_empty() || !self.flags.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for flag in &self.flags {
                pairs.append_key_only(flag);
            }
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }

        let mut headers = HeaderMap::new();
        let body = match self.body {
            Some((body, content_type)) => {
                let value = HeaderValue::from_str(content_type.as_ref()).map_err(|err| {
                    Error::InvalidConfig(format!("content type {content_type}: {err}"))
                })?;
                headers.insert(CONTENT_TYPE, value);
                Some(body)
            }
            None => None,
        };

        let timeout = self
            .min_timeout
            .map_or(options.request_timeout, |min| min.max(options.request_timeout));

        Ok(HttpRequest {
            method: self.method,
            url,
            headers,
            body,
            timeout,
            use_gzip: options.use_gzip,
            auth: options.auth.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use crate::options::RequestOptions;

    fn base() -> Url {
        "http://127.0.0.1:8989/".parse().unwrap()
    }

    #[test]
    fn test_endpoint_paths() {
        let cases = [
            (Endpoint::Channels, "http://127.0.0.1:8989/channels"),
            (
                Endpoint::channel_topic("jobs", "alerts").unwrap(),
                "http://127.0.0.1:8989/channels/jobs/topics/alerts",
            ),
            (
                Endpoint::topic_channels("alerts").unwrap(),
                "http://127.0.0.1:8989/topics/alerts/channels",
            ),
            (
                Endpoint::message("42").unwrap(),
                "http://127.0.0.1:8989/messages/42",
            ),
            (Endpoint::Stats, "http://127.0.0.1:8989/stats"),
        ];

        for (endpoint, expected) in cases {
            assert_eq!(endpoint.url(&base()).unwrap().as_str(), expected);
        }
    }

    #[test]
    fn test_dot_segments_are_rejected() {
        for name in [".", ".."] {
            assert_matches!(
                Endpoint::channel(name),
                Err(Error::InvalidName { kind: "channel", .. })
            );
            assert_matches!(
                Endpoint::channel_topic("jobs", name),
                Err(Error::InvalidName { kind: "topic", .. })
            );
            assert_matches!(
                Endpoint::message(name),
                Err(Error::InvalidName { kind: "message id", .. })
            );
        }

        let url = Endpoint::channel("...").unwrap().url(&base()).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8989/channels/...");
    }

    #[test]
    fn test_names_are_single_encoded_segments() {
        let url = Endpoint::channel("a/b c%").unwrap().url(&base()).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8989/channels/a%2Fb%20c%25");
    }

    #[test]
    fn test_base_path_is_preserved() {
        let base: Url = "https://queue.example.com/linger/".parse().unwrap();
        let url = Endpoint::Topics.url(&base).unwrap();
        assert_eq!(url.as_str(), "https://queue.example.com/linger/topics");
    }

    #[test]
    fn test_empty_names_rejected() {
        assert_matches!(
            Endpoint::channel(""),
            Err(Error::InvalidName { kind: "channel", .. })
        );
        assert_matches!(
            Endpoint::channel_topic("jobs", ""),
            Err(Error::InvalidName { kind: "topic", .. })
        );
    }

    #[test]
    fn test_into_http_with_options_and_body() {
        let options = RequestOptions::new()
            .priority(1)
            .deliver(3)
            .use_gzip(false)
            .resolve(&RequestOptions::new());

        let request = Operation::post(Endpoint::channel("jobs").unwrap())
            .message_options(&options)
            .body(Bytes::from_static(b"{}"), mime::APPLICATION_JSON)
            .into_http(&base(), &options)
            .unwrap();

        assert_eq!(request.method, Method::POST);
        assert_eq!(
            request.url.as_str(),
            "http://127.0.0.1:8989/channels/jobs?priority=1&deliver=3"
        );
        assert_eq!(request.headers[CONTENT_TYPE], "application/json");
        assert_eq!(request.body.as_deref(), Some(&b"{}"[..]));
        assert!(!request.use_gzip);
    }

    #[test]
    fn test_nowait_flag_and_long_poll_timeout() {
        let options = ResolvedOptions::default();

        let nowait = Operation::get(Endpoint::channel("jobs").unwrap())
            .flag("nowait")
            .into_http(&base(), &options)
            .unwrap();
        assert_eq!(nowait.url.as_str(), "http://127.0.0.1:8989/channels/jobs?nowait");
        assert_eq!(nowait.timeout, options.request_timeout);

        let long_poll = Operation::get(Endpoint::channel("jobs").unwrap())
            .query("wait", 60)
            .min_timeout(Duration::from_secs(65))
            .into_http(&base(), &options)
            .unwrap();
        assert_eq!(long_poll.url.query(), Some("wait=60"));
        assert_eq!(long_poll.timeout, Duration::from_secs(65));
    }
}
