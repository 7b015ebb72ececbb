//! Delivered messages and receipts.

use std::fmt;
use std::str::FromStr;

use http::HeaderMap;
use http::header::CONTENT_TYPE;
use serde::{Deserialize, Deserializer, Serialize};

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::transport::HttpResponse;

/// Names of the response headers carrying message metadata.
pub mod headers {
    /// Server-assigned message id.
    pub const MSG_ID: &str = "x-linger-msg-id";
    /// Channel the message was fetched from.
    pub const CHANNEL: &str = "x-linger-channel";
    /// Topic the message was published to, if any.
    pub const TOPIC: &str = "x-linger-topic";
    /// Delivery priority.
    pub const PRIORITY: &str = "x-linger-priority";
    /// Hide timeout, in seconds.
    pub const TIMEOUT: &str = "x-linger-timeout";
    /// Linger time, in seconds.
    pub const LINGER: &str = "x-linger-linger";
    /// Delivery limit.
    pub const DELIVER: &str = "x-linger-deliver";
    /// Times the message has been delivered, including this delivery.
    pub const DELIVERED: &str = "x-linger-delivered";
    /// Unix time the server received the message, in seconds.
    pub const RECEIVED: &str = "x-linger-received";
}

/// A server-assigned message id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps an id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as sent to the server.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

// Servers report ids as JSON numbers or strings.
impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(id) => id.into(),
            Raw::Text(id) => id.into(),
        })
    }
}

/// A message delivered from a channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message<T> {
    /// Message id, used to delete (acknowledge) the message.
    pub id: MessageId,
    /// Channel the message was fetched from.
    pub channel: String,
    /// Topic the message was published to, if it arrived through a subscription.
    pub topic: Option<String>,
    /// Content type the message was posted with.
    pub mimetype: Option<String>,
    /// Delivery priority.
    pub priority: i64,
    /// Hide timeout, in seconds.
    pub timeout: u64,
    /// Linger time, in seconds.
    pub linger: u64,
    /// Delivery limit (0 = unlimited).
    pub deliver: u64,
    /// Times the message has been delivered, including this delivery.
    pub delivered: u64,
    /// Unix time the server received the message.
    pub received: f64,
    /// The decoded body.
    pub body: T,
}

impl<T> Message<T> {
    /// Decodes a fetch response into a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the id or channel header is missing, a
    /// numeric header is malformed, or the codec rejects the body.
    pub fn from_response<C>(codec: &C, response: HttpResponse) -> Result<Self>
    where
        C: Codec<Item = T>,
    {
        let map = &response.headers;

        let id = MessageId::new(required(map, headers::MSG_ID)?);
        let channel = required(map, headers::CHANNEL)?.to_string();
        let topic = optional(map, headers::TOPIC)?
            .filter(|topic| !topic.is_empty())
            .map(str::to_string);
        let mimetype = optional(map, CONTENT_TYPE.as_str())?.map(str::to_string);

        let priority = parsed(map, headers::PRIORITY)?.unwrap_or_default();
        let timeout = parsed(map, headers::TIMEOUT)?.unwrap_or_default();
        let linger = parsed(map, headers::LINGER)?.unwrap_or_default();
        let deliver = parsed(map, headers::DELIVER)?.unwrap_or_default();
        let delivered = parsed(map, headers::DELIVERED)?.unwrap_or_default();
        let received = parsed(map, headers::RECEIVED)?.unwrap_or_default();

        let body = codec
            .decode(response.body)
            .map_err(|err| Error::Decode(format!("message {id}: {err}")))?;

        Ok(Self {
            id,
            channel,
            topic,
            mimetype,
            priority,
            timeout,
            linger,
            deliver,
            delivered,
            received,
            body,
        })
    }

    /// Replaces the body, keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Message<U> {
        Message {
            id: self.id,
            channel: self.channel,
            topic: self.topic,
            mimetype: self.mimetype,
            priority: self.priority,
            timeout: self.timeout,
            linger: self.linger,
            deliver: self.deliver,
            delivered: self.delivered,
            received: self.received,
            body: f(self.body),
        }
    }
}

fn optional<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|err| Error::Decode(format!("header {name}: {err}")))
        })
        .transpose()
}

fn required<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    optional(headers, name)?.ok_or_else(|| Error::Decode(format!("missing header {name}")))
}

fn parsed<V>(headers: &HeaderMap, name: &str) -> Result<Option<V>>
where
    V: FromStr,
    V::Err: fmt::Display,
{
    optional(headers, name)?
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|err| Error::Decode(format!("header {name}={value:?}: {err}")))
        })
        .transpose()
}

/// Acknowledgement of a posted message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReceipt {
    /// Id assigned to the new message.
    pub id: MessageId,
}

/// Acknowledgement of a published message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// One id per subscribed channel the message was copied into.
    #[serde(default)]
    pub ids: Vec<MessageId>,
}

/// Message counts of one channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Messages ready for delivery.
    #[serde(default)]
    pub ready: u64,
    /// Delivered messages hidden until their timeout expires.
    #[serde(default)]
    pub hidden: u64,
}
