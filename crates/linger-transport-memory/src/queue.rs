use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

/// Longest hide or linger period honoured; larger values are clamped to it.
const MAX_PERIOD_SECS: u64 = 100 * 365 * 24 * 60 * 60;

fn after(start: Instant, seconds: u64) -> Instant {
    start + Duration::from_secs(seconds.min(MAX_PERIOD_SECS))
}

/// Per-message delivery attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageAttrs {
    pub priority: i64,
    pub timeout: u64,
    pub deliver: u64,
    pub linger: u64,
}

impl Default for MessageAttrs {
    fn default() -> Self {
        Self {
            priority: 0,
            timeout: 30,
            deliver: 0,
            linger: 0,
        }
    }
}

#[derive(Debug)]
pub struct Stored {
    pub id: u64,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub topic: Option<String>,
    pub attrs: MessageAttrs,
    pub received: f64,
    pub posted_at: Instant,
    pub delivered: u64,
    pub hidden_until: Option<Instant>,
}

impl Stored {
    fn linger_deadline(&self) -> Option<Instant> {
        (self.attrs.linger > 0).then(|| after(self.posted_at, self.attrs.linger))
    }
}

/// Snapshot of a message handed out by a fetch.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub id: u64,
    pub channel: String,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub topic: Option<String>,
    pub attrs: MessageAttrs,
    pub delivered: u64,
    pub received: f64,
}

/// Messages of one channel keyed by id, so equal priorities keep post order.
#[derive(Debug, Default)]
pub struct Queue {
    messages: BTreeMap<u64, Stored>,
}

impl Queue {
    pub fn push(&mut self, message: Stored) {
        self.messages.insert(message.id, message);
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.messages.remove(&id).is_some()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Releases expired hides and purges lingered-out messages.
    pub fn expire(&mut self, now: Instant) {
        self.messages.retain(|_, message| match message.hidden_until {
            Some(until) if until <= now => {
                if message.attrs.deliver > 0 && message.delivered >= message.attrs.deliver {
                    return false;
                }
                message.hidden_until = None;
                message.linger_deadline().is_none_or(|deadline| deadline > now)
            }
            Some(_) => true,
            None => message.linger_deadline().is_none_or(|deadline| deadline > now),
        });
    }

    /// Hands out the ready message with the lowest priority value, hiding it
    /// for its timeout.
    pub fn take_next(&mut self, channel: &str, now: Instant) -> Option<Delivery> {
        let id = self
            .messages
            .values()
            .filter(|message| message.hidden_until.is_none())
            .min_by_key(|message| (message.attrs.priority, message.id))
            .map(|message| message.id)?;

        let message = self.messages.get_mut(&id)?;
        message.delivered += 1;
        message.hidden_until = Some(after(now, message.attrs.timeout));

        Some(Delivery {
            id,
            channel: channel.to_string(),
            body: message.body.clone(),
            content_type: message.content_type.clone(),
            topic: message.topic.clone(),
            attrs: message.attrs,
            delivered: message.delivered,
            received: message.received,
        })
    }

    /// Earliest instant at which a hidden message reappears or a message
    /// lingers out.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.messages
            .values()
            .filter_map(|message| message.hidden_until.or_else(|| message.linger_deadline()))
            .min()
    }

    /// Ready and hidden counts.
    pub fn counts(&self) -> (u64, u64) {
        let hidden = self
            .messages
            .values()
            .filter(|message| message.hidden_until.is_some())
            .count() as u64;
        (self.messages.len() as u64 - hidden, hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn stored(id: u64, priority: i64, now: Instant) -> Stored {
        Stored {
            id,
            body: Bytes::from(id.to_string()),
            content_type: None,
            topic: None,
            attrs: MessageAttrs {
                priority,
                ..MessageAttrs::default()
            },
            received: 0.0,
            posted_at: now,
            delivered: 0,
            hidden_until: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lower_priority_first_then_fifo() {
        let now = Instant::now();
        let mut queue = Queue::default();
        queue.push(stored(1, 5, now));
        queue.push(stored(2, 0, now));
        queue.push(stored(3, 0, now));

        let order: Vec<_> = std::iter::from_fn(|| queue.take_next("c", now))
            .map(|delivery| delivery.id)
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert_eq!(queue.counts(), (0, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_message_reappears_until_deliver_limit() {
        let now = Instant::now();
        let mut queue = Queue::default();
        let mut message = stored(1, 0, now);
        message.attrs.timeout = 1;
        message.attrs.deliver = 2;
        queue.push(message);

        assert_eq!(queue.take_next("c", now).map(|d| d.delivered), Some(1));
        assert!(queue.take_next("c", now).is_none());
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(1)));

        let later = now + Duration::from_secs(1);
        queue.expire(later);
        assert_eq!(queue.take_next("c", later).map(|d| d.delivered), Some(2));

        queue.expire(later + Duration::from_secs(1));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_periods_are_clamped() {
        let now = Instant::now();
        let mut queue = Queue::default();
        let mut message = stored(1, 0, now);
        message.attrs.timeout = u64::MAX;
        message.attrs.linger = u64::MAX;
        queue.push(message);

        assert_eq!(queue.take_next("c", now).map(|d| d.id), Some(1));
        assert!(queue.next_deadline().is_some_and(|deadline| deadline > now));

        queue.expire(now + Duration::from_secs(365 * 24 * 60 * 60));
        assert_eq!(queue.counts(), (0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_linger_purges_undelivered() {
        let now = Instant::now();
        let mut queue = Queue::default();
        let mut message = stored(1, 0, now);
        message.attrs.linger = 5;
        queue.push(message);
        queue.push(stored(2, 0, now));

        queue.expire(now + Duration::from_secs(5));
        assert_eq!(queue.counts(), (1, 0));
        assert_eq!(queue.take_next("c", now).map(|d| d.id), Some(2));
    }
}
