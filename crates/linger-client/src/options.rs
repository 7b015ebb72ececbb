//! Layered request options.
//!
//! Options are resolved once per call: per-call overrides over the client's
//! defaults over the library defaults.

use std::fmt;
use std::time::Duration;

/// Request timeout used when neither the call nor the client sets one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// HTTP basic authentication credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    /// The user name.
    pub username: String,
    /// The password, if any.
    pub password: Option<String>,
}

impl BasicAuth {
    /// Creates credentials from a user name and optional password.
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Options for a single request. Unset fields fall through to the next layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Delivery priority of a posted message; lower values are delivered first.
    pub priority: Option<i64>,
    /// Seconds a delivered message stays hidden before it is redelivered.
    pub timeout: Option<u64>,
    /// Maximum number of deliveries before the message is dropped (0 = unlimited).
    pub deliver: Option<u64>,
    /// Seconds before an undelivered message is purged (0 = never).
    pub linger: Option<u64>,
    /// Ask the server to answer a fetch immediately instead of long-polling.
    pub nowait: Option<bool>,
    /// Request compressed responses.
    pub use_gzip: Option<bool>,
    /// Basic authentication credentials.
    pub auth: Option<BasicAuth>,
    /// Transport-level timeout for the whole request.
    pub request_timeout: Option<Duration>,
}

impl RequestOptions {
    /// Creates an empty set of options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the message priority.
    #[must_use]
    pub const fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the hide timeout, in seconds.
    #[must_use]
    pub const fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Sets the delivery limit.
    #[must_use]
    pub const fn deliver(mut self, count: u64) -> Self {
        self.deliver = Some(count);
        self
    }

    /// Sets the linger time, in seconds.
    #[must_use]
    pub const fn linger(mut self, seconds: u64) -> Self {
        self.linger = Some(seconds);
        self
    }

    /// Sets whether a fetch should skip long-polling.
    #[must_use]
    pub const fn nowait(mut self, nowait: bool) -> Self {
        self.nowait = Some(nowait);
        self
    }

    /// Sets whether compressed responses are requested.
    #[must_use]
    pub const fn use_gzip(mut self, use_gzip: bool) -> Self {
        self.use_gzip = Some(use_gzip);
        self
    }

    /// Sets basic authentication credentials.
    #[must_use]
    pub fn basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.auth = Some(BasicAuth::new(username, password));
        self
    }

    /// Sets the transport-level request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Returns these options with every unset field taken from `base`.
    #[must_use]
    pub fn layered_over(&self, base: &Self) -> Self {
        Self {
            priority: self.priority.or(base.priority),
            timeout: self.timeout.or(base.timeout),
            deliver: self.deliver.or(base.deliver),
            linger: self.linger.or(base.linger),
            nowait: self.nowait.or(base.nowait),
            use_gzip: self.use_gzip.or(base.use_gzip),
            auth: self.auth.clone().or_else(|| base.auth.clone()),
            request_timeout: self.request_timeout.or(base.request_timeout),
        }
    }

    /// Resolves these per-call options against the client defaults and the
    /// library defaults.
    #[must_use]
    pub fn resolve(&self, client_defaults: &Self) -> ResolvedOptions {
        let merged = self.layered_over(client_defaults);

        ResolvedOptions {
            priority: merged.priority,
            timeout: merged.timeout,
            deliver: merged.deliver,
            linger: merged.linger,
            nowait: merged.nowait.unwrap_or(false),
            use_gzip: merged.use_gzip.unwrap_or(true),
            auth: merged.auth,
            request_timeout: merged.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

/// Fully resolved options for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedOptions {
    /// Message priority, forwarded only when set.
    pub priority: Option<i64>,
    /// Hide timeout, forwarded only when set.
    pub timeout: Option<u64>,
    /// Delivery limit, forwarded only when set.
    pub deliver: Option<u64>,
    /// Linger time, forwarded only when set.
    pub linger: Option<u64>,
    /// Whether a fetch skips long-polling.
    pub nowait: bool,
    /// Whether compressed responses are requested.
    pub use_gzip: bool,
    /// Basic authentication credentials.
    pub auth: Option<BasicAuth>,
    /// Transport-level timeout.
    pub request_timeout: Duration,
}

impl ResolvedOptions {
    /// Message attributes as query parameters, in a stable order.
    #[must_use]
    pub fn message_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(priority) = self.priority {
            query.push(("priority", priority.to_string()));
        }
        if let Some(timeout) = self.timeout {
            query.push(("timeout", timeout.to_string()));
        }
        if let Some(deliver) = self.deliver {
            query.push(("deliver", deliver.to_string()));
        }
        if let Some(linger) = self.linger {
            query.push(("linger", linger.to_string()));
        }
        query
    }
}

impl Default for ResolvedOptions {
    fn default() -> Self {
        RequestOptions::default().resolve(&RequestOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_library_defaults() {
        let resolved = RequestOptions::new().resolve(&RequestOptions::new());

        assert!(resolved.use_gzip);
        assert!(!resolved.nowait);
        assert_eq!(resolved.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert!(resolved.auth.is_none());
        assert!(resolved.message_query().is_empty());
    }

    #[test]
    fn test_per_call_overrides_client_defaults() {
        let client_defaults = RequestOptions::new()
            .use_gzip(false)
            .priority(5)
            .timeout(60)
            .basic_auth("admin", Some("secret".to_string()));

        let per_call = RequestOptions::new().priority(-1).use_gzip(true);
        let resolved = per_call.resolve(&client_defaults);

        assert_eq!(resolved.priority, Some(-1));
        assert_eq!(resolved.timeout, Some(60));
        assert!(resolved.use_gzip);
        assert_eq!(
            resolved.auth,
            Some(BasicAuth::new("admin", Some("secret".to_string())))
        );
    }

    #[test]
    fn test_message_query_forwards_only_set_fields() {
        let resolved = RequestOptions::new()
            .linger(10)
            .priority(2)
            .resolve(&RequestOptions::new());

        assert_eq!(
            resolved.message_query(),
            vec![("priority", "2".to_string()), ("linger", "10".to_string())]
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let auth = BasicAuth::new("admin", Some("hunter2".to_string()));
        let rendered = format!("{auth:?}");

        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
