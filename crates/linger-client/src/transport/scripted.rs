use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;

use super::{HttpRequest, HttpResponse, Transport};
use crate::error::{Error, Result};
use crate::message::headers;

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Result<HttpResponse>>,
    requests: Vec<HttpRequest>,
    closed: bool,
}

/// Replays queued replies in order and records every request. Once the queue
/// is empty a request hangs, like an idle long-poll.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, reply: Result<HttpResponse>) -> &Self {
        self.script.lock().replies.push_back(reply);
        self
    }

    pub fn json(&self, body: &str) -> &Self {
        let mut map = HeaderMap::new();
        map.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.reply(Ok(HttpResponse::new(
            StatusCode::OK,
            map,
            Bytes::copy_from_slice(body.as_bytes()),
        )))
    }

    pub fn message(&self, id: u64, body: &str) -> &Self {
        let mut map = HeaderMap::new();
        map.insert(headers::MSG_ID, HeaderValue::from(id));
        map.insert(headers::CHANNEL, HeaderValue::from_static("jobs"));
        map.insert(headers::DELIVERED, HeaderValue::from_static("1"));
        map.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.reply(Ok(HttpResponse::new(
            StatusCode::OK,
            map,
            Bytes::copy_from_slice(body.as_bytes()),
        )))
    }

    pub fn status(&self, status: StatusCode) -> &Self {
        self.reply(Ok(HttpResponse::new(status, HeaderMap::new(), Bytes::new())))
    }

    pub fn network_failure(&self) -> &Self {
        self.reply(Err(Error::Network("connection refused".to_string())))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.script.lock().requests.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.script.lock().closed
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let reply = {
            let mut script = self.script.lock();
            if script.closed {
                return Err(Error::ClientClosed);
            }
            script.requests.push(request);
            script.replies.pop_front()
        };

        match reply {
            Some(reply) => reply,
            None => std::future::pending().await,
        }
    }

    fn close(&self) {
        self.script.lock().closed = true;
    }
}
