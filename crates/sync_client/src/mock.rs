//! Scripted transport for tests and dry runs

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use crate::error::{Result, SyncError};
use crate::transport::{HttpRequest, HttpResponse, Transport};

#[derive(Debug, Clone)]
pub enum MockReply {
    Status(u16, String),
    Network,
    Timeout,
}

impl MockReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::Status(200, body.into())
    }

    fn into_result(self) -> Result<HttpResponse> {
        match self {
            Self::Status(status, body) => Ok(HttpResponse { status, body }),
            Self::Network => Err(SyncError::Network("connection refused".to_string())),
            Self::Timeout => Err(SyncError::Timeout),
        }
    }
}

/// Replies are consumed in order; once the script runs out every request
/// gets the fallback reply.
pub struct MockTransport {
    script: Mutex<VecDeque<MockReply>>,
    fallback: Mutex<MockReply>,
    requests: Mutex<Vec<(Instant, HttpRequest)>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(MockReply::ok("{}"))
    }
}

impl MockTransport {
    pub fn new(fallback: MockReply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: MockReply) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
        self
    }

    pub fn set_fallback(&self, reply: MockReply) {
        *self.fallback.lock().unwrap_or_else(|e| e.into_inner()) = reply;
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    /// Send instants, in order
    pub fn timeline(&self) -> Vec<Instant> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((Instant::now(), request));
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let reply = match scripted {
            Some(reply) => reply,
            None => self.fallback.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        };
        reply.into_result()
    }
}
