//! Scripted source client for store tests.

use crate::client::{Payload, Request, SourceClient};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Answers requests from per-path queues of canned payloads.
///
/// Each request pops the next payload for its URL path; the last payload in
/// a queue is sticky and answers every further request.
#[derive(Default)]
pub(crate) struct ScriptedClient {
    routes: Mutex<HashMap<String, VecDeque<Payload>>>,
    requests: Mutex<Vec<Request>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, path: &str, status: u16, body: &[u8]) -> Self {
        self.routes.lock().unwrap().entry(path.to_string()).or_default().push_back(Payload {
            status,
            body: body.to_vec(),
        });
        self
    }

    pub fn ok(self, path: &str, body: &[u8]) -> Self {
        self.respond(path, 200, body)
    }

    /// Hold every response for `path` back by `delay`.
    pub fn delay(self, path: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(path.to_string(), delay);
        self
    }

    /// Replace whatever is queued for `path`.
    pub fn set(&self, path: &str, status: u16, body: &[u8]) {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            VecDeque::from([Payload {
                status,
                body: body.to_vec(),
            }]),
        );
    }

    /// Replace whatever is queued for `path` with successful text bodies,
    /// answered in order.
    pub fn set_pages(&self, path: &str, bodies: &[&str]) {
        let queue = bodies
            .iter()
            .map(|body| Payload {
                status: 200,
                body: body.as_bytes().to_vec(),
            })
            .collect();
        self.routes.lock().unwrap().insert(path.to_string(), queue);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceClient for ScriptedClient {
    async fn get(&self, request: &Request) -> Result<Payload> {
        self.requests.lock().unwrap().push(request.clone());
        let delay = self.delays.lock().unwrap().get(request.url.path()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut routes = self.routes.lock().unwrap();
        let Some(queue) = routes.get_mut(request.url.path()) else {
            exn::bail!(ErrorKind::Fetch(format!("connection refused: {}", request.url)));
        };
        let payload = match queue.len() {
            0 => None,
            1 => queue.front().cloned(),
            _ => queue.pop_front(),
        };
        payload.ok_or_else(|| exn::Exn::from(ErrorKind::Fetch(format!("no response for {}", request.url))))
    }
}
