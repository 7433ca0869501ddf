//! Deterministic scripted client for tests: pops canned responses in order
//! and records every request for assertions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use pandora_domain::error::{Error, Result};

use crate::traits::{ChatRequest, ChatResponse, LlmClient};

/// One scripted reply: a canned response body or a canned failure.
pub enum ScriptedReply {
    Content(String),
    Fail(String),
}

pub struct ScriptedClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_responses(contents: Vec<&str>) -> Self {
        Self::new(
            contents
                .into_iter()
                .map(|c| ScriptedReply::Content(c.to_string()))
                .collect(),
        )
    }

    /// A client that sleeps before answering; used to exercise concurrency
    /// caps and timeouts.
    pub fn slow(contents: Vec<&str>, delay: Duration) -> Self {
        let mut client = Self::with_responses(contents);
        client.delay = Some(delay);
        client
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    /// Highest number of calls that were ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }

    /// Append more replies mid-test.
    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().push_back(reply);
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, req: ChatRequest) -> Result<ChatResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(now, Ordering::AcqRel);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.requests.lock().push(req);
        let reply = self.replies.lock().pop_front();
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        match reply {
            Some(ScriptedReply::Content(content)) => Ok(ChatResponse {
                content,
                usage: None,
                model: "scripted".into(),
            }),
            Some(ScriptedReply::Fail(message)) => Err(Error::Llm(message)),
            None => Err(Error::Llm("scripted client exhausted".into())),
        }
    }

    fn client_id(&self) -> &str {
        "scripted"
    }
}
