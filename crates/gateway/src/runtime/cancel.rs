//! Per-trace cancellation tokens.
//!
//! Each running turn registers a [`CancelToken`] under its trace id.
//! `POST /v1/thinking/{trace_id}/cancel` and job cancellation both signal
//! through here; the pipeline observes the token at every suspension point.

use std::collections::HashMap;

use parking_lot::Mutex;

use pandora_domain::cancel::CancelToken;

pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a new cancel token for a trace.
    pub fn register(&self, trace_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(trace_id.to_owned(), token.clone());
        token
    }

    /// Signal cancellation for a trace. Returns true if a token was found.
    pub fn cancel(&self, trace_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(trace_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Remove the token (called when a turn reaches a terminal state).
    pub fn remove(&self, trace_id: &str) {
        self.tokens.lock().remove(trace_id);
    }

    pub fn is_running(&self, trace_id: &str) -> bool {
        self.tokens.lock().contains_key(trace_id)
    }
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}
