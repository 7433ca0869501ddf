//! Trace Hub — the in-memory trace registry bridging the pipeline
//! (producer) and SSE/poll consumers across unreliable transports.
//!
//! Ordering contract: `set_response` always happens-before the terminal
//! signal, so a subscriber that loses its SSE connection at the terminal
//! event can still recover the response via `get_response`. Consumers
//! deduplicate by `trace_id`.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use pandora_domain::ids::{new_trace_id, TurnId};
use pandora_domain::trace::{Phase, PhaseStatus, TraceEvent, TraceStatus};

/// Bounded per-trace event ring: older events may be dropped for SSE replay
/// but `status` is always current.
const EVENT_BUFFER: usize = 256;
const BROADCAST_CAPACITY: usize = 256;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records & signals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wire-visible snapshot of a trace.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub trace_id: String,
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<TurnId>,
    pub created_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    pub status: TraceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// What subscribers receive: progress events, then exactly one terminal
/// signal.
#[derive(Debug, Clone)]
pub enum TraceSignal {
    Event(TraceEvent),
    Terminal(TraceStatus),
}

/// Snapshot handed to a new subscriber: buffered replay + live receiver.
pub struct Subscription {
    pub replay: Vec<TraceEvent>,
    pub status: TraceStatus,
    pub receiver: broadcast::Receiver<TraceSignal>,
}

struct TraceEntry {
    record: TraceRecord,
    events: VecDeque<TraceEvent>,
    next_seq: u64,
    sender: broadcast::Sender<TraceSignal>,
    terminal_at: Option<Instant>,
    sse_delivered: bool,
    poll_delivered: bool,
}

impl TraceEntry {
    fn new(profile: &str) -> Self {
        let now = Utc::now();
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            record: TraceRecord {
                trace_id: new_trace_id(),
                profile: profile.to_owned(),
                turn_id: None,
                created_at: now,
                last_event_at: now,
                phase: None,
                status: TraceStatus::Pending,
                response: None,
            },
            events: VecDeque::new(),
            next_seq: 1,
            sender,
            terminal_at: None,
            sse_delivered: false,
            poll_delivered: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TraceHub {
    entries: RwLock<HashMap<String, TraceEntry>>,
    ttl: Duration,
}

impl TraceHub {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Allocate a new trace for a profile. Returns the trace id.
    pub fn create_trace(&self, profile: &str) -> String {
        let entry = TraceEntry::new(profile);
        let trace_id = entry.record.trace_id.clone();
        self.entries.write().insert(trace_id.clone(), entry);
        tracing::debug!(%trace_id, profile, "trace created");
        trace_id
    }

    pub fn set_turn(&self, trace_id: &str, turn_id: TurnId) {
        if let Some(entry) = self.entries.write().get_mut(trace_id) {
            entry.record.turn_id = Some(turn_id);
        }
    }

    /// Append a progress event. Assigns the next `seq`, advances the trace
    /// to `running`, and fans out to subscribers. Events on terminal traces
    /// are dropped.
    pub fn emit(&self, trace_id: &str, mut event: TraceEvent) {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(trace_id) else {
            return;
        };
        if entry.record.status.is_terminal() {
            return;
        }

        event.seq = entry.next_seq;
        entry.next_seq += 1;
        entry.record.phase = Some(event.phase);
        entry.record.last_event_at = Utc::now();
        if entry.record.status == TraceStatus::Pending {
            entry.record.status = TraceStatus::Running;
        }

        entry.events.push_back(event.clone());
        if entry.events.len() > EVENT_BUFFER {
            entry.events.pop_front();
        }
        let _ = entry.sender.send(TraceSignal::Event(event));
    }

    /// Record the final response text. Must be called before the terminal
    /// signal; [`Self::finish`] enforces this.
    pub fn set_response(&self, trace_id: &str, response: &str) {
        if let Some(entry) = self.entries.write().get_mut(trace_id) {
            entry.record.response = Some(response.to_owned());
        }
    }

    /// Move the trace to a terminal status and broadcast the terminal
    /// signal. `complete` requires the response to have been set first.
    pub fn finish(&self, trace_id: &str, status: TraceStatus) {
        debug_assert!(status.is_terminal());
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(trace_id) else {
            return;
        };
        if entry.record.status.is_terminal() {
            return;
        }
        debug_assert!(
            status != TraceStatus::Complete || entry.record.response.is_some(),
            "set_response must precede the complete signal"
        );
        entry.record.status = status;
        entry.record.last_event_at = Utc::now();
        entry.terminal_at = Some(Instant::now());
        let _ = entry.sender.send(TraceSignal::Terminal(status));
    }

    /// Cancel a trace: records the cancellation notice as the response and
    /// emits a final event. Calling it twice is a no-op.
    pub fn cancel(&self, trace_id: &str, reason: &str) {
        {
            let entries = self.entries.read();
            match entries.get(trace_id) {
                Some(entry) if !entry.record.status.is_terminal() => {}
                _ => return,
            }
        }
        let phase = self
            .get(trace_id)
            .and_then(|r| r.phase)
            .unwrap_or(Phase::Analyzer);
        self.emit(
            trace_id,
            TraceEvent {
                seq: 0,
                phase,
                status: PhaseStatus::Error,
                reasoning: Some(format!("cancelled: {reason}")),
                confidence: None,
                duration_ms: None,
                details: None,
            },
        );
        self.set_response(trace_id, &format!("The request was cancelled: {reason}"));
        self.finish(trace_id, TraceStatus::Cancelled);
    }

    /// Subscribe to a trace: replay of buffered events plus a live receiver.
    /// `None` when the trace does not exist (or already expired).
    pub fn subscribe(&self, trace_id: &str) -> Option<Subscription> {
        let entries = self.entries.read();
        let entry = entries.get(trace_id)?;
        Some(Subscription {
            replay: entry.events.iter().cloned().collect(),
            status: entry.record.status,
            receiver: entry.sender.subscribe(),
        })
    }

    /// Idempotent poll: `(status, response)`. Marks poll delivery on
    /// terminal traces for TTL accounting.
    pub fn get_response(&self, trace_id: &str) -> Option<(TraceStatus, Option<String>)> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(trace_id)?;
        if entry.record.status.is_terminal() {
            entry.poll_delivered = true;
        }
        Some((entry.record.status, entry.record.response.clone()))
    }

    /// Mark that a subscriber received the terminal signal over SSE.
    pub fn mark_sse_delivered(&self, trace_id: &str) {
        if let Some(entry) = self.entries.write().get_mut(trace_id) {
            entry.sse_delivered = true;
        }
    }

    pub fn get(&self, trace_id: &str) -> Option<TraceRecord> {
        self.entries.read().get(trace_id).map(|e| e.record.clone())
    }

    /// Newest-first listing for the admin surface.
    pub fn list(&self, profile: Option<&str>, limit: usize) -> Vec<TraceRecord> {
        let entries = self.entries.read();
        let mut records: Vec<TraceRecord> = entries
            .values()
            .filter(|e| profile.map_or(true, |p| e.record.profile == p))
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        records
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a job sweep may drop its reference to this trace: gone, or
    /// terminal and delivered on both channels or past TTL.
    pub fn is_delivered_or_expired(&self, trace_id: &str) -> bool {
        let entries = self.entries.read();
        match entries.get(trace_id) {
            None => true,
            Some(entry) => match entry.terminal_at {
                Some(at) => {
                    (entry.sse_delivered && entry.poll_delivered) || at.elapsed() >= self.ttl
                }
                None => false,
            },
        }
    }

    /// Drop terminal traces that were delivered on both channels or whose
    /// TTL elapsed. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| match entry.terminal_at {
            None => true,
            Some(at) => !((entry.sse_delivered && entry.poll_delivered) || at.elapsed() >= self.ttl),
        });
        before - entries.len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
