//! Intervention Broker — pending human-assist requests (CAPTCHA, login
//! walls) with resolution fan-out.
//!
//! A research candidate that hits a human-only blocker suspends on
//! `await_resolution`. The UI polls `/interventions/pending` or follows the
//! WebSocket stream, a human acts, and `resolve` wakes every awaiter. At
//! most one pending intervention exists per `(trace_id, url)`; a second
//! request coalesces onto the first. Unresolved interventions expire after
//! the TTL and expiry reads as `skipped`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use pandora_domain::cancel::CancelToken;
use pandora_domain::error::{Error, Result};
use pandora_domain::ids::new_intervention_id;
use pandora_domain::research::{
    BlockerType, Intervention, InterventionResolution, InterventionStatus,
};

const BROADCAST_CAPACITY: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Live intervention events, relayed to WebSocket consumers per trace.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterventionEvent {
    InterventionNeeded { intervention: Intervention },
    InterventionResolved {
        intervention_id: String,
        resolution: InterventionResolution,
    },
    InterventionExpired { intervention_id: String },
}

struct PendingEntry {
    record: Intervention,
    resolution_tx: watch::Sender<Option<InterventionResolution>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct InterventionBroker {
    pending: RwLock<HashMap<String, PendingEntry>>,
    /// Coalescing map: `(trace_id, url)` → pending intervention id.
    by_key: Mutex<HashMap<(String, String), String>>,
    /// Settled records kept briefly so late `resolve` calls read as no-ops.
    settled: RwLock<HashMap<String, Intervention>>,
    /// Per-trace live event channels.
    events: RwLock<HashMap<String, broadcast::Sender<InterventionEvent>>>,
    ttl: Duration,
}

impl InterventionBroker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            by_key: Mutex::new(HashMap::new()),
            settled: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a pending human-assist request. A second request for the same
    /// `(trace_id, url)` while one is pending returns the existing record.
    pub fn request(
        &self,
        trace_id: &str,
        profile: &str,
        url: &str,
        blocker_type: BlockerType,
        screenshot_path: Option<String>,
        cdp_url: Option<String>,
    ) -> Intervention {
        let key = (trace_id.to_owned(), url.to_owned());
        {
            let by_key = self.by_key.lock();
            if let Some(existing_id) = by_key.get(&key) {
                if let Some(entry) = self.pending.read().get(existing_id) {
                    tracing::debug!(
                        intervention_id = %existing_id,
                        url,
                        "coalescing duplicate intervention request"
                    );
                    return entry.record.clone();
                }
            }
        }

        let record = Intervention {
            intervention_id: new_intervention_id(),
            trace_id: trace_id.to_owned(),
            profile: profile.to_owned(),
            url: url.to_owned(),
            blocker_type,
            screenshot_path,
            cdp_url,
            status: InterventionStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        };
        let (resolution_tx, _) = watch::channel(None);
        let id = record.intervention_id.clone();

        self.pending.write().insert(
            id.clone(),
            PendingEntry {
                record: record.clone(),
                resolution_tx,
            },
        );
        self.by_key.lock().insert(key, id.clone());
        self.publish(
            trace_id,
            InterventionEvent::InterventionNeeded {
                intervention: record.clone(),
            },
        );
        tracing::info!(intervention_id = %id, url, ?blocker_type, "intervention requested");
        record
    }

    /// Suspend until the intervention is resolved, expires, or the turn is
    /// cancelled. Expiry reads as `skipped`; cancellation surfaces as
    /// `Error::Cancelled` after the record is marked skipped.
    pub async fn await_resolution(
        &self,
        intervention_id: &str,
        cancel: &CancelToken,
    ) -> Result<InterventionResolution> {
        let mut rx = {
            let pending = self.pending.read();
            match pending.get(intervention_id) {
                Some(entry) => entry.resolution_tx.subscribe(),
                None => {
                    // Already settled (or never existed): read the outcome.
                    return Ok(self
                        .settled
                        .read()
                        .get(intervention_id)
                        .and_then(|r| r.resolution)
                        .unwrap_or(InterventionResolution::Skipped));
                }
            }
        };

        let deadline = tokio::time::sleep(self.ttl);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.settle(intervention_id, InterventionStatus::Skipped,
                                Some(InterventionResolution::Skipped));
                    return Err(Error::Cancelled);
                }
                _ = &mut deadline => {
                    self.expire(intervention_id);
                    return Ok(InterventionResolution::Skipped);
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Sender dropped (expired elsewhere): treat as skip.
                        return Ok(InterventionResolution::Skipped);
                    }
                    if let Some(resolution) = *rx.borrow() {
                        return Ok(resolution);
                    }
                }
            }
        }
    }

    /// Resolve a pending intervention, waking all awaiters. Idempotent: the
    /// first resolution wins; late resolutions for settled or expired
    /// interventions are dropped. Returns whether this call settled it.
    pub fn resolve(&self, intervention_id: &str, resolution: InterventionResolution) -> bool {
        let entry = self.pending.write().remove(intervention_id);
        let Some(mut entry) = entry else {
            tracing::debug!(intervention_id, "late resolution dropped");
            return false;
        };

        let status = match resolution {
            InterventionResolution::Ok => InterventionStatus::Resolved,
            InterventionResolution::Skipped => InterventionStatus::Skipped,
        };
        entry.record.status = status;
        entry.record.resolution = Some(resolution);
        entry.record.resolved_at = Some(Utc::now());

        self.by_key
            .lock()
            .remove(&(entry.record.trace_id.clone(), entry.record.url.clone()));
        let _ = entry.resolution_tx.send(Some(resolution));
        self.publish(
            &entry.record.trace_id.clone(),
            InterventionEvent::InterventionResolved {
                intervention_id: intervention_id.to_owned(),
                resolution,
            },
        );
        self.settled
            .write()
            .insert(intervention_id.to_owned(), entry.record);
        tracing::info!(intervention_id, ?resolution, "intervention resolved");
        true
    }

    /// Pending records for UI polling, optionally scoped to one profile.
    pub fn list_pending(&self, profile: Option<&str>) -> Vec<Intervention> {
        let pending = self.pending.read();
        let mut records: Vec<Intervention> = pending
            .values()
            .map(|e| e.record.clone())
            .filter(|r| profile.map_or(true, |p| r.profile == p))
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Live intervention events for a trace.
    pub fn subscribe(&self, trace_id: &str) -> broadcast::Receiver<InterventionEvent> {
        let mut events = self.events.write();
        events
            .entry(trace_id.to_owned())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .subscribe()
    }

    /// Mark every pending intervention of a trace skipped (turn cancelled
    /// or failed).
    pub fn skip_all_for_trace(&self, trace_id: &str) {
        let ids: Vec<String> = self
            .pending
            .read()
            .values()
            .filter(|e| e.record.trace_id == trace_id)
            .map(|e| e.record.intervention_id.clone())
            .collect();
        for id in ids {
            self.settle(&id, InterventionStatus::Skipped, Some(InterventionResolution::Skipped));
        }
    }

    /// Expire pending interventions older than the TTL. Returns how many
    /// expired. Also prunes stale settled records and idle event channels.
    pub fn sweep(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::minutes(15));
        let expired: Vec<String> = self
            .pending
            .read()
            .values()
            .filter(|e| e.record.created_at < cutoff)
            .map(|e| e.record.intervention_id.clone())
            .collect();
        let count = expired.len();
        for id in &expired {
            self.expire(id);
        }

        self.settled
            .write()
            .retain(|_, r| r.resolved_at.map(|at| at > cutoff).unwrap_or(false));
        self.events.write().retain(|_, tx| tx.receiver_count() > 0);
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    // ── Internals ───────────────────────────────────────────────────

    fn expire(&self, intervention_id: &str) {
        if self.settle(
            intervention_id,
            InterventionStatus::Expired,
            Some(InterventionResolution::Skipped),
        ) {
            tracing::info!(intervention_id, "intervention expired");
        }
    }

    /// Move a pending intervention into a terminal state, waking awaiters
    /// with `skipped` semantics. Returns whether anything changed.
    fn settle(
        &self,
        intervention_id: &str,
        status: InterventionStatus,
        resolution: Option<InterventionResolution>,
    ) -> bool {
        let entry = self.pending.write().remove(intervention_id);
        let Some(mut entry) = entry else {
            return false;
        };
        entry.record.status = status;
        entry.record.resolution = resolution;
        entry.record.resolved_at = Some(Utc::now());
        self.by_key
            .lock()
            .remove(&(entry.record.trace_id.clone(), entry.record.url.clone()));
        let _ = entry.resolution_tx.send(Some(
            resolution.unwrap_or(InterventionResolution::Skipped),
        ));
        let event = match status {
            InterventionStatus::Expired => InterventionEvent::InterventionExpired {
                intervention_id: intervention_id.to_owned(),
            },
            _ => InterventionEvent::InterventionResolved {
                intervention_id: intervention_id.to_owned(),
                resolution: resolution.unwrap_or(InterventionResolution::Skipped),
            },
        };
        self.publish(&entry.record.trace_id.clone(), event);
        self.settled
            .write()
            .insert(intervention_id.to_owned(), entry.record);
        true
    }

    fn publish(&self, trace_id: &str, event: InterventionEvent) {
        let events = self.events.read();
        if let Some(tx) = events.get(trace_id) {
            let _ = tx.send(event);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
