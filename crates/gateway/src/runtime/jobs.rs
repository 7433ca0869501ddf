//! Job Registry — background job lifecycle for async turns.
//!
//! Jobs wrap a running turn: `queued → running → (done | cancelled |
//! error)`. `cancelled` is terminal even if the pipeline later produces a
//! result; the late result is discarded. A panicking run future records an
//! `error` payload.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;

use pandora_domain::error::Error;
use pandora_domain::ids::new_job_id;

use super::truncate_str;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Error)
    }
}

/// Structured error payload on failed jobs.
#[derive(Debug, Clone, Serialize)]
pub struct JobError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: String,
    pub trace_id: String,
    pub profile: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// First ~200 chars of the submitted query.
    pub request_preview: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a job record to an already-launched turn and monitor its
    /// handle: `Ok(text)` finishes `done`, a pipeline error finishes
    /// `error`, and a panic in the run future finishes `error` with an
    /// internal payload.
    pub fn start(
        self: &std::sync::Arc<Self>,
        profile: &str,
        trace_id: &str,
        query: &str,
        handle: JoinHandle<Result<String, Error>>,
    ) -> String {
        let job = Job {
            job_id: new_job_id(),
            trace_id: trace_id.to_owned(),
            profile: profile.to_owned(),
            status: JobStatus::Queued,
            started_at: Utc::now(),
            finished_at: None,
            result: None,
            error: None,
            request_preview: truncate_str(query, 200),
        };
        let job_id = job.job_id.clone();
        self.jobs.write().insert(job_id.clone(), job);

        let registry = self.clone();
        let monitor_id = job_id.clone();
        tokio::spawn(async move {
            registry.mark_running(&monitor_id);
            match handle.await {
                Ok(Ok(response)) => registry.finish_ok(&monitor_id, &response),
                Ok(Err(e)) => registry.finish_error(&monitor_id, e.kind(), &e.to_string()),
                Err(join_err) => {
                    let message = if join_err.is_panic() {
                        "run future panicked".to_string()
                    } else {
                        join_err.to_string()
                    };
                    registry.finish_error(&monitor_id, "internal", &message);
                }
            }
        });

        job_id
    }

    fn mark_running(&self, job_id: &str) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Running;
            }
        }
    }

    /// Record a successful result. A job already cancelled keeps its
    /// terminal status and the result is discarded.
    pub fn finish_ok(&self, job_id: &str, result: &str) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            if job.status.is_terminal() {
                tracing::debug!(job_id, "late result discarded for terminal job");
                return;
            }
            job.status = JobStatus::Done;
            job.finished_at = Some(Utc::now());
            job.result = Some(result.to_owned());
        }
    }

    pub fn finish_error(&self, job_id: &str, kind: &str, message: &str) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            if job.status.is_terminal() {
                return;
            }
            // A cooperative cancel surfaces as Error::Cancelled from the
            // pipeline; keep the job status aligned with the trace.
            job.status = if kind == "cancelled" {
                JobStatus::Cancelled
            } else {
                JobStatus::Error
            };
            job.finished_at = Some(Utc::now());
            job.error = Some(JobError {
                kind: kind.to_owned(),
                message: message.to_owned(),
            });
        }
    }

    /// Mark a job cancelled. Returns false for unknown or already-terminal
    /// jobs. The caller is responsible for signalling the pipeline's cancel
    /// token.
    pub fn cancel(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            if job.status.is_terminal() {
                return false;
            }
            job.status = JobStatus::Cancelled;
            job.finished_at = Some(Utc::now());
            return true;
        }
        false
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Newest-first listing with optional status filter.
    pub fn list(&self, status: Option<JobStatus>, limit: usize) -> Vec<Job> {
        let jobs = self.jobs.read();
        let mut listed: Vec<Job> = jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        listed.truncate(limit);
        listed
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove jobs finished longer than `older_than` ago whose trace was
    /// delivered or expired. Returns the number removed.
    pub fn sweep(&self, older_than: Duration, trace_released: impl Fn(&str) -> bool) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::hours(1));
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| {
            let old_enough = job
                .finished_at
                .map(|at| at < cutoff)
                .unwrap_or(false);
            !(old_enough && trace_released(&job.trace_id))
        });
        before - jobs.len()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn settle() {
        // Let the monitor task observe the join handle.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn successful_run_finishes_done() {
        let registry = Arc::new(JobRegistry::new());
        let handle = tokio::spawn(async { Ok::<_, Error>("answer".to_string()) });
        let job_id = registry.start("p", "tr_1", "what is water", handle);

        settle().await;
        let job = registry.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.result.as_deref(), Some("answer"));
        assert_eq!(job.request_preview, "what is water");
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn failing_run_records_structured_error() {
        let registry = Arc::new(JobRegistry::new());
        let handle = tokio::spawn(async {
            Err::<String, _>(Error::PhaseFailed {
                phase: pandora_domain::trace::Phase::Planner,
                reason: "parse".into(),
            })
        });
        let job_id = registry.start("p", "tr_1", "q", handle);

        settle().await;
        let job = registry.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        let err = job.error.unwrap();
        assert_eq!(err.kind, "phase_failed");
        assert!(err.message.contains("planner"));
    }

    #[tokio::test]
    async fn panicking_run_records_internal_error() {
        let registry = Arc::new(JobRegistry::new());
        let handle = tokio::spawn(async {
            panic!("boom");
            #[allow(unreachable_code)]
            Ok::<String, Error>(String::new())
        });
        let job_id = registry.start("p", "tr_1", "q", handle);

        settle().await;
        let job = registry.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.unwrap().kind, "internal");
    }

    #[tokio::test]
    async fn cancelled_job_discards_late_result() {
        let registry = Arc::new(JobRegistry::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = rx.await;
            Ok::<_, Error>("late result".to_string())
        });
        let job_id = registry.start("p", "tr_1", "q", handle);

        settle().await;
        assert!(registry.cancel(&job_id));
        let _ = tx.send(());
        settle().await;

        let job = registry.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.result.is_none(), "late result must be discarded");
    }

    #[tokio::test]
    async fn cancel_terminal_job_returns_false() {
        let registry = Arc::new(JobRegistry::new());
        let handle = tokio::spawn(async { Ok::<_, Error>("r".to_string()) });
        let job_id = registry.start("p", "tr_1", "q", handle);
        settle().await;
        assert!(!registry.cancel(&job_id));
    }

    #[tokio::test]
    async fn cancelled_pipeline_error_maps_to_cancelled_status() {
        let registry = Arc::new(JobRegistry::new());
        let handle = tokio::spawn(async { Err::<String, _>(Error::Cancelled) });
        let job_id = registry.start("p", "tr_1", "q", handle);
        settle().await;
        assert_eq!(registry.get(&job_id).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn sweep_respects_age_and_trace_release() {
        let registry = Arc::new(JobRegistry::new());
        let handle = tokio::spawn(async { Ok::<_, Error>("r".to_string()) });
        let job_id = registry.start("p", "tr_1", "q", handle);
        settle().await;

        // Fresh finish: not swept even if the trace is released.
        assert_eq!(registry.sweep(Duration::from_secs(3600), |_| true), 0);

        // Old finish but trace still retained: not swept.
        registry.jobs.write().get_mut(&job_id).unwrap().finished_at =
            Some(Utc::now() - chrono::Duration::hours(2));
        assert_eq!(registry.sweep(Duration::from_secs(3600), |_| false), 0);

        // Old finish and released trace: swept.
        assert_eq!(registry.sweep(Duration::from_secs(3600), |_| true), 1);
        assert!(registry.get(&job_id).is_none());
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let registry = Arc::new(JobRegistry::new());
        let h1 = tokio::spawn(async { Ok::<_, Error>("a".to_string()) });
        let _done = registry.start("p", "tr_1", "q1", h1);
        let (_tx, rx) = tokio::sync::oneshot::channel::<()>();
        let h2 = tokio::spawn(async move {
            let _ = rx.await;
            Ok::<_, Error>("b".to_string())
        });
        let _running = registry.start("p", "tr_2", "q2", h2);
        settle().await;

        assert_eq!(registry.list(Some(JobStatus::Done), 10).len(), 1);
        assert_eq!(registry.list(Some(JobStatus::Running), 10).len(), 1);
        assert_eq!(registry.list(None, 10).len(), 2);
        assert_eq!(registry.list(None, 1).len(), 1);
    }
}
