//! Generation-tagged cancellation and deadlines for outstanding requests.
//!
//! Each request slot (chat, workflow) holds at most one pending request. A
//! request carries a `RequestContext`: the generation it was issued under, a
//! cancellation token and a deadline. The slot's generation moves on every
//! submission, cancel and resolution, so a result tagged with an older
//! generation is recognisably stale and gets dropped by the controller.
//!
//! Cancellation is cooperative. `cancel()` fires the token and bumps the
//! generation right away; the background call may still run to completion
//! but its result no longer matches.
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;

use crate::error::ControllerError;

// ── RequestContext ────────────────────────────────────────────────────────────

/// Handed to every outbound call. Collaborators must honor both the token and
/// the deadline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub generation: u64,
    token: CancellationToken,
    deadline: Instant,
    started: Instant,
}

impl RequestContext {
    pub fn new(generation: u64, timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            generation,
            token: CancellationToken::new(),
            deadline: started + timeout,
            started,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Race `fut` against cancellation and the deadline.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T, ControllerError>
    where
        F: Future<Output = Result<T, ControllerError>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ControllerError::Cancelled),
            res = timeout_at(self.deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(ControllerError::Timeout { elapsed: self.elapsed() }),
            },
        }
    }
}

// ── RequestSlot ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PendingRequest {
    generation: u64,
    token: CancellationToken,
    started: Instant,
    label: String,
}

/// What `cancel()` tore down, for the warning log line.
#[derive(Debug, Clone)]
pub struct Cancelled {
    pub label: String,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct RequestSlot {
    generation: u64,
    pending: Option<PendingRequest>,
    timeout: Duration,
}

impl RequestSlot {
    pub fn new(timeout: Duration) -> Self {
        Self {
            generation: 0,
            pending: None,
            timeout,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn is_active(&self) -> bool {
        self.pending.is_some()
    }

    pub fn label(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.label.as_str())
    }

    /// Issue a new request. Any request still pending is cancelled first.
    pub fn begin(&mut self, label: &str) -> RequestContext {
        if let Some(prev) = self.pending.take() {
            prev.token.cancel();
        }
        self.generation += 1;
        let ctx = RequestContext::new(self.generation, self.timeout);
        self.pending = Some(PendingRequest {
            generation: ctx.generation,
            token: ctx.token.clone(),
            started: ctx.started,
            label: label.to_string(),
        });
        ctx
    }

    /// User cancel: fire the token and invalidate the generation immediately.
    pub fn cancel(&mut self) -> Option<Cancelled> {
        let prev = self.pending.take()?;
        prev.token.cancel();
        self.generation += 1;
        Some(Cancelled {
            label: prev.label,
            elapsed: prev.started.elapsed(),
        })
    }

    /// True when `generation` belongs to the request still pending in this slot.
    pub fn is_current(&self, generation: u64) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| p.generation == generation)
    }

    /// Accept the result for `generation`. Returns the request's elapsed time,
    /// or `None` when the result is stale and must be dropped.
    pub fn resolve(&mut self, generation: u64) -> Option<Duration> {
        if !self.is_current(generation) {
            return None;
        }
        let pending = self.pending.take()?;
        self.generation += 1;
        Some(pending.started.elapsed())
    }
}
