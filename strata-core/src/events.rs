//! Build lifecycle events and scoped phase guards.

use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::Span;

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// All required work completed.
    Succeeded,
    /// The phase had nothing to do (e.g. production-only work in development).
    Skipped,
    /// An optional part failed; the run continues with a default outcome.
    Degraded,
    /// The phase failed or was abandoned.
    Failed,
}

/// Events broadcast to external reporters while a build runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// A phase began
    PhaseStarted { phase: &'static str },
    /// A phase ended, on any exit path
    PhaseFinished {
        phase: &'static str,
        status: PhaseStatus,
        duration_ms: u64,
    },
    /// The cache directory was wiped after invalidation
    CacheReset,
    /// The run ended
    RunFinished { success: bool, duration_ms: u64 },
}

/// Broadcast channel for [`BuildEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BuildEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to build events.
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.tx.subscribe()
    }

    /// Broadcast a build event.
    pub fn broadcast(&self, event: BuildEvent) {
        let _ = self.tx.send(event);
    }
}

/// Scope of one phase execution.
///
/// Emits `PhaseStarted` on creation and exactly one `PhaseFinished` when
/// dropped. A guard dropped without [`finish`](Self::finish) reports
/// [`PhaseStatus::Failed`], which covers errors, early returns and
/// cancelled futures alike.
pub struct PhaseGuard {
    phase: &'static str,
    events: EventBus,
    span: Span,
    started: Instant,
    status: Option<PhaseStatus>,
}

impl PhaseGuard {
    /// Open a phase scope under the given parent span.
    pub fn enter(phase: &'static str, parent: &Span, events: &EventBus) -> Self {
        let span = tracing::info_span!(parent: parent, "phase", name = phase);
        span.in_scope(|| tracing::debug!("Starting {}", phase));
        events.broadcast(BuildEvent::PhaseStarted { phase });

        Self {
            phase,
            events: events.clone(),
            span,
            started: Instant::now(),
            status: None,
        }
    }

    pub fn phase(&self) -> &'static str {
        self.phase
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Close the scope with an explicit status.
    pub fn finish(mut self, status: PhaseStatus) {
        self.status = Some(status);
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        let status = self.status.unwrap_or(PhaseStatus::Failed);
        let duration_ms = self.started.elapsed().as_millis() as u64;
        self.span
            .in_scope(|| tracing::debug!("Finished {} ({:?}) in {}ms", self.phase, status, duration_ms));
        self.events.broadcast(BuildEvent::PhaseFinished {
            phase: self.phase,
            status,
            duration_ms,
        });
    }
}
