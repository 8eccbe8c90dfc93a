//! Pull request analysis: delayed on open, immediate on demand.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;

use prism_inference::{Assessment, RiskModel};
use prism_scheduler::{Scheduler, SchedulerError};
use prism_types::{ChangeSet, InferenceResult, PullRequestId};

/// Capacity of the analysis event channel.
pub const ANALYSIS_EVENT_CAPACITY: usize = 64;

/// What started an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The delayed job armed when the PR opened.
    Auto,
    /// An explicit request; any pending auto job was cancelled first.
    Manual,
}

/// Emitted once per completed analysis.
#[derive(Debug, Clone)]
pub struct AnalysisEvent {
    pub pr: PullRequestId,
    pub trigger: Trigger,
    pub assessment: Assessment,
}

#[derive(Clone)]
pub struct AnalysisService {
    scheduler: Scheduler<PullRequestId>,
    model: Arc<dyn RiskModel>,
    events: mpsc::Sender<AnalysisEvent>,
}

impl AnalysisService {
    #[must_use]
    pub fn new(
        scheduler: Scheduler<PullRequestId>,
        model: Arc<dyn RiskModel>,
        events: mpsc::Sender<AnalysisEvent>,
    ) -> Self {
        Self {
            scheduler,
            model,
            events,
        }
    }

    /// Start a scheduler on the current runtime and return the service with
    /// the receiving end of its event channel.
    pub fn start(
        delay: Duration,
        model: Arc<dyn RiskModel>,
    ) -> Result<(Self, mpsc::Receiver<AnalysisEvent>), SchedulerError> {
        let scheduler = Scheduler::start(delay)?;
        let (tx, rx) = mpsc::channel(ANALYSIS_EVENT_CAPACITY);
        Ok((Self::new(scheduler, model, tx), rx))
    }

    /// Arm the automatic analysis for a newly opened PR.
    ///
    /// Opening the same PR again restarts the delay.
    pub fn pull_request_opened(
        &self,
        pr: PullRequestId,
        change: ChangeSet,
    ) -> Result<(), SchedulerError> {
        let model = Arc::clone(&self.model);
        let events = self.events.clone();
        let job_pr = pr.clone();
        self.scheduler.schedule(pr, move || async move {
            let assessment = model.assess(&change).await;
            let event = AnalysisEvent {
                pr: job_pr,
                trigger: Trigger::Auto,
                assessment,
            };
            events
                .send(event)
                .await
                .map_err(|_| anyhow!("analysis event receiver dropped"))
        })
    }

    /// Cancel any pending automatic analysis and run one now.
    pub async fn run_manual(&self, pr: PullRequestId, change: &ChangeSet) -> InferenceResult {
        let cancelled = self.scheduler.cancel(&pr);
        tracing::info!(%pr, cancelled, "Manual analysis requested");

        let assessment = self.model.assess(change).await;
        let result = assessment.result.clone();
        let event = AnalysisEvent {
            pr,
            trigger: Trigger::Manual,
            assessment,
        };
        if let Err(err) = self.events.send(event).await {
            tracing::debug!(pr = %err.0.pr, "No listener for manual analysis event");
        }
        result
    }

    #[must_use]
    pub fn is_pending(&self, pr: &PullRequestId) -> bool {
        self.scheduler.is_pending(pr)
    }

    #[must_use]
    pub fn time_remaining(&self, pr: &PullRequestId) -> Option<Duration> {
        self.scheduler.time_remaining(pr)
    }

    /// Drop every pending automatic analysis. Returns how many were dropped.
    pub fn shutdown(&self) -> usize {
        self.scheduler.shutdown()
    }
}

impl std::fmt::Debug for AnalysisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisService")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
