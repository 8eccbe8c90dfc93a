//! Orchestration for Prism.
//!
//! Wires the scheduler, the risk model and the registration store into the
//! two services the outer surfaces call: [`AnalysisService`] for pull request
//! risk analysis and [`RegistrationService`] for email-verified sign-up.

mod analysis;
mod registration;

pub use analysis::{ANALYSIS_EVENT_CAPACITY, AnalysisEvent, AnalysisService, Trigger};
pub use registration::{MIN_REAP_INTERVAL, RegistrationError, RegistrationService};

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use prism_config::Settings;
use prism_inference::{InferenceAdapter, InferenceError};
use prism_registration::CodeSender;
use prism_scheduler::SchedulerError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to build inference client: {0}")]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Both services, built from one set of resolved settings.
#[derive(Debug)]
pub struct Services {
    pub analysis: AnalysisService,
    pub registration: RegistrationService,
    pub events: mpsc::Receiver<AnalysisEvent>,
}

impl Services {
    /// Build the services on the current tokio runtime.
    pub fn start(settings: &Settings, sender: Arc<dyn CodeSender>) -> Result<Self, EngineError> {
        let adapter = InferenceAdapter::new(settings.inference.clone())?;
        let (analysis, events) =
            AnalysisService::start(settings.analysis_delay, Arc::new(adapter))?;
        let registration = RegistrationService::new(settings.registration, sender);

        tracing::info!(
            ollama_url = %settings.inference.base_url,
            model = %settings.inference.model,
            delay = ?settings.analysis_delay,
            "Services started"
        );
        Ok(Self {
            analysis,
            registration,
            events,
        })
    }

    /// Stop scheduling. Pending analyses are dropped.
    pub fn shutdown(&self) -> usize {
        self.analysis.shutdown()
    }
}
