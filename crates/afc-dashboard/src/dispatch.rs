use std::sync::Arc;

use afc_core::reconcile::{ArtifactRecord, Epoch, Tagged};
use afc_core::{AgentProfile, RunSummary};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::{ApiError, StartedRun, WorkflowApi};

/// Operator requests that leave the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Start {
        product_idea: String,
        hitl_enabled: bool,
    },
    Resume {
        run_id: String,
        hitl_enabled: bool,
    },
    Stop {
        run_id: String,
    },
    ViewArtifact {
        filename: String,
        run_id: Option<String>,
    },
    /// Loads the artifact manifest of a run the view just switched to.
    SwitchRun {
        run_id: String,
    },
    RefreshRuns,
    RefreshArtifacts {
        run_id: String,
    },
    LoadAgents,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::Start { .. } => "start",
            Intent::Resume { .. } => "resume",
            Intent::Stop { .. } => "stop",
            Intent::ViewArtifact { .. } => "view_artifact",
            Intent::SwitchRun { .. } => "switch_run",
            Intent::RefreshRuns => "refresh_runs",
            Intent::RefreshArtifacts { .. } => "refresh_artifacts",
            Intent::LoadAgents => "load_agents",
        }
    }
}

/// Result of one dispatched request, handed back to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Started {
        product_idea: String,
        result: Result<StartedRun, ApiError>,
    },
    Resumed {
        run_id: String,
        result: Result<(), ApiError>,
    },
    Stopped {
        run_id: String,
        result: Result<(), ApiError>,
    },
    Artifact {
        filename: String,
        run_id: Option<String>,
        result: Result<String, ApiError>,
    },
    Runs(Result<Vec<RunSummary>, ApiError>),
    RunArtifacts {
        run_id: String,
        /// Set when the listing was requested by a run switch.
        switched: bool,
        result: Result<Vec<ArtifactRecord>, ApiError>,
    },
    Agents(Result<Vec<AgentProfile>, ApiError>),
}

/// Fire-and-forget request runner. Each intent becomes one task; its outcome
/// is sent back tagged with the epoch it was issued under.
#[derive(Clone)]
pub struct Dispatcher {
    api: Arc<dyn WorkflowApi>,
    outcomes: mpsc::Sender<Tagged<Outcome>>,
}

impl Dispatcher {
    pub fn new(api: Arc<dyn WorkflowApi>, outcomes: mpsc::Sender<Tagged<Outcome>>) -> Self {
        Self { api, outcomes }
    }

    pub fn dispatch(&self, intent: Intent, epoch: Epoch) {
        let api = self.api.clone();
        let outcomes = self.outcomes.clone();
        debug!("dispatch: {} epoch={}", intent.name(), epoch.value());
        tokio::spawn(async move {
            let outcome = execute(api.as_ref(), intent).await;
            if outcomes.send(Tagged::new(epoch, outcome)).await.is_err() {
                warn!("dispatch_outcome_dropped: store is gone");
            }
        });
    }
}

pub async fn execute(api: &dyn WorkflowApi, intent: Intent) -> Outcome {
    match intent {
        Intent::Start {
            product_idea,
            hitl_enabled,
        } => {
            let result = api.start_run(&product_idea, hitl_enabled).await;
            Outcome::Started {
                product_idea,
                result,
            }
        }
        Intent::Resume {
            run_id,
            hitl_enabled,
        } => {
            let result = api.resume_run(&run_id, hitl_enabled).await;
            Outcome::Resumed { run_id, result }
        }
        Intent::Stop { run_id } => {
            let result = api.stop_run(&run_id).await;
            Outcome::Stopped { run_id, result }
        }
        Intent::ViewArtifact { filename, run_id } => {
            let result = api.fetch_artifact(&filename, run_id.as_deref()).await;
            Outcome::Artifact {
                filename,
                run_id,
                result,
            }
        }
        Intent::SwitchRun { run_id } => {
            let result = api.list_run_artifacts(&run_id).await;
            Outcome::RunArtifacts {
                run_id,
                switched: true,
                result,
            }
        }
        Intent::RefreshArtifacts { run_id } => {
            let result = api.list_run_artifacts(&run_id).await;
            Outcome::RunArtifacts {
                run_id,
                switched: false,
                result,
            }
        }
        Intent::RefreshRuns => Outcome::Runs(api.list_runs().await),
        Intent::LoadAgents => Outcome::Agents(api.list_agents().await),
    }
}
