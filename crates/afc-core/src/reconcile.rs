use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::journal::LogLevel;
use crate::state::{RunState, WorkflowState};
use crate::{parse_timestamp, Artifact, RunStatus, RunSummary};

/// View-context generation. Bumped whenever the dashboard starts showing a
/// different run; async results carry the epoch they were issued under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<T> {
    pub epoch: Epoch,
    pub value: T,
}

impl<T> Tagged<T> {
    pub fn new(epoch: Epoch, value: T) -> Self {
        Self { epoch, value }
    }
}

/// Manifest entry served by `/runs/{id}/artifacts`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub filename: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl ArtifactRecord {
    /// Legacy manifests only carry a clock time; those fall back to `fetched_at`.
    pub fn into_artifact(self, fetched_at: DateTime<Utc>) -> Artifact {
        let produced_at = self
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(fetched_at);
        Artifact {
            filename: self.filename,
            kind: self.kind,
            produced_by: self.agent,
            produced_at,
            path: self.path,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactListing {
    pub run_id: String,
    pub artifacts: Vec<ArtifactRecord>,
}

/// REST-sourced state to merge into the live view.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub runs: Option<Vec<RunSummary>>,
    pub artifacts: Option<ArtifactListing>,
    pub fetched_at: DateTime<Utc>,
}

impl RunSnapshot {
    pub fn runs(runs: Vec<RunSummary>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            runs: Some(runs),
            artifacts: None,
            fetched_at,
        }
    }

    pub fn artifacts(listing: ArtifactListing, fetched_at: DateTime<Utc>) -> Self {
        Self {
            runs: None,
            artifacts: Some(listing),
            fetched_at,
        }
    }
}

pub fn reconcile(mut state: WorkflowState, snapshot: RunSnapshot) -> WorkflowState {
    state.reconcile(snapshot);
    state
}

pub fn switch_run(mut state: WorkflowState, run_id: &str, at: DateTime<Utc>) -> WorkflowState {
    state.switch_run(run_id, at);
    state
}

impl WorkflowState {
    pub fn reconcile(&mut self, snapshot: RunSnapshot) {
        let at = snapshot.fetched_at;
        if let Some(runs) = snapshot.runs {
            self.runs = runs;
            self.reconcile_current_run(at);
        }
        if let Some(listing) = snapshot.artifacts {
            self.reconcile_artifacts(listing, at);
        }
    }

    /// Hard reset onto a historical run. Transcripts never carry across runs;
    /// artifacts arrive later through [`WorkflowState::reconcile`].
    pub fn switch_run(&mut self, run_id: &str, at: DateTime<Utc>) {
        let entry = self.runs.iter().find(|run| run.id == run_id);
        self.run = RunState {
            run_id: Some(run_id.to_string()),
            product_idea: entry.map(|run| run.product_idea.clone()).unwrap_or_default(),
            status: entry.and_then(RunSummary::run_status).unwrap_or_default(),
            total_tokens: entry.and_then(|run| run.total_tokens),
            ..RunState::default()
        };
        self.threads.clear();
        self.epoch = self.epoch.next();
        self.log.clear();
        self.log
            .push(at, LogLevel::Info, format!("Switched to run: {run_id}"));
    }

    fn reconcile_current_run(&mut self, at: DateTime<Utc>) {
        let Some(run_id) = self.run.run_id.clone() else {
            return;
        };
        let Some(entry) = self.runs.iter().find(|run| run.id == run_id).cloned() else {
            // Live run the server has not listed yet.
            let status = self.run.status;
            let idea = self.run.product_idea.clone();
            self.run_entry(&run_id, status).product_idea = idea;
            return;
        };

        if entry.total_tokens.is_some() {
            self.run.total_tokens = entry.total_tokens;
        }
        if self.run.product_idea.is_empty() {
            self.run.product_idea = entry.product_idea.clone();
        }
        let Some(status) = entry.run_status() else {
            return;
        };
        // A list fetched before the completion event must not revive the run.
        if self.run.status.is_terminal() && status == RunStatus::Running {
            return;
        }
        if status != self.run.status {
            self.log.push(
                at,
                LogLevel::Info,
                format!("Run status reconciled: {} -> {status}", self.run.status),
            );
            self.run.status = status;
        }
        if status != RunStatus::Running {
            for thread in &mut self.threads {
                thread.active = false;
            }
            self.run.phase = None;
        }
    }

    fn reconcile_artifacts(&mut self, listing: ArtifactListing, at: DateTime<Utc>) {
        if self.run.run_id.as_deref() != Some(listing.run_id.as_str()) {
            return;
        }
        let mut merged = RunState::default();
        for record in listing.artifacts {
            merged.upsert_artifact(record.into_artifact(at));
        }
        self.run.artifacts = merged.artifacts;
        self.log.push(
            at,
            LogLevel::Info,
            format!("Loaded {} artifacts", self.run.artifacts.len()),
        );
    }
}
