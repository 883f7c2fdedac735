use chrono::{DateTime, Utc};

use crate::events::{EventKind, WorkflowEvent};
use crate::journal::{LogLevel, SystemLog, Transcript, DEFAULT_LOG_CAPACITY, DEFAULT_TRANSCRIPT_CAP_BYTES};
use crate::reconcile::Epoch;
use crate::{Artifact, RunStatus, RunSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMarker {
    pub name: String,
    pub agent: Option<String>,
}

/// The run currently shown on the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    pub run_id: Option<String>,
    pub product_idea: String,
    pub status: RunStatus,
    pub total_tokens: Option<u64>,
    /// Arrival order; filenames are unique.
    pub artifacts: Vec<Artifact>,
    pub phase: Option<PhaseMarker>,
    /// Nodes waiting for operator approval while paused.
    pub paused_before: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn artifact(&self, filename: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|artifact| artifact.filename == filename)
    }

    pub(crate) fn upsert_artifact(&mut self, artifact: Artifact) {
        match self
            .artifacts
            .iter_mut()
            .find(|existing| existing.filename == artifact.filename)
        {
            Some(existing) => *existing = artifact,
            None => self.artifacts.push(artifact),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentThread {
    pub agent_id: String,
    pub role: Option<String>,
    pub transcript: Transcript,
    pub active: bool,
    /// Set only by an explicit `agent_complete`.
    pub done: bool,
    pub failed: bool,
}

impl AgentThread {
    fn new(agent_id: &str, transcript_cap: usize) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            role: None,
            transcript: Transcript::with_cap(transcript_cap),
            active: false,
            done: false,
            failed: false,
        }
    }
}

/// Where an event landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Folded into the current run view.
    View,
    /// Belonged to another run; only the run list was touched.
    OtherRun,
    /// Unknown kind, nothing changed.
    Ignored,
}

/// Single source of truth for the dashboard. Readers get shared references;
/// the only ways to change it are [`reduce`]/[`WorkflowState::apply`], the
/// reconciler, and log notes.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowState {
    pub(crate) run: RunState,
    pub(crate) threads: Vec<AgentThread>,
    pub(crate) runs: Vec<RunSummary>,
    pub(crate) log: SystemLog,
    pub(crate) epoch: Epoch,
    pub(crate) transcript_cap: usize,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::with_limits(DEFAULT_LOG_CAPACITY, DEFAULT_TRANSCRIPT_CAP_BYTES)
    }
}

/// Pure transition: `(state, event) -> state'`.
pub fn reduce(mut state: WorkflowState, event: &WorkflowEvent) -> WorkflowState {
    state.apply(event);
    state
}

impl WorkflowState {
    pub fn with_limits(log_capacity: usize, transcript_cap: usize) -> Self {
        Self {
            run: RunState::default(),
            threads: Vec::new(),
            runs: Vec::new(),
            log: SystemLog::with_capacity(log_capacity),
            epoch: Epoch::default(),
            transcript_cap,
        }
    }

    pub fn run(&self) -> &RunState {
        &self.run
    }

    pub fn threads(&self) -> &[AgentThread] {
        &self.threads
    }

    pub fn thread(&self, agent_id: &str) -> Option<&AgentThread> {
        self.threads.iter().find(|thread| thread.agent_id == agent_id)
    }

    pub fn active_agent(&self) -> Option<&AgentThread> {
        self.threads.iter().find(|thread| thread.active)
    }

    pub fn runs(&self) -> &[RunSummary] {
        &self.runs
    }

    pub fn log(&self) -> &SystemLog {
        &self.log
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Whether a result issued under `epoch` still belongs to this view.
    pub fn accepts(&self, epoch: Epoch) -> bool {
        self.epoch == epoch
    }

    pub fn note(&mut self, at: DateTime<Utc>, level: LogLevel, message: impl Into<String>) {
        self.log.push(at, level, message);
    }

    /// Applies one event in receipt order. Each branch either fully applies or
    /// leaves the state untouched.
    pub fn apply(&mut self, event: &WorkflowEvent) -> Applied {
        let at = event.received_at;
        match &event.kind {
            EventKind::WorkflowStart(payload) => {
                let run_id = payload.run_id.clone().or_else(|| event.run_id.clone());
                self.start_run(run_id, &payload.product_idea, at);
                return Applied::View;
            }
            EventKind::Unrecognized { .. } => return Applied::Ignored,
            EventKind::Error(payload) => {
                let owned = self.owns(event.run_id.as_deref());
                let message = match (&event.run_id, owned) {
                    (Some(run_id), false) => format!("Error in run {run_id}: {}", payload.message),
                    _ => format!("Error: {}", payload.message),
                };
                self.log.push(at, LogLevel::Error, message);
                return if owned { Applied::View } else { Applied::OtherRun };
            }
            _ => {}
        }

        if !self.owns(event.run_id.as_deref()) {
            self.apply_to_history(event);
            return Applied::OtherRun;
        }
        if self.run.run_id.is_none() {
            if let Some(run_id) = event.run_id.as_deref() {
                self.adopt_run_lazily(run_id);
            }
        }

        match &event.kind {
            EventKind::WorkflowComplete(payload) => {
                let status = if payload.succeeded() {
                    RunStatus::Complete
                } else {
                    RunStatus::Error
                };
                self.run.status = status;
                self.run.phase = None;
                if payload.total_tokens.is_some() {
                    self.run.total_tokens = payload.total_tokens;
                }
                self.clear_active();
                if let Some(run_id) = self.run.run_id.clone() {
                    self.update_run_entry(&run_id, status, payload.total_tokens);
                }
                let level = if status == RunStatus::Complete {
                    LogLevel::Success
                } else {
                    LogLevel::Error
                };
                self.log.push(
                    at,
                    level,
                    format!(
                        "Workflow complete: {} (tokens: {})",
                        payload.status,
                        payload.total_tokens.unwrap_or(0)
                    ),
                );
            }
            EventKind::WorkflowPaused(payload) => {
                self.run.status = RunStatus::Paused;
                self.run.phase = None;
                self.run.paused_before = payload.next.clone();
                self.clear_active();
                if let Some(run_id) = self.run.run_id.clone() {
                    self.update_run_entry(&run_id, RunStatus::Paused, None);
                }
                let next = if payload.next.is_empty() {
                    "the next step".to_string()
                } else {
                    payload.next.join(", ")
                };
                self.log.push(
                    at,
                    LogLevel::Warn,
                    format!("Workflow paused: waiting for approval to continue to {next}"),
                );
            }
            EventKind::PhaseStart(payload) => {
                let name = payload
                    .phase
                    .clone()
                    .unwrap_or_else(|| "unnamed phase".to_string());
                self.log
                    .push(at, LogLevel::Info, format!("Phase started: {name}"));
                self.run.phase = Some(PhaseMarker {
                    name,
                    agent: payload.agent.clone(),
                });
            }
            EventKind::PhaseComplete(payload) => {
                let name = payload
                    .phase
                    .clone()
                    .or_else(|| self.run.phase.as_ref().map(|phase| phase.name.clone()))
                    .unwrap_or_else(|| "unnamed phase".to_string());
                self.run.phase = None;
                self.log
                    .push(at, LogLevel::Info, format!("Phase complete: {name}"));
            }
            EventKind::AgentStart(payload) => {
                self.clear_active();
                let thread = self.thread_entry(&payload.agent);
                thread.active = true;
                thread.done = false;
                thread.failed = false;
                if payload.role.is_some() {
                    thread.role = payload.role.clone();
                }
                self.run.paused_before.clear();
                if matches!(self.run.status, RunStatus::Idle | RunStatus::Paused) {
                    self.run.status = RunStatus::Running;
                }
                let message = match payload.role.as_deref() {
                    Some(role) => format!("Agent active: {} ({role})", payload.agent),
                    None => format!("Agent active: {}", payload.agent),
                };
                self.log.push(at, LogLevel::Info, message);
            }
            EventKind::AgentComplete(payload) => {
                let thread = self.thread_entry(&payload.agent);
                thread.active = false;
                thread.done = true;
                thread.failed = payload.success == Some(false);
                let (level, outcome) = if payload.success == Some(false) {
                    (LogLevel::Warn, "failed")
                } else {
                    (LogLevel::Success, "complete")
                };
                self.log
                    .push(at, level, format!("Agent {outcome}: {}", payload.agent));
            }
            EventKind::ThoughtChunk(payload) => {
                self.thread_entry(&payload.agent)
                    .transcript
                    .push(&payload.chunk);
            }
            EventKind::ArtifactGenerated(payload) => {
                self.run.upsert_artifact(Artifact {
                    filename: payload.filename.clone(),
                    kind: payload.kind.clone(),
                    produced_by: payload.agent.clone(),
                    produced_at: at,
                    path: payload.path.clone(),
                });
                self.log.push(
                    at,
                    LogLevel::Info,
                    format!("Artifact generated: {}", payload.filename),
                );
            }
            EventKind::WorkflowStart(_) | EventKind::Error(_) | EventKind::Unrecognized { .. } => {}
        }
        Applied::View
    }

    /// Records the run id handed back by a start request. Re-recording the
    /// current run is a no-op; a different id replaces the view.
    pub fn adopt_started_run(&mut self, run_id: &str, product_idea: &str, at: DateTime<Utc>) {
        if self.run.run_id.as_deref() == Some(run_id) {
            return;
        }
        self.start_run(Some(run_id.to_string()), product_idea, at);
    }

    fn start_run(&mut self, run_id: Option<String>, product_idea: &str, at: DateTime<Utc>) {
        self.run = RunState {
            run_id: run_id.clone(),
            product_idea: product_idea.to_string(),
            status: RunStatus::Running,
            started_at: Some(at),
            ..RunState::default()
        };
        self.threads.clear();
        self.epoch = self.epoch.next();
        if let Some(run_id) = run_id.as_deref() {
            let entry = self.run_entry(run_id, RunStatus::Running);
            if entry.product_idea.is_empty() {
                entry.product_idea = product_idea.to_string();
            }
        }
        self.log
            .push(at, LogLevel::Info, format!("Workflow started: {product_idea}"));
    }

    fn adopt_run_lazily(&mut self, run_id: &str) {
        self.run.run_id = Some(run_id.to_string());
        if self.run.status == RunStatus::Idle {
            self.run.status = RunStatus::Running;
        }
        let status = self.run.status;
        self.run_entry(run_id, status);
    }

    fn apply_to_history(&mut self, event: &WorkflowEvent) {
        let Some(run_id) = event.run_id.as_deref() else {
            return;
        };
        match &event.kind {
            EventKind::WorkflowComplete(payload) => {
                let status = if payload.succeeded() {
                    RunStatus::Complete
                } else {
                    RunStatus::Error
                };
                self.update_run_entry(run_id, status, payload.total_tokens);
                self.log.push(
                    event.received_at,
                    LogLevel::Info,
                    format!("Run {run_id} finished in background: {}", payload.status),
                );
            }
            EventKind::WorkflowPaused(_) => {
                self.update_run_entry(run_id, RunStatus::Paused, None);
            }
            EventKind::AgentStart(_) | EventKind::ThoughtChunk(_) | EventKind::PhaseStart(_) => {
                let entry = self.run_entry(run_id, RunStatus::Running);
                let terminal = entry.run_status().is_some_and(|status| status.is_terminal());
                if !terminal {
                    entry.status = RunStatus::Running.as_str().to_string();
                }
            }
            _ => {
                self.run_entry(run_id, RunStatus::Running);
            }
        }
    }

    /// Clears every active flag: at most one agent is ever active.
    fn clear_active(&mut self) {
        for thread in &mut self.threads {
            thread.active = false;
        }
    }

    fn owns(&self, run_id: Option<&str>) -> bool {
        match (run_id, self.run.run_id.as_deref()) {
            (Some(incoming), Some(current)) => incoming == current,
            _ => true,
        }
    }

    fn thread_entry(&mut self, agent_id: &str) -> &mut AgentThread {
        let index = match self
            .threads
            .iter()
            .position(|thread| thread.agent_id == agent_id)
        {
            Some(index) => index,
            None => {
                self.threads
                    .push(AgentThread::new(agent_id, self.transcript_cap));
                self.threads.len() - 1
            }
        };
        &mut self.threads[index]
    }

    pub(crate) fn run_entry(&mut self, run_id: &str, status: RunStatus) -> &mut RunSummary {
        let index = match self.runs.iter().position(|run| run.id == run_id) {
            Some(index) => index,
            None => {
                self.runs.insert(0, RunSummary::placeholder(run_id, status));
                0
            }
        };
        &mut self.runs[index]
    }

    fn update_run_entry(&mut self, run_id: &str, status: RunStatus, total_tokens: Option<u64>) {
        let entry = self.run_entry(run_id, status);
        entry.status = status.as_str().to_string();
        if total_tokens.is_some() {
            entry.total_tokens = total_tokens;
        }
    }
}
