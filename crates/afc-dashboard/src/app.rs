use std::collections::BTreeMap;

use afc_core::connection::ConnectionState;
use afc_core::events::{decode, EventKind, WorkflowEvent};
use afc_core::journal::{LogLevel, SystemLog};
use afc_core::reconcile::{ArtifactListing, RunSnapshot, Tagged};
use afc_core::state::{AgentThread, Applied, RunState, WorkflowState};
use afc_core::{AgentProfile, RunStatus, RunSummary};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::config::Config;
use crate::dispatch::{Dispatcher, Intent, Outcome};
use crate::stream::StreamEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    Start,
    Resume,
    Stop,
    ViewArtifact,
    SwitchRun,
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Start => "start",
            ActionKind::Resume => "resume",
            ActionKind::Stop => "stop",
            ActionKind::ViewArtifact => "artifact",
            ActionKind::SwitchRun => "switch",
        }
    }
}

/// Inline indicator for an operator action. Cleared once the request succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    InFlight,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactBody {
    Loading,
    Loaded(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactView {
    pub filename: String,
    pub run_id: Option<String>,
    pub body: ArtifactBody,
    pub scroll: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Agents,
    Artifacts,
    Runs,
}

impl Focus {
    pub fn next(self) -> Self {
        match self {
            Focus::Agents => Focus::Artifacts,
            Focus::Artifacts => Focus::Runs,
            Focus::Runs => Focus::Agents,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// Known from the roster, no activity in this run yet.
    Waiting,
    Idle,
    Active,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRow {
    pub id: String,
    pub name: String,
    pub role: Option<String>,
    pub status: AgentStatus,
}

/// Read-only projection handed to the renderer.
pub struct DashboardView<'a> {
    pub run: &'a RunState,
    pub agents: Vec<AgentRow>,
    pub viewing: Option<&'a AgentThread>,
    pub following: bool,
    pub runs: &'a [RunSummary],
    pub log: &'a SystemLog,
    pub connection: &'a ConnectionState,
    pub viewer: Option<&'a ArtifactView>,
    pub actions: &'a BTreeMap<ActionKind, PendingAction>,
    pub product_idea: &'a str,
    pub hitl_enabled: bool,
}

/// Dashboard store. The main loop owns it and is its only writer.
pub struct App {
    state: WorkflowState,
    connection: ConnectionState,
    roster: Vec<AgentProfile>,
    viewer: Option<ArtifactView>,
    actions: BTreeMap<ActionKind, PendingAction>,
    viewing_agent: Option<String>,
    follow_active: bool,
    dispatcher: Dispatcher,
    pub(crate) product_idea: String,
    pub(crate) hitl_enabled: bool,
    pub(crate) focus: Focus,
    pub(crate) selected_agent: usize,
    pub(crate) selected_artifact: usize,
    pub(crate) selected_run: usize,
    /// Set while the operator edits the product idea.
    pub(crate) idea_draft: Option<String>,
}

impl App {
    pub fn new(config: &Config, dispatcher: Dispatcher) -> Self {
        Self {
            state: WorkflowState::with_limits(config.log_capacity, config.transcript_cap),
            connection: ConnectionState::default(),
            roster: Vec::new(),
            viewer: None,
            actions: BTreeMap::new(),
            viewing_agent: None,
            follow_active: true,
            dispatcher,
            product_idea: config.product_idea.clone(),
            hitl_enabled: config.hitl_enabled,
            focus: Focus::Agents,
            selected_agent: 0,
            selected_artifact: 0,
            selected_run: 0,
            idea_draft: None,
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Initial REST load; the stream may already be delivering events.
    pub fn bootstrap(&mut self, at: DateTime<Utc>) {
        self.state
            .note(at, LogLevel::Info, "System: Loading run history...");
        self.submit(Intent::RefreshRuns, at);
        self.submit(Intent::LoadAgents, at);
    }

    pub fn set_connection(&mut self, connection: ConnectionState) {
        self.connection = connection;
    }

    pub fn apply_stream_event(&mut self, event: StreamEvent, at: DateTime<Utc>) {
        match event {
            StreamEvent::Opened { resumed } => {
                self.state
                    .note(at, LogLevel::Success, "System: Connected to server");
                if resumed {
                    self.state.note(
                        at,
                        LogLevel::Info,
                        "System: Reconnected, resynchronising run state",
                    );
                    self.refresh_current_run(at);
                }
            }
            StreamEvent::Message(raw) => match decode(&raw, at) {
                Ok(event) => self.apply_workflow_event(&event, at),
                Err(err) => {
                    warn!("stream_decode_error: {err}");
                    self.state.note(
                        at,
                        LogLevel::Warn,
                        format!("System: Dropped malformed message: {err}"),
                    );
                }
            },
            StreamEvent::Closed { error, retry_in } => {
                let detail = error.map(|err| format!(" ({err})")).unwrap_or_default();
                self.state.note(
                    at,
                    LogLevel::Warn,
                    format!(
                        "System: Disconnected{detail}. Retrying in {:.1}s...",
                        retry_in.as_secs_f64()
                    ),
                );
            }
        }
    }

    fn apply_workflow_event(&mut self, event: &WorkflowEvent, at: DateTime<Utc>) {
        let applied = self.state.apply(event);
        match (&event.kind, applied) {
            (_, Applied::Ignored) => {
                debug!("stream_event_ignored: {}", event.kind.name());
            }
            (EventKind::WorkflowStart(_), _) => {
                self.reset_run_view();
                self.submit(Intent::RefreshRuns, at);
            }
            (EventKind::WorkflowComplete(_), _) => {
                self.submit(Intent::RefreshRuns, at);
            }
            (EventKind::AgentStart(payload), Applied::View) => {
                if self.follow_active {
                    self.viewing_agent = Some(payload.agent.clone());
                }
            }
            _ => {}
        }
        self.clamp_selection();
    }

    /// Folds a dispatched request's result into the store. Results issued
    /// under an older epoch never touch the view, but failures are still
    /// reported and action indicators still settle.
    pub fn apply_outcome(&mut self, tagged: Tagged<Outcome>, at: DateTime<Utc>) {
        let current = self.state.accepts(tagged.epoch);
        match tagged.value {
            Outcome::Started {
                product_idea,
                result,
            } => match result {
                Ok(started) => {
                    self.actions.remove(&ActionKind::Start);
                    debug!("start_accepted: status={}", started.status);
                    if let Some(message) = started.message.as_deref().filter(|m| !m.is_empty()) {
                        self.state
                            .note(at, LogLevel::Info, format!("System: {message}"));
                    }
                    match started.run_id {
                        Some(run_id) if current => {
                            let before = self.state.epoch();
                            self.state.adopt_started_run(&run_id, &product_idea, at);
                            if self.state.epoch() != before {
                                self.reset_run_view();
                            }
                        }
                        Some(run_id) => debug!("start_outcome_stale: {run_id}"),
                        None => self.state.note(
                            at,
                            LogLevel::Warn,
                            "System: Server accepted the run without returning a run id",
                        ),
                    }
                }
                Err(err) => self.fail(ActionKind::Start, at, "Error starting workflow", err),
            },
            Outcome::Resumed { run_id, result } => match result {
                Ok(()) => {
                    self.actions.remove(&ActionKind::Resume);
                    self.state.note(
                        at,
                        LogLevel::Info,
                        format!("System: Resume accepted for run {run_id}"),
                    );
                }
                Err(err) => self.fail(ActionKind::Resume, at, "Error resuming workflow", err),
            },
            Outcome::Stopped { run_id, result } => match result {
                Ok(()) => {
                    self.actions.remove(&ActionKind::Stop);
                    self.state.note(
                        at,
                        LogLevel::Info,
                        format!("System: Stop requested for run {run_id}"),
                    );
                    self.submit(Intent::RefreshRuns, at);
                }
                Err(err) => self.fail(ActionKind::Stop, at, "Error stopping workflow", err),
            },
            Outcome::Artifact {
                filename,
                run_id,
                result,
            } => {
                let body = match result {
                    Ok(content) => {
                        self.actions.remove(&ActionKind::ViewArtifact);
                        ArtifactBody::Loaded(content)
                    }
                    Err(err) => {
                        let reason = err.to_string();
                        self.fail(
                            ActionKind::ViewArtifact,
                            at,
                            &format!("Error loading artifact {filename}"),
                            err,
                        );
                        ArtifactBody::Failed(reason)
                    }
                };
                if !current {
                    debug!("artifact_outcome_stale: {filename}");
                    return;
                }
                if let Some(viewer) = self.viewer.as_mut() {
                    if viewer.filename == filename && viewer.run_id == run_id {
                        viewer.body = body;
                    }
                }
            }
            Outcome::Runs(result) => match result {
                Ok(runs) if current => {
                    self.state.reconcile(RunSnapshot::runs(runs, at));
                    self.clamp_selection();
                }
                Ok(_) => debug!("runs_outcome_stale"),
                Err(err) => {
                    warn!("runs_fetch_error: {err}");
                    self.state.note(
                        at,
                        LogLevel::Warn,
                        format!("System: Error fetching runs: {err}"),
                    );
                }
            },
            Outcome::RunArtifacts {
                run_id,
                switched,
                result,
            } => match result {
                Ok(artifacts) => {
                    if switched {
                        self.actions.remove(&ActionKind::SwitchRun);
                    }
                    if current {
                        self.state.reconcile(RunSnapshot::artifacts(
                            ArtifactListing { run_id, artifacts },
                            at,
                        ));
                        self.clamp_selection();
                    } else {
                        debug!("artifacts_outcome_stale: {run_id}");
                    }
                }
                Err(err) if switched => self.fail(
                    ActionKind::SwitchRun,
                    at,
                    &format!("Error fetching artifacts for run {run_id}"),
                    err,
                ),
                Err(err) => {
                    warn!("artifacts_fetch_error: {err}");
                    self.state.note(
                        at,
                        LogLevel::Warn,
                        format!("System: Error fetching artifacts for run {run_id}: {err}"),
                    );
                }
            },
            Outcome::Agents(result) => match result {
                Ok(roster) => {
                    self.roster = roster;
                    self.clamp_selection();
                }
                Err(err) => {
                    warn!("agents_fetch_error: {err}");
                    self.state.note(
                        at,
                        LogLevel::Warn,
                        format!("System: Error fetching agents: {err}"),
                    );
                }
            },
        }
    }

    /// Applies the local half of an intent, then hands the request to the
    /// dispatcher under the resulting epoch.
    pub fn submit(&mut self, intent: Intent, at: DateTime<Utc>) {
        match &intent {
            Intent::Start { product_idea, .. } => {
                if product_idea.trim().is_empty() {
                    self.state.note(
                        at,
                        LogLevel::Warn,
                        "System: Enter a product idea before starting",
                    );
                    return;
                }
                self.actions.insert(ActionKind::Start, PendingAction::InFlight);
                self.state
                    .note(at, LogLevel::Info, "System: Starting workflow...");
            }
            Intent::Resume { run_id, .. } => {
                self.actions
                    .insert(ActionKind::Resume, PendingAction::InFlight);
                self.state.note(
                    at,
                    LogLevel::Info,
                    format!("System: Resuming workflow {run_id}..."),
                );
            }
            Intent::Stop { run_id } => {
                self.actions.insert(ActionKind::Stop, PendingAction::InFlight);
                self.state.note(
                    at,
                    LogLevel::Info,
                    format!("System: Stopping workflow {run_id}..."),
                );
            }
            Intent::ViewArtifact { filename, run_id } => {
                self.viewer = Some(ArtifactView {
                    filename: filename.clone(),
                    run_id: run_id.clone(),
                    body: ArtifactBody::Loading,
                    scroll: 0,
                });
                self.actions
                    .insert(ActionKind::ViewArtifact, PendingAction::InFlight);
            }
            Intent::SwitchRun { run_id } => {
                self.state.switch_run(run_id, at);
                self.reset_run_view();
                self.actions
                    .insert(ActionKind::SwitchRun, PendingAction::InFlight);
                self.state.note(
                    at,
                    LogLevel::Info,
                    format!("System: Fetching artifacts for run {run_id}..."),
                );
            }
            Intent::RefreshRuns | Intent::RefreshArtifacts { .. } | Intent::LoadAgents => {}
        }
        self.dispatcher.dispatch(intent, self.state.epoch());
    }

    pub fn start(&mut self, at: DateTime<Utc>) {
        if self.state.run().status == RunStatus::Running {
            self.state
                .note(at, LogLevel::Warn, "System: A run is already in progress");
            return;
        }
        let intent = Intent::Start {
            product_idea: self.product_idea.trim().to_string(),
            hitl_enabled: self.hitl_enabled,
        };
        self.submit(intent, at);
    }

    pub fn resume(&mut self, at: DateTime<Utc>) {
        let run = self.state.run();
        let Some(run_id) = run.run_id.clone() else {
            self.state
                .note(at, LogLevel::Warn, "System: No run selected to resume");
            return;
        };
        if run.status == RunStatus::Running {
            self.state
                .note(at, LogLevel::Warn, "System: Run is already running");
            return;
        }
        let hitl_enabled = self.hitl_enabled;
        self.submit(
            Intent::Resume {
                run_id,
                hitl_enabled,
            },
            at,
        );
    }

    pub fn stop(&mut self, at: DateTime<Utc>) {
        let run = self.state.run();
        let Some(run_id) = run.run_id.clone() else {
            self.state
                .note(at, LogLevel::Warn, "System: No run selected to stop");
            return;
        };
        if !matches!(run.status, RunStatus::Running | RunStatus::Paused) {
            self.state
                .note(at, LogLevel::Warn, "System: Run is not active");
            return;
        }
        self.submit(Intent::Stop { run_id }, at);
    }

    pub fn view_selected_artifact(&mut self, at: DateTime<Utc>) {
        let run = self.state.run();
        let Some(artifact) = run.artifacts.get(self.selected_artifact) else {
            return;
        };
        let intent = Intent::ViewArtifact {
            filename: artifact.filename.clone(),
            run_id: run.run_id.clone(),
        };
        self.submit(intent, at);
    }

    pub fn switch_to_selected_run(&mut self, at: DateTime<Utc>) {
        let Some(run_id) = self
            .state
            .runs()
            .get(self.selected_run)
            .map(|run| run.id.clone())
        else {
            return;
        };
        if self.state.run().run_id.as_deref() == Some(run_id.as_str()) {
            return;
        }
        self.submit(Intent::SwitchRun { run_id }, at);
    }

    /// Pins the transcript panel to the selected agent.
    pub fn pin_selected_agent(&mut self) {
        if let Some(row) = self.agent_rows().into_iter().nth(self.selected_agent) {
            self.viewing_agent = Some(row.id);
            self.follow_active = false;
        }
    }

    pub fn follow_active_agent(&mut self) {
        self.follow_active = true;
        self.viewing_agent = self
            .state
            .active_agent()
            .map(|thread| thread.agent_id.clone());
    }

    pub fn toggle_hitl(&mut self) {
        self.hitl_enabled = !self.hitl_enabled;
    }

    pub fn close_viewer(&mut self) {
        self.viewer = None;
    }

    pub fn scroll_viewer(&mut self, delta: i32) {
        if let Some(viewer) = self.viewer.as_mut() {
            viewer.scroll = (i32::from(viewer.scroll) + delta).clamp(0, i32::from(u16::MAX)) as u16;
        }
    }

    pub fn viewer_open(&self) -> bool {
        self.viewer.is_some()
    }

    pub fn move_selection(&mut self, delta: isize) {
        let len = match self.focus {
            Focus::Agents => self.agent_rows().len(),
            Focus::Artifacts => self.state.run().artifacts.len(),
            Focus::Runs => self.state.runs().len(),
        };
        let selected = match self.focus {
            Focus::Agents => &mut self.selected_agent,
            Focus::Artifacts => &mut self.selected_artifact,
            Focus::Runs => &mut self.selected_run,
        };
        if len == 0 {
            *selected = 0;
            return;
        }
        let next = (*selected as isize + delta).clamp(0, len as isize - 1);
        *selected = next as usize;
    }

    /// Roster agents first, in roster order, then agents only seen on the
    /// stream. Status comes from explicit events only.
    pub fn agent_rows(&self) -> Vec<AgentRow> {
        let mut rows: Vec<AgentRow> = self
            .roster
            .iter()
            .map(|profile| {
                let thread = self.state.thread(&profile.id);
                AgentRow {
                    id: profile.id.clone(),
                    name: if profile.name.is_empty() {
                        profile.id.clone()
                    } else {
                        profile.name.clone()
                    },
                    role: thread
                        .and_then(|thread| thread.role.clone())
                        .or_else(|| Some(profile.role.clone()).filter(|role| !role.is_empty())),
                    status: thread.map(thread_status).unwrap_or(AgentStatus::Waiting),
                }
            })
            .collect();
        for thread in self.state.threads() {
            if self.roster.iter().any(|profile| profile.id == thread.agent_id) {
                continue;
            }
            rows.push(AgentRow {
                id: thread.agent_id.clone(),
                name: thread.agent_id.clone(),
                role: thread.role.clone(),
                status: thread_status(thread),
            });
        }
        rows
    }

    pub fn viewing_thread(&self) -> Option<&AgentThread> {
        self.viewing_agent
            .as_deref()
            .and_then(|agent_id| self.state.thread(agent_id))
            .or_else(|| self.state.active_agent())
            .or_else(|| self.state.threads().last())
    }

    pub fn view(&self) -> DashboardView<'_> {
        DashboardView {
            run: self.state.run(),
            agents: self.agent_rows(),
            viewing: self.viewing_thread(),
            following: self.follow_active,
            runs: self.state.runs(),
            log: self.state.log(),
            connection: &self.connection,
            viewer: self.viewer.as_ref(),
            actions: &self.actions,
            product_idea: &self.product_idea,
            hitl_enabled: self.hitl_enabled,
        }
    }

    fn refresh_current_run(&mut self, at: DateTime<Utc>) {
        self.submit(Intent::RefreshRuns, at);
        if let Some(run_id) = self.state.run().run_id.clone() {
            self.submit(Intent::RefreshArtifacts { run_id }, at);
        }
    }

    fn fail(&mut self, kind: ActionKind, at: DateTime<Utc>, context: &str, err: ApiError) {
        warn!("action_failed: {} {err}", kind.label());
        self.state
            .note(at, LogLevel::Error, format!("System: {context}: {err}"));
        self.actions
            .insert(kind, PendingAction::Failed(err.to_string()));
    }

    /// Local view state that belongs to a single run.
    fn reset_run_view(&mut self) {
        self.viewer = None;
        self.viewing_agent = None;
        self.follow_active = true;
        self.selected_agent = 0;
        self.selected_artifact = 0;
        self.actions.remove(&ActionKind::ViewArtifact);
    }

    fn clamp_selection(&mut self) {
        let agents = self.agent_rows().len();
        let artifacts = self.state.run().artifacts.len();
        let runs = self.state.runs().len();
        self.selected_agent = self.selected_agent.min(agents.saturating_sub(1));
        self.selected_artifact = self.selected_artifact.min(artifacts.saturating_sub(1));
        self.selected_run = self.selected_run.min(runs.saturating_sub(1));
    }
}

fn thread_status(thread: &AgentThread) -> AgentStatus {
    if thread.active {
        AgentStatus::Active
    } else if thread.failed {
        AgentStatus::Failed
    } else if thread.done {
        AgentStatus::Done
    } else {
        AgentStatus::Idle
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use afc_core::reconcile::{ArtifactRecord, Epoch};
    use chrono::TimeZone;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::{load_config_with, Args};
    use crate::dispatch::testing::FakeApi;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 7, 21, 0, second).unwrap()
    }

    fn app_with(api: FakeApi) -> (App, Arc<FakeApi>, mpsc::Receiver<Tagged<Outcome>>) {
        let config = load_config_with(Args::default(), |_| None).expect("config");
        let api = Arc::new(api);
        let (tx, rx) = mpsc::channel(32);
        let app = App::new(&config, Dispatcher::new(api.clone(), tx));
        (app, api, rx)
    }

    fn message(app: &mut App, raw: serde_json::Value, second: u32) {
        app.apply_stream_event(StreamEvent::Message(raw.to_string()), at(second));
    }

    fn summary(id: &str, status: &str) -> RunSummary {
        RunSummary {
            id: id.to_string(),
            product_idea: format!("idea {id}"),
            timestamp: None,
            status: status.to_string(),
            total_tokens: Some(10),
            end_time: None,
        }
    }

    async fn next_outcome(rx: &mut mpsc::Receiver<Tagged<Outcome>>) -> Tagged<Outcome> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("outcome in time")
            .expect("outcome")
    }

    #[tokio::test]
    async fn stream_drives_view_and_follows_active_agent() {
        let (mut app, _api, mut rx) = app_with(FakeApi::default());
        app.apply_stream_event(StreamEvent::Opened { resumed: false }, at(0));
        message(&mut app, json!({"type": "workflow_start", "data": {"run_id": "r1", "product_idea": "X"}}), 1);
        message(&mut app, json!({"type": "agent_start", "data": {"agent": "ProductManager", "run_id": "r1"}}), 2);
        message(&mut app, json!({"type": "thought_chunk", "data": {"agent": "ProductManager", "chunk": "Hello", "run_id": "r1"}}), 3);

        let view = app.view();
        assert_eq!(view.run.run_id.as_deref(), Some("r1"));
        assert_eq!(view.run.status, RunStatus::Running);
        let viewing = view.viewing.expect("viewing thread");
        assert_eq!(viewing.agent_id, "ProductManager");
        assert_eq!(viewing.transcript.as_str(), "Hello");
        assert_eq!(view.agents[0].status, AgentStatus::Active);

        // workflow_start asks for a fresh run list.
        let refresh = next_outcome(&mut rx).await;
        assert!(matches!(refresh.value, Outcome::Runs(Ok(_))));
    }

    #[tokio::test]
    async fn malformed_message_is_logged_and_stream_continues() {
        let (mut app, _api, _rx) = app_with(FakeApi::default());
        app.apply_stream_event(StreamEvent::Message("{not json".to_string()), at(0));
        message(&mut app, json!({"type": "agent_start", "data": {"agent": "TestLead"}}), 1);
        assert!(app
            .state()
            .log()
            .entries()
            .any(|entry| entry.level == LogLevel::Warn && entry.message.contains("Dropped malformed")));
        assert_eq!(
            app.state().active_agent().map(|thread| thread.agent_id.as_str()),
            Some("TestLead")
        );
    }

    #[tokio::test]
    async fn pinned_agent_survives_next_agent_start() {
        let (mut app, _api, _rx) = app_with(FakeApi::default());
        message(&mut app, json!({"type": "agent_start", "data": {"agent": "A"}}), 0);
        message(&mut app, json!({"type": "thought_chunk", "data": {"agent": "A", "chunk": "alpha"}}), 1);
        app.focus = Focus::Agents;
        app.selected_agent = 0;
        app.pin_selected_agent();
        message(&mut app, json!({"type": "agent_start", "data": {"agent": "B"}}), 2);
        assert_eq!(app.viewing_thread().map(|thread| thread.agent_id.as_str()), Some("A"));

        app.follow_active_agent();
        assert_eq!(app.viewing_thread().map(|thread| thread.agent_id.as_str()), Some("B"));
    }

    #[tokio::test]
    async fn switch_run_loads_artifacts_under_new_epoch() {
        let mut artifacts = HashMap::new();
        artifacts.insert(
            "r0".to_string(),
            vec![ArtifactRecord {
                filename: "bugs.md".to_string(),
                kind: "bugs".to_string(),
                agent: Some("ManualQA".to_string()),
                timestamp: Some("2026-02-07 08:30:00".to_string()),
                path: None,
            }],
        );
        let (mut app, api, mut rx) = app_with(FakeApi {
            artifacts,
            ..FakeApi::default()
        });
        message(&mut app, json!({"type": "workflow_start", "data": {"run_id": "r1", "product_idea": "X"}}), 0);
        let refresh = next_outcome(&mut rx).await;
        app.apply_outcome(refresh, at(1));

        app.submit(
            Intent::SwitchRun {
                run_id: "r0".to_string(),
            },
            at(2),
        );
        assert_eq!(app.view().actions.get(&ActionKind::SwitchRun), Some(&PendingAction::InFlight));
        let listing = next_outcome(&mut rx).await;
        assert_eq!(listing.epoch, app.state().epoch());
        app.apply_outcome(listing, at(3));

        let view = app.view();
        assert_eq!(view.run.run_id.as_deref(), Some("r0"));
        assert_eq!(view.run.artifacts.len(), 1);
        assert!(view.actions.is_empty());
        assert!(api.calls().contains(&"list_run_artifacts r0".to_string()));
    }

    #[tokio::test]
    async fn stale_outcomes_do_not_touch_the_new_view() {
        let (mut app, _api, _rx) = app_with(FakeApi::default());
        message(&mut app, json!({"type": "workflow_start", "data": {"run_id": "r1", "product_idea": "X"}}), 0);
        let old = app.state().epoch();
        app.submit(
            Intent::SwitchRun {
                run_id: "r0".to_string(),
            },
            at(1),
        );
        assert_ne!(old, app.state().epoch());

        app.apply_outcome(
            Tagged::new(
                old,
                Outcome::RunArtifacts {
                    run_id: "r0".to_string(),
                    switched: false,
                    result: Ok(vec![ArtifactRecord {
                        filename: "late.md".to_string(),
                        kind: String::new(),
                        agent: None,
                        timestamp: None,
                        path: None,
                    }]),
                },
            ),
            at(2),
        );
        app.apply_outcome(
            Tagged::new(
                old,
                Outcome::Started {
                    product_idea: "Y".to_string(),
                    result: Ok(crate::api::StartedRun {
                        run_id: Some("r9".to_string()),
                        ..Default::default()
                    }),
                },
            ),
            at(3),
        );
        assert_eq!(app.state().run().run_id.as_deref(), Some("r0"));
        assert!(app.state().run().artifacts.is_empty());
    }

    #[tokio::test]
    async fn start_failure_is_reported_inline_and_in_log() {
        let (mut app, api, mut rx) = app_with(FakeApi {
            fail_with: Some(ApiError::Transport("connection refused".to_string())),
            ..FakeApi::default()
        });
        app.start(at(0));
        assert_eq!(app.view().actions.get(&ActionKind::Start), Some(&PendingAction::InFlight));
        let outcome = next_outcome(&mut rx).await;
        app.apply_outcome(outcome, at(1));

        match app.view().actions.get(&ActionKind::Start) {
            Some(PendingAction::Failed(reason)) => assert!(reason.contains("connection refused")),
            other => panic!("unexpected action state: {other:?}"),
        }
        let last = app.state().log().entries().last().expect("log line");
        assert_eq!(last.level, LogLevel::Error);
        assert!(last.message.starts_with("System: Error starting workflow"));
        assert_eq!(
            api.calls(),
            vec![format!("start_run {} false", crate::config::DEFAULT_PRODUCT_IDEA)]
        );
    }

    #[tokio::test]
    async fn started_run_id_is_adopted_once() {
        let (mut app, _api, mut rx) = app_with(FakeApi {
            started_run_id: Some("r5".to_string()),
            ..FakeApi::default()
        });
        app.product_idea = "Volume".to_string();
        app.start(at(0));
        let outcome = next_outcome(&mut rx).await;
        app.apply_outcome(outcome, at(1));
        assert_eq!(app.state().run().run_id.as_deref(), Some("r5"));
        assert_eq!(app.state().run().product_idea, "Volume");

        // The stream's own workflow_start for the same run resets once more
        // but must keep the run id.
        message(&mut app, json!({"type": "workflow_start", "data": {"run_id": "r5", "product_idea": "Volume"}}), 2);
        assert_eq!(app.state().run().run_id.as_deref(), Some("r5"));
        assert!(app.view().actions.is_empty());
    }

    #[tokio::test]
    async fn resumed_stream_refetches_runs_and_artifacts() {
        let (mut app, api, mut rx) = app_with(FakeApi {
            runs: std::sync::Mutex::new(vec![summary("r1", "success")]),
            ..FakeApi::default()
        });
        message(&mut app, json!({"type": "workflow_start", "data": {"run_id": "r1", "product_idea": "X"}}), 0);
        message(&mut app, json!({"type": "agent_start", "data": {"agent": "Dev", "run_id": "r1"}}), 1);
        let first = next_outcome(&mut rx).await;
        app.apply_outcome(first, at(2));
        assert_eq!(app.state().run().status, RunStatus::Complete);

        app.apply_stream_event(StreamEvent::Opened { resumed: true }, at(3));
        for _ in 0..2 {
            let outcome = next_outcome(&mut rx).await;
            app.apply_outcome(outcome, at(4));
        }
        let calls = api.calls();
        assert_eq!(calls.iter().filter(|call| *call == "list_runs").count(), 2);
        assert!(calls.contains(&"list_run_artifacts r1".to_string()));
    }

    #[tokio::test]
    async fn artifact_viewer_moves_from_loading_to_loaded() {
        let mut contents = HashMap::new();
        contents.insert("mrs.md".to_string(), "# MRS".to_string());
        let (mut app, _api, mut rx) = app_with(FakeApi {
            contents,
            ..FakeApi::default()
        });
        message(&mut app, json!({"type": "workflow_start", "data": {"run_id": "r1", "product_idea": "X"}}), 0);
        let _refresh = next_outcome(&mut rx).await;
        message(&mut app, json!({"type": "artifact_generated", "data": {"filename": "mrs.md", "run_id": "r1"}}), 1);

        app.view_selected_artifact(at(2));
        assert_eq!(app.view().viewer.map(|viewer| &viewer.body), Some(&ArtifactBody::Loading));
        let outcome = next_outcome(&mut rx).await;
        app.apply_outcome(outcome, at(3));
        assert_eq!(
            app.view().viewer.map(|viewer| &viewer.body),
            Some(&ArtifactBody::Loaded("# MRS".to_string()))
        );
    }

    #[tokio::test]
    async fn disconnect_notes_retry_delay() {
        let (mut app, _api, _rx) = app_with(FakeApi::default());
        app.apply_stream_event(
            StreamEvent::Closed {
                error: Some("refused".to_string()),
                retry_in: Duration::from_secs(2),
            },
            at(0),
        );
        let last = app.state().log().entries().last().expect("log line");
        assert_eq!(last.message, "System: Disconnected (refused). Retrying in 2.0s...");
        assert_eq!(Epoch::default(), app.state().epoch());
    }
}
