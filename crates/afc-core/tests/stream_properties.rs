use afc_core::events::{decode, WorkflowEvent};
use afc_core::journal::LogLevel;
use afc_core::reconcile::{reconcile, switch_run, ArtifactListing, ArtifactRecord, RunSnapshot};
use afc_core::state::{reduce, WorkflowState};
use afc_core::{RunStatus, RunSummary};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

fn at(second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 7, 21, 0, second).unwrap()
}

fn events(raw: &[serde_json::Value]) -> Vec<WorkflowEvent> {
    raw.iter()
        .enumerate()
        .map(|(index, value)| decode(&value.to_string(), at(index as u32)).expect("decode fixture"))
        .collect()
}

fn fold(events: &[WorkflowEvent]) -> WorkflowState {
    events
        .iter()
        .fold(WorkflowState::default(), |state, event| reduce(state, event))
}

fn sample_stream() -> Vec<serde_json::Value> {
    vec![
        json!({"type": "workflow_start", "data": {"run_id": "r1", "product_idea": "X"}, "timestamp": "2026-02-07T21:00:00"}),
        json!({"type": "phase_start", "data": {"phase": "Requirements Creation", "agent": "ProductManager", "run_id": "r1"}}),
        json!({"type": "agent_start", "data": {"agent": "ProductManager", "role": "Product Manager", "run_id": "r1"}}),
        json!({"type": "thought_chunk", "data": {"agent": "ProductManager", "chunk": "Hello", "run_id": "r1"}}),
        json!({"type": "artifact_generated", "data": {"filename": "spec.md", "type": "requirements", "agent": "ProductManager", "run_id": "r1"}}),
        json!({"type": "agent_complete", "data": {"agent": "ProductManager", "success": true, "run_id": "r1"}}),
        json!({"type": "workflow_complete", "data": {"status": "success", "total_tokens": 42, "run_id": "r1"}}),
    ]
}

#[test]
fn replaying_a_stream_is_deterministic() {
    let stream = events(&sample_stream());
    assert_eq!(fold(&stream), fold(&stream));
}

#[test]
fn thoughts_accumulate_for_the_single_active_agent() {
    let state = fold(&events(&[
        json!({"type": "workflow_start", "data": {"run_id": "r1", "product_idea": "X"}}),
        json!({"type": "agent_start", "data": {"agent": "TestManager"}}),
        json!({"type": "agent_start", "data": {"agent": "X"}}),
        json!({"type": "thought_chunk", "data": {"agent": "X", "chunk": "a"}}),
        json!({"type": "thought_chunk", "data": {"agent": "X", "chunk": "b"}}),
    ]));
    let thread = state.thread("X").expect("thread X");
    assert_eq!(thread.transcript.as_str(), "ab");
    assert!(thread.active);
    assert!(state
        .threads()
        .iter()
        .filter(|thread| thread.agent_id != "X")
        .all(|thread| !thread.active));
}

#[test]
fn second_agent_start_deactivates_the_first() {
    let state = fold(&events(&[
        json!({"type": "agent_start", "data": {"agent": "X"}}),
        json!({"type": "thought_chunk", "data": {"agent": "X", "chunk": "kept"}}),
        json!({"type": "agent_start", "data": {"agent": "Y"}}),
    ]));
    let x = state.thread("X").expect("thread X");
    assert!(!x.active);
    assert_eq!(x.transcript.as_str(), "kept");
    assert_eq!(state.active_agent().map(|thread| thread.agent_id.as_str()), Some("Y"));
    assert_eq!(state.threads().iter().filter(|thread| thread.active).count(), 1);
}

#[test]
fn duplicate_artifact_filename_is_replaced() {
    let state = fold(&events(&[
        json!({"type": "workflow_start", "data": {"run_id": "r1", "product_idea": "X"}}),
        json!({"type": "artifact_generated", "data": {"filename": "plan.md", "type": "testing", "agent": "TestLead"}}),
        json!({"type": "artifact_generated", "data": {"filename": "other.md", "type": "testing"}}),
        json!({"type": "artifact_generated", "data": {"filename": "plan.md", "type": "testing", "agent": "Reviewer"}}),
    ]));
    let artifacts = &state.run().artifacts;
    assert_eq!(artifacts.len(), 2);
    let plan = state.run().artifact("plan.md").expect("plan");
    assert_eq!(plan.produced_by.as_deref(), Some("Reviewer"));
    assert_eq!(artifacts[0].filename, "plan.md");
}

#[test]
fn invalid_message_does_not_stop_the_stream() {
    let mut state = WorkflowState::default();
    let messages = [
        "{\"type\": \"agent_start\", \"data\": ",
        r#"{"type":"workflow_start","data":{"run_id":"r7","product_idea":"after garbage"}}"#,
    ];
    for (index, raw) in messages.iter().enumerate() {
        match decode(raw, at(index as u32)) {
            Ok(event) => state = reduce(state, &event),
            Err(err) => state.note(at(index as u32), LogLevel::Warn, format!("Dropped message: {err}")),
        }
    }
    assert_eq!(state.run().run_id.as_deref(), Some("r7"));
    assert_eq!(state.run().status, RunStatus::Running);
    assert_eq!(state.run().product_idea, "after garbage");
    assert!(state
        .log()
        .entries()
        .any(|entry| entry.level == LogLevel::Warn && entry.message.starts_with("Dropped message")));
}

#[test]
fn non_success_completion_marks_run_as_error() {
    let state = fold(&events(&[
        json!({"type": "workflow_start", "data": {"run_id": "r1", "product_idea": "X"}}),
        json!({"type": "workflow_complete", "data": {"status": "stopped"}}),
    ]));
    assert_eq!(state.run().status, RunStatus::Error);
}

#[test]
fn switching_runs_never_leaks_transcripts() {
    let state = fold(&events(&sample_stream()));
    let state = reconcile(
        state,
        RunSnapshot::runs(
            vec![RunSummary {
                id: "r0".to_string(),
                product_idea: "Older".to_string(),
                timestamp: None,
                status: "success".to_string(),
                total_tokens: Some(1000),
                end_time: None,
            }],
            at(10),
        ),
    );
    let state = switch_run(state, "r0", at(11));
    assert!(state.threads().is_empty());
    assert!(state.run().artifacts.is_empty());
    assert_eq!(state.run().status, RunStatus::Complete);

    let state = reconcile(
        state,
        RunSnapshot::artifacts(
            ArtifactListing {
                run_id: "r0".to_string(),
                artifacts: vec![ArtifactRecord {
                    filename: "bugs.md".to_string(),
                    kind: "bugs".to_string(),
                    agent: Some("ManualQA".to_string()),
                    timestamp: Some("08:30:00".to_string()),
                    path: Some("bugs/bugs.md".to_string()),
                }],
            },
            at(12),
        ),
    );
    assert_eq!(state.run().artifacts.len(), 1);
    assert_eq!(state.run().artifacts[0].filename, "bugs.md");
    assert_eq!(state.run().artifacts[0].produced_at, at(12));
}

#[test]
fn end_to_end_example_run() {
    let state = fold(&events(&[
        json!({"type": "workflow_start", "data": {"run_id": "r1", "product_idea": "X"}}),
        json!({"type": "agent_start", "data": {"agent": "ProductManager"}}),
        json!({"type": "thought_chunk", "data": {"agent": "ProductManager", "chunk": "Hello"}}),
        json!({"type": "artifact_generated", "data": {"filename": "spec.md", "agent": "ProductManager"}}),
        json!({"type": "workflow_complete", "data": {"status": "success", "total_tokens": 42}}),
    ]));
    assert_eq!(state.run().status, RunStatus::Complete);
    assert_eq!(state.run().total_tokens, Some(42));
    let names: Vec<_> = state
        .run()
        .artifacts
        .iter()
        .map(|artifact| artifact.filename.as_str())
        .collect();
    assert_eq!(names, vec!["spec.md"]);
    let pm = state.thread("ProductManager").expect("product manager");
    assert_eq!(pm.transcript.as_str(), "Hello");
    assert!(!pm.active);
}
