// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end session tests against scripted model clients and real file
//! tools in a temporary working directory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use asimi_model::{
    Choice, ConfigAuth, ContentResponse, GenerateOptions, Message, ModelClient, ModelError, Part,
    Role, ScriptedMockClient, ToolSchema,
};
use asimi_shell::HostRunner;
use asimi_tools::{builtin_registry, Tool, ToolError, ToolRegistry};

use crate::{Session, SessionEvent, SessionOptions};

// ─── Harness ─────────────────────────────────────────────────────────────────

struct Fixture {
    session: Session,
    client: Arc<ScriptedMockClient>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    _dir: tempfile::TempDir,
}

fn fixture(scripts: Vec<Choice>) -> Fixture {
    fixture_with(scripts, |_| {})
}

/// Build a session over a scripted client with the full builtin tool
/// registry rooted in a fresh temp dir.  `extra` may register more tools.
fn fixture_with(scripts: Vec<Choice>, extra: impl FnOnce(&mut ToolRegistry)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let shell = Arc::new(HostRunner::new(Duration::from_secs(5)));
    let mut registry = builtin_registry(dir.path().to_path_buf(), shell);
    extra(&mut registry);

    let client = Arc::new(ScriptedMockClient::new(scripts));
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new(
        SessionOptions {
            working_dir: dir.path().to_path_buf(),
            max_turns: 20,
            ..SessionOptions::default()
        },
        client.clone(),
        Arc::new(ConfigAuth::default()),
        Arc::new(registry),
        tx,
    );
    Fixture { session, client, events: rx, _dir: dir }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

fn roles(session: &Session) -> Vec<Role> {
    session.messages.iter().map(|m| m.role).collect()
}

/// A tool that blocks long enough for cancellation to land first.
struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "sleeps"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn call(&self, _args: serde_json::Value) -> Result<String, ToolError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("done".into())
    }
}

/// A client that always fails, for error-path tests.
struct FailingClient;

#[async_trait]
impl ModelClient for FailingClient {
    fn provider(&self) -> &str {
        "mock"
    }
    fn model(&self) -> &str {
        "failing"
    }
    async fn generate_content(
        &self,
        _messages: &[Message],
        _tools: &[ToolSchema],
        _options: &GenerateOptions,
    ) -> Result<ContentResponse, ModelError> {
        Err(ModelError::Api { status: 500, body: "backend down".into() })
    }
}

// ─── Scenario 1: single turn, no tools ───────────────────────────────────────

#[tokio::test]
async fn single_turn_without_tools() {
    let mut f = fixture(vec![ScriptedMockClient::text("Hello")]);
    let answer = f.session.ask("hi").await.unwrap();
    assert_eq!(answer, "Hello");
    // System, Human, AI: the identical repeat turn short-circuits before
    // appending a second AI message.
    assert_eq!(roles(&f.session), vec![Role::System, Role::Human, Role::Ai]);
    assert_eq!(f.client.call_count(), 2);
}

#[tokio::test]
async fn first_message_is_always_system() {
    let f = fixture(vec![]);
    assert_eq!(f.session.messages[0].role, Role::System);
    assert!(f.session.messages[0].text().contains("# Environment"));
}

// ─── Scenario 2: single tool call ────────────────────────────────────────────

#[tokio::test]
async fn single_tool_call_round_trip() {
    let mut f = fixture(vec![
        ScriptedMockClient::tool_call("t1", "read_file", r#"{"path":"test.txt"}"#),
        ScriptedMockClient::text("FILE:hello file"),
    ]);
    std::fs::write(f.session.working_dir.join("test.txt"), "hello file").unwrap();

    let answer = f.session.ask("read it").await.unwrap();
    assert!(answer.contains("hello file"));

    assert_eq!(
        roles(&f.session),
        vec![Role::System, Role::Human, Role::Ai, Role::Tool, Role::Ai]
    );
    let ai_with_call = &f.session.messages[2];
    assert_eq!(ai_with_call.tool_calls()[0].id, "t1");
    let tool_msg = &f.session.messages[3];
    assert_eq!(tool_msg.response_id(), Some("t1"));
    match &tool_msg.parts[0] {
        Part::ToolCallResponse { content, .. } => assert!(content.contains("hello file")),
        other => panic!("expected response part, got {other:?}"),
    }
}

// ─── Scenario 3: two parallel tools in one response ──────────────────────────

#[tokio::test]
async fn parallel_tools_in_one_response() {
    let mut f = fixture(vec![
        ScriptedMockClient::tool_calls(vec![
            ("t1".into(), "read_file".into(), r#"{"path":"a.txt"}"#.into()),
            ("t2".into(), "read_file".into(), r#"{"path":"b.txt"}"#.into()),
        ]),
        ScriptedMockClient::text("FILES:alpha|beta"),
    ]);
    std::fs::write(f.session.working_dir.join("a.txt"), "alpha").unwrap();
    std::fs::write(f.session.working_dir.join("b.txt"), "beta").unwrap();

    let answer = f.session.ask("read both").await.unwrap();
    assert_eq!(answer, "FILES:alpha|beta");

    let tool_msgs: Vec<&Message> =
        f.session.messages.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(tool_msgs.len(), 2, "exactly two tool messages");
    assert_eq!(tool_msgs[0].parts.len(), 1, "one response part per tool message");
    assert_eq!(tool_msgs[1].parts.len(), 1);
    assert_eq!(tool_msgs[0].response_id(), Some("t1"));
    assert_eq!(tool_msgs[1].response_id(), Some("t2"));
}

// ─── Scenario 4: cancellation mid-tool ───────────────────────────────────────

#[tokio::test]
async fn cancellation_mid_tool_synthesizes_abort_response() {
    let mut f = fixture_with(
        vec![ScriptedMockClient::tool_call("t1", "slow", "{}")],
        |reg| reg.register(SlowTool),
    );

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    f.session.ask_stream("run the slow tool", token).await.unwrap();

    let tool_msgs: Vec<&Message> =
        f.session.messages.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(tool_msgs.len(), 1);
    match &tool_msgs[0].parts[0] {
        Part::ToolCallResponse { id, content, .. } => {
            assert_eq!(id, "t1");
            assert_eq!(content, "error: session aborted by user");
        }
        other => panic!("expected response part, got {other:?}"),
    }

    // No dangling ToolCall: every call id has a matching response.
    for m in f.session.messages.iter().filter(|m| m.role == Role::Ai) {
        for call in m.tool_calls() {
            assert!(
                f.session
                    .messages
                    .iter()
                    .any(|t| t.response_id() == Some(call.id.as_str())),
                "dangling tool call {}",
                call.id
            );
        }
    }

    let events = drain(&mut f.events);
    let interrupted = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::StreamInterrupted { .. }))
        .count();
    assert_eq!(interrupted, 1, "exactly one StreamInterrupted event");
    let terminal = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminal, 1, "exactly one terminal event");
}

#[tokio::test]
async fn cancellation_before_first_chunk_adds_no_ai_message() {
    let mut f = fixture(vec![ScriptedMockClient::text("never seen")]);
    let token = CancellationToken::new();
    token.cancel();

    f.session.ask_stream("hi", token).await.unwrap();

    // The cancelled model call produced nothing: no AI message at all.
    assert_eq!(roles(&f.session), vec![Role::System, Role::Human]);
    let events = drain(&mut f.events);
    assert!(events.iter().any(
        |e| matches!(e, SessionEvent::StreamInterrupted { partial } if partial.is_empty())
    ));
}

// ─── Scenario 5: tool-call loop detection ────────────────────────────────────

#[tokio::test]
async fn identical_tool_calls_trip_the_loop_breaker() {
    let args = r#"{"path":"loop.txt"}"#;
    let mut f = fixture(vec![
        ScriptedMockClient::tool_call("t1", "read_file", args),
        ScriptedMockClient::tool_call("t2", "read_file", args),
        ScriptedMockClient::tool_call("t3", "read_file", args),
        ScriptedMockClient::text("should never be requested"),
    ]);
    std::fs::write(f.session.working_dir.join("loop.txt"), "content").unwrap();

    f.session.ask("loop forever").await.unwrap();

    assert_eq!(f.client.call_count(), 3, "no 4th model call after the loop breaker");
    let last_tool = f
        .session
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    match &last_tool.parts[0] {
        Part::ToolCallResponse { content, .. } => {
            assert!(content.contains("tool call loop detected"), "{content}");
        }
        other => panic!("expected response part, got {other:?}"),
    }
}

#[tokio::test]
async fn different_tool_calls_do_not_trip_the_breaker() {
    let mut f = fixture(vec![
        ScriptedMockClient::tool_call("t1", "read_file", r#"{"path":"a.txt"}"#),
        ScriptedMockClient::tool_call("t2", "read_file", r#"{"path":"b.txt"}"#),
        ScriptedMockClient::text("done"),
    ]);
    std::fs::write(f.session.working_dir.join("a.txt"), "a").unwrap();
    std::fs::write(f.session.working_dir.join("b.txt"), "b").unwrap();

    let answer = f.session.ask("read files").await.unwrap();
    assert_eq!(answer, "done");
    assert!(f.client.call_count() >= 3);
}

// ─── Unknown tools ───────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_tool_gets_error_response_and_loop_continues() {
    let mut f = fixture(vec![
        ScriptedMockClient::tool_call("t1", "frobnicate", "{}"),
        ScriptedMockClient::text("recovered"),
    ]);
    let answer = f.session.ask("use a bad tool").await.unwrap();
    assert_eq!(answer, "recovered");

    let tool_msg = f.session.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    match &tool_msg.parts[0] {
        Part::ToolCallResponse { content, .. } => {
            assert_eq!(content, "error: unknown tool \"frobnicate\"");
        }
        other => panic!("expected response part, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_tool_arguments_get_error_response() {
    let mut f = fixture(vec![
        ScriptedMockClient::tool_call("t1", "read_file", "not valid json"),
        ScriptedMockClient::text("ok"),
    ]);
    f.session.ask("go").await.unwrap();
    let tool_msg = f.session.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    match &tool_msg.parts[0] {
        Part::ToolCallResponse { content, .. } => {
            assert!(content.starts_with("Error: invalid tool arguments"), "{content}");
        }
        other => panic!("expected response part, got {other:?}"),
    }
}

// ─── Scenario 6: rollback and resubmit ───────────────────────────────────────

#[tokio::test]
async fn rollback_truncates_and_resubmit_regrows() {
    // Doubled scripts: each ask ends on the identical repeat of its answer.
    let mut f = fixture(vec![
        ScriptedMockClient::text("one"),
        ScriptedMockClient::text("one"),
        ScriptedMockClient::text("two"),
        ScriptedMockClient::text("two"),
        ScriptedMockClient::text("three"),
        ScriptedMockClient::text("three"),
    ]);
    f.session.ask("first").await.unwrap();
    let snapshot = f.session.get_message_snapshot();
    f.session.ask("second").await.unwrap();
    f.session.ask("third").await.unwrap();
    let full_len = f.session.messages.len();
    assert!(full_len > snapshot);

    f.session.rollback_to(snapshot);
    assert_eq!(f.session.messages.len(), snapshot);
    assert_eq!(f.session.messages[0].role, Role::System);
    assert_eq!(f.session.loop_detector.count(), 0);

    // Rollback to the current length is a no-op.
    f.session.rollback_to(f.session.get_message_snapshot());
    assert_eq!(f.session.messages.len(), snapshot);

    f.session.ask("again").await.unwrap();
    let regrown = f.session.messages.len();
    assert!(regrown > snapshot);
    assert!(regrown < full_len + 2);
}

#[tokio::test]
async fn rollback_clamps_and_preserves_system_message() {
    let mut f = fixture(vec![ScriptedMockClient::text("hi")]);
    f.session.ask("x").await.unwrap();
    f.session.rollback_to(0);
    assert_eq!(f.session.messages.len(), 1);
    assert_eq!(f.session.messages[0].role, Role::System);
    f.session.rollback_to(999);
    assert_eq!(f.session.messages.len(), 1);
}

// ─── Streaming events ────────────────────────────────────────────────────────

#[tokio::test]
async fn ask_stream_emits_start_chunks_and_complete() {
    let mut f = fixture(vec![ScriptedMockClient::text("streamed answer")]);
    f.session
        .ask_stream("hi", CancellationToken::new())
        .await
        .unwrap();

    let events = drain(&mut f.events);
    assert!(matches!(events[0], SessionEvent::StreamStart));
    let chunks: String = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StreamChunk(c) => Some(c.as_str()),
            _ => None,
        })
        .collect();
    assert!(chunks.contains("streamed answer"));
    assert!(matches!(events.last().unwrap(), SessionEvent::StreamComplete));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn ask_stream_surfaces_model_error_as_stream_error() {
    let dir = tempfile::tempdir().unwrap();
    let shell = Arc::new(HostRunner::new(Duration::from_secs(5)));
    let registry = builtin_registry(dir.path().to_path_buf(), shell);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = Session::new(
        SessionOptions {
            working_dir: dir.path().to_path_buf(),
            ..SessionOptions::default()
        },
        Arc::new(FailingClient),
        Arc::new(ConfigAuth::default()),
        Arc::new(registry),
        tx,
    );

    let result = session.ask_stream("hi", CancellationToken::new()).await;
    assert!(result.is_err());
    let events = drain(&mut rx);
    assert_eq!(
        events.iter().filter(|e| e.is_terminal()).count(),
        1,
        "exactly one terminal event on error"
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::StreamError { error } if error.contains("backend down"))));
}

// ─── Max tokens ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn max_tokens_stop_ends_the_turn_with_notification() {
    let mut f = fixture(vec![ScriptedMockClient::max_tokens("truncated answ")]);
    let answer = f.session.ask("long question").await.unwrap();
    assert_eq!(answer, "truncated answ");
    assert_eq!(f.client.call_count(), 1, "max_tokens ends the loop immediately");

    let events = drain(&mut f.events);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::StreamMaxTokensReached { content } if content == "truncated answ"
    )));
}

// ─── Max turns ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn turn_cap_emits_max_turns_event() {
    // Every response carries a tool call with fresh arguments, so neither
    // the identical-turn rule nor the loop breaker ever fires.
    let dir = tempfile::tempdir().unwrap();
    let scripts: Vec<Choice> = (0..10)
        .map(|i| {
            ScriptedMockClient::tool_call(
                format!("t{i}"),
                "list_files",
                if i % 2 == 0 { "{}" } else { r#"{"path":"."}"# },
            )
        })
        .collect();
    let shell = Arc::new(HostRunner::new(Duration::from_secs(5)));
    let registry = builtin_registry(dir.path().to_path_buf(), shell);
    let client = Arc::new(ScriptedMockClient::new(scripts));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = Session::new(
        SessionOptions {
            working_dir: dir.path().to_path_buf(),
            max_turns: 4,
            ..SessionOptions::default()
        },
        client.clone(),
        Arc::new(ConfigAuth::default()),
        Arc::new(registry),
        tx,
    );

    session.ask("loop").await.unwrap();
    assert_eq!(client.call_count(), 4);
    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::StreamMaxTurnsExceeded { max: 4 })));
}

// ─── Context attachments ─────────────────────────────────────────────────────

#[tokio::test]
async fn attachments_prefix_the_prompt_and_clear() {
    let mut f = fixture(vec![ScriptedMockClient::text("noted")]);
    f.session.add_context_attachment("notes.md", "remember the plan");
    f.session.ask("continue").await.unwrap();

    let human = &f.session.messages[1];
    let text = human.text();
    assert!(text.contains("--- Context from: notes.md ---"));
    assert!(text.contains("remember the plan"));
    assert!(text.contains("--- End ---"));
    assert!(text.ends_with("continue"));

    // Cleared after use: the next prompt carries no attachment prefix.
    f.session.ask("next").await.unwrap();
    let human2 = f
        .session
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Human)
        .unwrap();
    assert!(!human2.text().contains("Context from"));
}

// ─── Compaction ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn compact_history_replaces_conversation_with_summary() {
    let mut f = fixture(vec![
        // The doubled answer lets the identical-turn rule end the ask before
        // the compaction script is consumed.
        ScriptedMockClient::text("answer 1"),
        ScriptedMockClient::text("answer 1"),
        ScriptedMockClient::text("a compact summary"),
    ]);
    f.session.ask("question 1").await.unwrap();
    let summary = f
        .session
        .compact_history("Summarise this conversation.")
        .await
        .unwrap();
    assert_eq!(summary, "a compact summary");

    assert_eq!(roles(&f.session), vec![Role::System, Role::Human, Role::Ai]);
    assert!(f.session.messages[1]
        .text()
        .starts_with("Previous conversation summary:\n\na compact summary"));
    assert!(f.session.messages[2].text().starts_with("I understand"));
    assert_eq!(f.session.loop_detector.count(), 0);

    let events = drain(&mut f.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::ContextCompacted { .. })));
}

#[tokio::test]
async fn compact_history_restores_on_model_error() {
    let dir = tempfile::tempdir().unwrap();
    let shell = Arc::new(HostRunner::new(Duration::from_secs(5)));
    let registry = builtin_registry(dir.path().to_path_buf(), shell);
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut session = Session::new(
        SessionOptions {
            working_dir: dir.path().to_path_buf(),
            ..SessionOptions::default()
        },
        Arc::new(FailingClient),
        Arc::new(ConfigAuth::default()),
        Arc::new(registry),
        tx,
    );
    session.push(Message::human("important question"));
    session.push(Message::ai("important answer"));
    let before = session.messages.clone();

    let result = session.compact_history("Summarise.").await;
    assert!(result.is_err());
    assert_eq!(session.messages, before, "history must be restored on error");
}

#[tokio::test]
async fn autocompact_fires_when_context_is_nearly_full() {
    let mut f = fixture(vec![
        // First script serves the compaction call, the rest the prompt.
        ScriptedMockClient::text("the summary"),
        ScriptedMockClient::text("fresh answer"),
    ]);
    // Fill the window: mock-model has a 128k window, the buffer holds 45k,
    // so ~120k used tokens pushes free below the 10% trigger.
    let big = "x".repeat(480_000);
    f.session.push(Message::human(big));
    f.session.push(Message::ai("ack"));

    let answer = f.session.ask("what now?").await.unwrap();
    assert_eq!(answer, "fresh answer");
    assert!(
        f.session
            .messages
            .iter()
            .any(|m| m.text().contains("Previous conversation summary")),
        "history must contain the compaction summary"
    );
    let events = drain(&mut f.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::ContextCompacted { .. })));
}

#[tokio::test]
async fn autocompact_skips_small_sessions() {
    let mut f = fixture(vec![ScriptedMockClient::text("plain answer")]);
    let answer = f.session.ask("hi").await.unwrap();
    assert_eq!(answer, "plain answer");
    let events = drain(&mut f.events);
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::ContextCompacted { .. })));
}

// ─── Sanitization on entry ───────────────────────────────────────────────────

#[tokio::test]
async fn malformed_tail_is_repaired_before_the_next_prompt() {
    let mut f = fixture(vec![ScriptedMockClient::text("recovered")]);
    // Simulate a crash that left a dangling tool call in the history.
    f.session.push(Message::human("earlier question"));
    f.session.push(Message::ai_with_calls(
        "",
        vec![asimi_model::ToolCallRequest {
            id: "dangling".into(),
            name: "read_file".into(),
            arguments: "{}".into(),
        }],
    ));

    f.session.ask("new question").await.unwrap();

    for m in f.session.messages.iter().filter(|m| m.role == Role::Ai) {
        assert!(
            m.tool_calls().is_empty()
                || m.tool_calls().iter().all(|c| {
                    f.session
                        .messages
                        .iter()
                        .any(|t| t.response_id() == Some(c.id.as_str()))
                }),
            "sanitization must leave no dangling calls"
        );
    }
}

// ─── Snapshot persistence shape ──────────────────────────────────────────────

#[tokio::test]
async fn snapshot_round_trips_through_json() {
    let mut f = fixture(vec![ScriptedMockClient::text("hello")]);
    f.session.ask("hi").await.unwrap();

    let snap = f.session.snapshot();
    let json = serde_json::to_string(&snap).unwrap();
    let back: crate::SessionSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back, snap);
    // Re-serialization is byte-stable.
    assert_eq!(serde_json::to_string(&back).unwrap(), json);
}

#[tokio::test]
async fn load_snapshot_restores_identity_and_history() {
    let mut f = fixture(vec![ScriptedMockClient::text("hello")]);
    f.session.ask("hi").await.unwrap();
    let snap = f.session.snapshot();

    let mut g = fixture(vec![]);
    g.session.load_snapshot(snap.clone());
    assert_eq!(g.session.id, snap.id);
    assert_eq!(g.session.messages.len(), snap.messages.len());
    assert_eq!(g.session.snapshot(), snap);
}

#[tokio::test]
async fn session_ids_are_unique_and_timestamped() {
    let f1 = fixture(vec![]);
    let f2 = fixture(vec![]);
    assert_ne!(f1.session.id, f2.session.id);
    // "YYYYMMDD-HHMMSS-xxxxxxxx"
    let parts: Vec<&str> = f1.session.id.split('-').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0].len(), 8);
    assert_eq!(parts[1].len(), 6);
    assert_eq!(parts[2].len(), 8);
}
