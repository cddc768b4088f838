//! Task router: step ordering, failure handling, threading and stale-result
//! rejection.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rmcp::ServiceExt;
use serde_json::Value;
use specter::intent::{parse_iso_datetime, ActionDecision, IntentEngine, SummaryReply};
use specter::mcp::{GatewayError, McpSession, SessionFactory, ToolSession};
use specter::router::{
    run_task, TaskKind, TaskOutcome, TaskRequest, TaskResult, TaskRouter, TaskState,
};
use specter::services::calendar::Calendar;
use specter::services::contacts::{ContactResolver, FileContactStore};
use specter::services::mailbox::Mailbox;
use specter::services::ToolServer;

// ---------------------------------------------------------------------------
// Engine double
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockEngine {
    target: Option<String>,
    /// Commands containing this word take `delay` to decide.
    slow_word: Option<(&'static str, Duration)>,
    seen: Mutex<Vec<String>>,
}

impl MockEngine {
    fn targeting(name: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            target: name.map(str::to_string),
            ..Default::default()
        })
    }
}

#[async_trait]
impl IntentEngine for MockEngine {
    async fn summarize_and_reply(&self, email: &str) -> SummaryReply {
        self.seen.lock().unwrap().push(email.to_string());
        SummaryReply {
            summary: "Asks to meet".into(),
            draft_reply: "Works for me.".into(),
            detected_date: parse_iso_datetime("2026-01-05T10:00:00"),
            meeting_title: "Meeting: Engin".into(),
        }
    }

    async fn decide_action(&self, command: &str) -> ActionDecision {
        self.seen.lock().unwrap().push(command.to_string());
        if let Some((word, delay)) = self.slow_word {
            if command.contains(word) {
                tokio::time::sleep(delay).await;
            }
        }
        ActionDecision {
            target_name: self.target.clone(),
            draft_text: format!("draft for: {command}"),
            extracted_date: parse_iso_datetime("2026-01-05T10:00:00"),
            meeting_title: "Meeting".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session doubles
// ---------------------------------------------------------------------------

/// Real tool server, in-process, one pipe per session.
struct InProcessFactory {
    dir: PathBuf,
}

#[async_trait]
impl SessionFactory for InProcessFactory {
    async fn open(&self) -> Result<Box<dyn ToolSession>, GatewayError> {
        let d = &self.dir;
        let server = ToolServer::new(
            ContactResolver::new(Arc::new(FileContactStore::new(d.join("contacts.json")))),
            Mailbox::new(d.join("inbox.jsonl"), d.join("outbox.jsonl")),
            Calendar::new(d.join("calendar.jsonl"), chrono_tz::UTC),
        );
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            if let Ok(running) = server.serve(tokio::io::split(server_io)).await {
                let _ = running.waiting().await;
            }
        });
        let service = ()
            .serve(tokio::io::split(client_io))
            .await
            .map_err(|e| GatewayError::Handshake(e.to_string()))?;
        Ok(Box::new(McpSession::new(service)))
    }
}

fn seeded_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("contacts.json"),
        r#"[["Name","Email"],["Engin Vardar","engin@x.com"],["Ayşe Kaya","ayse@x.com"]]"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("inbox.jsonl"),
        r#"{"from":"Engin Vardar <engin@x.com>","subject":"Sync","snippet":"Tomorrow 10?"}"#,
    )
    .unwrap();
    dir
}

fn in_process(dir: &Path) -> Arc<InProcessFactory> {
    Arc::new(InProcessFactory {
        dir: dir.to_path_buf(),
    })
}

#[derive(Clone, Copy, PartialEq)]
enum Fault {
    None,
    Open,
    Call,
    Close,
}

/// Session that records calls and fails where told to.
struct ScriptedFactory {
    fault: Fault,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    closes: Arc<Mutex<usize>>,
}

impl ScriptedFactory {
    fn new(fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            fault,
            calls: Arc::default(),
            closes: Arc::default(),
        })
    }
}

struct ScriptedSession {
    fault: Fault,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    closes: Arc<Mutex<usize>>,
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self) -> Result<Box<dyn ToolSession>, GatewayError> {
        if self.fault == Fault::Open {
            return Err(GatewayError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such program",
            )));
        }
        Ok(Box::new(ScriptedSession {
            fault: self.fault,
            calls: Arc::clone(&self.calls),
            closes: Arc::clone(&self.closes),
        }))
    }
}

#[async_trait]
impl ToolSession for ScriptedSession {
    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String, GatewayError> {
        self.calls.lock().unwrap().push((name.to_string(), arguments));
        if self.fault == Fault::Call {
            return Err(GatewayError::Closed("tool process exited".into()));
        }
        Ok(match name {
            "fetch_latest_email" => "inbox empty".to_string(),
            "resolve_contact_by_name" => "not found".to_string(),
            "send_email" => "Mail sent!".to_string(),
            _ => "Added to calendar: 10:00".to_string(),
        })
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        *self.closes.lock().unwrap() += 1;
        if self.fault == Fault::Close {
            return Err(GatewayError::Closed("tool process exited with 1".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// run_task
// ---------------------------------------------------------------------------

#[tokio::test]
async fn analyze_extracts_sender_and_summarizes_raw_mail() {
    let dir = seeded_dir();
    let engine = MockEngine::targeting(None);
    let sessions = in_process(dir.path());
    let result = run_task(
        &*engine,
        &*sessions,
        TaskRequest::AnalyzeLastMail,
        None,
    )
    .await;
    match result {
        TaskResult::Success {
            raw_mail,
            sender,
            reply,
        } => {
            assert_eq!(sender.as_deref(), Some("engin@x.com"));
            assert!(raw_mail.contains("Content: Tomorrow 10?"));
            assert_eq!(reply.draft_reply, "Works for me.");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(engine.seen.lock().unwrap()[0].starts_with("From: Engin Vardar"));
}

#[tokio::test]
async fn analyze_with_empty_inbox_still_succeeds() {
    let engine = MockEngine::targeting(None);
    let sessions = ScriptedFactory::new(Fault::None);
    let result = run_task(&*engine, &*sessions, TaskRequest::AnalyzeLastMail, None).await;
    let TaskResult::Success { sender, raw_mail, .. } = result else {
        panic!("expected success");
    };
    assert_eq!(raw_mail, "inbox empty");
    assert_eq!(sender, None);
}

#[tokio::test]
async fn resolved_contact_is_merged() {
    let dir = seeded_dir();
    let engine = MockEngine::targeting(Some("Ayşe"));
    let sessions = in_process(dir.path());
    let result = run_task(
        &*engine,
        &*sessions,
        TaskRequest::ProcessCommand {
            command: "Tomorrow 10am meeting with Ayşe".into(),
        },
        None,
    )
    .await;
    let TaskResult::CommandProcessed { found_email, decision } = result else {
        panic!("expected command_processed");
    };
    assert_eq!(found_email.as_deref(), Some("ayse@x.com"));
    assert_eq!(decision.target_name.as_deref(), Some("Ayşe"));
}

#[tokio::test]
async fn unmatched_contact_is_not_an_error() {
    let dir = seeded_dir();
    let engine = MockEngine::targeting(Some("xyzzyzzz"));
    let sessions = in_process(dir.path());
    let result = run_task(
        &*engine,
        &*sessions,
        TaskRequest::ProcessCommand {
            command: "mail xyzzyzzz".into(),
        },
        None,
    )
    .await;
    let v = serde_json::to_value(&result).unwrap();
    assert_eq!(v["status"], "command_processed");
    assert!(v["found_email"].is_null());
}

#[tokio::test]
async fn no_target_means_no_lookup() {
    let sessions = ScriptedFactory::new(Fault::None);
    let engine = MockEngine::targeting(None);
    let result = run_task(
        &*engine,
        &*sessions,
        TaskRequest::ProcessCommand {
            command: "remind me".into(),
        },
        None,
    )
    .await;
    assert!(matches!(result, TaskResult::CommandProcessed { found_email: None, .. }));
    assert!(sessions.calls.lock().unwrap().is_empty());
    assert_eq!(*sessions.closes.lock().unwrap(), 1);
}

#[tokio::test]
async fn send_transport_failure_is_one_error() {
    let sessions = ScriptedFactory::new(Fault::Call);
    let engine = MockEngine::targeting(None);
    let result = run_task(
        &*engine,
        &*sessions,
        TaskRequest::SendReply {
            to: "engin@x.com".into(),
            subject: "Re: Sync".into(),
            content: "ok".into(),
        },
        None,
    )
    .await;
    let TaskResult::Error { msg } = result else {
        panic!("expected error");
    };
    assert!(!msg.is_empty());
    assert!(msg.contains("tool process exited"));
    // the session is still released
    assert_eq!(*sessions.closes.lock().unwrap(), 1);
    assert_eq!(sessions.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn open_failure_is_an_error() {
    let engine = MockEngine::targeting(None);
    let sessions = ScriptedFactory::new(Fault::Open);
    let result = run_task(
        &*engine,
        &*sessions,
        TaskRequest::AnalyzeLastMail,
        None,
    )
    .await;
    assert!(result.is_error());
}

#[tokio::test]
async fn close_failure_after_success_is_an_error() {
    let engine = MockEngine::targeting(None);
    let sessions = ScriptedFactory::new(Fault::Close);
    let result = run_task(
        &*engine,
        &*sessions,
        TaskRequest::AddCalendar {
            summary: "x".into(),
            iso_datetime: "2026-01-05T10:00:00".into(),
        },
        None,
    )
    .await;
    assert!(result.is_error());
}

#[tokio::test]
async fn hung_task_times_out() {
    let engine = Arc::new(MockEngine {
        slow_word: Some(("hang", Duration::from_secs(30))),
        ..Default::default()
    });
    let sessions = ScriptedFactory::new(Fault::None);
    let result = run_task(
        &*engine,
        &*sessions,
        TaskRequest::ProcessCommand {
            command: "hang".into(),
        },
        Some(Duration::from_millis(50)),
    )
    .await;
    let TaskResult::Error { msg } = result else {
        panic!("expected error");
    };
    assert!(msg.contains("timed out"), "{msg}");
}

// ---------------------------------------------------------------------------
// TaskRouter
// ---------------------------------------------------------------------------

async fn next(rx: &mut tokio::sync::mpsc::UnboundedReceiver<TaskOutcome>) -> TaskOutcome {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("task did not report in time")
        .expect("router channel closed")
}

#[tokio::test]
async fn duplicate_schedule_requests_both_confirm() {
    let dir = seeded_dir();
    let (router, mut rx) = TaskRouter::new(
        MockEngine::targeting(None),
        in_process(dir.path()),
        None,
    );
    let req = TaskRequest::AddCalendar {
        summary: "Meeting: Engin".into(),
        iso_datetime: "2026-01-05T10:00:00".into(),
    };
    let a = router.dispatch(req.clone());
    let b = router.dispatch(req);
    assert!(b.id > a.id);

    for _ in 0..2 {
        let outcome = next(&mut rx).await;
        assert_eq!(outcome.kind, TaskKind::AddCalendar);
        assert_eq!(outcome.state, TaskState::Completed);
        assert_eq!(
            outcome.result,
            TaskResult::CalendarAdded {
                msg: "Added to calendar: 10:00".into()
            }
        );
    }
    let events = std::fs::read_to_string(dir.path().join("calendar.jsonl")).unwrap();
    assert_eq!(events.lines().count(), 2);
}

#[tokio::test]
async fn failing_task_reports_exactly_once() {
    let (router, mut rx) = TaskRouter::new(
        MockEngine::targeting(None),
        ScriptedFactory::new(Fault::Call),
        None,
    );
    let ticket = router.dispatch(TaskRequest::SendReply {
        to: "engin@x.com".into(),
        subject: "s".into(),
        content: "c".into(),
    });
    let outcome = next(&mut rx).await;
    assert_eq!(outcome.id, ticket.id);
    assert_eq!(outcome.state, TaskState::Failed);
    assert!(outcome.result.is_error());

    let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(extra.is_err(), "a second outcome was reported");
}

#[tokio::test]
async fn late_result_of_superseded_task_is_stale() {
    let engine = Arc::new(MockEngine {
        slow_word: Some(("slow", Duration::from_millis(300))),
        ..Default::default()
    });
    let (router, mut rx) = TaskRouter::new(engine, ScriptedFactory::new(Fault::None), None);

    let first = router.dispatch(TaskRequest::ProcessCommand {
        command: "slow one".into(),
    });
    let second = router.dispatch(TaskRequest::ProcessCommand {
        command: "fast one".into(),
    });

    let early = next(&mut rx).await;
    assert_eq!(early.id, second.id);
    assert!(router.is_current(&early));

    let late = next(&mut rx).await;
    assert_eq!(late.id, first.id);
    assert!(!router.is_current(&late), "older draft must be rejected");
}

#[tokio::test]
async fn lanes_do_not_supersede_each_other() {
    let (router, mut rx) = TaskRouter::new(
        MockEngine::targeting(None),
        ScriptedFactory::new(Fault::None),
        None,
    );
    router.dispatch(TaskRequest::ProcessCommand {
        command: "draft".into(),
    });
    router.dispatch(TaskRequest::AddCalendar {
        summary: "x".into(),
        iso_datetime: "2026-01-05T10:00:00".into(),
    });
    for _ in 0..2 {
        let outcome = next(&mut rx).await;
        assert!(router.is_current(&outcome), "{:?} was rejected", outcome.kind);
    }
}
