//! Task router.
//!
//! One [`TaskRequest`] becomes exactly one [`TaskResult`]. Each task opens
//! its own tool session, runs its steps in order (intent engine and/or
//! tool calls), closes the session and reports. Failures anywhere turn
//! into a single `error` result; nothing escapes as a panic or `Err`.
//!
//! [`TaskRouter::dispatch`] runs every task on a dedicated OS thread with
//! its own single-threaded runtime, so the caller never blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::intent::{ActionDecision, IntentEngine, SummaryReply};
use crate::mcp::{GatewayError, SessionFactory, ToolGateway};

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// A unit of work handed to the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task_kind", content = "payload", rename_all = "snake_case")]
pub enum TaskRequest {
    AnalyzeLastMail,
    ProcessCommand {
        command: String,
    },
    SendReply {
        to: String,
        subject: String,
        content: String,
    },
    AddCalendar {
        summary: String,
        iso_datetime: String,
    },
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::AnalyzeLastMail => TaskKind::AnalyzeLastMail,
            TaskRequest::ProcessCommand { .. } => TaskKind::ProcessCommand,
            TaskRequest::SendReply { .. } => TaskKind::SendReply,
            TaskRequest::AddCalendar { .. } => TaskKind::AddCalendar,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    AnalyzeLastMail,
    ProcessCommand,
    SendReply,
    AddCalendar,
}

impl TaskKind {
    pub fn lane(self) -> Lane {
        match self {
            TaskKind::AnalyzeLastMail | TaskKind::ProcessCommand => Lane::Draft,
            TaskKind::SendReply | TaskKind::AddCalendar => Lane::Action,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::AnalyzeLastMail => "analyze_last_mail",
            TaskKind::ProcessCommand => "process_command",
            TaskKind::SendReply => "send_reply",
            TaskKind::AddCalendar => "add_calendar",
        }
    }
}

/// Tasks in the same lane write the same piece of interactive state, so
/// only the newest one's result is worth showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Analysis and command tasks (fill the draft).
    Draft,
    /// Send and schedule tasks (consume the draft).
    Action,
}

/// Terminal record of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    Success {
        raw_mail: String,
        sender: Option<String>,
        #[serde(flatten)]
        reply: SummaryReply,
    },
    CommandProcessed {
        found_email: Option<String>,
        #[serde(flatten)]
        decision: ActionDecision,
    },
    Sent {
        msg: String,
    },
    CalendarAdded {
        msg: String,
    },
    Error {
        msg: String,
    },
}

impl TaskResult {
    pub fn error(err: impl std::fmt::Display) -> Self {
        TaskResult::Error {
            msg: err.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TaskResult::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Why a task failed.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("task timed out after {0:?}")]
    TimedOut(Duration),
    #[error("task runtime failure: {0}")]
    Runtime(String),
}

// ---------------------------------------------------------------------------
// Task execution
// ---------------------------------------------------------------------------

fn sender_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"SenderEmail: ([\w.-]+@[\w.-]+)").expect("valid sender regex"))
}

/// Sender address from a rendered mail, if it has a `SenderEmail:` line.
pub fn extract_sender(raw_mail: &str) -> Option<String> {
    sender_pattern()
        .captures(raw_mail)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Run one task to completion on the current runtime.
///
/// Never fails: every error path yields `TaskResult::Error`.
pub async fn run_task(
    engine: &dyn IntentEngine,
    sessions: &dyn SessionFactory,
    request: TaskRequest,
    timeout: Option<Duration>,
) -> TaskResult {
    let kind = request.kind();
    let work = execute(engine, sessions, request);
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(r) => r,
            Err(_) => Err(TaskError::TimedOut(limit)),
        },
        None => work.await,
    };
    match outcome {
        Ok(result) => result,
        Err(e) => {
            warn!(task = kind.as_str(), error = %e, "task failed");
            TaskResult::error(e)
        }
    }
}

/// Open a session, run the steps, always close.
async fn execute(
    engine: &dyn IntentEngine,
    sessions: &dyn SessionFactory,
    request: TaskRequest,
) -> Result<TaskResult, TaskError> {
    let mut gateway = ToolGateway::open(sessions).await?;
    let outcome = steps(engine, &mut gateway, request).await;
    let closed = gateway.close().await;
    let result = outcome?;
    closed?;
    Ok(result)
}

async fn steps(
    engine: &dyn IntentEngine,
    gateway: &mut ToolGateway,
    request: TaskRequest,
) -> Result<TaskResult, TaskError> {
    match request {
        TaskRequest::AnalyzeLastMail => {
            let raw_mail = gateway.fetch_latest_email().await?;
            let sender = extract_sender(&raw_mail);
            let reply = engine.summarize_and_reply(&raw_mail).await;
            Ok(TaskResult::Success {
                raw_mail,
                sender,
                reply,
            })
        }
        TaskRequest::ProcessCommand { command } => {
            let decision = engine.decide_action(&command).await;
            let mut found_email = None;
            if let Some(name) = decision.target_name.as_deref() {
                let answer = gateway.resolve_contact_by_name(name).await?;
                if answer.contains('@') {
                    found_email = Some(answer.trim().to_string());
                } else {
                    debug!(name, answer = %answer, "contact not resolved");
                }
            }
            Ok(TaskResult::CommandProcessed {
                found_email,
                decision,
            })
        }
        TaskRequest::SendReply {
            to,
            subject,
            content,
        } => {
            let msg = gateway.send_email(&to, &subject, &content).await?;
            Ok(TaskResult::Sent { msg })
        }
        TaskRequest::AddCalendar {
            summary,
            iso_datetime,
        } => {
            let msg = gateway.schedule_meeting(&summary, &iso_datetime).await?;
            Ok(TaskResult::CalendarAdded { msg })
        }
    }
}

// ---------------------------------------------------------------------------
// TaskRouter
// ---------------------------------------------------------------------------

/// Handle returned by [`TaskRouter::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTicket {
    pub id: u64,
    pub kind: TaskKind,
}

/// Completion report delivered on the router's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub id: u64,
    pub kind: TaskKind,
    pub state: TaskState,
    pub result: TaskResult,
}

impl TaskOutcome {
    fn new(id: u64, kind: TaskKind, result: TaskResult) -> Self {
        let state = if result.is_error() {
            TaskState::Failed
        } else {
            TaskState::Completed
        };
        Self {
            id,
            kind,
            state,
            result,
        }
    }
}

/// Dispatches tasks off the calling thread and tracks which result is
/// current per lane.
pub struct TaskRouter {
    engine: Arc<dyn IntentEngine>,
    sessions: Arc<dyn SessionFactory>,
    timeout: Option<Duration>,
    next_id: AtomicU64,
    latest_draft: AtomicU64,
    latest_action: AtomicU64,
    tx: mpsc::UnboundedSender<TaskOutcome>,
}

impl TaskRouter {
    /// Build a router and the receiver its outcomes arrive on.
    pub fn new(
        engine: Arc<dyn IntentEngine>,
        sessions: Arc<dyn SessionFactory>,
        timeout: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<TaskOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = Self {
            engine,
            sessions,
            timeout,
            next_id: AtomicU64::new(0),
            latest_draft: AtomicU64::new(0),
            latest_action: AtomicU64::new(0),
            tx,
        };
        (router, rx)
    }

    fn lane_slot(&self, lane: Lane) -> &AtomicU64 {
        match lane {
            Lane::Draft => &self.latest_draft,
            Lane::Action => &self.latest_action,
        }
    }

    /// Start `request` on its own worker thread and return immediately.
    pub fn dispatch(&self, request: TaskRequest) -> TaskTicket {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let kind = request.kind();
        self.lane_slot(kind.lane()).fetch_max(id, Ordering::SeqCst);
        info!(task_id = id, task = kind.as_str(), "task dispatched");

        let engine = Arc::clone(&self.engine);
        let sessions = Arc::clone(&self.sessions);
        let timeout = self.timeout;
        let tx = self.tx.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("specter-task-{id}"))
            .spawn(move || {
                debug!(task_id = id, state = ?TaskState::Running, "task running");
                let result = run_on_own_runtime(engine, sessions, request, timeout);
                let outcome = TaskOutcome::new(id, kind, result);
                debug!(task_id = id, state = ?outcome.state, "task finished");
                if tx.send(outcome).is_err() {
                    debug!(task_id = id, "no receiver for task outcome");
                }
            });

        if let Err(e) = spawned {
            warn!(task_id = id, error = %e, "could not start task thread");
            let result = TaskResult::error(TaskError::Runtime(e.to_string()));
            let _ = self.tx.send(TaskOutcome::new(id, kind, result));
        }

        TaskTicket { id, kind }
    }

    /// Whether `outcome` is the newest task of its lane.
    pub fn is_current(&self, outcome: &TaskOutcome) -> bool {
        self.lane_slot(outcome.kind.lane()).load(Ordering::SeqCst) == outcome.id
    }
}

/// Build a runtime, run the task on it, tear the runtime down.
fn run_on_own_runtime(
    engine: Arc<dyn IntentEngine>,
    sessions: Arc<dyn SessionFactory>,
    request: TaskRequest,
    timeout: Option<Duration>,
) -> TaskResult {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return TaskResult::error(TaskError::Runtime(e.to_string())),
    };
    // Spawned rather than blocked on directly so a panic comes back as a
    // JoinError instead of unwinding the worker thread.
    let handle = rt.spawn(async move {
        run_task(&*engine, &*sessions, request, timeout).await
    });
    match rt.block_on(handle) {
        Ok(result) => result,
        Err(e) => TaskResult::error(TaskError::Runtime(format!("task aborted: {e}"))),
    }
}
