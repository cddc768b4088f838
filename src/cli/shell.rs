//! `specter shell`: a line-oriented session that keeps a working draft.
//!
//! Plain text is treated as a command. Tasks run in the background; their
//! results update the draft as they arrive, and results superseded by a
//! newer task of the same lane are dropped.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use chrono::NaiveDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use super::{build_engine, build_sessions, render_result, task_timeout};
use crate::config::Config;
use crate::grounding::Locale;
use crate::intent::format_iso_datetime;
use crate::router::{TaskOutcome, TaskRequest, TaskResult, TaskRouter};

const HELP: &str = "\
commands:
  <text>            process a free-text command
  :analyze          analyze the latest mail
  :send             send the draft to the current recipient
  :schedule         add the current meeting to the calendar
  :to <address>     set the recipient
  :draft <text>     replace the draft text
  :show             print the current draft
  :help             this text
  :quit             wait for running tasks and exit";

/// One parsed input line.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Command(String),
    Analyze,
    Send,
    Schedule,
    To(String),
    Draft(String),
    Show,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(rest) = line.strip_prefix(':') else {
        return Input::Command(line.to_string());
    };
    let (word, arg) = match rest.split_once(char::is_whitespace) {
        Some((w, a)) => (w, a.trim()),
        None => (rest, ""),
    };
    match word {
        "analyze" => Input::Analyze,
        "send" => Input::Send,
        "schedule" => Input::Schedule,
        "to" if !arg.is_empty() => Input::To(arg.to_string()),
        "draft" if !arg.is_empty() => Input::Draft(arg.to_string()),
        "show" => Input::Show,
        "help" | "?" => Input::Help,
        "quit" | "q" | "exit" => Input::Quit,
        other => Input::Unknown(other.to_string()),
    }
}

/// The working draft filled by analysis and command results.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DraftState {
    pub locale: Locale,
    pub recipient: Option<String>,
    pub draft: String,
    pub date: Option<NaiveDateTime>,
    pub title: String,
}

impl DraftState {
    /// Fold a result into the draft and return the text to show.
    pub fn apply(&mut self, result: &TaskResult) -> String {
        match result {
            TaskResult::Success { sender, reply, .. } => {
                self.recipient = sender.clone();
                self.draft = reply.draft_reply.clone();
                self.date = reply.detected_date;
                self.title = reply.meeting_title.clone();
            }
            TaskResult::CommandProcessed {
                found_email,
                decision,
            } => {
                self.recipient = found_email.clone();
                self.draft = decision.draft_text.clone();
                self.date = decision.extracted_date;
                self.title = decision.meeting_title.clone();
            }
            TaskResult::Sent { .. } | TaskResult::CalendarAdded { .. } | TaskResult::Error { .. } => {}
        }
        render_result(result)
    }

    pub fn new(locale: Locale) -> Self {
        Self {
            locale,
            ..Self::default()
        }
    }

    /// Outgoing subject: `"<label>: <meeting title>"`, e.g. `Konu: Toplantı: Ayşe`.
    pub fn subject(&self) -> String {
        format!("{}: {}", self.locale.subject_label(), self.title)
    }

    pub fn send_request(&self) -> Result<TaskRequest, &'static str> {
        let Some(to) = self.recipient.clone() else {
            return Err("no recipient resolved; set one with :to <address>");
        };
        if self.draft.trim().is_empty() {
            return Err("the draft is empty");
        }
        Ok(TaskRequest::SendReply {
            to,
            subject: self.subject(),
            content: self.draft.clone(),
        })
    }

    pub fn schedule_request(&self) -> Result<TaskRequest, &'static str> {
        let Some(date) = self.date else {
            return Err("no meeting date known");
        };
        Ok(TaskRequest::AddCalendar {
            summary: self.title.clone(),
            iso_datetime: format_iso_datetime(&date),
        })
    }

    pub fn render(&self) -> String {
        format!(
            "To:    {}\nDate:  {}\nTitle: {}\n\n{}",
            self.recipient.as_deref().unwrap_or("-"),
            self.date
                .as_ref()
                .map(format_iso_datetime)
                .unwrap_or_else(|| "-".to_string()),
            if self.title.is_empty() { "-" } else { self.title.as_str() },
            self.draft
        )
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Run the interactive session until `:quit` or end of input.
pub async fn run(cfg: &Config, config_path: &Path) -> anyhow::Result<()> {
    let engine = build_engine(cfg)?;
    let sessions = build_sessions(cfg, config_path)?;
    let (router, mut outcomes) = TaskRouter::new(engine, sessions, task_timeout(cfg));

    let mut state = DraftState::new(Locale::from_tag(&cfg.locale));
    let mut pending: HashSet<u64> = HashSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("specter shell. Type :help for commands.");
    prompt();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let request = match parse_input(&line) {
                    Input::Command(text) => Some(TaskRequest::ProcessCommand { command: text }),
                    Input::Analyze => Some(TaskRequest::AnalyzeLastMail),
                    Input::Send => match state.send_request() {
                        Ok(req) => Some(req),
                        Err(why) => { println!("send disabled: {why}"); None }
                    },
                    Input::Schedule => match state.schedule_request() {
                        Ok(req) => Some(req),
                        Err(why) => { println!("schedule disabled: {why}"); None }
                    },
                    Input::To(addr) => { state.recipient = Some(addr); None }
                    Input::Draft(text) => { state.draft = text; None }
                    Input::Show => { println!("{}", state.render()); None }
                    Input::Help => { println!("{HELP}"); None }
                    Input::Quit => break,
                    Input::Empty => None,
                    Input::Unknown(word) => { println!("unknown command :{word} (try :help)"); None }
                };
                if let Some(request) = request {
                    let ticket = router.dispatch(request);
                    pending.insert(ticket.id);
                    println!("[{}] {} started", ticket.id, ticket.kind.as_str());
                }
                prompt();
            }
            Some(outcome) = outcomes.recv() => {
                pending.remove(&outcome.id);
                show(&router, &mut state, outcome);
                prompt();
            }
        }
    }

    if !pending.is_empty() {
        println!("waiting for {} running task(s)...", pending.len());
    }
    while !pending.is_empty() {
        let Some(outcome) = outcomes.recv().await else { break };
        pending.remove(&outcome.id);
        show(&router, &mut state, outcome);
    }
    Ok(())
}

fn show(router: &TaskRouter, state: &mut DraftState, outcome: TaskOutcome) {
    if !router.is_current(&outcome) {
        info!(task_id = outcome.id, task = outcome.kind.as_str(), "dropping stale result");
        println!("\n[{}] {} finished (superseded, ignored)", outcome.id, outcome.kind.as_str());
        return;
    }
    println!("\n[{}] {}\n{}", outcome.id, outcome.kind.as_str(), state.apply(&outcome.result));
}
