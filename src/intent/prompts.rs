//! Prompt templates for the two intents.

use crate::grounding::TemporalContext;

/// Prompt for turning an email into summary + reply draft + detected date.
pub fn summary_reply(ctx: &TemporalContext, email: &str) -> String {
    format!(
        r#"You are a professional corporate communication assistant.

{grounding}

EMAIL TO ANALYZE:
{email}

TASKS:
1. LANGUAGE: reply in the language of the email (Turkish mail -> Turkish reply, English mail -> English reply).
2. DATE DETECTION: convert any time expression to ISO format (YYYY-MM-DDTHH:MM:SS) using the reference time above.

RESPOND WITH JSON ONLY, no prose and no code fences:
{{
  "summary": "one-sentence summary of the email",
  "draft_reply": "reply text",
  "detected_date": "YYYY-MM-DDTHH:MM:SS or null when there is no date",
  "meeting_title": "Meeting: <topic or person>"
}}"#,
        grounding = ctx.render(),
        email = email.trim(),
    )
}

/// Prompt for turning a free-text command into target + draft + date.
pub fn action_decision(ctx: &TemporalContext, command: &str) -> String {
    format!(
        r#"You are a senior executive assistant.

{grounding}

USER COMMAND: "{command}"

TASKS:
1. target_name: the person the command is about, or null.
2. draft_text: the email draft to send, written in the language of the command.
3. extracted_date: if the user gives a time ("tomorrow", "next week", "on Tuesday", "10am"),
   convert it to "YYYY-MM-DDTHH:MM:SS" using the reference time above. null when there is no time.

IMPORTANT: if draft_text mentions a date or time, extracted_date must NOT be null.

RESPOND WITH JSON ONLY, no prose and no code fences:
{{
  "target_name": "Name",
  "draft_text": "Email text...",
  "extracted_date": "YYYY-MM-DDTHH:MM:SS",
  "meeting_title": "Meeting: <Name>"
}}"#,
        grounding = ctx.render(),
        command = command.trim(),
    )
}
