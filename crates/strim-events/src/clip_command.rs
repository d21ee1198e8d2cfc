use anyhow::{bail, Result};
use serde_json::json;

use strim_core::current_unix_timestamp_ms;

use crate::action::{ActionDescriptor, ActionKind};
use crate::event::NormalizedEvent;
use crate::trigger::Trigger;

const DEFAULT_CLIP_COMMAND: &str = "!clip";
const MAX_REQUESTED_DURATION_SECONDS: u64 = 3_600;

/// Built-in chat command trigger that turns `!clip [seconds] [title...]`
/// messages into clip-job enqueue descriptors.
///
/// The trigger itself is admission-free: cooldown, duration caps, and
/// concurrency limits all apply at the job dispatcher, the single gate every
/// enqueue path passes through.
pub struct ClipCommandTrigger {
    id: String,
    command: String,
    default_duration_seconds: u64,
}

impl ClipCommandTrigger {
    pub fn new(default_duration_seconds: u64) -> Self {
        Self {
            id: "clip-command".to_string(),
            command: DEFAULT_CLIP_COMMAND.to_string(),
            default_duration_seconds: default_duration_seconds.max(1),
        }
    }

    /// Overrides the chat command word (must start with `!`).
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    fn parse_arguments(&self, text: &str) -> Result<(u64, Option<String>)> {
        let remainder = text
            .trim()
            .strip_prefix(self.command.as_str())
            .unwrap_or_default()
            .trim();
        if remainder.is_empty() {
            return Ok((self.default_duration_seconds, None));
        }
        let mut parts = remainder.splitn(2, char::is_whitespace);
        let first = parts.next().unwrap_or_default();
        let rest = parts.next().map(str::trim).filter(|value| !value.is_empty());
        match first.parse::<u64>() {
            Ok(seconds) => {
                if seconds == 0 || seconds > MAX_REQUESTED_DURATION_SECONDS {
                    bail!("requested clip duration {seconds}s is out of range");
                }
                Ok((seconds, rest.map(str::to_string)))
            }
            // First token is not a number; the whole remainder is a title.
            Err(_) => Ok((self.default_duration_seconds, Some(remainder.to_string()))),
        }
    }
}

impl Trigger for ClipCommandTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn matches(&self, event: &NormalizedEvent) -> bool {
        let text = event.text.trim();
        text == self.command
            || text
                .strip_prefix(self.command.as_str())
                .is_some_and(|rest| rest.starts_with(char::is_whitespace))
    }

    fn build_action(&self, event: &NormalizedEvent) -> Result<Option<ActionDescriptor>> {
        let (duration_seconds, title) = self.parse_arguments(event.text.as_str())?;
        Ok(Some(ActionDescriptor {
            kind: ActionKind::EnqueueClipJob,
            platform: Some(event.platform),
            tenant_id: event.tenant_id.clone(),
            trigger_id: self.id.clone(),
            payload: json!({
                "job": {
                    "duration_seconds": duration_seconds,
                    "title": title,
                    "channel": event.channel,
                    "requester_id": event.author.id,
                    "requester_name": event.author.name,
                }
            }),
            created_unix_ms: current_unix_timestamp_ms(),
        }))
    }
}
