use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A single tool call carried by an AI message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Map<String, serde_json::Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failed,
}

fn new_id() -> String {
    Ulid::new().to_string()
}

/// Tagged message variant, per spec §3: `{Human, AI, Tool, System, RemoveMarker}`.
///
/// Every message carries a stable `id` assigned on first insertion into a
/// state; `RemoveMarker` carries only the id of the message it removes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Human {
        id: String,
        content: String,
        ts: DateTime<Utc>,
    },
    Ai {
        id: String,
        content: String,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
        ts: DateTime<Utc>,
    },
    Tool {
        id: String,
        call_id: String,
        content: String,
        status: ToolStatus,
        ts: DateTime<Utc>,
    },
    System {
        id: String,
        content: String,
        ts: DateTime<Utc>,
    },
    RemoveMarker {
        id: String,
    },
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            id: new_id(),
            content: content.into(),
            ts: Utc::now(),
        }
    }

    pub fn ai(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Ai {
            id: new_id(),
            content: content.into(),
            tool_calls,
            ts: Utc::now(),
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>, status: ToolStatus) -> Self {
        Message::Tool {
            id: new_id(),
            call_id: call_id.into(),
            content: content.into(),
            status,
            ts: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            id: new_id(),
            content: content.into(),
            ts: Utc::now(),
        }
    }

    pub fn remove_marker(id: impl Into<String>) -> Self {
        Message::RemoveMarker { id: id.into() }
    }

    pub fn id(&self) -> &str {
        match self {
            Message::Human { id, .. }
            | Message::Ai { id, .. }
            | Message::Tool { id, .. }
            | Message::System { id, .. }
            | Message::RemoveMarker { id } => id,
        }
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Message::Tool { .. })
    }

    pub fn is_ai(&self) -> bool {
        matches!(self, Message::Ai { .. })
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Ai { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn text_content(&self) -> Option<&str> {
        match self {
            Message::Human { content, .. }
            | Message::Ai { content, .. }
            | Message::Tool { content, .. }
            | Message::System { content, .. } => Some(content),
            Message::RemoveMarker { .. } => None,
        }
    }
}

/// Fold a batch of message updates into a message list.
///
/// This is the only place messages may be deleted: a `RemoveMarker` with id
/// `X` removes the message with id `X`; any subsequent insert in the same
/// update batch is appended after the removal (spec §4.H reducer).
pub fn reduce_messages(existing: &mut Vec<Message>, updates: Vec<Message>) {
    for update in updates {
        if let Message::RemoveMarker { id } = &update {
            existing.retain(|m| m.id() != id);
        } else {
            existing.push(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reducer_remove_then_insert_swaps_in_place() {
        let mut state = vec![Message::tool("call-1", "old output", ToolStatus::Success)];
        let old_id = state[0].id().to_string();

        let new_msg = Message::tool("call-1", "redacted output", ToolStatus::Success);
        let new_id = new_msg.id().to_string();

        reduce_messages(
            &mut state,
            vec![Message::remove_marker(old_id.clone()), new_msg],
        );

        assert_eq!(state.len(), 1);
        assert_eq!(state[0].id(), new_id);
        assert!(state.iter().all(|m| m.id() != old_id));
    }

    #[test]
    fn reducer_is_additive_by_default() {
        let mut state = vec![Message::human("hello")];
        reduce_messages(&mut state, vec![Message::ai("hi", vec![])]);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn message_json_round_trip_preserves_tool_calls() {
        let call = ToolCall::new("run_command", {
            let mut m = serde_json::Map::new();
            m.insert("cmd".into(), serde_json::json!("docker ps"));
            m
        });
        let msg = Message::ai("running docker ps", vec![call]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn remove_marker_has_no_text_content() {
        assert!(Message::remove_marker("x").text_content().is_none());
    }
}
