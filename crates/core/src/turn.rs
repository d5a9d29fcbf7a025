//! Turn and session domain types.
//!
//! These are the value objects that flow through the whole system:
//! caller appends a turn → store logs it → store replays the context →
//! responder produces the next turn → store appends it verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{InvalidTurnError, StoreError};

/// Opaque identifier for a conversation (the "thread id").
///
/// The only format requirement is that it is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey(String);

impl SessionKey {
    /// Parse a caller-supplied key, rejecting empty or blank input.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        if raw.trim().is_empty() {
            return Err(StoreError::InvalidSessionKey(
                "session key must not be empty".into(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SessionKey {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for SessionKey {
    type Error = StoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.0
    }
}

/// The closed set of turn roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Standing instructions
    System,
    /// The end user
    User,
    /// The responder
    Assistant,
    /// Output of a tool the assistant asked for
    ToolResult,
    /// Summary of older turns, produced only by compaction
    SystemMemory,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => "tool_result",
            Role::SystemMemory => "system_memory",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = InvalidTurnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" | "human" => Ok(Role::User),
            "assistant" | "ai" => Ok(Role::Assistant),
            "tool_result" | "tool" => Ok(Role::ToolResult),
            "system_memory" => Ok(Role::SystemMemory),
            other => Err(InvalidTurnError::UnknownRole(other.to_string())),
        }
    }
}

/// A tool call requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique ID for this call; tool results refer back to it
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON value
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// What a turn carries besides its text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    #[default]
    Text,
    ToolInvocation {
        calls: Vec<ToolInvocation>,
    },
    ToolResult {
        call_id: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text => "text",
            Payload::ToolInvocation { .. } => "tool_invocation",
            Payload::ToolResult { .. } => "tool_result",
        }
    }
}

/// One atomic contribution to a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    /// Who produced this turn
    pub role: Role,

    /// The text content
    pub content: String,

    /// Structured payload
    #[serde(default)]
    pub payload: Payload,

    /// When the turn was created
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn with_role(role: Role, content: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create a system instruction turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content, Payload::Text)
    }

    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content, Payload::Text)
    }

    /// Create a plain assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content, Payload::Text)
    }

    /// Create an assistant turn that requests tool calls.
    pub fn tool_invocation(content: impl Into<String>, calls: Vec<ToolInvocation>) -> Self {
        Self::with_role(Role::Assistant, content, Payload::ToolInvocation { calls })
    }

    /// Create a tool result turn answering `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_role(
            Role::ToolResult,
            content,
            Payload::ToolResult {
                call_id: call_id.into(),
                is_error: false,
            },
        )
    }

    /// Create a tool result turn that reports a failed call.
    pub fn tool_error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_role(
            Role::ToolResult,
            content,
            Payload::ToolResult {
                call_id: call_id.into(),
                is_error: true,
            },
        )
    }

    /// Create a compaction summary turn. Only the store produces these.
    pub fn system_memory(summary: impl Into<String>) -> Self {
        Self::with_role(Role::SystemMemory, summary, Payload::Text)
    }

    /// Parse a role name and build a plain text turn from it.
    pub fn from_parts(role: &str, content: impl Into<String>) -> Result<Self, InvalidTurnError> {
        let role = role.parse::<Role>()?;
        Ok(Self::with_role(role, content, Payload::Text))
    }

    /// The tool calls this turn requests, if any.
    pub fn tool_calls(&self) -> &[ToolInvocation] {
        match &self.payload {
            Payload::ToolInvocation { calls } => calls,
            _ => &[],
        }
    }

    /// Check that role and payload agree before the turn enters a log.
    pub fn validate(&self) -> Result<(), InvalidTurnError> {
        let mismatch = || InvalidTurnError::PayloadMismatch {
            role: self.role.to_string(),
            payload: self.payload.kind().to_string(),
        };

        match (&self.role, &self.payload) {
            (Role::SystemMemory, _) => Err(InvalidTurnError::ReservedRole(
                Role::SystemMemory.to_string(),
            )),
            (Role::System | Role::User, Payload::Text) => Ok(()),
            (Role::System | Role::User, _) => Err(mismatch()),
            (Role::Assistant, Payload::Text) => Ok(()),
            (Role::Assistant, Payload::ToolInvocation { calls }) => {
                if calls.is_empty() {
                    return Err(InvalidTurnError::NoToolCalls);
                }
                if calls.iter().any(|c| c.name.trim().is_empty()) {
                    return Err(InvalidTurnError::MissingToolName);
                }
                Ok(())
            }
            (Role::Assistant, Payload::ToolResult { .. }) => Err(mismatch()),
            (Role::ToolResult, Payload::ToolResult { call_id, .. }) => {
                if call_id.trim().is_empty() {
                    Err(InvalidTurnError::MissingCallId)
                } else {
                    Ok(())
                }
            }
            (Role::ToolResult, _) => Err(mismatch()),
        }
    }
}

/// A synthetic summary turn standing in for a compacted prefix of history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionRecord {
    /// The `system_memory` turn placed in the replay view
    pub turn: Turn,

    /// How many raw history turns this record covers in total
    pub replaced: usize,

    /// First raw turn covered
    pub first_turn_id: String,

    /// Last raw turn covered
    pub last_turn_id: String,

    /// When the compaction ran
    pub created_at: DateTime<Utc>,
}
