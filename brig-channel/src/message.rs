//! Wire-level message types.
//!
//! Every message travels inside an [`Envelope`] carrying the sender and an
//! optional addressee. The message body is tagged by its `type` field so the
//! JSON form stays flat:
//!
//! ```json
//! { "type": "mcp.request", "from": "a", "to": "b", "id": "42", "caller": "a",
//!   "method": "ping", "params": {} }
//! ```

use std::fmt::{self, Display, Formatter};

use brig_primitives::{CorrelationId, PeerId, ToolDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ChannelResult;

/// Stable numeric error codes carried in invocation responses.
pub mod error_codes {
    /// The addressed peer has no tool with the requested name.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// The tool handler failed or the dispatcher could not run it.
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// A message plus its routing information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Participant that published the message.
    pub from: PeerId,
    /// Addressee, or `None` for broadcasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PeerId>,
    /// Message body.
    #[serde(flatten)]
    pub message: ChannelMessage,
}

impl Envelope {
    /// Creates an envelope.
    #[must_use]
    pub fn new(from: PeerId, to: Option<PeerId>, message: ChannelMessage) -> Self {
        Self { from, to, message }
    }

    /// Returns the tag of the enclosed message.
    #[must_use]
    pub fn tag(&self) -> MessageTag {
        self.message.tag()
    }

    /// Encodes the envelope as a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Codec`](crate::ChannelError::Codec) when a
    /// payload cannot be serialized.
    pub fn to_json(&self) -> ChannelResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes an envelope from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Codec`](crate::ChannelError::Codec) when the
    /// input is not a valid envelope.
    pub fn from_json(raw: &str) -> ChannelResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Message kinds produced and consumed by agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelMessage {
    /// Sent by the channel once the connection is ready.
    #[serde(rename = "welcome")]
    Welcome {
        /// Identity assigned to the connection.
        #[serde(rename = "participantId")]
        participant_id: PeerId,
    },
    /// A participant joined or left.
    #[serde(rename = "presence")]
    Presence(PresenceEvent),
    /// Asks the channel and its participants to re-announce presence.
    #[serde(rename = "presence.query")]
    PresenceQuery,
    /// Full local tool set, published by the owning agent.
    #[serde(rename = "tools.announce")]
    ToolsAnnounce {
        /// Every tool currently registered by the sender.
        tools: Vec<ToolDescriptor>,
    },
    /// Capability update for the sending peer.
    #[serde(rename = "tools.list")]
    ToolsList {
        /// Every tool currently advertised by the sender.
        tools: Vec<ToolDescriptor>,
    },
    /// Tool invocation request.
    #[serde(rename = "mcp.request")]
    Request(InvocationRequest),
    /// Reply to a tool invocation request.
    #[serde(rename = "mcp.response")]
    Response(InvocationResponse),
}

impl ChannelMessage {
    /// Returns the stable tag of this message.
    #[must_use]
    pub const fn tag(&self) -> MessageTag {
        match self {
            Self::Welcome { .. } => MessageTag::Welcome,
            Self::Presence(_) => MessageTag::Presence,
            Self::PresenceQuery => MessageTag::PresenceQuery,
            Self::ToolsAnnounce { .. } => MessageTag::ToolsAnnounce,
            Self::ToolsList { .. } => MessageTag::ToolsList,
            Self::Request(_) => MessageTag::Request,
            Self::Response(_) => MessageTag::Response,
        }
    }
}

/// Stable tags identifying message kinds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    /// `welcome`
    Welcome,
    /// `presence`
    Presence,
    /// `presence.query`
    PresenceQuery,
    /// `tools.announce`
    ToolsAnnounce,
    /// `tools.list`
    ToolsList,
    /// `mcp.request`
    Request,
    /// `mcp.response`
    Response,
}

impl MessageTag {
    /// Returns the wire spelling of the tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Presence => "presence",
            Self::PresenceQuery => "presence.query",
            Self::ToolsAnnounce => "tools.announce",
            Self::ToolsList => "tools.list",
            Self::Request => "mcp.request",
            Self::Response => "mcp.response",
        }
    }
}

impl Display for MessageTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a participant arrived or departed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// The participant connected.
    Joined,
    /// The participant disconnected.
    Left,
}

/// Presence notification for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    /// Arrival or departure.
    pub status: PresenceStatus,
    /// Participant the event is about.
    pub participant_id: PeerId,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_name: Option<String>,
    /// Tools the participant advertised when the event was produced.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<ToolDescriptor>,
}

impl PresenceEvent {
    /// Builds a `joined` event.
    #[must_use]
    pub fn joined(
        participant_id: PeerId,
        participant_name: Option<String>,
        capabilities: Vec<ToolDescriptor>,
    ) -> Self {
        Self {
            status: PresenceStatus::Joined,
            participant_id,
            participant_name,
            capabilities,
        }
    }

    /// Builds a `left` event.
    #[must_use]
    pub fn left(participant_id: PeerId) -> Self {
        Self {
            status: PresenceStatus::Left,
            participant_id,
            participant_name: None,
            capabilities: Vec::new(),
        }
    }
}

/// Tool invocation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Correlation id chosen by the caller.
    pub id: CorrelationId,
    /// Identity the response must be addressed to.
    pub caller: PeerId,
    /// Tool name.
    pub method: String,
    /// Tool input.
    #[serde(default)]
    pub params: Value,
}

/// Reply to an [`InvocationRequest`], carrying either a result or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    /// Correlation id copied from the request.
    pub id: CorrelationId,
    /// Successful result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl InvocationResponse {
    /// Builds a successful response.
    #[must_use]
    pub fn success(id: CorrelationId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds a failed response.
    #[must_use]
    pub fn failure(id: CorrelationId, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Splits the response into its outcome. An error always wins over a
    /// result; a response carrying neither resolves to `null`.
    ///
    /// # Errors
    ///
    /// Returns the carried [`RpcError`] when the response reports a failure.
    pub fn into_outcome(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Error object carried by failed responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code, see [`error_codes`].
    pub code: i64,
    /// Human-readable description.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Creates an error with the given code and message.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Creates a `-32601` method-not-found error.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Tool not found: {method}"),
        )
    }

    /// Creates a `-32603` internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message)
    }
}
