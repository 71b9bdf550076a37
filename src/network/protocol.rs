//! Wire Protocol
//!
//! Defines the messages exchanged between nodes and between the dashboard
//! client and nodes, plus the envelope that multiplexes acknowledged
//! requests and fire-and-forget notifications over one channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::{NodeAddr, Role, ServerInfo, Value};

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // ========== Two-phase commit ==========
    /// Ask a participant whether it can commit
    Prepare,

    /// Prepare vote
    PrepareResponse(PrepareReply),

    /// Apply a value (fire-and-forget)
    Commit { value: Value },

    /// Discard the transaction (fire-and-forget)
    Abort,

    // ========== Status ==========
    /// Ask a node for its info
    Status,

    /// Node info
    StatusResponse(StatusReply),

    // ========== Client requests ==========
    /// Run a transaction for `value` on the coordinator
    Coordinator { value: Value },

    /// Transaction outcome
    CoordinatorResponse(CoordinatorReply),

    /// List the coordinator and its connected participants
    Servers,

    /// Server list
    ServersResponse(ServersReply),

    /// Toggle the active flag
    ChangeStatus,

    ChangeStatusResponse(ChangeStatusReply),

    /// Toggle the simulated prepare delay
    ChangeDelay,

    /// New delay
    ChangeDelayResponse(ChangeDelayReply),

    /// Terminate the coordinator process (fire-and-forget)
    CloseCoordinator,

    // ========== Error ==========
    Error { code: ErrorCode, message: String },
}

/// Error codes for protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Message cannot be handled as a request (or as a notification)
    UnexpectedMessage,
}

/// Status field of client-facing replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// Status field of a transaction reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Committed,
    Aborted,
    Error,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Committed => write!(f, "Committed"),
            TransactionStatus::Aborted => write!(f, "Aborted"),
            TransactionStatus::Error => write!(f, "Error"),
        }
    }
}

/// Reply to a `Coordinator` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorReply {
    pub status: TransactionStatus,
    /// Participants that voted not-ready (only on abort)
    pub inactive_servers: Vec<NodeAddr>,
    pub error_message: Option<String>,
}

impl CoordinatorReply {
    pub fn committed() -> Self {
        Self {
            status: TransactionStatus::Committed,
            inactive_servers: Vec::new(),
            error_message: None,
        }
    }

    pub fn aborted(inactive_servers: Vec<NodeAddr>) -> Self {
        Self {
            status: TransactionStatus::Aborted,
            inactive_servers,
            error_message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: TransactionStatus::Error,
            inactive_servers: Vec::new(),
            error_message: Some(message.into()),
        }
    }
}

/// Reply to a `Servers` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServersReply {
    pub status: ReplyStatus,
    pub servers: Vec<ServerInfo>,
    pub error_message: Option<String>,
}

impl ServersReply {
    pub fn ok(servers: Vec<ServerInfo>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            servers,
            error_message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            servers: Vec::new(),
            error_message: Some(message.into()),
        }
    }
}

/// Reply to a `Prepare` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareReply {
    pub status: ReplyStatus,
    pub ready: bool,
    pub port: NodeAddr,
}

impl PrepareReply {
    pub fn ok(ready: bool, port: NodeAddr) -> Self {
        Self {
            status: ReplyStatus::Ok,
            ready,
            port,
        }
    }
}

/// Reply to a `Status` request: the node's info with a status field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub status: ReplyStatus,
    pub port: NodeAddr,
    pub is_active: bool,
    pub role: Role,
    /// Simulated prepare delay in milliseconds
    pub delay: u64,
}

impl StatusReply {
    pub fn ok(info: ServerInfo) -> Self {
        Self {
            status: ReplyStatus::Ok,
            port: info.port,
            is_active: info.is_active,
            role: info.role,
            delay: info.delay,
        }
    }

    /// Node info carried by the reply
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            port: self.port,
            is_active: self.is_active,
            role: self.role,
            delay: self.delay,
        }
    }
}

/// Reply to a `ChangeStatus` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatusReply {
    pub status: ReplyStatus,
    pub is_active: bool,
}

impl ChangeStatusReply {
    pub fn ok(is_active: bool) -> Self {
        Self {
            status: ReplyStatus::Ok,
            is_active,
        }
    }
}

/// Reply to a `ChangeDelay` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDelayReply {
    pub status: ReplyStatus,
    /// New delay in milliseconds
    pub delay: u64,
}

impl ChangeDelayReply {
    pub fn ok(delay: Duration) -> Self {
        Self {
            status: ReplyStatus::Ok,
            delay: delay.as_millis() as u64,
        }
    }
}

impl Message {
    /// Event name as listed in the protocol table (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Prepare => "prepare",
            Message::PrepareResponse(_) => "prepare_response",
            Message::Commit { .. } => "commit",
            Message::Abort => "abort",
            Message::Status => "status",
            Message::StatusResponse(_) => "status_response",
            Message::Coordinator { .. } => "coordinator",
            Message::CoordinatorResponse(_) => "coordinator_response",
            Message::Servers => "servers",
            Message::ServersResponse(_) => "servers_response",
            Message::ChangeStatus => "changeStatus",
            Message::ChangeStatusResponse(_) => "changeStatus_response",
            Message::ChangeDelay => "changeDelay",
            Message::ChangeDelayResponse(_) => "changeDelay_response",
            Message::CloseCoordinator => "closeCoordinator",
            Message::Error { .. } => "error",
        }
    }

    /// Build the reply for a message that cannot be handled
    pub fn unexpected(message: &Message) -> Self {
        Message::Error {
            code: ErrorCode::UnexpectedMessage,
            message: format!("cannot handle {}", message.type_name()),
        }
    }
}

/// Frame payload: one request, reply or notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// Acknowledged request; the reply carries the same id
    Request { id: u64, message: Message },
    /// Reply to the request with `id`
    Reply { id: u64, message: Message },
    /// Fire-and-forget notification
    Notify(Message),
}

impl Envelope {
    /// Serialize envelope to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize envelope from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Frame header for length-prefixed envelopes
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Body length
    pub length: u32,
    /// Body checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Largest body accepted from the wire
    pub const MAX_BODY: u32 = 1 << 20;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            checksum: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}
