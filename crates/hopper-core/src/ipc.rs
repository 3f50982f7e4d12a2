//! IPC protocol between clients (CLI, dashboard, agents) and the state server
//!
//! Every message is one JSON object per line over the server's Unix socket.
//! Requests carry a `type` discriminator. Responses carry an `ok` flag and,
//! on failure, a structured `error` payload. Frames pushed by the server to
//! subscribers carry a `type` discriminator like requests do.

use serde::{Deserialize, Serialize};

use crate::types::{BacklogItem, Lode, Stage, Terminal};

/// Request from a client to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Liveness check
    Ping,

    /// Create a lode at the start of the workflow
    Create {
        #[serde(default)]
        project: String,
        #[serde(default)]
        scope: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        /// Promote this backlog item (ID prefix) into the new lode
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backlog_id: Option<String>,
    },

    /// Look up one lode in the active or archived collection
    Get {
        #[serde(default)]
        id: String,
    },

    /// List active lodes, or archived ones
    List {
        #[serde(default)]
        archived: bool,
    },

    /// Report stage completion
    #[serde(alias = "processed")]
    Advance {
        #[serde(default)]
        id: String,
        #[serde(default)]
        output: String,
    },

    /// Pause at a review gate
    Gate {
        #[serde(default)]
        id: String,
        #[serde(default)]
        doc: String,
    },

    /// Clear a review gate
    Resume {
        #[serde(default)]
        id: String,
    },

    /// Move a lode into the error state
    Fail {
        #[serde(default)]
        id: String,
        #[serde(default)]
        reason: String,
    },

    /// Re-activate an errored or detached lode
    Restart {
        #[serde(default)]
        id: String,
    },

    /// Move a lode to the archive
    Archive {
        #[serde(default)]
        id: String,
    },

    /// Move an archived lode back to the active collection
    Unarchive {
        #[serde(default)]
        id: String,
    },

    /// Replace the free-form status text
    StatusSet {
        #[serde(default)]
        id: String,
        #[serde(default)]
        status: String,
    },

    /// Claim a lode for an agent process on this connection
    Attach {
        #[serde(default)]
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_ref: Option<String>,
    },

    /// Stream updates for one lode until it finishes
    Watch {
        #[serde(default)]
        id: String,
    },

    /// Receive a snapshot and then every change
    Subscribe,

    /// File a backlog item
    BacklogAdd {
        #[serde(default)]
        project: String,
        #[serde(default)]
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lode_id: Option<String>,
    },

    /// List backlog items
    BacklogList,

    /// Remove a backlog item by ID prefix
    BacklogRemove {
        #[serde(default)]
        id: String,
    },

    /// Turn a backlog item into a lode
    BacklogPromote {
        #[serde(default)]
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
    },

    /// Stop the server
    Shutdown,
}

impl IpcRequest {
    /// Wire name of the request type, for logging
    pub fn name(&self) -> &'static str {
        match self {
            IpcRequest::Ping => "ping",
            IpcRequest::Create { .. } => "create",
            IpcRequest::Get { .. } => "get",
            IpcRequest::List { .. } => "list",
            IpcRequest::Advance { .. } => "advance",
            IpcRequest::Gate { .. } => "gate",
            IpcRequest::Resume { .. } => "resume",
            IpcRequest::Fail { .. } => "fail",
            IpcRequest::Restart { .. } => "restart",
            IpcRequest::Archive { .. } => "archive",
            IpcRequest::Unarchive { .. } => "unarchive",
            IpcRequest::StatusSet { .. } => "status_set",
            IpcRequest::Attach { .. } => "attach",
            IpcRequest::Watch { .. } => "watch",
            IpcRequest::Subscribe => "subscribe",
            IpcRequest::BacklogAdd { .. } => "backlog_add",
            IpcRequest::BacklogList => "backlog_list",
            IpcRequest::BacklogRemove { .. } => "backlog_remove",
            IpcRequest::BacklogPromote { .. } => "backlog_promote",
            IpcRequest::Shutdown => "shutdown",
        }
    }
}

/// Error category reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "invalid_transition")]
    InvalidTransition,
    #[serde(rename = "not_found")]
    NotFound,
    #[serde(rename = "validation_error")]
    Validation,
    #[serde(rename = "persistence_error")]
    Persistence,
    #[serde(rename = "protocol_error")]
    Protocol,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidTransition => write!(f, "invalid_transition"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Validation => write!(f, "validation_error"),
            ErrorKind::Persistence => write!(f, "persistence_error"),
            ErrorKind::Protocol => write!(f, "protocol_error"),
        }
    }
}

/// Structured error carried by a failed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

/// Response from the server to the request that preceded it
///
/// Only the fields relevant to the request are present on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pong: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    /// Mutation sequence number current when the response was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lode: Option<Lode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lodes: Option<Vec<Lode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<BacklogItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<BacklogItem>>,
}

impl IpcResponse {
    /// Bare success
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    /// Failure with a structured payload
    pub fn error(error: ErrorPayload) -> Self {
        Self {
            ok: false,
            error: Some(error),
            ..Self::default()
        }
    }

    /// Success carrying one lode, its ID and stage
    pub fn with_lode(lode: Lode) -> Self {
        Self {
            ok: true,
            id: Some(lode.id.to_string()),
            stage: Some(lode.stage),
            lode: Some(lode),
            ..Self::default()
        }
    }

    /// Success carrying one backlog item and its ID
    pub fn with_item(item: BacklogItem) -> Self {
        Self {
            ok: true,
            id: Some(item.id.clone()),
            item: Some(item),
            ..Self::default()
        }
    }
}

/// Full copy of server state at one point in the mutation sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub seq: u64,
    pub lodes: Vec<Lode>,
    pub archived: Vec<Lode>,
    pub backlog: Vec<BacklogItem>,
}

/// Frame pushed from the server to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcEvent {
    /// Initial state for a dashboard subscriber
    Snapshot(Snapshot),

    /// A lode was created
    LodeCreated { seq: u64, lode: Lode },

    /// A lode in the active collection changed
    LodeUpdated { seq: u64, lode: Lode },

    /// A lode moved to the archive
    LodeArchived { seq: u64, lode: Lode },

    /// A lode moved back from the archive
    LodeRestored { seq: u64, lode: Lode },

    /// A backlog item was filed
    BacklogAdded { seq: u64, item: BacklogItem },

    /// A backlog item was removed or promoted
    BacklogRemoved { seq: u64, item: BacklogItem },

    /// New state of a watched lode
    Update { seq: u64, lode: Lode },

    /// The watched lode finished; the server closes the connection next
    Done { terminal: Terminal },

    /// The server is stopping
    Shutdown,
}

impl IpcEvent {
    /// Mutation sequence number, for frames that carry one
    pub fn seq(&self) -> Option<u64> {
        match self {
            IpcEvent::Snapshot(snapshot) => Some(snapshot.seq),
            IpcEvent::LodeCreated { seq, .. }
            | IpcEvent::LodeUpdated { seq, .. }
            | IpcEvent::LodeArchived { seq, .. }
            | IpcEvent::LodeRestored { seq, .. }
            | IpcEvent::BacklogAdded { seq, .. }
            | IpcEvent::BacklogRemoved { seq, .. }
            | IpcEvent::Update { seq, .. } => Some(*seq),
            IpcEvent::Done { .. } | IpcEvent::Shutdown => None,
        }
    }
}

/// Any line a client may read from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpcMessage {
    Event(IpcEvent),
    Response(IpcResponse),
}
