//! Core domain types

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Length of a lode identifier in hex characters
pub const LODE_ID_LEN: usize = 8;

/// Unique identifier for a lode
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LodeId(String);

impl LodeId {
    /// Create a lode ID from an existing string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random 8-character hex ID
    pub fn generate() -> Self {
        Self(format!("{:08x}", rand::random::<u32>()))
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether this ID starts with the given prefix
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for LodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for LodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Workflow stage of a lode
///
/// Stages only move forward: `mill` → `refine` → `ship` → `shipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Scoping the work
    Mill,
    /// Implementation
    Refine,
    /// Integration
    Ship,
    /// Terminal success
    Shipped,
}

impl Stage {
    /// The stage that follows this one, if any
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Mill => Some(Stage::Refine),
            Stage::Refine => Some(Stage::Ship),
            Stage::Ship => Some(Stage::Shipped),
            Stage::Shipped => None,
        }
    }

    /// Whether this stage ends the workflow
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Shipped)
    }

    /// Wire name of the stage
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Mill => "mill",
            Stage::Refine => "refine",
            Stage::Ship => "ship",
            Stage::Shipped => "shipped",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mill" => Ok(Stage::Mill),
            "refine" => Ok(Stage::Refine),
            "ship" => Ok(Stage::Ship),
            "shipped" => Ok(Stage::Shipped),
            other => Err(format!("unknown stage: {}", other)),
        }
    }
}

/// How a watched lode finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    /// Reached `shipped`
    Shipped,
    /// Failed
    Error,
    /// Moved to the archive
    Archived,
}

impl Terminal {
    /// Process exit code a command-line watcher should use
    pub fn exit_code(self) -> i32 {
        match self {
            Terminal::Shipped | Terminal::Archived => 0,
            Terminal::Error => 1,
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Shipped => write!(f, "shipped"),
            Terminal::Error => write!(f, "error"),
            Terminal::Archived => write!(f, "archived"),
        }
    }
}

/// Derived position of a lode in the workflow
///
/// Exactly one phase holds for any lode in the active collection. Archived
/// lodes are identified by the collection they live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Working through a stage
    Progressing(Stage),
    /// Paused at a review gate
    Gated(Stage),
    /// Failed while in the given stage
    Errored(Stage),
    /// Finished successfully
    Shipped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Progressing(stage) => write!(f, "{}", stage),
            Phase::Gated(stage) => write!(f, "gated in {}", stage),
            Phase::Errored(stage) => write!(f, "errored in {}", stage),
            Phase::Shipped => write!(f, "shipped"),
        }
    }
}

/// A unit of work tracked through the workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lode {
    pub id: LodeId,
    pub project: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub title: Option<String>,
    pub stage: Stage,
    /// Last status text reported by the agent
    #[serde(default)]
    pub status: String,
    /// An agent process is attached
    #[serde(default)]
    pub active: bool,
    /// Paused at a review gate
    #[serde(default)]
    pub gated: bool,
    /// Failure reason; set exactly when the lode is errored
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub review_doc: Option<String>,
    /// Artifact reference reported for each completed stage
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<Stage, String>,
    /// Opaque terminal window handle, owned by the window manager
    #[serde(default)]
    pub window_ref: Option<String>,
    /// Backlog item this lode was promoted from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backlog: Option<BacklogItem>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Lode {
    /// Create a lode at the start of the workflow
    pub fn new(id: LodeId, project: impl Into<String>, scope: impl Into<String>, now: u64) -> Self {
        Self {
            id,
            project: project.into(),
            scope: scope.into(),
            title: None,
            stage: Stage::Mill,
            status: String::new(),
            active: false,
            gated: false,
            error: None,
            review_doc: None,
            outputs: BTreeMap::new(),
            window_ref: None,
            backlog: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Derive the workflow phase from stage, gate and error
    pub fn phase(&self) -> Phase {
        if self.stage.is_terminal() {
            Phase::Shipped
        } else if self.error.is_some() {
            Phase::Errored(self.stage)
        } else if self.gated {
            Phase::Gated(self.stage)
        } else {
            Phase::Progressing(self.stage)
        }
    }

    /// Terminal outcome, if the lode has finished
    pub fn terminal(&self) -> Option<Terminal> {
        match self.phase() {
            Phase::Shipped => Some(Terminal::Shipped),
            Phase::Errored(_) => Some(Terminal::Error),
            _ => None,
        }
    }

    /// Label for display: the title if set, otherwise the scope
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.scope)
    }

    /// Record a modification time
    pub fn touch(&mut self, now: u64) {
        self.updated_at = now;
    }
}

/// A deferred unit of future work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogItem {
    pub id: String,
    pub project: String,
    pub description: String,
    pub created_at: u64,
    /// Lode that filed this item, if any
    #[serde(default)]
    pub lode_id: Option<LodeId>,
}

impl BacklogItem {
    /// Create a backlog item with a fresh UUID
    pub fn new(
        project: impl Into<String>,
        description: impl Into<String>,
        lode_id: Option<LodeId>,
        now: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project: project.into(),
            description: description.into(),
            created_at: now,
            lode_id,
        }
    }

    /// First eight characters of the ID
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(LODE_ID_LEN);
        &self.id[..end]
    }
}
