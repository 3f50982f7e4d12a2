//! Project registry trait

use std::collections::HashMap;

use crate::config::ProjectEntry;

/// Answers whether a project name may receive new work
pub trait ProjectRegistry: Send + Sync {
    /// Check whether the named project is registered and enabled
    fn contains(&self, name: &str) -> bool;
}

/// Registry backed by the `[[projects]]` table of the server config
///
/// An empty table places no restriction on project names.
#[derive(Debug, Clone, Default)]
pub struct ProjectTable {
    entries: HashMap<String, ProjectEntry>,
}

impl ProjectTable {
    pub fn new(entries: impl IntoIterator<Item = ProjectEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.name.clone(), entry))
                .collect(),
        }
    }

    /// Number of configured projects, enabled or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ProjectRegistry for ProjectTable {
    fn contains(&self, name: &str) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        self.entries
            .get(name)
            .map(|entry| !entry.disabled)
            .unwrap_or(false)
    }
}
