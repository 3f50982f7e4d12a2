//! Canonical in-memory state with a single mutation path
//!
//! All collections live behind one mutex. A mutation validates, applies the
//! workflow transition, persists, and publishes to the hub before the lock
//! is released, which gives every observer the same total order. The lock
//! is never held across an `.await`.

mod log;

pub use log::{Collections, PersistenceLog, ACTIVE_FILE, ARCHIVED_FILE, BACKLOG_FILE};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use hopper_core::ipc::Snapshot;
use hopper_core::time::current_time_millis;
use hopper_core::traits::ProjectRegistry;
use hopper_core::workflow::{self, Effect, Transition};
use hopper_core::{BacklogItem, HopperError, Lode, LodeId, Terminal};

use crate::hub::{Broadcast, BroadcastHub, Change, Filter, Subscription};

/// Identifies the connection that claimed a lode
pub type OwnerId = u64;

/// How a watch request starts
#[derive(Debug)]
pub enum Watch {
    /// The lode had already finished
    Finished(Terminal),
    /// Updates will arrive on the subscription
    Streaming(Subscription),
}

struct Inner {
    data: Collections,
    seq: u64,
    log: PersistenceLog,
    /// Lodes claimed through `attach`, by owning connection
    claims: HashMap<LodeId, OwnerId>,
}

/// Exclusive owner of lodes, archived lodes and backlog
pub struct StateStore {
    inner: Mutex<Inner>,
    hub: Arc<BroadcastHub>,
    projects: Arc<dyn ProjectRegistry>,
}

fn require<'a>(value: &'a str, field: &str) -> Result<&'a str, HopperError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(HopperError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed)
}

/// Index of the lode matching `prefix` exactly or as a unique prefix
fn find_lode(lodes: &[Lode], prefix: &str) -> Result<Option<usize>, HopperError> {
    if let Some(index) = lodes.iter().position(|l| l.id.as_str() == prefix) {
        return Ok(Some(index));
    }

    let mut matches = lodes
        .iter()
        .enumerate()
        .filter(|(_, l)| l.id.matches_prefix(prefix))
        .map(|(i, _)| i);

    match (matches.next(), matches.next()) {
        (None, _) => Ok(None),
        (Some(index), None) => Ok(Some(index)),
        (Some(_), Some(_)) => Err(HopperError::NotFound(format!(
            "lode id prefix '{}' is ambiguous",
            prefix
        ))),
    }
}

fn find_item(items: &[BacklogItem], prefix: &str) -> Result<usize, HopperError> {
    let prefix = require(prefix, "id")?;
    let matches: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.id.starts_with(prefix))
        .map(|(i, _)| i)
        .collect();

    match matches.as_slice() {
        [index] => Ok(*index),
        [] => Err(HopperError::NotFound(format!("backlog item {}", prefix))),
        _ => Err(HopperError::NotFound(format!(
            "backlog id prefix '{}' is ambiguous",
            prefix
        ))),
    }
}

fn archived_error(lode: &Lode, action: &'static str) -> HopperError {
    HopperError::InvalidTransition {
        id: lode.id.to_string(),
        action,
        state: "archived".to_string(),
    }
}

impl Inner {
    /// Index of an addressable lode in the active collection
    fn active_index(&self, id: &str, action: &'static str) -> Result<usize, HopperError> {
        let id = require(id, "id")?;
        if let Some(index) = find_lode(&self.data.lodes, id)? {
            return Ok(index);
        }
        if let Some(index) = find_lode(&self.data.archived, id)? {
            return Err(archived_error(&self.data.archived[index], action));
        }
        Err(HopperError::NotFound(format!("lode {}", id)))
    }

    fn unique_id(&self) -> LodeId {
        loop {
            let id = LodeId::generate();
            let taken = self
                .data
                .lodes
                .iter()
                .chain(self.data.archived.iter())
                .any(|l| l.id == id);
            if !taken {
                return id;
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            seq: self.seq,
            lodes: self.data.lodes.clone(),
            archived: self.data.archived.clone(),
            backlog: self.data.backlog.clone(),
        }
    }
}

impl StateStore {
    /// Load persisted state and take ownership of it
    ///
    /// Claims from a previous run cannot survive a restart, so any lode still
    /// marked active or holding a window reference is released and the
    /// cleaned state is saved.
    pub fn open(
        log: PersistenceLog,
        hub: Arc<BroadcastHub>,
        projects: Arc<dyn ProjectRegistry>,
    ) -> Result<Self, HopperError> {
        let mut data = log.load()?;

        let now = current_time_millis();
        let mut stale = 0;
        for lode in data.lodes.iter_mut() {
            if lode.active || lode.window_ref.is_some() {
                workflow::apply(lode, Transition::Detach, now)?;
                stale += 1;
            }
        }
        if stale > 0 {
            tracing::info!("Released {} stale lode claims from a previous run", stale);
            log.save(&data)?;
        }

        tracing::info!(
            "Loaded {} lodes, {} archived, {} backlog items from {}",
            data.lodes.len(),
            data.archived.len(),
            data.backlog.len(),
            log.dir().display()
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                data,
                seq: 0,
                log,
                claims: HashMap::new(),
            }),
            hub,
            projects,
        })
    }

    /// Sequence number of the last committed mutation
    pub fn seq(&self) -> u64 {
        self.inner.lock().seq
    }

    /// Full copy of current state
    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().snapshot()
    }

    /// Copy of the active or archived collection
    pub fn list(&self, archived: bool) -> Vec<Lode> {
        let inner = self.inner.lock();
        if archived {
            inner.data.archived.clone()
        } else {
            inner.data.lodes.clone()
        }
    }

    /// Look up a lode by ID or prefix, active collection first
    pub fn get(&self, id: &str) -> Result<Lode, HopperError> {
        let id = require(id, "id")?;
        let inner = self.inner.lock();
        if let Some(index) = find_lode(&inner.data.lodes, id)? {
            return Ok(inner.data.lodes[index].clone());
        }
        if let Some(index) = find_lode(&inner.data.archived, id)? {
            return Ok(inner.data.archived[index].clone());
        }
        Err(HopperError::NotFound(format!("lode {}", id)))
    }

    /// Copy of the backlog
    pub fn backlog(&self) -> Vec<BacklogItem> {
        self.inner.lock().data.backlog.clone()
    }

    /// Create a lode, optionally consuming a backlog item
    pub fn create(
        &self,
        project: &str,
        scope: &str,
        title: Option<String>,
        backlog_id: Option<&str>,
    ) -> Result<(Lode, Effect), HopperError> {
        let mut inner = self.inner.lock();
        let mut changes = Vec::new();

        let item = match backlog_id {
            Some(prefix) => {
                let index = find_item(&inner.data.backlog, prefix)?;
                Some(inner.data.backlog[index].clone())
            }
            None => None,
        };

        let project = match &item {
            Some(item) if project.trim().is_empty() => item.project.clone(),
            _ => require(project, "project")?.to_string(),
        };
        self.check_project(&project)?;

        let scope = match &item {
            Some(item) if scope.trim().is_empty() => item.description.clone(),
            _ => scope.to_string(),
        };

        let id = inner.unique_id();
        let (mut lode, effect) =
            workflow::create(id, &project, &scope, title, current_time_millis())?;

        if let Some(item) = item {
            inner.data.backlog.retain(|i| i.id != item.id);
            changes.push(Change::BacklogRemoved(item.clone()));
            lode.backlog = Some(item);
        }

        inner.data.lodes.push(lode.clone());
        changes.push(Change::LodeCreated(lode.clone()));

        tracing::info!(
            "Created lode {} for project {} ({:?})",
            lode.id,
            lode.project,
            effect
        );
        self.commit(&mut inner, changes)?;
        Ok((lode, effect))
    }

    /// Turn a backlog item into a lode
    pub fn promote(
        &self,
        item_id: &str,
        scope: Option<&str>,
    ) -> Result<(Lode, Effect), HopperError> {
        self.create("", scope.unwrap_or(""), None, Some(item_id))
    }

    /// Apply a workflow transition to a lode in the active collection
    pub fn transition(
        &self,
        id: &str,
        transition: Transition,
    ) -> Result<(Lode, Effect), HopperError> {
        let mut inner = self.inner.lock();
        let index = inner.active_index(id, transition.name())?;
        let name = transition.name();
        let restart = matches!(transition, Transition::Restart);

        let lode = &mut inner.data.lodes[index];
        let effect = workflow::apply(lode, transition, current_time_millis())?;
        let lode = lode.clone();

        // A claim ends with the agent run it belongs to
        if restart || !lode.active {
            if let Some(owner) = inner.claims.remove(&lode.id) {
                tracing::debug!("Lode {} no longer claimed by connection {}", lode.id, owner);
            }
        }

        tracing::debug!("Lode {}: {} -> {} ({:?})", lode.id, name, lode.phase(), effect);
        if let Some(terminal) = lode.terminal() {
            tracing::info!("Lode {} finished: {}", lode.id, terminal);
        }

        self.commit(&mut inner, vec![Change::LodeUpdated(lode.clone())])?;
        Ok((lode, effect))
    }

    /// Claim a lode on behalf of a connection
    pub fn attach(
        &self,
        id: &str,
        window_ref: Option<String>,
        owner: OwnerId,
    ) -> Result<Lode, HopperError> {
        let mut inner = self.inner.lock();
        let index = inner.active_index(id, "attach")?;

        let lode = &mut inner.data.lodes[index];
        workflow::apply(lode, Transition::Attach { window_ref }, current_time_millis())?;
        let lode = lode.clone();
        inner.claims.insert(lode.id.clone(), owner);

        tracing::debug!("Lode {} claimed by connection {}", lode.id, owner);
        self.commit(&mut inner, vec![Change::LodeUpdated(lode.clone())])?;
        Ok(lode)
    }

    /// Release every claim held by a connection
    pub fn release(&self, owner: OwnerId) {
        let mut inner = self.inner.lock();
        let owned: Vec<LodeId> = inner
            .claims
            .iter()
            .filter(|(_, o)| **o == owner)
            .map(|(id, _)| id.clone())
            .collect();
        if owned.is_empty() {
            return;
        }

        let now = current_time_millis();
        let mut changes = Vec::new();
        for id in owned {
            inner.claims.remove(&id);
            let Some(lode) = inner.data.lodes.iter_mut().find(|l| l.id == id) else {
                continue;
            };
            if !lode.active && lode.window_ref.is_none() {
                continue;
            }
            if workflow::apply(lode, Transition::Detach, now).is_ok() {
                tracing::debug!("Lode {} released by connection {}", lode.id, owner);
                changes.push(Change::LodeUpdated(lode.clone()));
            }
        }

        if !changes.is_empty() {
            // The connection is gone; nobody is left to report a failure to
            let _ = self.commit(&mut inner, changes);
        }
    }

    /// Move a lode to the archive
    pub fn archive(&self, id: &str) -> Result<Lode, HopperError> {
        let mut inner = self.inner.lock();
        let index = inner.active_index(id, "archive")?;

        let mut lode = inner.data.lodes.remove(index);
        workflow::apply(&mut lode, Transition::Archive, current_time_millis())?;
        inner.claims.remove(&lode.id);
        inner.data.archived.push(lode.clone());

        tracing::info!("Archived lode {}", lode.id);
        self.commit(&mut inner, vec![Change::LodeArchived(lode.clone())])?;
        Ok(lode)
    }

    /// Move a lode back from the archive
    pub fn unarchive(&self, id: &str) -> Result<Lode, HopperError> {
        let id = require(id, "id")?;
        let mut inner = self.inner.lock();

        let Some(index) = find_lode(&inner.data.archived, id)? else {
            if let Some(index) = find_lode(&inner.data.lodes, id)? {
                let lode = &inner.data.lodes[index];
                return Err(HopperError::InvalidTransition {
                    id: lode.id.to_string(),
                    action: "unarchive",
                    state: lode.phase().to_string(),
                });
            }
            return Err(HopperError::NotFound(format!("lode {}", id)));
        };

        let mut lode = inner.data.archived.remove(index);
        workflow::apply(&mut lode, Transition::Unarchive, current_time_millis())?;
        inner.data.lodes.push(lode.clone());

        tracing::info!("Restored lode {} from the archive", lode.id);
        self.commit(&mut inner, vec![Change::LodeRestored(lode.clone())])?;
        Ok(lode)
    }

    /// File a backlog item
    pub fn backlog_add(
        &self,
        project: &str,
        description: &str,
        lode_id: Option<&str>,
    ) -> Result<BacklogItem, HopperError> {
        let project = require(project, "project")?;
        let description = require(description, "description")?;
        self.check_project(project)?;

        let lode_id = lode_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(LodeId::from);
        let item = BacklogItem::new(project, description, lode_id, current_time_millis());

        let mut inner = self.inner.lock();
        inner.data.backlog.push(item.clone());

        tracing::info!("Added backlog item {} for project {}", item.short_id(), item.project);
        self.commit(&mut inner, vec![Change::BacklogAdded(item.clone())])?;
        Ok(item)
    }

    /// Remove a backlog item by ID prefix
    pub fn backlog_remove(&self, prefix: &str) -> Result<BacklogItem, HopperError> {
        let mut inner = self.inner.lock();
        let index = find_item(&inner.data.backlog, prefix)?;
        let item = inner.data.backlog.remove(index);

        tracing::info!("Removed backlog item {}", item.short_id());
        self.commit(&mut inner, vec![Change::BacklogRemoved(item.clone())])?;
        Ok(item)
    }

    /// Register a dashboard subscriber along with the state it starts from
    pub fn subscribe(&self) -> (Snapshot, Subscription) {
        let inner = self.inner.lock();
        let subscription = self.hub.subscribe(Filter::All);
        (inner.snapshot(), subscription)
    }

    /// Start watching one lode until it finishes
    pub fn watch(&self, id: &str) -> Result<(Lode, Watch), HopperError> {
        let id = require(id, "id")?;
        let inner = self.inner.lock();

        if let Some(index) = find_lode(&inner.data.lodes, id)? {
            let lode = inner.data.lodes[index].clone();
            let watch = match lode.terminal() {
                Some(terminal) => Watch::Finished(terminal),
                None => Watch::Streaming(self.hub.subscribe(Filter::Lode(lode.id.clone()))),
            };
            return Ok((lode, watch));
        }
        if let Some(index) = find_lode(&inner.data.archived, id)? {
            let lode = inner.data.archived[index].clone();
            return Ok((lode, Watch::Finished(Terminal::Archived)));
        }
        Err(HopperError::NotFound(format!("lode {}", id)))
    }

    fn check_project(&self, project: &str) -> Result<(), HopperError> {
        if self.projects.contains(project) {
            Ok(())
        } else {
            Err(HopperError::Validation(format!("unknown project: {}", project)))
        }
    }

    /// Persist and publish a mutation that has already been applied
    ///
    /// A failed save leaves the in-memory state in place and still
    /// publishes, so observers track what the process holds.
    fn commit(&self, inner: &mut Inner, changes: Vec<Change>) -> Result<(), HopperError> {
        let saved = inner.log.save(&inner.data);
        if let Err(e) = &saved {
            tracing::warn!("Failed to persist state: {}", e);
        }

        for change in changes {
            inner.seq += 1;
            self.hub.publish(Broadcast {
                seq: inner.seq,
                change,
            });
        }

        saved.map_err(HopperError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopper_core::config::ProjectEntry;
    use hopper_core::traits::ProjectTable;
    use hopper_core::Stage;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> StateStore {
        open_with(dir, ProjectTable::default())
    }

    fn open_with(dir: &TempDir, projects: ProjectTable) -> StateStore {
        StateStore::open(
            PersistenceLog::new(dir.path()),
            Arc::new(BroadcastHub::new(64)),
            Arc::new(projects),
        )
        .unwrap()
    }

    fn advance(output: &str) -> Transition {
        Transition::Advance {
            output: output.to_string(),
        }
    }

    #[test]
    fn test_create_and_advance_to_shipped() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let (lode, effect) = store.create("demo", "fix bug", None, None).unwrap();
        assert_eq!(lode.stage, Stage::Mill);
        assert_eq!(effect, Effect::SpawnStage(Stage::Mill));

        let id = lode.id.as_str();
        assert_eq!(store.transition(id, advance("scoped")).unwrap().0.stage, Stage::Refine);
        assert_eq!(store.transition(id, advance("implemented")).unwrap().0.stage, Stage::Ship);
        let (shipped, effect) = store.transition(id, advance("merged")).unwrap();
        assert_eq!(shipped.stage, Stage::Shipped);
        assert_eq!(effect, Effect::Release);
        assert_eq!(store.seq(), 4);
    }

    #[test]
    fn test_prefix_addressing() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let (lode, _) = store.create("demo", "x", None, None).unwrap();

        let found = store.get(&lode.id.as_str()[..4]).unwrap();
        assert_eq!(found.id, lode.id);

        assert!(matches!(store.get("zzzz"), Err(HopperError::NotFound(_))));
        assert!(matches!(store.get(""), Err(HopperError::Validation(_))));
    }

    #[test]
    fn test_ambiguous_prefix_is_not_found() {
        let lodes = vec![
            Lode::new(LodeId::new("abcd0001"), "demo", "", 1),
            Lode::new(LodeId::new("abcd0002"), "demo", "", 1),
        ];
        assert!(matches!(find_lode(&lodes, "abcd"), Err(HopperError::NotFound(_))));
        assert_eq!(find_lode(&lodes, "abcd0002").unwrap(), Some(1));
        assert_eq!(find_lode(&lodes, "ffff").unwrap(), None);
    }

    #[test]
    fn test_archived_lodes_reject_transitions() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let (lode, _) = store.create("demo", "x", None, None).unwrap();
        let id = lode.id.as_str();

        let archived = store.archive(id).unwrap();
        assert!(!archived.active);
        assert!(store.list(false).is_empty());
        assert_eq!(store.list(true).len(), 1);

        let err = store.transition(id, advance("x")).unwrap_err();
        assert!(matches!(err, HopperError::InvalidTransition { .. }));
        assert!(err.to_string().contains("archived"));
        assert!(matches!(store.archive(id), Err(HopperError::InvalidTransition { .. })));

        let restored = store.unarchive(id).unwrap();
        assert_eq!(restored.id, lode.id);
        assert!(matches!(store.unarchive(id), Err(HopperError::InvalidTransition { .. })));
        assert_eq!(store.list(false).len(), 1);
    }

    #[test]
    fn test_backlog_validation_leaves_collection_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let err = store.backlog_add("demo", "   ", None).unwrap_err();
        assert!(matches!(err, HopperError::Validation(_)));
        assert!(store.backlog().is_empty());
        assert_eq!(store.seq(), 0);
    }

    #[test]
    fn test_backlog_add_remove_and_promote() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let first = store.backlog_add("demo", "write docs", None).unwrap();
        let second = store.backlog_add("demo", "add metrics", Some("abcd1234")).unwrap();
        assert_eq!(second.lode_id, Some(LodeId::new("abcd1234")));

        let removed = store.backlog_remove(first.short_id()).unwrap();
        assert_eq!(removed.id, first.id);
        assert!(matches!(
            store.backlog_remove(first.short_id()),
            Err(HopperError::NotFound(_))
        ));

        let (lode, _) = store.promote(second.short_id(), None).unwrap();
        assert_eq!(lode.scope, "add metrics");
        assert_eq!(lode.project, "demo");
        assert_eq!(lode.backlog.as_ref().map(|i| i.id.as_str()), Some(second.id.as_str()));
        assert!(store.backlog().is_empty());
    }

    #[test]
    fn test_project_registry_is_enforced() {
        let dir = TempDir::new().unwrap();
        let store = open_with(
            &dir,
            ProjectTable::new(vec![ProjectEntry {
                name: "demo".to_string(),
                path: None,
                disabled: false,
            }]),
        );

        assert!(store.create("demo", "x", None, None).is_ok());
        assert!(matches!(
            store.create("other", "x", None, None),
            Err(HopperError::Validation(_))
        ));
        assert!(matches!(
            store.backlog_add("other", "x", None),
            Err(HopperError::Validation(_))
        ));
    }

    #[test]
    fn test_reload_matches_memory() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let (a, _) = store.create("demo", "a", None, None).unwrap();
        let (b, _) = store.create("demo", "b", Some("Bee".to_string()), None).unwrap();
        store.transition(a.id.as_str(), advance("scoped")).unwrap();
        store
            .transition(b.id.as_str(), Transition::Gate { doc: "plan".to_string() })
            .unwrap();
        store.archive(a.id.as_str()).unwrap();
        store.backlog_add("demo", "later", None).unwrap();

        // Claims do not survive a restart, so compare with active cleared
        let mut expected = store.snapshot();
        for lode in expected.lodes.iter_mut() {
            lode.active = false;
        }
        drop(store);

        let reopened = open(&dir);
        let actual = reopened.snapshot();
        assert_eq!(actual.archived, expected.archived);
        assert_eq!(actual.backlog, expected.backlog);
        assert_eq!(actual.lodes.len(), expected.lodes.len());
        for (got, want) in actual.lodes.iter().zip(expected.lodes.iter()) {
            assert_eq!(got.id, want.id);
            assert_eq!(got.stage, want.stage);
            assert_eq!(got.gated, want.gated);
            assert!(!got.active);
        }
    }

    #[test]
    fn test_attach_release() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let (lode, _) = store.create("demo", "x", None, None).unwrap();
        let id = lode.id.as_str();

        let attached = store.attach(id, Some("@7".to_string()), 42).unwrap();
        assert!(attached.active);
        assert_eq!(attached.window_ref.as_deref(), Some("@7"));

        // Another connection closing leaves the claim alone
        store.release(41);
        assert!(store.get(id).unwrap().active);

        store.release(42);
        let released = store.get(id).unwrap();
        assert!(!released.active);
        assert!(released.window_ref.is_none());
    }

    #[test]
    fn test_release_after_restart_keeps_lode_active() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let (lode, _) = store.create("demo", "x", None, None).unwrap();
        let id = lode.id.as_str();

        store.attach(id, None, 1).unwrap();
        store
            .transition(
                id,
                Transition::Fail {
                    reason: "agent crashed".to_string(),
                },
            )
            .unwrap();
        let (restarted, _) = store.transition(id, Transition::Restart).unwrap();
        assert!(restarted.active);

        let seq = store.seq();
        store.release(1);
        assert!(store.get(id).unwrap().active);
        assert_eq!(store.seq(), seq);
    }

    #[test]
    fn test_shipping_ends_the_claim() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let (lode, _) = store.create("demo", "x", None, None).unwrap();
        let id = lode.id.as_str();

        store.attach(id, Some("@3".to_string()), 5).unwrap();
        for _ in 0..3 {
            store.transition(id, advance("")).unwrap();
        }

        let seq = store.seq();
        store.release(5);
        assert_eq!(store.seq(), seq);
        assert_eq!(store.get(id).unwrap().stage, Stage::Shipped);
    }

    #[tokio::test]
    async fn test_subscribe_sees_no_gap() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.create("demo", "before", None, None).unwrap();

        let (snapshot, mut sub) = store.subscribe();
        assert_eq!(snapshot.seq, 1);
        assert_eq!(snapshot.lodes.len(), 1);

        store.create("demo", "after", None, None).unwrap();
        let next = sub.recv().await.unwrap();
        assert_eq!(next.seq, snapshot.seq + 1);
        assert!(matches!(next.change, Change::LodeCreated(ref l) if l.scope == "after"));
    }

    #[tokio::test]
    async fn test_watch_finished_and_streaming() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let (lode, _) = store.create("demo", "x", None, None).unwrap();
        let id = lode.id.as_str();

        let (_, watch) = store.watch(id).unwrap();
        let Watch::Streaming(mut sub) = watch else {
            panic!("Expected a streaming watch");
        };

        store
            .transition(id, Transition::Fail { reason: "boom".to_string() })
            .unwrap();
        let update = sub.recv().await.unwrap();
        assert_eq!(update.lode().unwrap().terminal(), Some(Terminal::Error));

        let (_, watch) = store.watch(id).unwrap();
        assert!(matches!(watch, Watch::Finished(Terminal::Error)));

        store.archive(id).unwrap();
        let (_, watch) = store.watch(id).unwrap();
        assert!(matches!(watch, Watch::Finished(Terminal::Archived)));
    }

    #[test]
    fn test_persist_failure_keeps_memory_and_broadcasts() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let (_, mut sub) = store.subscribe();

        // A directory where the temporary file should go makes the save fail
        std::fs::create_dir(dir.path().join("active.jsonl.tmp")).unwrap();

        let err = store.create("demo", "x", None, None).unwrap_err();
        assert!(matches!(err, HopperError::Persistence(_)));
        assert_eq!(store.list(false).len(), 1);
        assert_eq!(store.seq(), 1);
        assert_eq!(sub.try_recv().unwrap().seq, 1);
    }

    #[test]
    fn test_open_clears_stale_claims() {
        let dir = TempDir::new().unwrap();
        let mut lode = Lode::new(LodeId::new("aaaa0000"), "demo", "x", 1);
        lode.active = true;
        lode.window_ref = Some("@1".to_string());
        PersistenceLog::new(dir.path())
            .save(&Collections {
                lodes: vec![lode],
                ..Collections::default()
            })
            .unwrap();

        let store = open(&dir);
        let loaded = store.get("aaaa0000").unwrap();
        assert!(!loaded.active);
        assert!(loaded.window_ref.is_none());

        let on_disk = PersistenceLog::new(dir.path()).load().unwrap();
        assert!(!on_disk.lodes[0].active);
    }
}
