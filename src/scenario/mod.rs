//! Snapshot store: scenario lifecycle over isolated per-scenario datasets.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{error::WorkbenchError, store::ProjectDb, utils::slugify};

pub mod locks;
pub mod modify;
pub mod snapshot;

pub use locks::{ScenarioGuard, ScenarioLocks};
pub use modify::{ModificationRequest, NewValue};
pub use snapshot::{TableSchema, SNAPSHOT_FILE};

const SCENARIOS_DIR: &str = "scenarios";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub snapshot_path: PathBuf,
    pub parent_scenario_id: Option<String>,
    pub is_root: bool,
    pub description: Option<String>,
}

impl Scenario {
    /// The scenario's own directory; scripts run with it as working directory.
    pub fn directory(&self) -> &Path {
        self.snapshot_path.parent().unwrap_or(&self.snapshot_path)
    }
}

#[derive(Debug)]
pub struct SnapshotStore {
    db: ProjectDb,
    locks: ScenarioLocks,
}

impl SnapshotStore {
    pub fn open(project_root: &Path) -> Result<Self> {
        let db = ProjectDb::open(project_root)?;
        fs::create_dir_all(project_root.join(SCENARIOS_DIR))?;
        Ok(Self { db, locks: ScenarioLocks::new() })
    }

    pub fn db(&self) -> &ProjectDb {
        &self.db
    }

    pub fn locks(&self) -> &ScenarioLocks {
        &self.locks
    }

    pub fn list(&self) -> Result<Vec<Scenario>> {
        self.db.list_scenarios()
    }

    pub fn get(&self, id: &str) -> Result<Option<Scenario>> {
        self.db.get_scenario(id)
    }

    pub fn root(&self) -> Result<Option<Scenario>> {
        self.db.root_scenario()
    }

    pub fn current(&self) -> Result<Option<Scenario>> {
        match self.db.current_scenario_id()? {
            Some(id) => self.db.get_scenario(&id),
            None => Ok(None),
        }
    }

    /// Looks a scenario up by id, then by name.
    pub fn resolve(&self, reference: &str) -> Result<Scenario> {
        if let Some(found) = self.db.get_scenario(reference)? {
            return Ok(found);
        }
        if let Some(found) = self.db.find_scenario_by_name(reference)? {
            return Ok(found);
        }
        Err(self.unknown(reference)?.into())
    }

    fn unknown(&self, reference: &str) -> Result<WorkbenchError> {
        Ok(WorkbenchError::UnknownScenario {
            reference: reference.to_string(),
            available: self.list()?.into_iter().map(|s| s.name).collect(),
        })
    }

    /// Creates a scenario. With a parent, the parent's snapshot is copied and
    /// verified; without one, the first scenario of a project becomes the root
    /// (seeded from `seed_path` or empty) and later ones branch from the root
    /// (or take their data from `seed_path` when given). A failed copy leaves
    /// the new scenario with an empty dataset rather than a partial one. The
    /// parent is locked for the duration of the copy.
    pub async fn create(&self, name: &str, parent_id: Option<&str>, seed_path: Option<&Path>) -> Result<Scenario> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WorkbenchError::EmptyScenarioName.into());
        }
        if self.db.find_scenario_by_name(name)?.is_some() {
            return Err(WorkbenchError::DuplicateScenarioName(name.to_string()).into());
        }

        let parent = match parent_id {
            Some(pid) => match self.db.get_scenario(pid)? {
                Some(p) => Some(p),
                None => return Err(self.unknown(pid)?.into()),
            },
            None => self.db.root_scenario()?,
        };
        let is_root = parent.is_none();

        let source: Option<PathBuf> = match (parent_id, seed_path) {
            (Some(_), seed) => {
                if seed.is_some() {
                    warn!("seed path ignored: scenario branches from an explicit parent");
                }
                parent.as_ref().map(|p| p.snapshot_path.clone())
            }
            (None, Some(seed)) => {
                if !seed.is_file() {
                    return Err(WorkbenchError::MissingSeed(seed.display().to_string()).into());
                }
                Some(seed.to_path_buf())
            }
            (None, None) => parent.as_ref().map(|p| p.snapshot_path.clone()),
        };
        let parent_guard = match (&parent, &source) {
            (Some(p), Some(src)) if *src == p.snapshot_path => Some(self.locks.acquire(&p.id).await),
            _ => None,
        };

        let id = Uuid::new_v4().simple().to_string();
        let dir = self
            .db
            .root()
            .join(SCENARIOS_DIR)
            .join(format!("{}-{}", slugify(name), &id[..8]));
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating scenario directory {}", dir.display()))?;
        let snapshot_path = dir.join(SNAPSHOT_FILE);

        let populated = match &source {
            Some(src) => match snapshot::copy_verified(src, &snapshot_path) {
                Ok(_) => Ok(()),
                Err(err) => {
                    warn!(%err, scenario = name, "snapshot copy failed; starting from an empty dataset");
                    snapshot::init_empty(&snapshot_path)
                }
            },
            None => snapshot::init_empty(&snapshot_path),
        };
        drop(parent_guard);
        if let Err(err) = populated {
            let _ = fs::remove_dir_all(&dir);
            return Err(err);
        }

        let now = Utc::now();
        let scenario = Scenario {
            id,
            name: name.to_string(),
            created_at: now,
            modified_at: now,
            snapshot_path,
            parent_scenario_id: parent.map(|p| p.id),
            is_root,
            description: None,
        };
        if let Err(err) = self.db.insert_scenario(&scenario) {
            let _ = fs::remove_dir_all(&dir);
            return Err(err).context("recording new scenario");
        }
        if self.db.current_scenario_id()?.is_none() {
            self.db.set_current_scenario_id(Some(&scenario.id))?;
        }
        info!(id = %scenario.id, name = %scenario.name, root = scenario.is_root, "scenario created");
        Ok(scenario)
    }

    pub fn set_description(&self, id: &str, description: Option<&str>) -> Result<bool> {
        self.db.set_scenario_description(id, description)
    }

    /// Points the current-scenario selector at `scenario_id`.
    pub fn switch(&self, scenario_id: &str) -> Result<bool> {
        if self.db.get_scenario(scenario_id)?.is_none() {
            return Ok(false);
        }
        self.db.set_current_scenario_id(Some(scenario_id))?;
        info!(id = scenario_id, "switched current scenario");
        Ok(true)
    }

    /// Deletes a scenario with its history, artifacts and snapshot directory.
    /// The root can only go once it is the last scenario.
    pub async fn delete(&self, scenario_id: &str) -> Result<bool> {
        let Some(scenario) = self.db.get_scenario(scenario_id)? else {
            return Ok(false);
        };
        if scenario.is_root && self.list()?.len() > 1 {
            return Err(WorkbenchError::RootDeletion(scenario.name).into());
        }

        let guard = self.locks.acquire(scenario_id).await;
        if !self.db.delete_scenario(scenario_id)? {
            return Ok(false);
        }
        let dir = scenario.directory();
        if dir.starts_with(self.db.root().join(SCENARIOS_DIR)) {
            if let Err(err) = fs::remove_dir_all(dir) {
                warn!(%err, dir = %dir.display(), "failed to remove scenario directory");
            }
        }
        drop(guard);
        self.locks.forget(scenario_id);
        info!(id = scenario_id, name = %scenario.name, "scenario deleted");
        Ok(true)
    }

    /// Overwrites the target's snapshot with the source's. Returns false when
    /// the target does not exist, or when the source snapshot file is missing
    /// and the target was reset to an empty dataset instead.
    pub async fn copy(&self, source_id: &str, target_id: &str) -> Result<bool> {
        if source_id == target_id {
            return Ok(true);
        }
        let Some(target) = self.db.get_scenario(target_id)? else {
            return Ok(false);
        };
        let Some(source) = self.db.get_scenario(source_id)? else {
            return Err(self.unknown(source_id)?.into());
        };

        // Locks are always taken in id order.
        let (first, second) = if source_id < target_id { (source_id, target_id) } else { (target_id, source_id) };
        let _first = self.locks.acquire(first).await;
        let _second = self.locks.acquire(second).await;
        let copied = if source.snapshot_path.is_file() {
            snapshot::copy_verified(&source.snapshot_path, &target.snapshot_path)?;
            true
        } else {
            warn!(
                source = %source.name,
                target = %target.name,
                "source snapshot missing; target reset to an empty dataset"
            );
            snapshot::init_empty(&target.snapshot_path)?;
            false
        };
        self.db.touch_scenario(target_id, &Utc::now())?;
        Ok(copied)
    }

    /// Parent chain from `scenario_id` up to the root, starting with itself.
    pub fn lineage(&self, scenario_id: &str) -> Result<Vec<Scenario>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(scenario_id.to_string());
        while let Some(id) = next {
            if !seen.insert(id.clone()) {
                warn!(id = %id, "scenario lineage contains a cycle");
                break;
            }
            let Some(scenario) = self.db.get_scenario(&id)? else {
                if chain.is_empty() {
                    return Err(self.unknown(&id)?.into());
                }
                break;
            };
            next = scenario.parent_scenario_id.clone();
            chain.push(scenario);
        }
        Ok(chain)
    }

    pub fn schema(&self, scenario: &Scenario) -> Result<Vec<TableSchema>> {
        let conn = snapshot::open_read_only(&scenario.snapshot_path).map_err(|err| {
            WorkbenchError::SnapshotUnavailable { scenario: scenario.name.clone(), reason: format!("{err:#}") }
        })?;
        snapshot::inspect(&conn)
    }

    pub fn schema_summary(&self, scenario: &Scenario) -> Result<String> {
        Ok(snapshot::summarize(&self.schema(scenario)?))
    }

    /// Applies a structured edit to one scenario under its lock.
    pub async fn apply_modification(&self, scenario_id: &str, request: &ModificationRequest) -> Result<usize> {
        let Some(scenario) = self.db.get_scenario(scenario_id)? else {
            return Err(self.unknown(scenario_id)?.into());
        };
        let _guard = self.locks.acquire(scenario_id).await;
        let conn = snapshot::open_read_write(&scenario.snapshot_path)?;
        let changed = modify::apply(&conn, &scenario.name, request)?;
        drop(conn);
        self.db.touch_scenario(scenario_id, &Utc::now())?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_scenario_is_root_and_current() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        let base = store.create("Base", None, None).await.expect("create");
        assert!(base.is_root);
        assert!(base.parent_scenario_id.is_none());
        assert!(base.snapshot_path.is_file());
        assert_eq!(store.current().expect("current").map(|s| s.id), Some(base.id.clone()));

        let other = store.create("Other", None, None).await.expect("create");
        assert!(!other.is_root);
        assert_eq!(other.parent_scenario_id.as_deref(), Some(base.id.as_str()));
        assert_ne!(other.snapshot_path, base.snapshot_path);
    }

    #[tokio::test]
    async fn names_must_be_unique_and_non_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        store.create("Base", None, None).await.expect("create");
        let dup = store.create("Base", None, None).await.expect_err("duplicate");
        assert_eq!(
            dup.downcast_ref::<WorkbenchError>(),
            Some(&WorkbenchError::DuplicateScenarioName("Base".into()))
        );
        assert!(store.create("   ", None, None).await.is_err());
    }

    #[tokio::test]
    async fn unknown_parent_names_available_scenarios() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        store.create("Base", None, None).await.expect("create");
        let err = store.create("Child", Some("nope"), None).await.expect_err("unknown parent");
        assert!(err.to_string().contains("available scenarios: Base"));
        assert_eq!(store.list().expect("list").len(), 1);
    }

    #[tokio::test]
    async fn missing_parent_snapshot_falls_back_to_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        let base = store.create("Base", None, None).await.expect("create");
        fs::remove_file(&base.snapshot_path).expect("remove");
        let child = store.create("Child", Some(&base.id), None).await.expect("create");
        assert!(child.snapshot_path.is_file());
        assert!(store.schema(&child).expect("schema").is_empty());
    }

    #[tokio::test]
    async fn lineage_walks_to_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        let a = store.create("A", None, None).await.expect("create");
        let b = store.create("B", Some(&a.id), None).await.expect("create");
        let c = store.create("C", Some(&b.id), None).await.expect("create");
        let names: Vec<_> = store.lineage(&c.id).expect("lineage").into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["C", "B", "A"]);
    }

    #[tokio::test]
    async fn root_cannot_be_deleted_while_others_exist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        let a = store.create("A", None, None).await.expect("create");
        let b = store.create("B", Some(&a.id), None).await.expect("create");
        assert!(store.delete(&a.id).await.is_err());
        assert!(store.delete(&b.id).await.expect("delete b"));
        assert!(store.delete(&a.id).await.expect("delete a"));
        assert!(store.current().expect("current").is_none());
    }
}
