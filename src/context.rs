//! Per-request view of project state, read once and never mutated.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::WorkbenchError,
    scenario::{Scenario, SnapshotStore},
};

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub project_root: PathBuf,
    current: Option<Scenario>,
    schema_summary: Option<String>,
}

impl RequestContext {
    /// Snapshots the current-scenario selector (or `scenario_override`, an id
    /// or name) and that scenario's schema summary.
    pub fn build(store: &SnapshotStore, scenario_override: Option<&str>) -> Result<Self> {
        let current = match scenario_override {
            Some(reference) => Some(store.resolve(reference)?),
            None => store.current()?,
        };
        let schema_summary = match &current {
            Some(scenario) => match store.schema_summary(scenario) {
                Ok(summary) => Some(summary),
                Err(err) => {
                    warn!(scenario = %scenario.name, "schema unavailable: {err:#}");
                    None
                }
            },
            None => None,
        };
        let ctx = Self {
            request_id: Uuid::new_v4().to_string(),
            project_root: store.db().root().to_path_buf(),
            current,
            schema_summary,
        };
        debug!(
            request = %ctx.request_id,
            scenario = ctx.current.as_ref().map(|s| s.name.as_str()).unwrap_or("-"),
            "request context built"
        );
        Ok(ctx)
    }

    pub fn current(&self) -> Option<&Scenario> {
        self.current.as_ref()
    }

    pub fn require_current(&self) -> Result<&Scenario> {
        self.current
            .as_ref()
            .ok_or_else(|| WorkbenchError::NoCurrentScenario.into())
    }

    pub fn schema_summary(&self) -> &str {
        self.schema_summary.as_deref().unwrap_or("(schema unavailable)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_project_has_no_current_scenario() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        let ctx = RequestContext::build(&store, None).expect("build");
        assert!(ctx.current().is_none());
        let err = ctx.require_current().expect_err("none");
        assert_eq!(err.downcast_ref::<WorkbenchError>(), Some(&WorkbenchError::NoCurrentScenario));
    }

    #[tokio::test]
    async fn context_is_unaffected_by_later_switches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        let base = store.create("Base", None, None).await.expect("create");
        let other = store.create("Other", None, None).await.expect("create");

        let ctx = RequestContext::build(&store, None).expect("build");
        store.switch(&other.id).expect("switch");
        assert_eq!(ctx.require_current().expect("current").id, base.id);
        assert_eq!(ctx.schema_summary(), "(empty dataset: no tables)");

        let by_name = RequestContext::build(&store, Some("Base")).expect("build");
        assert_eq!(by_name.require_current().expect("current").id, base.id);
    }
}
