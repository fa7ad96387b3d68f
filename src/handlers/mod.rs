//! Command handlers: one module per CLI command family.

pub mod compare;
pub mod history;
pub mod modify;
pub mod run;
pub mod scenario;

use crate::{config::Config, scenario::SnapshotStore};

/// What every handler works against: loaded config, the opened project, and
/// the output preference.
pub struct Workspace {
    pub cfg: Config,
    pub store: SnapshotStore,
    pub markdown: bool,
}

impl Workspace {
    pub fn emit(&self, markdown: &str) {
        crate::printer::emit(markdown, self.markdown);
    }
}
