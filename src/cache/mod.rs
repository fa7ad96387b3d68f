//! On-disk cache of generated scripts, keyed by request digest.

use std::{fs, path::PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct RequestCache {
    length: usize,
    cache_path: PathBuf,
}

impl RequestCache {
    pub fn from_config(cfg: &Config) -> Self {
        let len = cfg.get_usize("CACHE_LENGTH").unwrap_or(100);
        Self::new(cfg.cache_path(), len)
    }

    pub fn new(cache_path: PathBuf, length: usize) -> Self {
        let _ = fs::create_dir_all(&cache_path);
        Self { length, cache_path }
    }

    pub fn key_for(&self, base_url: &str, model: &str, prompt: &str, schema_summary: &str) -> String {
        let payload = serde_json::json!({
            "base_url": base_url,
            "model": model,
            "prompt": prompt,
            "schema": schema_summary,
        });
        let data = serde_json::to_vec(&payload).unwrap_or_default();
        let digest = md5::compute(data);
        format!("{:x}", digest)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let p = self.cache_path.join(key);
        let hit = fs::read_to_string(p).ok();
        if hit.is_some() {
            debug!(key, "generation cache hit");
        }
        hit
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let p = self.cache_path.join(key);
        fs::write(p, value)?;
        self.prune()?;
        Ok(())
    }

    fn prune(&self) -> Result<()> {
        let mut entries: Vec<_> = fs::read_dir(&self.cache_path)?.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
        if entries.len() > self.length {
            let to_delete = entries.len() - self.length;
            for entry in entries.iter().take(to_delete) {
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_depend_on_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = RequestCache::new(dir.path().to_path_buf(), 10);
        let a = cache.key_for("u", "m", "total demand", "hubs(Location, Demand)");
        let b = cache.key_for("u", "m", "total demand", "hubs(Location, Demand, Cost)");
        assert_ne!(a, b);
        assert_eq!(a, cache.key_for("u", "m", "total demand", "hubs(Location, Demand)"));
    }

    #[test]
    fn set_then_get_and_prune() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = RequestCache::new(dir.path().to_path_buf(), 2);
        cache.set("k1", "print(1)").expect("set");
        cache.set("k2", "print(2)").expect("set");
        assert_eq!(cache.get("k2").as_deref(), Some("print(2)"));
        cache.set("k3", "print(3)").expect("set");
        assert_eq!(fs::read_dir(dir.path()).expect("read").count(), 2);
    }
}
