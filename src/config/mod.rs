use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Duration,
};

use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
    read_env: bool,
}

impl Config {
    pub fn load() -> Self {
        let mut map = default_map();
        let config_path = default_config_path();

        // Read .workbenchrc if exists
        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(Result::ok) {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((k, v)) = line.split_once('=') {
                        map.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path, read_env: true }
    }

    /// Defaults plus explicit pairs; ignores the rc file and the environment.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = default_map();
        for (k, v) in pairs {
            map.insert(k.into(), v.into());
        }
        Self { inner: map, config_path: default_config_path(), read_env: false }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    /// Explicit `set` values and the environment overlay from `load` win over
    /// the rc file; other environment variables are a last resort.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(v) = self.inner.get(key) {
            return Some(v.clone());
        }
        if self.read_env {
            return env::var(key).ok();
        }
        None
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    pub fn project_path(&self) -> PathBuf {
        self.get_path("PROJECT_PATH")
            .unwrap_or_else(|| workbench_data_dir().join("default"))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.get_path("CACHE_PATH")
            .unwrap_or_else(|| env::temp_dir().join("scenario_workbench").join("cache"))
    }

    pub fn max_attempts(&self) -> u32 {
        self.get_usize("MAX_ATTEMPTS")
            .map(|n| n.clamp(1, u32::MAX as usize) as u32)
            .unwrap_or(3)
    }

    pub fn execution_timeout(&self) -> Duration {
        let secs = self
            .get("EXECUTION_TIMEOUT")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(60.0);
        Duration::from_secs_f64(secs)
    }

    pub fn interpreter(&self) -> String {
        self.get("SCRIPT_INTERPRETER").unwrap_or_else(|| "python3".into())
    }

    pub fn display_limit(&self) -> usize {
        self.get_usize("DISPLAY_OUTPUT_LIMIT").unwrap_or(4000)
    }
}

fn is_config_key(k: &str) -> bool {
    // Accept known keys or WORKBENCH_*/OPENAI_* for forward-compat
    const KEYS: &[&str] = &[
        "OPENAI_API_KEY",
        "API_BASE_URL",
        "PROJECT_PATH",
        "CACHE_PATH",
        "CACHE_LENGTH",
        "REQUEST_TIMEOUT",
        "DEFAULT_MODEL",
        "MAX_TOKENS",
        "MAX_ATTEMPTS",
        "EXECUTION_TIMEOUT",
        "SCRIPT_INTERPRETER",
        "DISPLAY_OUTPUT_LIMIT",
        "PRETTIFY_MARKDOWN",
    ];

    KEYS.contains(&k) || k.starts_with("WORKBENCH_") || k.starts_with("OPENAI_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("scenario_workbench").join(".workbenchrc")
}

fn workbench_data_dir() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("scenario_workbench")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    let temp = env::temp_dir().join("scenario_workbench");

    // Paths
    m.insert(
        "PROJECT_PATH".into(),
        workbench_data_dir().join("default").to_string_lossy().into_owned(),
    );
    m.insert(
        "CACHE_PATH".into(),
        temp.join("cache").to_string_lossy().into_owned(),
    );

    // Numbers
    m.insert("CACHE_LENGTH".into(), "100".into());
    m.insert("REQUEST_TIMEOUT".into(), "60".into());
    m.insert("MAX_TOKENS".into(), "4096".into());
    m.insert("MAX_ATTEMPTS".into(), "3".into());
    m.insert("EXECUTION_TIMEOUT".into(), "60".into());
    m.insert("DISPLAY_OUTPUT_LIMIT".into(), "4000".into());

    // Strings
    m.insert("DEFAULT_MODEL".into(), "gpt-4o".into());
    m.insert("API_BASE_URL".into(), "default".into());
    m.insert("SCRIPT_INTERPRETER".into(), "python3".into());

    // Bools as strings
    m.insert("PRETTIFY_MARKDOWN".into(), "true".into());

    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_override_defaults() {
        let cfg = Config::from_pairs([("MAX_ATTEMPTS", "5"), ("EXECUTION_TIMEOUT", "0.5")]);
        assert_eq!(cfg.max_attempts(), 5);
        assert_eq!(cfg.execution_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.interpreter(), "python3");
    }

    #[test]
    fn bad_numbers_fall_back() {
        let cfg = Config::from_pairs([("MAX_ATTEMPTS", "zero"), ("EXECUTION_TIMEOUT", "-3")]);
        assert_eq!(cfg.max_attempts(), 3);
        assert_eq!(cfg.execution_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        let cfg = Config::from_pairs([("MAX_ATTEMPTS", "0")]);
        assert_eq!(cfg.max_attempts(), 1);
    }
}
