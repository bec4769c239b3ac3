use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::PathBuf,
};

use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let mut map = default_map();
        let config_path = default_config_path();

        // Read .steprunrc if exists
        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                let reader = BufReader::new(file);
                for line in reader.lines().flatten() {
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

        Self { inner: map, config_path }
    }

    /// Build a config from explicit pairs overlaid on the defaults,
    /// bypassing the rc file. Used by embedders and tests.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut map = default_map();
        map.extend(pairs);
        Self {
            inner: map,
            config_path: default_config_path(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        // ENV first
        if let Ok(v) = env::var(key) {
            return Some(v);
        }
        self.inner.get(key).cloned()
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
}

fn is_config_key(k: &str) -> bool {
    // Accept known keys or STEPRUN_* for forward-compat
    const KEYS: &[&str] = &[
        "CYCLE_DATE",
        "CYCLE_HOUR",
        "ENSEMBLE_MEMBERS",
        "UNIT_OF_WORK",
        "RETAIN_WORKSPACE",
        "SCRATCH_ROOT",
        "STEP_LOG_FILE",
        "LOGGING_LEVEL",
    ];

    KEYS.contains(&k) || k.starts_with("STEPRUN_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("steprun").join(".steprunrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    m.insert(
        "SCRATCH_ROOT".into(),
        env::temp_dir()
            .join("steprun")
            .to_string_lossy()
            .into_owned(),
    );

    m.insert("ENSEMBLE_MEMBERS".into(), "0".into());
    m.insert("LOGGING_LEVEL".into(), "info".into());

    // Bools as strings
    m.insert("RETAIN_WORKSPACE".into(), "false".into());

    m
}
