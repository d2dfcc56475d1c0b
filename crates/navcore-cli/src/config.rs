//! Configuration Vault – reads/writes `~/.navcore/config.toml`.
//!
//! ```toml
//! backend = "sim"                      # or "rosbridge"
//! rosbridge_url = "ws://localhost:9090"
//!
//! [navigation]
//! low_battery_percent = 15.0
//! retry_limit = 3
//! goal_timeout_secs = 120.0
//! home = [0.0, 0.0, 0.0]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use navcore_runtime::NavigatorConfig;
use navcore_types::Pose;

/// Which navigation stack the CLI drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process simulated stack and telemetry.
    #[default]
    Sim,
    /// Nav2 through a `rosbridge_server` WebSocket.
    Rosbridge,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Sim => write!(f, "sim"),
            Backend::Rosbridge => write!(f, "rosbridge"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sim" => Ok(Backend::Sim),
            "rosbridge" => Ok(Backend::Rosbridge),
            other => Err(format!("unknown backend '{other}' (expected sim or rosbridge)")),
        }
    }
}

/// Persisted user configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_rosbridge_url")]
    pub rosbridge_url: String,

    /// SQLite goal journal; defaults to `~/.navcore/goals.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<String>,

    #[serde(default)]
    pub navigation: NavigationSection,
}

/// `[navigation]` table. Durations are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationSection {
    #[serde(default = "default_low_battery")]
    pub low_battery_percent: f64,
    #[serde(default = "default_clearance")]
    pub safety_clearance_m: f64,
    #[serde(default = "default_liveness_window")]
    pub stack_liveness_window_secs: f64,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: f64,
    #[serde(default = "default_safety_backoff")]
    pub safety_backoff_secs: f64,
    #[serde(default = "default_goal_timeout")]
    pub goal_timeout_secs: f64,
    #[serde(default = "default_cancel_ack_timeout")]
    pub cancel_ack_timeout_secs: f64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_poll_interval")]
    pub telemetry_poll_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tolerance_m: Option<f64>,
    /// `[x, y, yaw]`
    #[serde(default)]
    pub home: [f64; 3],
}

fn default_rosbridge_url() -> String {
    "ws://localhost:9090".to_string()
}
fn default_low_battery() -> f64 {
    15.0
}
fn default_clearance() -> f64 {
    0.3
}
fn default_liveness_window() -> f64 {
    5.0
}
fn default_retry_limit() -> u32 {
    3
}
fn default_retry_delay() -> f64 {
    2.0
}
fn default_safety_backoff() -> f64 {
    1.0
}
fn default_goal_timeout() -> f64 {
    120.0
}
fn default_cancel_ack_timeout() -> f64 {
    5.0
}
fn default_history_limit() -> usize {
    100
}
fn default_poll_interval() -> f64 {
    1.0
}

impl Default for NavigationSection {
    fn default() -> Self {
        Self {
            low_battery_percent: default_low_battery(),
            safety_clearance_m: default_clearance(),
            stack_liveness_window_secs: default_liveness_window(),
            retry_limit: default_retry_limit(),
            retry_delay_secs: default_retry_delay(),
            safety_backoff_secs: default_safety_backoff(),
            goal_timeout_secs: default_goal_timeout(),
            cancel_ack_timeout_secs: default_cancel_ack_timeout(),
            history_limit: default_history_limit(),
            telemetry_poll_secs: default_poll_interval(),
            default_tolerance_m: None,
            home: [0.0; 3],
        }
    }
}

/// Seconds → `Duration`, falling back to `default` for negative or
/// non-finite values.
fn secs(value: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(default))
}

impl NavigationSection {
    pub fn to_navigator_config(&self) -> NavigatorConfig {
        let [x, y, yaw] = self.home;
        NavigatorConfig {
            low_battery_percent: self.low_battery_percent,
            safety_clearance_m: self.safety_clearance_m,
            stack_liveness_window: secs(self.stack_liveness_window_secs, default_liveness_window()),
            retry_limit: self.retry_limit,
            retry_delay: secs(self.retry_delay_secs, default_retry_delay()),
            safety_backoff: secs(self.safety_backoff_secs, default_safety_backoff()),
            goal_timeout: secs(self.goal_timeout_secs, default_goal_timeout()),
            cancel_ack_timeout: secs(self.cancel_ack_timeout_secs, default_cancel_ack_timeout()),
            history_limit: self.history_limit,
            telemetry_poll_interval: secs(self.telemetry_poll_secs, default_poll_interval()),
            default_tolerance_m: self.default_tolerance_m,
            home: Pose::new(x, y, yaw),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            rosbridge_url: default_rosbridge_url(),
            journal_path: None,
            navigation: NavigationSection::default(),
        }
    }
}

impl Config {
    pub fn journal_path(&self) -> PathBuf {
        match &self.journal_path {
            Some(p) => PathBuf::from(p),
            None => navcore_dir_for_home(&home_dir()).join("goals.db"),
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn navcore_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".navcore")
}

/// Return the path to `~/.navcore/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    navcore_dir_for_home(home).join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `NAVCORE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `NAVCORE_BACKEND` | `backend` |
/// | `NAVCORE_ROSBRIDGE_URL` | `rosbridge_url` |
/// | `NAVCORE_RETRY_LIMIT` | `navigation.retry_limit` |
/// | `NAVCORE_GOAL_TIMEOUT_SECS` | `navigation.goal_timeout_secs` |
/// | `NAVCORE_JOURNAL_PATH` | `journal_path` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("NAVCORE_BACKEND")
        && let Ok(backend) = v.parse::<Backend>()
    {
        cfg.backend = backend;
    }
    if let Ok(v) = std::env::var("NAVCORE_ROSBRIDGE_URL") {
        cfg.rosbridge_url = v;
    }
    if let Ok(v) = std::env::var("NAVCORE_RETRY_LIMIT")
        && let Ok(n) = v.parse::<u32>()
    {
        cfg.navigation.retry_limit = n;
    }
    if let Ok(v) = std::env::var("NAVCORE_GOAL_TIMEOUT_SECS")
        && let Ok(t) = v.parse::<f64>()
        && t.is_finite()
        && t > 0.0
    {
        cfg.navigation.goal_timeout_secs = t;
    }
    if let Ok(v) = std::env::var("NAVCORE_JOURNAL_PATH") {
        cfg.journal_path = Some(v);
    }
}

/// Save the config to disk, creating `~/.navcore/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_map_onto_navigator_defaults() {
        let nav = Config::default().navigation.to_navigator_config();
        assert_eq!(nav, NavigatorConfig::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            backend = "rosbridge"

            [navigation]
            retry_limit = 5
            home = [1.0, 2.0, 0.5]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.backend, Backend::Rosbridge);
        assert_eq!(cfg.rosbridge_url, "ws://localhost:9090");
        let nav = cfg.navigation.to_navigator_config();
        assert_eq!(nav.retry_limit, 5);
        assert_eq!(nav.goal_timeout, Duration::from_secs(120));
        assert_eq!(nav.home, Pose::new(1.0, 2.0, 0.5));
    }

    #[test]
    fn negative_durations_fall_back_to_defaults() {
        let section = NavigationSection {
            retry_delay_secs: -1.0,
            goal_timeout_secs: f64::NAN,
            ..NavigationSection::default()
        };
        let nav = section.to_navigator_config();
        assert_eq!(nav.retry_delay, Duration::from_secs(2));
        assert_eq!(nav.goal_timeout, Duration::from_secs(120));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let mut cfg = Config::default();
        cfg.navigation.default_tolerance_m = Some(0.25);
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.navigation.default_tolerance_m, Some(0.25));
        assert_eq!(loaded.navigation.history_limit, 100);
    }

    #[test]
    fn config_path_points_to_navcore_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".navcore"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("ROSBRIDGE".parse::<Backend>(), Ok(Backend::Rosbridge));
        assert!("carrier-pigeon".parse::<Backend>().is_err());
    }

    #[test]
    fn apply_env_overrides_changes_backend_and_url() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe {
            std::env::set_var("NAVCORE_BACKEND", "rosbridge");
            std::env::set_var("NAVCORE_ROSBRIDGE_URL", "ws://robot:9090");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.backend, Backend::Rosbridge);
        assert_eq!(cfg.rosbridge_url, "ws://robot:9090");
        unsafe {
            std::env::remove_var("NAVCORE_BACKEND");
            std::env::remove_var("NAVCORE_ROSBRIDGE_URL");
        }
    }

    #[test]
    fn apply_env_overrides_changes_retry_limit() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("NAVCORE_RETRY_LIMIT", "7") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.navigation.retry_limit, 7);
        unsafe { std::env::remove_var("NAVCORE_RETRY_LIMIT") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_timeout() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("NAVCORE_GOAL_TIMEOUT_SECS", "-3") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.navigation.goal_timeout_secs, 120.0);
        unsafe { std::env::remove_var("NAVCORE_GOAL_TIMEOUT_SECS") };
    }

    #[test]
    fn apply_env_overrides_sets_journal_path() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("NAVCORE_JOURNAL_PATH", "/tmp/goals.db") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.journal_path(), PathBuf::from("/tmp/goals.db"));
        unsafe { std::env::remove_var("NAVCORE_JOURNAL_PATH") };
    }
}
