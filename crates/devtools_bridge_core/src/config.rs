use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DEBUG_PORT: u16 = 9222;
pub const DEFAULT_DURATION: Duration = Duration::from_secs(15);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;
pub const DEFAULT_OUTPUT_DIR: &str = ".debug-run";
/// Used when no settings key is configured; real targets read their own key.
pub const DEFAULT_SETTINGS_KEY: &str = "debugRun.workspace";

pub const ENV_EXECUTABLE: &str = "DEBUG_TARGET_EXECUTABLE";
pub const ENV_WORKSPACE: &str = "DEBUG_TARGET_WORKSPACE";
pub const ENV_PORT: &str = "DEBUG_TARGET_PORT";
pub const ENV_SETTINGS_FILE: &str = "DEBUG_TARGET_SETTINGS_FILE";
pub const ENV_SETTINGS_KEY: &str = "DEBUG_TARGET_SETTINGS_KEY";
pub const ENV_OUTPUT_DIR: &str = "DEBUG_TARGET_OUTPUT_DIR";
pub const ENV_READY_TIMEOUT_MS: &str = "DEBUG_TARGET_READY_TIMEOUT_MS";

/// Settings for one debug cycle. Built once and never mutated while the run is in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Length of the capture window.
    pub duration: Duration,
    pub debug_port: u16,
    /// Explicit executable; when unset the launcher searches install locations and `PATH`.
    pub executable: Option<PathBuf>,
    pub args: Vec<String>,
    /// Workspace the target should open; appended as the last launch argument.
    pub workspace: Option<PathBuf>,
    /// Host settings file rewritten for the lifetime of the run so the target opens `workspace`.
    pub settings_file: Option<PathBuf>,
    /// Top-level key in `settings_file` that receives the workspace path.
    pub settings_key: String,
    pub capture_raw: bool,
    pub output_dir: PathBuf,
    pub ready_timeout: Duration,
    pub buffer_capacity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration: DEFAULT_DURATION,
            debug_port: DEFAULT_DEBUG_PORT,
            executable: None,
            args: Vec::new(),
            workspace: None,
            settings_file: None,
            settings_key: DEFAULT_SETTINGS_KEY.to_string(),
            capture_raw: false,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl RunConfig {
    pub fn new(duration: Duration, debug_port: u16) -> Self {
        Self {
            duration,
            debug_port,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(executable) = env_path(ENV_EXECUTABLE) {
            config.executable = Some(executable);
        }
        if let Some(workspace) = env_path(ENV_WORKSPACE) {
            config.workspace = Some(workspace);
        }
        if let Some(settings_file) = env_path(ENV_SETTINGS_FILE) {
            config.settings_file = Some(settings_file);
        }
        if let Some(output_dir) = env_path(ENV_OUTPUT_DIR) {
            config.output_dir = output_dir;
        }
        if let Some(key) = std::env::var(ENV_SETTINGS_KEY)
            .ok()
            .filter(|key| !key.trim().is_empty())
        {
            config.settings_key = key;
        }

        config.debug_port = std::env::var(ENV_PORT)
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(DEFAULT_DEBUG_PORT);

        config.ready_timeout = std::env::var(ENV_READY_TIMEOUT_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_READY_TIMEOUT);

        config
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
