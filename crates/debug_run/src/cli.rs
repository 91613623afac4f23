use clap::Parser;
use devtools_bridge_core::config::{
    ENV_EXECUTABLE, ENV_OUTPUT_DIR, ENV_PORT, ENV_SETTINGS_FILE, ENV_SETTINGS_KEY, ENV_WORKSPACE,
};
use devtools_bridge_core::RunConfig;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_BUILD_CMD: &str = "DEBUG_TARGET_BUILD_CMD";

/// Launch the target with remote debugging, capture its structured logs for a fixed
/// window, and print a JSON report.
#[derive(Parser, Debug, Clone)]
#[command(name = "debug_run")]
#[command(version)]
#[command(about = "Run one capture cycle against a debuggable target")]
pub struct Cli {
    /// Capture window in seconds
    #[arg(short, long, default_value_t = 15)]
    pub duration: u64,

    /// Do not run the build command before launching
    #[arg(long, default_value_t = false)]
    pub skip_build: bool,

    /// Shell command that builds the target
    #[arg(long, env = ENV_BUILD_CMD)]
    pub build_cmd: Option<String>,

    /// Workspace the target should open
    #[arg(short, long, env = ENV_WORKSPACE)]
    pub workspace: Option<PathBuf>,

    /// Remote debugging port
    #[arg(short, long, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Target executable; searched in install locations and PATH when omitted
    #[arg(long, env = ENV_EXECUTABLE)]
    pub executable: Option<PathBuf>,

    /// Also record every console line verbatim
    #[arg(long, default_value_t = false)]
    pub capture_raw: bool,

    /// Directory for the JSONL streams and summary.json
    #[arg(short, long, env = ENV_OUTPUT_DIR)]
    pub output_dir: Option<PathBuf>,

    /// Seconds to wait for the debug endpoint
    #[arg(long)]
    pub ready_timeout: Option<u64>,

    /// Settings file that is pointed at the workspace for the duration of the run
    #[arg(long, env = ENV_SETTINGS_FILE)]
    pub settings_file: Option<PathBuf>,

    /// Key in the settings file that the target reads its workspace from
    #[arg(long, env = ENV_SETTINGS_KEY)]
    pub settings_key: Option<String>,

    /// Extra arguments passed to the target
    #[arg(last = true)]
    pub target_args: Vec<String>,
}

impl Cli {
    /// Layers the flags over `base`, which carries env and built-in defaults.
    pub fn into_config(self, base: RunConfig) -> RunConfig {
        let mut config = base;
        config.duration = Duration::from_secs(self.duration);
        config.capture_raw = self.capture_raw;
        config.args = self.target_args;

        if let Some(port) = self.port {
            config.debug_port = port;
        }
        if let Some(executable) = self.executable {
            config.executable = Some(executable);
        }
        if let Some(workspace) = self.workspace {
            config.workspace = Some(workspace);
        }
        if let Some(settings_file) = self.settings_file {
            config.settings_file = Some(settings_file);
        }
        if let Some(settings_key) = self.settings_key {
            config.settings_key = settings_key;
        }
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
        if let Some(secs) = self.ready_timeout {
            config.ready_timeout = Duration::from_secs(secs);
        }
        config
    }

    /// The build command to run first, if any.
    pub fn build_command(&self) -> Option<&str> {
        if self.skip_build {
            return None;
        }
        self.build_cmd.as_deref().filter(|cmd| !cmd.trim().is_empty())
    }
}
