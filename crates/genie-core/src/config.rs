//! Bridge configuration.
//!
//! Loaded from YAML (`genie.yml` by default) with every field optional, then
//! overridden from `GENIE_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use genie_proto::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Config file read when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "genie.yml";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "GENIE_CONFIG";

/// Top-level configuration for one bridge session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Program spawned inside the pseudo-terminal.
    pub shell: String,
    pub shell_args: Vec<String>,

    /// Name of the chat CLI typed at the shell prompt.
    pub cli_command: String,
    pub identity_provider: String,
    pub region: String,
    pub default_model: String,

    /// Instructions document added with `/context add`.
    pub context_file: PathBuf,

    /// Regex for the token that precedes the reply json.
    pub marker: String,

    /// Regex listing model names in the `/model` picker.
    pub model_pattern: String,

    /// Chunk endings that mark a finished prompt.
    pub prompt_suffixes: Vec<String>,

    pub silence_threshold_ms: u64,
    pub poll_interval_ms: u64,
    pub ask_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub shell_timeout_secs: u64,
    pub login_timeout_secs: u64,
    pub launch_timeout_secs: u64,
    pub flush_timeout_ms: u64,
    pub max_empty_reads: u32,
    pub quit_grace_ms: u64,

    pub pty_cols: u16,
    pub pty_rows: u16,

    /// Working directory of the spawned shell.
    pub workspace_root: Option<PathBuf>,

    /// Convert `C:\...` paths to `/mnt/c/...` before handing them to the CLI.
    pub wsl_paths: bool,

    /// Default file for `/save` and `/load`.
    pub chat_history_path: Option<PathBuf>,

    /// Directory for timestamped log files; stderr when unset.
    pub log_path: Option<PathBuf>,
    pub log_level: String,
    pub log_retention_days: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            shell_args: Vec::new(),
            cli_command: "kiro-cli".to_string(),
            identity_provider: String::new(),
            region: "us-east-1".to_string(),
            default_model: "claude-sonnet-4".to_string(),
            context_file: PathBuf::from("genie_info.txt"),
            marker: r"(?:>\s*)?GenIE_json".to_string(),
            model_pattern: r"claude-[^\s]+".to_string(),
            prompt_suffixes: vec!["> ".to_string()],
            silence_threshold_ms: 5_000,
            poll_interval_ms: 50,
            ask_timeout_secs: 10,
            command_timeout_secs: 10,
            shell_timeout_secs: 30,
            login_timeout_secs: 15,
            launch_timeout_secs: 60,
            flush_timeout_ms: 5_000,
            max_empty_reads: 5,
            quit_grace_ms: 1_000,
            pty_cols: 200,
            pty_rows: 50,
            workspace_root: None,
            wsl_paths: cfg!(windows),
            chat_history_path: None,
            log_path: None,
            log_level: "info".to_string(),
            log_retention_days: 30,
        }
    }
}

impl BridgeConfig {
    /// Parses a YAML config file.
    pub fn from_file(path: &Path) -> BridgeResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse_yaml(&content).map_err(|e| match e {
            BridgeError::Config(msg) => BridgeError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Parses YAML text. An empty document yields the defaults.
    pub fn parse_yaml(content: &str) -> BridgeResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config the way the binary does.
    ///
    /// `path` wins over `GENIE_CONFIG`, which wins over `genie.yml` in the
    /// current directory. Only the default file may be missing. Environment
    /// overrides are applied last.
    pub fn load(path: Option<&Path>) -> BridgeResult<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// [`BridgeConfig::load`] with an injectable environment.
    pub fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> BridgeResult<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| lookup(CONFIG_ENV).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                info!(path = %path.display(), "Loading config");
                Self::from_file(&path)?
            }
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                info!(path = DEFAULT_CONFIG_FILE, "Loading config");
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                debug!("No config file; using defaults");
                Self::default()
            }
        };

        config.apply_env(lookup)?;
        Ok(config)
    }

    /// Applies `GENIE_*`, `COLUMNS` and `LINES` overrides.
    ///
    /// Blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> BridgeResult<()> {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = text("GENIE_CLI_COMMAND") {
            self.cli_command = v;
        }
        if let Some(v) = text("GENIE_IDENTITY_PROVIDER") {
            self.identity_provider = v;
        }
        if let Some(v) = text("GENIE_REGION") {
            self.region = v;
        }
        if let Some(v) = text("GENIE_DEFAULT_MODEL") {
            self.default_model = v;
        }
        if let Some(v) = text("GENIE_SHELL") {
            self.shell = v;
        }
        if let Some(v) = text("GENIE_CHAT_HISTORY_PATH") {
            self.chat_history_path = Some(PathBuf::from(v));
        }
        if let Some(v) = text("GENIE_LOG_DIR") {
            self.log_path = Some(PathBuf::from(v));
        }
        if let Some(v) = text("COLUMNS") {
            self.pty_cols = parse_number("COLUMNS", &v)?;
        }
        if let Some(v) = text("LINES") {
            self.pty_rows = parse_number("LINES", &v)?;
        }

        self.validate()
    }

    /// Rejects values the session cannot run with.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.shell.trim().is_empty() {
            return Err(BridgeError::Config("shell must not be empty".into()));
        }
        if self.cli_command.trim().is_empty() {
            return Err(BridgeError::Config("cli_command must not be empty".into()));
        }
        if self.prompt_suffixes.iter().all(|s| s.is_empty()) {
            return Err(BridgeError::Config(
                "prompt_suffixes needs at least one non-empty suffix".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(BridgeError::Config("poll_interval_ms must be positive".into()));
        }
        if self.pty_cols == 0 || self.pty_rows == 0 {
            return Err(BridgeError::Config("pty size must be positive".into()));
        }
        for (name, pattern) in [("marker", &self.marker), ("model_pattern", &self.model_pattern)] {
            regex::Regex::new(pattern)
                .map_err(|e| BridgeError::Config(format!("invalid {name} regex: {e}")))?;
        }
        Ok(())
    }

    pub fn silence_threshold(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ask_timeout(&self) -> Duration {
        Duration::from_secs(self.ask_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn quit_grace(&self) -> Duration {
        Duration::from_millis(self.quit_grace_ms)
    }

    /// The login command typed at the shell prompt.
    pub fn login_command(&self) -> String {
        let mut command = format!("{} login --license pro", self.cli_command);
        if !self.identity_provider.is_empty() {
            command.push_str(&format!(" --identity-provider {}", self.identity_provider));
        }
        if !self.region.is_empty() {
            command.push_str(&format!(" --region {}", self.region));
        }
        command
    }

    /// The command that starts the chat with the default model.
    pub fn chat_command(&self) -> String {
        format!("{} chat --model {}", self.cli_command, self.default_model)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> BridgeResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BridgeError::Config(format!("{key} must be a positive integer, got {value:?}")))
}
