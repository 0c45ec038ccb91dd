use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::capture::CaptureLimits;
use crate::controller::{ControllerSettings, Mode, SnapshotPolicy};
use crate::dap::AdapterSettings;
use crate::query::QueryLimits;
use crate::util::paths::{config_path, database_path};
use crate::web::ServerConfig;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the database, logs and config file
    pub data_dir: PathBuf,
    /// Database file; defaults to `<data_dir>/line_reports.db`
    pub db_path: PathBuf,
    /// Debug adapter bootstrap
    pub adapter: AdapterSettings,
    /// Bounds on each variable capture
    pub capture: CaptureLimits,
    /// Stepping behaviour
    pub stepping: SteppingConfig,
    /// Query server
    pub web: ServerConfig,
    /// Paging limits for line report queries
    pub query: QueryLimits,
    /// Speech engines
    pub voice: VoiceConfig,
}

#[derive(Debug, Clone)]
pub struct SteppingConfig {
    pub start_mode: Mode,
    /// Delay between auto-mode steps
    pub pacing: Duration,
    pub snapshot_policy: SnapshotPolicy,
}

#[derive(Debug, Clone, Default)]
pub struct VoiceConfig {
    /// TTS program and fixed arguments; the text is appended
    pub speak_command: Option<Vec<String>>,
    /// Recognizer program printing one phrase per line
    pub recognize_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TomlMode {
    Manual,
    Auto,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlAdapterConfig {
    pub python: Option<PathBuf>,
    pub host: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub just_my_code: Option<bool>,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlCaptureConfig {
    pub max_depth: Option<usize>,
    pub max_children: Option<usize>,
    pub recursion_warning_depth: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlSteppingConfig {
    pub mode: Option<TomlMode>,
    pub delay_ms: Option<u64>,
    pub snapshot: Option<SnapshotPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlWebConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_permissive: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlQueryConfig {
    pub default_limit: Option<u32>,
    pub max_limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlVoiceConfig {
    pub speak_command: Option<Vec<String>>,
    pub recognize_command: Option<Vec<String>>,
}

/// TOML representation of the config file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub database: Option<PathBuf>,
    pub adapter: Option<TomlAdapterConfig>,
    pub capture: Option<TomlCaptureConfig>,
    pub stepping: Option<TomlSteppingConfig>,
    pub web: Option<TomlWebConfig>,
    pub query: Option<TomlQueryConfig>,
    pub voice: Option<TomlVoiceConfig>,
}

impl Config {
    /// Defaults rooted at `data_dir`
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            db_path: database_path(&data_dir),
            data_dir,
            adapter: AdapterSettings::default(),
            capture: CaptureLimits::default(),
            stepping: SteppingConfig {
                start_mode: Mode::Auto,
                pacing: Duration::from_millis(400),
                snapshot_policy: SnapshotPolicy::default(),
            },
            web: ServerConfig::default(),
            query: QueryLimits::default(),
            voice: VoiceConfig::default(),
        }
    }

    /// Load `<data_dir>/config.toml` over the defaults, writing the example on first run.
    /// An unreadable or invalid file leaves the defaults in place.
    pub fn load(data_dir: &Path) -> Self {
        let mut config = Config::with_data_dir(data_dir.to_path_buf());

        let config_file = config_path(data_dir);

        // Create example config on first run
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        match fs::read_to_string(&config_file) {
            Ok(contents) => match toml::from_str::<TomlConfig>(&contents) {
                Ok(toml_config) => config.merge(toml_config),
                Err(e) => {
                    tracing::warn!(path = %config_file.display(), error = %e, "Ignoring invalid config file");
                }
            },
            Err(e) => {
                tracing::debug!(path = %config_file.display(), error = %e, "No config file");
            }
        }

        config
    }

    /// Overlay the values present in a parsed config file
    pub fn merge(&mut self, toml_config: TomlConfig) {
        if let Some(database) = toml_config.database {
            self.db_path = if database.is_absolute() {
                database
            } else {
                self.data_dir.join(database)
            };
        }

        if let Some(adapter) = toml_config.adapter {
            if adapter.python.is_some() {
                self.adapter.python = adapter.python;
            }
            if let Some(host) = adapter.host {
                self.adapter.host = host;
            }
            if let Some(secs) = adapter.connect_timeout_secs {
                self.adapter.connect_timeout = Duration::from_secs(secs);
            }
            if let Some(just_my_code) = adapter.just_my_code {
                self.adapter.just_my_code = just_my_code;
            }
            if adapter.log_dir.is_some() {
                self.adapter.log_dir = adapter.log_dir;
            }
        }

        if let Some(capture) = toml_config.capture {
            if let Some(max_depth) = capture.max_depth {
                self.capture.max_depth = max_depth;
            }
            if let Some(max_children) = capture.max_children {
                self.capture.max_children = max_children;
            }
            if let Some(depth) = capture.recursion_warning_depth {
                self.capture.recursion_warning_depth = depth;
            }
        }

        if let Some(stepping) = toml_config.stepping {
            if let Some(mode) = stepping.mode {
                self.stepping.start_mode = match mode {
                    TomlMode::Manual => Mode::Manual,
                    TomlMode::Auto => Mode::Auto,
                };
            }
            if let Some(delay_ms) = stepping.delay_ms {
                self.stepping.pacing = Duration::from_millis(delay_ms);
            }
            if let Some(snapshot) = stepping.snapshot {
                self.stepping.snapshot_policy = snapshot;
            }
        }

        if let Some(web) = toml_config.web {
            if let Some(host) = web.host {
                self.web.host = host;
            }
            if let Some(port) = web.port {
                self.web.port = port;
            }
            if let Some(cors_permissive) = web.cors_permissive {
                self.web.cors_permissive = cors_permissive;
            }
        }

        if let Some(query) = toml_config.query {
            if let Some(default_limit) = query.default_limit {
                self.query.default_limit = default_limit.max(1);
            }
            if let Some(max_limit) = query.max_limit {
                self.query.max_limit = max_limit.max(1);
            }
            self.query.default_limit = self.query.default_limit.min(self.query.max_limit);
        }

        if let Some(voice) = toml_config.voice {
            if voice.speak_command.is_some() {
                self.voice.speak_command = voice.speak_command.filter(|c| !c.is_empty());
            }
            if voice.recognize_command.is_some() {
                self.voice.recognize_command = voice.recognize_command.filter(|c| !c.is_empty());
            }
        }
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!("Failed to create config directory: {}", e);
                    return;
                }
            }
        }

        // Write the example config
        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            eprintln!("Failed to write default config: {}", e);
        }
    }

    pub fn with_db_path(mut self, db_path: PathBuf) -> Self {
        self.db_path = db_path;
        self
    }

    /// Controller settings for one run
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            start_mode: self.stepping.start_mode,
            manual_from: None,
            pacing: self.stepping.pacing,
            snapshot_policy: self.stepping.snapshot_policy,
            limits: self.capture,
        }
    }
}
