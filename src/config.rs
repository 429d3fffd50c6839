use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::TaskDescriptor;
use crate::storage::DEFAULT_DELIMITER;

const APP_DIR: &str = "chronos_taskboard";
const CONFIG_FILE: &str = "config.toml";
const LOG_FILE: &str = "storage.csv";
const DIAGNOSTICS_FILE: &str = "taskboard.log";

pub const DEFAULT_REFRESH_FREQUENCY: u64 = 5;
pub const DEFAULT_SCREEN_TIMEOUT: u64 = 20;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("task list is empty: configure at least one [[tasks]] entry")]
	EmptyTaskList,
	#[error("refresh_frequency must be at least 1 second")]
	InvalidFrequency,
	#[error("delimiter must not be empty or contain ':' or a newline")]
	InvalidDelimiter,
	#[error("task {0:?} contains the log delimiter or a newline")]
	InvalidTask(String),
	#[error("io error on {}: {source}", path.display())]
	Io {
		path: PathBuf,
		source: std::io::Error,
	},
	#[error("failed to parse config: {0}")]
	Decode(#[from] toml::de::Error),
	#[error("failed to encode config: {0}")]
	Encode(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub log_path: Option<PathBuf>,
	pub delimiter: String,
	pub refresh_frequency: u64,
	pub screen_timeout: u64,
	pub poll_interval_ms: u64,
	pub tasks: Vec<TaskDescriptor>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			log_path: None,
			delimiter: DEFAULT_DELIMITER.to_string(),
			refresh_frequency: DEFAULT_REFRESH_FREQUENCY,
			screen_timeout: DEFAULT_SCREEN_TIMEOUT,
			poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
			tasks: default_tasks(),
		}
	}
}

impl Config {
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.tasks.is_empty() {
			return Err(ConfigError::EmptyTaskList);
		}
		if self.refresh_frequency == 0 {
			return Err(ConfigError::InvalidFrequency);
		}
		if self.delimiter.is_empty() || self.delimiter.contains(':') || self.delimiter.contains('\n') {
			return Err(ConfigError::InvalidDelimiter);
		}
		for task in &self.tasks {
			let label = task.label();
			if label.contains(self.delimiter.as_str()) || label.contains('\n') {
				return Err(ConfigError::InvalidTask(label));
			}
		}
		Ok(())
	}

	pub fn screen_timeout(&self) -> Duration {
		Duration::from_secs(self.screen_timeout)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn resolved_log_path(&self) -> PathBuf {
		match &self.log_path {
			Some(path) => absolutize(path.clone()),
			None => state_dir().join(LOG_FILE),
		}
	}
}

fn default_tasks() -> Vec<TaskDescriptor> {
	[
		("work", "code"),
		("work", "mail"),
		("work", "meetings"),
		("work", "ideas"),
		("fun", "yt"),
		("fun", "games"),
	]
	.into_iter()
	.map(|(category, name)| TaskDescriptor::new(category, name))
	.collect()
}

/// Reads and validates the config file; a missing file means defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
	let raw = match fs::read_to_string(path) {
		Ok(content) => content,
		Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Config::default()),
		Err(source) => {
			return Err(ConfigError::Io {
				path: path.to_path_buf(),
				source,
			});
		}
	};

	let config: Config = toml::from_str(&raw)?;
	config.validate()?;
	Ok(config)
}

pub fn save_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
	let io_error = |source| ConfigError::Io {
		path: path.to_path_buf(),
		source,
	};

	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent).map_err(io_error)?;
		}
	}

	let raw = toml::to_string_pretty(config)?;
	fs::write(path, raw).map_err(io_error)
}

pub fn resolve_config_path(cli_path: Option<PathBuf>) -> PathBuf {
	if let Some(path) = cli_path {
		return absolutize(path);
	}

	if let Some(path) = env::var_os("CHRONOS_TASKBOARD_CONFIG") {
		let path = PathBuf::from(path);
		if !path.as_os_str().is_empty() {
			return absolutize(path);
		}
	}

	config_dir().join(CONFIG_FILE)
}

pub fn diagnostics_path() -> PathBuf {
	state_dir().join(DIAGNOSTICS_FILE)
}

fn config_dir() -> PathBuf {
	#[cfg(target_os = "windows")]
	{
		if let Some(path) = env::var_os("APPDATA") {
			return PathBuf::from(path).join(APP_DIR);
		}
	}

	if let Some(path) = env::var_os("XDG_CONFIG_HOME") {
		return PathBuf::from(path).join(APP_DIR);
	}

	if let Some(path) = env::var_os("HOME") {
		return PathBuf::from(path).join(".config").join(APP_DIR);
	}

	PathBuf::from(".chronos_taskboard")
}

pub fn state_dir() -> PathBuf {
	if let Some(path) = env::var_os("CHRONOS_TASKBOARD_STATE_DIR") {
		return PathBuf::from(path);
	}

	#[cfg(target_os = "windows")]
	{
		if let Some(path) = env::var_os("LOCALAPPDATA") {
			return PathBuf::from(path).join(APP_DIR);
		}
	}

	if let Some(path) = env::var_os("XDG_STATE_HOME") {
		return PathBuf::from(path).join(APP_DIR);
	}

	if let Some(path) = env::var_os("HOME") {
		return PathBuf::from(path)
			.join(".local")
			.join("state")
			.join(APP_DIR);
	}

	PathBuf::from(".chronos_taskboard")
}

fn absolutize(path: PathBuf) -> PathBuf {
	if path.is_absolute() {
		path
	} else if let Ok(cwd) = env::current_dir() {
		cwd.join(path)
	} else {
		path
	}
}
