use std::time::Duration;
use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::Options;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    ParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("no config path available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runner: Runner,
    pub queue: QueueConfig,
    pub bridge: BridgeConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Runner {
    pub ipv4: bool,
    pub ipv6: bool,
    pub retry: bool,
    pub timeout_seconds: u64,
    pub retry_delay_seconds: u64,
    pub verbose: bool,
    /// Attached to every test this process parses
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Broker the clients connect to
    pub address: String,
    /// Interface and port the broker listens on
    pub bind: String,
    pub port: u16,
    pub job_queue: String,
    pub result_queue: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub filter: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Log,
    Webhook,
    Irc,
}

impl fmt::Display for NotifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotifierKind::Log => "log",
            NotifierKind::Webhook => "webhook",
            NotifierKind::Irc => "irc",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    pub url: String,
    /// Forward passing results too (webhook and irc)
    pub send_success: bool,
    /// Forward results that recovered from a failure streak (webhook and irc)
    pub send_recovered: bool,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/vigil/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("vigil/config.toml"))
}

impl Default for Runner {
    fn default() -> Self {
        let options = Options::default();
        Self {
            ipv4: options.ipv4,
            ipv6: options.ipv6,
            retry: options.retry,
            timeout_seconds: options.timeout.as_secs(),
            retry_delay_seconds: options.retry_delay.as_secs(),
            verbose: options.verbose,
            tag: String::new(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5555".into(),
            bind: "127.0.0.1".into(),
            port: 5555,
            job_queue: "vigil.jobs".into(),
            result_queue: "vigil.results".into(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self { kind: NotifierKind::Log, url: String::new(), send_success: false, send_recovered: true }
    }
}

impl Runner {
    pub fn options(&self) -> Options {
        Options {
            verbose: self.verbose,
            ipv4: self.ipv4,
            ipv6: self.ipv6,
            retry: self.retry,
            timeout: Duration::from_secs(self.timeout_seconds),
            retry_delay: Duration::from_secs(self.retry_delay_seconds),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Runner")?;
        write_1(f, "IPv4", &self.runner.ipv4)?;
        write_1(f, "IPv6", &self.runner.ipv6)?;
        write_1(f, "Retry", &self.runner.retry)?;
        write_1(f, "Timeout (s)", &self.runner.timeout_seconds)?;
        write_1(f, "Retry Delay (s)", &self.runner.retry_delay_seconds)?;
        write_1(f, "Tag", &self.runner.tag)?;
        write_title_1(f, "Queue")?;
        write_1(f, "Broker Address", &self.queue.address)?;
        write_1(f, "Bind Address", &self.queue.bind)?;
        write_1(f, "Port", &self.queue.port)?;
        write_1(f, "Job Queue", &self.queue.job_queue)?;
        write_1(f, "Result Queue", &self.queue.result_queue)?;
        write_title_1(f, "Bridge")?;
        write_1(f, "Filter", &self.bridge.filter)?;
        write_title_1(f, "Notifier")?;
        write_1(f, "Kind", &self.notifier.kind)?;
        write_1(f, "Send Success", &self.notifier.send_success)?;
        write_1(f, "Send Recovered", &self.notifier.send_recovered)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/vigil/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let display = config_path.display().to_string();
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: display.clone(), source })?;
            toml::from_str(raw_string.as_str()).map_err(|source| Error::ParseFailed { path: display, source })
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;
        let write_failed = |source| Error::WriteFailed { path: path.display().to_string(), source };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        fs::write(path, config_str).map_err(write_failed)
    }
}
