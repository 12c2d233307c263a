//! Configuration module
//!
//! Resolves agent settings from compiled-in defaults, TOML config files and
//! command-line flags, in increasing order of precedence.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AgentError;

/// Config file name looked up in every config directory
pub const CONFIG_FILE_NAME: &str = "node-agent.toml";

/// System-wide config file, also written by `install`
pub const SYSTEM_CONFIG_PATH: &str = "/etc/node-agent.toml";

// Placeholder defaults; a build step may substitute real values for the tokens.
const DEFAULT_DOCKER: &str = "$DOCKER$";
const DEFAULT_MASTER: &str = "$MASTER$";
const DEFAULT_SECRET: &str = "$SECRET$";
const DEFAULT_TIMEOUT: &str = "60";

/// Longest accepted registration interval, one day
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Sample config written to the system config path on install
pub const SAMPLE_CONFIG: &str = include_str!("../../config/sample.toml");

/// True for values like `$MASTER$`: a template token nobody filled in.
pub fn is_template_token(value: &str) -> bool {
    value.len() > 2 && value.starts_with('$') && value.ends_with('$')
}

/// Settings from a single source; unset fields fall through to lower layers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    /// `host:port` of the docker daemon
    pub docker: Option<String>,
    /// `host:port` of the manager
    pub master: Option<String>,
    /// Node secret sent in the auth header
    pub secret: Option<String>,
    /// Seconds between registration updates
    pub timeout: Option<u64>,
    /// Verbosity: 1 is info, 2 and above is debug
    pub log_level: Option<u8>,
}

impl ConfigLayer {
    /// Compiled-in defaults, with unfilled template tokens treated as unset
    pub fn defaults() -> Self {
        let filled = |value: &str| (!is_template_token(value)).then(|| value.to_string());

        Self {
            docker: filled(DEFAULT_DOCKER),
            master: filled(DEFAULT_MASTER),
            secret: filled(DEFAULT_SECRET),
            timeout: filled(DEFAULT_TIMEOUT).and_then(|t| t.parse().ok()),
            log_level: None,
        }
    }

    /// Load a layer from a TOML file; `Ok(None)` if the file does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let layer = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(Some(layer))
    }

    /// Fields set in `over` win over fields set in `self`
    pub fn merge(self, over: ConfigLayer) -> Self {
        Self {
            docker: over.docker.or(self.docker),
            master: over.master.or(self.master),
            secret: over.secret.or(self.secret),
            timeout: over.timeout.or(self.timeout),
            log_level: over.log_level.or(self.log_level),
        }
    }
}

/// Config files to consult, lowest precedence first
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub files: Vec<PathBuf>,
}

impl ConfigSources {
    /// System-wide, user, working directory, then the explicit `--config` file
    pub fn discover(explicit: Option<PathBuf>) -> Self {
        let mut files = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
        if let Some(dir) = dirs::config_dir() {
            files.push(dir.join(CONFIG_FILE_NAME));
        }
        if let Ok(dir) = std::env::current_dir() {
            files.push(dir.join(CONFIG_FILE_NAME));
        }
        files.extend(explicit);
        Self { files }
    }
}

/// Fully resolved agent configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub docker: Option<String>,
    pub master: Option<String>,
    pub secret: Option<String>,
    /// Seconds between registration updates
    pub timeout: u64,
    pub log_level: u8,
    /// Config files that were found and read
    pub files_read: Vec<PathBuf>,
}

/// Validated settings for the registration daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub docker: String,
    pub master: String,
    pub secret: Option<String>,
    pub interval: Duration,
}

impl Config {
    /// Resolve from defaults, then each source file, then `flags`
    pub fn resolve(sources: &ConfigSources, flags: ConfigLayer) -> Result<Self> {
        let mut layer = ConfigLayer::defaults();
        let mut files_read = Vec::new();

        for path in &sources.files {
            if let Some(file_layer) = ConfigLayer::load(path)? {
                layer = layer.merge(file_layer);
                files_read.push(path.clone());
            }
        }
        let layer = layer.merge(flags);

        Ok(Self {
            docker: layer.docker,
            master: layer.master,
            secret: layer.secret,
            timeout: layer.timeout.unwrap_or(0),
            log_level: layer.log_level.unwrap_or(0),
            files_read,
        })
    }

    /// Check what the daemon needs: both addresses and a non-zero interval
    pub fn daemon(&self) -> Result<DaemonConfig, AgentError> {
        let docker = check_address("docker", self.docker.as_deref())?;
        let master = check_address("master", self.master.as_deref())?;
        if self.timeout == 0 {
            return Err(AgentError::Config(
                "timeout must be a positive number of seconds".to_string(),
            ));
        }
        if self.timeout > MAX_TIMEOUT_SECS {
            return Err(AgentError::Config(format!(
                "timeout must not exceed {} seconds, got {}",
                MAX_TIMEOUT_SECS, self.timeout
            )));
        }

        Ok(DaemonConfig {
            docker,
            master,
            secret: self.secret.clone(),
            interval: Duration::from_secs(self.timeout),
        })
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "<unset>".to_string());
        write!(
            f,
            "docker={}, master={}, secret={}, timeout={}, log_level={}",
            show(&self.docker),
            show(&self.master),
            if self.secret.is_some() { "***" } else { "<unset>" },
            self.timeout,
            self.log_level
        )
    }
}

impl DaemonConfig {
    /// Registration lease sent to the manager
    pub fn ttl(&self) -> Duration {
        self.interval.saturating_mul(2)
    }
}

/// Require `host:port`, with the colon somewhere after the first character
pub fn check_address(name: &str, address: Option<&str>) -> Result<String, AgentError> {
    match address {
        Some(address) if address.find(':').is_some_and(|idx| idx > 0) => Ok(address.to_string()),
        other => Err(AgentError::Config(format!(
            "{} address must be non null and has format: 'host:port', but: {}",
            name,
            other.unwrap_or("None")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_template_tokens() {
        assert!(is_template_token("$MASTER$"));
        assert!(!is_template_token("$$"));
        assert!(!is_template_token("$"));
        assert!(!is_template_token("10.0.0.3:8762"));
        assert!(!is_template_token("$partial"));
    }

    #[test]
    fn test_defaults_drop_unfilled_tokens() {
        let defaults = ConfigLayer::defaults();
        assert_eq!(defaults.docker, None);
        assert_eq!(defaults.master, None);
        assert_eq!(defaults.secret, None);
        assert_eq!(defaults.timeout, Some(60));
    }

    #[test]
    fn test_precedence() {
        let dir = TempDir::new().unwrap();
        let system = write(
            &dir,
            "system.toml",
            "docker = \"sys:1\"\nmaster = \"sys:2\"\nsecret = \"sys\"\ntimeout = 5\n",
        );
        let user = write(&dir, "user.toml", "master = \"user:2\"\ntimeout = 7\n");
        let cwd = write(&dir, "cwd.toml", "timeout = 9\n");
        let explicit = write(&dir, "explicit.toml", "log_level = 1\n");
        let missing = dir.path().join("missing.toml");

        let sources = ConfigSources {
            files: vec![system.clone(), user.clone(), missing, cwd.clone(), explicit.clone()],
        };
        let flags = ConfigLayer {
            secret: Some("flag".to_string()),
            ..ConfigLayer::default()
        };

        let config = Config::resolve(&sources, flags).unwrap();
        assert_eq!(config.docker.as_deref(), Some("sys:1"));
        assert_eq!(config.master.as_deref(), Some("user:2"));
        assert_eq!(config.secret.as_deref(), Some("flag"));
        assert_eq!(config.timeout, 9);
        assert_eq!(config.log_level, 1);
        assert_eq!(config.files_read, vec![system, user, cwd, explicit]);
    }

    #[test]
    fn test_unparsable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let broken = write(&dir, "broken.toml", "timeout = \"soon\"\n");
        let sources = ConfigSources { files: vec![broken] };

        assert!(Config::resolve(&sources, ConfigLayer::default()).is_err());
    }

    #[test]
    fn test_daemon_config() {
        let config = Config::resolve(
            &ConfigSources::default(),
            ConfigLayer {
                docker: Some("10.0.0.5:2375".to_string()),
                master: Some("10.0.0.3:8762".to_string()),
                timeout: Some(10),
                ..ConfigLayer::default()
            },
        )
        .unwrap();

        let daemon = config.daemon().unwrap();
        assert_eq!(daemon.interval, Duration::from_secs(10));
        assert_eq!(daemon.ttl(), Duration::from_secs(20));
        assert_eq!(daemon.secret, None);
    }

    #[test]
    fn test_daemon_rejects_oversized_timeout() {
        let resolve = |timeout| {
            Config::resolve(
                &ConfigSources::default(),
                ConfigLayer {
                    docker: Some("10.0.0.5:2375".to_string()),
                    master: Some("10.0.0.3:8762".to_string()),
                    timeout: Some(timeout),
                    ..ConfigLayer::default()
                },
            )
            .unwrap()
        };

        assert!(resolve(MAX_TIMEOUT_SECS).daemon().is_ok());
        assert!(matches!(
            resolve(MAX_TIMEOUT_SECS + 1).daemon(),
            Err(AgentError::Config(_))
        ));
        assert!(matches!(
            resolve(u64::MAX / 4).daemon(),
            Err(AgentError::Config(_))
        ));
    }

    #[test]
    fn test_daemon_requires_addresses() {
        let config = Config::resolve(&ConfigSources::default(), ConfigLayer::default()).unwrap();
        assert!(matches!(config.daemon(), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_check_address() {
        assert!(check_address("docker", Some("host:2375")).is_ok());
        assert!(check_address("docker", Some(":2375")).is_err());
        assert!(check_address("docker", Some("host")).is_err());
        assert!(check_address("docker", None).is_err());
    }

    #[test]
    fn test_display_masks_secret() {
        let config = Config {
            docker: Some("10.0.0.5:2375".to_string()),
            master: None,
            secret: Some("s3cr3t".to_string()),
            timeout: 10,
            log_level: 2,
            files_read: Vec::new(),
        };
        let shown = config.to_string();
        assert!(!shown.contains("s3cr3t"));
        assert!(shown.contains("master=<unset>"));
    }

    #[test]
    fn test_sample_config_parses() {
        let layer: ConfigLayer = toml::from_str(SAMPLE_CONFIG).unwrap();
        assert_eq!(layer.timeout, Some(10));
        assert!(check_address("master", layer.master.as_deref()).is_ok());
    }
}
